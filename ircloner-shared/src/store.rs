//! Named slots of captured waveforms in non-volatile storage.
//!
//! Slot `i` lives at `i * SLOT_STRIDE`. All scans run in ascending slot
//! order, lookups and free slot selection rely on that.

use std::io;

use thiserror::Error;

use crate::nvs::NvStorage;
use crate::record::{Name, WaveformRecord, EEPROM_SIZE, MAX_COMMANDS, RECORD_SIZE, SLOT_STRIDE};

/// Written right after a saved record. Not part of the firmware layout,
/// which leaves these bytes unused.
pub const MARKER: [u8; 2] = [0xa5, 0x01];

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no free slot")]
    Full,
    #[error("record has no name")]
    EmptyName,
    #[error("storage: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Free,
    /// Named and carrying the marker
    Occupied,
    /// Named but without marker. Either written by firmware that does not
    /// know about the marker, or garbage.
    Unverified,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StoreConfig {
    /// Treat unverified slots as free
    pub verify_marker: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub slot: usize,
    pub name: Name,
    pub verified: bool,
}

/// Outcome of [`WaveformStore::insert`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inserted {
    New(usize),
    Overwritten(usize),
    /// Name taken and the overwrite was not confirmed
    Declined(usize),
}

pub struct WaveformStore<S> {
    storage: S,
    config: StoreConfig,
}

impl<S: NvStorage> WaveformStore<S> {
    pub fn new(storage: S) -> Self {
        Self::with_config(storage, StoreConfig::default())
    }

    pub fn with_config(storage: S, config: StoreConfig) -> Self {
        if storage.capacity() < EEPROM_SIZE {
            log::warn!(
                "Storage holds {} bytes, {} needed for {} slots",
                storage.capacity(),
                EEPROM_SIZE,
                MAX_COMMANDS
            );
        }

        WaveformStore { storage, config }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn into_inner(self) -> S {
        self.storage
    }

    /// Read the record in `slot`. Out of range slots read as empty.
    pub fn load(&mut self, slot: usize) -> Result<WaveformRecord, StoreError> {
        self.read_slot(slot).map(|(record, _)| record)
    }

    fn read_slot(&mut self, slot: usize) -> Result<(WaveformRecord, bool), StoreError> {
        if slot >= MAX_COMMANDS {
            log::debug!("load: slot {} out of range", slot);
            return Ok((WaveformRecord::empty(), false));
        }

        let addr = slot * SLOT_STRIDE;
        let mut buf = [0u8; RECORD_SIZE];
        let mut marker = [0u8; 2];

        self.storage.read(addr, &mut buf)?;
        self.storage.read(addr + RECORD_SIZE, &mut marker)?;

        Ok((WaveformRecord::decode(&buf), marker == MARKER))
    }

    /// Write `record` to `slot` and commit. Out of range slots are ignored.
    pub fn save(&mut self, slot: usize, record: &WaveformRecord) -> Result<(), StoreError> {
        if slot >= MAX_COMMANDS {
            log::debug!("save: slot {} out of range", slot);
            return Ok(());
        }

        let marker = if record.is_empty() { [0; 2] } else { MARKER };
        self.write_slot(slot, &record.encode(), &marker)?;

        log::info!("Saved '{}' ({} samples) to slot {}", record.name(), record.len(), slot);
        Ok(())
    }

    /// Zero `slot` and commit
    pub fn clear(&mut self, slot: usize) -> Result<(), StoreError> {
        if slot >= MAX_COMMANDS {
            log::debug!("clear: slot {} out of range", slot);
            return Ok(());
        }

        self.write_slot(slot, &[0; RECORD_SIZE], &[0; 2])?;

        log::debug!("Cleared slot {}", slot);
        Ok(())
    }

    fn write_slot(&mut self, slot: usize, record: &[u8], marker: &[u8]) -> Result<(), StoreError> {
        let addr = slot * SLOT_STRIDE;

        self.storage.write(addr, record)?;
        self.storage.write(addr + RECORD_SIZE, marker)?;
        self.storage.commit()?;

        Ok(())
    }

    pub fn clear_all(&mut self) -> Result<(), StoreError> {
        for slot in 0..MAX_COMMANDS {
            self.clear(slot)?;
        }
        log::info!("Cleared all slots");
        Ok(())
    }

    pub fn slot_state(&mut self, slot: usize) -> Result<SlotState, StoreError> {
        let (record, marked) = self.read_slot(slot)?;

        Ok(match (record.is_empty(), marked) {
            (true, _) => SlotState::Free,
            (false, true) => SlotState::Occupied,
            (false, false) => SlotState::Unverified,
        })
    }

    /// The record in `slot` if the slot counts as in use
    fn live(&mut self, slot: usize) -> Result<Option<(WaveformRecord, bool)>, StoreError> {
        let (record, marked) = self.read_slot(slot)?;

        if record.is_empty() || (self.config.verify_marker && !marked) {
            Ok(None)
        } else {
            Ok(Some((record, marked)))
        }
    }

    /// First named slot holding `target`, marked or not
    fn find_named(&mut self, target: &str) -> Result<Option<usize>, StoreError> {
        for slot in 0..MAX_COMMANDS {
            let (record, _) = self.read_slot(slot)?;
            if record.name_matches(target) {
                return Ok(Some(slot));
            }
        }
        Ok(None)
    }

    /// First slot, in ascending order, holding `target` (case-insensitive)
    pub fn find_by_name(&mut self, target: &str) -> Result<Option<usize>, StoreError> {
        for slot in 0..MAX_COMMANDS {
            if let Some((record, _)) = self.live(slot)? {
                if record.name_matches(target) {
                    return Ok(Some(slot));
                }
            }
        }
        Ok(None)
    }

    pub fn list_occupied(&mut self) -> Result<Vec<Entry>, StoreError> {
        let mut entries = Vec::new();

        for slot in 0..MAX_COMMANDS {
            if let Some((record, verified)) = self.live(slot)? {
                entries.push(Entry {
                    slot,
                    name: record.name().into(),
                    verified,
                });
            }
        }

        Ok(entries)
    }

    pub fn first_free(&mut self) -> Result<Option<usize>, StoreError> {
        for slot in 0..MAX_COMMANDS {
            if self.live(slot)?.is_none() {
                return Ok(Some(slot));
            }
        }
        Ok(None)
    }

    /// Insert `record`, or overwrite the slot already holding its name.
    ///
    /// On a name collision `confirm` is asked with the slot in question and
    /// the slot is only overwritten when it answers `true`. Unverified
    /// slots count as collisions even when they are otherwise treated as
    /// free, a name is never stored twice.
    pub fn insert<F>(&mut self, record: &WaveformRecord, confirm: F) -> Result<Inserted, StoreError>
    where
        F: FnOnce(usize) -> io::Result<bool>,
    {
        if record.is_empty() {
            return Err(StoreError::EmptyName);
        }

        if let Some(slot) = self.find_named(record.name())? {
            if !confirm(slot)? {
                log::debug!("Overwrite of slot {} declined", slot);
                return Ok(Inserted::Declined(slot));
            }
            self.save(slot, record)?;
            return Ok(Inserted::Overwritten(slot));
        }

        match self.first_free()? {
            Some(slot) => {
                self.save(slot, record)?;
                Ok(Inserted::New(slot))
            }
            None => {
                log::warn!("No free slot for '{}'", record.name());
                Err(StoreError::Full)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nvs::MemStorage;

    fn store() -> WaveformStore<MemStorage> {
        WaveformStore::new(MemStorage::new(EEPROM_SIZE))
    }

    fn never(_: usize) -> io::Result<bool> {
        panic!("unexpected confirmation")
    }

    fn names(store: &mut WaveformStore<MemStorage>) -> Vec<String> {
        store
            .list_occupied()
            .unwrap()
            .into_iter()
            .map(|e| e.name.as_str().to_string())
            .collect()
    }

    #[test]
    fn empty_store_lists_nothing() {
        let mut store = store();
        assert!(store.list_occupied().unwrap().is_empty());
        assert_eq!(store.find_by_name("tv-power").unwrap(), None);
        assert_eq!(store.find_by_name("").unwrap(), None);
    }

    #[test]
    fn insert_lands_in_first_slot() {
        let mut store = store();
        let rec = WaveformRecord::new("tv-power", &[560; 40]);

        assert_eq!(store.insert(&rec, never).unwrap(), Inserted::New(0));
        assert_eq!(store.find_by_name("TV-POWER").unwrap(), Some(0));
        assert_eq!(store.slot_state(0).unwrap(), SlotState::Occupied);
        assert_eq!(store.storage().commits(), 1);
    }

    #[test]
    fn full_store_rejects_new_name() {
        let mut store = store();
        for name in &["a", "b", "c"] {
            store.insert(&WaveformRecord::new(name, &[1, 2]), never).unwrap();
        }
        let before = store.storage().durable().to_vec();

        let res = store.insert(&WaveformRecord::new("d", &[3]), never);
        assert!(matches!(res, Err(StoreError::Full)));
        assert_eq!(store.storage().durable(), &before[..]);
        assert_eq!(names(&mut store), ["a", "b", "c"]);
    }

    #[test]
    fn overwrite_needs_confirmation() {
        let mut store = store();
        store.insert(&WaveformRecord::new("tv-power", &[1; 40]), never).unwrap();

        let second = WaveformRecord::new("TV-Power", &[2; 30]);
        let mut asked = None;
        let res = store.insert(&second, |slot| {
            asked = Some(slot);
            Ok(false)
        });
        assert_eq!(res.unwrap(), Inserted::Declined(0));
        assert_eq!(asked, Some(0));
        assert_eq!(store.load(0).unwrap().samples(), &[1; 40][..]);

        assert_eq!(store.insert(&second, |_| Ok(true)).unwrap(), Inserted::Overwritten(0));
        assert_eq!(store.load(0).unwrap(), second);
        assert_eq!(store.list_occupied().unwrap().len(), 1);
    }

    #[test]
    fn confirmation_error_aborts() {
        let mut store = store();
        store.insert(&WaveformRecord::new("tv", &[1]), never).unwrap();

        let res = store.insert(&WaveformRecord::new("tv", &[2]), |_| {
            Err(io::ErrorKind::UnexpectedEof.into())
        });
        assert!(matches!(res, Err(StoreError::Io(_))));
        assert_eq!(store.load(0).unwrap().samples(), &[1]);
    }

    #[test]
    fn empty_name_is_refused() {
        let mut store = store();
        let res = store.insert(&WaveformRecord::new("", &[1, 2, 3]), never);
        assert!(matches!(res, Err(StoreError::EmptyName)));
        assert_eq!(store.storage().commits(), 0);
    }

    #[test]
    fn delete_frees_slot() {
        let mut store = store();
        store.insert(&WaveformRecord::new("tv-power", &[1]), never).unwrap();
        store.insert(&WaveformRecord::new("amp", &[1]), never).unwrap();

        let slot = store.find_by_name("TV-POWER").unwrap().unwrap();
        store.clear(slot).unwrap();

        assert_eq!(store.find_by_name("tv-power").unwrap(), None);
        assert_eq!(store.slot_state(0).unwrap(), SlotState::Free);
        assert_eq!(store.load(0).unwrap(), WaveformRecord::empty());

        // Freed slot is reused before the later ones
        let res = store.insert(&WaveformRecord::new("dvd", &[1]), never).unwrap();
        assert_eq!(res, Inserted::New(0));
    }

    #[test]
    fn clear_all_zeroes_every_slot() {
        let mut store = store();
        for name in &["a", "b", "c"] {
            store.insert(&WaveformRecord::new(name, &[7; 100]), never).unwrap();
        }
        store.clear_all().unwrap();

        assert!(store.list_occupied().unwrap().is_empty());
        for slot in 0..MAX_COMMANDS {
            let start = slot * SLOT_STRIDE;
            let region = &store.storage().durable()[start..start + RECORD_SIZE + 2];
            assert!(region.iter().all(|b| *b == 0));
        }
    }

    #[test]
    fn out_of_range_slots_are_absorbed() {
        let mut store = store();
        let rec = WaveformRecord::new("x", &[1]);

        store.save(MAX_COMMANDS, &rec).unwrap();
        store.clear(42).unwrap();
        assert_eq!(store.load(MAX_COMMANDS).unwrap(), WaveformRecord::empty());
        assert_eq!(store.storage().commits(), 0);
    }

    #[test]
    fn unmarked_records() {
        // Slot 1 written by firmware that knows nothing of the marker
        let mut image = vec![0u8; EEPROM_SIZE];
        let rec = WaveformRecord::new("legacy", &[9000, 4500]);
        image[SLOT_STRIDE..SLOT_STRIDE + RECORD_SIZE].copy_from_slice(&rec.encode());

        let mut store = WaveformStore::new(MemStorage::from_image(&image));
        assert_eq!(store.slot_state(1).unwrap(), SlotState::Unverified);
        assert_eq!(store.find_by_name("LEGACY").unwrap(), Some(1));
        let list = store.list_occupied().unwrap();
        assert_eq!(list.len(), 1);
        assert!(!list[0].verified);

        let config = StoreConfig { verify_marker: true };
        let mut strict = WaveformStore::with_config(MemStorage::from_image(&image), config);
        assert_eq!(strict.find_by_name("legacy").unwrap(), None);
        assert!(strict.list_occupied().unwrap().is_empty());
        assert_eq!(strict.first_free().unwrap(), Some(0));
    }

    #[test]
    fn unmarked_name_still_collides() {
        let mut image = vec![0u8; EEPROM_SIZE];
        let rec = WaveformRecord::new("legacy", &[9000, 4500]);
        image[SLOT_STRIDE..SLOT_STRIDE + RECORD_SIZE].copy_from_slice(&rec.encode());

        let config = StoreConfig { verify_marker: true };
        let mut strict = WaveformStore::with_config(MemStorage::from_image(&image), config);

        let replacement = WaveformRecord::new("LEGACY", &[560; 4]);
        let mut asked = None;
        let res = strict.insert(&replacement, |slot| {
            asked = Some(slot);
            Ok(true)
        });
        assert_eq!(res.unwrap(), Inserted::Overwritten(1));
        assert_eq!(asked, Some(1));
        assert_eq!(strict.slot_state(1).unwrap(), SlotState::Occupied);
        assert_eq!(strict.slot_state(0).unwrap(), SlotState::Free);

        let mut storage = strict.into_inner();
        storage.power_cycle();
        let mut store = WaveformStore::new(storage);
        let list = store.list_occupied().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].slot, 1);
        assert_eq!(list[0].name.as_str(), "LEGACY");
        assert!(list[0].verified);
    }

    #[test]
    fn unmarked_name_declined_keeps_slot() {
        let mut image = vec![0u8; EEPROM_SIZE];
        let rec = WaveformRecord::new("legacy", &[9000, 4500]);
        image[..RECORD_SIZE].copy_from_slice(&rec.encode());

        let config = StoreConfig { verify_marker: true };
        let mut strict = WaveformStore::with_config(MemStorage::from_image(&image), config);

        let res = strict.insert(&WaveformRecord::new("legacy", &[1]), |_| Ok(false));
        assert_eq!(res.unwrap(), Inserted::Declined(0));
        assert_eq!(strict.load(0).unwrap(), rec);
        assert_eq!(strict.storage().commits(), 0);
    }

    #[test]
    fn data_survives_power_cycle() {
        let mut store = store();
        let rec = WaveformRecord::new("fan", &[100, 200, 300]);
        store.insert(&rec, never).unwrap();

        let mut storage = store.into_inner();
        storage.power_cycle();

        let mut store = WaveformStore::new(storage);
        assert_eq!(store.load(0).unwrap(), rec);
    }
}
