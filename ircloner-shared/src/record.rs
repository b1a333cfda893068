//! Captured infrared waveform and its fixed binary layout in the
//! persistent region.
//!
//! The layout mirrors the in-memory struct of the device firmware,
//! alignment pad included, so a region dumped from a device can be read
//! back unchanged:
//!
//! ```text
//!   0..11   name, NUL padded
//!  11       pad
//!  12..14   length (u16, little endian)
//!  14..214  samples, 100 x u16 (little endian)
//! ```

use core::fmt;

use heapless::String;

/// Number of slots in the store
pub const MAX_COMMANDS: usize = 3;
/// Longest name, in bytes
pub const MAX_NAME_LEN: usize = 10;
/// Sample capacity of one record
pub const RAW_BUFFER_LENGTH: usize = 100;
/// Reserved bytes per slot in the persistent region
pub const SLOT_STRIDE: usize = 300;
/// Size of the persistent region
pub const EEPROM_SIZE: usize = MAX_COMMANDS * SLOT_STRIDE;

const NAME_FIELD: usize = MAX_NAME_LEN + 1;
const LENGTH_OFFSET: usize = 12;
const SAMPLES_OFFSET: usize = 14;

/// Serialized size of a record
pub const RECORD_SIZE: usize = SAMPLES_OFFSET + RAW_BUFFER_LENGTH * 2;

pub type Name = String<MAX_NAME_LEN>;

#[derive(Clone, PartialEq, Eq)]
pub struct WaveformRecord {
    name: Name,
    length: u16,
    samples: [u16; RAW_BUFFER_LENGTH],
}

impl WaveformRecord {
    /// Create a record, truncating the name to `MAX_NAME_LEN` bytes and the
    /// samples to `RAW_BUFFER_LENGTH` entries.
    pub fn new(name: &str, samples: &[u16]) -> Self {
        let len = samples.len().min(RAW_BUFFER_LENGTH);

        let mut record = WaveformRecord {
            name: truncate_name(name),
            length: len as u16,
            samples: [0; RAW_BUFFER_LENGTH],
        };
        record.samples[..len].copy_from_slice(&samples[..len]);
        record
    }

    /// The all-zero record of an unused slot
    pub fn empty() -> Self {
        WaveformRecord {
            name: Name::new(),
            length: 0,
            samples: [0; RAW_BUFFER_LENGTH],
        }
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }

    pub fn len(&self) -> usize {
        self.length as usize
    }

    /// The valid part of the sample buffer
    pub fn samples(&self) -> &[u16] {
        &self.samples[..self.len()]
    }

    /// Case-insensitive name comparison. Empty names never match.
    pub fn name_matches(&self, target: &str) -> bool {
        !target.is_empty() && !self.is_empty() && self.name.eq_ignore_ascii_case(target)
    }

    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];

        let name = self.name.as_bytes();
        buf[..name.len()].copy_from_slice(name);
        buf[LENGTH_OFFSET..SAMPLES_OFFSET].copy_from_slice(&self.length.to_le_bytes());

        for (chunk, sample) in buf[SAMPLES_OFFSET..].chunks_exact_mut(2).zip(self.samples.iter()) {
            chunk.copy_from_slice(&sample.to_le_bytes());
        }

        buf
    }

    /// Decode a record from the start of `buf`.
    ///
    /// Whatever the bytes hold is taken at face value: a length beyond the
    /// buffer capacity is clamped and a name that is not UTF-8 is kept with
    /// its non-ASCII bytes replaced by `?`.
    pub fn decode(buf: &[u8; RECORD_SIZE]) -> Self {
        let raw_name = &buf[..NAME_FIELD];
        let name_len = raw_name
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(NAME_FIELD)
            .min(MAX_NAME_LEN);

        let name = match core::str::from_utf8(&raw_name[..name_len]) {
            Ok(s) => truncate_name(s),
            Err(_) => raw_name[..name_len]
                .iter()
                .map(|b| if b.is_ascii() { *b as char } else { '?' })
                .collect(),
        };

        let length = u16::from_le_bytes([buf[LENGTH_OFFSET], buf[LENGTH_OFFSET + 1]])
            .min(RAW_BUFFER_LENGTH as u16);

        let mut samples = [0u16; RAW_BUFFER_LENGTH];
        for (sample, chunk) in samples.iter_mut().zip(buf[SAMPLES_OFFSET..].chunks_exact(2)) {
            *sample = u16::from_le_bytes([chunk[0], chunk[1]]);
        }

        WaveformRecord { name, length, samples }
    }
}

impl fmt::Debug for WaveformRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaveformRecord")
            .field("name", &self.name.as_str())
            .field("length", &self.length)
            .field("samples", &self.samples())
            .finish()
    }
}

/// Cut `name` down to what fits the name field, on a char boundary.
/// A NUL ends the name, as it would in the persisted field.
pub fn truncate_name(name: &str) -> Name {
    let mut out = Name::new();

    for c in name.chars().take_while(|c| *c != '\0') {
        if out.push(c).is_err() {
            break;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_offsets() {
        let rec = WaveformRecord::new("tv", &[0x1234, 0xabcd]);
        let buf = rec.encode();

        assert_eq!(RECORD_SIZE, 214);
        assert!(RECORD_SIZE < SLOT_STRIDE);
        assert_eq!(&buf[..3], b"tv\0");
        assert_eq!(buf[11], 0);
        assert_eq!(&buf[12..14], &[2, 0]);
        assert_eq!(&buf[14..18], &[0x34, 0x12, 0xcd, 0xab]);
        assert!(buf[18..].iter().all(|b| *b == 0));
    }

    #[test]
    fn samples_are_clamped() {
        let raw: Vec<u16> = (0..150).collect();
        let rec = WaveformRecord::new("long", &raw);

        assert_eq!(rec.len(), RAW_BUFFER_LENGTH);
        assert_eq!(rec.samples(), &raw[..RAW_BUFFER_LENGTH]);
    }

    #[test]
    fn name_truncation_respects_char_boundary() {
        assert_eq!(truncate_name("livingroom-tv").as_str(), "livingroom");
        // 'ä' is two bytes, the sixth one does not fit
        assert_eq!(truncate_name("ääääää").as_str(), "äääää");
        assert_eq!(truncate_name("a\0b").as_str(), "a");
    }

    #[test]
    fn matching_is_case_insensitive() {
        let rec = WaveformRecord::new("tv-power", &[]);
        assert!(rec.name_matches("TV-POWER"));
        assert!(rec.name_matches("Tv-Power"));
        assert!(!rec.name_matches("tv-powe"));
        assert!(!rec.name_matches(""));
        assert!(!WaveformRecord::empty().name_matches(""));
    }

    #[test]
    fn decode_garbage() {
        let mut buf = [0xffu8; RECORD_SIZE];
        buf[4] = 0;

        let rec = WaveformRecord::decode(&buf);
        assert_eq!(rec.name(), "????");
        assert!(!rec.is_empty());
        assert_eq!(rec.len(), RAW_BUFFER_LENGTH);
    }

    #[test]
    fn decode_unterminated_name() {
        let mut buf = [0u8; RECORD_SIZE];
        buf[..NAME_FIELD].copy_from_slice(b"abcdefghijk");

        assert_eq!(WaveformRecord::decode(&buf).name(), "abcdefghij");
    }

    #[test]
    fn decode_encoded() {
        let rec = WaveformRecord::new("Projector", &[9000, 4500, 560, 560, 560, 1690]);
        assert_eq!(WaveformRecord::decode(&rec.encode()), rec);
        assert_eq!(WaveformRecord::decode(&[0; RECORD_SIZE]), WaveformRecord::empty());
    }
}
