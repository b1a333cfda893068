//! Byte addressable non-volatile storage.
//!
//! Modelled on the EEPROM emulation of the ESP32 family: reads and writes
//! hit a working copy in RAM, `commit` is what makes the region durable.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

pub trait NvStorage {
    /// Size of the region in bytes
    fn capacity(&self) -> usize;

    fn read(&mut self, addr: usize, buf: &mut [u8]) -> io::Result<()>;

    fn write(&mut self, addr: usize, data: &[u8]) -> io::Result<()>;

    /// Make all writes so far durable. Blocks until done.
    fn commit(&mut self) -> io::Result<()>;
}

fn check_range(addr: usize, len: usize, capacity: usize) -> io::Result<()> {
    match addr.checked_add(len) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "access {}..{} outside of {} byte region",
                addr,
                addr.saturating_add(len),
                capacity
            ),
        )),
    }
}

/// RAM backed storage.
///
/// Keeps the committed image apart from the working copy, so tests can
/// tell what would have survived a power cycle.
#[derive(Debug, Clone)]
pub struct MemStorage {
    working: Vec<u8>,
    durable: Vec<u8>,
    commits: usize,
}

impl MemStorage {
    pub fn new(capacity: usize) -> Self {
        MemStorage {
            working: vec![0; capacity],
            durable: vec![0; capacity],
            commits: 0,
        }
    }

    /// Start from an existing image, as if it had been committed before
    pub fn from_image(image: &[u8]) -> Self {
        MemStorage {
            working: image.to_vec(),
            durable: image.to_vec(),
            commits: 0,
        }
    }

    /// What a power cycle would leave behind
    pub fn durable(&self) -> &[u8] {
        &self.durable
    }

    pub fn commits(&self) -> usize {
        self.commits
    }

    /// Drop uncommitted writes
    pub fn power_cycle(&mut self) {
        self.working.copy_from_slice(&self.durable);
    }
}

impl NvStorage for MemStorage {
    fn capacity(&self) -> usize {
        self.working.len()
    }

    fn read(&mut self, addr: usize, buf: &mut [u8]) -> io::Result<()> {
        check_range(addr, buf.len(), self.capacity())?;
        buf.copy_from_slice(&self.working[addr..addr + buf.len()]);
        Ok(())
    }

    fn write(&mut self, addr: usize, data: &[u8]) -> io::Result<()> {
        check_range(addr, data.len(), self.capacity())?;
        self.working[addr..addr + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn commit(&mut self) -> io::Result<()> {
        self.durable.copy_from_slice(&self.working);
        self.commits += 1;
        Ok(())
    }
}

/// Storage backed by an image file on disk.
pub struct FileStorage {
    file: File,
    working: Vec<u8>,
}

impl FileStorage {
    /// Open or create the image at `path`. A missing or short image is
    /// zero extended to `capacity` bytes, a longer one is left as is and
    /// only its first `capacity` bytes are used.
    pub fn open<P: AsRef<Path>>(path: P, capacity: usize) -> io::Result<Self> {
        let path = path.as_ref();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        let mut image = Vec::with_capacity(capacity);
        (&mut file).take(capacity as u64).read_to_end(&mut image)?;

        if image.len() < capacity {
            log::info!(
                "Initializing {} ({} of {} bytes present)",
                path.display(),
                image.len(),
                capacity
            );
        }
        image.resize(capacity, 0);

        Ok(FileStorage { file, working: image })
    }
}

impl NvStorage for FileStorage {
    fn capacity(&self) -> usize {
        self.working.len()
    }

    fn read(&mut self, addr: usize, buf: &mut [u8]) -> io::Result<()> {
        check_range(addr, buf.len(), self.capacity())?;
        buf.copy_from_slice(&self.working[addr..addr + buf.len()]);
        Ok(())
    }

    fn write(&mut self, addr: usize, data: &[u8]) -> io::Result<()> {
        check_range(addr, data.len(), self.capacity())?;
        self.working[addr..addr + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn commit(&mut self) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&self.working)?;
        self.file.sync_all()
    }
}

impl<S: NvStorage + ?Sized> NvStorage for Box<S> {
    fn capacity(&self) -> usize {
        (**self).capacity()
    }

    fn read(&mut self, addr: usize, buf: &mut [u8]) -> io::Result<()> {
        (**self).read(addr, buf)
    }

    fn write(&mut self, addr: usize, data: &[u8]) -> io::Result<()> {
        (**self).write(addr, data)
    }

    fn commit(&mut self) -> io::Result<()> {
        (**self).commit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_need_commit() {
        let mut mem = MemStorage::new(16);
        mem.write(4, &[1, 2, 3]).unwrap();

        let mut buf = [0; 3];
        mem.read(4, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3]);
        assert_eq!(&mem.durable()[4..7], &[0, 0, 0]);

        mem.power_cycle();
        mem.read(4, &mut buf).unwrap();
        assert_eq!(buf, [0, 0, 0]);

        mem.write(4, &[1, 2, 3]).unwrap();
        mem.commit().unwrap();
        mem.power_cycle();
        mem.read(4, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3]);
        assert_eq!(mem.commits(), 1);
    }

    #[test]
    fn out_of_range_access() {
        let mut mem = MemStorage::new(16);
        let mut buf = [0; 4];

        let err = mem.read(14, &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(mem.write(16, &[1]).is_err());
        assert!(mem.write(usize::MAX, &[1]).is_err());
        assert!(mem.write(15, &[1]).is_ok());
    }
}
