//! The random-access byte stream every other component is defined over.
//!
//! `Disk` owns the backing file handle and nothing else: no caching, no
//! locking of its own. The single filesystem mutex (see `vfs::Inner`)
//! governs every call in here, so a `Disk` method that needs seek+read or
//! seek+write to be atomic can simply take `&mut self` and rely on the
//! caller already holding that mutex for the whole span, per spec.md §5.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{Error, Result};

pub struct Disk {
    file: File,
}

impl Disk {
    pub fn open_existing(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::NonexistantDisk);
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(Error::Io)?;
        Ok(Self { file })
    }

    pub fn create_or_open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        Ok(Self { file })
    }

    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    pub fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }

    pub fn read_u16_be(&mut self, offset: u64) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_at(offset, &mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    pub fn write_u16_be(&mut self, offset: u64, value: u16) -> Result<()> {
        self.write_at(offset, &value.to_be_bytes())
    }

    pub fn read_u32_be(&mut self, offset: u64) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_at(offset, &mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    pub fn write_u32_be(&mut self, offset: u64, value: u32) -> Result<()> {
        self.write_at(offset, &value.to_be_bytes())
    }

    pub fn set_len(&mut self, len: u64) -> Result<()> {
        self.file.set_len(len)?;
        Ok(())
    }
}
