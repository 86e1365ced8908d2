//! Header/TOC codec (spec.md §4.1).
//!
//! No caching: the driver keeps a single in-memory copy loaded at mount
//! and writes through on every TOC change.

use crate::disk::Disk;
use crate::error::{Error, Result};
use crate::layout::{self, ObjectKind, MediaType};

#[derive(Debug, Clone)]
pub struct Header {
    pub media_type: MediaType,
}

/// Reads the 96-byte header: seeks past the 4 leading zero bytes, reads
/// the 10-byte machine magic and the media-type byte. Fails with
/// `WrongFs` if the magic mismatches, `MediaTypeNotHdd` if the media byte
/// names one of the original hardware's floppy variants.
pub fn read_header(disk: &mut Disk) -> Result<Header> {
    let mut buf = [0u8; layout::HEADER_SIZE as usize];
    disk.read_at(layout::HEADER_OFFSET, &mut buf)?;

    let machine_name = &buf[4..14];
    if machine_name != layout::MACHINE_NAME.as_slice() {
        return Err(Error::WrongFs);
    }

    let media_byte = buf[14];
    let media_type = MediaType::from_byte(media_byte).ok_or(Error::MediaTypeNotHdd)?;

    Ok(Header { media_type })
}

/// Overwrites only the media-type byte of the header; used when a write
/// promotes the OS pseudo-file's media type (spec.md §4.4.3).
pub fn write_media_type(disk: &mut Disk, media_type: MediaType) -> Result<()> {
    disk.write_at(layout::HEADER_OFFSET + 14, &[media_type.to_byte()])
}

#[derive(Debug, Clone)]
pub struct Toc {
    pub label: [u8; layout::TOC_LABEL_LEN],
    pub block_count: u32,
    pub counts: [u16; 5],
}

impl Toc {
    pub fn count(&self, kind: ObjectKind) -> u16 {
        self.counts[kind as usize]
    }

    pub fn set_count(&mut self, kind: ObjectKind, value: u16) {
        self.counts[kind as usize] = value;
    }
}

/// Reads the 30-byte TOC at offset 0x100 and byte-swaps each scalar to
/// host endianness (the on-disk format is always big-endian).
pub fn read_toc(disk: &mut Disk) -> Result<Toc> {
    let mut buf = [0u8; layout::TOC_SIZE as usize];
    disk.read_at(layout::TOC_OFFSET, &mut buf)?;

    let mut label = [0u8; layout::TOC_LABEL_LEN];
    label.copy_from_slice(&buf[0..16]);
    let block_count = u32::from_be_bytes(buf[16..20].try_into().unwrap());
    let mut counts = [0u16; 5];
    for (i, count) in counts.iter_mut().enumerate() {
        let off = 20 + i * 2;
        *count = u16::from_be_bytes(buf[off..off + 2].try_into().unwrap());
    }

    Ok(Toc {
        label,
        block_count,
        counts,
    })
}

/// Inverse of `read_toc`: byte-swaps before write.
pub fn write_toc(disk: &mut Disk, toc: &Toc) -> Result<()> {
    let mut buf = [0u8; layout::TOC_SIZE as usize];
    buf[0..16].copy_from_slice(&toc.label);
    buf[16..20].copy_from_slice(&toc.block_count.to_be_bytes());
    for (i, count) in toc.counts.iter().enumerate() {
        let off = 20 + i * 2;
        buf[off..off + 2].copy_from_slice(&count.to_be_bytes());
    }
    disk.write_at(layout::TOC_OFFSET, &buf)
}

/// Writes only the one 16-bit counter field for `kind`, at its fixed
/// offset within the on-disk TOC, without re-reading or rewriting the
/// rest of the record.
pub fn write_toc_count(disk: &mut Disk, kind: ObjectKind, value: u16) -> Result<()> {
    let off = layout::TOC_OFFSET + 20 + (kind as u64) * 2;
    disk.write_u16_be(off, value)
}
