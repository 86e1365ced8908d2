//! Formatter (spec.md §4.5): lays down a blank header, TOC, and FAT on
//! an existing image file and zeroes every list entry's first byte.

use std::path::Path;

use log::info;

use crate::disk::Disk;
use crate::error::Result;
use crate::header::Toc;
use crate::layout::{self, ObjectKind};

/// Formats the image at `path`, which must already exist and be at
/// least `MIN_DISK_SIZE` bytes. `label` is truncated to 16 bytes and
/// space-padded; the media type is always written as plain HDD (no OS).
pub fn format(path: &Path, label: &str) -> Result<()> {
    let mut disk = Disk::open_existing(path)?;
    let len = disk.len()?;

    write_header(&mut disk)?;
    write_toc(&mut disk, label, len)?;
    write_fat(&mut disk, len)?;
    zero_list_entries(&mut disk)?;

    disk.flush()?;
    info!("formatted {:?}: {} bytes", path, len);
    Ok(())
}

fn write_header(disk: &mut Disk) -> Result<()> {
    let mut buf = [0u8; layout::HEADER_SIZE as usize];
    buf[4..14].copy_from_slice(layout::MACHINE_NAME.as_slice());
    buf[14] = layout::MediaType::Hdd.to_byte();
    // Bytes 15..50 are the fixed descriptive text the original hardware
    // ships; left zeroed here since no driver path reads past byte 14.
    disk.write_at(layout::HEADER_OFFSET, &buf)
}

fn write_toc(disk: &mut Disk, label: &str, file_len: u64) -> Result<()> {
    let mut padded_label = [b' '; layout::TOC_LABEL_LEN];
    let bytes = label.as_bytes();
    let n = bytes.len().min(layout::TOC_LABEL_LEN);
    padded_label[..n].copy_from_slice(&bytes[..n]);

    let block_count = (file_len / layout::BLOCK_SIZE).min(layout::MAX_BLK_CNT as u64) as u32;

    let toc = Toc {
        label: padded_label,
        block_count,
        counts: [0; 5],
    };
    crate::header::write_toc(disk, &toc)
}

fn write_fat(disk: &mut Disk, file_len: u64) -> Result<()> {
    let usable = usable_cluster_count(file_len);

    disk.write_u16_be(layout::FAT_OFFSET, layout::FAT_CLUSTER0_MAGIC)?;
    disk.write_u16_be(
        layout::FAT_OFFSET + 2,
        usable.saturating_sub(layout::FAT_DATA_MIN),
    )?;

    for cluster in layout::FAT_DATA_MIN..usable {
        disk.write_u16_be(layout::FAT_OFFSET + cluster as u64 * 2, layout::FAT_FREE)?;
    }
    for cluster in usable..(layout::FAT_ENTRY_COUNT as u16) {
        disk.write_u16_be(layout::FAT_OFFSET + cluster as u64 * 2, layout::FAT_EOC)?;
    }
    Ok(())
}

/// Number of whole clusters that fit in the audio section of an image
/// of `file_len` bytes, clamped to the representable range.
fn usable_cluster_count(file_len: u64) -> u16 {
    if file_len <= layout::AUDIO_SECTION_OFFSET {
        return layout::FAT_DATA_MIN;
    }
    let audio_bytes = file_len - layout::AUDIO_SECTION_OFFSET;
    let clusters = audio_bytes / layout::CLUSTER_SIZE;
    let max = (layout::MAX_BLK_CNT as u64).min(layout::FAT_ENTRY_COUNT as u64 - 1);
    (layout::FAT_DATA_MIN as u64 + clusters.min(max))
        .min(layout::FAT_ENTRY_COUNT as u64 - 1) as u16
}

fn zero_list_entries(disk: &mut Disk) -> Result<()> {
    for kind in ObjectKind::ALL {
        let info = kind.info();
        for slot in 0..info.max_count {
            let off = info.list_addr + slot as u64 * layout::LIST_ENTRY_SIZE;
            disk.write_at(off, &[0u8])?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header;

    fn scratch_image(size: u64) -> std::path::PathBuf {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let path = tmp.into_temp_path().keep().unwrap();
        let mut disk = Disk::create_or_open(&path).unwrap();
        disk.set_len(size).unwrap();
        path
    }

    #[test]
    fn format_then_mount_round_trips() {
        let path = scratch_image(layout::MIN_DISK_SIZE * 2);
        format(&path, "TEST DISK").unwrap();

        let mut disk = Disk::open_existing(&path).unwrap();
        let header = header::read_header(&mut disk).unwrap();
        assert_eq!(header.media_type, layout::MediaType::Hdd);

        let toc = header::read_toc(&mut disk).unwrap();
        assert_eq!(&toc.label[..9], b"TEST DISK");
        for kind in ObjectKind::ALL {
            assert_eq!(toc.count(kind), 0);
        }

        let fat = crate::fat::FatTable::load(&mut disk).unwrap();
        assert_eq!(fat.get(0), layout::FAT_CLUSTER0_MAGIC);
        assert!(fat.get(2) == layout::FAT_FREE || fat.get(2) == layout::FAT_EOC);
    }

    #[test]
    fn list_entries_start_empty() {
        let path = scratch_image(layout::MIN_DISK_SIZE);
        format(&path, "").unwrap();
        let mut disk = Disk::open_existing(&path).unwrap();
        let entry = crate::objects::load_entry(&mut disk, ObjectKind::Patch, 0);
        assert!(matches!(entry, Err(crate::error::Error::EmptyEntry)));
    }
}
