//! Object-table engine (spec.md §4.3).
//!
//! Manages the five fixed-size object lists and their parallel parameter
//! regions: slot lookup by index or by stored name, slot allocation,
//! entry lifecycle markers, and TOC counter synchronization.

use crate::disk::Disk;
use crate::error::{Error, Result};
use crate::fat::FatTable;
use crate::header::Toc;
use crate::layout::{self, ObjectKind, LIST_ENTRY_SIZE};

/// First-name-byte slot states (spec.md §3.2).
pub const SLOT_NEVER_USED: u8 = 0x00;
pub const SLOT_TOMBSTONE: u8 = 0xFE;

/// A single 32-byte list entry, byte-swapped to host representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// 16-byte raw name, with the driver-level `/` ↔ `\` translation
    /// already applied (spec.md §9 Open Question 2).
    pub name: [u8; 16],
    pub element_type: u8,
    pub next: u16,
    pub prev: u16,
    pub slot: u16,
    pub program_num: u8,
    pub start_cluster: u16,
    pub cluster_count: u16,
}

impl Entry {
    pub fn fresh(kind: ObjectKind, slot: u16, name: [u8; 16]) -> Self {
        Entry {
            name,
            element_type: kind.info().element_type,
            next: 0,
            prev: 0,
            slot,
            program_num: 0,
            start_cluster: 0,
            cluster_count: 0,
        }
    }

    /// Byte layout on disk (matching the original driver's two `seekg`
    /// jumps, `S7XX_FS_drv.cpp` around lines 223-249 and 306-334):
    /// `name[16]`, `element_type`@16, a reserved byte@17, then
    /// `next_idx/prev_idx/cur_idx`@18..24, three reserved bytes@24..27,
    /// then `program_num`@27, `start_segment/segment_cnt`@28..32. The
    /// reserved bytes are never read; they're left as whatever `to_bytes`
    /// last wrote (zero).
    fn from_bytes(buf: &[u8; 32]) -> Self {
        let mut name = [0u8; 16];
        name.copy_from_slice(&buf[0..16]);
        translate_slashes(&mut name);
        Entry {
            name,
            element_type: buf[16],
            next: u16::from_be_bytes([buf[18], buf[19]]),
            prev: u16::from_be_bytes([buf[20], buf[21]]),
            slot: u16::from_be_bytes([buf[22], buf[23]]),
            program_num: buf[27],
            start_cluster: u16::from_be_bytes([buf[28], buf[29]]),
            cluster_count: u16::from_be_bytes([buf[30], buf[31]]),
        }
    }

    fn to_bytes(&self) -> [u8; 32] {
        let mut buf = [0u8; 32];
        let mut name = self.name;
        translate_slashes(&mut name);
        buf[0..16].copy_from_slice(&name);
        buf[16] = self.element_type;
        buf[18..20].copy_from_slice(&self.next.to_be_bytes());
        buf[20..22].copy_from_slice(&self.prev.to_be_bytes());
        buf[22..24].copy_from_slice(&self.slot.to_be_bytes());
        buf[27] = self.program_num;
        buf[28..30].copy_from_slice(&self.start_cluster.to_be_bytes());
        buf[30..32].copy_from_slice(&self.cluster_count.to_be_bytes());
        buf
    }
}

/// The driver translates only `/` ↔ `\` on name read/write; every other
/// non-printable byte passes through untouched (spec.md §9 Open
/// Question 2). Applying the same swap on both read and write makes the
/// translation its own inverse.
fn translate_slashes(name: &mut [u8; 16]) {
    for b in name.iter_mut() {
        *b = match *b {
            b'/' => b'\\',
            b'\\' => b'/',
            other => other,
        };
    }
}

fn slot_offset(kind: ObjectKind, slot: u16) -> u64 {
    kind.info().list_addr + slot as u64 * LIST_ENTRY_SIZE
}

fn first_name_byte(disk: &mut Disk, kind: ObjectKind, slot: u16) -> Result<u8> {
    let mut b = [0u8; 1];
    disk.read_at(slot_offset(kind, slot), &mut b)?;
    Ok(b[0])
}

/// Reads the 32-byte entry and byte-swaps its indices. Fails with
/// `EmptyEntry` if the name-byte is `0x00` or `0xFE`, `ElementTypeMismatch`
/// if the element-type byte does not match the expected kind.
pub fn load_entry(disk: &mut Disk, kind: ObjectKind, slot: u16) -> Result<Entry> {
    let mut buf = [0u8; 32];
    disk.read_at(slot_offset(kind, slot), &mut buf)?;

    if buf[0] == SLOT_NEVER_USED || buf[0] == SLOT_TOMBSTONE {
        return Err(Error::EmptyEntry);
    }

    let entry = Entry::from_bytes(&buf);
    if entry.element_type != kind.info().element_type {
        return Err(Error::ElementTypeMismatch);
    }
    Ok(entry)
}

/// Inverse of `load_entry`.
pub fn write_entry(disk: &mut Disk, kind: ObjectKind, slot: u16, entry: &Entry) -> Result<()> {
    disk.write_at(slot_offset(kind, slot), &entry.to_bytes())
}

/// Scans from 0 for the first `0x00`-or-`0xFE` name byte. Returns `None`
/// when every slot up to `MAX_COUNT` is occupied.
pub fn find_free_slot(disk: &mut Disk, kind: ObjectKind) -> Result<Option<u16>> {
    let max = kind.info().max_count;
    for slot in 0..max {
        let b = first_name_byte(disk, kind, slot)?;
        if b == SLOT_NEVER_USED || b == SLOT_TOMBSTONE {
            return Ok(Some(slot));
        }
    }
    Ok(None)
}

/// Scans occupied slots only, stopping once `toc_count` entries have
/// been visited, for the slot whose 16-byte padded name matches `name`.
pub fn find_slot_by_name(
    disk: &mut Disk,
    kind: ObjectKind,
    name: &[u8; 16],
    toc_count: u16,
) -> Result<Option<u16>> {
    let max = kind.info().max_count;
    let mut visited = 0u16;
    for slot in 0..max {
        if visited >= toc_count {
            break;
        }
        let b = first_name_byte(disk, kind, slot)?;
        if b == SLOT_NEVER_USED {
            break;
        }
        if b == SLOT_TOMBSTONE {
            continue;
        }
        visited += 1;
        let entry = load_entry(disk, kind, slot)?;
        if &entry.name == name {
            return Ok(Some(slot));
        }
    }
    Ok(None)
}

/// Writes `0xFE` into the first-name-byte of every `0x00` slot at
/// positions `< slot`, preserving the invariant that no occupied slot
/// sits past a never-allocated terminator after `slot` is allocated.
pub fn unzero_all_before(disk: &mut Disk, kind: ObjectKind, slot: u16) -> Result<()> {
    for s in 0..slot {
        if first_name_byte(disk, kind, s)? == SLOT_NEVER_USED {
            disk.write_at(slot_offset(kind, s), &[SLOT_TOMBSTONE])?;
        }
    }
    Ok(())
}

/// Mutates the in-memory TOC counter and writes back the 16-bit field at
/// its fixed offset within the on-disk TOC.
pub fn bump_toc(disk: &mut Disk, toc: &mut Toc, kind: ObjectKind, delta: i32) -> Result<()> {
    let updated = (toc.count(kind) as i32 + delta).max(0) as u16;
    toc.set_count(kind, updated);
    crate::header::write_toc_count(disk, kind, updated)
}

/// Writes `0xFE` into byte 0, zeroes the remaining 31 entry bytes, fills
/// the parameter-region entry with `0xFF`, decrements the TOC counter,
/// and for samples also frees the cluster chain.
pub fn delete_slot(
    disk: &mut Disk,
    fat: &mut FatTable,
    toc: &mut Toc,
    kind: ObjectKind,
    slot: u16,
) -> Result<()> {
    let entry = load_entry(disk, kind, slot)?;

    if kind == ObjectKind::Sample && entry.cluster_count > 0 {
        let chain = fat.follow_chain(entry.start_cluster)?;
        fat.free_chain(disk, &chain)?;
    }

    let mut blank = [0u8; 32];
    blank[0] = SLOT_TOMBSTONE;
    disk.write_at(slot_offset(kind, slot), &blank)?;

    let params_off = kind.info().params_addr + slot as u64 * kind.info().params_entry_size;
    let filler = vec![0xFFu8; kind.info().params_entry_size as usize];
    disk.write_at(params_off, &filler)?;

    bump_toc(disk, toc, kind, -1)
}

/// Left-justifies `display_name` and pads with spaces to exactly 16
/// bytes, as the driver renders a slot name for presentation.
pub fn pad_name(display_name: &str) -> [u8; 16] {
    let mut name = [b' '; 16];
    let bytes = display_name.as_bytes();
    let len = bytes.len().min(16);
    name[..len].copy_from_slice(&bytes[..len]);
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::Disk;
    use crate::layout::AUDIO_SECTION_OFFSET;

    fn scratch_disk() -> Disk {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let path = tmp.into_temp_path().keep().unwrap();
        let mut disk = Disk::create_or_open(&path).unwrap();
        disk.set_len(AUDIO_SECTION_OFFSET).unwrap();
        disk
    }

    #[test]
    fn round_trip_entry() {
        let mut disk = scratch_disk();
        let kind = ObjectKind::Patch;
        let entry = Entry::fresh(kind, 3, pad_name("TESTPATCH"));
        write_entry(&mut disk, kind, 3, &entry).unwrap();
        let loaded = load_entry(&mut disk, kind, 3).unwrap();
        assert_eq!(loaded, entry);
    }

    #[test]
    fn empty_slot_is_empty_entry() {
        let mut disk = scratch_disk();
        assert!(matches!(
            load_entry(&mut disk, ObjectKind::Patch, 0),
            Err(Error::EmptyEntry)
        ));
    }

    #[test]
    fn find_free_slot_skips_occupied_and_tombstones() {
        let mut disk = scratch_disk();
        let kind = ObjectKind::Patch;
        let entry = Entry::fresh(kind, 0, pad_name("A"));
        write_entry(&mut disk, kind, 0, &entry).unwrap();
        disk.write_at(slot_offset(kind, 1), &[SLOT_TOMBSTONE]).unwrap();
        assert_eq!(find_free_slot(&mut disk, kind).unwrap(), Some(1));
    }

    #[test]
    fn slash_backslash_round_trips() {
        let mut name = *b"foo/bar\\baz\0\0\0\0\0";
        let original = name;
        translate_slashes(&mut name);
        translate_slashes(&mut name);
        assert_eq!(name, original);
    }
}
