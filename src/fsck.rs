//! Checker (spec.md §4.6): scans a mounted-or-mountable image for the
//! seven invariant violations the original driver knows how to detect,
//! repairing each in place when the repair is unambiguous.

use std::path::Path;

use bitflags::bitflags;
use log::warn;

use crate::disk::Disk;
use crate::error::Result;
use crate::fat::FatTable;
use crate::header::{self, Toc};
use crate::layout::{self, ObjectKind};
use crate::objects;

bitflags! {
    /// One bit per condition in spec.md's fsck table. Multiple bits may
    /// be set; each corresponds to one repair already applied by the
    /// time `check` returns.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Finding: u32 {
        const TOC_COUNT_MISMATCH      = 1 << 0;
        const BLOCK_COUNT_OUT_OF_RANGE = 1 << 1;
        const FAT0_MAGIC_MISMATCH     = 1 << 2;
        const CLUSTER_NOT_RESERVED    = 1 << 3;
        const FREE_COUNT_MISMATCH     = 1 << 4;
        const ELEMENT_TYPE_MISMATCH   = 1 << 5;
        const SLOT_PAST_TERMINATOR    = 1 << 6;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Report {
    pub findings: Finding,
}

impl Report {
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }
}

/// Opens `path`, validates it as mountable, and repairs every
/// detectable inconsistency. Sample-chain/sample-list coherence is not
/// checked (spec.md §4.6 "future work").
pub fn check(path: &Path) -> Result<Report> {
    let mut disk = Disk::open_existing(path)?;
    let len = disk.len()?;
    if len < layout::MIN_DISK_SIZE {
        return Err(crate::error::Error::DiskTooSmall);
    }

    let header = header::read_header(&mut disk)?;
    let mut toc = header::read_toc(&mut disk)?;
    let mut fat = FatTable::load(&mut disk)?;

    let mut findings = Finding::empty();

    findings |= check_block_count(&mut toc);
    findings |= check_fat0_magic(&mut disk, &mut fat)?;
    findings |= check_reserved_range(&mut disk, &mut fat, len)?;
    findings |= check_free_counter(&mut disk, &mut fat)?;
    findings |= check_object_tables(&mut disk, &mut toc)?;

    if findings.contains(Finding::TOC_COUNT_MISMATCH)
        || findings.contains(Finding::BLOCK_COUNT_OUT_OF_RANGE)
    {
        header::write_toc(&mut disk, &toc)?;
    }

    let _ = header.media_type;
    Ok(Report { findings })
}

fn check_block_count(toc: &mut Toc) -> Finding {
    if toc.block_count > layout::MAX_BLK_CNT {
        warn!("TOC block count {} exceeds maximum, clamping", toc.block_count);
        toc.block_count = layout::MAX_BLK_CNT;
        return Finding::BLOCK_COUNT_OUT_OF_RANGE;
    }
    Finding::empty()
}

fn check_fat0_magic(disk: &mut Disk, fat: &mut FatTable) -> Result<Finding> {
    if fat.get(0) != layout::FAT_CLUSTER0_MAGIC {
        warn!("FAT[0] missing the S-7XX magic, repairing");
        fat.set(disk, 0, layout::FAT_CLUSTER0_MAGIC)?;
        return Ok(Finding::FAT0_MAGIC_MISMATCH);
    }
    Ok(Finding::empty())
}

fn check_reserved_range(disk: &mut Disk, fat: &mut FatTable, len: u64) -> Result<Finding> {
    let usable = if len <= layout::AUDIO_SECTION_OFFSET {
        layout::FAT_DATA_MIN
    } else {
        let clusters = (len - layout::AUDIO_SECTION_OFFSET) / layout::CLUSTER_SIZE;
        (layout::FAT_DATA_MIN as u64 + clusters).min(fat.len() as u64 - 1) as u16
    };

    let mut found = false;
    for cluster in usable..=(layout::FAT_ENTRY_COUNT - 1) as u16 {
        let v = fat.get(cluster);
        if v != layout::FAT_EOC && !layout::is_reserved_special(v) {
            warn!("cluster {} beyond usable range not marked reserved, repairing", cluster);
            fat.set(disk, cluster, layout::FAT_EOC)?;
            found = true;
        }
    }
    Ok(if found {
        Finding::CLUSTER_NOT_RESERVED
    } else {
        Finding::empty()
    })
}

fn check_free_counter(disk: &mut Disk, fat: &mut FatTable) -> Result<Finding> {
    let observed = fat.count_free_in_usable_range();
    if fat.free_count() != observed {
        warn!(
            "FAT[1] free-cluster counter ({}) disagrees with observed count ({}), rewriting",
            fat.free_count(),
            observed
        );
        fat.write_free_counter(disk, observed)?;
        return Ok(Finding::FREE_COUNT_MISMATCH);
    }
    Ok(Finding::empty())
}

fn check_object_tables(disk: &mut Disk, toc: &mut Toc) -> Result<Finding> {
    let mut findings = Finding::empty();

    for kind in ObjectKind::ALL {
        let (actual_count, type_mismatch, past_terminator) = scan_kind(disk, kind)?;

        if type_mismatch {
            findings |= Finding::ELEMENT_TYPE_MISMATCH;
        }
        if past_terminator {
            findings |= Finding::SLOT_PAST_TERMINATOR;
        }
        if toc.count(kind) != actual_count {
            warn!(
                "{} TOC counter ({}) disagrees with occupied slots ({}), rewriting",
                kind.dir_name(),
                toc.count(kind),
                actual_count
            );
            toc.set_count(kind, actual_count);
            findings |= Finding::TOC_COUNT_MISMATCH;
        }
    }

    Ok(findings)
}

/// Scans every slot of `kind`, repairing element-type mismatches and
/// never-used slots that sit past the last occupied slot, and returns
/// the true occupied count plus whether either repair fired.
fn scan_kind(disk: &mut Disk, kind: ObjectKind) -> Result<(u16, bool, bool)> {
    let max = kind.info().max_count;
    let mut occupied = 0u16;
    let mut last_occupied = None;
    let mut type_mismatch = false;

    for slot in 0..max {
        match objects::load_entry(disk, kind, slot) {
            Ok(mut entry) => {
                occupied += 1;
                last_occupied = Some(slot);
                if entry.element_type != kind.info().element_type {
                    warn!(
                        "{} slot {} has element-type 0x{:02X}, expected 0x{:02X}, repairing",
                        kind.dir_name(),
                        slot,
                        entry.element_type,
                        kind.info().element_type
                    );
                    entry.element_type = kind.info().element_type;
                    objects::write_entry(disk, kind, slot, &entry)?;
                    type_mismatch = true;
                }
            }
            Err(crate::error::Error::EmptyEntry) => continue,
            Err(crate::error::Error::ElementTypeMismatch) => {
                // load_entry refused the record; patch the type byte
                // directly so it can be read back and counted.
                let off_type = kind.info().list_addr + slot as u64 * layout::LIST_ENTRY_SIZE + 16;
                disk.write_at(off_type, &[kind.info().element_type])?;
                occupied += 1;
                last_occupied = Some(slot);
                type_mismatch = true;
            }
            Err(e) => return Err(e),
        }
    }

    let mut past_terminator = false;
    if let Some(last) = last_occupied {
        for slot in 0..last {
            let mut b = [0u8; 1];
            disk.read_at(
                kind.info().list_addr + slot as u64 * layout::LIST_ENTRY_SIZE,
                &mut b,
            )?;
            if b[0] == objects::SLOT_NEVER_USED {
                past_terminator = true;
                break;
            }
        }
        if past_terminator {
            warn!(
                "{} has an occupied slot past a never-used terminator, repairing",
                kind.dir_name()
            );
            objects::unzero_all_before(disk, kind, last + 1)?;
        }
    }

    Ok((occupied, type_mismatch, past_terminator))
}
