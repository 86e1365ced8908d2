//! File engine (spec.md §4.4): truncate, read, and write for every
//! object kind and the OS pseudo-file, plus the S-760 OS-tail relocation
//! special case. `vfs` owns path parsing, the open-file registry, and
//! the per-cluster mutex discipline; this module is the byte-level
//! engine it drives.

use crate::error::{Error, Result};
use crate::layout::{self, MediaType, ObjectKind};
use crate::objects::{self, Entry};
use crate::vfs::{Inner, OpenTarget};

/// Dispatched truncate for kinds 1-4 (spec.md §4.4.2): size is ignored
/// beyond bringing the slot into existence.
pub fn truncate_nonsample(
    inner: &mut Inner,
    kind: ObjectKind,
    slot: u16,
    is_new: bool,
    final_name: [u8; 16],
) -> Result<Entry> {
    if !is_new {
        return objects::load_entry(&mut inner.disk, kind, slot);
    }
    let entry = Entry::fresh(kind, slot, final_name);
    objects::write_entry(&mut inner.disk, kind, slot, &entry)?;
    objects::unzero_all_before(&mut inner.disk, kind, slot)?;
    objects::bump_toc(&mut inner.disk, &mut inner.toc, kind, 1)?;
    Ok(entry)
}

fn clusters_needed(size: u64, params_size: u64) -> Result<u16> {
    if size > layout::MAX_SAMPLE_SIZE {
        return Err(Error::FileTooLarge);
    }
    if size <= params_size {
        return Ok(0);
    }
    let data = size - params_size;
    let n = (data + layout::CLUSTER_SIZE - 1) / layout::CLUSTER_SIZE;
    Ok(n as u16)
}

/// Dispatched truncate for kind 5 (sample, spec.md §4.4.2).
pub fn truncate_sample(
    inner: &mut Inner,
    slot: u16,
    new_size: u64,
    is_new: bool,
    final_name: [u8; 16],
) -> Result<Entry> {
    let kind = ObjectKind::Sample;
    let params_size = kind.info().params_entry_size;

    let mut entry = if is_new {
        Entry::fresh(kind, slot, final_name)
    } else {
        objects::load_entry(&mut inner.disk, kind, slot)?
    };

    let wanted = clusters_needed(new_size, params_size)?;
    let current = entry.cluster_count;

    if wanted > current {
        grow_sample_chain(inner, &mut entry, wanted)?;
    } else if wanted < current {
        shrink_sample_chain(inner, &mut entry, wanted)?;
    }

    objects::write_entry(&mut inner.disk, kind, slot, &entry)?;

    if is_new {
        objects::unzero_all_before(&mut inner.disk, kind, slot)?;
        objects::bump_toc(&mut inner.disk, &mut inner.toc, kind, 1)?;
    }

    Ok(entry)
}

fn grow_sample_chain(inner: &mut Inner, entry: &mut Entry, wanted: u16) -> Result<()> {
    let delta = (wanted - entry.cluster_count) as usize;
    if entry.cluster_count == 0 {
        let chain = inner.fat.find_free_chain(delta)?;
        inner.fat.write_chain(&mut inner.disk, &chain)?;
        entry.start_cluster = chain[0];
    } else {
        let chain = inner.fat.follow_chain(entry.start_cluster)?;
        let tail = *chain.last().unwrap();
        let new_clusters = inner.fat.find_free_chain(delta)?;
        inner.fat.write_chain(&mut inner.disk, &new_clusters)?;
        inner
            .fat
            .set(&mut inner.disk, tail, new_clusters[0])?;
    }
    entry.cluster_count = wanted;
    Ok(())
}

fn shrink_sample_chain(inner: &mut Inner, entry: &mut Entry, wanted: u16) -> Result<()> {
    if entry.cluster_count == 0 {
        return Ok(());
    }
    let chain = inner.fat.follow_chain(entry.start_cluster)?;
    inner
        .fat
        .shrink_chain(&mut inner.disk, &chain, wanted as usize)?;
    entry.cluster_count = wanted;
    if wanted == 0 {
        entry.start_cluster = 0;
    }
    Ok(())
}

/// Dispatched truncate for kind 0 (the OS pseudo-file, spec.md §4.4.2).
/// `size` selects the media type directly.
pub fn truncate_os(inner: &mut Inner, new_size: u64) -> Result<()> {
    if new_size == 0 {
        if inner.media_type == MediaType::HddWithOsS760 {
            free_os_tail(inner)?;
        }
        set_media_type(inner, MediaType::Hdd)?;
        return Ok(());
    }

    if new_size <= layout::OS_SIZE {
        set_media_type(inner, MediaType::HddWithOs)?;
        return Ok(());
    }

    if new_size <= layout::OS_SIZE + layout::S760_EXT_OS_SIZE {
        if inner.media_type != MediaType::HddWithOsS760 {
            relocate_for_os_tail(inner)?;
        }
        set_media_type(inner, MediaType::HddWithOsS760)?;
        return Ok(());
    }

    Err(Error::FileTooLarge)
}

fn set_media_type(inner: &mut Inner, media_type: MediaType) -> Result<()> {
    crate::header::write_media_type(&mut inner.disk, media_type)?;
    inner.media_type = media_type;
    Ok(())
}

/// Relocates any user data currently occupying clusters 2..115 to later
/// free clusters, then marks slots 2..58 `0xFFFE` and 59..115 `0xFFFD`
/// and decrements the free counter by 114 (spec.md §4.4.2).
fn relocate_for_os_tail(inner: &mut Inner) -> Result<()> {
    for src in layout::S760_TAIL_FIRST_CLUSTER..=layout::S760_TAIL_LAST_CLUSTER {
        let value = inner.fat.get(src);
        let occupied = layout::is_usable_pointer(value) || value == layout::FAT_EOC;
        if !occupied {
            continue;
        }

        let dest = inner.fat.find_free_chain(1)?[0];

        let mut buf = vec![0u8; layout::CLUSTER_SIZE as usize];
        inner.disk.read_at(layout::cluster_offset(src), &mut buf)?;
        inner.disk.write_at(layout::cluster_offset(dest), &buf)?;

        inner.fat.set(&mut inner.disk, dest, value)?;
        redirect_references(inner, src, dest)?;
        inner.fat.set(&mut inner.disk, src, layout::FAT_FREE)?;
    }

    for src in layout::S760_TAIL_FIRST_CLUSTER..=layout::S760_TAIL_LOW_BOUNDARY {
        inner
            .fat
            .set(&mut inner.disk, src, layout::S760_TAIL_MARK_LOW)?;
    }
    for src in (layout::S760_TAIL_LOW_BOUNDARY + 1)..=layout::S760_TAIL_LAST_CLUSTER {
        inner
            .fat
            .set(&mut inner.disk, src, layout::S760_TAIL_MARK_HIGH)?;
    }

    let current_free = inner.fat.free_count();
    let updated = current_free.saturating_sub(layout::S760_OS_CLUSTERS);
    inner.fat.write_free_counter(&mut inner.disk, updated)?;
    Ok(())
}

/// Scans the FAT and every sample-list `start_cluster` field to redirect
/// references from `old` to `new`.
fn redirect_references(inner: &mut Inner, old: u16, new: u16) -> Result<()> {
    for cluster in layout::FAT_DATA_MIN..=layout::FAT_DATA_MAX {
        if inner.fat.get(cluster) == old {
            inner.fat.set(&mut inner.disk, cluster, new)?;
        }
    }

    let kind = ObjectKind::Sample;
    let max = kind.info().max_count;
    let count = inner.toc.count(kind);
    let mut visited = 0u16;
    for slot in 0..max {
        if visited >= count {
            break;
        }
        match objects::load_entry(&mut inner.disk, kind, slot) {
            Ok(mut entry) => {
                visited += 1;
                if entry.start_cluster == old {
                    entry.start_cluster = new;
                    objects::write_entry(&mut inner.disk, kind, slot, &entry)?;
                }
            }
            Err(Error::EmptyEntry) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Frees the 114 OS-tail clusters when demoting away from S-760 media.
fn free_os_tail(inner: &mut Inner) -> Result<()> {
    for cluster in layout::S760_TAIL_FIRST_CLUSTER..=layout::S760_TAIL_LAST_CLUSTER {
        inner.fat.set(&mut inner.disk, cluster, layout::FAT_FREE)?;
    }
    let current_free = inner.fat.free_count();
    inner
        .fat
        .write_free_counter(&mut inner.disk, current_free + layout::S760_OS_CLUSTERS)?;
    Ok(())
}

/// The logical size of an open target, used for end-of-file checks.
pub fn logical_size(inner: &Inner, target: &OpenTarget) -> u64 {
    match target {
        OpenTarget::Os => inner.media_type.os_logical_size(),
        OpenTarget::Object { kind, entry, .. } => {
            let mut size = kind.info().params_entry_size;
            if *kind == ObjectKind::Sample {
                size += entry.cluster_count as u64 * layout::CLUSTER_SIZE;
            }
            size
        }
    }
}

/// Reads up to `buf.len()` bytes at `pos`. Reads that start at or past
/// the logical end of file return `EndOfFile` and do not move `pos`.
pub fn read_at(inner: &mut Inner, target: &OpenTarget, pos: u64, buf: &mut [u8]) -> Result<usize> {
    let size = logical_size(inner, target);
    if pos >= size {
        return Err(Error::EndOfFile);
    }
    let len = buf.len().min((size - pos) as usize);
    let buf = &mut buf[..len];

    match target {
        OpenTarget::Os => read_os(inner, pos, buf)?,
        OpenTarget::Object { kind, slot, entry } => {
            read_object(inner, *kind, *slot, entry, pos, buf)?
        }
    }
    Ok(len)
}

fn read_os(inner: &mut Inner, pos: u64, buf: &mut [u8]) -> Result<()> {
    if pos < layout::OS_SIZE {
        inner.disk.read_at(layout::OS_OFFSET + pos, buf)?;
        return Ok(());
    }
    let tail_offset = pos - layout::OS_SIZE;
    read_os_tail(inner, tail_offset, buf)
}

fn read_os_tail(inner: &mut Inner, tail_offset: u64, buf: &mut [u8]) -> Result<()> {
    let mut done = 0usize;
    while done < buf.len() {
        let cluster_index = layout::S760_TAIL_FIRST_CLUSTER as u64 + tail_offset / layout::CLUSTER_SIZE;
        let in_cluster = (tail_offset + done as u64) % layout::CLUSTER_SIZE;
        let chunk = ((layout::CLUSTER_SIZE - in_cluster) as usize).min(buf.len() - done);
        let off = layout::cluster_offset(cluster_index as u16) + in_cluster;
        inner.disk.read_at(off, &mut buf[done..done + chunk])?;
        done += chunk;
    }
    Ok(())
}

fn read_object(
    inner: &mut Inner,
    kind: ObjectKind,
    slot: u16,
    entry: &Entry,
    pos: u64,
    buf: &mut [u8],
) -> Result<()> {
    let params_size = kind.info().params_entry_size;
    if pos < params_size {
        let off = kind.info().params_addr + slot as u64 * params_size + pos;
        let chunk = ((params_size - pos) as usize).min(buf.len());
        inner.disk.read_at(off, &mut buf[..chunk])?;
        if chunk < buf.len() {
            read_sample_data(inner, entry, 0, &mut buf[chunk..])?;
        }
        return Ok(());
    }
    read_sample_data(inner, entry, pos - params_size, buf)
}

fn read_sample_data(inner: &mut Inner, entry: &Entry, data_offset: u64, buf: &mut [u8]) -> Result<()> {
    let mut done = 0usize;
    while done < buf.len() {
        let nth = (data_offset + done as u64) / layout::CLUSTER_SIZE;
        let in_cluster = (data_offset + done as u64) % layout::CLUSTER_SIZE;
        let cluster = inner.fat.get_nth_cluster(entry.start_cluster, nth as usize)?;
        let chunk = ((layout::CLUSTER_SIZE - in_cluster) as usize).min(buf.len() - done);
        let off = layout::cluster_offset(cluster) + in_cluster;
        inner.disk.read_at(off, &mut buf[done..done + chunk])?;
        done += chunk;
    }
    Ok(())
}

/// Writes `buf` at `pos`. Non-sample/non-growing kinds reject writes
/// past their fixed end with `EndOfFile` (no growth). Samples and the OS
/// pseudo-file grow lazily, allocating clusters one at a time as the
/// write crosses a cluster boundary; the entry (and its on-disk record)
/// is updated at each extension, and every whole-cluster step acquires
/// the caller's mutex only for that single step (spec.md §4.4.3, §5).
pub fn write_at(
    inner: &mut Inner,
    target: &mut OpenTarget,
    pos: u64,
    buf: &[u8],
) -> Result<usize> {
    match target {
        OpenTarget::Os => write_os(inner, pos, buf),
        OpenTarget::Object { kind, slot, entry } => write_object(inner, *kind, *slot, entry, pos, buf),
    }
}

fn write_os(inner: &mut Inner, pos: u64, buf: &[u8]) -> Result<usize> {
    let end = pos + buf.len() as u64;

    if end > layout::OS_SIZE && inner.media_type != MediaType::HddWithOsS760 {
        relocate_for_os_tail(inner)?;
        set_media_type(inner, MediaType::HddWithOsS760)?;
    } else if inner.media_type == MediaType::Hdd {
        set_media_type(inner, MediaType::HddWithOs)?;
    }

    if end > layout::OS_SIZE + layout::S760_EXT_OS_SIZE {
        return Err(Error::FileTooLarge);
    }

    if pos < layout::OS_SIZE {
        let head_len = ((layout::OS_SIZE - pos) as usize).min(buf.len());
        inner.disk.write_at(layout::OS_OFFSET + pos, &buf[..head_len])?;
        if head_len < buf.len() {
            write_os_tail(inner, 0, &buf[head_len..])?;
        }
    } else {
        write_os_tail(inner, pos - layout::OS_SIZE, buf)?;
    }
    Ok(buf.len())
}

fn write_os_tail(inner: &mut Inner, tail_offset: u64, buf: &[u8]) -> Result<()> {
    let mut done = 0usize;
    while done < buf.len() {
        let cluster_index = layout::S760_TAIL_FIRST_CLUSTER as u64 + tail_offset / layout::CLUSTER_SIZE;
        let in_cluster = (tail_offset + done as u64) % layout::CLUSTER_SIZE;
        let chunk = ((layout::CLUSTER_SIZE - in_cluster) as usize).min(buf.len() - done);
        let off = layout::cluster_offset(cluster_index as u16) + in_cluster;
        inner.disk.write_at(off, &buf[done..done + chunk])?;
        done += chunk;
    }
    Ok(())
}

fn write_object(
    inner: &mut Inner,
    kind: ObjectKind,
    slot: u16,
    entry: &mut Entry,
    pos: u64,
    buf: &[u8],
) -> Result<usize> {
    let params_size = kind.info().params_entry_size;

    if kind != ObjectKind::Sample {
        if pos >= params_size {
            return Err(Error::EndOfFile);
        }
        let len = ((params_size - pos) as usize).min(buf.len());
        let off = kind.info().params_addr + slot as u64 * params_size + pos;
        inner.disk.write_at(off, &buf[..len])?;
        return Ok(len);
    }

    if pos < params_size {
        let head_len = ((params_size - pos) as usize).min(buf.len());
        let off = kind.info().params_addr + slot as u64 * params_size + pos;
        inner.disk.write_at(off, &buf[..head_len])?;
        if head_len < buf.len() {
            write_sample_data(inner, kind, slot, entry, 0, &buf[head_len..])?;
        }
        Ok(buf.len())
    } else {
        write_sample_data(inner, kind, slot, entry, pos - params_size, buf)?;
        Ok(buf.len())
    }
}

fn write_sample_data(
    inner: &mut Inner,
    kind: ObjectKind,
    slot: u16,
    entry: &mut Entry,
    data_offset: u64,
    buf: &[u8],
) -> Result<()> {
    if data_offset == 0 && entry.cluster_count == 0 && !buf.is_empty() {
        let chain = inner.fat.find_free_chain(1)?;
        inner.fat.write_chain(&mut inner.disk, &chain)?;
        entry.start_cluster = chain[0];
        entry.cluster_count = 1;
        objects::write_entry(&mut inner.disk, kind, slot, entry)?;
    }

    let mut done = 0usize;
    let mut cluster = entry.start_cluster;
    let mut cluster_idx = 0u64;

    while done < buf.len() {
        let nth = (data_offset + done as u64) / layout::CLUSTER_SIZE;
        while cluster_idx < nth {
            if cluster_idx + 1 >= entry.cluster_count as u64 {
                let (next, allocated) = inner.fat.get_next_or_alloc_cluster(&mut inner.disk, cluster)?;
                if allocated {
                    entry.cluster_count += 1;
                    objects::write_entry(&mut inner.disk, kind, slot, entry)?;
                }
                cluster = next;
            } else {
                cluster = inner.fat.get_nth_cluster(cluster, 1)?;
            }
            cluster_idx += 1;
        }

        let in_cluster = (data_offset + done as u64) % layout::CLUSTER_SIZE;
        let chunk = ((layout::CLUSTER_SIZE - in_cluster) as usize).min(buf.len() - done);
        let off = layout::cluster_offset(cluster) + in_cluster;
        inner.disk.write_at(off, &buf[done..done + chunk])?;
        done += chunk;
    }
    Ok(())
}

/// Overwrites the 16 name bytes of the existing list entry at the same
/// slot (spec.md §4.4.4). Indices may not change via rename.
pub fn rename_slot(
    inner: &mut Inner,
    kind: ObjectKind,
    slot: u16,
    new_name: [u8; 16],
) -> Result<()> {
    let mut entry = objects::load_entry(&mut inner.disk, kind, slot)?;
    entry.name = new_name;
    objects::write_entry(&mut inner.disk, kind, slot, &entry)
}
