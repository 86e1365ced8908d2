//! FAT engine (spec.md §4.2).
//!
//! The whole 0x10000-entry table is loaded into a heap-allocated array in
//! host endianness at mount. Every mutating operation writes through to
//! disk immediately; callers are expected to hold the filesystem mutex
//! around any sequence of these calls that must appear atomic to a
//! concurrent reader (spec.md §5).

use crate::disk::Disk;
use crate::error::{Error, Result};
use crate::layout::{self, FAT_EOC, FAT_FREE};

pub struct FatTable {
    entries: Vec<u16>,
}

impl FatTable {
    /// Reads the whole FAT region into memory.
    pub fn load(disk: &mut Disk) -> Result<Self> {
        let mut raw = vec![0u8; layout::FAT_SIZE as usize];
        disk.read_at(layout::FAT_OFFSET, &mut raw)?;
        let entries = raw
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        Ok(Self { entries })
    }

    fn entry_offset(cluster: u16) -> u64 {
        layout::FAT_OFFSET + cluster as u64 * 2
    }

    pub fn get(&self, cluster: u16) -> u16 {
        self.entries[cluster as usize]
    }

    fn set_in_memory(&mut self, cluster: u16, value: u16) {
        self.entries[cluster as usize] = value;
    }

    /// Writes one FAT entry through to disk and updates the in-memory
    /// mirror.
    pub fn set(&mut self, disk: &mut Disk, cluster: u16, value: u16) -> Result<()> {
        self.set_in_memory(cluster, value);
        disk.write_u16_be(Self::entry_offset(cluster), value)
    }

    /// The free-cluster counter stored at FAT slot 1.
    pub fn free_count(&self) -> u16 {
        self.get(layout::FAT_FREE_COUNTER_SLOT)
    }

    pub fn write_free_counter(&mut self, disk: &mut Disk, new_value: u16) -> Result<()> {
        self.set(disk, layout::FAT_FREE_COUNTER_SLOT, new_value)
    }

    fn adjust_free_counter(&mut self, disk: &mut Disk, delta: i32) -> Result<()> {
        let current = self.free_count() as i32;
        let updated = current + delta;
        debug_assert!(updated >= 0, "free-cluster counter underflow");
        let updated = updated.max(0) as u16;
        self.write_free_counter(disk, updated)
    }

    /// Total number of FAT entries (always `FAT_ENTRY_COUNT`).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Walks from `start` via FAT until `0xFFFF`. Fails with a `Wtf`
    /// (not a recoverable condition on a well-formed image) if `start`
    /// is outside the usable range.
    pub fn follow_chain(&self, start: u16) -> Result<Vec<u16>> {
        if !layout::is_usable_pointer(start) {
            return Err(Error::Wtf);
        }
        let mut chain = Vec::new();
        let mut cur = start;
        loop {
            chain.push(cur);
            let next = self.get(cur);
            if next == FAT_EOC {
                break;
            }
            if !layout::is_usable_pointer(next) {
                return Err(Error::ChainSizeMismatch);
            }
            cur = next;
        }
        Ok(chain)
    }

    /// Scans linearly from `FAT_DATA_MIN` selecting the first `n` free
    /// cells. Fails with `NoSpaceLeft` if fewer than `n` are available.
    pub fn find_free_chain(&self, n: usize) -> Result<Vec<u16>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let mut found = Vec::with_capacity(n);
        for cluster in layout::FAT_DATA_MIN..=layout::FAT_DATA_MAX {
            if self.get(cluster) == FAT_FREE {
                found.push(cluster);
                if found.len() == n {
                    return Ok(found);
                }
            }
        }
        Err(Error::NoSpaceLeft)
    }

    /// Writes each link of `clusters` so they form a chain, last cluster
    /// pointing to end-of-chain. Decrements the free counter by the
    /// number of clusters newly consumed.
    pub fn write_chain(&mut self, disk: &mut Disk, clusters: &[u16]) -> Result<()> {
        for window in clusters.windows(2) {
            self.set(disk, window[0], window[1])?;
        }
        if let Some(&last) = clusters.last() {
            self.set(disk, last, FAT_EOC)?;
        }
        self.adjust_free_counter(disk, -(clusters.len() as i32))
    }

    /// Shrinks a chain to its first `keep_n` clusters: the new tail gets
    /// `0xFFFF`, everything past it is freed and the counter is
    /// adjusted.
    pub fn shrink_chain(&mut self, disk: &mut Disk, clusters: &[u16], keep_n: usize) -> Result<()> {
        if keep_n == 0 {
            return self.free_chain(disk, clusters);
        }
        if keep_n >= clusters.len() {
            return Ok(());
        }
        self.set(disk, clusters[keep_n - 1], FAT_EOC)?;
        let freed = &clusters[keep_n..];
        for &c in freed {
            self.set(disk, c, FAT_FREE)?;
        }
        self.adjust_free_counter(disk, freed.len() as i32)
    }

    /// Marks every listed cluster free and bumps the counter.
    pub fn free_chain(&mut self, disk: &mut Disk, clusters: &[u16]) -> Result<()> {
        for &c in clusters {
            self.set(disk, c, FAT_FREE)?;
        }
        self.adjust_free_counter(disk, clusters.len() as i32)
    }

    /// Walks `n` steps from `start`; fails with `ChainSizeMismatch` when
    /// the walk ends prematurely.
    pub fn get_nth_cluster(&self, start: u16, n: usize) -> Result<u16> {
        let mut cur = start;
        for _ in 0..n {
            let next = self.get(cur);
            if !layout::is_usable_pointer(next) {
                return Err(Error::ChainSizeMismatch);
            }
            cur = next;
        }
        Ok(cur)
    }

    /// Returns the next link after `cur` if present; otherwise allocates
    /// the first free cluster, links `cur` to it, and returns it along
    /// with `true` to tell the caller a new cluster was appended (and
    /// the free counter decremented).
    pub fn get_next_or_alloc_cluster(&mut self, disk: &mut Disk, cur: u16) -> Result<(u16, bool)> {
        let next = self.get(cur);
        if next != FAT_EOC {
            return Ok((next, false));
        }
        let new = self.find_free_chain(1)?[0];
        self.extend_chain(disk, cur, new)?;
        Ok((new, true))
    }

    /// Links `prev -> new -> EOC` and decrements the free counter by one.
    pub fn extend_chain(&mut self, disk: &mut Disk, prev: u16, new: u16) -> Result<()> {
        self.set(disk, prev, FAT_EOC)?;
        self.set(disk, new, FAT_EOC)?;
        self.set(disk, prev, new)?;
        self.adjust_free_counter(disk, -1)
    }

    /// The count of entries equal to `0x0000` in the usable range, used
    /// by fsck to recompute FAT[1] (spec.md §4.6 bit 4). Reserved/special
    /// values (spec.md §9 Open Question 1) are neither free nor
    /// chainable and are excluded, as are clusters 0 and 1 themselves.
    pub fn count_free_in_usable_range(&self) -> u16 {
        self.entries[layout::FAT_DATA_MIN as usize..]
            .iter()
            .filter(|&&v| v == FAT_FREE)
            .count() as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::Disk;
    use tempfile::NamedTempFile;

    fn scratch_fat() -> (Disk, FatTable) {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.into_temp_path().keep().unwrap();
        let mut disk = Disk::create_or_open(&path).unwrap();
        disk.set_len(layout::FAT_OFFSET + layout::FAT_SIZE).unwrap();
        let fat = FatTable::load(&mut disk).unwrap();
        (disk, fat)
    }

    #[test]
    fn write_then_follow_chain() {
        let (mut disk, mut fat) = scratch_fat();
        fat.write_chain(&mut disk, &[5, 6, 7]).unwrap();
        assert_eq!(fat.follow_chain(5).unwrap(), vec![5, 6, 7]);
        assert_eq!(fat.get(7), FAT_EOC);
    }

    #[test]
    fn shrink_frees_tail_and_adjusts_counter() {
        let (mut disk, mut fat) = scratch_fat();
        fat.write_free_counter(&mut disk, 100).unwrap();
        fat.write_chain(&mut disk, &[5, 6, 7, 8]).unwrap();
        let before = fat.free_count();
        fat.shrink_chain(&mut disk, &[5, 6, 7, 8], 2).unwrap();
        assert_eq!(fat.follow_chain(5).unwrap(), vec![5, 6]);
        assert_eq!(fat.get(7), FAT_FREE);
        assert_eq!(fat.get(8), FAT_FREE);
        assert_eq!(fat.free_count(), before + 2);
    }

    #[test]
    fn find_free_chain_fails_when_exhausted() {
        let (_disk, fat) = scratch_fat();
        let total_usable = fat.len() - layout::FAT_DATA_MIN as usize;
        assert!(matches!(
            fat.find_free_chain(total_usable + 1),
            Err(Error::NoSpaceLeft)
        ));
    }

    #[test]
    fn get_next_or_alloc_extends_chain() {
        let (mut disk, mut fat) = scratch_fat();
        fat.write_chain(&mut disk, &[5]).unwrap();
        let (next, allocated) = fat.get_next_or_alloc_cluster(&mut disk, 5).unwrap();
        assert!(allocated);
        assert_eq!(fat.follow_chain(5).unwrap(), vec![5, next]);
    }
}
