//! Filesystem facade (spec.md §6): mount/unmount, the open-file
//! registry, path parsing, and the single mutex that serializes every
//! mutating operation (spec.md §5).

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, Weak};

use log::{debug, info, warn};

use crate::dentry::{self, Dentry};
use crate::disk::Disk;
use crate::error::{Error, Result};
use crate::fat::FatTable;
use crate::file;
use crate::header::{self, Toc};
use crate::layout::{self, MediaType, ObjectKind};
use crate::objects::{self, Entry};

/// Everything the mutex guards: the disk handle, the in-memory FAT and
/// TOC mirrors, the current media type, and the set of currently open
/// paths (spec.md §5 "what the mutex covers").
pub struct Inner {
    pub disk: Disk,
    pub fat: FatTable,
    pub toc: Toc,
    pub media_type: MediaType,
    open: HashMap<String, usize>,
}

/// What an open `Stream` addresses: the OS pseudo-file, or a list slot
/// together with the object kind and its currently-loaded entry.
pub enum OpenTarget {
    Os,
    Object {
        kind: ObjectKind,
        slot: u16,
        entry: Entry,
    },
}

/// A mounted S-7XX filesystem. Always held behind `Arc`; never cloned
/// or moved once mounted, so that `Stream`'s `Weak` back-reference can
/// never dangle into a relocated `FileSystem` (spec.md Design Note 3).
pub struct FileSystem {
    inner: Mutex<Inner>,
}

/// An open handle to a pseudo-file. Holds a `Weak<FileSystem>` rather
/// than cloning the `Arc` so that a filesystem can report zero open
/// files the moment its last `Stream` is dropped, with no explicit
/// close-tracking beyond `Drop`.
pub struct Stream {
    fs: Weak<FileSystem>,
    key: String,
    pos: u64,
    target: OpenTarget,
}

/// Splits a path on `/`, dropping empty components so both `/Samples`
/// and `/Samples/` and `Samples` parse identically.
pub fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|c| !c.is_empty()).collect()
}

/// Parses a `{index}-{name}` path component. Returns the parsed index
/// (if the leading digits parse and are followed by `-`) and the name
/// remainder; a component with no leading digits yields `(None,
/// component)` so bare-name lookup still works.
pub fn parse_index_and_name(component: &str) -> (Option<u16>, &str) {
    if let Some(dash) = component.find('-') {
        let (digits, rest) = component.split_at(dash);
        if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(idx) = digits.parse::<u16>() {
                return (Some(idx), &rest[1..]);
            }
        }
    }
    (None, component)
}

impl FileSystem {
    /// Opens the backing file, validates the header magic and media
    /// type, loads the TOC and the whole FAT into memory, and checks the
    /// TOC's recorded block count against the image's actual size
    /// (spec.md §6.1).
    pub fn mount(path: &Path) -> Result<Arc<Self>> {
        let mut disk = Disk::open_existing(path)?;
        let len = disk.len()?;
        if len < layout::MIN_DISK_SIZE {
            return Err(Error::DiskTooSmall);
        }

        let header = header::read_header(&mut disk)?;
        let toc = header::read_toc(&mut disk)?;

        let expected_blocks = len / layout::BLOCK_SIZE;
        if toc.block_count as u64 != expected_blocks {
            return Err(Error::FsSizeMismatch);
        }

        let fat = FatTable::load(&mut disk)?;

        info!(
            "mounted S-7XX image {:?}: media_type={:?}, {} blocks",
            path, header.media_type, toc.block_count
        );

        Ok(Arc::new(FileSystem {
            inner: Mutex::new(Inner {
                disk,
                fat,
                toc,
                media_type: header.media_type,
                open: HashMap::new(),
            }),
        }))
    }

    /// Formats `path` fresh (delegates to `mkfs::format`) and mounts it.
    /// `path` must already exist and be at least `MIN_DISK_SIZE` bytes;
    /// this driver does not create or extend backing files.
    pub fn create(path: &Path, label: &str) -> Result<Arc<Self>> {
        crate::mkfs::format(path, label)?;
        Self::mount(path)
    }

    /// The driver's self-reported type name, exposed at the VFS
    /// boundary (spec.md §6.2).
    pub fn get_type_name(&self) -> &'static str {
        "S7XX"
    }

    pub fn get_open_file_count(&self) -> usize {
        self.inner.lock().unwrap().open.len()
    }

    /// True only when no path is currently open; an unmount with open
    /// files is the caller's bug, not this driver's to resolve (spec.md
    /// §6.2 "Non-goals").
    pub fn can_unmount(&self) -> bool {
        self.inner.lock().unwrap().open.is_empty()
    }

    /// Drops the last reference, which releases the backing file
    /// (`Disk` closes it on `Drop`). Refuses while any path is open.
    pub fn unmount(self: Arc<Self>) -> Result<()> {
        if !self.can_unmount() {
            return Err(Error::AlreadyOpen);
        }
        Ok(())
    }

    /// Always unsupported: the format has no directory hierarchy beyond
    /// the fixed two-level layout, so there is nothing for `mkdir` to
    /// create (spec.md §6.2, Non-goals).
    pub fn mkdir(self: &Arc<Self>, _path: &str) -> Result<()> {
        Err(Error::UnsupportedOperation)
    }

    pub fn list(self: &Arc<Self>, path: &str) -> Result<Vec<Dentry>> {
        let mut inner = self.inner.lock().unwrap();
        dentry::list(&mut inner, path, false)
    }

    pub fn stat(self: &Arc<Self>, path: &str) -> Result<Dentry> {
        let mut inner = self.inner.lock().unwrap();
        let mut entries = dentry::list(&mut inner, path, true)?;
        entries.pop().ok_or(Error::NotFound)
    }

    /// Resolves `path` to an object kind and slot. `path` must have
    /// exactly two components (`/{Kind}/{index-or-name}`); the OS
    /// pseudo-file and the bare kind directories are not truncatable
    /// targets in this sense.
    fn resolve_object(inner: &mut Inner, path: &str) -> Result<(ObjectKind, u16)> {
        let components = split_path(path);
        if components.len() != 2 {
            return Err(Error::InvalidPath);
        }
        let kind = ObjectKind::from_dir_name(components[0]).ok_or(Error::NotFound)?;
        match dentry::resolve_component(inner, kind, components[1])? {
            Some(slot) => Ok((kind, slot)),
            None => {
                let (idx, _) = parse_index_and_name(components[1]);
                idx.filter(|&i| i < kind.info().max_count)
                    .map(|i| (kind, i))
                    .ok_or(Error::NotFound)
            }
        }
    }

    /// Creates or resizes an object (spec.md §4.4.2, §6.2). The slot is
    /// addressed the same way `open` resolves paths; creating a new slot
    /// when none is occupied at the given index allocates it fresh.
    pub fn ftruncate(self: &Arc<Self>, path: &str, size: u64) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();

        if path_is_os(path) {
            return file::truncate_os(&mut inner, size);
        }

        let components = split_path(path);
        if components.len() != 2 {
            return Err(Error::InvalidPath);
        }
        let kind = ObjectKind::from_dir_name(components[0]).ok_or(Error::NotFound)?;

        let (idx, name) = parse_index_and_name(components[1]);
        let slot = match idx {
            Some(i) if i < kind.info().max_count => i,
            _ => {
                let padded = objects::pad_name(name);
                match objects::find_slot_by_name(&mut inner.disk, kind, &padded, inner.toc.count(kind))? {
                    Some(slot) => slot,
                    None => objects::find_free_slot(&mut inner.disk, kind)?
                        .ok_or(Error::NoSpaceLeft)?,
                }
            }
        };

        let is_new = match objects::load_entry(&mut inner.disk, kind, slot) {
            Ok(_) => false,
            Err(Error::EmptyEntry) => true,
            Err(e) => return Err(e),
        };

        // Only a handle already held on this slot may drive its growth
        // (spec.md §4.4.1); a bare ftruncate call against an open slot,
        // new or not, is refused.
        if inner.open.contains_key(&object_key(kind, slot)) {
            return Err(Error::AlreadyOpen);
        }

        let final_name = objects::pad_name(name);

        if kind == ObjectKind::Sample {
            file::truncate_sample(&mut inner, slot, size, is_new, final_name)?;
        } else {
            file::truncate_nonsample(&mut inner, kind, slot, is_new, final_name)?;
        }
        Ok(())
    }

    /// Renames the slot's stored name in place; the index (and hence
    /// its path position) never changes (spec.md §4.4.4).
    pub fn rename(self: &Arc<Self>, path: &str, new_display_name: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let (kind, slot) = Self::resolve_object(&mut inner, path)?;
        if inner.open.contains_key(&object_key(kind, slot)) {
            return Err(Error::AlreadyOpen);
        }
        file::rename_slot(&mut inner, kind, slot, objects::pad_name(new_display_name))
    }

    /// Deletes per spec.md §4.4.5: a 2-component path tombstones a single
    /// slot; a 1-component path deletes `OS` or every occupant of a kind;
    /// the root (0 components) deletes every occupant of every kind plus
    /// `OS`. Open slots are skipped rather than aborting the whole
    /// operation; if any were skipped, the final result is `AlreadyOpen`
    /// even though the rest of the deletions already took effect,
    /// matching spec.md's "OR of any `AlreadyOpen` flags encountered."
    pub fn remove(self: &Arc<Self>, path: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let components = split_path(path);

        match components.len() {
            0 => {
                let mut any_open = false;
                for kind in ObjectKind::ALL {
                    any_open |= Self::remove_all_of_kind(&mut inner, kind)?;
                }
                any_open |= Self::remove_os(&mut inner)?;
                if any_open {
                    return Err(Error::AlreadyOpen);
                }
                Ok(())
            }
            1 => {
                if components[0] == layout::OS_DIR_NAME {
                    if Self::remove_os(&mut inner)? {
                        return Err(Error::AlreadyOpen);
                    }
                    return Ok(());
                }
                let kind = ObjectKind::from_dir_name(components[0]).ok_or(Error::NotFound)?;
                if Self::remove_all_of_kind(&mut inner, kind)? {
                    return Err(Error::AlreadyOpen);
                }
                Ok(())
            }
            2 => {
                let (kind, slot) = Self::resolve_object(&mut inner, path)?;
                if inner.open.contains_key(&object_key(kind, slot)) {
                    return Err(Error::AlreadyOpen);
                }
                objects::delete_slot(&mut inner.disk, &mut inner.fat, &mut inner.toc, kind, slot)
            }
            _ => Err(Error::InvalidPath),
        }
    }

    /// Deletes every occupied, non-open slot of `kind`. Returns whether
    /// any occupied slot was skipped because it was open.
    fn remove_all_of_kind(inner: &mut Inner, kind: ObjectKind) -> Result<bool> {
        let mut any_open = false;
        let max = kind.info().max_count;
        let mut visited = 0u16;
        let count = inner.toc.count(kind);
        for slot in 0..max {
            if visited >= count {
                break;
            }
            match objects::load_entry(&mut inner.disk, kind, slot) {
                Ok(_) => {
                    visited += 1;
                    if inner.open.contains_key(&object_key(kind, slot)) {
                        any_open = true;
                        continue;
                    }
                    objects::delete_slot(&mut inner.disk, &mut inner.fat, &mut inner.toc, kind, slot)?;
                }
                Err(Error::EmptyEntry) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(any_open)
    }

    /// Deletes the `OS` pseudo-file (reverts the media type to plain
    /// HDD). Returns `true` (without acting) if `OS` is currently open.
    fn remove_os(inner: &mut Inner) -> Result<bool> {
        if !inner.media_type.has_os() {
            return Ok(false);
        }
        if inner.open.contains_key(layout::OS_DIR_NAME) {
            return Ok(true);
        }
        file::truncate_os(inner, 0)?;
        Ok(false)
    }

    /// Opens `path` for reading and writing, returning a `Stream` that
    /// holds only a weak reference back to this filesystem. Registers
    /// the resolved `(kind, slot)` (or the OS pseudo-file) so concurrent
    /// `remove`/`rename`/truncate-to-new-slot calls on the same target
    /// are refused regardless of which path string named it (spec.md
    /// §5, §6.2).
    pub fn open(self: &Arc<Self>, path: &str) -> Result<Stream> {
        let mut inner = self.inner.lock().unwrap();

        let (target, key) = if path_is_os(path) {
            if !inner.media_type.has_os() {
                return Err(Error::NotFound);
            }
            (OpenTarget::Os, layout::OS_DIR_NAME.to_string())
        } else {
            let (kind, slot) = Self::resolve_object(&mut inner, path)?;
            let entry = objects::load_entry(&mut inner.disk, kind, slot)?;
            (OpenTarget::Object { kind, slot, entry }, object_key(kind, slot))
        };

        let refcount = inner.open.entry(key.clone()).or_insert(0);
        *refcount += 1;

        Ok(Stream {
            fs: Arc::downgrade(self),
            key,
            pos: 0,
            target,
        })
    }
}

fn path_is_os(path: &str) -> bool {
    split_path(path) == vec![layout::OS_DIR_NAME]
}

fn object_key(kind: ObjectKind, slot: u16) -> String {
    format!("{}/{}", kind.dir_name(), slot)
}

impl Stream {
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let fs = self.fs.upgrade().ok_or(Error::Wtf)?;
        let mut inner = fs.inner.lock().unwrap();
        let n = file::read_at(&mut inner, &self.target, self.pos, buf)?;
        self.pos += n as u64;
        Ok(n)
    }

    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let fs = self.fs.upgrade().ok_or(Error::Wtf)?;
        let mut inner = fs.inner.lock().unwrap();
        let n = file::write_at(&mut inner, &mut self.target, self.pos, buf)?;
        self.pos += n as u64;
        Ok(n)
    }

    /// Resizes the file this handle addresses. This is the
    /// "truncate-via-handle" exception spec.md §4.4.1 carves out of the
    /// ordinary `AlreadyOpen` rule: it acts directly on this stream's own
    /// registered target rather than re-resolving `path`, so it never
    /// consults (and is never refused by) `Inner::open`.
    pub fn truncate(&mut self, new_size: u64) -> Result<()> {
        let fs = self.fs.upgrade().ok_or(Error::Wtf)?;
        let mut inner = fs.inner.lock().unwrap();
        match &mut self.target {
            OpenTarget::Os => file::truncate_os(&mut inner, new_size),
            OpenTarget::Object { kind, slot, entry } => {
                let updated = if *kind == ObjectKind::Sample {
                    file::truncate_sample(&mut inner, *slot, new_size, false, entry.name)?
                } else {
                    file::truncate_nonsample(&mut inner, *kind, *slot, false, entry.name)?
                };
                *entry = updated;
                Ok(())
            }
        }
    }

    pub fn seek(&mut self, pos: u64) {
        self.pos = pos;
    }

    pub fn position(&self) -> u64 {
        self.pos
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        let Some(fs) = self.fs.upgrade() else {
            return;
        };
        let mut inner = fs.inner.lock().unwrap();
        match inner.open.get_mut(&self.key) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                inner.open.remove(&self.key);
            }
            None => warn!("stream for {} dropped without a registry entry", self.key),
        }
        debug!("closed {}", self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_path_drops_empty_components() {
        assert_eq!(split_path("/Samples/3-Kick"), vec!["Samples", "3-Kick"]);
        assert_eq!(split_path("/"), Vec::<&str>::new());
        assert_eq!(split_path(""), Vec::<&str>::new());
    }

    #[test]
    fn parse_index_and_name_splits_on_dash() {
        assert_eq!(parse_index_and_name("3-Kick"), (Some(3), "Kick"));
        assert_eq!(parse_index_and_name("Kick"), (None, "Kick"));
        assert_eq!(parse_index_and_name("3"), (None, "3"));
    }
}
