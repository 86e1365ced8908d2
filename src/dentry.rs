//! Directory listing (spec.md §4.4.6).

use crate::error::{Error, Result};
use crate::layout::{self, ObjectKind, OS_DIR_NAME};
use crate::objects;
use crate::vfs::Inner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    File,
    Dir,
}

/// One directory entry. The format has no timestamps; the three fields
/// are always zero, kept only so callers have a stable shape to fill in
/// if a future media format adds them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dentry {
    pub fname: String,
    pub fsize: u64,
    pub ctime: u64,
    pub mtime: u64,
    pub atime: u64,
    pub ftype: FileType,
}

impl Dentry {
    fn new(fname: String, fsize: u64, ftype: FileType) -> Self {
        Dentry {
            fname,
            fsize,
            ctime: 0,
            mtime: 0,
            atime: 0,
            ftype,
        }
    }
}

fn root_dir_dentry() -> Dentry {
    // The root directory has no well-defined size; the original driver
    // reports one block and its source comments call it a bold-faced lie.
    Dentry::new("/".to_string(), layout::BLOCK_SIZE, FileType::Dir)
}

fn kind_dir_dentry(kind: ObjectKind) -> Dentry {
    let info = kind.info();
    Dentry::new(
        info.dir_name.to_string(),
        info.max_count as u64 * layout::LIST_ENTRY_SIZE,
        FileType::Dir,
    )
}

fn os_dentry(inner: &Inner) -> Dentry {
    Dentry::new(
        OS_DIR_NAME.to_string(),
        inner.media_type.os_logical_size(),
        FileType::File,
    )
}

fn slot_dentry(kind: ObjectKind, slot: u16, entry: &objects::Entry) -> Dentry {
    let name = String::from_utf8_lossy(&entry.name).trim_end().to_string();
    let mut fsize = kind.info().params_entry_size;
    if kind == ObjectKind::Sample {
        fsize += entry.cluster_count as u64 * layout::CLUSTER_SIZE;
    }
    Dentry::new(format!("{}-{}", slot, name), fsize, FileType::File)
}

/// Lists occupied slots of `kind` as `Dentry`s named `{index}-{name}`.
fn list_kind_children(inner: &mut Inner, kind: ObjectKind) -> Result<Vec<Dentry>> {
    let count = inner.toc.count(kind);
    let mut out = Vec::new();
    let mut visited = 0u16;
    for slot in 0..kind.info().max_count {
        if visited >= count {
            break;
        }
        match objects::load_entry(&mut inner.disk, kind, slot) {
            Ok(entry) => {
                visited += 1;
                out.push(slot_dentry(kind, slot, &entry));
            }
            Err(Error::EmptyEntry) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(out)
}

/// Resolves a `{index}-{name}` (or bare `{index}` / bare `{name}`)
/// component to a slot, the same way `ftruncate`/`rename` do.
pub fn resolve_component(
    inner: &mut Inner,
    kind: ObjectKind,
    component: &str,
) -> Result<Option<u16>> {
    let (idx, name) = crate::vfs::parse_index_and_name(component);
    if let Some(idx) = idx {
        if idx < kind.info().max_count {
            return Ok(Some(idx));
        }
    }
    if name.is_empty() {
        return Ok(None);
    }
    let padded = objects::pad_name(name);
    objects::find_slot_by_name(&mut inner.disk, kind, &padded, inner.toc.count(kind))
}

pub fn list(inner: &mut Inner, path: &str, want_dir_itself: bool) -> Result<Vec<Dentry>> {
    let components = crate::vfs::split_path(path);

    match components.len() {
        0 => {
            if want_dir_itself {
                return Ok(vec![root_dir_dentry()]);
            }
            let mut out = Vec::new();
            if inner.media_type.has_os() {
                out.push(os_dentry(inner));
            }
            for kind in ObjectKind::ALL {
                out.push(kind_dir_dentry(kind));
            }
            Ok(out)
        }
        1 => {
            if components[0] == OS_DIR_NAME {
                if !inner.media_type.has_os() {
                    return Err(Error::NotFound);
                }
                return Ok(vec![os_dentry(inner)]);
            }
            let kind = ObjectKind::from_dir_name(components[0]).ok_or(Error::NotFound)?;
            if want_dir_itself {
                Ok(vec![kind_dir_dentry(kind)])
            } else {
                list_kind_children(inner, kind)
            }
        }
        2 => {
            let kind = ObjectKind::from_dir_name(components[0]).ok_or(Error::NotFound)?;
            let slot = resolve_component(inner, kind, components[1])?.ok_or(Error::NotFound)?;
            let entry = objects::load_entry(&mut inner.disk, kind, slot)?;
            Ok(vec![slot_dentry(kind, slot, &entry)])
        }
        _ => Err(Error::InvalidPath),
    }
}
