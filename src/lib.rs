//! Read/write driver for the Roland S-7XX sampler disk filesystem
//! (spec.md). The on-disk format is a cluster-based, FAT-style layout
//! with fixed-offset regions and no long-name or directory-entry
//! machinery: five object kinds (Volumes, Performances, Patches,
//! Partials, Samples) each get a fixed-capacity list and parameter
//! region, plus an OS pseudo-file whose size selects the media type.

pub mod dentry;
pub mod disk;
pub mod error;
pub mod fat;
pub mod file;
pub mod fsck;
pub mod header;
pub mod layout;
pub mod mkfs;
pub mod objects;
pub mod vfs;

pub use dentry::{Dentry, FileType};
pub use error::{Error, Result};
pub use fsck::{Finding, Report};
pub use layout::{MediaType, ObjectKind};
pub use vfs::{FileSystem, Stream};
