//! The driver's unified error type (spec.md §7).
//!
//! Error kinds mirror spec.md one-to-one; `to_code` packs them into the
//! `(library_id << 8) | kind` scheme the surrounding C++ VFS host expects,
//! for the benefit of the external boundary named in spec.md §6.3. Every
//! in-crate caller matches on the enum, never the packed integer.

use thiserror::Error;

/// This driver's library id in the packed 16-bit error code scheme.
pub const LIBRARY_ID: u8 = 0x07;

#[derive(Debug, Error)]
pub enum Error {
    #[error("path has the wrong number of components or is malformed")]
    InvalidPath,
    #[error("no such slot, directory, or pseudo-file")]
    NotFound,
    #[error("path component is not a directory")]
    NotADirectory,
    #[error("image does not carry the S-7XX magic")]
    WrongFs,
    #[error("header media-type byte is not one of the supported HDD values")]
    MediaTypeNotHdd,
    #[error("TOC block count disagrees with the image's actual size")]
    FsSizeMismatch,
    #[error("image is smaller than the minimum S-7XX disk size")]
    DiskTooSmall,
    #[error("path does not resolve to a regular file")]
    NotAFile,
    #[error("backing disk image does not exist")]
    NonexistantDisk,
    #[error("operation is not supported by this driver")]
    UnsupportedOperation,
    #[error("path is currently open and cannot be mutated this way")]
    AlreadyOpen,
    #[error("not enough free clusters to satisfy the request")]
    NoSpaceLeft,
    #[error("requested size exceeds the maximum for this object kind")]
    FileTooLarge,
    #[error("list slot is unallocated")]
    EmptyEntry,
    #[error("list entry's element-type byte does not match its kind")]
    ElementTypeMismatch,
    #[error("read or seek past the logical end of the file")]
    EndOfFile,
    #[error("could not materialize a list entry for this path")]
    FailedToOpenFile,
    #[error("I/O error on the backing disk: {0}")]
    Io(#[from] std::io::Error),
    #[error("a cluster chain's length did not match its recorded count")]
    ChainSizeMismatch,
    #[error("internal invariant violated on a well-formed image")]
    Wtf,
}

impl Error {
    /// Packs this error into the `(library_id << 8) | kind` scheme used
    /// at the external VFS boundary (spec.md §6.3). `0` is reserved for
    /// success and is never produced here.
    pub fn to_code(&self) -> u16 {
        let kind: u8 = match self {
            Error::InvalidPath => 1,
            Error::NotFound => 2,
            Error::NotADirectory => 3,
            Error::WrongFs => 4,
            Error::MediaTypeNotHdd => 5,
            Error::FsSizeMismatch => 6,
            Error::DiskTooSmall => 7,
            Error::NotAFile => 8,
            Error::NonexistantDisk => 9,
            Error::UnsupportedOperation => 10,
            Error::AlreadyOpen => 11,
            Error::NoSpaceLeft => 12,
            Error::FileTooLarge => 13,
            Error::EmptyEntry => 14,
            Error::ElementTypeMismatch => 15,
            Error::EndOfFile => 16,
            Error::FailedToOpenFile => 17,
            Error::Io(_) => 18,
            Error::ChainSizeMismatch => 19,
            Error::Wtf => 20,
        };
        ((LIBRARY_ID as u16) << 8) | kind as u16
    }
}

pub type Result<T> = std::result::Result<T, Error>;
