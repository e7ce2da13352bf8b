//! The original archive revision, with a single, flat namespace.
//!
//! This is the simplest of the formats: no compression, no flags, and no
//! directory structure. Files are keyed by a 64-bit hash of their full path.
//!
//! # Reading
//! ```rust
//! use bsa::{
//!     prelude::*,
//!     v3::{Archive, ArchiveKey},
//! };
//! use std::{fs, path::Path};
//!
//! fn example() -> Option<()> {
//!     let path = Path::new("path/to/archive.bsa");
//!     let archive = Archive::read(path).ok()?;
//!     let key: ArchiveKey = b"icons/gold.dds".into();
//!     let file = archive.get(&key)?;
//!     let mut dst = fs::File::create("gold.dds").ok()?;
//!     file.write(&mut dst).ok()?;
//!     Some(())
//! }
//! ```
//!
//! # Writing
//! ```rust
//! use bsa::v3::{Archive, ArchiveKey, File};
//! use std::fs;
//!
//! fn example() -> Option<()> {
//!     let file: File = b"Hello world!\n".into();
//!     let key: ArchiveKey = b"hello.txt".into();
//!     let archive: Archive = [(key, file)].into_iter().collect();
//!     let mut dst = fs::File::create("example.bsa").ok()?;
//!     archive.write(&mut dst).ok()?;
//!     Some(())
//! }
//! ```

mod archive;
mod file;
mod hashing;

pub use self::{
    archive::{Archive, Key as ArchiveKey},
    file::File,
    hashing::{hash_file, hash_file_in_place, FileHash, Hash},
};

use core::num::TryFromIntError;
use std::io;

#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid magic read from archive header: {0}")]
    BadMagic(u32),

    #[error("an operation on an integer would have truncated and corrupted data")]
    IntegralTruncation,

    #[error(transparent)]
    Io(io::Error),

    #[error("the stream was exhausted before a required read could be completed")]
    Truncated,
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        match value.kind() {
            io::ErrorKind::UnexpectedEof => Self::Truncated,
            _ => Self::Io(value),
        }
    }
}

impl From<TryFromIntError> for Error {
    fn from(_: TryFromIntError) -> Self {
        Self::IntegralTruncation
    }
}

pub type Result<T> = core::result::Result<T, Error>;
