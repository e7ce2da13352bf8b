//! The directory-based archive revision, spanning versions 103, 104, and
//! 105.
//!
//! This is the first revision to support compression, and it splits the
//! namespace in two: directories own files, and each level is keyed by its
//! own hash. Directory paths and file names hash separately.
//!
//! # Reading
//! ```rust
//! use bsa::{
//!     prelude::*,
//!     v4::{Archive, ArchiveKey, CompressionOptions, DirectoryKey},
//! };
//! use std::{fs, path::Path};
//!
//! fn example() -> Option<()> {
//!     let path = Path::new("path/to/archive.bsa");
//!     let (archive, version) = Archive::read(path).ok()?;
//!     let file = archive
//!         .get(&ArchiveKey::from(b"sound/voice/high elf/f"))?
//!         .get(&DirectoryKey::from(b"greeting.mp3"))?;
//!     let mut dst = fs::File::create("greeting.mp3").ok()?;
//!     let mut options = CompressionOptions::default();
//!     options.version = version;
//!     file.write(&mut dst, &options).ok()?;
//!     Some(())
//! }
//! ```
//!
//! # Writing
//! ```rust
//! use bsa::{
//!     prelude::*,
//!     v4::{Archive, ArchiveKey, Directory, DirectoryKey, File, Types, Version},
//! };
//! use std::fs;
//!
//! fn example() -> Option<()> {
//!     let file = File::from_decompressed(b"Hello world!\n".as_slice());
//!     let directory: Directory = [(DirectoryKey::from(b"hello.txt"), file)]
//!         .into_iter()
//!         .collect();
//!     let mut archive = Archive::new();
//!     archive.insert(ArchiveKey::from(b"misc"), directory);
//!     archive.set_archive_types(Types::MISC);
//!     let mut dst = fs::File::create("example.bsa").ok()?;
//!     archive.write(&mut dst, Version::v104).ok()?;
//!     Some(())
//! }
//! ```

mod archive;
mod directory;
mod file;
mod hashing;

pub use self::{
    archive::{Archive, Flags, Key as ArchiveKey, Types},
    directory::{Directory, Key as DirectoryKey},
    file::{CompressionOptions, File},
    hashing::{
        hash_directory, hash_directory_in_place, hash_file, hash_file_in_place, DirectoryHash,
        FileHash, Hash,
    },
};

use core::num::TryFromIntError;
use lzzzz::lz4f;
use std::{error, io};

#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("can not compress the given file because it is already compressed")]
    AlreadyCompressed,

    #[error("can not decompress the given file because it is already decompressed")]
    AlreadyDecompressed,

    #[error("invalid magic read from archive header: {0}")]
    BadMagic(u32),

    #[error("the given buffer holds {got} bytes, but at least {needed} bytes are required")]
    BufferTooSmall { needed: usize, got: usize },

    #[error("the underlying codec rejected the given data: {0}")]
    CodecError(Box<dyn error::Error + Send + Sync>),

    #[error("buffer failed to decompress to the expected size... expected {expected} bytes, but got {actual} bytes")]
    DecompressionSizeMismatch { expected: usize, actual: usize },

    #[error("an operation on two integers would have overflowed and corrupted data")]
    IntegralOverflow,

    #[error("an operation on an integer would have truncated and corrupted data")]
    IntegralTruncation,

    #[error("invalid size read from archive header: {0}")]
    InvalidHeaderSize(u32),

    #[error("invalid version read from archive header: {0}")]
    InvalidVersion(u32),

    #[error(transparent)]
    Io(io::Error),

    #[error("the xmem codec is not implemented")]
    NotImplemented,

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

impl From<lz4f::Error> for Error {
    fn from(value: lz4f::Error) -> Self {
        Self::CodecError(Box::new(value))
    }
}

impl From<flate2::CompressError> for Error {
    fn from(value: flate2::CompressError) -> Self {
        Self::CodecError(Box::new(value))
    }
}

impl From<flate2::DecompressError> for Error {
    fn from(value: flate2::DecompressError) -> Self {
        Self::CodecError(Box::new(value))
    }
}

pub type Result<T> = core::result::Result<T, Error>;

/// Specifies the codec to use when performing compression/decompression
/// actions on files.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum CompressionCodec {
    /// The default compression codec.
    #[default]
    Normal,

    /// The codec used for console archives.
    ///
    /// No portable implementation exists, so selecting it fails with
    /// [`Error::NotImplemented`].
    Xmem,
}

/// The archive version.
///
/// Each version has an impact on the abi of the archive file format.
#[allow(non_camel_case_types)]
#[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
pub enum Version {
    #[default]
    v103 = 103,
    v104 = 104,
    v105 = 105,
}

impl Version {
    /// The Elder Scrolls IV: Oblivion.
    pub const TES4: Self = Self::v103;
    /// Fallout 3.
    pub const FO3: Self = Self::v104;
    /// Fallout: New Vegas.
    pub const FNV: Self = Self::v104;
    /// The Elder Scrolls V: Skyrim.
    pub const TES5: Self = Self::v104;
    /// The Elder Scrolls V: Skyrim - Special Edition.
    pub const SSE: Self = Self::v105;
}
