#![warn(clippy::pedantic, clippy::std_instead_of_core)]
#![allow(clippy::enum_glob_use, clippy::missing_errors_doc)]

//! Archives come in two flavors: the flat namespace used by the earliest
//! titles (see [`v3`]), and the directory/file namespace introduced
//! afterwards (see [`v4`]). Use [`guess_format`] if you don't know, ahead of
//! time, which you're dealing with.

mod cc;
mod containers;
mod derive;
mod guess;
mod hashing;
mod io;
mod protocols;
pub mod v3;
pub mod v4;

pub use guess::{guess_format, FileFormat};

/// Makes a shallow copy of the input.
///
/// The result is tied to the lifetime of the input buffer.
pub struct Borrowed<'borrow>(pub &'borrow [u8]);

/// Makes a deep copy of the input.
///
/// The result is owned, and may outlive the input buffer.
pub struct Copied<'copy>(pub &'copy [u8]);

#[doc(hidden)]
pub trait Sealed {}

/// A trait that enables reading from various sources.
pub trait Reader<T>
where
    Self: Sealed + Sized,
{
    type Error;
    type Item;

    /// Reads an instance of `Self::Item` from the given source.
    fn read(source: T) -> core::result::Result<Self::Item, Self::Error>;
}

/// Convenience constructors for payloads which may be compressed.
pub trait CompressableFrom<T>
where
    Self: Sealed,
{
    /// Makes a compressed instance of `Self` using the given data.
    #[must_use]
    fn from_compressed(value: T, decompressed_len: usize) -> Self;

    /// Makes a decompressed instance of `Self` using the given data.
    #[must_use]
    fn from_decompressed(value: T) -> Self;
}

pub use bstr::{BStr, BString};

pub mod prelude {
    pub use crate::{CompressableFrom as _, Reader as _};
}
