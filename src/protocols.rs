use crate::io::{BinaryReadable, BinaryWriteable, Endian, Sink, Source};
use bstr::{BStr as ByteStr, BString as ByteString};
use core::num::NonZeroU8;
use std::io::{self, Write};

#[derive(Debug, thiserror::Error)]
enum Error {
    #[error("postfix null terminator was missing from a string")]
    MissingNullTerminator,

    #[error("a string is too large to be written without data loss")]
    StringTooLarge,
}

impl From<Error> for io::Error {
    fn from(value: Error) -> Self {
        Self::new(io::ErrorKind::InvalidData, value)
    }
}

/// A string prefixed by its u8 length, with no terminator.
pub(crate) struct BString;

impl<'bytes> BinaryReadable<'bytes> for BString {
    type Item = ByteString;

    fn from_stream<In>(stream: &mut In, endian: Endian) -> io::Result<Self::Item>
    where
        In: ?Sized + Source<'bytes>,
    {
        let len: u8 = stream.read(endian)?;
        let bytes = stream.read_bytes(len.into())?;
        Ok(ByteString::new(bytes.as_bytes().to_vec()))
    }
}

impl BinaryWriteable for BString {
    type Item = ByteStr;

    fn to_stream<Out>(
        stream: &mut Sink<'_, Out>,
        item: &Self::Item,
        endian: Endian,
    ) -> io::Result<()>
    where
        Out: ?Sized + Write,
    {
        let len: u8 = item.len().try_into().map_err(|_| Error::StringTooLarge)?;
        stream.write(&len, endian)?;
        stream.write_bytes(item)?;
        Ok(())
    }
}

/// A string terminated by a null byte.
pub(crate) struct ZString;

impl<'bytes> BinaryReadable<'bytes> for ZString {
    type Item = ByteString;

    fn from_stream<In>(stream: &mut In, endian: Endian) -> io::Result<Self::Item>
    where
        In: ?Sized + Source<'bytes>,
    {
        let mut result = Vec::new();
        loop {
            let byte: u8 = stream.read(endian)?;
            match byte {
                0 => break,
                byte => result.push(byte),
            };
        }

        Ok(ByteString::new(result))
    }
}

impl BinaryWriteable for ZString {
    type Item = ByteStr;

    fn to_stream<Out>(stream: &mut Sink<'_, Out>, item: &Self::Item, _: Endian) -> io::Result<()>
    where
        Out: ?Sized + Write,
    {
        stream.write_bytes(item)?;
        stream.write_bytes(b"\0")?;
        Ok(())
    }
}

/// A string prefixed by its u8 length and terminated by a null byte. The
/// length includes the terminator.
pub(crate) struct BZString;

impl<'bytes> BinaryReadable<'bytes> for BZString {
    type Item = ByteString;

    fn from_stream<In>(stream: &mut In, endian: Endian) -> io::Result<Self::Item>
    where
        In: ?Sized + Source<'bytes>,
    {
        let len: u8 = stream.read(endian)?;
        let Some(len) = NonZeroU8::new(len) else {
            return Err(Error::MissingNullTerminator.into());
        };

        let bytes = stream.read_bytes((len.get() - 1).into())?;
        match stream.read(endian)? {
            b'\0' => Ok(ByteString::new(bytes.as_bytes().to_vec())),
            _ => Err(Error::MissingNullTerminator.into()),
        }
    }
}

impl BinaryWriteable for BZString {
    type Item = ByteStr;

    fn to_stream<Out>(
        stream: &mut Sink<'_, Out>,
        item: &Self::Item,
        endian: Endian,
    ) -> io::Result<()>
    where
        Out: ?Sized + Write,
    {
        let len: u8 = (item.len() + 1)
            .try_into()
            .map_err(|_| Error::StringTooLarge)?;
        stream.write(&len, endian)?;
        stream.write_bytes(item)?;
        stream.write_bytes(b"\0")?;
        Ok(())
    }
}
