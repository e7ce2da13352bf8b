use crate::{
    containers::Bytes,
    derive,
    io::Source,
    v3::{Error, Result},
};
use std::io::Write;

/// Represents a file within the archive.
#[derive(Default)]
pub struct File<'bytes> {
    pub(crate) bytes: Bytes<'bytes>,
}

type ReadResult<T> = T;
derive::bytes!(File => ReadResult);

impl<'bytes> File<'bytes> {
    /// Writes the contents of the file into the given stream.
    pub fn write<Out>(&self, stream: &mut Out) -> Result<()>
    where
        Out: ?Sized + Write,
    {
        stream.write_all(self.as_bytes())?;
        Ok(())
    }

    #[allow(clippy::unnecessary_wraps)]
    fn do_read<In>(stream: &mut In) -> Result<ReadResult<Self>>
    where
        In: ?Sized + Source<'bytes>,
    {
        Ok(Self {
            bytes: stream.read_bytes_to_end(),
        })
    }
}

impl<'bytes> From<&'bytes [u8]> for File<'bytes> {
    fn from(value: &'bytes [u8]) -> Self {
        Self {
            bytes: Bytes::from_borrowed(value),
        }
    }
}

impl<'bytes, const N: usize> From<&'bytes [u8; N]> for File<'bytes> {
    fn from(value: &'bytes [u8; N]) -> Self {
        Self {
            bytes: Bytes::from_borrowed(value),
        }
    }
}

impl From<Vec<u8>> for File<'static> {
    fn from(value: Vec<u8>) -> Self {
        Self {
            bytes: Bytes::from_owned(value),
        }
    }
}
