use crate::containers::Bytes;
use core::mem;
use memmap2::Mmap;
use std::{
    fs::File,
    io::{self, Write},
    sync::Arc,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Endian {
    Big,
    Little,
    #[allow(dead_code)]
    Native,
}

pub(crate) trait BinaryReadable<'bytes> {
    type Item;

    fn from_stream<In>(stream: &mut In, endian: Endian) -> io::Result<Self::Item>
    where
        In: ?Sized + Source<'bytes>;
}

pub(crate) trait BinaryWriteable {
    type Item: ?Sized;

    fn to_stream<Out>(stream: &mut Sink<'_, Out>, item: &Self::Item, endian: Endian)
        -> io::Result<()>
    where
        Out: ?Sized + Write;
}

macro_rules! make_binary_streamable {
    ($t:ty) => {
        impl<'bytes> BinaryReadable<'bytes> for $t {
            type Item = $t;

            fn from_stream<In>(stream: &mut In, endian: Endian) -> io::Result<Self::Item>
            where
                In: ?Sized + Source<'bytes>,
            {
                let mut bytes = [0u8; mem::size_of::<$t>()];
                stream.read_into(&mut bytes)?;
                Ok(match endian {
                    Endian::Big => <$t>::from_be_bytes(bytes),
                    Endian::Little => <$t>::from_le_bytes(bytes),
                    Endian::Native => <$t>::from_ne_bytes(bytes),
                })
            }
        }

        impl BinaryWriteable for $t {
            type Item = $t;

            fn to_stream<Out>(
                stream: &mut Sink<'_, Out>,
                item: &Self::Item,
                endian: Endian,
            ) -> io::Result<()>
            where
                Out: ?Sized + Write,
            {
                let bytes = match endian {
                    Endian::Big => item.to_be_bytes(),
                    Endian::Little => item.to_le_bytes(),
                    Endian::Native => item.to_ne_bytes(),
                };
                stream.write_bytes(&bytes)
            }
        }
    };
}

make_binary_streamable!(u8);
make_binary_streamable!(u16);
make_binary_streamable!(u32);
make_binary_streamable!(u64);

macro_rules! make_binary_streamable_tuple {
    ($($idx:tt $t:ident),+) => {
        impl<'bytes, $($t,)+> BinaryReadable<'bytes> for ($($t,)+)
        where
            $($t: BinaryReadable<'bytes>,)+
        {
            type Item = ($($t::Item,)+);

            fn from_stream<In>(stream: &mut In, endian: Endian) -> io::Result<Self::Item>
            where
                In: ?Sized + Source<'bytes>,
            {
                Ok(($(
                    $t::from_stream(stream, endian)?,
                )+))
            }
        }

        impl<$($t,)+> BinaryWriteable for ($($t,)+)
        where
            $($t: BinaryWriteable, $t::Item: Sized,)+
        {
            type Item = ($($t::Item,)+);

            fn to_stream<Out>(
                stream: &mut Sink<'_, Out>,
                item: &Self::Item,
                endian: Endian,
            ) -> io::Result<()>
            where
                Out: ?Sized + Write,
            {
                $(
                    $t::to_stream(stream, &item.$idx, endian)?;
                )+
                Ok(())
            }
        }
    };
}

make_binary_streamable_tuple!(0 T0);
make_binary_streamable_tuple!(0 T0, 1 T1);
make_binary_streamable_tuple!(0 T0, 1 T1, 2 T2);
make_binary_streamable_tuple!(0 T0, 1 T1, 2 T2, 3 T3);
make_binary_streamable_tuple!(0 T0, 1 T1, 2 T2, 3 T3, 4 T4);
make_binary_streamable_tuple!(0 T0, 1 T1, 2 T2, 3 T3, 4 T4, 5 T5);
make_binary_streamable_tuple!(0 T0, 1 T1, 2 T2, 3 T3, 4 T4, 5 T5, 6 T6);
make_binary_streamable_tuple!(0 T0, 1 T1, 2 T2, 3 T3, 4 T4, 5 T5, 6 T6, 7 T7);
make_binary_streamable_tuple!(0 T0, 1 T1, 2 T2, 3 T3, 4 T4, 5 T5, 6 T6, 7 T7, 8 T8);
make_binary_streamable_tuple!(0 T0, 1 T1, 2 T2, 3 T3, 4 T4, 5 T5, 6 T6, 7 T7, 8 T8, 9 T9);

fn exhausted() -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "the stream ended before the requested read could be completed",
    )
}

/// A seekable, readable view over a backing buffer.
///
/// Positions are free-form: seeking past the end is allowed, and reads from
/// such positions simply fail.
pub(crate) trait Source<'bytes> {
    fn read_bytes(&mut self, len: usize) -> io::Result<Bytes<'bytes>>;

    fn read_bytes_to_end(&mut self) -> Bytes<'bytes>;

    fn read_into(&mut self, out: &mut [u8]) -> io::Result<()>;

    fn seek_absolute(&mut self, pos: usize) -> io::Result<()>;

    fn seek_relative(&mut self, offset: isize) -> io::Result<()>;

    fn stream_position(&self) -> usize;

    fn read<T>(&mut self, endian: Endian) -> io::Result<T>
    where
        T: BinaryReadable<'bytes, Item = T>,
    {
        T::from_stream(self, endian)
    }

    fn read_protocol<T>(&mut self, endian: Endian) -> io::Result<T::Item>
    where
        T: BinaryReadable<'bytes>,
    {
        T::from_stream(self, endian)
    }

    /// Runs `f`, then puts the cursor back where it was, whether or not `f`
    /// bailed early.
    fn save_restore_position<F, T>(&mut self, f: F) -> io::Result<T>
    where
        F: FnOnce(&mut Self) -> T,
    {
        let position = self.stream_position();
        let result = f(self);
        self.seek_absolute(position)?;
        Ok(result)
    }
}

macro_rules! make_cursor_ops {
    () => {
        fn read_into(&mut self, out: &mut [u8]) -> io::Result<()> {
            let bytes = self.fetch(out.len())?;
            out.copy_from_slice(bytes);
            Ok(())
        }

        fn seek_absolute(&mut self, pos: usize) -> io::Result<()> {
            self.pos = pos;
            Ok(())
        }

        fn seek_relative(&mut self, offset: isize) -> io::Result<()> {
            match self.pos.checked_add_signed(offset) {
                Some(pos) => {
                    self.pos = pos;
                    Ok(())
                }
                None => Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "attempted to seek before the start of the stream",
                )),
            }
        }

        fn stream_position(&self) -> usize {
            self.pos
        }
    };
}

pub(crate) struct BorrowedSource<'bytes> {
    source: &'bytes [u8],
    pos: usize,
}

impl<'bytes> BorrowedSource<'bytes> {
    fn fetch(&mut self, len: usize) -> io::Result<&'bytes [u8]> {
        let start = self.pos;
        let end = start.checked_add(len).ok_or_else(exhausted)?;
        if end > self.source.len() {
            return Err(exhausted());
        }

        self.pos = end;
        Ok(&self.source[start..end])
    }
}

impl<'bytes> From<&'bytes [u8]> for BorrowedSource<'bytes> {
    fn from(source: &'bytes [u8]) -> Self {
        Self { source, pos: 0 }
    }
}

impl<'bytes> Source<'bytes> for BorrowedSource<'bytes> {
    fn read_bytes(&mut self, len: usize) -> io::Result<Bytes<'bytes>> {
        self.fetch(len).map(Bytes::from_borrowed)
    }

    fn read_bytes_to_end(&mut self) -> Bytes<'bytes> {
        let start = usize::min(self.pos, self.source.len());
        self.pos = self.source.len();
        Bytes::from_borrowed(&self.source[start..])
    }

    make_cursor_ops!();
}

pub(crate) struct CopiedSource<'borrow> {
    source: &'borrow [u8],
    pos: usize,
}

impl<'borrow> CopiedSource<'borrow> {
    fn fetch(&mut self, len: usize) -> io::Result<&[u8]> {
        let start = self.pos;
        let end = start.checked_add(len).ok_or_else(exhausted)?;
        if end > self.source.len() {
            return Err(exhausted());
        }

        self.pos = end;
        Ok(&self.source[start..end])
    }
}

impl<'borrow> From<&'borrow [u8]> for CopiedSource<'borrow> {
    fn from(source: &'borrow [u8]) -> Self {
        Self { source, pos: 0 }
    }
}

impl<'borrow> Source<'static> for CopiedSource<'borrow> {
    fn read_bytes(&mut self, len: usize) -> io::Result<Bytes<'static>> {
        self.fetch(len).map(|x| Bytes::from_owned(x.to_vec()))
    }

    fn read_bytes_to_end(&mut self) -> Bytes<'static> {
        let start = usize::min(self.pos, self.source.len());
        self.pos = self.source.len();
        Bytes::from_owned(self.source[start..].to_vec())
    }

    make_cursor_ops!();
}

pub(crate) struct MappedSource {
    mapping: Arc<Mmap>,
    pos: usize,
}

impl MappedSource {
    fn fetch(&mut self, len: usize) -> io::Result<(usize, usize)> {
        let start = self.pos;
        let end = start.checked_add(len).ok_or_else(exhausted)?;
        if end > self.mapping.len() {
            return Err(exhausted());
        }

        self.pos = end;
        Ok((start, len))
    }
}

impl TryFrom<&File> for MappedSource {
    type Error = io::Error;

    fn try_from(source: &File) -> io::Result<Self> {
        // the mapping is only observed through shared slices, but mutation
        // of the file by another process remains the caller's hazard
        let mapping = unsafe { Mmap::map(source) }?;
        Ok(Self {
            mapping: Arc::new(mapping),
            pos: 0,
        })
    }
}

impl Source<'static> for MappedSource {
    fn read_bytes(&mut self, len: usize) -> io::Result<Bytes<'static>> {
        let (pos, len) = self.fetch(len)?;
        Ok(Bytes::from_mapped(pos, len, self.mapping.clone()))
    }

    fn read_bytes_to_end(&mut self) -> Bytes<'static> {
        let start = usize::min(self.pos, self.mapping.len());
        let len = self.mapping.len() - start;
        self.pos = self.mapping.len();
        Bytes::from_mapped(start, len, self.mapping.clone())
    }

    fn read_into(&mut self, out: &mut [u8]) -> io::Result<()> {
        let (pos, len) = self.fetch(out.len())?;
        out.copy_from_slice(&self.mapping[pos..pos + len]);
        Ok(())
    }

    fn seek_absolute(&mut self, pos: usize) -> io::Result<()> {
        self.pos = pos;
        Ok(())
    }

    fn seek_relative(&mut self, offset: isize) -> io::Result<()> {
        match self.pos.checked_add_signed(offset) {
            Some(pos) => {
                self.pos = pos;
                Ok(())
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "attempted to seek before the start of the stream",
            )),
        }
    }

    fn stream_position(&self) -> usize {
        self.pos
    }
}

/// An append-only stream of primitives and byte spans.
///
/// Offsets are computed up front by the writers; the sink never seeks.
pub(crate) struct Sink<'stream, Out>
where
    Out: ?Sized + Write,
{
    stream: &'stream mut Out,
}

impl<'stream, Out> Sink<'stream, Out>
where
    Out: ?Sized + Write,
{
    pub(crate) fn new(stream: &'stream mut Out) -> Self {
        Self { stream }
    }

    pub(crate) fn write<T>(&mut self, item: &T, endian: Endian) -> io::Result<()>
    where
        T: BinaryWriteable<Item = T>,
    {
        T::to_stream(self, item, endian)
    }

    pub(crate) fn write_protocol<T>(&mut self, item: &T::Item, endian: Endian) -> io::Result<()>
    where
        T: BinaryWriteable,
    {
        T::to_stream(self, item, endian)
    }

    pub(crate) fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes)
    }
}
