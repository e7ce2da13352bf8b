use memmap2::Mmap;
use std::sync::Arc;

struct Mapping {
    pos: usize,
    len: usize,
    mapping: Arc<Mmap>,
}

impl Mapping {
    fn as_bytes(&self) -> &[u8] {
        &self.mapping[self.pos..self.pos + self.len]
    }
}

enum BytesInner<'bytes> {
    Owned(Box<[u8]>),
    Borrowed(&'bytes [u8]),
    Mapped(Mapping),
}

use BytesInner::*;

/// The storage backing a file payload.
///
/// A payload is either empty, owns its bytes outright, or borrows a span of
/// a backing buffer. Mapped spans keep the backing mapping alive through a
/// shared handle, so they may outlive the source they were read from.
pub(crate) struct Bytes<'bytes> {
    inner: BytesInner<'bytes>,
}

impl<'bytes> Bytes<'bytes> {
    #[must_use]
    pub(crate) fn as_bytes(&self) -> &[u8] {
        match &self.inner {
            Owned(x) => x,
            Borrowed(x) => x,
            Mapped(x) => x.as_bytes(),
        }
    }

    #[must_use]
    pub(crate) fn as_ptr(&self) -> *const u8 {
        self.as_bytes().as_ptr()
    }

    #[must_use]
    pub(crate) fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.as_bytes().len()
    }

    #[must_use]
    pub(crate) fn from_borrowed(bytes: &'bytes [u8]) -> Self {
        Self {
            inner: Borrowed(bytes),
        }
    }

    #[must_use]
    pub(crate) fn into_compressable(
        self,
        decompressed_len: Option<usize>,
    ) -> CompressableBytes<'bytes> {
        CompressableBytes {
            inner: self.inner,
            decompressed_len,
        }
    }

    #[must_use]
    pub(crate) fn into_owned(self) -> Bytes<'static> {
        Bytes {
            inner: match self.inner {
                Owned(x) => Owned(x),
                Borrowed(x) => Owned(x.into()),
                Mapped(x) => Mapped(x),
            },
        }
    }
}

impl Bytes<'static> {
    #[must_use]
    pub(crate) fn from_owned(bytes: Vec<u8>) -> Self {
        Self {
            inner: Owned(bytes.into_boxed_slice()),
        }
    }

    #[must_use]
    pub(crate) fn from_mapped(pos: usize, len: usize, mapping: Arc<Mmap>) -> Self {
        Self {
            inner: Mapped(Mapping { pos, len, mapping }),
        }
    }
}

impl<'bytes> Default for Bytes<'bytes> {
    fn default() -> Self {
        Self {
            inner: Owned(Box::default()),
        }
    }
}

/// [`Bytes`], plus the bookkeeping needed to track compression.
///
/// `decompressed_len` doubles as the state flag: when it is set, the bytes
/// held are the compressed form.
pub(crate) struct CompressableBytes<'bytes> {
    inner: BytesInner<'bytes>,
    decompressed_len: Option<usize>,
}

impl<'bytes> CompressableBytes<'bytes> {
    #[must_use]
    pub(crate) fn as_bytes(&self) -> &[u8] {
        match &self.inner {
            Owned(x) => x,
            Borrowed(x) => x,
            Mapped(x) => x.as_bytes(),
        }
    }

    #[must_use]
    pub(crate) fn as_ptr(&self) -> *const u8 {
        self.as_bytes().as_ptr()
    }

    #[must_use]
    pub(crate) fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.as_bytes().len()
    }

    #[must_use]
    pub(crate) fn from_borrowed(bytes: &'bytes [u8], decompressed_len: Option<usize>) -> Self {
        Self {
            inner: Borrowed(bytes),
            decompressed_len,
        }
    }

    #[must_use]
    pub(crate) fn decompressed_len(&self) -> Option<usize> {
        self.decompressed_len
    }

    #[must_use]
    pub(crate) fn is_compressed(&self) -> bool {
        self.decompressed_len.is_some()
    }

    #[must_use]
    pub(crate) fn into_owned(self) -> CompressableBytes<'static> {
        CompressableBytes {
            inner: match self.inner {
                Owned(x) => Owned(x),
                Borrowed(x) => Owned(x.into()),
                Mapped(x) => Mapped(x),
            },
            decompressed_len: self.decompressed_len,
        }
    }
}

impl CompressableBytes<'static> {
    #[must_use]
    pub(crate) fn from_owned(bytes: Vec<u8>, decompressed_len: Option<usize>) -> Self {
        Self {
            inner: Owned(bytes.into_boxed_slice()),
            decompressed_len,
        }
    }
}

impl<'bytes> Default for CompressableBytes<'bytes> {
    fn default() -> Self {
        Self {
            inner: Owned(Box::default()),
            decompressed_len: None,
        }
    }
}
