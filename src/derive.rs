macro_rules! reader {
    ($this:ident => $result:ident) => {
        impl<'bytes> crate::Reader<crate::Borrowed<'bytes>> for $this<'bytes> {
            type Error = Error;
            type Item = $result<$this<'bytes>>;

            fn read(source: crate::Borrowed<'bytes>) -> Result<Self::Item> {
                let mut source = crate::io::BorrowedSource::from(source.0);
                Self::do_read(&mut source)
            }
        }

        impl<'copy> crate::Reader<crate::Copied<'copy>> for $this<'static> {
            type Error = Error;
            type Item = $result<$this<'static>>;

            fn read(source: crate::Copied<'copy>) -> Result<Self::Item> {
                let mut source = crate::io::CopiedSource::from(source.0);
                Self::do_read(&mut source)
            }
        }

        impl crate::Reader<&::std::fs::File> for $this<'static> {
            type Error = Error;
            type Item = $result<$this<'static>>;

            fn read(source: &::std::fs::File) -> Result<Self::Item> {
                let mut source = crate::io::MappedSource::try_from(source)?;
                Self::do_read(&mut source)
            }
        }

        impl crate::Reader<&::std::path::Path> for $this<'static> {
            type Error = Error;
            type Item = $result<$this<'static>>;

            fn read(source: &::std::path::Path) -> Result<Self::Item> {
                let fd = ::std::fs::File::open(source)?;
                <Self as crate::Reader<&::std::fs::File>>::read(&fd)
            }
        }
    };
}

pub(crate) use reader;

macro_rules! bytes {
    ($this:ident => $result:ident) => {
        crate::derive::reader!($this => $result);

        impl<'bytes> crate::Sealed for $this<'bytes> {}

        impl<'bytes> $this<'bytes> {
            #[must_use]
            pub fn as_bytes(&self) -> &[u8] {
                self.bytes.as_bytes()
            }

            #[must_use]
            pub fn as_ptr(&self) -> *const u8 {
                self.bytes.as_ptr()
            }

            /// Drops the contents.
            pub fn clear(&mut self) {
                self.bytes = crate::containers::Bytes::default();
            }

            #[must_use]
            pub fn into_owned(self) -> $this<'static> {
                $this {
                    bytes: self.bytes.into_owned(),
                }
            }

            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.bytes.is_empty()
            }

            #[must_use]
            pub fn len(&self) -> usize {
                self.bytes.len()
            }

            #[must_use]
            pub fn new() -> Self {
                Self::default()
            }

            /// Borrows the given data as the new contents.
            pub fn set_data(&mut self, data: &'bytes [u8]) {
                self.bytes = crate::containers::Bytes::from_borrowed(data);
            }

            /// Takes ownership of the given data as the new contents.
            pub fn set_data_owned(&mut self, data: ::std::vec::Vec<u8>) {
                self.bytes = crate::containers::Bytes::from_owned(data);
            }
        }
    };
}

pub(crate) use bytes;

macro_rules! compressable_bytes {
    ($this:ident => $result:ident) => {
        crate::derive::reader!($this => $result);

        impl<'bytes> crate::Sealed for $this<'bytes> {}

        impl<'bytes> $this<'bytes> {
            #[must_use]
            pub fn as_bytes(&self) -> &[u8] {
                self.container.as_bytes()
            }

            #[must_use]
            pub fn as_ptr(&self) -> *const u8 {
                self.container.as_ptr()
            }

            /// Drops the contents and resets the compression state.
            pub fn clear(&mut self) {
                self.container = crate::containers::CompressableBytes::default();
            }

            /// The decompressed size of the contents, when they are
            /// currently compressed.
            #[must_use]
            pub fn decompressed_len(&self) -> ::core::option::Option<usize> {
                self.container.decompressed_len()
            }

            #[must_use]
            pub fn into_owned(self) -> $this<'static> {
                $this {
                    container: self.container.into_owned(),
                }
            }

            #[must_use]
            pub fn is_compressed(&self) -> bool {
                self.container.is_compressed()
            }

            #[must_use]
            pub fn is_decompressed(&self) -> bool {
                !self.is_compressed()
            }

            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.container.is_empty()
            }

            #[must_use]
            pub fn len(&self) -> usize {
                self.container.len()
            }

            #[must_use]
            pub fn new() -> Self {
                Self::default()
            }

            /// Borrows the given data as the new, decompressed contents.
            pub fn set_data(&mut self, data: &'bytes [u8]) {
                self.container =
                    crate::containers::CompressableBytes::from_borrowed(data, ::core::option::Option::None);
            }

            /// Takes ownership of the given data as the new, decompressed
            /// contents.
            pub fn set_data_owned(&mut self, data: ::std::vec::Vec<u8>) {
                self.container =
                    crate::containers::CompressableBytes::from_owned(data, ::core::option::Option::None);
            }
        }

        impl<'bytes> crate::CompressableFrom<&'bytes [u8]> for $this<'bytes> {
            fn from_compressed(value: &'bytes [u8], decompressed_len: usize) -> Self {
                Self {
                    container: crate::containers::CompressableBytes::from_borrowed(
                        value,
                        ::core::option::Option::Some(decompressed_len),
                    ),
                }
            }

            fn from_decompressed(value: &'bytes [u8]) -> Self {
                Self {
                    container: crate::containers::CompressableBytes::from_borrowed(
                        value,
                        ::core::option::Option::None,
                    ),
                }
            }
        }

        impl crate::CompressableFrom<::std::vec::Vec<u8>> for $this<'static> {
            fn from_compressed(value: ::std::vec::Vec<u8>, decompressed_len: usize) -> Self {
                Self {
                    container: crate::containers::CompressableBytes::from_owned(
                        value,
                        ::core::option::Option::Some(decompressed_len),
                    ),
                }
            }

            fn from_decompressed(value: ::std::vec::Vec<u8>) -> Self {
                Self {
                    container: crate::containers::CompressableBytes::from_owned(
                        value,
                        ::core::option::Option::None,
                    ),
                }
            }
        }
    };
}

pub(crate) use compressable_bytes;

macro_rules! hash {
    ($this:ident) => {
        #[derive(
            ::core::clone::Clone,
            ::core::marker::Copy,
            ::core::fmt::Debug,
            ::core::default::Default,
            ::core::cmp::Eq,
            ::core::cmp::Ord,
            ::core::cmp::PartialEq,
            ::core::cmp::PartialOrd,
        )]
        #[repr(transparent)]
        pub struct $this(Hash);

        impl $this {
            #[must_use]
            pub fn new() -> Self {
                Self::default()
            }
        }

        impl ::core::convert::AsRef<Hash> for $this {
            fn as_ref(&self) -> &Hash {
                &self.0
            }
        }

        impl ::core::borrow::Borrow<Hash> for $this {
            fn borrow(&self) -> &Hash {
                &self.0
            }
        }

        impl ::core::ops::Deref for $this {
            type Target = Hash;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl ::core::ops::DerefMut for $this {
            fn deref_mut(&mut self) -> &mut Self::Target {
                &mut self.0
            }
        }

        impl ::core::convert::From<Hash> for $this {
            fn from(value: Hash) -> Self {
                Self(value)
            }
        }

        impl ::core::convert::From<$this> for Hash {
            fn from(value: $this) -> Self {
                value.0
            }
        }

        impl ::core::cmp::PartialEq<Hash> for $this {
            fn eq(&self, other: &Hash) -> bool {
                &self.0 == other
            }
        }

        impl ::core::cmp::PartialEq<$this> for Hash {
            fn eq(&self, other: &$this) -> bool {
                self == &other.0
            }
        }
    };
}

pub(crate) use hash;

macro_rules! key {
    ($this:ident: $hash:ident) => {
        /// A key for indexing into the relevant mapping.
        #[derive(::core::clone::Clone, ::core::fmt::Debug, ::core::default::Default)]
        pub struct $this {
            pub(crate) hash: $hash,
            pub(crate) name: ::bstr::BString,
        }

        impl $this {
            /// The key's hash.
            #[must_use]
            pub fn hash(&self) -> &$hash {
                &self.hash
            }

            /// The key's name, if any.
            #[must_use]
            pub fn name(&self) -> &::bstr::BStr {
                ::bstr::ByteSlice::as_bstr(self.name.as_slice())
            }
        }

        // keys are ordered by their hash alone
        impl ::core::cmp::PartialEq for $this {
            fn eq(&self, other: &Self) -> bool {
                self.hash.eq(&other.hash)
            }
        }

        impl ::core::cmp::Eq for $this {}

        impl ::core::cmp::PartialOrd for $this {
            fn partial_cmp(&self, other: &Self) -> ::core::option::Option<::core::cmp::Ordering> {
                ::core::option::Option::Some(self.cmp(other))
            }
        }

        impl ::core::cmp::Ord for $this {
            fn cmp(&self, other: &Self) -> ::core::cmp::Ordering {
                self.hash.cmp(&other.hash)
            }
        }

        impl ::core::borrow::Borrow<$hash> for $this {
            fn borrow(&self) -> &$hash {
                &self.hash
            }
        }

        impl<T> ::core::convert::From<T> for $this
        where
            T: ::core::convert::Into<::bstr::BString>,
        {
            fn from(value: T) -> Self {
                let mut name = value.into();
                let hash = Self::hash_in_place(&mut name);
                Self { hash, name }
            }
        }
    };
}

pub(crate) use key;

macro_rules! mapping {
    ($this:ident, $mapping:ident: ($key:ty, $hash:ty) => $value:ident) => {
        pub(crate) type $mapping<'bytes> = ::std::collections::BTreeMap<$key, $value<'bytes>>;

        impl<'bytes> crate::Sealed for $this<'bytes> {}

        #[derive(::core::default::Default)]
        pub struct $this<'bytes> {
            pub(crate) map: $mapping<'bytes>,
        }

        impl<'bytes> $this<'bytes> {
            pub fn clear(&mut self) {
                self.map.clear();
            }

            #[must_use]
            pub fn get<K>(&self, key: &K) -> ::core::option::Option<&$value<'bytes>>
            where
                K: ::core::borrow::Borrow<$hash>,
            {
                self.map.get(key.borrow())
            }

            #[must_use]
            pub fn get_key_value<K>(
                &self,
                key: &K,
            ) -> ::core::option::Option<(&$key, &$value<'bytes>)>
            where
                K: ::core::borrow::Borrow<$hash>,
            {
                self.map.get_key_value(key.borrow())
            }

            #[must_use]
            pub fn get_mut<K>(&mut self, key: &K) -> ::core::option::Option<&mut $value<'bytes>>
            where
                K: ::core::borrow::Borrow<$hash>,
            {
                self.map.get_mut(key.borrow())
            }

            /// Inserts `value` under `key`.
            ///
            /// Keys are immutable once inserted: if the key is already
            /// present the container is left untouched, and the rejected
            /// pair is handed back to the caller.
            pub fn insert<K>(
                &mut self,
                key: K,
                value: $value<'bytes>,
            ) -> ::core::option::Option<($key, $value<'bytes>)>
            where
                K: ::core::convert::Into<$key>,
            {
                let key = key.into();
                let hash: &$hash = ::core::borrow::Borrow::borrow(&key);
                if self.map.contains_key(hash) {
                    ::core::option::Option::Some((key, value))
                } else {
                    self.map.insert(key, value);
                    ::core::option::Option::None
                }
            }

            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.map.is_empty()
            }

            pub fn iter(&self) -> impl ::core::iter::Iterator<Item = (&$key, &$value<'bytes>)> {
                self.map.iter()
            }

            pub fn iter_mut(
                &mut self,
            ) -> impl ::core::iter::Iterator<Item = (&$key, &mut $value<'bytes>)> {
                self.map.iter_mut()
            }

            #[must_use]
            pub fn len(&self) -> usize {
                self.map.len()
            }

            #[must_use]
            pub fn new() -> Self {
                Self::default()
            }

            pub fn remove<K>(&mut self, key: &K) -> ::core::option::Option<$value<'bytes>>
            where
                K: ::core::borrow::Borrow<$hash>,
            {
                self.map.remove(key.borrow())
            }

            pub fn remove_entry<K>(
                &mut self,
                key: &K,
            ) -> ::core::option::Option<($key, $value<'bytes>)>
            where
                K: ::core::borrow::Borrow<$hash>,
            {
                self.map.remove_entry(key.borrow())
            }
        }

        impl<'bytes> ::core::iter::FromIterator<($key, $value<'bytes>)> for $this<'bytes> {
            fn from_iter<T>(iter: T) -> Self
            where
                T: ::core::iter::IntoIterator<Item = ($key, $value<'bytes>)>,
            {
                let mut result = Self::new();
                for (key, value) in iter {
                    result.insert(key, value);
                }
                result
            }
        }

        impl<'bytes> ::core::iter::IntoIterator for $this<'bytes> {
            type Item = <$mapping<'bytes> as ::core::iter::IntoIterator>::Item;
            type IntoIter = <$mapping<'bytes> as ::core::iter::IntoIterator>::IntoIter;

            fn into_iter(self) -> Self::IntoIter {
                self.map.into_iter()
            }
        }

        impl<'bytes, 'this> ::core::iter::IntoIterator for &'this $this<'bytes> {
            type Item = <&'this $mapping<'bytes> as ::core::iter::IntoIterator>::Item;
            type IntoIter = <&'this $mapping<'bytes> as ::core::iter::IntoIterator>::IntoIter;

            fn into_iter(self) -> Self::IntoIter {
                self.map.iter()
            }
        }

        impl<'bytes, 'this> ::core::iter::IntoIterator for &'this mut $this<'bytes> {
            type Item = <&'this mut $mapping<'bytes> as ::core::iter::IntoIterator>::Item;
            type IntoIter = <&'this mut $mapping<'bytes> as ::core::iter::IntoIterator>::IntoIter;

            fn into_iter(self) -> Self::IntoIter {
                self.map.iter_mut()
            }
        }
    };
}

pub(crate) use mapping;

macro_rules! archive {
    ($this:ident => $result:ident, $mapping:ident: ($key:ty, $hash:ty) => $value:ident) => {
        crate::derive::mapping!($this, $mapping: ($key, $hash) => $value);
        crate::derive::reader!($this => $result);
    };
}

pub(crate) use archive;
