use crate::{
    containers::CompressableBytes,
    derive,
    io::{Endian, Sink, Source},
    protocols::{self, BZString, ZString},
    v4::{
        directory::Map as DirectoryMap, Directory, DirectoryHash, DirectoryKey, Error, File, Hash,
        Result, Version,
    },
};
use bstr::{BStr, BString, ByteSlice as _};
use core::mem;
use std::{borrow::Cow, collections::BTreeMap, io::Write};

bitflags::bitflags! {
    /// The archive-level bit field. Flags can impact the layout of an
    /// archive, or how it is read.
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct Flags: u32 {
        /// Includes directory paths within the archive.
        ///
        /// archive.exe does not let you write archives without this flag
        /// set, but this implementation does; names are then absent.
        const DIRECTORY_STRINGS = 1 << 0;

        /// Includes filenames within the archive.
        const FILE_STRINGS = 1 << 1;

        /// Compresses the data within the archive by default.
        const COMPRESSED = 1 << 2;

        const RETAIN_DIRECTORY_NAMES = 1 << 3;

        const RETAIN_FILE_NAMES = 1 << 4;

        const RETAIN_FILE_NAME_OFFSETS = 1 << 5;

        /// Writes the archive in the xbox (big-endian) format.
        ///
        /// This flag affects the sort order of files on disk, but only the
        /// crc of each hash is actually written in big-endian format.
        const XBOX_ARCHIVE = 1 << 6;

        const RETAIN_STRINGS_DURING_STARTUP = 1 << 7;

        /// Writes the full (virtual) path of a file next to its data blob.
        const EMBEDDED_FILE_NAMES = 1 << 8;

        /// Uses the xmem codec to compress the archive.
        const XBOX_COMPRESSED = 1 << 9;
    }
}

impl Default for Flags {
    fn default() -> Self {
        Self::DIRECTORY_STRINGS | Self::FILE_STRINGS
    }
}

impl Flags {
    #[must_use]
    pub fn directory_strings(&self) -> bool {
        self.contains(Self::DIRECTORY_STRINGS)
    }

    #[must_use]
    pub fn file_strings(&self) -> bool {
        self.contains(Self::FILE_STRINGS)
    }

    #[must_use]
    pub fn compressed(&self) -> bool {
        self.contains(Self::COMPRESSED)
    }

    #[must_use]
    pub fn retain_directory_names(&self) -> bool {
        self.contains(Self::RETAIN_DIRECTORY_NAMES)
    }

    #[must_use]
    pub fn retain_file_names(&self) -> bool {
        self.contains(Self::RETAIN_FILE_NAMES)
    }

    #[must_use]
    pub fn retain_file_name_offsets(&self) -> bool {
        self.contains(Self::RETAIN_FILE_NAME_OFFSETS)
    }

    #[must_use]
    pub fn xbox_archive(&self) -> bool {
        self.contains(Self::XBOX_ARCHIVE)
    }

    #[must_use]
    pub fn retain_strings_during_startup(&self) -> bool {
        self.contains(Self::RETAIN_STRINGS_DURING_STARTUP)
    }

    #[must_use]
    pub fn embedded_file_names(&self) -> bool {
        self.contains(Self::EMBEDDED_FILE_NAMES)
    }

    #[must_use]
    pub fn xbox_compressed(&self) -> bool {
        self.contains(Self::XBOX_COMPRESSED)
    }
}

bitflags::bitflags! {
    /// Specifies file types contained within an archive.
    ///
    /// It's not apparent if the game engines actually use these for
    /// anything.
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct Types: u16 {
        const MESHES = 1 << 0;
        const TEXTURES = 1 << 1;
        const MENUS = 1 << 2;
        const SOUNDS = 1 << 3;
        const VOICES = 1 << 4;
        const SHADERS = 1 << 5;
        const TREES = 1 << 6;
        const FONTS = 1 << 7;
        const MISC = 1 << 8;
    }
}

impl Types {
    #[must_use]
    pub fn meshes(&self) -> bool {
        self.contains(Self::MESHES)
    }

    #[must_use]
    pub fn textures(&self) -> bool {
        self.contains(Self::TEXTURES)
    }

    #[must_use]
    pub fn menus(&self) -> bool {
        self.contains(Self::MENUS)
    }

    #[must_use]
    pub fn sounds(&self) -> bool {
        self.contains(Self::SOUNDS)
    }

    #[must_use]
    pub fn voices(&self) -> bool {
        self.contains(Self::VOICES)
    }

    #[must_use]
    pub fn shaders(&self) -> bool {
        self.contains(Self::SHADERS)
    }

    #[must_use]
    pub fn trees(&self) -> bool {
        self.contains(Self::TREES)
    }

    #[must_use]
    pub fn fonts(&self) -> bool {
        self.contains(Self::FONTS)
    }

    #[must_use]
    pub fn misc(&self) -> bool {
        self.contains(Self::MISC)
    }
}

mod constants {
    use crate::cc;

    pub(crate) const BSA: u32 = cc::make_four(b"BSA");

    pub(crate) const HEADER_SIZE: u32 = 0x24;
    pub(crate) const DIRECTORY_ENTRY_SIZE_X86: usize = 0x10;
    pub(crate) const DIRECTORY_ENTRY_SIZE_X64: usize = 0x18;
    pub(crate) const FILE_ENTRY_SIZE: usize = 0x10;

    pub(crate) const FILE_FLAG_COMPRESSION: u32 = 1 << 30;
    pub(crate) const FILE_FLAG_CHECKED: u32 = 1 << 31;
    pub(crate) const FILE_FLAG_SECONDARY_ARCHIVE: u32 = 1 << 31;
}

struct Offsets {
    file_entries: usize,
    file_names: usize,
    file_data: usize,
}

struct Header {
    version: Version,
    archive_flags: Flags,
    directory_count: u32,
    file_count: u32,
    directory_names_len: u32,
    file_names_len: u32,
    archive_types: Types,
}

impl Header {
    #[must_use]
    fn hash_endian(&self) -> Endian {
        if self.archive_flags.xbox_archive() {
            Endian::Big
        } else {
            Endian::Little
        }
    }

    // the flag means something else entirely in the v103 format
    #[must_use]
    fn embedded_file_names(&self) -> bool {
        match self.version {
            Version::v103 => false,
            Version::v104 | Version::v105 => self.archive_flags.embedded_file_names(),
        }
    }

    #[must_use]
    fn compute_offsets(&self) -> Offsets {
        let file_entries = {
            let directory_entry_size = match self.version {
                Version::v103 | Version::v104 => constants::DIRECTORY_ENTRY_SIZE_X86,
                Version::v105 => constants::DIRECTORY_ENTRY_SIZE_X64,
            };
            constants::HEADER_SIZE as usize + directory_entry_size * self.directory_count as usize
        };

        let file_names = {
            let directory_names_len = if self.archive_flags.directory_strings() {
                // directory_names_len counts the string and its null
                // terminator, but not the bzstring length prefix, so add
                // one byte per directory to include it
                self.directory_names_len as usize + self.directory_count as usize
            } else {
                0
            };
            file_entries
                + directory_names_len
                + constants::FILE_ENTRY_SIZE * self.file_count as usize
        };

        let file_data = if self.archive_flags.file_strings() {
            file_names + self.file_names_len as usize
        } else {
            file_names
        };

        Offsets {
            file_entries,
            file_names,
            file_data,
        }
    }
}

derive::key!(Key: DirectoryHash);

impl Key {
    #[must_use]
    fn hash_in_place(name: &mut BString) -> DirectoryHash {
        crate::v4::hash_directory_in_place(name)
    }
}

pub(crate) type Map<'bytes> = BTreeMap<Key, Directory<'bytes>>;

type Intermediate<'this, 'bytes> =
    Vec<(&'this Key, Vec<(&'this DirectoryKey, &'this File<'bytes>)>)>;

/// Represents the directory-based archive revision.
///
/// Alongside the directory mapping, the archive owns the flag and type bit
/// fields found in its header. Reading populates them, and [`clear`]
/// resets them.
///
/// [`clear`]: Archive::clear
#[derive(Default)]
pub struct Archive<'bytes> {
    flags: Flags,
    types: Types,
    map: Map<'bytes>,
}

impl<'bytes> crate::Sealed for Archive<'bytes> {}

type ReadResult<T> = (T, Version);
derive::reader!(Archive => ReadResult);

impl<'bytes> Archive<'bytes> {
    /// The currently configured archive flags.
    #[must_use]
    pub fn archive_flags(&self) -> Flags {
        self.flags
    }

    pub fn set_archive_flags(&mut self, flags: Flags) {
        self.flags = flags;
    }

    /// The currently configured archive types.
    #[must_use]
    pub fn archive_types(&self) -> Types {
        self.types
    }

    pub fn set_archive_types(&mut self, types: Types) {
        self.types = types;
    }

    #[must_use]
    pub fn compressed(&self) -> bool {
        self.flags.compressed()
    }

    #[must_use]
    pub fn directory_strings(&self) -> bool {
        self.flags.directory_strings()
    }

    #[must_use]
    pub fn embedded_file_names(&self) -> bool {
        self.flags.embedded_file_names()
    }

    #[must_use]
    pub fn file_strings(&self) -> bool {
        self.flags.file_strings()
    }

    #[must_use]
    pub fn xbox_archive(&self) -> bool {
        self.flags.xbox_archive()
    }

    #[must_use]
    pub fn xbox_compressed(&self) -> bool {
        self.flags.xbox_compressed()
    }

    /// Drops the contents, the flags, and the types.
    pub fn clear(&mut self) {
        self.map.clear();
        self.flags = Flags::default();
        self.types = Types::default();
    }

    #[must_use]
    pub fn get<K>(&self, key: &K) -> Option<&Directory<'bytes>>
    where
        K: core::borrow::Borrow<DirectoryHash>,
    {
        self.map.get(key.borrow())
    }

    #[must_use]
    pub fn get_key_value<K>(&self, key: &K) -> Option<(&Key, &Directory<'bytes>)>
    where
        K: core::borrow::Borrow<DirectoryHash>,
    {
        self.map.get_key_value(key.borrow())
    }

    #[must_use]
    pub fn get_mut<K>(&mut self, key: &K) -> Option<&mut Directory<'bytes>>
    where
        K: core::borrow::Borrow<DirectoryHash>,
    {
        self.map.get_mut(key.borrow())
    }

    /// Inserts `value` under `key`.
    ///
    /// Keys are immutable once inserted: if the key is already present the
    /// container is left untouched, and the rejected pair is handed back
    /// to the caller.
    pub fn insert<K>(&mut self, key: K, value: Directory<'bytes>) -> Option<(Key, Directory<'bytes>)>
    where
        K: Into<Key>,
    {
        let key = key.into();
        if self.map.contains_key(&key.hash) {
            Some((key, value))
        } else {
            self.map.insert(key, value);
            None
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Key, &Directory<'bytes>)> {
        self.map.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&Key, &mut Directory<'bytes>)> {
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

    pub fn remove<K>(&mut self, key: &K) -> Option<Directory<'bytes>>
    where
        K: core::borrow::Borrow<DirectoryHash>,
    {
        self.map.remove(key.borrow())
    }

    pub fn remove_entry<K>(&mut self, key: &K) -> Option<(Key, Directory<'bytes>)>
    where
        K: core::borrow::Borrow<DirectoryHash>,
    {
        self.map.remove_entry(key.borrow())
    }

    /// Writes the archive into the given stream, in the given version's
    /// layout.
    pub fn write<Out>(&self, stream: &mut Out, version: Version) -> Result<()>
    where
        Out: Write,
    {
        let mut sink = Sink::new(stream);
        let header = self.make_header(version)?;
        Self::write_header(&mut sink, &header)?;

        let order = self.sort_for_write();
        Self::write_directory_entries(&order, &mut sink, &header)?;
        Self::write_file_entries(&order, &mut sink, &header)?;
        if header.archive_flags.file_strings() {
            Self::write_file_names(&order, &mut sink)?;
        }
        Self::write_file_data(&order, &mut sink, &header)?;

        Ok(())
    }

    /// Checks that no stored offset would wrap around if the archive were
    /// written in its current state, in the given version's layout.
    #[must_use]
    pub fn verify_offsets(&self, version: Version) -> bool {
        match self.make_header(version) {
            Ok(header) => self.verify_computed_offsets(&header),
            Err(_) => false,
        }
    }

    fn verify_computed_offsets(&self, header: &Header) -> bool {
        let offsets = header.compute_offsets();
        if offsets.file_names as u64 + u64::from(header.file_names_len) > u64::from(u32::MAX) {
            return false;
        }

        let mut offset = offsets.file_data as u64;
        for (directory_key, directory) in self {
            for (file_key, file) in directory {
                if offset > u64::from(u32::MAX) {
                    return false;
                }

                let mut size = file.len() as u64;
                if header.embedded_file_names() {
                    let name = Self::concat_directory_and_file_name(directory_key, file_key);
                    size += name.len() as u64 + 1;
                }
                if file.is_compressed() {
                    size += mem::size_of::<u32>() as u64;
                }
                offset += size;
            }
        }

        true
    }

    fn make_header(&self, version: Version) -> Result<Header> {
        #[derive(Default)]
        struct Info {
            count: usize,
            names_len: usize,
        }

        let mut files = Info::default();
        let mut directories = Info::default();

        for (key, directory) in self {
            directories.count += 1;
            if self.flags.directory_strings() {
                // zstring -> count the null terminator
                directories.names_len += key.name.len() + 1;
            }

            for (key, _) in directory {
                files.count += 1;
                if self.flags.file_strings() {
                    // zstring -> count the null terminator
                    files.names_len += key.name.len() + 1;
                }
            }
        }

        Ok(Header {
            version,
            archive_flags: self.flags,
            directory_count: directories.count.try_into()?,
            file_count: files.count.try_into()?,
            directory_names_len: directories.names_len.try_into()?,
            file_names_len: files.names_len.try_into()?,
            archive_types: self.types,
        })
    }

    fn sort_for_write(&self) -> Intermediate<'_, 'bytes> {
        let xbox = self.flags.xbox_archive();
        let mut directories: Intermediate<'_, 'bytes> = self
            .map
            .iter()
            .map(|(key, directory)| {
                let mut files: Vec<_> = directory.iter().collect();
                if xbox {
                    files.sort_by_key(|(key, _)| key.hash.numeric().swap_bytes());
                }
                (key, files)
            })
            .collect();

        if xbox {
            directories.sort_by_key(|(key, _)| key.hash.numeric().swap_bytes());
        }

        directories
    }

    fn concat_directory_and_file_name<'string>(
        directory: &'string Key,
        file: &'string DirectoryKey,
    ) -> Cow<'string, BStr> {
        let directory = &directory.name;
        let file = &file.name;

        let directory = match directory.len() {
            0 => b"".as_bstr(),
            1 => match directory[0] {
                b'/' | b'\\' | b'.' => b"".as_bstr(),
                _ => directory.as_ref(),
            },
            _ => directory.as_ref(),
        };

        match (directory.is_empty(), file.is_empty()) {
            (true, true) => Cow::default(),
            (true, false) => Cow::from(file.as_bstr()),
            (false, true) => Cow::from(directory),
            (false, false) => {
                let string: BString = [directory, b"\\".as_bstr(), file.as_bstr()]
                    .into_iter()
                    .flat_map(|x| x.as_bytes())
                    .copied()
                    .collect::<Vec<_>>()
                    .into();
                Cow::from(string)
            }
        }
    }

    fn write_directory_entries<Out>(
        order: &Intermediate<'_, 'bytes>,
        sink: &mut Sink<'_, Out>,
        header: &Header,
    ) -> Result<()>
    where
        Out: ?Sized + Write,
    {
        let offsets = header.compute_offsets();
        // archive.exe biases files_offset by the size of the file-name
        // block, so it points past data that has not been written yet
        let mut files_offset = u32::try_from(offsets.file_entries)?
            .checked_add(header.file_names_len)
            .ok_or(Error::IntegralOverflow)?;

        for (key, files) in order {
            Self::write_hash(sink, header, key.hash.into())?;

            let file_count: u32 = files.len().try_into()?;
            sink.write(&file_count, Endian::Little)?;

            match header.version {
                Version::v103 | Version::v104 => sink.write(&files_offset, Endian::Little)?,
                Version::v105 => {
                    sink.write(&(0u32, u64::from(files_offset)), Endian::Little)?;
                }
            }

            if header.archive_flags.directory_strings() {
                // bzstring -> the length prefix and null terminator ride
                // along
                files_offset = files_offset
                    .checked_add((key.name.len() + 2).try_into()?)
                    .ok_or(Error::IntegralOverflow)?;
            }

            files_offset = files_offset
                .checked_add(
                    files
                        .len()
                        .checked_mul(constants::FILE_ENTRY_SIZE)
                        .ok_or(Error::IntegralOverflow)?
                        .try_into()?,
                )
                .ok_or(Error::IntegralOverflow)?;
        }

        Ok(())
    }

    fn write_file_entries<Out>(
        order: &Intermediate<'_, 'bytes>,
        sink: &mut Sink<'_, Out>,
        header: &Header,
    ) -> Result<()>
    where
        Out: ?Sized + Write,
    {
        let offsets = header.compute_offsets();
        let mut data_offset: u32 = offsets.file_data.try_into()?;

        for (directory_key, files) in order {
            if header.archive_flags.directory_strings() {
                sink.write_protocol::<BZString>(directory_key.name(), Endian::Little)?;
            }

            for (file_key, file) in files {
                Self::write_hash(sink, header, file_key.hash.into())?;

                let (size_with_info, size) = {
                    let mut size = file.len();
                    if header.embedded_file_names() {
                        let name =
                            Self::concat_directory_and_file_name(directory_key, file_key);
                        // include the bstring length prefix
                        size += name.len() + 1;
                    }
                    if file.is_compressed() {
                        size += mem::size_of::<u32>();
                    }

                    let size: u32 = size.try_into()?;
                    let masked =
                        size & !(constants::FILE_FLAG_COMPRESSION | constants::FILE_FLAG_CHECKED);
                    if masked != size {
                        return Err(Error::IntegralTruncation);
                    }

                    if file.is_compressed() == header.archive_flags.compressed() {
                        (size, masked)
                    } else {
                        (size | constants::FILE_FLAG_COMPRESSION, masked)
                    }
                };

                sink.write(&(size_with_info, data_offset), Endian::Little)?;
                data_offset = data_offset
                    .checked_add(size)
                    .ok_or(Error::IntegralOverflow)?;
            }
        }

        Ok(())
    }

    fn write_file_names<Out>(
        order: &Intermediate<'_, 'bytes>,
        sink: &mut Sink<'_, Out>,
    ) -> Result<()>
    where
        Out: ?Sized + Write,
    {
        for (_, files) in order {
            for (file_key, _) in files {
                sink.write_protocol::<ZString>(file_key.name(), Endian::Little)?;
            }
        }

        Ok(())
    }

    fn write_file_data<Out>(
        order: &Intermediate<'_, 'bytes>,
        sink: &mut Sink<'_, Out>,
        header: &Header,
    ) -> Result<()>
    where
        Out: ?Sized + Write,
    {
        for (directory_key, files) in order {
            for (file_key, file) in files {
                if header.embedded_file_names() {
                    let name = Self::concat_directory_and_file_name(directory_key, file_key);
                    sink.write_protocol::<protocols::BString>(name.as_ref(), Endian::Little)?;
                }

                if let Some(len) = file.decompressed_len() {
                    let len: u32 = len.try_into()?;
                    sink.write(&len, Endian::Little)?;
                }

                sink.write_bytes(file.as_bytes())?;
            }
        }

        Ok(())
    }

    fn write_hash<Out>(sink: &mut Sink<'_, Out>, header: &Header, hash: Hash) -> Result<()>
    where
        Out: ?Sized + Write,
    {
        sink.write(
            &(hash.last, hash.last2, hash.length, hash.first),
            Endian::Little,
        )?;
        sink.write(&hash.crc, header.hash_endian())?;

        Ok(())
    }

    fn write_header<Out>(sink: &mut Sink<'_, Out>, header: &Header) -> Result<()>
    where
        Out: ?Sized + Write,
    {
        sink.write(
            &(
                constants::BSA,
                header.version as u32,
                constants::HEADER_SIZE,
                header.archive_flags.bits(),
                header.directory_count,
                header.file_count,
                header.directory_names_len,
                header.file_names_len,
                header.archive_types.bits(),
                0u16,
            ),
            Endian::Little,
        )?;
        Ok(())
    }

    fn do_read<In>(source: &mut In) -> Result<ReadResult<Self>>
    where
        In: ?Sized + Source<'bytes>,
    {
        let header = Self::read_header(source)?;
        let mut offsets = header.compute_offsets();
        let mut map = Map::default();

        for _ in 0..header.directory_count {
            let (key, value) = Self::read_directory(source, &header, &mut offsets)?;
            map.insert(key, value);
        }

        Ok((
            Self {
                flags: header.archive_flags,
                types: header.archive_types,
                map,
            },
            header.version,
        ))
    }

    fn read_directory<In>(
        source: &mut In,
        header: &Header,
        offsets: &mut Offsets,
    ) -> Result<(Key, Directory<'bytes>)>
    where
        In: ?Sized + Source<'bytes>,
    {
        let hash = Self::read_hash(source, header.hash_endian())?;
        let file_count: u32 = source.read(Endian::Little)?;
        #[allow(clippy::cast_possible_wrap)]
        match header.version {
            Version::v103 | Version::v104 => {
                source.seek_relative(mem::size_of::<u32>() as isize)?;
            }
            Version::v105 => source.seek_relative((mem::size_of::<u32>() * 3) as isize)?,
        }

        let (name, directory) =
            source.save_restore_position(|source| -> Result<(BString, Directory<'bytes>)> {
                source.seek_absolute(offsets.file_entries)?;
                let mut name = if header.archive_flags.directory_strings() {
                    Some(source.read_protocol::<BZString>(Endian::Little)?)
                } else {
                    None
                };

                let mut map = DirectoryMap::default();
                for _ in 0..file_count {
                    let (key, value) = Self::read_file_entry(source, header, offsets, &mut name)?;
                    map.insert(key, value);
                }

                offsets.file_entries = source.stream_position();
                Ok((name.unwrap_or_default(), Directory { map }))
            })??;

        Ok((
            Key {
                hash: hash.into(),
                name,
            },
            directory,
        ))
    }

    fn read_file_entry<In>(
        source: &mut In,
        header: &Header,
        offsets: &mut Offsets,
        directory_name: &mut Option<BString>,
    ) -> Result<(DirectoryKey, File<'bytes>)>
    where
        In: ?Sized + Source<'bytes>,
    {
        let hash = Self::read_hash(source, header.hash_endian())?;
        let (compression_flipped, mut data_size, data_offset) = {
            let (size, offset): (u32, u32) = source.read(Endian::Little)?;
            (
                (size & constants::FILE_FLAG_COMPRESSION) != 0,
                (size & !(constants::FILE_FLAG_COMPRESSION | constants::FILE_FLAG_CHECKED))
                    as usize,
                // bit 31 marks files promoted from a secondary archive; it
                // is read, but never written back
                (offset & !constants::FILE_FLAG_SECONDARY_ARCHIVE) as usize,
            )
        };

        let mut name = if header.archive_flags.file_strings() {
            source.save_restore_position(|source| -> Result<Option<BString>> {
                source.seek_absolute(offsets.file_names)?;
                let result = source.read_protocol::<ZString>(Endian::Little)?;
                offsets.file_names = source.stream_position();
                Ok(Some(result))
            })??
        } else {
            None
        };

        let container =
            source.save_restore_position(|source| -> Result<CompressableBytes<'bytes>> {
                source.seek_absolute(data_offset)?;

                if header.embedded_file_names() {
                    // the file-name block stays authoritative; the prefix
                    // only backfills names the block could not provide
                    let mut s = source.read_protocol::<protocols::BString>(Endian::Little)?;
                    data_size = data_size
                        .checked_sub(s.len() + 1)
                        .ok_or(Error::Truncated)?;
                    if let Some(pos) = s.iter().rposition(|&x| x == b'\\' || x == b'/') {
                        if directory_name.is_none() {
                            *directory_name = Some(s[..pos].into());
                        }
                        s.drain(..=pos);
                    }
                    if name.is_none() {
                        name = Some(s);
                    }
                }

                let decompressed_len =
                    match (header.archive_flags.compressed(), compression_flipped) {
                        (true, false) | (false, true) => {
                            let result: u32 = source.read(Endian::Little)?;
                            data_size = data_size
                                .checked_sub(mem::size_of::<u32>())
                                .ok_or(Error::Truncated)?;
                            Some(result as usize)
                        }
                        (true, true) | (false, false) => None,
                    };

                let container = source
                    .read_bytes(data_size)?
                    .into_compressable(decompressed_len);
                Ok(container)
            })??;

        Ok((
            DirectoryKey {
                hash: hash.into(),
                name: name.unwrap_or_default(),
            },
            File { container },
        ))
    }

    fn read_hash<In>(source: &mut In, endian: Endian) -> Result<Hash>
    where
        In: ?Sized + Source<'bytes>,
    {
        let (last, last2, length, first) = source.read(Endian::Little)?;
        let crc = source.read(endian)?;
        Ok(Hash {
            last,
            last2,
            length,
            first,
            crc,
        })
    }

    fn read_header<In>(source: &mut In) -> Result<Header>
    where
        In: ?Sized + Source<'bytes>,
    {
        let (
            magic,
            version,
            header_size,
            archive_flags,
            directory_count,
            file_count,
            directory_names_len,
            file_names_len,
            archive_types,
            padding,
        ) = source.read(Endian::Little)?;
        let _: u16 = padding;

        if magic != constants::BSA {
            return Err(Error::BadMagic(magic));
        }

        let version = match version {
            103 => Version::v103,
            104 => Version::v104,
            105 => Version::v105,
            _ => return Err(Error::InvalidVersion(version)),
        };

        if header_size != constants::HEADER_SIZE {
            return Err(Error::InvalidHeaderSize(header_size));
        }

        // there probably exist "valid" archives which set stray bits, so
        // it's not worth rejecting them
        let archive_flags = Flags::from_bits_truncate(archive_flags);
        let archive_types = Types::from_bits_truncate(archive_types);

        Ok(Header {
            version,
            archive_flags,
            directory_count,
            file_count,
            directory_names_len,
            file_names_len,
            archive_types,
        })
    }
}

impl<'bytes> FromIterator<(Key, Directory<'bytes>)> for Archive<'bytes> {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = (Key, Directory<'bytes>)>,
    {
        let mut result = Self::new();
        for (key, value) in iter {
            result.insert(key, value);
        }
        result
    }
}

impl<'bytes> IntoIterator for Archive<'bytes> {
    type Item = <Map<'bytes> as IntoIterator>::Item;
    type IntoIter = <Map<'bytes> as IntoIterator>::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.map.into_iter()
    }
}

impl<'bytes, 'this> IntoIterator for &'this Archive<'bytes> {
    type Item = <&'this Map<'bytes> as IntoIterator>::Item;
    type IntoIter = <&'this Map<'bytes> as IntoIterator>::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.map.iter()
    }
}

impl<'bytes, 'this> IntoIterator for &'this mut Archive<'bytes> {
    type Item = <&'this mut Map<'bytes> as IntoIterator>::Item;
    type IntoIter = <&'this mut Map<'bytes> as IntoIterator>::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.map.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        prelude::*,
        v4::{
            Archive, ArchiveKey, CompressionOptions, Directory, DirectoryKey, Error, File, Flags,
            Types, Version,
        },
        Borrowed,
    };
    use memmap2::Mmap;

    fn insert_file<'bytes>(
        archive: &mut Archive<'bytes>,
        directory: &str,
        file: &str,
        payload: &'bytes [u8],
    ) {
        let value = File::from_decompressed(payload);
        let key = ArchiveKey::from(directory);
        if let Some(existing) = archive.get_mut(key.hash()) {
            existing.insert(DirectoryKey::from(file), value);
        } else {
            let mut fresh = Directory::new();
            fresh.insert(DirectoryKey::from(file), value);
            archive.insert(key, fresh);
        }
    }

    fn header_bytes(magic: u32, version: u32, header_size: u32) -> Vec<u8> {
        let mut result = Vec::new();
        result.extend_from_slice(&magic.to_le_bytes());
        result.extend_from_slice(&version.to_le_bytes());
        result.extend_from_slice(&header_size.to_le_bytes());
        result.extend_from_slice(&[0u8; 24]);
        result
    }

    const MAGIC: u32 = super::constants::BSA;

    #[test]
    fn default_state() {
        let bsa = Archive::new();
        assert!(bsa.is_empty());
        assert!(bsa.len() == 0);
        assert_eq!(bsa.archive_flags(), Flags::default());
        assert_eq!(bsa.archive_types(), Types::empty());
    }

    #[test]
    fn clear_resets_header_state() {
        let mut bsa = Archive::new();
        bsa.set_archive_flags(Flags::default() | Flags::XBOX_ARCHIVE);
        bsa.set_archive_types(Types::MESHES);
        bsa.insert(ArchiveKey::from("meshes"), Directory::new());

        bsa.clear();
        assert!(bsa.is_empty());
        assert_eq!(bsa.archive_flags(), Flags::default());
        assert_eq!(bsa.archive_types(), Types::empty());
    }

    #[test]
    fn duplicate_directories_are_rejected() {
        let mut bsa = Archive::new();
        assert!(bsa
            .insert(ArchiveKey::from("meshes"), Directory::new())
            .is_none());

        let rejected = bsa.insert(ArchiveKey::from("MESHES"), Directory::new());
        assert!(rejected.is_some());
        assert_eq!(bsa.len(), 1);
    }

    #[test]
    fn invalid_magic() {
        let data = header_bytes(0x00434241, 104, 0x24);
        match Archive::read(Borrowed(&data)) {
            Err(Error::BadMagic(0x0043_4241)) => (),
            _ => panic!("read should have failed with BadMagic"),
        }
    }

    #[test]
    fn invalid_version() {
        let data = header_bytes(MAGIC, 42, 0x24);
        match Archive::read(Borrowed(&data)) {
            Err(Error::InvalidVersion(42)) => (),
            _ => panic!("read should have failed with InvalidVersion"),
        }
    }

    #[test]
    fn invalid_size() {
        let data = header_bytes(MAGIC, 104, 0xCC);
        match Archive::read(Borrowed(&data)) {
            Err(Error::InvalidHeaderSize(0xCC)) => (),
            _ => panic!("read should have failed with InvalidHeaderSize"),
        }
    }

    #[test]
    fn invalid_exhausted() {
        let data = header_bytes(MAGIC, 104, 0x24);
        match Archive::read(Borrowed(&data[..20])) {
            Err(Error::Truncated) => (),
            _ => panic!("read should have failed with Truncated"),
        }
    }

    #[test]
    fn uncompressed_round_trip() -> anyhow::Result<()> {
        let entries = [
            ("meshes\\armor", "cuirass.nif"),
            ("meshes\\armor", "helmet.nif"),
            ("textures", "cuirass_d.dds"),
            (".", "readme.txt"),
        ];
        let payloads: Vec<Vec<u8>> = entries
            .iter()
            .map(|(directory, file)| format!("{directory}\\{file}").into_bytes().repeat(5))
            .collect();

        for version in [Version::v103, Version::v104, Version::v105] {
            let mut archive = Archive::new();
            archive.set_archive_types(Types::MESHES | Types::TEXTURES);
            for ((directory, file), payload) in entries.iter().zip(&payloads) {
                insert_file(&mut archive, directory, file, payload);
            }

            let mut stream = Vec::new();
            archive.write(&mut stream, version)?;

            let (read_back, read_version) = Archive::read(Borrowed(&stream))?;
            assert_eq!(read_version, version);
            assert_eq!(read_back.archive_flags(), archive.archive_flags());
            assert_eq!(read_back.archive_types(), archive.archive_types());
            assert_eq!(read_back.len(), archive.len());

            for ((key, directory), (read_key, read_directory)) in
                archive.iter().zip(read_back.iter())
            {
                assert_eq!(key.hash(), read_key.hash());
                assert_eq!(key.name(), read_key.name());
                assert_eq!(directory.len(), read_directory.len());

                for ((file_key, file), (read_file_key, read_file)) in
                    directory.iter().zip(read_directory.iter())
                {
                    assert_eq!(file_key.hash(), read_file_key.hash());
                    assert_eq!(file_key.name(), read_file_key.name());
                    assert!(!read_file.is_compressed());
                    assert_eq!(file.as_bytes(), read_file.as_bytes());
                }
            }
        }

        Ok(())
    }

    #[test]
    fn compressed_round_trip() -> anyhow::Result<()> {
        for version in [Version::v104, Version::v105] {
            let options = CompressionOptions {
                version,
                ..Default::default()
            };
            let payload: Vec<u8> = b"some highly repetitive payload ".repeat(20);

            let compressed = File::from_decompressed(payload.as_slice()).compress(&options)?;
            let compressed_bytes = compressed.as_bytes().to_vec();

            let mut directory = Directory::new();
            directory.insert(DirectoryKey::from("license.txt"), compressed);
            let mut archive = Archive::new();
            archive.insert(ArchiveKey::from("docs"), directory);
            archive.set_archive_flags(Flags::default() | Flags::COMPRESSED);

            let mut stream = Vec::new();
            archive.write(&mut stream, version)?;

            let (read_back, _) = Archive::read(Borrowed(&stream))?;
            assert!(read_back.compressed());
            let file = read_back
                .get(ArchiveKey::from("docs").hash())
                .unwrap()
                .get(DirectoryKey::from("license.txt").hash())
                .unwrap();
            assert!(file.is_compressed());
            assert_eq!(file.decompressed_len(), Some(payload.len()));
            assert_eq!(file.as_bytes(), compressed_bytes.as_slice());

            let decompressed = file.decompress(&options)?;
            assert_eq!(decompressed.as_bytes(), payload.as_slice());

            // compressing the same plaintext again yields the stored bytes
            let recompressed = File::from_decompressed(payload.as_slice()).compress(&options)?;
            assert_eq!(recompressed.as_bytes(), file.as_bytes());
        }

        Ok(())
    }

    #[test]
    fn file_compression_diverges_from_archive_compression() -> anyhow::Result<()> {
        let options = CompressionOptions {
            version: Version::v104,
            ..Default::default()
        };
        let payload: Vec<u8> = b"flip bit test payload ".repeat(12);

        let mut directory = Directory::new();
        directory.insert(
            DirectoryKey::from("raw.txt"),
            File::from_decompressed(payload.as_slice()),
        );
        directory.insert(
            DirectoryKey::from("packed.txt"),
            File::from_decompressed(payload.as_slice()).compress(&options)?,
        );
        let mut archive = Archive::new();
        archive.insert(ArchiveKey::from("."), directory);
        archive.set_archive_flags(Flags::default() | Flags::COMPRESSED);

        let mut stream = Vec::new();
        archive.write(&mut stream, Version::v104)?;

        let (read_back, _) = Archive::read(Borrowed(&stream))?;
        assert!(read_back.compressed());
        let directory = read_back.get(ArchiveKey::from(".").hash()).unwrap();

        let raw = directory.get(DirectoryKey::from("raw.txt").hash()).unwrap();
        assert!(!raw.is_compressed());
        assert_eq!(raw.as_bytes(), payload.as_slice());

        let packed = directory
            .get(DirectoryKey::from("packed.txt").hash())
            .unwrap();
        assert!(packed.is_compressed());
        assert_eq!(packed.decompress(&options)?.as_bytes(), payload.as_slice());

        Ok(())
    }

    #[test]
    fn xbox_archives_round_trip() -> anyhow::Result<()> {
        let entries = [
            ("meshes\\furniture", "chair.nif"),
            ("meshes\\furniture", "table.nif"),
            ("sound\\fx", "thunder.wav"),
        ];
        let payloads: Vec<Vec<u8>> = entries
            .iter()
            .map(|(directory, file)| format!("{directory}\\{file}").into_bytes().repeat(3))
            .collect();

        let mut archive = Archive::new();
        for ((directory, file), payload) in entries.iter().zip(&payloads) {
            insert_file(&mut archive, directory, file, payload);
        }

        let mut normal = Vec::new();
        archive.write(&mut normal, Version::v104)?;

        archive.set_archive_flags(Flags::default() | Flags::XBOX_ARCHIVE);
        let mut xbox = Vec::new();
        archive.write(&mut xbox, Version::v104)?;

        // the endianness quirk and the alternative sort leave their mark
        assert_eq!(normal.len(), xbox.len());
        assert_ne!(normal, xbox);

        let (from_normal, _) = Archive::read(Borrowed(&normal))?;
        let (from_xbox, _) = Archive::read(Borrowed(&xbox))?;
        assert!(!from_normal.xbox_archive());
        assert!(from_xbox.xbox_archive());
        assert_eq!(from_normal.len(), from_xbox.len());

        for ((normal_key, normal_directory), (xbox_key, xbox_directory)) in
            from_normal.iter().zip(from_xbox.iter())
        {
            assert_eq!(normal_key.hash(), xbox_key.hash());
            assert_eq!(normal_key.name(), xbox_key.name());
            assert_eq!(normal_directory.len(), xbox_directory.len());

            for ((normal_file_key, normal_file), (xbox_file_key, xbox_file)) in
                normal_directory.iter().zip(xbox_directory.iter())
            {
                assert_eq!(normal_file_key.hash(), xbox_file_key.hash());
                assert_eq!(normal_file_key.name(), xbox_file_key.name());
                assert_eq!(normal_file.as_bytes(), xbox_file.as_bytes());
            }
        }

        Ok(())
    }

    #[test]
    fn embedded_file_names_backfill_missing_strings() -> anyhow::Result<()> {
        let payload = b"embedded name payload".to_vec();
        let mut directory = Directory::new();
        directory.insert(
            DirectoryKey::from("tile.dds"),
            File::from_decompressed(payload.as_slice()),
        );
        let mut archive = Archive::new();
        archive.insert(ArchiveKey::from("textures\\terrain"), directory);
        archive.set_archive_flags(Flags::EMBEDDED_FILE_NAMES);

        let mut stream = Vec::new();
        archive.write(&mut stream, Version::v104)?;

        let (read_back, _) = Archive::read(Borrowed(&stream))?;
        let (key, directory) = read_back.iter().next().unwrap();
        assert_eq!(key.name(), "textures\\terrain");
        let (file_key, file) = directory.iter().next().unwrap();
        assert_eq!(file_key.name(), "tile.dds");
        assert_eq!(file.as_bytes(), payload.as_slice());

        Ok(())
    }

    #[test]
    fn nameless_archives_keep_their_hashes() -> anyhow::Result<()> {
        let payload = b"no strings attached".to_vec();
        let mut archive = Archive::new();
        insert_file(&mut archive, "meshes", "chair.nif", &payload);
        archive.set_archive_flags(Flags::empty());

        let mut stream = Vec::new();
        archive.write(&mut stream, Version::v103)?;

        let (read_back, _) = Archive::read(Borrowed(&stream))?;
        assert_eq!(read_back.archive_flags(), Flags::empty());

        let directory = read_back
            .get(ArchiveKey::from("meshes").hash())
            .expect("the directory hash should still resolve");
        let file = directory
            .get(DirectoryKey::from("chair.nif").hash())
            .expect("the file hash should still resolve");
        assert_eq!(file.as_bytes(), payload.as_slice());

        let (key, _) = read_back.iter().next().unwrap();
        assert!(key.name().is_empty());

        Ok(())
    }

    #[test]
    fn reading_from_disk_goes_through_the_mapping() -> anyhow::Result<()> {
        let payload = b"on disk round trip".to_vec();
        let mut archive = Archive::new();
        insert_file(&mut archive, "misc", "note.txt", &payload);

        let mut file = tempfile::tempfile()?;
        archive.write(&mut file, Version::v105)?;

        let (read_back, version) = Archive::read(&file)?;
        assert_eq!(version, Version::v105);
        let stored = read_back
            .get(ArchiveKey::from("misc").hash())
            .unwrap()
            .get(DirectoryKey::from("note.txt").hash())
            .unwrap();
        assert_eq!(stored.as_bytes(), payload.as_slice());

        Ok(())
    }

    #[test]
    fn verify_offsets_checks_the_data_region() -> anyhow::Result<()> {
        let payload = b"well within bounds".to_vec();
        let mut archive = Archive::new();
        insert_file(&mut archive, "misc", "a.raw", &payload);
        for version in [Version::v103, Version::v104, Version::v105] {
            assert!(archive.verify_offsets(version));
        }

        let huge = tempfile::tempfile()?;
        huge.set_len(u64::from(u32::MAX) + 1)?;
        // the file is sparse, so mapping it does not commit 4 GiB
        let mapping = unsafe { Mmap::map(&huge)? };

        let first = DirectoryKey::from("a.raw");
        let second = DirectoryKey::from("z.raw");
        assert!(first.hash() < second.hash());

        let mut archive = Archive::new();
        let mut directory = Directory::new();
        directory.insert(first, File::from_decompressed(&mapping[..]));
        archive.insert(ArchiveKey::from("misc"), directory);
        assert!(archive.verify_offsets(Version::v104));

        archive
            .get_mut(ArchiveKey::from("misc").hash())
            .unwrap()
            .insert(second, File::from_decompressed(b"0123456789abcdef".as_slice()));
        assert!(!archive.verify_offsets(Version::v104));

        Ok(())
    }
}

