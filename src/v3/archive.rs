use crate::{
    containers::Bytes,
    derive,
    io::{Endian, Sink, Source},
    protocols::ZString,
    v3::{hashing, Error, File, FileHash, Hash, Result},
};
use bstr::BString;
use std::io::Write;

mod constants {
    pub(crate) const FILE_ENTRY_SIZE: usize = 0x8;
    pub(crate) const HASH_SIZE: usize = 0x8;
    pub(crate) const HEADER_MAGIC: u32 = 0x100;
    pub(crate) const HEADER_SIZE: usize = 0xC;
}

struct Offsets {
    name_offsets: usize,
    names: usize,
    hashes: usize,
    file_data: usize,
}

struct Header {
    hash_offset: u32,
    file_count: u32,
}

impl Header {
    #[must_use]
    fn compute_offsets(&self) -> Offsets {
        let file_count = self.file_count as usize;
        let name_offsets = constants::HEADER_SIZE + constants::FILE_ENTRY_SIZE * file_count;
        let names = name_offsets + 0x4 * file_count;
        let hashes = constants::HEADER_SIZE + self.hash_offset as usize;
        let file_data = hashes + constants::HASH_SIZE * file_count;
        Offsets {
            name_offsets,
            names,
            hashes,
            file_data,
        }
    }
}

derive::key!(Key: FileHash);

impl Key {
    #[must_use]
    fn hash_in_place(name: &mut BString) -> FileHash {
        hashing::hash_file_in_place(name)
    }
}

type ReadResult<T> = T;
derive::archive!(Archive => ReadResult, Map: (Key, FileHash) => File);

impl<'bytes> Archive<'bytes> {
    /// Writes the archive into the given stream.
    pub fn write<Out>(&self, stream: &mut Out) -> Result<()>
    where
        Out: Write,
    {
        let mut sink = Sink::new(stream);
        let header = self.make_header()?;
        Self::write_header(&mut sink, &header)?;
        self.write_file_entries(&mut sink)?;
        self.write_name_offsets(&mut sink)?;
        self.write_names(&mut sink)?;
        self.write_hashes(&mut sink)?;
        self.write_file_data(&mut sink)?;

        Ok(())
    }

    /// Checks that no stored offset would wrap around if the archive were
    /// written in its current state.
    #[must_use]
    pub fn verify_offsets(&self) -> bool {
        let file_count = self.map.len() as u64;
        let names_len: u64 = self.map.keys().map(|x| x.name.len() as u64 + 1).sum();
        let hash_offset = (constants::FILE_ENTRY_SIZE as u64 + 0x4) * file_count + names_len;
        let file_data = constants::HEADER_SIZE as u64
            + hash_offset
            + constants::HASH_SIZE as u64 * file_count;

        let mut offset = file_data;
        for file in self.map.values() {
            if offset > u64::from(u32::MAX) {
                return false;
            }
            offset += file.bytes.len() as u64;
        }

        hash_offset <= u64::from(u32::MAX)
    }

    fn make_header(&self) -> Result<Header> {
        Ok(Header {
            file_count: self.map.len().try_into()?,
            hash_offset: {
                let names_offset = (constants::FILE_ENTRY_SIZE + 0x4) * self.map.len();
                let names_len: usize = self.map.keys().map(|x| x.name.len() + 1).sum();
                (names_offset + names_len).try_into()?
            },
        })
    }

    fn do_read<In>(source: &mut In) -> Result<ReadResult<Self>>
    where
        In: ?Sized + Source<'bytes>,
    {
        let header = Self::read_header(source)?;
        let offsets = header.compute_offsets();
        let mut map = Map::default();

        for i in 0..header.file_count as usize {
            let (key, value) = Self::read_file(source, i, &offsets)?;
            map.insert(key, value);
        }

        Ok(Self { map })
    }

    fn read_file<In>(source: &mut In, idx: usize, offsets: &Offsets) -> Result<(Key, File<'bytes>)>
    where
        In: ?Sized + Source<'bytes>,
    {
        let hash = source.save_restore_position(|source| -> Result<Hash> {
            source.seek_absolute(offsets.hashes + constants::HASH_SIZE * idx)?;
            Self::read_hash(source)
        })??;

        let name = source.save_restore_position(|source| -> Result<BString> {
            source.seek_absolute(offsets.name_offsets + 0x4 * idx)?;
            let offset: u32 = source.read(Endian::Little)?;
            source.seek_absolute(offsets.names + offset as usize)?;
            let name = source.read_protocol::<ZString>(Endian::Little)?;
            Ok(name)
        })??;

        let (size, offset): (u32, u32) = source.read(Endian::Little)?;
        let bytes = source.save_restore_position(|source| -> Result<Bytes<'bytes>> {
            source.seek_absolute(offsets.file_data + offset as usize)?;
            let result = source.read_bytes(size as usize)?;
            Ok(result)
        })??;

        Ok((
            Key {
                hash: hash.into(),
                name,
            },
            File { bytes },
        ))
    }

    fn read_hash<In>(source: &mut In) -> Result<Hash>
    where
        In: ?Sized + Source<'bytes>,
    {
        let (lo, hi) = source.read(Endian::Little)?;
        Ok(Hash { lo, hi })
    }

    fn read_header<In>(source: &mut In) -> Result<Header>
    where
        In: ?Sized + Source<'bytes>,
    {
        let (magic, hash_offset, file_count) = source.read(Endian::Little)?;
        match magic {
            constants::HEADER_MAGIC => Ok(Header {
                hash_offset,
                file_count,
            }),
            _ => Err(Error::BadMagic(magic)),
        }
    }

    fn write_file_entries<Out>(&self, sink: &mut Sink<'_, Out>) -> Result<()>
    where
        Out: ?Sized + Write,
    {
        let mut offset: u32 = 0;
        for file in self.map.values() {
            let size: u32 = file.bytes.len().try_into()?;
            sink.write(&(size, offset), Endian::Little)?;
            offset = offset.checked_add(size).ok_or(Error::IntegralTruncation)?;
        }

        Ok(())
    }

    fn write_file_data<Out>(&self, sink: &mut Sink<'_, Out>) -> Result<()>
    where
        Out: ?Sized + Write,
    {
        for file in self.map.values() {
            sink.write_bytes(file.as_bytes())?;
        }

        Ok(())
    }

    fn write_hashes<Out>(&self, sink: &mut Sink<'_, Out>) -> Result<()>
    where
        Out: ?Sized + Write,
    {
        for key in self.map.keys() {
            let hash = &key.hash;
            sink.write(&(hash.lo, hash.hi), Endian::Little)?;
        }

        Ok(())
    }

    fn write_header<Out>(sink: &mut Sink<'_, Out>, header: &Header) -> Result<()>
    where
        Out: ?Sized + Write,
    {
        sink.write(
            &(
                constants::HEADER_MAGIC,
                header.hash_offset,
                header.file_count,
            ),
            Endian::Little,
        )?;
        Ok(())
    }

    fn write_name_offsets<Out>(&self, sink: &mut Sink<'_, Out>) -> Result<()>
    where
        Out: ?Sized + Write,
    {
        let mut offset: u32 = 0;
        for key in self.map.keys() {
            sink.write(&offset, Endian::Little)?;
            offset = offset
                .checked_add(u32::try_from(key.name.len() + 1)?)
                .ok_or(Error::IntegralTruncation)?;
        }

        Ok(())
    }

    fn write_names<Out>(&self, sink: &mut Sink<'_, Out>) -> Result<()>
    where
        Out: ?Sized + Write,
    {
        for key in self.map.keys() {
            sink.write_protocol::<ZString>(key.name(), Endian::Little)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        prelude::*,
        v3::{Archive, ArchiveKey, Error, File, FileHash, Hash},
        Borrowed,
    };
    use anyhow::Context as _;
    use bstr::BString;
    use memmap2::Mmap;

    #[test]
    fn default_state() {
        let bsa = Archive::new();
        assert!(bsa.is_empty());
        assert!(bsa.len() == 0);
    }

    #[test]
    fn invalid_magic() {
        let mut data = Vec::new();
        data.extend_from_slice(&0x200u32.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());

        match Archive::read(Borrowed(&data)) {
            Err(Error::BadMagic(0x200)) => (),
            _ => panic!("read should have failed with BadMagic"),
        }
    }

    #[test]
    fn invalid_exhausted() {
        let data = 0x100u32.to_le_bytes();
        match Archive::read(Borrowed(&data)) {
            Err(Error::Truncated) => (),
            _ => panic!("read should have failed with Truncated"),
        }
    }

    #[test]
    fn writing() -> anyhow::Result<()> {
        struct Info {
            key: ArchiveKey,
            data: Vec<u8>,
        }

        impl Info {
            fn new(lo: u32, hi: u32, path: &str) -> Self {
                let hash = Hash { lo, hi };
                let key = ArchiveKey::from(BString::from(path));
                assert_eq!(&hash, key.hash().as_ref());
                let data = path.as_bytes().repeat(8);
                Self { key, data }
            }
        }

        let infos = [
            Info::new(0x0C18356B, 0xA578DB74, "Tiles/tile_0001.png"),
            Info::new(0x1B0D3416, 0xF5D5F30E, "Share/License.txt"),
            Info::new(0x1B3B140A, 0x07B36E53, "Background/background_middle.png"),
            Info::new(0x29505413, 0x1EB4CED7, "Construct 3/Pixel Platformer.c3p"),
            Info::new(0x4B7D031B, 0xD4701AD4, "Tilemap/characters_packed.png"),
            Info::new(0x74491918, 0x2BEBCD0A, "Characters/character_0001.png"),
        ];

        let stream = {
            let mut archive = Archive::new();
            for info in &infos {
                let file = File::from(&info.data[..]);
                assert!(archive.insert(info.key.clone(), file).is_none());
            }
            let mut result = Vec::new();
            archive
                .write(&mut result)
                .context("failed to write test archive to memory")?;
            result
        };

        let archive =
            Archive::read(Borrowed(&stream)).context("failed to read from archive in memory")?;
        for info in &infos {
            let file = archive.get(info.key.hash()).with_context(|| {
                format!("failed to get value from archive with key: {:?}", info.key)
            })?;
            assert_eq!(file.as_bytes(), &info.data[..]);
        }

        // iteration yields keys in ascending numeric order
        let numerics: Vec<u64> = archive.iter().map(|(key, _)| key.hash().numeric()).collect();
        let mut sorted = numerics.clone();
        sorted.sort_unstable();
        assert_eq!(numerics, sorted);

        Ok(())
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let mut archive = Archive::new();
        assert!(archive
            .insert(ArchiveKey::from("meshes/a.nif"), File::from(b"original"))
            .is_none());

        let rejected = archive.insert(ArchiveKey::from("MESHES\\A.NIF"), File::from(b"imposter"));
        let (key, file) = rejected.expect("the duplicate should have been rejected");
        assert_eq!(file.as_bytes(), b"imposter");
        assert_eq!(key.hash(), ArchiveKey::from("meshes/a.nif").hash());

        assert_eq!(archive.len(), 1);
        let stored = archive.get(key.hash()).unwrap();
        assert_eq!(stored.as_bytes(), b"original");
    }

    #[test]
    fn verify_offsets_catches_u32_wrap_around() -> anyhow::Result<()> {
        let huge = tempfile::tempfile().context("failed to make a temp file")?;
        huge.set_len(u64::from(u32::MAX) + 1)
            .context("failed to grow the temp file")?;
        // the file is sparse, so mapping it does not commit 4 GiB
        let mapping = unsafe { Mmap::map(&huge).context("failed to map the temp file")? };

        let first = ArchiveKey::from("a.raw");
        let second = ArchiveKey::from("z.raw");
        assert!(first.hash() < second.hash());

        let mut archive = Archive::new();
        assert!(archive
            .insert(first, File::from(&mapping[..]))
            .is_none());
        assert!(archive.verify_offsets());

        assert!(archive
            .insert(second, File::from(b"0123456789abcdef"))
            .is_none());
        assert!(!archive.verify_offsets());

        Ok(())
    }

    #[test]
    fn assert_generic_interfaces_compile() {
        let mut bsa = Archive::default();
        let key = ArchiveKey::default();
        let hash = FileHash::default();

        _ = bsa.get(&key);
        _ = bsa.get(&hash);

        _ = bsa.remove(&key);
        _ = bsa.remove(&hash);

        _ = bsa.remove_entry(&key);
        _ = bsa.remove_entry(&hash);

        _ = bsa.insert(key, Default::default());
        _ = bsa.insert(BString::default(), Default::default());
    }
}
