use crate::cc;
use core::mem;
use std::io::Read;

/// The file format an archive most likely belongs to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileFormat {
    V3,
    V4,
}

const BSA: u32 = cc::make_four(b"BSA");

/// Guesses the archive format based on the magic at the start of the stream.
#[allow(clippy::module_name_repetitions)]
pub fn guess_format<In>(source: &mut In) -> Option<FileFormat>
where
    In: ?Sized + Read,
{
    let mut buf = [0u8; mem::size_of::<u32>()];
    source.read_exact(&mut buf).ok()?;
    let magic = u32::from_le_bytes(buf);
    match magic {
        0x100 => Some(FileFormat::V3),
        BSA => Some(FileFormat::V4),
        _ => None,
    }
}
