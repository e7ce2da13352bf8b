use crate::{
    derive,
    v4::{self, File, FileHash},
};
use bstr::BString;

derive::key!(Key: FileHash);

impl Key {
    #[must_use]
    fn hash_in_place(name: &mut BString) -> FileHash {
        v4::hash_file_in_place(name)
    }
}

derive::mapping!(Directory, Map: (Key, FileHash) => File);
