//! Pack files: an archive of compressed objects plus a sorted index.
//!
//! See: https://git-scm.com/docs/pack-format
//!
//! A [`Pack`] names an `.idx`/`.pack` pair on disk and maps both files the
//! first time it is queried. The mapping is kept until the pack is dropped
//! and is only ever read, so once open a pack can be shared freely between
//! threads. A pack whose files cannot be opened is remembered as unavailable
//! and answers every lookup with "not found".

mod data;
mod index;
mod write;

pub use data::{
    decode_record_header, inflate, read_pack_header, DeltaBase, PackData, RecordHeader,
    PACK_HEADER_SIZE, PACK_SIGNATURE, PACK_TRAILER_SIZE, PACK_VERSION,
};
pub use index::PackIndex;
pub use write::{PackWriter, WrittenPack};

use crate::{ObjectId, ObjectKind, Result, StorageError};
use memmap2::Mmap;
use once_cell::sync::OnceCell;
use std::fs::File;
use std::ops::Deref;
use std::path::{Path, PathBuf};

/// Record type codes stored in the 3-bit type field of a pack record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    /// A whole object.
    Base(ObjectKind),
    /// A patch against the record a given number of bytes earlier.
    OfsDelta,
    /// A patch against the object with a given identifier.
    RefDelta,
}

impl RecordType {
    /// Parses a pack type code.
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            1 => Ok(Self::Base(ObjectKind::Commit)),
            2 => Ok(Self::Base(ObjectKind::Tree)),
            3 => Ok(Self::Base(ObjectKind::Blob)),
            4 => Ok(Self::Base(ObjectKind::Tag)),
            6 => Ok(Self::OfsDelta),
            7 => Ok(Self::RefDelta),
            _ => Err(StorageError::InvalidPack(format!(
                "unknown pack type: {}",
                code
            ))),
        }
    }

    /// Returns the pack type code.
    pub fn code(&self) -> u8 {
        match self {
            Self::Base(ObjectKind::Commit) => 1,
            Self::Base(ObjectKind::Tree) => 2,
            Self::Base(ObjectKind::Blob) => 3,
            Self::Base(ObjectKind::Tag) => 4,
            Self::OfsDelta => 6,
            Self::RefDelta => 7,
        }
    }
}

/// Read-only bytes backing an index or data file.
pub(crate) enum Buffer {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Buffer {
    fn map(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Ok(Self::Owned(Vec::new()));
        }
        // SAFETY: pack files are never modified after they are written; the
        // store only adds new files.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self::Mapped(mmap))
    }
}

impl Deref for Buffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::Mapped(mmap) => mmap,
            Self::Owned(bytes) => bytes,
        }
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mapped(m) => write!(f, "Mapped({} bytes)", m.len()),
            Self::Owned(b) => write!(f, "Owned({} bytes)", b.len()),
        }
    }
}

/// An opened index/data pair.
#[derive(Debug)]
pub struct OpenPack {
    index: PackIndex,
    data: PackData,
}

impl OpenPack {
    /// Maps and validates both files.
    pub fn open(index_path: &Path, data_path: &Path) -> Result<Self> {
        let index = PackIndex::parse(Buffer::map(index_path)?)?;
        let data = PackData::parse(Buffer::map(data_path)?)?;
        Self::new(index, data)
    }

    /// Builds a pack from in-memory index and data bytes.
    pub fn from_bytes(index: Vec<u8>, data: Vec<u8>) -> Result<Self> {
        let index = PackIndex::parse(Buffer::Owned(index))?;
        let data = PackData::parse(Buffer::Owned(data))?;
        Self::new(index, data)
    }

    fn new(index: PackIndex, data: PackData) -> Result<Self> {
        if index.len() != data.object_count() {
            return Err(StorageError::InvalidPack(format!(
                "index lists {} objects, pack holds {}",
                index.len(),
                data.object_count()
            )));
        }
        Ok(Self { index, data })
    }

    /// The index half.
    pub fn index(&self) -> &PackIndex {
        &self.index
    }

    /// The data half.
    pub fn data(&self) -> &PackData {
        &self.data
    }

    /// Looks up the record offset of `id`.
    pub fn offset(&self, id: &ObjectId) -> Result<Option<u64>> {
        self.index.lookup(id)
    }

    /// Reads and fully resolves the record at `offset`.
    pub fn read_raw(&self, offset: u64) -> Result<(ObjectKind, Vec<u8>)> {
        self.data.read_raw(offset, &self.index)
    }

    /// Reads the object `id`, if this pack holds it.
    pub fn read(&self, id: &ObjectId) -> Result<Option<(ObjectKind, Vec<u8>)>> {
        match self.offset(id)? {
            Some(offset) => self.read_raw(offset).map(Some),
            None => Ok(None),
        }
    }
}

/// A pack on disk, opened on first use.
#[derive(Debug)]
pub struct Pack {
    index_path: PathBuf,
    data_path: PathBuf,
    files: OnceCell<Option<OpenPack>>,
}

impl Pack {
    /// Describes the pack whose index lives at `index_path`; the data file is
    /// the sibling with a `.pack` extension. Nothing is opened yet.
    pub fn new(index_path: impl Into<PathBuf>) -> Self {
        let index_path = index_path.into();
        let data_path = index_path.with_extension("pack");
        Self {
            index_path,
            data_path,
            files: OnceCell::new(),
        }
    }

    /// Path of the `.idx` file.
    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    /// Path of the `.pack` file.
    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    /// Returns the opened pack, opening it on first call. `None` if the
    /// files could not be opened or failed validation.
    pub fn files(&self) -> Option<&OpenPack> {
        self.files
            .get_or_init(|| match OpenPack::open(&self.index_path, &self.data_path) {
                Ok(pack) => {
                    tracing::debug!(
                        path = %self.index_path.display(),
                        objects = pack.index.len(),
                        "Opened pack"
                    );
                    Some(pack)
                }
                Err(e) => {
                    tracing::warn!(
                        path = %self.index_path.display(),
                        error = %e,
                        "Skipping unreadable pack"
                    );
                    None
                }
            })
            .as_ref()
    }

    /// Looks up the record offset of `id`.
    pub fn offset(&self, id: &ObjectId) -> Result<Option<u64>> {
        match self.files() {
            Some(pack) => pack.offset(id),
            None => Ok(None),
        }
    }

    /// Reads the object `id`, if this pack holds it.
    pub fn read(&self, id: &ObjectId) -> Result<Option<(ObjectKind, Vec<u8>)>> {
        match self.files() {
            Some(pack) => pack.read(id),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::DeltaBuilder;
    use crate::Object;
    use tempfile::TempDir;

    #[test]
    fn test_record_type_codes() {
        for code in [1u8, 2, 3, 4, 6, 7] {
            assert_eq!(RecordType::from_code(code).unwrap().code(), code);
        }
        assert!(RecordType::from_code(0).is_err());
        assert!(RecordType::from_code(5).is_err());
    }

    #[test]
    fn test_offset_delta_hello_world() {
        let base = Object::blob(b"hello".to_vec());
        let target = Object::blob(b"hello world".to_vec());

        let mut writer = PackWriter::new();
        let base_offset = writer.add_object(&base).unwrap();
        let patch = DeltaBuilder::new(5).copy(0, 5).insert(b" world").build();
        let delta_offset = writer
            .add_ofs_delta(target.id(), base_offset, &patch)
            .unwrap();
        let written = writer.finish().unwrap();

        let pack = OpenPack::from_bytes(written.index, written.pack).unwrap();
        let (kind, bytes) = pack.read_raw(delta_offset).unwrap();
        assert_eq!(kind, ObjectKind::Blob);
        assert_eq!(bytes, b"hello world");
        assert_eq!(pack.offset(&target.id()).unwrap(), Some(delta_offset));
    }

    #[test]
    fn test_pack_on_disk_opens_lazily() {
        let dir = TempDir::new().unwrap();
        let blob = Object::blob(b"on disk".to_vec());
        let mut writer = PackWriter::new();
        writer.add_object(&blob).unwrap();
        let index_path = writer.finish().unwrap().write_to(dir.path()).unwrap();

        let pack = Pack::new(&index_path);
        assert_eq!(pack.data_path().extension().unwrap(), "pack");
        let (kind, bytes) = pack.read(&blob.id()).unwrap().unwrap();
        assert_eq!(kind, ObjectKind::Blob);
        assert_eq!(bytes, b"on disk");
        assert!(pack.read(&ObjectId::from_bytes([9u8; 20])).unwrap().is_none());
    }

    #[test]
    fn test_unreadable_pack_is_absent() {
        let dir = TempDir::new().unwrap();
        let index_path = dir.path().join("pack-broken.idx");
        std::fs::write(&index_path, b"garbage").unwrap();

        let pack = Pack::new(&index_path);
        assert!(pack.files().is_none());
        assert!(pack.offset(&ObjectId::from_bytes([1u8; 20])).unwrap().is_none());
    }

    #[test]
    fn test_count_mismatch_rejected() {
        let mut one = PackWriter::new();
        one.add_object(&Object::blob(b"a".to_vec())).unwrap();
        let one = one.finish().unwrap();

        let mut two = PackWriter::new();
        two.add_object(&Object::blob(b"a".to_vec())).unwrap();
        two.add_object(&Object::blob(b"b".to_vec())).unwrap();
        let two = two.finish().unwrap();

        assert!(OpenPack::from_bytes(one.index, two.pack).is_err());
    }
}
