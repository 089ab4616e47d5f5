//! Loose objects: one zlib-compressed canonical form per file.
//!
//! An object with id `ab12...` lives at `<objects>/ab/12...`.

use crate::object::{canonical, hash_object, split_canonical};
use crate::{ObjectId, ObjectKind, Result, StorageError};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

/// Loose objects under an objects directory.
#[derive(Debug, Clone)]
pub struct LooseStore {
    root: PathBuf,
}

impl LooseStore {
    /// Uses `root` as the objects directory. Nothing is created until the
    /// first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The objects directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file that holds `id`.
    pub fn path(&self, id: &ObjectId) -> PathBuf {
        let (dir, file) = id.loose_path_parts();
        self.root.join(dir).join(file)
    }

    /// Checks whether a loose file exists for `id`.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.path(id).is_file()
    }

    /// Reads the inflated canonical form of `id`.
    fn read_canonical(&self, id: &ObjectId) -> Result<Option<Vec<u8>>> {
        let compressed = match std::fs::read(self.path(id)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut decoder = ZlibDecoder::new(compressed.as_slice());
        let mut canonical = Vec::new();
        decoder.read_to_end(&mut canonical).map_err(|e| {
            StorageError::InvalidObject(format!("loose object {}: {}", id, e))
        })?;
        Ok(Some(canonical))
    }

    /// Reads `id` as kind and payload. A missing file is `Ok(None)`; a file
    /// that does not inflate or parse is an error.
    pub fn read(&self, id: &ObjectId) -> Result<Option<(ObjectKind, Vec<u8>)>> {
        let Some(canonical) = self.read_canonical(id)? else {
            tracing::trace!(id = %id, "Loose object not present");
            return Ok(None);
        };
        let (kind, payload) = split_canonical(&canonical)?;
        Ok(Some((kind, payload.to_vec())))
    }

    /// Writes an object and returns its id.
    ///
    /// Writing an object that is already present with the same bytes is a
    /// no-op. A file at the same path holding different bytes fails with
    /// [`StorageError::ObjectConflict`] and is left untouched.
    pub fn write(&self, kind: ObjectKind, payload: &[u8]) -> Result<ObjectId> {
        let id = hash_object(kind, payload);
        let content = canonical(kind, payload);
        let path = self.path(&id);

        if let Some(existing) = self.read_canonical(&id).or_else(|e| match e {
            // Undecodable contents still count as a conflicting file.
            StorageError::InvalidObject(_) => Ok(Some(Vec::new())),
            other => Err(other),
        })? {
            if existing == content {
                tracing::trace!(id = %id, "Loose object already stored");
                return Ok(id);
            }
            return Err(StorageError::ObjectConflict(format!(
                "{} already holds different content",
                path.display()
            )));
        }

        let dir = path
            .parent()
            .ok_or_else(|| StorageError::InvalidObject(format!("no parent for {}", path.display())))?;
        std::fs::create_dir_all(dir)?;

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&content)?;
        let compressed = encoder.finish()?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&compressed)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;

        tracing::debug!(id = %id, kind = %kind, size = payload.len(), "Wrote loose object");
        Ok(id)
    }
}
