//! Object store facade over loose objects and packs.

use crate::loose::LooseStore;
use crate::pack::Pack;
use crate::{Object, ObjectId, ObjectKind, Result};
use once_cell::sync::OnceCell;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Content-addressed object store.
///
/// Lookups check loose objects first, then every pack under `pack/` in
/// file-name order. The pack list is discovered on first lookup and kept
/// for the lifetime of the store; packs added afterwards are not seen.
/// New objects are always written loose.
#[derive(Debug)]
pub struct ObjectStore {
    loose: LooseStore,
    pack_dir: PathBuf,
    packs: OnceCell<Vec<Pack>>,
}

impl ObjectStore {
    /// Opens the store rooted at an `objects` directory.
    pub fn new(objects_dir: impl Into<PathBuf>) -> Self {
        let objects_dir = objects_dir.into();
        Self {
            pack_dir: objects_dir.join("pack"),
            loose: LooseStore::new(objects_dir),
            packs: OnceCell::new(),
        }
    }

    /// The objects directory.
    pub fn root(&self) -> &Path {
        self.loose.root()
    }

    /// Loose object storage.
    pub fn loose(&self) -> &LooseStore {
        &self.loose
    }

    /// Packs known to this store, discovered on first call.
    pub fn packs(&self) -> &[Pack] {
        self.packs.get_or_init(|| discover_packs(&self.pack_dir))
    }

    /// Reads an object as kind and payload. `Ok(None)` means no loose file
    /// and no pack holds it.
    pub fn get_raw(&self, id: &ObjectId) -> Result<Option<(ObjectKind, Vec<u8>)>> {
        if let Some(found) = self.loose.read(id)? {
            return Ok(Some(found));
        }
        for pack in self.packs() {
            if let Some(found) = pack.read(id)? {
                tracing::trace!(id = %id, pack = %pack.index_path().display(), "Found packed object");
                return Ok(Some(found));
            }
        }
        tracing::trace!(id = %id, "Object not found");
        Ok(None)
    }

    /// Reads and parses an object.
    pub fn get(&self, id: &ObjectId) -> Result<Option<Object>> {
        match self.get_raw(id)? {
            Some((kind, payload)) => Object::from_payload(kind, &payload).map(Some),
            None => Ok(None),
        }
    }

    /// Checks whether the object is stored, without inflating it.
    pub fn contains(&self, id: &ObjectId) -> Result<bool> {
        if self.loose.contains(id) {
            return Ok(true);
        }
        for pack in self.packs() {
            if pack.offset(id)?.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Writes an object as a loose file and returns its id.
    pub fn put(&self, object: &Object) -> Result<ObjectId> {
        self.put_raw(object.kind(), &object.payload())
    }

    /// Writes a kind and payload as a loose file and returns its id.
    pub fn put_raw(&self, kind: ObjectKind, payload: &[u8]) -> Result<ObjectId> {
        self.loose.write(kind, payload)
    }
}

fn discover_packs(dir: &Path) -> Vec<Pack> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::debug!(path = %dir.display(), "No pack directory");
            return Vec::new();
        }
        Err(e) => {
            tracing::warn!(path = %dir.display(), error = %e, "Cannot list pack directory");
            return Vec::new();
        }
    };

    let mut index_paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "idx"))
        .collect();
    index_paths.sort();

    tracing::debug!(path = %dir.display(), count = index_paths.len(), "Discovered packs");
    index_paths.into_iter().map(Pack::new).collect()
}
