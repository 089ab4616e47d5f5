//! Git reference management.
//!
//! [`RefSource`] is what the negotiation layer consumes: name resolution and
//! a listing of every ref. [`RefStore`] keeps refs in memory; [`FsRefs`]
//! reads them from a repository directory.

use crate::{ObjectId, Result, StorageError};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Longest chain of symbolic refs followed before giving up.
pub const MAX_SYMREF_DEPTH: usize = 5;

/// A git reference (branch, tag, or symbolic ref).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// Direct reference to an object.
    Direct(ObjectId),
    /// Symbolic reference (e.g., HEAD -> refs/heads/main).
    Symbolic(String),
}

impl Reference {
    /// Parses the contents of a loose ref file.
    pub fn parse(content: &str) -> Result<Self> {
        let content = content.trim();
        if let Some(target) = content.strip_prefix("ref: ") {
            return Ok(Self::Symbolic(target.trim().to_string()));
        }
        ObjectId::from_hex(content)
            .map(Self::Direct)
            .map_err(|_| StorageError::InvalidRef(format!("bad ref contents: {:?}", content)))
    }
}

/// Resolves ref names to object ids.
pub trait RefSource {
    /// Looks up a single ref without following it.
    fn lookup(&self, name: &str) -> Result<Option<Reference>>;

    /// Every ref that resolves to an object, keyed by name. `HEAD` is
    /// included when it resolves.
    fn all_refs(&self) -> Result<BTreeMap<String, ObjectId>>;

    /// Resolves `name`, following symbolic refs up to [`MAX_SYMREF_DEPTH`].
    fn resolve(&self, name: &str) -> Result<ObjectId> {
        let mut current = name.to_string();
        for _ in 0..=MAX_SYMREF_DEPTH {
            match self.lookup(&current)? {
                Some(Reference::Direct(id)) => return Ok(id),
                Some(Reference::Symbolic(target)) => current = target,
                None => return Err(StorageError::RefNotFound(current)),
            }
        }
        Err(StorageError::InvalidRef(format!(
            "{}: symbolic refs nested deeper than {}",
            name, MAX_SYMREF_DEPTH
        )))
    }
}

/// Resolves `name`, treating a missing or dangling ref as absent.
fn resolve_optional(source: &impl RefSource, name: &str) -> Result<Option<ObjectId>> {
    match source.resolve(name) {
        Ok(id) => Ok(Some(id)),
        Err(StorageError::RefNotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Thread-safe in-memory reference store.
#[derive(Debug, Default)]
pub struct RefStore {
    refs: RwLock<HashMap<String, Reference>>,
}

impl RefStore {
    /// Creates a new empty reference store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a reference to point to an object.
    pub fn set(&self, name: &str, target: ObjectId) {
        self.refs
            .write()
            .insert(name.to_string(), Reference::Direct(target));
    }

    /// Sets a symbolic reference.
    pub fn set_symbolic(&self, name: &str, target: &str) {
        self.refs
            .write()
            .insert(name.to_string(), Reference::Symbolic(target.to_string()));
    }
}

impl RefSource for RefStore {
    fn lookup(&self, name: &str) -> Result<Option<Reference>> {
        Ok(self.refs.read().get(name).cloned())
    }

    fn all_refs(&self) -> Result<BTreeMap<String, ObjectId>> {
        let names: Vec<String> = self.refs.read().keys().cloned().collect();
        let mut out = BTreeMap::new();
        for name in names {
            if let Some(id) = resolve_optional(self, &name)? {
                out.insert(name, id);
            }
        }
        Ok(out)
    }
}

/// Refs stored in a repository directory: `HEAD`, loose files under `refs/`
/// and the `packed-refs` file. Loose refs shadow packed ones.
#[derive(Debug, Clone)]
pub struct FsRefs {
    git_dir: PathBuf,
}

impl FsRefs {
    /// Reads refs from the repository at `git_dir`.
    pub fn new(git_dir: impl Into<PathBuf>) -> Self {
        Self {
            git_dir: git_dir.into(),
        }
    }

    fn ref_path(&self, name: &str) -> Result<PathBuf> {
        validate_ref_name(name)?;
        Ok(self.git_dir.join(name))
    }

    fn read_loose(&self, name: &str) -> Result<Option<Reference>> {
        let path = self.ref_path(name)?;
        match std::fs::read_to_string(&path) {
            Ok(content) => Reference::parse(&content).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound || path.is_dir() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Parses `packed-refs`. Comment lines and peeled (`^`) lines are skipped.
    pub fn packed_refs(&self) -> Result<BTreeMap<String, ObjectId>> {
        let content = match std::fs::read_to_string(self.git_dir.join("packed-refs")) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };

        let mut refs = BTreeMap::new();
        for line in content.lines() {
            if line.is_empty() || line.starts_with('#') || line.starts_with('^') {
                continue;
            }
            let (hex, name) = line
                .split_once(' ')
                .ok_or_else(|| StorageError::InvalidRef(format!("bad packed-refs line: {}", line)))?;
            let id = ObjectId::from_hex(hex)
                .map_err(|_| StorageError::InvalidRef(format!("bad packed-refs line: {}", line)))?;
            refs.insert(name.to_string(), id);
        }
        Ok(refs)
    }

    fn loose_names(&self, dir: &Path, prefix: &str, out: &mut Vec<String>) -> Result<()> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let Some(file_name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let name = format!("{}/{}", prefix, file_name);
            if entry.file_type()?.is_dir() {
                self.loose_names(&entry.path(), &name, out)?;
            } else if !file_name.ends_with(".lock") {
                out.push(name);
            }
        }
        Ok(())
    }
}

impl RefSource for FsRefs {
    fn lookup(&self, name: &str) -> Result<Option<Reference>> {
        if let Some(reference) = self.read_loose(name)? {
            return Ok(Some(reference));
        }
        Ok(self.packed_refs()?.remove(name).map(Reference::Direct))
    }

    fn all_refs(&self) -> Result<BTreeMap<String, ObjectId>> {
        let mut refs = self.packed_refs()?;

        let mut names = Vec::new();
        self.loose_names(&self.git_dir.join("refs"), "refs", &mut names)?;
        for name in names {
            match resolve_optional(self, &name)? {
                Some(id) => {
                    refs.insert(name, id);
                }
                None => tracing::debug!(name = %name, "Skipping dangling ref"),
            }
        }

        if let Some(head) = resolve_optional(self, "HEAD")? {
            refs.insert("HEAD".to_string(), head);
        }
        Ok(refs)
    }
}

/// Rejects names that would escape the repository directory.
fn validate_ref_name(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name.starts_with('/')
        || name.contains('\0')
        || name.contains('\\')
        || name.split('/').any(|part| part.is_empty() || part == "." || part == "..");
    if bad {
        return Err(StorageError::InvalidRef(format!("bad ref name: {:?}", name)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_ref_store_basic() {
        let store = RefStore::new();
        let id = ObjectId::from_hex("a94a8fe5ccb19ba61c4c0873d391e987982fbbd3").unwrap();

        store.set("refs/heads/main", id);
        store.set_symbolic("HEAD", "refs/heads/main");

        assert_eq!(
            store.lookup("HEAD").unwrap(),
            Some(Reference::Symbolic("refs/heads/main".to_string()))
        );
        assert_eq!(store.resolve("HEAD").unwrap(), id);
        assert_eq!(store.lookup("refs/heads/other").unwrap(), None);
    }

    #[test]
    fn test_resolve_dangling_symbolic() {
        let store = RefStore::new();
        store.set_symbolic("HEAD", "refs/heads/nonexistent");
        assert!(matches!(
            store.resolve("HEAD"),
            Err(StorageError::RefNotFound(name)) if name == "refs/heads/nonexistent"
        ));
        assert!(store.all_refs().unwrap().is_empty());
    }

    #[test]
    fn test_symref_chain_and_cycle() {
        let store = RefStore::new();
        let id = ObjectId::from_bytes([3u8; 20]);
        store.set("refs/heads/main", id);
        store.set_symbolic("refs/heads/alias", "refs/heads/main");
        store.set_symbolic("HEAD", "refs/heads/alias");
        assert_eq!(store.resolve("HEAD").unwrap(), id);

        store.set_symbolic("refs/heads/a", "refs/heads/b");
        store.set_symbolic("refs/heads/b", "refs/heads/a");
        assert!(matches!(
            store.resolve("refs/heads/a"),
            Err(StorageError::InvalidRef(_))
        ));
    }

    #[test]
    fn test_all_refs_includes_head() {
        let store = RefStore::new();
        let id = ObjectId::from_bytes([1u8; 20]);
        store.set("refs/heads/main", id);
        store.set_symbolic("HEAD", "refs/heads/main");

        let refs = store.all_refs().unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs["HEAD"], id);
    }

    #[test]
    fn test_reference_parse() {
        assert_eq!(
            Reference::parse("ref: refs/heads/main\n").unwrap(),
            Reference::Symbolic("refs/heads/main".to_string())
        );
        let hex = "a94a8fe5ccb19ba61c4c0873d391e987982fbbd3";
        assert_eq!(
            Reference::parse(&format!("{}\n", hex)).unwrap(),
            Reference::Direct(ObjectId::from_hex(hex).unwrap())
        );
        assert!(Reference::parse("garbage").is_err());
    }

    fn fs_repo() -> (TempDir, FsRefs) {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("refs/heads")).unwrap();
        std::fs::create_dir_all(dir.path().join("refs/tags")).unwrap();
        std::fs::write(dir.path().join("HEAD"), "ref: refs/heads/master\n").unwrap();
        let refs = FsRefs::new(dir.path());
        (dir, refs)
    }

    #[test]
    fn test_fs_loose_and_head() {
        let (dir, refs) = fs_repo();
        let id = ObjectId::from_bytes([0xaa; 20]);
        std::fs::write(dir.path().join("refs/heads/master"), format!("{}\n", id)).unwrap();

        assert_eq!(refs.resolve("HEAD").unwrap(), id);
        let all = refs.all_refs().unwrap();
        assert_eq!(all.keys().collect::<Vec<_>>(), ["HEAD", "refs/heads/master"]);
    }

    #[test]
    fn test_fs_packed_refs_fallback() {
        let (dir, refs) = fs_repo();
        let packed = ObjectId::from_bytes([0x11; 20]);
        let loose = ObjectId::from_bytes([0x22; 20]);
        std::fs::write(
            dir.path().join("packed-refs"),
            format!(
                "# pack-refs with: peeled fully-peeled sorted\n{p} refs/heads/master\n{p} refs/tags/v1\n^{l}\n",
                p = packed,
                l = loose
            ),
        )
        .unwrap();

        assert_eq!(refs.resolve("HEAD").unwrap(), packed);
        assert_eq!(refs.resolve("refs/tags/v1").unwrap(), packed);

        // A loose ref shadows the packed one.
        std::fs::write(dir.path().join("refs/tags/v1"), format!("{}\n", loose)).unwrap();
        assert_eq!(refs.resolve("refs/tags/v1").unwrap(), loose);
        assert_eq!(refs.all_refs().unwrap()["refs/tags/v1"], loose);
    }

    #[test]
    fn test_fs_unborn_head() {
        let (_dir, refs) = fs_repo();
        assert!(matches!(
            refs.resolve("HEAD"),
            Err(StorageError::RefNotFound(_))
        ));
        assert!(refs.all_refs().unwrap().is_empty());
    }

    #[test]
    fn test_fs_rejects_escaping_names() {
        let (_dir, refs) = fs_repo();
        assert!(matches!(
            refs.resolve("../outside"),
            Err(StorageError::InvalidRef(_))
        ));
        assert!(refs.lookup("/etc/passwd").is_err());
    }
}
