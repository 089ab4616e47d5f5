//! On-disk repository layout.

use crate::refs::FsRefs;
use crate::store::ObjectStore;
use crate::{Result, StorageError};
use std::path::{Path, PathBuf};

/// Branch `HEAD` points at in a new repository.
pub const DEFAULT_BRANCH: &str = "refs/heads/master";

/// A repository directory (bare, or the `.git` directory of a work tree).
#[derive(Debug)]
pub struct Repository {
    path: PathBuf,
    objects: ObjectStore,
    refs: FsRefs,
}

impl Repository {
    /// Returns true if `path` has a well-formed `HEAD` plus `objects/` and
    /// `refs/` directories.
    pub fn is_repo(path: &Path) -> bool {
        let Ok(head) = std::fs::read_to_string(path.join("HEAD")) else {
            return false;
        };
        let head = head.trim();
        let head_ok = head.starts_with("ref: ")
            || (head.len() == 40 && head.bytes().all(|b| b.is_ascii_hexdigit()));
        head_ok && path.join("objects").is_dir() && path.join("refs").is_dir()
    }

    /// Opens an existing repository.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !Self::is_repo(&path) {
            return Err(StorageError::NotARepository(path.display().to_string()));
        }
        tracing::debug!(path = %path.display(), "Opened repository");
        Ok(Self {
            objects: ObjectStore::new(path.join("objects")),
            refs: FsRefs::new(&path),
            path,
        })
    }

    /// Creates the directory layout and `HEAD`, or opens the repository
    /// already at `path`.
    pub fn init(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if Self::is_repo(&path) {
            return Self::open(path);
        }

        for dir in ["objects/pack", "objects/info", "refs/heads", "refs/tags"] {
            std::fs::create_dir_all(path.join(dir))?;
        }
        std::fs::write(path.join("HEAD"), format!("ref: {}\n", DEFAULT_BRANCH))?;
        tracing::info!(path = %path.display(), "Initialized empty repository");
        Self::open(path)
    }

    /// The repository directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The object store.
    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    /// The refs.
    pub fn refs(&self) -> &FsRefs {
        &self.refs
    }
}
