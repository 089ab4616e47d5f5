//! Git object storage for Tessera.
//!
//! Content-addressed storage for git objects: the object model and its
//! canonical form, loose objects, pack files with their index and delta
//! chains, and reference sources.
//!
//! Lookups never treat a missing object as an error; they return
//! `Ok(None)`. Malformed data fails with a [`StorageError`] describing what
//! was wrong and where.

pub mod delta;
mod error;
pub mod loose;
pub mod object;
pub mod pack;
pub mod refs;
pub mod repo;
pub mod store;
pub mod varint;

pub use error::{Result, StorageError};
pub use loose::LooseStore;
pub use object::{
    Blob, Commit, FileMode, Object, ObjectId, ObjectKind, Signature, Tag, Time, Tree, TreeEntry,
};
pub use pack::{Pack, PackWriter};
pub use refs::{FsRefs, RefSource, RefStore, Reference};
pub use repo::Repository;
pub use store::ObjectStore;
