//! Git object model and canonical serialization.
//!
//! Every object is identified by the SHA-1 of its canonical form,
//! `"<kind> <payload-length>\0<payload>"`. The kind vocabulary used in that
//! header is owned by [`ObjectKind`]; the pack format's 3-bit type codes are
//! translated to the same enum in [`crate::pack`].

mod commit;
mod id;
mod tag;
mod tree;

pub use commit::{Commit, Signature, Time, MAX_OFFSET_MINUTES};
pub use id::ObjectId;
pub use tag::Tag;
pub use tree::{FileMode, Tree, TreeEntry};

use crate::{Result, StorageError};
use bytes::Bytes;
use sha1::{Digest, Sha1};

/// Git object kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// File content.
    Blob,
    /// Directory listing.
    Tree,
    /// Commit object.
    Commit,
    /// Annotated tag.
    Tag,
}

impl ObjectKind {
    /// Returns the string representation used in git.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blob => "blob",
            Self::Tree => "tree",
            Self::Commit => "commit",
            Self::Tag => "tag",
        }
    }

    /// Parses an object kind from its canonical-header name.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "blob" => Ok(Self::Blob),
            "tree" => Ok(Self::Tree),
            "commit" => Ok(Self::Commit),
            "tag" => Ok(Self::Tag),
            _ => Err(StorageError::InvalidObject(format!(
                "unknown object type: {}",
                s
            ))),
        }
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque file content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    /// Raw bytes.
    pub data: Bytes,
}

impl Blob {
    /// Creates a blob from raw content.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

/// A parsed git object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Object {
    /// File content.
    Blob(Blob),
    /// Directory listing.
    Tree(Tree),
    /// Commit.
    Commit(Commit),
    /// Annotated tag.
    Tag(Tag),
}

impl Object {
    /// Shorthand for a blob object.
    pub fn blob(data: impl Into<Bytes>) -> Self {
        Self::Blob(Blob::new(data))
    }

    /// Returns the kind of this object.
    pub fn kind(&self) -> ObjectKind {
        match self {
            Self::Blob(_) => ObjectKind::Blob,
            Self::Tree(_) => ObjectKind::Tree,
            Self::Commit(_) => ObjectKind::Commit,
            Self::Tag(_) => ObjectKind::Tag,
        }
    }

    /// Serializes the variant-specific payload (everything after the NUL).
    pub fn payload(&self) -> Vec<u8> {
        match self {
            Self::Blob(blob) => blob.data.to_vec(),
            Self::Tree(tree) => tree.encode(),
            Self::Commit(commit) => commit.encode(),
            Self::Tag(tag) => tag.encode(),
        }
    }

    /// Returns the full canonical serialization.
    pub fn canonical(&self) -> Vec<u8> {
        canonical(self.kind(), &self.payload())
    }

    /// Computes the object's identifier.
    pub fn id(&self) -> ObjectId {
        hash_object(self.kind(), &self.payload())
    }

    /// Parses a payload of a known kind into the matching variant.
    pub fn from_payload(kind: ObjectKind, payload: &[u8]) -> Result<Self> {
        Ok(match kind {
            ObjectKind::Blob => Self::Blob(Blob::new(Bytes::copy_from_slice(payload))),
            ObjectKind::Tree => Self::Tree(Tree::parse(payload)?),
            ObjectKind::Commit => Self::Commit(Commit::parse(payload)?),
            ObjectKind::Tag => Self::Tag(Tag::parse(payload)?),
        })
    }

    /// Parses a full canonical serialization.
    pub fn parse(canonical: &[u8]) -> Result<Self> {
        let (kind, payload) = split_canonical(canonical)?;
        Self::from_payload(kind, payload)
    }

    /// Returns the blob content, if this is a blob.
    pub fn as_blob(&self) -> Option<&Blob> {
        match self {
            Self::Blob(blob) => Some(blob),
            _ => None,
        }
    }

    /// Returns the tree, if this is a tree.
    pub fn as_tree(&self) -> Option<&Tree> {
        match self {
            Self::Tree(tree) => Some(tree),
            _ => None,
        }
    }

    /// Returns the commit, if this is a commit.
    pub fn as_commit(&self) -> Option<&Commit> {
        match self {
            Self::Commit(commit) => Some(commit),
            _ => None,
        }
    }
}

/// Builds `"<kind> <len>\0<payload>"`.
pub fn canonical(kind: ObjectKind, payload: &[u8]) -> Vec<u8> {
    let header = format!("{} {}\0", kind.as_str(), payload.len());
    let mut out = Vec::with_capacity(header.len() + payload.len());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(payload);
    out
}

/// Computes the SHA-1 of a payload with its canonical header.
pub fn hash_object(kind: ObjectKind, payload: &[u8]) -> ObjectId {
    let header = format!("{} {}\0", kind.as_str(), payload.len());
    let mut hasher = Sha1::new();
    hasher.update(header.as_bytes());
    hasher.update(payload);
    ObjectId::from_bytes(hasher.finalize().into())
}

/// Splits a canonical serialization into its kind and payload, validating
/// that the declared length matches.
pub fn split_canonical(canonical: &[u8]) -> Result<(ObjectKind, &[u8])> {
    let nul = canonical
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| StorageError::InvalidObject("missing null byte in header".to_string()))?;

    let header = std::str::from_utf8(&canonical[..nul])
        .map_err(|_| StorageError::InvalidObject("header is not utf-8".to_string()))?;
    let (kind, size) = header
        .split_once(' ')
        .ok_or_else(|| StorageError::InvalidObject(format!("invalid header: {}", header)))?;

    let kind = ObjectKind::parse(kind)?;
    if size.is_empty() || !size.bytes().all(|b| b.is_ascii_digit()) {
        return Err(StorageError::InvalidObject(format!("invalid size: {}", size)));
    }
    let size: usize = size
        .parse()
        .map_err(|_| StorageError::InvalidObject(format!("invalid size: {}", size)))?;

    let payload = &canonical[nul + 1..];
    if payload.len() != size {
        return Err(StorageError::InvalidObject(format!(
            "size mismatch: header says {}, payload is {}",
            size,
            payload.len()
        )));
    }
    Ok((kind, payload))
}
