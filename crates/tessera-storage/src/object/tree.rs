//! Tree objects.

use super::ObjectId;
use crate::{Result, StorageError};
use bstr::{BString, ByteSlice};
use std::cmp::Ordering;

/// Entry modes git records in trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileMode {
    /// Regular file (`100644`).
    Regular,
    /// Executable file (`100755`).
    Executable,
    /// Symbolic link (`120000`).
    Symlink,
    /// Subdirectory (`40000`).
    Tree,
    /// Submodule commit (`160000`).
    Gitlink,
}

impl FileMode {
    /// Returns the octal string written into tree payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Regular => "100644",
            Self::Executable => "100755",
            Self::Symlink => "120000",
            Self::Tree => "40000",
            Self::Gitlink => "160000",
        }
    }

    /// Parses the octal mode string of a tree entry.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "100644" => Ok(Self::Regular),
            "100755" => Ok(Self::Executable),
            "120000" => Ok(Self::Symlink),
            "40000" => Ok(Self::Tree),
            "160000" => Ok(Self::Gitlink),
            _ => Err(StorageError::InvalidObject(format!("unknown file mode: {}", s))),
        }
    }

    /// Returns true for subdirectories.
    pub fn is_tree(&self) -> bool {
        matches!(self, Self::Tree)
    }
}

/// One named child of a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// Entry mode.
    pub mode: FileMode,
    /// File or directory name (a single path component). Any bytes but `/`
    /// and NUL.
    pub name: BString,
    /// Identifier of the child object.
    pub id: ObjectId,
}

impl TreeEntry {
    /// Creates a new tree entry.
    pub fn new(mode: FileMode, name: impl Into<BString>, id: ObjectId) -> Self {
        Self {
            mode,
            name: name.into(),
            id,
        }
    }

    /// Git's canonical entry order: bytewise on names, where a subtree's name
    /// compares as if it ended in `/`.
    fn canonical_cmp(&self, other: &Self) -> Ordering {
        let a = self.name.as_slice();
        let b = other.name.as_slice();
        let common = a.len().min(b.len());
        match a[..common].cmp(&b[..common]) {
            Ordering::Equal => {}
            unequal => return unequal,
        }
        let tail = |name: &[u8], entry: &TreeEntry| {
            name.get(common)
                .copied()
                .or(entry.mode.is_tree().then_some(b'/'))
        };
        tail(a, self).cmp(&tail(b, other))
    }
}

/// A directory listing: entries kept in canonical order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tree {
    entries: Vec<TreeEntry>,
}

impl Tree {
    /// Builds a tree, sorting entries into canonical order.
    ///
    /// Fails on empty names, names containing `/` or NUL, and duplicates.
    pub fn new(mut entries: Vec<TreeEntry>) -> Result<Self> {
        for entry in &entries {
            validate_name(&entry.name)?;
        }
        entries.sort_by(TreeEntry::canonical_cmp);
        if let Some(dup) = entries.windows(2).find(|w| w[0].name == w[1].name) {
            return Err(StorageError::InvalidObject(format!(
                "duplicate tree entry: {}",
                dup[0].name
            )));
        }
        Ok(Self { entries })
    }

    /// Returns the entries in canonical order.
    pub fn entries(&self) -> &[TreeEntry] {
        &self.entries
    }

    /// Looks up an entry by name.
    pub fn get(&self, name: impl AsRef<[u8]>) -> Option<&TreeEntry> {
        let name = name.as_ref();
        self.entries.iter().find(|e| e.name.as_slice() == name)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the tree has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serializes the payload: `"<mode> <name>\0<20-byte id>"` per entry.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.entries.len() * 40);
        for entry in &self.entries {
            out.extend_from_slice(entry.mode.as_str().as_bytes());
            out.push(b' ');
            out.extend_from_slice(&entry.name);
            out.push(0);
            out.extend_from_slice(entry.id.as_bytes());
        }
        out
    }

    /// Parses a tree payload, rejecting entries that are out of order.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut entries: Vec<TreeEntry> = Vec::new();
        let mut rest = payload;

        while !rest.is_empty() {
            let space = rest
                .iter()
                .position(|&b| b == b' ')
                .ok_or_else(|| StorageError::InvalidObject("tree entry missing mode".to_string()))?;
            let mode = std::str::from_utf8(&rest[..space])
                .map_err(|_| StorageError::InvalidObject("tree mode is not utf-8".to_string()))?;
            let mode = FileMode::parse(mode)?;
            rest = &rest[space + 1..];

            let nul = rest
                .iter()
                .position(|&b| b == 0)
                .ok_or_else(|| StorageError::InvalidObject("tree entry missing name".to_string()))?;
            let name = &rest[..nul];
            validate_name(name)?;
            rest = &rest[nul + 1..];

            if rest.len() < ObjectId::LEN {
                return Err(StorageError::InvalidObject(
                    "truncated tree entry id".to_string(),
                ));
            }
            let id = ObjectId::from_slice(&rest[..ObjectId::LEN])?;
            rest = &rest[ObjectId::LEN..];

            let entry = TreeEntry::new(mode, name, id);
            if let Some(prev) = entries.last() {
                if prev.canonical_cmp(&entry) != Ordering::Less || prev.name == entry.name {
                    return Err(StorageError::InvalidObject(format!(
                        "tree entries out of order at {}",
                        entry.name
                    )));
                }
            }
            entries.push(entry);
        }

        Ok(Self { entries })
    }
}

fn validate_name(name: &[u8]) -> Result<()> {
    if name.is_empty() || name.find_byteset(b"/\0").is_some() {
        return Err(StorageError::InvalidObject(format!(
            "invalid tree entry name: {:?}",
            name.as_bstr()
        )));
    }
    Ok(())
}
