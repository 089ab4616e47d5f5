//! Object reachability.
//!
//! Commits lead to their tree and parents, trees to their entries, tags to
//! their target. Gitlink entries name commits in another repository and are
//! not followed.

use crate::{GitError, Result};
use std::collections::{HashSet, VecDeque};
use tessera_storage::{FileMode, Object, ObjectId, ObjectKind, ObjectStore, StorageError};

/// What to do when a walk reaches an object the store does not hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Missing {
    Fail,
    Skip,
}

/// Collects the ids an object points to. Blobs point nowhere.
fn children(object: &Object, out: &mut Vec<(ObjectId, Option<ObjectKind>)>) {
    match object {
        Object::Blob(_) => {}
        Object::Tree(tree) => {
            for entry in tree.entries() {
                match entry.mode {
                    FileMode::Tree => out.push((entry.id, Some(ObjectKind::Tree))),
                    FileMode::Gitlink => {}
                    _ => out.push((entry.id, Some(ObjectKind::Blob))),
                }
            }
        }
        Object::Commit(commit) => {
            out.push((commit.tree, Some(ObjectKind::Tree)));
            for parent in &commit.parents {
                out.push((*parent, Some(ObjectKind::Commit)));
            }
        }
        Object::Tag(tag) => out.push((tag.target, Some(tag.target_kind))),
    }
}

/// Breadth-first walk from `roots`, never entering ids in `stop`. Returns
/// visited ids in discovery order.
fn walk(
    store: &ObjectStore,
    roots: &[ObjectId],
    stop: &HashSet<ObjectId>,
    missing: Missing,
) -> Result<Vec<ObjectId>> {
    let mut seen: HashSet<ObjectId> = HashSet::new();
    let mut order = Vec::new();
    let mut queue: VecDeque<(ObjectId, Option<ObjectKind>)> =
        roots.iter().map(|id| (*id, None)).collect();
    let mut next = Vec::new();

    while let Some((id, expected)) = queue.pop_front() {
        if stop.contains(&id) || !seen.insert(id) {
            continue;
        }

        // Blobs have no children, so they only need to exist.
        if expected == Some(ObjectKind::Blob) {
            if store.contains(&id)? {
                order.push(id);
            } else if missing == Missing::Fail {
                return Err(GitError::ObjectNotFound(id.to_hex()));
            }
            continue;
        }

        let Some(object) = store.get(&id)? else {
            if missing == Missing::Fail {
                return Err(GitError::ObjectNotFound(id.to_hex()));
            }
            tracing::trace!(id = %id, "Skipping object missing from store");
            continue;
        };
        if let Some(kind) = expected {
            if object.kind() != kind {
                return Err(StorageError::InvalidObject(format!(
                    "{} is a {}, expected a {}",
                    id,
                    object.kind(),
                    kind
                ))
                .into());
            }
        }

        order.push(id);
        next.clear();
        children(&object, &mut next);
        queue.extend(next.drain(..));
    }

    Ok(order)
}

/// Every object reachable from `roots`. Fails with
/// [`GitError::ObjectNotFound`] if any of them is missing.
pub fn reachable(store: &ObjectStore, roots: &[ObjectId]) -> Result<Vec<ObjectId>> {
    walk(store, roots, &HashSet::new(), Missing::Fail)
}

/// Objects reachable from `wants` that are not reachable from `haves`.
///
/// Haves come from the client and may name objects this store has never
/// seen; those are ignored.
pub fn objects_to_send(
    store: &ObjectStore,
    wants: &[ObjectId],
    haves: &[ObjectId],
) -> Result<Vec<ObjectId>> {
    let common: HashSet<ObjectId> = walk(store, haves, &HashSet::new(), Missing::Skip)?
        .into_iter()
        .collect();
    let objects = walk(store, wants, &common, Missing::Fail)?;
    tracing::debug!(
        wants = wants.len(),
        haves = haves.len(),
        excluded = common.len(),
        objects = objects.len(),
        "Computed objects to send"
    );
    Ok(objects)
}
