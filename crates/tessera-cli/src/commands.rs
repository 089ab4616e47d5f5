//! CLI command implementations.

use anyhow::{bail, Context, Result};
use std::io::{Read, Write};
use std::path::Path;
use tessera_git::{PackParser, PktLineReader, PktLineWriter, UploadPack, UploadPackOptions};
use tessera_storage::{FileMode, Object, ObjectId, ObjectKind, RefSource, Repository};

/// What `cat-file` prints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatMode {
    /// The object kind.
    Kind,
    /// The payload size.
    Size,
    /// The payload, with trees rendered as text.
    Pretty,
}

/// Initialize a new repository.
pub fn init(path: &Path, out: &mut impl Write) -> Result<()> {
    let existed = Repository::is_repo(path);
    let repo = Repository::init(path)
        .with_context(|| format!("cannot initialize {}", path.display()))?;
    let verb = if existed { "Reinitialized existing" } else { "Initialized empty" };
    writeln!(out, "{} repository in {}", verb, repo.path().display())?;
    Ok(())
}

/// Compute an object id, optionally storing the object.
pub fn hash_object(
    git_dir: &Path,
    kind: ObjectKind,
    input: &mut impl Read,
    write: bool,
    out: &mut impl Write,
) -> Result<ObjectId> {
    let mut payload = Vec::new();
    input.read_to_end(&mut payload)?;

    let id = if write {
        let repo = Repository::open(git_dir)?;
        // Parse first so malformed trees and commits are never stored.
        if kind != ObjectKind::Blob {
            Object::from_payload(kind, &payload)?;
        }
        repo.objects().put_raw(kind, &payload)?
    } else {
        tessera_storage::object::hash_object(kind, &payload)
    };

    writeln!(out, "{}", id)?;
    Ok(id)
}

/// Resolve a full hex id or a ref name.
fn resolve(repo: &Repository, name: &str) -> Result<ObjectId> {
    if let Ok(id) = ObjectId::from_hex(name) {
        return Ok(id);
    }
    for candidate in [
        name.to_string(),
        format!("refs/{}", name),
        format!("refs/tags/{}", name),
        format!("refs/heads/{}", name),
    ] {
        if let Ok(id) = repo.refs().resolve(&candidate) {
            return Ok(id);
        }
    }
    bail!("not a valid object name: {}", name)
}

/// Print an object's kind, size or content.
pub fn cat_file(git_dir: &Path, name: &str, mode: CatMode, out: &mut impl Write) -> Result<()> {
    let repo = Repository::open(git_dir)?;
    let id = resolve(&repo, name)?;
    let Some((kind, payload)) = repo.objects().get_raw(&id)? else {
        bail!("object {} not found", id);
    };

    match mode {
        CatMode::Kind => writeln!(out, "{}", kind)?,
        CatMode::Size => writeln!(out, "{}", payload.len())?,
        CatMode::Pretty => match Object::from_payload(kind, &payload)? {
            Object::Tree(tree) => {
                for entry in tree.entries() {
                    let child = match entry.mode {
                        FileMode::Tree => ObjectKind::Tree,
                        FileMode::Gitlink => ObjectKind::Commit,
                        _ => ObjectKind::Blob,
                    };
                    writeln!(
                        out,
                        "{:0>6} {} {}\t{}",
                        entry.mode.as_str(),
                        child,
                        entry.id,
                        entry.name
                    )?;
                }
            }
            _ => out.write_all(&payload)?,
        },
    }
    Ok(())
}

/// List refs as `<id> <name>`.
pub fn show_ref(git_dir: &Path, out: &mut impl Write) -> Result<usize> {
    let repo = Repository::open(git_dir)?;
    let refs = repo.refs().all_refs()?;
    let mut shown = 0;
    for (name, id) in refs.iter().filter(|(name, _)| name.starts_with("refs/")) {
        writeln!(out, "{} {}", id, name)?;
        shown += 1;
    }
    Ok(shown)
}

/// Serve one upload-pack session.
///
/// `advertise_refs` only writes the advertisement. `stateless_rpc` skips it
/// and negotiates straight away, for the second request of smart HTTP.
pub fn upload_pack(
    git_dir: &Path,
    options: UploadPackOptions,
    advertise_refs: bool,
    stateless_rpc: bool,
    input: impl Read,
    output: impl Write,
) -> Result<()> {
    let repo = Repository::open(git_dir)?;
    let mut reader = PktLineReader::new(input);
    let mut writer = PktLineWriter::new(output);
    let mut session = UploadPack::new(repo.objects(), options);

    if stateless_rpc {
        session.skip_advertisement()?;
    } else {
        session.advertise_refs(repo.refs(), &mut writer, None)?;
        if advertise_refs {
            return Ok(());
        }
    }
    session.negotiate(&mut reader, &mut writer)?;
    tracing::info!(
        wants = session.wants().len(),
        haves = session.haves().len(),
        "Upload-pack finished"
    );
    Ok(())
}

/// Store every object of a pack read from `input` as a loose object.
pub fn unpack_objects(git_dir: &Path, input: &mut impl Read, out: &mut impl Write) -> Result<usize> {
    let repo = Repository::open(git_dir)?;
    let mut pack = Vec::new();
    input.read_to_end(&mut pack)?;

    let ids = PackParser::new(&pack)
        .with_base_store(repo.objects())
        .unpack(repo.objects())
        .context("cannot unpack objects")?;
    writeln!(out, "Unpacked {} objects", ids.len())?;
    Ok(ids.len())
}
