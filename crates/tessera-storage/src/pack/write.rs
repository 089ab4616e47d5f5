//! Pack and index writer.

use super::data::{PACK_HEADER_SIZE, PACK_SIGNATURE, PACK_VERSION};
use super::index::{IDX_MAGIC, IDX_VERSION};
use super::RecordType;
use crate::object::hash_object;
use crate::varint;
use crate::{Object, ObjectId, ObjectKind, Result, StorageError};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use sha1::{Digest, Sha1};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Largest offset a v2 index can hold without the 64-bit table.
const MAX_OFFSET: u64 = 0x7fff_ffff;

#[derive(Debug)]
struct Entry {
    id: ObjectId,
    offset: u64,
    crc: u32,
}

/// Appends records to a pack in memory and produces the matching index.
#[derive(Debug)]
pub struct PackWriter {
    pack: Vec<u8>,
    entries: Vec<Entry>,
}

/// A finished pack and its index.
#[derive(Debug, Clone)]
pub struct WrittenPack {
    /// Pack bytes, trailer included.
    pub pack: Vec<u8>,
    /// Version 2 index bytes.
    pub index: Vec<u8>,
    /// SHA-1 trailer of the pack, which also names the files on disk.
    pub checksum: ObjectId,
}

impl PackWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        let mut pack = Vec::new();
        pack.extend_from_slice(PACK_SIGNATURE);
        pack.extend_from_slice(&PACK_VERSION.to_be_bytes());
        pack.extend_from_slice(&0u32.to_be_bytes());
        Self {
            pack,
            entries: Vec::new(),
        }
    }

    /// Number of records added so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no record has been added.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends a whole object. Returns its record offset.
    pub fn add_object(&mut self, object: &Object) -> Result<u64> {
        self.add_raw(object.kind(), &object.payload())
    }

    /// Appends a whole object given as kind and payload.
    pub fn add_raw(&mut self, kind: ObjectKind, payload: &[u8]) -> Result<u64> {
        let id = hash_object(kind, payload);
        let mut header = Vec::new();
        varint::write_object_header(&mut header, RecordType::Base(kind).code(), payload.len() as u64);
        self.push_record(id, header, payload)
    }

    /// Appends an offset-delta record for `id` whose base is the record at
    /// `base_offset`.
    pub fn add_ofs_delta(&mut self, id: ObjectId, base_offset: u64, patch: &[u8]) -> Result<u64> {
        let offset = self.pack.len() as u64;
        if base_offset < PACK_HEADER_SIZE as u64 || base_offset >= offset {
            return Err(StorageError::InvalidPack(format!(
                "delta base offset {} is not an earlier record",
                base_offset
            )));
        }
        let mut header = Vec::new();
        varint::write_object_header(&mut header, RecordType::OfsDelta.code(), patch.len() as u64);
        varint::write_ofs_distance(&mut header, offset - base_offset);
        self.push_record(id, header, patch)
    }

    /// Appends a digest-delta record for `id` against `base`.
    pub fn add_ref_delta(&mut self, id: ObjectId, base: ObjectId, patch: &[u8]) -> Result<u64> {
        let mut header = Vec::new();
        varint::write_object_header(&mut header, RecordType::RefDelta.code(), patch.len() as u64);
        header.extend_from_slice(base.as_bytes());
        self.push_record(id, header, patch)
    }

    fn push_record(&mut self, id: ObjectId, header: Vec<u8>, body: &[u8]) -> Result<u64> {
        let offset = self.pack.len() as u64;
        if offset > MAX_OFFSET {
            return Err(StorageError::UnsupportedPack(
                "pack exceeds 2 GiB of records".to_string(),
            ));
        }

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(body)?;
        let compressed = encoder.finish()?;

        let mut crc = crc32fast::Hasher::new();
        crc.update(&header);
        crc.update(&compressed);

        self.pack.extend_from_slice(&header);
        self.pack.extend_from_slice(&compressed);
        self.entries.push(Entry {
            id,
            offset,
            crc: crc.finalize(),
        });
        tracing::trace!(id = %id, offset, "Wrote pack record");
        Ok(offset)
    }

    /// Writes the object count and trailer and builds the index.
    pub fn finish(self) -> Result<WrittenPack> {
        let Self {
            mut pack,
            mut entries,
        } = self;

        let count = u32::try_from(entries.len())
            .map_err(|_| StorageError::UnsupportedPack("too many objects".to_string()))?;
        pack[8..PACK_HEADER_SIZE].copy_from_slice(&count.to_be_bytes());
        let checksum = Sha1::digest(&pack);
        pack.extend_from_slice(&checksum);
        let checksum = ObjectId::from_slice(&checksum)?;

        entries.sort_by(|a, b| a.id.cmp(&b.id));
        if let Some(pair) = entries.windows(2).find(|w| w[0].id == w[1].id) {
            return Err(StorageError::InvalidPack(format!(
                "object {} written twice",
                pair[0].id
            )));
        }

        let mut index = Vec::with_capacity(8 + 1024 + entries.len() * 28 + 40);
        index.extend_from_slice(&IDX_MAGIC);
        index.extend_from_slice(&IDX_VERSION.to_be_bytes());
        let mut fanout = [0u32; 256];
        for entry in &entries {
            fanout[usize::from(entry.id.first_byte())] += 1;
        }
        let mut total = 0u32;
        for bucket in fanout {
            total += bucket;
            index.extend_from_slice(&total.to_be_bytes());
        }
        for entry in &entries {
            index.extend_from_slice(entry.id.as_bytes());
        }
        for entry in &entries {
            index.extend_from_slice(&entry.crc.to_be_bytes());
        }
        for entry in &entries {
            // Offsets were bounded by MAX_OFFSET when the record was written.
            index.extend_from_slice(&(entry.offset as u32).to_be_bytes());
        }
        index.extend_from_slice(checksum.as_bytes());
        let index_checksum = Sha1::digest(&index);
        index.extend_from_slice(&index_checksum);

        tracing::debug!(objects = count, checksum = %checksum, "Finished pack");
        Ok(WrittenPack {
            pack,
            index,
            checksum,
        })
    }
}

impl Default for PackWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl WrittenPack {
    /// File stem shared by the pack and index, `pack-<checksum>`.
    pub fn file_stem(&self) -> String {
        format!("pack-{}", self.checksum)
    }

    /// Stores the pack as `<dir>/pack-<checksum>.pack` and `.idx`.
    /// The index is written last so a reader never finds an index without
    /// its data. Returns the index path.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let stem = dir.join(self.file_stem());
        let data_path = stem.with_extension("pack");
        let index_path = stem.with_extension("idx");
        std::fs::write(&data_path, &self.pack)?;
        std::fs::write(&index_path, &self.index)?;
        tracing::debug!(path = %index_path.display(), "Stored pack");
        Ok(index_path)
    }
}
