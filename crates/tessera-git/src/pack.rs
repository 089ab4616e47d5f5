//! Building packs to send and parsing packs received over the wire.
//!
//! See: https://git-scm.com/docs/pack-format

use crate::{GitError, Result};
use sha1::{Digest, Sha1};
use std::collections::{HashMap, HashSet};
use tessera_storage::object::hash_object;
use tessera_storage::pack::{
    decode_record_header, inflate, read_pack_header, DeltaBase, PackWriter, RecordType,
    WrittenPack, PACK_HEADER_SIZE, PACK_TRAILER_SIZE,
};
use tessera_storage::{delta, Object, ObjectId, ObjectKind, ObjectStore};

/// Builds a pack file from a set of objects. Every object is written as a
/// whole record; adding the same object twice keeps the first copy.
#[derive(Debug)]
pub struct PackBuilder {
    writer: PackWriter,
    added: HashSet<ObjectId>,
}

impl PackBuilder {
    /// Creates a new pack builder.
    pub fn new() -> Self {
        Self {
            writer: PackWriter::new(),
            added: HashSet::new(),
        }
    }

    /// Number of objects added.
    pub fn len(&self) -> usize {
        self.added.len()
    }

    /// Returns true if nothing has been added.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
    }

    /// Adds an object to the pack.
    pub fn add(&mut self, object: &Object) -> Result<()> {
        self.add_raw(object.kind(), &object.payload())
    }

    /// Adds an object given as kind and payload.
    pub fn add_raw(&mut self, kind: ObjectKind, payload: &[u8]) -> Result<()> {
        let id = hash_object(kind, payload);
        if self.added.insert(id) {
            self.writer.add_raw(kind, payload)?;
        }
        Ok(())
    }

    /// Adds an object from the store by ID.
    pub fn add_from_store(&mut self, store: &ObjectStore, id: &ObjectId) -> Result<()> {
        if self.added.contains(id) {
            return Ok(());
        }
        let (kind, payload) = store
            .get_raw(id)?
            .ok_or_else(|| GitError::ObjectNotFound(id.to_hex()))?;
        self.add_raw(kind, &payload)
    }

    /// Builds the pack file.
    pub fn build(self) -> Result<Vec<u8>> {
        Ok(self.build_with_index()?.pack)
    }

    /// Builds the pack file together with its index.
    pub fn build_with_index(self) -> Result<WrittenPack> {
        Ok(self.writer.finish()?)
    }
}

impl Default for PackBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// An object recovered from a received pack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedObject {
    /// Object id.
    pub id: ObjectId,
    /// Object kind.
    pub kind: ObjectKind,
    /// Object payload.
    pub payload: Vec<u8>,
    /// Offset of the record in the pack.
    pub offset: u64,
}

/// A record as stored, before delta resolution.
struct RawRecord {
    offset: u64,
    kind: RecordType,
    base: Option<DeltaBase>,
    body: Vec<u8>,
}

/// Parses a pack file received from a peer.
///
/// Offset deltas must point at an earlier record. Digest deltas may name
/// any record in the pack, or, when a base store is supplied, an object the
/// receiver already holds.
pub struct PackParser<'a> {
    data: &'a [u8],
    pos: usize,
    bases: Option<&'a ObjectStore>,
}

impl<'a> PackParser<'a> {
    /// Creates a new pack parser.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            bases: None,
        }
    }

    /// Resolves digest deltas whose base is not in the pack from `store`.
    pub fn with_base_store(mut self, store: &'a ObjectStore) -> Self {
        self.bases = Some(store);
        self
    }

    /// Verifies the pack and returns every object it holds, in record order.
    pub fn parse(&mut self) -> Result<Vec<ParsedObject>> {
        let count = read_pack_header(self.data)? as usize;
        self.pos = PACK_HEADER_SIZE;

        let end = self.data.len() - PACK_TRAILER_SIZE;
        let computed = Sha1::digest(&self.data[..end]);
        if computed.as_slice() != &self.data[end..] {
            return Err(GitError::InvalidPack("checksum mismatch".to_string()));
        }

        // The count is untrusted; every record takes at least two bytes.
        let mut records = Vec::with_capacity(count.min(end / 2));
        for _ in 0..count {
            records.push(self.parse_record(end)?);
        }
        if self.pos != end {
            return Err(GitError::InvalidPack(format!(
                "{} unexpected bytes after the last record",
                end - self.pos
            )));
        }

        let objects = self.resolve(records)?;
        tracing::debug!(objects = objects.len(), "Parsed pack");
        Ok(objects)
    }

    /// Parses the pack and writes every object to `store` as a loose object.
    pub fn unpack(&mut self, store: &ObjectStore) -> Result<Vec<ObjectId>> {
        let objects = self.parse()?;
        let mut ids = Vec::with_capacity(objects.len());
        for object in &objects {
            ids.push(store.put_raw(object.kind, &object.payload)?);
        }
        tracing::info!(objects = ids.len(), "Unpacked objects");
        Ok(ids)
    }

    /// Decodes one record header and inflates its body.
    fn parse_record(&mut self, end: usize) -> Result<RawRecord> {
        let offset = self.pos as u64;
        let header = decode_record_header(&self.data[..end], offset)?;
        let start = header.data_start as usize;
        let (body, consumed) = inflate(&self.data[start..end], header.size)?;
        self.pos = start + consumed;
        tracing::trace!(offset, kind = ?header.kind, size = header.size, "Parsed record");

        Ok(RawRecord {
            offset,
            kind: header.kind,
            base: header.base,
            body,
        })
    }

    /// Turns records into objects, applying deltas once their base is known.
    fn resolve(&self, records: Vec<RawRecord>) -> Result<Vec<ParsedObject>> {
        let by_offset: HashMap<u64, usize> = records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.offset, i))
            .collect();
        let mut resolved: Vec<Option<(ObjectKind, Vec<u8>)>> = vec![None; records.len()];
        let mut by_id: HashMap<ObjectId, usize> = HashMap::new();
        let mut external: HashMap<ObjectId, (ObjectKind, Vec<u8>)> = HashMap::new();

        let mut remaining = records.len();
        loop {
            let mut progressed = false;
            for (i, record) in records.iter().enumerate() {
                if resolved[i].is_some() {
                    continue;
                }

                let result = match (record.kind, record.base) {
                    (RecordType::Base(kind), _) => Some((kind, record.body.clone())),
                    (_, Some(DeltaBase::Offset(base))) => {
                        let j = *by_offset.get(&base).ok_or_else(|| {
                            GitError::InvalidPack(format!(
                                "record at {} has no delta base at {}",
                                record.offset, base
                            ))
                        })?;
                        match &resolved[j] {
                            Some((kind, bytes)) => Some((*kind, delta::apply(bytes, &record.body)?)),
                            None => None,
                        }
                    }
                    (_, Some(DeltaBase::Id(id))) => {
                        let base = match by_id.get(&id) {
                            Some(&j) => resolved[j].as_ref(),
                            None => {
                                if let (false, Some(store)) = (external.contains_key(&id), self.bases)
                                {
                                    if let Some(found) = store.get_raw(&id)? {
                                        external.insert(id, found);
                                    }
                                }
                                external.get(&id)
                            }
                        };
                        match base {
                            Some((kind, bytes)) => Some((*kind, delta::apply(bytes, &record.body)?)),
                            None => None,
                        }
                    }
                    (_, None) => {
                        return Err(GitError::InvalidPack(format!(
                            "delta record at {} has no base",
                            record.offset
                        )))
                    }
                };

                if let Some((kind, bytes)) = result {
                    by_id.insert(hash_object(kind, &bytes), i);
                    resolved[i] = Some((kind, bytes));
                    remaining -= 1;
                    progressed = true;
                }
            }

            if remaining == 0 {
                break;
            }
            if !progressed {
                return Err(GitError::InvalidPack(format!(
                    "{} delta records have no resolvable base",
                    remaining
                )));
            }
        }

        Ok(records
            .iter()
            .zip(resolved)
            .filter_map(|(record, object)| {
                object.map(|(kind, payload)| ParsedObject {
                    id: hash_object(kind, &payload),
                    kind,
                    payload,
                    offset: record.offset,
                })
            })
            .collect())
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Property: blobs survive a build/parse cycle.
        #[test]
        fn prop_pack_roundtrip_blobs(
            blobs in prop::collection::btree_set(prop::collection::vec(any::<u8>(), 0..4096), 0..8),
        ) {
            let mut builder = PackBuilder::new();
            for data in &blobs {
                builder.add_raw(ObjectKind::Blob, data).unwrap();
            }
            let pack = builder.build().unwrap();
            let objects = PackParser::new(&pack).parse().unwrap();
            prop_assert_eq!(objects.len(), blobs.len());
            for (object, data) in objects.iter().zip(&blobs) {
                prop_assert_eq!(&object.payload, data);
            }
        }

        /// Property: arbitrary bytes never panic the parser.
        #[test]
        fn prop_invalid_pack_no_panic(data in prop::collection::vec(any::<u8>(), 0..1000)) {
            let _ = PackParser::new(&data).parse();
        }

        /// Property: any flipped byte is caught by the trailer check.
        #[test]
        fn prop_corrupted_checksum_detected(flip in 0usize..1000) {
            let mut builder = PackBuilder::new();
            builder.add_raw(ObjectKind::Blob, &[7u8; 600]).unwrap();
            let mut pack = builder.build().unwrap();
            let at = flip % pack.len();
            pack[at] ^= 0x01;
            prop_assert!(PackParser::new(&pack).parse().is_err());
        }
    }
}
