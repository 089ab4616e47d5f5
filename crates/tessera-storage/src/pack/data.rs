//! Pack data (`.pack`) records and delta resolution.

use super::{Buffer, PackIndex, RecordType};
use crate::delta;
use crate::varint;
use crate::{ObjectId, ObjectKind, Result, StorageError};
use flate2::{Decompress, FlushDecompress, Status};
use sha1::{Digest, Sha1};
use std::collections::HashSet;

/// Magic bytes at the start of a pack file.
pub const PACK_SIGNATURE: &[u8; 4] = b"PACK";
/// Pack file version we support.
pub const PACK_VERSION: u32 = 2;
/// Signature, version and object count.
pub const PACK_HEADER_SIZE: usize = 12;
/// SHA-1 of everything before it.
pub const PACK_TRAILER_SIZE: usize = 20;
const MAX_PREALLOC: usize = 16 * 1024 * 1024;
const INFLATE_CHUNK: usize = 64 * 1024;

/// Where the base of a delta record lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaBase {
    /// Absolute offset of an earlier record in the same pack.
    Offset(u64),
    /// Identifier of the base object.
    Id(ObjectId),
}

/// A decoded record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Record type.
    pub kind: RecordType,
    /// Inflated size of the record body.
    pub size: u64,
    /// Offset of the zlib stream.
    pub data_start: u64,
    /// Base of a delta record, `None` for whole objects.
    pub base: Option<DeltaBase>,
}

/// Inflates one zlib stream from the front of `input`, which must produce
/// exactly `size` bytes. Returns the bytes and the compressed length.
pub fn inflate(input: &[u8], size: u64) -> Result<(Vec<u8>, usize)> {
    let size = usize::try_from(size)
        .map_err(|_| StorageError::InvalidPack(format!("record size {} too large", size)))?;
    let mut out = Vec::with_capacity(size.saturating_add(1).min(MAX_PREALLOC));
    let mut z = Decompress::new(true);

    loop {
        if out.len() == out.capacity() {
            out.reserve_exact((size - out.len()).saturating_add(1).min(INFLATE_CHUNK));
        }
        let (in_before, out_before) = (z.total_in(), z.total_out());
        let consumed = in_before as usize;
        let status = z
            .decompress_vec(&input[consumed..], &mut out, FlushDecompress::None)
            .map_err(|e| StorageError::InvalidPack(format!("decompression failed: {}", e)))?;

        if out.len() > size {
            return Err(StorageError::InvalidPack(format!(
                "record inflates past declared size {}",
                size
            )));
        }
        match status {
            Status::StreamEnd => break,
            Status::Ok | Status::BufError => {
                if z.total_in() == in_before && z.total_out() == out_before {
                    return Err(StorageError::InvalidPack(
                        "truncated compressed record".to_string(),
                    ));
                }
            }
        }
    }

    if out.len() != size {
        return Err(StorageError::InvalidPack(format!(
            "record size mismatch: header says {}, inflated {}",
            size,
            out.len()
        )));
    }
    Ok((out, z.total_in() as usize))
}

/// Validates the header of a whole pack file and returns the declared
/// object count. The file must also have room for the trailer.
pub fn read_pack_header(pack: &[u8]) -> Result<u32> {
    if pack.len() < PACK_HEADER_SIZE + PACK_TRAILER_SIZE {
        return Err(StorageError::InvalidPack("pack too small".to_string()));
    }
    if &pack[..4] != PACK_SIGNATURE {
        return Err(StorageError::InvalidPack("invalid signature".to_string()));
    }
    let version = u32::from_be_bytes([pack[4], pack[5], pack[6], pack[7]]);
    if version != PACK_VERSION {
        return Err(StorageError::UnsupportedPack(format!(
            "pack version {}",
            version
        )));
    }
    Ok(u32::from_be_bytes([pack[8], pack[9], pack[10], pack[11]]))
}

/// Decodes the header of the record at `offset`. `records` is the pack file
/// with its trailer cut off.
pub fn decode_record_header(records: &[u8], offset: u64) -> Result<RecordHeader> {
    let end = records.len();
    let start = usize::try_from(offset)
        .ok()
        .filter(|&o| o >= PACK_HEADER_SIZE && o < end)
        .ok_or_else(|| StorageError::InvalidPack(format!("record offset {} outside pack", offset)))?;

    let (code, size, n) = varint::read_object_header(&records[start..])
        .ok_or_else(|| StorageError::InvalidPack(format!("truncated header at {}", offset)))?;
    let kind = RecordType::from_code(code)?;
    let mut pos = start + n;

    let base = match kind {
        RecordType::Base(_) => None,
        RecordType::OfsDelta => {
            let (distance, m) = varint::read_ofs_distance(&records[pos..]).ok_or_else(|| {
                StorageError::InvalidPack(format!("truncated delta offset at {}", offset))
            })?;
            pos += m;
            if distance == 0 || distance > offset - PACK_HEADER_SIZE as u64 {
                return Err(StorageError::CorruptDelta(format!(
                    "record at {} points {} bytes back, outside the pack",
                    offset, distance
                )));
            }
            Some(DeltaBase::Offset(offset - distance))
        }
        RecordType::RefDelta => {
            let id = records.get(pos..pos + ObjectId::LEN).ok_or_else(|| {
                StorageError::InvalidPack(format!("truncated delta base at {}", offset))
            })?;
            pos += ObjectId::LEN;
            Some(DeltaBase::Id(ObjectId::from_slice(id)?))
        }
    };

    Ok(RecordHeader {
        kind,
        size,
        data_start: pos as u64,
        base,
    })
}

/// Validated pack data.
#[derive(Debug)]
pub struct PackData {
    buf: Buffer,
    count: u32,
}

impl PackData {
    /// Parses pack data held in memory.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        Self::parse(Buffer::Owned(bytes))
    }

    pub(crate) fn parse(buf: Buffer) -> Result<Self> {
        let count = read_pack_header(&buf)?;
        Ok(Self { buf, count })
    }

    /// Number of records declared in the header.
    pub fn object_count(&self) -> u32 {
        self.count
    }

    /// Total size in bytes, trailer included.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// A parsed pack always holds at least a header and trailer.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn records_end(&self) -> usize {
        self.buf.len() - PACK_TRAILER_SIZE
    }

    /// The trailing SHA-1 stored in the file.
    pub fn checksum(&self) -> ObjectId {
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&self.buf[self.records_end()..]);
        ObjectId::from_bytes(bytes)
    }

    /// Recomputes the trailer over the file contents.
    pub fn verify_checksum(&self) -> Result<()> {
        let computed = Sha1::digest(&self.buf[..self.records_end()]);
        if computed.as_slice() != &self.buf[self.records_end()..] {
            return Err(StorageError::InvalidPack("checksum mismatch".to_string()));
        }
        Ok(())
    }

    /// Decodes the header of the record at `offset`.
    pub fn record_header(&self, offset: u64) -> Result<RecordHeader> {
        decode_record_header(&self.buf[..self.records_end()], offset)
    }

    /// Inflates the body of a record whose header has been decoded.
    pub fn record_body(&self, header: &RecordHeader) -> Result<Vec<u8>> {
        let input = usize::try_from(header.data_start)
            .ok()
            .and_then(|start| self.buf.get(start..self.records_end()))
            .ok_or_else(|| {
                StorageError::InvalidPack(format!("record data at {} outside pack", header.data_start))
            })?;
        let (body, _) = inflate(input, header.size)?;
        Ok(body)
    }

    /// Reads the record at `offset`, following its delta chain to a whole
    /// object. Digest bases are located through `index`.
    ///
    /// The chain is walked iteratively; revisiting an offset or exceeding the
    /// pack's object count fails with [`StorageError::CorruptDelta`].
    pub fn read_raw(&self, offset: u64, index: &PackIndex) -> Result<(ObjectKind, Vec<u8>)> {
        let mut visited = HashSet::new();
        let mut patches = Vec::new();
        let mut current = offset;

        let (kind, mut bytes) = loop {
            if !visited.insert(current) {
                return Err(StorageError::CorruptDelta(format!(
                    "delta chain from {} revisits offset {}",
                    offset, current
                )));
            }
            if patches.len() > self.count as usize {
                return Err(StorageError::CorruptDelta(format!(
                    "delta chain from {} deeper than {} records",
                    offset, self.count
                )));
            }

            let header = self.record_header(current)?;
            tracing::trace!(offset = current, kind = ?header.kind, size = header.size, "Decoding record");
            let body = self.record_body(&header)?;

            match (header.kind, header.base) {
                (RecordType::Base(kind), _) => break (kind, body),
                (_, Some(DeltaBase::Offset(base))) => {
                    patches.push(body);
                    current = base;
                }
                (_, Some(DeltaBase::Id(id))) => {
                    patches.push(body);
                    current = index.lookup(&id)?.ok_or_else(|| {
                        StorageError::CorruptDelta(format!(
                            "delta base {} is not in this pack",
                            id
                        ))
                    })?;
                }
                (_, None) => {
                    return Err(StorageError::CorruptDelta(format!(
                        "delta record at {} has no base",
                        current
                    )))
                }
            }
        };

        while let Some(patch) = patches.pop() {
            bytes = delta::apply(&bytes, &patch)?;
        }
        Ok((kind, bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::DeltaBuilder;
    use crate::pack::PackWriter;
    use crate::Object;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn compress(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    /// Assembles a pack from raw record bytes, fixing up count and trailer.
    fn raw_pack(records: &[Vec<u8>]) -> Vec<u8> {
        let mut pack = Vec::new();
        pack.extend_from_slice(PACK_SIGNATURE);
        pack.extend_from_slice(&PACK_VERSION.to_be_bytes());
        pack.extend_from_slice(&(records.len() as u32).to_be_bytes());
        for record in records {
            pack.extend_from_slice(record);
        }
        let checksum = Sha1::digest(&pack);
        pack.extend_from_slice(&checksum);
        pack
    }

    #[test]
    fn test_inflate_reports_consumed() {
        let mut stream = compress(b"payload");
        let len = stream.len();
        stream.extend_from_slice(b"trailing");
        let (out, used) = inflate(&stream, 7).unwrap();
        assert_eq!(out, b"payload");
        assert_eq!(used, len);
    }

    #[test]
    fn test_inflate_size_mismatch() {
        let stream = compress(b"payload");
        assert!(inflate(&stream, 3).is_err());
        assert!(inflate(&stream, 30).is_err());
        assert!(inflate(&stream[..stream.len() - 3], 7).is_err());
    }

    #[test]
    fn test_header_validation() {
        assert!(matches!(
            PackData::from_bytes(b"PACK".to_vec()),
            Err(StorageError::InvalidPack(_))
        ));

        let mut bytes = raw_pack(&[]);
        bytes[0] = b'K';
        assert!(matches!(
            PackData::from_bytes(bytes),
            Err(StorageError::InvalidPack(_))
        ));

        let mut bytes = raw_pack(&[]);
        bytes[7] = 3;
        assert!(matches!(
            PackData::from_bytes(bytes),
            Err(StorageError::UnsupportedPack(_))
        ));
    }

    #[test]
    fn test_checksum() {
        let bytes = raw_pack(&[]);
        let data = PackData::from_bytes(bytes.clone()).unwrap();
        assert_eq!(data.object_count(), 0);
        data.verify_checksum().unwrap();
        assert_eq!(data.checksum().as_bytes().as_slice(), &bytes[12..]);

        let mut corrupted = bytes;
        corrupted[11] = 1;
        assert!(PackData::from_bytes(corrupted)
            .unwrap()
            .verify_checksum()
            .is_err());
    }

    #[test]
    fn test_ref_delta_chain() {
        let base = Object::blob(b"base content".to_vec());
        let middle = b"base content, extended".to_vec();
        let top = b"extended".to_vec();

        let mut writer = PackWriter::new();
        writer.add_object(&base).unwrap();
        let p1 = DeltaBuilder::new(12).copy(0, 12).insert(b", extended").build();
        let middle_id = Object::blob(middle.clone()).id();
        writer.add_ref_delta(middle_id, base.id(), &p1).unwrap();
        let p2 = DeltaBuilder::new(middle.len()).copy(14, 8).build();
        let top_offset = writer
            .add_ref_delta(Object::blob(top.clone()).id(), middle_id, &p2)
            .unwrap();
        let written = writer.finish().unwrap();

        let index = PackIndex::from_bytes(written.index).unwrap();
        let data = PackData::from_bytes(written.pack).unwrap();
        let (kind, bytes) = data.read_raw(top_offset, &index).unwrap();
        assert_eq!(kind, ObjectKind::Blob);
        assert_eq!(bytes, top);
    }

    #[test]
    fn test_self_referencing_ref_delta() {
        // A ref-delta whose base is itself.
        let patch = DeltaBuilder::new(1).copy(0, 1).build();
        let mut record = Vec::new();
        varint::write_object_header(&mut record, 7, patch.len() as u64);
        let id = ObjectId::from_bytes([0x11; 20]);
        record.extend_from_slice(id.as_bytes());
        record.extend_from_slice(&compress(&patch));
        let pack = raw_pack(&[record]);

        let mut index = Vec::new();
        index.extend_from_slice(&crate::pack::index::IDX_MAGIC);
        index.extend_from_slice(&crate::pack::index::IDX_VERSION.to_be_bytes());
        for k in 0..256u32 {
            let n: u32 = if k >= 0x11 { 1 } else { 0 };
            index.extend_from_slice(&n.to_be_bytes());
        }
        index.extend_from_slice(id.as_bytes());
        index.extend_from_slice(&0u32.to_be_bytes());
        index.extend_from_slice(&12u32.to_be_bytes());
        index.extend_from_slice(&[0u8; 40]);

        let index = PackIndex::from_bytes(index).unwrap();
        let data = PackData::from_bytes(pack).unwrap();
        assert!(matches!(
            data.read_raw(12, &index),
            Err(StorageError::CorruptDelta(_))
        ));
    }

    #[test]
    fn test_ofs_delta_pointing_before_pack() {
        let patch = DeltaBuilder::new(1).copy(0, 1).build();
        let mut record = Vec::new();
        varint::write_object_header(&mut record, 6, patch.len() as u64);
        varint::write_ofs_distance(&mut record, 100);
        record.extend_from_slice(&compress(&patch));
        let data = PackData::from_bytes(raw_pack(&[record])).unwrap();

        assert!(matches!(
            data.record_header(12),
            Err(StorageError::CorruptDelta(_))
        ));
    }

    #[test]
    fn test_missing_ref_base() {
        let patch = DeltaBuilder::new(1).copy(0, 1).build();
        let target = ObjectId::from_bytes([0x22; 20]);
        let mut writer = PackWriter::new();
        let offset = writer
            .add_ref_delta(target, ObjectId::from_bytes([0x33; 20]), &patch)
            .unwrap();
        let written = writer.finish().unwrap();

        let index = PackIndex::from_bytes(written.index).unwrap();
        let data = PackData::from_bytes(written.pack).unwrap();
        assert!(matches!(
            data.read_raw(offset, &index),
            Err(StorageError::CorruptDelta(_))
        ));
    }

    #[test]
    fn test_offset_outside_records() {
        let data = PackData::from_bytes(raw_pack(&[])).unwrap();
        assert!(data.record_header(0).is_err());
        assert!(data.record_header(12).is_err());
        assert!(data.record_header(u64::MAX).is_err());
    }
}
