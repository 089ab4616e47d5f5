//! Pack index (`.idx`) version 2.
//!
//! Layout (all integers big-endian):
//!
//! ```text
//! magic 0xff744f63 | version 2
//! fan-out: 256 x u32, entry k = number of ids whose first byte <= k
//! ids:     N x 20 bytes, ascending
//! crc32:   N x u32
//! offsets: N x u32, MSB set = index into a 64-bit table (unsupported)
//! trailer: pack checksum, index checksum
//! ```

use super::Buffer;
use crate::{ObjectId, Result, StorageError};
use std::cmp::Ordering;

/// Index magic bytes (`\377tOc`).
pub(crate) const IDX_MAGIC: [u8; 4] = [0xff, b't', b'O', b'c'];
/// The only supported index version.
pub(crate) const IDX_VERSION: u32 = 2;
const HEADER_SIZE: usize = 8;
const FANOUT_SIZE: usize = 256 * 4;
const IDS_START: usize = HEADER_SIZE + FANOUT_SIZE;
const LARGE_OFFSET_FLAG: u32 = 0x8000_0000;

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

/// A validated, read-only pack index.
#[derive(Debug)]
pub struct PackIndex {
    buf: Buffer,
    count: u32,
}

impl PackIndex {
    /// Parses an index held in memory.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        Self::parse(Buffer::Owned(bytes))
    }

    pub(crate) fn parse(buf: Buffer) -> Result<Self> {
        if buf.len() < IDS_START {
            return Err(StorageError::InvalidPack("index too small".to_string()));
        }
        if buf[..4] != IDX_MAGIC {
            return Err(StorageError::InvalidPack("bad index magic".to_string()));
        }
        let version = read_u32(&buf, 4);
        if version != IDX_VERSION {
            return Err(StorageError::UnsupportedPack(format!(
                "index version {}",
                version
            )));
        }

        let mut prev = 0u32;
        for k in 0..256 {
            let value = read_u32(&buf, HEADER_SIZE + 4 * k);
            if value < prev {
                return Err(StorageError::InvalidPack(format!(
                    "fan-out decreases at entry {}",
                    k
                )));
            }
            prev = value;
        }
        let count = prev;

        let needed = (count as usize)
            .checked_mul(20 + 4 + 4)
            .and_then(|n| n.checked_add(IDS_START))
            .ok_or_else(|| StorageError::InvalidPack("object count overflows".to_string()))?;
        if buf.len() < needed {
            return Err(StorageError::InvalidPack(format!(
                "index truncated: {} objects need {} bytes, file has {}",
                count,
                needed,
                buf.len()
            )));
        }

        Ok(Self { buf, count })
    }

    /// Number of objects in the index.
    pub fn len(&self) -> u32 {
        self.count
    }

    /// Returns true if the index lists no objects.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Cumulative fan-out count for `first_byte`.
    pub fn fanout(&self, first_byte: u8) -> u32 {
        read_u32(&self.buf, HEADER_SIZE + 4 * usize::from(first_byte))
    }

    fn id_bytes(&self, n: u32) -> &[u8] {
        let start = IDS_START + 20 * n as usize;
        &self.buf[start..start + 20]
    }

    /// Identifier at sorted position `n`.
    pub fn id_at(&self, n: u32) -> Option<ObjectId> {
        if n >= self.count {
            return None;
        }
        ObjectId::from_slice(self.id_bytes(n)).ok()
    }

    /// CRC32 of the packed record at position `n`.
    pub fn crc_at(&self, n: u32) -> Option<u32> {
        if n >= self.count {
            return None;
        }
        let start = IDS_START + 20 * self.count as usize + 4 * n as usize;
        Some(read_u32(&self.buf, start))
    }

    /// Pack offset of the record at position `n`.
    pub fn offset_at(&self, n: u32) -> Result<u64> {
        if n >= self.count {
            return Err(StorageError::InvalidPack(format!(
                "index position {} out of range",
                n
            )));
        }
        let start = IDS_START + 24 * self.count as usize + 4 * n as usize;
        let raw = read_u32(&self.buf, start);
        if raw & LARGE_OFFSET_FLAG != 0 {
            return Err(StorageError::UnsupportedPack(
                "64-bit pack offsets".to_string(),
            ));
        }
        Ok(u64::from(raw))
    }

    /// Finds the pack offset of `id`. `Ok(None)` means the pack does not hold it.
    pub fn lookup(&self, id: &ObjectId) -> Result<Option<u64>> {
        match self.position(id) {
            Some(n) => self.offset_at(n).map(Some),
            None => Ok(None),
        }
    }

    /// Sorted position of `id`, narrowing the search with the fan-out table.
    pub fn position(&self, id: &ObjectId) -> Option<u32> {
        let first = id.first_byte();
        let mut lo = if first == 0 { 0 } else { self.fanout(first - 1) };
        let mut hi = self.fanout(first);
        let target = id.as_bytes().as_slice();

        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.id_bytes(mid).cmp(target) {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
                Ordering::Equal => return Some(mid),
            }
        }
        None
    }

    /// Iterates identifiers in sorted order.
    pub fn ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        (0..self.count).filter_map(move |n| self.id_at(n))
    }
}

/// Builds an index from `(id, offset)` pairs without going through a pack.
#[cfg(test)]
fn build_index(entries: &[([u8; 20], u32)]) -> Vec<u8> {
    let mut sorted = entries.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut out = Vec::new();
    out.extend_from_slice(&IDX_MAGIC);
    out.extend_from_slice(&IDX_VERSION.to_be_bytes());
    let mut fanout = [0u32; 256];
    for (id, _) in &sorted {
        for slot in fanout.iter_mut().skip(id[0] as usize) {
            *slot += 1;
        }
    }
    for value in fanout {
        out.extend_from_slice(&value.to_be_bytes());
    }
    for (id, _) in &sorted {
        out.extend_from_slice(id);
    }
    for _ in &sorted {
        out.extend_from_slice(&0u32.to_be_bytes());
    }
    for (_, offset) in &sorted {
        out.extend_from_slice(&offset.to_be_bytes());
    }
    out.extend_from_slice(&[0u8; 40]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_hits_and_misses() {
        let mut a = [0u8; 20];
        a[0] = 0x00;
        a[19] = 1;
        let mut b = [0u8; 20];
        b[0] = 0x7f;
        let mut c = [0u8; 20];
        c[0] = 0xff;
        let index = PackIndex::from_bytes(build_index(&[(a, 12), (b, 99), (c, 1234)])).unwrap();

        assert_eq!(index.len(), 3);
        assert_eq!(index.lookup(&ObjectId::from_bytes(a)).unwrap(), Some(12));
        assert_eq!(index.lookup(&ObjectId::from_bytes(b)).unwrap(), Some(99));
        assert_eq!(index.lookup(&ObjectId::from_bytes(c)).unwrap(), Some(1234));

        // Below, between and above every entry.
        assert_eq!(index.lookup(&ObjectId::ZERO).unwrap(), None);
        let mut between = b;
        between[19] = 5;
        assert_eq!(index.lookup(&ObjectId::from_bytes(between)).unwrap(), None);
        assert_eq!(index.lookup(&ObjectId::from_bytes([0xff; 20])).unwrap(), None);
    }

    #[test]
    fn test_empty_index() {
        let index = PackIndex::from_bytes(build_index(&[])).unwrap();
        assert!(index.is_empty());
        assert_eq!(index.lookup(&ObjectId::from_bytes([3u8; 20])).unwrap(), None);
        assert_eq!(index.ids().count(), 0);
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = build_index(&[]);
        bytes[0] = 0;
        assert!(matches!(
            PackIndex::from_bytes(bytes),
            Err(StorageError::InvalidPack(_))
        ));
    }

    #[test]
    fn test_unsupported_version() {
        let mut bytes = build_index(&[]);
        bytes[7] = 3;
        assert!(matches!(
            PackIndex::from_bytes(bytes),
            Err(StorageError::UnsupportedPack(_))
        ));
    }

    #[test]
    fn test_non_monotonic_fanout() {
        let mut bytes = build_index(&[([5u8; 20], 12)]);
        // fan-out entry 200 claims 1, entry 201 claims 0.
        let at = HEADER_SIZE + 4 * 201;
        bytes[at..at + 4].copy_from_slice(&0u32.to_be_bytes());
        assert!(PackIndex::from_bytes(bytes).is_err());
    }

    #[test]
    fn test_truncated_tables() {
        let mut bytes = build_index(&[([5u8; 20], 12), ([6u8; 20], 40)]);
        bytes.truncate(IDS_START + 30);
        assert!(PackIndex::from_bytes(bytes).is_err());
    }

    #[test]
    fn test_large_offset_is_unsupported() {
        let index = PackIndex::from_bytes(build_index(&[([5u8; 20], 0x8000_0001)])).unwrap();
        assert!(matches!(
            index.lookup(&ObjectId::from_bytes([5u8; 20])),
            Err(StorageError::UnsupportedPack(_))
        ));
    }

    #[test]
    fn test_ids_sorted() {
        let index = PackIndex::from_bytes(build_index(&[
            ([9u8; 20], 1),
            ([1u8; 20], 2),
            ([4u8; 20], 3),
        ]))
        .unwrap();
        let ids: Vec<_> = index.ids().collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(index.id_at(3), None);
        assert_eq!(index.crc_at(0), Some(0));
    }
}
