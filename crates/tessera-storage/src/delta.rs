//! Git delta patches: application and construction.
//!
//! A patch is `<base-length><result-length><op>*` where both lengths use the
//! delta size varint. Ops:
//!
//! - **insert** (`0nnnnnnn`): copy the next `n` patch bytes into the result.
//! - **copy** (`1sssoooo`): bits 0-3 flag which of four little-endian offset
//!   bytes follow, bits 4-6 which of three size bytes follow. Absent bytes are
//!   zero and a size of zero means `0x10000`.
//!
//! Every length and range is checked; a patch that disagrees with its base
//! fails with [`StorageError::CorruptDelta`] instead of reading or writing
//! out of bounds.

use crate::varint;
use crate::{Result, StorageError};

const COPY_FLAG: u8 = 0x80;
const COPY_ZERO_SIZE: usize = 0x10000;
const MAX_INSERT: usize = 0x7f;
/// Upper bound on the initial allocation; larger results grow as ops are applied.
const MAX_PREALLOC: usize = 16 * 1024 * 1024;

fn corrupt(msg: impl Into<String>) -> StorageError {
    StorageError::CorruptDelta(msg.into())
}

/// Reads the `(base_length, result_length)` prefix of a patch and returns the
/// offset of the first op.
pub fn read_header(patch: &[u8]) -> Result<(u64, u64, usize)> {
    let (base_len, n) =
        varint::read_size(patch).ok_or_else(|| corrupt("truncated base length"))?;
    let (result_len, m) =
        varint::read_size(&patch[n..]).ok_or_else(|| corrupt("truncated result length"))?;
    Ok((base_len, result_len, n + m))
}

/// Applies `patch` to `base`, returning exactly the declared result length.
pub fn apply(base: &[u8], patch: &[u8]) -> Result<Vec<u8>> {
    let (base_len, result_len, mut pos) = read_header(patch)?;

    if base_len != base.len() as u64 {
        return Err(corrupt(format!(
            "base length mismatch: patch expects {}, base is {}",
            base_len,
            base.len()
        )));
    }
    let result_len = usize::try_from(result_len)
        .map_err(|_| corrupt(format!("result length {} too large", result_len)))?;

    let mut out = Vec::with_capacity(result_len.min(MAX_PREALLOC));

    while pos < patch.len() {
        let op = patch[pos];
        pos += 1;

        if op & COPY_FLAG == 0 {
            if op == 0 {
                return Err(corrupt("reserved zero opcode"));
            }
            let len = usize::from(op);
            let data = patch
                .get(pos..pos + len)
                .ok_or_else(|| corrupt("insert runs past end of patch"))?;
            if out.len() + len > result_len {
                return Err(corrupt("insert exceeds result length"));
            }
            out.extend_from_slice(data);
            pos += len;
        } else {
            let mut offset = 0usize;
            for i in 0..4 {
                if op & (1 << i) != 0 {
                    let byte = *patch.get(pos).ok_or_else(|| corrupt("truncated copy offset"))?;
                    offset |= usize::from(byte) << (8 * i);
                    pos += 1;
                }
            }
            let mut size = 0usize;
            for i in 0..3 {
                if op & (1 << (4 + i)) != 0 {
                    let byte = *patch.get(pos).ok_or_else(|| corrupt("truncated copy size"))?;
                    size |= usize::from(byte) << (8 * i);
                    pos += 1;
                }
            }
            if size == 0 {
                size = COPY_ZERO_SIZE;
            }

            let end = offset
                .checked_add(size)
                .filter(|&end| end <= base.len())
                .ok_or_else(|| {
                    corrupt(format!(
                        "copy [{}, {}) outside base of length {}",
                        offset,
                        offset.saturating_add(size),
                        base.len()
                    ))
                })?;
            if out.len() + size > result_len {
                return Err(corrupt("copy exceeds result length"));
            }
            out.extend_from_slice(&base[offset..end]);
        }
    }

    if out.len() != result_len {
        return Err(corrupt(format!(
            "result length mismatch: expected {}, produced {}",
            result_len,
            out.len()
        )));
    }
    Ok(out)
}

/// Builds a patch from explicit copy and insert operations.
#[derive(Debug, Clone)]
pub struct DeltaBuilder {
    base_len: u64,
    result_len: u64,
    ops: Vec<u8>,
}

impl DeltaBuilder {
    /// Starts a patch against a base of `base_len` bytes.
    pub fn new(base_len: usize) -> Self {
        Self {
            base_len: base_len as u64,
            result_len: 0,
            ops: Vec::new(),
        }
    }

    /// Copies `len` bytes starting at `offset` of the base.
    ///
    /// # Panics
    ///
    /// Panics if a copy would start past `u32::MAX`: the instruction encodes
    /// at most four offset bytes.
    pub fn copy(mut self, offset: usize, len: usize) -> Self {
        let mut offset = offset;
        let mut remaining = len;
        while remaining > 0 {
            let chunk = remaining.min(COPY_ZERO_SIZE);
            self.push_copy(offset, chunk);
            offset += chunk;
            remaining -= chunk;
        }
        self.result_len += len as u64;
        self
    }

    /// Inserts literal bytes.
    pub fn insert(mut self, data: &[u8]) -> Self {
        for chunk in data.chunks(MAX_INSERT) {
            self.ops.push(chunk.len() as u8);
            self.ops.extend_from_slice(chunk);
        }
        self.result_len += data.len() as u64;
        self
    }

    /// Length of the result described so far.
    pub fn result_len(&self) -> u64 {
        self.result_len
    }

    /// Finishes the patch.
    pub fn build(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.ops.len() + 20);
        varint::write_size(&mut out, self.base_len);
        varint::write_size(&mut out, self.result_len);
        out.extend_from_slice(&self.ops);
        out
    }

    fn push_copy(&mut self, offset: usize, size: usize) {
        assert!(
            u32::try_from(offset).is_ok(),
            "delta copy offset {} does not fit in 32 bits",
            offset
        );
        let mut op = COPY_FLAG;
        let mut args = Vec::with_capacity(7);
        for i in 0..4 {
            let byte = (offset >> (8 * i)) as u8;
            if byte != 0 {
                op |= 1 << i;
                args.push(byte);
            }
        }
        if size != COPY_ZERO_SIZE {
            for i in 0..3 {
                let byte = (size >> (8 * i)) as u8;
                if byte != 0 {
                    op |= 1 << (4 + i);
                    args.push(byte);
                }
            }
        }
        self.ops.push(op);
        self.ops.extend_from_slice(&args);
    }
}
