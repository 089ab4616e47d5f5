//! Annotated tag objects.

use super::{ObjectId, ObjectKind, Signature};
use crate::{Result, StorageError};
use bstr::{BString, ByteSlice};

/// An annotated tag pointing at another object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    /// Tagged object.
    pub target: ObjectId,
    /// Kind of the tagged object.
    pub target_kind: ObjectKind,
    /// Tag name.
    pub name: BString,
    /// Who created the tag. Very old tags omit it.
    pub tagger: Option<Signature>,
    /// Tag message.
    pub message: BString,
}

impl Tag {
    /// Serializes the tag payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = format!("object {}\ntype {}\ntag ", self.target, self.target_kind).into_bytes();
        out.extend_from_slice(&self.name);
        out.push(b'\n');
        if let Some(tagger) = &self.tagger {
            out.extend_from_slice(b"tagger ");
            tagger.write_to(&mut out);
            out.push(b'\n');
        }
        out.push(b'\n');
        out.extend_from_slice(&self.message);
        out
    }

    /// Parses a tag payload.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let split = payload
            .find(b"\n\n")
            .ok_or_else(|| StorageError::InvalidObject("tag missing message".to_string()))?;
        let (headers, message) = (&payload[..split], &payload[split + 2..]);

        let mut lines = headers.split_str("\n");
        let mut field = |prefix: &str| {
            lines
                .next()
                .and_then(|l| l.strip_prefix(prefix.as_bytes()))
                .ok_or_else(|| StorageError::InvalidObject(format!("tag missing {}", prefix.trim())))
        };

        let target = ObjectId::from_hex(field("object ")?)?;
        let kind = field("type ")?;
        let target_kind = ObjectKind::parse(
            std::str::from_utf8(kind)
                .map_err(|_| StorageError::InvalidObject(format!("invalid tag type: {}", kind.as_bstr())))?,
        )?;
        let name = field("tag ")?.into();
        let tagger = match lines.next() {
            Some(line) => {
                let tagger = line.strip_prefix(b"tagger ").ok_or_else(|| {
                    StorageError::InvalidObject(format!("unexpected tag header: {}", line.as_bstr()))
                })?;
                Some(Signature::parse(tagger)?)
            }
            None => None,
        };
        if let Some(line) = lines.next() {
            return Err(StorageError::InvalidObject(format!(
                "unexpected tag header: {}",
                line.as_bstr()
            )));
        }

        Ok(Self {
            target,
            target_kind,
            name,
            tagger,
            message: message.into(),
        })
    }
}
