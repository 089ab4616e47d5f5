//! Commit objects and identity lines.
//!
//! Names, emails, header values and messages are kept as raw bytes: git does
//! not require them to be UTF-8 (see the `encoding` header).

use super::ObjectId;
use crate::{Result, StorageError};
use bstr::{BStr, BString, ByteSlice};
use std::fmt;

/// Largest offset expressible in the `+HHMM` timezone field.
pub const MAX_OFFSET_MINUTES: i32 = 99 * 60 + 59;

/// A point in time with the author's timezone offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Time {
    seconds: i64,
    offset_minutes: i32,
    /// Set for a `-0000` timezone, which must not re-serialize as `+0000`.
    negative_zero: bool,
}

impl Time {
    /// Creates a timestamp. Fails if the offset does not fit in `+HHMM`.
    pub fn new(seconds: i64, offset_minutes: i32) -> Result<Self> {
        if offset_minutes.unsigned_abs() > MAX_OFFSET_MINUTES.unsigned_abs() {
            return Err(StorageError::InvalidObject(format!(
                "timezone offset out of range: {} minutes",
                offset_minutes
            )));
        }
        Ok(Self {
            seconds,
            offset_minutes,
            negative_zero: false,
        })
    }

    /// Seconds since the Unix epoch.
    pub fn seconds(&self) -> i64 {
        self.seconds
    }

    /// Offset from UTC in minutes.
    pub fn offset_minutes(&self) -> i32 {
        self.offset_minutes
    }

    /// Parses `"<seconds> <+|-><HHMM>"`.
    ///
    /// Only the forms this type writes back byte-for-byte are accepted, so
    /// zero-padded seconds and minute fields above 59 are rejected.
    pub fn parse(s: &[u8]) -> Result<Self> {
        let invalid = || StorageError::InvalidObject(format!("invalid timestamp: {}", s.as_bstr()));

        let space = s.find_byte(b' ').ok_or_else(invalid)?;
        let (secs, tz) = (&s[..space], &s[space + 1..]);
        let seconds = parse_seconds(secs).ok_or_else(invalid)?;

        if tz.len() != 5 || !tz[1..].iter().all(u8::is_ascii_digit) {
            return Err(StorageError::InvalidObject(format!(
                "invalid timezone: {}",
                tz.as_bstr()
            )));
        }
        let negative = match tz[0] {
            b'+' => false,
            b'-' => true,
            _ => {
                return Err(StorageError::InvalidObject(
                    "timezone must start with + or -".to_string(),
                ))
            }
        };
        let digit = |i: usize| i32::from(tz[i] - b'0');
        let hours = digit(1) * 10 + digit(2);
        let minutes = digit(3) * 10 + digit(4);
        if minutes >= 60 {
            return Err(StorageError::InvalidObject(format!(
                "invalid timezone: {}",
                tz.as_bstr()
            )));
        }

        let offset = hours * 60 + minutes;
        Ok(Self {
            seconds,
            offset_minutes: if negative { -offset } else { offset },
            negative_zero: negative && offset == 0,
        })
    }
}

/// Accepts `0` or an optionally negative number without leading zeros.
fn parse_seconds(s: &[u8]) -> Option<i64> {
    let digits = s.strip_prefix(b"-").unwrap_or(s);
    let canonical = match digits {
        [b'0'] => digits.len() == s.len(),
        [b'1'..=b'9', rest @ ..] => rest.iter().all(u8::is_ascii_digit),
        _ => false,
    };
    if !canonical {
        return None;
    }
    std::str::from_utf8(s).ok()?.parse().ok()
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.offset_minutes < 0 || self.negative_zero { '-' } else { '+' };
        let offset = self.offset_minutes.unsigned_abs();
        write!(
            f,
            "{} {}{:02}{:02}",
            self.seconds,
            sign,
            offset / 60,
            offset % 60
        )
    }
}

/// A `(name, email, time)` identity line, as used for authors and committers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    name: BString,
    email: BString,
    time: Time,
}

impl Signature {
    /// Creates a signature. Fails if the name or email contains `<`, `>` or
    /// a newline, any of which would corrupt the identity line.
    pub fn new(name: impl Into<BString>, email: impl Into<BString>, time: Time) -> Result<Self> {
        let name = name.into();
        let email = email.into();
        for field in [&name, &email] {
            if field.find_byteset(b"<>\n").is_some() {
                return Err(StorageError::InvalidObject(format!(
                    "invalid identity field: {:?}",
                    field
                )));
            }
        }
        Ok(Self { name, email, time })
    }

    /// Display name.
    pub fn name(&self) -> &BStr {
        self.name.as_bstr()
    }

    /// Email address, without angle brackets.
    pub fn email(&self) -> &BStr {
        self.email.as_bstr()
    }

    /// When the action happened.
    pub fn time(&self) -> Time {
        self.time
    }

    /// Parses `"Name <email> <seconds> <tz>"`.
    pub fn parse(line: &[u8]) -> Result<Self> {
        let invalid = || StorageError::InvalidObject(format!("invalid identity: {}", line.as_bstr()));

        let open = line.find_byte(b'<').ok_or_else(invalid)?;
        let close = line[open..]
            .find_byte(b'>')
            .map(|i| open + i)
            .ok_or_else(invalid)?;

        // The space before `<` is always written, even for an empty name.
        let name = line[..open].strip_suffix(b" ").ok_or_else(invalid)?;
        let email = &line[open + 1..close];
        let time = line[close + 1..].strip_prefix(b" ").ok_or_else(|| {
            StorageError::InvalidObject(format!("identity missing time: {}", line.as_bstr()))
        })?;

        Ok(Self {
            name: name.into(),
            email: email.into(),
            time: Time::parse(time)?,
        })
    }

    /// Appends the identity line, without a trailing newline.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.name);
        out.extend_from_slice(b" <");
        out.extend_from_slice(&self.email);
        out.extend_from_slice(b"> ");
        out.extend_from_slice(self.time.to_string().as_bytes());
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}> {}", self.name, self.email, self.time)
    }
}

/// A commit: a tree snapshot plus ancestry and metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    /// Root tree of the snapshot.
    pub tree: ObjectId,
    /// Parent commits, in order.
    pub parents: Vec<ObjectId>,
    /// Who wrote the change.
    pub author: Signature,
    /// Who recorded the commit.
    pub committer: Signature,
    /// Headers after `committer` (e.g. `encoding`, `gpgsig`), kept verbatim.
    extra_headers: Vec<(BString, BString)>,
    /// Free-form message.
    pub message: BString,
}

impl Commit {
    /// Creates a commit without extra headers.
    pub fn new(
        tree: ObjectId,
        parents: Vec<ObjectId>,
        author: Signature,
        committer: Signature,
        message: impl Into<BString>,
    ) -> Self {
        Self {
            tree,
            parents,
            author,
            committer,
            extra_headers: Vec::new(),
            message: message.into(),
        }
    }

    /// Appends a header written after `committer`. Multi-line values use
    /// `\n` between lines. Fails on an empty key or one containing a space
    /// or newline.
    pub fn push_header(&mut self, key: impl Into<BString>, value: impl Into<BString>) -> Result<()> {
        let key = key.into();
        if key.is_empty() || key.find_byteset(b" \n").is_some() {
            return Err(StorageError::InvalidObject(format!(
                "invalid commit header name: {:?}",
                key
            )));
        }
        self.extra_headers.push((key, value.into()));
        Ok(())
    }

    /// Headers after `committer`, in order.
    pub fn extra_headers(&self) -> &[(BString, BString)] {
        &self.extra_headers
    }

    /// Value of the first extra header named `key`.
    pub fn header(&self, key: &str) -> Option<&BStr> {
        self.extra_headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_bstr())
    }

    /// Serializes the commit payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = format!("tree {}\n", self.tree).into_bytes();
        for parent in &self.parents {
            out.extend_from_slice(format!("parent {}\n", parent).as_bytes());
        }
        out.extend_from_slice(b"author ");
        self.author.write_to(&mut out);
        out.extend_from_slice(b"\ncommitter ");
        self.committer.write_to(&mut out);
        out.push(b'\n');
        for (key, value) in &self.extra_headers {
            out.extend_from_slice(key);
            out.push(b' ');
            out.extend_from_slice(&value.replace("\n", "\n "));
            out.push(b'\n');
        }
        out.push(b'\n');
        out.extend_from_slice(&self.message);
        out
    }

    /// Parses a commit payload.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let split = payload
            .find(b"\n\n")
            .ok_or_else(|| StorageError::InvalidObject("commit missing message".to_string()))?;
        let (headers, message) = (&payload[..split], &payload[split + 2..]);

        let mut lines = headers.split_str("\n").peekable();

        let tree = lines
            .next()
            .and_then(|l| l.strip_prefix(b"tree "))
            .ok_or_else(|| StorageError::InvalidObject("commit missing tree".to_string()))?;
        let tree = ObjectId::from_hex(tree)?;

        let mut parents = Vec::new();
        while let Some(parent) = lines.peek().and_then(|l| l.strip_prefix(b"parent ")) {
            parents.push(ObjectId::from_hex(parent)?);
            lines.next();
        }

        let author = lines
            .next()
            .and_then(|l| l.strip_prefix(b"author "))
            .ok_or_else(|| StorageError::InvalidObject("commit missing author".to_string()))?;
        let author = Signature::parse(author)?;

        let committer = lines
            .next()
            .and_then(|l| l.strip_prefix(b"committer "))
            .ok_or_else(|| StorageError::InvalidObject("commit missing committer".to_string()))?;
        let committer = Signature::parse(committer)?;

        let mut extra_headers: Vec<(BString, BString)> = Vec::new();
        for line in lines {
            if let Some(continuation) = line.strip_prefix(b" ") {
                let (_, value) = extra_headers.last_mut().ok_or_else(|| {
                    StorageError::InvalidObject("continuation without header".to_string())
                })?;
                value.push(b'\n');
                value.extend_from_slice(continuation);
            } else {
                let space = line.find_byte(b' ').ok_or_else(|| {
                    StorageError::InvalidObject(format!(
                        "malformed commit header: {}",
                        line.as_bstr()
                    ))
                })?;
                extra_headers.push((line[..space].into(), line[space + 1..].into()));
            }
        }

        Ok(Self {
            tree,
            parents,
            author,
            committer,
            extra_headers,
            message: message.into(),
        })
    }
}
