//! Git pkt-line format implementation.
//!
//! Each packet is prefixed with a 4-character hex length that counts the
//! prefix itself, so `"0009done\n"` carries five bytes. `"0000"` is the flush
//! packet, which ends a group and is distinct from `"0004"`, an empty data
//! packet.

use crate::{GitError, Result};
use std::io::{ErrorKind, Read, Write};

/// Size of the length prefix.
pub const LENGTH_SIZE: usize = 4;
/// Largest payload the 4-digit length field can describe.
pub const MAX_DATA_LEN: usize = 0xffff - LENGTH_SIZE;

/// A pkt-line packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PktLine {
    /// Data line with content.
    Data(Vec<u8>),
    /// Flush packet (0000).
    Flush,
}

impl PktLine {
    /// Creates a data packet from a string slice.
    pub fn from_string(s: &str) -> Self {
        Self::Data(s.as_bytes().to_vec())
    }

    /// Creates a data packet from bytes.
    pub fn from_bytes(b: impl Into<Vec<u8>>) -> Self {
        Self::Data(b.into())
    }

    /// Encodes the packet to bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            Self::Data(data) => {
                if data.len() > MAX_DATA_LEN {
                    return Err(GitError::InvalidPktLine(format!(
                        "payload of {} bytes exceeds {}",
                        data.len(),
                        MAX_DATA_LEN
                    )));
                }
                let mut result = format!("{:04X}", data.len() + LENGTH_SIZE).into_bytes();
                result.extend_from_slice(data);
                Ok(result)
            }
            Self::Flush => Ok(b"0000".to_vec()),
        }
    }

    /// Returns true if this is a flush packet.
    pub fn is_flush(&self) -> bool {
        matches!(self, Self::Flush)
    }

    /// Returns the data content, or None for a flush.
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            Self::Data(data) => Some(data),
            Self::Flush => None,
        }
    }

    /// Returns the data as a string, trimming any trailing newline.
    pub fn as_str(&self) -> Option<&str> {
        self.data()
            .and_then(|d| std::str::from_utf8(d).ok())
            .map(|s| s.strip_suffix('\n').unwrap_or(s))
    }
}

/// Parses a 4-byte length prefix. Both hex cases are accepted.
fn parse_length(prefix: &[u8; LENGTH_SIZE]) -> Result<usize> {
    let mut len = 0usize;
    for &b in prefix {
        let digit = (b as char).to_digit(16).ok_or_else(|| {
            GitError::InvalidPktLine(format!(
                "non-hex length prefix {:?}",
                String::from_utf8_lossy(prefix)
            ))
        })?;
        len = len * 16 + digit as usize;
    }
    Ok(len)
}

/// Reader for pkt-line format.
pub struct PktLineReader<R> {
    reader: R,
}

impl<R: Read> PktLineReader<R> {
    /// Creates a new pkt-line reader.
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Reads the next packet. `Ok(None)` means the stream ended cleanly
    /// between packets.
    pub fn read(&mut self) -> Result<Option<PktLine>> {
        let mut len_buf = [0u8; LENGTH_SIZE];
        let mut filled = 0;
        while filled < LENGTH_SIZE {
            match self.reader.read(&mut len_buf[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => {
                    return Err(GitError::InvalidPktLine(
                        "stream ended inside length prefix".to_string(),
                    ))
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        let len = parse_length(&len_buf)?;
        if len == 0 {
            return Ok(Some(PktLine::Flush));
        }
        if len < LENGTH_SIZE {
            return Err(GitError::InvalidPktLine(format!(
                "length {:04x} is reserved",
                len
            )));
        }

        let mut data = vec![0u8; len - LENGTH_SIZE];
        self.reader.read_exact(&mut data).map_err(|e| {
            if e.kind() == ErrorKind::UnexpectedEof {
                GitError::InvalidPktLine(format!("stream ended inside {}-byte packet", len))
            } else {
                e.into()
            }
        })?;
        Ok(Some(PktLine::Data(data)))
    }

    /// Reads data packets until a flush. A stream that ends first is a
    /// protocol error.
    pub fn read_until_flush(&mut self) -> Result<Vec<Vec<u8>>> {
        let mut packets = Vec::new();
        loop {
            match self.read()? {
                Some(PktLine::Flush) => return Ok(packets),
                Some(PktLine::Data(data)) => packets.push(data),
                None => {
                    return Err(GitError::Protocol(
                        "stream ended before flush".to_string(),
                    ))
                }
            }
        }
    }

    /// Returns a mutable reference to the inner reader.
    pub fn inner_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    /// Consumes the reader and returns the inner reader.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Writer for pkt-line format.
pub struct PktLineWriter<W> {
    writer: W,
}

impl<W: Write> PktLineWriter<W> {
    /// Creates a new pkt-line writer.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes a packet.
    pub fn write(&mut self, pkt: &PktLine) -> Result<()> {
        self.writer.write_all(&pkt.encode()?)?;
        Ok(())
    }

    /// Writes a data line.
    pub fn write_data(&mut self, data: &[u8]) -> Result<()> {
        self.write(&PktLine::Data(data.to_vec()))
    }

    /// Writes a string line (with newline).
    pub fn write_line(&mut self, s: &str) -> Result<()> {
        let mut data = s.as_bytes().to_vec();
        if !s.ends_with('\n') {
            data.push(b'\n');
        }
        self.write(&PktLine::Data(data))
    }

    /// Writes a flush packet.
    pub fn flush_pkt(&mut self) -> Result<()> {
        self.write(&PktLine::Flush)
    }

    /// Writes raw bytes outside of pkt-line framing.
    pub fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data)?;
        Ok(())
    }

    /// Flushes the underlying writer.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Returns the inner writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn read_all(bytes: &[u8]) -> Vec<PktLine> {
        let mut reader = PktLineReader::new(Cursor::new(bytes.to_vec()));
        let mut out = Vec::new();
        while let Some(pkt) = reader.read().unwrap() {
            out.push(pkt);
        }
        out
    }

    #[test]
    fn test_pktline_encode() {
        assert_eq!(
            PktLine::from_string("hello\n").encode().unwrap(),
            b"000Ahello\n"
        );
        assert_eq!(PktLine::Flush.encode().unwrap(), b"0000");
    }

    #[test]
    fn test_pktline_roundtrip() {
        let packets = vec![
            PktLine::from_string("hello\n"),
            PktLine::from_string("world\n"),
            PktLine::Flush,
        ];

        let mut buf = Vec::new();
        {
            let mut writer = PktLineWriter::new(&mut buf);
            for pkt in &packets {
                writer.write(pkt).unwrap();
            }
        }
        assert_eq!(read_all(&buf), packets);
    }

    #[test]
    fn test_pktline_boundary_sizes() {
        for len in [0usize, 1, MAX_DATA_LEN] {
            let pkt = PktLine::from_bytes(vec![b'x'; len]);
            let encoded = pkt.encode().unwrap();
            assert_eq!(encoded.len(), len + 4);
            assert_eq!(read_all(&encoded), vec![pkt]);
        }
        assert_eq!(&PktLine::from_bytes(vec![0u8; MAX_DATA_LEN]).encode().unwrap()[..4], b"FFFF");
    }

    #[test]
    fn test_pktline_oversized_rejected() {
        let pkt = PktLine::from_bytes(vec![0u8; MAX_DATA_LEN + 1]);
        assert!(matches!(pkt.encode(), Err(GitError::InvalidPktLine(_))));
    }

    #[test]
    fn test_flush_distinct_from_empty() {
        let packets = read_all(b"00040000");
        assert_eq!(packets, vec![PktLine::Data(Vec::new()), PktLine::Flush]);
        assert!(!packets[0].is_flush());
        assert!(packets[1].is_flush());
    }

    #[test]
    fn test_lowercase_length_accepted() {
        assert_eq!(read_all(b"000ahello\n"), vec![PktLine::from_string("hello\n")]);
    }

    #[test]
    fn test_pktline_as_str() {
        assert_eq!(PktLine::from_string("hello\n").as_str(), Some("hello"));
        assert_eq!(PktLine::from_string("no newline").as_str(), Some("no newline"));
        assert!(PktLine::from_bytes(vec![0xff, 0xfe]).as_str().is_none());
        assert!(PktLine::Flush.as_str().is_none());
    }

    #[test]
    fn test_pktline_read_invalid_length() {
        for bad in [&b"0003"[..], b"0001", b"zz10", b"+fff", b"00 4"] {
            let mut reader = PktLineReader::new(Cursor::new(bad.to_vec()));
            assert!(
                matches!(reader.read(), Err(GitError::InvalidPktLine(_))),
                "{:?}",
                bad
            );
        }
    }

    #[test]
    fn test_pktline_truncated() {
        let mut reader = PktLineReader::new(Cursor::new(b"00".to_vec()));
        assert!(reader.read().is_err());

        let mut reader = PktLineReader::new(Cursor::new(b"0010short".to_vec()));
        assert!(matches!(reader.read(), Err(GitError::InvalidPktLine(_))));
    }

    #[test]
    fn test_pktline_read_eof_on_empty() {
        let mut reader = PktLineReader::new(Cursor::new(Vec::<u8>::new()));
        assert!(reader.read().unwrap().is_none());
    }

    #[test]
    fn test_pktline_read_until_flush() {
        let mut buf = Vec::new();
        {
            let mut writer = PktLineWriter::new(&mut buf);
            writer.write_line("line1").unwrap();
            writer.write_line("line2").unwrap();
            writer.flush_pkt().unwrap();
            writer.write_line("line3").unwrap();
        }

        let mut reader = PktLineReader::new(Cursor::new(buf));
        let packets = reader.read_until_flush().unwrap();
        assert_eq!(packets, vec![b"line1\n".to_vec(), b"line2\n".to_vec()]);
        // The trailing line has no flush after it.
        assert!(matches!(
            reader.read_until_flush(),
            Err(GitError::Protocol(_))
        ));
    }

    #[test]
    fn test_pktline_writer_write_line() {
        let mut buf = Vec::new();
        {
            let mut writer = PktLineWriter::new(&mut buf);
            writer.write_line("test").unwrap();
            writer.write_line("test\n").unwrap();
        }
        // "test\n" is 5 bytes, + 4 for length = 9, and the newline is not doubled.
        assert_eq!(buf, b"0009test\n0009test\n");
    }

    #[test]
    fn test_pktline_writer_raw() {
        let mut writer = PktLineWriter::new(Vec::new());
        writer.write_line("NAK").unwrap();
        writer.write_raw(b"PACK").unwrap();
        writer.flush().unwrap();
        assert_eq!(writer.into_inner(), b"0008NAK\nPACK");
    }
}
