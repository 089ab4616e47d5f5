//! Git protocol implementation for Tessera.
//!
//! This crate implements pkt-line framing, the upload-pack negotiation used
//! by fetch and clone, the reachability walk that decides what to send, and
//! building and parsing the pack files exchanged on the wire.

mod error;
pub mod pack;
pub mod pktline;
pub mod protocol;
pub mod walk;

pub use error::GitError;
pub use pack::{PackBuilder, PackParser, ParsedObject};
pub use pktline::{PktLine, PktLineReader, PktLineWriter};
pub use protocol::{
    read_advertisement, read_pack_response, upload_pack, write_wants, Advertisement, State,
    UploadPack, UploadPackOptions,
};
pub use walk::{objects_to_send, reachable};

/// Result type for git protocol operations.
pub type Result<T> = std::result::Result<T, GitError>;
