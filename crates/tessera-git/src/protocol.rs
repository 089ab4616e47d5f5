//! The upload-pack side of the git fetch protocol.
//!
//! See: https://git-scm.com/docs/pack-protocol
//!
//! A session moves through [`State`] in order: the server advertises its
//! refs, reads the client's wants and haves, answers `NAK` and sends a pack
//! holding everything reachable from the wants that is not reachable from
//! the haves. Only a single round is supported; there is no `multi_ack`.
//!
//! The session works on any byte stream. For the smart HTTP transport the
//! advertisement and the negotiation happen in separate requests, see
//! [`UploadPack::skip_advertisement`].

use crate::pack::PackBuilder;
use crate::pktline::{PktLine, PktLineReader, PktLineWriter};
use crate::walk::objects_to_send;
use crate::{GitError, Result};
use std::io::{Read, Write};
use tessera_storage::{Object, ObjectId, ObjectStore, RefSource, Reference};

/// Name advertised after `agent=` by default.
pub const DEFAULT_AGENT: &str = concat!("tessera/", env!("CARGO_PKG_VERSION"));

/// Largest band-1 payload when `side-band-64k` is negotiated.
pub const SIDE_BAND_64K_CHUNK: usize = 65515;
/// Largest band-1 payload when `side-band` is negotiated.
pub const SIDE_BAND_CHUNK: usize = 995;

/// Placeholder ref name advertised by a repository without refs.
const NO_REFS_MARKER: &str = "capabilities^{}";
const HEX_LEN: usize = 40;

/// Side-band channels.
const BAND_DATA: u8 = 1;
const BAND_PROGRESS: u8 = 2;
const BAND_ERROR: u8 = 3;

/// Server-side negotiation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPackOptions {
    /// Value of the advertised `agent=` capability.
    pub agent: String,
    /// Whether the pack may be multiplexed over side-band channels.
    pub allow_side_band: bool,
}

impl Default for UploadPackOptions {
    fn default() -> Self {
        Self {
            agent: DEFAULT_AGENT.to_string(),
            allow_side_band: true,
        }
    }
}

/// Negotiation states, in the order a session passes through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum State {
    /// Refs have not been advertised yet.
    AdvertiseRefs,
    /// Reading `want` lines.
    CollectWants,
    /// Reading `have` lines.
    CollectHaves,
    /// About to answer the haves.
    Acknowledge,
    /// About to send the pack.
    TransmitPack,
    /// The session is over.
    Done,
}

/// How the pack is framed on the way out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Raw,
    SideBand(usize),
}

/// One upload-pack session against an object store.
pub struct UploadPack<'a> {
    store: &'a ObjectStore,
    options: UploadPackOptions,
    state: State,
    wants: Vec<ObjectId>,
    haves: Vec<ObjectId>,
    capabilities: Vec<String>,
    pack: Option<Vec<u8>>,
}

impl<'a> UploadPack<'a> {
    /// Starts a session that will serve objects from `store`.
    pub fn new(store: &'a ObjectStore, options: UploadPackOptions) -> Self {
        Self {
            store,
            options,
            state: State::AdvertiseRefs,
            wants: Vec::new(),
            haves: Vec::new(),
            capabilities: Vec::new(),
            pack: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Wants read so far, in the order the client sent them.
    pub fn wants(&self) -> &[ObjectId] {
        &self.wants
    }

    /// Haves read so far.
    pub fn haves(&self) -> &[ObjectId] {
        &self.haves
    }

    /// Capabilities the client requested on its first want.
    pub fn client_capabilities(&self) -> &[String] {
        &self.capabilities
    }

    fn expect(&self, state: State) -> Result<()> {
        if self.state != state {
            return Err(GitError::Protocol(format!(
                "expected state {:?}, session is in {:?}",
                state, self.state
            )));
        }
        Ok(())
    }

    fn enter(&mut self, state: State) {
        tracing::debug!(from = ?self.state, to = ?state, "Upload-pack transition");
        self.state = state;
    }

    /// Capabilities this server offers. `head` names the branch HEAD points
    /// at, if any.
    fn server_capabilities(&self, head: Option<&str>) -> String {
        let mut caps = vec!["ofs-delta".to_string()];
        if self.options.allow_side_band {
            caps.push("side-band".to_string());
            caps.push("side-band-64k".to_string());
        }
        caps.push("no-progress".to_string());
        if let Some(target) = head {
            caps.push(format!("symref=HEAD:{}", target));
        }
        caps.push(format!("agent={}", self.options.agent));
        caps.join(" ")
    }

    /// Writes the ref advertisement: HEAD first, the remaining refs in name
    /// order, then a flush. The capability list rides on the first line
    /// only. Annotated tags are followed by their peeled `^{}` line.
    ///
    /// `service` adds the `# service=<name>` preamble used by smart HTTP.
    pub fn advertise_refs<S, W>(
        &mut self,
        refs: &S,
        writer: &mut PktLineWriter<W>,
        service: Option<&str>,
    ) -> Result<()>
    where
        S: RefSource + ?Sized,
        W: Write,
    {
        self.expect(State::AdvertiseRefs)?;

        if let Some(service) = service {
            writer.write_line(&format!("# service={}", service))?;
            writer.flush_pkt()?;
        }

        let mut all = refs.all_refs()?;
        // An unborn HEAD is not advertised, so neither is its symref.
        let head_target = match refs.lookup("HEAD")? {
            Some(Reference::Symbolic(target)) if all.contains_key("HEAD") => Some(target),
            _ => None,
        };
        let caps = self.server_capabilities(head_target.as_deref());

        let mut lines: Vec<(ObjectId, String)> = Vec::with_capacity(all.len() + 1);
        if let Some(head) = all.remove("HEAD") {
            lines.push((head, "HEAD".to_string()));
        }
        for (name, id) in all {
            let peeled = if name.starts_with("refs/tags/") {
                self.peel(&id)?
            } else {
                None
            };
            lines.push((id, name.clone()));
            if let Some(target) = peeled {
                lines.push((target, format!("{}^{{}}", name)));
            }
        }

        if lines.is_empty() {
            writer.write_line(&format!("{} {}\0{}", ObjectId::ZERO, NO_REFS_MARKER, caps))?;
        }
        for (i, (id, name)) in lines.iter().enumerate() {
            if i == 0 {
                writer.write_line(&format!("{} {}\0{}", id, name, caps))?;
            } else {
                writer.write_line(&format!("{} {}", id, name))?;
            }
        }
        writer.flush_pkt()?;
        writer.flush()?;

        tracing::debug!(refs = lines.len(), "Advertised refs");
        self.enter(State::CollectWants);
        Ok(())
    }

    /// Skips the advertisement, as a stateless request does when the
    /// client already fetched the refs separately.
    pub fn skip_advertisement(&mut self) -> Result<()> {
        self.expect(State::AdvertiseRefs)?;
        self.enter(State::CollectWants);
        Ok(())
    }

    /// Follows an annotated tag to the first object that is not a tag.
    fn peel(&self, id: &ObjectId) -> Result<Option<ObjectId>> {
        let mut current = *id;
        let mut peeled = None;
        // Bounded in case a store holds a tag cycle.
        for _ in 0..64 {
            match self.store.get(&current)? {
                Some(Object::Tag(tag)) => {
                    current = tag.target;
                    peeled = Some(current);
                }
                _ => return Ok(peeled),
            }
        }
        Ok(peeled)
    }

    /// Reads `want` lines up to a flush.
    ///
    /// A flush with no wants means the client only wanted the
    /// advertisement, and the session ends. Every wanted object must exist
    /// in the store.
    pub fn collect_wants<R: Read>(&mut self, reader: &mut PktLineReader<R>) -> Result<()> {
        self.expect(State::CollectWants)?;

        loop {
            let pkt = reader.read()?.ok_or_else(|| {
                GitError::Protocol("stream ended before the want list was flushed".to_string())
            })?;
            let data = match pkt {
                PktLine::Flush => break,
                PktLine::Data(data) => data,
            };
            let line = line_str(&data)?;
            let rest = line
                .strip_prefix("want ")
                .ok_or_else(|| GitError::Protocol(format!("expected a want line, got {:?}", line)))?;
            let (id, caps) = split_id(rest)?;

            if let Some(caps) = caps {
                if !self.wants.is_empty() {
                    return Err(GitError::Protocol(format!(
                        "capabilities on a later want line: {:?}",
                        line
                    )));
                }
                self.capabilities = caps.split_whitespace().map(str::to_string).collect();
            }
            if !self.wants.contains(&id) {
                self.wants.push(id);
            }
        }

        if self.wants.is_empty() {
            tracing::debug!("Client sent no wants");
            self.enter(State::Done);
            return Ok(());
        }

        for id in &self.wants {
            if !self.store.contains(id)? {
                return Err(GitError::ObjectNotFound(id.to_hex()));
            }
        }

        tracing::debug!(
            wants = self.wants.len(),
            capabilities = ?self.capabilities,
            "Collected wants"
        );
        self.enter(State::CollectHaves);
        Ok(())
    }

    /// Reads `have` lines until a flush, a `done` line or the end of the
    /// stream.
    pub fn collect_haves<R: Read>(&mut self, reader: &mut PktLineReader<R>) -> Result<()> {
        self.expect(State::CollectHaves)?;

        while let Some(pkt) = reader.read()? {
            let data = match pkt {
                PktLine::Flush => break,
                PktLine::Data(data) => data,
            };
            let line = line_str(&data)?;
            if line == "done" {
                break;
            }
            let rest = line
                .strip_prefix("have ")
                .ok_or_else(|| GitError::Protocol(format!("expected a have line, got {:?}", line)))?;
            match split_id(rest)? {
                (id, None) => self.haves.push(id),
                (_, Some(_)) => {
                    return Err(GitError::Protocol(format!(
                        "trailing data on have line: {:?}",
                        line
                    )))
                }
            }
        }

        tracing::debug!(haves = self.haves.len(), "Collected haves");
        self.enter(State::Acknowledge);
        Ok(())
    }

    /// Builds the pack and answers `NAK`. The pack is built first so a
    /// missing object fails the session before anything is written.
    pub fn acknowledge<W: Write>(&mut self, writer: &mut PktLineWriter<W>) -> Result<()> {
        self.expect(State::Acknowledge)?;

        let ids = objects_to_send(self.store, &self.wants, &self.haves)?;
        let mut builder = PackBuilder::new();
        for id in &ids {
            builder.add_from_store(self.store, id)?;
        }
        self.pack = Some(builder.build()?);

        writer.write_line("NAK")?;
        self.enter(State::TransmitPack);
        Ok(())
    }

    fn framing(&self) -> Framing {
        if !self.options.allow_side_band {
            return Framing::Raw;
        }
        let has = |cap: &str| self.capabilities.iter().any(|c| c == cap);
        if has("side-band-64k") {
            Framing::SideBand(SIDE_BAND_64K_CHUNK)
        } else if has("side-band") {
            Framing::SideBand(SIDE_BAND_CHUNK)
        } else {
            Framing::Raw
        }
    }

    /// Sends the pack, raw or on band 1 followed by a flush.
    pub fn transmit_pack<W: Write>(&mut self, writer: &mut PktLineWriter<W>) -> Result<()> {
        self.expect(State::TransmitPack)?;
        let pack = self
            .pack
            .take()
            .ok_or_else(|| GitError::Protocol("no pack was built".to_string()))?;

        match self.framing() {
            Framing::Raw => writer.write_raw(&pack)?,
            Framing::SideBand(chunk) => {
                for part in pack.chunks(chunk) {
                    let mut data = Vec::with_capacity(part.len() + 1);
                    data.push(BAND_DATA);
                    data.extend_from_slice(part);
                    writer.write(&PktLine::Data(data))?;
                }
                writer.flush_pkt()?;
            }
        }
        writer.flush()?;

        tracing::info!(bytes = pack.len(), wants = self.wants.len(), "Sent pack");
        self.enter(State::Done);
        Ok(())
    }

    /// Runs everything after the advertisement.
    pub fn negotiate<R: Read, W: Write>(
        &mut self,
        reader: &mut PktLineReader<R>,
        writer: &mut PktLineWriter<W>,
    ) -> Result<()> {
        self.collect_wants(reader)?;
        if self.state == State::Done {
            writer.flush()?;
            return Ok(());
        }
        self.collect_haves(reader)?;
        self.acknowledge(writer)?;
        self.transmit_pack(writer)
    }
}

/// Serves one complete upload-pack session on a bidirectional stream.
pub fn upload_pack<S, R, W>(
    store: &ObjectStore,
    refs: &S,
    input: R,
    output: W,
    options: UploadPackOptions,
) -> Result<()>
where
    S: RefSource + ?Sized,
    R: Read,
    W: Write,
{
    let mut reader = PktLineReader::new(input);
    let mut writer = PktLineWriter::new(output);
    let mut session = UploadPack::new(store, options);
    session.advertise_refs(refs, &mut writer, None)?;
    session.negotiate(&mut reader, &mut writer)
}

/// Decodes a packet as UTF-8 without its trailing newline.
fn line_str(data: &[u8]) -> Result<&str> {
    let line = std::str::from_utf8(data)
        .map_err(|_| GitError::Protocol("packet is not valid UTF-8".to_string()))?;
    Ok(line.strip_suffix('\n').unwrap_or(line))
}

/// Splits `"<hex>[ <rest>]"` into the id and the text after the space.
fn split_id(s: &str) -> Result<(ObjectId, Option<&str>)> {
    let hex = s
        .get(..HEX_LEN)
        .ok_or_else(|| GitError::Protocol(format!("truncated object id: {:?}", s)))?;
    let id = ObjectId::from_hex(hex)
        .map_err(|_| GitError::Protocol(format!("invalid object id: {:?}", hex)))?;
    match &s[HEX_LEN..] {
        "" => Ok((id, None)),
        rest => match rest.strip_prefix(' ') {
            Some(rest) => Ok((id, Some(rest))),
            None => Err(GitError::Protocol(format!("malformed object id: {:?}", s))),
        },
    }
}

/// A ref advertisement as seen by a client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Advertisement {
    /// Advertised refs in the order received, peeled lines included.
    pub refs: Vec<(String, ObjectId)>,
    /// Capabilities from the first line.
    pub capabilities: Vec<String>,
}

impl Advertisement {
    /// Looks up an advertised ref by name.
    pub fn get(&self, name: &str) -> Option<ObjectId> {
        self.refs.iter().find(|(n, _)| n == name).map(|(_, id)| *id)
    }

    /// Returns true if the server offers `capability`.
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}

/// Reads a ref advertisement up to its flush. A leading `# service=` block
/// is skipped.
pub fn read_advertisement<R: Read>(reader: &mut PktLineReader<R>) -> Result<Advertisement> {
    let mut advertisement = Advertisement::default();
    let mut first = true;

    loop {
        let pkt = reader.read()?.ok_or_else(|| {
            GitError::Protocol("stream ended inside the ref advertisement".to_string())
        })?;
        let data = match pkt {
            PktLine::Flush => return Ok(advertisement),
            PktLine::Data(data) => data,
        };

        if first && data.starts_with(b"# service=") {
            match reader.read()? {
                Some(PktLine::Flush) => continue,
                _ => {
                    return Err(GitError::Protocol(
                        "service line not followed by a flush".to_string(),
                    ))
                }
            }
        }

        let (refline, caps) = match data.iter().position(|&b| b == 0) {
            Some(nul) => (&data[..nul], Some(&data[nul + 1..])),
            None => (&data[..], None),
        };
        if let Some(caps) = caps {
            if !first {
                return Err(GitError::Protocol(
                    "capabilities after the first ref".to_string(),
                ));
            }
            advertisement.capabilities = line_str(caps)?
                .split_whitespace()
                .map(str::to_string)
                .collect();
        }
        first = false;

        let (id, name) = split_id(line_str(refline)?)?;
        let name = name.ok_or_else(|| GitError::Protocol("ref line without a name".to_string()))?;
        if name == NO_REFS_MARKER && id.is_zero() {
            continue;
        }
        advertisement.refs.push((name.to_string(), id));
    }
}

/// Sends wants (capabilities on the first), a flush, the haves and `done`.
/// With no wants only the flush is sent.
pub fn write_wants<W: Write>(
    writer: &mut PktLineWriter<W>,
    wants: &[ObjectId],
    haves: &[ObjectId],
    capabilities: &[&str],
) -> Result<()> {
    for (i, id) in wants.iter().enumerate() {
        if i == 0 && !capabilities.is_empty() {
            writer.write_line(&format!("want {} {}", id, capabilities.join(" ")))?;
        } else {
            writer.write_line(&format!("want {}", id))?;
        }
    }
    writer.flush_pkt()?;

    if !wants.is_empty() {
        for id in haves {
            writer.write_line(&format!("have {}", id))?;
        }
        if !haves.is_empty() {
            writer.flush_pkt()?;
        }
        writer.write_line("done")?;
    }
    writer.flush()?;
    Ok(())
}

/// Reads the server's answer to [`write_wants`]: the `NAK` or `ACK` line,
/// then the pack. Set `side_band` when a side-band capability was
/// requested.
pub fn read_pack_response<R: Read>(
    reader: &mut PktLineReader<R>,
    side_band: bool,
) -> Result<Vec<u8>> {
    let ack = reader
        .read()?
        .ok_or_else(|| GitError::Protocol("stream ended before NAK".to_string()))?;
    match ack.as_str() {
        Some(line) if line == "NAK" || line.starts_with("ACK ") => {}
        _ => {
            return Err(GitError::Protocol(format!(
                "expected NAK or ACK, got {:?}",
                ack
            )))
        }
    }

    let mut pack = Vec::new();
    if !side_band {
        reader.inner_mut().read_to_end(&mut pack)?;
        return Ok(pack);
    }

    loop {
        let pkt = reader.read()?.ok_or_else(|| {
            GitError::Protocol("stream ended before the side-band flush".to_string())
        })?;
        let data = match pkt {
            PktLine::Flush => return Ok(pack),
            PktLine::Data(data) => data,
        };
        match data.split_first() {
            Some((&BAND_DATA, rest)) => pack.extend_from_slice(rest),
            Some((&BAND_PROGRESS, rest)) => {
                tracing::trace!(progress = %String::from_utf8_lossy(rest), "Remote progress");
            }
            Some((&BAND_ERROR, rest)) => {
                return Err(GitError::Protocol(format!(
                    "remote error: {}",
                    String::from_utf8_lossy(rest).trim_end()
                )))
            }
            _ => {
                return Err(GitError::Protocol(
                    "side-band packet without a valid band".to_string(),
                ))
            }
        }
    }
}
