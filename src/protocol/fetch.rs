//! Builder and parser for protocol v2 `fetch` exchanges: `want`/`have`
//! arguments with blob filters, response section walking, and side-band
//! demultiplexing of the packfile section.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    errors::{GitError, ServerErrorKind},
    hash::ObjectHash,
    protocol::pkt_line::{self, PktLine},
    protocol::refs::GitRef,
};

/// Blob filter argument for partial fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobFilter {
    /// `filter blob:none`: commits and trees only.
    None,
    /// `filter blob:limit=<n>`: omit blobs larger than `n` bytes.
    Limit(u64),
}

impl std::fmt::Display for BlobFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlobFilter::None => write!(f, "blob:none"),
            BlobFilter::Limit(n) => write!(f, "blob:limit={n}"),
        }
    }
}

/// One stateless v2 fetch request.
#[derive(Debug, Clone, Default)]
pub struct FetchRequest {
    pub wants: Vec<ObjectHash>,
    /// Commits the client already has; enables thin-pack deltas against them.
    pub haves: Vec<ObjectHash>,
    pub filter: Option<BlobFilter>,
    /// Advertise that REF_DELTA bases may be resolved from our store.
    pub thin_pack: bool,
    pub no_progress: bool,
}

impl FetchRequest {
    /// A blob-less fetch of one root: commits and trees only.
    pub fn trees_of(want: ObjectHash) -> Self {
        Self {
            wants: vec![want],
            filter: Some(BlobFilter::None),
            no_progress: true,
            ..Default::default()
        }
    }

    /// A full fetch of the given objects (commits, trees, or blobs).
    pub fn objects(wants: Vec<ObjectHash>) -> Self {
        Self {
            wants,
            no_progress: true,
            ..Default::default()
        }
    }

    /// Marshal into the pkt-line body for `git-upload-pack`.
    ///
    /// Sections: capabilities, `0001` delimiter, arguments ending in
    /// `done`, flush.
    pub fn format(&self, agent: &str) -> Result<Bytes, GitError> {
        let mut packs = vec![
            PktLine::data(b"command=fetch\n".to_vec()),
            PktLine::data(b"object-format=sha1\n".to_vec()),
            PktLine::data(format!("agent={agent}\n").into_bytes()),
            PktLine::Delimiter,
        ];
        for want in &self.wants {
            packs.push(PktLine::data(format!("want {want}\n").into_bytes()));
        }
        for have in &self.haves {
            packs.push(PktLine::data(format!("have {have}\n").into_bytes()));
        }
        if let Some(filter) = &self.filter {
            packs.push(PktLine::data(format!("filter {filter}\n").into_bytes()));
        }
        if self.no_progress {
            packs.push(PktLine::data(b"no-progress\n".to_vec()));
        }
        if self.thin_pack {
            packs.push(PktLine::data(b"thin-pack\n".to_vec()));
        }
        packs.push(PktLine::data(b"done\n".to_vec()));
        packs.push(PktLine::Flush);
        Ok(pkt_line::format_packs(&packs)?.freeze())
    }
}

/// Parsed fetch response: the reassembled pack stream plus any
/// `wanted-refs` section entries.
#[derive(Debug, Default)]
pub struct FetchResponse {
    pub pack: Bytes,
    pub wanted_refs: Vec<GitRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Acknowledgments,
    ShallowInfo,
    WantedRefs,
    PackfileUris,
    Packfile,
}

fn section_for(line: &[u8]) -> Option<Section> {
    match line {
        b"acknowledgments" => Some(Section::Acknowledgments),
        b"shallow-info" => Some(Section::ShallowInfo),
        b"wanted-refs" => Some(Section::WantedRefs),
        b"packfile-uris" => Some(Section::PackfileUris),
        b"packfile" => Some(Section::Packfile),
        _ => None,
    }
}

/// Walk the response sections and reassemble the pack stream from side-band
/// channel 1. Progress (channel 2) is logged; channel 3 terminates the
/// operation with a server error.
pub fn parse_fetch_response(mut body: Bytes) -> Result<FetchResponse, GitError> {
    let mut response = FetchResponse::default();
    let mut pack = BytesMut::new();
    let mut section: Option<Section> = None;

    while let Some(frame) = pkt_line::read_pkt_line(&mut body)? {
        let payload = match frame {
            PktLine::Data(payload) if !payload.is_empty() => payload,
            // Control frames end the current section; a delimiter simply
            // introduces the next section header line.
            _ => continue,
        };

        if section == Some(Section::Packfile) {
            match payload[0] {
                1 => pack.put(&payload[1..]),
                2 => {
                    tracing::debug!(
                        progress = %String::from_utf8_lossy(&payload[1..]).trim_end(),
                        "remote progress"
                    );
                }
                3 => {
                    return Err(GitError::Server {
                        kind: ServerErrorKind::Error,
                        message: String::from_utf8_lossy(&payload[1..]).trim_end().to_string(),
                    });
                }
                other => {
                    return Err(GitError::parse(
                        format!("unknown side-band channel {other}"),
                        &payload,
                    ));
                }
            }
            continue;
        }

        let line = trim_newline(&payload);
        if let Some(next) = section_for(line) {
            section = Some(next);
            continue;
        }

        match section {
            Some(Section::WantedRefs) => {
                response.wanted_refs.push(parse_ref_line(line)?);
            }
            // ACK/NAK/ready lines and shallow/uri info are irrelevant to the
            // stateless fetches this client issues.
            Some(Section::Acknowledgments)
            | Some(Section::ShallowInfo)
            | Some(Section::PackfileUris) => {}
            Some(Section::Packfile) => unreachable!("handled above"),
            None => pkt_line::check_error_packet(&payload)?,
        }
    }

    response.pack = pack.freeze();
    Ok(response)
}

/// Concatenate side-band channel-1 payloads from an already-decoded pkt-line
/// stream (used by receive-pack status parsing where the report itself is
/// wrapped in a side-band).
pub fn demux_sideband(frames: &[PktLine]) -> Result<Bytes, GitError> {
    let mut out = BytesMut::new();
    for frame in frames {
        let payload = match frame.payload() {
            Some(p) if !p.is_empty() => p,
            _ => continue,
        };
        match payload[0] {
            1 => out.put(&payload[1..]),
            2 => {
                tracing::debug!(
                    progress = %String::from_utf8_lossy(&payload[1..]).trim_end(),
                    "remote progress"
                );
            }
            3 => {
                return Err(GitError::Server {
                    kind: ServerErrorKind::Error,
                    message: String::from_utf8_lossy(&payload[1..]).trim_end().to_string(),
                });
            }
            _ => {
                // Not side-band wrapped after all; hand the payload back
                // unchanged so callers can fall through.
                out.put(&payload[..]);
            }
        }
    }
    Ok(out.freeze())
}

fn trim_newline(payload: &[u8]) -> &[u8] {
    match payload.last() {
        Some(b'\n') => &payload[..payload.len() - 1],
        _ => payload,
    }
}

/// Parse `<40-hex> <refname>` (wanted-refs and ls-refs share the shape).
pub(crate) fn parse_ref_line(line: &[u8]) -> Result<GitRef, GitError> {
    let text = std::str::from_utf8(line)
        .map_err(|_| GitError::parse("ref line is not UTF-8", line))?;
    let (hash, name) = text
        .split_once(' ')
        .ok_or_else(|| GitError::parse("ref line missing separator", line))?;
    Ok(GitRef {
        name: name.split_whitespace().next().unwrap_or(name).to_string(),
        hash: hash.parse()?,
    })
}
