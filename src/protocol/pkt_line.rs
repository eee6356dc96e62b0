//! The pkt-line codec: Git's 4-hex-digit length-prefixed framing unit,
//! including the special control packets and the in-band error packets
//! servers weave into otherwise healthy responses.
//!
//! The decoder stops at the first error packet and surfaces it as a
//! structured [`GitError`] so callers never have to scan payloads themselves.

use bytes::{BufMut, Bytes, BytesMut};

use crate::errors::{GitError, ServerErrorKind};

/// Maximum payload bytes in one data packet (65520 minus the length prefix).
pub const MAX_PKT_DATA: usize = 65516;

/// Flush-packet: section/message terminator.
pub const FLUSH_PKT: &[u8; 4] = b"0000";
/// Delimiter between v2 request/response sections.
pub const DELIM_PKT: &[u8; 4] = b"0001";
/// Response-end packet.
pub const RESPONSE_END_PKT: &[u8; 4] = b"0002";

/// One decoded pkt-line frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PktLine {
    /// `0000`
    Flush,
    /// `0001`
    Delimiter,
    /// `0002`
    ResponseEnd,
    /// A data packet's payload (possibly empty for the tolerated `0004`).
    Data(Bytes),
}

impl PktLine {
    /// Convenience constructor for data frames.
    pub fn data(payload: impl Into<Bytes>) -> PktLine {
        PktLine::Data(payload.into())
    }

    /// Data payload, if this is a data frame.
    pub fn payload(&self) -> Option<&Bytes> {
        match self {
            PktLine::Data(b) => Some(b),
            _ => None,
        }
    }
}

/// Read one frame off the front of `bytes`, consuming it.
///
/// Returns `Ok(None)` when the buffer holds only a partial frame (nothing is
/// consumed in that case). Reserved `0003` and empty `0004` frames are
/// consumed and surface as `Data` with an empty payload, which downstream
/// iteration skips.
pub fn read_pkt_line(bytes: &mut Bytes) -> Result<Option<PktLine>, GitError> {
    if bytes.len() < 4 {
        return Ok(None);
    }

    let prefix = &bytes[..4];
    let declared = match std::str::from_utf8(prefix)
        .ok()
        .and_then(|s| usize::from_str_radix(s, 16).ok())
    {
        Some(len) => len,
        None => return Err(GitError::parse("invalid pkt-line length prefix", bytes)),
    };

    match declared {
        0 => {
            let _ = bytes.split_to(4);
            Ok(Some(PktLine::Flush))
        }
        1 => {
            let _ = bytes.split_to(4);
            Ok(Some(PktLine::Delimiter))
        }
        2 => {
            let _ = bytes.split_to(4);
            Ok(Some(PktLine::ResponseEnd))
        }
        3 | 4 => {
            // 0003 is reserved, 0004 is an empty packet senders must not
            // emit; both are consumed and yield no payload.
            let _ = bytes.split_to(4);
            Ok(Some(PktLine::Data(Bytes::new())))
        }
        len if len > MAX_PKT_DATA + 4 => {
            Err(GitError::parse(format!("pkt-line length {len} exceeds the maximum"), bytes))
        }
        len => {
            if bytes.len() < len {
                return Ok(None);
            }
            let mut frame = bytes.split_to(len);
            let payload = frame.split_off(4);
            Ok(Some(PktLine::Data(payload)))
        }
    }
}

/// All data payloads from a buffer, plus any trailing partial-frame bytes.
#[derive(Debug, Default)]
pub struct Decoded {
    /// Data payloads in order. Control frames are recorded separately.
    pub frames: Vec<PktLine>,
    /// Bytes after the last complete frame.
    pub remainder: Bytes,
}

impl Decoded {
    /// Only the data payloads, skipping control frames and empty packets.
    pub fn payloads(&self) -> impl Iterator<Item = &Bytes> {
        self.frames
            .iter()
            .filter_map(|f| f.payload())
            .filter(|p| !p.is_empty())
    }
}

/// Decode every complete frame in `input`, stopping with a structured error
/// at the first in-band error packet:
///
/// - `ERR <msg>` → [`GitError::Server`] with kind `ERR`
/// - `error: <msg>` / `fatal: <msg>` (optionally behind a side-band byte) →
///   [`GitError::Server`]; if the message mentions `unpack` it becomes
///   [`GitError::Unpack`]
/// - `ng <ref> <reason>` → [`GitError::RefUpdate`]
/// - `unpack <status>` with a non-`ok` status → [`GitError::Unpack`]
///   (`unpack ok` is an ordinary data line)
pub fn decode(mut input: Bytes) -> Result<Decoded, GitError> {
    let mut out = Decoded::default();

    while let Some(frame) = read_pkt_line(&mut input)? {
        if let PktLine::Data(payload) = &frame {
            check_error_packet(payload)?;
        }
        out.frames.push(frame);
    }
    out.remainder = input;
    Ok(out)
}

/// Inspect one payload for the error forms servers send in-band.
pub fn check_error_packet(payload: &Bytes) -> Result<(), GitError> {
    // `error:`/`fatal:` may arrive on the error side-band channel.
    let line = match payload.first().copied() {
        Some(1..=3) => &payload[1..],
        _ => &payload[..],
    };
    let text = |msg: &[u8]| String::from_utf8_lossy(msg).trim_end().to_string();

    if let Some(msg) = line.strip_prefix(b"ERR ") {
        return Err(GitError::Server {
            kind: ServerErrorKind::Err,
            message: text(msg),
        });
    }
    for (prefix, kind) in [
        (b"error:".as_slice(), ServerErrorKind::Error),
        (b"fatal:".as_slice(), ServerErrorKind::Fatal),
    ] {
        if let Some(msg) = line.strip_prefix(prefix) {
            let message = text(msg);
            if message.contains("unpack") {
                return Err(GitError::Unpack(message));
            }
            return Err(GitError::Server { kind, message });
        }
    }
    if let Some(rest) = line.strip_prefix(b"ng ") {
        let rest = text(rest);
        let (refname, reason) = rest.split_once(' ').unwrap_or((rest.as_str(), ""));
        return Err(GitError::RefUpdate {
            refname: refname.to_string(),
            reason: reason.to_string(),
        });
    }
    if let Some(status) = line.strip_prefix(b"unpack ") {
        let status = text(status);
        if status != "ok" {
            return Err(GitError::Unpack(status));
        }
    }
    Ok(())
}

/// Append one data frame, rejecting oversized payloads.
pub fn add_pkt_line(out: &mut BytesMut, payload: &[u8]) -> Result<(), GitError> {
    if payload.len() > MAX_PKT_DATA {
        return Err(GitError::DataTooLarge(payload.len()));
    }
    out.put(format!("{:04x}", payload.len() + 4).as_bytes());
    out.put(payload);
    Ok(())
}

/// Append one data frame from a string.
pub fn add_pkt_line_string(out: &mut BytesMut, line: &str) -> Result<(), GitError> {
    add_pkt_line(out, line.as_bytes())
}

/// Marshal a sequence of frames. If the sequence does not already end with a
/// flush-packet, exactly one is appended.
pub fn format_packs(packs: &[PktLine]) -> Result<BytesMut, GitError> {
    let mut out = BytesMut::new();
    for pack in packs {
        match pack {
            PktLine::Flush => out.put(&FLUSH_PKT[..]),
            PktLine::Delimiter => out.put(&DELIM_PKT[..]),
            PktLine::ResponseEnd => out.put(&RESPONSE_END_PKT[..]),
            PktLine::Data(payload) => {
                // senders must not emit the empty 0004 frame
                if !payload.is_empty() {
                    add_pkt_line(&mut out, payload)?;
                }
            }
        }
    }
    if !matches!(packs.last(), Some(PktLine::Flush)) {
        out.put(&FLUSH_PKT[..]);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Encode then decode returns the same payloads.
    #[test]
    fn test_round_trip() {
        let payloads = [b"command=ls-refs\n".as_slice(), b"peel\n", b""];
        let packs: Vec<PktLine> = payloads.iter().map(|p| PktLine::data(p.to_vec())).collect();
        let encoded = format_packs(&packs).unwrap();

        // the empty payload is dropped by the encoder: 0004 never appears
        assert!(!encoded.windows(4).any(|w| w == b"0004"));

        let decoded = decode(encoded.freeze()).unwrap();
        let got: Vec<&[u8]> = decoded.payloads().map(|b| b.as_ref()).collect();
        assert_eq!(got, vec![b"command=ls-refs\n".as_slice(), b"peel\n"]);
        assert!(matches!(decoded.frames.last(), Some(PktLine::Flush)));
    }

    /// A flush is appended iff the input does not already end with one.
    #[test]
    fn test_auto_flush() {
        let once = format_packs(&[PktLine::data(b"x".to_vec())]).unwrap();
        assert!(once.ends_with(b"0000"));

        let explicit = format_packs(&[PktLine::data(b"x".to_vec()), PktLine::Flush]).unwrap();
        assert_eq!(once, explicit);
    }

    /// Control packets decode to their variants; 0003/0004 are skipped.
    #[test]
    fn test_control_packets() {
        let mut input = Bytes::from_static(b"000000010002");
        assert_eq!(read_pkt_line(&mut input).unwrap(), Some(PktLine::Flush));
        assert_eq!(read_pkt_line(&mut input).unwrap(), Some(PktLine::Delimiter));
        assert_eq!(read_pkt_line(&mut input).unwrap(), Some(PktLine::ResponseEnd));
        assert_eq!(read_pkt_line(&mut input).unwrap(), None);

        let decoded = decode(Bytes::from_static(b"0003xyz")).unwrap();
        // reserved 0003 consumed, no payload; "xyz" is a trailing partial frame
        assert_eq!(decoded.payloads().count(), 0);
        assert_eq!(decoded.remainder.as_ref(), b"xyz");

        let decoded = decode(Bytes::from_static(b"00040008data")).unwrap();
        let got: Vec<&[u8]> = decoded.payloads().map(|b| b.as_ref()).collect();
        assert_eq!(got, vec![b"data".as_slice()]);
    }

    /// `ERR` packets become structured server errors.
    #[test]
    fn test_err_packet() {
        let err = decode(Bytes::from_static(b"000cERR boom")).unwrap_err();
        match err {
            GitError::Server { kind, message } => {
                assert_eq!(kind, ServerErrorKind::Err);
                assert_eq!(message, "boom");
            }
            other => panic!("expected server error, got {other}"),
        }
    }

    /// `ng` packets carry the refname and reason.
    #[test]
    fn test_ng_packet() {
        let err = decode(Bytes::from_static(b"0017ng refs/heads/x bad")).unwrap_err();
        match err {
            GitError::RefUpdate { refname, reason } => {
                assert_eq!(refname, "refs/heads/x");
                assert_eq!(reason, "bad");
            }
            other => panic!("expected ref update error, got {other}"),
        }
    }

    /// `unpack ok` passes through; any other unpack status is an error.
    #[test]
    fn test_unpack_status() {
        let ok = decode(Bytes::from_static(b"000eunpack ok\n")).unwrap();
        assert_eq!(ok.payloads().count(), 1);

        let err = decode(Bytes::from_static(b"001aunpack index-pack died")).unwrap_err();
        assert!(matches!(err, GitError::Unpack(_)));
    }

    /// `fatal:` behind a side-band error byte is still detected.
    #[test]
    fn test_sideband_fatal() {
        let mut raw = BytesMut::new();
        let mut payload = vec![3u8];
        payload.extend_from_slice(b"fatal: the remote end hung up");
        add_pkt_line(&mut raw, &payload).unwrap();
        let err = decode(raw.freeze()).unwrap_err();
        assert!(matches!(
            err,
            GitError::Server {
                kind: ServerErrorKind::Fatal,
                ..
            }
        ));
    }

    /// Oversized payloads are refused at encode time.
    #[test]
    fn test_data_too_large() {
        let mut out = BytesMut::new();
        let big = vec![0u8; MAX_PKT_DATA + 1];
        let err = add_pkt_line(&mut out, &big).unwrap_err();
        assert!(matches!(err, GitError::DataTooLarge(n) if n == MAX_PKT_DATA + 1));

        // exactly at the limit is fine
        let max = vec![0u8; MAX_PKT_DATA];
        add_pkt_line(&mut out, &max).unwrap();
    }

    quickcheck::quickcheck! {
        // Frame-level round trip for arbitrary payloads within bounds.
        fn qc_frame_round_trip(payload: Vec<u8>) -> bool {
            if payload.is_empty() || payload.len() > MAX_PKT_DATA {
                return true;
            }
            let mut out = BytesMut::new();
            add_pkt_line(&mut out, &payload).unwrap();
            let mut bytes = out.freeze();
            match read_pkt_line(&mut bytes) {
                Ok(Some(PktLine::Data(p))) => p == payload && bytes.is_empty(),
                _ => false,
            }
        }
    }

    /// Malformed hex length prefixes are parse errors, partial frames are not.
    #[test]
    fn test_malformed_and_partial() {
        let err = decode(Bytes::from_static(b"zzzzpayload")).unwrap_err();
        assert!(matches!(err, GitError::Parse { .. }));

        // a truncated data frame leaves a remainder instead of failing
        let decoded = decode(Bytes::from_static(b"0010shor")).unwrap();
        assert_eq!(decoded.frames.len(), 0);
        assert_eq!(decoded.remainder.as_ref(), b"0010shor");
    }
}
