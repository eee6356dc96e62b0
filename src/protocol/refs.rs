//! Reference operations: `ls-refs` advertisement parsing and ref
//! create/update/delete via empty-pack receive-pack requests.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::{
    errors::GitError,
    hash::ObjectHash,
    internal::pack::encode::empty_pack,
    protocol::{
        fetch::demux_sideband,
        pkt_line::{self, PktLine},
    },
};

/// A named reference as advertised by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitRef {
    /// Full name, e.g. `refs/heads/main`, or the literal `HEAD`.
    pub name: String,
    pub hash: ObjectHash,
}

/// Capabilities requested on every receive-pack command line.
const RECEIVE_CAPS: &str = "report-status-v2 side-band-64k quiet object-format=sha1";

/// Build the `command=ls-refs` request body.
pub fn build_ls_refs_request() -> Result<Bytes, GitError> {
    let packs = [
        PktLine::data(b"command=ls-refs\n".to_vec()),
        PktLine::data(b"object-format=sha1\n".to_vec()),
        PktLine::Flush,
    ];
    Ok(pkt_line::format_packs(&packs)?.freeze())
}

/// Parse an `ls-refs` response into refs, preserving server advertisement
/// order.
///
/// Each line is `<hash> <refname>[ attributes…]`. A `HEAD` line carrying a
/// `symref-target:<target>` (or `symref=HEAD:<target>`) attribute is
/// normalized to the target name; a bare `HEAD` line is kept as-is so
/// clients can still resolve it when the target is absent from the
/// advertisement.
pub fn parse_ls_refs_response(body: Bytes) -> Result<Vec<GitRef>, GitError> {
    let decoded = pkt_line::decode(body)?;
    let mut refs = Vec::new();

    for payload in decoded.payloads() {
        let line = match payload.last() {
            Some(b'\n') => &payload[..payload.len() - 1],
            _ => &payload[..],
        };
        // Service announcements from info/refs bodies are not ref lines.
        if line.starts_with(b"# service=") || line == b"version 2" {
            continue;
        }

        let text = std::str::from_utf8(line)
            .map_err(|_| GitError::parse("ref line is not UTF-8", line))?;
        let mut fields = text.split(' ');
        let (hash, name) = match (fields.next(), fields.next()) {
            (Some(hash), Some(name)) => (hash, name),
            _ => return Err(GitError::parse("ref line missing name", line)),
        };

        let mut name = name.to_string();
        for attr in fields {
            if let Some(target) = attr.strip_prefix("symref-target:") {
                name = target.to_string();
            } else if let Some(rest) = attr.strip_prefix("symref=") {
                if let Some((_, target)) = rest.split_once(':') {
                    name = target.to_string();
                }
            }
        }

        refs.push(GitRef {
            name,
            hash: hash.parse()?,
        });
    }

    Ok(refs)
}

/// Build a receive-pack body updating one ref without pushing objects:
/// the command line, a flush, the 32-byte empty pack, and a final flush.
///
/// Old/new hash conventions: create uses a zero old hash, delete a zero new
/// hash, update the verified current hash.
pub fn build_ref_update_request(
    old: ObjectHash,
    new: ObjectHash,
    refname: &str,
    agent: &str,
) -> Result<Bytes, GitError> {
    let mut body = BytesMut::new();
    pkt_line::add_pkt_line_string(
        &mut body,
        &format!("{old} {new} {refname}\0{RECEIVE_CAPS} agent={agent}\n"),
    )?;
    body.put(&pkt_line::FLUSH_PKT[..]);
    body.put(empty_pack().as_slice());
    body.put(&pkt_line::FLUSH_PKT[..]);
    Ok(body.freeze())
}

/// Parse a receive-pack status report, requiring both `unpack ok` and
/// `ok <refname>`.
///
/// With `side-band-64k` negotiated the report-status stream arrives wrapped
/// in channel-1 payloads; unwrapped replies are accepted too. Per-ref
/// failures (`ng`) and unpack failures surface from the pkt decoder as
/// structured errors.
pub fn parse_receive_pack_response(body: Bytes, refname: &str) -> Result<(), GitError> {
    let outer = pkt_line::decode(body)?;

    // If payloads look side-band wrapped, reassemble channel 1 and decode
    // the inner report.
    let wrapped = outer
        .payloads()
        .next()
        .map(|p| matches!(p.first().copied(), Some(1..=3)))
        .unwrap_or(false);
    let frames = if wrapped {
        pkt_line::decode(demux_sideband(&outer.frames)?)?.frames
    } else {
        outer.frames
    };

    let mut unpack_ok = false;
    let mut ref_ok = false;
    for frame in &frames {
        let Some(payload) = frame.payload() else {
            continue;
        };
        let line = String::from_utf8_lossy(payload);
        let line = line.trim_end();
        if line == "unpack ok" {
            unpack_ok = true;
        } else if line == format!("ok {refname}") {
            ref_ok = true;
        }
    }

    if !unpack_ok {
        return Err(GitError::Unpack("server reported no unpack status".to_string()));
    }
    if !ref_ok {
        return Err(GitError::RefUpdate {
            refname: refname.to_string(),
            reason: "server did not acknowledge the update".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkt(lines: &[&str]) -> Bytes {
        let mut out = BytesMut::new();
        for line in lines {
            pkt_line::add_pkt_line_string(&mut out, line).unwrap();
        }
        out.put(&pkt_line::FLUSH_PKT[..]);
        out.freeze()
    }

    /// Refs parse in server order; `HEAD` stays literal without a symref.
    #[test]
    fn test_parse_ls_refs() {
        let h1 = ObjectHash::new(b"1");
        let h2 = ObjectHash::new(b"2");
        let body = pkt(&[
            &format!("{h1} HEAD\n"),
            &format!("{h1} refs/heads/main\n"),
            &format!("{h2} refs/heads/dev\n"),
        ]);
        let refs = parse_ls_refs_response(body).unwrap();
        assert_eq!(
            refs.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(),
            vec!["HEAD", "refs/heads/main", "refs/heads/dev"]
        );
        assert_eq!(refs[0].hash, h1);
        assert_eq!(refs[2].hash, h2);
    }

    /// A symref-target attribute rewrites HEAD to its target name.
    #[test]
    fn test_symref_normalization() {
        let h = ObjectHash::new(b"tip");
        let body = pkt(&[&format!("{h} HEAD symref-target:refs/heads/main\n")]);
        let refs = parse_ls_refs_response(body).unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].name, "refs/heads/main");
        assert_eq!(refs[0].hash, h);

        let body = pkt(&[&format!("{h} HEAD symref=HEAD:refs/heads/trunk\n")]);
        let refs = parse_ls_refs_response(body).unwrap();
        assert_eq!(refs[0].name, "refs/heads/trunk");
    }

    /// ls-refs request carries the v2 command and object format.
    #[test]
    fn test_ls_refs_request_shape() {
        let body = build_ls_refs_request().unwrap();
        let text = String::from_utf8_lossy(&body);
        assert!(text.contains("command=ls-refs\n"));
        assert!(text.contains("object-format=sha1\n"));
        assert!(text.ends_with("0000"));
    }

    /// The update request embeds command line, caps, and the empty pack.
    #[test]
    fn test_ref_update_request_shape() {
        let new = ObjectHash::new(b"new");
        let body =
            build_ref_update_request(ObjectHash::ZERO, new, "refs/heads/tmp", "nanogit/0.1.0")
                .unwrap();

        let text = String::from_utf8_lossy(&body);
        assert!(text.contains(&format!("{} {new} refs/heads/tmp\0", ObjectHash::ZERO)));
        assert!(text.contains("report-status-v2"));
        assert!(text.contains("agent=nanogit/0.1.0"));
        // empty pack sits between the two flushes
        let pack_pos = body
            .windows(4)
            .position(|w| w == b"PACK")
            .expect("embedded empty pack");
        assert_eq!(&body[pack_pos..pack_pos + 12], &empty_pack()[..12]);
        assert!(body.ends_with(b"0000"));
    }

    /// Plain (non-side-band) status reports are accepted.
    #[test]
    fn test_parse_plain_status() {
        let body = pkt(&["unpack ok\n", "ok refs/heads/main\n"]);
        parse_receive_pack_response(body, "refs/heads/main").unwrap();
    }

    /// Side-band wrapped status reports are unwrapped then verified.
    #[test]
    fn test_parse_sideband_status() {
        let mut inner = BytesMut::new();
        pkt_line::add_pkt_line_string(&mut inner, "unpack ok\n").unwrap();
        pkt_line::add_pkt_line_string(&mut inner, "ok refs/heads/main\n").unwrap();
        inner.put(&pkt_line::FLUSH_PKT[..]);

        let mut outer = BytesMut::new();
        let mut wrapped = vec![1u8];
        wrapped.extend_from_slice(&inner);
        pkt_line::add_pkt_line(&mut outer, &wrapped).unwrap();
        outer.put(&pkt_line::FLUSH_PKT[..]);

        parse_receive_pack_response(outer.freeze(), "refs/heads/main").unwrap();
    }

    /// Missing `ok <ref>` acknowledgment is an update failure.
    #[test]
    fn test_missing_ref_ack() {
        let body = pkt(&["unpack ok\n"]);
        let err = parse_receive_pack_response(body, "refs/heads/main").unwrap_err();
        assert!(matches!(err, GitError::RefUpdate { .. }));
    }

    /// `ng` lines surface the refname and reason.
    #[test]
    fn test_ng_line() {
        let body = pkt(&["unpack ok\n", "ng refs/heads/main non-fast-forward\n"]);
        let err = parse_receive_pack_response(body, "refs/heads/main").unwrap_err();
        match err {
            GitError::RefUpdate { refname, reason } => {
                assert_eq!(refname, "refs/heads/main");
                assert_eq!(reason, "non-fast-forward");
            }
            other => panic!("expected ref update error, got {other}"),
        }
    }
}
