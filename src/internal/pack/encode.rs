//! Pack stream writer for pushes. Every object is written as a full base
//! entry (no deltas): header varint, zlib-deflated content, and a trailing
//! SHA-1 over everything written before it. Receive-pack accepts undeltified
//! packs from any client, and staged pushes are small enough not to care.

use std::io::Write;

use flate2::{Compression, write::ZlibEncoder};
use sha1::{Digest, Sha1};

use crate::{
    errors::GitError,
    hash::ObjectHash,
    internal::pack::{PACK_MAGIC, PACK_VERSION, entry::Entry},
};

/// Append the pack entry header for `(type, size)`: 3 type bits and a size
/// varint packed into the Git continuation scheme (low 4 size bits in the
/// first byte, 7 bits per byte after).
fn push_entry_header(out: &mut Vec<u8>, type_id: u8, mut size: usize) {
    let mut byte = (type_id << 4) | (size & 0x0f) as u8;
    size >>= 4;
    while size > 0 {
        out.push(byte | 0x80);
        byte = (size & 0x7f) as u8;
        size >>= 7;
    }
    out.push(byte);
}

/// Serialize entries into a complete pack stream.
///
/// The trailer is the SHA-1 of all preceding bytes, which is also returned
/// for callers that want to log or index the pack.
pub fn encode_pack(entries: &[Entry]) -> Result<(Vec<u8>, ObjectHash), GitError> {
    let mut out = Vec::new();
    out.extend_from_slice(PACK_MAGIC);
    out.extend_from_slice(&PACK_VERSION.to_be_bytes());
    out.extend_from_slice(&(entries.len() as u32).to_be_bytes());

    for entry in entries {
        push_entry_header(&mut out, entry.obj_type.to_u8(), entry.data.len());
        let mut encoder = ZlibEncoder::new(&mut out, Compression::default());
        encoder.write_all(&entry.data)?;
        encoder.finish()?;
    }

    let digest: [u8; 20] = Sha1::digest(&out).into();
    let signature = ObjectHash(digest);
    out.extend_from_slice(&signature.0);
    Ok((out, signature))
}

/// The 32-byte pack containing zero objects, used by ref create/update/delete
/// requests that carry no new objects.
pub fn empty_pack() -> Vec<u8> {
    let (pack, _) = encode_pack(&[]).expect("empty pack never fails");
    pack
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::object::{blob::Blob, types::ObjectType};

    /// The zero-object pack is exactly 32 bytes with the documented trailer.
    #[test]
    fn test_empty_pack() {
        let pack = empty_pack();
        assert_eq!(pack.len(), 32);
        assert_eq!(&pack[..4], b"PACK");
        assert_eq!(&pack[4..8], &2u32.to_be_bytes());
        assert_eq!(&pack[8..12], &0u32.to_be_bytes());
        // sha1 of the 12 header bytes
        assert_eq!(
            hex::encode(&pack[12..]),
            "029d08823bd8a8eab510ad6ac75c823cfd3ed31e"
        );
    }

    /// The trailer equals the SHA-1 of everything before it.
    #[test]
    fn test_trailer_is_hash_of_body() {
        let entries = vec![
            Entry::from(Blob::from_content("one")),
            Entry::from(Blob::from_content("two")),
        ];
        let (pack, signature) = encode_pack(&entries).unwrap();
        let body = &pack[..pack.len() - 20];
        assert_eq!(ObjectHash::new(body), signature);
        assert_eq!(&pack[pack.len() - 20..], signature.as_ref());
    }

    /// Entry headers encode type and size across continuation bytes.
    #[test]
    fn test_entry_header_encoding() {
        // size 5 fits the first byte: no continuation
        let mut small = Vec::new();
        push_entry_header(&mut small, ObjectType::Blob.to_u8(), 5);
        assert_eq!(small, vec![0b0011_0101]);

        // size 300 = 0b1_0010_1100: low 4 bits (0b1100) first, then 0b1_0010
        let mut big = Vec::new();
        push_entry_header(&mut big, ObjectType::Blob.to_u8(), 300);
        assert_eq!(big, vec![0b1011_1100, 0b0001_0010]);
    }

    /// Object count lands in the header.
    #[test]
    fn test_object_count() {
        let entries = vec![Entry::from(Blob::from_content("x"))];
        let (pack, _) = encode_pack(&entries).unwrap();
        assert_eq!(&pack[8..12], &1u32.to_be_bytes());
    }
}
