//! The Tag object is an annotated tag: a named, optionally signed pointer at
//! another object (almost always a commit) with its own tagger and message.
//!
//! Wire form: `object`, `type`, `tag`, optional `tagger`, blank line, message.

use std::fmt::Display;
use std::str::FromStr;

use bstr::ByteSlice;
use serde::{Deserialize, Serialize};

use crate::{
    errors::GitError,
    hash::ObjectHash,
    internal::object::{ObjectTrait, signature::Signature, types::ObjectType},
};

/// An annotated tag.
#[derive(Eq, Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub id: ObjectHash,
    pub object_id: ObjectHash,
    pub object_type: ObjectType,
    pub tag_name: String,
    pub tagger: Option<Signature>,
    pub message: String,
}

impl PartialEq for Tag {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "object {}", self.object_id)?;
        writeln!(f, "type {}", self.object_type)?;
        writeln!(f, "tag {}", self.tag_name)?;
        if let Some(tagger) = &self.tagger {
            writeln!(f, "tagger {tagger}")?;
        }
        writeln!(f)?;
        writeln!(f, "{}", self.message)
    }
}

impl Tag {
    pub fn new(
        object_id: ObjectHash,
        object_type: ObjectType,
        tag_name: String,
        tagger: Signature,
        message: &str,
    ) -> Tag {
        let mut tag = Tag {
            id: ObjectHash::ZERO,
            object_id,
            object_type,
            tag_name,
            tagger: Some(tagger),
            message: message.to_string(),
        };
        tag.id = ObjectHash::from_type_and_data(ObjectType::Tag, &tag.to_data().unwrap());
        tag
    }
}

impl ObjectTrait for Tag {
    fn from_bytes(data: &[u8], hash: ObjectHash) -> Result<Self, GitError> {
        let invalid = |what: &str| GitError::InvalidTagObject(what.to_string());

        let mut object_hash = None;
        let mut object_type = None;
        let mut tag_name = None;
        let mut tagger = None;
        let mut pos = 0;

        while pos < data.len() {
            if data[pos] == b'\n' {
                pos += 1;
                break;
            }
            let line_end = memchr::memchr(b'\n', &data[pos..])
                .map(|i| pos + i)
                .unwrap_or(data.len());
            let line = &data[pos..line_end];
            pos = (line_end + 1).min(data.len());

            let space = line.find_byte(b' ').ok_or_else(|| invalid("header line"))?;
            let value = &line[space + 1..];
            match &line[..space] {
                b"object" => {
                    object_hash = Some(ObjectHash::from_str(
                        value.to_str().map_err(|_| invalid("object hash"))?,
                    )?);
                }
                b"type" => {
                    object_type = Some(ObjectType::from_string(
                        value.to_str().map_err(|_| invalid("object type"))?,
                    )?);
                }
                b"tag" => {
                    tag_name = Some(
                        value
                            .to_str()
                            .map_err(|_| invalid("tag name"))?
                            .to_string(),
                    );
                }
                b"tagger" => {
                    tagger = Some(Signature::from_data(line.to_vec())?);
                }
                // Signed tags carry trailing PGP blocks; anything else is
                // left for the message body.
                _ => {}
            }
        }

        let message = String::from_utf8_lossy(&data[pos..]).into_owned();

        Ok(Tag {
            id: hash,
            object_id: object_hash.ok_or_else(|| invalid("missing object header"))?,
            object_type: object_type.ok_or_else(|| invalid("missing type header"))?,
            tag_name: tag_name.ok_or_else(|| invalid("missing tag header"))?,
            tagger,
            message,
        })
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Tag
    }

    fn get_size(&self) -> usize {
        0
    }

    fn to_data(&self) -> Result<Vec<u8>, GitError> {
        let mut data = Vec::new();
        data.extend(b"object ");
        data.extend(self.object_id.to_string().as_bytes());
        data.push(b'\n');
        data.extend(b"type ");
        data.extend(self.object_type.to_string().as_bytes());
        data.push(b'\n');
        data.extend(b"tag ");
        data.extend(self.tag_name.as_bytes());
        data.push(b'\n');
        if let Some(tagger) = &self.tagger {
            data.extend(tagger.to_data()?);
            data.push(b'\n');
        }
        data.push(b'\n');
        data.extend(self.message.as_bytes());
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::object::signature::SignatureType;

    /// A tag round-trips through serialize → parse with the same id.
    #[test]
    fn test_round_trip() {
        let tagger = Signature::from_data(
            b"tagger releaser <rel@example.com> 1700000000 +0000".to_vec(),
        )
        .unwrap();
        let target = ObjectHash::new(b"some commit");
        let tag = Tag::new(
            target,
            ObjectType::Commit,
            "v1.0.0".to_string(),
            tagger,
            "release v1.0.0\n",
        );

        let data = tag.to_data().unwrap();
        let parsed = Tag::from_bytes(&data, tag.id).unwrap();
        assert_eq!(parsed.object_id, target);
        assert_eq!(parsed.object_type, ObjectType::Commit);
        assert_eq!(parsed.tag_name, "v1.0.0");
        assert_eq!(parsed.tagger.as_ref().unwrap().signature_type, SignatureType::Tagger);
        assert_eq!(parsed.message, "release v1.0.0\n");
        assert_eq!(parsed.to_data().unwrap(), data);
        assert_eq!(parsed.object_hash().unwrap(), tag.id);
    }

    /// Lightweight-style tag bytes without a tagger still parse.
    #[test]
    fn test_no_tagger() {
        let raw = b"object 3b18e512dba79e4c8300dd08aeb37f8e728b8dad\ntype blob\ntag raw\n\nmsg\n";
        let tag = Tag::from_bytes(raw, ObjectHash::ZERO).unwrap();
        assert!(tag.tagger.is_none());
        assert_eq!(tag.object_type, ObjectType::Blob);
        assert_eq!(tag.to_data().unwrap(), raw.to_vec());
    }

    /// Tags missing mandatory headers are rejected.
    #[test]
    fn test_missing_headers() {
        assert!(Tag::from_bytes(b"type commit\ntag x\n\nm", ObjectHash::ZERO).is_err());
        assert!(
            Tag::from_bytes(
                b"object 3b18e512dba79e4c8300dd08aeb37f8e728b8dad\ntag x\n\nm",
                ObjectHash::ZERO
            )
            .is_err()
        );
    }
}
