//! Author/committer/tagger identity lines. The wire form is
//! `<role> <name> <email> <unix-seconds> <±HHMM>`; the timezone string is
//! kept verbatim so serialization is byte-exact.

use std::fmt::Display;

use bstr::ByteSlice;
use chrono::{DateTime, FixedOffset, TimeZone};
use serde::{Deserialize, Serialize};

use crate::errors::GitError;

/// The role a signature line plays inside a commit or tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureType {
    Author,
    Committer,
    Tagger,
}

impl Display for SignatureType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            SignatureType::Author => write!(f, "author"),
            SignatureType::Committer => write!(f, "committer"),
            SignatureType::Tagger => write!(f, "tagger"),
        }
    }
}

impl SignatureType {
    pub fn from_data(data: &[u8]) -> Result<SignatureType, GitError> {
        match data {
            b"author" => Ok(SignatureType::Author),
            b"committer" => Ok(SignatureType::Committer),
            b"tagger" => Ok(SignatureType::Tagger),
            _ => Err(GitError::InvalidSignature(
                String::from_utf8_lossy(data).to_string(),
            )),
        }
    }
}

/// One identity line: who, when, and in which timezone.
///
/// `timestamp` is unix seconds; `timezone` is the raw `±HHMM` string from the
/// wire (kept as-is so a parse/serialize round trip reproduces the input).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub signature_type: SignatureType,
    pub name: String,
    pub email: String,
    pub timestamp: i64,
    pub timezone: String,
}

impl Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} {}", self.signature_type, self.value())
    }
}

impl Signature {
    /// Build a signature stamped with the current time in UTC.
    pub fn new(signature_type: SignatureType, name: String, email: String) -> Signature {
        Signature {
            signature_type,
            name,
            email,
            timestamp: chrono::Utc::now().timestamp(),
            timezone: "+0000".to_string(),
        }
    }

    /// The line without its role prefix: `<name> <<email>> <unix> <±HHMM>`.
    pub fn value(&self) -> String {
        format!(
            "{} <{}> {} {}",
            self.name, self.email, self.timestamp, self.timezone
        )
    }

    /// Timezone offset in seconds east of UTC, derived from the `±HHMM` field.
    pub fn tz_offset_seconds(&self) -> i32 {
        let tz = self.timezone.as_bytes();
        if tz.len() != 5 {
            return 0;
        }
        let sign = if tz[0] == b'-' { -1 } else { 1 };
        let hours = self.timezone[1..3].parse::<i32>().unwrap_or(0);
        let minutes = self.timezone[3..5].parse::<i32>().unwrap_or(0);
        sign * (hours * 3600 + minutes * 60)
    }

    /// The timestamp as a zoned `chrono` instant.
    pub fn when(&self) -> DateTime<FixedOffset> {
        let offset = FixedOffset::east_opt(self.tz_offset_seconds())
            .unwrap_or_else(|| FixedOffset::east_opt(0).unwrap());
        offset
            .timestamp_opt(self.timestamp, 0)
            .single()
            .unwrap_or_else(|| offset.timestamp_opt(0, 0).unwrap())
    }

    /// Parse a full signature line, e.g.
    /// `author Eli Ma <eli@patchwork.dev> 1678118339 +0800`.
    pub fn from_data(data: Vec<u8>) -> Result<Signature, GitError> {
        let invalid = || GitError::InvalidSignature(String::from_utf8_lossy(&data).to_string());

        let role_end = data.find_byte(b' ').ok_or_else(invalid)?;
        let signature_type = SignatureType::from_data(&data[..role_end])?;
        let rest = &data[role_end + 1..];

        // Email markers bound the name on the left and the timestamps on the right.
        let email_start = rest.find_byte(b'<').ok_or_else(invalid)?;
        let email_end = rest.find_byte(b'>').ok_or_else(invalid)?;
        if email_end < email_start {
            return Err(invalid());
        }

        let name = rest[..email_start]
            .trim_with(|c| c == ' ')
            .to_str()
            .map_err(|_| invalid())?
            .to_string();
        let email = rest[email_start + 1..email_end]
            .to_str()
            .map_err(|_| invalid())?
            .to_string();

        let tail = rest[email_end + 1..].trim_with(|c| c == ' ' || c == '\n');
        let mut fields = tail.split_str(" ");
        let timestamp = fields
            .next()
            .and_then(|f| f.to_str().ok())
            .and_then(|f| f.parse::<i64>().ok())
            .ok_or_else(invalid)?;
        let timezone = fields
            .next()
            .and_then(|f| f.to_str().ok())
            .unwrap_or("+0000")
            .to_string();

        Ok(Signature {
            signature_type,
            name,
            email,
            timestamp,
            timezone,
        })
    }

    /// Serialize back to the wire form.
    pub fn to_data(&self) -> Result<Vec<u8>, GitError> {
        Ok(self.to_string().into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A signature line parses into its parts and serializes byte-identically.
    #[test]
    fn test_round_trip() {
        let line = b"author Eli Ma <eli@patchwork.dev> 1678118339 +0800".to_vec();
        let sig = Signature::from_data(line.clone()).unwrap();
        assert_eq!(sig.signature_type, SignatureType::Author);
        assert_eq!(sig.name, "Eli Ma");
        assert_eq!(sig.email, "eli@patchwork.dev");
        assert_eq!(sig.timestamp, 1678118339);
        assert_eq!(sig.timezone, "+0800");
        assert_eq!(sig.to_data().unwrap(), line);
    }

    /// Negative timezone offsets are preserved and converted correctly.
    #[test]
    fn test_negative_timezone() {
        let sig =
            Signature::from_data(b"committer A B <a@b.c> 1700000000 -0730".to_vec()).unwrap();
        assert_eq!(sig.timezone, "-0730");
        assert_eq!(sig.tz_offset_seconds(), -(7 * 3600 + 30 * 60));
        assert_eq!(sig.when().timestamp(), 1700000000);
    }

    /// Empty names are legal in Git; the email markers carry the structure.
    #[test]
    fn test_empty_name() {
        let sig = Signature::from_data(b"tagger  <x@y.z> 1 +0000".to_vec()).unwrap();
        assert_eq!(sig.name, "");
        assert_eq!(sig.email, "x@y.z");
    }

    /// Lines missing the email markers are rejected.
    #[test]
    fn test_invalid_lines() {
        assert!(Signature::from_data(b"author no email here 1 +0000".to_vec()).is_err());
        assert!(Signature::from_data(b"reviewer A <a@b.c> 1 +0000".to_vec()).is_err());
        assert!(Signature::from_data(b"author A <a@b.c> notanumber +0000".to_vec()).is_err());
    }
}
