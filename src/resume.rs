//! Resume token decoding
//!
//! A receiver whose last receive was interrupted reports a resume token for
//! the partially received dataset. The storage layer describes the token as
//! an nvlist listing (`key = value` lines); the planner extracts the GUID
//! fields and the diagnostic target name and treats the rest — and the raw
//! token itself — as opaque.

use crate::error::{Error, Result};

/// Decoded form of a receiver-reported resume token.
///
/// If present, the receiver holds a partially received `to` dataset and its
/// storage layer will refuse any send that does not match these GUIDs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumeToken {
    pub has_from_guid: bool,
    pub from_guid: u64,
    pub has_to_guid: bool,
    pub to_guid: u64,
    /// Fully qualified target name; diagnostics only
    pub to_name: String,
}

impl ResumeToken {
    /// Decode a token listing.
    ///
    /// Unknown keys are skipped; a listing without a `toguid` is malformed,
    /// because the planner cannot locate the resume target without it.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut token = ResumeToken::default();
        let mut saw_any = false;

        for line in raw.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();

            match key {
                "fromguid" => {
                    token.from_guid = parse_guid(key, value)?;
                    token.has_from_guid = true;
                    saw_any = true;
                }
                "toguid" => {
                    token.to_guid = parse_guid(key, value)?;
                    token.has_to_guid = true;
                    saw_any = true;
                }
                "toname" => {
                    token.to_name = value.to_string();
                    saw_any = true;
                }
                _ => {}
            }
        }

        if !saw_any {
            return Err(Error::resume_token("no recognizable fields in token"));
        }
        if !token.has_to_guid {
            return Err(Error::resume_token("token carries no toguid"));
        }
        Ok(token)
    }
}

fn parse_guid(key: &str, value: &str) -> Result<u64> {
    let parsed = match value.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse::<u64>(),
    };
    parsed.map_err(|_| Error::resume_token(format!("cannot parse {key} value {value:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_SEND: &str = "\
resume token contents:
nvlist version: 0
	object = 0x2
	offset = 0x4c0000
	bytes = 0x4e4228
	toguid = 0x52f9c212c71e60cd
	toname = zroot/test/a@1
";

    const INCREMENTAL_SEND: &str = "\
resume token contents:
nvlist version: 0
	fromguid = 0x52f9c212c71e60cd
	object = 0x2
	offset = 0x4c0000
	bytes = 0x4e3ef0
	toguid = 0xcfae0ae671723c16
	toname = zroot/test/a@2
";

    #[test]
    fn test_parse_full_send_token() {
        let token = ResumeToken::parse(FULL_SEND).unwrap();
        assert!(!token.has_from_guid);
        assert!(token.has_to_guid);
        assert_eq!(token.to_guid, 0x52f9c212c71e60cd);
        assert_eq!(token.to_name, "zroot/test/a@1");
    }

    #[test]
    fn test_parse_incremental_token() {
        let token = ResumeToken::parse(INCREMENTAL_SEND).unwrap();
        assert!(token.has_from_guid);
        assert_eq!(token.from_guid, 0x52f9c212c71e60cd);
        assert_eq!(token.to_guid, 0xcfae0ae671723c16);
        assert_eq!(token.to_name, "zroot/test/a@2");
    }

    #[test]
    fn test_decimal_guids_accepted() {
        let token = ResumeToken::parse("toguid = 12345\ntoname = tank/x@s").unwrap();
        assert_eq!(token.to_guid, 12345);
    }

    #[test]
    fn test_missing_toguid_is_malformed() {
        let err = ResumeToken::parse("fromguid = 0x1\ntoname = tank/x@s").unwrap_err();
        assert!(matches!(err, Error::ResumeToken { .. }));
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert!(ResumeToken::parse("1-9baebea70-b8-789c636064").is_err());
        assert!(ResumeToken::parse("").is_err());
    }

    #[test]
    fn test_bad_guid_value_is_malformed() {
        assert!(ResumeToken::parse("toguid = zzz").is_err());
    }
}
