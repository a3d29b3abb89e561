use md5::{Digest, Md5};

use crate::error::{ProxyError, Result};

/// Protocol constant: appended to the raw UUID bytes before hashing to
/// derive a user's command key. Must match byte-for-byte across
/// implementations for interoperability.
const COMMAND_KEY_SALT: &[u8] = b"c48619fe-8f02-49e0-b9e9-edf763e17e21";

/// Hex-digit run lengths of a canonical UUID's five dash-separated groups.
const BYTE_GROUPS: [usize; 5] = [8, 4, 4, 4, 12];

/// A parsed user identity: 16 raw UUID bytes plus the derived command key.
/// Immutable after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserId {
    uuid_bytes: [u8; 16],
    command_key: [u8; 16],
}

impl UserId {
    /// Parse a textual UUID (with or without dashes) into a `UserId`.
    /// Rejects any input with fewer than 32 hex digits.
    pub fn parse(text: &str) -> Result<Self> {
        let uuid_bytes = uuid_to_bytes(text)?;
        let command_key = derive_command_key(&uuid_bytes);
        Ok(Self { uuid_bytes, command_key })
    }

    pub fn uuid_bytes(&self) -> &[u8; 16] {
        &self.uuid_bytes
    }

    pub fn command_key(&self) -> &[u8; 16] {
        &self.command_key
    }
}

fn derive_command_key(uuid_bytes: &[u8; 16]) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(uuid_bytes);
    hasher.update(COMMAND_KEY_SALT);
    let digest = hasher.finalize();
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest);
    out
}

fn hex_nibble(byte: u8) -> Result<u8> {
    match byte {
        b'0'..=b'9' => Ok(byte - b'0'),
        b'a'..=b'f' => Ok(byte - b'a' + 10),
        b'A'..=b'F' => Ok(byte - b'A' + 10),
        other => Err(ProxyError::Config(format!("invalid hex digit: {:#x}", other))),
    }
}

/// Parse a UUID string into its 16 raw bytes, tolerating dashes anywhere
/// (mirrors the reference implementation's group-based parser rather than
/// requiring dashes in the canonical positions). Works over raw bytes
/// throughout so a non-ASCII `id` string is rejected with `ProxyError::Config`
/// instead of panicking on a split UTF-8 boundary.
fn uuid_to_bytes(text: &str) -> Result<[u8; 16]> {
    let hex: Vec<u8> = text.bytes().filter(|b| *b != b'-').collect();
    if hex.len() < 32 {
        return Err(ProxyError::Config(format!(
            "uuid too short: {} hex digits, need 32",
            hex.len()
        )));
    }
    let mut out = [0u8; 16];
    let mut cursor = 0usize;
    let mut byte_idx = 0usize;
    for group_len in BYTE_GROUPS {
        let group = &hex[cursor..cursor + group_len];
        for pair in group.chunks(2) {
            if pair.len() < 2 {
                return Err(ProxyError::Config("malformed uuid group".into()));
            }
            let byte = (hex_nibble(pair[0])? << 4) | hex_nibble(pair[1])?;
            out[byte_idx] = byte;
            byte_idx += 1;
        }
        cursor += group_len;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn uuid_round_trip() {
        let id = UserId::parse("2418d087-648d-4990-86e8-19dca1d006d3").unwrap();
        assert_eq!(
            *id.uuid_bytes(),
            [
                0x24, 0x18, 0xd0, 0x87, 0x64, 0x8d, 0x49, 0x90, 0x86, 0xe8, 0x19, 0xdc, 0xa1,
                0xd0, 0x06, 0xd3
            ]
        );
    }

    #[test]
    fn rejects_short_input() {
        assert!(UserId::parse("2418d087-648d-4990-86e8-19dca1d006").is_err());
    }

    #[test]
    fn rejects_non_hex_bytes_without_panicking() {
        let err = UserId::parse("2418d087-648d-4990-86e8-19dca1d006€3").unwrap_err();
        assert!(matches!(err, ProxyError::Config(_)));
    }

    #[test]
    fn command_key_is_deterministic() {
        let a = UserId::parse("2418d087-648d-4990-86e8-19dca1d006d3").unwrap();
        let b = UserId::parse("2418d087648d499086e819dca1d006d3").unwrap();
        assert_eq!(a.command_key(), b.command_key());
    }
}
