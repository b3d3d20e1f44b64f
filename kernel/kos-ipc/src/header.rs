//! The request channel's structured header, per spec.md §6: "a structured
//! header (key/value map, encoded in a stable text format) optionally
//! followed by a body."
//!
//! Encoded the same way `kos-cap`'s shadow-file lines are: a flat,
//! deterministic plain-text format rather than JSON, so the wire format has
//! no external schema dependency. Keys and values may not contain `=` or
//! `\n`; callers base64-free this by construction (correlation ids, session
//! ids, and entity names are all plain identifiers in practice).

use std::collections::BTreeMap;

use kos_core::error::{KError, KResult};

/// Encodes `header` as `key=value` lines sorted by key, terminated by a
/// blank line separating it from the body.
#[must_use]
pub fn encode_header(header: &BTreeMap<String, String>) -> Vec<u8> {
    let mut text = String::new();
    for (key, value) in header {
        text.push_str(key);
        text.push('=');
        text.push_str(value);
        text.push('\n');
    }
    text.push('\n');
    text.into_bytes()
}

/// Splits `payload` into its header map and the remaining body bytes.
///
/// # Errors
/// Returns [`KError::InvalidArgument`] if no blank-line terminator is found
/// or a header line is missing `=`.
pub fn decode_header(payload: &[u8]) -> KResult<(BTreeMap<String, String>, &[u8])> {
    let terminator = payload
        .windows(2)
        .position(|w| w == b"\n\n")
        .ok_or(KError::InvalidArgument)?;
    let text = std::str::from_utf8(&payload[..terminator]).map_err(|_| KError::InvalidArgument)?;
    let mut header = BTreeMap::new();
    for line in text.split('\n').filter(|l| !l.is_empty()) {
        let (key, value) = line.split_once('=').ok_or(KError::InvalidArgument)?;
        header.insert(key.to_string(), value.to_string());
    }
    Ok((header, &payload[terminator + 2..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrips_with_body() {
        let mut header = BTreeMap::new();
        header.insert("correlation_id".to_string(), "42".to_string());
        header.insert("session_id".to_string(), "abc123".to_string());
        let mut payload = encode_header(&header);
        payload.extend_from_slice(b"body bytes");
        let (decoded, body) = decode_header(&payload).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(body, b"body bytes");
    }

    #[test]
    fn empty_header_has_only_body() {
        let header = BTreeMap::new();
        let mut payload = encode_header(&header);
        payload.extend_from_slice(b"x");
        let (decoded, body) = decode_header(&payload).unwrap();
        assert!(decoded.is_empty());
        assert_eq!(body, b"x");
    }

    #[test]
    fn missing_terminator_is_rejected() {
        let err = decode_header(b"key=value").unwrap_err();
        assert_eq!(err, KError::InvalidArgument);
    }
}
