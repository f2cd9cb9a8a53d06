//! Accept-URI authorization token.
//!
//! Clients pass `authorization=<base64("useragent:access_key")>` as a query
//! parameter on the connect URL (or the same token in an `authorization`
//! header). The transport collaborator extracts the token; this module
//! decodes it.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::{ProtocolError, Result};

/// Decode an authorization token into `(useragent, access_key)`.
pub fn decode_auth(token: &str) -> Result<(String, String)> {
    let raw = STANDARD
        .decode(token.trim())
        .map_err(|e| ProtocolError::BadAuthToken(e.to_string()))?;
    let decoded = String::from_utf8(raw)
        .map_err(|e| ProtocolError::BadAuthToken(e.to_string()))?;
    let (useragent, key) = decoded
        .split_once(':')
        .ok_or_else(|| ProtocolError::BadAuthToken("missing ':' separator".into()))?;
    if useragent.is_empty() || key.is_empty() {
        return Err(ProtocolError::BadAuthToken("empty useragent or key".into()));
    }
    Ok((useragent.to_string(), key.to_string()))
}

/// Encode an authorization token, the inverse of [`decode_auth`].
pub fn encode_auth(useragent: &str, key: &str) -> String {
    STANDARD.encode(format!("{useragent}:{key}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let token = encode_auth("JarbasVoiceTerminal", "secret-key-1");
        let (useragent, key) = decode_auth(&token).expect("decode");
        assert_eq!(useragent, "JarbasVoiceTerminal");
        assert_eq!(key, "secret-key-1");
    }

    #[test]
    fn test_key_may_contain_colons() {
        let token = encode_auth("agent", "a:b:c");
        let (useragent, key) = decode_auth(&token).expect("decode");
        assert_eq!(useragent, "agent");
        assert_eq!(key, "a:b:c");
    }

    #[test]
    fn test_rejects_bad_tokens() {
        assert!(decode_auth("!!!not-base64!!!").is_err());
        assert!(decode_auth(&STANDARD.encode("no-separator")).is_err());
        assert!(decode_auth(&STANDARD.encode(":empty-agent")).is_err());
    }
}
