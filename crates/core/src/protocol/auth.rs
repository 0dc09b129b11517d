//! Basic authentication (RFC 2617 §2) for the `rtsp` realm.

use base64::{engine::general_purpose::STANDARD, Engine as _};

/// Challenge sent with every 401.
pub const WWW_AUTHENTICATE: &str = "Basic realm=\"rtsp\"";

/// Decoded credentials from an `Authorization: Basic ...` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Decode a Basic Authorization header value.
///
/// Returns `None` for a different scheme, undecodable base64, non-UTF-8
/// content, or a payload without the `user:pass` colon.
pub fn parse_basic(header: &str) -> Option<Credentials> {
    let encoded = header.trim().strip_prefix("Basic ").or_else(|| {
        header.trim().strip_prefix("basic ")
    })?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (username, password) = text.split_once(':')?;
    Some(Credentials {
        username: username.to_string(),
        password: password.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_user_and_password() {
        // "user:pass"
        let creds = parse_basic("Basic dXNlcjpwYXNz").unwrap();
        assert_eq!(creds.username, "user");
        assert_eq!(creds.password, "pass");
    }

    #[test]
    fn password_may_contain_colons() {
        // "u:p:q"
        let creds = parse_basic("Basic dTpwOnE=").unwrap();
        assert_eq!(creds.username, "u");
        assert_eq!(creds.password, "p:q");
    }

    #[test]
    fn rejects_other_schemes() {
        assert!(parse_basic("Digest nonce=abc").is_none());
    }

    #[test]
    fn rejects_bad_base64() {
        assert!(parse_basic("Basic !!!not-base64!!!").is_none());
    }

    #[test]
    fn rejects_payload_without_colon() {
        // "useronly"
        assert!(parse_basic("Basic dXNlcm9ubHk=").is_none());
    }
}
