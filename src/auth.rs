//! WS-Security UsernameToken digest authentication
//!
//! Every authenticated request carries a fresh nonce and a timestamp shifted
//! by the session's measured clock offset, so a device with a skewed clock
//! still accepts the digest.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use sha1::{Digest, Sha1};

/// Timestamp validity window advertised to the device
const EXPIRY_SECS: i64 = 10;

/// Device credentials for WS-Security signing
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    /// Absent password is treated as empty string when digesting
    pub password: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: Option<String>) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }
}

/// Generate the WS-Security header block for one request.
///
/// `clock_offset_ms` is device-clock minus local-clock, as measured during
/// bootstrap. Each call produces a fresh nonce and timestamps; blocks are
/// never reused.
pub fn security_header(clock_offset_ms: i64, credentials: &Credentials) -> String {
    let mut rng = rand::thread_rng();
    let nonce_bytes: [u8; 16] = rng.gen();
    let nonce_b64 =
        base64::Engine::encode(&base64::engine::general_purpose::STANDARD, nonce_bytes);

    let created_at = Utc::now() + ChronoDuration::milliseconds(clock_offset_ms);
    let expires_at = created_at + ChronoDuration::seconds(EXPIRY_SECS);
    let created = format_timestamp(&created_at);
    let expires = format_timestamp(&expires_at);

    let password = credentials.password.as_deref().unwrap_or("");

    // PasswordDigest = Base64(SHA1(nonce + created + password))
    let mut hasher = Sha1::new();
    hasher.update(nonce_bytes);
    hasher.update(created.as_bytes());
    hasher.update(password.as_bytes());
    let digest = hasher.finalize();
    let digest_b64 = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, digest);

    format!(
        concat!(
            r#"<wsse:Security xmlns:wsse="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd" xmlns:wsu="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd">"#,
            "<wsse:UsernameToken>",
            "<wsse:Username>{username}</wsse:Username>",
            r#"<wsse:Password Type="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-username-token-profile-1.0#PasswordDigest">{digest}</wsse:Password>"#,
            r#"<wsse:Nonce EncodingType="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-soap-message-security-1.0#Base64Binary">{nonce}</wsse:Nonce>"#,
            "<wsu:Created>{created}</wsu:Created>",
            "</wsse:UsernameToken>",
            "<wsu:Timestamp>",
            "<wsu:Created>{created}</wsu:Created>",
            "<wsu:Expires>{expires}</wsu:Expires>",
            "</wsu:Timestamp>",
            "</wsse:Security>",
        ),
        username = xml_escape(&credentials.username),
        digest = digest_b64,
        nonce = nonce_b64,
        created = created,
        expires = expires,
    )
}

/// Digest computation alone, for deterministic verification given fixed inputs.
pub fn password_digest(nonce: &[u8], created: &str, password: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(nonce);
    hasher.update(created.as_bytes());
    hasher.update(password.as_bytes());
    base64::Engine::encode(&base64::engine::general_purpose::STANDARD, hasher.finalize())
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

pub(crate) fn xml_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_deterministic() {
        let nonce = b"0123456789abcdef";
        let a = password_digest(nonce, "2024-01-01T00:00:00.000Z", "secret");
        let b = password_digest(nonce, "2024-01-01T00:00:00.000Z", "secret");
        assert_eq!(a, b);
    }

    #[test]
    fn test_digest_sensitive_to_every_input() {
        let nonce = b"0123456789abcdef";
        let base = password_digest(nonce, "2024-01-01T00:00:00.000Z", "secret");
        assert_ne!(
            base,
            password_digest(b"fedcba9876543210", "2024-01-01T00:00:00.000Z", "secret")
        );
        assert_ne!(
            base,
            password_digest(nonce, "2024-01-01T00:00:01.000Z", "secret")
        );
        assert_ne!(
            base,
            password_digest(nonce, "2024-01-01T00:00:00.000Z", "Secret")
        );
    }

    #[test]
    fn test_fresh_nonce_per_header() {
        let creds = Credentials::new("admin", Some("pw".to_string()));
        let mut seen = std::collections::HashSet::new();
        for _ in 0..64 {
            let header = security_header(0, &creds);
            let nonce = header
                .split("Base64Binary\">")
                .nth(1)
                .and_then(|s| s.split('<').next())
                .unwrap()
                .to_string();
            assert!(seen.insert(nonce), "nonce repeated");
        }
    }

    #[test]
    fn test_missing_password_digests_empty_string() {
        let creds = Credentials::new("admin", None);
        let header = security_header(0, &creds);
        assert!(header.contains("<wsse:Username>admin</wsse:Username>"));
        assert!(header.contains("PasswordDigest"));
    }

    #[test]
    fn test_username_is_escaped() {
        let creds = Credentials::new("a<b&c", Some("pw".to_string()));
        let header = security_header(0, &creds);
        assert!(header.contains("<wsse:Username>a&lt;b&amp;c</wsse:Username>"));
    }

    #[test]
    fn test_clock_offset_shifts_created() {
        let creds = Credentials::new("admin", Some("pw".to_string()));
        // One hour ahead: Created must not be the local hour.
        let local_hour = Utc::now().format("%Y-%m-%dT%H").to_string();
        let header = security_header(3_600_000, &creds);
        let created = header
            .split("<wsu:Created>")
            .nth(1)
            .and_then(|s| s.split('<').next())
            .unwrap();
        assert!(!created.starts_with(&local_hour));
    }
}
