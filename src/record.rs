//! Change records: the structured description of one routing rule
//!
//! A record names its target either with a `url` (also accepted as `target`)
//! or with a literal `host`/`port` pair. Normalization derives host and port
//! from the URL so the template only ever reads `host` and `port`.

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use url::Url;

/// Longest identifier accepted; identifiers become file names
pub const MAX_IDENTIFIER_LEN: usize = 255;

/// Rejections produced while validating an inbound change request
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("identifier must not be empty")]
    EmptyIdentifier,

    #[error("invalid identifier '{identifier}': {reason}")]
    InvalidIdentifier {
        identifier: String,
        reason: &'static str,
    },

    #[error("identifier '{found}' does not match '{expected}'; identifiers cannot be changed")]
    IdentifierMismatch { expected: String, found: String },

    #[error("one of url, host or port must be set")]
    MissingTarget,

    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("url '{url}' has no host")]
    UrlWithoutHost { url: String },

    #[error("invalid port '{port}': expected a number between 0 and 65535")]
    InvalidPort { port: String },
}

/// A routing rule as submitted by a caller and persisted to disk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Storage key; required on create, taken from the caller on replace
    #[serde(default)]
    pub identifier: String,

    /// Upstream URL; when set, `host` and `port` are derived from it
    #[serde(default, alias = "target", skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Upstream host (parsed out of `url` if that is set)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Upstream port (parsed out of `url` if that is set)
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_port"
    )]
    pub port: Option<String>,
}

impl ChangeRecord {
    /// Record targeting a URL
    pub fn with_url(identifier: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            url: Some(url.into()),
            ..Default::default()
        }
    }

    /// Record targeting a literal host and optional port
    pub fn with_host(identifier: impl Into<String>, host: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            identifier: identifier.into(),
            host: Some(host.into()),
            port: port.map(|p| p.to_string()),
            ..Default::default()
        }
    }

    /// Derive `host`/`port` from `url` when one is given, otherwise check the
    /// literal pair, of which at least one half must be set. Running it a
    /// second time changes nothing.
    pub fn normalize(&mut self) -> Result<(), ValidationError> {
        clear_if_empty(&mut self.url);
        clear_if_empty(&mut self.host);
        clear_if_empty(&mut self.port);

        if let Some(raw) = &self.url {
            let parsed = Url::parse(raw).map_err(|e| ValidationError::InvalidUrl {
                url: raw.clone(),
                reason: e.to_string(),
            })?;
            let host = parsed
                .host_str()
                .filter(|h| !h.is_empty())
                .ok_or_else(|| ValidationError::UrlWithoutHost { url: raw.clone() })?;

            self.host = Some(host.to_string());
            self.port = if has_explicit_port(raw) {
                parsed.port_or_known_default().map(|p| p.to_string())
            } else {
                None
            };
            return Ok(());
        }

        if self.host.is_none() && self.port.is_none() {
            return Err(ValidationError::MissingTarget);
        }

        if let Some(port) = &self.port {
            if port.parse::<u16>().is_err() {
                return Err(ValidationError::InvalidPort { port: port.clone() });
            }
        }

        Ok(())
    }

    /// Pin the record to the identifier the caller addressed. An empty body
    /// identifier is filled in; a different one is rejected.
    pub fn bind_identifier(&mut self, identifier: &str) -> Result<(), ValidationError> {
        if self.identifier.is_empty() {
            self.identifier = identifier.to_string();
            return Ok(());
        }
        if self.identifier != identifier {
            return Err(ValidationError::IdentifierMismatch {
                expected: identifier.to_string(),
                found: self.identifier.clone(),
            });
        }
        Ok(())
    }
}

/// Check that an identifier is usable as a file name inside the config directory
pub fn validate_identifier(identifier: &str) -> Result<(), ValidationError> {
    let invalid = |reason| ValidationError::InvalidIdentifier {
        identifier: identifier.to_string(),
        reason,
    };

    if identifier.is_empty() {
        return Err(ValidationError::EmptyIdentifier);
    }
    if identifier.len() > MAX_IDENTIFIER_LEN {
        return Err(invalid("longer than 255 bytes"));
    }
    if identifier == "." || identifier == ".." {
        return Err(invalid("reserved path component"));
    }
    if identifier.contains(['/', '\\', '\0']) {
        return Err(invalid("contains a path separator or NUL byte"));
    }
    Ok(())
}

/// Whether the authority of `raw` spells out a port. `Url::port` hides a
/// port equal to the scheme default, but `http://h:80` still names port 80.
fn has_explicit_port(raw: &str) -> bool {
    let Some((_, rest)) = raw.split_once("://") else {
        return false;
    };
    let authority = rest.split(['/', '?', '#']).next().unwrap_or("");
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, hp)| hp);
    let after_host = match host_port.rfind(']') {
        Some(end) => &host_port[end + 1..],
        None => host_port,
    };
    after_host
        .rsplit_once(':')
        .is_some_and(|(_, port)| !port.is_empty())
}

fn clear_if_empty(field: &mut Option<String>) {
    if field.as_deref().is_some_and(str::is_empty) {
        *field = None;
    }
}

/// Ports arrive either as JSON strings or numbers
fn deserialize_port<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PortValue {
        Text(String),
        Number(u64),
    }

    Ok(Option::<PortValue>::deserialize(deserializer)?.map(|value| match value {
        PortValue::Text(s) => s,
        PortValue::Number(n) => n.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_derives_host_and_port_from_url() {
        let mut record = ChangeRecord::with_url("app1", "http://svc.local:9090");
        record.normalize().unwrap();

        assert_eq!(record.host.as_deref(), Some("svc.local"));
        assert_eq!(record.port.as_deref(), Some("9090"));
        assert_eq!(record.url.as_deref(), Some("http://svc.local:9090"));
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let mut once = ChangeRecord::with_url("app1", "https://api.example.com:8443/v1");
        once.normalize().unwrap();
        let mut twice = once.clone();
        twice.normalize().unwrap();

        assert_eq!(once, twice);
    }

    #[test]
    fn test_url_overrides_literal_host_and_port() {
        let mut record = ChangeRecord {
            identifier: "app1".to_string(),
            url: Some("http://real.local:7000".to_string()),
            host: Some("stale.local".to_string()),
            port: Some("1".to_string()),
        };
        record.normalize().unwrap();

        assert_eq!(record.host.as_deref(), Some("real.local"));
        assert_eq!(record.port.as_deref(), Some("7000"));
    }

    #[test]
    fn test_url_without_explicit_port_leaves_port_empty() {
        let mut record = ChangeRecord::with_url("app1", "http://svc.local/");
        record.normalize().unwrap();

        assert_eq!(record.host.as_deref(), Some("svc.local"));
        assert_eq!(record.port, None);
    }

    #[test]
    fn test_url_with_scheme_default_port_keeps_it() {
        let mut http = ChangeRecord::with_url("app1", "http://svc.local:80");
        http.normalize().unwrap();
        assert_eq!(http.host.as_deref(), Some("svc.local"));
        assert_eq!(http.port.as_deref(), Some("80"));

        let mut https = ChangeRecord::with_url("app1", "https://x:443/health");
        https.normalize().unwrap();
        assert_eq!(https.port.as_deref(), Some("443"));

        let mut ipv6 = ChangeRecord::with_url("app1", "http://user:pw@[::1]:80/");
        ipv6.normalize().unwrap();
        assert_eq!(ipv6.host.as_deref(), Some("[::1]"));
        assert_eq!(ipv6.port.as_deref(), Some("80"));

        let mut bare_ipv6 = ChangeRecord::with_url("app1", "http://[::1]/");
        bare_ipv6.normalize().unwrap();
        assert_eq!(bare_ipv6.port, None);
    }

    #[test]
    fn test_default_port_renders_into_proxy_pass() {
        let renderer = crate::render::Renderer::from_source(include_str!("../default-template.tmpl")).unwrap();
        let mut record = ChangeRecord::with_url("app1", "http://svc.local:80");
        record.normalize().unwrap();

        let out = String::from_utf8(renderer.render(&record).unwrap()).unwrap();
        assert!(!out.contains("svc.local:;"));
        assert!(out.contains("svc.local:80"));
    }

    #[test]
    fn test_port_without_host_is_accepted() {
        let mut record = ChangeRecord {
            identifier: "app1".to_string(),
            port: Some("8080".to_string()),
            ..Default::default()
        };
        record.normalize().unwrap();
        assert_eq!(record.host, None);
        assert_eq!(record.port.as_deref(), Some("8080"));

        let mut bad = ChangeRecord {
            identifier: "app1".to_string(),
            port: Some("99999".to_string()),
            ..Default::default()
        };
        assert!(matches!(bad.normalize(), Err(ValidationError::InvalidPort { .. })));
    }

    #[test]
    fn test_literal_host_and_port_are_kept() {
        let mut record = ChangeRecord::with_host("app1", "10.0.0.5", Some(8080));
        record.normalize().unwrap();

        assert_eq!(record.host.as_deref(), Some("10.0.0.5"));
        assert_eq!(record.port.as_deref(), Some("8080"));
        assert_eq!(record.url, None);
    }

    #[test]
    fn test_normalize_rejects_bad_targets() {
        let mut unparseable = ChangeRecord::with_url("app1", "http://[::1");
        assert!(matches!(
            unparseable.normalize(),
            Err(ValidationError::InvalidUrl { .. })
        ));

        let mut hostless = ChangeRecord::with_url("app1", "mailto:ops@example.com");
        assert!(matches!(
            hostless.normalize(),
            Err(ValidationError::UrlWithoutHost { .. })
        ));

        let mut missing = ChangeRecord {
            identifier: "app1".to_string(),
            url: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(missing.normalize(), Err(ValidationError::MissingTarget));

        let mut bad_port = ChangeRecord {
            identifier: "app1".to_string(),
            host: Some("svc".to_string()),
            port: Some("http".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            bad_port.normalize(),
            Err(ValidationError::InvalidPort { .. })
        ));
    }

    #[test]
    fn test_deserialize_accepts_target_alias_and_numeric_port() {
        let record: ChangeRecord =
            serde_json::from_str(r#"{"identifier":"a","target":"http://x:1"}"#).unwrap();
        assert_eq!(record.url.as_deref(), Some("http://x:1"));

        let record: ChangeRecord =
            serde_json::from_str(r#"{"identifier":"a","host":"x","port":8080}"#).unwrap();
        assert_eq!(record.port.as_deref(), Some("8080"));

        let record: ChangeRecord = serde_json::from_str(r#"{"host":"x","port":null}"#).unwrap();
        assert_eq!(record.port, None);
        assert_eq!(record.identifier, "");
    }

    #[test]
    fn test_serialize_skips_unset_fields() {
        let record = ChangeRecord::with_host("a", "x", None);
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"identifier":"a","host":"x"}"#);
    }

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("app1").is_ok());
        assert!(validate_identifier("my.site-01_x").is_ok());
        assert_eq!(validate_identifier(""), Err(ValidationError::EmptyIdentifier));
        assert!(validate_identifier("..").is_err());
        assert!(validate_identifier("../etc/passwd").is_err());
        assert!(validate_identifier("a\\b").is_err());
        assert!(validate_identifier(&"x".repeat(256)).is_err());
    }

    #[test]
    fn test_bind_identifier() {
        let mut record = ChangeRecord::with_host("", "x", None);
        record.bind_identifier("app1").unwrap();
        assert_eq!(record.identifier, "app1");

        record.bind_identifier("app1").unwrap();
        assert!(matches!(
            record.bind_identifier("app2"),
            Err(ValidationError::IdentifierMismatch { .. })
        ));
    }
}
