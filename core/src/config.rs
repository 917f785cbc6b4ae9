//! Transport configuration.
//!
//! Every field has a default, so a JSON document only needs to name what it
//! overrides. Cookie handling is not configurable: every handle gets the
//! client's jar.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_USER_AGENT: &str = concat!("session-core/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Sent on every request unless the descriptor sets `User-Agent`.
    pub user_agent: String,
    pub timeout_secs: u64,
    /// Handle-level redirect following. The explicit 302 chase in
    /// `HttpTransport::execute` runs regardless of this flag.
    pub follow_redirects: bool,
    pub max_redirects: usize,
    /// Charset used to decode text bodies that declare none.
    pub default_charset: String,
    /// Initial proxy URI; `None` connects directly.
    pub proxy: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_secs: 60,
            follow_redirects: true,
            max_redirects: 10,
            default_charset: "utf-8".to_string(),
            proxy: None,
        }
    }
}

impl TransportConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = TransportConfig::default();
        assert_eq!(config.timeout(), Duration::from_secs(60));
        assert!(config.follow_redirects);
        assert_eq!(config.max_redirects, 10);
        assert_eq!(config.default_charset, "utf-8");
        assert!(config.user_agent.starts_with("session-core/"));
        assert!(config.proxy.is_none());
    }

    #[test]
    fn partial_json_keeps_other_defaults() {
        let config =
            TransportConfig::from_json_str(r#"{"timeout_secs":5,"proxy":"http://127.0.0.1:8080"}"#)
                .unwrap();
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert_eq!(config.proxy.as_deref(), Some("http://127.0.0.1:8080"));
        assert!(config.follow_redirects);
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
    }

    #[test]
    fn empty_object_is_default() {
        assert_eq!(TransportConfig::from_json_str("{}").unwrap(), TransportConfig::default());
    }

    #[test]
    fn wrong_field_type_is_rejected() {
        let err = TransportConfig::from_json_str(r#"{"timeout_secs":"soon"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
