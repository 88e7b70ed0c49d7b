//! Coverage server configuration

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3001";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address for the coverage protocol
    pub listen_addr: String,

    /// Admin HTTP listen address (health checks + metrics); disabled when unset
    pub admin_addr: Option<String>,

    /// Close connections whose request preamble is not `01 C0 C0 10 07`
    pub validate_preamble: bool,

    /// Value written on every `TN:` line of the tracefile
    pub test_name: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

impl ServerConfig {
    /// Build a config from an environment-like lookup, falling back to
    /// defaults for anything missing or unparsable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            listen_addr: lookup("COVPULL_LISTEN").unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string()),
            admin_addr: lookup("COVPULL_ADMIN_LISTEN").filter(|s| !s.is_empty()),
            validate_preamble: lookup("COVPULL_VALIDATE_PREAMBLE")
                .and_then(|s| parse_bool(&s))
                .unwrap_or(true),
            test_name: lookup("COVPULL_TEST_NAME").filter(|s| !s.is_empty()),
        }
    }

    /// Same as `Default`, but listening on `addr`.
    pub fn with_listen_addr(addr: impl Into<String>) -> Self {
        Self {
            listen_addr: addr.into(),
            ..Self::default()
        }
    }

    pub fn listen_socket_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listen_addr
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid listen address {:?}: {}", self.listen_addr, e))
    }

    pub fn admin_socket_addr(&self) -> anyhow::Result<Option<SocketAddr>> {
        self.admin_addr
            .as_deref()
            .map(|a| {
                a.parse()
                    .map_err(|e| anyhow::anyhow!("Invalid admin address {:?}: {}", a, e))
            })
            .transpose()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let listen = self.listen_socket_addr()?;

        if let Some(admin) = self.admin_socket_addr()? {
            if admin == listen && listen.port() != 0 {
                anyhow::bail!("Admin address must differ from the listen address ({})", listen);
            }
        }

        if let Some(name) = &self.test_name {
            if name.contains('\n') {
                anyhow::bail!("Test name must be a single line");
            }
        }

        Ok(())
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_environment() {
        let config = ServerConfig::from_lookup(|_| None);
        assert_eq!(config.listen_addr, "0.0.0.0:3001");
        assert_eq!(config.admin_addr, None);
        assert!(config.validate_preamble);
        assert_eq!(config.test_name, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_environment_overrides() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("COVPULL_LISTEN", "127.0.0.1:4000"),
            ("COVPULL_ADMIN_LISTEN", "127.0.0.1:9090"),
            ("COVPULL_VALIDATE_PREAMBLE", "off"),
            ("COVPULL_TEST_NAME", "fuzz"),
        ]));
        assert_eq!(config.listen_addr, "127.0.0.1:4000");
        assert_eq!(config.admin_addr.as_deref(), Some("127.0.0.1:9090"));
        assert!(!config.validate_preamble);
        assert_eq!(config.test_name.as_deref(), Some("fuzz"));
    }

    #[test]
    fn test_unparsable_flag_keeps_default() {
        let config = ServerConfig::from_lookup(lookup_from(&[("COVPULL_VALIDATE_PREAMBLE", "maybe")]));
        assert!(config.validate_preamble);
    }

    #[test]
    fn test_validate_rejects_bad_addresses() {
        let config = ServerConfig {
            listen_addr: "not-an-address".to_string(),
            admin_addr: None,
            validate_preamble: true,
            test_name: None,
        };
        assert!(config.validate().is_err());

        let config = ServerConfig {
            listen_addr: "127.0.0.1:3001".to_string(),
            admin_addr: Some("127.0.0.1:3001".to_string()),
            validate_preamble: true,
            test_name: None,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_multiline_test_name() {
        let config = ServerConfig {
            listen_addr: "127.0.0.1:0".to_string(),
            admin_addr: None,
            validate_preamble: true,
            test_name: Some("a\nSF:/etc/passwd".to_string()),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serde_round_trip() {
        let config = ServerConfig::from_lookup(|_| None);
        let json = serde_json::to_string(&config).unwrap();
        let back: ServerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
