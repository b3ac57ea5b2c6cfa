use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Raw settings loaded from `config.toml`.
#[derive(Debug, Deserialize, Default)]
struct TomlConfig {
    server_url: Option<String>,
    kv_store_path: Option<String>,
    origin_allowlist: Option<Vec<String>>,
    origin_allowed_suffixes: Option<Vec<String>>,
    rate_limit_per_sec: Option<u32>,
    rate_limit_burst: Option<u32>,
    /// `kid` -> PEM-encoded P-256 ECDSA public key (spec.md §4.2 `trustedKeys`).
    trusted_chain_roots: Option<HashMap<String, String>>,
}

/// The fixed candidate ports tried in order, per spec.md §3/§6.
pub const PORT_CANDIDATES: [u16; 6] = [12519, 40978, 52115, 22287, 60685, 22322];

/// Maximum allowed drift between a challenge's `Timestamp` and wall clock.
pub const CHALLENGE_WINDOW: Duration = Duration::from_secs(150);

/// Poll interval for the identity refresher (spec.md §4.6).
pub const IDENTITY_POLL_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Minimum elapsed time before the identity refresher re-queries osquery.
pub const IDENTITY_RECALCULATE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Timeout for a single osquery subprocess invocation.
pub const OSQUERY_TIMEOUT: Duration = Duration::from_secs(15);

/// Per-callback HTTP client timeout (spec.md §5).
pub const CALLBACK_CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on the outbound callback queue (spec.md §4.4, "≥ 256").
pub const CALLBACK_QUEUE_CAPACITY: usize = 256;

/// Total deadline for a universal-link fan-out (spec.md §4.9).
pub const UNIVERSAL_LINK_TIMEOUT: Duration = Duration::from_secs(40);

/// Shutdown grace period (spec.md §4.6).
pub const SHUTDOWN_GRACE: Duration = Duration::from_millis(100);

/// Process-wide, immutable server configuration (spec.md §3).
#[derive(Debug, Clone)]
pub struct Config {
    /// URL used to select a default key bundle (dev/review/prod), see `KeyStore`.
    pub server_url: String,
    /// Path to the on-disk KV store backing "dt4a info" and "config" buckets.
    pub kv_store_path: String,
    /// Closed set of allowed browser-extension origins (exact match).
    pub origin_allowlist: Vec<String>,
    /// Domain suffixes (no leading dot) whose origins are always allowed,
    /// e.g. `"kolide.com"` permits `https://app.kolide.com`
    /// (`domainMatchesBrandAllowedSuffixes`, spec.md §4.8).
    pub origin_allowed_suffixes: Vec<String>,
    pub rate_limit_per_sec: u32,
    pub rate_limit_burst: u32,
    pub read_timeout: Duration,
    pub read_header_timeout: Duration,
    pub write_timeout: Duration,
    pub max_header_bytes: usize,
    /// `kid` -> PEM-encoded P-256 ECDSA public key, the chain-of-trust roots
    /// `ChainValidator` indexes by `SignedBy` (spec.md §4.2).
    pub trusted_chain_roots: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: "https://k2.kolide.com".to_string(),
            kv_store_path: "localserver.db".to_string(),
            origin_allowlist: default_origin_allowlist(),
            origin_allowed_suffixes: default_origin_allowed_suffixes(),
            rate_limit_per_sec: 5,
            rate_limit_burst: 10,
            read_timeout: Duration::from_millis(500),
            read_header_timeout: Duration::from_millis(50),
            write_timeout: Duration::from_secs(30),
            max_header_bytes: 1024,
            trusted_chain_roots: HashMap::new(),
        }
    }
}

fn default_origin_allowlist() -> Vec<String> {
    vec![
        "chrome-extension://aleggnlehbiclcgojilbanaedaeihpmn".to_string(),
        "moz-extension://3a3cfd2a-6d89-4c0c-8820-eca0ff5afaca".to_string(),
    ]
}

fn default_origin_allowed_suffixes() -> Vec<String> {
    vec!["kolide.com".to_string()]
}

impl Config {
    /// Load configuration from `.env` and `config.toml`, overlaying defaults.
    ///
    /// Env supplies secrets/overrides, toml supplies settings, with
    /// validation before construction.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config_path = env::var("LOCALSERVER_CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
        let toml_config = if Path::new(&config_path).exists() {
            Self::load_toml(&config_path)?
        } else {
            TomlConfig::default()
        };

        let mut config = Config::default();

        if let Some(server_url) = toml_config.server_url {
            config.server_url = server_url;
        }
        if let Ok(server_url) = env::var("LOCALSERVER_URL") {
            config.server_url = server_url;
        }
        if let Some(path) = toml_config.kv_store_path {
            config.kv_store_path = path;
        }
        if let Some(allowlist) = toml_config.origin_allowlist {
            config.origin_allowlist = allowlist;
        }
        if let Some(suffixes) = toml_config.origin_allowed_suffixes {
            config.origin_allowed_suffixes = suffixes;
        }
        if let Some(rate) = toml_config.rate_limit_per_sec {
            config.rate_limit_per_sec = rate;
        }
        if let Some(burst) = toml_config.rate_limit_burst {
            config.rate_limit_burst = burst;
        }
        if let Some(roots) = toml_config.trusted_chain_roots {
            config.trusted_chain_roots = roots;
        }

        if config.server_url.is_empty() {
            return Err(ConfigError::Invalid("server_url cannot be empty".to_string()));
        }

        Ok(config)
    }

    fn load_toml(path: &str) -> Result<TomlConfig, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: TomlConfig = toml::from_str(&contents)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let config = Config::default();
        assert_eq!(config.rate_limit_per_sec, 5);
        assert_eq!(config.rate_limit_burst, 10);
        assert!(!config.server_url.is_empty());
    }

    #[test]
    fn port_candidates_match_spec() {
        assert_eq!(PORT_CANDIDATES, [12519, 40978, 52115, 22287, 60685, 22322]);
    }
}
