use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use std::{fs, path::PathBuf};
use tracing::debug;

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind: "127.0.0.1:5000".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub stock_ttl_secs: u64,
    pub crypto_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            stock_ttl_secs: 20,
            crypto_ttl_secs: 20,
        }
    }
}

impl CacheConfig {
    pub fn stock_ttl(&self) -> Duration {
        Duration::from_secs(self.stock_ttl_secs)
    }

    pub fn crypto_ttl(&self) -> Duration {
        Duration::from_secs(self.crypto_ttl_secs)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    pub crypto_limit: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        FetchConfig {
            timeout_secs: 15,
            crypto_limit: 200,
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct YahooProviderConfig {
    pub base_url: String,
}

/// A Binance-compatible exchange endpoint.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ExchangeConfig {
    pub base_url: String,
    #[serde(default = "default_exchange_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_exchange_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProvidersConfig {
    pub yahoo: Option<YahooProviderConfig>,
    #[serde(default = "default_exchanges")]
    pub exchanges: BTreeMap<String, ExchangeConfig>,
}

fn default_exchanges() -> BTreeMap<String, ExchangeConfig> {
    [
        ("binance", "https://api.binance.com"),
        ("binanceus", "https://api.binance.us"),
    ]
    .into_iter()
    .map(|(name, base_url)| {
        (
            name.to_string(),
            ExchangeConfig {
                base_url: base_url.to_string(),
                timeout_secs: default_exchange_timeout_secs(),
            },
        )
    })
    .collect()
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        ProvidersConfig {
            yahoo: Some(YahooProviderConfig {
                base_url: "https://query1.finance.yahoo.com".to_string(),
            }),
            exchanges: default_exchanges(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

impl AppConfig {
    /// Loads the default config file, falling back to built-in defaults when
    /// it has not been created yet.
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        if !config_path.exists() {
            debug!("No config at {}, using defaults", config_path.display());
            return Ok(Self::default());
        }
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("dev", "pricedash", "pricedash")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }

    /// Writes the default configuration to `path`, refusing to replace an
    /// existing file.
    pub fn write_default<P: AsRef<std::path::Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        if path.exists() {
            anyhow::bail!("Configuration file already exists at {}", path.display());
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let rendered = serde_yaml::to_string(&Self::default())
            .context("Failed to render default configuration")?;
        fs::write(path, rendered)
            .with_context(|| format!("Failed to write config file to {}", path.display()))
    }

    pub fn yahoo_base_url(&self) -> &str {
        self.providers
            .yahoo
            .as_ref()
            .map_or("https://query1.finance.yahoo.com", |p| &p.base_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: AppConfig = serde_yaml::from_str("{}").expect("Failed to deserialize");

        assert_eq!(config.server.bind, "127.0.0.1:5000");
        assert_eq!(config.cache.stock_ttl(), Duration::from_secs(20));
        assert_eq!(config.cache.crypto_ttl(), Duration::from_secs(20));
        assert_eq!(config.fetch.timeout(), Duration::from_secs(15));
        assert_eq!(config.fetch.crypto_limit, 200);
        assert_eq!(config.yahoo_base_url(), "https://query1.finance.yahoo.com");
        assert_eq!(
            config.providers.exchanges["binance"].base_url,
            "https://api.binance.com"
        );
        assert_eq!(config.providers.exchanges["binance"].timeout_secs, 10);
        assert!(config.providers.exchanges.contains_key("binanceus"));
    }

    #[test]
    fn test_config_deserialization() {
        let yaml_str = r#"
server:
  bind: "0.0.0.0:8080"
cache:
  stock_ttl_secs: 60
fetch:
  timeout_secs: 5
providers:
  yahoo:
    base_url: "http://example.com/yahoo"
  exchanges:
    mockex:
      base_url: "http://example.com/mockex"
      timeout_secs: 3
"#;

        let config: AppConfig = serde_yaml::from_str(yaml_str).expect("Failed to deserialize");
        assert_eq!(config.server.bind, "0.0.0.0:8080");
        assert_eq!(config.cache.stock_ttl_secs, 60);
        // Unset fields within a section keep their defaults
        assert_eq!(config.cache.crypto_ttl_secs, 20);
        assert_eq!(config.fetch.timeout_secs, 5);
        assert_eq!(config.fetch.crypto_limit, 200);
        assert_eq!(config.yahoo_base_url(), "http://example.com/yahoo");

        // An explicit exchange list replaces the defaults
        assert_eq!(config.providers.exchanges.len(), 1);
        let mockex = &config.providers.exchanges["mockex"];
        assert_eq!(mockex.base_url, "http://example.com/mockex");
        assert_eq!(mockex.timeout_secs, 3);
    }

    #[test]
    fn test_load_from_path_reports_parse_errors() {
        let file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
        fs::write(file.path(), "cache: [not, a, map]").unwrap();

        let result = AppConfig::load_from_path(file.path());
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .starts_with("Failed to parse config file")
        );
    }

    #[test]
    fn test_write_default_round_trips_and_never_overwrites() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("nested").join("config.yaml");

        AppConfig::write_default(&path).unwrap();
        let config = AppConfig::load_from_path(&path).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:5000");
        assert_eq!(config.cache.stock_ttl(), Duration::from_secs(20));

        fs::write(&path, "server:\n  bind: 0.0.0.0:8080\n").unwrap();
        let error = AppConfig::write_default(&path).unwrap_err();
        assert!(error.to_string().starts_with("Configuration file already exists"));
        assert_eq!(
            AppConfig::load_from_path(&path).unwrap().server.bind,
            "0.0.0.0:8080"
        );
    }
}
