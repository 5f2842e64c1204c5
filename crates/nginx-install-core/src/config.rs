//! The YAML config file.
//!
//! ```yaml
//! version: 0.0.1
//! network: { proxy: null, user_agent: ..., extra: {} }
//! logging: { level: INFO, format: full, console: false }
//! core: { nginx_version: stable, flavor: vanilla, ... }
//! installers:
//!   - classname: BrotliInstaller
//!     enabled: true
//!     dynamic: false
//! ```
//!
//! Unknown keys survive a load/save cycle at every level.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use tracing::warn;

use crate::error::{InstallError, Result};
use crate::installer::{default_installers, CoreInstaller, Installer};
use crate::registry::{to_record, Registry};

pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";

/// HTTP client settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// `None` uses the environment's proxy, an empty string disables proxying
    pub proxy: Option<String>,
    pub user_agent: String,
    /// Extra client options; `timeout` and `connect_timeout` (seconds) are understood
    pub extra: BTreeMap<String, Value>,
    #[serde(flatten)]
    pub unknown: BTreeMap<String, Value>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            proxy: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            extra: BTreeMap::new(),
            unknown: BTreeMap::new(),
        }
    }
}

impl NetworkConfig {
    fn seconds(&self, key: &str) -> Option<Duration> {
        let value = self.extra.get(key)?;
        match value.as_f64() {
            Some(secs) if secs > 0.0 => Some(Duration::from_secs_f64(secs)),
            _ => {
                warn!(key, value = ?value, "ignoring network option, expected seconds");
                None
            }
        }
    }

    /// Total request timeout from `extra.timeout`.
    pub fn timeout(&self) -> Option<Duration> {
        self.seconds("timeout")
    }

    /// Connect timeout from `extra.connect_timeout`.
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.seconds("connect_timeout")
    }

    /// Keys in `extra` the HTTP client does not understand.
    pub fn unsupported_extra(&self) -> Vec<&str> {
        self.extra
            .keys()
            .map(String::as_str)
            .filter(|k| !matches!(*k, "timeout" | "connect_timeout"))
            .collect()
    }
}

/// Log line layout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LogFormat {
    #[default]
    Full,
    Compact,
    Json,
    /// Anything else, kept verbatim (older configs stored a format string
    /// here). Logged like `Full`.
    Other(String),
}

impl From<String> for LogFormat {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "full" => LogFormat::Full,
            "compact" => LogFormat::Compact,
            "json" => LogFormat::Json,
            _ => LogFormat::Other(raw),
        }
    }
}

impl From<LogFormat> for String {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Full => "full".to_string(),
            LogFormat::Compact => "compact".to_string(),
            LogFormat::Json => "json".to_string(),
            LogFormat::Other(raw) => raw,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    /// Also log to the terminal
    pub console: bool,
    #[serde(flatten)]
    pub unknown: BTreeMap<String, Value>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "INFO".to_string(),
            format: LogFormat::Full,
            console: false,
            unknown: BTreeMap::new(),
        }
    }
}

/// Everything a run needs besides its command line.
#[derive(Debug)]
pub struct Config {
    pub version: String,
    pub network: NetworkConfig,
    pub logging: LoggingConfig,
    pub core: CoreInstaller,
    pub installers: Vec<Box<dyn Installer>>,
    pub extra: BTreeMap<String, Value>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            version: "0.0.1".to_string(),
            network: NetworkConfig::default(),
            logging: LoggingConfig::default(),
            core: CoreInstaller::default(),
            installers: default_installers(),
            extra: BTreeMap::new(),
        }
    }
}

/// On-disk shape; installers stay raw until the registry sees them.
#[derive(Debug, Serialize, Deserialize)]
struct RawConfig {
    #[serde(default = "default_version")]
    version: String,
    #[serde(default)]
    network: NetworkConfig,
    #[serde(default)]
    logging: LoggingConfig,
    #[serde(default)]
    core: CoreInstaller,
    #[serde(default)]
    installers: Option<Vec<Value>>,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

fn default_version() -> String {
    "0.0.1".to_string()
}

impl Config {
    /// Parse a config document. A missing `installers` key means the default
    /// (all builtin installers, disabled).
    pub fn from_yaml(text: &str, registry: &Registry) -> Result<Self> {
        let raw: RawConfig = if text.trim().is_empty() {
            serde_yaml::from_str("{}")?
        } else {
            serde_yaml::from_str(text)?
        };

        let installers = match raw.installers {
            None => default_installers(),
            Some(records) => records
                .into_iter()
                .enumerate()
                .map(|(idx, record)| {
                    registry.from_record(record).map_err(|e| match e {
                        InstallError::ConfigValidation(reason) => {
                            InstallError::ConfigValidation(format!("installers[{idx}]: {reason}"))
                        }
                        other => other,
                    })
                })
                .collect::<Result<Vec<_>>>()?,
        };

        Ok(Config {
            version: raw.version,
            network: raw.network,
            logging: raw.logging,
            core: raw.core,
            installers,
            extra: raw.extra,
        })
    }

    pub fn to_yaml(&self) -> Result<String> {
        let installers = self
            .installers
            .iter()
            .map(|i| to_record(i.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        let raw = RawConfig {
            version: self.version.clone(),
            network: self.network.clone(),
            logging: self.logging.clone(),
            core: self.core.clone(),
            installers: Some(installers),
            extra: self.extra.clone(),
        };
        Ok(serde_yaml::to_string(&raw)?)
    }

    /// Enable the installers named in `names` (`all` enables every one) and
    /// set `dynamic` on every installer that has a dynamic variant.
    pub fn enable_named(&mut self, names: &[String], dynamic: bool) {
        let all = names.iter().any(|n| n.trim().eq_ignore_ascii_case("all"));
        for installer in &mut self.installers {
            if all || names.iter().any(|n| installer.matches_name(n)) {
                installer.set_enabled(true);
            }
            installer.set_dynamic(dynamic);
        }
    }

    /// Installers with `enabled: true`.
    pub fn enabled_installers(&self) -> impl Iterator<Item = &dyn Installer> {
        self.installers
            .iter()
            .filter(|i| i.enabled())
            .map(|i| i.as_ref())
    }
}

/// Loads and saves [`Config`].
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn load(&self, registry: &Registry) -> Result<Config>;
    async fn save(&self, config: &Config) -> Result<()>;
}

/// A YAML file on disk.
#[derive(Debug, Clone)]
pub struct YamlConfigStore {
    path: PathBuf,
}

impl YamlConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        YamlConfigStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn exists(&self) -> bool {
        tokio::fs::try_exists(&self.path).await.unwrap_or(false)
    }
}

#[async_trait]
impl ConfigStore for YamlConfigStore {
    async fn load(&self, registry: &Registry) -> Result<Config> {
        let text = tokio::fs::read_to_string(&self.path).await?;
        Config::from_yaml(&text, registry).map_err(|e| match e {
            InstallError::ConfigValidation(reason) => {
                InstallError::ConfigValidation(format!("{}: {reason}", self.path.display()))
            }
            other => other,
        })
    }

    async fn save(&self, config: &Config) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(&self.path, config.to_yaml()?).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installer::{Flavor, GenericGitInstaller};

    #[test]
    fn test_default_config_roundtrip() {
        let config = Config::default();
        let text = config.to_yaml().unwrap();
        let back = Config::from_yaml(&text, &Registry::builtin()).unwrap();
        assert_eq!(back.version, "0.0.1");
        assert_eq!(back.core, config.core);
        assert_eq!(back.network, config.network);
        assert_eq!(back.installers.len(), config.installers.len());
        for (a, b) in config.installers.iter().zip(&back.installers) {
            assert!(a.eq_installer(b.as_ref()));
        }
    }

    #[test]
    fn test_unknown_keys_survive() {
        let text = r#"
version: 0.0.1
owner: ops-team
network:
  proxy: ""
  extra: { timeout: 30 }
  retries: 3
logging:
  level: DEBUG
  format: "%(asctime)s - %(message)s"
core:
  flavor: openresty
  nginx_version: ">=1.25"
  custom_core_key: true
installers:
  - classname: GenericGitInstaller
    enabled: true
    url: https://github.com/vozlt/nginx-module-vts.git
    note: keep me
"#;
        let config = Config::from_yaml(text, &Registry::builtin()).unwrap();
        assert_eq!(config.core.flavor, Flavor::Openresty);
        assert_eq!(
            config.logging.format,
            LogFormat::Other("%(asctime)s - %(message)s".to_string())
        );
        assert_eq!(config.network.proxy.as_deref(), Some(""));
        assert_eq!(config.network.timeout(), Some(Duration::from_secs(30)));
        assert!(config.extra.contains_key("owner"));
        assert!(config.network.unknown.contains_key("retries"));
        assert!(config.core.extra.contains_key("custom_core_key"));

        let out = config.to_yaml().unwrap();
        let again = Config::from_yaml(&out, &Registry::builtin()).unwrap();
        assert_eq!(again.logging.format, config.logging.format);
        let git = again.installers[0]
            .as_any()
            .downcast_ref::<GenericGitInstaller>()
            .unwrap();
        assert_eq!(git.extra.get("note").and_then(Value::as_str), Some("keep me"));
        assert!(again.extra.contains_key("owner"));
    }

    #[test]
    fn test_missing_installers_key_uses_defaults() {
        let config = Config::from_yaml("core: {nginx_version: mainline}", &Registry::builtin()).unwrap();
        assert_eq!(config.installers.len(), default_installers().len());
        assert_eq!(config.core.nginx_version, "mainline");
        assert_eq!(config.enabled_installers().count(), 0);
    }

    #[test]
    fn test_unknown_installer_fails_load() {
        let text = "installers:\n  - classname: Mystery\n";
        assert!(matches!(
            Config::from_yaml(text, &Registry::builtin()).unwrap_err(),
            InstallError::UnknownInstallerType { .. }
        ));
    }

    #[test]
    fn test_enable_named() {
        let mut config = Config::default();
        config.enable_named(&["brotli".to_string(), "FancyIndexInstaller".to_string()], true);
        let enabled: Vec<&str> = config.enabled_installers().map(|i| i.tag()).collect();
        assert_eq!(enabled, vec!["FancyIndexInstaller", "BrotliInstaller"]);
        assert!(config.installers.iter().filter(|i| i.tag() == "BrotliInstaller").all(|i| i.is_dynamic()));

        let mut config = Config::default();
        config.enable_named(&["all".to_string()], false);
        // The generic git entry has no URL and stays off.
        assert_eq!(config.enabled_installers().count(), config.installers.len() - 1);
    }

    #[tokio::test]
    async fn test_yaml_store_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = YamlConfigStore::new(dir.path().join("conf").join("config.yaml"));
        assert!(!store.exists().await);

        let mut config = Config::default();
        config.core.nginx_version = "1.26".to_string();
        store.save(&config).await.unwrap();
        assert!(store.exists().await);

        let loaded = store.load(&Registry::builtin()).await.unwrap();
        assert_eq!(loaded.core.nginx_version, "1.26");
    }
}
