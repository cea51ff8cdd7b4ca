//! Layered configuration.
//!
//! Precedence, lowest first: built-in defaults, TOML file, `RPCTL_*`
//! environment variables, command-line flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::core::export::{ExportSettings, default_parallelism};
use crate::core::orchestrator::PollSettings;
use crate::core::retention::DEFAULT_KEEP;
use crate::error::ConfigError;
use crate::logging::LogConfig;
use crate::rpc::SessionConfig;

/// Config file read from the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "rpctl.toml";
pub const ENV_PREFIX: &str = "RPCTL_";

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Appliance host name, or a full base URL such as `https://rp:8443`
    pub hostname: Option<String>,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Skip TLS certificate verification
    pub insecure: bool,
    pub poll_interval_secs: u64,
    pub settle_delay_ms: u64,
    pub progress_interval_ms: u64,
    pub max_parallel: usize,
    pub request_timeout_secs: u64,
    /// Give up polling and downloading after this many seconds
    pub timeout_secs: Option<u64>,
    /// Backups kept per device when pruning
    pub keep: usize,
    pub errors_only: bool,
    pub verbose: bool,
    pub json_logs: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            hostname: None,
            port: 443,
            username: None,
            password: None,
            insecure: false,
            poll_interval_secs: 2,
            settle_delay_ms: 1000,
            progress_interval_ms: 1000,
            max_parallel: default_parallelism(),
            request_timeout_secs: 60,
            timeout_secs: None,
            keep: DEFAULT_KEEP,
            errors_only: false,
            verbose: false,
            json_logs: false,
        }
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("insecure", &self.insecure)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("max_parallel", &self.max_parallel)
            .field("timeout_secs", &self.timeout_secs)
            .field("keep", &self.keep)
            .finish_non_exhaustive()
    }
}

impl AppConfig {
    /// Load the full configuration stack.
    ///
    /// `overrides` is usually the parsed command line; fields it skips while
    /// serializing leave the lower layers untouched.
    pub fn new<T: Serialize>(
        config_file: Option<&Path>,
        overrides: Option<&T>,
    ) -> Result<Self, ConfigError> {
        let file = match config_file {
            Some(path) if !path.exists() => {
                return Err(ConfigError::FileNotFound(path.to_path_buf()));
            }
            Some(path) => path.to_path_buf(),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let mut figment = Self::figment(&file).merge(Env::prefixed(ENV_PREFIX));
        if let Some(overrides) = overrides {
            figment = figment.merge(Serialized::defaults(overrides));
        }
        Ok(figment.extract()?)
    }

    /// Defaults plus the TOML file, if it exists.
    pub fn figment(config_file: &Path) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default())).merge(Toml::file(config_file))
    }

    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let host = self
            .hostname
            .as_deref()
            .filter(|h| !h.is_empty())
            .ok_or(ConfigError::Missing("hostname"))?;

        let raw = if host.contains("://") {
            host.to_string()
        } else {
            format!("https://{}:{}", host, self.port)
        };
        Url::parse(&raw).map_err(|_| ConfigError::InvalidHost(host.to_string()))
    }

    pub fn session_config(&self) -> Result<SessionConfig, ConfigError> {
        let base_url = self.base_url()?;
        let username = self
            .username
            .clone()
            .ok_or(ConfigError::Missing("username"))?;
        let password = self
            .password
            .clone()
            .ok_or(ConfigError::Missing("password"))?;

        Ok(SessionConfig {
            base_url,
            username,
            password,
            accept_invalid_certs: self.insecure,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            log_bodies: self.verbose,
        })
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            interval: Duration::from_secs(self.poll_interval_secs),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
        }
    }

    pub fn export_settings(&self) -> ExportSettings {
        ExportSettings {
            max_parallel: self.max_parallel.max(1),
            progress_interval: Duration::from_millis(self.progress_interval_ms.max(1)),
        }
    }

    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            json: self.json_logs,
            verbose: self.verbose,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn defaults_without_file() {
        let temp = tempdir().unwrap();
        let config: AppConfig = AppConfig::figment(&temp.path().join("none.toml"))
            .extract()
            .unwrap();

        assert_eq!(config.port, 443);
        assert_eq!(config.poll_interval_secs, 2);
        assert_eq!(config.keep, DEFAULT_KEEP);
        assert!(config.max_parallel >= 1);
        assert!(config.hostname.is_none());
    }

    #[test]
    fn file_then_overrides() {
        let temp = tempdir().unwrap();
        let file = temp.path().join("rpctl.toml");
        std::fs::write(
            &file,
            "hostname = \"rp.example\"\nusername = \"backup\"\npoll_interval_secs = 5\nkeep = 3\n",
        )
        .unwrap();

        let config: AppConfig = AppConfig::figment(&file)
            .merge(Serialized::defaults(json!({"poll_interval_secs": 9})))
            .extract()
            .unwrap();

        assert_eq!(config.hostname.as_deref(), Some("rp.example"));
        assert_eq!(config.poll_interval_secs, 9);
        assert_eq!(config.keep, 3);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let temp = tempdir().unwrap();
        let missing = temp.path().join("missing.toml");
        let result = AppConfig::new::<()>(Some(&missing), None);
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn base_url_from_host_and_port() {
        let config = AppConfig {
            hostname: Some("rp.example".into()),
            port: 8443,
            ..Default::default()
        };
        assert_eq!(config.base_url().unwrap().as_str(), "https://rp.example:8443/");
    }

    #[test]
    fn base_url_keeps_explicit_scheme() {
        let config = AppConfig {
            hostname: Some("http://127.0.0.1:8080".into()),
            ..Default::default()
        };
        assert_eq!(config.base_url().unwrap().as_str(), "http://127.0.0.1:8080/");
    }

    #[test]
    fn session_config_requires_credentials() {
        let config = AppConfig {
            hostname: Some("rp.example".into()),
            username: Some("backup".into()),
            ..Default::default()
        };
        assert!(matches!(
            config.session_config(),
            Err(ConfigError::Missing("password"))
        ));

        let config = AppConfig::default();
        assert!(matches!(
            config.session_config(),
            Err(ConfigError::Missing("hostname"))
        ));
    }

    #[test]
    fn debug_redacts_password() {
        let config = AppConfig {
            password: Some("hunter2".into()),
            ..Default::default()
        };
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn settings_are_clamped() {
        let config = AppConfig {
            max_parallel: 0,
            ..Default::default()
        };
        assert_eq!(config.export_settings().max_parallel, 1);
    }
}
