//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! API keys never live in the TOML; they are imported into the pool's
//! state directory with `studio keys import`.

use key_pool::PoolOptions;
use provider::gemini::{DEFAULT_BASE_URL, DEFAULT_PROBE_MODEL};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "studio.toml";

/// Root configuration
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub pool: PoolConfig,
}

/// Upstream generation API settings
#[derive(Debug, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Model used by `keys validate` probes
    #[serde(default = "default_probe_model")]
    pub probe_model: String,
}

/// Key pool settings
#[derive(Debug, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default = "default_validation_delay_ms")]
    pub validation_delay_ms: u64,
    #[serde(default = "default_auto_rotate")]
    pub default_auto_rotate: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout(),
            probe_model: default_probe_model(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            validation_delay_ms: default_validation_delay_ms(),
            default_auto_rotate: default_auto_rotate(),
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_timeout() -> u64 {
    60
}

fn default_probe_model() -> String {
    DEFAULT_PROBE_MODEL.to_string()
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".studio")
}

fn default_validation_delay_ms() -> u64 {
    1100
}

fn default_auto_rotate() -> bool {
    true
}

/// Where the config path came from. Only an explicit path must exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Explicit(PathBuf),
    Default(PathBuf),
}

impl ConfigSource {
    pub fn path(&self) -> &Path {
        match self {
            ConfigSource::Explicit(p) | ConfigSource::Default(p) => p,
        }
    }
}

impl Config {
    /// Load from `source`, then overlay environment variables and validate.
    ///
    /// A missing file at the default location yields defaults.
    pub fn load(source: &ConfigSource) -> common::Result<Self> {
        let mut config = match source {
            ConfigSource::Default(path) if !path.exists() => Config::default(),
            _ => Self::parse(&std::fs::read_to_string(source.path())?)?,
        };

        if let Ok(dir) = std::env::var("STUDIO_STATE_DIR")
            && !dir.is_empty()
        {
            config.pool.state_dir = PathBuf::from(dir);
        }

        config.validate()?;
        Ok(config)
    }

    fn parse(contents: &str) -> common::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    fn validate(&self) -> common::Result<()> {
        if !self.provider.base_url.starts_with("http://")
            && !self.provider.base_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                self.provider.base_url
            )));
        }

        if self.provider.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Resolve config file path from CLI arg or STUDIO_CONFIG env var.
    pub fn resolve_path(cli_path: Option<&Path>) -> ConfigSource {
        if let Some(p) = cli_path {
            return ConfigSource::Explicit(p.to_path_buf());
        }
        if let Ok(p) = std::env::var("STUDIO_CONFIG") {
            return ConfigSource::Explicit(PathBuf::from(p));
        }
        ConfigSource::Default(PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.provider.timeout_secs)
    }

    pub fn pool_options(&self) -> PoolOptions {
        PoolOptions {
            validation_delay: Duration::from_millis(self.pool.validation_delay_ms),
            default_auto_rotate: self.pool.default_auto_rotate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serializes tests that touch environment variables.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> ConfigSource {
        let path = dir.path().join("studio.toml");
        std::fs::write(&path, contents).unwrap();
        ConfigSource::Explicit(path)
    }

    #[test]
    fn test_load_full_config() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("STUDIO_STATE_DIR") };
        let dir = tempfile::tempdir().unwrap();
        let source = write_config(
            &dir,
            r#"
[provider]
base_url = "http://127.0.0.1:9000"
timeout_secs = 15
probe_model = "gemini-test"

[pool]
state_dir = "/var/lib/studio"
validation_delay_ms = 250
default_auto_rotate = false
"#,
        );

        let config = Config::load(&source).unwrap();
        assert_eq!(config.provider.base_url, "http://127.0.0.1:9000");
        assert_eq!(config.timeout(), Duration::from_secs(15));
        assert_eq!(config.provider.probe_model, "gemini-test");
        assert_eq!(config.pool.state_dir, PathBuf::from("/var/lib/studio"));

        let options = config.pool_options();
        assert_eq!(options.validation_delay, Duration::from_millis(250));
        assert!(!options.default_auto_rotate);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("STUDIO_STATE_DIR") };
        let dir = tempfile::tempdir().unwrap();
        let source = write_config(&dir, "[provider]\ntimeout_secs = 5\n");

        let config = Config::load(&source).unwrap();
        assert_eq!(config.provider.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.provider.timeout_secs, 5);
        assert_eq!(config.pool.validation_delay_ms, 1100);
        assert!(config.pool.default_auto_rotate);
    }

    #[test]
    fn test_missing_default_file_yields_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("STUDIO_STATE_DIR") };
        let dir = tempfile::tempdir().unwrap();
        let source = ConfigSource::Default(dir.path().join("studio.toml"));

        let config = Config::load(&source).unwrap();
        assert_eq!(config.provider.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.pool.state_dir, PathBuf::from(".studio"));
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let source = ConfigSource::Explicit(PathBuf::from("/nonexistent/path/studio.toml"));
        assert!(Config::load(&source).is_err());
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_config(&dir, "not valid {{{{ toml");
        assert!(Config::load(&source).is_err());
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let source = write_config(&dir, "[provider]\nbase_url = \"generativelanguage.googleapis.com\"\n");

        let err = Config::load(&source).unwrap_err().to_string();
        assert!(
            err.contains("base_url must start with http"),
            "error message should explain the issue, got: {err}"
        );
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let source = write_config(&dir, "[provider]\ntimeout_secs = 0\n");
        assert!(Config::load(&source).is_err(), "timeout_secs = 0 must be rejected");
    }

    #[test]
    fn test_state_dir_env_overrides_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let source = write_config(&dir, "[pool]\nstate_dir = \"/from/file\"\n");

        unsafe { set_env("STUDIO_STATE_DIR", "/from/env") };
        let config = Config::load(&source).unwrap();
        unsafe { remove_env("STUDIO_STATE_DIR") };

        assert_eq!(config.pool.state_dir, PathBuf::from("/from/env"));
    }

    #[test]
    fn test_resolve_path_cli_arg() {
        let source = Config::resolve_path(Some(Path::new("/custom/studio.toml")));
        assert_eq!(
            source,
            ConfigSource::Explicit(PathBuf::from("/custom/studio.toml"))
        );
    }

    #[test]
    fn test_resolve_path_env_var() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("STUDIO_CONFIG", "/env/studio.toml") };
        let source = Config::resolve_path(None);
        unsafe { remove_env("STUDIO_CONFIG") };
        assert_eq!(source, ConfigSource::Explicit(PathBuf::from("/env/studio.toml")));
    }

    #[test]
    fn test_resolve_path_default() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("STUDIO_CONFIG") };
        let source = Config::resolve_path(None);
        assert_eq!(source, ConfigSource::Default(PathBuf::from("studio.toml")));
    }

    #[test]
    fn test_resolve_path_cli_overrides_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("STUDIO_CONFIG", "/env/should-lose.toml") };
        let source = Config::resolve_path(Some(Path::new("/cli/wins.toml")));
        unsafe { remove_env("STUDIO_CONFIG") };
        assert_eq!(
            source.path(),
            Path::new("/cli/wins.toml"),
            "CLI arg must take precedence over STUDIO_CONFIG env var"
        );
    }
}
