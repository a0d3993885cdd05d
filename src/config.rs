//! # Configuration
//!
//! Key-value configuration read from YAML, addressed with dotted keys
//! (`server.public_root`). A base `config.yaml` can be overlaid with a
//! run-mode file `config.<mode>.yaml`; overlay keys replace base keys at the
//! top level.
//!
//! [`DispatchSettings`] is the typed view the dispatcher consumes. It is read
//! from a [`Config`] and then adjusted from the environment:
//!
//! - `LARK_DEBUG`: `true`/`false`, overrides `app.debug`
//! - `LARK_PUBLIC_ROOT`: overrides `server.public_root`
//! - `LARK_MAX_FILE_UPLOADS`: overrides `server.max_file_uploads`
//!
//! ```rust
//! use lark::config::{Config, DispatchSettings};
//!
//! let config = Config::from_yaml_str("app:\n  debug: false\n").unwrap();
//! let settings = DispatchSettings::from_config(&config);
//! assert!(!settings.debug);
//! ```

use serde_yaml::Value;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Run modes accepted for overlay files.
pub const RUN_MODES: [&str; 4] = ["dev", "test", "stage", "prod"];

pub const DEFAULT_PUBLIC_ROOT: &str = "public";
pub const DEFAULT_MAX_FILE_UPLOADS: usize = 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("config root must be a mapping")]
    NotAMapping,

    #[error("unknown run mode '{0}' (expected dev, test, stage or prod)")]
    InvalidMode(String),
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    root: Value,
}

impl Config {
    pub fn empty() -> Self {
        Self {
            root: Value::Mapping(Default::default()),
        }
    }

    pub fn from_yaml_str(source: &str) -> Result<Self, ConfigError> {
        let root: Value = serde_yaml::from_str(source).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        Self::from_value(root)
    }

    fn from_value(root: Value) -> Result<Self, ConfigError> {
        match root {
            Value::Mapping(_) => Ok(Self { root }),
            Value::Null => Ok(Self::empty()),
            _ => Err(ConfigError::NotAMapping),
        }
    }

    /// Load a single YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let root: Value = serde_yaml::from_str(&source).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_value(root)
    }

    /// Load `dir/config.yaml` and, when present, merge `dir/config.<mode>.yaml` over it.
    pub fn load_with_mode(dir: impl AsRef<Path>, mode: &str) -> Result<Self, ConfigError> {
        if !RUN_MODES.contains(&mode) {
            return Err(ConfigError::InvalidMode(mode.to_string()));
        }
        let dir = dir.as_ref();
        let mut config = Self::load(dir.join("config.yaml"))?;
        let overlay = dir.join(format!("config.{mode}.yaml"));
        if overlay.is_file() {
            config.merge(Self::load(overlay)?);
        }
        Ok(config)
    }

    /// Shallow merge: top-level keys of `other` replace ours.
    pub fn merge(&mut self, other: Config) {
        if let (Value::Mapping(base), Value::Mapping(top)) = (&mut self.root, other.root) {
            for (k, v) in top {
                base.insert(k, v);
            }
        }
    }

    /// Look up a dotted key. Any empty segment or missing step yields `None`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        let mut current = &self.root;
        for segment in key.split('.') {
            if segment.is_empty() {
                return None;
            }
            current = match current {
                Value::Mapping(map) => map.get(segment)?,
                Value::Sequence(seq) => seq.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        match current {
            Value::Null => None,
            v => Some(v),
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(Value::as_u64)
    }
}

/// Settings the dispatcher reads once at build time.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Render full error chains in 500 bodies
    pub debug: bool,
    /// Directory static files are served from; `None` disables static serving
    pub public_root: Option<PathBuf>,
    /// Redirect target for unmatched routes
    pub not_found_page: Option<String>,
    /// Multipart section cap per request
    pub max_file_uploads: usize,
    /// Where upload temp files go; `None` means the OS temp dir
    pub upload_tmp_dir: Option<PathBuf>,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            debug: true,
            public_root: Some(PathBuf::from(DEFAULT_PUBLIC_ROOT)),
            not_found_page: None,
            max_file_uploads: DEFAULT_MAX_FILE_UPLOADS,
            upload_tmp_dir: None,
        }
    }
}

impl DispatchSettings {
    /// Read settings from `config` without consulting the environment.
    pub fn from_config(config: &Config) -> Self {
        let defaults = Self::default();
        Self {
            debug: config.get_bool("app.debug").unwrap_or(defaults.debug),
            public_root: config
                .get_str("server.public_root")
                .map(PathBuf::from)
                .or(defaults.public_root),
            not_found_page: config
                .get_str("error_page.404")
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            max_file_uploads: config
                .get_u64("server.max_file_uploads")
                .map(|n| n as usize)
                .unwrap_or(defaults.max_file_uploads),
            upload_tmp_dir: config.get_str("server.upload_tmp_dir").map(PathBuf::from),
        }
    }

    /// Apply `LARK_*` environment overrides. Unparseable values are ignored.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(debug) = env::var("LARK_DEBUG").ok().and_then(|s| parse_bool(&s)) {
            self.debug = debug;
        }
        if let Ok(root) = env::var("LARK_PUBLIC_ROOT") {
            self.public_root = if root.is_empty() {
                None
            } else {
                Some(PathBuf::from(root))
            };
        }
        if let Some(max) = env::var("LARK_MAX_FILE_UPLOADS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.max_file_uploads = max;
        }
        self
    }

    /// `from_config` followed by `with_env_overrides`.
    pub fn load(config: &Config) -> Self {
        Self::from_config(config).with_env_overrides()
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

    #[test]
    fn test_dotted_get() {
        let config = Config::from_yaml_str(
            "server:\n  public_root: /srv/www\n  ports: [80, 443]\napp:\n  debug: false\n",
        )
        .unwrap();
        assert_eq!(config.get_str("server.public_root"), Some("/srv/www"));
        assert_eq!(config.get_u64("server.ports.1"), Some(443));
        assert_eq!(config.get_bool("app.debug"), Some(false));
        assert!(config.get("server..public_root").is_none());
        assert!(config.get("server.missing").is_none());
        assert!(config.get("").is_none());
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool(" 0 "), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_scalar_root_is_rejected() {
        assert!(matches!(
            Config::from_yaml_str("42"),
            Err(ConfigError::NotAMapping)
        ));
    }
}
