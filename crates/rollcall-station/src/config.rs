use rollcall_core::DISTANCE_THRESHOLD;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading config at {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
    #[error("distance threshold must be finite and positive, got {0}")]
    Threshold(f32),
}

/// Station configuration.
///
/// Sources, later ones winning: built-in defaults, the TOML file named by
/// `ROLLCALL_CONFIG` (or `$XDG_CONFIG_HOME/rollcall/config.toml`), then
/// `ROLLCALL_*` environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Euclidean distance below which a probe matches an enrolled face.
    pub distance_threshold: f32,
    /// External embedding program and its arguments. Receives a PPM frame on
    /// stdin and prints a JSON signature (or `null`) on stdout.
    pub embed_command: Option<Vec<String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: data_dir().join("attendance.db"),
            distance_threshold: DISTANCE_THRESHOLD,
            embed_command: None,
        }
    }
}

impl Config {
    /// Load from the config file and the process environment.
    ///
    /// A file named by `ROLLCALL_CONFIG` must exist; the XDG location is optional.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(|key: &str| std::env::var(key).ok())
    }

    fn load_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = match lookup("ROLLCALL_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => {
                let path = config_dir().join("config.toml");
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    Self::default()
                }
            }
        };
        cfg.apply_env(lookup)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg: Self = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(cfg)
    }

    /// Apply `ROLLCALL_*` overrides read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(path) = lookup("ROLLCALL_DB_PATH") {
            self.db_path = PathBuf::from(path);
        }
        if let Some(raw) = lookup("ROLLCALL_DISTANCE_THRESHOLD") {
            self.distance_threshold = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "ROLLCALL_DISTANCE_THRESHOLD",
                value: raw.clone(),
            })?;
        }
        if let Some(raw) = lookup("ROLLCALL_EMBED_COMMAND") {
            let argv: Vec<String> = raw.split_whitespace().map(str::to_string).collect();
            self.embed_command = if argv.is_empty() { None } else { Some(argv) };
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.distance_threshold.is_finite() || self.distance_threshold <= 0.0 {
            return Err(ConfigError::Threshold(self.distance_threshold));
        }
        Ok(())
    }
}

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
        .join("rollcall")
}

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("rollcall")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.distance_threshold, DISTANCE_THRESHOLD);
        assert!(cfg.db_path.ends_with("rollcall/attendance.db"));
        assert!(cfg.embed_command.is_none());
        cfg.validate().unwrap();
    }

    #[test]
    fn test_env_overrides() {
        let mut cfg = Config::default();
        cfg.apply_env(env(&[
            ("ROLLCALL_DB_PATH", "/var/lib/rollcall/a.db"),
            ("ROLLCALL_DISTANCE_THRESHOLD", " 0.45 "),
            ("ROLLCALL_EMBED_COMMAND", "face-embed --model tiny"),
        ]))
        .unwrap();
        assert_eq!(cfg.db_path, PathBuf::from("/var/lib/rollcall/a.db"));
        assert_eq!(cfg.distance_threshold, 0.45);
        assert_eq!(
            cfg.embed_command,
            Some(vec!["face-embed".into(), "--model".into(), "tiny".into()])
        );
    }

    #[test]
    fn test_bad_threshold_env() {
        let mut cfg = Config::default();
        let err = cfg
            .apply_env(env(&[("ROLLCALL_DISTANCE_THRESHOLD", "close")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_validate_rejects_non_positive() {
        let cfg = Config {
            distance_threshold: 0.0,
            ..Config::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::Threshold(_))));
    }

    #[test]
    fn test_from_file_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "distance_threshold = 0.5\nembed_command = [\"embedder\", \"--stdin\"]\n",
        )
        .unwrap();

        let cfg = Config::from_file(&path).unwrap();
        assert_eq!(cfg.distance_threshold, 0.5);
        assert_eq!(
            cfg.embed_command,
            Some(vec!["embedder".to_string(), "--stdin".to_string()])
        );
        assert_eq!(cfg.db_path, Config::default().db_path);
    }

    #[test]
    fn test_explicit_config_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let err = Config::load_with(env(&[("ROLLCALL_CONFIG", missing.to_str().unwrap())]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Read { path, .. } if path == missing));
    }

    #[test]
    fn test_explicit_config_then_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("station.toml");
        std::fs::write(&path, "distance_threshold = 0.5\n").unwrap();

        let cfg = Config::load_with(env(&[
            ("ROLLCALL_CONFIG", path.to_str().unwrap()),
            ("ROLLCALL_DB_PATH", "/srv/rollcall.db"),
        ]))
        .unwrap();
        assert_eq!(cfg.distance_threshold, 0.5);
        assert_eq!(cfg.db_path, PathBuf::from("/srv/rollcall.db"));
    }

    #[test]
    fn test_from_file_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "distance_threshold = \"wide\"").unwrap();
        assert!(matches!(
            Config::from_file(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
