use std::path::{Path, PathBuf};

use serde::Deserialize;

pub const DEFAULT_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8080;

/// Server settings, loaded from TOML. Every field is optional so command-line
/// values can be layered on top.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Address to listen on.
    pub address: Option<String>,
    /// Port to listen on.
    pub port: Option<u16>,
    /// Password file; defaults to `broadway.passwd` in the user config dir.
    pub password_file: Option<PathBuf>,
    /// Upper bound on an HTTP request head, in bytes.
    pub max_request_size: Option<usize>,
}

impl Config {
    /// Load config from a TOML file path. Returns None if file doesn't exist.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        check_config_permissions(path);

        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
        Ok(Some(config))
    }

    pub fn address(&self) -> &str {
        self.address.as_deref().unwrap_or(DEFAULT_ADDRESS)
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    pub fn max_request_size(&self) -> usize {
        self.max_request_size
            .unwrap_or(crate::handshake::MAX_REQUEST_SIZE)
    }

    /// Password file to use, falling back to the per-user default.
    pub fn password_file(&self) -> Option<PathBuf> {
        self.password_file.clone().or_else(default_password_file)
    }
}

/// `$XDG_CONFIG_HOME/broadway/broadway.toml` or the platform equivalent.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("broadway").join("broadway.toml"))
}

/// `$XDG_CONFIG_HOME/broadway.passwd` or the platform equivalent.
pub fn default_password_file() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("broadway.passwd"))
}

/// Errors that can occur when loading config.
#[derive(Debug)]
pub enum ConfigError {
    ReadFailed(PathBuf, std::io::Error),
    ParseFailed(PathBuf, toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadFailed(path, e) => {
                write!(f, "Failed to read config {}: {}", path.display(), e)
            }
            Self::ParseFailed(path, e) => {
                write!(f, "Failed to parse config {}: {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Warn if a file that may hold secrets is world-readable.
#[cfg(unix)]
pub fn check_config_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(_) => return,
    };

    let mode = metadata.permissions().mode();
    if is_world_readable(mode) {
        tracing::warn!(
            "{} is world-readable (mode {:o}). \
             Consider restricting permissions to 600.",
            path.display(),
            mode & 0o7777,
        );
    }
}

#[cfg(not(unix))]
pub fn check_config_permissions(_path: &Path) {}

#[cfg(unix)]
pub fn is_world_readable(mode: u32) -> bool {
    mode & 0o004 != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_config() {
        let toml = r#"
            address = "0.0.0.0"
            port = 9090
            password_file = "/etc/broadway.passwd"
            max_request_size = 8192
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.address(), "0.0.0.0");
        assert_eq!(config.port(), 9090);
        assert_eq!(
            config.password_file(),
            Some(PathBuf::from("/etc/broadway.passwd"))
        );
        assert_eq!(config.max_request_size(), 8192);
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.address(), DEFAULT_ADDRESS);
        assert_eq!(config.port(), DEFAULT_PORT);
        assert_eq!(config.max_request_size(), 5 * 1024);
    }

    #[test]
    fn unknown_field_rejected() {
        assert!(toml::from_str::<Config>("colour = \"blue\"").is_err());
    }

    #[test]
    fn load_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::load(&dir.path().join("nope.toml")).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broadway.toml");
        std::fs::write(&path, "port = 8081\n").unwrap();
        let loaded = Config::load(&path).unwrap().unwrap();
        assert_eq!(
            loaded,
            Config {
                port: Some(8081),
                ..Default::default()
            }
        );
        assert_eq!(loaded.address(), DEFAULT_ADDRESS);
    }

    #[test]
    fn load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "port = \"not a number\"").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[cfg(unix)]
    #[test]
    fn world_readable_detection() {
        assert!(is_world_readable(0o644));
        assert!(!is_world_readable(0o600));
        assert!(!is_world_readable(0o640));
    }
}
