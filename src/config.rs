//! Configuration module for the aesdsocket server.
//!
//! The command line only selects daemon mode. Everything else comes from an
//! optional TOML file whose path is read from the `AESDSOCKET_CONFIG`
//! environment variable; missing values fall back to the built-in defaults.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

/// Environment variable naming the TOML configuration file.
pub const CONFIG_ENV: &str = "AESDSOCKET_CONFIG";

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "aesdsocket")]
#[command(disable_help_flag = true, disable_version_flag = true)]
#[command(about = "Append newline-delimited packets to a log file and echo the log back", long_about = None)]
#[command(override_usage = "aesdsocket [-d]")]
pub struct CliArgs {
    /// Detach into the background after the listening socket is bound
    #[arg(short = 'd', long = "daemon")]
    pub daemon: bool,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// TCP port bound on all IPv4 interfaces
    #[serde(default = "default_port")]
    pub port: u16,
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    /// Bytes requested per receive call
    #[serde(default = "default_recv_chunk_size")]
    pub recv_chunk_size: usize,
    /// Optional cap on unterminated bytes buffered per connection
    pub max_pending_bytes: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            backlog: default_backlog(),
            recv_chunk_size: default_recv_chunk_size(),
            max_pending_bytes: None,
        }
    }
}

/// Storage-related configuration
#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    /// Path of the record log file
    #[serde(default = "default_data_file")]
    pub data_file: PathBuf,
    /// Flush every append to the device before echoing
    #[serde(default)]
    pub sync_on_append: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_file: default_data_file(),
            sync_on_append: false,
        }
    }
}

/// Where formatted log events are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    Syslog,
    Stderr,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log sink
    #[serde(default = "default_log_target")]
    pub target: LogTarget,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            target: default_log_target(),
        }
    }
}

fn default_port() -> u16 {
    9000
}

fn default_backlog() -> i32 {
    10
}

fn default_recv_chunk_size() -> usize {
    1024
}

fn default_data_file() -> PathBuf {
    PathBuf::from("/var/tmp/aesdsocketdata")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_target() -> LogTarget {
    LogTarget::Syslog
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub daemon: bool,
    pub port: u16,
    pub backlog: i32,
    pub recv_chunk_size: usize,
    pub max_pending_bytes: Option<usize>,
    pub data_file: PathBuf,
    pub sync_on_append: bool,
    pub log_level: String,
    pub log_target: LogTarget,
}

impl Config {
    /// Load configuration from the command line and the optional TOML file.
    ///
    /// A malformed command line prints the usage message and exits non-zero.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::read_file(PathBuf::from(path))?,
            None => TomlConfig::default(),
        };

        Self::resolve(cli, toml_config)
    }

    fn read_file(path: PathBuf) -> Result<TomlConfig, ConfigError> {
        let contents = std::fs::read_to_string(&path)
            .map_err(|e| ConfigError::FileRead(path.clone(), e))?;
        toml::from_str(&contents).map_err(|e| ConfigError::TomlParse(path, e))
    }

    /// Merge parsed sources and validate the result.
    pub fn resolve(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        if toml_config.server.recv_chunk_size == 0 {
            return Err(ConfigError::Invalid("server.recv_chunk_size must be non-zero"));
        }
        if toml_config.server.backlog <= 0 {
            return Err(ConfigError::Invalid("server.backlog must be positive"));
        }
        if toml_config.server.max_pending_bytes == Some(0) {
            return Err(ConfigError::Invalid("server.max_pending_bytes must be non-zero"));
        }

        Ok(Config {
            daemon: cli.daemon,
            port: toml_config.server.port,
            backlog: toml_config.server.backlog,
            recv_chunk_size: toml_config.server.recv_chunk_size,
            max_pending_bytes: toml_config.server.max_pending_bytes,
            data_file: toml_config.storage.data_file,
            sync_on_append: toml_config.storage.sync_on_append,
            log_level: toml_config.logging.level,
            log_target: toml_config.logging.target,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            daemon: false,
            port: default_port(),
            backlog: default_backlog(),
            recv_chunk_size: default_recv_chunk_size(),
            max_pending_bytes: None,
            data_file: default_data_file(),
            sync_on_append: false,
            log_level: default_log_level(),
            log_target: default_log_target(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    Invalid(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::Invalid(reason) => write!(f, "Invalid configuration: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(!config.daemon);
        assert_eq!(config.port, 9000);
        assert_eq!(config.backlog, 10);
        assert_eq!(config.recv_chunk_size, 1024);
        assert_eq!(config.max_pending_bytes, None);
        assert_eq!(config.data_file, PathBuf::from("/var/tmp/aesdsocketdata"));
        assert_eq!(config.log_target, LogTarget::Syslog);
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            port = 9100
            backlog = 32
            recv_chunk_size = 512
            max_pending_bytes = 1048576

            [storage]
            data_file = "/tmp/records"
            sync_on_append = true

            [logging]
            level = "debug"
            target = "stderr"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.backlog, 32);
        assert_eq!(config.server.recv_chunk_size, 512);
        assert_eq!(config.server.max_pending_bytes, Some(1048576));
        assert_eq!(config.storage.data_file, PathBuf::from("/tmp/records"));
        assert!(config.storage.sync_on_append);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.target, LogTarget::Stderr);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: TomlConfig = toml::from_str("[storage]\nsync_on_append = true\n").unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.storage.data_file, PathBuf::from("/var/tmp/aesdsocketdata"));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_cli_daemon_flag() {
        assert!(CliArgs::try_parse_from(["aesdsocket", "-d"]).unwrap().daemon);
        assert!(CliArgs::try_parse_from(["aesdsocket", "--daemon"]).unwrap().daemon);
        assert!(!CliArgs::try_parse_from(["aesdsocket"]).unwrap().daemon);
    }

    #[test]
    fn test_cli_rejects_extra_arguments() {
        assert!(CliArgs::try_parse_from(["aesdsocket", "-x"]).is_err());
        assert!(CliArgs::try_parse_from(["aesdsocket", "-d", "extra"]).is_err());
    }

    #[test]
    fn test_cli_has_no_help_or_version() {
        for flag in ["-h", "--help", "-V", "--version"] {
            let err = CliArgs::try_parse_from(["aesdsocket", flag]).unwrap_err();
            assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument, "{flag}");
        }
    }

    #[test]
    fn test_invalid_values_rejected() {
        let toml_config: TomlConfig = toml::from_str("[server]\nrecv_chunk_size = 0\n").unwrap();
        let err = Config::resolve(CliArgs { daemon: false }, toml_config).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let toml_config: TomlConfig = toml::from_str("[server]\nbacklog = 0\n").unwrap();
        assert!(Config::resolve(CliArgs { daemon: false }, toml_config).is_err());
    }

    #[test]
    fn test_read_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            Config::read_file(missing),
            Err(ConfigError::FileRead(_, _))
        ));

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "[server\nport = ").unwrap();
        assert!(matches!(
            Config::read_file(bad),
            Err(ConfigError::TomlParse(_, _))
        ));
    }
}
