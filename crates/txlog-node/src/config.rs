use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Which [`txlog_core::Log`] backend to construct.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum LogBackend {
    Memory,
    Local,
}

/// Node configuration, assembled from (in increasing precedence) a TOML
/// file, `TXLOG_`-prefixed environment variables, and CLI flags.
#[derive(Debug, Clone, clap::Args)]
pub struct NodeConfig {
    /// Path to a TOML config file to load before applying env/CLI overrides.
    #[arg(long, env = "TXLOG_CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// Which log backend to run.
    #[arg(long = "log-backend", env = "TXLOG_LOG_BACKEND", value_enum, default_value = "memory")]
    pub log_backend: LogBackend,

    /// Filesystem root for log segments (local backend only).
    #[arg(long = "log-path", env = "TXLOG_LOG_PATH")]
    pub log_path: Option<PathBuf>,

    /// Append buffer size in bytes, accepts human sizes like "4KiB".
    #[arg(long = "buffer-size", env = "TXLOG_BUFFER_SIZE", default_value = "4096", value_parser = parse_size_arg)]
    pub buffer_size: u64,

    /// Maximum size a single log segment may grow to before rotation.
    #[arg(long = "log-max-segment-size", env = "TXLOG_LOG_MAX_SEGMENT_SIZE", default_value = "1GiB", value_parser = parse_size_arg)]
    pub log_max_segment_size: u64,

    /// Idle backoff for the polling subscription strategy.
    #[arg(long = "poll-sleep-duration", env = "TXLOG_POLL_SLEEP_DURATION", default_value = "100ms", value_parser = parse_duration_arg)]
    pub poll_sleep_duration: Duration,

    /// Idle threshold before the flusher issues a `FlushChunk`.
    #[arg(long = "flush-timeout", env = "TXLOG_FLUSH_TIMEOUT", default_value = "5s", value_parser = parse_duration_arg)]
    pub flush_timeout: Duration,

    /// `tracing-subscriber` `EnvFilter` directive string.
    #[arg(long = "log-level", env = "TXLOG_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Optional `host:port` to expose a Prometheus text-exposition endpoint
    /// on. The HTTP listener itself is assembled by the embedding
    /// application; this only configures where it should bind.
    #[arg(long = "metrics-listen-addr", env = "TXLOG_METRICS_LISTEN_ADDR")]
    pub metrics_listen_addr: Option<String>,
}

/// The subset of [`NodeConfig`] fields that may also come from a TOML file.
/// CLI flags and environment variables always win over file values; this
/// struct exists only to give `toml` something to deserialize into before
/// the values are merged with `clap`'s parsed arguments.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct FileConfig {
    pub log: Option<LogFileConfig>,
    pub log_level: Option<String>,
    pub metrics: Option<MetricsFileConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct LogFileConfig {
    pub backend: Option<LogBackend>,
    pub path: Option<PathBuf>,
    pub buffer_size: Option<String>,
    pub max_segment_size: Option<String>,
    pub poll_sleep_duration: Option<String>,
    pub flush_timeout: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct MetricsFileConfig {
    pub listen_addr: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

fn parse_size_arg(s: &str) -> Result<u64, String> {
    parse_size::parse_size(s).map_err(|e| e.to_string())
}

fn parse_duration_arg(s: &str) -> Result<Duration, String> {
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Load a [`FileConfig`] from `path`, if given. Returns the default (empty)
/// config when `path` is `None`, since a config file is optional.
pub fn load_file_config(path: Option<&PathBuf>) -> Result<FileConfig, ConfigError> {
    let Some(path) = path else {
        return Ok(FileConfig::default());
    };
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read { path: path.clone(), source: e })?;
    toml::from_str(&contents).map_err(|e| ConfigError::Parse { path: path.clone(), source: e })
}

/// Merge a [`FileConfig`] underneath CLI-parsed `NodeConfig` values: a
/// field's CLI/env value is used unless the user left it at clap's default
/// *and* the file provided an override. Since clap already resolved
/// env-var precedence over the file at parse time, this only needs to
/// backfill fields the file set and the CLI/env left untouched.
pub fn apply_file_overrides(mut config: NodeConfig, file: FileConfig, cli_used_defaults: &DefaultsUsed) -> NodeConfig {
    if let Some(log) = file.log {
        if cli_used_defaults.log_backend {
            if let Some(backend) = log.backend {
                config.log_backend = backend;
            }
        }
        if cli_used_defaults.log_path {
            config.log_path = config.log_path.or(log.path);
        }
        if cli_used_defaults.buffer_size {
            if let Some(v) = log.buffer_size.and_then(|s| parse_size::parse_size(&s).ok()) {
                config.buffer_size = v;
            }
        }
        if cli_used_defaults.log_max_segment_size {
            if let Some(v) = log.max_segment_size.and_then(|s| parse_size::parse_size(&s).ok()) {
                config.log_max_segment_size = v;
            }
        }
        if cli_used_defaults.poll_sleep_duration {
            if let Some(v) = log.poll_sleep_duration.and_then(|s| humantime::parse_duration(&s).ok()) {
                config.poll_sleep_duration = v;
            }
        }
        if cli_used_defaults.flush_timeout {
            if let Some(v) = log.flush_timeout.and_then(|s| humantime::parse_duration(&s).ok()) {
                config.flush_timeout = v;
            }
        }
    }
    if cli_used_defaults.log_level {
        if let Some(level) = file.log_level {
            config.log_level = level;
        }
    }
    if cli_used_defaults.metrics_listen_addr {
        if let Some(metrics) = file.metrics {
            config.metrics_listen_addr = config.metrics_listen_addr.or(metrics.listen_addr);
        }
    }
    config
}

/// Tracks, per field, whether the CLI parse produced clap's built-in
/// default (as opposed to a value explicitly supplied via flag or env var).
/// Needed because `clap` does not expose "was this the default" on the
/// parsed struct itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultsUsed {
    pub log_backend: bool,
    pub log_path: bool,
    pub buffer_size: bool,
    pub log_max_segment_size: bool,
    pub poll_sleep_duration: bool,
    pub flush_timeout: bool,
    pub log_level: bool,
    pub metrics_listen_addr: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_file_config_parses_a_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("txlog.toml");
        std::fs::write(&path, "log-level = \"debug\"\n\n[log]\nbackend = \"local\"\npath = \"/data/txlog\"\n").unwrap();
        let file = load_file_config(Some(&path)).unwrap();
        assert_eq!(file.log_level.as_deref(), Some("debug"));
        let log = file.log.unwrap();
        assert_eq!(log.backend, Some(LogBackend::Local));
        assert_eq!(log.path, Some(PathBuf::from("/data/txlog")));
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let err = load_file_config(Some(&PathBuf::from("/nonexistent/txlog.toml")));
        assert!(matches!(err, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn file_config_overrides_only_apply_to_defaulted_fields() {
        let config = NodeConfig {
            config_file: None,
            log_backend: LogBackend::Memory,
            log_path: None,
            buffer_size: 4096,
            log_max_segment_size: 1024,
            poll_sleep_duration: Duration::from_millis(100),
            flush_timeout: Duration::from_secs(5),
            log_level: "info".into(),
            metrics_listen_addr: None,
        };
        let file = FileConfig {
            log: Some(LogFileConfig {
                backend: Some(LogBackend::Local),
                path: Some(PathBuf::from("/var/lib/txlog")),
                buffer_size: None,
                max_segment_size: None,
                poll_sleep_duration: None,
                flush_timeout: None,
            }),
            log_level: None,
            metrics: None,
        };
        let merged = apply_file_overrides(
            config,
            file,
            &DefaultsUsed {
                log_backend: true,
                log_path: true,
                ..Default::default()
            },
        );
        assert_eq!(merged.log_backend, LogBackend::Local);
        assert_eq!(merged.log_path, Some(PathBuf::from("/var/lib/txlog")));
        assert_eq!(merged.buffer_size, 4096);
    }
}
