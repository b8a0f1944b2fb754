//! Daemon configuration.
//!
//! Loaded from a TOML file through the `config` crate and layered with
//! environment overrides of the form `ADBSTATUS__SECTION__KEY`
//! (for example `ADBSTATUS__MONITOR__CHECK_INTERVAL_SECS=10`). Every field has a
//! default, so an empty file or no file at all yields a usable configuration.
//!
//! ```toml
//! [monitor]
//! check_interval_secs = 5
//!
//! [server]
//! port = 8999
//!
//! [[rules]]
//! name = "pixel"
//! device = { model = "Pixel_7" }
//! connect = "adb shell settings put global stay_on_while_plugged_in 3"
//! sleep = "adb shell input keyevent KEYCODE_SLEEP"
//! ```

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::rules::ActionRule;

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "ADBSTATUS";

/// Separator between prefix, section and key in environment overrides.
pub const ENV_SEPARATOR: &str = "__";

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly requested file does not exist.
    #[error("configuration file not found: {0}")]
    NotFound(String),

    /// The platform has no usable configuration directory.
    #[error("cannot determine a configuration directory for this platform")]
    NoConfigDir,

    /// The file or an environment override could not be read or deserialised.
    #[error("failed to load configuration: {0}")]
    ParseError(#[from] config::ConfigError),

    /// A single field holds an unusable value.
    #[error("{field}: {message}")]
    ValidationError {
        /// Dotted path of the field.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields hold unusable values.
    #[error("{} validation errors", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Poll loop and action settings.
    pub monitor: MonitorConfig,
    /// Sleep/wake hook settings.
    pub sleep_monitor: SleepMonitorConfig,
    /// Status server settings.
    pub server: ServerConfig,
    /// Log output settings.
    pub logging: LoggingConfig,
    /// Daemon process settings.
    pub daemon: DaemonConfig,
    /// Device filters and their action scripts, evaluated in order.
    pub rules: Vec<ActionRule>,
}

/// `[monitor]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Seconds between device polls.
    pub check_interval_secs: u64,
    /// Device-bridge executable.
    pub bridge_program: String,
    /// Upper bound for one bridge invocation.
    pub bridge_timeout_secs: u64,
    /// Upper bound for one action script.
    pub action_timeout_secs: u64,
    /// Shell used to run action scripts with `-c`.
    pub shell: String,
    /// Run identical script text only once per device per event.
    pub unique_scripts: bool,
    /// Fire Connect for devices already present at startup.
    pub connect_on_startup: bool,
    /// How long poll and power tasks get to finish once shutdown starts.
    pub shutdown_grace_secs: u64,
    /// Capacity of the dispatch queue.
    pub queue_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 5,
            bridge_program: "adb".to_string(),
            bridge_timeout_secs: 10,
            action_timeout_secs: 30,
            shell: "/bin/sh".to_string(),
            unique_scripts: false,
            connect_on_startup: false,
            shutdown_grace_secs: 5,
            queue_capacity: 64,
        }
    }
}

impl MonitorConfig {
    /// Poll interval.
    #[must_use]
    pub const fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    /// Bridge timeout.
    #[must_use]
    pub const fn bridge_timeout(&self) -> Duration {
        Duration::from_secs(self.bridge_timeout_secs)
    }

    /// Action timeout.
    #[must_use]
    pub const fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_secs)
    }

    /// Shutdown grace period.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// `[sleep_monitor]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SleepMonitorConfig {
    /// Whether to listen for sleep/wake at all.
    pub enabled: bool,
    /// Hook executable, launched as `<program> -s <cmd> -w <cmd>`.
    pub program: String,
    /// Where the hook's pid is recorded.
    pub pid_file: PathBuf,
    /// Directory the hook drops marker files into. A temporary directory when unset.
    pub event_dir: Option<PathBuf>,
    /// Identical consecutive events closer together than this are dropped.
    pub dedup_window_ms: u64,
    /// How often the event directory is checked.
    pub poll_interval_ms: u64,
}

impl Default for SleepMonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            program: "sleepwatcher".to_string(),
            pid_file: runtime_dir().join("sleepwatcher.pid"),
            event_dir: None,
            dedup_window_ms: 5000,
            poll_interval_ms: 500,
        }
    }
}

impl SleepMonitorConfig {
    /// De-duplication window.
    #[must_use]
    pub const fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }

    /// Marker poll interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// `[server]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Whether to serve the status API.
    pub enabled: bool,
    /// Address to bind.
    pub bind_address: String,
    /// Port to bind.
    pub port: u16,
    /// Certificate and key.
    pub tls: TlsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0".to_string(),
            port: 8999,
            tls: TlsConfig::default(),
        }
    }
}

/// `[server.tls]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// PEM certificate chain.
    pub cert_file: PathBuf,
    /// PEM private key.
    pub key_file: PathBuf,
}

impl Default for TlsConfig {
    fn default() -> Self {
        let dir = config_dir().join("ssl");
        Self {
            cert_file: dir.join("adbstatus.crt"),
            key_file: dir.join("adbstatus.key"),
        }
    }
}

/// `[logging]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is not set.
    pub level: String,
    /// Where rolling log files go in background mode.
    pub directory: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: log_dir(),
        }
    }
}

/// `[daemon]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Pid file holding the running daemon's identity.
    pub pid_file: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            pid_file: runtime_dir().join("adbstatusd.pid"),
        }
    }
}

impl Config {
    /// Loads configuration.
    ///
    /// With `path` the file must exist. Without it the default path is used if a
    /// file is there, and defaults otherwise. Environment overrides apply in both
    /// cases. The result is validated.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] for a missing explicit file,
    /// [`ConfigError::ParseError`] for malformed input, or the validation errors.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(p) if !p.exists() => return Err(ConfigError::NotFound(p.display().to_string())),
            Some(p) => (p.to_path_buf(), true),
            None => (Self::default_path()?, false),
        };
        debug!(path = %path.display(), required, "loading configuration");

        let settings = config::Config::builder()
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(required),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parses TOML text without touching the filesystem or environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ParseError`] or the validation errors.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()?;
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Renders the effective configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be represented in TOML.
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// The configuration file used when none is given.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoConfigDir`] when the platform has no config directory.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        #[cfg(target_os = "linux")]
        {
            Ok(PathBuf::from("/etc/adbstatus/adbstatus.toml"))
        }
        #[cfg(not(target_os = "linux"))]
        {
            let dirs = directories::ProjectDirs::from("", "", "adbstatus")
                .ok_or(ConfigError::NoConfigDir)?;
            Ok(dirs.config_dir().join("adbstatus.toml"))
        }
    }

    /// Anchors every relative file or directory setting at `base`.
    ///
    /// The daemon changes its working directory to `/` when it forks, so this
    /// runs first with the directory the command was started from.
    pub fn resolve_paths(&mut self, base: &Path) {
        let paths = [
            &mut self.sleep_monitor.pid_file,
            &mut self.server.tls.cert_file,
            &mut self.server.tls.key_file,
            &mut self.logging.directory,
            &mut self.daemon.pid_file,
        ];
        for path in paths.into_iter().chain(self.sleep_monitor.event_dir.as_mut()) {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    /// Checks every field, reporting all problems at once.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MultipleValidationErrors`] listing each problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        let mut check = |ok: bool, field: &str, message: &str| {
            if !ok {
                errors.push(ConfigError::ValidationError {
                    field: field.to_string(),
                    message: message.to_string(),
                });
            }
        };

        let m = &self.monitor;
        check(m.check_interval_secs > 0, "monitor.check_interval_secs", "must be greater than 0");
        check(m.bridge_timeout_secs > 0, "monitor.bridge_timeout_secs", "must be greater than 0");
        check(m.action_timeout_secs > 0, "monitor.action_timeout_secs", "must be greater than 0");
        check(!m.bridge_program.trim().is_empty(), "monitor.bridge_program", "must not be empty");
        check(!m.shell.trim().is_empty(), "monitor.shell", "must not be empty");
        check(m.queue_capacity > 0, "monitor.queue_capacity", "must be greater than 0");

        let s = &self.sleep_monitor;
        if s.enabled {
            check(
                !s.program.trim().is_empty() || s.event_dir.is_some(),
                "sleep_monitor.program",
                "must not be empty unless event_dir is set",
            );
            check(s.poll_interval_ms > 0, "sleep_monitor.poll_interval_ms", "must be greater than 0");
        }

        if self.server.enabled {
            check(self.server.port > 0, "server.port", "must be greater than 0");
            check(
                self.server.bind_address.parse::<IpAddr>().is_ok(),
                "server.bind_address",
                "must be an IP address",
            );
        }

        for (index, rule) in self.rules.iter().enumerate() {
            let field = format!("rules[{index}]");
            check(
                rule.filter.keys().all(|key| !key.trim().is_empty()),
                &field,
                "device filter keys must not be empty",
            );
            check(rule.has_any_script(), &field, "defines no connect, disconnect, sleep or wake script");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::MultipleValidationErrors(errors))
        }
    }
}

fn config_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/etc/adbstatus")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "adbstatus").map_or_else(
            || std::env::temp_dir().join("adbstatus"),
            |dirs| dirs.config_dir().to_path_buf(),
        )
    }
}

fn runtime_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/run/adbstatus")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "adbstatus").map_or_else(
            || std::env::temp_dir().join("adbstatus"),
            |dirs| dirs.data_local_dir().to_path_buf(),
        )
    }
}

fn log_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/log/adbstatus")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "adbstatus").map_or_else(
            || std::env::temp_dir().join("adbstatus").join("logs"),
            |dirs| dirs.data_local_dir().join("logs"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::EventKind;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.monitor.check_interval(), Duration::from_secs(5));
        assert_eq!(config.server.port, 8999);
        assert_eq!(config.server.bind_address, "0.0.0.0");
        assert!(config.rules.is_empty());
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.monitor.bridge_program, "adb");
        assert_eq!(config.monitor.action_timeout_secs, 30);
        assert!(config.sleep_monitor.enabled);
    }

    #[test]
    fn test_rules_parse_in_order() {
        let config = Config::from_toml_str(
            r#"
            [monitor]
            check_interval_secs = 2

            [[rules]]
            name = "pixel"
            device = { model = "Pixel_7" }
            connect = "echo hi"

            [[rules]]
            sleep = "echo zz"
            "#,
        )
        .unwrap();

        assert_eq!(config.monitor.check_interval_secs, 2);
        assert_eq!(config.rules.len(), 2);
        assert_eq!(config.rules[0].label(0), "pixel");
        assert_eq!(config.rules[0].script(EventKind::Connect), Some("echo hi"));
        assert!(config.rules[1].filter.is_empty());
        assert_eq!(config.rules[1].label(1), "rule#1");
    }

    #[test]
    fn test_validation_collects_every_problem() {
        let mut config = Config::default();
        config.monitor.check_interval_secs = 0;
        config.monitor.bridge_program = " ".to_string();
        config.server.port = 0;

        match config.validate() {
            Err(ConfigError::MultipleValidationErrors(errors)) => {
                assert_eq!(errors.len(), 3);
                let text: Vec<String> = errors.iter().map(ToString::to_string).collect();
                assert!(text.iter().any(|t| t.starts_with("monitor.check_interval_secs")));
                assert!(text.iter().any(|t| t.starts_with("server.port")));
            }
            other => panic!("expected validation errors, got {other:?}"),
        }
    }

    #[test]
    fn test_rule_without_scripts_is_invalid() {
        let result = Config::from_toml_str(
            r#"
            [[rules]]
            device = { serial = "A" }
            "#,
        );
        assert!(matches!(result, Err(ConfigError::MultipleValidationErrors(_))));
    }

    #[test]
    fn test_disabled_server_skips_server_checks() {
        let mut config = Config::default();
        config.server.enabled = false;
        config.server.port = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_relative_paths_resolve_against_base() {
        let mut config = Config::from_toml_str(
            r#"
            [server.tls]
            cert_file = "certs/adbstatus.crt"
            key_file = "/etc/adbstatus/adbstatus.key"

            [sleep_monitor]
            event_dir = "events"

            [daemon]
            pid_file = "adbstatusd.pid"
            "#,
        )
        .unwrap();
        config.resolve_paths(Path::new("/home/me/adb"));

        assert_eq!(config.server.tls.cert_file, Path::new("/home/me/adb/certs/adbstatus.crt"));
        assert_eq!(config.server.tls.key_file, Path::new("/etc/adbstatus/adbstatus.key"));
        assert_eq!(config.sleep_monitor.event_dir.as_deref(), Some(Path::new("/home/me/adb/events")));
        assert_eq!(config.daemon.pid_file, Path::new("/home/me/adb/adbstatusd.pid"));
        assert!(config.logging.directory.is_absolute());
    }

    #[test]
    fn test_load_explicit_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            Config::load(Some(&missing)),
            Err(ConfigError::NotFound(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[server]\nport = 9443\n\n[[rules]]\ndevice = {{ serial = \"A\" }}\nwake = \"true\""
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.server.port, 9443);
        assert_eq!(config.rules[0].script(EventKind::Wake), Some("true"));
    }

    #[test]
    fn test_default_renders_as_toml() {
        let text = Config::default().to_toml_string().unwrap();
        assert!(text.contains("[monitor]"));
        assert!(text.contains("check_interval_secs = 5"));
        let back = Config::from_toml_str(&text).unwrap();
        assert_eq!(back.server.port, 8999);
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        assert!(matches!(
            Config::from_toml_str("[monitor\ncheck_interval_secs = "),
            Err(ConfigError::ParseError(_))
        ));
    }
}
