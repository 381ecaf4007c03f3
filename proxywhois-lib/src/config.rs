//! Configuration file parsing and management.
//!
//! This module handles loading configuration from TOML files and
//! environment variables and folding them into a `PipelineConfig` with the
//! usual precedence: defaults < file < environment < command line.

use crate::error::ProxyWhoisError;
use crate::proxy::ProxyType;
use crate::types::PipelineConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration loaded from TOML files.
///
/// ```toml
/// [defaults]
/// retry_limit = 3
/// worker_delay = "20s"
/// lookup_timeout = "10s"
/// output_dir = "whois/"
///
/// [probe]
/// host = "icanhazip.com"
/// port = 80
/// timeout = "10s"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    /// Default values for CLI options
    #[serde(skip_serializing_if = "Option::is_none")]
    pub defaults: Option<DefaultsConfig>,

    /// Liveness probe settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe: Option<ProbeFileConfig>,
}

/// Default configuration values that map to CLI options.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DefaultsConfig {
    /// Counted failures before a record is given up on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_limit: Option<usize>,

    /// Delay between items (as string, e.g. "20s", "500ms")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_delay: Option<String>,

    /// WHOIS exchange timeout (as string)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lookup_timeout: Option<String>,

    /// Directory WHOIS data is written to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,

    /// Follow registrar referrals
    #[serde(skip_serializing_if = "Option::is_none")]
    pub follow_referrals: Option<bool>,

    /// Write JSON audit files
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit: Option<bool>,

    /// Proxy type for list entries without a scheme
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_type: Option<String>,
}

/// `[probe]` table.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProbeFileConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

impl FileConfig {
    /// Apply the file values on top of `config`.
    ///
    /// Durations are expected to have passed validation; unparseable ones
    /// are skipped.
    pub fn apply_to(&self, mut config: PipelineConfig) -> PipelineConfig {
        if let Some(defaults) = &self.defaults {
            if let Some(limit) = defaults.retry_limit {
                config = config.with_retry_limit(limit);
            }
            if let Some(delay) = defaults.worker_delay.as_deref().and_then(parse_duration_string) {
                config = config.with_worker_delay(delay);
            }
            if let Some(timeout) = defaults
                .lookup_timeout
                .as_deref()
                .and_then(parse_duration_string)
            {
                config = config.with_lookup_timeout(timeout);
            }
            if let Some(dir) = &defaults.output_dir {
                config = config.with_output_dir(dir.clone());
            }
            if let Some(follow) = defaults.follow_referrals {
                config = config.with_follow_referrals(follow);
            }
            if let Some(audit) = defaults.audit {
                config = config.with_audit(audit);
            }
        }

        if let Some(probe) = &self.probe {
            if let Some(host) = &probe.host {
                config.probe.host = host.clone();
            }
            if let Some(port) = probe.port {
                config.probe.port = port;
            }
            if let Some(timeout) = probe.timeout.as_deref().and_then(parse_duration_string) {
                config = config.with_probe_timeout(timeout);
            }
        }

        config
    }

    /// Default proxy type from `[defaults] proxy_type`.
    pub fn proxy_type(&self) -> Option<ProxyType> {
        self.defaults
            .as_ref()
            .and_then(|d| d.proxy_type.as_deref())
            .and_then(|t| t.parse().ok())
    }
}

/// Configuration discovery and loading functionality.
pub struct ConfigManager {
    /// Whether to report which files were loaded
    pub verbose: bool,
}

impl ConfigManager {
    /// Create a new configuration manager.
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    /// Load configuration from a specific file.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// The parsed configuration or an error if reading, parsing or
    /// validation fails.
    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<FileConfig, ProxyWhoisError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ProxyWhoisError::file_error(
                path.to_string_lossy(),
                "Configuration file not found",
            ));
        }

        let content = fs::read_to_string(path).map_err(|e| {
            ProxyWhoisError::file_error(
                path.to_string_lossy(),
                format!("Failed to read configuration file: {}", e),
            )
        })?;

        let config: FileConfig = toml::from_str(&content).map_err(|e| {
            ProxyWhoisError::config(format!("Failed to parse TOML configuration: {}", e))
        })?;

        self.validate_config(&config)?;

        Ok(config)
    }

    /// Discover and load configuration files in precedence order.
    ///
    /// XDG config < `~/.proxywhois.toml` < `./proxywhois.toml`. A file that
    /// fails to load is reported and skipped.
    pub fn discover_and_load(&self) -> Result<FileConfig, ProxyWhoisError> {
        let mut merged_config = FileConfig::default();

        let candidates = [
            self.get_xdg_config_path(),
            self.get_global_config_path(),
            self.get_local_config_path(),
        ];

        for path in candidates.into_iter().flatten() {
            match self.load_file(&path) {
                Ok(config) => {
                    if self.verbose {
                        debug!(path = %path.display(), "loaded configuration file");
                    }
                    merged_config = self.merge_configs(merged_config, config);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "ignoring configuration file"),
            }
        }

        Ok(merged_config)
    }

    /// Get the local configuration file path.
    fn get_local_config_path(&self) -> Option<PathBuf> {
        ["./proxywhois.toml", "./.proxywhois.toml"]
            .iter()
            .map(Path::new)
            .find(|path| path.exists())
            .map(Path::to_path_buf)
    }

    /// Get the global configuration file path.
    fn get_global_config_path(&self) -> Option<PathBuf> {
        let home = env::var_os("HOME")?;
        [".proxywhois.toml", "proxywhois.toml"]
            .iter()
            .map(|candidate| Path::new(&home).join(candidate))
            .find(|path| path.exists())
    }

    /// Get the XDG configuration file path.
    fn get_xdg_config_path(&self) -> Option<PathBuf> {
        let config_dir = env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| env::var_os("HOME").map(|home| Path::new(&home).join(".config")))?;

        let path = config_dir.join("proxywhois").join("config.toml");
        if path.exists() {
            Some(path)
        } else {
            None
        }
    }

    /// Merge two configurations field by field.
    ///
    /// Values from `higher` take precedence over values from `lower`.
    fn merge_configs(&self, lower: FileConfig, higher: FileConfig) -> FileConfig {
        FileConfig {
            defaults: match (lower.defaults, higher.defaults) {
                (Some(lower), Some(higher)) => Some(DefaultsConfig {
                    retry_limit: higher.retry_limit.or(lower.retry_limit),
                    worker_delay: higher.worker_delay.or(lower.worker_delay),
                    lookup_timeout: higher.lookup_timeout.or(lower.lookup_timeout),
                    output_dir: higher.output_dir.or(lower.output_dir),
                    follow_referrals: higher.follow_referrals.or(lower.follow_referrals),
                    audit: higher.audit.or(lower.audit),
                    proxy_type: higher.proxy_type.or(lower.proxy_type),
                }),
                (lower, higher) => higher.or(lower),
            },
            probe: match (lower.probe, higher.probe) {
                (Some(lower), Some(higher)) => Some(ProbeFileConfig {
                    host: higher.host.or(lower.host),
                    port: higher.port.or(lower.port),
                    timeout: higher.timeout.or(lower.timeout),
                }),
                (lower, higher) => higher.or(lower),
            },
        }
    }

    /// Validate a configuration for common issues.
    fn validate_config(&self, config: &FileConfig) -> Result<(), ProxyWhoisError> {
        if let Some(defaults) = &config.defaults {
            if let Some(limit) = defaults.retry_limit {
                if limit == 0 || limit > 100 {
                    return Err(ProxyWhoisError::config("Retry limit must be between 1 and 100"));
                }
            }

            for (name, value) in [
                ("worker_delay", &defaults.worker_delay),
                ("lookup_timeout", &defaults.lookup_timeout),
            ] {
                validate_duration(name, value.as_deref())?;
            }

            if let Some(proxy_type) = &defaults.proxy_type {
                proxy_type
                    .parse::<ProxyType>()
                    .map_err(ProxyWhoisError::config)?;
            }
        }

        if let Some(probe) = &config.probe {
            validate_duration("probe.timeout", probe.timeout.as_deref())?;
            if probe.port == Some(0) {
                return Err(ProxyWhoisError::config("Probe port cannot be 0"));
            }
            if matches!(&probe.host, Some(host) if host.trim().is_empty()) {
                return Err(ProxyWhoisError::config("Probe host cannot be empty"));
            }
        }

        Ok(())
    }
}

fn validate_duration(name: &str, value: Option<&str>) -> Result<(), ProxyWhoisError> {
    match value {
        Some(v) if parse_duration_string(v).is_none() => Err(ProxyWhoisError::config(format!(
            "Invalid {} '{}'. Use format like '500ms', '20s', '2m'",
            name, v
        ))),
        _ => Ok(()),
    }
}

/// Environment variable configuration that mirrors CLI options.
///
/// This represents configuration values that can be set via PW_* environment variables.
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    pub retry_limit: Option<usize>,
    pub worker_delay: Option<Duration>,
    pub lookup_timeout: Option<Duration>,
    pub probe_timeout: Option<Duration>,
    pub probe_host: Option<String>,
    pub output_dir: Option<PathBuf>,
}

impl EnvConfig {
    /// Apply the environment values on top of `config`.
    pub fn apply_to(&self, mut config: PipelineConfig) -> PipelineConfig {
        if let Some(limit) = self.retry_limit {
            config = config.with_retry_limit(limit);
        }
        if let Some(delay) = self.worker_delay {
            config = config.with_worker_delay(delay);
        }
        if let Some(timeout) = self.lookup_timeout {
            config = config.with_lookup_timeout(timeout);
        }
        if let Some(timeout) = self.probe_timeout {
            config = config.with_probe_timeout(timeout);
        }
        if let Some(host) = &self.probe_host {
            config.probe.host = host.clone();
        }
        if let Some(dir) = &self.output_dir {
            config = config.with_output_dir(dir.clone());
        }
        config
    }
}

/// Load configuration from the process environment.
///
/// Invalid values are logged as warnings and ignored.
pub fn load_env_config() -> EnvConfig {
    load_env_config_from(|key| env::var(key).ok())
}

/// Load PW_* configuration through an arbitrary variable lookup.
pub fn load_env_config_from<F>(lookup: F) -> EnvConfig
where
    F: Fn(&str) -> Option<String>,
{
    let mut env_config = EnvConfig::default();

    // PW_RETRY_LIMIT - counted failures per record
    if let Some(val) = lookup("PW_RETRY_LIMIT") {
        match val.trim().parse::<usize>() {
            Ok(limit) if (1..=100).contains(&limit) => {
                debug!("Using PW_RETRY_LIMIT={}", limit);
                env_config.retry_limit = Some(limit);
            }
            _ => warn!("Invalid PW_RETRY_LIMIT='{}', must be 1-100", val),
        }
    }

    let duration_var = |key: &str| -> Option<Duration> {
        let val = lookup(key)?;
        match parse_duration_string(&val) {
            Some(duration) => {
                debug!("Using {}={}", key, val);
                Some(duration)
            }
            None => {
                warn!("Invalid {}='{}', use format like '500ms', '20s', '2m'", key, val);
                None
            }
        }
    };

    env_config.worker_delay = duration_var("PW_WORKER_DELAY");
    env_config.lookup_timeout = duration_var("PW_LOOKUP_TIMEOUT");
    env_config.probe_timeout = duration_var("PW_PROBE_TIMEOUT");

    // PW_PROBE_HOST - IP echo host
    if let Some(host) = lookup("PW_PROBE_HOST") {
        if !host.trim().is_empty() {
            env_config.probe_host = Some(host.trim().to_string());
        }
    }

    // PW_OUTPUT_DIR - where WHOIS data is written
    if let Some(dir) = lookup("PW_OUTPUT_DIR") {
        if !dir.trim().is_empty() {
            env_config.output_dir = Some(PathBuf::from(dir.trim()));
        }
    }

    env_config
}

/// Parse a duration string like "500ms", "20s", "2m". A bare number is
/// taken as seconds.
pub fn parse_duration_string(value: &str) -> Option<Duration> {
    let value = value.trim().to_lowercase();

    if let Some(ms) = value.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(s) = value.strip_suffix('s') {
        s.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(m) = value.strip_suffix('m') {
        m.trim()
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        value.parse::<u64>().ok().map(Duration::from_secs)
    }
}
