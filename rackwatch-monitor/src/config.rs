//! `rackwatch.yaml`
//!
//! Every section and field has a default, so a partial file is fine and a
//! missing one is replaced by the defaults (written back to disk). A file
//! that does not parse or validate is reported and left untouched.

use rackwatch_core::PollConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

pub const CONFIG_ENV: &str = "RACKWATCH_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "rackwatch.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("cannot write {path}: {source}")]
    Write { path: PathBuf, source: std::io::Error },
    #[error("invalid YAML: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid value: {0}")]
    Invalid(String),
    #[error("secret file {0} is empty")]
    EmptySecret(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub poll: PollSettings,
    pub sensor: SensorSettings,
    pub web: WebSettings,
    pub database: DatabaseSettings,
    pub display: DisplaySettings,
    pub telemetry: TelemetrySettings,
    pub shutdown: ShutdownSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    pub interval_seconds: u64,
    pub threshold: f64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self { interval_seconds: 5, threshold: 40.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorSettings {
    /// IIO device directory of the DHT11 driver.
    pub iio_device: PathBuf,
    pub timeout_seconds: u64,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            iio_device: PathBuf::from("/sys/bus/iio/devices/iio:device0"),
            timeout_seconds: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSettings {
    pub bind: String,
    /// When set, `POST /override` needs this file's content in `x-api-key`.
    pub api_key_file: Option<PathBuf>,
}

impl Default for WebSettings {
    fn default() -> Self {
        Self { bind: "0.0.0.0:5000".into(), api_key_file: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub enabled: bool,
    pub path: PathBuf,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self { enabled: true, path: PathBuf::from("rackwatch.db") }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplaySettings {
    pub enabled: bool,
    pub i2c_bus: PathBuf,
    pub address: u16,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self { enabled: true, i2c_bus: PathBuf::from("/dev/i2c-1"), address: 0x3e }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    pub enabled: bool,
    pub url: String,
    pub org: String,
    pub bucket: String,
    pub measurement: String,
    pub token_file: PathBuf,
    pub timeout_seconds: u64,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "https://eu-central-1-1.aws.cloud2.influxdata.com".into(),
            org: "home".into(),
            bucket: "rack".into(),
            measurement: "rack_climate".into(),
            token_file: PathBuf::from("secrets/influx.token"),
            timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Proxmox,
    Agents,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownSettings {
    pub enabled: bool,
    pub backend: Backend,
    /// Empty means every node the backend reports.
    pub hosts: Vec<String>,
    pub proxmox: ProxmoxSettings,
    pub agents: AgentsSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxmoxSettings {
    pub url: String,
    pub username: String,
    pub password: Option<String>,
    pub password_file: Option<PathBuf>,
    pub verify_ssl: bool,
    pub timeout_seconds: u64,
}

impl Default for ProxmoxSettings {
    fn default() -> Self {
        Self {
            url: "https://192.168.1.10:8006".into(),
            username: "root@pam".into(),
            password: None,
            password_file: Some(PathBuf::from("secrets/proxmox.password")),
            verify_ssl: false,
            timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsSettings {
    pub broker_host: String,
    pub broker_port: u16,
    pub topic_prefix: String,
}

impl Default for AgentsSettings {
    fn default() -> Self {
        Self {
            broker_host: "localhost".into(),
            broker_port: 1883,
            topic_prefix: "rackwatch/agents/command".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// `EnvFilter` directives; `RUST_LOG` takes precedence.
    pub level: String,
    pub path: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self { level: "info".into(), path: Some(PathBuf::from("rackwatch.log")) }
    }
}

impl Settings {
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let settings: Settings = serde_yaml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll.interval_seconds == 0 {
            return Err(ConfigError::Invalid("poll.interval_seconds must be > 0".into()));
        }
        if !self.poll.threshold.is_finite() {
            return Err(ConfigError::Invalid("poll.threshold must be a finite number".into()));
        }
        if self.sensor.timeout_seconds == 0 {
            return Err(ConfigError::Invalid("sensor.timeout_seconds must be > 0".into()));
        }
        if self.telemetry.timeout_seconds == 0 {
            return Err(ConfigError::Invalid("telemetry.timeout_seconds must be > 0".into()));
        }
        if self.shutdown.proxmox.timeout_seconds == 0 {
            return Err(ConfigError::Invalid("shutdown.proxmox.timeout_seconds must be > 0".into()));
        }
        Ok(())
    }

    /// The part of the settings the poll loop reads on every tick.
    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            interval: Duration::from_secs(self.poll.interval_seconds),
            threshold: self.poll.threshold,
        }
    }

    pub fn sensor_timeout(&self) -> Duration {
        Duration::from_secs(self.sensor.timeout_seconds)
    }

    pub async fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let yaml = serde_yaml::to_string(self)?;
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .await
                .map_err(|source| ConfigError::Write { path: path.to_path_buf(), source })?;
        }
        fs::write(path, yaml)
            .await
            .map_err(|source| ConfigError::Write { path: path.to_path_buf(), source })
    }
}

/// Settings plus what went wrong while getting them. Logging is not up yet
/// when the config is loaded, so the warnings are handed back to `main`.
#[derive(Debug)]
pub struct LoadedConfig {
    pub settings: Settings,
    pub warnings: Vec<String>,
    pub created: bool,
}

pub fn config_path() -> PathBuf {
    std::env::var(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

pub async fn load_config(path: &Path) -> LoadedConfig {
    let mut warnings = Vec::new();

    if !fs::try_exists(path).await.unwrap_or(false) {
        let settings = Settings::default();
        let created = match settings.save(path).await {
            Ok(()) => true,
            Err(e) => {
                warnings.push(format!("no config file, defaults not persisted: {e}"));
                false
            }
        };
        return LoadedConfig { settings, warnings, created };
    }

    let broken = match reload(path).await {
        Ok(settings) => return LoadedConfig { settings, warnings, created: false },
        Err(e @ ConfigError::Read { .. }) => {
            warnings.push(format!("{e}, using defaults"));
            return LoadedConfig { settings: Settings::default(), warnings, created: false };
        }
        Err(e) => e,
    };
    warnings.push(format!("{broken}, using defaults"));

    // Keep the unparseable file for the operator before writing defaults.
    let backup = backup_path(path);
    if let Err(e) = fs::rename(path, &backup).await {
        warnings.push(format!("cannot move broken config to {}: {e}, defaults not persisted", backup.display()));
        return LoadedConfig { settings: Settings::default(), warnings, created: false };
    }
    warnings.push(format!("broken config moved to {}", backup.display()));

    let settings = Settings::default();
    let created = match settings.save(path).await {
        Ok(()) => {
            warnings.push(format!("defaults written to {}", path.display()));
            true
        }
        Err(e) => {
            warnings.push(format!("defaults not persisted: {e}"));
            false
        }
    };
    LoadedConfig { settings, warnings, created }
}

/// `rackwatch.yaml` becomes `rackwatch.yaml.bak`.
fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".bak");
    PathBuf::from(name)
}

/// Re-reads the file. Unlike [`load_config`] this never falls back to the
/// defaults: the caller keeps whatever it had on error.
pub async fn reload(path: &Path) -> Result<Settings, ConfigError> {
    let text = fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
    Settings::parse(&text)
}

/// Reads a token or password file, trimming the trailing newline.
pub async fn read_secret(path: &Path) -> Result<String, ConfigError> {
    let raw = fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
    let secret = raw.trim();
    if secret.is_empty() {
        return Err(ConfigError::EmptySecret(path.to_path_buf()));
    }
    Ok(secret.to_string())
}
