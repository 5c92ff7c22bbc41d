use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::threshold::{Threshold, ThresholdError};

/// Prefix of environment variables overriding file keys (`IPCOUNT_PORT`, ...)
pub const ENV_PREFIX: &str = "IPCOUNT";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HMAC key for visitor fingerprints
    pub secret: String,
    pub server: ServerConfig,
    pub window: WindowConfig,
    pub geoip: GeoIpConfig,
    pub sweep: SweepConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Active window, split the way operators write it
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WindowConfig {
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoIpConfig {
    /// Path to a GeoLite2/GeoIP2 Country or City .mmdb file.
    /// If None, visits are stored without a country.
    pub database_path: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Seconds between background sweeps; 0 leaves eviction to count requests
    pub interval_secs: u64,
}

impl WindowConfig {
    pub fn threshold(&self) -> Result<Threshold, ThresholdError> {
        Threshold::new(self.days, self.hours, self.minutes)
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            days: Threshold::DEFAULT_DAYS,
            hours: Threshold::DEFAULT_HOURS,
            minutes: Threshold::DEFAULT_MINUTES,
        }
    }
}

/// Flat key layout of the INI file
#[derive(Debug, Deserialize)]
struct FileConfig {
    #[serde(default)]
    secret: String,
    #[serde(default = "FileConfig::default_days")]
    days: i64,
    #[serde(default = "FileConfig::default_hours")]
    hours: i64,
    #[serde(default = "FileConfig::default_minutes")]
    minutes: i64,
    #[serde(default = "FileConfig::default_host")]
    host: String,
    #[serde(default = "FileConfig::default_port")]
    port: u16,
    #[serde(default)]
    geoip2_db: Option<String>,
    #[serde(default)]
    sweep_interval_secs: u64,
}

impl FileConfig {
    const fn default_days() -> i64 {
        Threshold::DEFAULT_DAYS
    }

    const fn default_hours() -> i64 {
        Threshold::DEFAULT_HOURS
    }

    const fn default_minutes() -> i64 {
        Threshold::DEFAULT_MINUTES
    }

    fn default_host() -> String {
        "0.0.0.0".to_string()
    }

    const fn default_port() -> u16 {
        8000
    }
}

impl From<FileConfig> for Config {
    fn from(raw: FileConfig) -> Self {
        let database_path = raw
            .geoip2_db
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());

        Config {
            secret: raw.secret,
            server: ServerConfig {
                host: raw.host,
                port: raw.port,
            },
            window: WindowConfig {
                days: raw.days,
                hours: raw.hours,
                minutes: raw.minutes,
            },
            geoip: GeoIpConfig { database_path },
            sweep: SweepConfig {
                interval_secs: raw.sweep_interval_secs,
            },
        }
    }
}

impl Config {
    /// Load an INI file, letting `IPCOUNT_*` environment variables override its keys
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let settings = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Ini))
            .add_source(config::Environment::with_prefix(ENV_PREFIX))
            .build()
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

        let raw: FileConfig = settings
            .try_deserialize()
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;

        let config = Config::from(raw);

        if config.secret.is_empty() {
            tracing::warn!(
                "No 'secret' configured: visitor fingerprints are keyed with an empty secret"
            );
        }

        Ok(config)
    }

    /// Validated active window
    pub fn threshold(&self) -> anyhow::Result<Threshold> {
        self.window
            .threshold()
            .context("Invalid active window (days/hours/minutes)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Mutex, MutexGuard};

    /// `Config::load` reads the process environment, so tests touching it run one at a time
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn env_guard() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_for_missing_keys() {
        let _guard = env_guard();
        let file = write_config("secret = hunter2\n");
        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.secret, "hunter2");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.window.days, 0);
        assert_eq!(config.window.hours, 2);
        assert_eq!(config.window.minutes, 0);
        assert!(config.geoip.database_path.is_none());
        assert_eq!(config.sweep.interval_secs, 0);
        assert_eq!(config.threshold().unwrap(), Threshold::default());
    }

    #[test]
    fn test_all_keys() {
        let _guard = env_guard();
        let file = write_config(
            "secret = s3cr3t\n\
             days = 1\n\
             hours = 0\n\
             minutes = 30\n\
             port = 9090\n\
             host = 127.0.0.1\n\
             geoip2_db = /var/lib/GeoLite2-Country.mmdb\n\
             sweep_interval_secs = 600\n",
        );
        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(
            config.geoip.database_path.as_deref(),
            Some("/var/lib/GeoLite2-Country.mmdb")
        );
        assert_eq!(config.sweep.interval_secs, 600);
        assert_eq!(
            config.threshold().unwrap().window().num_seconds(),
            86_400 + 1_800
        );
    }

    #[test]
    fn test_empty_geoip_path_disables_lookup() {
        let _guard = env_guard();
        let file = write_config("secret = x\ngeoip2_db =\n");
        let config = Config::load(file.path()).unwrap();
        assert!(config.geoip.database_path.is_none());
    }

    #[test]
    fn test_zero_window_is_rejected() {
        let _guard = env_guard();
        let file = write_config("secret = x\ndays = 0\nhours = 0\nminutes = 0\n");
        let config = Config::load(file.path()).unwrap();
        assert!(config.threshold().is_err());
    }

    #[test]
    fn test_invalid_port_is_an_error() {
        let _guard = env_guard();
        let file = write_config("port = not-a-port\n");
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let _guard = env_guard();
        assert!(Config::load(Path::new("/nonexistent/ipcount.ini")).is_err());
    }

    #[test]
    fn test_environment_overrides_file() {
        let _guard = env_guard();
        let file = write_config("secret = x\nport = 9090\nsweep_interval_secs = 600\n");

        std::env::set_var("IPCOUNT_PORT", "7070");
        std::env::set_var("IPCOUNT_SWEEP_INTERVAL_SECS", "30");
        let loaded = Config::load(file.path());
        std::env::remove_var("IPCOUNT_PORT");
        std::env::remove_var("IPCOUNT_SWEEP_INTERVAL_SECS");

        let config = loaded.unwrap();
        assert_eq!(config.server.port, 7070);
        assert_eq!(config.sweep.interval_secs, 30);
        assert_eq!(config.secret, "x");
    }
}
