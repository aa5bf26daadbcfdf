use std::{env, fmt::Display, path::PathBuf, str::FromStr};

use log::{info, warn};

pub const DEFAULT_SESSION_HOURS: u64 = 24;
/// Ten years; longer lifetimes fall back to the default.
pub const MAX_SESSION_HOURS: u64 = 24 * 365 * 10;

/// Server settings, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub static_dir: PathBuf,
    pub session_hours: u64,
    pub default_location: String,
    /// Key required by the role administration endpoint. Unset disables it.
    pub service_key: Option<String>,
    pub allow_signup: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            data_dir: PathBuf::from("database"),
            static_dir: PathBuf::from("static"),
            session_hours: DEFAULT_SESSION_HOURS,
            default_location: crate::inventory::DEFAULT_LOCATION.to_string(),
            service_key: None,
            allow_signup: true,
        }
    }
}

impl Config {
    pub fn load() -> Self {
        let defaults = Self::default();

        Self {
            host: try_load("CSMS_HOST", defaults.host),
            port: try_load("CSMS_PORT", defaults.port),
            data_dir: PathBuf::from(try_load::<String>("CSMS_DATA_DIR", "database".to_string())),
            static_dir: PathBuf::from(try_load::<String>("CSMS_STATIC_DIR", "static".to_string())),
            session_hours: session_hours(try_load("CSMS_SESSION_HOURS", defaults.session_hours)),
            default_location: try_load("CSMS_DEFAULT_LOCATION", defaults.default_location),
            service_key: var("CSMS_SERVICE_KEY")
                .map(|key| key.trim().to_string())
                .filter(|key| !key.is_empty()),
            allow_signup: try_load("CSMS_ALLOW_SIGNUP", defaults.allow_signup),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Session lifetime in hours, replaced by the default when out of range.
pub fn session_hours(hours: u64) -> u64 {
    if hours > MAX_SESSION_HOURS {
        warn!("CSMS_SESSION_HOURS value {hours} exceeds {MAX_SESSION_HOURS}, using default: {DEFAULT_SESSION_HOURS}");
        return DEFAULT_SESSION_HOURS;
    }
    hours
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn try_load<T>(key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    match var(key) {
        None => {
            info!("{key} not set, using default: {default}");
            default
        }
        Some(raw) => raw.trim().parse().unwrap_or_else(|e| {
            warn!("Invalid {key} value {raw:?}: {e}, using default: {default}");
            default
        }),
    }
}
