//! Run configuration read from a TOML file.
//!
//! ```toml
//! [auth]
//! client_id = "..."
//! client_secret = "..."
//!
//! [requests]
//! minute_rate = 300
//! max_cloud_coverage = 31
//!
//! [storage]
//! data_dir = "/var/lib/vegmosaic"
//!
//! [report.efficiency]
//! young = 6.0
//! healthy = 10.0
//! stressed = 12.0
//! inefficient = 15.0
//! ```
//!
//! `CLIENT_ID` and `CLIENT_SECRET` in the environment take precedence over the file.

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::error::{Error, Result};

pub const DEFAULT_TOKEN_URL: &str =
    "https://identity.dataspace.copernicus.eu/auth/realms/CDSE/protocol/openid-connect/token";
pub const DEFAULT_PROCESS_URL: &str = "https://sh.dataspace.copernicus.eu/api/v1/process";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub requests: RequestConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestConfig {
    /// Maximum Process API calls per minute.
    #[serde(default = "default_minute_rate")]
    pub minute_rate: u32,
    /// Scenes above this cloud percentage are ignored by the provider.
    #[serde(default = "default_max_cloud_coverage")]
    pub max_cloud_coverage: u8,
    #[serde(default = "default_process_url")]
    pub process_url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportConfig {
    #[serde(default)]
    pub efficiency: EfficiencyThresholds,
}

/// Upper bounds for the GCI/NDRE ratio classes.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct EfficiencyThresholds {
    pub young: f64,
    pub healthy: f64,
    pub stressed: f64,
    pub inefficient: f64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig {
            client_id: String::new(),
            client_secret: String::new(),
            token_url: default_token_url(),
        }
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        RequestConfig {
            minute_rate: default_minute_rate(),
            max_cloud_coverage: default_max_cloud_coverage(),
            process_url: default_process_url(),
        }
    }
}

impl Default for EfficiencyThresholds {
    fn default() -> Self {
        EfficiencyThresholds {
            young: 6.0,
            healthy: 10.0,
            stressed: 12.0,
            inefficient: 15.0,
        }
    }
}

fn default_token_url() -> String {
    DEFAULT_TOKEN_URL.to_string()
}

fn default_process_url() -> String {
    DEFAULT_PROCESS_URL.to_string()
}

fn default_minute_rate() -> u32 {
    300
}

fn default_max_cloud_coverage() -> u8 {
    31
}

impl Config {
    /// Loads `path` if it exists, otherwise starts from defaults, then applies environment
    /// overrides and validates.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let text = fs::read_to_string(path)?;
            Self::from_toml(&text)?
        } else {
            Self::from_toml("")?
        };

        if let Ok(id) = env::var("CLIENT_ID") {
            config.auth.client_id = id;
        }
        if let Ok(secret) = env::var("CLIENT_SECRET") {
            config.auth.client_secret = secret;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.requests.minute_rate == 0 {
            return Err(Error::Config("requests.minute_rate must be at least 1".to_string()));
        }
        if self.requests.max_cloud_coverage > 100 {
            return Err(Error::Config(format!(
                "requests.max_cloud_coverage must be a percentage, got {}",
                self.requests.max_cloud_coverage
            )));
        }

        let e = &self.report.efficiency;
        if !(e.young < e.healthy && e.healthy < e.stressed && e.stressed < e.inefficient) {
            return Err(Error::Config(
                "report.efficiency thresholds must be strictly increasing".to_string(),
            ));
        }

        Ok(())
    }

    /// Credentials are only needed by commands that hit the network.
    pub fn require_credentials(&self) -> Result<()> {
        if self.auth.client_id.is_empty() || self.auth.client_secret.is_empty() {
            return Err(Error::Config(
                "auth.client_id and auth.client_secret are required".to_string(),
            ));
        }
        Ok(())
    }

    /// Directory holding the per-day tile files, `~/vegmosaic-data` by default.
    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.storage.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => dirs::home_dir()
                .map(|home| home.join("vegmosaic-data"))
                .ok_or_else(|| Error::Config("cannot locate home directory".to_string())),
        }
    }
}

// -- Tests -------------------------------------------------------------------
