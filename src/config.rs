// Runtime configuration for the tracker.
// Defaults match the two Manchester BODS datafeeds the map was first built for.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::error::{Result, TrackerError};
use crate::fleet::{FleetEntry, InterestSets};

pub const API_KEY_ENV: &str = "BODS_API_KEY";

/// One week. Larger values are rejected at load time.
pub const MAX_STALE_AFTER_SECS: i64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind_address: String,
    pub port: u16,

    pub feed_base_url: String,
    pub feed_ids: Vec<u32>,
    pub api_key: String,
    /// Pass-through relay the feed URL is appended to, percent-encoded.
    /// `None` fetches the feed directly.
    pub relay_prefix: Option<String>,
    pub request_timeout_secs: u64,

    pub poll_interval_secs: u64,
    pub settle_debounce_millis: u64,
    pub stale_after_secs: i64,

    pub map_center: [f64; 2],
    pub map_zoom: u8,

    /// Vehicle refs whose fleet number and type cannot be derived from the range table.
    pub fleet_exceptions: HashMap<String, FleetEntry>,
    pub r_requirements: HashSet<String>,
    pub k_requirements: HashSet<String>,
    pub both_requirements: HashSet<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".into(),
            port: 8080,
            feed_base_url: "https://data.bus-data.dft.gov.uk/api/v1/datafeed".into(),
            feed_ids: vec![14336, 16387],
            api_key: String::new(),
            relay_prefix: Some("https://corsproxy.io/?".into()),
            request_timeout_secs: 30,
            poll_interval_secs: 10,
            settle_debounce_millis: 1000,
            stale_after_secs: 900,
            map_center: [53.4808, -2.2426],
            map_zoom: 14,
            fleet_exceptions: HashMap::new(),
            r_requirements: HashSet::new(),
            k_requirements: HashSet::new(),
            both_requirements: HashSet::new(),
        }
    }
}

impl Config {
    /// Loads the config from `explicit` or the per-user config dir, falling back
    /// to defaults when neither exists. `BODS_API_KEY` always wins over the file.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => {
                    info!("No config file found, using defaults");
                    Self::default()
                }
            },
        };

        if let Ok(key) = std::env::var(API_KEY_ENV) {
            config.api_key = key;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("bus-tracker").join("config.json"))
    }

    fn validate(&self) -> Result<()> {
        if self.feed_ids.is_empty() {
            return Err(TrackerError::Config("at least one feed id is required".into()));
        }
        if self.poll_interval_secs == 0 {
            return Err(TrackerError::Config("poll_interval_secs must be positive".into()));
        }
        if self.stale_after_secs <= 0 {
            return Err(TrackerError::Config("stale_after_secs must be positive".into()));
        }
        if self.stale_after_secs > MAX_STALE_AFTER_SECS {
            return Err(TrackerError::Config(format!(
                "stale_after_secs must be at most {MAX_STALE_AFTER_SECS}"
            )));
        }
        Ok(())
    }

    pub fn feed_urls(&self) -> Vec<String> {
        self.feed_ids
            .iter()
            .map(|id| format!("{}/{}/?api_key={}", self.feed_base_url.trim_end_matches('/'), id, self.api_key))
            .collect()
    }

    pub fn interest_sets(&self) -> InterestSets {
        InterestSets {
            r_requirements: self.r_requirements.clone(),
            k_requirements: self.k_requirements.clone(),
            both: self.both_requirements.clone(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn settle_debounce(&self) -> Duration {
        Duration::from_millis(self.settle_debounce_millis)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Age past which a fix no longer produces or keeps a marker.
    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_after_secs.clamp(1, MAX_STALE_AFTER_SECS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: Config = serde_json::from_str(
            r#"{
                "feed_ids": [1],
                "api_key": "abc",
                "relay_prefix": null,
                "fleet_exceptions": { "VW1": { "fleet_number": "VW1", "vehicle_type": "Volvo B5LH" } },
                "r_requirements": ["10050"]
            }"#,
        )
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.stale_after_secs, 900);
        assert!(config.relay_prefix.is_none());
        assert_eq!(config.fleet_exceptions["VW1"].vehicle_type, "Volvo B5LH");
        assert!(config.interest_sets().r_requirements.contains("10050"));
    }

    #[test]
    fn feed_urls_embed_key() {
        let config = Config {
            api_key: "k".into(),
            ..Config::default()
        };
        assert_eq!(
            config.feed_urls(),
            vec![
                "https://data.bus-data.dft.gov.uk/api/v1/datafeed/14336/?api_key=k".to_string(),
                "https://data.bus-data.dft.gov.uk/api/v1/datafeed/16387/?api_key=k".to_string(),
            ]
        );
    }

    #[test]
    fn empty_feed_list_is_rejected() {
        let config = Config {
            feed_ids: vec![],
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(TrackerError::Config(_))));
    }

    #[test]
    fn stale_threshold_is_bounded() {
        let huge = Config {
            stale_after_secs: i64::MAX,
            ..Config::default()
        };
        assert!(matches!(huge.validate(), Err(TrackerError::Config(_))));
        assert_eq!(huge.stale_after(), chrono::Duration::seconds(MAX_STALE_AFTER_SECS));

        let week = Config {
            stale_after_secs: MAX_STALE_AFTER_SECS,
            ..Config::default()
        };
        assert!(week.validate().is_ok());
        assert_eq!(Config::default().stale_after(), chrono::Duration::seconds(900));
    }
}
