//! Config model and persistence helpers.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};

use crate::fare::FareConfig;

/// Top-level configuration stored in `config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Order service connection settings.
    pub server: ServerCfg,
    /// Mapping provider settings.
    pub mapbox: MapboxCfg,
    /// Fare values used until the server config arrives (or when it fails).
    pub fare: FareCfg,
    /// Initial map viewport.
    pub map: MapCfg,
}

/// Order service identifiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerCfg {
    /// Base URL of the order service, without a trailing slash.
    pub base_url: String,
    /// Opaque identity token sent as `X-Telegram-Init-Data`.
    pub init_data: String,
    /// Status poll period while an order is active.
    pub poll_interval_secs: u64,
}

/// Mapbox API access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapboxCfg {
    pub base_url: String,
    pub access_token: String,
    /// Language requested for reverse geocoding.
    pub language: String,
    /// Maximum number of suggestions in the address search.
    pub search_limit: u8,
}

/// Hardcoded fare fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FareCfg {
    pub base_fare: f64,
    pub per_km: f64,
    pub per_min: f64,
    pub currency: String,
    /// Amount added or removed per tip key press.
    pub bonus_step: i64,
}

/// Map start position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapCfg {
    pub center_lng: f64,
    pub center_lat: f64,
    pub zoom: f64,
}

impl Config {
    /// Load from disk or create defaults when missing.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            let s = fs::read_to_string(path)?;
            Ok(toml::from_str(&s)?)
        } else {
            let cfg = Self::default();
            cfg.save(path)?;
            Ok(cfg)
        }
    }

    /// Persist the config as pretty TOML.
    pub fn save(&self, path: &Path) -> Result<()> {
        let s = toml::to_string_pretty(self)?;
        fs::write(path, s)?;
        Ok(())
    }

    /// Fare values to use before (or instead of) the server's `/api/config`.
    pub fn fallback_fare(&self) -> FareConfig {
        FareConfig {
            base_fare: self.fare.base_fare,
            per_km: self.fare.per_km,
            per_min: self.fare.per_min,
            currency: self.fare.currency.clone(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.server.poll_interval_secs.max(1))
    }

    /// True when the values the wizard asks for are still missing.
    pub fn needs_setup(&self) -> bool {
        self.server.base_url.is_empty()
            || self.server.init_data.is_empty()
            || self.mapbox.access_token.is_empty()
    }
}

impl Default for Config {
    /// Defaults match the values the order service ships with.
    fn default() -> Self {
        Self {
            server: ServerCfg {
                base_url: "http://localhost:8080".into(),
                init_data: "".into(),
                poll_interval_secs: 3,
            },
            mapbox: MapboxCfg {
                base_url: "https://api.mapbox.com".into(),
                access_token: "".into(),
                language: "en".into(),
                search_limit: 5,
            },
            fare: FareCfg {
                base_fare: 50.0,
                per_km: 20.0,
                per_min: 5.0,
                currency: "€".into(),
                bonus_step: 5,
            },
            map: MapCfg {
                center_lng: 28.830318,
                center_lat: 47.024904,
                zoom: 17.0,
            },
        }
    }
}
