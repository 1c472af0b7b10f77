//! Fare estimation from routing data.

use serde::{Deserialize, Serialize};

/// Tariff served by `GET /api/config`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FareConfig {
    pub base_fare: f64,
    pub per_km: f64,
    pub per_min: f64,
    pub currency: String,
}

impl Default for FareConfig {
    fn default() -> Self {
        Self {
            base_fare: 50.0,
            per_km: 20.0,
            per_min: 5.0,
            currency: "€".into(),
        }
    }
}

impl FareConfig {
    /// Base fare rounded the same way as estimates.
    pub fn base_price(&self) -> i64 {
        self.base_fare.round() as i64
    }
}

/// `round(base + km * perKm + min * perMin)`.
pub fn estimate_price(cfg: &FareConfig, distance_km: f64, duration_min: f64) -> i64 {
    (cfg.base_fare + distance_km * cfg.per_km + duration_min * cfg.per_min).round() as i64
}

/// Clamped tip adjustment; never below zero.
pub fn adjust_bonus(current: i64, delta: i64) -> i64 {
    current.saturating_add(delta).max(0)
}

/// Distance/duration of the last driving route and the fare derived from it.
#[derive(Clone, Debug, PartialEq)]
pub struct RouteEstimate {
    pub distance_km: Option<f64>,
    pub duration_min: Option<f64>,
    pub price: i64,
}

impl RouteEstimate {
    /// No route known: base fare only.
    pub fn base(cfg: &FareConfig) -> Self {
        Self {
            distance_km: None,
            duration_min: None,
            price: cfg.base_price(),
        }
    }

    pub fn from_route(cfg: &FareConfig, distance_km: f64, duration_min: f64) -> Self {
        Self {
            distance_km: Some(distance_km),
            duration_min: Some(duration_min),
            price: estimate_price(cfg, distance_km, duration_min),
        }
    }
}

/// Price line shown while the form is editable.
pub fn price_text(cfg: &FareConfig, estimate: i64, bonus: i64) -> String {
    format!(
        "Price: ~{} (+{} tip) = ~{} {}",
        estimate,
        bonus,
        estimate + bonus,
        cfg.currency
    )
}

/// Price line shown for an active order.
pub fn active_price_text(cfg: &FareConfig, total: f64) -> String {
    format!("Cash ~{:.2} {}", total, cfg.currency)
}
