//! Order model as reported by the order service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::route::LngLat;

/// Status of an order within its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Waiting for a driver to accept.
    Pending,
    /// A driver is on the way to the pickup point.
    Accepted,
    /// The trip is under way.
    InProgress,
    Completed,
    Canceled,
}

impl OrderStatus {
    /// Pending, accepted or in progress.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Accepted | Self::InProgress)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }

    /// Wire name, used in notices.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Accepted => "ACCEPTED",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Canceled => "CANCELED",
        }
    }
}

/// Party that canceled an order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancellationSource {
    Client,
    Driver,
    System,
}

/// Driver and vehicle shown once an order is accepted.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Driver {
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub car_model: String,
    #[serde(default)]
    pub car_color: String,
    #[serde(default)]
    pub license_plate: String,
}

impl Driver {
    /// `{color} {model} • {plate}`.
    pub fn vehicle_line(&self) -> String {
        format!(
            "{} {} • {}",
            self.car_color, self.car_model, self.license_plate
        )
    }
}

/// Snapshot of a ride order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: i64,
    pub status: OrderStatus,
    #[serde(default)]
    pub start_address: String,
    #[serde(default)]
    pub end_address: String,
    pub start_latitude: f64,
    pub start_longitude: f64,
    pub end_latitude: f64,
    pub end_longitude: f64,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub bonus_fare: Option<f64>,
    /// Route length in km estimated at submission time.
    #[serde(default, rename = "aproximateDistance")]
    pub approx_distance_km: Option<f64>,
    /// Route duration in minutes estimated at submission time.
    #[serde(default, rename = "aproximateDuration")]
    pub approx_duration_min: Option<f64>,
    #[serde(default)]
    pub driver: Option<Driver>,
    #[serde(default)]
    pub cancellation_source: Option<CancellationSource>,
    /// Final fare, set on completion.
    #[serde(default)]
    pub total_price: Option<f64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub accepted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn start(&self) -> LngLat {
        LngLat::new(self.start_longitude, self.start_latitude)
    }

    pub fn end(&self) -> LngLat {
        LngLat::new(self.end_longitude, self.end_latitude)
    }

    /// Quoted price plus tip.
    pub fn quoted_total(&self) -> f64 {
        self.price.unwrap_or(0.0) + self.bonus_fare.unwrap_or(0.0)
    }

    /// Short label for the repeat chip: text before the first comma of each address.
    pub fn trip_label(&self) -> String {
        format!(
            "{} → {}",
            short_address(&self.start_address),
            short_address(&self.end_address)
        )
    }
}

fn short_address(address: &str) -> &str {
    address.split(',').next().unwrap_or(address).trim()
}

/// Body of `POST /api/orders`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreate {
    pub start_address: String,
    pub end_address: String,
    pub start_latitude: f64,
    pub start_longitude: f64,
    pub end_latitude: f64,
    pub end_longitude: f64,
    pub price: i64,
    pub bonus_fare: i64,
    pub notes: String,
}

/// Actions accepted by `PATCH /api/orders/{id}`. The client only cancels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderAction {
    CancelByClient,
}

/// Body of `PATCH /api/orders/{id}`.
#[derive(Debug, Serialize)]
pub struct OrderUpdate {
    pub action: OrderAction,
}
