//! Remote service clients.

/// Mapbox geocoding and directions.
pub mod mapbox;
/// Order service REST API.
pub mod orders;
