//! Mapbox geocoding and directions wrappers.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

use crate::{config::MapboxCfg, route::LngLat};

/// Placeholder written into an endpoint when reverse geocoding finds nothing.
pub const ADDRESS_NOT_FOUND: &str = "Address not found";

#[derive(Debug, Error)]
pub enum MapError {
    #[error("mapbox request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("no route between the given points")]
    NoRoute,
}

/// Geocoding result.
#[derive(Clone, Debug, PartialEq)]
pub struct Place {
    pub name: String,
    pub at: LngLat,
}

/// Driving route between two points.
#[derive(Clone, Debug, PartialEq)]
pub struct DrivingRoute {
    pub distance_m: f64,
    pub duration_s: f64,
    pub geometry: Vec<LngLat>,
}

impl DrivingRoute {
    pub fn distance_km(&self) -> f64 {
        self.distance_m / 1000.0
    }

    pub fn duration_min(&self) -> f64 {
        self.duration_s / 60.0
    }
}

/// Mapping provider operations the client relies on.
#[async_trait]
pub trait MapProvider: Send + Sync {
    /// Place name at a point, or [`ADDRESS_NOT_FOUND`].
    async fn reverse_geocode(&self, at: LngLat) -> Result<String, MapError>;
    /// Ranked suggestions for free text.
    async fn search(&self, query: &str) -> Result<Vec<Place>, MapError>;
    async fn driving_route(&self, start: LngLat, end: LngLat) -> Result<DrivingRoute, MapError>;
}

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    place_name: String,
    #[serde(default)]
    center: Option<[f64; 2]>,
    #[serde(default)]
    geometry: Option<PointGeometry>,
}

#[derive(Debug, Deserialize)]
struct PointGeometry {
    coordinates: [f64; 2],
}

impl Feature {
    fn into_place(self) -> Option<Place> {
        let [lng, lat] = self
            .geometry
            .map(|g| g.coordinates)
            .or(self.center)?;
        Some(Place {
            name: self.place_name,
            at: LngLat::new(lng, lat),
        })
    }
}

#[derive(Debug, Deserialize)]
struct DirectionsResp {
    #[serde(default)]
    routes: Vec<RouteResp>,
}

#[derive(Debug, Deserialize)]
struct RouteResp {
    distance: f64,
    duration: f64,
    #[serde(default)]
    geometry: Option<LineGeometry>,
}

#[derive(Debug, Deserialize)]
struct LineGeometry {
    coordinates: Vec<[f64; 2]>,
}

/// HTTP client for the Mapbox v5 APIs.
#[derive(Clone)]
pub struct MapboxClient {
    http: Client,
    cfg: MapboxCfg,
}

impl MapboxClient {
    pub fn new(http: Client, cfg: MapboxCfg) -> Self {
        Self { http, cfg }
    }

    fn base(&self) -> &str {
        self.cfg.base_url.trim_end_matches('/')
    }

    fn reverse_url(&self, at: LngLat) -> String {
        format!(
            "{}/geocoding/v5/mapbox.places/{},{}.json?access_token={}&language={}&limit=1",
            self.base(),
            at.lng,
            at.lat,
            self.cfg.access_token,
            self.cfg.language
        )
    }

    fn search_url(&self, query: &str) -> String {
        format!(
            "{}/geocoding/v5/mapbox.places/{}.json?access_token={}&autocomplete=true&limit={}",
            self.base(),
            urlencoding::encode(query),
            self.cfg.access_token,
            self.cfg.search_limit
        )
    }

    fn directions_url(&self, start: LngLat, end: LngLat) -> String {
        format!(
            "{}/directions/v5/mapbox/driving/{},{};{},{}?geometries=geojson&overview=simplified&access_token={}",
            self.base(),
            start.lng,
            start.lat,
            end.lng,
            end.lat,
            self.cfg.access_token
        )
    }
}

fn first_place_name(fc: FeatureCollection) -> String {
    fc.features
        .into_iter()
        .next()
        .map(|f| f.place_name)
        .unwrap_or_else(|| ADDRESS_NOT_FOUND.to_string())
}

fn places(fc: FeatureCollection) -> Vec<Place> {
    fc.features
        .into_iter()
        .filter_map(Feature::into_place)
        .collect()
}

fn first_route(resp: DirectionsResp) -> Result<DrivingRoute, MapError> {
    let route = resp.routes.into_iter().next().ok_or(MapError::NoRoute)?;
    Ok(DrivingRoute {
        distance_m: route.distance,
        duration_s: route.duration,
        geometry: route
            .geometry
            .map(|g| {
                g.coordinates
                    .into_iter()
                    .map(|[lng, lat]| LngLat::new(lng, lat))
                    .collect()
            })
            .unwrap_or_default(),
    })
}

#[async_trait]
impl MapProvider for MapboxClient {
    async fn reverse_geocode(&self, at: LngLat) -> Result<String, MapError> {
        let fc = self
            .http
            .get(self.reverse_url(at))
            .send()
            .await?
            .error_for_status()?
            .json::<FeatureCollection>()
            .await?;
        Ok(first_place_name(fc))
    }

    async fn search(&self, query: &str) -> Result<Vec<Place>, MapError> {
        let fc = self
            .http
            .get(self.search_url(query))
            .send()
            .await?
            .error_for_status()?
            .json::<FeatureCollection>()
            .await?;
        Ok(places(fc))
    }

    async fn driving_route(&self, start: LngLat, end: LngLat) -> Result<DrivingRoute, MapError> {
        let resp = self
            .http
            .get(self.directions_url(start, end))
            .send()
            .await?
            .error_for_status()?
            .json::<DirectionsResp>()
            .await?;
        first_route(resp)
    }
}
