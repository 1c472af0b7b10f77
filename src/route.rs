//! Route overlay drawn on top of the map: two markers and one polyline layer.

use serde::{Deserialize, Serialize};

/// Geographic position in `[lng, lat]` order, as GeoJSON uses.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LngLat {
    pub lng: f64,
    pub lat: f64,
}

impl LngLat {
    pub fn new(lng: f64, lat: f64) -> Self {
        Self { lng, lat }
    }

    /// Both components are real numbers inside the WGS84 range.
    pub fn is_valid(&self) -> bool {
        self.lng.is_finite()
            && self.lat.is_finite()
            && (-180.0..=180.0).contains(&self.lng)
            && (-90.0..=90.0).contains(&self.lat)
    }

    /// Rounded to six decimals (about 10 cm), the precision stored in orders.
    pub fn rounded(self) -> Self {
        let r = |v: f64| (v * 1e6).round() / 1e6;
        Self::new(r(self.lng), r(self.lat))
    }
}

/// Axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds {
    pub min: LngLat,
    pub max: LngLat,
}

impl Bounds {
    /// Smallest box containing every point; `None` for an empty slice.
    pub fn around(points: &[LngLat]) -> Option<Self> {
        let first = *points.first()?;
        let mut b = Bounds {
            min: first,
            max: first,
        };
        for p in &points[1..] {
            b.extend(*p);
        }
        Some(b)
    }

    pub fn extend(&mut self, p: LngLat) {
        self.min.lng = self.min.lng.min(p.lng);
        self.min.lat = self.min.lat.min(p.lat);
        self.max.lng = self.max.lng.max(p.lng);
        self.max.lat = self.max.lat.max(p.lat);
    }

    pub fn center(&self) -> LngLat {
        LngLat::new(
            (self.min.lng + self.max.lng) / 2.0,
            (self.min.lat + self.max.lat) / 2.0,
        )
    }

    pub fn width(&self) -> f64 {
        self.max.lng - self.min.lng
    }

    pub fn height(&self) -> f64 {
        self.max.lat - self.min.lat
    }
}

/// Which end of the trip a marker stands for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MarkerKind {
    Start,
    End,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Marker {
    pub kind: MarkerKind,
    pub at: LngLat,
}

impl Marker {
    pub fn label(&self) -> &'static str {
        match self.kind {
            MarkerKind::Start => "●",
            MarkerKind::End => "⚑",
        }
    }

    pub fn popup(&self) -> &'static str {
        match self.kind {
            MarkerKind::Start => "Your trip starts here!",
            MarkerKind::End => "This is your destination!",
        }
    }
}

/// Driving route polyline between two markers.
#[derive(Clone, Debug, PartialEq)]
pub struct RouteLayer {
    pub start: LngLat,
    pub end: LngLat,
    pub path: Vec<LngLat>,
}

/// Markers plus route layer. Drawing replaces instead of accumulating.
#[derive(Clone, Debug, Default)]
pub struct RouteOverlay {
    start: Option<Marker>,
    end: Option<Marker>,
    layer: Option<RouteLayer>,
}

impl RouteOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place both markers, dropping the previous pair and any layer drawn for other endpoints.
    pub fn draw(&mut self, start: LngLat, end: LngLat) {
        self.start = Some(Marker {
            kind: MarkerKind::Start,
            at: start,
        });
        self.end = Some(Marker {
            kind: MarkerKind::End,
            at: end,
        });
        if self
            .layer
            .as_ref()
            .is_some_and(|l| l.start != start || l.end != end)
        {
            self.layer = None;
        }
    }

    /// Install the route polyline if it still belongs to the current markers.
    /// Returns false for a stale geometry, which is dropped.
    pub fn set_route(&mut self, start: LngLat, end: LngLat, path: Vec<LngLat>) -> bool {
        if !self.matches(start, end) {
            tracing::debug!("dropping route geometry for outdated endpoints");
            return false;
        }
        self.layer = Some(RouteLayer { start, end, path });
        true
    }

    pub fn clear(&mut self) {
        self.start = None;
        self.end = None;
        self.layer = None;
    }

    fn matches(&self, start: LngLat, end: LngLat) -> bool {
        self.start.as_ref().is_some_and(|m| m.at == start)
            && self.end.as_ref().is_some_and(|m| m.at == end)
    }

    pub fn markers(&self) -> impl Iterator<Item = &Marker> {
        self.start.iter().chain(self.end.iter())
    }

    pub fn layer(&self) -> Option<&RouteLayer> {
        self.layer.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.start.is_none() && self.end.is_none() && self.layer.is_none()
    }

    /// Bounds of the route path, or of the two markers before the path arrives.
    pub fn bounds(&self) -> Option<Bounds> {
        if let Some(layer) = &self.layer
            && let Some(b) = Bounds::around(&layer.path)
        {
            return Some(b);
        }
        let pts: Vec<LngLat> = self.markers().map(|m| m.at).collect();
        Bounds::around(&pts)
    }
}
