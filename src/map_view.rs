//! Map viewport: center, zoom, panning and fitting a route into view.

use crate::route::{Bounds, LngLat};

/// Terminal cells covered by the whole world width at zoom 0.
const WORLD_CELLS: f64 = 64.0;
/// A terminal cell is about twice as tall as it is wide.
const CELL_ASPECT: f64 = 2.0;
const MIN_ZOOM: f64 = 1.0;
const MAX_ZOOM: f64 = 20.0;
/// Closest zoom used when fitting a route.
const MAX_FIT_ZOOM: f64 = 17.0;

/// Space (in cells) kept free around a fitted route.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Padding {
    pub top: u16,
    pub bottom: u16,
    pub left: u16,
    pub right: u16,
}

/// Camera over the map canvas.
#[derive(Clone, Debug, PartialEq)]
pub struct MapView {
    pub center: LngLat,
    pub zoom: f64,
}

impl MapView {
    pub fn new(center: LngLat, zoom: f64) -> Self {
        Self {
            center,
            zoom: zoom.clamp(MIN_ZOOM, MAX_ZOOM),
        }
    }

    /// Longitude degrees per terminal column.
    fn deg_per_col(&self) -> f64 {
        360.0 / (2f64.powf(self.zoom) * WORLD_CELLS)
    }

    /// Latitude degrees per terminal row at the current center.
    fn deg_per_row(&self) -> f64 {
        self.deg_per_col() * CELL_ASPECT * self.center.lat.to_radians().cos().max(0.05)
    }

    /// Geographic area shown in a `cols` x `rows` canvas.
    pub fn viewport(&self, cols: u16, rows: u16) -> Bounds {
        let half_w = self.deg_per_col() * f64::from(cols.max(1)) / 2.0;
        let half_h = self.deg_per_row() * f64::from(rows.max(1)) / 2.0;
        Bounds {
            min: LngLat::new(self.center.lng - half_w, self.center.lat - half_h),
            max: LngLat::new(self.center.lng + half_w, self.center.lat + half_h),
        }
    }

    /// Move the center by whole cells (positive `dx` = east, positive `dy` = north).
    pub fn pan(&mut self, dx: i32, dy: i32) {
        let lng = self.center.lng + f64::from(dx) * self.deg_per_col();
        let lat = self.center.lat + f64::from(dy) * self.deg_per_row();
        self.center = LngLat::new(wrap_lng(lng), lat.clamp(-85.0, 85.0));
    }

    pub fn zoom_by(&mut self, delta: f64) {
        self.zoom = (self.zoom + delta).clamp(MIN_ZOOM, MAX_ZOOM);
    }

    /// Jump to a place, e.g. a chosen search suggestion.
    pub fn fly_to(&mut self, center: LngLat, zoom: f64) {
        self.center = center;
        self.zoom = zoom.clamp(MIN_ZOOM, MAX_ZOOM);
    }

    /// Choose center and zoom so `bounds` fits inside the canvas minus `padding`.
    pub fn fit_bounds(&mut self, bounds: Bounds, padding: Padding, cols: u16, rows: u16) {
        let inner_cols = f64::from(cols.saturating_sub(padding.left + padding.right).max(1));
        let inner_rows = f64::from(rows.saturating_sub(padding.top + padding.bottom).max(1));
        let c = bounds.center();
        let cos_lat = c.lat.to_radians().cos().max(0.05);

        let need_col = (bounds.width() / inner_cols)
            .max(bounds.height() / (inner_rows * CELL_ASPECT * cos_lat));
        self.zoom = if need_col > 0.0 {
            (360.0 / (need_col * WORLD_CELLS))
                .log2()
                .clamp(MIN_ZOOM, MAX_FIT_ZOOM)
        } else {
            MAX_FIT_ZOOM
        };

        // 余白が非対称な分だけ中心をずらす。
        self.center = c;
        let shift_x = (f64::from(padding.left) - f64::from(padding.right)) / 2.0;
        let shift_y = (f64::from(padding.top) - f64::from(padding.bottom)) / 2.0;
        self.center = LngLat::new(
            c.lng - shift_x * self.deg_per_col(),
            c.lat + shift_y * self.deg_per_row(),
        );
    }
}

fn wrap_lng(lng: f64) -> f64 {
    let mut v = lng;
    while v > 180.0 {
        v -= 360.0;
    }
    while v < -180.0 {
        v += 360.0;
    }
    v
}
