//! Booking session: form state, cached orders and the lifecycle phase.
//!
//! All mutation goes through this type so the lock rule holds everywhere:
//! the form is editable exactly when no order is active.

use thiserror::Error;

use crate::{
    fare::{self, FareConfig, RouteEstimate},
    lifecycle::{self, Effect, LifecycleEvent, Phase},
    order::{Order, OrderCreate, OrderStatus},
    route::LngLat,
};

/// What the map and the popups currently edit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectionMode {
    Start,
    End,
    Notes,
}

impl SelectionMode {
    /// Endpoint written by a map move; only `Start` targets the pickup.
    pub fn endpoint(self) -> EndpointKind {
        match self {
            SelectionMode::Start => EndpointKind::Start,
            SelectionMode::End | SelectionMode::Notes => EndpointKind::End,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndpointKind {
    Start,
    End,
}

/// A chosen point with its display address.
#[derive(Clone, Debug, PartialEq)]
pub struct Endpoint {
    pub address: String,
    pub at: LngLat,
}

impl Endpoint {
    fn is_complete(&self) -> bool {
        !self.address.trim().is_empty() && self.at.is_valid()
    }
}

/// Fields of the booking form.
#[derive(Clone, Debug, PartialEq)]
pub struct OrderForm {
    pub start: Option<Endpoint>,
    pub end: Option<Endpoint>,
    pub notes: String,
    pub bonus: i64,
    pub estimate: RouteEstimate,
}

impl OrderForm {
    fn empty(fare: &FareConfig) -> Self {
        Self {
            start: None,
            end: None,
            notes: String::new(),
            bonus: 0,
            estimate: RouteEstimate::base(fare),
        }
    }

    fn endpoint_mut(&mut self, kind: EndpointKind) -> &mut Option<Endpoint> {
        match kind {
            EndpointKind::Start => &mut self.start,
            EndpointKind::End => &mut self.end,
        }
    }

    /// Both endpoints, when both are usable.
    fn route(&self) -> Option<(LngLat, LngLat)> {
        match (&self.start, &self.end) {
            (Some(s), Some(e)) if s.at.is_valid() && e.at.is_valid() => Some((s.at, e.at)),
            _ => None,
        }
    }
}

/// Why a submission did not go out.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("an order is already active")]
    Locked,
    #[error("Processing...")]
    InFlight,
    #[error("⚠️ Please select both points on the map.")]
    MissingPoints,
}

/// Status block shown while an order is active.
#[derive(Clone, Debug, PartialEq)]
pub struct ActiveStatus {
    pub headline: String,
    pub driver: Option<String>,
    pub price: String,
}

/// Session controller owned by the UI loop.
#[derive(Debug)]
pub struct Session {
    phase: Phase,
    fare: FareConfig,
    form: OrderForm,
    selection: SelectionMode,
    current_order: Option<Order>,
    last_known_order: Option<Order>,
    last_trip_offered: bool,
    submitting: bool,
    message: Option<String>,
}

impl Session {
    pub fn new(fare: FareConfig) -> Self {
        Self {
            phase: Phase::NoOrder,
            form: OrderForm::empty(&fare),
            fare,
            selection: SelectionMode::Start,
            current_order: None,
            last_known_order: None,
            last_trip_offered: false,
            submitting: false,
            message: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// True while an order is active; every mutating method checks it.
    pub fn is_locked(&self) -> bool {
        self.phase.is_active()
    }

    pub fn is_submitting(&self) -> bool {
        self.submitting
    }

    pub fn form(&self) -> &OrderForm {
        &self.form
    }

    pub fn fare(&self) -> &FareConfig {
        &self.fare
    }

    pub fn selection(&self) -> SelectionMode {
        self.selection
    }

    pub fn current_order(&self) -> Option<&Order> {
        self.current_order.as_ref()
    }

    pub fn last_known_order(&self) -> Option<&Order> {
        self.last_known_order.as_ref()
    }

    /// Form message line (validation or server errors).
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Order offered for "repeat last trip", if the chip should be visible.
    pub fn last_trip_chip(&self) -> Option<&Order> {
        if self.is_locked() || !self.last_trip_offered {
            return None;
        }
        self.last_known_order
            .as_ref()
            .filter(|o| !o.end_address.trim().is_empty())
    }

    /// Feed a lifecycle event through the state machine. Form-local effects
    /// are applied here; the rest is returned for the UI to carry out.
    pub fn apply(&mut self, event: LifecycleEvent) -> Vec<Effect> {
        if let LifecycleEvent::Polled(order) = &event
            && self.current_order.as_ref().map(|o| o.id) != Some(order.id)
        {
            tracing::debug!(order_id = order.id, "ignoring poll result for another order");
            return vec![];
        }

        let from = self.phase;
        let t = lifecycle::transition(from, event);
        self.phase = t.next;
        if from != t.next {
            tracing::info!(?from, to = ?t.next, "order phase changed");
        }

        let mut out = Vec::new();
        for effect in t.effects {
            match effect {
                Effect::LockForm => {
                    self.last_trip_offered = false;
                    self.submitting = false;
                    self.message = None;
                }
                Effect::ShowOrder(order) => self.show_order(order),
                Effect::RememberLastTrip(order) => self.last_known_order = Some(order),
                Effect::UnlockForm { reset } => out.extend(self.unlock(reset)),
                other => out.push(other),
            }
        }

        // 終了状態はそのまま入力フォームへ戻す。
        if self.phase.is_terminal() {
            self.phase = lifecycle::transition(self.phase, LifecycleEvent::Reset).next;
        }
        out
    }

    fn show_order(&mut self, order: Order) {
        self.form.start = Some(Endpoint {
            address: order.start_address.clone(),
            at: order.start(),
        });
        self.form.end = Some(Endpoint {
            address: order.end_address.clone(),
            at: order.end(),
        });
        self.form.notes = order.notes.clone().unwrap_or_default();
        if let Some(bonus) = order.bonus_fare {
            self.form.bonus = bonus.round() as i64;
        }
        self.current_order = Some(order);
    }

    fn unlock(&mut self, reset: bool) -> Vec<Effect> {
        self.current_order = None;
        self.submitting = false;
        self.selection = SelectionMode::Start;
        self.last_trip_offered = true;
        if reset {
            self.form = OrderForm::empty(&self.fare);
            self.message = None;
            vec![]
        } else {
            self.endpoints_changed()
        }
    }

    /// Replace the tariff, e.g. once `/api/config` answers.
    pub fn set_fare_config(&mut self, fare: FareConfig) {
        self.fare = fare;
        if self.is_locked() {
            return;
        }
        self.form.estimate = match (self.form.estimate.distance_km, self.form.estimate.duration_min) {
            (Some(km), Some(min)) => RouteEstimate::from_route(&self.fare, km, min),
            _ => RouteEstimate::base(&self.fare),
        };
    }

    pub fn set_selection(&mut self, mode: SelectionMode) -> bool {
        if self.is_locked() {
            return false;
        }
        self.selection = mode;
        true
    }

    /// Write an endpoint; returns the estimate request if both ends are known.
    pub fn set_endpoint(&mut self, kind: EndpointKind, address: String, at: LngLat) -> Vec<Effect> {
        if self.is_locked() {
            return vec![];
        }
        *self.form.endpoint_mut(kind) = Some(Endpoint { address, at });
        self.endpoints_changed()
    }

    pub fn clear_endpoint(&mut self, kind: EndpointKind) -> Vec<Effect> {
        if self.is_locked() {
            return vec![];
        }
        *self.form.endpoint_mut(kind) = None;
        self.endpoints_changed()
    }

    fn endpoints_changed(&mut self) -> Vec<Effect> {
        match self.form.route() {
            Some((start, end)) => vec![Effect::EstimateRoute { start, end }],
            None => {
                self.form.estimate = RouteEstimate::base(&self.fare);
                vec![]
            }
        }
    }

    /// Apply a routing answer unless the endpoints moved meanwhile.
    pub fn apply_route_estimate(
        &mut self,
        start: LngLat,
        end: LngLat,
        distance_km: f64,
        duration_min: f64,
    ) -> bool {
        if self.is_locked() || self.form.route() != Some((start, end)) {
            tracing::debug!("stale route estimate dropped");
            return false;
        }
        self.form.estimate = RouteEstimate::from_route(&self.fare, distance_km, duration_min);
        true
    }

    pub fn set_notes(&mut self, notes: String) -> bool {
        if self.is_locked() {
            return false;
        }
        self.form.notes = notes;
        true
    }

    pub fn adjust_bonus(&mut self, delta: i64) -> bool {
        if self.is_locked() {
            return false;
        }
        self.form.bonus = fare::adjust_bonus(self.form.bonus, delta);
        true
    }

    /// Copy the last known order into the form ("repeat last trip").
    pub fn use_last_trip(&mut self) -> Vec<Effect> {
        if self.is_locked() {
            return vec![];
        }
        let Some(order) = self.last_known_order.clone() else {
            return vec![];
        };
        self.last_trip_offered = false;
        self.form.start = Some(Endpoint {
            address: order.start_address.clone(),
            at: order.start(),
        });
        self.form.end = Some(Endpoint {
            address: order.end_address.clone(),
            at: order.end(),
        });
        self.form.notes = order.notes.clone().unwrap_or_default();
        if let Some(bonus) = order.bonus_fare.filter(|b| *b > 0.0) {
            self.form.bonus = bonus.round() as i64;
        }
        self.endpoints_changed()
    }

    /// Validate the form and mark the submission in flight.
    /// On error nothing must be sent to the server.
    pub fn begin_submission(&mut self) -> Result<OrderCreate, SubmitError> {
        if self.is_locked() {
            return Err(SubmitError::Locked);
        }
        if self.submitting {
            return Err(SubmitError::InFlight);
        }
        let (Some(start), Some(end)) = (&self.form.start, &self.form.end) else {
            self.message = Some(SubmitError::MissingPoints.to_string());
            return Err(SubmitError::MissingPoints);
        };
        if !start.is_complete() || !end.is_complete() {
            self.message = Some(SubmitError::MissingPoints.to_string());
            return Err(SubmitError::MissingPoints);
        }
        let body = OrderCreate {
            start_address: start.address.clone(),
            end_address: end.address.clone(),
            start_latitude: start.at.lat,
            start_longitude: start.at.lng,
            end_latitude: end.at.lat,
            end_longitude: end.at.lng,
            price: self.form.estimate.price,
            bonus_fare: self.form.bonus,
            notes: self.form.notes.clone(),
        };
        self.submitting = true;
        self.message = None;
        Ok(body)
    }

    /// Re-enable the submit control after a failed request.
    pub fn submission_failed(&mut self, message: String) {
        self.submitting = false;
        self.message = Some(message);
    }

    /// Order to cancel, when one is active.
    pub fn cancellable_order(&self) -> Option<&Order> {
        self.current_order.as_ref().filter(|_| self.is_locked())
    }

    pub fn price_line(&self) -> String {
        match &self.current_order {
            Some(order) if self.is_locked() => fare::active_price_text(&self.fare, order.quoted_total()),
            _ => fare::price_text(&self.fare, self.form.estimate.price, self.form.bonus),
        }
    }

    pub fn active_status(&self) -> Option<ActiveStatus> {
        let order = self.cancellable_order()?;
        let driver = order.driver.as_ref().map(|d| d.vehicle_line());
        let (headline, driver) = match order.status {
            OrderStatus::Pending => ("Looking for a driver...".to_string(), None),
            OrderStatus::Accepted => ("Arrival time ~10 min".to_string(), driver),
            OrderStatus::InProgress => {
                let km = order.approx_distance_km.or(self.form.estimate.distance_km);
                let min = order.approx_duration_min.or(self.form.estimate.duration_min);
                let dist = km.map_or("N/A".to_string(), |v| format!("{v:.1} km"));
                let dur = min.map_or("N/A".to_string(), |v| format!("{} min", v.round()));
                (format!("ETA ~{dur} ({dist})"), driver)
            }
            other => (format!("Status: {}", other.as_str()), None),
        };
        Some(ActiveStatus {
            headline,
            driver,
            price: self.price_line(),
        })
    }
}
