//! Order lifecycle state machine.
//!
//! `transition` is pure: it maps the current phase and an event to the next
//! phase plus the effects the session and UI have to carry out.

use crate::{
    order::{CancellationSource, Order, OrderStatus},
    route::LngLat,
};

/// Where the client is in an order's life.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Startup, before the current order is known.
    NoOrder,
    /// Editable form, no active order.
    Forming,
    Pending,
    Accepted,
    InProgress,
    Completed,
    Canceled,
}

impl Phase {
    pub fn is_active(self) -> bool {
        matches!(self, Phase::Pending | Phase::Accepted | Phase::InProgress)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Canceled)
    }
}

impl From<OrderStatus> for Phase {
    fn from(status: OrderStatus) -> Self {
        match status {
            OrderStatus::Pending => Phase::Pending,
            OrderStatus::Accepted => Phase::Accepted,
            OrderStatus::InProgress => Phase::InProgress,
            OrderStatus::Completed => Phase::Completed,
            OrderStatus::Canceled => Phase::Canceled,
        }
    }
}

/// Inputs to the state machine.
#[derive(Clone, Debug, PartialEq)]
pub enum LifecycleEvent {
    /// Result of the startup `current order` lookup.
    Loaded(Option<Order>),
    LoadFailed,
    /// The server accepted a new order.
    Submitted(Order),
    /// Snapshot returned by the status poll.
    Polled(Order),
    /// The server confirmed our own cancellation of this order.
    ClientCanceled(Order),
    /// Leave a terminal phase for a fresh form.
    Reset,
}

/// Work produced by a transition.
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    LockForm,
    /// Make this order the current one and mirror it into the form.
    ShowOrder(Order),
    StartPolling(i64),
    StopPolling,
    DrawRoute { start: LngLat, end: LngLat },
    ClearRoute,
    RememberLastTrip(Order),
    /// Make the form editable; `reset` also clears every field.
    UnlockForm { reset: bool },
    /// Blocking notice for the user.
    Notify(String),
    /// Ask the routing provider for a fresh fare estimate.
    EstimateRoute { start: LngLat, end: LngLat },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    pub next: Phase,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn stay(phase: Phase) -> Self {
        Self {
            next: phase,
            effects: vec![],
        }
    }
}

pub fn transition(phase: Phase, event: LifecycleEvent) -> Transition {
    use LifecycleEvent::*;

    match (phase, event) {
        (Phase::NoOrder, Loaded(None)) | (Phase::NoOrder, LoadFailed) => Transition {
            next: Phase::Forming,
            effects: vec![Effect::UnlockForm { reset: false }],
        },
        (Phase::NoOrder, Loaded(Some(order))) => {
            let mut t = if order.status.is_active() {
                enter_active(order.clone())
            } else {
                Transition {
                    next: Phase::Forming,
                    effects: vec![Effect::UnlockForm { reset: false }],
                }
            };
            t.effects.insert(0, Effect::RememberLastTrip(order));
            t
        }
        (Phase::Forming, Submitted(order)) => {
            let mut t = observe(order.clone());
            t.effects.insert(0, Effect::RememberLastTrip(order));
            t
        }
        (p, Polled(order)) if p.is_active() => {
            if Phase::from(order.status) == p {
                Transition::stay(p)
            } else {
                observe(order)
            }
        }
        (p, ClientCanceled(order)) if p.is_active() => Transition {
            next: Phase::Canceled,
            effects: vec![
                Effect::StopPolling,
                Effect::RememberLastTrip(order),
                Effect::ClearRoute,
                Effect::UnlockForm { reset: true },
            ],
        },
        (Phase::Completed, Reset) | (Phase::Canceled, Reset) => Transition::stay(Phase::Forming),
        (p, ev) => {
            tracing::debug!(?p, ?ev, "lifecycle event ignored");
            Transition::stay(p)
        }
    }
}

/// Route an order snapshot to the active or terminal path.
fn observe(order: Order) -> Transition {
    if order.status.is_active() {
        enter_active(order)
    } else {
        resolve_terminal(order)
    }
}

fn enter_active(order: Order) -> Transition {
    let (start, end, id) = (order.start(), order.end(), order.id);
    Transition {
        next: Phase::from(order.status),
        effects: vec![
            Effect::LockForm,
            Effect::ShowOrder(order),
            Effect::StartPolling(id),
            Effect::DrawRoute { start, end },
        ],
    }
}

fn resolve_terminal(order: Order) -> Transition {
    let next = Phase::from(order.status);
    let mut effects = vec![
        Effect::StopPolling,
        Effect::RememberLastTrip(order.clone()),
        Effect::ClearRoute,
    ];
    match (order.status, order.cancellation_source) {
        (OrderStatus::Canceled, Some(CancellationSource::Driver)) => {
            effects.push(Effect::Notify("Your ride was cancelled by the driver".into()));
            effects.push(Effect::UnlockForm { reset: false });
        }
        (OrderStatus::Completed, _) => {
            let total = order.total_price.unwrap_or_else(|| order.quoted_total());
            effects.push(Effect::Notify(format!(
                "Your ride was completed!\nTotal price: {total}"
            )));
            effects.push(Effect::UnlockForm { reset: true });
        }
        // 運転手以外によるキャンセル（observe()は終了状態しか渡さない）。
        _ => {
            effects.push(Effect::UnlockForm { reset: true });
        }
    }
    Transition { next, effects }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::tests::sample_order;
    use pretty_assertions::assert_eq;

    fn active_effects(order: &Order) -> Vec<Effect> {
        vec![
            Effect::LockForm,
            Effect::ShowOrder(order.clone()),
            Effect::StartPolling(order.id),
            Effect::DrawRoute {
                start: order.start(),
                end: order.end(),
            },
        ]
    }

    #[test]
    fn test_fresh_load_without_order_opens_form() {
        let t = transition(Phase::NoOrder, LifecycleEvent::Loaded(None));
        assert_eq!(t.next, Phase::Forming);
        assert_eq!(t.effects, vec![Effect::UnlockForm { reset: false }]);

        let t = transition(Phase::NoOrder, LifecycleEvent::LoadFailed);
        assert_eq!(t.next, Phase::Forming);
    }

    #[test]
    fn test_load_with_active_order_resumes_it() {
        let order = sample_order(7, OrderStatus::Accepted);
        let t = transition(Phase::NoOrder, LifecycleEvent::Loaded(Some(order.clone())));
        assert_eq!(t.next, Phase::Accepted);
        let mut expected = vec![Effect::RememberLastTrip(order.clone())];
        expected.extend(active_effects(&order));
        assert_eq!(t.effects, expected);
    }

    #[test]
    fn test_load_with_finished_order_only_remembers_it() {
        let order = sample_order(7, OrderStatus::Completed);
        let t = transition(Phase::NoOrder, LifecycleEvent::Loaded(Some(order.clone())));
        assert_eq!(t.next, Phase::Forming);
        assert_eq!(
            t.effects,
            vec![
                Effect::RememberLastTrip(order),
                Effect::UnlockForm { reset: false }
            ]
        );
    }

    #[test]
    fn test_submission_enters_pending() {
        let order = sample_order(8, OrderStatus::Pending);
        let t = transition(Phase::Forming, LifecycleEvent::Submitted(order.clone()));
        assert_eq!(t.next, Phase::Pending);
        assert_eq!(t.effects[0], Effect::RememberLastTrip(order.clone()));
        assert_eq!(&t.effects[1..], active_effects(&order).as_slice());
    }

    #[test]
    fn test_submission_outside_form_is_ignored() {
        let order = sample_order(8, OrderStatus::Pending);
        let t = transition(Phase::Pending, LifecycleEvent::Submitted(order));
        assert_eq!(t, Transition::stay(Phase::Pending));
    }

    #[test]
    fn test_poll_with_same_status_does_nothing() {
        let order = sample_order(8, OrderStatus::Pending);
        let t = transition(Phase::Pending, LifecycleEvent::Polled(order));
        assert_eq!(t, Transition::stay(Phase::Pending));
    }

    #[test]
    fn test_poll_walks_through_active_states() {
        let accepted = sample_order(8, OrderStatus::Accepted);
        let t = transition(Phase::Pending, LifecycleEvent::Polled(accepted.clone()));
        assert_eq!(t.next, Phase::Accepted);
        assert_eq!(t.effects, active_effects(&accepted));

        let riding = sample_order(8, OrderStatus::InProgress);
        let t = transition(Phase::Accepted, LifecycleEvent::Polled(riding));
        assert_eq!(t.next, Phase::InProgress);
    }

    #[test]
    fn test_completion_notifies_total_and_resets() {
        let mut done = sample_order(8, OrderStatus::Completed);
        done.total_price = Some(230.0);
        let t = transition(Phase::InProgress, LifecycleEvent::Polled(done.clone()));
        assert_eq!(t.next, Phase::Completed);
        assert_eq!(
            t.effects,
            vec![
                Effect::StopPolling,
                Effect::RememberLastTrip(done),
                Effect::ClearRoute,
                Effect::Notify("Your ride was completed!\nTotal price: 230".into()),
                Effect::UnlockForm { reset: true },
            ]
        );
    }

    #[test]
    fn test_driver_cancellation_keeps_fields() {
        let mut canceled = sample_order(8, OrderStatus::Canceled);
        canceled.cancellation_source = Some(CancellationSource::Driver);
        let t = transition(Phase::Accepted, LifecycleEvent::Polled(canceled));
        assert_eq!(t.next, Phase::Canceled);
        assert!(t.effects.contains(&Effect::StopPolling));
        assert!(
            t.effects
                .contains(&Effect::Notify("Your ride was cancelled by the driver".into()))
        );
        assert_eq!(t.effects.last(), Some(&Effect::UnlockForm { reset: false }));
    }

    #[test]
    fn test_system_or_client_cancellation_resets_silently() {
        for source in [
            Some(CancellationSource::System),
            Some(CancellationSource::Client),
            None,
        ] {
            let mut canceled = sample_order(8, OrderStatus::Canceled);
            canceled.cancellation_source = source;
            let t = transition(Phase::Pending, LifecycleEvent::Polled(canceled));
            assert!(!t.effects.iter().any(|e| matches!(e, Effect::Notify(_))));
            assert_eq!(t.effects.last(), Some(&Effect::UnlockForm { reset: true }));
        }
    }

    #[test]
    fn test_client_cancel_stops_everything() {
        let order = sample_order(8, OrderStatus::Pending);
        let t = transition(Phase::Pending, LifecycleEvent::ClientCanceled(order.clone()));
        assert_eq!(t.next, Phase::Canceled);
        assert_eq!(
            t.effects,
            vec![
                Effect::StopPolling,
                Effect::RememberLastTrip(order),
                Effect::ClearRoute,
                Effect::UnlockForm { reset: true },
            ]
        );
    }

    #[test]
    fn test_late_poll_after_terminal_is_ignored() {
        let order = sample_order(8, OrderStatus::Accepted);
        assert_eq!(
            transition(Phase::Forming, LifecycleEvent::Polled(order.clone())),
            Transition::stay(Phase::Forming)
        );
        assert_eq!(
            transition(Phase::Canceled, LifecycleEvent::Polled(order)),
            Transition::stay(Phase::Canceled)
        );
    }

    #[test]
    fn test_reset_leaves_terminal_phases() {
        assert_eq!(
            transition(Phase::Completed, LifecycleEvent::Reset).next,
            Phase::Forming
        );
        assert_eq!(
            transition(Phase::Canceled, LifecycleEvent::Reset).next,
            Phase::Forming
        );
        assert_eq!(
            transition(Phase::Pending, LifecycleEvent::Reset).next,
            Phase::Pending
        );
    }
}
