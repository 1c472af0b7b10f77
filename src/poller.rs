//! Periodic status poll for the active order.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};

use crate::{services::orders::OrderApi, worker::WorkerEvent};

/// Disposer for a running poll task. Dropping it stops the task.
#[derive(Debug)]
pub struct PollHandle {
    task: JoinHandle<()>,
}

impl PollHandle {
    /// Stop polling now.
    pub fn dispose(self) {}
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Owns at most one poll task at a time.
pub struct OrderPoller {
    api: Arc<dyn OrderApi>,
    interval: Duration,
    current: Option<(i64, PollHandle)>,
}

impl OrderPoller {
    pub fn new(api: Arc<dyn OrderApi>, interval: Duration) -> Self {
        Self {
            api,
            interval,
            current: None,
        }
    }

    /// Swap the service (after a settings change). A running poll keeps its old client
    /// until it is restarted.
    pub fn set_api(&mut self, api: Arc<dyn OrderApi>, interval: Duration) {
        self.api = api;
        self.interval = interval;
    }

    /// Order currently being polled.
    pub fn polling_order(&self) -> Option<i64> {
        self.current.as_ref().map(|(id, _)| *id)
    }

    /// Start polling `order_id`, replacing any previous task.
    /// With `immediate` the first request goes out right away, otherwise after one period.
    pub fn start(&mut self, order_id: i64, immediate: bool, tx: mpsc::Sender<WorkerEvent>) {
        self.stop();

        let api = Arc::clone(&self.api);
        let period = self.interval;
        let first = if immediate {
            Instant::now()
        } else {
            Instant::now() + period
        };

        let task = tokio::spawn(async move {
            let mut ticker = time::interval_at(first, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match api.get_order(order_id).await {
                    Ok(order) => {
                        if tx.send(WorkerEvent::OrderPolled(order)).await.is_err() {
                            break;
                        }
                    }
                    // 失敗しても次の周期で再試行する。
                    Err(e) => tracing::warn!(order_id, "status poll failed: {e}"),
                }
            }
        });

        tracing::info!(order_id, ?period, immediate, "status polling started");
        self.current = Some((order_id, PollHandle { task }));
    }

    pub fn stop(&mut self) {
        if let Some((order_id, handle)) = self.current.take() {
            handle.dispose();
            tracing::info!(order_id, "status polling stopped");
        }
    }
}

impl Drop for OrderPoller {
    fn drop(&mut self) {
        self.stop();
    }
}
