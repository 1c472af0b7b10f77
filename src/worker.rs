//! Background worker running order service and map provider calls.

use std::sync::Arc;

use reqwest::Client;
use tokio::sync::mpsc;

use crate::{
    config::Config,
    fare::FareConfig,
    order::{Order, OrderCreate},
    poller::OrderPoller,
    route::LngLat,
    services::{
        mapbox::{DrivingRoute, MapProvider, MapboxClient, Place},
        orders::{ApiError, HttpOrderApi, OrderApi},
    },
    session::EndpointKind,
};

/// What a routing request is for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoutePurpose {
    /// Fare estimate while the form is editable.
    Estimate,
    /// Polyline for the active order.
    Draw,
}

/// Commands sent from the UI to the worker.
#[derive(Debug)]
pub enum WorkerCmd {
    /// Fetch the tariff, then the current order.
    Bootstrap,
    SubmitOrder(OrderCreate),
    CancelOrder(i64),
    /// Resolve the map center into an address for one endpoint.
    ReverseGeocode { target: EndpointKind, at: LngLat },
    /// Address autocomplete.
    Search(String),
    Route {
        purpose: RoutePurpose,
        start: LngLat,
        end: LngLat,
    },
    StartPolling { order_id: i64, immediate: bool },
    StopPolling,
    /// Apply updated settings and rebuild the clients.
    SaveSettings(Config),
}

/// Events emitted by the worker for UI updates.
#[derive(Clone, Debug)]
pub enum WorkerEvent {
    FareLoaded(FareConfig),
    /// `None` when the client has never ordered.
    CurrentOrder(Option<Order>),
    CurrentOrderFailed(String),
    OrderSubmitted(Order),
    /// User-facing message for the form.
    SubmitFailed(String),
    CancelSucceeded(i64),
    CancelFailed(String),
    AddressResolved {
        target: EndpointKind,
        at: LngLat,
        address: String,
    },
    Suggestions { query: String, places: Vec<Place> },
    RouteReady {
        purpose: RoutePurpose,
        start: LngLat,
        end: LngLat,
        route: DrivingRoute,
    },
    OrderPolled(Order),
    /// Informational log message.
    Log(String),
}

/// Services and poll state owned by the worker task.
pub struct Worker {
    orders: Arc<dyn OrderApi>,
    maps: Arc<dyn MapProvider>,
    poller: OrderPoller,
    fallback_fare: FareConfig,
    tx: mpsc::Sender<WorkerEvent>,
}

impl Worker {
    pub fn new(
        orders: Arc<dyn OrderApi>,
        maps: Arc<dyn MapProvider>,
        cfg: &Config,
        tx: mpsc::Sender<WorkerEvent>,
    ) -> Self {
        Self {
            poller: OrderPoller::new(Arc::clone(&orders), cfg.poll_interval()),
            orders,
            maps,
            fallback_fare: cfg.fallback_fare(),
            tx,
        }
    }

    /// HTTP-backed worker for a config.
    pub fn from_config(http: &Client, cfg: &Config, tx: mpsc::Sender<WorkerEvent>) -> Self {
        let (orders, maps) = http_services(http, cfg);
        Self::new(orders, maps, cfg, tx)
    }

    async fn emit(&self, ev: WorkerEvent) {
        let _ = self.tx.send(ev).await;
    }

    /// Handle one command to completion.
    pub async fn handle(&mut self, cmd: WorkerCmd, http: &Client) {
        match cmd {
            WorkerCmd::Bootstrap => self.bootstrap().await,

            WorkerCmd::SubmitOrder(body) => {
                tracing::info!(price = body.price, bonus = body.bonus_fare, "submitting order");
                match self.orders.create_order(&body).await {
                    Ok(order) => {
                        tracing::info!(order_id = order.id, "order created");
                        self.emit(WorkerEvent::OrderSubmitted(order)).await;
                    }
                    Err(e) => {
                        tracing::error!("order submission failed: {e}");
                        self.emit(WorkerEvent::SubmitFailed(e.user_message())).await;
                    }
                }
            }

            WorkerCmd::CancelOrder(id) => match self.orders.cancel_order(id).await {
                Ok(()) => {
                    tracing::info!(order_id = id, "order cancelled by client");
                    self.emit(WorkerEvent::CancelSucceeded(id)).await;
                }
                Err(e) => {
                    tracing::error!(order_id = id, "cancel failed: {e}");
                    let reason = match &e {
                        ApiError::Rejected { message, .. } => message.clone(),
                        other => other.to_string(),
                    };
                    self.emit(WorkerEvent::CancelFailed(format!("Failed to cancel: {reason}")))
                        .await;
                }
            },

            WorkerCmd::ReverseGeocode { target, at } => match self.maps.reverse_geocode(at).await {
                Ok(address) => {
                    self.emit(WorkerEvent::AddressResolved {
                        target,
                        at,
                        address,
                    })
                    .await;
                }
                Err(e) => {
                    tracing::warn!("reverse geocoding failed: {e}");
                    self.emit(WorkerEvent::Log(format!("geocoding failed: {e}")))
                        .await;
                }
            },

            WorkerCmd::Search(query) => match self.maps.search(&query).await {
                Ok(places) => {
                    tracing::debug!(%query, count = places.len(), "search results");
                    self.emit(WorkerEvent::Suggestions { query, places }).await;
                }
                Err(e) => {
                    tracing::warn!(%query, "address search failed: {e}");
                    self.emit(WorkerEvent::Suggestions {
                        query,
                        places: vec![],
                    })
                    .await;
                }
            },

            WorkerCmd::Route {
                purpose,
                start,
                end,
            } => match self.maps.driving_route(start, end).await {
                Ok(route) => {
                    self.emit(WorkerEvent::RouteReady {
                        purpose,
                        start,
                        end,
                        route,
                    })
                    .await;
                }
                // 見積りは前回値のまま残す。
                Err(e) => tracing::warn!(?purpose, "routing failed: {e}"),
            },

            WorkerCmd::StartPolling {
                order_id,
                immediate,
            } => self.poller.start(order_id, immediate, self.tx.clone()),

            WorkerCmd::StopPolling => self.poller.stop(),

            WorkerCmd::SaveSettings(cfg) => {
                tracing::info!("settings updated");
                let (orders, maps) = http_services(http, &cfg);
                self.poller.set_api(Arc::clone(&orders), cfg.poll_interval());
                // 実行中のポーリングは新しいクライアントで張り直す。
                if let Some(order_id) = self.poller.polling_order() {
                    self.poller.start(order_id, true, self.tx.clone());
                }
                self.orders = orders;
                self.maps = maps;
                self.fallback_fare = cfg.fallback_fare();
                self.emit(WorkerEvent::Log("settings updated".into())).await;
            }
        }
    }

    async fn bootstrap(&mut self) {
        let fare = match self.orders.fare_config().await {
            Ok(fare) => fare,
            Err(e) => {
                tracing::warn!("fare config unavailable, using defaults: {e}");
                self.fallback_fare.clone()
            }
        };
        self.emit(WorkerEvent::FareLoaded(fare)).await;

        match self.orders.current_order().await {
            Ok(order) => {
                tracing::info!(order_id = order.as_ref().map(|o| o.id), "current order loaded");
                self.emit(WorkerEvent::CurrentOrder(order)).await;
            }
            Err(e) => {
                tracing::error!("current order lookup failed: {e}");
                self.emit(WorkerEvent::CurrentOrderFailed(e.to_string())).await;
            }
        }
    }
}

fn http_services(http: &Client, cfg: &Config) -> (Arc<dyn OrderApi>, Arc<dyn MapProvider>) {
    let orders = HttpOrderApi::new(http.clone(), &cfg.server.base_url, &cfg.server.init_data);
    let maps = MapboxClient::new(http.clone(), cfg.mapbox.clone());
    (Arc::new(orders), Arc::new(maps))
}

/// Main worker loop: handle commands sequentially until the UI hangs up.
pub async fn run(mut rx: mpsc::Receiver<WorkerCmd>, tx: mpsc::Sender<WorkerEvent>, cfg: Config) {
    // Shared HTTP client for all API calls.
    let http = Client::new();
    let mut worker = Worker::from_config(&http, &cfg, tx);
    tracing::info!("worker started");

    while let Some(cmd) = rx.recv().await {
        worker.handle(cmd, &http).await;
    }
    tracing::info!("worker stopped");
}
