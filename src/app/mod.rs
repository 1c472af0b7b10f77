//! TUIのイベントループ、ワーカーイベントの反映、状態管理。

mod handlers;
mod render;

use anyhow::Result;
use crossterm::event::{self, Event, KeyEventKind};
use ratatui::layout::Rect;
use std::{
    path::PathBuf,
    time::{Duration, Instant},
};
use tokio::sync::mpsc;

use crate::{
    config::Config,
    events::{Dialog, Screen, UiState},
    input::InputBoxState,
    layout,
    lifecycle::{Effect, LifecycleEvent},
    map_view::MapView,
    order::{CancellationSource, OrderStatus},
    route::{LngLat, RouteOverlay},
    session::Session,
    shortcuts::Shortcuts,
    ui::Tui,
    wizard::WizardState,
    worker::{self, RoutePurpose, WorkerCmd, WorkerEvent},
};

use handlers::{handle_key, is_ctrl_c};
use render::draw;

/// 地図の移動が止まったとみなすまでの時間。
const SETTLE_DELAY: Duration = Duration::from_millis(400);

/// 入力処理と描画で共有するアプリ状態。
pub struct App {
    /// 永続化された設定ファイルのパス。
    pub cfg_path: PathBuf,
    pub cfg: Config,
    pub ui: UiState,
    /// 注文フォームと注文のライフサイクル。
    pub session: Session,
    pub map: MapView,
    /// 出発地・目的地のマーカーと経路。
    pub overlay: RouteOverlay,
    /// Workerへのコマンド送信チャネル。
    pub worker_tx: mpsc::Sender<WorkerCmd>,
    /// Workerからのイベント受信チャネル。
    pub worker_rx: mpsc::Receiver<WorkerEvent>,
    /// 入力ボックスの状態（入力中はSome）。
    pub input_box: Option<InputBoxState>,
    pub wizard_state: WizardState,
    pub shortcuts: Shortcuts,

    /// ウィザードで編集中のサーバーURL。
    pub server_url: String,
    /// ウィザードで編集中の本人確認トークン。
    pub init_data: String,
    /// ウィザードで編集中の地図トークン。
    pub mapbox_token: String,

    /// 最後に地図を動かした時刻（静止待ち）。
    pub last_pan: Option<Instant>,
    /// 応答待ちの逆ジオコーディング地点。
    pub pending_geocode: Option<LngLat>,
    /// ポーリングを依頼中の注文。
    pub polling: Option<i64>,
    /// 点滅表示の基準時刻。
    pub started: Instant,
}

impl App {
    pub fn new(
        cfg_path: PathBuf,
        cfg: Config,
        shortcuts: Shortcuts,
        worker_tx: mpsc::Sender<WorkerCmd>,
        worker_rx: mpsc::Receiver<WorkerEvent>,
    ) -> Self {
        let screen = if cfg.needs_setup() {
            Screen::InitialSetup
        } else {
            Screen::Booking
        };
        Self {
            ui: UiState::new(screen),
            session: Session::new(cfg.fallback_fare()),
            map: MapView::new(
                LngLat::new(cfg.map.center_lng, cfg.map.center_lat),
                cfg.map.zoom,
            ),
            overlay: RouteOverlay::new(),
            worker_tx,
            worker_rx,
            input_box: None,
            wizard_state: WizardState::new(),
            shortcuts,
            server_url: cfg.server.base_url.clone(),
            init_data: cfg.server.init_data.clone(),
            mapbox_token: cfg.mapbox.access_token.clone(),
            last_pan: None,
            pending_geocode: None,
            polling: None,
            started: Instant::now(),
            cfg_path,
            cfg,
        }
    }

    async fn send(&self, cmd: WorkerCmd) -> Result<()> {
        self.worker_tx.send(cmd).await?;
        Ok(())
    }

    /// 経路全体がフォームに隠れないよう地図を合わせる。
    fn fit_route(&mut self) {
        let Some(bounds) = self.overlay.bounds() else {
            return;
        };
        let (cols, rows) = crossterm::terminal::size()
            .map(|(w, h)| layout::map_canvas_size(Rect::new(0, 0, w, h)))
            .unwrap_or((80, 24));
        self.map.fit_bounds(bounds, layout::route_padding(), cols, rows);
    }

    async fn start_polling(&mut self, order_id: i64, immediate: bool) -> Result<()> {
        self.polling = Some(order_id);
        self.send(WorkerCmd::StartPolling {
            order_id,
            immediate,
        })
        .await
    }

    async fn stop_polling(&mut self) -> Result<()> {
        if self.polling.take().is_some() {
            self.send(WorkerCmd::StopPolling).await?;
        }
        Ok(())
    }
}

/// ユーザーが終了するまでメインTUIループを回す。
pub async fn run_app(terminal: &mut Tui) -> Result<()> {
    // 設定ファイルを読み込む（初回はデフォルトを生成）。
    let cfg_path = PathBuf::from("config.toml");
    let cfg = Config::load_or_default(&cfg_path)?;
    let shortcuts = Shortcuts::load_or_default("shortcut.toml")?;

    let (tx_cmd, rx_cmd) = mpsc::channel::<WorkerCmd>(64);
    let (tx_ev, rx_ev) = mpsc::channel::<WorkerEvent>(256);
    tokio::spawn(worker::run(rx_cmd, tx_ev, cfg.clone()));

    let mut app = App::new(cfg_path, cfg, shortcuts, tx_cmd, rx_ev);
    if app.ui.screen == Screen::Booking {
        app.send(WorkerCmd::Bootstrap).await?;
        app.ui.status = "Loading...".into();
    }

    loop {
        terminal.draw(|f| draw(f, &app))?;

        // 入力処理の前にWorkerイベントを消化する。
        while let Ok(ev) = app.worker_rx.try_recv() {
            handle_worker_event(&mut app, ev).await?;
        }
        settle_map(&mut app).await?;

        if event::poll(Duration::from_millis(50))? {
            match event::read()? {
                Event::Key(k) if k.kind == KeyEventKind::Press => {
                    if is_ctrl_c(&k) || handle_key(&mut app, k).await? {
                        break;
                    }
                }
                Event::FocusLost => focus_changed(&mut app, false).await?,
                Event::FocusGained => focus_changed(&mut app, true).await?,
                _ => {}
            }
        }
    }

    app.stop_polling().await?;
    Ok(())
}

/// 端末が背面に回ったらポーリングを止め、戻ったら即座に再開する。
async fn focus_changed(app: &mut App, focused: bool) -> Result<()> {
    app.ui.focused = focused;
    if !focused {
        tracing::info!("terminal lost focus");
        return app.stop_polling().await;
    }
    tracing::info!("terminal regained focus");
    if let Some(id) = app.session.cancellable_order().map(|o| o.id)
        && app.polling.is_none()
    {
        app.start_polling(id, true).await?;
    }
    Ok(())
}

/// 地図の移動が止まったら中心を住所に変換する。
async fn settle_map(app: &mut App) -> Result<()> {
    let Some(t) = app.last_pan else {
        return Ok(());
    };
    if t.elapsed() < SETTLE_DELAY {
        return Ok(());
    }
    app.last_pan = None;
    if app.session.is_locked() {
        return Ok(());
    }
    let at = app.map.center.rounded();
    let target = app.session.selection().endpoint();
    app.pending_geocode = Some(at);
    app.send(WorkerCmd::ReverseGeocode { target, at }).await
}

/// セッションが返した外部向けの作用を実行する。
pub(crate) async fn run_effects(app: &mut App, effects: Vec<Effect>) -> Result<()> {
    for effect in effects {
        match effect {
            Effect::StartPolling(order_id) => {
                // 状態変化ごとにタイマーを作り直さない。
                if app.polling != Some(order_id) && app.ui.focused {
                    app.start_polling(order_id, false).await?;
                }
            }
            Effect::StopPolling => app.stop_polling().await?,
            Effect::DrawRoute { start, end } => {
                let known = app
                    .overlay
                    .layer()
                    .is_some_and(|l| l.start == start && l.end == end);
                app.overlay.draw(start, end);
                app.fit_route();
                if !known {
                    app.send(WorkerCmd::Route {
                        purpose: RoutePurpose::Draw,
                        start,
                        end,
                    })
                    .await?;
                }
            }
            Effect::ClearRoute => app.overlay.clear(),
            Effect::Notify(text) => app.ui.dialog = Some(Dialog::Alert(text)),
            Effect::EstimateRoute { start, end } => {
                app.send(WorkerCmd::Route {
                    purpose: RoutePurpose::Estimate,
                    start,
                    end,
                })
                .await?;
            }
            other => tracing::debug!(?other, "effect left to the session"),
        }
    }
    Ok(())
}

async fn apply_lifecycle(app: &mut App, event: LifecycleEvent) -> Result<()> {
    let effects = app.session.apply(event);
    if app.session.is_locked() {
        app.last_pan = None;
    }
    run_effects(app, effects).await
}

/// WorkerイベントをUI状態へ反映する。
async fn handle_worker_event(app: &mut App, ev: WorkerEvent) -> Result<()> {
    match ev {
        WorkerEvent::FareLoaded(fare) => {
            app.ui.push_log(format!(
                "fare: {} + {}/km + {}/min {}",
                fare.base_fare, fare.per_km, fare.per_min, fare.currency
            ));
            app.session.set_fare_config(fare);
        }
        WorkerEvent::CurrentOrder(order) => {
            app.ui.status = "Ready".into();
            apply_lifecycle(app, LifecycleEvent::Loaded(order)).await?;
        }
        WorkerEvent::CurrentOrderFailed(msg) => {
            app.ui.error = Some(format!("Could not load the current order: {msg}"));
            apply_lifecycle(app, LifecycleEvent::LoadFailed).await?;
        }
        WorkerEvent::OrderSubmitted(order) => {
            app.ui.status = format!("Order #{} placed", order.id);
            apply_lifecycle(app, LifecycleEvent::Submitted(order)).await?;
        }
        WorkerEvent::SubmitFailed(msg) => app.session.submission_failed(msg),
        WorkerEvent::CancelSucceeded(id) => {
            let Some(mut order) = app
                .session
                .current_order()
                .filter(|o| o.id == id)
                .cloned()
            else {
                return Ok(());
            };
            order.status = OrderStatus::Canceled;
            order.cancellation_source = Some(CancellationSource::Client);
            app.ui.status = "Trip cancelled".into();
            apply_lifecycle(app, LifecycleEvent::ClientCanceled(order)).await?;
        }
        WorkerEvent::CancelFailed(msg) => app.ui.dialog = Some(Dialog::Alert(msg)),
        WorkerEvent::AddressResolved {
            target,
            at,
            address,
        } => {
            // 後から地図を動かしていれば古い応答は捨てる。
            if app.pending_geocode != Some(at) {
                return Ok(());
            }
            app.pending_geocode = None;
            let effects = app.session.set_endpoint(target, address, at);
            run_effects(app, effects).await?;
        }
        WorkerEvent::Suggestions { query, places } => {
            let current = app.input_box.as_ref().and_then(|b| b.query());
            if current == Some(query.as_str()) {
                app.ui.search.places = places;
                app.ui.search.selected = 0;
                app.ui.search.answered = Some(query);
            }
        }
        WorkerEvent::RouteReady {
            purpose,
            start,
            end,
            route,
        } => match purpose {
            RoutePurpose::Estimate => {
                app.session.apply_route_estimate(
                    start,
                    end,
                    route.distance_km(),
                    route.duration_min(),
                );
            }
            RoutePurpose::Draw => {
                if app.overlay.set_route(start, end, route.geometry) {
                    app.fit_route();
                }
            }
        },
        WorkerEvent::OrderPolled(order) => {
            apply_lifecycle(app, LifecycleEvent::Polled(order)).await?;
        }
        WorkerEvent::Log(s) => app.ui.push_log(s),
    }
    Ok(())
}

/// 配車サービスのWebページURL（本人確認トークン付き）。
pub fn page_url(base_url: &str, path: &str, init_data: &str) -> String {
    format!(
        "{}{}?initData={}",
        base_url.trim_end_matches('/'),
        path,
        urlencoding::encode(init_data)
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        fare::FareConfig,
        lifecycle::Phase,
        order::tests::sample_order,
        services::mapbox::DrivingRoute,
        session::EndpointKind,
    };
    use pretty_assertions::assert_eq;

    /// Workerを起動せず、送られたコマンドを受け取れるApp。
    pub(crate) fn test_app() -> (App, mpsc::Receiver<WorkerCmd>, mpsc::Sender<WorkerEvent>) {
        let mut cfg = Config::default();
        cfg.server.init_data = "query_id=1&user=%7B%7D".into();
        cfg.mapbox.access_token = "pk.test".into();
        let (tx_cmd, rx_cmd) = mpsc::channel(64);
        let (tx_ev, rx_ev) = mpsc::channel(64);
        let app = App::new(
            PathBuf::from("unused.toml"),
            cfg,
            Shortcuts::default(),
            tx_cmd,
            rx_ev,
        );
        (app, rx_cmd, tx_ev)
    }

    pub(crate) fn sent(rx: &mut mpsc::Receiver<WorkerCmd>) -> Vec<WorkerCmd> {
        let mut out = vec![];
        while let Ok(cmd) = rx.try_recv() {
            out.push(cmd);
        }
        out
    }

    fn route(km: f64, min: f64) -> DrivingRoute {
        DrivingRoute {
            distance_m: km * 1000.0,
            duration_s: min * 60.0,
            geometry: vec![LngLat::new(28.5, 47.0), LngLat::new(29.0, 46.5)],
        }
    }

    #[tokio::test]
    async fn test_startup_without_order_shows_base_fare() {
        let (mut app, mut rx, _tx) = test_app();
        assert_eq!(app.ui.screen, Screen::Booking);
        handle_worker_event(&mut app, WorkerEvent::FareLoaded(FareConfig::default()))
            .await
            .unwrap();
        handle_worker_event(&mut app, WorkerEvent::CurrentOrder(None))
            .await
            .unwrap();

        assert_eq!(app.session.phase(), Phase::Forming);
        assert_eq!(app.session.price_line(), "Price: ~50 (+0 tip) = ~50 €");
        assert!(sent(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_startup_with_active_order_locks_and_polls() {
        let (mut app, mut rx, _tx) = test_app();
        let order = sample_order(31, OrderStatus::Accepted);
        handle_worker_event(&mut app, WorkerEvent::CurrentOrder(Some(order.clone())))
            .await
            .unwrap();

        assert!(app.session.is_locked());
        assert_eq!(app.polling, Some(31));
        assert_eq!(app.overlay.markers().count(), 2);
        let cmds = sent(&mut rx);
        assert!(matches!(
            cmds[0],
            WorkerCmd::StartPolling {
                order_id: 31,
                immediate: false
            }
        ));
        assert!(matches!(
            cmds[1],
            WorkerCmd::Route {
                purpose: RoutePurpose::Draw,
                ..
            }
        ));

        // 経路の応答で経路レイヤーが入る。
        handle_worker_event(
            &mut app,
            WorkerEvent::RouteReady {
                purpose: RoutePurpose::Draw,
                start: order.start(),
                end: order.end(),
                route: route(5.0, 12.0),
            },
        )
        .await
        .unwrap();
        assert!(app.overlay.layer().is_some());
    }

    #[tokio::test]
    async fn test_status_change_keeps_single_poll_timer() {
        let (mut app, mut rx, _tx) = test_app();
        handle_worker_event(
            &mut app,
            WorkerEvent::CurrentOrder(Some(sample_order(32, OrderStatus::Pending))),
        )
        .await
        .unwrap();
        sent(&mut rx);

        handle_worker_event(
            &mut app,
            WorkerEvent::OrderPolled(sample_order(32, OrderStatus::Accepted)),
        )
        .await
        .unwrap();
        assert_eq!(app.session.phase(), Phase::Accepted);
        let cmds = sent(&mut rx);
        assert!(
            !cmds
                .iter()
                .any(|c| matches!(c, WorkerCmd::StartPolling { .. })),
            "unexpected {cmds:?}"
        );
    }

    #[tokio::test]
    async fn test_completion_stops_polling_and_notifies() {
        let (mut app, mut rx, _tx) = test_app();
        handle_worker_event(
            &mut app,
            WorkerEvent::CurrentOrder(Some(sample_order(33, OrderStatus::InProgress))),
        )
        .await
        .unwrap();
        sent(&mut rx);

        let mut done = sample_order(33, OrderStatus::Completed);
        done.total_price = Some(230.0);
        handle_worker_event(&mut app, WorkerEvent::OrderPolled(done))
            .await
            .unwrap();

        assert!(matches!(sent(&mut rx)[..], [WorkerCmd::StopPolling]));
        assert_eq!(app.polling, None);
        assert!(app.overlay.is_empty());
        assert!(!app.session.is_locked());
        match &app.ui.dialog {
            Some(Dialog::Alert(text)) => assert!(text.contains("230")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_client_cancel_resets_form() {
        let (mut app, mut rx, _tx) = test_app();
        handle_worker_event(
            &mut app,
            WorkerEvent::CurrentOrder(Some(sample_order(34, OrderStatus::Pending))),
        )
        .await
        .unwrap();
        sent(&mut rx);

        handle_worker_event(&mut app, WorkerEvent::CancelSucceeded(34))
            .await
            .unwrap();
        assert!(!app.session.is_locked());
        assert!(app.session.form().start.is_none());
        assert!(matches!(sent(&mut rx)[..], [WorkerCmd::StopPolling]));
        assert_eq!(
            app.session
                .last_known_order()
                .and_then(|o| o.cancellation_source),
            Some(CancellationSource::Client)
        );
    }

    #[tokio::test]
    async fn test_cancel_failure_shows_alert_and_keeps_order() {
        let (mut app, _rx, _tx) = test_app();
        handle_worker_event(
            &mut app,
            WorkerEvent::CurrentOrder(Some(sample_order(35, OrderStatus::Pending))),
        )
        .await
        .unwrap();
        handle_worker_event(
            &mut app,
            WorkerEvent::CancelFailed("Failed to cancel: Order already accepted".into()),
        )
        .await
        .unwrap();
        assert!(app.session.is_locked());
        assert_eq!(
            app.ui.dialog,
            Some(Dialog::Alert("Failed to cancel: Order already accepted".into()))
        );
    }

    #[tokio::test]
    async fn test_focus_loss_pauses_and_resumes_polling() {
        let (mut app, mut rx, _tx) = test_app();
        handle_worker_event(
            &mut app,
            WorkerEvent::CurrentOrder(Some(sample_order(36, OrderStatus::Pending))),
        )
        .await
        .unwrap();
        sent(&mut rx);

        focus_changed(&mut app, false).await.unwrap();
        assert!(matches!(sent(&mut rx)[..], [WorkerCmd::StopPolling]));

        focus_changed(&mut app, true).await.unwrap();
        assert!(matches!(
            sent(&mut rx)[..],
            [WorkerCmd::StartPolling {
                order_id: 36,
                immediate: true
            }]
        ));
    }

    #[tokio::test]
    async fn test_settled_map_resolves_selected_endpoint() {
        let (mut app, mut rx, _tx) = test_app();
        handle_worker_event(&mut app, WorkerEvent::CurrentOrder(None))
            .await
            .unwrap();

        app.map.pan(3, 0);
        app.last_pan = Some(Instant::now() - SETTLE_DELAY);
        settle_map(&mut app).await.unwrap();
        let at = app.map.center.rounded();
        assert!(matches!(
            sent(&mut rx)[..],
            [WorkerCmd::ReverseGeocode {
                target: EndpointKind::Start,
                ..
            }]
        ));

        // 別地点への古い応答は無視される。
        handle_worker_event(
            &mut app,
            WorkerEvent::AddressResolved {
                target: EndpointKind::Start,
                at: LngLat::new(0.0, 0.0),
                address: "Elsewhere".into(),
            },
        )
        .await
        .unwrap();
        assert!(app.session.form().start.is_none());

        handle_worker_event(
            &mut app,
            WorkerEvent::AddressResolved {
                target: EndpointKind::Start,
                at,
                address: "Strada Puskin 22, Chisinau, Moldova".into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(
            app.session.form().start.as_ref().map(|e| e.address.as_str()),
            Some("Strada Puskin 22, Chisinau, Moldova")
        );
    }

    #[tokio::test]
    async fn test_route_estimate_updates_price() {
        let (mut app, mut rx, _tx) = test_app();
        handle_worker_event(&mut app, WorkerEvent::CurrentOrder(None))
            .await
            .unwrap();
        let a = LngLat::new(28.5, 47.0);
        let b = LngLat::new(29.0, 46.5);
        app.session
            .set_endpoint(EndpointKind::Start, "A".into(), a);
        let effects = app.session.set_endpoint(EndpointKind::End, "B".into(), b);
        run_effects(&mut app, effects).await.unwrap();
        assert!(matches!(
            sent(&mut rx)[..],
            [WorkerCmd::Route {
                purpose: RoutePurpose::Estimate,
                ..
            }]
        ));

        handle_worker_event(
            &mut app,
            WorkerEvent::RouteReady {
                purpose: RoutePurpose::Estimate,
                start: a,
                end: b,
                route: route(5.0, 12.0),
            },
        )
        .await
        .unwrap();
        assert_eq!(app.session.price_line(), "Price: ~210 (+0 tip) = ~210 €");
    }

    #[test]
    fn test_page_url_carries_identity() {
        assert_eq!(
            page_url("http://localhost:8080/", "/client/orders/history", "a=1&b=2"),
            "http://localhost:8080/client/orders/history?initData=a%3D1%26b%3D2"
        );
    }
}
