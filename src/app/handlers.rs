//! キー入力ハンドラー関数。

use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use std::time::Instant;

use crate::{
    events::{Dialog, Screen, SearchState},
    input::{InputBoxState, InputCallbackId},
    lifecycle::Phase,
    session::{EndpointKind, SelectionMode, SubmitError},
    shortcuts::matches_shortcut,
    wizard::{WizardState, WizardStep},
    worker::WorkerCmd,
};

use super::{App, page_url, run_effects};

/// 地図を1回で動かすセル数（横, 縦）。
const PAN_COLS: i32 = 4;
const PAN_ROWS: i32 = 2;
/// 検索候補へ移動するときのズーム。
const PLACE_ZOOM: f64 = 17.0;

/// キー入力を1件処理し、終了すべきならtrueを返す。
pub async fn handle_key(app: &mut App, k: KeyEvent) -> Result<bool> {
    // 入力ボックス、ダイアログの順に優先する。
    if app.input_box.is_some() {
        return handle_input_box_key(app, k).await;
    }
    if app.ui.dialog.is_some() {
        return handle_dialog_key(app, k).await;
    }

    match app.ui.screen {
        Screen::Booking => handle_booking_key(app, k).await,
        Screen::InitialSetup => handle_wizard_key(app, k).await,
    }
}

/// Ctrl+Cかどうかを判定する。
pub fn is_ctrl_c(k: &KeyEvent) -> bool {
    k.modifiers.contains(KeyModifiers::CONTROL) && k.code == KeyCode::Char('c')
}

/// 予約画面のキー処理。
async fn handle_booking_key(app: &mut App, k: KeyEvent) -> Result<bool> {
    let sc = app.shortcuts.booking.clone();

    if matches_shortcut(&k, &sc.quit) {
        return Ok(true);
    } else if matches_shortcut(&k, &sc.pan_up) {
        pan(app, 0, PAN_ROWS);
    } else if matches_shortcut(&k, &sc.pan_down) {
        pan(app, 0, -PAN_ROWS);
    } else if matches_shortcut(&k, &sc.pan_left) {
        pan(app, -PAN_COLS, 0);
    } else if matches_shortcut(&k, &sc.pan_right) {
        pan(app, PAN_COLS, 0);
    } else if matches_shortcut(&k, &sc.zoom_in) {
        zoom(app, 1.0);
    } else if matches_shortcut(&k, &sc.zoom_out) {
        zoom(app, -1.0);
    } else if matches_shortcut(&k, &sc.search_start) {
        open_search(app, EndpointKind::Start);
    } else if matches_shortcut(&k, &sc.search_end) {
        open_search(app, EndpointKind::End);
    } else if matches_shortcut(&k, &sc.notes) {
        if app.session.set_selection(SelectionMode::Notes) {
            let notes = app.session.form().notes.clone();
            app.input_box = Some(InputBoxState::new(
                InputCallbackId::Notes,
                "Notes",
                "Notes for the driver:",
                &notes,
            ));
        } else {
            app.ui.status = "The trip can no longer be edited".into();
        }
    } else if matches_shortcut(&k, &sc.tip_up) {
        app.session.adjust_bonus(app.cfg.fare.bonus_step);
    } else if matches_shortcut(&k, &sc.tip_down) {
        app.session.adjust_bonus(-app.cfg.fare.bonus_step);
    } else if matches_shortcut(&k, &sc.submit) {
        submit_or_cancel(app).await?;
    } else if matches_shortcut(&k, &sc.repeat_last) {
        repeat_last_trip(app).await?;
    } else if matches_shortcut(&k, &sc.history) {
        open_page(app, "/client/orders/history");
    } else if matches_shortcut(&k, &sc.driver_page) {
        open_page(app, "/driver/dashboard");
    } else if matches_shortcut(&k, &sc.setup) {
        // 現在の設定値を編集バッファへ戻してウィザードを開く。
        app.server_url = app.cfg.server.base_url.clone();
        app.init_data = app.cfg.server.init_data.clone();
        app.mapbox_token = app.cfg.mapbox.access_token.clone();
        app.wizard_state = WizardState::new();
        app.ui.error = None;
        app.ui.screen = Screen::InitialSetup;
    }

    Ok(false)
}

/// 地図を動かし、静止待ちを始める。
fn pan(app: &mut App, dx: i32, dy: i32) {
    app.map.pan(dx, dy);
    map_moved(app);
}

/// ズームも移動と同じく静止後に中心を住所へ変換する。
fn zoom(app: &mut App, delta: f64) {
    app.map.zoom_by(delta);
    map_moved(app);
}

fn map_moved(app: &mut App) {
    // 動かした時点で以前の逆ジオコーディング結果は古い。
    app.pending_geocode = None;
    if !app.session.is_locked() {
        app.last_pan = Some(Instant::now());
    }
}

fn open_search(app: &mut App, target: EndpointKind) {
    let mode = match target {
        EndpointKind::Start => SelectionMode::Start,
        EndpointKind::End => SelectionMode::End,
    };
    if !app.session.set_selection(mode) {
        app.ui.status = "The trip can no longer be edited".into();
        return;
    }
    let title = match target {
        EndpointKind::Start => "From",
        EndpointKind::End => "To",
    };
    app.ui.search = SearchState::open(target);
    app.input_box = Some(InputBoxState::new(
        InputCallbackId::SearchAddress(target),
        title,
        "Search address:",
        "",
    ));
}

/// Enterは注文の送信、乗車中ならキャンセル確認。
async fn submit_or_cancel(app: &mut App) -> Result<()> {
    if let Some(order_id) = app.session.cancellable_order().map(|o| o.id) {
        app.ui.dialog = Some(Dialog::ConfirmCancel { order_id });
        return Ok(());
    }
    match app.session.begin_submission() {
        Ok(body) => {
            app.ui.status = "Placing order...".into();
            app.send(WorkerCmd::SubmitOrder(body)).await?;
        }
        // 画面側で案内文を出す。
        Err(SubmitError::MissingPoints) => {}
        Err(e) => tracing::debug!("submit ignored: {e:?}"),
    }
    Ok(())
}

async fn repeat_last_trip(app: &mut App) -> Result<()> {
    if app.session.last_trip_chip().is_none() {
        return Ok(());
    }
    let effects = app.session.use_last_trip();
    if let Some(start) = &app.session.form().start {
        app.map.fly_to(start.at, PLACE_ZOOM);
    }
    app.last_pan = None;
    app.pending_geocode = None;
    run_effects(app, effects).await
}

/// 配車サービスのページをブラウザで開く。
fn open_page(app: &mut App, path: &str) {
    let url = page_url(&app.cfg.server.base_url, path, &app.cfg.server.init_data);
    match webbrowser::open(&url) {
        Ok(()) => tracing::info!(path, "opened page in browser"),
        Err(e) => {
            tracing::warn!(path, "failed to open browser: {e}");
            app.ui.error = Some(format!("Could not open the browser: {e}"));
        }
    }
}

/// ダイアログのキー処理。
async fn handle_dialog_key(app: &mut App, k: KeyEvent) -> Result<bool> {
    let sc = &app.shortcuts.dialog;

    if matches_shortcut(&k, &sc.confirm) {
        if let Some(Dialog::ConfirmCancel { order_id }) = app.ui.dialog.take() {
            app.ui.status = "Cancelling...".into();
            app.send(WorkerCmd::CancelOrder(order_id)).await?;
        }
    } else if matches_shortcut(&k, &sc.dismiss) {
        app.ui.dialog = None;
    }
    Ok(false)
}

/// 初期設定ウィザード画面のキー処理。
async fn handle_wizard_key(app: &mut App, k: KeyEvent) -> Result<bool> {
    let sc = &app.shortcuts.wizard;

    if matches_shortcut(&k, &sc.proceed) {
        let step = app.wizard_state.current_step;
        if let Some((callback_id, prompt)) = step.input() {
            // 入力ボックスで値を受け取る。
            let value = match callback_id {
                InputCallbackId::WizardServerUrl => app.server_url.clone(),
                InputCallbackId::WizardInitData => app.init_data.clone(),
                _ => app.mapbox_token.clone(),
            };
            app.input_box = Some(InputBoxState::new(callback_id, "Setup", prompt, &value));
        } else if step == WizardStep::Complete {
            finish_wizard(app).await?;
        } else {
            app.wizard_state.next_step();
        }
    } else if matches_shortcut(&k, &sc.skip) {
        app.wizard_state.next_step();
    }

    Ok(false)
}

/// 入力値を検証して保存し、予約画面へ戻る。
async fn finish_wizard(app: &mut App) -> Result<()> {
    let server_url = app.server_url.trim().trim_end_matches('/').to_string();
    if server_url.is_empty() || app.init_data.trim().is_empty() || app.mapbox_token.trim().is_empty()
    {
        app.ui.error = Some("Required fields are missing.".into());
        app.wizard_state.current_step = WizardStep::ServerUrl;
        return Ok(());
    }

    app.cfg.server.base_url = server_url;
    app.cfg.server.init_data = app.init_data.trim().to_string();
    app.cfg.mapbox.access_token = app.mapbox_token.trim().to_string();
    app.cfg.save(&app.cfg_path)?;
    tracing::info!("settings saved to {}", app.cfg_path.display());

    app.send(WorkerCmd::SaveSettings(app.cfg.clone())).await?;
    app.ui.error = None;
    app.ui.screen = Screen::Booking;
    app.ui.status = "Setup complete!".into();

    // 起動時に読み込めていなければここで読み込む。
    if app.session.phase() == Phase::NoOrder {
        app.send(WorkerCmd::Bootstrap).await?;
    }
    Ok(())
}

/// 入力ボックスのキー処理。
async fn handle_input_box_key(app: &mut App, k: KeyEvent) -> Result<bool> {
    let Some(input_state) = &mut app.input_box else {
        return Ok(false);
    };
    let sc = &app.shortcuts.input_box;

    // 入力ボックス中でもCtrl+Cで終了できるようにする。
    if is_ctrl_c(&k) {
        return Ok(true);
    }

    if matches_shortcut(&k, &sc.confirm) {
        let value = input_state.value.clone();
        let callback_id = input_state.callback_id;
        app.input_box = None;
        apply_input_callback(app, callback_id, value).await?;
        return Ok(false);
    } else if matches_shortcut(&k, &sc.cancel) {
        app.input_box = None;
        app.ui.search = SearchState::default();
        return Ok(false);
    } else if matches_shortcut(&k, &sc.next_item) {
        app.ui.search.select_next();
        return Ok(false);
    } else if matches_shortcut(&k, &sc.prev_item) {
        app.ui.search.select_prev();
        return Ok(false);
    } else if matches_shortcut(&k, &sc.backspace) {
        input_state.backspace();
    } else if matches_shortcut(&k, &sc.delete) {
        input_state.delete();
    } else if matches_shortcut(&k, &sc.left) {
        input_state.move_left();
        return Ok(false);
    } else if matches_shortcut(&k, &sc.right) {
        input_state.move_right();
        return Ok(false);
    } else if matches_shortcut(&k, &sc.home) {
        input_state.move_home();
        return Ok(false);
    } else if matches_shortcut(&k, &sc.end) {
        input_state.move_end();
        return Ok(false);
    } else if matches_shortcut(&k, &sc.clear_line) {
        input_state.clear_line();
    } else if let KeyCode::Char(c) = k.code
        && !k.modifiers.contains(KeyModifiers::CONTROL)
    {
        input_state.insert_char(c);
    } else {
        return Ok(false);
    }

    // 検索ボックスなら文字が変わるたびに候補を取り直す。
    if input_state.search_target().is_none() {
        return Ok(false);
    }
    let query = input_state.query().map(str::to_string);
    match query {
        Some(query) => {
            if app.ui.search.answered.as_deref() != Some(query.as_str()) {
                // 候補を捨てたら、以前の応答済み文字列も無効にする。
                app.ui.search.places.clear();
                app.ui.search.selected = 0;
                app.ui.search.answered = None;
                app.send(WorkerCmd::Search(query)).await?;
            }
        }
        None => {
            app.ui.search.places.clear();
            app.ui.search.selected = 0;
            app.ui.search.answered = None;
        }
    }
    Ok(false)
}

/// 入力ボックスのコールバックを適用する。
async fn apply_input_callback(
    app: &mut App,
    callback_id: InputCallbackId,
    value: String,
) -> Result<()> {
    match callback_id {
        InputCallbackId::SearchAddress(target) => {
            let search = std::mem::take(&mut app.ui.search);
            // 空のまま確定したら端点を外す。
            if value.trim().is_empty() {
                let effects = app.session.clear_endpoint(target);
                return run_effects(app, effects).await;
            }
            let Some(place) = search.highlighted().cloned() else {
                return Ok(());
            };
            // 候補の位置へ移動し、そのまま端点にする。
            app.map.fly_to(place.at, PLACE_ZOOM);
            app.last_pan = None;
            app.pending_geocode = None;
            let effects = app.session.set_endpoint(target, place.name, place.at);
            run_effects(app, effects).await?;
        }
        InputCallbackId::Notes => {
            app.session.set_notes(value.trim().to_string());
        }
        InputCallbackId::WizardServerUrl => {
            app.server_url = value;
            app.wizard_state.next_step();
        }
        InputCallbackId::WizardInitData => {
            app.init_data = value;
            app.wizard_state.next_step();
        }
        InputCallbackId::WizardMapboxToken => {
            app.mapbox_token = value;
            app.wizard_state.next_step();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        app::tests::{sent, test_app},
        order::{OrderStatus, tests::sample_order},
        route::LngLat,
        services::mapbox::Place,
        worker::WorkerEvent,
    };
    use pretty_assertions::assert_eq;

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::empty())
    }

    async fn type_text(app: &mut App, text: &str) {
        for c in text.chars() {
            handle_key(app, press(KeyCode::Char(c))).await.unwrap();
        }
    }

    async fn forming(app: &mut App) {
        super::super::handle_worker_event(app, WorkerEvent::CurrentOrder(None))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_submit_without_points_shows_hint_and_sends_nothing() {
        let (mut app, mut rx, _tx) = test_app();
        forming(&mut app).await;

        handle_key(&mut app, press(KeyCode::Enter)).await.unwrap();
        assert_eq!(
            app.session.message(),
            Some("⚠️ Please select both points on the map.")
        );
        assert!(sent(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_search_selection_sets_endpoint_and_flies_there() {
        let (mut app, mut rx, _tx) = test_app();
        forming(&mut app).await;

        handle_key(&mut app, press(KeyCode::Char('e'))).await.unwrap();
        type_text(&mut app, "ae").await;
        // 2文字では検索しない。
        assert!(sent(&mut rx).is_empty());
        type_text(&mut app, "r").await;
        assert!(matches!(&sent(&mut rx)[..], [WorkerCmd::Search(q)] if q == "aer"));

        let airport = LngLat::new(28.931, 46.935);
        app.ui.search.places = vec![
            Place {
                name: "Aeroportul Chisinau, Chisinau, Moldova".into(),
                at: airport,
            },
            Place {
                name: "Aerodrom, Balti, Moldova".into(),
                at: LngLat::new(27.9, 47.8),
            },
        ];
        app.ui.search.answered = Some("aer".into());
        handle_key(&mut app, press(KeyCode::Down)).await.unwrap();
        handle_key(&mut app, press(KeyCode::Up)).await.unwrap();
        handle_key(&mut app, press(KeyCode::Enter)).await.unwrap();

        assert!(app.input_box.is_none());
        let end = app.session.form().end.clone().unwrap();
        assert_eq!(end.address, "Aeroportul Chisinau, Chisinau, Moldova");
        assert_eq!(app.map.center, airport);
        assert_eq!(app.map.zoom, PLACE_ZOOM);
        assert!(app.last_pan.is_none());
    }

    #[tokio::test]
    async fn test_empty_search_clears_endpoint() {
        let (mut app, _rx, _tx) = test_app();
        forming(&mut app).await;
        app.session
            .set_endpoint(EndpointKind::Start, "A".into(), LngLat::new(28.5, 47.0));

        handle_key(&mut app, press(KeyCode::Char('s'))).await.unwrap();
        handle_key(&mut app, press(KeyCode::Enter)).await.unwrap();
        assert!(app.session.form().start.is_none());
    }

    #[tokio::test]
    async fn test_backspace_to_answered_query_searches_again() {
        let (mut app, mut rx, _tx) = test_app();
        forming(&mut app).await;
        let airport = Place {
            name: "Aeroportul Chisinau, Chisinau, Moldova".into(),
            at: LngLat::new(28.931, 46.935),
        };

        handle_key(&mut app, press(KeyCode::Char('e'))).await.unwrap();
        type_text(&mut app, "aer").await;
        super::super::handle_worker_event(
            &mut app,
            WorkerEvent::Suggestions {
                query: "aer".into(),
                places: vec![airport.clone()],
            },
        )
        .await
        .unwrap();
        sent(&mut rx);

        // 応答が来る前に1文字足して消す。
        type_text(&mut app, "x").await;
        handle_key(&mut app, press(KeyCode::Backspace)).await.unwrap();
        let cmds = sent(&mut rx);
        assert!(
            matches!(&cmds[..], [WorkerCmd::Search(a), WorkerCmd::Search(b)] if a == "aerx" && b == "aer"),
            "unexpected {cmds:?}"
        );
        assert!(!app.ui.search.is_empty_answer("aer"));

        // 古い問い合わせの応答は捨て、現在の問い合わせの応答を使う。
        super::super::handle_worker_event(
            &mut app,
            WorkerEvent::Suggestions {
                query: "aerx".into(),
                places: vec![],
            },
        )
        .await
        .unwrap();
        assert!(!app.ui.search.is_empty_answer("aer"));
        super::super::handle_worker_event(
            &mut app,
            WorkerEvent::Suggestions {
                query: "aer".into(),
                places: vec![airport],
            },
        )
        .await
        .unwrap();
        handle_key(&mut app, press(KeyCode::Enter)).await.unwrap();
        assert_eq!(
            app.session.form().end.as_ref().map(|e| e.address.as_str()),
            Some("Aeroportul Chisinau, Chisinau, Moldova")
        );
    }

    #[tokio::test]
    async fn test_zoom_schedules_reverse_geocode() {
        let (mut app, mut rx, _tx) = test_app();
        forming(&mut app).await;

        handle_key(&mut app, press(KeyCode::Char('+'))).await.unwrap();
        assert!(app.last_pan.is_some());
        app.last_pan = Some(Instant::now() - super::super::SETTLE_DELAY);
        super::super::settle_map(&mut app).await.unwrap();
        assert!(matches!(
            sent(&mut rx)[..],
            [WorkerCmd::ReverseGeocode {
                target: EndpointKind::Start,
                ..
            }]
        ));

        handle_key(&mut app, press(KeyCode::Char('-'))).await.unwrap();
        assert!(app.last_pan.is_some());
    }

    #[tokio::test]
    async fn test_tip_keys_step_and_never_go_negative() {
        let (mut app, _rx, _tx) = test_app();
        forming(&mut app).await;

        handle_key(&mut app, press(KeyCode::Char(']'))).await.unwrap();
        handle_key(&mut app, press(KeyCode::Char(']'))).await.unwrap();
        assert_eq!(app.session.form().bonus, 10);
        for _ in 0..3 {
            handle_key(&mut app, press(KeyCode::Char('['))).await.unwrap();
        }
        assert_eq!(app.session.form().bonus, 0);
    }

    #[tokio::test]
    async fn test_enter_on_active_order_asks_before_cancelling() {
        let (mut app, mut rx, _tx) = test_app();
        super::super::handle_worker_event(
            &mut app,
            WorkerEvent::CurrentOrder(Some(sample_order(40, OrderStatus::Pending))),
        )
        .await
        .unwrap();
        sent(&mut rx);

        handle_key(&mut app, press(KeyCode::Enter)).await.unwrap();
        assert_eq!(app.ui.dialog, Some(Dialog::ConfirmCancel { order_id: 40 }));
        assert!(sent(&mut rx).is_empty());

        handle_key(&mut app, press(KeyCode::Char('y'))).await.unwrap();
        assert!(app.ui.dialog.is_none());
        assert!(matches!(sent(&mut rx)[..], [WorkerCmd::CancelOrder(40)]));
    }

    #[tokio::test]
    async fn test_dismissed_cancel_keeps_order() {
        let (mut app, mut rx, _tx) = test_app();
        super::super::handle_worker_event(
            &mut app,
            WorkerEvent::CurrentOrder(Some(sample_order(41, OrderStatus::Accepted))),
        )
        .await
        .unwrap();
        sent(&mut rx);

        handle_key(&mut app, press(KeyCode::Enter)).await.unwrap();
        handle_key(&mut app, press(KeyCode::Esc)).await.unwrap();
        assert!(app.ui.dialog.is_none());
        assert!(sent(&mut rx).is_empty());
        assert!(app.session.is_locked());
    }

    #[tokio::test]
    async fn test_locked_form_ignores_edits_and_pans_without_geocoding() {
        let (mut app, _rx, _tx) = test_app();
        super::super::handle_worker_event(
            &mut app,
            WorkerEvent::CurrentOrder(Some(sample_order(42, OrderStatus::InProgress))),
        )
        .await
        .unwrap();

        handle_key(&mut app, press(KeyCode::Char('s'))).await.unwrap();
        assert!(app.input_box.is_none());
        handle_key(&mut app, press(KeyCode::Char(']'))).await.unwrap();
        assert_eq!(app.session.form().bonus, 10);
        handle_key(&mut app, press(KeyCode::Left)).await.unwrap();
        assert!(app.last_pan.is_none());
    }

    #[tokio::test]
    async fn test_notes_box_writes_form_notes() {
        let (mut app, _rx, _tx) = test_app();
        forming(&mut app).await;

        handle_key(&mut app, press(KeyCode::Char('n'))).await.unwrap();
        assert_eq!(app.session.selection(), SelectionMode::Notes);
        type_text(&mut app, "gate B ").await;
        handle_key(&mut app, press(KeyCode::Enter)).await.unwrap();
        assert_eq!(app.session.form().notes, "gate B");
    }

    #[tokio::test]
    async fn test_wizard_requires_all_values_then_saves() {
        let dir = std::env::temp_dir().join(format!("ride_tui_wizard_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let (mut app, mut rx, _tx) = test_app();
        app.cfg_path = dir.join("config.toml");
        app.init_data.clear();
        app.ui.screen = Screen::InitialSetup;
        app.wizard_state.current_step = WizardStep::Complete;

        handle_key(&mut app, press(KeyCode::Enter)).await.unwrap();
        assert_eq!(app.ui.error.as_deref(), Some("Required fields are missing."));
        assert_eq!(app.wizard_state.current_step, WizardStep::ServerUrl);

        // URLはそのまま、トークンだけ入力する。
        handle_key(&mut app, press(KeyCode::Esc)).await.unwrap();
        handle_key(&mut app, press(KeyCode::Enter)).await.unwrap();
        type_text(&mut app, "tok").await;
        handle_key(&mut app, press(KeyCode::Enter)).await.unwrap();
        assert_eq!(app.wizard_state.current_step, WizardStep::MapboxToken);
        handle_key(&mut app, press(KeyCode::Esc)).await.unwrap();
        handle_key(&mut app, press(KeyCode::Enter)).await.unwrap();

        assert_eq!(app.ui.screen, Screen::Booking);
        assert_eq!(app.cfg.server.init_data, "tok");
        assert!(app.cfg_path.exists());
        let cmds = sent(&mut rx);
        assert!(matches!(cmds[0], WorkerCmd::SaveSettings(_)));
        assert!(matches!(cmds[1], WorkerCmd::Bootstrap));
        std::fs::remove_dir_all(&dir).ok();
    }
}
