//! TUI描画関連の関数。

use ratatui::{
    Frame,
    prelude::*,
    symbols,
    widgets::{
        Block, Borders, Clear, Paragraph, Wrap,
        canvas::{Canvas, Line as CanvasLine, Map, MapResolution},
    },
};
use std::time::Duration;

use crate::{
    events::{Dialog, Screen},
    input::{self, centered_popup},
    layout::{self, BookingLayout},
    lifecycle::Phase,
    route::{Marker, MarkerKind},
    session::{EndpointKind, SelectionMode},
    shortcuts::{Shortcuts, format_keys},
};

use super::App;

/// 配車待ちピンの点滅周期。
const PULSE: Duration = Duration::from_millis(500);

/// 画面全体のレイアウトを描画する。
pub fn draw(f: &mut Frame, app: &App) {
    // ウィザード画面は専用描画で処理する。
    if app.ui.screen == Screen::InitialSetup {
        draw_wizard_screen(f, app);
        if let Some(input_state) = &app.input_box {
            input::render_input_box(f, input_state, None);
        }
        return;
    }

    let l = layout::create_booking_layout(f.area());
    draw_map(f, app, &l);
    draw_form(f, app, l.form);

    let help_bar = Paragraph::new(booking_help_text(&app.shortcuts))
        .block(Block::default().borders(Borders::ALL).title("HELP"))
        .wrap(Wrap { trim: true });
    f.render_widget(help_bar, l.help_bar);
    f.render_widget(build_status_bar(app), l.status_bar);

    if let Some(dialog) = &app.ui.dialog {
        draw_dialog(f, dialog, &app.shortcuts);
    }
    // 検索中は候補一覧付きで重ねる。
    if let Some(input_state) = &app.input_box {
        let search = input_state
            .search_target()
            .filter(|t| app.ui.search.target == Some(*t))
            .map(|_| &app.ui.search);
        input::render_input_box(f, input_state, search);
    }
}

/// 地図キャンバス（海岸線、経路、マーカー、中心の照準）。
fn draw_map(f: &mut Frame, app: &App, l: &BookingLayout) {
    let cols = l.map.width.saturating_sub(2);
    let rows = l.map.height.saturating_sub(2);
    let view = app.map.viewport(cols, rows);

    let markers = visible_markers(app);
    let locked = app.session.is_locked();
    let pending = app.session.phase() == Phase::Pending;
    let pulse_on = (app.started.elapsed().as_millis() / PULSE.as_millis()) % 2 == 0;
    let center = app.map.center;
    let crosshair = match app.session.selection() {
        SelectionMode::Start => Color::Green,
        SelectionMode::End | SelectionMode::Notes => Color::Red,
    };

    let title = format!(
        "MAP  {:.5}, {:.5}  z{:.0}",
        center.lat, center.lng, app.map.zoom
    );
    let canvas = Canvas::default()
        .block(Block::default().borders(Borders::ALL).title(title))
        .marker(symbols::Marker::Braille)
        .x_bounds([view.min.lng, view.max.lng])
        .y_bounds([view.min.lat, view.max.lat])
        .paint(|ctx| {
            ctx.draw(&Map {
                color: Color::DarkGray,
                resolution: MapResolution::High,
            });
            ctx.layer();

            if let Some(route) = app.overlay.layer() {
                for w in route.path.windows(2) {
                    ctx.draw(&CanvasLine {
                        x1: w[0].lng,
                        y1: w[0].lat,
                        x2: w[1].lng,
                        y2: w[1].lat,
                        color: Color::Blue,
                    });
                }
                ctx.layer();
            }

            for m in &markers {
                let color = match m.kind {
                    MarkerKind::Start => Color::Green,
                    MarkerKind::End => Color::Red,
                };
                let label = m.label();
                let text = if locked {
                    format!("{label} {}", m.popup())
                } else {
                    label.to_string()
                };
                ctx.print(m.at.lng, m.at.lat, text.fg(color).bold());
            }

            if pending {
                // 運転手を探している間は中心のピンを点滅させる。
                let pin = if pulse_on { "◉" } else { "○" };
                ctx.print(center.lng, center.lat, pin.fg(Color::Yellow).bold());
            } else if !locked {
                ctx.print(center.lng, center.lat, "✚".fg(crosshair).bold());
            }
        });
    f.render_widget(canvas, l.map);
}

/// 表示するマーカー。乗車中は経路のもの、入力中はフォームの端点。
fn visible_markers(app: &App) -> Vec<Marker> {
    if !app.overlay.is_empty() {
        return app.overlay.markers().cloned().collect();
    }
    let form = app.session.form();
    [
        (MarkerKind::Start, &form.start),
        (MarkerKind::End, &form.end),
    ]
    .into_iter()
    .filter_map(|(kind, ep)| ep.as_ref().map(|e| Marker { kind, at: e.at }))
    .collect()
}

/// 地図下部に重ねる注文フォーム。
fn draw_form(f: &mut Frame, app: &App, area: Rect) {
    f.render_widget(Clear, area);
    let lines = if app.session.is_locked() {
        active_lines(app)
    } else {
        forming_lines(app)
    };
    let title = match app.session.cancellable_order() {
        Some(order) => format!("ORDER #{}", order.id),
        None => "NEW RIDE".to_string(),
    };
    let form = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title(title))
        .wrap(Wrap { trim: true });
    f.render_widget(form, area);
}

fn address_line<'a>(label: &'a str, value: Option<&'a str>, hint: &'a str, focused: bool) -> Line<'a> {
    let label_style = if focused {
        Style::default()
            .bg(Color::Rgb(255, 140, 0))
            .fg(Color::Black)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default().add_modifier(Modifier::BOLD)
    };
    let value = match value {
        Some(v) => Span::raw(v),
        None => Span::styled(hint, Style::default().fg(Color::Gray)),
    };
    Line::from(vec![Span::styled(label, label_style), Span::raw(" "), value])
}

fn forming_lines(app: &App) -> Vec<Line<'_>> {
    let form = app.session.form();
    let selection = app.session.selection();
    let sc = &app.shortcuts.booking;

    let mut lines = vec![
        address_line(
            "From:",
            form.start.as_ref().map(|e| e.address.as_str()),
            "move the map to pick the pickup point",
            selection.endpoint() == EndpointKind::Start,
        ),
        address_line(
            "To:  ",
            form.end.as_ref().map(|e| e.address.as_str()),
            "move the map to pick the destination",
            selection == SelectionMode::End,
        ),
        address_line(
            "Notes:",
            (!form.notes.is_empty()).then_some(form.notes.as_str()),
            "none",
            selection == SelectionMode::Notes,
        ),
        Line::from(format!(
            "Tip: +{}  ({}/{})",
            form.bonus,
            format_keys(&sc.tip_down),
            format_keys(&sc.tip_up)
        )),
        Line::from(app.session.price_line()).bold(),
    ];

    if let Some(order) = app.session.last_trip_chip() {
        lines.push(
            Line::from(format!(
                "↻ Repeat: {} ({})",
                order.trip_label(),
                format_keys(&sc.repeat_last)
            ))
            .fg(Color::Cyan),
        );
    }
    if let Some(msg) = app.session.message() {
        lines.push(Line::from(msg.to_string()).fg(Color::Yellow));
    }
    lines.push(if app.session.is_submitting() {
        Line::from("Processing...").fg(Color::Gray)
    } else {
        Line::from(format!("[{}] Book ride", format_keys(&sc.submit))).bold()
    });
    lines
}

fn active_lines(app: &App) -> Vec<Line<'_>> {
    let form = app.session.form();
    let mut lines = vec![
        address_line(
            "From:",
            form.start.as_ref().map(|e| e.address.as_str()),
            "-",
            false,
        ),
        address_line(
            "To:  ",
            form.end.as_ref().map(|e| e.address.as_str()),
            "-",
            false,
        ),
    ];
    if !form.notes.is_empty() {
        lines.push(Line::from(format!("Notes: {}", form.notes)));
    }
    if let Some(status) = app.session.active_status() {
        lines.push(Line::from(status.headline).bold().fg(Color::Cyan));
        if let Some(driver) = status.driver {
            lines.push(Line::from(driver));
        }
        lines.push(Line::from(status.price).bold());
    }
    lines.push(
        Line::from(format!(
            "[{}] Cancel Trip",
            format_keys(&app.shortcuts.booking.submit)
        ))
        .fg(Color::Red),
    );
    lines
}

fn draw_dialog(f: &mut Frame, dialog: &Dialog, shortcuts: &Shortcuts) {
    let confirm = format_keys(&shortcuts.dialog.confirm);
    let dismiss = format_keys(&shortcuts.dialog.dismiss);
    let (title, body, color) = match dialog {
        Dialog::Alert(text) => (
            "NOTICE",
            format!("{text}\n\n[{dismiss}] close"),
            Color::Yellow,
        ),
        Dialog::ConfirmCancel { order_id } => (
            "CANCEL",
            format!(
                "Cancel trip #{order_id}?\n\n[{confirm}] yes, cancel  [{dismiss}] keep the ride"
            ),
            Color::Red,
        ),
    };
    let height = body.lines().count() as u16 + 4;
    let area = centered_popup(f.area(), 50, height);
    f.render_widget(Clear, area);
    let p = Paragraph::new(body)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(title)
                .border_style(Style::default().fg(color)),
        )
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true });
    f.render_widget(p, area);
}

/// ステータスバーを構築する。
fn build_status_bar(app: &App) -> Paragraph<'static> {
    let phase = format!("{:?}", app.session.phase());
    let focus = if app.ui.focused { "" } else { " | paused" };
    let last_log = app.ui.log.last().map(|s| format!(" | {s}")).unwrap_or_default();

    let status_text = if let Some(err) = &app.ui.error {
        format!("[{phase}] ERROR: {err}")
    } else {
        format!("[{phase}] {}{focus}{last_log}", app.ui.status)
    };

    let mut status_bar = Paragraph::new(status_text)
        .block(Block::default().borders(Borders::ALL).title("STATUS"))
        .wrap(Wrap { trim: true });
    // エラー時は赤色で強調表示する。
    if app.ui.error.is_some() {
        status_bar = status_bar.style(Style::default().fg(Color::Red));
    }
    status_bar
}

/// ウィザード画面を描画する。
fn draw_wizard_screen(f: &mut Frame, app: &App) {
    let outer_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage(20), // 上部マージン
            Constraint::Min(10),        // 本文領域
            Constraint::Percentage(20), // 下部マージン
        ])
        .split(f.area());

    let sc = &app.shortcuts.wizard;
    let content_text = format!(
        "=== Initial Setup Wizard ===\n\nStep {}/{}\n\n{}\n\n{}: proceed | {}: skip step",
        app.wizard_state.step_number(),
        app.wizard_state.total_steps(),
        app.wizard_state.prompt(),
        format_keys(&sc.proceed),
        format_keys(&sc.skip),
    );
    let content = Paragraph::new(content_text)
        .block(Block::default().borders(Borders::ALL).title("Setup"))
        .alignment(Alignment::Left)
        .wrap(Wrap { trim: true });
    f.render_widget(content, outer_layout[1]);

    // エラーがあれば下部に表示する。
    if let Some(err) = &app.ui.error {
        let error_layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(0), Constraint::Length(3)])
            .split(f.area());
        let error_text = Paragraph::new(format!("ERROR: {}", err))
            .block(Block::default().borders(Borders::ALL).title("Error"))
            .style(Style::default().fg(Color::Red))
            .wrap(Wrap { trim: true });
        f.render_widget(error_text, error_layout[1]);
    }
}

/// 予約画面のヘルプ文字列。
fn booking_help_text(shortcuts: &Shortcuts) -> String {
    let b = &shortcuts.booking;
    format!(
        "{}: move | {}/{}: zoom | {}: from | {}: to | {}: notes | {}/{}: tip | {}: book/cancel | {}: repeat | {}: history | {}: driver | {}: setup | {}: quit",
        [&b.pan_up, &b.pan_down, &b.pan_left, &b.pan_right]
            .iter()
            .filter_map(|k| k.first().cloned())
            .collect::<Vec<_>>()
            .join(""),
        format_keys(&b.zoom_in),
        format_keys(&b.zoom_out),
        format_keys(&b.search_start),
        format_keys(&b.search_end),
        format_keys(&b.notes),
        format_keys(&b.tip_down),
        format_keys(&b.tip_up),
        format_keys(&b.submit),
        format_keys(&b.repeat_last),
        format_keys(&b.history),
        format_keys(&b.driver_page),
        format_keys(&b.setup),
        format_keys(&b.quit),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        app::tests::test_app,
        order::{Driver, OrderStatus, tests::sample_order},
        worker::WorkerEvent,
    };
    use ratatui::{Terminal, backend::TestBackend};

    fn screen_text(app: &App) -> String {
        let mut terminal = Terminal::new(TestBackend::new(120, 40)).unwrap();
        terminal.draw(|f| draw(f, app)).unwrap();
        let buf = terminal.backend().buffer().clone();
        buf.content().iter().map(|c| c.symbol()).collect()
    }

    #[tokio::test]
    async fn test_forming_form_shows_price_and_book_button() {
        let (mut app, _rx, _tx) = test_app();
        super::super::handle_worker_event(&mut app, WorkerEvent::CurrentOrder(None))
            .await
            .unwrap();
        let text = screen_text(&app);
        assert!(text.contains("NEW RIDE"));
        assert!(text.contains("Price: ~50 (+0 tip) = ~50 €"));
        assert!(text.contains("[Enter] Book ride"));
        assert!(text.contains("✚"));
    }

    #[tokio::test]
    async fn test_accepted_order_shows_driver_and_cancel() {
        let (mut app, _rx, _tx) = test_app();
        let mut order = sample_order(50, OrderStatus::Accepted);
        order.driver = Some(Driver {
            full_name: Some("Ion".into()),
            car_model: "Skoda Octavia".into(),
            car_color: "White".into(),
            license_plate: "CHI 123".into(),
        });
        super::super::handle_worker_event(&mut app, WorkerEvent::CurrentOrder(Some(order)))
            .await
            .unwrap();
        let text = screen_text(&app);
        assert!(text.contains("ORDER #50"));
        assert!(text.contains("Arrival time ~10 min"));
        assert!(text.contains("Skoda Octavia"));
        assert!(text.contains("Cancel Trip"));
        assert!(!text.contains("✚"));
    }

    #[test]
    fn test_wizard_screen_shows_step() {
        let (mut app, _rx, _tx) = test_app();
        app.ui.screen = Screen::InitialSetup;
        let text = screen_text(&app);
        assert!(text.contains("Step 1/5"));
    }
}
