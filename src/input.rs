//! 一行入力ポップアップ（住所検索・メモ・ウィザード）。

use ratatui::{
    layout::Alignment,
    prelude::*,
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph},
};

use crate::{events::SearchState, session::EndpointKind};

/// 検索を始める最小文字数。
pub const MIN_QUERY_CHARS: usize = 3;

/// 入力完了時の反映先。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputCallbackId {
    /// 住所検索（候補の選択で端点を更新）。
    SearchAddress(EndpointKind),
    /// 運転手へのメモ。
    Notes,
    WizardServerUrl,
    WizardInitData,
    WizardMapboxToken,
}

/// 入力ボックスの状態。
#[derive(Clone, Debug)]
pub struct InputBoxState {
    pub title: String,
    pub prompt: String,
    pub value: String,
    /// カーソル位置（文字単位）。
    pub cursor: usize,
    pub callback_id: InputCallbackId,
}

impl InputBoxState {
    /// 既存の値を入れ、カーソルを末尾に置いて開く。
    pub fn new(callback_id: InputCallbackId, title: &str, prompt: &str, value: &str) -> Self {
        Self {
            title: title.into(),
            prompt: prompt.into(),
            value: value.into(),
            cursor: value.chars().count(),
            callback_id,
        }
    }

    /// 住所検索なら対象の端点。
    pub fn search_target(&self) -> Option<EndpointKind> {
        match self.callback_id {
            InputCallbackId::SearchAddress(target) => Some(target),
            _ => None,
        }
    }

    /// 検索に使う文字列。短すぎる場合はNone。
    pub fn query(&self) -> Option<&str> {
        let q = self.value.trim();
        (q.chars().count() >= MIN_QUERY_CHARS).then_some(q)
    }

    fn byte_at(&self, cursor: usize) -> usize {
        self.value
            .char_indices()
            .nth(cursor)
            .map_or(self.value.len(), |(i, _)| i)
    }

    pub fn insert_char(&mut self, c: char) {
        let at = self.byte_at(self.cursor);
        self.value.insert(at, c);
        self.cursor += 1;
    }

    /// カーソル前の文字を削除する。
    pub fn backspace(&mut self) {
        if self.cursor == 0 {
            return;
        }
        self.cursor -= 1;
        let at = self.byte_at(self.cursor);
        self.value.remove(at);
    }

    /// カーソル位置の文字を削除する。
    pub fn delete(&mut self) {
        if self.cursor < self.value.chars().count() {
            let at = self.byte_at(self.cursor);
            self.value.remove(at);
        }
    }

    pub fn move_left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn move_right(&mut self) {
        self.cursor = (self.cursor + 1).min(self.value.chars().count());
    }

    pub fn move_home(&mut self) {
        self.cursor = 0;
    }

    pub fn move_end(&mut self) {
        self.cursor = self.value.chars().count();
    }

    pub fn clear_line(&mut self) {
        self.value.clear();
        self.cursor = 0;
    }

    /// 表示幅に収まる範囲とカーソル記号を組み立てる。
    fn visible_with_cursor(&self, width: usize) -> String {
        let offset = self.cursor.saturating_sub(width.saturating_sub(2));
        let chars: Vec<char> = self.value.chars().skip(offset).take(width).collect();
        let at = (self.cursor - offset).min(chars.len());
        let before: String = chars[..at].iter().collect();
        let after: String = chars[at..].iter().collect();
        format!("{before}|{after}")
    }
}

/// 入力ボックスをポップアップとして描画する。検索中は候補一覧も出す。
pub fn render_input_box(f: &mut Frame, state: &InputBoxState, search: Option<&SearchState>) {
    let list_rows = search.map_or(0, |s| s.places.len().clamp(1, 5) as u16 + 1);
    let popup_area = centered_popup(f.area(), 70, 7 + list_rows);
    f.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .title(state.title.as_str())
        .style(Style::default().bg(Color::DarkGray));
    f.render_widget(block, popup_area);

    let inner = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(1), // プロンプト
            Constraint::Length(1), // 入力欄
            Constraint::Length(list_rows),
            Constraint::Length(1), // 空行
            Constraint::Length(1), // ヘルプ
        ])
        .split(popup_area);

    let prompt = Paragraph::new(state.prompt.as_str()).style(
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    );
    f.render_widget(prompt, inner[0]);

    let input = Paragraph::new(state.visible_with_cursor(inner[1].width as usize))
        .style(Style::default().fg(Color::Green));
    f.render_widget(input, inner[1]);

    let help = if let Some(search) = search {
        render_suggestions(f, inner[2], state, search);
        "Enter=choose | ↑/↓=move | ESC=close | Ctrl+U=clear"
    } else {
        "Enter=confirm | ESC=cancel | Ctrl+U=clear"
    };
    let help = Paragraph::new(help)
        .style(Style::default().fg(Color::Gray))
        .alignment(Alignment::Center);
    f.render_widget(help, inner[4]);
}

fn render_suggestions(f: &mut Frame, area: Rect, state: &InputBoxState, search: &SearchState) {
    let query = state.value.trim();
    if search.places.is_empty() {
        let text = if search.is_empty_answer(query) {
            "No results"
        } else if state.query().is_none() {
            "Type at least 3 characters"
        } else {
            "Searching..."
        };
        f.render_widget(
            Paragraph::new(text).style(Style::default().fg(Color::Gray)),
            area,
        );
        return;
    }

    let items: Vec<ListItem> = search
        .places
        .iter()
        .take(5)
        .enumerate()
        .map(|(i, p)| {
            let style = if i == search.selected {
                Style::default()
                    .bg(Color::Rgb(255, 140, 0))
                    .fg(Color::Black)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            ListItem::new(p.name.as_str()).style(style)
        })
        .collect();
    f.render_widget(List::new(items), area);
}

/// 中央配置のポップアップ領域を計算する。
pub fn centered_popup(area: Rect, width_percent: u16, height: u16) -> Rect {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(area.height.saturating_sub(height) / 2),
            Constraint::Length(height),
            Constraint::Min(0),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - width_percent) / 2),
            Constraint::Percentage(width_percent),
            Constraint::Percentage((100 - width_percent) / 2),
        ])
        .split(rows[1])[1]
}
