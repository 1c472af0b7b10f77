//! 画面種別、ダイアログ、描画側と共有するUI状態。

use crate::{services::mapbox::Place, session::EndpointKind};

/// TUIで現在表示中の画面。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Screen {
    /// 地図と注文フォーム。
    Booking,
    /// 初期設定ウィザード画面。
    InitialSetup,
}

/// 画面中央に重ねるモーダル。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Dialog {
    /// OKだけの通知。
    Alert(String),
    /// 乗車キャンセルの確認。
    ConfirmCancel { order_id: i64 },
}

/// 住所検索ポップアップの候補一覧。
#[derive(Clone, Debug, Default)]
pub struct SearchState {
    /// 候補を書き込む端点。
    pub target: Option<EndpointKind>,
    pub places: Vec<Place>,
    pub selected: usize,
    /// 最後に結果を受け取った問い合わせ文字列。
    pub answered: Option<String>,
}

impl SearchState {
    pub fn open(target: EndpointKind) -> Self {
        Self {
            target: Some(target),
            ..Self::default()
        }
    }

    pub fn highlighted(&self) -> Option<&Place> {
        self.places.get(self.selected)
    }

    pub fn select_next(&mut self) {
        if self.selected + 1 < self.places.len() {
            self.selected += 1;
        }
    }

    pub fn select_prev(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }

    /// 結果なしを表示すべきか。
    pub fn is_empty_answer(&self, query: &str) -> bool {
        self.places.is_empty() && self.answered.as_deref() == Some(query)
    }
}

/// 描画側と共有するUI状態。
#[derive(Clone, Debug)]
pub struct UiState {
    /// 現在の画面。
    pub screen: Screen,
    /// 表示中のダイアログ。
    pub dialog: Option<Dialog>,
    /// 住所検索の候補（検索中のみ意味を持つ）。
    pub search: SearchState,
    /// 右下に表示するログ。
    pub log: Vec<String>,
    /// 画面下部のステータス文言。
    pub status: String,
    /// エラーメッセージ（強調表示用）。
    pub error: Option<String>,
    /// 端末がフォーカスを持っているか。
    pub focused: bool,
}

impl UiState {
    pub fn new(screen: Screen) -> Self {
        Self {
            screen,
            dialog: None,
            search: SearchState::default(),
            log: vec![],
            status: "Ready".into(),
            error: None,
            focused: true,
        }
    }

    /// ログを追加し、古い行を捨てる。
    pub fn push_log(&mut self, line: String) {
        self.log.push(line);
        if self.log.len() > 50 {
            self.log.remove(0);
        }
    }
}
