//! 初期設定ウィザードのステート管理。

use crate::input::InputCallbackId;

/// ウィザードの各ステップ
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WizardStep {
    Welcome,
    /// 配車サーバーのURL
    ServerUrl,
    /// 本人確認トークン（initData）
    IdentityToken,
    /// 地図APIのアクセストークン
    MapboxToken,
    Complete,
}

impl WizardStep {
    const ORDER: [WizardStep; 5] = [
        WizardStep::Welcome,
        WizardStep::ServerUrl,
        WizardStep::IdentityToken,
        WizardStep::MapboxToken,
        WizardStep::Complete,
    ];

    /// 入力ボックスで値を受け取るステップなら、その種別とプロンプト。
    pub fn input(self) -> Option<(InputCallbackId, &'static str)> {
        match self {
            WizardStep::ServerUrl => Some((InputCallbackId::WizardServerUrl, "Server URL:")),
            WizardStep::IdentityToken => {
                Some((InputCallbackId::WizardInitData, "Identity token (initData):"))
            }
            WizardStep::MapboxToken => {
                Some((InputCallbackId::WizardMapboxToken, "Mapbox access token:"))
            }
            WizardStep::Welcome | WizardStep::Complete => None,
        }
    }
}

/// ウィザードの状態管理
#[derive(Clone, Debug)]
pub struct WizardState {
    pub current_step: WizardStep,
}

impl WizardState {
    pub fn new() -> Self {
        Self {
            current_step: WizardStep::Welcome,
        }
    }

    pub fn total_steps(&self) -> usize {
        WizardStep::ORDER.len()
    }

    /// 次のステップへ進む（完了で止まる）
    pub fn next_step(&mut self) {
        let i = self.step_number();
        if let Some(next) = WizardStep::ORDER.get(i) {
            self.current_step = *next;
        }
    }

    /// 現在のステップの説明文
    pub fn prompt(&self) -> &'static str {
        match self.current_step {
            WizardStep::Welcome => {
                "Welcome to ride_tui!\n\nThis wizard sets up the connection to the ride service.\nPress Enter to begin."
            }
            WizardStep::ServerUrl => {
                "Ride service\n\nEnter the base URL of the order service (for example http://localhost:8080).\nPress Enter to open the input box."
            }
            WizardStep::IdentityToken => {
                "Identity\n\nPaste the identity token issued by the chat host (initData).\nIt is sent with every order request.\nPress Enter to open the input box."
            }
            WizardStep::MapboxToken => {
                "Map provider\n\nEnter your Mapbox public access token (pk.…).\nIt is used for addresses, search and routes.\nPress Enter to open the input box."
            }
            WizardStep::Complete => {
                "All set!\n\nPress Enter to save the settings and open the map."
            }
        }
    }

    /// 現在のステップ番号（1始まり）
    pub fn step_number(&self) -> usize {
        WizardStep::ORDER
            .iter()
            .position(|s| *s == self.current_step)
            .map_or(1, |i| i + 1)
    }
}

impl Default for WizardState {
    fn default() -> Self {
        Self::new()
    }
}
