//! ショートカット設定の管理。

use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// ショートカット設定の全体。欠けたセクションは既定値で補う。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Shortcuts {
    pub booking: BookingShortcuts,
    pub dialog: DialogShortcuts,
    pub wizard: WizardShortcuts,
    pub input_box: InputBoxShortcuts,
}

/// 地図と注文フォームのショートカット。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingShortcuts {
    pub quit: Vec<String>,
    pub pan_up: Vec<String>,
    pub pan_down: Vec<String>,
    pub pan_left: Vec<String>,
    pub pan_right: Vec<String>,
    pub zoom_in: Vec<String>,
    pub zoom_out: Vec<String>,
    /// 出発地を選択して検索を開く。
    pub search_start: Vec<String>,
    /// 目的地を選択して検索を開く。
    pub search_end: Vec<String>,
    pub notes: Vec<String>,
    pub tip_up: Vec<String>,
    pub tip_down: Vec<String>,
    /// 注文の送信、または乗車中のキャンセル。
    pub submit: Vec<String>,
    pub repeat_last: Vec<String>,
    pub history: Vec<String>,
    pub driver_page: Vec<String>,
    pub setup: Vec<String>,
}

/// ダイアログのショートカット。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogShortcuts {
    pub confirm: Vec<String>,
    pub dismiss: Vec<String>,
}

/// ウィザード画面のショートカット。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WizardShortcuts {
    pub proceed: Vec<String>,
    pub skip: Vec<String>,
}

/// InputBoxのショートカット。文字入力と衝突しないキーだけを使う。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputBoxShortcuts {
    pub confirm: Vec<String>,
    pub cancel: Vec<String>,
    pub backspace: Vec<String>,
    pub delete: Vec<String>,
    pub left: Vec<String>,
    pub right: Vec<String>,
    pub home: Vec<String>,
    pub end: Vec<String>,
    pub clear_line: Vec<String>,
    /// 検索候補の移動。
    pub next_item: Vec<String>,
    pub prev_item: Vec<String>,
}

impl Shortcuts {
    /// TOMLから読み込み、無ければデフォルトを返す。
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}

fn keys(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for Shortcuts {
    fn default() -> Self {
        Self {
            booking: BookingShortcuts {
                quit: keys(&["q"]),
                pan_up: keys(&["Up", "k"]),
                pan_down: keys(&["Down", "j"]),
                pan_left: keys(&["Left", "h"]),
                pan_right: keys(&["Right", "l"]),
                zoom_in: keys(&["+", "="]),
                zoom_out: keys(&["-"]),
                search_start: keys(&["s"]),
                search_end: keys(&["e"]),
                notes: keys(&["n"]),
                tip_up: keys(&["]"]),
                tip_down: keys(&["["]),
                submit: keys(&["Enter"]),
                repeat_last: keys(&["r"]),
                history: keys(&["o"]),
                driver_page: keys(&["d"]),
                setup: keys(&["w"]),
            },
            dialog: DialogShortcuts {
                confirm: keys(&["Enter", "y"]),
                dismiss: keys(&["Esc", "n"]),
            },
            wizard: WizardShortcuts {
                proceed: keys(&["Enter"]),
                skip: keys(&["Esc"]),
            },
            input_box: InputBoxShortcuts {
                confirm: keys(&["Enter"]),
                cancel: keys(&["Esc"]),
                backspace: keys(&["Backspace"]),
                delete: keys(&["Delete"]),
                left: keys(&["Left"]),
                right: keys(&["Right"]),
                home: keys(&["Home"]),
                end: keys(&["End"]),
                clear_line: keys(&["Ctrl+u"]),
                next_item: keys(&["Down", "Tab"]),
                prev_item: keys(&["Up"]),
            },
        }
    }
}

/// KeyEventがいずれかのショートカット文字列と一致するか判定する。
pub fn matches_shortcut(key: &KeyEvent, shortcuts: &[String]) -> bool {
    shortcuts.iter().any(|s| matches_single_shortcut(key, s))
}

/// "Ctrl+u" / "Enter" / "+" / "Ctrl++" を修飾キーとキーコードに分解する。
fn parse_shortcut(shortcut: &str) -> Option<(KeyModifiers, KeyCode)> {
    let (mods, key) = if shortcut == "+" {
        ("", "+")
    } else if let Some(prefix) = shortcut.strip_suffix("++") {
        (prefix, "+")
    } else {
        shortcut.rsplit_once('+').unwrap_or(("", shortcut))
    };

    let mut modifiers = KeyModifiers::empty();
    for m in mods.split('+').filter(|m| !m.is_empty()) {
        modifiers |= match m.to_ascii_lowercase().as_str() {
            "ctrl" => KeyModifiers::CONTROL,
            "alt" => KeyModifiers::ALT,
            "shift" => KeyModifiers::SHIFT,
            _ => return None,
        };
    }

    let code = match key.to_ascii_lowercase().as_str() {
        "enter" => KeyCode::Enter,
        "esc" => KeyCode::Esc,
        "tab" => KeyCode::Tab,
        "backspace" => KeyCode::Backspace,
        "delete" => KeyCode::Delete,
        "up" => KeyCode::Up,
        "down" => KeyCode::Down,
        "left" => KeyCode::Left,
        "right" => KeyCode::Right,
        "home" => KeyCode::Home,
        "end" => KeyCode::End,
        "space" => KeyCode::Char(' '),
        _ => {
            let mut chars = key.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => KeyCode::Char(c),
                _ => return None,
            }
        }
    };
    Some((modifiers, code))
}

/// KeyEventが単一のショートカット文字列と一致するか判定する。
fn matches_single_shortcut(key: &KeyEvent, shortcut: &str) -> bool {
    let Some((expected, code)) = parse_shortcut(shortcut) else {
        return false;
    };
    if key.code != code {
        return false;
    }
    // 記号キーは端末によってShift付きで届くため、文字キーではShiftを無視する。
    if matches!(code, KeyCode::Char(_)) {
        key.modifiers.difference(KeyModifiers::SHIFT) == expected.difference(KeyModifiers::SHIFT)
    } else {
        key.modifiers == expected
    }
}

/// ヘルプ表示用にキー一覧を連結する。
pub fn format_keys(keys: &[String]) -> String {
    keys.join("/")
}
