//! レイアウト計算のヘルパー関数

use ratatui::prelude::*;

use crate::map_view::Padding;

/// 地図に重ねる注文フォームの高さ（枠込み）。
pub const FORM_HEIGHT: u16 = 11;

/// 予約画面の領域
pub struct BookingLayout {
    /// 地図キャンバス（フォームはこの下端に重なる）
    pub map: Rect,
    /// 注文フォームのオーバーレイ
    pub form: Rect,
    /// HELPバーの領域
    pub help_bar: Rect,
    /// STATUSバーの領域
    pub status_bar: Rect,
}

/// 予約画面を地図 + HELP + STATUS に分割し、フォームを地図の下部に重ねる
pub fn create_booking_layout(area: Rect) -> BookingLayout {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(1),    // 地図
            Constraint::Length(3), // HELPバー
            Constraint::Length(3), // STATUSバー
        ])
        .split(area);

    let map = chunks[0];
    let form_height = FORM_HEIGHT.min(map.height);
    let form = Rect {
        x: map.x + 1.min(map.width),
        y: map.y + map.height - form_height,
        width: map.width.saturating_sub(2),
        height: form_height,
    };

    BookingLayout {
        map,
        form,
        help_bar: chunks[1],
        status_bar: chunks[2],
    }
}

/// 経路を収めるときに空けておく余白（フォームに隠れる下端を含む）
pub fn route_padding() -> Padding {
    Padding {
        top: 3,
        bottom: FORM_HEIGHT + 2,
        left: 2,
        right: 2,
    }
}

/// 端末サイズから地図キャンバスの内側の大きさ（列, 行）を求める
pub fn map_canvas_size(terminal: Rect) -> (u16, u16) {
    let map = create_booking_layout(terminal).map;
    // 外枠の分を引く
    (map.width.saturating_sub(2), map.height.saturating_sub(2))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_form_overlays_bottom_of_map() {
        let l = create_booking_layout(Rect::new(0, 0, 100, 40));
        assert_eq!(l.map, Rect::new(0, 0, 100, 34));
        assert_eq!(l.form.bottom(), l.map.bottom());
        assert_eq!(l.form.height, FORM_HEIGHT);
        assert_eq!((l.form.x, l.form.width), (1, 98));
        assert_eq!(l.help_bar.y, 34);
        assert_eq!(l.status_bar.y, 37);
    }

    #[test]
    fn test_tiny_terminal_does_not_overflow() {
        let l = create_booking_layout(Rect::new(0, 0, 20, 10));
        assert!(l.form.height <= l.map.height);
        assert!(l.form.y >= l.map.y);
    }

    #[test]
    fn test_padding_clears_the_form() {
        let p = route_padding();
        assert_eq!(p.bottom, FORM_HEIGHT + 2);
        assert_eq!((p.top, p.left, p.right), (3, 2, 2));
        assert_eq!(map_canvas_size(Rect::new(0, 0, 100, 40)), (98, 32));
    }
}
