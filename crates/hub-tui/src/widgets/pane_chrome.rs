//! PaneChrome: standardized bordered pane with focus styling and badges.

use ratatui::{
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders},
};

use crate::theme::{style_focused_border, style_title, style_unfocused_border};

/// A badge shown in the top-right of the pane header (e.g. "LOADING", "12").
pub struct Badge {
    pub text: String,
    pub color: Color,
}

pub fn pane_chrome(title: &str, focused: bool, badge: Option<Badge>) -> Block<'_> {
    let border_style = if focused {
        style_focused_border()
    } else {
        style_unfocused_border()
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(border_style)
        .title(Line::from(Span::styled(title, style_title(focused))));

    match badge {
        Some(b) => block.title_top(
            Line::from(Span::styled(
                format!(" {} ", b.text),
                Style::default().fg(b.color).add_modifier(Modifier::BOLD),
            ))
            .right_aligned(),
        ),
        None => block,
    }
}
