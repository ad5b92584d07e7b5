//! Status bar: bottom line with input mode and keybindings.

use ratatui::{
    layout::Rect,
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::Paragraph,
    Frame,
};

use hub_proto::model::Tab;

use crate::theme::{C_MODE_INPUT, C_MODE_NORMAL, C_MUTED, C_PLAYING, C_SECONDARY};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    /// Station search box.
    Search,
    /// Country list filter.
    Filter,
    /// Comment draft.
    Compose,
    /// Display name.
    Author,
}

impl InputMode {
    pub fn label(self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Search => "SEARCH",
            Self::Filter => "FILTER",
            Self::Compose => "COMMENT",
            Self::Author => "AUTHOR",
        }
    }

    fn keys(self, tab: Tab) -> &'static str {
        match self {
            Self::Normal => match tab {
                Tab::Discover => {
                    " ↑↓/jk select  Enter play/pause  s stop  r refresh  / search  c comment  a author  Tab countries  ←→ panes  q quit"
                }
                Tab::Countries => {
                    " ↑↓/jk select  Enter choose/play  s stop  / filter  c comment  a author  Tab discover  ←→ panes  q quit"
                }
            },
            Self::Search => " type query  Enter search  Esc clear+close",
            Self::Filter => " type to filter  Up/Down move  Enter keep  Esc clear+close",
            Self::Compose => " type comment  Enter post  Esc close (draft kept)",
            Self::Author => " type name  Enter done  Esc close",
        }
    }
}

/// Draw the keybindings footer bar (one row).
pub fn draw_keys_bar(
    frame: &mut Frame,
    area: Rect,
    mode: InputMode,
    tab: Tab,
    last_log: Option<&str>,
) {
    let label_color = if mode == InputMode::Normal {
        C_MODE_NORMAL
    } else {
        C_MODE_INPUT
    };

    let mut spans = vec![
        Span::styled(
            format!(" {} ", mode.label()),
            Style::default().fg(label_color).add_modifier(Modifier::BOLD),
        ),
        Span::styled(mode.keys(tab), Style::default().fg(C_MUTED)),
    ];
    if let Some(log) = last_log {
        spans.push(Span::styled("  ● ", Style::default().fg(C_PLAYING)));
        spans.push(Span::styled(log.to_string(), Style::default().fg(C_SECONDARY)));
    }
    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}
