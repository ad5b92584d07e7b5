//! Header component: 2-row top bar.
//!
//! Row 1: app title, tabs, author name.
//! Row 2: playback badge, or the author input while it is being edited.

use ratatui::crossterm::event::KeyEvent;
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Clear, Paragraph},
    Frame,
};

use hub_proto::model::Tab;
use hub_proto::session::{Intent, SessionState};

use crate::{
    action::{Action, ComponentId},
    app_state::AppState,
    component::Component,
    theme::{C_ACCENT, C_AUTHOR, C_CONNECTING, C_LOCATION, C_MUTED, C_PLAYING, C_PRIMARY},
    widgets::{
        filter_input::{FilterAction, FilterInput},
        status_bar::InputMode,
    },
};

pub struct Header {
    author_input: FilterInput,
}

impl Header {
    pub fn new() -> Self {
        Self {
            author_input: FilterInput::new("@", "display name").esc_closes(),
        }
    }

    pub fn edit_author(&mut self, current: &str) {
        self.author_input.set_value(current);
        self.author_input.activate();
    }
}

impl Component for Header {
    fn id(&self) -> ComponentId {
        ComponentId::Header
    }

    fn handle_key(&mut self, key: KeyEvent, _state: &AppState) -> Vec<Action> {
        if !self.author_input.is_active() {
            return vec![];
        }
        match self.author_input.handle_key(key) {
            FilterAction::Changed(name) => vec![Action::Session(Intent::SetAuthor(name))],
            FilterAction::Confirmed | FilterAction::Cancelled => {
                vec![Action::SetInputMode(InputMode::Normal)]
            }
        }
    }

    fn draw(&mut self, frame: &mut Frame, area: Rect, _focused: bool, state: &AppState) {
        frame.render_widget(Clear, area);
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(1), Constraint::Length(1)])
            .split(area);

        frame.render_widget(Paragraph::new(build_row1(&state.session)), rows[0]);
        if area.height < 2 {
            return;
        }
        if self.author_input.is_active() {
            self.author_input.draw(frame, rows[1]);
        } else {
            frame.render_widget(Paragraph::new(build_row2(&state.session)), rows[1]);
        }
    }
}

fn build_row1(session: &SessionState) -> Line<'static> {
    let mut spans = vec![
        Span::styled(
            " ♫ music hub ",
            Style::default().fg(C_ACCENT).add_modifier(Modifier::BOLD),
        ),
        Span::raw(" "),
    ];
    for (i, tab) in Tab::ALL.iter().enumerate() {
        if i > 0 {
            spans.push(Span::styled(" │ ", Style::default().fg(C_MUTED)));
        }
        let style = if *tab == session.tab {
            Style::default()
                .fg(C_PRIMARY)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
        } else {
            Style::default().fg(C_MUTED)
        };
        spans.push(Span::styled(tab.label(), style));
    }
    spans.push(Span::styled("   @ ", Style::default().fg(C_MUTED)));
    let author = match session.author.trim() {
        "" => hub_proto::session::DEFAULT_AUTHOR.to_string(),
        name => name.to_string(),
    };
    spans.push(Span::styled(author, Style::default().fg(C_AUTHOR)));
    Line::from(spans)
}

fn build_row2(session: &SessionState) -> Line<'static> {
    let (icon, color, label): (&str, Color, String) = if session.pending_playback.is_some() {
        ("◔", C_CONNECTING, "connecting…".to_string())
    } else {
        match &session.current_station {
            Some(st) if session.is_playing => ("▶", C_PLAYING, st.name.clone()),
            Some(st) => ("⏸", C_CONNECTING, st.name.clone()),
            None => ("■", C_MUTED, "nothing playing".to_string()),
        }
    };
    let mut spans = vec![
        Span::raw(" "),
        Span::styled(icon.to_string(), Style::default().fg(color)),
        Span::raw(" "),
        Span::styled(label, Style::default().fg(color).add_modifier(Modifier::BOLD)),
    ];
    if let Some(st) = &session.current_station {
        if !st.country.is_empty() {
            spans.push(Span::raw("  "));
            spans.push(Span::styled(st.country.clone(), Style::default().fg(C_LOCATION)));
        }
    }
    Line::from(spans)
}
