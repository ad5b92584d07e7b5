//! NowPlaying component: current station card and its comment thread.

use chrono::Local;
use ratatui::crossterm::event::KeyEvent;
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Paragraph, Wrap},
    Frame,
};

use hub_proto::model::{Comment, Station};
use hub_proto::session::{Intent, SessionState};

use crate::{
    action::{Action, ComponentId},
    app_state::AppState,
    component::Component,
    theme::{
        C_ACCENT, C_AUTHOR, C_CONNECTING, C_LOCATION, C_MUTED, C_PLAYING, C_PRIMARY,
        C_SECONDARY, C_TAG,
    },
    widgets::{
        filter_input::{FilterAction, FilterInput},
        pane_chrome::{pane_chrome, Badge},
        status_bar::InputMode,
    },
};

pub struct NowPlaying {
    compose_input: FilterInput,
    scroll: u16,
}

impl NowPlaying {
    pub fn new() -> Self {
        Self {
            compose_input: FilterInput::new("✎", "write a comment…").esc_closes(),
            scroll: 0,
        }
    }

    pub fn open_compose(&mut self, draft: &str) {
        self.compose_input.set_value(draft);
        self.compose_input.activate();
    }
}

impl Component for NowPlaying {
    fn id(&self) -> ComponentId {
        ComponentId::NowPlaying
    }

    fn handle_key(&mut self, key: KeyEvent, _state: &AppState) -> Vec<Action> {
        use ratatui::crossterm::event::KeyCode;

        if self.compose_input.is_active() {
            return match self.compose_input.handle_key(key) {
                FilterAction::Changed(text) => vec![Action::Session(Intent::SetDraft(text))],
                FilterAction::Confirmed => vec![
                    Action::Session(Intent::SubmitComment),
                    Action::SetInputMode(InputMode::Normal),
                ],
                FilterAction::Cancelled => vec![Action::SetInputMode(InputMode::Normal)],
            };
        }
        match key.code {
            KeyCode::Up | KeyCode::Char('k') => self.scroll = self.scroll.saturating_sub(1),
            KeyCode::Down | KeyCode::Char('j') => self.scroll = self.scroll.saturating_add(1),
            KeyCode::Home | KeyCode::Char('g') => self.scroll = 0,
            _ => {}
        }
        vec![]
    }

    fn on_state(&mut self, state: &AppState) {
        if !self.compose_input.is_active() {
            self.compose_input.set_value(&state.session.comment_draft);
        }
        if state.session.current_station.is_none() {
            self.scroll = 0;
        }
    }

    fn draw(&mut self, frame: &mut Frame, area: Rect, focused: bool, state: &AppState) {
        let session = &state.session;
        let Some(station) = &session.current_station else {
            let block = pane_chrome("now playing", focused, None);
            let inner = block.inner(area);
            frame.render_widget(block, area);
            frame.render_widget(
                Paragraph::new(welcome_lines()).wrap(Wrap { trim: false }),
                inner,
            );
            return;
        };

        let badge = if session.is_playing {
            Badge {
                text: "PLAYING".to_string(),
                color: C_PLAYING,
            }
        } else {
            Badge {
                text: "PAUSED".to_string(),
                color: C_CONNECTING,
            }
        };
        let block = pane_chrome("now playing", focused, Some(badge));
        let inner = block.inner(area);
        frame.render_widget(block, area);

        let card = station_card(station, session);
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(card.len() as u16),
                Constraint::Length(1),
                Constraint::Length(1),
                Constraint::Min(0),
            ])
            .split(inner);

        frame.render_widget(Paragraph::new(card), rows[0]);
        frame.render_widget(
            Paragraph::new(Line::from(vec![
                Span::styled(
                    " comments ",
                    Style::default().fg(C_PRIMARY).add_modifier(Modifier::BOLD),
                ),
                Span::styled(
                    format!("({})", session.comments.len()),
                    Style::default().fg(C_MUTED),
                ),
            ])),
            rows[1],
        );
        if self.compose_input.is_active() {
            self.compose_input.draw(frame, rows[2]);
        } else {
            let hint = if session.comment_draft.is_empty() {
                "  c to write a comment".to_string()
            } else {
                format!("  draft: {}", session.comment_draft)
            };
            frame.render_widget(
                Paragraph::new(Span::styled(hint, Style::default().fg(C_MUTED))),
                rows[2],
            );
        }

        let thread = if session.comments.is_empty() {
            vec![Line::from(Span::styled(
                "  no comments yet, be the first",
                Style::default().fg(C_MUTED),
            ))]
        } else {
            session.comments.iter().flat_map(comment_lines).collect()
        };
        let max_scroll = (thread.len() as u16).saturating_sub(rows[3].height);
        self.scroll = self.scroll.min(max_scroll);
        frame.render_widget(
            Paragraph::new(thread)
                .wrap(Wrap { trim: false })
                .scroll((self.scroll, 0)),
            rows[3],
        );
    }
}

fn welcome_lines() -> Vec<Line<'static>> {
    vec![
        Line::from(""),
        Line::from(Span::styled(
            "  welcome to the music hub",
            Style::default().fg(C_ACCENT).add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        Line::from(Span::styled(
            "  pick a station and press Enter to start listening.",
            Style::default().fg(C_SECONDARY),
        )),
        Line::from(Span::styled(
            "  comments for the playing station show up here.",
            Style::default().fg(C_SECONDARY),
        )),
    ]
}

fn station_card(station: &Station, session: &SessionState) -> Vec<Line<'static>> {
    let (icon, color, label) = if session.is_playing {
        ("▶", C_PLAYING, "Playing")
    } else {
        ("⏸", C_CONNECTING, "Paused")
    };
    let mut lines = vec![
        Line::from(vec![
            Span::raw(" "),
            Span::styled(icon, Style::default().fg(color)),
            Span::raw(" "),
            Span::styled(
                station.name.clone(),
                Style::default().fg(C_PRIMARY).add_modifier(Modifier::BOLD),
            ),
        ]),
        Line::from(vec![
            Span::raw("   "),
            Span::styled(station.country.clone(), Style::default().fg(C_LOCATION)),
            Span::styled(format!("  {}", label), Style::default().fg(color)),
        ]),
    ];
    let mut meta: Vec<Span> = vec![Span::raw("   ")];
    if let Some(bitrate) = station.bitrate_label() {
        meta.push(Span::styled(bitrate, Style::default().fg(C_MUTED)));
        meta.push(Span::raw("  "));
    }
    if !station.codec.is_empty() {
        meta.push(Span::styled(station.codec.to_lowercase(), Style::default().fg(C_MUTED)));
        meta.push(Span::raw("  "));
    }
    for tag in station.tag_list(3) {
        meta.push(Span::styled(format!("#{} ", tag), Style::default().fg(C_TAG)));
    }
    if meta.len() > 1 {
        lines.push(Line::from(meta));
    }
    lines
}

fn comment_lines(comment: &Comment) -> Vec<Line<'static>> {
    let when = comment
        .timestamp
        .with_timezone(&Local)
        .format("%Y-%m-%d %H:%M")
        .to_string();
    vec![
        Line::from(vec![
            Span::styled(
                format!("  {}", comment.author),
                Style::default().fg(C_AUTHOR).add_modifier(Modifier::BOLD),
            ),
            Span::styled(format!("  {}", when), Style::default().fg(C_MUTED)),
        ]),
        Line::from(Span::styled(
            format!("  {}", comment.content),
            Style::default().fg(C_SECONDARY),
        )),
        Line::from(""),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use hub_proto::model::TargetType;
    use ratatui::crossterm::event::{KeyCode, KeyModifiers};

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn text(line: &Line) -> String {
        line.spans.iter().map(|s| s.content.as_ref()).collect()
    }

    #[test]
    fn compose_posts_on_enter() {
        let state = AppState::new(SessionState::new("dj", 30));
        let mut c = NowPlaying::new();
        c.open_compose("");
        match c.handle_key(key(KeyCode::Char('h')), &state).as_slice() {
            [Action::Session(Intent::SetDraft(d))] => assert_eq!(d, "h"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            c.handle_key(key(KeyCode::Enter), &state).as_slice(),
            [Action::Session(Intent::SubmitComment), Action::SetInputMode(InputMode::Normal)]
        ));
    }

    #[test]
    fn esc_keeps_draft() {
        let state = AppState::new(SessionState::new("dj", 30));
        let mut c = NowPlaying::new();
        c.open_compose("half written");
        assert!(matches!(
            c.handle_key(key(KeyCode::Esc), &state).as_slice(),
            [Action::SetInputMode(InputMode::Normal)]
        ));
        assert!(!c.compose_input.is_active());
    }

    #[test]
    fn card_shows_state_label() {
        let mut session = SessionState::new("dj", 30);
        let station = Station {
            id: "a".into(),
            name: "Radio A".into(),
            country: "France".into(),
            ..Default::default()
        };
        session.current_station = Some(station.clone());
        session.is_playing = false;
        let card = station_card(&station, &session);
        assert!(text(&card[1]).contains("France"));
        assert!(text(&card[1]).contains("Paused"));
        assert_eq!(card.len(), 2);
    }

    #[test]
    fn comment_shows_author_and_content() {
        let comment = Comment {
            id: "1".into(),
            author: "Anonymous".into(),
            content: "Great station!".into(),
            target_id: "a".into(),
            target_type: TargetType::Station,
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        };
        let lines = comment_lines(&comment);
        assert!(text(&lines[0]).contains("Anonymous"));
        assert!(text(&lines[0]).contains("2024-05-0"));
        assert_eq!(text(&lines[1]).trim(), "Great station!");
    }
}
