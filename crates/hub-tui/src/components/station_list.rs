//! StationList component: the active station list plus the search box.

use ratatui::crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::{
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{List, ListItem, ListState, Paragraph},
    Frame,
};

use hub_proto::model::Station;
use hub_proto::session::{Intent, SessionState};

use crate::{
    action::{Action, ComponentId},
    app_state::AppState,
    component::Component,
    theme::{
        C_CONNECTING, C_LOCATION, C_MUTED, C_PLAYING, C_PRIMARY, C_SECONDARY, C_SELECTION_BG,
        C_TAG, C_VOTES,
    },
    widgets::{
        filter_input::{FilterAction, FilterInput},
        pane_chrome::{pane_chrome, Badge},
        scrollable_list::ScrollableList,
        status_bar::InputMode,
    },
};

pub struct StationList {
    pub list: ScrollableList<Station>,
    search_input: FilterInput,
    list_state: ListState,
}

impl StationList {
    pub fn new() -> Self {
        Self {
            list: ScrollableList::default(),
            search_input: FilterInput::new("/", "search stations…"),
            list_state: ListState::default(),
        }
    }

    pub fn open_search(&mut self, current: &str) {
        self.search_input.set_value(current);
        self.search_input.activate();
    }

    fn handle_search_key(&mut self, key: KeyEvent) -> Vec<Action> {
        match self.search_input.handle_key(key) {
            FilterAction::Changed(q) => vec![Action::Session(Intent::SetSearchQuery(q))],
            FilterAction::Confirmed => vec![
                Action::SetInputMode(InputMode::Normal),
                Action::Session(Intent::Search),
            ],
            FilterAction::Cancelled => vec![Action::SetInputMode(InputMode::Normal)],
        }
    }
}

/// Row text for one station: marker, name, country, votes, bitrate, tags.
fn station_line(station: &Station, is_selected: bool, session: &SessionState) -> Line<'static> {
    let is_current = session.current_id() == Some(station.id.as_str());
    let is_pending = session.pending_playback.as_deref() == Some(station.id.as_str());

    let (icon, icon_color): (&str, Color) = if is_pending {
        ("◔", C_CONNECTING)
    } else if is_current && session.is_playing {
        ("▶", C_PLAYING)
    } else if is_current {
        ("⏸", C_CONNECTING)
    } else {
        (" ", C_MUTED)
    };

    let name_color = if is_current && session.is_playing {
        C_PLAYING
    } else if is_selected {
        C_PRIMARY
    } else {
        C_SECONDARY
    };
    let name_style = if is_current || is_selected {
        Style::default().fg(name_color).add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(name_color)
    };

    let mut spans: Vec<Span> = vec![
        Span::raw(" "),
        Span::styled(icon.to_string(), Style::default().fg(icon_color)),
        Span::raw("  "),
        Span::styled(station.name.clone(), name_style),
    ];
    if !station.country.is_empty() {
        spans.push(Span::raw("  "));
        spans.push(Span::styled(
            station.country.clone(),
            Style::default().fg(C_LOCATION),
        ));
    }
    spans.push(Span::styled(
        format!("  ♥ {}", station.votes),
        Style::default().fg(C_VOTES),
    ));
    if let Some(bitrate) = station.bitrate_label() {
        spans.push(Span::styled(
            format!("  {}", bitrate),
            Style::default().fg(C_MUTED),
        ));
    }
    for tag in station.tag_list(3) {
        spans.push(Span::styled(" · ", Style::default().fg(C_MUTED)));
        spans.push(Span::styled(tag.to_string(), Style::default().fg(C_TAG)));
    }

    Line::from(spans)
}

impl Component for StationList {
    fn id(&self) -> ComponentId {
        ComponentId::StationList
    }

    fn handle_key(&mut self, key: KeyEvent, _state: &AppState) -> Vec<Action> {
        if self.search_input.is_active() {
            return self.handle_search_key(key);
        }

        let step = if key.modifiers.contains(KeyModifiers::SHIFT) {
            5
        } else {
            1
        };
        match key.code {
            KeyCode::Up | KeyCode::Char('k') => self.list.select_up(step),
            KeyCode::Down | KeyCode::Char('j') => self.list.select_down(step),
            KeyCode::PageUp => self.list.select_up(10),
            KeyCode::PageDown => self.list.select_down(10),
            KeyCode::Home | KeyCode::Char('g') => self.list.select_first(),
            KeyCode::End | KeyCode::Char('G') => self.list.select_last(),
            KeyCode::Enter | KeyCode::Char(' ') => {
                if let Some(station) = self.list.selected_item() {
                    return vec![Action::Session(Intent::TogglePlay(station.clone()))];
                }
            }
            _ => {}
        }
        vec![]
    }

    fn on_state(&mut self, state: &AppState) {
        self.list.set_items(state.session.stations.clone());
        if !self.search_input.is_active() {
            self.search_input.set_value(&state.session.search_query);
        }
    }

    fn draw(&mut self, frame: &mut Frame, area: Rect, focused: bool, state: &AppState) {
        let session = &state.session;
        let badge = if session.loading {
            Badge {
                text: "LOADING".to_string(),
                color: C_CONNECTING,
            }
        } else {
            Badge {
                text: session.stations.len().to_string(),
                color: C_MUTED,
            }
        };
        let block = pane_chrome("stations", focused, Some(badge));
        let inner = block.inner(area);
        frame.render_widget(block, area);

        let search_h = u16::from(self.search_input.is_active());
        let list_area = Rect {
            height: inner.height.saturating_sub(search_h),
            ..inner
        };

        if self.list.is_empty() {
            let msg = if session.loading {
                "  loading stations…"
            } else {
                "  no stations"
            };
            frame.render_widget(
                Paragraph::new(Span::styled(msg, Style::default().fg(C_MUTED))),
                list_area,
            );
        } else {
            let content_h = list_area.height as usize;
            self.list.ensure_visible(content_h);
            let sel_in_view = self.list.selected_in_view(content_h);
            let items: Vec<ListItem> = self
                .list
                .visible_items(content_h)
                .into_iter()
                .enumerate()
                .map(|(row, (_, station))| {
                    let is_selected = row == sel_in_view;
                    let bg = if is_selected {
                        Style::default().bg(C_SELECTION_BG)
                    } else {
                        Style::default()
                    };
                    ListItem::new(station_line(station, is_selected, session)).style(bg)
                })
                .collect();
            self.list_state.select(Some(sel_in_view));
            frame.render_stateful_widget(List::new(items), list_area, &mut self.list_state);
        }

        if self.search_input.is_active() {
            let search_area = Rect {
                y: inner.y + inner.height.saturating_sub(1),
                height: 1,
                ..inner
            };
            self.search_input.draw(frame, search_area);
        }
    }
}
