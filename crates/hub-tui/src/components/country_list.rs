//! CountryList component: country selector shown on the Countries tab.
//!
//! The first row is the "any country" entry; choosing it clears the filter.

use ratatui::crossterm::event::{KeyCode, KeyEvent};
use ratatui::{
    layout::Rect,
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{List, ListItem, ListState, Paragraph},
    Frame,
};

use hub_proto::model::Country;
use hub_proto::session::Intent;

use crate::{
    action::{Action, ComponentId},
    app_state::AppState,
    component::Component,
    theme::{C_MUTED, C_PLAYING, C_PRIMARY, C_SECONDARY, C_SELECTION_BG},
    widgets::{
        filter_input::{FilterAction, FilterInput},
        pane_chrome::{pane_chrome, Badge},
        scrollable_list::ScrollableList,
        status_bar::InputMode,
    },
};

pub struct CountryList {
    pub list: ScrollableList<Country>,
    filter_input: FilterInput,
    list_state: ListState,
}

fn country_matches(country: &Country, q: &str) -> bool {
    country.name.is_empty() || country.name.to_lowercase().contains(&q.trim().to_lowercase())
}

fn row_label(country: &Country) -> String {
    if country.name.is_empty() {
        "any country".to_string()
    } else {
        country.label()
    }
}

impl CountryList {
    pub fn new() -> Self {
        Self {
            list: ScrollableList::with_filter(country_matches),
            filter_input: FilterInput::new("/", "filter countries…"),
            list_state: ListState::default(),
        }
    }

    pub fn open_filter(&mut self) {
        self.filter_input.activate();
    }

    fn handle_filter_key(&mut self, key: KeyEvent) -> Vec<Action> {
        match key.code {
            KeyCode::Up => {
                self.list.select_up(1);
                return vec![];
            }
            KeyCode::Down => {
                self.list.select_down(1);
                return vec![];
            }
            _ => {}
        }
        match self.filter_input.handle_key(key) {
            FilterAction::Changed(q) => {
                self.list.set_filter(&q);
                vec![]
            }
            FilterAction::Confirmed => vec![Action::SetInputMode(InputMode::Normal)],
            FilterAction::Cancelled => {
                self.list.set_filter("");
                vec![Action::SetInputMode(InputMode::Normal)]
            }
        }
    }
}

impl Component for CountryList {
    fn id(&self) -> ComponentId {
        ComponentId::CountryList
    }

    fn handle_key(&mut self, key: KeyEvent, _state: &AppState) -> Vec<Action> {
        if self.filter_input.is_active() {
            return self.handle_filter_key(key);
        }
        match key.code {
            KeyCode::Up | KeyCode::Char('k') => self.list.select_up(1),
            KeyCode::Down | KeyCode::Char('j') => self.list.select_down(1),
            KeyCode::PageUp => self.list.select_up(10),
            KeyCode::PageDown => self.list.select_down(10),
            KeyCode::Home | KeyCode::Char('g') => self.list.select_first(),
            KeyCode::End | KeyCode::Char('G') => self.list.select_last(),
            KeyCode::Enter => {
                if let Some(country) = self.list.selected_item() {
                    return vec![
                        Action::Session(Intent::SelectCountry(country.name.clone())),
                        Action::FocusPane(ComponentId::StationList),
                    ];
                }
            }
            _ => {}
        }
        vec![]
    }

    fn on_state(&mut self, state: &AppState) {
        let mut rows = Vec::with_capacity(state.session.countries.len() + 1);
        rows.push(Country::default());
        rows.extend(state.session.countries.iter().cloned());
        self.list.set_items(rows);
    }

    fn draw(&mut self, frame: &mut Frame, area: Rect, focused: bool, state: &AppState) {
        let selected = state.session.selected_country.as_str();
        let badge = (!selected.is_empty()).then(|| Badge {
            text: selected.to_string(),
            color: C_PLAYING,
        });
        let block = pane_chrome("countries", focused, badge);
        let inner = block.inner(area);
        frame.render_widget(block, area);

        let filter_h = u16::from(self.filter_input.is_active());
        let list_area = Rect {
            height: inner.height.saturating_sub(filter_h),
            ..inner
        };

        if state.session.countries.is_empty() {
            frame.render_widget(
                Paragraph::new(Span::styled(
                    "  no countries loaded",
                    Style::default().fg(C_MUTED),
                )),
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
                .map(|(row, (_, country))| {
                    let is_selected = row == sel_in_view;
                    let is_active = country.name == selected;
                    let marker = if is_active { " ● " } else { "   " };
                    let bold = Style::default().add_modifier(Modifier::BOLD);
                    let style = match (is_active, is_selected) {
                        (true, _) => bold.fg(C_PLAYING),
                        (false, true) => bold.fg(C_PRIMARY),
                        (false, false) => Style::default().fg(C_SECONDARY),
                    };
                    let bg = if is_selected {
                        Style::default().bg(C_SELECTION_BG)
                    } else {
                        Style::default()
                    };
                    ListItem::new(Line::from(vec![
                        Span::styled(marker, Style::default().fg(C_PLAYING)),
                        Span::styled(row_label(country), style),
                    ]))
                    .style(bg)
                })
                .collect();
            self.list_state.select(Some(sel_in_view));
            frame.render_stateful_widget(List::new(items), list_area, &mut self.list_state);
        }

        if self.filter_input.is_active() {
            let filter_area = Rect {
                y: inner.y + inner.height.saturating_sub(1),
                height: 1,
                ..inner
            };
            self.filter_input.draw(frame, filter_area);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_proto::session::SessionState;
    use ratatui::crossterm::event::KeyModifiers;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn state() -> AppState {
        let mut session = SessionState::new("dj", 30);
        session.countries = vec![
            Country {
                name: "France".into(),
                stationcount: 120,
            },
            Country {
                name: "Japan".into(),
                stationcount: 40,
            },
        ];
        AppState::new(session)
    }

    #[test]
    fn first_row_clears_country() {
        let state = state();
        let mut c = CountryList::new();
        c.on_state(&state);
        match c.handle_key(key(KeyCode::Enter), &state).as_slice() {
            [Action::Session(Intent::SelectCountry(name)), Action::FocusPane(_)] => {
                assert!(name.is_empty())
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn filter_narrows_and_enter_selects() {
        let state = state();
        let mut c = CountryList::new();
        c.on_state(&state);
        c.open_filter();
        for ch in "jap".chars() {
            c.handle_key(key(KeyCode::Char(ch)), &state);
        }
        c.handle_key(key(KeyCode::Down), &state);
        c.handle_key(key(KeyCode::Enter), &state);
        match c.handle_key(key(KeyCode::Enter), &state).as_slice() {
            [Action::Session(Intent::SelectCountry(name)), _] => assert_eq!(name, "Japan"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn label_includes_station_count() {
        assert_eq!(
            row_label(&Country {
                name: "France".into(),
                stationcount: 120
            }),
            "France (120 stations)"
        );
        assert_eq!(row_label(&Country::default()), "any country");
    }
}
