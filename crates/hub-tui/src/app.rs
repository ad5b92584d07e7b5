//! App: component-based UI event loop.
//!
//! Architecture:
//! - `App` owns all components and `AppState` (shared read-only data for components).
//! - A `tokio::mpsc` channel carries `AppMessage` events in from background tasks.
//! - The event loop draws each frame, then awaits the next message.
//! - Components return `Vec<Action>`; App dispatches each Action.
//! - Intents for the controller flow out through `event_tx`.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use ratatui::crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    Terminal,
};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use hub_proto::model::Tab;
use hub_proto::session::{Intent, SessionState};

use crate::{
    action::{Action, ComponentId},
    app_state::AppState,
    component::Component,
    components::{
        country_list::CountryList, header::Header, now_playing::NowPlaying,
        station_list::StationList,
    },
    controller::{BroadcastMessage, ControllerEvent, SessionStore},
    widgets::{alert::draw_alert, status_bar, status_bar::InputMode, toast::ToastManager},
};

/// Everything the event loop reacts to.
#[derive(Debug)]
pub enum AppMessage {
    /// Terminal input.
    Event(Event),
    /// Fresh session snapshot from the store.
    StateUpdated(SessionState),
    Alert(String),
    Log(String),
}

pub struct App {
    state: AppState,

    header: Header,
    country_list: CountryList,
    station_list: StationList,
    now_playing: NowPlaying,

    focus: ComponentId,
    toast: ToastManager,

    store: Arc<SessionStore>,
    event_tx: mpsc::Sender<ControllerEvent>,

    should_quit: bool,
}

/// Focus order of the body panes for a tab.
fn panes(tab: Tab) -> &'static [ComponentId] {
    match tab {
        Tab::Discover => &[ComponentId::StationList, ComponentId::NowPlaying],
        Tab::Countries => &[
            ComponentId::CountryList,
            ComponentId::StationList,
            ComponentId::NowPlaying,
        ],
    }
}

impl App {
    pub fn new(
        store: Arc<SessionStore>,
        initial: SessionState,
        event_tx: mpsc::Sender<ControllerEvent>,
    ) -> Self {
        Self {
            state: AppState::new(initial),
            header: Header::new(),
            country_list: CountryList::new(),
            station_list: StationList::new(),
            now_playing: NowPlaying::new(),
            focus: ComponentId::StationList,
            toast: ToastManager::new(),
            store,
            event_tx,
            should_quit: false,
        }
    }

    // ── Main run loop ─────────────────────────────────────────────────────────

    pub async fn run(
        mut self,
        mut broadcast_rx: broadcast::Receiver<BroadcastMessage>,
    ) -> anyhow::Result<()> {
        debug!("run(): enabling raw mode");
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        debug!("run(): terminal created, size={:?}", terminal.size());

        let (tx, mut rx) = mpsc::channel::<AppMessage>(1024);

        // ── Background task: keyboard events ──────────────────────────────────
        let key_tx = tx.clone();
        tokio::task::spawn_blocking(move || loop {
            match event::read() {
                Ok(ev) => {
                    if key_tx.blocking_send(AppMessage::Event(ev)).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        });

        // ── Background task: broadcast receiver (Controller → AppMessage) ─────
        let bc_tx = tx.clone();
        let bc_store = Arc::clone(&self.store);
        tokio::spawn(async move {
            loop {
                match broadcast_rx.recv().await {
                    Ok(msg) => {
                        let app_msg = match msg {
                            BroadcastMessage::StateUpdated => {
                                AppMessage::StateUpdated(bc_store.get_state().await)
                            }
                            BroadcastMessage::Alert(s) => AppMessage::Alert(s),
                            BroadcastMessage::Log(s) => AppMessage::Log(s),
                        };
                        if bc_tx.send(app_msg).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("broadcast receiver lagged by {} messages", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
        });
        drop(tx);

        // Toast expiry check + spinner animation
        let mut toast_tick = tokio::time::interval(Duration::from_millis(100));
        toast_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        // ── Main loop ─────────────────────────────────────────────────────────
        let mut needs_redraw = true;
        loop {
            if needs_redraw {
                terminal.draw(|f| self.draw(f))?;
            }
            needs_redraw = false;

            if self.should_quit {
                break;
            }

            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else { break };
                    const MAX_DRAIN: usize = 256;
                    let mut redraw = self.handle_message(msg).await;
                    let mut drained = 0usize;
                    while drained < MAX_DRAIN {
                        let Ok(next) = rx.try_recv() else { break };
                        drained += 1;
                        redraw |= self.handle_message(next).await;
                    }
                    needs_redraw = redraw;
                }

                _ = toast_tick.tick() => {
                    if !self.toast.is_empty() {
                        self.toast.tick();
                        needs_redraw = true;
                    }
                }
            }
        }

        // ── Teardown ──────────────────────────────────────────────────────────
        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        Ok(())
    }

    /// Returns whether a redraw is needed.
    async fn handle_message(&mut self, msg: AppMessage) -> bool {
        match msg {
            AppMessage::Event(ev) => match ev {
                Event::Key(key) => {
                    if key.kind == KeyEventKind::Release {
                        return false;
                    }
                    let actions = self.handle_key(key);
                    for a in actions {
                        self.dispatch(a).await;
                    }
                }
                Event::Resize(..) => {}
                _ => return false,
            },
            AppMessage::StateUpdated(session) => self.on_state_updated(session),
            AppMessage::Alert(msg) => {
                warn!("alert: {}", msg);
                self.state.alert = Some(msg);
            }
            AppMessage::Log(msg) => {
                self.toast.info(msg.clone());
                self.state.last_log = Some(msg);
            }
        }
        true
    }

    fn on_state_updated(&mut self, session: SessionState) {
        let had_draft = !self.state.session.comment_draft.is_empty();
        let tab_changed = self.state.session.tab != session.tab;
        self.state.session = session;

        if had_draft
            && self.state.session.comment_draft.is_empty()
            && self.state.input_mode != InputMode::Compose
        {
            self.toast.success("comment posted");
        }
        if self.state.session.loading && !self.toast.has_spinner() {
            self.toast.spinner("loading stations…");
        } else if !self.state.session.loading && self.toast.has_spinner() {
            self.toast.dismiss_spinner();
        }
        if tab_changed && !panes(self.state.session.tab).contains(&self.focus) {
            self.focus = panes(self.state.session.tab)[0];
        }

        let s = &self.state;
        self.header.on_state(s);
        self.country_list.on_state(s);
        self.station_list.on_state(s);
        self.now_playing.on_state(s);
    }

    fn handle_key(&mut self, key: KeyEvent) -> Vec<Action> {
        if key.code == KeyCode::Char('c') && key.modifiers == KeyModifiers::CONTROL {
            return vec![Action::Quit];
        }

        // The alert captures all keys until dismissed
        if self.state.alert.is_some() {
            return match key.code {
                KeyCode::Enter | KeyCode::Esc => vec![Action::DismissAlert],
                _ => vec![],
            };
        }

        // An open text input owns the keyboard
        let s = &self.state;
        match s.input_mode {
            InputMode::Normal => {}
            InputMode::Search => return self.station_list.handle_key(key, s),
            InputMode::Filter => return self.country_list.handle_key(key, s),
            InputMode::Compose => return self.now_playing.handle_key(key, s),
            InputMode::Author => return self.header.handle_key(key, s),
        }

        match key.code {
            KeyCode::Char('q') => return vec![Action::Quit],
            KeyCode::Tab => {
                return vec![Action::Session(Intent::SwitchTab(s.session.tab.next()))];
            }
            KeyCode::BackTab | KeyCode::Right => return vec![Action::FocusNext],
            KeyCode::Left => {
                let order = panes(s.session.tab);
                let idx = order.iter().position(|&id| id == self.focus).unwrap_or(0);
                let prev = order[(idx + order.len() - 1) % order.len()];
                return vec![Action::FocusPane(prev)];
            }
            KeyCode::Char('s') => return vec![Action::Session(Intent::Stop)],
            KeyCode::Char('r') if s.session.tab == Tab::Discover => {
                return vec![Action::Session(Intent::RefreshPopular)];
            }
            KeyCode::Char('/') => {
                let mode = if self.focus == ComponentId::CountryList {
                    InputMode::Filter
                } else {
                    InputMode::Search
                };
                return vec![Action::SetInputMode(mode)];
            }
            KeyCode::Char('c') => {
                if s.session.current_station.is_none() {
                    self.toast.warning("play a station to comment on it");
                    return vec![];
                }
                return vec![
                    Action::FocusPane(ComponentId::NowPlaying),
                    Action::SetInputMode(InputMode::Compose),
                ];
            }
            KeyCode::Char('a') => return vec![Action::SetInputMode(InputMode::Author)],
            _ => {}
        }

        match self.focus {
            ComponentId::CountryList => self.country_list.handle_key(key, s),
            ComponentId::StationList => self.station_list.handle_key(key, s),
            ComponentId::NowPlaying => self.now_playing.handle_key(key, s),
            ComponentId::Header => self.header.handle_key(key, s),
        }
    }

    async fn dispatch(&mut self, action: Action) {
        debug!("dispatch: {:?}", action);
        match action {
            Action::Session(intent) => {
                if let Intent::SwitchTab(tab) = &intent {
                    self.focus = panes(*tab)[0];
                }
                if self.event_tx.send(ControllerEvent::Intent(intent)).await.is_err() {
                    warn!("controller gone; quitting");
                    self.should_quit = true;
                }
            }
            Action::SetInputMode(mode) => {
                let session = &self.state.session;
                match mode {
                    InputMode::Normal => {}
                    InputMode::Search => self.station_list.open_search(&session.search_query),
                    InputMode::Filter => self.country_list.open_filter(),
                    InputMode::Compose => self.now_playing.open_compose(&session.comment_draft),
                    InputMode::Author => self.header.edit_author(&session.author),
                }
                self.state.input_mode = mode;
            }
            Action::FocusNext => {
                let order = panes(self.state.session.tab);
                let idx = order.iter().position(|&id| id == self.focus).unwrap_or(0);
                self.focus = order[(idx + 1) % order.len()];
            }
            Action::FocusPane(id) => {
                if panes(self.state.session.tab).contains(&id) {
                    self.focus = id;
                }
            }
            Action::DismissAlert => self.state.alert = None,
            Action::Quit => self.should_quit = true,
        }
    }

    fn draw(&mut self, frame: &mut ratatui::Frame) {
        use crate::theme::C_BG;
        use ratatui::widgets::Block;
        let area = frame.area();

        frame.render_widget(
            Block::default().style(ratatui::style::Style::default().bg(C_BG)),
            area,
        );

        // ── Outer layout: header | body | statusbar ──────────────────────────
        let outer = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(2),
                Constraint::Min(0),
                Constraint::Length(1),
            ])
            .split(area);

        let focused = self.focus == self.header.id();
        self.header.draw(frame, outer[0], focused, &self.state);
        self.draw_body(frame, outer[1]);
        status_bar::draw_keys_bar(
            frame,
            outer[2],
            self.state.input_mode,
            self.state.session.tab,
            self.state.last_log.as_deref(),
        );

        if let Some(msg) = &self.state.alert {
            draw_alert(frame, area, msg);
        }

        // ── Toast notifications (topmost layer) ──────────────────────────────
        self.toast.draw(frame, area);
    }

    fn draw_body(&mut self, frame: &mut ratatui::Frame, area: Rect) {
        let cols = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
            .split(area);

        let stations_area = if self.state.session.tab == Tab::Countries {
            let rows = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
                .split(cols[0]);
            let focused = self.focus == self.country_list.id();
            self.country_list.draw(frame, rows[0], focused, &self.state);
            rows[1]
        } else {
            cols[0]
        };

        let focused = self.focus == self.station_list.id();
        self.station_list.draw(frame, stations_area, focused, &self.state);
        let focused = self.focus == self.now_playing.id();
        self.now_playing.draw(frame, cols[1], focused, &self.state);
    }
}
