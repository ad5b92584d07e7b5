//! Session state and its transition functions.
//!
//! `SessionState` is plain data. User intents and request completions are
//! applied through [`SessionState::on_intent`] and
//! [`SessionState::on_completion`], which mutate the state and return the
//! side effects the caller must run (HTTP requests, audio commands, alerts).
//! Nothing in here does IO.
//!
//! Every request is tagged with a per-kind sequence number. A completion is
//! applied only when its number is the latest one issued for that kind, so a
//! slow response can never overwrite the result of a newer request.

use tracing::{debug, info, warn};

use crate::api::ApiError;
use crate::model::{Comment, Country, NewComment, Station, Tab, TargetType};

pub const DEFAULT_AUTHOR: &str = "Anonymous";
pub const OFFLINE_ALERT: &str = "Could not play this station. It might be offline.";

/// Request families that race independently of each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Stations,
    Countries,
    Comments,
    Playback,
}

/// Monotonic counters, one per [`RequestKind`].
#[derive(Debug, Clone, Default)]
pub struct RequestSeq {
    stations: u64,
    countries: u64,
    comments: u64,
    playback: u64,
}

impl RequestSeq {
    fn slot(&mut self, kind: RequestKind) -> &mut u64 {
        match kind {
            RequestKind::Stations => &mut self.stations,
            RequestKind::Countries => &mut self.countries,
            RequestKind::Comments => &mut self.comments,
            RequestKind::Playback => &mut self.playback,
        }
    }

    /// Issue the next sequence number for `kind`.
    pub fn issue(&mut self, kind: RequestKind) -> u64 {
        let slot = self.slot(kind);
        *slot += 1;
        *slot
    }

    pub fn latest(&self, kind: RequestKind) -> u64 {
        match kind {
            RequestKind::Stations => self.stations,
            RequestKind::Countries => self.countries,
            RequestKind::Comments => self.comments,
            RequestKind::Playback => self.playback,
        }
    }

    pub fn is_latest(&self, kind: RequestKind, seq: u64) -> bool {
        self.latest(kind) == seq
    }
}

/// Something the user asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    /// Initial loads: popular stations and the country list.
    Startup,
    SwitchTab(Tab),
    RefreshPopular,
    /// Empty string clears the country filter.
    SelectCountry(String),
    SetSearchQuery(String),
    Search,
    TogglePlay(Station),
    Stop,
    SetDraft(String),
    SubmitComment,
    SetAuthor(String),
}

/// The outcome of an effect, fed back into the state.
#[derive(Debug)]
pub enum Completion {
    Stations {
        seq: u64,
        result: Result<Vec<Station>, ApiError>,
    },
    Countries {
        seq: u64,
        result: Result<Vec<Country>, ApiError>,
    },
    Comments {
        seq: u64,
        station_id: String,
        result: Result<Vec<Comment>, ApiError>,
    },
    CommentPosted {
        station_id: String,
        result: Result<(), ApiError>,
    },
    PlaybackStarted {
        seq: u64,
        station: Station,
    },
    PlaybackFailed {
        seq: u64,
        station: Station,
        reason: String,
        /// Whether the previously playing station is audible again.
        restored: bool,
    },
}

/// Work the caller must perform after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    FetchPopular { seq: u64, limit: usize },
    FetchCountries { seq: u64 },
    FetchByCountry { seq: u64, country: String, limit: usize },
    Search { seq: u64, query: String, limit: usize },
    FetchComments { seq: u64, station_id: String },
    PostComment(NewComment),
    StartPlayback { seq: u64, station: Station },
    PausePlayback,
    StopPlayback,
    /// Blocking, user-facing notification.
    Alert(String),
}

#[derive(Debug, Clone)]
pub struct SessionState {
    /// Bumped on every applied transition.
    pub rev: u64,
    pub tab: Tab,
    pub stations: Vec<Station>,
    pub countries: Vec<Country>,
    pub selected_country: String,
    pub search_query: String,
    pub current_station: Option<Station>,
    pub is_playing: bool,
    pub comments: Vec<Comment>,
    pub comment_draft: String,
    pub author: String,
    /// A station-list request is in flight.
    pub loading: bool,
    /// Station id whose playback start is in flight.
    pub pending_playback: Option<String>,
    station_limit: usize,
    seq: RequestSeq,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(DEFAULT_AUTHOR, 30)
    }
}

impl SessionState {
    pub fn new(author: impl Into<String>, station_limit: usize) -> Self {
        Self {
            rev: 0,
            tab: Tab::default(),
            stations: Vec::new(),
            countries: Vec::new(),
            selected_country: String::new(),
            search_query: String::new(),
            current_station: None,
            is_playing: false,
            comments: Vec::new(),
            comment_draft: String::new(),
            author: author.into(),
            loading: false,
            pending_playback: None,
            station_limit: station_limit.max(1),
            seq: RequestSeq::default(),
        }
    }

    pub fn station_limit(&self) -> usize {
        self.station_limit
    }

    pub fn current_id(&self) -> Option<&str> {
        self.current_station.as_ref().map(|s| s.id.as_str())
    }

    /// True when `station` is the selected one and audio is flowing.
    pub fn is_playing_station(&self, station_id: &str) -> bool {
        self.is_playing && self.current_id() == Some(station_id)
    }

    pub fn latest_seq(&self, kind: RequestKind) -> u64 {
        self.seq.latest(kind)
    }

    fn request_stations(&mut self) -> u64 {
        self.loading = true;
        self.seq.issue(RequestKind::Stations)
    }

    fn request_comments(&mut self, station_id: &str) -> Effect {
        Effect::FetchComments {
            seq: self.seq.issue(RequestKind::Comments),
            station_id: station_id.to_string(),
        }
    }

    pub fn on_intent(&mut self, intent: Intent) -> Vec<Effect> {
        self.rev += 1;
        let limit = self.station_limit;
        match intent {
            Intent::Startup => {
                let stations = self.request_stations();
                let countries = self.seq.issue(RequestKind::Countries);
                vec![
                    Effect::FetchPopular {
                        seq: stations,
                        limit,
                    },
                    Effect::FetchCountries { seq: countries },
                ]
            }
            Intent::SwitchTab(tab) => {
                self.tab = tab;
                Vec::new()
            }
            Intent::RefreshPopular => {
                let seq = self.request_stations();
                vec![Effect::FetchPopular { seq, limit }]
            }
            Intent::SelectCountry(country) => {
                self.selected_country = country;
                let country = self.selected_country.trim().to_string();
                if country.is_empty() {
                    return Vec::new();
                }
                let seq = self.request_stations();
                vec![Effect::FetchByCountry {
                    seq,
                    country,
                    limit,
                }]
            }
            Intent::SetSearchQuery(query) => {
                self.search_query = query;
                Vec::new()
            }
            Intent::Search => {
                let query = self.search_query.trim().to_string();
                if query.is_empty() {
                    return Vec::new();
                }
                let seq = self.request_stations();
                vec![Effect::Search { seq, query, limit }]
            }
            Intent::TogglePlay(station) => {
                if self.is_playing_station(&station.id) {
                    // Pause supersedes any start still in flight.
                    self.seq.issue(RequestKind::Playback);
                    self.pending_playback = None;
                    self.is_playing = false;
                    return vec![Effect::PausePlayback];
                }
                let seq = self.seq.issue(RequestKind::Playback);
                self.pending_playback = Some(station.id.clone());
                vec![Effect::StartPlayback { seq, station }]
            }
            Intent::Stop => {
                self.seq.issue(RequestKind::Playback);
                self.pending_playback = None;
                self.current_station = None;
                self.is_playing = false;
                self.comments.clear();
                vec![Effect::StopPlayback]
            }
            Intent::SetDraft(draft) => {
                self.comment_draft = draft;
                Vec::new()
            }
            Intent::SubmitComment => {
                let content = self.comment_draft.trim();
                let Some(station) = self.current_station.as_ref() else {
                    return Vec::new();
                };
                if content.is_empty() {
                    return Vec::new();
                }
                let author = match self.author.trim() {
                    "" => DEFAULT_AUTHOR.to_string(),
                    name => name.to_string(),
                };
                vec![Effect::PostComment(NewComment {
                    content: content.to_string(),
                    author,
                    target_id: station.id.clone(),
                    target_type: TargetType::Station,
                })]
            }
            Intent::SetAuthor(author) => {
                self.author = author;
                Vec::new()
            }
        }
    }

    pub fn on_completion(&mut self, completion: Completion) -> Vec<Effect> {
        match completion {
            Completion::Stations { seq, result } => {
                if !self.accept(RequestKind::Stations, seq) {
                    return Vec::new();
                }
                self.loading = false;
                match result {
                    Ok(stations) => {
                        debug!("session: {} stations (seq={})", stations.len(), seq);
                        self.stations = stations;
                    }
                    Err(e) => warn!("session: station list request failed: {}", e),
                }
                Vec::new()
            }
            Completion::Countries { seq, result } => {
                if !self.accept(RequestKind::Countries, seq) {
                    return Vec::new();
                }
                match result {
                    Ok(countries) => self.countries = countries,
                    Err(e) => warn!("session: country list request failed: {}", e),
                }
                Vec::new()
            }
            Completion::Comments {
                seq,
                station_id,
                result,
            } => {
                if !self.accept(RequestKind::Comments, seq) {
                    return Vec::new();
                }
                if self.current_id() != Some(station_id.as_str()) {
                    debug!("session: dropping comments for deselected {}", station_id);
                    return Vec::new();
                }
                match result {
                    Ok(comments) => self.comments = comments,
                    Err(e) => warn!("session: comments for {} failed: {}", station_id, e),
                }
                Vec::new()
            }
            Completion::CommentPosted { station_id, result } => {
                self.rev += 1;
                match result {
                    Ok(()) => {
                        self.comment_draft.clear();
                        if self.current_id() == Some(station_id.as_str()) {
                            vec![self.request_comments(&station_id)]
                        } else {
                            Vec::new()
                        }
                    }
                    Err(e) => {
                        warn!("session: posting comment on {} failed: {}", station_id, e);
                        Vec::new()
                    }
                }
            }
            Completion::PlaybackStarted { seq, station } => {
                if !self.accept(RequestKind::Playback, seq) {
                    return Vec::new();
                }
                info!("session: now playing {} ({})", station.name, station.id);
                self.pending_playback = None;
                if self.current_id() != Some(station.id.as_str()) {
                    self.comments.clear();
                }
                let effect = self.request_comments(&station.id);
                self.current_station = Some(station);
                self.is_playing = true;
                vec![effect]
            }
            Completion::PlaybackFailed {
                seq,
                station,
                reason,
                restored,
            } => {
                if !self.accept(RequestKind::Playback, seq) {
                    return Vec::new();
                }
                warn!("session: playback of {} failed: {}", station.name, reason);
                self.pending_playback = None;
                if !restored {
                    self.is_playing = false;
                }
                vec![Effect::Alert(OFFLINE_ALERT.to_string())]
            }
        }
    }

    /// Guard for completions; bumps `rev` when the completion will be applied.
    fn accept(&mut self, kind: RequestKind, seq: u64) -> bool {
        if !self.seq.is_latest(kind, seq) {
            debug!(
                "session: stale {:?} response seq={} (latest={})",
                kind,
                seq,
                self.seq.latest(kind)
            );
            return false;
        }
        self.rev += 1;
        true
    }
}
