//! Controller: single-owner event loop for the session state.
//!
//! UI key handlers, API tasks and the playback session all send
//! `ControllerEvent`s into this loop. The controller applies each one to the
//! `SessionState` through its transition functions, broadcasts
//! `BroadcastMessage::StateUpdated`, and then runs the returned effects:
//!
//! - HTTP effects are spawned as tasks whose results come back as
//!   `ControllerEvent::Completion`.
//! - Playback effects are forwarded to the playback session task.
//! - Alerts are broadcast to the UI.
//!
//! Receivers of `StateUpdated` fetch a snapshot from the `SessionStore`.

use std::sync::Arc;

use hub_proto::api::HubApi;
use hub_proto::model::TargetType;
use hub_proto::session::{Completion, Effect, Intent, SessionState};
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, error, info, warn};

use crate::playback::PlaybackCommand;

#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    /// Session state changed; receivers should fetch from the store.
    StateUpdated,
    /// Blocking notification for the user.
    Alert(String),
    /// A status line for the toast area.
    Log(String),
}

/// All inputs into the controller loop.
#[derive(Debug)]
pub enum ControllerEvent {
    Intent(Intent),
    Completion(Completion),
    Shutdown,
}

/// Shared read access to the session, written only by the controller.
pub struct SessionStore {
    state: RwLock<SessionState>,
}

impl SessionStore {
    pub fn new(state: SessionState) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }

    pub async fn get_state(&self) -> SessionState {
        self.state.read().await.clone()
    }

    async fn update<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut state = self.state.write().await;
        f(&mut state)
    }
}

pub struct Controller {
    store: Arc<SessionStore>,
    api: Arc<dyn HubApi>,
    playback_tx: mpsc::Sender<PlaybackCommand>,
    event_tx: mpsc::Sender<ControllerEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
}

impl Controller {
    pub fn new(
        store: Arc<SessionStore>,
        api: Arc<dyn HubApi>,
        playback_tx: mpsc::Sender<PlaybackCommand>,
        event_tx: mpsc::Sender<ControllerEvent>,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
    ) -> Self {
        Self {
            store,
            api,
            playback_tx,
            event_tx,
            broadcast_tx,
        }
    }

    /// Run until `Shutdown` arrives or every sender is gone.
    pub async fn run(self, mut event_rx: mpsc::Receiver<ControllerEvent>) {
        info!("Controller: starting event loop");
        self.spawn_health_check();

        while let Some(event) = event_rx.recv().await {
            let effects = match event {
                ControllerEvent::Shutdown => {
                    info!("Controller: shutdown requested");
                    break;
                }
                ControllerEvent::Intent(intent) => {
                    debug!("Controller: intent {:?}", intent);
                    self.store.update(|s| s.on_intent(intent)).await
                }
                ControllerEvent::Completion(completion) => {
                    self.store.update(|s| s.on_completion(completion)).await
                }
            };
            let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
            for effect in effects {
                self.execute(effect).await;
            }
        }

        let _ = self.playback_tx.send(PlaybackCommand::Stop).await;
        info!("Controller: event loop finished");
    }

    fn spawn_health_check(&self) {
        let api = Arc::clone(&self.api);
        let broadcast_tx = self.broadcast_tx.clone();
        tokio::spawn(async move {
            let msg = match api.health().await {
                Ok(health) => {
                    info!("Controller: backend status {}", health.status);
                    format!("Backend {}", health.status)
                }
                Err(e) => {
                    warn!("Controller: backend health check failed: {}", e);
                    "Backend unreachable".to_string()
                }
            };
            let _ = broadcast_tx.send(BroadcastMessage::Log(msg));
        });
    }

    async fn execute(&self, effect: Effect) {
        match effect {
            Effect::FetchPopular { seq, limit } => {
                self.spawn_request(move |api| async move {
                    let result = api.popular_stations(limit).await;
                    Completion::Stations { seq, result }
                });
            }
            Effect::FetchCountries { seq } => {
                self.spawn_request(move |api| async move {
                    let result = api.countries().await;
                    Completion::Countries { seq, result }
                });
            }
            Effect::FetchByCountry {
                seq,
                country,
                limit,
            } => {
                self.spawn_request(move |api| async move {
                    let result = api.stations_by_country(&country, limit).await;
                    Completion::Stations { seq, result }
                });
            }
            Effect::Search { seq, query, limit } => {
                self.spawn_request(move |api| async move {
                    let result = api.search_stations(&query, limit).await;
                    Completion::Stations { seq, result }
                });
            }
            Effect::FetchComments { seq, station_id } => {
                self.spawn_request(move |api| async move {
                    let result = api.comments(&station_id, TargetType::Station).await;
                    Completion::Comments {
                        seq,
                        station_id,
                        result,
                    }
                });
            }
            Effect::PostComment(comment) => {
                self.spawn_request(move |api| async move {
                    let result = api.post_comment(&comment).await;
                    Completion::CommentPosted {
                        station_id: comment.target_id,
                        result,
                    }
                });
            }
            Effect::StartPlayback { seq, station } => {
                self.send_playback(PlaybackCommand::Start { seq, station }).await
            }
            Effect::PausePlayback => self.send_playback(PlaybackCommand::Pause).await,
            Effect::StopPlayback => self.send_playback(PlaybackCommand::Stop).await,
            Effect::Alert(msg) => {
                let _ = self.broadcast_tx.send(BroadcastMessage::Alert(msg));
            }
        }
    }

    fn spawn_request<F, Fut>(&self, request: F)
    where
        F: FnOnce(Arc<dyn HubApi>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Completion> + Send + 'static,
    {
        let api = Arc::clone(&self.api);
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            let completion = request(api).await;
            let _ = event_tx.send(ControllerEvent::Completion(completion)).await;
        });
    }

    async fn send_playback(&self, cmd: PlaybackCommand) {
        if let Err(e) = self.playback_tx.send(cmd).await {
            error!("Controller: playback session gone: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::fake::FakeOutput;
    use crate::playback::PlaybackSession;
    use async_trait::async_trait;
    use chrono::Utc;
    use hub_proto::api::ApiError;
    use hub_proto::model::{Comment, Country, Health, NewComment, Station};
    use hub_proto::session::OFFLINE_ALERT;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    fn station(id: &str, country: &str) -> Station {
        Station {
            id: id.to_string(),
            name: format!("Radio {id}"),
            country: country.to_string(),
            url: format!("http://{id}.example/stream"),
            ..Default::default()
        }
    }

    #[derive(Default)]
    struct FakeApi {
        delays: HashMap<String, Duration>,
        comments: Mutex<Vec<Comment>>,
    }

    #[async_trait]
    impl HubApi for FakeApi {
        async fn popular_stations(&self, limit: usize) -> Result<Vec<Station>, ApiError> {
            Ok((0..limit.min(3))
                .map(|i| station(&format!("p{i}"), "US"))
                .collect())
        }

        async fn countries(&self) -> Result<Vec<Country>, ApiError> {
            Ok(vec![
                Country {
                    name: "France".into(),
                    stationcount: 2,
                },
                Country {
                    name: "Japan".into(),
                    stationcount: 1,
                },
            ])
        }

        async fn stations_by_country(
            &self,
            country: &str,
            _limit: usize,
        ) -> Result<Vec<Station>, ApiError> {
            if let Some(delay) = self.delays.get(country) {
                tokio::time::sleep(*delay).await;
            }
            Ok(vec![station(&country.to_lowercase(), country)])
        }

        async fn search_stations(
            &self,
            query: &str,
            _limit: usize,
        ) -> Result<Vec<Station>, ApiError> {
            Ok(vec![station(query, "DE")])
        }

        async fn comments(
            &self,
            target_id: &str,
            _target_type: TargetType,
        ) -> Result<Vec<Comment>, ApiError> {
            Ok(self
                .comments
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.target_id == target_id)
                .cloned()
                .collect())
        }

        async fn post_comment(&self, comment: &NewComment) -> Result<(), ApiError> {
            let mut comments = self.comments.lock().unwrap();
            let id = format!("c{}", comments.len() + 1);
            comments.push(Comment {
                id,
                content: comment.content.clone(),
                author: comment.author.clone(),
                target_id: comment.target_id.clone(),
                target_type: comment.target_type,
                timestamp: Utc::now(),
            });
            Ok(())
        }

        async fn health(&self) -> Result<Health, ApiError> {
            Ok(Health {
                status: "healthy".into(),
                timestamp: None,
            })
        }
    }

    struct Harness {
        store: Arc<SessionStore>,
        events: mpsc::Sender<ControllerEvent>,
        broadcast_rx: broadcast::Receiver<BroadcastMessage>,
        output: FakeOutput,
    }

    fn start(api: FakeApi) -> Harness {
        let store = Arc::new(SessionStore::new(SessionState::new("tester", 30)));
        let (event_tx, event_rx) = mpsc::channel(64);
        let (playback_tx, playback_rx) = mpsc::channel(16);
        let (broadcast_tx, broadcast_rx) = broadcast::channel(64);
        let output = FakeOutput::default();

        let session = PlaybackSession::new(output.clone(), Duration::from_secs(1));
        tokio::spawn(session.run(playback_rx, event_tx.clone()));
        let controller = Controller::new(
            store.clone(),
            Arc::new(api),
            playback_tx,
            event_tx.clone(),
            broadcast_tx,
        );
        tokio::spawn(controller.run(event_rx));

        Harness {
            store,
            events: event_tx,
            broadcast_rx,
            output,
        }
    }

    impl Harness {
        async fn send(&self, intent: Intent) {
            self.events
                .send(ControllerEvent::Intent(intent))
                .await
                .unwrap();
        }

        async fn wait_for(&self, what: &str, pred: impl Fn(&SessionState) -> bool) -> SessionState {
            for _ in 0..200 {
                let state = self.store.get_state().await;
                if pred(&state) {
                    return state;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("timed out waiting for {what}");
        }

        async fn next_alert(&mut self) -> String {
            loop {
                match self.broadcast_rx.recv().await.unwrap() {
                    BroadcastMessage::Alert(msg) => return msg,
                    _ => continue,
                }
            }
        }
    }

    #[tokio::test]
    async fn startup_loads_popular_and_countries() {
        let h = start(FakeApi::default());
        h.send(Intent::Startup).await;
        let state = h
            .wait_for("initial lists", |s| {
                !s.stations.is_empty() && !s.countries.is_empty()
            })
            .await;
        assert_eq!(state.stations.len(), 3);
        assert_eq!(state.countries[0].name, "France");
        assert!(!state.loading);
    }

    #[tokio::test]
    async fn slow_country_response_never_overwrites_newer_one() {
        let mut api = FakeApi::default();
        api.delays
            .insert("France".into(), Duration::from_millis(150));
        let h = start(api);

        h.send(Intent::SelectCountry("France".into())).await;
        h.send(Intent::SelectCountry("Japan".into())).await;
        h.wait_for("japan stations", |s| {
            s.stations.first().map(|st| st.country.as_str()) == Some("Japan")
        })
        .await;

        tokio::time::sleep(Duration::from_millis(250)).await;
        let state = h.store.get_state().await;
        assert_eq!(state.selected_country, "Japan");
        assert_eq!(state.stations[0].country, "Japan");
    }

    #[tokio::test]
    async fn play_then_comment_refreshes_thread() {
        let h = start(FakeApi::default());
        let a = station("a", "US");
        h.send(Intent::TogglePlay(a.clone())).await;
        h.wait_for("playing", |s| s.is_playing_station("a")).await;

        h.send(Intent::SetDraft("  Great station!  ".into())).await;
        h.send(Intent::SubmitComment).await;
        let state = h
            .wait_for("comment thread", |s| {
                s.comments.len() == 1 && s.comment_draft.is_empty()
            })
            .await;
        assert_eq!(state.comments[0].content, "Great station!");
        assert_eq!(state.comments[0].author, "tester");

        h.send(Intent::TogglePlay(a)).await;
        h.wait_for("paused", |s| !s.is_playing).await;
        assert_eq!(h.output.calls().last().map(String::as_str), Some("pause"));
    }

    #[tokio::test]
    async fn offline_station_raises_alert_and_keeps_selection() {
        let mut h = start(FakeApi::default());
        let a = station("a", "US");
        h.send(Intent::TogglePlay(a)).await;
        h.wait_for("playing a", |s| s.is_playing_station("a")).await;

        let dead = station("dead", "US");
        h.output.offline_url(&dead.url);
        h.send(Intent::TogglePlay(dead)).await;
        assert_eq!(h.next_alert().await, OFFLINE_ALERT);

        let state = h
            .wait_for("pending cleared", |s| s.pending_playback.is_none())
            .await;
        assert_eq!(state.current_id(), Some("a"));
        assert!(state.is_playing);
    }

    #[tokio::test]
    async fn failed_switch_after_abandoned_start_restores_audio() {
        let mut h = start(FakeApi::default());
        let a = station("a", "US");
        h.send(Intent::TogglePlay(a.clone())).await;
        h.wait_for("playing a", |s| s.is_playing_station("a")).await;

        let slow = station("slow", "US");
        let dead = station("dead", "US");
        h.output.hanging_url(&slow.url);
        h.output.offline_url(&dead.url);
        h.send(Intent::TogglePlay(slow)).await;
        h.send(Intent::TogglePlay(dead)).await;
        assert_eq!(h.next_alert().await, OFFLINE_ALERT);

        let state = h
            .wait_for("pending cleared", |s| s.pending_playback.is_none())
            .await;
        assert_eq!(state.current_id(), Some("a"));
        assert!(state.is_playing);
        let calls = h.output.calls();
        assert_eq!(calls.last().map(String::as_str), Some("play"));
        let last_load = calls.iter().rev().find(|c| c.starts_with("load "));
        assert_eq!(last_load, Some(&format!("load {}", a.url)));
    }

    #[tokio::test]
    async fn failed_restore_marks_session_not_playing() {
        let mut h = start(FakeApi::default());
        let a = station("a", "US");
        h.send(Intent::TogglePlay(a.clone())).await;
        h.wait_for("playing a", |s| s.is_playing_station("a")).await;

        let dead = station("dead", "US");
        h.output.offline_url(&a.url);
        h.output.offline_url(&dead.url);
        h.send(Intent::TogglePlay(dead)).await;
        assert_eq!(h.next_alert().await, OFFLINE_ALERT);

        let state = h.wait_for("not playing", |s| !s.is_playing).await;
        assert_eq!(state.current_id(), Some("a"));
        assert_eq!(h.output.calls().last().map(String::as_str), Some("stop"));
    }

    #[tokio::test]
    async fn stop_clears_selection() {
        let h = start(FakeApi::default());
        h.send(Intent::TogglePlay(station("a", "US"))).await;
        h.wait_for("playing", |s| s.is_playing).await;
        h.send(Intent::Stop).await;
        let state = h.wait_for("stopped", |s| s.current_station.is_none()).await;
        assert!(!state.is_playing);
        assert!(state.comments.is_empty());
    }
}
