//! Playback session: the single owner of the audio output.
//!
//! The session runs as its own task and is the only code that touches the
//! `AudioOutput`. The controller sends it `PlaybackCommand`s; outcomes of
//! `Start` come back as session completions on the controller channel.
//!
//! ```text
//!   Idle ──start──▶ Loading ──ok──▶ Playing ──pause──▶ Paused
//!    ▲                 │                │                 │
//!    └──── stop ───────┴── fail ────────┴──── stop ───────┘
//! ```
//!
//! Switching stations is always stop-then-start. When a start fails the
//! last station confirmed playing (if any) is reloaded so that the audio
//! keeps matching the session, which leaves its selection untouched on
//! failure. The failure report says whether that reload worked.

use std::time::Duration;

use async_trait::async_trait;
use hub_proto::model::Station;
use hub_proto::session::Completion;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::controller::ControllerEvent;

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("audio output unavailable: {0}")]
    Unavailable(String),
    #[error("could not load {url}: {reason}")]
    Load { url: String, reason: String },
    #[error("stream offline: {0}")]
    Offline(String),
    #[error("no audio after {0:?}")]
    Timeout(Duration),
}

/// The audio primitive: point it at a URL, start, pause, stop.
#[async_trait]
pub trait AudioOutput: Send {
    /// Attach `url` as the current source without starting it.
    async fn load(&mut self, url: &str) -> Result<(), PlaybackError>;

    /// Start the loaded source; resolves once audio is flowing.
    async fn play(&mut self) -> Result<(), PlaybackError>;

    async fn pause(&mut self) -> Result<(), PlaybackError>;

    /// Halt and detach the current source.
    async fn stop(&mut self) -> Result<(), PlaybackError>;

    /// Release the underlying resource (child process, device).
    async fn shutdown(&mut self) {}
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Idle,
    Loading(Station),
    Playing(Station),
    Paused(Station),
}

impl PlaybackState {
    pub fn station(&self) -> Option<&Station> {
        match self {
            Self::Idle => None,
            Self::Loading(s) | Self::Playing(s) | Self::Paused(s) => Some(s),
        }
    }
}

#[derive(Debug, Clone)]
pub enum PlaybackCommand {
    Start { seq: u64, station: Station },
    Pause,
    Stop,
}

pub struct PlaybackSession<O: AudioOutput> {
    output: O,
    state: PlaybackState,
    /// Last station whose start succeeded and that has not been paused or
    /// stopped since. Survives abandoned starts.
    last_confirmed: Option<Station>,
    start_timeout: Duration,
}

impl<O: AudioOutput> PlaybackSession<O> {
    pub fn new(output: O, start_timeout: Duration) -> Self {
        Self {
            output,
            state: PlaybackState::Idle,
            last_confirmed: None,
            start_timeout,
        }
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn is_playing(&self) -> bool {
        matches!(self.state, PlaybackState::Playing(_))
    }

    /// Stop whatever is attached, then load and start `station`.
    pub async fn start(&mut self, station: &Station) -> Result<(), PlaybackError> {
        let attached = !matches!(std::mem::take(&mut self.state), PlaybackState::Idle);
        if attached {
            if let Err(e) = self.output.stop().await {
                warn!("playback: stop before switch failed: {}", e);
            }
        }

        info!("playback: starting {} ({})", station.name, station.url);
        self.state = PlaybackState::Loading(station.clone());
        match self.attach_and_play(&station.url).await {
            Ok(()) => {
                self.state = PlaybackState::Playing(station.clone());
                self.last_confirmed = Some(station.clone());
                Ok(())
            }
            Err(e) => {
                warn!("playback: {} failed: {}", station.name, e);
                let _ = self.output.stop().await;
                self.state = PlaybackState::Idle;
                if let Some(prev) = self.last_confirmed.clone() {
                    self.restore(prev).await;
                }
                Err(e)
            }
        }
    }

    pub async fn pause(&mut self) -> Result<(), PlaybackError> {
        match std::mem::take(&mut self.state) {
            PlaybackState::Playing(s) => {
                self.last_confirmed = None;
                let result = self.output.pause().await;
                self.state = PlaybackState::Paused(s);
                result
            }
            PlaybackState::Loading(s) => {
                // An interrupted start has nothing to pause; drop the half-open source.
                debug!("playback: pause while loading {}, detaching", s.name);
                self.last_confirmed = None;
                self.output.stop().await
            }
            other => {
                self.state = other;
                Ok(())
            }
        }
    }

    pub async fn stop(&mut self) -> Result<(), PlaybackError> {
        self.state = PlaybackState::Idle;
        self.last_confirmed = None;
        self.output.stop().await
    }

    async fn attach_and_play(&mut self, url: &str) -> Result<(), PlaybackError> {
        let output = &mut self.output;
        let attempt = async {
            output.load(url).await?;
            output.play().await
        };
        match tokio::time::timeout(self.start_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(PlaybackError::Timeout(self.start_timeout)),
        }
    }

    /// `last_confirmed` is only dropped once the reload has really failed.
    async fn restore(&mut self, prev: Station) {
        info!("playback: restoring {}", prev.name);
        self.state = PlaybackState::Loading(prev.clone());
        match self.attach_and_play(&prev.url).await {
            Ok(()) => self.state = PlaybackState::Playing(prev),
            Err(e) => {
                warn!("playback: could not restore {}: {}", prev.name, e);
                self.last_confirmed = None;
                self.state = PlaybackState::Idle;
                let _ = self.output.stop().await;
            }
        }
    }

    /// Command loop. A `Start` that is still connecting is abandoned as soon
    /// as another command arrives; its outcome is never reported.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<PlaybackCommand>,
        events: mpsc::Sender<ControllerEvent>,
    ) {
        info!("playback: session started");
        let mut next = rx.recv().await;
        while let Some(cmd) = next.take() {
            match cmd {
                PlaybackCommand::Start { seq, station } => {
                    let outcome = {
                        let start = self.start(&station);
                        tokio::pin!(start);
                        tokio::select! {
                            res = &mut start => Some(res),
                            Some(cmd) = rx.recv() => {
                                debug!("playback: start of {} superseded", station.name);
                                next = Some(cmd);
                                None
                            }
                        }
                    };
                    let completion = match outcome {
                        Some(Ok(())) => Completion::PlaybackStarted { seq, station },
                        Some(Err(e)) => Completion::PlaybackFailed {
                            seq,
                            station,
                            reason: e.to_string(),
                            restored: self.is_playing(),
                        },
                        None => continue,
                    };
                    if events
                        .send(ControllerEvent::Completion(completion))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                PlaybackCommand::Pause => {
                    if let Err(e) = self.pause().await {
                        warn!("playback: pause failed: {}", e);
                    }
                }
                PlaybackCommand::Stop => {
                    if let Some(st) = self.state().station() {
                        debug!("playback: stopping {}", st.name);
                    }
                    if let Err(e) = self.stop().await {
                        warn!("playback: stop failed: {}", e);
                    }
                }
            }
            if next.is_none() {
                next = rx.recv().await;
            }
        }
        info!("playback: command channel closed, shutting down output");
        let _ = self.output.stop().await;
        self.output.shutdown().await;
    }
}


#[cfg(test)]
mod tests {
    use super::fake::FakeOutput;
    use super::*;

    fn station(id: &str) -> Station {
        Station {
            id: id.to_string(),
            name: format!("Radio {}", id.to_uppercase()),
            url: format!("http://{id}.example/stream"),
            ..Default::default()
        }
    }

    fn session(output: &FakeOutput) -> PlaybackSession<FakeOutput> {
        PlaybackSession::new(output.clone(), Duration::from_millis(200))
    }

    #[tokio::test]
    async fn switching_is_stop_then_start() {
        let out = FakeOutput::default();
        let mut s = session(&out);
        s.start(&station("a")).await.unwrap();
        s.start(&station("b")).await.unwrap();
        assert_eq!(s.state(), &PlaybackState::Playing(station("b")));
        let calls = out.calls();
        let tail: Vec<_> = calls.iter().rev().take(3).rev().cloned().collect();
        assert_eq!(tail, vec!["stop", "load http://b.example/stream", "play"]);
    }

    #[tokio::test]
    async fn failed_switch_restores_previous_station() {
        let out = FakeOutput::default();
        out.offline_url("http://x.example/stream");
        let mut s = session(&out);
        s.start(&station("a")).await.unwrap();

        let err = s.start(&station("x")).await.unwrap_err();
        assert!(matches!(err, PlaybackError::Offline(_)));
        assert_eq!(s.state(), &PlaybackState::Playing(station("a")));
        assert_eq!(
            out.calls().last().map(String::as_str),
            Some("play"),
            "previous stream should be playing again"
        );
    }

    #[tokio::test]
    async fn failed_start_from_idle_stays_idle() {
        let out = FakeOutput::default();
        out.offline_url("http://x.example/stream");
        let mut s = session(&out);
        assert!(s.start(&station("x")).await.is_err());
        assert_eq!(s.state(), &PlaybackState::Idle);
    }

    #[tokio::test]
    async fn abandoned_start_does_not_lose_last_station() {
        let out = FakeOutput::default();
        out.hanging_url("http://h.example/stream");
        out.offline_url("http://x.example/stream");
        let mut s = session(&out);
        s.start(&station("a")).await.unwrap();

        let hung = station("h");
        let abandoned = tokio::time::timeout(Duration::from_millis(50), s.start(&hung));
        assert!(abandoned.await.is_err());
        assert_eq!(s.state(), &PlaybackState::Loading(station("h")));

        assert!(s.start(&station("x")).await.is_err());
        assert_eq!(s.state(), &PlaybackState::Playing(station("a")));
        assert_eq!(out.calls().last().map(String::as_str), Some("play"));
    }

    #[tokio::test]
    async fn failed_restore_ends_idle() {
        let out = FakeOutput::default();
        out.offline_url("http://x.example/stream");
        let mut s = session(&out);
        s.start(&station("a")).await.unwrap();
        out.offline_url("http://a.example/stream");

        assert!(s.start(&station("x")).await.is_err());
        assert_eq!(s.state(), &PlaybackState::Idle);
        assert!(!s.is_playing());
        assert_eq!(out.calls().last().map(String::as_str), Some("stop"));

        // nothing left to fall back to
        out.offline.lock().unwrap().clear();
        out.offline_url("http://y.example/stream");
        let before = out.calls().len();
        assert!(s.start(&station("y")).await.is_err());
        assert!(!out.calls()[before..].iter().any(|c| c.contains("a.example")));
    }

    #[tokio::test]
    async fn paused_station_is_not_restored_after_failed_switch() {
        let out = FakeOutput::default();
        out.offline_url("http://x.example/stream");
        let mut s = session(&out);
        s.start(&station("a")).await.unwrap();
        s.pause().await.unwrap();

        assert!(s.start(&station("x")).await.is_err());
        assert_eq!(s.state(), &PlaybackState::Idle);
    }

    #[tokio::test]
    async fn hung_stream_times_out() {
        let out = FakeOutput::default();
        out.hanging_url("http://h.example/stream");
        let mut s = session(&out);
        let err = s.start(&station("h")).await.unwrap_err();
        assert!(matches!(err, PlaybackError::Timeout(_)));
        assert_eq!(s.state(), &PlaybackState::Idle);
    }

    #[tokio::test]
    async fn pause_only_applies_while_playing() {
        let out = FakeOutput::default();
        let mut s = session(&out);
        s.pause().await.unwrap();
        assert!(out.calls().is_empty());

        s.start(&station("a")).await.unwrap();
        s.pause().await.unwrap();
        assert_eq!(s.state(), &PlaybackState::Paused(station("a")));
        s.stop().await.unwrap();
        assert_eq!(s.state(), &PlaybackState::Idle);
        assert_eq!(out.calls().last().map(String::as_str), Some("stop"));
    }

    #[tokio::test]
    async fn pause_while_loading_detaches_source() {
        let out = FakeOutput::default();
        out.hanging_url("http://h.example/stream");
        let mut s = session(&out);
        s.start(&station("a")).await.unwrap();

        let hung = station("h");
        let abandoned = tokio::time::timeout(Duration::from_millis(50), s.start(&hung));
        assert!(abandoned.await.is_err());
        s.pause().await.unwrap();
        assert_eq!(s.state(), &PlaybackState::Idle);
        assert_eq!(out.calls().last().map(String::as_str), Some("stop"));

        // the paused-away station is not brought back by a later failure
        out.offline_url("http://x.example/stream");
        assert!(s.start(&station("x")).await.is_err());
        assert!(!s.is_playing());
    }

    #[tokio::test]
    async fn run_reports_failed_restore() {
        let out = FakeOutput::default();
        out.offline_url("http://x.example/stream");
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (ev_tx, mut ev_rx) = mpsc::channel(8);
        tokio::spawn(session(&out).run(cmd_rx, ev_tx));

        cmd_tx
            .send(PlaybackCommand::Start {
                seq: 1,
                station: station("a"),
            })
            .await
            .unwrap();
        assert!(matches!(
            ev_rx.recv().await,
            Some(ControllerEvent::Completion(Completion::PlaybackStarted { .. }))
        ));

        out.offline_url("http://a.example/stream");
        cmd_tx
            .send(PlaybackCommand::Start {
                seq: 2,
                station: station("x"),
            })
            .await
            .unwrap();
        match ev_rx.recv().await {
            Some(ControllerEvent::Completion(Completion::PlaybackFailed {
                seq, restored, ..
            })) => {
                assert_eq!(seq, 2);
                assert!(!restored);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn run_reports_start_outcomes() {
        let out = FakeOutput::default();
        out.offline_url("http://x.example/stream");
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (ev_tx, mut ev_rx) = mpsc::channel(8);
        tokio::spawn(session(&out).run(cmd_rx, ev_tx));

        cmd_tx
            .send(PlaybackCommand::Start {
                seq: 1,
                station: station("a"),
            })
            .await
            .unwrap();
        match ev_rx.recv().await {
            Some(ControllerEvent::Completion(Completion::PlaybackStarted { seq, station })) => {
                assert_eq!(seq, 1);
                assert_eq!(station.id, "a");
            }
            other => panic!("unexpected {:?}", other),
        }

        cmd_tx
            .send(PlaybackCommand::Start {
                seq: 2,
                station: station("x"),
            })
            .await
            .unwrap();
        match ev_rx.recv().await {
            Some(ControllerEvent::Completion(Completion::PlaybackFailed {
                seq, restored, ..
            })) => {
                assert_eq!(seq, 2);
                assert!(restored);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn stop_interrupts_a_connecting_start() {
        let out = FakeOutput::default();
        out.hanging_url("http://h.example/stream");
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (ev_tx, mut ev_rx) = mpsc::channel(8);
        let session = PlaybackSession::new(out.clone(), Duration::from_secs(30));
        tokio::spawn(session.run(cmd_rx, ev_tx));

        cmd_tx
            .send(PlaybackCommand::Start {
                seq: 1,
                station: station("h"),
            })
            .await
            .unwrap();
        cmd_tx.send(PlaybackCommand::Stop).await.unwrap();
        drop(cmd_tx);

        // channel closes without any completion for the abandoned start
        assert!(ev_rx.recv().await.is_none());
        assert_eq!(out.calls().last().map(String::as_str), Some("stop"));
    }
}
