/// mpv IPC driver with separated reader/writer tasks, and the `AudioOutput`
/// implementation that plays stations through it.
///
/// ```text
///   MpvDriver::spawn_and_connect()
///         │
///         ├── writer_task   ← receives PendingRequest via mpsc, serialises → socket
///         └── reader_task   ← reads JSON lines from socket
///                                ├── response (has request_id) → matched oneshot::Sender
///                                └── event / property-change   → event_tx channel
/// ```
///
/// Platform notes:
/// - Unix:   Unix domain sockets
/// - Windows: Named pipes  \\.\pipe\<name>
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use hub_proto::platform;

use crate::playback::{AudioOutput, PlaybackError};

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

/// observe_property id for `core-idle`.
pub const OBS_CORE_IDLE: u64 = 1;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

struct PendingRequest {
    req_id: u64,
    payload: String, // serialised JSON line (already has '\n')
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// An mpv event / property-change that arrived unsolicited (no request_id).
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

impl MpvEvent {
    /// Returns `Some((obs_id, data))` if this is a property-change event.
    pub fn as_property_change(&self) -> Option<(u64, &Value)> {
        if self.raw.get("event")?.as_str()? == "property-change" {
            let id = self.raw.get("id")?.as_u64()?;
            let data = self.raw.get("data").unwrap_or(&Value::Null);
            Some((id, data))
        } else {
            None
        }
    }

    /// Returns the event name, e.g. "end-file", "start-file", "file-loaded".
    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }

    /// `reason` of an end-file event ("eof", "stop", "error", ...).
    pub fn end_reason(&self) -> Option<&str> {
        self.raw.get("reason")?.as_str()
    }
}

/// Cloneable handle to the mpv writer task.
#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
}

impl MpvHandle {
    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg)?;
        raw.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                req_id,
                payload: raw,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(tokio::time::Duration::from_secs(5), reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub async fn load_stream(&self, url: &str, volume: f32) -> anyhow::Result<()> {
        debug!("mpv: loadfile url={}", url);
        self.send(json!(["loadfile", url])).await?;
        let vol_pct = (volume * 100.0).clamp(0.0, 100.0);
        let _ = self.send(json!(["set_property", "volume", vol_pct])).await;
        Ok(())
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        self.send(json!(["stop"])).await?;
        Ok(())
    }

    pub async fn set_pause(&self, paused: bool) -> anyhow::Result<()> {
        self.send(json!(["set_property", "pause", paused])).await?;
        Ok(())
    }

    /// Must be called after every fresh connection.
    pub async fn observe_core_idle(&self) {
        match self
            .send(json!(["observe_property", OBS_CORE_IDLE, "core-idle"]))
            .await
        {
            Ok(_) => debug!("mpv: observing core-idle"),
            Err(e) => warn!("mpv: observe_property core-idle failed: {}", e),
        }
    }
}

/// Owns the mpv child process.
pub struct MpvDriver {
    pub socket_name: String,
    process: Option<tokio::process::Child>,
    pub volume: f32,
}

impl MpvDriver {
    pub fn new(volume: f32) -> Self {
        Self {
            socket_name: platform::mpv_socket_name(),
            process: None,
            volume,
        }
    }

    pub fn process_alive(&mut self) -> bool {
        let Some(child) = self.process.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                match status.code() {
                    Some(code) => warn!("mpv process exited with code: {}", code),
                    None => warn!("mpv process terminated by signal"),
                }
                false
            }
            Err(e) => {
                warn!("mpv process_alive check failed: {}", e);
                false
            }
        }
    }

    pub async fn kill(&mut self) {
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }
        #[cfg(unix)]
        {
            let _ = tokio::fs::remove_file(&self.socket_name).await;
        }
    }

    fn spawn_process(&mut self) -> anyhow::Result<()> {
        let mpv_binary =
            platform::find_mpv_binary().ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;

        let vol_arg = format!(
            "--volume={}",
            (self.volume * 100.0).clamp(0.0, 100.0).round() as i64
        );
        let ipc_arg = platform::mpv_socket_arg(&self.socket_name);

        let data_dir = platform::data_dir();
        std::fs::create_dir_all(&data_dir)?;
        let stderr_path = data_dir.join("mpv-stderr.log");
        let stderr_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&stderr_path)?;

        info!("mpv: spawning {:?}", mpv_binary);
        let child = tokio::process::Command::new(&mpv_binary)
            .arg("--no-video")
            .arg("--idle=yes")
            .arg(&ipc_arg)
            .arg("--quiet")
            .arg(&vol_arg)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(stderr_file)
            .kill_on_drop(true)
            .spawn()?;
        info!("mpv: spawned process with pid {:?}", child.id());
        self.process = Some(child);
        Ok(())
    }

    #[cfg(unix)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.kill().await;
        self.spawn_process()?;

        let socket_path = std::path::PathBuf::from(&self.socket_name);
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if socket_path.exists() {
                break;
            }
        }
        if !socket_path.exists() {
            anyhow::bail!("mpv IPC socket did not appear");
        }

        let stream = UnixStream::connect(&socket_path).await?;
        info!("mpv: connected to IPC socket");
        Ok(start_io_tasks(stream, event_tx))
    }

    #[cfg(windows)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.kill().await;
        self.spawn_process()?;

        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if let Ok(client) = ClientOptions::new().open(&pipe_path) {
                info!("mpv: connected to named pipe");
                return Ok(start_io_tasks(client, event_tx));
            }
        }
        anyhow::bail!("mpv named pipe did not appear")
    }
}

fn start_io_tasks<S>(stream: S, event_tx: mpsc::Sender<MpvEvent>) -> MpvHandle
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let reader = BufReader::new(read_half);

    // req_id → reply channel; writer inserts, reader resolves.
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);

    tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(reader, pending, event_tx));

    MpvHandle { tx: cmd_tx }
}

async fn fail_pending(pending: &PendingMap, why: &str) {
    let mut map = pending.lock().await;
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(anyhow::anyhow!("{}", why)));
    }
}

async fn reader_task<R>(
    mut reader: BufReader<R>,
    pending: PendingMap,
    event_tx: mpsc::Sender<MpvEvent>,
) where
    R: AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                fail_pending(&pending, "mpv IPC connection closed").await;
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(|v| v.as_u64()) {
                    let mut map = pending.lock().await;
                    if let Some(tx) = map.remove(&req_id) {
                        let result = if val["error"].as_str() == Some("success") {
                            Ok(val)
                        } else {
                            let err = val["error"].as_str().unwrap_or("unknown error").to_string();
                            debug!("mpv reader: response req={} err={}", req_id, err);
                            Err(anyhow::anyhow!("mpv error: {}", err))
                        };
                        let _ = tx.send(result);
                    } else {
                        debug!("mpv reader: response for unknown req={}", req_id);
                    }
                } else {
                    debug!("mpv reader: event {}", trimmed);
                    // Never wait on the event consumer: replies queued behind
                    // this line would stall with it.
                    if let Err(TrySendError::Full(_)) = event_tx.try_send(MpvEvent { raw: val }) {
                        debug!("mpv reader: event queue full, dropping event");
                    }
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                fail_pending(&pending, &format!("mpv IPC read error: {}", e)).await;
                break;
            }
        }
    }
}

async fn writer_task<W>(
    mut writer: W,
    mut rx: mpsc::Receiver<PendingRequest>,
    pending: PendingMap,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Register before writing so the reader can always match the reply.
        pending.lock().await.insert(req.req_id, req.reply);
        debug!("mpv writer: send req={} payload={}", req.req_id, req.payload.trim());
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            if let Some(tx) = pending.lock().await.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

/// Wait until mpv reports that the freshly loaded file is producing audio.
///
/// Events from before `start-file` belong to the previous source (the
/// `end-file` of a stop, for instance) and are ignored.
pub async fn await_playback(events: &mut mpsc::Receiver<MpvEvent>) -> Result<(), PlaybackError> {
    let mut started = false;
    while let Some(event) = events.recv().await {
        if let Some((OBS_CORE_IDLE, data)) = event.as_property_change() {
            if started && data.as_bool() == Some(false) {
                return Ok(());
            }
            continue;
        }
        match event.event_name() {
            Some("start-file") => started = true,
            Some("playback-restart") if started => return Ok(()),
            Some("end-file") if started => {
                let reason = event.end_reason().unwrap_or("unknown").to_string();
                let detail = event
                    .raw
                    .get("file_error")
                    .and_then(|v| v.as_str())
                    .map(|e| format!("{reason}: {e}"))
                    .unwrap_or(reason);
                return Err(PlaybackError::Offline(detail));
            }
            _ => {}
        }
    }
    Err(PlaybackError::Unavailable("mpv event stream closed".to_string()))
}

/// `AudioOutput` backed by a lazily spawned mpv process.
pub struct MpvOutput {
    driver: MpvDriver,
    handle: Option<MpvHandle>,
    events: Option<mpsc::Receiver<MpvEvent>>,
    current_url: Option<String>,
}

impl MpvOutput {
    pub fn new(volume: f32) -> Self {
        Self {
            driver: MpvDriver::new(volume),
            handle: None,
            events: None,
            current_url: None,
        }
    }

    /// Return a live handle, (re)spawning mpv when it is missing or dead.
    async fn connected(&mut self) -> Result<MpvHandle, PlaybackError> {
        if let Some(handle) = &self.handle {
            if !handle.is_closed() && self.driver.process_alive() {
                return Ok(handle.clone());
            }
            warn!("mpv: connection lost, respawning");
        }
        let (event_tx, event_rx) = mpsc::channel(256);
        let handle = self
            .driver
            .spawn_and_connect(event_tx)
            .await
            .map_err(|e| PlaybackError::Unavailable(e.to_string()))?;
        handle.observe_core_idle().await;
        self.handle = Some(handle.clone());
        self.events = Some(event_rx);
        Ok(handle)
    }
}

#[async_trait]
impl AudioOutput for MpvOutput {
    async fn load(&mut self, url: &str) -> Result<(), PlaybackError> {
        let handle = self.connected().await?;
        if let Some(events) = self.events.as_mut() {
            while events.try_recv().is_ok() {}
        }
        handle
            .load_stream(url, self.driver.volume)
            .await
            .map_err(|e| PlaybackError::Load {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        self.current_url = Some(url.to_string());
        Ok(())
    }

    async fn play(&mut self) -> Result<(), PlaybackError> {
        let handle = self
            .handle
            .clone()
            .ok_or_else(|| PlaybackError::Unavailable("mpv not running".to_string()))?;
        if let Err(e) = handle.set_pause(false).await {
            warn!("mpv: unpause failed: {}", e);
        }
        let events = self
            .events
            .as_mut()
            .ok_or_else(|| PlaybackError::Unavailable("mpv event stream missing".to_string()))?;
        await_playback(events).await?;
        info!(
            "mpv: audio flowing for {}",
            self.current_url.as_deref().unwrap_or("?")
        );
        Ok(())
    }

    async fn pause(&mut self) -> Result<(), PlaybackError> {
        match &self.handle {
            Some(handle) => handle
                .set_pause(true)
                .await
                .map_err(|e| PlaybackError::Unavailable(e.to_string())),
            None => Ok(()),
        }
    }

    async fn stop(&mut self) -> Result<(), PlaybackError> {
        self.current_url = None;
        match &self.handle {
            Some(handle) => handle
                .stop()
                .await
                .map_err(|e| PlaybackError::Unavailable(e.to_string())),
            None => Ok(()),
        }
    }

    async fn shutdown(&mut self) {
        self.handle = None;
        self.events = None;
        self.driver.kill().await;
        info!("mpv: shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    fn event(raw: Value) -> MpvEvent {
        MpvEvent { raw }
    }

    #[test]
    fn parses_property_change() {
        let ev = event(json!({
            "event": "property-change",
            "id": 1,
            "name": "core-idle",
            "data": false,
        }));
        let (id, data) = ev.as_property_change().unwrap();
        assert_eq!(id, OBS_CORE_IDLE);
        assert_eq!(data, &json!(false));
        let end = event(json!({"event": "end-file", "reason": "error"}));
        assert_eq!(end.end_reason(), Some("error"));
    }

    #[tokio::test]
    async fn stale_end_file_is_ignored_until_start() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.send(event(json!({"event": "end-file", "reason": "stop"}))).await.unwrap();
        tx.send(event(json!({"event": "start-file"}))).await.unwrap();
        tx.send(event(json!({"event": "property-change", "id": 1, "data": false})))
            .await
            .unwrap();
        assert!(await_playback(&mut rx).await.is_ok());
    }

    #[tokio::test]
    async fn end_file_after_start_is_offline() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.send(event(json!({"event": "start-file"}))).await.unwrap();
        let failed = json!({
            "event": "end-file",
            "reason": "error",
            "file_error": "loading failed",
        });
        tx.send(event(failed)).await.unwrap();
        match await_playback(&mut rx).await {
            Err(PlaybackError::Offline(detail)) => assert_eq!(detail, "error: loading failed"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn closed_stream_is_unavailable() {
        let (tx, mut rx) = mpsc::channel::<MpvEvent>(1);
        drop(tx);
        assert!(matches!(
            await_playback(&mut rx).await,
            Err(PlaybackError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn routes_replies_and_events_over_ipc() {
        let (client, server) = tokio::io::duplex(4096);
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let handle = start_io_tasks(client, event_tx);

        // Minimal mpv: push one event, then answer each request.
        tokio::spawn(async move {
            let (read_half, mut write_half) = tokio::io::split(server);
            let mut lines = BufReader::new(read_half).lines();
            write_half
                .write_all(b"{\"event\":\"start-file\"}\n")
                .await
                .unwrap();
            while let Ok(Some(line)) = lines.next_line().await {
                let req: Value = serde_json::from_str(&line).unwrap();
                let reply = json!({
                    "request_id": req["request_id"],
                    "error": "success",
                    "data": req["command"][0],
                });
                let mut out = reply.to_string();
                out.push('\n');
                write_half.write_all(out.as_bytes()).await.unwrap();
            }
        });

        let resp = handle.send(json!(["get_property", "volume"])).await.unwrap();
        assert_eq!(resp["data"], "get_property");
        let ev = event_rx.recv().await.unwrap();
        assert_eq!(ev.event_name(), Some("start-file"));
    }

    #[tokio::test]
    async fn unread_events_do_not_block_replies() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (event_tx, _event_rx) = mpsc::channel(4);
        let handle = start_io_tasks(client, event_tx);

        // Noisy mpv: a burst of events nobody consumes ahead of every reply.
        tokio::spawn(async move {
            let (read_half, mut write_half) = tokio::io::split(server);
            let mut lines = BufReader::new(read_half).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let req: Value = serde_json::from_str(&line).unwrap();
                let mut out = String::new();
                for _ in 0..300 {
                    out.push_str("{\"event\":\"property-change\",\"id\":1,\"data\":true}\n");
                }
                let reply = json!({"request_id": req["request_id"], "error": "success"});
                out.push_str(&reply.to_string());
                out.push('\n');
                write_half.write_all(out.as_bytes()).await.unwrap();
            }
        });

        let reply = tokio::time::timeout(std::time::Duration::from_secs(2), handle.set_pause(true));
        assert!(reply.await.expect("reply stalled behind events").is_ok());
    }
}
