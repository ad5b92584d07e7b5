//! AppState: shared read-only data passed to all components during render/event.
//!
//! Components read this, but never mutate it. The App event loop is the only
//! thing that writes to AppState.

use hub_proto::session::SessionState;

use crate::widgets::status_bar::InputMode;

#[derive(Debug, Clone)]
pub struct AppState {
    /// Latest snapshot from the session store.
    pub session: SessionState,
    pub input_mode: InputMode,
    /// Blocking alert; while set it captures all keys.
    pub alert: Option<String>,
    /// Last status line from the controller (health check etc).
    pub last_log: Option<String>,
}

impl AppState {
    pub fn new(session: SessionState) -> Self {
        Self {
            session,
            input_mode: InputMode::Normal,
            alert: None,
            last_log: None,
        }
    }
}
