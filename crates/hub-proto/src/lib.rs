//! Shared types and logic for the music-hub client: the backend data model,
//! configuration, the HTTP API client and the session state machine.

pub mod api;
pub mod config;
pub mod model;
pub mod platform;
pub mod session;
