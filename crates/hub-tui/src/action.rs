//! Action enum: everything a component can ask the App to do.

use hub_proto::session::Intent;

use crate::widgets::status_bar::InputMode;

/// Unique identifier for a focusable component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentId {
    Header,
    CountryList,
    StationList,
    NowPlaying,
}

/// Components produce Actions; the App dispatches them.
#[derive(Debug, Clone)]
pub enum Action {
    /// Forward to the controller.
    Session(Intent),
    /// A text input opened or closed.
    SetInputMode(InputMode),
    FocusNext,
    FocusPane(ComponentId),
    DismissAlert,
    Quit,
}
