//! Per-connection state machine.
//!
//! A connection is always in exactly one of these states, or in none while
//! it is being set up or torn down. Handlers never switch state themselves:
//! they return the state to move to and the connection applies it.

mod connected;
mod hiscores;
mod in_game;

pub use connected::{validate_username, AuthOutcome, Connected, UsernameError};
pub use hiscores::BrowsingHiscores;
pub use in_game::InGame;

use crate::connection::Connection;
use crate::protocol::Msg;
use std::sync::Arc;

pub enum ClientState {
    Connected(Connected),
    InGame(InGame),
    BrowsingHiscores(BrowsingHiscores),
}

impl ClientState {
    pub fn name(&self) -> &'static str {
        match self {
            ClientState::Connected(_) => "Connected",
            ClientState::InGame(_) => "InGame",
            ClientState::BrowsingHiscores(_) => "BrowsingHiscores",
        }
    }

    pub(crate) fn on_enter(&mut self, conn: &Arc<Connection>) {
        match self {
            ClientState::Connected(state) => state.on_enter(conn),
            ClientState::InGame(state) => state.on_enter(conn),
            ClientState::BrowsingHiscores(state) => state.on_enter(conn),
        }
    }

    /// Handle one message, which `sender_id` either sent over its own
    /// socket or had relayed here. Returns the state to switch to, if any.
    pub(crate) fn handle_message(
        &mut self,
        conn: &Arc<Connection>,
        sender_id: u64,
        msg: Msg,
    ) -> Option<ClientState> {
        match self {
            ClientState::Connected(state) => state.handle_message(conn, sender_id, msg),
            ClientState::InGame(state) => state.handle_message(conn, sender_id, msg),
            ClientState::BrowsingHiscores(state) => state.handle_message(conn, sender_id, msg),
        }
    }

    /// Finish a login or registration whose credential check has completed.
    pub(crate) fn handle_auth(
        &mut self,
        conn: &Arc<Connection>,
        outcome: AuthOutcome,
    ) -> Option<ClientState> {
        match self {
            ClientState::Connected(state) => state.handle_auth(conn, outcome),
            ClientState::InGame(_) | ClientState::BrowsingHiscores(_) => {
                tracing::debug!(
                    "Client {} [{}]: dropping credential result",
                    conn.id(),
                    self.name()
                );
                None
            }
        }
    }

    pub(crate) fn on_exit(&mut self, conn: &Arc<Connection>) {
        match self {
            ClientState::Connected(_) | ClientState::BrowsingHiscores(_) => {}
            ClientState::InGame(state) => state.on_exit(conn),
        }
    }
}
