use super::{BrowsingHiscores, ClientState, InGame};
use crate::connection::{Connection, Inbound};
use crate::player::{color_from_id, Player};
use crate::protocol::{deny, id_msg, LoginRequestMsg, Msg, RegisterRequestMsg};
use crate::store::{PlayerRecord, Store, StoreError};
use std::sync::Arc;

const MAX_USERNAME_CHARS: usize = 20;

const INCORRECT_CREDENTIALS: &str = "Incorrect username or password";
const ALREADY_IN_GAME: &str = "Account is already in game";
const USER_EXISTS: &str = "User already exists";
const TRY_AGAIN_LATER: &str = "Something went wrong - please try again later";
const REQUEST_IN_PROGRESS: &str = "Please wait for the previous request to finish";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UsernameError {
    #[error("username must not be empty")]
    Empty,
    #[error("username must be at most {} characters", MAX_USERNAME_CHARS)]
    TooLong,
    #[error("username must not start or end with whitespace")]
    SurroundingWhitespace,
}

pub fn validate_username(username: &str) -> Result<(), UsernameError> {
    if username.is_empty() {
        return Err(UsernameError::Empty);
    }
    if username.chars().count() > MAX_USERNAME_CHARS {
        return Err(UsernameError::TooLong);
    }
    if username.trim() != username {
        return Err(UsernameError::SurroundingWhitespace);
    }
    Ok(())
}

/// What a login or registration check came to.
#[derive(Debug)]
pub enum AuthOutcome {
    /// The password matched this account
    LoggedIn(PlayerRecord),
    Registered,
    Denied(String),
}

/// Just connected: may log in, register or look at the hiscores.
#[derive(Debug, Default)]
pub struct Connected {
    /// A login or registration is being checked on the blocking pool
    pending: bool,
}

impl Connected {
    pub(super) fn on_enter(&mut self, conn: &Arc<Connection>) {
        conn.send(id_msg(conn.id()));
    }

    pub(super) fn handle_message(
        &mut self,
        conn: &Arc<Connection>,
        sender_id: u64,
        msg: Msg,
    ) -> Option<ClientState> {
        if sender_id != conn.id() {
            tracing::debug!(
                "Client {} [Connected]: ignoring {} from client {}",
                conn.id(),
                msg.kind(),
                sender_id
            );
            return None;
        }

        match msg {
            Msg::LoginRequest(_) | Msg::RegisterRequest(_) | Msg::HiscoreBoardRequest
                if self.pending =>
            {
                tracing::info!(
                    "Client {} [Connected]: {} while a request is in progress",
                    conn.id(),
                    msg.kind()
                );
                conn.send(deny(REQUEST_IN_PROGRESS));
                None
            }
            Msg::LoginRequest(req) => {
                self.check_credentials(conn, move |id, store, _| check_login(id, store, req));
                None
            }
            Msg::RegisterRequest(req) => {
                if let Err(e) = validate_username(&req.username) {
                    tracing::info!("Client {}: rejected username: {}", conn.id(), e);
                    conn.send(deny(format!("Invalid username: {}", e)));
                    return None;
                }
                self.check_credentials(conn, move |id, store, cost| {
                    check_register(id, store, cost, req)
                });
                None
            }
            Msg::HiscoreBoardRequest => Some(ClientState::BrowsingHiscores(BrowsingHiscores)),
            Msg::Chat(_)
            | Msg::Id(_)
            | Msg::OkResponse
            | Msg::DenyResponse(_)
            | Msg::Player(_)
            | Msg::PlayerDirection(_)
            | Msg::Spore(_)
            | Msg::SporesBatch(_)
            | Msg::SporeConsumed(_)
            | Msg::PlayerConsumed(_)
            | Msg::HiscoreBoard(_)
            | Msg::FinishedBrowsingHiscores
            | Msg::SearchHiscore(_)
            | Msg::Disconnect(_) => {
                tracing::debug!(
                    "Client {} [Connected]: unexpected {} message",
                    conn.id(),
                    msg.kind()
                );
                None
            }
        }
    }

    pub(super) fn handle_auth(
        &mut self,
        conn: &Arc<Connection>,
        outcome: AuthOutcome,
    ) -> Option<ClientState> {
        self.pending = false;
        match outcome {
            AuthOutcome::LoggedIn(record) => enter_game(conn, record),
            AuthOutcome::Registered => {
                conn.send(Msg::OkResponse);
                None
            }
            AuthOutcome::Denied(reason) => {
                conn.send(deny(reason));
                None
            }
        }
    }

    /// Run `work` on the blocking pool, away from this connection's state,
    /// and post what it found back to the connection's inbox.
    fn check_credentials<F>(&mut self, conn: &Arc<Connection>, work: F)
    where
        F: FnOnce(u64, &dyn Store, u32) -> AuthOutcome + Send + 'static,
    {
        self.pending = true;
        let conn = conn.clone();
        let store = conn.hub().store();
        let cost = conn.hub().config().bcrypt_cost;
        let id = conn.id();

        tokio::spawn(async move {
            let outcome =
                match tokio::task::spawn_blocking(move || work(id, store.as_ref(), cost)).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        tracing::error!("Client {}: credential check failed: {}", id, e);
                        AuthOutcome::Denied(TRY_AGAIN_LATER.to_string())
                    }
                };
            conn.post(Inbound::Auth(outcome));
        });
    }
}

fn denied(reason: &str) -> AuthOutcome {
    AuthOutcome::Denied(reason.to_string())
}

fn check_login(id: u64, store: &dyn Store, req: LoginRequestMsg) -> AuthOutcome {
    let username = req.username.to_lowercase();

    let user = match store.get_user_by_username(&username) {
        Ok(user) => user,
        Err(StoreError::NotFound) => {
            tracing::info!("Client {}: login for unknown user {}", id, username);
            return denied(INCORRECT_CREDENTIALS);
        }
        Err(e) => {
            tracing::error!("Error getting user {}: {}", username, e);
            return denied(TRY_AGAIN_LATER);
        }
    };

    match bcrypt::verify(&req.password, &user.password_hash) {
        Ok(true) => {}
        Ok(false) => {
            tracing::info!("Client {}: wrong password for {}", id, username);
            return denied(INCORRECT_CREDENTIALS);
        }
        Err(e) => {
            tracing::error!("Error checking password hash of {}: {}", username, e);
            return denied(TRY_AGAIN_LATER);
        }
    }

    match store.get_player_by_user_id(user.id) {
        Ok(record) => AuthOutcome::LoggedIn(record),
        Err(e) => {
            tracing::error!("Error getting player for user {}: {}", username, e);
            denied(TRY_AGAIN_LATER)
        }
    }
}

fn check_register(id: u64, store: &dyn Store, cost: u32, req: RegisterRequestMsg) -> AuthOutcome {
    let username = req.username.to_lowercase();

    match store.get_user_by_username(&username) {
        Ok(_) => {
            tracing::info!("Client {}: user {} already exists", id, username);
            return denied(USER_EXISTS);
        }
        Err(StoreError::NotFound) => {}
        Err(e) => {
            tracing::error!("Error looking up user {}: {}", username, e);
            return denied(TRY_AGAIN_LATER);
        }
    }

    let hash = match bcrypt::hash(&req.password, cost) {
        Ok(hash) => hash,
        Err(e) => {
            tracing::error!("Error hashing password of {}: {}", username, e);
            return denied(TRY_AGAIN_LATER);
        }
    };

    let user = match store.create_user(&username, &hash) {
        Ok(user) => user,
        Err(StoreError::AlreadyExists) => return denied(USER_EXISTS),
        Err(e) => {
            tracing::error!("Error creating user {}: {}", username, e);
            return denied(TRY_AGAIN_LATER);
        }
    };

    let color = match req.color & 0xFF_FFFF {
        0 => color_from_id(user.id.unsigned_abs()),
        color => color,
    };
    if let Err(e) = store.create_player(user.id, &req.username, color) {
        tracing::error!("Error creating player for {}: {}", username, e);
        return denied(TRY_AGAIN_LATER);
    }

    tracing::info!("Client {}: registered {}", id, username);
    AuthOutcome::Registered
}

/// Last step of a login, on the connection's own task: one live player per
/// account.
fn enter_game(conn: &Arc<Connection>, record: PlayerRecord) -> Option<ClientState> {
    if conn
        .objects()
        .players
        .any(|_, player| player.lock().db_id == record.id)
    {
        tracing::info!("Client {}: {} is already in game", conn.id(), record.name);
        conn.send(deny(ALREADY_IN_GAME));
        return None;
    }

    tracing::info!("Client {}: {} logged in", conn.id(), record.name);
    conn.send(Msg::OkResponse);
    Some(ClientState::InGame(InGame::new(Player {
        name: record.name,
        best_score: record.best_score,
        db_id: record.id,
        color: record.color,
        ..Default::default()
    })))
}
