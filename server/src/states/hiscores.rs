use super::{ClientState, Connected};
use crate::connection::Connection;
use crate::protocol::{deny, hiscore_board, HiscoreMsg, Msg};
use crate::store::StoreError;
use std::sync::Arc;

/// Rows per page of the board
const PAGE_SIZE: u64 = 10;

const TOP_SCORES_FAILED: &str = "Failed to get top scores - please try again later";
const NO_SUCH_PLAYER: &str = "No player found with that name";
const UNRANKED: &str = "Player is unranked";

/// Looking at the leaderboard.
#[derive(Debug, Default)]
pub struct BrowsingHiscores;

impl BrowsingHiscores {
    pub(super) fn on_enter(&mut self, conn: &Arc<Connection>) {
        send_scores(conn, PAGE_SIZE, 0);
    }

    pub(super) fn handle_message(
        &mut self,
        conn: &Arc<Connection>,
        sender_id: u64,
        msg: Msg,
    ) -> Option<ClientState> {
        if sender_id != conn.id() {
            tracing::debug!(
                "Client {} [BrowsingHiscores]: ignoring {} from client {}",
                conn.id(),
                msg.kind(),
                sender_id
            );
            return None;
        }

        match msg {
            Msg::SearchHiscore(req) => {
                search(conn, &req.name);
                None
            }
            Msg::FinishedBrowsingHiscores => Some(ClientState::Connected(Connected::default())),
            Msg::Chat(_)
            | Msg::Id(_)
            | Msg::OkResponse
            | Msg::DenyResponse(_)
            | Msg::LoginRequest(_)
            | Msg::RegisterRequest(_)
            | Msg::Player(_)
            | Msg::PlayerDirection(_)
            | Msg::Spore(_)
            | Msg::SporesBatch(_)
            | Msg::SporeConsumed(_)
            | Msg::PlayerConsumed(_)
            | Msg::HiscoreBoardRequest
            | Msg::HiscoreBoard(_)
            | Msg::Disconnect(_) => {
                tracing::debug!(
                    "Client {} [BrowsingHiscores]: unexpected {} message",
                    conn.id(),
                    msg.kind()
                );
                None
            }
        }
    }
}

/// Send the page of `limit` rows starting after `offset` ranked players.
fn send_scores(conn: &Connection, limit: u64, offset: u64) {
    match conn.store().get_top_scores(limit, offset) {
        Ok(rows) => {
            let hiscores = rows
                .into_iter()
                .enumerate()
                .map(|(i, row)| HiscoreMsg {
                    rank: offset + i as u64 + 1,
                    name: row.name,
                    score: row.best_score.max(0) as u64,
                })
                .collect();
            conn.send(hiscore_board(hiscores));
        }
        Err(e) => {
            tracing::error!(
                "Error getting {} scores from offset {}: {}",
                limit,
                offset,
                e
            );
            conn.send(deny(TOP_SCORES_FAILED));
        }
    }
}

/// Show the page around the named player's rank.
fn search(conn: &Connection, name: &str) {
    let store = conn.store();

    let record = match store.get_player_by_name(name) {
        Ok(record) => record,
        Err(StoreError::NotFound) => {
            conn.send(deny(NO_SUCH_PLAYER));
            return;
        }
        Err(e) => {
            tracing::error!("Error searching for player {}: {}", name, e);
            conn.send(deny(TOP_SCORES_FAILED));
            return;
        }
    };

    let rank = match store.get_player_rank(record.id) {
        Ok(rank) => rank,
        Err(StoreError::NotFound) => {
            conn.send(deny(UNRANKED));
            return;
        }
        Err(e) => {
            tracing::error!("Error getting rank of {}: {}", record.name, e);
            conn.send(deny(TOP_SCORES_FAILED));
            return;
        }
    };

    send_scores(conn, PAGE_SIZE, rank.saturating_sub(PAGE_SIZE / 2));
}
