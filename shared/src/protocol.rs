use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Protocol version - increment when making breaking changes.
pub const PROTOCOL_VERSION: u32 = 1;

/// Envelope for every frame in either direction.
///
/// `sender_id` names the connection the message originates from. Clients may
/// leave it out (or send 0) for their own messages; the server fills in the
/// client's id.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Packet {
    #[serde(default)]
    pub sender_id: u64,
    pub msg: Msg,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Msg {
    Chat(ChatMsg),
    Id(IdMsg),
    OkResponse,
    DenyResponse(DenyResponseMsg),
    LoginRequest(LoginRequestMsg),
    RegisterRequest(RegisterRequestMsg),
    Player(PlayerMsg),
    PlayerDirection(PlayerDirectionMsg),
    Spore(SporeMsg),
    SporesBatch(SporesBatchMsg),
    SporeConsumed(SporeConsumedMsg),
    PlayerConsumed(PlayerConsumedMsg),
    HiscoreBoardRequest,
    HiscoreBoard(HiscoreBoardMsg),
    FinishedBrowsingHiscores,
    SearchHiscore(SearchHiscoreMsg),
    Disconnect(DisconnectMsg),
}

impl Msg {
    /// Wire name of the message kind, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Chat(_) => "chat",
            Msg::Id(_) => "id",
            Msg::OkResponse => "ok_response",
            Msg::DenyResponse(_) => "deny_response",
            Msg::LoginRequest(_) => "login_request",
            Msg::RegisterRequest(_) => "register_request",
            Msg::Player(_) => "player",
            Msg::PlayerDirection(_) => "player_direction",
            Msg::Spore(_) => "spore",
            Msg::SporesBatch(_) => "spores_batch",
            Msg::SporeConsumed(_) => "spore_consumed",
            Msg::PlayerConsumed(_) => "player_consumed",
            Msg::HiscoreBoardRequest => "hiscore_board_request",
            Msg::HiscoreBoard(_) => "hiscore_board",
            Msg::FinishedBrowsingHiscores => "finished_browsing_hiscores",
            Msg::SearchHiscore(_) => "search_hiscore",
            Msg::Disconnect(_) => "disconnect",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ChatMsg {
    pub msg: String,
}

/// First message on every connection.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct IdMsg {
    pub id: u64,
    pub protocol_version: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DenyResponseMsg {
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LoginRequestMsg {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RegisterRequestMsg {
    pub username: String,
    pub password: String,
    /// 0xRRGGBB; 0 lets the server pick one
    #[serde(default)]
    pub color: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PlayerMsg {
    pub id: u64,
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub radius: f64,
    pub direction: f64,
    pub speed: f64,
    #[serde(default)]
    pub color: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PlayerDirectionMsg {
    /// Heading in radians
    pub direction: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SporeMsg {
    pub id: u64,
    pub x: f64,
    pub y: f64,
    pub radius: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SporesBatchMsg {
    pub spores: Vec<SporeMsg>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct SporeConsumedMsg {
    pub spore_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct PlayerConsumedMsg {
    pub player_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct HiscoreMsg {
    pub rank: u64,
    pub name: String,
    pub score: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct HiscoreBoardMsg {
    pub hiscores: Vec<HiscoreMsg>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SearchHiscoreMsg {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DisconnectMsg {
    pub reason: String,
}
