//! 消息类型定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tempo::{Color, GameType, Tempo};

/// 玩家 ID（账号 ID 或游客 ID）
pub type PlayerId = String;

/// 对局 ID
pub type MatchId = String;

/// 连接 ID（服务端分配）
pub type ConnectionId = u64;

/// 走子请求，坐标使用代数记法（"e2"），升变为小写棋子字母
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRequest {
    pub from: String,
    pub to: String,
    pub promotion: Option<char>,
}

impl MoveRequest {
    pub fn new(from: &str, to: &str) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            promotion: None,
        }
    }

    pub fn with_promotion(mut self, role: char) -> Self {
        self.promotion = Some(role);
        self
    }

    /// UCI 形式（"e7e8q"）
    pub fn to_uci(&self) -> String {
        match self.promotion {
            Some(p) => format!("{}{}{}", self.from, self.to, p.to_ascii_lowercase()),
            None => format!("{}{}", self.from, self.to),
        }
    }
}

/// 一步棋的详细信息（合法着法列表与 moveMade 事件共用）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveDetail {
    pub color: Color,
    pub from: String,
    pub to: String,
    /// 走动棋子（小写字母：p n b r q k）
    pub piece: char,
    /// 被吃棋子，供客户端播放音效
    pub captured: Option<char>,
    pub promotion: Option<char>,
    pub san: String,
}

/// 座位的对外视图
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatView {
    pub id: PlayerId,
    pub username: String,
    pub rating: Option<u32>,
    pub color: Color,
    pub connected: bool,
    pub guest: bool,
}

/// 双方剩余时间（秒）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockView {
    pub owner: u32,
    pub opponent: u32,
}

/// 对局完整状态快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSnapshot {
    pub match_id: MatchId,
    #[serde(rename = "type")]
    pub game_type: GameType,
    pub tempo: Tempo,
    pub ranked: bool,
    pub private_game: bool,
    pub owner: SeatView,
    pub opponent: Option<SeatView>,
    pub fen: String,
    pub pgn: String,
    pub has_started: bool,
    pub game_over: bool,
    pub winner: Option<Color>,
    pub turn: Color,
    pub check: bool,
    pub checkmate: bool,
    pub pos_of_king_in_check: Option<String>,
    pub stalemate: bool,
    pub insufficient_material: bool,
    pub threefold_repetition: bool,
    pub fifty_move_rule: bool,
    pub draw: bool,
    pub valid_moves: Vec<MoveDetail>,
    pub last_move: Option<MoveDetail>,
    pub ended_by_timeout: bool,
    pub ended_by_draw: bool,
    pub ended_by_checkmate: bool,
    pub ended_by_resignation: bool,
    pub ended_by_disconnection: bool,
    pub who_resigned: Option<PlayerId>,
    pub who_disconnected: Option<PlayerId>,
    pub draw_offered_by: Option<PlayerId>,
    pub rematch_offered_by: Option<PlayerId>,
    pub clock: ClockView,
}

impl GameSnapshot {
    /// 已设置的终局标志数量（至多为 1）
    pub fn terminal_flag_count(&self) -> usize {
        [
            self.ended_by_timeout,
            self.ended_by_draw,
            self.ended_by_checkmate,
            self.ended_by_resignation,
            self.ended_by_disconnection,
        ]
        .iter()
        .filter(|f| **f)
        .count()
    }
}

/// 对局列表条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchSummary {
    pub match_id: MatchId,
    pub tempo: Tempo,
    pub ranked: bool,
    #[serde(rename = "type")]
    pub game_type: GameType,
    pub owner: SeatView,
    pub opponent: Option<SeatView>,
    pub created_at: DateTime<Utc>,
}

/// 邀请发起人
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvitedBy {
    pub id: PlayerId,
    pub username: String,
}

/// 私人对局邀请
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invitation {
    pub match_id: MatchId,
    pub tempo: Tempo,
    #[serde(rename = "type")]
    pub game_type: GameType,
    /// 受邀者将执的颜色
    pub color: Color,
    pub invited_by: InvitedBy,
    pub ranked: bool,
}

/// 命令应答
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Ack {
    /// 创建/加入成功，返回对局 ID
    MatchId(MatchId),
    /// 成功与否
    Success(bool),
    /// 已处理
    Done,
}

/// 客户端发送给服务端的消息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientMessage {
    // === 身份认证 ===
    /// 握手：携带账号令牌或游客 ID，均为空时服务端分配游客 ID
    Hello {
        token: Option<String>,
        guest_id: Option<PlayerId>,
    },

    // === 对局管理 ===
    /// 创建对局
    CreateGame {
        tempo: String,
        color: Color,
        ranked: bool,
        invited_player_id: Option<PlayerId>,
    },
    /// 加入对局
    JoinGame { match_id: MatchId },
    /// 回应私人邀请
    InvitationResponse {
        invitation_sender_id: PlayerId,
        match_id: MatchId,
        is_accepted: bool,
    },
    /// 离开对局
    RemovePlayerFromTable { match_id: MatchId },
    /// 断线后重新进入对局
    ReconnectToGame { match_id: MatchId },
    /// 请求对局状态
    GetGameState { match_id: MatchId },
    /// 公开对局列表
    RequestGamesList,
    /// 自己所在的对局
    GetPlayerGames,

    // === 对局操作 ===
    /// 走棋
    MakeMove { match_id: MatchId, mv: MoveRequest },
    /// 认输
    Resign { match_id: MatchId },
    /// 提和
    OfferDraw { match_id: MatchId },
    /// 回应提和
    OfferDrawResponse { match_id: MatchId, is_accepted: bool },
    /// 请求再战
    OfferRematch { match_id: MatchId },
    /// 回应再战
    OfferRematchResponse { match_id: MatchId, is_accepted: bool },

    // === 心跳 ===
    Ping,
}

impl ClientMessage {
    /// 日志用的命令名
    pub fn name(&self) -> &'static str {
        match self {
            ClientMessage::Hello { .. } => "hello",
            ClientMessage::CreateGame { .. } => "createGame",
            ClientMessage::JoinGame { .. } => "joinGame",
            ClientMessage::InvitationResponse { .. } => "invitationResponse",
            ClientMessage::RemovePlayerFromTable { .. } => "removePlayerFromTable",
            ClientMessage::ReconnectToGame { .. } => "reconnectToGame",
            ClientMessage::GetGameState { .. } => "getGameState",
            ClientMessage::RequestGamesList => "requestGamesList",
            ClientMessage::GetPlayerGames => "getPlayerGames",
            ClientMessage::MakeMove { .. } => "makeMove",
            ClientMessage::Resign { .. } => "resign",
            ClientMessage::OfferDraw { .. } => "offerDraw",
            ClientMessage::OfferDrawResponse { .. } => "offerDrawResponse",
            ClientMessage::OfferRematch { .. } => "offerRematch",
            ClientMessage::OfferRematchResponse { .. } => "offerRematchResponse",
            ClientMessage::Ping => "ping",
        }
    }
}

/// 服务端发送给客户端的消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    // === 连接 ===
    /// 握手完成
    Connected { id: PlayerId, username: String },
    /// 分配了新的游客 ID，客户端应保存以便重连
    NewGuestId(PlayerId),
    /// 命令应答
    Ack(Ack),

    // === 对局事件 ===
    GameState(Box<GameSnapshot>),
    TimerUpdate(ClockView),
    MoveMade(MoveDetail),
    GamesList(Vec<MatchSummary>),
    PlayerGames(Vec<MatchSummary>),
    Invitation(Invitation),
    InvitationDeclined,
    GameRemoved { match_id: MatchId },

    // === 心跳 ===
    Pong,

    // === 错误 ===
    Error { code: ErrorCode, message: String },
}

/// 错误码定义
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum ErrorCode {
    // === 对局相关 (1xx) ===
    /// 对局不存在
    MatchNotFound = 100,
    /// 对局已满
    MatchFull = 101,
    /// 不能加入自己创建的对局
    OwnMatch = 102,
    /// 已在其他对局中
    AlreadyInMatch = 104,
    /// 不是受邀者
    NotInvited = 105,
    /// 服务器对局数已满
    CapacityExceeded = 106,

    // === 操作相关 (2xx) ===
    /// 用时格式错误
    InvalidTempo = 200,
    /// 无法认输
    CannotResign = 201,

    // === 玩家相关 (3xx) ===
    /// 未完成身份认证
    NotIdentified = 300,
    /// 玩家不在线
    PlayerOffline = 301,
    /// 令牌无效或游客 ID 与注册账号冲突
    AuthenticationFailed = 302,

    // === 系统相关 (5xx) ===
    /// 内部错误
    InternalError = 500,
    /// 超时
    Timeout = 501,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
