//! 对局服务共享协议库
//!
//! 包含:
//! - 执棋颜色、用时、对局类型、等级分
//! - 消息类型定义 (ClientMessage, ServerMessage) 与状态快照
//! - 传输层抽象 (Connector, Connection, Listener traits)
//! - 帧编解码

mod constants;
mod error;
mod message;
mod tempo;
mod transport;

pub use constants::*;
pub use error::{ProtocolError, Result, TempoError};
pub use message::{
    Ack, ClientMessage, ClockView, ConnectionId, ErrorCode, GameSnapshot, Invitation, InvitedBy,
    MatchId, MatchSummary, MoveDetail, MoveRequest, PlayerId, SeatView, ServerMessage,
};
pub use tempo::{Color, GameType, Ratings, Tempo};
pub use transport::{
    Connection, Connector, FrameReader, FrameWriter, Listener, TcpConnection, TcpConnector,
    TcpListener,
};
