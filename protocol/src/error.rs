//! 错误类型定义

use thiserror::Error;

/// 用时格式错误（期望 "<分钟>+<加秒>"）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TempoError {
    /// 缺少 '+' 分隔符
    #[error("Invalid tempo {0:?}: expected \"<minutes>+<increment>\"")]
    MissingSeparator(String),

    /// 分钟或加秒不是非负整数
    #[error("Invalid tempo {0:?}: minutes and increment must be non-negative integers")]
    NotANumber(String),

    /// 基础时间为零
    #[error("Invalid tempo {0:?}: base time must be at least one minute")]
    ZeroBase(String),
}

/// 协议错误类型
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 序列化错误（bincode）
    #[error("Bincode serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    /// JSON 序列化错误
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// 协议版本不匹配
    #[error("Protocol version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u8, actual: u8 },

    /// 帧大小超限
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// 连接超时
    #[error("Connection timeout")]
    ConnectionTimeout,

    /// 连接已关闭
    #[error("Connection closed")]
    ConnectionClosed,

    /// 握手前收到了其他消息
    #[error("Expected hello handshake")]
    HandshakeExpected,

    /// 用时格式错误
    #[error(transparent)]
    Tempo(#[from] TempoError),
}

/// 协议操作结果类型
pub type Result<T> = std::result::Result<T, ProtocolError>;
