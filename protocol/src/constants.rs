//! 协议常量定义

use std::time::Duration;

/// 协议版本号
pub const PROTOCOL_VERSION: u8 = 1;

/// 消息帧最大大小
pub const MAX_FRAME_SIZE: usize = 65536;

/// 同时进行的对局上限
pub const MAX_CONCURRENT_MATCHES: usize = 100;

/// 客户端心跳间隔（秒）
pub const HEARTBEAT_INTERVAL_SECS: u64 = 10;

/// 服务端心跳超时（秒）- 超过此时间无消息则断开
pub const HEARTBEAT_TIMEOUT_SECS: u64 = 30;

/// 连接超时（秒）
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// 断线宽限期（秒），超时未重连则中止对局
pub const DISCONNECT_GRACE_SECS: u64 = 15;

/// 棋钟节拍（毫秒）
pub const CLOCK_TICK_MS: u64 = 1000;

/// 新账号各类型的初始等级分
pub const DEFAULT_RATING: u32 = 1200;

/// Elo K 系数
pub const DEFAULT_K_FACTOR: f64 = 30.0;

/// 心跳间隔 Duration
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(HEARTBEAT_INTERVAL_SECS);

/// 心跳超时 Duration
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(HEARTBEAT_TIMEOUT_SECS);

/// 连接超时 Duration
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(CONNECT_TIMEOUT_SECS);

/// 断线宽限期 Duration
pub const DISCONNECT_GRACE: Duration = Duration::from_secs(DISCONNECT_GRACE_SECS);
