//! 国际象棋实时对局服务
//!
//! 包含:
//! - 计时对局 (ClockedMatch) 与规则引擎
//! - 对局注册表 actor
//! - 玩家身份与连接管理
//! - 赛后存档与等级分

pub mod clocked_match;
pub mod config;
pub mod id;
pub mod player;
pub mod post_game;
pub mod rating;
pub mod registry;
pub mod room;
pub mod rules;
pub mod server;
pub mod storage;

pub use clocked_match::{ClockedMatch, GameOutcome, Seat, SeatRole, TerminalCause};
pub use config::ServerConfig;
pub use player::{AccountBook, Identity, IdentityResolver, PlayerManager};
pub use registry::{MatchRegistry, RegistryCommand, RegistryError};
pub use rules::{RuleEngine, StandardChess};
pub use server::{spawn_registry, RegistryHandle, Server};
pub use storage::{FileStore, MatchRecord, PersistenceGateway, PlayerStats};
