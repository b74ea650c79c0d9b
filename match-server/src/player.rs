//! 玩家管理
//!
//! 连接在握手时解析出 [`Identity`]，之后按连接 ID 与玩家 ID 双向索引。

use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use protocol::{Color, ConnectionId, GameType, PlayerId, Ratings, ServerMessage};

use crate::clocked_match::Seat;
use crate::config::AccountConfig;
use crate::id;
use crate::storage::PlayerStats;

/// 玩家身份
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// 注册账号
    Authenticated {
        id: PlayerId,
        username: String,
        ratings: Ratings,
    },
    /// 游客
    Guest { id: PlayerId, username: String },
}

impl Identity {
    pub fn guest(id: PlayerId) -> Self {
        let username = format!("Guest_{}", id);
        Identity::Guest { id, username }
    }

    pub fn id(&self) -> &str {
        match self {
            Identity::Authenticated { id, .. } | Identity::Guest { id, .. } => id,
        }
    }

    pub fn username(&self) -> &str {
        match self {
            Identity::Authenticated { username, .. } | Identity::Guest { username, .. } => {
                username
            }
        }
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, Identity::Guest { .. })
    }

    /// 该类型对局的等级分，游客没有
    pub fn rating_for(&self, game_type: GameType) -> Option<u32> {
        match self {
            Identity::Authenticated { ratings, .. } => Some(ratings.get(game_type)),
            Identity::Guest { .. } => None,
        }
    }

    /// 更新注册账号的某类等级分，游客忽略
    pub fn set_rating(&mut self, game_type: GameType, rating: u32) {
        if let Identity::Authenticated { ratings, .. } = self {
            ratings.set(game_type, rating);
        }
    }

    /// 以存储的等级分覆盖握手时的配置值
    pub fn overlay_ratings(&mut self, stats: &PlayerStats) {
        if let Identity::Authenticated { ratings, .. } = self {
            *ratings = stats.overlay(*ratings);
        }
    }

    /// 以该身份入座
    pub fn seat(&self, color: Color, game_type: GameType) -> Seat {
        Seat::new(
            self.id().to_string(),
            self.username().to_string(),
            self.rating_for(game_type),
            self.is_guest(),
            color,
        )
    }
}

/// 握手解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub identity: Identity,
    /// 服务端新分配了游客 ID，需要告知客户端
    pub new_guest: bool,
}

/// 身份解析
pub trait IdentityResolver: Send + Sync {
    /// 令牌无效或游客 ID 冒用注册账号时返回 None
    fn resolve(&self, token: Option<&str>, guest_id: Option<&str>) -> Option<Resolved>;
}

/// 基于配置账号表的身份解析
#[derive(Debug, Clone, Default)]
pub struct AccountBook {
    /// 令牌 -> 账号
    accounts: HashMap<String, AccountConfig>,
    /// 账号 ID，游客不可使用
    account_ids: HashSet<PlayerId>,
}

impl AccountBook {
    pub fn new(accounts: &[AccountConfig]) -> Self {
        Self {
            accounts: accounts
                .iter()
                .map(|a| (a.token.clone(), a.clone()))
                .collect(),
            account_ids: accounts.iter().map(|a| a.id.clone()).collect(),
        }
    }
}

impl IdentityResolver for AccountBook {
    fn resolve(&self, token: Option<&str>, guest_id: Option<&str>) -> Option<Resolved> {
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            let account = self.accounts.get(token)?;
            return Some(Resolved {
                identity: Identity::Authenticated {
                    id: account.id.clone(),
                    username: account.username.clone(),
                    ratings: account.ratings,
                },
                new_guest: false,
            });
        }

        match guest_id.filter(|g| !g.is_empty()) {
            Some(existing) if self.account_ids.contains(existing) => None,
            Some(existing) => Some(Resolved {
                identity: Identity::guest(existing.to_string()),
                new_guest: false,
            }),
            None => {
                let id = loop {
                    let id = id::guest_id();
                    if !self.account_ids.contains(&id) {
                        break id;
                    }
                };
                Some(Resolved {
                    identity: Identity::guest(id),
                    new_guest: true,
                })
            }
        }
    }
}

/// 一个传输连接
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub identity: Option<Identity>,
    tx: mpsc::Sender<ServerMessage>,
}

/// 玩家管理器：连接表与在线表
pub struct PlayerManager {
    /// 连接 ID -> 连接
    connections: HashMap<ConnectionId, Connection>,
    /// 玩家 ID -> 最近一次握手的连接
    presence: HashMap<PlayerId, ConnectionId>,
}

impl PlayerManager {
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
            presence: HashMap::new(),
        }
    }

    /// 登记新连接（尚未握手）
    pub fn register(&mut self, conn_id: ConnectionId, tx: mpsc::Sender<ServerMessage>) {
        self.connections.insert(
            conn_id,
            Connection {
                id: conn_id,
                identity: None,
                tx,
            },
        );
    }

    /// 握手完成，玩家在线表指向该连接
    pub fn identify(&mut self, conn_id: ConnectionId, identity: Identity) -> bool {
        let Some(conn) = self.connections.get_mut(&conn_id) else {
            return false;
        };
        self.presence.insert(identity.id().to_string(), conn_id);
        conn.identity = Some(identity);
        true
    }

    pub fn identity(&self, conn_id: ConnectionId) -> Option<&Identity> {
        self.connections.get(&conn_id)?.identity.as_ref()
    }

    /// 注销连接。只有在线表仍指向该连接时才移除在线记录，返回玩家是否因此离线
    pub fn unregister(&mut self, conn_id: ConnectionId) -> Option<(Identity, bool)> {
        let conn = self.connections.remove(&conn_id)?;
        let identity = conn.identity?;

        let went_offline = self.presence.get(identity.id()) == Some(&conn_id);
        if went_offline {
            self.presence.remove(identity.id());
        }
        Some((identity, went_offline))
    }

    pub fn is_online(&self, player_id: &str) -> bool {
        self.presence.contains_key(player_id)
    }

    pub fn connection_of(&self, player_id: &str) -> Option<ConnectionId> {
        self.presence.get(player_id).copied()
    }

    /// 发送消息给连接，队列满或已关闭时丢弃
    pub fn send(&self, conn_id: ConnectionId, msg: ServerMessage) {
        let Some(conn) = self.connections.get(&conn_id) else {
            debug!(conn_id, "连接不存在，丢弃消息");
            return;
        };
        match conn.tx.try_send(msg) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(conn_id, "发送队列已满，丢弃消息");
            }
            Err(TrySendError::Closed(_)) => {
                debug!(conn_id, "连接已关闭，丢弃消息");
            }
        }
    }

    /// 更新该玩家所有连接上的等级分
    pub fn update_rating(&mut self, player_id: &str, game_type: GameType, rating: u32) {
        for conn in self.connections.values_mut() {
            if let Some(identity) = conn.identity.as_mut().filter(|i| i.id() == player_id) {
                identity.set_rating(game_type, rating);
            }
        }
    }

    /// 已握手的连接
    pub fn identified_connections(&self) -> Vec<ConnectionId> {
        self.connections
            .values()
            .filter(|c| c.identity.is_some())
            .map(|c| c.id)
            .collect()
    }
}

impl Default for PlayerManager {
    fn default() -> Self {
        Self::new()
    }
}
