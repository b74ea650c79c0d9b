//! 广播房间
//!
//! 每个对局对应一个房间，房间成员是订阅了该对局事件的连接。

use std::collections::{HashMap, HashSet};

use protocol::{ConnectionId, MatchId};

/// 房间目录
#[derive(Debug, Default)]
pub struct RoomDirectory {
    rooms: HashMap<MatchId, HashSet<ConnectionId>>,
}

impl RoomDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// 订阅
    pub fn join(&mut self, match_id: &str, conn_id: ConnectionId) {
        self.rooms
            .entry(match_id.to_string())
            .or_default()
            .insert(conn_id);
    }

    /// 退订，房间空了就删掉
    pub fn leave(&mut self, match_id: &str, conn_id: ConnectionId) {
        if let Some(members) = self.rooms.get_mut(match_id) {
            members.remove(&conn_id);
            if members.is_empty() {
                self.rooms.remove(match_id);
            }
        }
    }

    /// 连接退出所有房间，返回退出的房间
    pub fn leave_all(&mut self, conn_id: ConnectionId) -> Vec<MatchId> {
        let mut left = Vec::new();
        self.rooms.retain(|match_id, members| {
            if members.remove(&conn_id) {
                left.push(match_id.clone());
            }
            !members.is_empty()
        });
        left
    }

    /// 删除房间
    pub fn remove(&mut self, match_id: &str) {
        self.rooms.remove(match_id);
    }

    pub fn members(&self, match_id: &str) -> Vec<ConnectionId> {
        self.rooms
            .get(match_id)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_member(&self, match_id: &str, conn_id: ConnectionId) -> bool {
        self.rooms
            .get(match_id)
            .is_some_and(|m| m.contains(&conn_id))
    }
}
