//! 对局注册表
//!
//! [`MatchRegistry`] 持有全部进行中的对局、在线玩家、广播房间和断线中止计时器。
//! 它只被注册表 actor 任务访问，所有命令依次处理，因此对局状态不需要加锁。
//! 定时任务（棋钟、计时广播、断线中止）只向 actor 的收件箱发送 [`RegistryCommand`]。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, warn};

use protocol::{
    Ack, ClientMessage, Color, ConnectionId, ErrorCode, GameType, Invitation, InvitedBy,
    MatchId, MatchSummary, MoveRequest, PlayerId, ServerMessage, Tempo, TempoError,
};

use crate::clocked_match::{ClockTick, ClockedMatch, MoveOutcome};
use crate::config::ServerConfig;
use crate::player::{Identity, IdentityResolver, PlayerManager, Resolved};
use crate::post_game;
use crate::room::RoomDirectory;
use crate::storage::PersistenceGateway;

/// 注册表 actor 的命令
#[derive(Debug)]
pub enum RegistryCommand {
    /// 新连接
    Connect {
        conn_id: ConnectionId,
        tx: mpsc::Sender<ServerMessage>,
    },
    /// 客户端消息
    Message {
        conn_id: ConnectionId,
        msg: ClientMessage,
    },
    /// 连接断开
    Disconnect { conn_id: ConnectionId },
    /// 棋钟走一秒
    ClockTick { match_id: MatchId, epoch: u64 },
    /// 广播剩余时间
    BroadcastTick { match_id: MatchId, epoch: u64 },
    /// 断线宽限期到期
    AbortFired {
        match_id: MatchId,
        player_id: PlayerId,
        token: u64,
    },
    /// 注册账号读取存储的等级分后完成握手
    Identified {
        conn_id: ConnectionId,
        resolved: Resolved,
    },
    /// 赛后等级分已写入
    RatingChanged {
        player_id: PlayerId,
        game_type: GameType,
        rating: u32,
    },
    /// 停止 actor
    Shutdown,
}

/// 注册表错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Connection error: user or guest not present")]
    NotIdentified,

    #[error(transparent)]
    InvalidTempo(#[from] TempoError),

    #[error("Authentication error")]
    AuthenticationFailed,

    #[error("Player is not online")]
    PlayerOffline,

    #[error("You cannot join to more than one game, first leave the current one")]
    AlreadyInMatch,

    #[error("Too many games on server, try again later")]
    CapacityExceeded,

    #[error("Game doesn't exist")]
    MatchNotFound,

    #[error("Game already has an opponent")]
    MatchFull,

    #[error("Cannot join to your game as opponent")]
    OwnMatch,

    #[error("You are not invited to this game")]
    NotInvited,

    #[error("You cannot resign from this game")]
    CannotResign,
}

impl RegistryError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RegistryError::NotIdentified => ErrorCode::NotIdentified,
            RegistryError::InvalidTempo(_) => ErrorCode::InvalidTempo,
            RegistryError::PlayerOffline => ErrorCode::PlayerOffline,
            RegistryError::AuthenticationFailed => ErrorCode::AuthenticationFailed,
            RegistryError::AlreadyInMatch => ErrorCode::AlreadyInMatch,
            RegistryError::CapacityExceeded => ErrorCode::CapacityExceeded,
            RegistryError::MatchNotFound => ErrorCode::MatchNotFound,
            RegistryError::MatchFull => ErrorCode::MatchFull,
            RegistryError::OwnMatch => ErrorCode::OwnMatch,
            RegistryError::NotInvited => ErrorCode::NotInvited,
            RegistryError::CannotResign => ErrorCode::CannotResign,
        }
    }

    pub fn to_message(&self) -> ServerMessage {
        ServerMessage::Error {
            code: self.code(),
            message: self.to_string(),
        }
    }
}

type HandlerResult = Result<Option<ServerMessage>, RegistryError>;

/// 建局参数
struct CreateRequest {
    tempo: String,
    color: Color,
    ranked: bool,
    invited: Option<PlayerId>,
}

/// 待发送的消息
///
/// 接收者在入队时确定，之后即使房间被删除，消息仍会送达原成员。
struct PendingMessages {
    messages: Vec<(ConnectionId, ServerMessage)>,
}

impl PendingMessages {
    fn new() -> Self {
        Self {
            messages: Vec::new(),
        }
    }

    fn send(&mut self, conn_id: ConnectionId, msg: ServerMessage) {
        self.messages.push((conn_id, msg));
    }

    fn broadcast(&mut self, rooms: &RoomDirectory, match_id: &str, msg: ServerMessage) {
        for conn_id in rooms.members(match_id) {
            self.messages.push((conn_id, msg.clone()));
        }
    }

    fn flush(self, players: &PlayerManager) {
        for (conn_id, msg) in self.messages {
            players.send(conn_id, msg);
        }
    }
}

/// 断线中止计时器
struct AbortTimer {
    token: u64,
    handle: JoinHandle<()>,
}

/// 对局注册表
pub struct MatchRegistry {
    config: ServerConfig,
    matches: HashMap<MatchId, ClockedMatch>,
    players: PlayerManager,
    rooms: RoomDirectory,
    /// (对局, 玩家) -> 断线中止计时器
    aborts: HashMap<(MatchId, PlayerId), AbortTimer>,
    next_token: u64,
    store: Arc<dyn PersistenceGateway>,
    resolver: Arc<dyn IdentityResolver>,
    /// actor 自己的收件箱，交给定时任务使用
    inbox: mpsc::Sender<RegistryCommand>,
}

impl MatchRegistry {
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn PersistenceGateway>,
        resolver: Arc<dyn IdentityResolver>,
        inbox: mpsc::Sender<RegistryCommand>,
    ) -> Self {
        Self {
            config,
            matches: HashMap::new(),
            players: PlayerManager::new(),
            rooms: RoomDirectory::new(),
            aborts: HashMap::new(),
            next_token: 0,
            store,
            resolver,
            inbox,
        }
    }

    pub fn get(&self, match_id: &str) -> Option<&ClockedMatch> {
        self.matches.get(match_id)
    }

    pub fn match_count(&self) -> usize {
        self.matches.len()
    }

    pub fn players(&self) -> &PlayerManager {
        &self.players
    }

    /// 处理一条命令，返回 false 表示 actor 应停止
    pub fn dispatch(&mut self, cmd: RegistryCommand) -> bool {
        match cmd {
            RegistryCommand::Connect { conn_id, tx } => {
                debug!(conn_id, "连接登记");
                self.players.register(conn_id, tx);
            }
            RegistryCommand::Message { conn_id, msg } => {
                if let Some(reply) = self.handle(conn_id, msg) {
                    self.players.send(conn_id, reply);
                }
            }
            RegistryCommand::Disconnect { conn_id } => self.handle_disconnect(conn_id),
            RegistryCommand::ClockTick { match_id, epoch } => {
                self.handle_clock_tick(&match_id, epoch)
            }
            RegistryCommand::BroadcastTick { match_id, epoch } => {
                self.handle_broadcast_tick(&match_id, epoch)
            }
            RegistryCommand::AbortFired {
                match_id,
                player_id,
                token,
            } => self.handle_abort_fired(&match_id, &player_id, token),
            RegistryCommand::Identified { conn_id, resolved } => {
                let mut pending = PendingMessages::new();
                let reply = self.complete_hello(&mut pending, conn_id, resolved);
                pending.flush(&self.players);
                if let Some(reply) = reply {
                    self.players.send(conn_id, reply);
                }
            }
            RegistryCommand::RatingChanged {
                player_id,
                game_type,
                rating,
            } => self.handle_rating_changed(&player_id, game_type, rating),
            RegistryCommand::Shutdown => {
                info!(matches = self.matches.len(), "注册表停止");
                for m in self.matches.values_mut() {
                    m.timers_mut().cancel();
                }
                for (_, timer) in self.aborts.drain() {
                    timer.handle.abort();
                }
                return false;
            }
        }
        true
    }

    /// 处理客户端消息，返回给发送者的应答
    pub fn handle(&mut self, conn_id: ConnectionId, msg: ClientMessage) -> Option<ServerMessage> {
        debug!(conn_id, command = msg.name(), "处理命令");
        let mut pending = PendingMessages::new();

        let result = match msg {
            ClientMessage::Hello { token, guest_id } => {
                self.handle_hello(&mut pending, conn_id, token, guest_id)
            }
            ClientMessage::Ping => Ok(Some(ServerMessage::Pong)),
            msg => match self.players.identity(conn_id).cloned() {
                Some(identity) => self.handle_command(&mut pending, conn_id, &identity, msg),
                None => Err(RegistryError::NotIdentified),
            },
        };

        pending.flush(&self.players);

        match result {
            Ok(reply) => reply,
            Err(e) => {
                debug!(conn_id, "命令被拒绝: {}", e);
                Some(e.to_message())
            }
        }
    }

    fn handle_command(
        &mut self,
        pending: &mut PendingMessages,
        conn_id: ConnectionId,
        identity: &Identity,
        msg: ClientMessage,
    ) -> HandlerResult {
        match msg {
            ClientMessage::CreateGame {
                tempo,
                color,
                ranked,
                invited_player_id,
            } => {
                let req = CreateRequest {
                    tempo,
                    color,
                    ranked,
                    invited: invited_player_id,
                };
                self.handle_create(pending, conn_id, identity, req)
            }
            ClientMessage::JoinGame { match_id } => {
                self.handle_join(pending, conn_id, identity, &match_id)
            }
            ClientMessage::InvitationResponse {
                invitation_sender_id,
                match_id,
                is_accepted,
            } => self.handle_invitation_response(
                pending,
                conn_id,
                identity,
                &invitation_sender_id,
                &match_id,
                is_accepted,
            ),
            ClientMessage::RemovePlayerFromTable { match_id } => {
                self.handle_leave_table(pending, conn_id, identity, &match_id)
            }
            ClientMessage::ReconnectToGame { match_id } => {
                Ok(self.handle_reconnect(pending, conn_id, identity, &match_id))
            }
            ClientMessage::GetGameState { match_id } => {
                Ok(self.handle_get_game_state(pending, conn_id, identity, &match_id))
            }
            ClientMessage::RequestGamesList => {
                Ok(Some(ServerMessage::GamesList(self.public_listing())))
            }
            ClientMessage::GetPlayerGames => {
                Ok(Some(ServerMessage::PlayerGames(self.player_games(identity.id()))))
            }
            ClientMessage::MakeMove { match_id, mv } => {
                self.handle_make_move(pending, identity, &match_id, &mv)
            }
            ClientMessage::Resign { match_id } => {
                self.handle_resign(pending, identity, &match_id)
            }
            ClientMessage::OfferDraw { match_id } => {
                self.handle_negotiation(pending, &match_id, |m| m.offer_draw(identity.id()))
            }
            ClientMessage::OfferDrawResponse {
                match_id,
                is_accepted,
            } => self.handle_negotiation(pending, &match_id, |m| {
                m.draw_response(identity.id(), is_accepted)
            }),
            ClientMessage::OfferRematch { match_id } => {
                self.handle_negotiation(pending, &match_id, |m| m.offer_rematch(identity.id()))
            }
            ClientMessage::OfferRematchResponse {
                match_id,
                is_accepted,
            } => self.handle_negotiation(pending, &match_id, |m| {
                m.rematch_response(identity.id(), is_accepted)
            }),
            ClientMessage::Hello { .. } | ClientMessage::Ping => Ok(None),
        }
    }

    // === 身份 ===

    fn handle_hello(
        &mut self,
        pending: &mut PendingMessages,
        conn_id: ConnectionId,
        token: Option<String>,
        guest_id: Option<PlayerId>,
    ) -> HandlerResult {
        // 同一连接重复握手沿用已有身份
        if let Some(identity) = self.players.identity(conn_id) {
            return Ok(Some(connected(identity)));
        }

        let resolved = self
            .resolver
            .resolve(token.as_deref(), guest_id.as_deref())
            .ok_or(RegistryError::AuthenticationFailed)?;
        if resolved.identity.is_guest() {
            return Ok(self.complete_hello(pending, conn_id, resolved));
        }

        // 注册账号的等级分以存储为准，读取完成后回到 actor 完成握手
        let store = self.store.clone();
        let inbox = self.inbox.clone();
        tokio::spawn(async move {
            let mut resolved = resolved;
            match store.player_stats(resolved.identity.id()).await {
                Ok(Some(stats)) => resolved.identity.overlay_ratings(&stats),
                Ok(None) => {}
                Err(e) => warn!(
                    player_id = resolved.identity.id(),
                    "读取等级分失败，使用账号配置: {:#}", e
                ),
            }
            let _ = inbox
                .send(RegistryCommand::Identified { conn_id, resolved })
                .await;
        });
        Ok(None)
    }

    fn complete_hello(
        &mut self,
        pending: &mut PendingMessages,
        conn_id: ConnectionId,
        resolved: Resolved,
    ) -> Option<ServerMessage> {
        if !self.players.identify(conn_id, resolved.identity.clone()) {
            debug!(conn_id, "握手完成前连接已断开");
            return None;
        }
        if resolved.new_guest {
            pending.send(
                conn_id,
                ServerMessage::NewGuestId(resolved.identity.id().to_string()),
            );
        }
        info!(conn_id, player_id = resolved.identity.id(), "玩家上线");
        Some(connected(&resolved.identity))
    }

    fn handle_rating_changed(&mut self, player_id: &str, game_type: GameType, rating: u32) {
        debug!(player_id, %game_type, rating, "等级分更新");
        self.players.update_rating(player_id, game_type, rating);
        // 未开始或已结束（等待再战）的同类型对局使用新等级分
        for m in self.matches.values_mut() {
            if m.game_type() == game_type && (!m.has_started() || m.is_game_over()) {
                m.refresh_rating(player_id, rating);
            }
        }
    }

    // === 对局管理 ===

    fn handle_create(
        &mut self,
        pending: &mut PendingMessages,
        conn_id: ConnectionId,
        identity: &Identity,
        req: CreateRequest,
    ) -> HandlerResult {
        let CreateRequest {
            tempo,
            color,
            ranked,
            invited,
        } = req;
        if let Some(invited) = &invited {
            if invited == identity.id() {
                return Err(RegistryError::OwnMatch);
            }
            if !self.players.is_online(invited) {
                return Err(RegistryError::PlayerOffline);
            }
        }
        let tempo: Tempo = tempo.parse()?;
        if self.match_of(identity.id()).is_some() {
            return Err(RegistryError::AlreadyInMatch);
        }
        if self.matches.len() >= self.config.max_matches {
            return Err(RegistryError::CapacityExceeded);
        }

        let game_type = self.config.game_types.classify(&tempo);
        let mut m = ClockedMatch::new(tempo, ranked, game_type, identity.seat(color, game_type));
        let match_id = m.id().to_string();

        if let Some(invited) = invited {
            let invitation = Invitation {
                match_id: match_id.clone(),
                tempo,
                game_type,
                color: color.opponent(),
                invited_by: InvitedBy {
                    id: identity.id().to_string(),
                    username: identity.username().to_string(),
                },
                ranked,
            };
            if let Some(invited_conn) = self.players.connection_of(&invited) {
                pending.send(invited_conn, ServerMessage::Invitation(invitation));
            }
            m.make_private(invited);
        }

        info!(
            match_id = %match_id,
            owner = identity.id(),
            tempo = %tempo,
            game_type = %game_type,
            private = m.is_private(),
            "对局创建"
        );
        let private = m.is_private();
        pending.send(conn_id, ServerMessage::GameState(Box::new(m.snapshot())));
        self.matches.insert(match_id.clone(), m);
        self.rooms.join(&match_id, conn_id);

        if !private {
            self.broadcast_listing(pending);
        }
        Ok(Some(ServerMessage::Ack(Ack::MatchId(match_id))))
    }

    fn handle_join(
        &mut self,
        pending: &mut PendingMessages,
        conn_id: ConnectionId,
        identity: &Identity,
        match_id: &str,
    ) -> HandlerResult {
        let player_id = identity.id();
        let m = self.matches.get(match_id).ok_or(RegistryError::MatchNotFound)?;

        if m.owner().id == player_id {
            return Err(RegistryError::OwnMatch);
        }
        if self.match_of(player_id).is_some() {
            return Err(RegistryError::AlreadyInMatch);
        }
        if m.is_full() {
            return Err(RegistryError::MatchFull);
        }
        if m.invited_player().is_some_and(|invited| invited != player_id) {
            return Err(RegistryError::NotInvited);
        }

        let m = self
            .matches
            .get_mut(match_id)
            .ok_or(RegistryError::MatchNotFound)?;
        let seat = identity.seat(m.owner().color.opponent(), m.game_type());
        if !m.add_opponent(seat) {
            return Err(RegistryError::MatchFull);
        }
        let private = m.is_private();
        info!(match_id, player_id, "对手入座");

        self.rooms.join(match_id, conn_id);
        self.broadcast_state(pending, match_id);
        if !private {
            self.broadcast_listing(pending);
        }
        Ok(Some(ServerMessage::Ack(Ack::MatchId(match_id.to_string()))))
    }

    fn handle_invitation_response(
        &mut self,
        pending: &mut PendingMessages,
        conn_id: ConnectionId,
        identity: &Identity,
        sender_id: &str,
        match_id: &str,
        accepted: bool,
    ) -> HandlerResult {
        if accepted {
            return self.handle_join(pending, conn_id, identity, match_id);
        }

        let m = self.matches.get(match_id).ok_or(RegistryError::MatchNotFound)?;
        if m.invited_player() != Some(identity.id()) {
            return Err(RegistryError::NotInvited);
        }

        info!(match_id, sender_id, "邀请被拒绝");
        pending.broadcast(&self.rooms, match_id, ServerMessage::InvitationDeclined);
        self.remove_match(pending, match_id);
        Ok(Some(ServerMessage::Ack(Ack::Done)))
    }

    fn handle_leave_table(
        &mut self,
        pending: &mut PendingMessages,
        conn_id: ConnectionId,
        identity: &Identity,
        match_id: &str,
    ) -> HandlerResult {
        let player_id = identity.id();
        let m = self
            .matches
            .get_mut(match_id)
            .filter(|m| m.contains(player_id))
            .ok_or(RegistryError::MatchNotFound)?;

        if m.owner().id == player_id || m.is_private() {
            self.remove_match(pending, match_id);
        } else {
            m.remove_opponent(player_id);
            m.reset();
            self.rooms.leave(match_id, conn_id);
            info!(match_id, player_id, "对手离开，对局重置");
            self.cancel_abort(match_id, player_id);
            self.broadcast_state(pending, match_id);
        }

        self.broadcast_listing(pending);
        Ok(Some(ServerMessage::Ack(Ack::Done)))
    }

    fn handle_reconnect(
        &mut self,
        pending: &mut PendingMessages,
        conn_id: ConnectionId,
        identity: &Identity,
        match_id: &str,
    ) -> Option<ServerMessage> {
        let player_id = identity.id();
        let Some(m) = self
            .matches
            .get_mut(match_id)
            .filter(|m| m.contains(player_id))
        else {
            return Some(ServerMessage::Ack(Ack::Success(false)));
        };

        m.set_player_connected(player_id, true);
        self.rooms.join(match_id, conn_id);
        if self.cancel_abort(match_id, player_id) {
            info!(match_id, player_id, "玩家重连，取消中止计时");
        }
        self.broadcast_state(pending, match_id);
        Some(ServerMessage::Ack(Ack::Success(true)))
    }

    fn handle_get_game_state(
        &mut self,
        pending: &mut PendingMessages,
        conn_id: ConnectionId,
        identity: &Identity,
        match_id: &str,
    ) -> Option<ServerMessage> {
        let seated = self
            .matches
            .get(match_id)
            .is_some_and(|m| m.contains(identity.id()));
        if !seated || !self.rooms.is_member(match_id, conn_id) {
            return Some(ServerMessage::Ack(Ack::Success(false)));
        }

        self.broadcast_state(pending, match_id);
        Some(ServerMessage::Ack(Ack::Success(true)))
    }

    // === 对局操作 ===

    fn handle_make_move(
        &mut self,
        pending: &mut PendingMessages,
        identity: &Identity,
        match_id: &str,
        mv: &MoveRequest,
    ) -> HandlerResult {
        let player_id = identity.id();
        let m = self
            .matches
            .get_mut(match_id)
            .ok_or(RegistryError::MatchNotFound)?;

        // 未入座、对手未就位或不是自己的回合都按非法着法处理
        let outcome = if m.is_full() && m.is_players_turn(player_id) {
            m.make_move(mv)
        } else {
            MoveOutcome::Rejected
        };

        let accepted = outcome.is_accepted();
        if let MoveOutcome::Accepted {
            detail,
            clock_started,
            finished,
        } = outcome
        {
            debug!(match_id, player_id, san = %detail.san, "走子");
            pending.broadcast(&self.rooms, match_id, ServerMessage::MoveMade(detail));
            if finished {
                self.end_game(match_id);
            } else if clock_started {
                self.start_clock(match_id);
            }
        }

        self.broadcast_state(pending, match_id);
        Ok(Some(ServerMessage::Ack(Ack::Success(accepted))))
    }

    fn handle_resign(
        &mut self,
        pending: &mut PendingMessages,
        identity: &Identity,
        match_id: &str,
    ) -> HandlerResult {
        let m = self
            .matches
            .get_mut(match_id)
            .ok_or(RegistryError::MatchNotFound)?;
        if !m.resign(identity.id()) {
            return Err(RegistryError::CannotResign);
        }

        info!(match_id, player_id = identity.id(), "认输");
        self.end_game(match_id);
        self.broadcast_state(pending, match_id);
        Ok(Some(ServerMessage::Ack(Ack::Done)))
    }

    /// 提和、再战及其回应
    fn handle_negotiation<F>(
        &mut self,
        pending: &mut PendingMessages,
        match_id: &str,
        op: F,
    ) -> HandlerResult
    where
        F: FnOnce(&mut ClockedMatch) -> bool,
    {
        let m = self
            .matches
            .get_mut(match_id)
            .ok_or(RegistryError::MatchNotFound)?;
        let applied = op(m);

        if applied {
            // 同意和棋会终局
            if m.is_game_over() {
                self.end_game(match_id);
            }
            self.broadcast_state(pending, match_id);
        }
        Ok(Some(ServerMessage::Ack(Ack::Success(applied))))
    }

    // === 断线 ===

    fn handle_disconnect(&mut self, conn_id: ConnectionId) {
        let left = self.rooms.leave_all(conn_id);
        let Some((identity, went_offline)) = self.players.unregister(conn_id) else {
            debug!(conn_id, "未握手的连接断开");
            return;
        };
        info!(conn_id, player_id = identity.id(), rooms = left.len(), "连接断开");
        if !went_offline {
            return;
        }

        let player_id = identity.id().to_string();
        let occupied: Vec<MatchId> = self
            .matches
            .values()
            .filter(|m| m.contains(&player_id))
            .map(|m| m.id().to_string())
            .collect();

        let mut pending = PendingMessages::new();
        for match_id in occupied {
            if let Some(m) = self.matches.get_mut(&match_id) {
                m.set_player_connected(&player_id, false);
            }
            self.broadcast_state(&mut pending, &match_id);
            self.arm_abort(&match_id, &player_id);
        }
        pending.flush(&self.players);
    }

    fn arm_abort(&mut self, match_id: &str, player_id: &str) {
        self.cancel_abort(match_id, player_id);
        self.next_token += 1;
        let token = self.next_token;
        let grace = self.config.disconnect_grace();
        let inbox = self.inbox.clone();
        let (fire_match, fire_player) = (match_id.to_string(), player_id.to_string());

        let handle = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let _ = inbox
                .send(RegistryCommand::AbortFired {
                    match_id: fire_match,
                    player_id: fire_player,
                    token,
                })
                .await;
        });

        debug!(match_id, player_id, grace_secs = grace.as_secs(), "断线中止计时开始");
        self.aborts.insert(
            (match_id.to_string(), player_id.to_string()),
            AbortTimer { token, handle },
        );
    }

    /// 取消断线中止计时，返回是否存在
    fn cancel_abort(&mut self, match_id: &str, player_id: &str) -> bool {
        match self
            .aborts
            .remove(&(match_id.to_string(), player_id.to_string()))
        {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    fn handle_abort_fired(&mut self, match_id: &str, player_id: &str, token: u64) {
        let key = (match_id.to_string(), player_id.to_string());
        if self.aborts.get(&key).map(|t| t.token) != Some(token) {
            debug!(match_id, player_id, "过期的中止计时，忽略");
            return;
        }
        self.aborts.remove(&key);

        let mut pending = PendingMessages::new();
        if let Some(m) = self.matches.get_mut(match_id) {
            if m.end_game_due_to_disconnection(player_id) {
                info!(match_id, player_id, "断线超时判负");
                self.end_game(match_id);
                self.broadcast_state(&mut pending, match_id);
            }
            self.remove_match(&mut pending, match_id);
            self.broadcast_listing(&mut pending);
        }
        pending.flush(&self.players);
    }

    // === 棋钟 ===

    fn start_clock(&mut self, match_id: &str) {
        let Some(m) = self.matches.get_mut(match_id) else {
            return;
        };
        let epoch = m.timers_mut().arm();
        let period = self.config.clock_tick();

        let clock = spawn_ticker(self.inbox.clone(), period, {
            let match_id = match_id.to_string();
            move || RegistryCommand::ClockTick {
                match_id: match_id.clone(),
                epoch,
            }
        });
        let broadcast = spawn_ticker(self.inbox.clone(), period, {
            let match_id = match_id.to_string();
            move || RegistryCommand::BroadcastTick {
                match_id: match_id.clone(),
                epoch,
            }
        });
        m.timers_mut().start(clock, broadcast);
        debug!(match_id, epoch, "棋钟启动");
    }

    fn handle_clock_tick(&mut self, match_id: &str, epoch: u64) {
        let Some(m) = self
            .matches
            .get_mut(match_id)
            .filter(|m| m.timers().is_current(epoch))
        else {
            return;
        };

        if let ClockTick::Flagged(loser) = m.tick() {
            info!(match_id, ?loser, "超时判负");
            self.end_game(match_id);
            let mut pending = PendingMessages::new();
            self.broadcast_state(&mut pending, match_id);
            pending.flush(&self.players);
        }
    }

    fn handle_broadcast_tick(&mut self, match_id: &str, epoch: u64) {
        let Some(m) = self
            .matches
            .get(match_id)
            .filter(|m| m.timers().is_current(epoch))
        else {
            return;
        };

        let mut pending = PendingMessages::new();
        pending.broadcast(&self.rooms, match_id, ServerMessage::TimerUpdate(m.clock()));
        pending.flush(&self.players);
    }

    // === 内部 ===

    /// 终局收尾：停止计时任务，把赛后数据交给后台处理
    fn end_game(&mut self, match_id: &str) {
        let Some(m) = self.matches.get_mut(match_id) else {
            return;
        };
        m.timers_mut().cancel();
        if let Some(outcome) = m.take_outcome() {
            info!(
                match_id,
                winner = ?outcome.winner,
                cause = ?outcome.cause,
                "对局结束"
            );
            post_game::spawn(
                self.store.clone(),
                self.config.rating_k_factor,
                outcome,
                self.inbox.clone(),
            );
        }
    }

    /// 删除对局：通知房间、取消计时任务与中止计时
    fn remove_match(&mut self, pending: &mut PendingMessages, match_id: &str) {
        pending.broadcast(
            &self.rooms,
            match_id,
            ServerMessage::GameRemoved {
                match_id: match_id.to_string(),
            },
        );
        self.rooms.remove(match_id);
        self.aborts.retain(|(m, _), timer| {
            if m == match_id {
                timer.handle.abort();
                false
            } else {
                true
            }
        });
        if let Some(mut m) = self.matches.remove(match_id) {
            m.timers_mut().cancel();
            info!(match_id, "对局删除");
        }
    }

    fn broadcast_state(&self, pending: &mut PendingMessages, match_id: &str) {
        if let Some(m) = self.matches.get(match_id) {
            pending.broadcast(
                &self.rooms,
                match_id,
                ServerMessage::GameState(Box::new(m.snapshot())),
            );
        }
    }

    fn broadcast_listing(&self, pending: &mut PendingMessages) {
        let listing = self.public_listing();
        for conn_id in self.players.identified_connections() {
            pending.send(conn_id, ServerMessage::GamesList(listing.clone()));
        }
    }

    /// 玩家所在的对局
    fn match_of(&self, player_id: &str) -> Option<&MatchId> {
        self.matches
            .iter()
            .find(|(_, m)| m.contains(player_id))
            .map(|(id, _)| id)
    }

    /// 公开对局列表：非私人、未开始、未满员
    pub fn public_listing(&self) -> Vec<MatchSummary> {
        let mut listing: Vec<MatchSummary> = self
            .matches
            .values()
            .filter(|m| !m.is_private() && !m.has_started() && !m.is_full())
            .map(ClockedMatch::summary)
            .collect();
        listing.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        listing
    }

    pub fn player_games(&self, player_id: &str) -> Vec<MatchSummary> {
        self.matches
            .values()
            .filter(|m| m.contains(player_id))
            .map(ClockedMatch::summary)
            .collect()
    }
}

fn connected(identity: &Identity) -> ServerMessage {
    ServerMessage::Connected {
        id: identity.id().to_string(),
        username: identity.username().to_string(),
    }
}

/// 周期性向收件箱发送命令，首个周期结束后开始
fn spawn_ticker<F>(
    inbox: mpsc::Sender<RegistryCommand>,
    period: Duration,
    make: F,
) -> JoinHandle<()>
where
    F: Fn() -> RegistryCommand + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        loop {
            ticker.tick().await;
            if inbox.send(make()).await.is_err() {
                break;
            }
        }
    })
}
