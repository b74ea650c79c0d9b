//! 带棋钟的对局
//!
//! [`ClockedMatch`] 是单局的权威状态：座位、棋盘、终局原因、提和/再战请求与双方剩余时间。
//! 它只做纯状态转换，定时任务由注册表创建后把句柄交给 [`MatchTimers`] 保管。

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::warn;

use protocol::{
    ClockView, Color, GameSnapshot, GameType, MatchId, MatchSummary, MoveDetail, MoveRequest,
    PlayerId, SeatView, Tempo, TempoError,
};

use crate::id;
use crate::rules::{DrawKind, RuleEngine, StandardChess};

/// 座位角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeatRole {
    Owner,
    Opponent,
}

impl SeatRole {
    pub fn other(self) -> Self {
        match self {
            SeatRole::Owner => SeatRole::Opponent,
            SeatRole::Opponent => SeatRole::Owner,
        }
    }
}

/// 座位
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seat {
    pub id: PlayerId,
    pub username: String,
    /// 该对局类型下的等级分快照，游客为 None
    pub rating: Option<u32>,
    pub guest: bool,
    pub color: Color,
    pub connected: bool,
}

impl Seat {
    pub fn new(id: PlayerId, username: String, rating: Option<u32>, guest: bool, color: Color) -> Self {
        Self {
            id,
            username,
            rating,
            guest,
            color,
            connected: true,
        }
    }

    pub fn view(&self) -> SeatView {
        SeatView {
            id: self.id.clone(),
            username: self.username.clone(),
            rating: self.rating,
            color: self.color,
            connected: self.connected,
            guest: self.guest,
        }
    }
}

/// 终局原因，一局至多一个
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalCause {
    Checkmate,
    Resignation { by: PlayerId },
    Disconnection { by: PlayerId },
    Timeout,
    Draw(DrawKind),
}

/// 一次走子的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    /// 非法或对局已结束，状态未变
    Rejected,
    Accepted {
        detail: MoveDetail,
        /// 本步是首步，需要启动棋钟
        clock_started: bool,
        /// 本步导致终局
        finished: bool,
    },
}

impl MoveOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, MoveOutcome::Accepted { .. })
    }
}

/// 一次棋钟步进的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockTick {
    /// 未开始或已结束，未计时
    Idle,
    Running,
    /// 该座位超时判负
    Flagged(SeatRole),
}

/// 对局的定时任务句柄：走时任务与计时广播任务
///
/// 每次启动分配新的批次号，任务发出的事件携带批次号，过期批次的事件会被忽略。
#[derive(Debug, Default)]
pub struct MatchTimers {
    clock: Option<JoinHandle<()>>,
    broadcast: Option<JoinHandle<()>>,
    epoch: u64,
}

impl MatchTimers {
    /// 取消旧任务并分配新批次号
    pub fn arm(&mut self) -> u64 {
        self.cancel();
        self.epoch += 1;
        self.epoch
    }

    /// 保存本批次的任务句柄
    pub fn start(&mut self, clock: JoinHandle<()>, broadcast: JoinHandle<()>) {
        if let Some(old) = self.clock.replace(clock) {
            old.abort();
        }
        if let Some(old) = self.broadcast.replace(broadcast) {
            old.abort();
        }
    }

    /// 事件是否来自正在运行的批次
    pub fn is_current(&self, epoch: u64) -> bool {
        self.is_running() && self.epoch == epoch
    }

    /// 取消两个任务
    pub fn cancel(&mut self) {
        if let Some(handle) = self.clock.take() {
            handle.abort();
        }
        if let Some(handle) = self.broadcast.take() {
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.clock.is_some() || self.broadcast.is_some()
    }
}

impl Drop for MatchTimers {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// 终局后交给赛后流程的数据
#[derive(Debug, Clone)]
pub struct GameOutcome {
    pub match_id: MatchId,
    pub game_type: GameType,
    pub tempo: Tempo,
    pub ranked: bool,
    pub white: Seat,
    pub black: Seat,
    pub winner: Option<Color>,
    pub cause: TerminalCause,
    pub pgn: String,
    pub finished_at: DateTime<Utc>,
}

/// 带棋钟的对局
pub struct ClockedMatch<R: RuleEngine = StandardChess> {
    id: MatchId,
    game_type: GameType,
    tempo: Tempo,
    ranked: bool,
    /// 私人对局的受邀者
    invited: Option<PlayerId>,
    owner: Seat,
    opponent: Option<Seat>,
    board: R,
    has_started: bool,
    cause: Option<TerminalCause>,
    winner: Option<Color>,
    draw_offered_by: Option<PlayerId>,
    rematch_offered_by: Option<PlayerId>,
    clock: ClockView,
    created_at: DateTime<Utc>,
    timers: MatchTimers,
    /// 本局是否已产出赛后数据，reset 前不会再产出
    outcome_latched: bool,
    pending_outcome: Option<GameOutcome>,
}

impl ClockedMatch<StandardChess> {
    /// 解析用时（"3+2"）并创建对局
    pub fn create(
        tempo: &str,
        ranked: bool,
        game_type: GameType,
        owner: Seat,
    ) -> Result<Self, TempoError> {
        let tempo: Tempo = tempo.parse()?;
        Ok(Self::new(tempo, ranked, game_type, owner))
    }
}

impl<R: RuleEngine + Default> ClockedMatch<R> {
    pub fn new(tempo: Tempo, ranked: bool, game_type: GameType, owner: Seat) -> Self {
        Self::with_engine(tempo, ranked, game_type, owner, R::default())
    }
}

impl<R: RuleEngine> ClockedMatch<R> {
    /// 以给定棋盘创建对局
    pub(crate) fn with_engine(
        tempo: Tempo,
        ranked: bool,
        game_type: GameType,
        owner: Seat,
        board: R,
    ) -> Self {
        let base = tempo.base_secs();
        Self {
            id: id::match_id(),
            game_type,
            tempo,
            ranked,
            invited: None,
            owner,
            opponent: None,
            board,
            has_started: false,
            cause: None,
            winner: None,
            draw_offered_by: None,
            rematch_offered_by: None,
            clock: ClockView {
                owner: base,
                opponent: base,
            },
            created_at: Utc::now(),
            timers: MatchTimers::default(),
            outcome_latched: false,
            pending_outcome: None,
        }
    }

    // === 查询 ===

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn game_type(&self) -> GameType {
        self.game_type
    }

    pub fn tempo(&self) -> Tempo {
        self.tempo
    }

    pub fn ranked(&self) -> bool {
        self.ranked
    }

    pub fn is_private(&self) -> bool {
        self.invited.is_some()
    }

    pub fn invited_player(&self) -> Option<&str> {
        self.invited.as_deref()
    }

    pub fn owner(&self) -> &Seat {
        &self.owner
    }

    pub fn opponent(&self) -> Option<&Seat> {
        self.opponent.as_ref()
    }

    pub fn has_started(&self) -> bool {
        self.has_started
    }

    pub fn is_full(&self) -> bool {
        self.opponent.is_some()
    }

    pub fn cause(&self) -> Option<&TerminalCause> {
        self.cause.as_ref()
    }

    pub fn winner(&self) -> Option<Color> {
        self.winner
    }

    pub fn clock(&self) -> ClockView {
        self.clock
    }

    pub fn turn(&self) -> Color {
        self.board.turn()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn draw_offered_by(&self) -> Option<&str> {
        self.draw_offered_by.as_deref()
    }

    pub fn rematch_offered_by(&self) -> Option<&str> {
        self.rematch_offered_by.as_deref()
    }

    pub fn timers(&self) -> &MatchTimers {
        &self.timers
    }

    pub fn timers_mut(&mut self) -> &mut MatchTimers {
        &mut self.timers
    }

    /// 玩家所在座位
    pub fn seat_of(&self, player_id: &str) -> Option<SeatRole> {
        if self.owner.id == player_id {
            Some(SeatRole::Owner)
        } else if self.opponent.as_ref().is_some_and(|s| s.id == player_id) {
            Some(SeatRole::Opponent)
        } else {
            None
        }
    }

    pub fn contains(&self, player_id: &str) -> bool {
        self.seat_of(player_id).is_some()
    }

    pub fn seat(&self, role: SeatRole) -> Option<&Seat> {
        match role {
            SeatRole::Owner => Some(&self.owner),
            SeatRole::Opponent => self.opponent.as_ref(),
        }
    }

    fn seat_mut(&mut self, role: SeatRole) -> Option<&mut Seat> {
        match role {
            SeatRole::Owner => Some(&mut self.owner),
            SeatRole::Opponent => self.opponent.as_mut(),
        }
    }

    /// 更新注册玩家座位上的等级分快照
    pub fn refresh_rating(&mut self, player_id: &str, rating: u32) {
        let Some(role) = self.seat_of(player_id) else {
            return;
        };
        if let Some(seat) = self.seat_mut(role) {
            if !seat.guest {
                seat.rating = Some(rating);
            }
        }
    }

    /// 执某色的座位
    pub fn role_of_color(&self, color: Color) -> SeatRole {
        if self.owner.color == color {
            SeatRole::Owner
        } else {
            SeatRole::Opponent
        }
    }

    /// 对方座位的玩家
    pub fn other_player(&self, player_id: &str) -> Option<&Seat> {
        self.seat_of(player_id).and_then(|role| self.seat(role.other()))
    }

    pub fn is_players_turn(&self, player_id: &str) -> bool {
        self.seat_of(player_id)
            .and_then(|role| self.seat(role))
            .is_some_and(|seat| seat.color == self.board.turn())
    }

    /// 棋盘终局或已记录终局原因
    pub fn is_game_over(&self) -> bool {
        self.cause.is_some() || self.board.status().is_terminal()
    }

    /// 已在座的玩家 ID
    pub fn player_ids(&self) -> impl Iterator<Item = &PlayerId> {
        std::iter::once(&self.owner.id).chain(self.opponent.iter().map(|s| &s.id))
    }

    // === 座位 ===

    /// 设为私人对局
    pub fn make_private(&mut self, invited: PlayerId) {
        self.invited = Some(invited);
    }

    /// 对手入座，颜色必须与房主相反且座位为空
    pub fn add_opponent(&mut self, seat: Seat) -> bool {
        if self.opponent.is_some() || seat.color == self.owner.color {
            return false;
        }
        self.opponent = Some(seat);
        true
    }

    pub fn remove_opponent(&mut self, player_id: &str) -> bool {
        if self.opponent.as_ref().is_some_and(|s| s.id == player_id) {
            self.opponent = None;
            true
        } else {
            false
        }
    }

    pub fn set_player_connected(&mut self, player_id: &str, connected: bool) {
        if let Some(role) = self.seat_of(player_id) {
            if let Some(seat) = self.seat_mut(role) {
                seat.connected = connected;
            }
        }
    }

    // === 对局操作 ===

    /// 走子。成功后给刚走完的一方加秒，首步开始计时，任何一步都会撤销待处理的提和
    pub fn make_move(&mut self, mv: &MoveRequest) -> MoveOutcome {
        if self.is_game_over() {
            return MoveOutcome::Rejected;
        }
        let Some(detail) = self.board.apply(mv) else {
            return MoveOutcome::Rejected;
        };

        let mover = self.role_of_color(detail.color);
        let increment = self.tempo.increment_secs();
        match mover {
            SeatRole::Owner => self.clock.owner += increment,
            SeatRole::Opponent => self.clock.opponent += increment,
        }

        self.draw_offered_by = None;
        let clock_started = !self.has_started;
        self.has_started = true;

        let status = self.board.status();
        let finished = if status.checkmate {
            self.finish(TerminalCause::Checkmate, Some(detail.color));
            true
        } else if let Some(kind) = status.draw_kind() {
            self.finish(TerminalCause::Draw(kind), None);
            true
        } else {
            false
        };

        MoveOutcome::Accepted {
            detail,
            clock_started,
            finished,
        }
    }

    /// 认输。需双方在座；已结束的对局视为成功但不改变状态
    pub fn resign(&mut self, player_id: &str) -> bool {
        if self.opponent.is_none() {
            return false;
        }
        let Some(role) = self.seat_of(player_id) else {
            return false;
        };
        if self.is_game_over() {
            return true;
        }

        let winner = self.seat(role.other()).map(|s| s.color);
        self.finish(
            TerminalCause::Resignation {
                by: player_id.to_string(),
            },
            winner,
        );
        true
    }

    /// 提和，已有提和时不变
    pub fn offer_draw(&mut self, player_id: &str) -> bool {
        if !self.contains(player_id) || self.opponent.is_none() || self.is_game_over() {
            return false;
        }
        if self.draw_offered_by.is_none() {
            self.draw_offered_by = Some(player_id.to_string());
        }
        true
    }

    /// 回应提和，只接受非提和方的回应
    pub fn draw_response(&mut self, player_id: &str, accepted: bool) -> bool {
        if self.is_game_over() || !self.is_response_to(self.draw_offered_by.as_deref(), player_id) {
            return false;
        }

        if accepted {
            self.finish(TerminalCause::Draw(DrawKind::Agreement), None);
        } else {
            self.draw_offered_by = None;
        }
        true
    }

    /// 请求再战，仅在终局后有效
    pub fn offer_rematch(&mut self, player_id: &str) -> bool {
        if !self.contains(player_id) || self.opponent.is_none() || !self.is_game_over() {
            return false;
        }
        if self.rematch_offered_by.is_none() {
            self.rematch_offered_by = Some(player_id.to_string());
        }
        true
    }

    /// 回应再战。同意后重置对局并交换双方颜色
    pub fn rematch_response(&mut self, player_id: &str, accepted: bool) -> bool {
        if !self.is_game_over()
            || !self.is_response_to(self.rematch_offered_by.as_deref(), player_id)
        {
            return false;
        }

        if accepted {
            self.reset();
            self.owner.color = self.owner.color.opponent();
            if let Some(opponent) = self.opponent.as_mut() {
                opponent.color = opponent.color.opponent();
            }
        } else {
            self.rematch_offered_by = None;
        }
        true
    }

    fn is_response_to(&self, offered_by: Option<&str>, player_id: &str) -> bool {
        match offered_by {
            Some(offerer) => offerer != player_id && self.contains(player_id),
            None => false,
        }
    }

    /// 超时判负
    pub fn end_game_due_to_timeout(&mut self, loser: SeatRole) {
        if self.is_game_over() {
            return;
        }
        let winner = self.seat(loser.other()).map(|s| s.color);
        self.finish(TerminalCause::Timeout, winner);
    }

    /// 断线超时判负，只对已开始的对局有效
    pub fn end_game_due_to_disconnection(&mut self, player_id: &str) -> bool {
        if !self.has_started || self.is_game_over() {
            return false;
        }
        let Some(role) = self.seat_of(player_id) else {
            return false;
        };

        let winner = self.seat(role.other()).map(|s| s.color);
        self.finish(
            TerminalCause::Disconnection {
                by: player_id.to_string(),
            },
            winner,
        );
        true
    }

    /// 棋钟走一秒：扣轮到走子一方的时间，归零即超时判负
    pub fn tick(&mut self) -> ClockTick {
        if !self.has_started || self.is_game_over() {
            return ClockTick::Idle;
        }

        let role = self.role_of_color(self.board.turn());
        let remaining = match role {
            SeatRole::Owner => &mut self.clock.owner,
            SeatRole::Opponent => &mut self.clock.opponent,
        };
        *remaining = remaining.saturating_sub(1);

        if *remaining == 0 {
            self.end_game_due_to_timeout(role);
            ClockTick::Flagged(role)
        } else {
            ClockTick::Running
        }
    }

    /// 重置为新局：初始局面、满时、清空终局与请求状态
    pub fn reset(&mut self) {
        self.board.reset();
        let base = self.tempo.base_secs();
        self.clock = ClockView {
            owner: base,
            opponent: base,
        };
        self.has_started = false;
        self.cause = None;
        self.winner = None;
        self.draw_offered_by = None;
        self.rematch_offered_by = None;
        self.outcome_latched = false;
        self.pending_outcome = None;
        self.timers.cancel();
    }

    /// 取走待处理的赛后数据，每次终局只返回一次
    pub fn take_outcome(&mut self) -> Option<GameOutcome> {
        self.pending_outcome.take()
    }

    fn finish(&mut self, cause: TerminalCause, winner: Option<Color>) {
        self.cause = Some(cause);
        self.winner = winner;
        self.draw_offered_by = None;
        self.timers.cancel();
        self.post_game_processing();
    }

    fn post_game_processing(&mut self) {
        if self.outcome_latched {
            return;
        }
        self.outcome_latched = true;

        let (Some(cause), Some(opponent)) = (self.cause.clone(), self.opponent.as_ref()) else {
            warn!(match_id = %self.id, "对局结束时缺少对手，跳过赛后处理");
            return;
        };
        let (white, black) = if self.owner.color == Color::White {
            (self.owner.clone(), opponent.clone())
        } else {
            (opponent.clone(), self.owner.clone())
        };

        self.pending_outcome = Some(GameOutcome {
            match_id: self.id.clone(),
            game_type: self.game_type,
            tempo: self.tempo,
            ranked: self.ranked,
            white,
            black,
            winner: self.winner,
            cause,
            pgn: self.board.pgn(),
            finished_at: Utc::now(),
        });
    }

    // === 投影 ===

    /// 完整状态快照
    pub fn snapshot(&self) -> GameSnapshot {
        let status = self.board.status();
        let game_over = self.is_game_over();
        let cause = self.cause.as_ref();

        GameSnapshot {
            match_id: self.id.clone(),
            game_type: self.game_type,
            tempo: self.tempo,
            ranked: self.ranked,
            private_game: self.is_private(),
            owner: self.owner.view(),
            opponent: self.opponent.as_ref().map(Seat::view),
            fen: self.board.fen(),
            pgn: self.board.pgn(),
            has_started: self.has_started,
            game_over,
            winner: self.winner,
            turn: self.board.turn(),
            check: status.check,
            checkmate: status.checkmate,
            pos_of_king_in_check: self.board.king_in_check(),
            stalemate: status.stalemate,
            insufficient_material: status.insufficient_material,
            threefold_repetition: status.threefold_repetition,
            fifty_move_rule: status.fifty_move_rule,
            draw: status.is_draw() || matches!(cause, Some(TerminalCause::Draw(_))),
            valid_moves: if game_over {
                Vec::new()
            } else {
                self.board.legal_moves()
            },
            last_move: self.board.last_move(),
            ended_by_timeout: matches!(cause, Some(TerminalCause::Timeout)),
            ended_by_draw: matches!(cause, Some(TerminalCause::Draw(_))),
            ended_by_checkmate: matches!(cause, Some(TerminalCause::Checkmate)),
            ended_by_resignation: matches!(cause, Some(TerminalCause::Resignation { .. })),
            ended_by_disconnection: matches!(cause, Some(TerminalCause::Disconnection { .. })),
            who_resigned: match cause {
                Some(TerminalCause::Resignation { by }) => Some(by.clone()),
                _ => None,
            },
            who_disconnected: match cause {
                Some(TerminalCause::Disconnection { by }) => Some(by.clone()),
                _ => None,
            },
            draw_offered_by: self.draw_offered_by.clone(),
            rematch_offered_by: self.rematch_offered_by.clone(),
            clock: self.clock,
        }
    }

    /// 列表用的简要信息
    pub fn summary(&self) -> MatchSummary {
        MatchSummary {
            match_id: self.id.clone(),
            tempo: self.tempo,
            ranked: self.ranked,
            game_type: self.game_type,
            owner: self.owner.view(),
            opponent: self.opponent.as_ref().map(Seat::view),
            created_at: self.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn seat(id: &str, color: Color) -> Seat {
        Seat::new(id.to_string(), format!("Guest_{}", id), None, true, color)
    }

    fn seated(tempo: &str) -> ClockedMatch {
        let mut m = ClockedMatch::create(tempo, false, GameType::Blitz, seat("alice", Color::White))
            .unwrap();
        assert!(m.add_opponent(seat("bob", Color::Black)));
        m
    }

    fn seated_at(fen: &str) -> ClockedMatch {
        let owner = seat("alice", Color::White);
        let board = StandardChess::from_fen(fen);
        let mut m = ClockedMatch::with_engine(
            "3+2".parse().unwrap(),
            false,
            GameType::Blitz,
            owner,
            board,
        );
        assert!(m.add_opponent(seat("bob", Color::Black)));
        m
    }

    fn uci(moves: &str) -> Vec<(&str, &str)> {
        moves.split_whitespace().map(|m| m.split_at(2)).collect()
    }

    /// 走完最后一步并检查以和棋终局
    fn assert_drawn_by(m: &mut ClockedMatch, last: (&str, &str), kind: DrawKind) {
        match m.make_move(&MoveRequest::new(last.0, last.1)) {
            MoveOutcome::Accepted { finished, .. } => assert!(finished),
            MoveOutcome::Rejected => panic!("{}{} should be accepted", last.0, last.1),
        }
        assert_eq!(m.cause(), Some(&TerminalCause::Draw(kind)));
        assert!(m.is_game_over());
        assert_eq!(m.winner(), None);
        assert!(m.snapshot().game_over);

        let outcome = m.take_outcome().unwrap();
        assert_eq!(outcome.cause, TerminalCause::Draw(kind));
        assert_eq!(outcome.winner, None);
        assert!(m.take_outcome().is_none());
    }

    fn play(m: &mut ClockedMatch, moves: &[(&str, &str)]) {
        for (from, to) in moves {
            assert!(m.make_move(&MoveRequest::new(from, to)).is_accepted());
        }
    }

    #[test]
    fn test_create_sets_clock() {
        let m = ClockedMatch::create("3+2", false, GameType::Blitz, seat("alice", Color::White))
            .unwrap();
        assert_eq!(m.clock(), ClockView { owner: 180, opponent: 180 });
        assert!(!m.has_started());
        assert!(!m.is_full());
        assert!(!m.is_game_over());
        assert_eq!(m.id().split_once('-').map(|(_, s)| s.len()), Some(9));
    }

    #[test]
    fn test_create_rejects_malformed_tempo() {
        let result = ClockedMatch::create("blitz", false, GameType::Blitz, seat("a", Color::White));
        assert!(result.is_err());
    }

    #[test]
    fn test_add_opponent() {
        let mut m = ClockedMatch::create("5+0", false, GameType::Blitz, seat("alice", Color::Black))
            .unwrap();
        assert!(!m.add_opponent(seat("bob", Color::Black)));
        assert!(m.add_opponent(seat("bob", Color::White)));
        assert!(!m.add_opponent(seat("carol", Color::White)));

        assert_eq!(m.seat_of("bob"), Some(SeatRole::Opponent));
        assert_eq!(m.role_of_color(Color::White), SeatRole::Opponent);
        assert!(m.is_players_turn("bob"));
        assert!(!m.is_players_turn("alice"));

        assert!(m.remove_opponent("bob"));
        assert!(!m.is_full());
        assert!(!m.remove_opponent("bob"));
    }

    #[test]
    fn test_first_move_starts_clock_and_increments_mover() {
        let mut m = seated("3+2");

        match m.make_move(&MoveRequest::new("e2", "e4")) {
            MoveOutcome::Accepted { clock_started, finished, detail } => {
                assert!(clock_started);
                assert!(!finished);
                assert_eq!(detail.san, "e4");
            }
            MoveOutcome::Rejected => panic!("e4 should be accepted"),
        }
        assert!(m.has_started());
        assert_eq!(m.clock(), ClockView { owner: 182, opponent: 180 });

        match m.make_move(&MoveRequest::new("e7", "e5")) {
            MoveOutcome::Accepted { clock_started, .. } => assert!(!clock_started),
            MoveOutcome::Rejected => panic!("e5 should be accepted"),
        }
        assert_eq!(m.clock(), ClockView { owner: 182, opponent: 182 });
    }

    #[test]
    fn test_illegal_move_keeps_state() {
        let mut m = seated("3+2");
        let before = m.snapshot();

        assert_eq!(m.make_move(&MoveRequest::new("e2", "e5")), MoveOutcome::Rejected);
        assert_eq!(m.snapshot(), before);
        assert!(!m.has_started());
    }

    #[test]
    fn test_tick_charges_side_to_move() {
        let mut m = seated("3+0");
        assert_eq!(m.tick(), ClockTick::Idle);

        play(&mut m, &[("e2", "e4")]);
        assert_eq!(m.tick(), ClockTick::Running);
        assert_eq!(m.clock(), ClockView { owner: 180, opponent: 179 });

        play(&mut m, &[("e7", "e5")]);
        m.tick();
        m.tick();
        assert_eq!(m.clock(), ClockView { owner: 178, opponent: 179 });
    }

    #[test]
    fn test_flag_ends_game_once() {
        let mut m = seated("1+0");
        play(&mut m, &[("e2", "e4"), ("e7", "e5")]);

        for _ in 0..59 {
            assert_eq!(m.tick(), ClockTick::Running);
        }
        assert_eq!(m.tick(), ClockTick::Flagged(SeatRole::Owner));

        assert_eq!(m.clock().owner, 0);
        assert_eq!(m.cause(), Some(&TerminalCause::Timeout));
        assert_eq!(m.winner(), Some(Color::Black));
        assert_eq!(m.tick(), ClockTick::Idle);
        assert_eq!(m.clock().owner, 0);

        let snapshot = m.snapshot();
        assert!(snapshot.game_over);
        assert!(snapshot.ended_by_timeout);
        assert_eq!(snapshot.terminal_flag_count(), 1);
        assert!(snapshot.valid_moves.is_empty());

        let outcome = m.take_outcome().unwrap();
        assert_eq!(outcome.cause, TerminalCause::Timeout);
        assert_eq!(outcome.white.id, "alice");
        assert!(m.take_outcome().is_none());

        // 终局后的其他操作不再产出赛后数据
        assert!(m.resign("bob"));
        m.end_game_due_to_timeout(SeatRole::Opponent);
        assert!(m.take_outcome().is_none());
        assert_eq!(m.winner(), Some(Color::Black));
    }

    #[test]
    fn test_checkmate() {
        let mut m = seated("10+0");
        play(&mut m, &[("f2", "f3"), ("e7", "e5"), ("g2", "g4")]);

        match m.make_move(&MoveRequest::new("d8", "h4")) {
            MoveOutcome::Accepted { finished, .. } => assert!(finished),
            MoveOutcome::Rejected => panic!("Qh4 should be accepted"),
        }
        assert_eq!(m.cause(), Some(&TerminalCause::Checkmate));
        assert_eq!(m.winner(), Some(Color::Black));

        let snapshot = m.snapshot();
        assert!(snapshot.checkmate);
        assert!(snapshot.ended_by_checkmate);
        assert_eq!(snapshot.pos_of_king_in_check.as_deref(), Some("e1"));
        assert_eq!(snapshot.terminal_flag_count(), 1);
        assert_eq!(m.make_move(&MoveRequest::new("a2", "a3")), MoveOutcome::Rejected);

        let outcome = m.take_outcome().unwrap();
        assert_eq!(outcome.winner, Some(Color::Black));
        assert_eq!(outcome.pgn, "1. f3 e5 2. g4 Qh4#");
    }

    #[test]
    fn test_stalemate_draws() {
        let mut m = seated("10+0");
        let moves = "e2e3 a7a5 d1h5 a8a6 h5a5 h7h5 h2h4 a6h6 a5c7 f7f6 \
                     c7d7 e8f7 d7b7 d8d3 b7b8 d3h7 b8c8 f7g6";
        play(&mut m, &uci(moves));
        assert_drawn_by(&mut m, ("c8", "e6"), DrawKind::Stalemate);
        assert!(m.snapshot().stalemate);
    }

    #[test]
    fn test_threefold_repetition_draws() {
        let mut m = seated("10+0");
        play(&mut m, &uci("g1f3 g8f6 f3g1 f6g8 g1f3 g8f6 f3g1"));
        assert_drawn_by(&mut m, ("f6", "g8"), DrawKind::ThreefoldRepetition);
    }

    #[test]
    fn test_insufficient_material_draws() {
        let mut m = seated_at("4k3/8/8/8/8/8/4r3/4K3 w - - 0 1");
        assert_drawn_by(&mut m, ("e1", "e2"), DrawKind::InsufficientMaterial);
    }

    #[test]
    fn test_fifty_move_rule_draws() {
        let mut m = seated_at("4k3/8/8/8/8/8/8/R3K3 w - - 99 80");
        assert_drawn_by(&mut m, ("a1", "a2"), DrawKind::FiftyMoveRule);
    }

    #[test]
    fn test_refresh_rating_skips_guests() {
        let owner = Seat::new(
            "alice".to_string(),
            "alice".to_string(),
            Some(1200),
            false,
            Color::White,
        );
        let mut m = ClockedMatch::create("3+2", true, GameType::Blitz, owner).unwrap();
        assert!(m.add_opponent(seat("bob", Color::Black)));

        m.refresh_rating("alice", 1177);
        m.refresh_rating("bob", 1500);
        m.refresh_rating("carol", 900);
        assert_eq!(m.owner().rating, Some(1177));
        assert_eq!(m.opponent().unwrap().rating, None);
    }

    #[test]
    fn test_resign_idempotent() {
        let mut m = seated("5+0");
        play(&mut m, &[("e2", "e4")]);

        assert!(m.resign("alice"));
        let once = m.snapshot();
        assert!(m.resign("alice"));
        assert_eq!(m.snapshot(), once);

        assert!(once.ended_by_resignation);
        assert_eq!(once.who_resigned.as_deref(), Some("alice"));
        assert_eq!(once.winner, Some(Color::Black));
        assert!(m.take_outcome().is_some());
        assert!(m.take_outcome().is_none());
    }

    #[test]
    fn test_resign_requires_both_seats() {
        let mut m = ClockedMatch::create("5+0", false, GameType::Blitz, seat("alice", Color::White))
            .unwrap();
        assert!(!m.resign("alice"));

        m.add_opponent(seat("bob", Color::Black));
        assert!(!m.resign("mallory"));
        assert!(!m.is_game_over());
    }

    #[test]
    fn test_draw_offer_flow() {
        let mut m = seated("5+0");
        play(&mut m, &[("e2", "e4")]);

        assert!(m.offer_draw("alice"));
        let once = m.snapshot();
        assert!(m.offer_draw("alice"));
        assert!(m.offer_draw("bob"));
        assert_eq!(m.snapshot(), once);
        assert_eq!(m.draw_offered_by(), Some("alice"));

        // 提和方不能自己同意
        assert!(!m.draw_response("alice", true));
        assert!(!m.is_game_over());

        assert!(m.draw_response("bob", false));
        assert!(m.draw_offered_by().is_none());

        assert!(m.offer_draw("bob"));
        assert!(m.draw_response("alice", true));
        assert_eq!(m.cause(), Some(&TerminalCause::Draw(DrawKind::Agreement)));
        assert_eq!(m.winner(), None);

        let snapshot = m.snapshot();
        assert!(snapshot.draw);
        assert!(snapshot.ended_by_draw);
        assert_eq!(snapshot.terminal_flag_count(), 1);
        assert!(snapshot.draw_offered_by.is_none());
    }

    #[test]
    fn test_move_clears_draw_offer() {
        let mut m = seated("5+0");
        play(&mut m, &[("e2", "e4")]);
        assert!(m.offer_draw("alice"));
        play(&mut m, &[("e7", "e5")]);
        assert!(m.draw_offered_by().is_none());
    }

    #[test]
    fn test_rematch_swaps_colors() {
        let mut m = seated("3+2");
        play(&mut m, &[("f2", "f3"), ("e7", "e5"), ("g2", "g4"), ("d8", "h4")]);
        assert!(m.is_game_over());
        assert!(m.take_outcome().is_some());

        assert!(m.offer_rematch("alice"));
        assert!(!m.rematch_response("alice", true));
        assert!(m.rematch_response("bob", true));

        let snapshot = m.snapshot();
        assert!(!snapshot.has_started);
        assert!(!snapshot.game_over);
        assert_eq!(snapshot.terminal_flag_count(), 0);
        assert_eq!(snapshot.winner, None);
        assert!(snapshot.rematch_offered_by.is_none());
        assert_eq!(snapshot.owner.color, Color::Black);
        assert_eq!(snapshot.opponent.map(|s| s.color), Some(Color::White));
        assert_eq!(snapshot.clock, ClockView { owner: 180, opponent: 180 });
        assert!(snapshot.pgn.is_empty());

        // 新一局终局时再次产出赛后数据
        assert!(m.resign("alice"));
        let outcome = m.take_outcome().unwrap();
        assert_eq!(outcome.white.id, "bob");
        assert_eq!(outcome.winner, Some(Color::White));
    }

    #[test]
    fn test_rematch_requires_finished_game() {
        let mut m = seated("3+2");
        assert!(!m.offer_rematch("alice"));

        m.resign("bob");
        assert!(m.offer_rematch("alice"));
        assert!(m.rematch_response("bob", false));
        assert!(m.rematch_offered_by().is_none());
        assert!(m.is_game_over());
    }

    #[test]
    fn test_disconnection_only_after_start() {
        let mut m = seated("3+2");
        assert!(!m.end_game_due_to_disconnection("alice"));

        play(&mut m, &[("e2", "e4")]);
        m.set_player_connected("bob", false);
        assert!(!m.snapshot().opponent.unwrap().connected);

        assert!(m.end_game_due_to_disconnection("bob"));
        let snapshot = m.snapshot();
        assert!(snapshot.ended_by_disconnection);
        assert_eq!(snapshot.who_disconnected.as_deref(), Some("bob"));
        assert_eq!(snapshot.winner, Some(Color::White));
        assert_eq!(snapshot.terminal_flag_count(), 1);
    }

    #[test]
    fn test_summary_and_private() {
        let mut m = seated("15+10");
        m.make_private("bob".to_string());
        assert!(m.is_private());
        assert_eq!(m.invited_player(), Some("bob"));

        let summary = m.summary();
        assert_eq!(summary.match_id, m.id());
        assert_eq!(summary.tempo.to_string(), "15+10");
        assert_eq!(summary.opponent.map(|s| s.id), Some("bob".to_string()));
        assert!(m.snapshot().private_game);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timers_cancel_aborts_tasks() {
        let (tx, mut rx) = mpsc::channel::<()>(8);
        let spawn_ticker = |tx: mpsc::Sender<()>| {
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    if tx.send(()).await.is_err() {
                        break;
                    }
                }
            })
        };

        let mut m = seated("3+2");
        let epoch = m.timers_mut().arm();
        m.timers_mut().start(spawn_ticker(tx.clone()), spawn_ticker(tx));
        assert!(m.timers().is_current(epoch));
        assert!(!m.timers().is_current(epoch + 1));

        m.resign("alice");
        assert!(!m.timers().is_running());
        assert!(!m.timers().is_current(epoch));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_match_aborts_tasks() {
        let (tx, mut rx) = mpsc::channel::<()>(8);
        let ticker = {
            let tx = tx.clone();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    let _ = tx.send(()).await;
                }
            })
        };
        let idle = tokio::spawn(async move {
            let _tx = tx;
            std::future::pending::<()>().await;
        });

        let mut m = seated("3+2");
        m.timers_mut().start(ticker, idle);
        drop(m);
        assert_eq!(rx.recv().await, None);
    }
}
