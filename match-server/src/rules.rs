//! 棋规引擎
//!
//! 对局只通过 [`RuleEngine`] 访问棋盘：走子合法性、终局判定、FEN/PGN 与合法着法列表。
//! 默认实现 [`StandardChess`] 基于 shakmaty。

use protocol::{Color, MoveDetail, MoveRequest};
use shakmaty::fen::Fen;
use shakmaty::san::San;
use shakmaty::uci::UciMove;
use shakmaty::{Chess, EnPassantMode, Move, Position};

/// 和棋类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawKind {
    /// 双方同意
    Agreement,
    Stalemate,
    InsufficientMaterial,
    ThreefoldRepetition,
    FiftyMoveRule,
}

/// 棋盘层面的局面状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoardStatus {
    pub check: bool,
    pub checkmate: bool,
    pub stalemate: bool,
    pub insufficient_material: bool,
    pub threefold_repetition: bool,
    pub fifty_move_rule: bool,
}

impl BoardStatus {
    /// 棋盘判和的原因（按优先级取第一个）
    pub fn draw_kind(&self) -> Option<DrawKind> {
        if self.stalemate {
            Some(DrawKind::Stalemate)
        } else if self.insufficient_material {
            Some(DrawKind::InsufficientMaterial)
        } else if self.threefold_repetition {
            Some(DrawKind::ThreefoldRepetition)
        } else if self.fifty_move_rule {
            Some(DrawKind::FiftyMoveRule)
        } else {
            None
        }
    }

    pub fn is_draw(&self) -> bool {
        self.draw_kind().is_some()
    }

    /// 棋盘是否已终局
    pub fn is_terminal(&self) -> bool {
        self.checkmate || self.is_draw()
    }
}

/// 棋规引擎抽象
pub trait RuleEngine: Send + 'static {
    /// 当前局面 FEN
    fn fen(&self) -> String;

    /// 轮到哪方走
    fn turn(&self) -> Color;

    /// 尝试走子，非法时返回 None 且局面不变
    fn apply(&mut self, mv: &MoveRequest) -> Option<MoveDetail>;

    fn status(&self) -> BoardStatus;

    /// 当前方的全部合法着法
    fn legal_moves(&self) -> Vec<MoveDetail>;

    /// 被将军一方王所在格（如 "e1"）
    fn king_in_check(&self) -> Option<String>;

    fn pgn(&self) -> String;

    fn last_move(&self) -> Option<MoveDetail>;

    /// 回到初始局面
    fn reset(&mut self);
}

/// 标准国际象棋
#[derive(Debug, Clone)]
pub struct StandardChess {
    position: Chess,
    /// 每个局面的重复判定键（FEN 前四段），含初始局面
    repetition_keys: Vec<String>,
    history: Vec<MoveDetail>,
}

impl StandardChess {
    pub fn new() -> Self {
        let position = Chess::default();
        let key = repetition_key(&position);
        Self {
            position,
            repetition_keys: vec![key],
            history: Vec::new(),
        }
    }

    /// 从 FEN 局面开始
    #[cfg(test)]
    pub fn from_fen(fen: &str) -> Self {
        let position: Chess = fen
            .parse::<Fen>()
            .unwrap()
            .into_position(shakmaty::CastlingMode::Standard)
            .unwrap();
        let key = repetition_key(&position);
        Self {
            position,
            repetition_keys: vec![key],
            history: Vec::new(),
        }
    }

    fn describe(&self, m: &Move) -> MoveDetail {
        let mut after = self.position.clone();
        after.play_unchecked(m);
        let mut san = San::from_move(&self.position, m).to_string();
        if after.is_checkmate() {
            san.push('#');
        } else if after.is_check() {
            san.push('+');
        }

        MoveDetail {
            color: to_color(self.position.turn()),
            from: m.from().map_or_else(String::new, |sq| sq.to_string()),
            // 王车易位报告王的落点
            to: m
                .castling_side()
                .map_or(m.to(), |side| side.king_to(self.position.turn()))
                .to_string(),
            piece: m.role().char(),
            captured: m.capture().map(|r| r.char()),
            promotion: m.promotion().map(|r| r.char()),
            san,
        }
    }

    fn parse(&self, mv: &MoveRequest) -> Option<Move> {
        let uci: UciMove = mv.to_uci().parse().ok()?;
        let m = uci.to_move(&self.position).ok()?;
        self.position.is_legal(&m).then_some(m)
    }
}

impl Default for StandardChess {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleEngine for StandardChess {
    fn fen(&self) -> String {
        Fen::from_position(self.position.clone(), EnPassantMode::Legal).to_string()
    }

    fn turn(&self) -> Color {
        to_color(self.position.turn())
    }

    fn apply(&mut self, mv: &MoveRequest) -> Option<MoveDetail> {
        if self.status().is_terminal() {
            return None;
        }
        let m = self.parse(mv)?;
        let detail = self.describe(&m);

        self.position.play_unchecked(&m);
        self.repetition_keys.push(repetition_key(&self.position));
        self.history.push(detail.clone());
        Some(detail)
    }

    fn status(&self) -> BoardStatus {
        let current = self.repetition_keys.last();
        let repeats = self
            .repetition_keys
            .iter()
            .filter(|k| Some(*k) == current)
            .count();

        BoardStatus {
            check: self.position.is_check(),
            checkmate: self.position.is_checkmate(),
            stalemate: self.position.is_stalemate(),
            insufficient_material: self.position.is_insufficient_material(),
            threefold_repetition: repeats >= 3,
            fifty_move_rule: self.position.halfmoves() >= 100,
        }
    }

    fn legal_moves(&self) -> Vec<MoveDetail> {
        self.position
            .legal_moves()
            .iter()
            .map(|m| self.describe(m))
            .collect()
    }

    fn king_in_check(&self) -> Option<String> {
        if !self.position.is_check() {
            return None;
        }
        self.position
            .board()
            .king_of(self.position.turn())
            .map(|sq| sq.to_string())
    }

    fn pgn(&self) -> String {
        let mut out = String::new();
        for (i, detail) in self.history.iter().enumerate() {
            if i % 2 == 0 {
                if i > 0 {
                    out.push(' ');
                }
                out.push_str(&format!("{}. ", i / 2 + 1));
            } else {
                out.push(' ');
            }
            out.push_str(&detail.san);
        }
        out
    }

    fn last_move(&self) -> Option<MoveDetail> {
        self.history.last().cloned()
    }

    fn reset(&mut self) {
        *self = Self::new();
    }
}

fn to_color(color: shakmaty::Color) -> Color {
    match color {
        shakmaty::Color::White => Color::White,
        shakmaty::Color::Black => Color::Black,
    }
}

/// 局面重复键：棋子布局、走子方、易位权、吃过路兵格
fn repetition_key(position: &Chess) -> String {
    let fen = Fen::from_position(position.clone(), EnPassantMode::Legal).to_string();
    fen.split(' ').take(4).collect::<Vec<_>>().join(" ")
}
