//! 用时与对局类型

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TempoError;

/// 执棋颜色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Color {
    #[serde(rename = "w")]
    White,
    #[serde(rename = "b")]
    Black,
}

impl Color {
    /// 获取对方颜色
    pub fn opponent(self) -> Self {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }

    /// 单字符表示（"w" / "b"）
    pub fn as_char(self) -> char {
        match self {
            Color::White => 'w',
            Color::Black => 'b',
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// 对局类型（按用时划分）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameType {
    Bullet,
    Blitz,
    Rapid,
    Classical,
}

impl GameType {
    pub fn as_str(self) -> &'static str {
        match self {
            GameType::Bullet => "bullet",
            GameType::Blitz => "blitz",
            GameType::Rapid => "rapid",
            GameType::Classical => "classical",
        }
    }
}

impl fmt::Display for GameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 各对局类型的等级分
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ratings {
    pub bullet: u32,
    pub blitz: u32,
    pub rapid: u32,
    pub classical: u32,
}

impl Ratings {
    pub fn get(&self, game_type: GameType) -> u32 {
        match game_type {
            GameType::Bullet => self.bullet,
            GameType::Blitz => self.blitz,
            GameType::Rapid => self.rapid,
            GameType::Classical => self.classical,
        }
    }

    pub fn set(&mut self, game_type: GameType, rating: u32) {
        match game_type {
            GameType::Bullet => self.bullet = rating,
            GameType::Blitz => self.blitz = rating,
            GameType::Rapid => self.rapid = rating,
            GameType::Classical => self.classical = rating,
        }
    }
}

impl Default for Ratings {
    fn default() -> Self {
        let r = crate::constants::DEFAULT_RATING;
        Self {
            bullet: r,
            blitz: r,
            rapid: r,
            classical: r,
        }
    }
}

/// 用时：基础分钟 + 每步加秒，线上格式为 "3+2"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Tempo {
    minutes: u32,
    increment: u32,
}

impl Tempo {
    pub fn new(minutes: u32, increment: u32) -> Self {
        Self { minutes, increment }
    }

    /// 基础分钟
    pub fn minutes(&self) -> u32 {
        self.minutes
    }

    /// 每步加秒
    pub fn increment_secs(&self) -> u32 {
        self.increment
    }

    /// 每方初始秒数
    pub fn base_secs(&self) -> u32 {
        self.minutes * 60
    }
}

impl FromStr for Tempo {
    type Err = TempoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (minutes, increment) = s
            .split_once('+')
            .ok_or_else(|| TempoError::MissingSeparator(s.to_string()))?;

        let minutes: u32 = minutes
            .trim()
            .parse()
            .map_err(|_| TempoError::NotANumber(s.to_string()))?;
        let increment: u32 = increment
            .trim()
            .parse()
            .map_err(|_| TempoError::NotANumber(s.to_string()))?;

        if minutes == 0 {
            return Err(TempoError::ZeroBase(s.to_string()));
        }

        Ok(Self { minutes, increment })
    }
}

impl TryFrom<String> for Tempo {
    type Error = TempoError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Tempo> for String {
    fn from(tempo: Tempo) -> Self {
        tempo.to_string()
    }
}

impl fmt::Display for Tempo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.minutes, self.increment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tempo() {
        let tempo: Tempo = "3+2".parse().unwrap();
        assert_eq!(tempo.minutes(), 3);
        assert_eq!(tempo.increment_secs(), 2);
        assert_eq!(tempo.base_secs(), 180);
        assert_eq!(tempo.to_string(), "3+2");
    }

    #[test]
    fn test_parse_tempo_without_increment() {
        let tempo: Tempo = "10+0".parse().unwrap();
        assert_eq!(tempo.base_secs(), 600);
        assert_eq!(tempo.increment_secs(), 0);
    }

    #[test]
    fn test_malformed_tempo() {
        assert!(matches!("3".parse::<Tempo>(), Err(TempoError::MissingSeparator(_))));
        assert!(matches!("a+2".parse::<Tempo>(), Err(TempoError::NotANumber(_))));
        assert!(matches!("3+-1".parse::<Tempo>(), Err(TempoError::NotANumber(_))));
        assert!(matches!("0+5".parse::<Tempo>(), Err(TempoError::ZeroBase(_))));
    }

    #[test]
    fn test_tempo_json_is_string() {
        let json = serde_json::to_string(&Tempo::new(5, 3)).unwrap();
        assert_eq!(json, "\"5+3\"");
        let back: Tempo = serde_json::from_str("\"15+10\"").unwrap();
        assert_eq!(back, Tempo::new(15, 10));
        assert!(serde_json::from_str::<Tempo>("\"fast\"").is_err());
    }

    #[test]
    fn test_color_wire_format() {
        assert_eq!(serde_json::to_string(&Color::White).unwrap(), "\"w\"");
        assert_eq!(Color::Black.opponent(), Color::White);
    }
}
