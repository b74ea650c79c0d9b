//! 服务端配置
//!
//! 配置文件为 JSON，路径由环境变量 `MATCH_SERVER_CONFIG` 指定；未设置时使用默认值。

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use protocol::{GameType, PlayerId, Ratings, Tempo, CLOCK_TICK_MS, DEFAULT_K_FACTOR,
    DISCONNECT_GRACE_SECS, MAX_CONCURRENT_MATCHES};
use serde::{Deserialize, Serialize};

/// 配置文件路径环境变量
pub const CONFIG_ENV: &str = "MATCH_SERVER_CONFIG";

/// 对局类型划分阈值（分钟，含下界）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameTypeThresholds {
    pub classical: u32,
    pub rapid: u32,
    pub blitz: u32,
}

impl GameTypeThresholds {
    /// 按基础分钟划分对局类型，加秒不参与
    pub fn classify(&self, tempo: &Tempo) -> GameType {
        let minutes = tempo.minutes();
        if minutes >= self.classical {
            GameType::Classical
        } else if minutes >= self.rapid {
            GameType::Rapid
        } else if minutes >= self.blitz {
            GameType::Blitz
        } else {
            GameType::Bullet
        }
    }
}

impl Default for GameTypeThresholds {
    fn default() -> Self {
        Self {
            classical: 30,
            rapid: 10,
            blitz: 3,
        }
    }
}

/// 注册账号（令牌 -> 身份）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountConfig {
    pub token: String,
    pub id: PlayerId,
    pub username: String,
    #[serde(default)]
    pub ratings: Ratings,
}

/// 服务端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// 同时进行的对局上限
    pub max_matches: usize,
    /// 断线保留时间（秒）
    pub disconnect_grace_secs: u64,
    /// 时钟步进间隔（毫秒），每次步进扣一秒
    pub clock_tick_ms: u64,
    /// 每个连接的发送队列长度
    pub outbound_buffer: usize,
    pub rating_k_factor: f64,
    pub data_dir: PathBuf,
    pub game_types: GameTypeThresholds,
    pub accounts: Vec<AccountConfig>,
}

impl ServerConfig {
    /// 从环境变量指定的文件加载
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    /// 从 JSON 文件加载
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败: {:?}", path))?;
        Self::from_json(&content).with_context(|| format!("解析配置文件失败: {:?}", path))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        if config.clock_tick_ms == 0 {
            anyhow::bail!("clock_tick_ms must be positive");
        }
        Ok(config)
    }

    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_secs(self.disconnect_grace_secs)
    }

    pub fn clock_tick(&self) -> Duration {
        Duration::from_millis(self.clock_tick_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:9527".to_string(),
            max_matches: MAX_CONCURRENT_MATCHES,
            disconnect_grace_secs: DISCONNECT_GRACE_SECS,
            clock_tick_ms: CLOCK_TICK_MS,
            outbound_buffer: 64,
            rating_k_factor: DEFAULT_K_FACTOR,
            data_dir: default_data_dir(),
            game_types: GameTypeThresholds::default(),
            accounts: Vec::new(),
        }
    }
}

/// 跨平台数据目录，取不到时退回当前目录
fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chess-arena")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_game_type() {
        let thresholds = GameTypeThresholds::default();
        assert_eq!(thresholds.classify(&"1+0".parse().unwrap()), GameType::Bullet);
        assert_eq!(thresholds.classify(&"2+1".parse().unwrap()), GameType::Bullet);
        assert_eq!(thresholds.classify(&"3+2".parse().unwrap()), GameType::Blitz);
        assert_eq!(thresholds.classify(&"10+0".parse().unwrap()), GameType::Rapid);
        assert_eq!(thresholds.classify(&"29+30".parse().unwrap()), GameType::Rapid);
        assert_eq!(thresholds.classify(&"30+0".parse().unwrap()), GameType::Classical);
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.max_matches, 100);
        assert_eq!(config.disconnect_grace(), Duration::from_secs(15));
        assert_eq!(config.clock_tick(), Duration::from_secs(1));
        assert!(config.data_dir.ends_with("chess-arena"));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = ServerConfig::from_json(
            r#"{
                "max_matches": 2,
                "accounts": [{"token": "t1", "id": "u1", "username": "alice"}]
            }"#,
        )
        .unwrap();

        assert_eq!(config.max_matches, 2);
        assert_eq!(config.listen_addr, "127.0.0.1:9527");
        assert_eq!(config.accounts[0].ratings.blitz, 1200);
    }

    #[test]
    fn test_zero_tick_rejected() {
        assert!(ServerConfig::from_json(r#"{"clock_tick_ms": 0}"#).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("server.json");
        fs::write(&path, r#"{"rating_k_factor": 16.0}"#).unwrap();

        let config = ServerConfig::load(&path).unwrap();
        assert_eq!(config.rating_k_factor, 16.0);
        assert!(ServerConfig::load(&dir.path().join("missing.json")).is_err());
    }
}
