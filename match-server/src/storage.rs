//! 对局存储
//!
//! [`PersistenceGateway`] 是赛后流程的持久化接口；[`FileStore`] 把每局棋保存为一个 JSON 文件，
//! 玩家战绩与等级分集中保存在 `players.json`。

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use protocol::{Color, GameType, MatchId, PlayerId, Ratings, Tempo};

use crate::clocked_match::{GameOutcome, TerminalCause};
use crate::rules::DrawKind;

/// 已结束对局的存档
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRecord {
    pub match_id: MatchId,
    pub white_player: PlayerId,
    pub white_username: String,
    pub black_player: PlayerId,
    pub black_username: String,
    pub white_rating: Option<u32>,
    pub black_rating: Option<u32>,
    pub pgn: String,
    pub winner: Option<Color>,
    pub game_type: GameType,
    pub ranked: bool,
    pub tempo: Tempo,
    pub ended_by_timeout: bool,
    pub ended_by_draw: bool,
    pub ended_by_checkmate: bool,
    pub ended_by_stalemate: bool,
    pub ended_by_resignation: bool,
    pub ended_by_disconnection: bool,
    pub finished_at: DateTime<Utc>,
}

impl MatchRecord {
    pub fn from_outcome(outcome: &GameOutcome) -> Self {
        let cause = &outcome.cause;
        Self {
            match_id: outcome.match_id.clone(),
            white_player: outcome.white.id.clone(),
            white_username: outcome.white.username.clone(),
            black_player: outcome.black.id.clone(),
            black_username: outcome.black.username.clone(),
            white_rating: outcome.white.rating,
            black_rating: outcome.black.rating,
            pgn: outcome.pgn.clone(),
            winner: outcome.winner,
            game_type: outcome.game_type,
            ranked: outcome.ranked,
            tempo: outcome.tempo,
            ended_by_timeout: matches!(cause, TerminalCause::Timeout),
            ended_by_draw: matches!(cause, TerminalCause::Draw(_)),
            ended_by_checkmate: matches!(cause, TerminalCause::Checkmate),
            ended_by_stalemate: matches!(cause, TerminalCause::Draw(DrawKind::Stalemate)),
            ended_by_resignation: matches!(cause, TerminalCause::Resignation { .. }),
            ended_by_disconnection: matches!(cause, TerminalCause::Disconnection { .. }),
            finished_at: outcome.finished_at,
        }
    }

    /// 某玩家在本局的结果
    fn result_for(&self, player_id: &str) -> Option<GameResult> {
        let color = if self.white_player == player_id {
            Color::White
        } else if self.black_player == player_id {
            Color::Black
        } else {
            return None;
        };

        Some(if self.ended_by_draw {
            GameResult::Draw
        } else if self.winner == Some(color) {
            GameResult::Win
        } else {
            GameResult::Loss
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GameResult {
    Win,
    Loss,
    Draw,
}

/// 玩家战绩
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayerStats {
    /// 写入过的等级分，未出现的类型沿用账号配置
    pub ratings: HashMap<GameType, u32>,
    pub total_games: u32,
    pub win_count: u32,
    pub loss_count: u32,
    pub draw_count: u32,
    pub games_played: Vec<MatchId>,
}

impl PlayerStats {
    /// 以存储的等级分覆盖账号配置
    pub fn overlay(&self, base: Ratings) -> Ratings {
        let mut ratings = base;
        for (game_type, rating) in &self.ratings {
            ratings.set(*game_type, *rating);
        }
        ratings
    }

    fn record(&mut self, match_id: &str, result: GameResult) {
        self.total_games += 1;
        match result {
            GameResult::Win => self.win_count += 1,
            GameResult::Loss => self.loss_count += 1,
            GameResult::Draw => self.draw_count += 1,
        }
        self.games_played.push(match_id.to_string());
    }
}

/// 持久化接口
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// 保存对局并更新双方战绩
    async fn save_match(&self, record: &MatchRecord) -> Result<()>;

    /// 更新某类型对局的等级分
    async fn update_rating(&self, player_id: &str, game_type: GameType, rating: u32) -> Result<()>;

    async fn player_stats(&self, player_id: &str) -> Result<Option<PlayerStats>>;
}

const PLAYERS_FILE: &str = "players.json";
const MATCHES_DIR: &str = "matches";

/// 基于 JSON 文件的存储
pub struct FileStore {
    root: PathBuf,
    /// 串行化对 players.json 的读改写
    players_lock: Mutex<()>,
}

impl FileStore {
    /// 在指定目录创建存储，目录不存在时创建
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let matches_dir = root.join(MATCHES_DIR);
        fs::create_dir_all(&matches_dir)
            .with_context(|| format!("无法创建存储目录: {:?}", matches_dir))?;

        Ok(Self {
            root,
            players_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn match_path(&self, match_id: &str) -> PathBuf {
        self.root
            .join(MATCHES_DIR)
            .join(format!("{}.json", sanitize_filename(match_id)))
    }

    /// 在锁内读改写 players.json
    async fn update_players<F>(&self, update: F) -> Result<()>
    where
        F: FnOnce(&mut HashMap<PlayerId, PlayerStats>) + Send + 'static,
    {
        let _guard = self.players_lock.lock().await;
        let path = self.root.join(PLAYERS_FILE);
        blocking(move || {
            let mut players = read_players(&path)?;
            update(&mut players);
            let json = serde_json::to_string_pretty(&players).context("序列化玩家数据失败")?;
            fs::write(&path, json).with_context(|| format!("写入文件失败: {:?}", path))
        })
        .await
    }
}

#[async_trait]
impl PersistenceGateway for FileStore {
    async fn save_match(&self, record: &MatchRecord) -> Result<()> {
        let path = self.match_path(&record.match_id);
        let json = serde_json::to_string_pretty(record).context("序列化对局存档失败")?;
        blocking(move || fs::write(&path, json).with_context(|| format!("写入文件失败: {:?}", path)))
            .await?;

        let record = record.clone();
        self.update_players(move |players| {
            for player_id in [&record.white_player, &record.black_player] {
                if let Some(result) = record.result_for(player_id) {
                    players
                        .entry(player_id.clone())
                        .or_default()
                        .record(&record.match_id, result);
                }
            }
        })
        .await
    }

    async fn update_rating(&self, player_id: &str, game_type: GameType, rating: u32) -> Result<()> {
        let player_id = player_id.to_string();
        self.update_players(move |players| {
            players
                .entry(player_id)
                .or_default()
                .ratings
                .insert(game_type, rating);
        })
        .await
    }

    async fn player_stats(&self, player_id: &str) -> Result<Option<PlayerStats>> {
        let _guard = self.players_lock.lock().await;
        let path = self.root.join(PLAYERS_FILE);
        let player_id = player_id.to_string();
        blocking(move || Ok(read_players(&path)?.remove(&player_id))).await
    }
}

fn read_players(path: &Path) -> Result<HashMap<PlayerId, PlayerStats>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("读取文件失败: {:?}", path))?;
    serde_json::from_str(&content).context("解析玩家数据失败")
}

/// 在阻塞线程池执行文件操作
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .context("存储任务异常退出")?
}

/// 清理文件名中的特殊字符
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '.' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// 测试用的内存存储，记录每次调用
#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct MemoryStore {
        pub saved: Mutex<Vec<MatchRecord>>,
        pub ratings: Mutex<Vec<(PlayerId, GameType, u32)>>,
        pub fail: bool,
    }

    impl MemoryStore {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub fn saved_count(&self) -> usize {
            self.saved.lock().unwrap().len()
        }

        pub fn ratings(&self) -> Vec<(PlayerId, GameType, u32)> {
            self.ratings.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PersistenceGateway for MemoryStore {
        async fn save_match(&self, record: &MatchRecord) -> Result<()> {
            if self.fail {
                anyhow::bail!("disk full");
            }
            self.saved.lock().unwrap().push(record.clone());
            Ok(())
        }

        async fn update_rating(&self, player_id: &str, game_type: GameType, rating: u32) -> Result<()> {
            self.ratings
                .lock()
                .unwrap()
                .push((player_id.to_string(), game_type, rating));
            Ok(())
        }

        async fn player_stats(&self, player_id: &str) -> Result<Option<PlayerStats>> {
            if self.fail {
                anyhow::bail!("disk full");
            }
            let ratings: HashMap<GameType, u32> = self
                .ratings
                .lock()
                .unwrap()
                .iter()
                .filter(|(id, _, _)| id == player_id)
                .map(|(_, game_type, rating)| (*game_type, *rating))
                .collect();
            Ok((!ratings.is_empty()).then(|| PlayerStats {
                ratings,
                ..PlayerStats::default()
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (FileStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::open(temp_dir.path()).unwrap();
        (store, temp_dir)
    }

    fn record(match_id: &str, winner: Option<Color>, draw: bool) -> MatchRecord {
        MatchRecord {
            match_id: match_id.to_string(),
            white_player: "u1".to_string(),
            white_username: "alice".to_string(),
            black_player: "u2".to_string(),
            black_username: "bob".to_string(),
            white_rating: Some(1200),
            black_rating: Some(1250),
            pgn: "1. f3 e5 2. g4 Qh4#".to_string(),
            winner,
            game_type: GameType::Blitz,
            ranked: true,
            tempo: Tempo::new(3, 2),
            ended_by_timeout: false,
            ended_by_draw: draw,
            ended_by_checkmate: !draw,
            ended_by_stalemate: false,
            ended_by_resignation: false,
            ended_by_disconnection: false,
            finished_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_save_writes_record_file() {
        let (store, temp_dir) = create_test_store();
        let saved = record("1700000000000-abcdefghi", Some(Color::Black), false);

        store.save_match(&saved).await.unwrap();
        let path = temp_dir
            .path()
            .join(MATCHES_DIR)
            .join("1700000000000-abcdefghi.json");
        let loaded: MatchRecord =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(loaded, saved);
    }

    #[tokio::test]
    async fn test_save_updates_stats() {
        let (store, _temp_dir) = create_test_store();
        store.save_match(&record("m1", Some(Color::Black), false)).await.unwrap();
        store.save_match(&record("m2", None, true)).await.unwrap();

        let alice = store.player_stats("u1").await.unwrap().unwrap();
        assert_eq!(alice.total_games, 2);
        assert_eq!(alice.loss_count, 1);
        assert_eq!(alice.draw_count, 1);
        assert_eq!(alice.win_count, 0);
        assert_eq!(alice.games_played, vec!["m1".to_string(), "m2".to_string()]);

        let bob = store.player_stats("u2").await.unwrap().unwrap();
        assert_eq!(bob.win_count, 1);
        assert_eq!(bob.draw_count, 1);

        assert!(store.player_stats("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_rating() {
        let (store, _temp_dir) = create_test_store();
        store.update_rating("u1", GameType::Rapid, 1234).await.unwrap();

        let stats = store.player_stats("u1").await.unwrap().unwrap();
        assert_eq!(stats.ratings.get(&GameType::Rapid), Some(&1234));
        assert_eq!(stats.ratings.get(&GameType::Blitz), None);
        assert_eq!(stats.total_games, 0);

        let ratings = stats.overlay(Ratings {
            blitz: 1500,
            ..Ratings::default()
        });
        assert_eq!(ratings.rapid, 1234);
        assert_eq!(ratings.blitz, 1500);
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("1700000000000-abc"), "1700000000000-abc");
        assert_eq!(sanitize_filename("../etc/passwd"), "___etc_passwd");
    }
}
