//! 赛后处理：存档与等级分
//!
//! 在独立任务中运行，失败只记日志，不影响已广播的对局状态。

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use protocol::Color;

use crate::clocked_match::GameOutcome;
use crate::rating::calc_new_ratings;
use crate::registry::RegistryCommand;
use crate::storage::{MatchRecord, PersistenceGateway};

/// 处理结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PostGameReport {
    pub saved: bool,
    /// 白方、黑方新等级分
    pub ratings: Option<(u32, u32)>,
}

/// 白方得分
fn white_score(winner: Option<Color>) -> f64 {
    match winner {
        Some(Color::White) => 1.0,
        Some(Color::Black) => 0.0,
        None => 0.5,
    }
}

/// 存档（双方均为注册用户）并在排位赛中更新等级分
pub async fn process(
    store: &dyn PersistenceGateway,
    k_factor: f64,
    outcome: &GameOutcome,
) -> Result<PostGameReport> {
    let mut report = PostGameReport::default();

    if !outcome.white.guest && !outcome.black.guest {
        store.save_match(&MatchRecord::from_outcome(outcome)).await?;
        report.saved = true;
    }

    if let (true, Some(white), Some(black)) =
        (outcome.ranked, outcome.white.rating, outcome.black.rating)
    {
        let (new_white, new_black) =
            calc_new_ratings(white, black, white_score(outcome.winner), k_factor);
        store
            .update_rating(&outcome.white.id, outcome.game_type, new_white)
            .await?;
        store
            .update_rating(&outcome.black.id, outcome.game_type, new_black)
            .await?;
        report.ratings = Some((new_white, new_black));
    }

    Ok(report)
}

/// 在后台执行赛后处理，新等级分通过注册表收件箱告知在线连接
pub fn spawn(
    store: Arc<dyn PersistenceGateway>,
    k_factor: f64,
    outcome: GameOutcome,
    inbox: mpsc::Sender<RegistryCommand>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let report = match process(store.as_ref(), k_factor, &outcome).await {
            Ok(report) => report,
            Err(e) => {
                error!(match_id = %outcome.match_id, "赛后处理失败: {:#}", e);
                return;
            }
        };
        info!(
            match_id = %outcome.match_id,
            saved = report.saved,
            ratings = ?report.ratings,
            "赛后处理完成"
        );

        if let Some((white, black)) = report.ratings {
            for (seat, rating) in [(&outcome.white, white), (&outcome.black, black)] {
                let _ = inbox
                    .send(RegistryCommand::RatingChanged {
                        player_id: seat.id.clone(),
                        game_type: outcome.game_type,
                        rating,
                    })
                    .await;
            }
        }
    })
}
