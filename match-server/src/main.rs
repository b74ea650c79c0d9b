use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use match_server::{AccountBook, FileStore, Server, ServerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("match_server=debug".parse()?))
        .init();

    info!("对局服务端启动中...");

    let config = ServerConfig::from_env()?;
    let store = FileStore::open(config.data_dir.clone())?;
    info!(data_dir = ?store.root(), accounts = config.accounts.len(), "配置已加载");
    let resolver = AccountBook::new(&config.accounts);

    let server = Server::bind(config, Arc::new(store), Arc::new(resolver)).await?;
    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
}
