//! 网络服务
//!
//! 每个 TCP 连接一个会话任务：读循环把客户端消息转发给注册表 actor，
//! 写任务把注册表发来的消息编码成帧写回。注册表 actor 是唯一修改对局状态的任务。

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use protocol::{
    ClientMessage, Connection, ConnectionId, Listener, ProtocolError, ServerMessage,
    TcpConnection, TcpListener, HEARTBEAT_TIMEOUT,
};

use crate::config::ServerConfig;
use crate::player::IdentityResolver;
use crate::registry::{MatchRegistry, RegistryCommand};
use crate::storage::PersistenceGateway;

/// 注册表收件箱容量
const REGISTRY_INBOX: usize = 1024;

/// 注册表 actor 的句柄
#[derive(Clone)]
pub struct RegistryHandle {
    next_conn_id: Arc<AtomicU64>,
    inbox: mpsc::Sender<RegistryCommand>,
}

impl RegistryHandle {
    /// 登记新连接，返回分配的连接 ID
    pub async fn connect(&self, tx: mpsc::Sender<ServerMessage>) -> Result<ConnectionId> {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        self.command(RegistryCommand::Connect { conn_id, tx }).await?;
        Ok(conn_id)
    }

    pub async fn send(&self, conn_id: ConnectionId, msg: ClientMessage) -> Result<()> {
        self.command(RegistryCommand::Message { conn_id, msg }).await
    }

    pub async fn disconnect(&self, conn_id: ConnectionId) -> Result<()> {
        self.command(RegistryCommand::Disconnect { conn_id }).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.command(RegistryCommand::Shutdown).await
    }

    async fn command(&self, cmd: RegistryCommand) -> Result<()> {
        self.inbox
            .send(cmd)
            .await
            .map_err(|_| anyhow::anyhow!("registry stopped"))
    }
}

/// 启动注册表 actor
pub fn spawn_registry(
    config: ServerConfig,
    store: Arc<dyn PersistenceGateway>,
    resolver: Arc<dyn IdentityResolver>,
) -> (RegistryHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(REGISTRY_INBOX);
    let registry = MatchRegistry::new(config, store, resolver, tx.clone());
    let actor = tokio::spawn(run_registry(registry, rx));

    let handle = RegistryHandle {
        next_conn_id: Arc::new(AtomicU64::new(1)),
        inbox: tx,
    };
    (handle, actor)
}

async fn run_registry(mut registry: MatchRegistry, mut inbox: mpsc::Receiver<RegistryCommand>) {
    while let Some(cmd) = inbox.recv().await {
        if !registry.dispatch(cmd) {
            break;
        }
    }
    debug!("注册表 actor 退出");
}

/// 对局服务器
pub struct Server {
    listener: TcpListener,
    registry: RegistryHandle,
    actor: JoinHandle<()>,
    outbound_buffer: usize,
}

impl Server {
    /// 绑定监听地址并启动注册表
    pub async fn bind(
        config: ServerConfig,
        store: Arc<dyn PersistenceGateway>,
        resolver: Arc<dyn IdentityResolver>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(&config.listen_addr)
            .await
            .with_context(|| format!("无法监听 {}", config.listen_addr))?;
        let outbound_buffer = config.outbound_buffer.max(1);
        let (registry, actor) = spawn_registry(config, store, resolver);

        Ok(Self {
            listener,
            registry,
            actor,
            outbound_buffer,
        })
    }

    pub fn local_addr(&self) -> Option<String> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    /// 接受连接直到 `shutdown` 完成
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!(addr = ?self.local_addr(), "对局服务器开始监听");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => {
                        let registry = self.registry.clone();
                        tokio::spawn(run_session(conn, registry, self.outbound_buffer));
                    }
                    Err(e) => warn!("接受连接失败: {}", e),
                },
            }
        }

        info!("对局服务器停止");
        self.registry.shutdown().await?;
        if let Err(e) = self.actor.await {
            error!("注册表任务异常退出: {}", e);
        }
        Ok(())
    }
}

/// 单个连接的会话
async fn run_session(conn: TcpConnection, registry: RegistryHandle, outbound_buffer: usize) {
    let peer = conn.peer_addr();
    let (mut reader, mut writer) = conn.split();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(outbound_buffer);

    let Ok(conn_id) = registry.connect(tx).await else {
        return;
    };
    info!(conn_id, peer = ?peer, "新连接");

    let writer_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = writer.write_frame(&msg).await {
                debug!(conn_id, "写入失败: {}", e);
                break;
            }
        }
    });

    loop {
        match reader
            .read_frame_within::<ClientMessage>(HEARTBEAT_TIMEOUT)
            .await
        {
            Ok(msg) => {
                if registry.send(conn_id, msg).await.is_err() {
                    break;
                }
            }
            Err(ProtocolError::ConnectionClosed) => {
                debug!(conn_id, "对端关闭连接");
                break;
            }
            Err(e) => {
                warn!(conn_id, "会话结束: {}", e);
                break;
            }
        }
    }

    let _ = registry.disconnect(conn_id).await;
    writer_task.abort();
}
