//! 传输层
//!
//! 帧格式：1 字节协议版本 + 4 字节大端长度 + bincode 消息体。
//! 服务端把连接拆成读写两半，分别交给读任务与写任务。

use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{ProtocolError, Result};
use crate::{CONNECT_TIMEOUT, MAX_FRAME_SIZE, PROTOCOL_VERSION};

/// 连接抽象
#[async_trait]
pub trait Connection: Send + Sync {
    /// 发送消息
    async fn send<M: Serialize + Send + Sync>(&mut self, msg: &M) -> Result<()>;

    /// 接收消息
    async fn recv<M: DeserializeOwned>(&mut self) -> Result<M>;

    /// 获取远端地址
    fn peer_addr(&self) -> Option<String>;
}

/// 连接器（客户端使用）
#[async_trait]
pub trait Connector: Send + Sync {
    type Conn: Connection;

    async fn connect(&self, addr: &str) -> Result<Self::Conn>;
}

/// 监听器（服务端使用）
#[async_trait]
pub trait Listener: Send + Sync + Sized {
    type Conn: Connection;

    async fn bind(addr: &str) -> Result<Self>;

    async fn accept(&mut self) -> Result<Self::Conn>;

    fn local_addr(&self) -> Option<String>;
}

/// TCP 连接器
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    type Conn = TcpConnection;

    async fn connect(&self, addr: &str) -> Result<Self::Conn> {
        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| ProtocolError::ConnectionTimeout)??;
        TcpConnection::from_stream(stream)
    }
}

/// TCP 连接
pub struct TcpConnection {
    reader: FrameReader<OwnedReadHalf>,
    writer: FrameWriter<OwnedWriteHalf>,
    peer_addr: Option<String>,
}

impl TcpConnection {
    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        stream.set_nodelay(true)?;
        let peer_addr = stream.peer_addr().ok().map(|a| a.to_string());
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: FrameReader::new(read_half),
            writer: FrameWriter::new(write_half),
            peer_addr,
        })
    }

    /// 分离读写端
    pub fn split(self) -> (FrameReader<OwnedReadHalf>, FrameWriter<OwnedWriteHalf>) {
        (self.reader, self.writer)
    }
}

#[async_trait]
impl Connection for TcpConnection {
    async fn send<M: Serialize + Send + Sync>(&mut self, msg: &M) -> Result<()> {
        self.writer.write_frame(msg).await
    }

    async fn recv<M: DeserializeOwned>(&mut self) -> Result<M> {
        self.reader.read_frame().await
    }

    fn peer_addr(&self) -> Option<String> {
        self.peer_addr.clone()
    }
}

/// TCP 监听器
pub struct TcpListener {
    listener: tokio::net::TcpListener,
}

#[async_trait]
impl Listener for TcpListener {
    type Conn = TcpConnection;

    async fn bind(addr: &str) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    async fn accept(&mut self) -> Result<Self::Conn> {
        let (stream, _addr) = self.listener.accept().await?;
        TcpConnection::from_stream(stream)
    }

    fn local_addr(&self) -> Option<String> {
        self.listener.local_addr().ok().map(|a| a.to_string())
    }
}

const HEADER_SIZE: usize = 5;

fn map_read_err(e: std::io::Error) -> ProtocolError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        ProtocolError::ConnectionClosed
    } else {
        ProtocolError::Io(e)
    }
}

/// 帧读取器
pub struct FrameReader<R> {
    reader: R,
    buffer: Vec<u8>,
}

impl<R: AsyncRead + Unpin + Send> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: Vec::new(),
        }
    }

    /// 读取并解码一帧
    pub async fn read_frame<M: DeserializeOwned>(&mut self) -> Result<M> {
        let mut header = [0u8; HEADER_SIZE];
        self.reader.read_exact(&mut header).await.map_err(map_read_err)?;

        if header[0] != PROTOCOL_VERSION {
            return Err(ProtocolError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                actual: header[0],
            });
        }

        let length = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
        if length > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: length,
                max: MAX_FRAME_SIZE,
            });
        }

        self.buffer.resize(length, 0);
        self.reader
            .read_exact(&mut self.buffer[..length])
            .await
            .map_err(map_read_err)?;

        Ok(bincode::deserialize(&self.buffer[..length])?)
    }

    /// 带超时读取，超时视为连接失活
    pub async fn read_frame_within<M: DeserializeOwned>(&mut self, limit: Duration) -> Result<M> {
        timeout(limit, self.read_frame())
            .await
            .map_err(|_| ProtocolError::ConnectionTimeout)?
    }
}

/// 帧写入器
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin + Send> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// 编码并写入一帧
    pub async fn write_frame<M: Serialize>(&mut self, msg: &M) -> Result<()> {
        let payload = bincode::serialize(msg)?;
        if payload.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: payload.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
        frame.push(PROTOCOL_VERSION);
        frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        frame.extend_from_slice(&payload);

        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ClientMessage, ServerMessage};

    #[tokio::test]
    async fn test_tcp_connection() {
        let mut listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client_handle = tokio::spawn(async move {
            let mut conn = TcpConnector.connect(&addr).await.unwrap();
            conn.send(&ClientMessage::Hello {
                token: None,
                guest_id: Some("abc123".to_string()),
            })
            .await
            .unwrap();

            let msg: ServerMessage = conn.recv().await.unwrap();
            assert_eq!(
                msg,
                ServerMessage::Connected {
                    id: "abc123".to_string(),
                    username: "Guest_abc123".to_string(),
                }
            );
        });

        let mut conn = listener.accept().await.unwrap();
        let msg: ClientMessage = conn.recv().await.unwrap();
        match msg {
            ClientMessage::Hello { guest_id, .. } => assert_eq!(guest_id.as_deref(), Some("abc123")),
            _ => panic!("Unexpected message"),
        }

        conn.send(&ServerMessage::Connected {
            id: "abc123".to_string(),
            username: "Guest_abc123".to_string(),
        })
        .await
        .unwrap();

        client_handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_version_mismatch_rejected() {
        let (client, server) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(server);
        let mut raw = client;
        raw.write_all(&[PROTOCOL_VERSION + 1, 0, 0, 0, 0]).await.unwrap();

        let result: Result<ClientMessage> = reader.read_frame().await;
        assert!(matches!(result, Err(ProtocolError::VersionMismatch { .. })));
    }

    #[tokio::test]
    async fn test_closed_stream_reports_closed() {
        let (client, server) = tokio::io::duplex(64);
        drop(client);
        let mut reader = FrameReader::new(server);
        let result: Result<ClientMessage> = reader.read_frame().await;
        assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
    }
}
