//! 基于帧编解码的消息流

use super::codec::{FrameCodec, decode_document, encode_document};
use crate::error::{Result, RpcError};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

/// 可承载协议的双向字节流（TCP 连接或内存管道）
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// 按帧读写文档消息
pub struct MessageStream {
    framed: Framed<Box<dyn Transport>, FrameCodec>,
}

impl MessageStream {
    pub fn new<S: Transport>(stream: S) -> Self {
        Self::with_codec(stream, FrameCodec::new())
    }

    pub fn with_codec<S: Transport>(stream: S, codec: FrameCodec) -> Self {
        let boxed: Box<dyn Transport> = Box::new(stream);
        Self {
            framed: Framed::new(boxed, codec),
        }
    }

    /// 编码并写出一条消息
    pub async fn write_message<M: Serialize>(&mut self, message: &M) -> Result<()> {
        let document = encode_document(message)?;
        self.framed.send(document).await
    }

    /// 读取并解码下一条消息，对端关闭时返回连接已关闭错误
    pub async fn read_message<M: DeserializeOwned>(&mut self) -> Result<M> {
        match self.framed.next().await {
            Some(Ok(frame)) => decode_document(&frame),
            Some(Err(e)) => Err(e),
            None => Err(RpcError::connection_closed("对端关闭了连接")),
        }
    }

    /// 刷新并关闭写端
    pub async fn shutdown(&mut self) -> Result<()> {
        self.framed.close().await
    }
}
