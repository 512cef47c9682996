//! 到单个服务实例的连接
//!
//! 连接在握手完成后才可用，一次只承载一个调用。任何传输错误都会关闭连接，
//! 应用错误不影响连接。

use crate::error::{Result, RpcError};
use crate::pool::Resource;
use crate::protocol::{
    ClientHandshake, MessageStream, RpcRequest, RpcResponse, ServiceHandshake, ServiceRpcIn,
    Transport, decode_document, encode_document, forward_method_name,
};
use crate::types::RequestInfo;
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tracing::{debug, trace};

pub struct Connection {
    service_name: String,
    addr: String,
    client_id: String,
    stream: Option<MessageStream>,
    idle_timeout: Duration,
    last_used: Instant,
    seq: u64,
}

impl Connection {
    /// 拨号并完成握手，`dial_timeout` 同时约束拨号和握手
    pub async fn connect(service_name: &str, addr: &str, dial_timeout: Duration) -> Result<Self> {
        let connect = async {
            let stream = TcpStream::connect(addr).await.map_err(|e| {
                RpcError::connection_failed(format!("无法连接 {}: {}", addr, e))
            })?;
            let _ = stream.set_nodelay(true);
            Self::handshake(service_name, addr, stream).await
        };

        if dial_timeout.is_zero() {
            return connect.await;
        }
        tokio::time::timeout(dial_timeout, connect)
            .await
            .map_err(|_| RpcError::connection_timeout(format!("连接 {} 超时", addr)))?
    }

    /// 在已建立的字节流上完成客户端握手
    ///
    /// `service_name` 为空时不校验服务名。服务端未注册时不回复握手，直接返回未注册错误。
    pub async fn handshake<S: Transport>(
        service_name: &str,
        addr: impl Into<String>,
        stream: S,
    ) -> Result<Self> {
        let addr = addr.into();
        let mut stream = MessageStream::new(stream);

        let handshake: ServiceHandshake = stream
            .read_message()
            .await
            .map_err(|e| RpcError::handshake_failed(format!("读取服务端握手失败: {}", e)))?;

        if !service_name.is_empty() && handshake.name != service_name {
            return Err(RpcError::handshake_failed(format!(
                "期望服务 {}，对端为 {}",
                service_name, handshake.name
            )));
        }

        if !handshake.registered {
            debug!(addr = %addr, service = %handshake.name, "Instance is not registered");
            return Err(RpcError::service_unregistered());
        }

        stream
            .write_message(&ClientHandshake {
                client_id: handshake.client_id.clone(),
            })
            .await
            .map_err(|e| RpcError::handshake_failed(format!("发送客户端握手失败: {}", e)))?;

        trace!(addr = %addr, client_id = %handshake.client_id, "Handshake completed");

        Ok(Self {
            service_name: handshake.name,
            addr,
            client_id: handshake.client_id,
            stream: Some(stream),
            idle_timeout: Duration::ZERO,
            last_used: Instant::now(),
            seq: 0,
        })
    }

    /// 设置空闲超时，空闲超过该时间的连接视为已关闭，0 表示不过期
    pub fn set_idle_timeout(&mut self, idle_timeout: Duration) {
        self.idle_timeout = idle_timeout;
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!(addr = %self.addr, client_id = %self.client_id, "Connection closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none() || self.idle_expired()
    }

    fn idle_expired(&self) -> bool {
        !self.idle_timeout.is_zero() && self.last_used.elapsed() > self.idle_timeout
    }

    /// 调用远端方法（不设截止时间）
    pub async fn send<I, O>(&mut self, ri: &RequestInfo, method: &str, input: &I) -> Result<O>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        self.send_timeout(ri, method, input, Duration::ZERO).await
    }

    /// 调用远端方法，`timeout` 为 0 表示不设截止时间
    pub async fn send_timeout<I, O>(
        &mut self,
        ri: &RequestInfo,
        method: &str,
        input: &I,
        timeout: Duration,
    ) -> Result<O>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        let payload = encode_document(input)?;
        let out = self.send_raw(ri, method, payload, timeout).await?;
        // 输出类型不匹配不影响连接
        decode_document(&out)
    }

    /// 发送已编码的输入并返回已编码的输出
    pub async fn send_raw(
        &mut self,
        ri: &RequestInfo,
        method: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes> {
        if self.is_closed() {
            self.close();
            return Err(RpcError::connection_closed(format!(
                "到 {} 的连接已关闭",
                self.addr
            )));
        }

        self.seq += 1;
        let seq = self.seq;
        let request = RpcRequest {
            service_method: forward_method_name(&self.service_name),
            seq,
            body: ServiceRpcIn {
                client_id: self.client_id.clone(),
                method: method.to_string(),
                request_info: ri.clone(),
                payload,
            },
        };

        let result = match self.stream.as_mut() {
            Some(stream) => {
                let exchange = async {
                    stream.write_message(&request).await?;
                    stream.read_message::<RpcResponse>().await
                };
                if timeout.is_zero() {
                    exchange.await
                } else {
                    tokio::time::timeout(timeout, exchange)
                        .await
                        .unwrap_or_else(|_| {
                            Err(RpcError::connection_timeout(format!(
                                "调用 {} 超过 {:?}",
                                method, timeout
                            )))
                        })
                }
            }
            None => Err(RpcError::connection_closed("连接已关闭")),
        };

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                debug!(addr = %self.addr, method = %method, error = %e, "RPC transport failure");
                self.close();
                return Err(e);
            }
        };
        self.last_used = Instant::now();

        if response.seq != seq {
            self.close();
            return Err(RpcError::protocol_error(format!(
                "响应序号 {} 与请求序号 {} 不一致",
                response.seq, seq
            )));
        }
        if !response.error.is_empty() {
            self.close();
            return Err(RpcError::protocol_error(response.error));
        }

        let Some(out) = response.body else {
            self.close();
            return Err(RpcError::protocol_error("响应缺少消息体"));
        };
        if !out.err_string.is_empty() {
            return Err(RpcError::service(out.err_string));
        }
        Ok(out.payload)
    }
}

impl Resource for Connection {
    fn close(&mut self) {
        Connection::close(self);
    }

    fn is_closed(&self) -> bool {
        Connection::is_closed(self)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("service_name", &self.service_name)
            .field("addr", &self.addr)
            .field("client_id", &self.client_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}
