//! 管理接口客户端

use crate::error::{Result, RpcError};
use crate::protocol::{AdminRequest, AdminResponse, MessageStream};
use std::time::Duration;
use tokio::net::TcpStream;

/// 向服务的管理地址发送注册、注销和停止命令
#[derive(Debug, Clone)]
pub struct AdminClient {
    addr: String,
    timeout: Duration,
}

impl AdminClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn register(&self) -> Result<()> {
        self.call(AdminRequest::Register).await
    }

    pub async fn unregister(&self) -> Result<()> {
        self.call(AdminRequest::Unregister).await
    }

    /// 停止服务；`wait_for_clients` 为 true 时等服务停止后才返回
    pub async fn stop(&self, wait_for_clients: bool) -> Result<()> {
        self.call(AdminRequest::Stop { wait_for_clients }).await
    }

    async fn call(&self, request: AdminRequest) -> Result<()> {
        let exchange = async {
            let stream = TcpStream::connect(&self.addr).await.map_err(|e| {
                RpcError::connection_failed(format!("无法连接管理地址 {}: {}", self.addr, e))
            })?;
            let mut stream = MessageStream::new(stream);
            stream.write_message(&request).await?;
            stream.read_message::<AdminResponse>().await
        };

        let response = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| RpcError::connection_timeout(format!("管理命令 {:?} 超时", request)))??;

        if response.error.is_empty() {
            Ok(())
        } else {
            Err(RpcError::service(response.error))
        }
    }
}
