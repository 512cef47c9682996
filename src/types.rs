use crate::error::{Result, RpcError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio::net::TcpListener;

/// 监听地址，支持端口范围 `host:port-max_port`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BindAddr {
    pub ip_address: String,
    pub port: u16,
    pub max_port: u16,
}

impl BindAddr {
    pub fn new(ip_address: impl Into<String>, port: u16) -> Self {
        Self {
            ip_address: ip_address.into(),
            port,
            max_port: port,
        }
    }

    /// 设置端口范围上限
    pub fn with_max_port(mut self, max_port: u16) -> Self {
        self.max_port = max_port;
        self
    }

    /// `host:port` 形式的地址（不含端口范围）
    pub fn addr_string(&self) -> String {
        format!("{}:{}", self.ip_address, self.port)
    }

    /// 在端口范围内依次尝试监听，返回监听器和实际绑定的地址
    ///
    /// 端口 0 交给操作系统分配。
    pub async fn listen(&self) -> Result<(TcpListener, BindAddr)> {
        let mut last_err = None;
        for port in self.port..=self.max_port.max(self.port) {
            match TcpListener::bind((self.ip_address.as_str(), port)).await {
                Ok(listener) => {
                    let local = listener.local_addr()?;
                    return Ok((listener, BindAddr::new(self.ip_address.clone(), local.port())));
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(RpcError::connection_failed(format!(
            "无法在 {} 上监听: {}",
            self,
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }
}

impl fmt::Display for BindAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.max_port > self.port {
            write!(f, "{}:{}-{}", self.ip_address, self.port, self.max_port)
        } else {
            write!(f, "{}:{}", self.ip_address, self.port)
        }
    }
}

impl FromStr for BindAddr {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self> {
        let (host, ports) = s
            .rsplit_once(':')
            .ok_or_else(|| RpcError::invalid_parameter(format!("地址缺少端口: {}", s)))?;
        let parse_port = |p: &str| {
            p.trim()
                .parse::<u16>()
                .map_err(|_| RpcError::invalid_parameter(format!("无效端口: {}", s)))
        };
        let (port, max_port) = match ports.split_once('-') {
            Some((min, max)) => (parse_port(min)?, parse_port(max)?),
            None => {
                let port = parse_port(ports)?;
                (port, port)
            }
        };
        if max_port < port {
            return Err(RpcError::invalid_parameter(format!("端口范围倒置: {}", s)));
        }
        Ok(BindAddr {
            ip_address: host.to_string(),
            port,
            max_port,
        })
    }
}

impl TryFrom<String> for BindAddr {
    type Error = RpcError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<BindAddr> for String {
    fn from(addr: BindAddr) -> Self {
        addr.to_string()
    }
}

/// 服务实例信息，在每次状态变化时作为不可变快照发布
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub uuid: String,
    pub name: String,
    pub version: String,
    pub region: String,
    pub service_addr: BindAddr,
    pub admin_addr: Option<BindAddr>,
    /// false 表示实例存活但不接受调用
    pub registered: bool,
}

impl ServiceInfo {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        region: impl Into<String>,
        service_addr: BindAddr,
    ) -> Self {
        Self {
            uuid: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            version: version.into(),
            region: region.into(),
            service_addr,
            admin_addr: None,
            registered: false,
        }
    }

    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = uuid.into();
        self
    }

    pub fn with_admin_addr(mut self, admin_addr: BindAddr) -> Self {
        self.admin_addr = Some(admin_addr);
        self
    }

    pub fn with_registered(mut self, registered: bool) -> Self {
        self.registered = registered;
        self
    }

    /// 连接该实例使用的地址
    pub fn address(&self) -> String {
        self.service_addr.addr_string()
    }

    pub fn host(&self) -> &str {
        &self.service_addr.ip_address
    }
}

/// 请求上下文，随每次调用在信封中传递
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestInfo {
    pub request_id: String,
    /// 发起整条调用链的地址
    pub origin_address: String,
    /// 承载当前请求的连接地址（由服务端填写）
    pub connection_address: String,
    /// 同一逻辑请求的重发次数
    pub retry_count: u32,
}

impl RequestInfo {
    /// 创建带新请求 ID 的请求上下文
    pub fn new() -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            ..Default::default()
        }
    }

    pub fn with_origin(mut self, origin_address: impl Into<String>) -> Self {
        self.origin_address = origin_address.into();
        self
    }
}

/// 服务运行统计
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatistics {
    pub clients: u32,
    pub start_time: DateTime<Utc>,
    pub last_request: Option<DateTime<Utc>>,
    pub requests_served: u64,
}

impl ServiceStatistics {
    pub fn new() -> Self {
        Self {
            clients: 0,
            start_time: Utc::now(),
            last_request: None,
            requests_served: 0,
        }
    }
}

impl Default for ServiceStatistics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_addr_parse() {
        let addr: BindAddr = "127.0.0.1:9000-9999".parse().unwrap();
        assert_eq!(addr.ip_address, "127.0.0.1");
        assert_eq!(addr.port, 9000);
        assert_eq!(addr.max_port, 9999);
        assert_eq!(addr.to_string(), "127.0.0.1:9000-9999");
        assert_eq!(addr.addr_string(), "127.0.0.1:9000");

        let addr: BindAddr = "localhost:80".parse().unwrap();
        assert_eq!(addr.max_port, 80);
        assert_eq!(addr.to_string(), "localhost:80");

        assert!("localhost".parse::<BindAddr>().is_err());
        assert!("localhost:90-80".parse::<BindAddr>().is_err());
        assert!("localhost:x".parse::<BindAddr>().is_err());
    }

    #[tokio::test]
    async fn test_bind_addr_listen_os_assigned() {
        let (listener, bound) = BindAddr::new("127.0.0.1", 0).listen().await.unwrap();
        assert_ne!(bound.port, 0);
        assert_eq!(listener.local_addr().unwrap().port(), bound.port);
    }
}
