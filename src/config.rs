use crate::error::{Result, RpcError};
use crate::registry::LoadBalanceStrategy;
use crate::types::BindAddr;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 默认每个实例保留的空闲连接数
pub const DEFAULT_IDLE_CONNECTIONS_TO_INSTANCE: usize = 2;
/// 默认每个实例的最大连接数
pub const DEFAULT_MAX_CONNECTIONS_TO_INSTANCE: usize = 5;
/// 默认重试间隔
pub const DEFAULT_RETRY_DURATION: Duration = Duration::from_secs(2);
/// 默认放弃时间
pub const DEFAULT_GIVEUP_DURATION: Duration = Duration::from_secs(10);
/// 默认拨号超时
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// 从 TOML 文件加载配置，缺省字段使用默认值
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            RpcError::configuration_error(format!(
                "无法读取配置文件 {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }
}

/// 服务端配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,
    #[serde(default = "default_unknown")]
    pub version: String,
    #[serde(default = "default_unknown")]
    pub region: String,
    /// 为空时启动时生成
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default = "default_service_addr")]
    pub service_addr: BindAddr,
    #[serde(default)]
    pub admin_addr: Option<BindAddr>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            version: default_unknown(),
            region: default_unknown(),
            uuid: None,
            service_addr: default_service_addr(),
            admin_addr: None,
        }
    }
}

impl ServiceConfig {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ..Default::default()
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = Some(uuid.into());
        self
    }

    pub fn with_service_addr(mut self, addr: BindAddr) -> Self {
        self.service_addr = addr;
        self
    }

    pub fn with_admin_addr(mut self, addr: BindAddr) -> Self {
        self.admin_addr = Some(addr);
        self
    }
}

/// 客户端配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_unknown")]
    pub region: String,
    #[serde(default = "default_idle_connections")]
    pub idle_connections_to_instance: usize,
    /// 0 表示不限制
    #[serde(default = "default_max_connections")]
    pub max_connections_to_instance: usize,
    /// 0 表示空闲连接不过期
    #[serde(default)]
    pub idle_timeout_ms: u64,
    #[serde(default = "default_retry_ms")]
    pub retry_duration_ms: u64,
    #[serde(default = "default_giveup_ms")]
    pub giveup_duration_ms: u64,
    #[serde(default = "default_dial_timeout_ms")]
    pub dial_timeout_ms: u64,
    #[serde(default)]
    pub load_balance: LoadBalanceStrategy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            region: default_unknown(),
            idle_connections_to_instance: DEFAULT_IDLE_CONNECTIONS_TO_INSTANCE,
            max_connections_to_instance: DEFAULT_MAX_CONNECTIONS_TO_INSTANCE,
            idle_timeout_ms: 0,
            retry_duration_ms: default_retry_ms(),
            giveup_duration_ms: default_giveup_ms(),
            dial_timeout_ms: default_dial_timeout_ms(),
            load_balance: LoadBalanceStrategy::default(),
        }
    }
}

impl ClientConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn retry_duration(&self) -> Duration {
        Duration::from_millis(self.retry_duration_ms)
    }

    pub fn giveup_duration(&self) -> Duration {
        Duration::from_millis(self.giveup_duration_ms)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    pub fn with_timeouts(mut self, retry: Duration, giveup: Duration) -> Self {
        self.retry_duration_ms = retry.as_millis() as u64;
        self.giveup_duration_ms = giveup.as_millis() as u64;
        self
    }

    pub fn with_connections(mut self, idle: usize, max: usize) -> Self {
        self.idle_connections_to_instance = idle;
        self.max_connections_to_instance = max;
        self
    }

    pub fn with_load_balance(mut self, strategy: LoadBalanceStrategy) -> Self {
        self.load_balance = strategy;
        self
    }
}

/// 日志配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

fn default_service_name() -> String {
    "SkynetService".to_string()
}

fn default_unknown() -> String {
    "unknown".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_service_addr() -> BindAddr {
    BindAddr::new(default_host(), 9000).with_max_port(9999)
}

fn default_idle_connections() -> usize {
    DEFAULT_IDLE_CONNECTIONS_TO_INSTANCE
}

fn default_max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS_TO_INSTANCE
}

fn default_retry_ms() -> u64 {
    DEFAULT_RETRY_DURATION.as_millis() as u64
}

fn default_giveup_ms() -> u64 {
    DEFAULT_GIVEUP_DURATION.as_millis() as u64
}

fn default_dial_timeout_ms() -> u64 {
    DEFAULT_DIAL_TIMEOUT.as_millis() as u64
}

fn default_log_level() -> String {
    "info".to_string()
}
