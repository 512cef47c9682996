//! Skynet RPC Core Library
//!
//! 服务目录感知的 RPC 框架：服务端负责监听、握手、注册状态和优雅停止，
//! 客户端负责实例发现、负载均衡、按实例的连接池以及重试/放弃语义。

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

// 线协议与连接池
pub mod pool;
pub mod protocol;

// 服务目录与调用
pub mod client;
pub mod registry;
pub mod retry;
pub mod server;

// Re-exports
pub use config::{ClientConfig, Config, LogConfig, LogFormat, ServiceConfig};
pub use error::{ErrorCategory, ErrorCode, Result, RpcError};
pub use logging::init_logging;
pub use types::{BindAddr, RequestInfo, ServiceInfo, ServiceStatistics};

pub use client::{AdminClient, Client, Connection, ConnectionPool, ServiceClient};
pub use pool::{PoolStats, Resource, ResourceFactory, ResourcePool};
pub use registry::{
    Criteria, InstanceNotification, LoadBalanceStrategy, LoadBalancer, LocalServiceManager,
    ServiceCriteria, ServiceManager,
};
pub use retry::RetryPolicy;
pub use server::{
    HandlerError, MethodTable, NoopDelegate, Service, ServiceBuilder, ServiceDelegate,
};
