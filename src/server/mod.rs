//! 服务端模块
//!
//! 接受连接、完成握手、跟踪注册状态、分发调用并协调优雅停止

pub mod admin;
pub mod methods;
pub mod service;

pub use methods::{HandlerError, MethodTable, RESERVED_METHODS};
pub use service::{Service, ServiceBuilder};

use crate::types::ServiceInfo;

/// 服务生命周期回调
///
/// 回调在服务的协调任务中同步执行，不应阻塞。
pub trait ServiceDelegate: Send + Sync + 'static {
    /// 开始监听后、发布实例前
    fn started(&self, _info: &ServiceInfo) {}

    /// 停止完成后，只调用一次
    fn stopped(&self, _info: &ServiceInfo) {}

    fn registered(&self, _info: &ServiceInfo) {}

    fn unregistered(&self, _info: &ServiceInfo) {}
}

/// 不处理任何回调的默认实现
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDelegate;

impl ServiceDelegate for NoopDelegate {}
