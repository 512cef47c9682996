//! 服务目录与负载均衡模块
//!
//! 服务目录后端通过 `ServiceManager` 接入，负载均衡器为每个逻辑服务选择实例

pub mod criteria;
pub mod load_balancer;
pub mod local;
pub mod service_manager;

pub use criteria::{Criteria, ServiceCriteria};
pub use load_balancer::{
    LoadBalanceStrategy, LoadBalancer, LoadBalancerFactory, RandomBalancer, RoundRobin,
};
pub use local::LocalServiceManager;
pub use service_manager::{InstanceNotification, ServiceManager};
