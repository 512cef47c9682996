//! 客户端模块
//!
//! 提供到服务实例的连接、按实例的连接池、服务客户端以及管理接口客户端

pub mod admin;
pub mod connection;
pub mod pool;
pub mod service_client;

pub use admin::AdminClient;
pub use connection::Connection;
pub use pool::{ConnectionPool, PoolSettings};
pub use service_client::ServiceClient;

use crate::config::ClientConfig;
use crate::registry::{Criteria, ServiceManager};
use std::sync::{Arc, Mutex};
use tracing::info;

/// 客户端入口：按条件创建服务客户端并统一关闭
pub struct Client {
    config: ClientConfig,
    manager: Arc<dyn ServiceManager>,
    service_clients: Mutex<Vec<ServiceClient>>,
}

impl Client {
    pub fn new(config: ClientConfig, manager: Arc<dyn ServiceManager>) -> Self {
        Self {
            config,
            manager,
            service_clients: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// 按服务名、版本、区域和主机获取服务客户端，空字符串表示不限制
    pub fn get_service(&self, name: &str, version: &str, region: &str, host: &str) -> ServiceClient {
        let mut criteria = Criteria::for_service(name, version);
        if !region.is_empty() {
            criteria = criteria.with_region(region);
        }
        if !host.is_empty() {
            criteria = criteria.with_host(host);
        }
        self.get_service_from_criteria(criteria)
    }

    pub fn get_service_from_criteria(&self, criteria: Criteria) -> ServiceClient {
        let client = ServiceClient::new(criteria, self.manager.clone(), &self.config);
        self.service_clients
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(client.clone());
        client
    }

    /// 关闭所有服务客户端
    pub async fn close(&self) {
        let clients = std::mem::take(
            &mut *self
                .service_clients
                .lock()
                .unwrap_or_else(|e| e.into_inner()),
        );
        info!(count = clients.len(), "Closing service clients");
        for client in clients {
            client.close().await;
        }
    }
}
