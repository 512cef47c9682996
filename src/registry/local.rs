//! 进程内服务管理器
//!
//! 单机部署和测试使用的服务目录，实例按发布顺序保存。

use super::criteria::Criteria;
use super::service_manager::{InstanceNotification, ServiceManager};
use crate::error::{Result, RpcError};
use crate::types::ServiceInfo;
use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc};
use tracing::debug;

struct Watcher {
    criteria: Criteria,
    tx: mpsc::UnboundedSender<InstanceNotification>,
}

/// 进程内服务管理器
#[derive(Default)]
pub struct LocalServiceManager {
    instances: RwLock<Vec<ServiceInfo>>,
    watchers: RwLock<Vec<Watcher>>,
}

impl LocalServiceManager {
    /// 创建新的服务管理器
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入快照并通知订阅者
    async fn store(&self, info: ServiceInfo) {
        let previous = {
            let mut instances = self.instances.write().await;
            match instances.iter_mut().find(|i| i.uuid == info.uuid) {
                Some(existing) => Some(std::mem::replace(existing, info.clone())),
                None => {
                    instances.push(info.clone());
                    None
                }
            }
        };
        self.notify(previous.as_ref(), Some(&info)).await;
    }

    async fn set_registered(&self, uuid: &str, registered: bool) -> Result<()> {
        let info = {
            let instances = self.instances.read().await;
            instances
                .iter()
                .find(|i| i.uuid == uuid)
                .cloned()
                .ok_or_else(|| RpcError::invalid_parameter(format!("未知实例: {}", uuid)))?
        };
        self.store(info.with_registered(registered)).await;
        Ok(())
    }

    async fn notify(&self, previous: Option<&ServiceInfo>, current: Option<&ServiceInfo>) {
        let mut watchers = self.watchers.write().await;
        watchers.retain(|w| !w.tx.is_closed());

        for watcher in watchers.iter() {
            let was = previous.is_some_and(|p| watcher.criteria.matches(p));
            let now = current.filter(|c| watcher.criteria.matches(c));
            let notification = match (was, now) {
                (false, Some(info)) => InstanceNotification::Added(info.clone()),
                (true, Some(info)) => InstanceNotification::Updated(info.clone()),
                (true, None) => match current.or(previous) {
                    Some(info) => InstanceNotification::Removed(info.clone()),
                    None => continue,
                },
                (false, None) => continue,
            };
            let _ = watcher.tx.send(notification);
        }
    }
}

#[async_trait]
impl ServiceManager for LocalServiceManager {
    async fn add(&self, info: ServiceInfo) -> Result<()> {
        debug!(uuid = %info.uuid, service = %info.name, addr = %info.address(), "Adding instance");
        self.store(info).await;
        Ok(())
    }

    async fn update(&self, info: ServiceInfo) -> Result<()> {
        self.store(info).await;
        Ok(())
    }

    async fn remove(&self, info: ServiceInfo) -> Result<()> {
        debug!(uuid = %info.uuid, service = %info.name, "Removing instance");
        let removed = {
            let mut instances = self.instances.write().await;
            let index = instances.iter().position(|i| i.uuid == info.uuid);
            index.map(|index| instances.remove(index))
        };
        if let Some(removed) = removed {
            self.notify(Some(&removed), None).await;
        }
        Ok(())
    }

    async fn register(&self, uuid: &str) -> Result<()> {
        self.set_registered(uuid, true).await
    }

    async fn unregister(&self, uuid: &str) -> Result<()> {
        self.set_registered(uuid, false).await
    }

    async fn list_instances(&self, criteria: &Criteria) -> Result<Vec<ServiceInfo>> {
        let instances = self.instances.read().await;
        Ok(instances
            .iter()
            .filter(|i| criteria.matches(i))
            .cloned()
            .collect())
    }

    async fn watch(
        &self,
        criteria: Criteria,
    ) -> Result<Option<mpsc::UnboundedReceiver<InstanceNotification>>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.watchers.write().await.push(Watcher { criteria, tx });
        Ok(Some(rx))
    }
}
