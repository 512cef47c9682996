//! 服务管理器接口
//!
//! 服务目录的抽象：发布实例、切换注册状态、按条件列出实例以及订阅实例变化。

use super::criteria::Criteria;
use crate::error::Result;
use crate::types::ServiceInfo;
use async_trait::async_trait;
use std::collections::BTreeSet;
use tokio::sync::mpsc;

/// 实例变化通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceNotification {
    Added(ServiceInfo),
    Updated(ServiceInfo),
    Removed(ServiceInfo),
}

impl InstanceNotification {
    pub fn service(&self) -> &ServiceInfo {
        match self {
            InstanceNotification::Added(info)
            | InstanceNotification::Updated(info)
            | InstanceNotification::Removed(info) => info,
        }
    }
}

/// 服务管理器 Trait
#[async_trait]
pub trait ServiceManager: Send + Sync {
    /// 发布实例
    async fn add(&self, info: ServiceInfo) -> Result<()>;

    /// 更新实例快照
    async fn update(&self, info: ServiceInfo) -> Result<()>;

    /// 移除实例
    async fn remove(&self, info: ServiceInfo) -> Result<()>;

    /// 将实例标记为接受调用
    async fn register(&self, uuid: &str) -> Result<()>;

    /// 将实例标记为不接受调用
    async fn unregister(&self, uuid: &str) -> Result<()>;

    /// 关闭与目录后端的连接
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    /// 列出匹配条件的实例
    async fn list_instances(&self, criteria: &Criteria) -> Result<Vec<ServiceInfo>>;

    async fn list_hosts(&self, criteria: &Criteria) -> Result<Vec<String>> {
        let instances = self.list_instances(criteria).await?;
        Ok(distinct(instances.iter().map(|i| i.host().to_string())))
    }

    async fn list_regions(&self, criteria: &Criteria) -> Result<Vec<String>> {
        let instances = self.list_instances(criteria).await?;
        Ok(distinct(instances.iter().map(|i| i.region.clone())))
    }

    async fn list_services(&self, criteria: &Criteria) -> Result<Vec<String>> {
        let instances = self.list_instances(criteria).await?;
        Ok(distinct(instances.iter().map(|i| i.name.clone())))
    }

    async fn list_versions(&self, criteria: &Criteria) -> Result<Vec<String>> {
        let instances = self.list_instances(criteria).await?;
        Ok(distinct(instances.iter().map(|i| i.version.clone())))
    }

    /// 订阅匹配条件的实例变化，不支持时返回 None
    async fn watch(
        &self,
        _criteria: Criteria,
    ) -> Result<Option<mpsc::UnboundedReceiver<InstanceNotification>>> {
        Ok(None)
    }
}

fn distinct(values: impl Iterator<Item = String>) -> Vec<String> {
    values.collect::<BTreeSet<_>>().into_iter().collect()
}
