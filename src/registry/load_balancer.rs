//! 负载均衡模块
//!
//! 维护一个逻辑服务的实例集合并为每次调用选择实例。
//! 负载均衡器由服务客户端的协调任务独占，方法都取 `&mut self`，不需要加锁。

use crate::error::{Result, RpcError};
use crate::types::ServiceInfo;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// 负载均衡器
pub trait LoadBalancer: Send + 'static {
    /// 加入实例；uuid 已存在时等同于更新
    fn add_instance(&mut self, instance: ServiceInfo);

    /// 更新实例；uuid 未知时等同于加入
    fn update_instance(&mut self, instance: ServiceInfo);

    fn remove_instance(&mut self, instance: &ServiceInfo);

    /// 选择下一个实例，没有可选实例时返回 `NoInstances`
    fn choose(&mut self) -> Result<ServiceInfo>;
}

/// 负载均衡器工厂：用初始实例集合构造负载均衡器
pub type LoadBalancerFactory =
    Arc<dyn Fn(Vec<ServiceInfo>) -> Box<dyn LoadBalancer> + Send + Sync>;

/// 负载均衡策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalanceStrategy {
    /// 轮询（Round Robin）
    #[default]
    RoundRobin,
    /// 随机（Random）
    Random,
}

impl LoadBalanceStrategy {
    pub fn build(&self, instances: Vec<ServiceInfo>) -> Box<dyn LoadBalancer> {
        match self {
            LoadBalanceStrategy::RoundRobin => Box::new(RoundRobin::new(instances)),
            LoadBalanceStrategy::Random => Box::new(RandomBalancer::new(instances)),
        }
    }

    pub fn factory(self) -> LoadBalancerFactory {
        Arc::new(move |instances| self.build(instances))
    }
}

/// 已知实例和参与轮转的 uuid 顺序
///
/// 未注册的实例只记录不轮转，更新为注册后重新追加到轮转末尾。
#[derive(Debug, Default)]
struct InstanceSet {
    instances: HashMap<String, ServiceInfo>,
    rotation: Vec<String>,
}

impl InstanceSet {
    /// 写入实例，返回轮转中被移除的下标（如有）
    fn upsert(&mut self, instance: ServiceInfo) -> Option<usize> {
        let uuid = instance.uuid.clone();
        let position = self.rotation.iter().position(|u| *u == uuid);
        let registered = instance.registered;
        self.instances.insert(uuid.clone(), instance);

        match (registered, position) {
            (true, None) => {
                self.rotation.push(uuid);
                None
            }
            (false, Some(index)) => {
                self.rotation.remove(index);
                Some(index)
            }
            _ => None,
        }
    }

    fn remove(&mut self, uuid: &str) -> Option<usize> {
        self.instances.remove(uuid);
        let index = self.rotation.iter().position(|u| u == uuid)?;
        self.rotation.remove(index);
        Some(index)
    }

    fn get(&self, index: usize) -> Result<ServiceInfo> {
        self.rotation
            .get(index)
            .and_then(|uuid| self.instances.get(uuid))
            .cloned()
            .ok_or_else(RpcError::no_instances)
    }
}

/// 轮询负载均衡：按加入顺序循环选择已注册实例
#[derive(Debug, Default)]
pub struct RoundRobin {
    set: InstanceSet,
    /// 上一次选中的下标，None 表示下次从头开始
    current: Option<usize>,
}

impl RoundRobin {
    pub fn new(instances: Vec<ServiceInfo>) -> Self {
        let mut lb = Self::default();
        for instance in instances {
            lb.add_instance(instance);
        }
        lb
    }

    fn on_removed(&mut self, index: Option<usize>) {
        if let (Some(removed), Some(current)) = (index, self.current) {
            if removed <= current {
                self.current = current.checked_sub(1);
            }
        }
        if self.set.rotation.is_empty() {
            self.current = None;
        }
    }
}

impl LoadBalancer for RoundRobin {
    fn add_instance(&mut self, instance: ServiceInfo) {
        self.update_instance(instance);
    }

    fn update_instance(&mut self, instance: ServiceInfo) {
        let removed = self.set.upsert(instance);
        self.on_removed(removed);
    }

    fn remove_instance(&mut self, instance: &ServiceInfo) {
        let removed = self.set.remove(&instance.uuid);
        self.on_removed(removed);
    }

    fn choose(&mut self) -> Result<ServiceInfo> {
        if self.set.rotation.is_empty() {
            return Err(RpcError::no_instances());
        }
        let next = match self.current {
            Some(current) if current + 1 < self.set.rotation.len() => current + 1,
            _ => 0,
        };
        self.current = Some(next);
        self.set.get(next)
    }
}

/// 随机负载均衡
#[derive(Debug, Default)]
pub struct RandomBalancer {
    set: InstanceSet,
}

impl RandomBalancer {
    pub fn new(instances: Vec<ServiceInfo>) -> Self {
        let mut lb = Self::default();
        for instance in instances {
            lb.add_instance(instance);
        }
        lb
    }
}

impl LoadBalancer for RandomBalancer {
    fn add_instance(&mut self, instance: ServiceInfo) {
        self.set.upsert(instance);
    }

    fn update_instance(&mut self, instance: ServiceInfo) {
        self.set.upsert(instance);
    }

    fn remove_instance(&mut self, instance: &ServiceInfo) {
        self.set.remove(&instance.uuid);
    }

    fn choose(&mut self) -> Result<ServiceInfo> {
        if self.set.rotation.is_empty() {
            return Err(RpcError::no_instances());
        }
        let index = rand::thread_rng().gen_range(0..self.set.rotation.len());
        self.set.get(index)
    }
}
