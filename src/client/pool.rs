//! 按实例地址划分的连接池集合
//!
//! 地址到资源池的映射由单个协调任务持有。实例第一次出现时创建资源池，
//! 之后只在整个集合关闭时销毁。

use super::connection::Connection;
use crate::error::{Result, RpcError};
use crate::pool::{PoolStats, ResourcePool};
use crate::types::ServiceInfo;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

/// 每个实例资源池的参数
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// 握手时校验的服务名，为空不校验
    pub service_name: String,
    pub idle_connections: usize,
    pub max_connections: usize,
    pub idle_timeout: Duration,
    pub dial_timeout: Duration,
}

enum Command {
    AddInstance(ServiceInfo),
    UpdateInstance(ServiceInfo),
    Lookup(String, oneshot::Sender<Option<ResourcePool<Connection>>>),
    Release(Connection),
    Pools(oneshot::Sender<Vec<ResourcePool<Connection>>>),
    Close(oneshot::Sender<()>),
}

/// 连接池集合句柄
#[derive(Clone)]
pub struct ConnectionPool {
    commands: mpsc::UnboundedSender<Command>,
}

impl ConnectionPool {
    pub fn new(settings: PoolSettings) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let map = PoolMap {
            settings,
            instances: HashMap::new(),
        };
        tokio::spawn(map.run(rx));
        Self { commands }
    }

    /// 为实例创建资源池（已存在时忽略）
    pub fn add_instance(&self, instance: ServiceInfo) {
        let _ = self.commands.send(Command::AddInstance(instance));
    }

    /// 更新实例信息（未知时等同于加入）
    pub fn update_instance(&self, instance: ServiceInfo) {
        let _ = self.commands.send(Command::UpdateInstance(instance));
    }

    /// 从实例的资源池获取连接
    pub async fn acquire(&self, instance: &ServiceInfo) -> Result<Connection> {
        let addr = instance.address();
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Lookup(addr.clone(), tx))
            .map_err(|_| RpcError::pool_closed())?;

        let pool = rx
            .await
            .map_err(|_| RpcError::pool_closed())?
            .ok_or_else(|| RpcError::unknown_service(addr))?;
        pool.acquire().await
    }

    /// 归还连接；实例未知或集合已关闭时直接关闭连接
    pub fn release(&self, connection: Connection) {
        if let Err(mpsc::error::SendError(Command::Release(mut connection))) =
            self.commands.send(Command::Release(connection))
        {
            connection.close();
        }
    }

    pub async fn num_instances(&self) -> usize {
        self.pools().await.len()
    }

    /// 所有实例上已创建的连接总数（含借出的）
    pub async fn num_connections(&self) -> usize {
        let mut total = 0;
        for pool in self.pools().await {
            if let Ok(PoolStats { num_resources, .. }) = pool.stats().await {
                total += num_resources;
            }
        }
        total
    }

    /// 关闭所有实例的资源池
    pub async fn close(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Close(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    async fn pools(&self) -> Vec<ResourcePool<Connection>> {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Pools(tx)).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }
}

struct InstancePool {
    info: ServiceInfo,
    pool: ResourcePool<Connection>,
}

struct PoolMap {
    settings: PoolSettings,
    instances: HashMap<String, InstancePool>,
}

impl PoolMap {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::AddInstance(info) => self.add(info),
                Command::UpdateInstance(info) => {
                    let addr = info.address();
                    match self.instances.get_mut(&addr) {
                        Some(entry) => entry.info = info,
                        None => self.add(info),
                    }
                }
                Command::Lookup(addr, reply) => {
                    let _ = reply.send(self.instances.get(&addr).map(|e| e.pool.clone()));
                }
                Command::Release(mut connection) => match self.instances.get(connection.addr()) {
                    Some(entry) => entry.pool.release(connection),
                    None => connection.close(),
                },
                Command::Pools(reply) => {
                    let _ = reply.send(self.instances.values().map(|e| e.pool.clone()).collect());
                }
                Command::Close(reply) => {
                    rx.close();
                    for (addr, entry) in self.instances.drain() {
                        debug!(uuid = %entry.info.uuid, addr = %addr, "Closing connection pool");
                        entry.pool.close().await;
                    }
                    while let Some(command) = rx.recv().await {
                        match command {
                            Command::Release(mut connection) => connection.close(),
                            Command::Close(reply) => {
                                let _ = reply.send(());
                            }
                            _ => {}
                        }
                    }
                    let _ = reply.send(());
                    debug!("Connection pools closed");
                    return;
                }
            }
        }
    }

    fn add(&mut self, info: ServiceInfo) {
        let addr = info.address();
        if self.instances.contains_key(&addr) {
            return;
        }

        info!(
            uuid = %info.uuid,
            addr = %addr,
            idle = self.settings.idle_connections,
            max = self.settings.max_connections,
            "Creating connection pool for instance"
        );

        let settings = self.settings.clone();
        let dial_addr = addr.clone();
        let pool = ResourcePool::new(
            move || {
                let settings = settings.clone();
                let addr = dial_addr.clone();
                async move {
                    let mut connection =
                        Connection::connect(&settings.service_name, &addr, settings.dial_timeout)
                            .await?;
                    connection.set_idle_timeout(settings.idle_timeout);
                    Ok(connection)
                }
            },
            self.settings.idle_connections,
            self.settings.max_connections,
        );

        self.instances.insert(addr, InstancePool { info, pool });
    }
}
