//! 服务客户端
//!
//! 每个逻辑服务一个客户端，组合负载均衡、按实例的连接池以及重试/放弃时间。
//! 负载均衡器、已知实例和超时设置由客户端的协调任务独占。

use super::pool::{ConnectionPool, PoolSettings};
use crate::config::ClientConfig;
use crate::error::{Result, RpcError};
use crate::protocol::{decode_document, encode_document};
use crate::registry::{
    Criteria, InstanceNotification, LoadBalancer, LoadBalancerFactory, ServiceManager,
};
use crate::retry::RetryPolicy;
use crate::types::{RequestInfo, ServiceInfo};
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

enum Command {
    /// 最新的实例列表
    Observe(Vec<ServiceInfo>),
    Notify(InstanceNotification),
    Choose(oneshot::Sender<Result<ServiceInfo>>),
    SetTimeout(RetryPolicy),
    GetTimeout(oneshot::Sender<RetryPolicy>),
    Close(oneshot::Sender<()>),
}

/// 服务客户端，可廉价克隆
#[derive(Clone)]
pub struct ServiceClient {
    inner: Arc<Inner>,
}

struct Inner {
    criteria: Criteria,
    manager: Arc<dyn ServiceManager>,
    pool: ConnectionPool,
    commands: mpsc::UnboundedSender<Command>,
}

impl ServiceClient {
    /// 使用配置中的负载均衡策略创建客户端
    pub fn new(criteria: Criteria, manager: Arc<dyn ServiceManager>, config: &ClientConfig) -> Self {
        Self::with_balancer(criteria, manager, config, config.load_balance.factory())
    }

    /// 使用自定义负载均衡器创建客户端
    pub fn with_balancer(
        criteria: Criteria,
        manager: Arc<dyn ServiceManager>,
        config: &ClientConfig,
        balancer: LoadBalancerFactory,
    ) -> Self {
        let service_name = criteria
            .services
            .first()
            .map(|s| s.name.clone())
            .unwrap_or_default();

        let pool = ConnectionPool::new(PoolSettings {
            service_name,
            idle_connections: config.idle_connections_to_instance,
            max_connections: config.max_connections_to_instance,
            idle_timeout: config.idle_timeout(),
            dial_timeout: config.dial_timeout(),
        });

        let (commands, rx) = mpsc::unbounded_channel();
        let state = ClientState {
            balancer: balancer(Vec::new()),
            known: HashMap::new(),
            policy: RetryPolicy::from(config),
            pool: pool.clone(),
        };
        tokio::spawn(state.run(rx));

        let inner = Arc::new(Inner {
            criteria,
            manager,
            pool,
            commands,
        });
        tokio::spawn(forward_notifications(
            inner.manager.clone(),
            inner.criteria.clone(),
            inner.commands.downgrade(),
        ));

        Self { inner }
    }

    pub fn criteria(&self) -> &Criteria {
        &self.inner.criteria
    }

    /// 设置重试间隔和放弃时间
    pub fn set_timeout(&self, retry: Duration, giveup: Duration) {
        let _ = self
            .inner
            .commands
            .send(Command::SetTimeout(RetryPolicy::new(retry, giveup)));
    }

    /// 当前的重试间隔和放弃时间，客户端关闭后返回 `ClientClosed`
    pub async fn timeout(&self) -> Result<RetryPolicy> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .commands
            .send(Command::GetTimeout(tx))
            .map_err(|_| RpcError::client_closed())?;
        rx.await.map_err(|_| RpcError::client_closed())
    }

    /// 推送实例变化
    pub fn notify(&self, notification: InstanceNotification) {
        let _ = self.inner.commands.send(Command::Notify(notification));
    }

    /// 实例是否属于该客户端的服务
    pub fn matches(&self, instance: &ServiceInfo) -> bool {
        self.inner.criteria.matches(instance)
    }

    /// 关闭客户端及其全部连接池，之后的调用返回 `ClientClosed`
    pub async fn close(&self) {
        let (tx, rx) = oneshot::channel();
        if self.inner.commands.send(Command::Close(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.commands.is_closed()
    }

    /// 连接池中的实例数
    pub async fn num_instances(&self) -> usize {
        self.inner.pool.num_instances().await
    }

    /// 所有实例上的连接数
    pub async fn num_connections(&self) -> usize {
        self.inner.pool.num_connections().await
    }

    /// 调用远端方法，按重试间隔重发直到成功、应用错误或超过放弃时间
    pub async fn send<I, O>(&self, ri: Option<RequestInfo>, method: &str, input: &I) -> Result<O>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        let policy = self.timeout().await?;
        let payload = encode_document(input)?;
        let out = self.send_payload(ri, method, payload, policy).await?;
        decode_document(&out)
    }

    /// 只尝试一次，仍受放弃时间约束
    pub async fn send_once<I, O>(
        &self,
        ri: Option<RequestInfo>,
        method: &str,
        input: &I,
    ) -> Result<O>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        let policy = self.timeout().await?.once();
        let payload = encode_document(input)?;
        let out = self.send_payload(ri, method, payload, policy).await?;
        decode_document(&out)
    }

    /// 并发尝试，第一个成功结果或应用错误胜出，其余尝试的结果被丢弃
    async fn send_payload(
        &self,
        ri: Option<RequestInfo>,
        method: &str,
        payload: Bytes,
        policy: RetryPolicy,
    ) -> Result<Bytes> {
        let mut ri = ri.unwrap_or_else(RequestInfo::new);
        if ri.request_id.is_empty() {
            ri.request_id = uuid::Uuid::new_v4().to_string();
        }
        let method: Arc<str> = Arc::from(method);

        let (results_tx, mut results) = mpsc::unbounded_channel();
        let mut launched = 1usize;
        let mut finished = 0usize;
        self.launch_attempt(&results_tx, ri.clone(), method.clone(), payload.clone(), policy);

        let mut ticker = policy.retries().then(|| {
            let mut ticker = tokio::time::interval_at(Instant::now() + policy.retry, policy.retry);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        let giveup = tokio::time::sleep(policy.giveup);
        tokio::pin!(giveup);

        let mut last_error: Option<RpcError> = None;

        loop {
            tokio::select! {
                Some(result) = results.recv() => {
                    finished += 1;
                    match result {
                        Ok(out) => return Ok(out),
                        Err(e) if e.is_application() => return Err(e),
                        Err(e) => {
                            // 不会再有新的尝试时直接返回
                            if !policy.has_giveup() || (ticker.is_none() && finished == launched) {
                                return Err(e);
                            }
                            debug!(
                                request_id = %ri.request_id,
                                method = %method,
                                error = %e,
                                "Attempt failed, waiting for retry"
                            );
                            last_error = Some(e);
                        }
                    }
                }
                _ = tick(&mut ticker) => {
                    ri.retry_count += 1;
                    launched += 1;
                    debug!(
                        request_id = %ri.request_id,
                        method = %method,
                        retry_count = ri.retry_count,
                        "Retrying request"
                    );
                    self.launch_attempt(&results_tx, ri.clone(), method.clone(), payload.clone(), policy);
                }
                _ = &mut giveup, if policy.has_giveup() => {
                    warn!(
                        request_id = %ri.request_id,
                        method = %method,
                        attempts = launched,
                        "Request gave up"
                    );
                    let err = RpcError::request_timeout(format!(
                        "调用 {} 在 {:?} 内没有结果",
                        method, policy.giveup
                    ));
                    return Err(match last_error {
                        Some(last) => err.with_details(last.to_string()),
                        None => err,
                    });
                }
            }
        }
    }

    fn launch_attempt(
        &self,
        results: &mpsc::UnboundedSender<Result<Bytes>>,
        ri: RequestInfo,
        method: Arc<str>,
        payload: Bytes,
        policy: RetryPolicy,
    ) {
        let inner = self.inner.clone();
        let results = results.clone();
        tokio::spawn(async move {
            let result = inner.attempt(&ri, &method, payload, policy.giveup).await;
            // 调用方已返回时结果被丢弃
            let _ = results.send(result);
        });
    }
}

impl Inner {
    /// 单次尝试：刷新实例列表、选择实例、借用连接、调用并归还
    async fn attempt(
        &self,
        ri: &RequestInfo,
        method: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes> {
        let instances = self.manager.list_instances(&self.criteria).await?;
        self.commands
            .send(Command::Observe(instances))
            .map_err(|_| RpcError::client_closed())?;

        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Choose(tx))
            .map_err(|_| RpcError::client_closed())?;
        let instance = rx.await.map_err(|_| RpcError::client_closed())??;

        let mut connection = self.pool.acquire(&instance).await?;
        debug!(
            request_id = %ri.request_id,
            method = %method,
            instance = %instance.uuid,
            addr = %connection.addr(),
            "Sending request"
        );
        let result = connection.send_raw(ri, method, payload, timeout).await;
        self.pool.release(connection);
        result
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// 把服务目录的实例变化转发给协调任务
async fn forward_notifications(
    manager: Arc<dyn ServiceManager>,
    criteria: Criteria,
    commands: mpsc::WeakUnboundedSender<Command>,
) {
    let mut notifications = match manager.watch(criteria).await {
        Ok(Some(rx)) => rx,
        Ok(None) => return,
        Err(e) => {
            warn!(error = %e, "Failed to watch instances, relying on listing only");
            return;
        }
    };

    while let Some(notification) = notifications.recv().await {
        let Some(commands) = commands.upgrade() else {
            return;
        };
        if commands.send(Command::Notify(notification)).is_err() {
            return;
        }
    }
}

struct ClientState {
    balancer: Box<dyn LoadBalancer>,
    /// 负载均衡器中的实例快照
    known: HashMap<String, ServiceInfo>,
    policy: RetryPolicy,
    pool: ConnectionPool,
}

impl ClientState {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Observe(instances) => self.observe(instances),
                Command::Notify(notification) => self.apply(notification),
                Command::Choose(reply) => {
                    let _ = reply.send(self.balancer.choose());
                }
                Command::SetTimeout(policy) => self.policy = policy,
                Command::GetTimeout(reply) => {
                    let _ = reply.send(self.policy);
                }
                Command::Close(reply) => {
                    rx.close();
                    self.pool.close().await;
                    while let Some(command) = rx.recv().await {
                        match command {
                            Command::Close(reply) => {
                                let _ = reply.send(());
                            }
                            Command::Choose(reply) => {
                                let _ = reply.send(Err(RpcError::client_closed()));
                            }
                            _ => {}
                        }
                    }
                    let _ = reply.send(());
                    info!("Service client closed");
                    return;
                }
            }
        }
    }

    /// 与最新列表对齐：新实例建池并加入负载均衡，消失的实例移出负载均衡
    fn observe(&mut self, instances: Vec<ServiceInfo>) {
        let listed: std::collections::HashSet<String> =
            instances.iter().map(|i| i.uuid.clone()).collect();

        let gone: Vec<ServiceInfo> = self
            .known
            .values()
            .filter(|i| !listed.contains(&i.uuid))
            .cloned()
            .collect();
        for instance in gone {
            self.apply(InstanceNotification::Removed(instance));
        }

        for instance in instances {
            self.apply(InstanceNotification::Updated(instance));
        }
    }

    fn apply(&mut self, notification: InstanceNotification) {
        match notification {
            InstanceNotification::Added(instance) | InstanceNotification::Updated(instance) => {
                match self.known.get(&instance.uuid) {
                    Some(existing) if *existing == instance => {}
                    Some(_) => {
                        self.pool.update_instance(instance.clone());
                        self.balancer.update_instance(instance.clone());
                        self.known.insert(instance.uuid.clone(), instance);
                    }
                    None => {
                        debug!(uuid = %instance.uuid, addr = %instance.address(), "Instance observed");
                        self.pool.add_instance(instance.clone());
                        self.balancer.add_instance(instance.clone());
                        self.known.insert(instance.uuid.clone(), instance);
                    }
                }
            }
            InstanceNotification::Removed(instance) => {
                if self.known.remove(&instance.uuid).is_some() {
                    debug!(uuid = %instance.uuid, "Instance removed");
                    self.balancer.remove_instance(&instance);
                }
            }
        }
    }
}
