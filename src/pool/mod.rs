//! 通用资源池
//!
//! 资源池的全部状态（空闲队列、资源计数、等待者）由单个协调任务持有，
//! `acquire` / `release` / `close` 通过通道提交给该任务串行处理。
//! 新资源由获取方自己调用工厂创建，拨号等耗时操作不会阻塞协调任务。

pub mod ring;

use crate::error::{Result, RpcError};
use futures::future::BoxFuture;
use ring::Ring;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

/// 可被资源池管理的资源
pub trait Resource: Send + 'static {
    /// 关闭资源，之后 `is_closed` 必须返回 true
    fn close(&mut self);

    fn is_closed(&self) -> bool;
}

/// 资源工厂
pub type ResourceFactory<R> = Arc<dyn Fn() -> BoxFuture<'static, Result<R>> + Send + Sync>;

/// 资源池统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// 已创建且未销毁的资源数（含借出的）
    pub num_resources: usize,
    pub num_idle: usize,
    pub num_waiting: usize,
}

enum Grant<R> {
    Idle(R),
    Create,
}

enum Command<R> {
    Acquire(oneshot::Sender<Result<Grant<R>>>),
    Release(R),
    /// 工厂创建失败，归还创建名额
    Forfeit,
    Stats(oneshot::Sender<PoolStats>),
    Close(oneshot::Sender<()>),
}

/// 资源池句柄，可廉价克隆
pub struct ResourcePool<R: Resource> {
    commands: mpsc::UnboundedSender<Command<R>>,
    factory: ResourceFactory<R>,
}

impl<R: Resource> Clone for ResourcePool<R> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            factory: self.factory.clone(),
        }
    }
}

impl<R: Resource> ResourcePool<R> {
    /// 创建资源池并启动协调任务
    ///
    /// - `idle_capacity`：最多保留的空闲资源数，0 表示不限制
    /// - `max_resources`：同时存在的资源上限，0 表示不限制；达到上限时 `acquire` 等待归还
    pub fn new<F, Fut>(factory: F, idle_capacity: usize, max_resources: usize) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let factory: ResourceFactory<R> = Arc::new(move || Box::pin(factory()));
        let (commands, rx) = mpsc::unbounded_channel();

        let coordinator = Coordinator {
            idle: Ring::with_capacity(idle_capacity),
            idle_capacity,
            max_resources,
            num_resources: 0,
            waiters: VecDeque::new(),
        };
        tokio::spawn(coordinator.run(rx));

        Self { commands, factory }
    }

    /// 获取一个资源：优先复用空闲资源，否则调用工厂创建
    pub async fn acquire(&self) -> Result<R> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Acquire(tx))
            .map_err(|_| RpcError::pool_closed())?;

        match rx.await.map_err(|_| RpcError::pool_closed())?? {
            Grant::Idle(resource) => Ok(resource),
            Grant::Create => {
                let guard = CreateSlot {
                    commands: &self.commands,
                    armed: true,
                };
                let resource = (self.factory)().await?;
                guard.disarm();
                Ok(resource)
            }
        }
    }

    /// 归还资源；已关闭的资源被丢弃，资源池已关闭时直接关闭资源
    pub fn release(&self, resource: R) {
        if let Err(mpsc::error::SendError(Command::Release(mut resource))) =
            self.commands.send(Command::Release(resource))
        {
            resource.close();
        }
    }

    pub async fn stats(&self) -> Result<PoolStats> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Stats(tx))
            .map_err(|_| RpcError::pool_closed())?;
        rx.await.map_err(|_| RpcError::pool_closed())
    }

    /// 关闭资源池：关闭所有空闲资源并拒绝等待者，之后的 `acquire` 返回资源池已关闭
    pub async fn close(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Close(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

/// 工厂调用期间持有的创建名额，未成功创建时归还
struct CreateSlot<'a, R> {
    commands: &'a mpsc::UnboundedSender<Command<R>>,
    armed: bool,
}

impl<R> CreateSlot<'_, R> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<R> Drop for CreateSlot<'_, R> {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.commands.send(Command::Forfeit);
        }
    }
}

struct Coordinator<R: Resource> {
    idle: Ring<R>,
    idle_capacity: usize,
    max_resources: usize,
    num_resources: usize,
    waiters: VecDeque<oneshot::Sender<Result<Grant<R>>>>,
}

impl<R: Resource> Coordinator<R> {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command<R>>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Acquire(reply) => self.acquire(reply),
                Command::Release(resource) => self.release(resource),
                Command::Forfeit => self.forget_one(),
                Command::Stats(reply) => {
                    let _ = reply.send(self.stats());
                }
                Command::Close(reply) => {
                    self.close();
                    rx.close();
                    // 处理关闭前已入队的命令
                    while let Some(command) = rx.recv().await {
                        match command {
                            Command::Acquire(reply) => {
                                let _ = reply.send(Err(RpcError::pool_closed()));
                            }
                            Command::Release(mut resource) => resource.close(),
                            Command::Stats(reply) => {
                                let _ = reply.send(self.stats());
                            }
                            Command::Close(reply) => {
                                let _ = reply.send(());
                            }
                            Command::Forfeit => {}
                        }
                    }
                    let _ = reply.send(());
                    debug!("Resource pool closed");
                    return;
                }
            }
        }
    }

    fn acquire(&mut self, reply: oneshot::Sender<Result<Grant<R>>>) {
        while let Some(resource) = self.idle.pop_front() {
            if resource.is_closed() {
                self.num_resources = self.num_resources.saturating_sub(1);
                continue;
            }
            trace!("Reusing idle resource");
            self.grant(reply, Grant::Idle(resource));
            return;
        }

        if self.max_resources > 0 && self.num_resources >= self.max_resources {
            trace!(
                num_resources = self.num_resources,
                "Resource pool exhausted, waiting for release"
            );
            self.waiters.push_back(reply);
            return;
        }

        self.num_resources += 1;
        self.grant(reply, Grant::Create);
    }

    fn grant(&mut self, reply: oneshot::Sender<Result<Grant<R>>>, grant: Grant<R>) {
        // 获取方已放弃时收回授予
        if let Err(Ok(grant)) = reply.send(Ok(grant)) {
            match grant {
                Grant::Idle(resource) => self.release(resource),
                Grant::Create => self.forget_one(),
            }
        }
    }

    fn release(&mut self, mut resource: R) {
        if resource.is_closed() {
            self.forget_one();
            return;
        }

        while let Some(waiter) = self.waiters.pop_front() {
            match waiter.send(Ok(Grant::Idle(resource))) {
                Ok(()) => return,
                Err(Ok(Grant::Idle(back))) => resource = back,
                Err(_) => return,
            }
        }

        if self.idle_capacity != 0 && self.idle.len() >= self.idle_capacity {
            trace!("Idle queue full, closing surplus resource");
            resource.close();
            self.num_resources = self.num_resources.saturating_sub(1);
            return;
        }

        self.idle.push_back(resource);
    }

    /// 一个资源被销毁，空出的名额交给等待者去创建
    fn forget_one(&mut self) {
        self.num_resources = self.num_resources.saturating_sub(1);
        while let Some(waiter) = self.waiters.pop_front() {
            if self.max_resources > 0 && self.num_resources >= self.max_resources {
                self.waiters.push_front(waiter);
                return;
            }
            self.num_resources += 1;
            if waiter.send(Ok(Grant::Create)).is_ok() {
                return;
            }
            self.num_resources -= 1;
        }
    }

    fn close(&mut self) {
        for mut resource in self.idle.drain() {
            resource.close();
            self.num_resources = self.num_resources.saturating_sub(1);
        }
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(RpcError::pool_closed()));
        }
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            num_resources: self.num_resources,
            num_idle: self.idle.len(),
            num_waiting: self.waiters.len(),
        }
    }
}
