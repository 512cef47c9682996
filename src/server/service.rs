//! 服务端实现
//!
//! 状态机：`Unregistered -> Registered <-> Unregistered -> ShuttingDown -> Stopped`。
//! 注册状态、客户端表和统计信息由单个协调任务持有；接受循环把新连接交给协调任务，
//! 协调任务分配 ClientID 并为每个连接启动服务任务。

use super::ServiceDelegate;
use super::admin;
use super::methods::MethodTable;
use crate::config::ServiceConfig;
use crate::error::{Result, RpcError};
use crate::protocol::{
    ClientHandshake, MessageStream, RpcRequest, RpcResponse, ServiceHandshake,
    forward_method_name,
};
use crate::registry::{Criteria, LocalServiceManager, ServiceManager};
use crate::types::{BindAddr, ServiceInfo, ServiceStatistics};
use chrono::Utc;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// 服务构建器
pub struct ServiceBuilder {
    config: ServiceConfig,
    methods: MethodTable,
    delegate: Arc<dyn ServiceDelegate>,
    manager: Option<Arc<dyn ServiceManager>>,
}

impl ServiceBuilder {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            methods: MethodTable::new(),
            delegate: Arc::new(super::NoopDelegate),
            manager: None,
        }
    }

    pub fn with_methods(mut self, methods: MethodTable) -> Self {
        self.methods = methods;
        self
    }

    pub fn with_delegate(mut self, delegate: Arc<dyn ServiceDelegate>) -> Self {
        self.delegate = delegate;
        self
    }

    pub fn with_manager(mut self, manager: Arc<dyn ServiceManager>) -> Self {
        self.manager = Some(manager);
        self
    }

    /// 监听、发布实例并启动服务，`register` 为 true 时随即注册
    ///
    /// 监听失败直接返回错误；注册失败时服务先停止再返回错误。
    pub async fn start(self, register: bool) -> Result<Service> {
        let manager = self
            .manager
            .unwrap_or_else(|| Arc::new(LocalServiceManager::new()));
        let config = self.config;

        let (listener, service_addr) = config.service_addr.listen().await?;
        let admin = match &config.admin_addr {
            Some(addr) => Some(addr.listen().await?),
            None => None,
        };

        let mut info = ServiceInfo::new(
            config.name.clone(),
            config.version.clone(),
            config.region.clone(),
            service_addr,
        );
        if let Some(uuid) = config.uuid.clone().filter(|u| !u.is_empty()) {
            info = info.with_uuid(uuid);
        }
        if let Some((_, admin_addr)) = &admin {
            info = info.with_admin_addr(admin_addr.clone());
        }

        remove_stale_instances(manager.as_ref(), &info).await;

        let (commands, rx) = mpsc::unbounded_channel();
        let (info_tx, info_rx) = watch::channel(info.clone());
        let (done_tx, done_rx) = watch::channel(None);
        let (shutdown_tx, _) = watch::channel(false);
        let tracker = TaskTracker::new();

        let service = Service {
            commands: commands.clone(),
            info: info_rx,
            done: done_rx,
        };

        let coordinator = Coordinator {
            info: info.clone(),
            info_tx,
            done_tx,
            clients: HashMap::new(),
            stats: ServiceStatistics::new(),
            phase: Phase::Running,
            manager: manager.clone(),
            delegate: self.delegate.clone(),
            tracker: tracker.clone(),
            shutdown_tx: shutdown_tx.clone(),
            methods: Arc::new(self.methods),
            commands: commands.clone(),
            shutdown_waiters: Vec::new(),
            fatal: None,
        };

        info!(
            service = %info.name,
            version = %info.version,
            uuid = %info.uuid,
            addr = %info.service_addr,
            "🚀 Starting service"
        );

        self.delegate.started(&info);
        manager.add(info.clone()).await?;

        tokio::spawn(coordinator.run(rx));
        // 接受循环计入排空，停止完成时端口已释放
        tracker.spawn(accept_loop(listener, commands, shutdown_tx.subscribe()));
        if let Some((admin_listener, admin_addr)) = admin {
            info!(addr = %admin_addr, "Admin listener started");
            tokio::spawn(admin::admin_loop(
                admin_listener,
                service.clone(),
                shutdown_tx.subscribe(),
            ));
        }

        if register && let Err(e) = service.register().await {
            // 注册失败：停止服务并从服务目录移除
            service.shutdown().await;
            return Err(e);
        }

        Ok(service)
    }
}

/// 同一地址上遗留的实例（上次未正常停止）
async fn remove_stale_instances(manager: &dyn ServiceManager, info: &ServiceInfo) {
    let criteria = Criteria::new().with_host(info.host());
    let existing = match manager.list_instances(&criteria).await {
        Ok(existing) => existing,
        Err(e) => {
            warn!(error = %e, "Failed to list instances for stale cleanup");
            return;
        }
    };

    for stale in existing
        .into_iter()
        .filter(|i| i.uuid != info.uuid && i.address() == info.address())
    {
        warn!(uuid = %stale.uuid, addr = %stale.address(), "Removing stale instance");
        if let Err(e) = manager.remove(stale).await {
            warn!(error = %e, "Failed to remove stale instance");
        }
    }
}

/// 服务句柄，可廉价克隆
#[derive(Clone)]
pub struct Service {
    commands: mpsc::UnboundedSender<Command>,
    info: watch::Receiver<ServiceInfo>,
    done: watch::Receiver<Option<Result<()>>>,
}

impl Service {
    pub fn builder(config: ServiceConfig) -> ServiceBuilder {
        ServiceBuilder::new(config)
    }

    /// 当前的实例快照
    pub fn info(&self) -> ServiceInfo {
        self.info.borrow().clone()
    }

    pub fn is_registered(&self) -> bool {
        self.info.borrow().registered
    }

    /// 实际监听的地址
    pub fn addr(&self) -> BindAddr {
        self.info.borrow().service_addr.clone()
    }

    pub fn admin_addr(&self) -> Option<BindAddr> {
        self.info.borrow().admin_addr.clone()
    }

    /// 开始接受调用（已注册时无操作）
    pub async fn register(&self) -> Result<()> {
        self.set_registered(true).await
    }

    /// 停止接受调用（未注册时无操作）
    pub async fn unregister(&self) -> Result<()> {
        self.set_registered(false).await
    }

    async fn set_registered(&self, registered: bool) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::SetRegistered(registered, tx))
            .map_err(|_| RpcError::service_stopped())?;
        rx.await.map_err(|_| RpcError::service_stopped())?
    }

    pub async fn stats(&self) -> Result<ServiceStatistics> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Stats(tx))
            .map_err(|_| RpcError::service_stopped())?;
        rx.await.map_err(|_| RpcError::service_stopped())
    }

    /// 优雅停止：注销、停止接受连接、等待进行中的调用、从服务目录移除
    ///
    /// 可以重复或并发调用，`stopped` 回调只执行一次，所有调用都在停止完成后返回。
    /// 不要在方法处理函数内等待该调用。
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }
        let _ = self.wait().await;
    }

    /// 等待服务停止，接受循环异常终止时返回对应错误
    pub async fn wait(&self) -> Result<()> {
        let mut done = self.done.clone();
        loop {
            if let Some(result) = done.borrow_and_update().clone() {
                return result;
            }
            if done.changed().await.is_err() {
                return Ok(());
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.done.borrow().is_some()
    }

    /// 收到 Ctrl+C 时停止服务
    pub fn shutdown_on_ctrl_c(&self) {
        let service = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received (Ctrl+C)");
                    service.shutdown().await;
                }
                _ = service.wait() => {}
            }
        });
    }
}

pub(crate) enum Command {
    Accepted { stream: TcpStream, peer: SocketAddr },
    ConnectionClosed { client_id: String },
    RequestServed,
    SetRegistered(bool, oneshot::Sender<Result<()>>),
    Stats(oneshot::Sender<ServiceStatistics>),
    Shutdown(oneshot::Sender<()>),
    /// 进行中的调用全部完成
    Drained,
    Fatal(RpcError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    ShuttingDown,
    Stopped,
}

struct Coordinator {
    info: ServiceInfo,
    info_tx: watch::Sender<ServiceInfo>,
    done_tx: watch::Sender<Option<Result<()>>>,
    clients: HashMap<String, SocketAddr>,
    stats: ServiceStatistics,
    phase: Phase,
    manager: Arc<dyn ServiceManager>,
    delegate: Arc<dyn ServiceDelegate>,
    tracker: TaskTracker,
    shutdown_tx: watch::Sender<bool>,
    methods: Arc<MethodTable>,
    commands: mpsc::UnboundedSender<Command>,
    shutdown_waiters: Vec<oneshot::Sender<()>>,
    fatal: Option<RpcError>,
}

impl Coordinator {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Accepted { stream, peer } => self.accept(stream, peer),
                Command::ConnectionClosed { client_id } => {
                    if let Some(peer) = self.clients.remove(&client_id) {
                        self.stats.clients = self.stats.clients.saturating_sub(1);
                        debug!(client_id = %client_id, peer = %peer, "Client disconnected");
                    }
                }
                Command::RequestServed => {
                    self.stats.requests_served += 1;
                    self.stats.last_request = Some(Utc::now());
                }
                Command::SetRegistered(registered, reply) => {
                    let result = match self.phase {
                        Phase::Running => self.set_registered(registered).await,
                        _ => Err(RpcError::service_stopped()),
                    };
                    let _ = reply.send(result);
                }
                Command::Stats(reply) => {
                    let _ = reply.send(self.stats.clone());
                }
                Command::Shutdown(reply) => {
                    self.shutdown_waiters.push(reply);
                    self.begin_shutdown().await;
                }
                Command::Fatal(err) => {
                    error!(error = %err, "❌ Accept loop failed, shutting down service");
                    self.fatal = Some(err);
                    self.begin_shutdown().await;
                }
                Command::Drained => {
                    self.finish_shutdown().await;
                    break;
                }
            }
        }

        rx.close();
        while let Some(command) = rx.recv().await {
            match command {
                Command::Shutdown(reply) => {
                    let _ = reply.send(());
                }
                Command::SetRegistered(_, reply) => {
                    let _ = reply.send(Err(RpcError::service_stopped()));
                }
                _ => {}
            }
        }
    }

    fn accept(&mut self, stream: TcpStream, peer: SocketAddr) {
        if self.phase != Phase::Running {
            debug!(peer = %peer, "Rejecting connection during shutdown");
            return;
        }

        let client_id = uuid::Uuid::new_v4().to_string();
        let registered = self.info.registered;
        if registered {
            self.clients.insert(client_id.clone(), peer);
            self.stats.clients += 1;
        }
        debug!(client_id = %client_id, peer = %peer, registered, "Accepted connection");

        let connection = ServedConnection {
            service_name: self.info.name.clone(),
            client_id,
            peer,
            methods: self.methods.clone(),
            tracker: self.tracker.clone(),
            shutdown: self.shutdown_tx.subscribe(),
            commands: self.commands.clone(),
        };
        tokio::spawn(connection.serve(stream, registered));
    }

    async fn set_registered(&mut self, registered: bool) -> Result<()> {
        if self.info.registered == registered {
            return Ok(());
        }

        let result = if registered {
            self.manager.register(&self.info.uuid).await
        } else {
            self.manager.unregister(&self.info.uuid).await
        };
        if let Err(e) = result {
            warn!(uuid = %self.info.uuid, registered, error = %e, "⚠️ Failed to update registration");
            return Err(e);
        }

        self.info.registered = registered;
        self.info_tx.send_replace(self.info.clone());

        if registered {
            info!(service = %self.info.name, uuid = %self.info.uuid, "✅ Service registered");
            self.delegate.registered(&self.info);
        } else {
            info!(service = %self.info.name, uuid = %self.info.uuid, "Service unregistered");
            self.delegate.unregistered(&self.info);
        }
        Ok(())
    }

    async fn begin_shutdown(&mut self) {
        if self.phase != Phase::Running {
            return;
        }
        self.phase = Phase::ShuttingDown;
        info!(service = %self.info.name, uuid = %self.info.uuid, "Shutting down service");

        if self.info.registered {
            let _ = self.set_registered(false).await;
        }

        self.shutdown_tx.send_replace(true);
        self.tracker.close();

        let tracker = self.tracker.clone();
        let commands = self.commands.clone();
        tokio::spawn(async move {
            tracker.wait().await;
            let _ = commands.send(Command::Drained);
        });
    }

    async fn finish_shutdown(&mut self) {
        if let Err(e) = self.manager.remove(self.info.clone()).await {
            warn!(uuid = %self.info.uuid, error = %e, "⚠️ Failed to remove instance from service manager");
        }

        self.phase = Phase::Stopped;
        self.delegate.stopped(&self.info);

        for waiter in self.shutdown_waiters.drain(..) {
            let _ = waiter.send(());
        }
        let result = match self.fatal.take() {
            Some(err) => Err(err),
            None => Ok(()),
        };
        self.done_tx.send_replace(Some(result));
        info!(service = %self.info.name, uuid = %self.info.uuid, "Service stopped");
    }
}

async fn accept_loop(
    listener: TcpListener,
    commands: mpsc::UnboundedSender<Command>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let _ = stream.set_nodelay(true);
                    if commands.send(Command::Accepted { stream, peer }).is_err() {
                        return;
                    }
                }
                Err(e) if is_transient_accept_error(&e) => {
                    warn!(error = %e, "Transient accept error");
                }
                Err(e) => {
                    let _ = commands.send(Command::Fatal(e.into()));
                    return;
                }
            },
            _ = stopping(&mut shutdown) => return,
        }
    }
}

/// 等待停止信号，发送端已销毁也视为停止
pub(crate) async fn stopping(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

fn is_transient_accept_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

/// 单个客户端连接的服务任务
struct ServedConnection {
    service_name: String,
    client_id: String,
    peer: SocketAddr,
    methods: Arc<MethodTable>,
    tracker: TaskTracker,
    shutdown: watch::Receiver<bool>,
    commands: mpsc::UnboundedSender<Command>,
}

impl ServedConnection {
    async fn serve(mut self, stream: TcpStream, registered: bool) {
        let mut stream = MessageStream::new(stream);

        let handshake = ServiceHandshake {
            name: self.service_name.clone(),
            registered,
            client_id: self.client_id.clone(),
        };
        let handshake_result = stream.write_message(&handshake).await;

        if !registered {
            let _ = stream.shutdown().await;
            return;
        }

        if let Err(e) = handshake_result {
            debug!(client_id = %self.client_id, error = %e, "Failed to send handshake");
        } else {
            match stream.read_message::<ClientHandshake>().await {
                Ok(reply) if reply.client_id == self.client_id => self.serve_requests(&mut stream).await,
                Ok(reply) => warn!(
                    client_id = %self.client_id,
                    got = %reply.client_id,
                    "Client handshake carries a different client id"
                ),
                Err(e) => debug!(client_id = %self.client_id, error = %e, "Client handshake failed"),
            }
        }

        let _ = self.commands.send(Command::ConnectionClosed {
            client_id: self.client_id.clone(),
        });
    }

    async fn serve_requests(&mut self, stream: &mut MessageStream) {
        let forward = forward_method_name(&self.service_name);

        loop {
            if *self.shutdown.borrow() {
                return;
            }

            let request = tokio::select! {
                request = stream.read_message::<RpcRequest>() => request,
                _ = stopping(&mut self.shutdown) => return,
            };
            let request = match request {
                Ok(request) => request,
                Err(e) => {
                    debug!(client_id = %self.client_id, error = %e, "Connection ended");
                    return;
                }
            };

            let token = self.tracker.token();
            if *self.shutdown.borrow() {
                return;
            }

            let response = if request.service_method != forward {
                RpcResponse {
                    service_method: request.service_method.clone(),
                    seq: request.seq,
                    error: format!("rpc: 找不到服务方法 {}", request.service_method),
                    body: None,
                }
            } else {
                let mut body = request.body;
                body.request_info.connection_address = self.peer.to_string();
                let out = self.methods.dispatch(body).await;
                RpcResponse {
                    service_method: request.service_method,
                    seq: request.seq,
                    error: String::new(),
                    body: Some(out),
                }
            };

            let written = stream.write_message(&response).await;
            drop(token);
            let _ = self.commands.send(Command::RequestServed);

            if let Err(e) = written {
                debug!(client_id = %self.client_id, error = %e, "Failed to write response");
                return;
            }
        }
    }
}
