//! 集成测试共用的服务与假服务端

#![allow(dead_code)]

use skynet_rpc::protocol::{ClientHandshake, MessageStream, RpcRequest, ServiceHandshake};
use skynet_rpc::{
    BindAddr, HandlerError, LocalServiceManager, MethodTable, RequestInfo, Service, ServiceConfig,
    ServiceDelegate, ServiceInfo, ServiceManager,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

pub const SERVICE_NAME: &str = "Echo";
pub const SERVICE_VERSION: &str = "1";

pub fn any_port() -> BindAddr {
    BindAddr::new("127.0.0.1", 0)
}

pub fn echo_config() -> ServiceConfig {
    ServiceConfig::new(SERVICE_NAME, SERVICE_VERSION)
        .with_region("local")
        .with_service_addr(any_port())
}

pub fn echo_methods() -> MethodTable {
    let mut methods = MethodTable::new();
    methods
        .register("Upper", |_ri: RequestInfo, input: String| async move {
            Ok::<_, HandlerError>(input.to_uppercase())
        })
        .unwrap();
    methods
        .register("Fail", |_ri: RequestInfo, input: String| async move {
            Err::<String, HandlerError>(format!("拒绝 {}", input).into())
        })
        .unwrap();
    methods
        .register("RetryCount", |ri: RequestInfo, _input: ()| async move {
            Ok::<_, HandlerError>(ri.retry_count)
        })
        .unwrap();
    methods
        .register("ConnectionAddress", |ri: RequestInfo, _input: ()| async move {
            Ok::<_, HandlerError>(ri.connection_address)
        })
        .unwrap();
    methods
        .register("Slow", |_ri: RequestInfo, millis: u64| async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok::<_, HandlerError>(millis)
        })
        .unwrap();
    methods
}

/// 启动使用给定服务目录的 Echo 服务
pub async fn start_echo(manager: Arc<dyn ServiceManager>, register: bool) -> Service {
    Service::builder(echo_config())
        .with_methods(echo_methods())
        .with_manager(manager)
        .start(register)
        .await
        .unwrap()
}

pub fn local_manager() -> Arc<LocalServiceManager> {
    Arc::new(LocalServiceManager::new())
}

/// 已注册的实例快照，用于手工发布假实例
pub fn fake_instance(port: u16) -> ServiceInfo {
    ServiceInfo::new(
        SERVICE_NAME,
        SERVICE_VERSION,
        "local",
        BindAddr::new("127.0.0.1", port),
    )
    .with_registered(true)
}

/// 一个没有监听者的本地端口
pub async fn refused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

/// 假服务端：完成握手后读取请求但从不回复
pub async fn silent_server() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let mut next_id = 0u32;
        while let Ok((stream, _)) = listener.accept().await {
            next_id += 1;
            let client_id = format!("silent-{}", next_id);
            tokio::spawn(async move {
                let mut stream = MessageStream::new(stream);
                let handshake = ServiceHandshake {
                    name: SERVICE_NAME.to_string(),
                    registered: true,
                    client_id,
                };
                if stream.write_message(&handshake).await.is_err() {
                    return;
                }
                if stream.read_message::<ClientHandshake>().await.is_err() {
                    return;
                }
                while stream.read_message::<RpcRequest>().await.is_ok() {}
            });
        }
    });

    port
}

/// 记录生命周期回调
#[derive(Default)]
pub struct RecordingDelegate {
    events: Mutex<Vec<&'static str>>,
}

impl RecordingDelegate {
    pub fn events(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: &'static str) {
        self.events.lock().unwrap().push(event);
    }
}

impl ServiceDelegate for RecordingDelegate {
    fn started(&self, _info: &ServiceInfo) {
        self.record("started");
    }

    fn stopped(&self, _info: &ServiceInfo) {
        self.record("stopped");
    }

    fn registered(&self, _info: &ServiceInfo) {
        self.record("registered");
    }

    fn unregistered(&self, _info: &ServiceInfo) {
        self.record("unregistered");
    }
}
