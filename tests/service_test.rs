//! 服务端测试
//!
//! 注册状态与回调、握手拒绝、优雅停止和管理接口

mod common;

use async_trait::async_trait;
use common::*;
use skynet_rpc::{
    AdminClient, BindAddr, ClientConfig, Connection, Criteria, ErrorCode, LocalServiceManager,
    RpcError, Service, ServiceClient, ServiceInfo, ServiceManager,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

fn echo_client(manager: Arc<dyn ServiceManager>) -> ServiceClient {
    ServiceClient::new(
        Criteria::for_service(SERVICE_NAME, SERVICE_VERSION),
        manager,
        &ClientConfig::default().with_timeouts(Duration::from_secs(1), Duration::from_secs(5)),
    )
}

/// 测试：生命周期回调按顺序触发，注册状态同步到服务目录
#[tokio::test]
async fn test_registration_callbacks() {
    let manager = local_manager();
    let delegate = Arc::new(RecordingDelegate::default());
    let service = Service::builder(echo_config())
        .with_methods(echo_methods())
        .with_manager(manager.clone())
        .with_delegate(delegate.clone())
        .start(false)
        .await
        .unwrap();

    assert!(!service.is_registered());
    assert_ne!(service.addr().port, 0);
    let listed = manager.list_instances(&Criteria::new()).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert!(!listed[0].registered);

    service.register().await.unwrap();
    // 重复注册无操作
    service.register().await.unwrap();
    assert!(service.is_registered());
    let listed = manager.list_instances(&Criteria::new()).await.unwrap();
    assert!(listed[0].registered);

    service.unregister().await.unwrap();
    assert!(!service.is_registered());

    service.shutdown().await;
    assert!(service.is_stopped());
    assert_eq!(
        delegate.events(),
        vec!["started", "registered", "unregistered", "stopped"]
    );

    // 停止后从服务目录移除，不能再注册
    assert!(manager.list_instances(&Criteria::new()).await.unwrap().is_empty());
    let err = service.register().await.unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::ServiceStopped));
}

/// 注册总是失败的服务目录
#[derive(Default)]
struct RejectingManager {
    inner: LocalServiceManager,
}

#[async_trait]
impl ServiceManager for RejectingManager {
    async fn add(&self, info: ServiceInfo) -> skynet_rpc::Result<()> {
        self.inner.add(info).await
    }

    async fn update(&self, info: ServiceInfo) -> skynet_rpc::Result<()> {
        self.inner.update(info).await
    }

    async fn remove(&self, info: ServiceInfo) -> skynet_rpc::Result<()> {
        self.inner.remove(info).await
    }

    async fn register(&self, _uuid: &str) -> skynet_rpc::Result<()> {
        Err(RpcError::internal("服务目录不可用"))
    }

    async fn unregister(&self, uuid: &str) -> skynet_rpc::Result<()> {
        self.inner.unregister(uuid).await
    }

    async fn list_instances(&self, criteria: &Criteria) -> skynet_rpc::Result<Vec<ServiceInfo>> {
        self.inner.list_instances(criteria).await
    }
}

/// 测试：启动时注册失败，服务停止、端口释放且实例从服务目录移除
#[tokio::test]
async fn test_failed_registration_releases_service() {
    let port = refused_port().await;
    let manager = Arc::new(RejectingManager::default());
    let delegate = Arc::new(RecordingDelegate::default());

    let err = Service::builder(echo_config().with_service_addr(BindAddr::new("127.0.0.1", port)))
        .with_methods(echo_methods())
        .with_manager(manager.clone())
        .with_delegate(delegate.clone())
        .start(true)
        .await
        .err()
        .unwrap();
    assert_eq!(err.code(), Some(ErrorCode::InternalError));

    assert!(manager.list_instances(&Criteria::new()).await.unwrap().is_empty());
    assert_eq!(delegate.events(), vec!["started", "stopped"]);
    TcpListener::bind(("127.0.0.1", port)).await.unwrap();
}

/// 测试：未注册的服务在握手时拒绝连接
#[tokio::test]
async fn test_unregistered_service_rejects_handshake() {
    let service = start_echo(local_manager(), false).await;

    let err = Connection::connect(
        SERVICE_NAME,
        &service.addr().addr_string(),
        Duration::from_secs(1),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::ServiceUnregistered));

    service.register().await.unwrap();
    let conn = Connection::connect(
        SERVICE_NAME,
        &service.addr().addr_string(),
        Duration::from_secs(1),
    )
    .await
    .unwrap();
    assert!(!conn.client_id().is_empty());

    service.shutdown().await;
}

/// 测试：并发停止只触发一次回调，进行中的调用正常完成
#[tokio::test]
async fn test_concurrent_shutdown_drains_in_flight_call() {
    let manager = local_manager();
    let delegate = Arc::new(RecordingDelegate::default());
    let service = Service::builder(echo_config())
        .with_methods(echo_methods())
        .with_manager(manager.clone())
        .with_delegate(delegate.clone())
        .start(true)
        .await
        .unwrap();

    let client = echo_client(manager.clone());
    let in_flight = {
        let client = client.clone();
        tokio::spawn(async move { client.send::<_, u64>(None, "Slow", &200u64).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    tokio::join!(service.shutdown(), service.shutdown());
    assert!(service.is_stopped());
    service.wait().await.unwrap();

    assert_eq!(in_flight.await.unwrap().unwrap(), 200);
    let stopped = delegate
        .events()
        .into_iter()
        .filter(|e| *e == "stopped")
        .count();
    assert_eq!(stopped, 1);

    client.close().await;
}

/// 测试：统计调用次数与客户端数
#[tokio::test]
async fn test_service_statistics() {
    let manager = local_manager();
    let service = start_echo(manager.clone(), true).await;
    let client = echo_client(manager.clone());

    for word in ["a", "b", "c"] {
        let _: String = client.send(None, "Upper", word).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(20)).await;

    let stats = service.stats().await.unwrap();
    assert_eq!(stats.requests_served, 3);
    assert_eq!(stats.clients, 1);
    assert!(stats.last_request.is_some());

    client.close().await;
    service.shutdown().await;
}

/// 测试：管理接口注册、注销并停止服务
#[tokio::test]
async fn test_admin_commands() {
    let service = Service::builder(echo_config().with_admin_addr(any_port()))
        .with_methods(echo_methods())
        .with_manager(local_manager())
        .start(false)
        .await
        .unwrap();

    let admin_addr = service.admin_addr().unwrap();
    let admin = AdminClient::new(admin_addr.addr_string()).with_timeout(Duration::from_secs(2));

    admin.register().await.unwrap();
    assert!(service.is_registered());

    admin.unregister().await.unwrap();
    assert!(!service.is_registered());

    admin.stop(true).await.unwrap();
    assert!(service.is_stopped());
}

/// 测试：不等待的停止命令立即返回，服务随后停止
#[tokio::test]
async fn test_admin_stop_without_waiting() {
    let service = Service::builder(echo_config().with_admin_addr(any_port()))
        .with_manager(local_manager())
        .start(true)
        .await
        .unwrap();

    let admin = AdminClient::new(service.admin_addr().unwrap().addr_string());
    admin.stop(false).await.unwrap();

    tokio::time::timeout(Duration::from_secs(2), service.wait())
        .await
        .unwrap()
        .unwrap();
    assert!(service.is_stopped());
}
