//! 资源池测试
//!
//! 使用计数工厂验证复用、空闲上限、等待者和关闭语义

use skynet_rpc::{ErrorCode, Resource, ResourcePool, RpcError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug)]
struct FakeResource {
    id: usize,
    closed: Arc<AtomicBool>,
}

impl Resource for FakeResource {
    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct Factory {
    created: Arc<AtomicUsize>,
    closed_flags: Arc<std::sync::Mutex<Vec<Arc<AtomicBool>>>>,
}

impl Factory {
    fn new() -> Self {
        Self {
            created: Arc::new(AtomicUsize::new(0)),
            closed_flags: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    fn pool(&self, idle: usize, max: usize) -> ResourcePool<FakeResource> {
        let created = self.created.clone();
        let flags = self.closed_flags.clone();
        ResourcePool::new(
            move || {
                let created = created.clone();
                let flags = flags.clone();
                async move {
                    let id = created.fetch_add(1, Ordering::SeqCst);
                    let closed = Arc::new(AtomicBool::new(false));
                    flags.lock().unwrap().push(closed.clone());
                    Ok(FakeResource { id, closed })
                }
            },
            idle,
            max,
        )
    }

    fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    fn closed_count(&self) -> usize {
        self.closed_flags
            .lock()
            .unwrap()
            .iter()
            .filter(|f| f.load(Ordering::SeqCst))
            .count()
    }
}

/// 测试：归还的资源被复用，不再调用工厂
#[tokio::test]
async fn test_idle_resource_is_reused() {
    let factory = Factory::new();
    let pool = factory.pool(2, 5);

    let first = pool.acquire().await.unwrap();
    let id = first.id;
    pool.release(first);

    let second = pool.acquire().await.unwrap();
    assert_eq!(second.id, id);
    assert_eq!(factory.created(), 1);
}

/// 测试：超过空闲上限的归还资源被关闭
#[tokio::test]
async fn test_surplus_resource_closed_beyond_idle_capacity() {
    let factory = Factory::new();
    let pool = factory.pool(1, 5);

    let a = pool.acquire().await.unwrap();
    let b = pool.acquire().await.unwrap();
    pool.release(a);
    pool.release(b);

    let stats = pool.stats().await.unwrap();
    assert_eq!(stats.num_idle, 1);
    assert_eq!(stats.num_resources, 1);
    assert_eq!(factory.closed_count(), 1);
}

/// 测试：已关闭的资源归还后被丢弃，下次获取重新创建
#[tokio::test]
async fn test_closed_resource_is_dropped_on_release() {
    let factory = Factory::new();
    let pool = factory.pool(2, 5);

    let mut resource = pool.acquire().await.unwrap();
    resource.close();
    pool.release(resource);

    let stats = pool.stats().await.unwrap();
    assert_eq!(stats.num_resources, 0);
    assert_eq!(stats.num_idle, 0);

    let fresh = pool.acquire().await.unwrap();
    assert!(!fresh.is_closed());
    assert_eq!(factory.created(), 2);
}

/// 测试：达到上限时获取方等待，归还后拿到同一个资源
#[tokio::test]
async fn test_acquire_waits_at_max_resources() {
    let factory = Factory::new();
    let pool = factory.pool(1, 1);

    let held = pool.acquire().await.unwrap();
    let held_id = held.id;

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire().await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(pool.stats().await.unwrap().num_waiting, 1);
    assert!(!waiter.is_finished());

    pool.release(held);
    let got = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(got.id, held_id);
    assert_eq!(factory.created(), 1);
}

/// 测试：关闭后空闲资源被关闭，等待者和新的获取都返回资源池已关闭
#[tokio::test]
async fn test_close_fails_waiters_and_later_acquires() {
    let factory = Factory::new();
    let pool = factory.pool(2, 1);

    let held = pool.acquire().await.unwrap();
    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    pool.close().await;

    let err = waiter.await.unwrap().unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::PoolClosed));

    let err = pool.acquire().await.unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::PoolClosed));
    assert!(pool.is_closed());

    // 关闭后归还的资源直接关闭
    let flag = held.closed.clone();
    pool.release(held);
    assert!(flag.load(Ordering::SeqCst));
}

/// 测试：工厂失败时错误原样返回，名额被归还
#[tokio::test]
async fn test_factory_error_returns_slot() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let pool: ResourcePool<FakeResource> = ResourcePool::new(
        move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(RpcError::connection_failed("拨号失败"))
            }
        },
        1,
        1,
    );

    for _ in 0..3 {
        let err = pool.acquire().await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::ConnectionFailed));
    }
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(pool.stats().await.unwrap().num_resources, 0);
}
