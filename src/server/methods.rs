//! 方法分发表
//!
//! 服务的方法在构造时显式注册为 `名称 -> (解码, 调用, 编码)` 闭包，
//! 所有调用都经由 `Forward` 信封按名称分发。

use crate::error::{Result, RpcError};
use crate::protocol::{ServiceRpcIn, ServiceRpcOut, decode_document, encode_document};
use crate::types::RequestInfo;
use bytes::Bytes;
use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// 处理函数返回的错误，以字符串形式回传给调用方
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// 生命周期回调使用的名称，不能注册为方法
pub const RESERVED_METHODS: &[&str] = &["Started", "Stopped", "Registered", "Unregistered"];

type ErasedHandler = Arc<dyn Fn(RequestInfo, Bytes) -> BoxFuture<'static, ServiceRpcOut> + Send + Sync>;

/// 方法分发表
#[derive(Clone, Default)]
pub struct MethodTable {
    methods: HashMap<String, ErasedHandler>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册方法
    ///
    /// 名称为空、与生命周期回调重名或重复注册时返回参数错误。
    pub fn register<I, O, F, Fut>(&mut self, name: impl Into<String>, handler: F) -> Result<()>
    where
        I: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
        F: Fn(RequestInfo, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<O, HandlerError>> + Send + 'static,
    {
        let name = name.into();
        if name.is_empty() {
            return Err(RpcError::invalid_parameter("方法名不能为空"));
        }
        if RESERVED_METHODS.contains(&name.as_str()) {
            return Err(RpcError::invalid_parameter(format!("方法名 {} 已保留", name)));
        }
        if self.methods.contains_key(&name) {
            return Err(RpcError::invalid_parameter(format!("方法 {} 重复注册", name)));
        }

        let handler = Arc::new(handler);
        let erased: ErasedHandler = Arc::new(move |ri, payload| {
            let handler = handler.clone();
            Box::pin(async move {
                let input: I = match decode_document(&payload) {
                    Ok(input) => input,
                    Err(e) => return ServiceRpcOut::error(format!("无法解码输入: {}", e)),
                };
                match (*handler)(ri, input).await {
                    Ok(output) => match encode_document(&output) {
                        Ok(payload) => ServiceRpcOut::ok(payload),
                        Err(e) => ServiceRpcOut::error(format!("无法编码输出: {}", e)),
                    },
                    Err(e) => ServiceRpcOut::error(e.to_string()),
                }
            })
        });

        self.methods.insert(name, erased);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// 按名称分发一次调用，未知方法返回应用错误
    pub async fn dispatch(&self, rpc_in: ServiceRpcIn) -> ServiceRpcOut {
        let Some(handler) = self.methods.get(&rpc_in.method) else {
            return ServiceRpcOut::error(format!("没有方法 {:?}", rpc_in.method));
        };

        let request_id = rpc_in.request_info.request_id.clone();
        let started = Instant::now();
        let out = handler(rpc_in.request_info, rpc_in.payload).await;

        debug!(
            method = %rpc_in.method,
            request_id = %request_id,
            client_id = %rpc_in.client_id,
            duration_ms = started.elapsed().as_millis() as u64,
            error = %out.err_string,
            "Method call"
        );
        out
    }
}
