//! 握手、RPC 信封和管理消息定义

use crate::types::RequestInfo;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// 所有应用方法都经由这个固定的 RPC 名称转发
pub const FORWARD_METHOD: &str = "Forward";

/// 服务端方法全名：`<ServiceName>.Forward`
pub fn forward_method_name(service_name: &str) -> String {
    format!("{}.{}", service_name, FORWARD_METHOD)
}

/// 服务端在连接建立后发送的握手
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceHandshake {
    pub name: String,
    pub registered: bool,
    pub client_id: String,
}

/// 客户端回复的握手
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientHandshake {
    pub client_id: String,
}

/// 请求信封
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRpcIn {
    pub client_id: String,
    pub method: String,
    pub request_info: RequestInfo,
    /// 已编码的方法输入
    pub payload: Bytes,
}

/// 响应信封
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRpcOut {
    /// 已编码的方法输出
    pub payload: Bytes,
    /// 非空表示应用错误
    pub err_string: String,
}

impl ServiceRpcOut {
    pub fn ok(payload: Bytes) -> Self {
        Self {
            payload,
            err_string: String::new(),
        }
    }

    pub fn error(err_string: impl Into<String>) -> Self {
        Self {
            payload: Bytes::new(),
            err_string: err_string.into(),
        }
    }
}

/// RPC 请求帧
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub service_method: String,
    pub seq: u64,
    pub body: ServiceRpcIn,
}

/// RPC 响应帧
///
/// `error` 非空表示 RPC 层失败（按传输错误处理），应用错误放在 `body.err_string`。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub service_method: String,
    pub seq: u64,
    pub error: String,
    pub body: Option<ServiceRpcOut>,
}

/// 管理接口请求
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdminRequest {
    Register,
    Unregister,
    Stop { wait_for_clients: bool },
}

/// 管理接口响应
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminResponse {
    pub error: String,
}
