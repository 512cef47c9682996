//! Skynet RPC 统一错误类型

use super::code::{ErrorCategory, ErrorCode};
use thiserror::Error;

/// Skynet RPC 统一错误类型
///
/// - `Coded`：框架自身产生的错误，带错误代码
/// - `Service`：远端处理函数返回的应用错误（`err_string`），原样返回给调用方
/// - `Io`：底层 IO 错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RpcError {
    /// 带错误代码的框架错误
    #[error("错误 [{code}] {reason}")]
    Coded {
        code: ErrorCode,
        reason: String,
        details: Option<String>,
    },

    /// 应用错误（由服务端处理函数返回）
    #[error("{0}")]
    Service(String),

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(String),
}

impl RpcError {
    /// 创建带错误代码的错误
    pub fn coded(code: ErrorCode, reason: impl Into<String>) -> Self {
        RpcError::Coded {
            code,
            reason: reason.into(),
            details: None,
        }
    }

    /// 创建应用错误
    pub fn service(msg: impl Into<String>) -> Self {
        RpcError::Service(msg.into())
    }

    /// 创建 IO 错误
    pub fn io(msg: impl Into<String>) -> Self {
        RpcError::Io(msg.into())
    }

    /// 附加详细信息（仅对带错误代码的错误生效）
    pub fn with_details(self, details: impl Into<String>) -> Self {
        match self {
            RpcError::Coded { code, reason, .. } => RpcError::Coded {
                code,
                reason,
                details: Some(details.into()),
            },
            other => other,
        }
    }

    // ============================================================
    // 便捷方法：连接相关错误
    // ============================================================

    /// 创建连接失败错误
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        Self::coded(ErrorCode::ConnectionFailed, reason)
    }

    /// 创建连接超时错误
    pub fn connection_timeout(reason: impl Into<String>) -> Self {
        Self::coded(ErrorCode::ConnectionTimeout, reason)
    }

    /// 创建连接已关闭错误
    pub fn connection_closed(reason: impl Into<String>) -> Self {
        Self::coded(ErrorCode::ConnectionClosed, reason)
    }

    /// 创建握手失败错误
    pub fn handshake_failed(reason: impl Into<String>) -> Self {
        Self::coded(ErrorCode::HandshakeFailed, reason)
    }

    // ============================================================
    // 便捷方法：协议相关错误
    // ============================================================

    /// 创建协议错误
    pub fn protocol_error(reason: impl Into<String>) -> Self {
        Self::coded(ErrorCode::ProtocolError, reason)
    }

    /// 创建消息过大错误
    pub fn message_too_large(size: usize, max: usize) -> Self {
        Self::coded(
            ErrorCode::MessageTooLarge,
            format!("帧长度 {} 超过上限 {}", size, max),
        )
    }

    /// 服务未注册，调用方应换一个实例
    pub fn service_unregistered() -> Self {
        Self::coded(ErrorCode::ServiceUnregistered, "服务未注册")
    }

    // ============================================================
    // 便捷方法：资源相关错误
    // ============================================================

    /// 没有可用的实例
    pub fn no_instances() -> Self {
        Self::coded(ErrorCode::NoInstances, "没有可用的服务实例")
    }

    /// 资源池已关闭
    pub fn pool_closed() -> Self {
        Self::coded(ErrorCode::PoolClosed, "资源池已关闭")
    }

    /// 连接池中不存在该实例
    pub fn unknown_service(addr: impl Into<String>) -> Self {
        Self::coded(ErrorCode::UnknownService, "未知的服务实例").with_details(addr)
    }

    /// 客户端已关闭
    pub fn client_closed() -> Self {
        Self::coded(ErrorCode::ClientClosed, "服务客户端已关闭")
    }

    /// 服务已停止
    pub fn service_stopped() -> Self {
        Self::coded(ErrorCode::ServiceStopped, "服务已停止")
    }

    /// 创建配置错误
    pub fn configuration_error(reason: impl Into<String>) -> Self {
        Self::coded(ErrorCode::ConfigurationError, reason)
    }

    // ============================================================
    // 便捷方法：序列化相关错误
    // ============================================================

    /// 创建序列化错误
    pub fn serialization_error(reason: impl Into<String>) -> Self {
        Self::coded(ErrorCode::SerializationError, reason)
    }

    /// 创建反序列化错误
    pub fn deserialization_error(reason: impl Into<String>) -> Self {
        Self::coded(ErrorCode::DeserializationError, reason)
    }

    // ============================================================
    // 便捷方法：通用错误
    // ============================================================

    /// 请求在放弃时间内没有得到可用结果
    pub fn request_timeout(reason: impl Into<String>) -> Self {
        Self::coded(ErrorCode::RequestTimeout, reason)
    }

    /// 创建参数错误
    pub fn invalid_parameter(reason: impl Into<String>) -> Self {
        Self::coded(ErrorCode::InvalidParameter, reason)
    }

    /// 创建内部错误
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::coded(ErrorCode::InternalError, reason)
    }

    // ============================================================
    // 信息获取方法
    // ============================================================

    /// 获取错误代码
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            RpcError::Coded { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// 获取错误原因
    pub fn reason(&self) -> &str {
        match self {
            RpcError::Coded { reason, .. } => reason,
            RpcError::Service(msg) => msg,
            RpcError::Io(msg) => msg,
        }
    }

    /// 获取详细信息
    pub fn details(&self) -> Option<&str> {
        match self {
            RpcError::Coded { details, .. } => details.as_deref(),
            _ => None,
        }
    }

    /// 是否为应用错误（远端处理函数返回）
    pub fn is_application(&self) -> bool {
        matches!(self, RpcError::Service(_))
    }

    /// 是否为请求超时
    pub fn is_timeout(&self) -> bool {
        self.code() == Some(ErrorCode::RequestTimeout)
    }

    /// 是否为传输层错误（发生后连接必须关闭）
    pub fn is_transport(&self) -> bool {
        match self {
            RpcError::Io(_) => true,
            RpcError::Coded { code, .. } => matches!(
                code.category(),
                ErrorCategory::Connection | ErrorCategory::Protocol
            ),
            RpcError::Service(_) => false,
        }
    }

    /// 判断是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        match self {
            RpcError::Io(_) => true,
            _ => self.code().map(|code| code.is_retryable()).unwrap_or(false),
        }
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, RpcError>;
