//! 错误代码和错误类别定义

use serde::{Deserialize, Serialize};
use std::fmt;

/// 错误代码枚举
///
/// 错误代码按类别分组，每个类别占用1000个代码范围：
/// - 1000-1999: 连接相关错误（传输层，关闭连接后重试）
/// - 3000-3999: 协议相关错误（帧损坏、握手被拒）
/// - 6000-6999: 资源相关错误（无可用实例、连接池关闭）
/// - 8000-8999: 序列化相关错误
/// - 9000-9999: 通用错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u32)]
pub enum ErrorCode {
    // ============================================================
    // 连接相关错误 (1000-1999)
    // ============================================================
    ConnectionFailed = 1000,
    ConnectionTimeout = 1001,
    ConnectionClosed = 1002,
    HandshakeFailed = 1003,

    // ============================================================
    // 协议相关错误 (3000-3999)
    // ============================================================
    ProtocolError = 3000,
    MessageTooLarge = 3001,
    ServiceUnregistered = 3002,

    // ============================================================
    // 资源相关错误 (6000-6999)
    // ============================================================
    NoInstances = 6000,
    PoolClosed = 6001,
    UnknownService = 6002,
    ClientClosed = 6003,
    ServiceStopped = 6004,
    ConfigurationError = 6005,

    // ============================================================
    // 序列化相关错误 (8000-8999)
    // ============================================================
    SerializationError = 8000,
    DeserializationError = 8001,

    // ============================================================
    // 通用错误 (9000-9999)
    // ============================================================
    RequestTimeout = 9000,
    InvalidParameter = 9001,
    InternalError = 9002,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ErrorCode {
    /// 获取错误代码的数字值
    #[inline]
    pub fn as_u32(&self) -> u32 {
        *self as u32
    }

    /// 从数字值创建错误代码
    pub fn from_u32(code: u32) -> Option<Self> {
        match code {
            1000 => Some(ErrorCode::ConnectionFailed),
            1001 => Some(ErrorCode::ConnectionTimeout),
            1002 => Some(ErrorCode::ConnectionClosed),
            1003 => Some(ErrorCode::HandshakeFailed),
            3000 => Some(ErrorCode::ProtocolError),
            3001 => Some(ErrorCode::MessageTooLarge),
            3002 => Some(ErrorCode::ServiceUnregistered),
            6000 => Some(ErrorCode::NoInstances),
            6001 => Some(ErrorCode::PoolClosed),
            6002 => Some(ErrorCode::UnknownService),
            6003 => Some(ErrorCode::ClientClosed),
            6004 => Some(ErrorCode::ServiceStopped),
            6005 => Some(ErrorCode::ConfigurationError),
            8000 => Some(ErrorCode::SerializationError),
            8001 => Some(ErrorCode::DeserializationError),
            9000 => Some(ErrorCode::RequestTimeout),
            9001 => Some(ErrorCode::InvalidParameter),
            9002 => Some(ErrorCode::InternalError),
            _ => None,
        }
    }

    /// 获取错误代码的英文标识符
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConnectionFailed => "CONNECTION_FAILED",
            ErrorCode::ConnectionTimeout => "CONNECTION_TIMEOUT",
            ErrorCode::ConnectionClosed => "CONNECTION_CLOSED",
            ErrorCode::HandshakeFailed => "HANDSHAKE_FAILED",
            ErrorCode::ProtocolError => "PROTOCOL_ERROR",
            ErrorCode::MessageTooLarge => "MESSAGE_TOO_LARGE",
            ErrorCode::ServiceUnregistered => "SERVICE_UNREGISTERED",
            ErrorCode::NoInstances => "NO_INSTANCES",
            ErrorCode::PoolClosed => "POOL_CLOSED",
            ErrorCode::UnknownService => "UNKNOWN_SERVICE",
            ErrorCode::ClientClosed => "CLIENT_CLOSED",
            ErrorCode::ServiceStopped => "SERVICE_STOPPED",
            ErrorCode::ConfigurationError => "CONFIGURATION_ERROR",
            ErrorCode::SerializationError => "SERIALIZATION_ERROR",
            ErrorCode::DeserializationError => "DESERIALIZATION_ERROR",
            ErrorCode::RequestTimeout => "REQUEST_TIMEOUT",
            ErrorCode::InvalidParameter => "INVALID_PARAMETER",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }

    /// 获取错误代码的类别（用于错误分类）
    pub fn category(&self) -> ErrorCategory {
        match self.as_u32() {
            1000..=1999 => ErrorCategory::Connection,
            3000..=3999 => ErrorCategory::Protocol,
            6000..=6999 => ErrorCategory::Resource,
            8000..=8999 => ErrorCategory::Serialization,
            _ => ErrorCategory::General,
        }
    }

    /// 判断是否为可重试的错误
    ///
    /// 可重试意味着换一个实例或稍后再试可能成功。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::ConnectionFailed
                | ErrorCode::ConnectionTimeout
                | ErrorCode::ConnectionClosed
                | ErrorCode::HandshakeFailed
                | ErrorCode::ServiceUnregistered
                | ErrorCode::NoInstances
                | ErrorCode::PoolClosed
                | ErrorCode::UnknownService
        )
    }
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Connection,
    Protocol,
    Resource,
    Serialization,
    General,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Connection => write!(f, "CONNECTION"),
            ErrorCategory::Protocol => write!(f, "PROTOCOL"),
            ErrorCategory::Resource => write!(f, "RESOURCE"),
            ErrorCategory::Serialization => write!(f, "SERIALIZATION"),
            ErrorCategory::General => write!(f, "GENERAL"),
        }
    }
}
