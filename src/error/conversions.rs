//! 错误类型转换实现

use super::RpcError;
use std::io;

impl From<io::Error> for RpcError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => RpcError::connection_closed(err.to_string()),
            io::ErrorKind::ConnectionRefused => RpcError::connection_failed(err.to_string()),
            io::ErrorKind::TimedOut => RpcError::connection_timeout(err.to_string()),
            _ => RpcError::io(err.to_string()),
        }
    }
}

impl From<rmp_serde::encode::Error> for RpcError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        RpcError::serialization_error(format!("文档编码错误: {}", err))
    }
}

impl From<rmp_serde::decode::Error> for RpcError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        RpcError::deserialization_error(format!("文档解码错误: {}", err))
    }
}

impl From<toml::de::Error> for RpcError {
    fn from(err: toml::de::Error) -> Self {
        RpcError::configuration_error(format!("TOML 解析错误: {}", err))
    }
}

impl From<tokio::time::error::Elapsed> for RpcError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        RpcError::connection_timeout("操作超时")
    }
}
