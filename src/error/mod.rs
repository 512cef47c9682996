//! Skynet RPC 错误处理模块
//!
//! 提供统一的错误处理机制：错误代码分类、应用错误与传输错误的区分以及错误转换

pub mod code;
pub mod conversions;
pub mod rpc_error;

// 重新导出公共类型
pub use code::{ErrorCategory, ErrorCode};
pub use rpc_error::{Result, RpcError};
