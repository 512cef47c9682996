//! 线协议模块
//!
//! 长度前缀帧、文档编解码、握手与 RPC 信封

pub mod codec;
pub mod messages;
pub mod stream;

pub use codec::{
    DEFAULT_MAX_FRAME_SIZE, FrameCodec, LENGTH_PREFIX_SIZE, decode_document, encode_document,
};
pub use messages::{
    AdminRequest, AdminResponse, ClientHandshake, FORWARD_METHOD, RpcRequest, RpcResponse,
    ServiceHandshake, ServiceRpcIn, ServiceRpcOut, forward_method_name,
};
pub use stream::{MessageStream, Transport};
