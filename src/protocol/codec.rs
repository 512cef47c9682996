//! 长度前缀帧编解码
//!
//! 帧格式：`[4 字节小端长度][文档]`，长度包含前缀自身的 4 个字节。

use crate::error::{Result, RpcError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::codec::{Decoder, Encoder};

/// 长度前缀的字节数
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// 默认最大帧长度（16 MiB）
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// 帧编解码器
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = RpcError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<BytesMut>> {
        if src.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        prefix.copy_from_slice(&src[..LENGTH_PREFIX_SIZE]);
        let length = u32::from_le_bytes(prefix) as usize;

        if length < LENGTH_PREFIX_SIZE {
            return Err(RpcError::protocol_error(format!(
                "帧长度 {} 小于前缀长度",
                length
            )));
        }
        if length > self.max_frame_size {
            return Err(RpcError::message_too_large(length, self.max_frame_size));
        }

        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(length);
        frame.advance(LENGTH_PREFIX_SIZE);
        Ok(Some(frame))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<BytesMut>> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None if buf.is_empty() => Ok(None),
            None => Err(RpcError::protocol_error(format!(
                "流在帧中途结束，剩余 {} 字节",
                buf.len()
            ))),
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = RpcError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        let length = item.len() + LENGTH_PREFIX_SIZE;
        if length > self.max_frame_size {
            return Err(RpcError::message_too_large(length, self.max_frame_size));
        }
        dst.reserve(length);
        dst.put_u32_le(length as u32);
        dst.extend_from_slice(&item);
        Ok(())
    }
}

/// 把值编码为自描述的二进制文档
pub fn encode_document<T: Serialize + ?Sized>(value: &T) -> Result<Bytes> {
    Ok(Bytes::from(rmp_serde::to_vec_named(value)?))
}

/// 把二进制文档解码为值
pub fn decode_document<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(rmp_serde::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_length_counts_prefix() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(Bytes::from_static(b"hello"), &mut buf).unwrap();
        assert_eq!(&buf[..4], &9u32.to_le_bytes());
        assert_eq!(&buf[4..], b"hello");

        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&frame[..], b"hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_frame_waits_for_more() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&[9u8, 0, 0][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&[0, b'a', b'b']);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"cde");
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&frame[..], b"abcde");
    }

    #[test]
    fn test_truncated_prefix_at_eof_is_error() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&[9u8, 0][..]);
        let err = codec.decode_eof(&mut buf).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::ProtocolError));
    }

    #[test]
    fn test_length_smaller_than_prefix_is_error() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&[2u8, 0, 0, 0][..]);
        assert_eq!(
            codec.decode(&mut buf).unwrap_err().code(),
            Some(ErrorCode::ProtocolError)
        );
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut codec = FrameCodec::new().with_max_frame_size(16);
        let mut buf = BytesMut::new();
        buf.put_u32_le(1024);
        assert_eq!(
            codec.decode(&mut buf).unwrap_err().code(),
            Some(ErrorCode::MessageTooLarge)
        );
    }

    #[test]
    fn test_empty_document_frame() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(Bytes::new(), &mut buf).unwrap();
        assert_eq!(buf.len(), 4);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert!(frame.is_empty());
    }
}
