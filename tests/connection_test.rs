//! 连接测试
//!
//! 使用内存管道上的假服务端验证握手、应用错误与传输错误的区别

use bytes::BytesMut;
use skynet_rpc::protocol::{
    ClientHandshake, FrameCodec, MessageStream, RpcRequest, RpcResponse, ServiceHandshake,
    ServiceRpcOut, decode_document, encode_document,
};
use skynet_rpc::{Connection, ErrorCode, RequestInfo};
use std::time::Duration;
use tokio::io::DuplexStream;
use tokio_util::codec::Encoder;

fn service_handshake(name: &str, registered: bool) -> ServiceHandshake {
    ServiceHandshake {
        name: name.to_string(),
        registered,
        client_id: "client-1".to_string(),
    }
}

/// 假服务端：发送握手并读取客户端回复
async fn accept(stream: DuplexStream, name: &str) -> MessageStream {
    let mut server = MessageStream::new(stream);
    server.write_message(&service_handshake(name, true)).await.unwrap();
    let reply: ClientHandshake = server.read_message().await.unwrap();
    assert_eq!(reply.client_id, "client-1");
    server
}

fn reply(request: &RpcRequest, out: ServiceRpcOut) -> RpcResponse {
    RpcResponse {
        service_method: request.service_method.clone(),
        seq: request.seq,
        error: String::new(),
        body: Some(out),
    }
}

/// 测试：服务端未注册时握手返回未注册错误，且客户端不回复握手
#[tokio::test]
async fn test_unregistered_handshake_rejected() {
    let (client, server) = tokio::io::duplex(1024);

    let fake = tokio::spawn(async move {
        let mut server = MessageStream::new(server);
        server
            .write_message(&service_handshake("Echo", false))
            .await
            .unwrap();
        server.read_message::<ClientHandshake>().await
    });

    let err = Connection::handshake("Echo", "pipe", client).await.unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::ServiceUnregistered));

    let server_side = fake.await.unwrap().unwrap_err();
    assert_eq!(server_side.code(), Some(ErrorCode::ConnectionClosed));
}

/// 测试：收到未注册握手后客户端不写出任何字节
#[tokio::test]
async fn test_unregistered_handshake_writes_nothing() {
    let mut frame = BytesMut::new();
    FrameCodec::new()
        .encode(
            encode_document(&service_handshake("Echo", false)).unwrap(),
            &mut frame,
        )
        .unwrap();

    // 脚本只允许读取握手帧，任何写入都会使测试失败
    let stream = tokio_test::io::Builder::new().read(&frame).build();
    let err = Connection::handshake("Echo", "mock", stream).await.unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::ServiceUnregistered));
}

/// 测试：服务名不一致时握手失败
#[tokio::test]
async fn test_handshake_name_mismatch() {
    let (client, server) = tokio::io::duplex(1024);
    tokio::spawn(async move {
        let mut server = MessageStream::new(server);
        let _ = server.write_message(&service_handshake("Other", true)).await;
        let _ = server.read_message::<ClientHandshake>().await;
    });

    let err = Connection::handshake("Echo", "pipe", client).await.unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::HandshakeFailed));
}

/// 测试：应用错误原样返回且连接保持可用
#[tokio::test]
async fn test_application_error_keeps_connection_open() {
    let (client, server) = tokio::io::duplex(4096);
    tokio::spawn(async move {
        let mut server = accept(server, "Echo").await;

        let request: RpcRequest = server.read_message().await.unwrap();
        assert_eq!(request.service_method, "Echo.Forward");
        server
            .write_message(&reply(&request, ServiceRpcOut::error("参数不合法")))
            .await
            .unwrap();

        let request: RpcRequest = server.read_message().await.unwrap();
        let input: String = decode_document(&request.body.payload).unwrap();
        let out = ServiceRpcOut::ok(encode_document(&input.to_uppercase()).unwrap());
        server.write_message(&reply(&request, out)).await.unwrap();
    });

    let mut conn = Connection::handshake("Echo", "pipe", client).await.unwrap();
    assert_eq!(conn.client_id(), "client-1");
    let ri = RequestInfo::new();

    let err = conn.send::<_, String>(&ri, "Upper", "abc").await.unwrap_err();
    assert!(err.is_application());
    assert_eq!(err.to_string(), "参数不合法");
    assert!(!conn.is_closed());

    let out: String = conn.send(&ri, "Upper", "abc").await.unwrap();
    assert_eq!(out, "ABC");
}

/// 测试：输出类型不匹配返回解码错误，连接保持可用
#[tokio::test]
async fn test_output_decode_error_keeps_connection_open() {
    let (client, server) = tokio::io::duplex(4096);
    tokio::spawn(async move {
        let mut server = accept(server, "Echo").await;
        for _ in 0..2 {
            let request: RpcRequest = server.read_message().await.unwrap();
            let out = ServiceRpcOut::ok(encode_document("not a number").unwrap());
            server.write_message(&reply(&request, out)).await.unwrap();
        }
    });

    let mut conn = Connection::handshake("Echo", "pipe", client).await.unwrap();
    let ri = RequestInfo::new();

    let err = conn.send::<_, u64>(&ri, "Upper", "abc").await.unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::DeserializationError));
    assert!(!conn.is_closed());

    let out: String = conn.send(&ri, "Upper", "abc").await.unwrap();
    assert_eq!(out, "not a number");
}

/// 测试：对端断开属于传输错误，连接随即关闭
#[tokio::test]
async fn test_transport_error_closes_connection() {
    let (client, server) = tokio::io::duplex(1024);
    tokio::spawn(async move {
        let server = accept(server, "Echo").await;
        drop(server);
    });

    let mut conn = Connection::handshake("Echo", "pipe", client).await.unwrap();
    let err = conn
        .send::<_, String>(&RequestInfo::new(), "Upper", "abc")
        .await
        .unwrap_err();
    assert!(err.is_transport());
    assert!(conn.is_closed());

    // 已关闭的连接立即失败
    let err = conn
        .send::<_, String>(&RequestInfo::new(), "Upper", "abc")
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::ConnectionClosed));
}

/// 测试：响应序号不一致视为协议错误并关闭连接
#[tokio::test]
async fn test_sequence_mismatch_closes_connection() {
    let (client, server) = tokio::io::duplex(1024);
    tokio::spawn(async move {
        let mut server = accept(server, "Echo").await;
        let request: RpcRequest = server.read_message().await.unwrap();
        let mut response = reply(&request, ServiceRpcOut::ok(encode_document(&()).unwrap()));
        response.seq += 7;
        let _ = server.write_message(&response).await;
        let _ = server.read_message::<RpcRequest>().await;
    });

    let mut conn = Connection::handshake("Echo", "pipe", client).await.unwrap();
    let err = conn
        .send::<_, ()>(&RequestInfo::new(), "Noop", &())
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::ProtocolError));
    assert!(conn.is_closed());
}

/// 测试：服务端不回复时超过截止时间返回超时并关闭连接
#[tokio::test]
async fn test_send_timeout() {
    let (client, server) = tokio::io::duplex(1024);
    tokio::spawn(async move {
        let mut server = accept(server, "Echo").await;
        let _ = server.read_message::<RpcRequest>().await;
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let mut conn = Connection::handshake("Echo", "pipe", client).await.unwrap();
    let err = conn
        .send_timeout::<_, ()>(&RequestInfo::new(), "Noop", &(), Duration::from_millis(30))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::ConnectionTimeout));
    assert!(conn.is_closed());
}

/// 测试：拨号被拒绝时返回连接失败
#[tokio::test]
async fn test_connect_refused() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let err = Connection::connect("Echo", &addr, Duration::from_millis(500))
        .await
        .unwrap_err();
    assert!(err.is_transport());
    assert_eq!(err.code(), Some(ErrorCode::ConnectionFailed));
}

/// 测试：空闲超时后连接视为已关闭
#[tokio::test]
async fn test_idle_timeout_expires_connection() {
    let (client, server) = tokio::io::duplex(1024);
    let fake = tokio::spawn(async move { accept(server, "Echo").await });

    let mut conn = Connection::handshake("", "pipe", client).await.unwrap();
    let _server = fake.await.unwrap();
    conn.set_idle_timeout(Duration::from_millis(10));
    assert!(!conn.is_closed());
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(conn.is_closed());
}
