/// 服务器生命周期测试：监听、拒绝、优雅关闭
mod common;

use common::*;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use url::Url;
use ws_tunnel::client::{self, ConnectOption, WsConnection};
use ws_tunnel::server::{Handler, Server};
use ws_tunnel::TunnelError;

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// 接受连接后保持打开、直到对端关闭的目标服务
async fn start_holding_target() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = socket.read_to_end(&mut buf).await;
            });
        }
    });
    addr
}

async fn open_session(server: &TestServer) -> WsConnection {
    let url = Url::parse(&server.url("/ws")).unwrap();
    let conn = client::connect([ConnectOption::Url(url)])
        .await
        .expect("Failed to open tunnel");

    // 等待服务器侧的会话任务启动
    for _ in 0..50 {
        if server.server.active_connections() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(server.server.active_connections(), 1);
    conn
}

#[tokio::test]
async fn test_bind_failure() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = occupied.local_addr().unwrap();

    let server = Server::new(addr.to_string(), "/ws", Arc::new(Handler::new("127.0.0.1:1")));
    let err = server.serve().await.unwrap_err();

    assert!(matches!(err, TunnelError::Bind { .. }), "unexpected: {:?}", err);
    assert!(server.on_listened().is_fired());
    assert!(server.is_shutdown());
    assert!(server.listen_error().is_some());
    assert!(server.local_addr().is_none());
}

#[tokio::test]
async fn test_serve_twice() {
    let target = start_holding_target().await;
    let server = start_tunnel_server(target, "/ws").await;

    let err = server.server.serve().await.unwrap_err();
    assert!(matches!(err, TunnelError::AlreadyServing));

    server.server.close().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_stops_listener() {
    let target = start_holding_target().await;
    let server = start_tunnel_server(target, "/ws").await;
    assert!(server.server.listen_error().is_none());

    server.server.shutdown(TEST_TIMEOUT).await.unwrap();
    assert!(server.server.is_shutdown());

    let result = server.task.await.unwrap();
    assert!(matches!(result, Err(TunnelError::ServerClosed)));

    assert!(TcpStream::connect(server.addr).await.is_err());
}

#[tokio::test]
async fn test_concurrent_shutdown() {
    let target = start_holding_target().await;
    let server = start_tunnel_server(target, "/ws").await;

    let (a, b) = tokio::join!(
        server.server.shutdown(TEST_TIMEOUT),
        server.server.shutdown(TEST_TIMEOUT)
    );
    assert!(a.is_ok());
    assert!(b.is_ok());

    // 重复关闭仍然成功
    server.server.close().await.unwrap();
}

#[tokio::test]
async fn test_graceful_shutdown_waits_for_session() {
    let target = start_holding_target().await;
    let server = start_tunnel_server(target, "/ws").await;
    let mut conn = open_session(&server).await;

    let shutdown = {
        let server = Arc::clone(&server.server);
        tokio::spawn(async move { server.shutdown(Duration::from_secs(10)).await })
    };

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!shutdown.is_finished(), "shutdown returned with a live session");
    assert!(server.server.is_shutdown());

    // 现有会话仍然可以收发
    conn.write_all(b"still alive").await.unwrap();
    conn.shutdown().await.unwrap();

    tokio::time::timeout(TEST_TIMEOUT, shutdown)
        .await
        .expect("shutdown did not finish after the session ended")
        .unwrap()
        .unwrap();
    assert_eq!(server.server.active_connections(), 0);
}

#[tokio::test]
async fn test_shutdown_timeout() {
    let target = start_holding_target().await;
    let server = start_tunnel_server(target, "/ws").await;
    let _conn = open_session(&server).await;

    let err = server
        .server
        .shutdown(Duration::from_millis(200))
        .await
        .unwrap_err();
    assert!(err.is_timeout());

    // 超时不会强制断开会话
    assert_eq!(server.server.active_connections(), 1);
}

#[tokio::test]
async fn test_idle_connection_closed_after_header_timeout() {
    let target = start_holding_target().await;
    let handler = Arc::new(Handler::new(target.to_string()));
    let server = spawn_server(
        Server::new("127.0.0.1:0", "/ws", handler)
            .with_header_read_timeout(Duration::from_millis(200)),
    )
    .await;

    let mut socket = TcpStream::connect(server.addr).await.unwrap();
    let mut buf = [0u8; 64];
    let result = tokio::time::timeout(TEST_TIMEOUT, socket.read(&mut buf))
        .await
        .expect("idle connection was not closed");
    assert!(matches!(result, Ok(0) | Err(_)));
}

#[tokio::test]
async fn test_oversized_header_rejected() {
    let target = start_holding_target().await;
    let handler = Arc::new(Handler::new(target.to_string()));
    let server = spawn_server(
        Server::new("127.0.0.1:0", "/ws", handler).with_max_header_bytes(1024),
    )
    .await;

    let mut socket = TcpStream::connect(server.addr).await.unwrap();
    let request = format!(
        "GET /ws HTTP/1.1\r\nHost: {}\r\nX-Padding: {}\r\n",
        server.addr,
        "a".repeat(4096)
    );
    // 对端可能在写完之前就关闭连接
    let _ = socket.write_all(request.as_bytes()).await;

    let mut response = Vec::new();
    let result = tokio::time::timeout(TEST_TIMEOUT, socket.read_to_end(&mut response))
        .await
        .expect("oversized request was not rejected");
    if result.is_ok() {
        let text = String::from_utf8_lossy(&response);
        assert!(!text.contains("101"), "unexpected upgrade: {}", text);
    }
}
