mod handler;
mod signal;

pub use handler::{Handler, HandlerConfig, DEFAULT_KEEPALIVE_INTERVAL};
pub use signal::Signal;

use parking_lot::Mutex;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::ORIGIN;
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::client::ensure_leading_slash;
use crate::error::{Result, TunnelError};
use crate::limited_reader::{LimitedStream, DEFAULT_MAX_HEADER_SIZE};
use crate::transport::BoxedTransport;

/// 读取请求头的超时时间（5 秒）
pub const DEFAULT_HEADER_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// `close()` 使用的优雅关闭时限（3 秒）
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);

/// 未指定监听地址时使用的地址
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:80";

/// accept 失败后的退避时间
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// WebSocket 隧道服务器
///
/// 生命周期：创建 → [`Server::serve`] 绑定监听并触发 "listening" →
/// [`Server::shutdown`] 停止接受新连接并等待现有连接结束 → 触发 "shutdown"。
pub struct Server {
    listen_addr: String,
    path: String,
    handler: Arc<Handler>,
    tls_acceptor: Option<TlsAcceptor>,
    header_read_timeout: Duration,
    max_header_bytes: usize,
    local_addr: Mutex<Option<SocketAddr>>,
    listen_error: Mutex<Option<Arc<io::Error>>>,
    listening: Signal,
    shutdown: Signal,
    stop: CancellationToken,
    sessions: TaskTracker,
    serving: AtomicBool,
}

impl Server {
    /// 创建服务器，`path` 为 WebSocket 升级路径（以 `/` 结尾时按前缀匹配）
    pub fn new(listen_addr: impl Into<String>, path: impl Into<String>, handler: Arc<Handler>) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            path: ensure_leading_slash(&path.into()),
            handler,
            tls_acceptor: None,
            header_read_timeout: DEFAULT_HEADER_READ_TIMEOUT,
            max_header_bytes: DEFAULT_MAX_HEADER_SIZE,
            local_addr: Mutex::new(None),
            listen_error: Mutex::new(None),
            listening: Signal::new(),
            shutdown: Signal::new(),
            stop: CancellationToken::new(),
            sessions: TaskTracker::new(),
            serving: AtomicBool::new(false),
        }
    }

    /// 在监听端口上直接终止 TLS（wss://）
    pub fn with_tls(mut self, acceptor: TlsAcceptor) -> Self {
        self.tls_acceptor = Some(acceptor);
        self
    }

    pub fn with_header_read_timeout(mut self, timeout: Duration) -> Self {
        self.header_read_timeout = timeout;
        self
    }

    pub fn with_max_header_bytes(mut self, max: usize) -> Self {
        self.max_header_bytes = max;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn handler(&self) -> &Arc<Handler> {
        &self.handler
    }

    /// 开始监听并处理连接，直到 [`Server::shutdown`] 被调用
    ///
    /// 只能调用一次。正常停止时返回 [`TunnelError::ServerClosed`]。
    pub async fn serve(&self) -> Result<()> {
        if self.serving.swap(true, Ordering::AcqRel) {
            return Err(TunnelError::AlreadyServing);
        }

        let result = if self.stop.is_cancelled() {
            Err(TunnelError::ServerClosed)
        } else {
            self.listen_and_serve().await
        };

        // 绑定失败时也要释放等待 "listening" 的任务
        self.listening.fire();
        self.shutdown.fire();
        result
    }

    async fn listen_and_serve(&self) -> Result<()> {
        let addr = normalize_listen_addr(&self.listen_addr);
        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to listen on {}: {}", addr, e);
                let err = TunnelError::bind(&addr, io::Error::new(e.kind(), e.to_string()));
                *self.listen_error.lock() = Some(Arc::new(e));
                return Err(err);
            }
        };

        let local_addr = listener.local_addr()?;
        *self.local_addr.lock() = Some(local_addr);
        info!(
            "Listening on {}{} ({})",
            local_addr,
            self.path,
            if self.tls_acceptor.is_some() { "wss" } else { "ws" }
        );
        self.listening.fire();

        let dispatch = Dispatch {
            path: Arc::from(self.path.as_str()),
            handler: Arc::clone(&self.handler),
            tls_acceptor: self.tls_acceptor.clone(),
            header_read_timeout: self.header_read_timeout,
            max_header_bytes: self.max_header_bytes,
        };

        loop {
            let (socket, peer) = tokio::select! {
                _ = self.stop.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                        continue;
                    }
                },
            };
            debug!("Accepted connection from {}", peer);
            self.sessions
                .spawn(dispatch.clone().serve_connection(socket, peer));
        }

        info!("Stopped accepting connections on {}", local_addr);
        Err(TunnelError::ServerClosed)
    }

    /// 优雅关闭：停止接受新连接，在 `timeout` 内等待所有连接结束
    ///
    /// 超时返回 [`TunnelError::Timeout`]，此时尚未结束的会话继续运行。
    /// 可以重复或并发调用。
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        self.listening.fire();
        if !self.stop.is_cancelled() {
            info!("Shutting down server");
        }
        self.stop.cancel();
        self.sessions.close();

        let drained = async {
            if self.serving.load(Ordering::Acquire) {
                self.shutdown.wait().await;
            }
            self.sessions.wait().await;
        };
        match tokio::time::timeout(timeout, drained).await {
            Ok(()) => Ok(()),
            Err(_) => {
                warn!(
                    "{} connection(s) still active after {:?}",
                    self.sessions.len(),
                    timeout
                );
                Err(TunnelError::timeout(timeout))
            }
        }
    }

    /// 使用默认时限（3 秒）关闭
    pub async fn close(&self) -> Result<()> {
        self.shutdown(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// "listening" 信号：监听成功或失败（以及关闭）时触发
    pub fn on_listened(&self) -> &Signal {
        &self.listening
    }

    /// "shutdown" 信号：`serve` 返回时触发
    pub fn on_shutdown(&self) -> &Signal {
        &self.shutdown
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_fired()
    }

    /// 绑定监听端口时的错误
    pub fn listen_error(&self) -> Option<Arc<io::Error>> {
        self.listen_error.lock().clone()
    }

    /// 实际监听的地址（监听端口为 0 时可用来获取分配的端口）
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// 正在处理的连接数（包括尚未完成握手的）
    pub fn active_connections(&self) -> usize {
        self.sessions.len()
    }
}

/// 每个连接任务持有的分发参数
#[derive(Clone)]
struct Dispatch {
    path: Arc<str>,
    handler: Arc<Handler>,
    tls_acceptor: Option<TlsAcceptor>,
    header_read_timeout: Duration,
    max_header_bytes: usize,
}

impl Dispatch {
    async fn serve_connection(self, socket: TcpStream, peer: SocketAddr) {
        if let Err(e) = socket.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
        }

        let ws = match tokio::time::timeout(self.header_read_timeout, self.upgrade(socket)).await {
            Ok(Ok(ws)) => ws,
            Ok(Err(e)) => {
                debug!("Rejected connection from {}: {}", peer, e);
                return;
            }
            Err(_) => {
                debug!(
                    "Connection from {} did not complete handshake within {:?}",
                    peer, self.header_read_timeout
                );
                return;
            }
        };

        self.handler.serve_session(ws, peer).await;
    }

    async fn upgrade(
        &self,
        socket: TcpStream,
    ) -> Result<WebSocketStream<LimitedStream<BoxedTransport>>> {
        let transport: BoxedTransport = match &self.tls_acceptor {
            Some(acceptor) => Box::pin(acceptor.accept(socket).await?),
            None => Box::pin(socket),
        };

        let path = &self.path;
        let handler = &self.handler;
        let callback = |request: &Request, response: Response| -> std::result::Result<Response, ErrorResponse> {
            let request_path = request.uri().path();
            if !path_matches(path, request_path) {
                debug!("No handler for path {}", request_path);
                return Err(reject(StatusCode::NOT_FOUND));
            }
            let origin = request.headers().get(ORIGIN).and_then(|v| v.to_str().ok());
            if !handler.check_origin(origin) {
                debug!("Rejected upgrade with origin {:?}", origin);
                return Err(reject(StatusCode::FORBIDDEN));
            }
            Ok(response)
        };

        let limited = LimitedStream::new(transport, self.max_header_bytes);
        let mut ws = tokio_tungstenite::accept_hdr_async(limited, callback)
            .await
            .map_err(TunnelError::handshake)?;
        ws.get_mut().lift_limit();
        Ok(ws)
    }
}

fn reject(status: StatusCode) -> ErrorResponse {
    let mut response = ErrorResponse::new(status.canonical_reason().map(str::to_string));
    *response.status_mut() = status;
    response
}

/// 路径匹配：模式以 `/` 结尾时按前缀匹配，否则必须完全相同
pub fn path_matches(pattern: &str, path: &str) -> bool {
    if pattern.ends_with('/') {
        path.starts_with(pattern)
    } else {
        path == pattern
    }
}

/// 补全只有端口的监听地址（":8080" → "0.0.0.0:8080"）
fn normalize_listen_addr(addr: &str) -> String {
    if addr.is_empty() {
        DEFAULT_LISTEN_ADDR.to_string()
    } else if addr.starts_with(':') {
        format!("0.0.0.0{}", addr)
    } else {
        addr.to_string()
    }
}
