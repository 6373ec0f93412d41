use bytes::Bytes;
use futures::{Sink, SinkExt, StreamExt};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::PollSender;
use tracing::{debug, info, info_span, trace, warn, Instrument};
use uuid::Uuid;

use crate::buffer_pool::{BufferPool, DEFAULT_BUFFER_SIZE};
use crate::io_util::{copy_buffer_with_write_timeout, CopyOutcome, DEFAULT_WRITE_TIMEOUT};
use crate::transport::{ws_error_to_io, WsStream};

/// 默认保活 Ping 间隔（30 秒）
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// 待发送帧队列深度
const FRAME_QUEUE_DEPTH: usize = 8;

/// 隧道处理器配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerConfig {
    /// 每个转发方向使用的缓冲区大小
    pub buffer_size: usize,
    /// 单次写入的截止时间
    pub write_timeout: Duration,
    /// 保活 Ping 间隔，为 0 时不发送
    pub keepalive_interval: Duration,
    /// 是否拒绝没有 Origin 头的升级请求
    pub require_origin: bool,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            require_origin: true,
        }
    }
}

/// 隧道处理器
///
/// 每个升级后的 WebSocket 连接都会连接到同一个 TCP 目标，然后双向转发。
#[derive(Debug)]
pub struct Handler {
    target_addr: String,
    config: HandlerConfig,
    pool: Arc<BufferPool>,
}

impl Handler {
    pub fn new(target_addr: impl Into<String>) -> Self {
        Self::with_config(target_addr, HandlerConfig::default())
    }

    pub fn with_config(target_addr: impl Into<String>, config: HandlerConfig) -> Self {
        let pool = Arc::new(BufferPool::new(config.buffer_size));
        Self {
            target_addr: target_addr.into(),
            config,
            pool,
        }
    }

    /// 使用外部提供的缓冲区池（可在多个处理器之间共享）
    pub fn with_pool(mut self, pool: Arc<BufferPool>) -> Self {
        self.pool = pool;
        self
    }

    pub fn target_addr(&self) -> &str {
        &self.target_addr
    }

    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// 检查升级请求的 Origin 头，必须是合法的绝对 URL
    pub fn check_origin(&self, origin: Option<&str>) -> bool {
        if !self.config.require_origin {
            return true;
        }
        match origin {
            Some(origin) => url::Url::parse(origin).is_ok(),
            None => false,
        }
    }

    /// 处理一个已完成握手的 WebSocket 会话，直到任意一端关闭
    pub async fn serve_session<S>(&self, ws: WebSocketStream<S>, peer: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let span = info_span!("session", id = %Uuid::new_v4(), %peer);
        self.run_session(ws).instrument(span).await
    }

    async fn run_session<S>(&self, mut ws: WebSocketStream<S>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let target = match TcpStream::connect(&self.target_addr).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Failed to connect to target {}: {}", self.target_addr, e);
                let frame = CloseFrame {
                    code: CloseCode::Error,
                    reason: "target unreachable".into(),
                };
                if let Err(e) = ws.close(Some(frame)).await {
                    debug!("Failed to send close frame: {}", e);
                }
                return;
            }
        };
        if let Err(e) = target.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY on target connection: {}", e);
        }
        info!("Connected to target {}", self.target_addr);

        let write_timeout = self.config.write_timeout;
        let (mut target_read, mut target_write) = target.into_split();
        let (sink, stream) = ws.split();
        let (tx, rx) = mpsc::channel::<Message>(FRAME_QUEUE_DEPTH);

        let pump = pump_frames(sink, rx, self.config.keepalive_interval, write_timeout);
        tokio::pin!(pump);
        let mut pump_result = None;

        {
            let inbound = async {
                let mut src = WsStream::new(stream);
                let mut buf = self.pool.get();
                copy_buffer_with_write_timeout(&mut target_write, &mut src, &mut buf[..], write_timeout)
                    .await
            };
            let outbound = async {
                let mut dst = WsStream::new(PollSender::new(tx));
                let mut buf = self.pool.get();
                copy_buffer_with_write_timeout(&mut dst, &mut target_read, &mut buf[..], write_timeout)
                    .await
            };
            tokio::pin!(inbound, outbound);

            tokio::select! {
                outcome = &mut inbound => log_outcome("client -> target", outcome),
                outcome = &mut outbound => log_outcome("target -> client", outcome),
                result = &mut pump => pump_result = Some(result),
            }
            // 离开作用域时两个方向都被丢弃，帧队列随之关闭
        }

        let pump_result = match pump_result {
            Some(result) => result,
            None => tokio::time::timeout(write_timeout, &mut pump)
                .await
                .unwrap_or_else(|_| {
                    Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "timed out flushing frames",
                    ))
                }),
        };
        if let Err(e) = pump_result {
            warn!("WebSocket writer stopped: {}", e);
        }

        info!("Session closed");
    }
}

fn log_outcome(direction: &str, outcome: CopyOutcome) {
    match outcome.error {
        None => debug!("{} finished: {} bytes", direction, outcome.written),
        Some(e) if e.is_timeout() => {
            warn!("{} stalled after {} bytes: {}", direction, outcome.written, e)
        }
        Some(e) => debug!("{} ended after {} bytes: {}", direction, outcome.written, e),
    }
}

/// 独占 WebSocket 写端：发送队列中的帧并定时发送 Ping
///
/// 队列关闭后发送 Close 帧并返回。任何一次写入失败或超时都会返回错误。
async fn pump_frames<S>(
    mut sink: S,
    mut rx: mpsc::Receiver<Message>,
    keepalive: Duration,
    write_timeout: Duration,
) -> io::Result<()>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    let mut ticker = (!keepalive.is_zero()).then(|| {
        let mut ticker = tokio::time::interval_at(Instant::now() + keepalive, keepalive);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });

    loop {
        let tick = async {
            match ticker.as_mut() {
                Some(ticker) => {
                    ticker.tick().await;
                }
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            message = rx.recv() => match message {
                Some(message) => send_frame(&mut sink, message, write_timeout).await?,
                None => {
                    match tokio::time::timeout(write_timeout, sink.close()).await {
                        Ok(Ok(())) => trace!("Close frame sent"),
                        Ok(Err(e)) => debug!("Failed to close WebSocket: {}", e),
                        Err(_) => debug!("Timed out closing WebSocket"),
                    }
                    return Ok(());
                }
            },
            _ = tick => {
                trace!("Sending keepalive ping");
                send_frame(&mut sink, Message::Ping(Bytes::new()), write_timeout).await?;
            }
        }
    }
}

async fn send_frame<S>(sink: &mut S, message: Message, write_timeout: Duration) -> io::Result<()>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    match tokio::time::timeout(write_timeout, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ws_error_to_io(e)),
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("frame write exceeded {:?}", write_timeout),
        )),
    }
}
