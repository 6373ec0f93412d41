mod websocket;

pub use websocket::{ws_error_to_io, WsStream};

use std::fmt::Debug;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncWrite};

/// 传输层连接抽象
///
/// 统一封装明文 TCP 和 TLS 连接，WebSocket 握手在其之上进行
pub trait Transport: AsyncRead + AsyncWrite + Debug + Unpin + Send + 'static {}

// 为所有满足条件的类型自动实现 Transport
impl<T> Transport for T where T: AsyncRead + AsyncWrite + Debug + Unpin + Send + 'static {}

/// 装箱后的传输层连接
pub type BoxedTransport = Pin<Box<dyn Transport>>;
