// WebSocket 字节流适配器
// 将 WebSocket 消息流包装为 AsyncRead + AsyncWrite，写入的数据总是以二进制帧发送

use bytes::{Buf, Bytes};
use futures::{Sink, Stream};
use std::error::Error as StdError;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::trace;

/// WebSocket 流包装器
///
/// - 读：二进制帧（以及文本帧）的负载按原样作为字节流返回，Ping/Pong 由底层处理后跳过，
///   收到 Close 帧或连接结束视为 EOF；
/// - 写：每次写入作为一个二进制帧发送，shutdown 时发送 Close 帧。
///
/// `T` 可以是完整的 `WebSocketStream`，也可以只是其中一半（只读的 Stream 或只写的 Sink）。
#[derive(Debug)]
pub struct WsStream<T> {
    inner: T,
    read_buf: Option<Bytes>,
    eof: bool,
}

impl<T> WsStream<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            read_buf: None,
            eof: false,
        }
    }

    /// 消费包装器，返回内部流（未读完的缓冲数据会被丢弃）
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T> AsyncRead for WsStream<T>
where
    T: Stream<Item = Result<Message, WsError>> + Unpin,
{
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            // 如果有缓冲的数据，先读取缓冲数据
            if let Some(data) = self.read_buf.as_mut() {
                let to_read = std::cmp::min(data.len(), buf.remaining());
                buf.put_slice(&data[..to_read]);
                data.advance(to_read);
                if data.is_empty() {
                    self.read_buf = None;
                }
                return Poll::Ready(Ok(()));
            }

            if self.eof {
                return Poll::Ready(Ok(()));
            }

            match ready!(Pin::new(&mut self.inner).poll_next(cx)) {
                Some(Ok(Message::Binary(data))) => {
                    if !data.is_empty() {
                        self.read_buf = Some(data);
                    }
                }
                Some(Ok(Message::Text(text))) => {
                    if !text.is_empty() {
                        self.read_buf = Some(Bytes::copy_from_slice(text.as_bytes()));
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    trace!("Received close frame: {:?}", frame);
                    self.eof = true;
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    // Pong 回复由 tungstenite 在下一次读写时自动发送
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(WsError::ConnectionClosed)) | None => {
                    self.eof = true;
                }
                Some(Err(e)) => return Poll::Ready(Err(ws_error_to_io(e))),
            }
        }
    }
}

impl<T> AsyncWrite for WsStream<T>
where
    T: Sink<Message> + Unpin,
    T::Error: StdError + Send + Sync + 'static,
{
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        ready!(Pin::new(&mut self.inner).poll_ready(cx)).map_err(sink_error_to_io)?;
        Pin::new(&mut self.inner)
            .start_send(Message::Binary(Bytes::copy_from_slice(buf)))
            .map_err(sink_error_to_io)?;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner)
            .poll_flush(cx)
            .map_err(sink_error_to_io)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner)
            .poll_close(cx)
            .map_err(sink_error_to_io)
    }
}

/// 将 WebSocket 错误转换为 I/O 错误，保留底层 I/O 错误的类型
pub fn ws_error_to_io(err: WsError) -> io::Error {
    match err {
        WsError::Io(e) => e,
        WsError::ConnectionClosed | WsError::AlreadyClosed => {
            io::Error::new(io::ErrorKind::BrokenPipe, err)
        }
        other => io::Error::other(other),
    }
}

fn sink_error_to_io<E>(err: E) -> io::Error
where
    E: StdError + Send + Sync + 'static,
{
    let boxed: Box<dyn StdError + Send + Sync> = Box::new(err);
    match boxed.downcast::<WsError>() {
        Ok(ws) => ws_error_to_io(*ws),
        Err(other) => io::Error::new(io::ErrorKind::BrokenPipe, other),
    }
}
