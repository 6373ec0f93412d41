/// 有限读取器模块
///
/// 在 WebSocket 握手阶段限制请求头大小，防止慢速或恶意客户端耗尽内存。
/// 握手完成后调用 [`LimitedStream::lift_limit`] 解除限制，之后读写直接透传。
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// HTTP 请求头最大大小（默认 16KB）
pub const DEFAULT_MAX_HEADER_SIZE: usize = 16 * 1024;

/// 有限流 - 限制解除前最多可以读取的字节数
#[derive(Debug)]
pub struct LimitedStream<S> {
    inner: S,
    remaining: usize,
    limit: usize,
    enforced: bool,
}

impl<S> LimitedStream<S> {
    /// 创建新的有限流
    pub fn new(inner: S, limit: usize) -> Self {
        Self {
            inner,
            remaining: limit,
            limit,
            enforced: true,
        }
    }

    /// 使用 HTTP 头大小限制（16KB）
    pub fn with_header_limit(inner: S) -> Self {
        Self::new(inner, DEFAULT_MAX_HEADER_SIZE)
    }

    /// 获取剩余可读字节数
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// 获取总限制
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// 获取已读取字节数
    pub fn read_count(&self) -> usize {
        self.limit - self.remaining
    }

    /// 限制是否仍然生效
    pub fn is_enforced(&self) -> bool {
        self.enforced
    }

    /// 解除限制
    pub fn lift_limit(&mut self) {
        self.enforced = false;
    }

    /// 获取内部流的引用
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// 获取内部流的可变引用
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// 消费 LimitedStream，返回内部流
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for LimitedStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.enforced {
            return Pin::new(&mut self.inner).poll_read(cx, buf);
        }

        if self.remaining == 0 {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("request header exceeds {} bytes", self.limit),
            )));
        }

        // 临时限制缓冲区容量
        let limit = self.remaining.min(buf.remaining());
        let mut limited = ReadBuf::new(buf.initialize_unfilled_to(limit));
        match Pin::new(&mut self.inner).poll_read(cx, &mut limited) {
            Poll::Ready(Ok(())) => {
                let read = limited.filled().len();
                buf.advance(read);
                self.remaining = self.remaining.saturating_sub(read);
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for LimitedStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
