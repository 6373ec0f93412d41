/// 带写超时的数据拷贝模块
///
/// 从源读取数据并写入目标，每次写入都有独立的截止时间，防止停滞的对端长期占用资源
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// 默认写超时（15 秒）
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(15);

/// 拷贝终止原因
#[derive(Error, Debug)]
pub enum CopyError {
    /// 读取源数据失败（EOF 不算错误）
    #[error("read failed: {0}")]
    Read(#[source] io::Error),

    /// 写入目标失败
    #[error("write failed: {0}")]
    Write(#[source] io::Error),

    /// 目标接受了比请求更少的字节却没有报告错误
    #[error("short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    /// 写入超过截止时间
    #[error("write deadline of {0:?} exceeded")]
    WriteTimeout(Duration),
}

impl CopyError {
    /// 是否为超时类错误
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::WriteTimeout(_) => true,
            Self::Read(e) | Self::Write(e) => e.kind() == io::ErrorKind::TimedOut,
            Self::ShortWrite { .. } => false,
        }
    }
}

impl From<CopyError> for io::Error {
    fn from(err: CopyError) -> Self {
        match err {
            CopyError::Read(e) | CopyError::Write(e) => e,
            CopyError::ShortWrite { .. } => io::Error::new(io::ErrorKind::WriteZero, err),
            CopyError::WriteTimeout(_) => io::Error::new(io::ErrorKind::TimedOut, err),
        }
    }
}

/// 一次拷贝的结果
#[derive(Debug)]
pub struct CopyOutcome {
    /// 成功写入目标的字节数
    pub written: u64,
    /// 终止错误，正常 EOF 时为 `None`
    pub error: Option<CopyError>,
}

impl CopyOutcome {
    /// 转换为 `Result`
    pub fn into_result(self) -> Result<u64, CopyError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.written),
        }
    }
}

/// 使用调用者提供的缓冲区从 `src` 拷贝到 `dst`
///
/// 每读到一块数据，就要求这块数据在 `timeout` 内完整写入并刷新。
/// 读到 EOF 时正常结束；读错误、写错误、短写和写超时都会终止拷贝。
pub async fn copy_buffer_with_write_timeout<R, W>(
    dst: &mut W,
    src: &mut R,
    buf: &mut [u8],
    timeout: Duration,
) -> CopyOutcome
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut written = 0u64;

    loop {
        let nr = match src.read(buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return CopyOutcome {
                    written,
                    error: Some(CopyError::Read(e)),
                }
            }
        };

        let mut chunk_written = 0usize;
        let result =
            tokio::time::timeout(timeout, write_chunk(dst, &buf[..nr], &mut chunk_written)).await;
        written += chunk_written as u64;

        let error = match result {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => e,
            Err(_) => CopyError::WriteTimeout(timeout),
        };
        return CopyOutcome {
            written,
            error: Some(error),
        };
    }

    CopyOutcome {
        written,
        error: None,
    }
}

async fn write_chunk<W>(dst: &mut W, data: &[u8], written: &mut usize) -> Result<(), CopyError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    while *written < data.len() {
        match dst.write(&data[*written..]).await {
            Ok(0) => {
                return Err(CopyError::ShortWrite {
                    written: *written,
                    expected: data.len(),
                })
            }
            Ok(n) => *written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CopyError::Write(e)),
        }
    }
    dst.flush().await.map_err(CopyError::Write)
}
