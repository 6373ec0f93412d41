mod config;
mod dialer;

pub use config::{
    ensure_leading_slash, parse_addr_and_port, ConnectConfig, ConnectOption, DialSettings,
    ResolvedConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_USER_AGENT,
};
pub use dialer::{connect, connect_with_config, Dialer, WsConnection};

use std::cell::Cell;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use crate::buffer_pool::DEFAULT_BUFFER_SIZE;

/// 一次转发的流量统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// 本地 → 隧道
    pub sent: u64,
    /// 隧道 → 本地
    pub received: u64,
}

/// 在隧道和本地读写端之间双向转发
///
/// 隧道关闭时立即返回；本地输入结束时先关闭隧道写端（发送 Close 帧），
/// 再等待隧道中剩余的数据写完。
pub async fn relay<C, R, W>(conn: C, mut input: R, mut output: W) -> io::Result<RelayStats>
where
    C: AsyncRead + AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (mut tunnel_read, mut tunnel_write) = tokio::io::split(conn);
    // 隧道先关闭时上传方向被丢弃，已发送的字节数需要在外部记录
    let sent = Cell::new(0u64);

    let upload = async {
        let mut buf = vec![0u8; DEFAULT_BUFFER_SIZE];
        loop {
            let n = input.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            tunnel_write.write_all(&buf[..n]).await?;
            tunnel_write.flush().await?;
            sent.set(sent.get() + n as u64);
        }
        tunnel_write.shutdown().await
    };
    let download = async {
        let received = tokio::io::copy(&mut tunnel_read, &mut output).await?;
        output.flush().await?;
        Ok::<_, io::Error>(received)
    };
    tokio::pin!(upload, download);

    let received = tokio::select! {
        result = &mut download => {
            debug!("Tunnel closed by peer");
            result?
        }
        result = &mut upload => {
            result?;
            debug!("Local input finished after {} bytes", sent.get());
            // 对端收到 Close 后可能直接断开，此时已收到的数据都已写出
            match download.await {
                Ok(received) => received,
                Err(e) => {
                    debug!("Tunnel read ended with error after close: {}", e);
                    0
                }
            }
        }
    };

    let stats = RelayStats {
        sent: sent.get(),
        received,
    };
    info!(
        "Relay finished: sent {} bytes, received {} bytes",
        stats.sent, stats.received
    );
    Ok(stats)
}

/// 在隧道和标准输入/输出之间转发
pub async fn relay_stdio<C>(conn: C) -> io::Result<RelayStats>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    relay(conn, tokio::io::stdin(), tokio::io::stdout()).await
}
