/// 自定义错误类型
///
/// 使用 thiserror 定义精确的错误类型，调用者可以区分配置错误、拨号错误和监听错误
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// WebSocket 隧道的主要错误类型
#[derive(Error, Debug)]
pub enum TunnelError {
    /// 地址格式错误（host:port 解析失败）
    #[error("Invalid address '{addr}': {reason}")]
    InvalidAddress { addr: String, reason: String },

    /// URL 格式错误
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// 配置错误
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// TCP 连接失败
    #[error("Failed to connect to {addr}: {source}")]
    ConnectionFailed {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// 超时错误
    #[error("Operation timeout after {duration:?}")]
    Timeout { duration: Duration },

    /// TLS 握手失败
    #[error("TLS handshake with '{server_name}' failed: {source}")]
    TlsHandshake {
        server_name: String,
        #[source]
        source: io::Error,
    },

    /// WebSocket 握手失败（包括服务器拒绝升级）
    #[error("WebSocket handshake failed: {0}")]
    Handshake(#[source] Box<tungstenite::Error>),

    /// 监听端口绑定失败
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// 服务器已经关闭
    #[error("Server closed")]
    ServerClosed,

    /// 服务器已经在运行
    #[error("Server is already serving")]
    AlreadyServing,

    /// I/O 错误
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// 其他错误（保留与 anyhow 的兼容性）
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, TunnelError>;

impl TunnelError {
    /// 创建地址错误
    pub fn invalid_address(addr: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAddress {
            addr: addr.into(),
            reason: reason.into(),
        }
    }

    /// 创建 URL 错误
    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// 创建配置错误
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// 创建连接失败错误
    pub fn connection_failed(addr: impl Into<String>, source: io::Error) -> Self {
        Self::ConnectionFailed {
            addr: addr.into(),
            source,
        }
    }

    /// 创建超时错误
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// 创建 TLS 握手错误
    pub fn tls_handshake(server_name: impl Into<String>, source: io::Error) -> Self {
        Self::TlsHandshake {
            server_name: server_name.into(),
            source,
        }
    }

    /// 创建 WebSocket 握手错误
    pub fn handshake(source: tungstenite::Error) -> Self {
        Self::Handshake(Box::new(source))
    }

    /// 创建绑定错误
    pub fn bind(addr: impl Into<String>, source: io::Error) -> Self {
        Self::Bind {
            addr: addr.into(),
            source,
        }
    }

    /// 检查是否为超时错误
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// 检查是否为配置类错误（地址、URL、配置项）
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidAddress { .. } | Self::InvalidUrl { .. } | Self::ConfigError(_)
        )
    }

    /// 检查是否为拨号阶段的错误
    pub fn is_dial_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. }
                | Self::Timeout { .. }
                | Self::TlsHandshake { .. }
                | Self::Handshake(_)
        )
    }

    /// 如果是握手被拒绝，返回服务器的 HTTP 状态码
    pub fn handshake_status(&self) -> Option<u16> {
        match self {
            Self::Handshake(err) => match err.as_ref() {
                tungstenite::Error::Http(response) => Some(response.status().as_u16()),
                _ => None,
            },
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_address() {
        let err = TunnelError::invalid_address("example.com:abc", "invalid port");
        assert!(err.is_config_error());
        assert!(!err.is_dial_error());
        assert_eq!(
            err.to_string(),
            "Invalid address 'example.com:abc': invalid port"
        );
    }

    #[test]
    fn test_timeout_error() {
        let err = TunnelError::timeout(Duration::from_secs(5));
        assert!(err.is_timeout());
        assert!(err.is_dial_error());
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn test_connection_failed() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        let err = TunnelError::connection_failed("127.0.0.1:8080", io_err);
        assert!(err.to_string().contains("Failed to connect"));
        assert!(err.to_string().contains("127.0.0.1:8080"));
        assert!(err.is_dial_error());
    }

    #[test]
    fn test_handshake_status() {
        let err = TunnelError::handshake(tungstenite::Error::ConnectionClosed);
        assert!(err.is_dial_error());
        assert_eq!(err.handshake_status(), None);

        let err = TunnelError::config_error("bad");
        assert_eq!(err.handshake_status(), None);
    }

    #[test]
    fn test_bind_error() {
        let io_err = io::Error::new(io::ErrorKind::AddrInUse, "in use");
        let err = TunnelError::bind("127.0.0.1:80", io_err);
        assert!(err.to_string().contains("Failed to bind 127.0.0.1:80"));
        assert!(!err.is_config_error());
        assert!(!err.is_dial_error());
    }
}
