use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, ORIGIN, USER_AGENT};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info};

use super::config::{ConnectConfig, ConnectOption, ResolvedConfig, DEFAULT_USER_AGENT};
use crate::error::{Result, TunnelError};
use crate::tls;
use crate::transport::{BoxedTransport, WsStream};

/// 客户端隧道连接，读写的是隧道中的原始字节
pub type WsConnection = WsStream<WebSocketStream<BoxedTransport>>;

/// 隧道拨号器
///
/// 持有一份基础配置，每次拨号前复制一份再应用覆盖选项，
/// 因此同一个 `Dialer` 可以被多个任务同时使用。
#[derive(Debug, Clone, Default)]
pub struct Dialer {
    config: ConnectConfig,
}

impl Dialer {
    pub fn new(config: ConnectConfig) -> Self {
        Self { config }
    }

    /// 从一组选项创建拨号器
    pub fn from_options<I>(options: I) -> Self
    where
        I: IntoIterator<Item = ConnectOption>,
    {
        let mut config = ConnectConfig::default();
        config.apply_all(options);
        Self { config }
    }

    /// 基础配置
    pub fn config(&self) -> &ConnectConfig {
        &self.config
    }

    /// 使用基础配置拨号
    pub async fn dial(&self) -> Result<WsConnection> {
        connect_with_config(&self.config).await
    }

    /// 在基础配置的副本上应用 `overrides` 后拨号，基础配置保持不变
    pub async fn dial_with<I>(&self, overrides: I) -> Result<WsConnection>
    where
        I: IntoIterator<Item = ConnectOption>,
    {
        let mut config = self.config.clone();
        config.apply_all(overrides);
        connect_with_config(&config).await
    }
}

/// 按顺序应用选项后建立隧道连接
pub async fn connect<I>(options: I) -> Result<WsConnection>
where
    I: IntoIterator<Item = ConnectOption>,
{
    let mut config = ConnectConfig::default();
    config.apply_all(options);
    connect_with_config(&config).await
}

/// 使用给定配置建立隧道连接：TCP 拨号 → 可选 TLS 握手 → WebSocket 握手
pub async fn connect_with_config(config: &ConnectConfig) -> Result<WsConnection> {
    let resolved = config.resolve()?;

    // 先构造请求，配置错误不需要占用网络连接
    let mut request = resolved
        .ws_url()
        .into_client_request()
        .map_err(|e| TunnelError::invalid_url(resolved.ws_url(), e.to_string()))?;
    let headers = request.headers_mut();
    headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
    headers.insert(
        ORIGIN,
        HeaderValue::from_str(&resolved.origin())
            .map_err(|e| TunnelError::invalid_url(resolved.origin(), e.to_string()))?,
    );

    let tcp = dial_tcp(&resolved).await?;
    let transport = if resolved.tls {
        tls_handshake(&resolved, tcp).await?
    } else {
        Box::pin(tcp) as BoxedTransport
    };

    let (ws, response) = tokio_tungstenite::client_async(request, transport)
        .await
        .map_err(TunnelError::handshake)?;
    debug!("WebSocket handshake response: {}", response.status());
    info!("Tunnel established to {}", resolved.ws_url());

    Ok(WsStream::new(ws))
}

async fn dial_tcp(resolved: &ResolvedConfig) -> Result<TcpStream> {
    let addr = resolved.dial_addr();
    let timeout: Duration = resolved.dial.connect_timeout;
    debug!("Dialing {} (timeout {:?})", addr, timeout);

    let stream = match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Err(TunnelError::connection_failed(addr, e)),
        Err(_) => return Err(TunnelError::timeout(timeout)),
    };
    if resolved.dial.nodelay {
        stream.set_nodelay(true)?;
    }
    Ok(stream)
}

async fn tls_handshake(resolved: &ResolvedConfig, tcp: TcpStream) -> Result<BoxedTransport> {
    let client_config = tls::client_config(resolved.ca_cert_path.as_deref(), resolved.insecure)?;
    let connector = TlsConnector::from(client_config);
    let server_name = tls::server_name(&resolved.server_name)?;

    let stream = connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| TunnelError::tls_handshake(&resolved.server_name, e))?;
    debug!("TLS handshake with '{}' completed", resolved.server_name);
    Ok(Box::pin(stream))
}
