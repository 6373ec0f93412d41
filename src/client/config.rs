use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::error::{Result, TunnelError};

/// 默认 TCP 连接超时（5 秒）
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// 握手时发送的 User-Agent，伪装为普通浏览器
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; WOW64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/86.0.4240.198 Safari/537.36";

/// TCP 拨号参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialSettings {
    /// TCP 连接超时
    pub connect_timeout: Duration,
    /// 是否禁用 Nagle 算法
    pub nodelay: bool,
}

impl Default for DialSettings {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            nodelay: true,
        }
    }
}

/// 客户端连接配置
///
/// 可以通过 builder 方法链式设置，也可以按顺序应用一组 [`ConnectOption`]。
/// 未解析的字段在 [`ConnectConfig::resolve`] 时补全默认值。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectConfig {
    /// 拨号地址，`host` 或 `host:port`
    pub addr: String,
    /// HTTP Host 头，未设置时使用服务器名称或拨号主机
    pub host: Option<String>,
    /// WebSocket 路径
    pub path: String,
    /// TLS 服务器名称（SNI 与证书校验），未设置时使用 Host
    pub server_name: Option<String>,
    /// 是否启用 TLS
    pub tls: bool,
    /// 跳过证书校验
    pub insecure: bool,
    /// 自定义 CA 证书
    pub ca_cert_path: Option<PathBuf>,
    /// TCP 拨号参数
    pub dial: DialSettings,
}

impl ConnectConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            ..Default::default()
        }
    }

    /// 从 URL 创建配置，支持 ws / wss / http / https
    pub fn parse_url(url: &str) -> Result<Self> {
        let parsed = Url::parse(url).map_err(|e| TunnelError::invalid_url(url, e.to_string()))?;
        match parsed.scheme() {
            "ws" | "wss" | "http" | "https" => {}
            other => {
                return Err(TunnelError::invalid_url(
                    url,
                    format!("unsupported scheme '{}'", other),
                ))
            }
        }
        if !matches!(parsed.host_str(), Some(host) if !host.is_empty()) {
            return Err(TunnelError::invalid_url(url, "missing host"));
        }
        Ok(Self::from_url(&parsed))
    }

    /// 从已解析的 URL 创建配置，未知协议按明文处理
    pub fn from_url(url: &Url) -> Self {
        let mut config = Self::default();
        ConnectOption::Url(url.clone()).apply(&mut config);
        config
    }

    pub fn with_addr(mut self, addr: impl Into<String>) -> Self {
        self.addr = addr.into();
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// 启用 TLS，`server_name` 为空时沿用当前设置
    pub fn with_tls(mut self, server_name: Option<String>, insecure: bool) -> Self {
        self.tls = true;
        if server_name.is_some() {
            self.server_name = server_name;
        }
        self.insecure = insecure;
        self
    }

    pub fn with_ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    pub fn with_dial(mut self, dial: DialSettings) -> Self {
        self.dial = dial;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.dial.connect_timeout = timeout;
        self
    }

    /// 应用单个选项
    pub fn with(mut self, option: ConnectOption) -> Self {
        option.apply(&mut self);
        self
    }

    /// 按顺序应用一组选项，后面的选项覆盖前面的
    pub fn apply_all<I>(&mut self, options: I)
    where
        I: IntoIterator<Item = ConnectOption>,
    {
        for option in options {
            option.apply(self);
        }
    }

    /// 解析出实际拨号使用的参数
    pub fn resolve(&self) -> Result<ResolvedConfig> {
        if self.addr.is_empty() {
            return Err(TunnelError::invalid_address(&self.addr, "empty address"));
        }
        let (dial_host, dial_port) = parse_addr_and_port(&self.addr, self.tls)?;

        let host = match (&self.host, &self.server_name) {
            (Some(host), _) if !host.is_empty() => host.clone(),
            (_, Some(name)) if !name.is_empty() => name.clone(),
            _ => dial_host.clone(),
        };
        let server_name = match &self.server_name {
            Some(name) if !name.is_empty() => strip_port(name).to_string(),
            _ => strip_port(&host).to_string(),
        };

        Ok(ResolvedConfig {
            dial_host,
            dial_port,
            host,
            path: ensure_leading_slash(&self.path),
            server_name,
            tls: self.tls,
            insecure: self.insecure,
            ca_cert_path: self.ca_cert_path.clone(),
            dial: self.dial.clone(),
        })
    }
}

/// 连接选项，按顺序应用到 [`ConnectConfig`] 上
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOption {
    /// 从 URL 设置地址、路径、TLS 和服务器名称
    Url(Url),
    Addr(String),
    Host(String),
    Path(String),
    Tls {
        server_name: Option<String>,
        insecure: bool,
    },
    CaCert(PathBuf),
    Dial(DialSettings),
}

impl ConnectOption {
    pub fn apply(&self, config: &mut ConnectConfig) {
        match self {
            Self::Url(url) => {
                let host = url.host_str().unwrap_or_default().to_string();
                config.addr = match url.port() {
                    Some(port) => format!("{}:{}", host, port),
                    None => host.clone(),
                };
                config.path = url.path().to_string();
                match url.scheme() {
                    "wss" | "https" => {
                        config.tls = true;
                        // 保留非默认端口作为 Host，SNI 在解析时去掉端口
                        config.server_name = Some(config.addr.clone());
                    }
                    _ => config.tls = false,
                }
            }
            Self::Addr(addr) => config.addr = addr.clone(),
            Self::Host(host) => config.host = Some(host.clone()),
            Self::Path(path) => config.path = path.clone(),
            Self::Tls {
                server_name,
                insecure,
            } => {
                config.tls = true;
                if server_name.is_some() {
                    config.server_name = server_name.clone();
                }
                config.insecure = *insecure;
            }
            Self::CaCert(path) => config.ca_cert_path = Some(path.clone()),
            Self::Dial(dial) => config.dial = dial.clone(),
        }
    }
}

/// 解析后的连接参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub dial_host: String,
    pub dial_port: u16,
    pub host: String,
    pub path: String,
    pub server_name: String,
    pub tls: bool,
    pub insecure: bool,
    pub ca_cert_path: Option<PathBuf>,
    pub dial: DialSettings,
}

impl ResolvedConfig {
    /// TCP 拨号地址，IPv6 地址带方括号
    pub fn dial_addr(&self) -> String {
        if self.dial_host.contains(':') {
            format!("[{}]:{}", self.dial_host, self.dial_port)
        } else {
            format!("{}:{}", self.dial_host, self.dial_port)
        }
    }

    fn host_header(&self) -> String {
        if self.host.parse::<std::net::Ipv6Addr>().is_ok() {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        }
    }

    /// 握手请求的 URL
    pub fn ws_url(&self) -> String {
        let scheme = if self.tls { "wss" } else { "ws" };
        format!("{}://{}{}", scheme, self.host_header(), self.path)
    }

    /// 握手请求的 Origin 头
    pub fn origin(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{}://{}{}", scheme, self.host_header(), self.path)
    }
}

/// 拆分主机和端口，未指定端口时 TLS 使用 443，否则使用 80
pub fn parse_addr_and_port(addr: &str, tls: bool) -> Result<(String, u16)> {
    let default_port = if tls { 443 } else { 80 };

    let (host, port) = if let Some(rest) = addr.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| TunnelError::invalid_address(addr, "missing ']' in address"))?;
        match tail {
            "" => (host, None),
            _ => match tail.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None => {
                    return Err(TunnelError::invalid_address(
                        addr,
                        "unexpected characters after ']'",
                    ))
                }
            },
        }
    } else if addr.contains(']') {
        return Err(TunnelError::invalid_address(addr, "unexpected ']' in address"));
    } else {
        match addr.matches(':').count() {
            0 => (addr, None),
            1 => {
                let (host, port) = addr.split_once(':').unwrap_or((addr, ""));
                (host, Some(port))
            }
            _ => return Err(TunnelError::invalid_address(addr, "too many colons in address")),
        }
    };

    if host.is_empty() {
        return Err(TunnelError::invalid_address(addr, "missing host"));
    }

    let port = match port {
        None => default_port,
        Some(port) => port
            .parse::<u16>()
            .map_err(|_| TunnelError::invalid_address(addr, format!("invalid port '{}'", port)))?,
    };

    Ok((host.to_string(), port))
}

/// 确保路径以 `/` 开头
pub fn ensure_leading_slash(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

/// 去掉 `host:port` 中的端口，用作 TLS 服务器名称
fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split_once(']').map(|(h, _)| h).unwrap_or(rest);
    }
    match host.rsplit_once(':') {
        Some((h, port)) if !h.contains(':') && port.parse::<u16>().is_ok() => h,
        _ => host,
    }
}
