mod validator;

pub use validator::ConfigValidator;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::buffer_pool::DEFAULT_BUFFER_SIZE;
use crate::client::ConnectConfig;
use crate::limited_reader::DEFAULT_MAX_HEADER_SIZE;
use crate::server::HandlerConfig;

/// 客户端默认连接的隧道地址
pub const DEFAULT_CLIENT_TARGET: &str = "ws://127.0.0.1:8081/ws";

fn default_path() -> String {
    "/".to_string()
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_write_timeout_secs() -> u64 {
    15
}

fn default_keepalive_secs() -> u64 {
    30
}

fn default_header_read_timeout_secs() -> u64 {
    5
}

fn default_max_header_bytes() -> usize {
    DEFAULT_MAX_HEADER_SIZE
}

fn default_true() -> bool {
    true
}

fn default_client_target() -> String {
    DEFAULT_CLIENT_TARGET.to_string()
}

fn default_connect_timeout_secs() -> u64 {
    5
}

/// 服务器端配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 监听地址（如 "0.0.0.0:8081" 或 ":8081"）
    #[serde(default)]
    pub listen: Option<String>,
    /// 隧道目标 TCP 地址
    #[serde(default)]
    pub target: Option<String>,
    /// WebSocket 升级路径
    #[serde(default = "default_path")]
    pub path: String,
    /// 每个转发方向的缓冲区大小
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// 单次写入超时（秒）
    #[serde(default = "default_write_timeout_secs")]
    pub write_timeout_secs: u64,
    /// 保活 Ping 间隔（秒），0 表示不发送
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
    /// 读取请求头超时（秒）
    #[serde(default = "default_header_read_timeout_secs")]
    pub header_read_timeout_secs: u64,
    /// 请求头最大字节数
    #[serde(default = "default_max_header_bytes")]
    pub max_header_bytes: usize,
    /// 是否拒绝没有 Origin 头的升级请求
    #[serde(default = "default_true")]
    pub require_origin: bool,
    /// TLS 证书路径（与 key_path 同时设置时启用 wss）
    #[serde(default)]
    pub cert_path: Option<PathBuf>,
    /// TLS 私钥路径
    #[serde(default)]
    pub key_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: None,
            target: None,
            path: default_path(),
            buffer_size: default_buffer_size(),
            write_timeout_secs: default_write_timeout_secs(),
            keepalive_secs: default_keepalive_secs(),
            header_read_timeout_secs: default_header_read_timeout_secs(),
            max_header_bytes: default_max_header_bytes(),
            require_origin: true,
            cert_path: None,
            key_path: None,
        }
    }
}

impl ServerConfig {
    /// 验证配置
    pub fn validate(&self) -> anyhow::Result<()> {
        ConfigValidator::validate_server_config(self)
    }

    /// 隧道处理器配置
    pub fn handler_config(&self) -> HandlerConfig {
        HandlerConfig {
            buffer_size: self.buffer_size,
            write_timeout: Duration::from_secs(self.write_timeout_secs),
            keepalive_interval: Duration::from_secs(self.keepalive_secs),
            require_origin: self.require_origin,
        }
    }

    pub fn header_read_timeout(&self) -> Duration {
        Duration::from_secs(self.header_read_timeout_secs)
    }

    /// 是否配置了 TLS 证书
    pub fn tls_enabled(&self) -> bool {
        self.cert_path.is_some() && self.key_path.is_some()
    }
}

/// 客户端配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// 隧道 URL（ws:// 或 wss://）
    #[serde(default = "default_client_target")]
    pub target: String,
    /// 覆盖 HTTP Host 头
    #[serde(default)]
    pub host: Option<String>,
    /// 覆盖 TLS 服务器名称
    #[serde(default)]
    pub server_name: Option<String>,
    /// 是否跳过证书验证（仅用于测试）
    #[serde(default)]
    pub insecure: bool,
    /// CA 证书路径（可选）
    #[serde(default)]
    pub ca_cert_path: Option<PathBuf>,
    /// TCP 连接超时（秒）
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            target: default_client_target(),
            host: None,
            server_name: None,
            insecure: false,
            ca_cert_path: None,
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl ClientConfig {
    /// 验证配置
    pub fn validate(&self) -> anyhow::Result<()> {
        ConfigValidator::validate_client_config(self)
    }

    /// 转换为拨号配置
    pub fn connect_config(&self) -> crate::error::Result<ConnectConfig> {
        let mut config = ConnectConfig::parse_url(&self.target)?
            .with_connect_timeout(Duration::from_secs(self.connect_timeout_secs));
        if let Some(host) = &self.host {
            config = config.with_host(host.clone());
        }
        if self.server_name.is_some() {
            config.server_name = self.server_name.clone();
        }
        config.insecure = self.insecure;
        config.ca_cert_path = self.ca_cert_path.clone();
        Ok(config)
    }
}

/// 应用配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppConfig {
    Server(ServerConfig),
    Client(ClientConfig),
}

impl AppConfig {
    /// 从文件加载配置，根据 `[server]` / `[client]` 表自动检测类型
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        #[derive(Deserialize)]
        struct ConfigFile {
            server: Option<ServerConfig>,
            client: Option<ClientConfig>,
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file: {}", path))?;
        let file: ConfigFile = toml::from_str(&content).context("Failed to parse configuration")?;

        match (file.server, file.client) {
            (Some(server), None) => {
                server
                    .validate()
                    .context("Server configuration validation failed")?;
                Ok(Self::Server(server))
            }
            (None, Some(client)) => {
                client
                    .validate()
                    .context("Client configuration validation failed")?;
                Ok(Self::Client(client))
            }
            (Some(_), Some(_)) => {
                anyhow::bail!("Configuration file must contain either [server] or [client], not both")
            }
            (None, None) => anyhow::bail!("Configuration file has no [server] or [client] section"),
        }
    }

    /// 从文件加载服务器配置
    pub fn load_server_config(path: &str) -> anyhow::Result<ServerConfig> {
        #[derive(Deserialize)]
        struct ServerConfigWrapper {
            server: ServerConfig,
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file: {}", path))?;
        let wrapper: ServerConfigWrapper =
            toml::from_str(&content).context("Failed to parse server configuration")?;
        wrapper
            .server
            .validate()
            .context("Server configuration validation failed")?;
        Ok(wrapper.server)
    }

    /// 从文件加载客户端配置
    pub fn load_client_config(path: &str) -> anyhow::Result<ClientConfig> {
        #[derive(Deserialize)]
        struct ClientConfigWrapper {
            client: ClientConfig,
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file: {}", path))?;
        let wrapper: ClientConfigWrapper =
            toml::from_str(&content).context("Failed to parse client configuration")?;
        wrapper
            .client
            .validate()
            .context("Client configuration validation failed")?;
        Ok(wrapper.client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp(content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("ws-tunnel-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_server_defaults() {
        let config: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(config, ServerConfig::default());

        let handler = config.handler_config();
        assert_eq!(handler.buffer_size, 16 * 1024);
        assert_eq!(handler.write_timeout, Duration::from_secs(15));
        assert_eq!(handler.keepalive_interval, Duration::from_secs(30));
        assert!(handler.require_origin);
        assert_eq!(config.header_read_timeout(), Duration::from_secs(5));
        assert_eq!(config.max_header_bytes, 16 * 1024);
        assert!(!config.tls_enabled());
    }

    #[test]
    fn test_load_server_config() {
        let path = write_temp(
            r#"
[server]
listen = ":8081"
target = "127.0.0.1:22"
path = "/ws"
keepalive_secs = 10
"#,
        );
        let config = AppConfig::load_server_config(path.to_str().unwrap()).unwrap();
        assert_eq!(config.listen.as_deref(), Some(":8081"));
        assert_eq!(config.target.as_deref(), Some("127.0.0.1:22"));
        assert_eq!(config.path, "/ws");
        assert_eq!(config.keepalive_secs, 10);

        assert!(matches!(
            AppConfig::from_file(path.to_str().unwrap()).unwrap(),
            AppConfig::Server(_)
        ));
        // 服务器配置不是客户端配置
        assert!(AppConfig::load_client_config(path.to_str().unwrap()).is_err());
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_load_client_config() {
        let path = write_temp(
            r#"
[client]
target = "wss://tunnel.example.com/ws"
server_name = "cdn.example.com"
"#,
        );
        let config = AppConfig::load_client_config(path.to_str().unwrap()).unwrap();
        assert_eq!(config.connect_timeout_secs, 5);

        let connect = config.connect_config().unwrap();
        assert!(connect.tls);
        assert_eq!(connect.server_name.as_deref(), Some("cdn.example.com"));
        let resolved = connect.resolve().unwrap();
        assert_eq!(resolved.dial_addr(), "tunnel.example.com:443");
        assert_eq!(resolved.host, "cdn.example.com");
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_client_defaults() {
        let config: ClientConfig = toml::from_str("").unwrap();
        assert_eq!(config.target, DEFAULT_CLIENT_TARGET);
        let connect = config.connect_config().unwrap();
        assert!(!connect.tls);
        assert_eq!(connect.resolve().unwrap().dial_addr(), "127.0.0.1:8081");
    }

    #[test]
    fn test_invalid_files() {
        let path = write_temp("[server]\nbuffer_size = 0\n");
        assert!(AppConfig::load_server_config(path.to_str().unwrap()).is_err());
        let _ = std::fs::remove_file(path);

        let path = write_temp("[other]\nkey = 1\n");
        assert!(AppConfig::from_file(path.to_str().unwrap()).is_err());
        let _ = std::fs::remove_file(path);

        assert!(AppConfig::load_server_config("/nonexistent/ws-tunnel.toml").is_err());
    }
}
