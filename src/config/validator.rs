use anyhow::{bail, Result};
use tracing::warn;

use super::{ClientConfig, ServerConfig};
use crate::client::{parse_addr_and_port, ConnectConfig};

/// 缓冲区大小上限（16MB）
const MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// 请求头大小下限，过小会导致正常的握手请求也被拒绝
const MIN_HEADER_BYTES: usize = 1024;

/// 配置验证器 - 负责所有配置验证逻辑
pub struct ConfigValidator;

impl ConfigValidator {
    /// 验证地址不为空
    pub fn validate_address(addr: &str, context: &str) -> Result<()> {
        if addr.trim().is_empty() {
            bail!("{}: address cannot be empty", context);
        }
        Ok(())
    }

    /// 验证 TCP 目标地址（必须带端口）
    pub fn validate_target(target: &str, context: &str) -> Result<()> {
        Self::validate_address(target, context)?;
        if !target.ends_with(']') && target.rsplit_once(':').is_none() {
            bail!("{}: '{}' must include a port", context, target);
        }
        if let Err(e) = parse_addr_and_port(target, false) {
            bail!("{}: {}", context, e);
        }
        Ok(())
    }

    /// 验证超时时间
    pub fn validate_timeout(secs: u64, context: &str) -> Result<()> {
        if secs == 0 {
            bail!("{}: timeout must be greater than 0", context);
        }
        Ok(())
    }

    /// 验证服务器配置
    pub fn validate_server_config(config: &ServerConfig) -> Result<()> {
        if let Some(listen) = &config.listen {
            Self::validate_address(listen, "Server listen")?;
        }
        if let Some(target) = &config.target {
            Self::validate_target(target, "Server target")?;
        }

        if config.path.trim().is_empty() {
            bail!("Server path cannot be empty");
        }

        if config.buffer_size == 0 || config.buffer_size > MAX_BUFFER_SIZE {
            bail!(
                "Server buffer_size must be between 1 and {} (current: {})",
                MAX_BUFFER_SIZE,
                config.buffer_size
            );
        }

        Self::validate_timeout(config.write_timeout_secs, "Server write_timeout_secs")?;
        Self::validate_timeout(
            config.header_read_timeout_secs,
            "Server header_read_timeout_secs",
        )?;

        if config.max_header_bytes < MIN_HEADER_BYTES {
            bail!(
                "Server max_header_bytes must be at least {} (current: {})",
                MIN_HEADER_BYTES,
                config.max_header_bytes
            );
        }

        if config.keepalive_secs == 0 {
            warn!("Server keepalive is disabled; idle tunnels may be dropped by intermediaries");
        }

        // 证书和私钥必须同时设置
        match (&config.cert_path, &config.key_path) {
            (Some(_), Some(_)) | (None, None) => {}
            _ => bail!("Server cert_path and key_path must both be set, or both omitted"),
        }

        Ok(())
    }

    /// 验证客户端配置
    pub fn validate_client_config(config: &ClientConfig) -> Result<()> {
        if let Err(e) = ConnectConfig::parse_url(&config.target) {
            bail!("Client target: {}", e);
        }
        Self::validate_timeout(config.connect_timeout_secs, "Client connect_timeout_secs")?;

        if let Some(host) = &config.host {
            Self::validate_address(host, "Client host")?;
        }
        if let Some(name) = &config.server_name {
            Self::validate_address(name, "Client server_name")?;
        }

        if config.insecure && config.ca_cert_path.is_some() {
            warn!("Client ca_cert_path is ignored when insecure is enabled");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_validate_target() {
        assert!(ConfigValidator::validate_target("127.0.0.1:22", "t").is_ok());
        assert!(ConfigValidator::validate_target("example.com:8080", "t").is_ok());
        assert!(ConfigValidator::validate_target("[::1]:22", "t").is_ok());
        assert!(ConfigValidator::validate_target("example.com", "t").is_err());
        assert!(ConfigValidator::validate_target("", "t").is_err());
        assert!(ConfigValidator::validate_target("host:notaport", "t").is_err());
    }

    #[test]
    fn test_server_config_validation() {
        let mut config = ServerConfig {
            listen: Some(":8081".to_string()),
            target: Some("127.0.0.1:22".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        config.cert_path = Some(PathBuf::from("/tmp/cert.pem"));
        assert!(config.validate().is_err());
        config.key_path = Some(PathBuf::from("/tmp/key.pem"));
        assert!(config.validate().is_ok());

        config.write_timeout_secs = 0;
        assert!(config.validate().is_err());
        config.write_timeout_secs = 15;

        config.max_header_bytes = 100;
        assert!(config.validate().is_err());
        config.max_header_bytes = 16 * 1024;

        config.listen = Some("  ".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_client_config_validation() {
        let mut config = ClientConfig::default();
        assert!(config.validate().is_ok());

        config.target = "ftp://example.com/".to_string();
        assert!(config.validate().is_err());

        config.target = "wss://example.com/ws".to_string();
        config.connect_timeout_secs = 0;
        assert!(config.validate().is_err());
    }
}
