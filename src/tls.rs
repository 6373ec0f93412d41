use anyhow::{Context, Result};
use rcgen::generate_simple_self_signed;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::rustls;

use crate::error::TunnelError;

/// 读取 PEM 格式的证书链
fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open cert file: {:?}", path))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to parse certificates in {:?}", path))?;
    if certs.is_empty() {
        anyhow::bail!("No certificate found in {:?}", path);
    }
    Ok(certs)
}

/// 读取 PEM 格式的私钥（PKCS#1 / PKCS#8 / SEC1）
fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path).with_context(|| format!("Failed to open key file: {:?}", path))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .with_context(|| format!("Failed to parse private key in {:?}", path))?
        .with_context(|| format!("No private key found in {:?}", path))
}

/// 加载服务端 TLS 配置，用于直接提供 wss:// 服务
pub fn server_config(cert_path: &Path, key_path: &Path) -> Result<Arc<rustls::ServerConfig>> {
    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;

    let mut config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("Failed to create server config")?;
    // WebSocket 握手只走 HTTP/1.1
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(Arc::new(config))
}

/// 加载客户端 TLS 配置
///
/// 指定 `ca_cert_path` 时只信任该文件中的 CA，否则使用系统根证书。
/// `insecure` 为 true 时完全跳过服务端证书验证。
pub fn client_config(
    ca_cert_path: Option<&Path>,
    insecure: bool,
) -> Result<Arc<rustls::ClientConfig>> {
    let mut root_store = rustls::RootCertStore::empty();

    if let Some(ca_path) = ca_cert_path {
        for cert in load_certs(ca_path)? {
            root_store
                .add(cert)
                .context("Failed to add CA certificate")?;
        }
    } else if !insecure {
        let native = rustls_native_certs::load_native_certs();
        for err in &native.errors {
            tracing::debug!("Skipping native certificate: {}", err);
        }
        let (added, ignored) = root_store.add_parsable_certificates(native.certs);
        tracing::trace!("Loaded {} native roots ({} ignored)", added, ignored);
    }

    let mut config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    if insecure {
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(AcceptAnyServerCert));
    }

    Ok(Arc::new(config))
}

/// 将主机名或 IP 转换为 TLS 的 SNI 名称
pub fn server_name(name: &str) -> crate::error::Result<ServerName<'static>> {
    // 允许带方括号的 IPv6 字面量
    let trimmed = name.trim_start_matches('[').trim_end_matches(']');
    ServerName::try_from(trimmed.to_string())
        .map_err(|e| TunnelError::invalid_address(name, format!("invalid TLS server name: {}", e)))
}

/// 生成自签名证书和私钥并写入指定路径
///
/// `common_name` 总是会出现在 SAN 列表中
pub fn generate_self_signed_cert(
    common_name: &str,
    alt_names: &[String],
    cert_out: &Path,
    key_out: &Path,
) -> Result<()> {
    let mut names = alt_names.to_vec();
    if !names.iter().any(|n| n == common_name) {
        names.insert(0, common_name.to_string());
    }

    let certified =
        generate_simple_self_signed(names).context("Failed to generate self-signed certificate")?;

    std::fs::write(cert_out, certified.cert.pem())
        .with_context(|| format!("Failed to write certificate to {:?}", cert_out))?;
    std::fs::write(key_out, certified.signing_key.serialize_pem())
        .with_context(|| format!("Failed to write private key to {:?}", key_out))?;

    Ok(())
}

/// 接受任意服务端证书的验证器，仅在 `--insecure` 时使用
#[derive(Debug)]
struct AcceptAnyServerCert;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer,
        _intermediates: &[CertificateDer],
        _server_name: &ServerName,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        use rustls::SignatureScheme::*;
        vec![
            ECDSA_NISTP256_SHA256,
            ECDSA_NISTP384_SHA384,
            ED25519,
            RSA_PSS_SHA256,
            RSA_PSS_SHA384,
            RSA_PSS_SHA512,
            RSA_PKCS1_SHA256,
            RSA_PKCS1_SHA384,
            RSA_PKCS1_SHA512,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_paths(tag: &str) -> (std::path::PathBuf, std::path::PathBuf) {
        let dir = std::env::temp_dir();
        let id = uuid::Uuid::new_v4();
        (
            dir.join(format!("ws-tunnel-{}-{}-cert.pem", tag, id)),
            dir.join(format!("ws-tunnel-{}-{}-key.pem", tag, id)),
        )
    }

    #[test]
    fn test_generated_cert_loads_as_server_config() {
        let (cert, key) = temp_paths("server");
        generate_self_signed_cert("localhost", &["127.0.0.1".to_string()], &cert, &key).unwrap();

        let config = server_config(&cert, &key).unwrap();
        assert_eq!(config.alpn_protocols, vec![b"http/1.1".to_vec()]);

        // 生成的证书也可作为客户端信任的 CA
        assert!(client_config(Some(&cert), false).is_ok());

        let _ = std::fs::remove_file(&cert);
        let _ = std::fs::remove_file(&key);
    }

    #[test]
    fn test_missing_files_are_errors() {
        let missing = Path::new("/nonexistent/ws-tunnel/cert.pem");
        assert!(server_config(missing, missing).is_err());
        assert!(client_config(Some(missing), false).is_err());
    }

    #[test]
    fn test_insecure_client_config() {
        assert!(client_config(None, true).is_ok());
    }

    #[test]
    fn test_server_name() {
        assert!(server_name("example.com").is_ok());
        assert!(server_name("127.0.0.1").is_ok());
        assert!(server_name("[::1]").is_ok());
        assert!(server_name("bad name!").is_err());
    }
}
