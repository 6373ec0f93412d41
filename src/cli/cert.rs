use anyhow::Result;
use std::path::Path;

use crate::tls;

/// 生成自签名证书，供 `server --cert/--key` 使用
pub fn generate_certificate(
    cert_out: &str,
    key_out: &str,
    common_name: &str,
    alt_names: &[String],
) -> Result<()> {
    tls::generate_self_signed_cert(common_name, alt_names, Path::new(cert_out), Path::new(key_out))?;

    println!("Generated self-signed certificate: {}", cert_out);
    println!("Generated private key: {}", key_out);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_certificate() {
        let dir = std::env::temp_dir();
        let id = uuid::Uuid::new_v4();
        let cert = dir.join(format!("ws-tunnel-cli-{}-cert.pem", id));
        let key = dir.join(format!("ws-tunnel-cli-{}-key.pem", id));

        generate_certificate(
            cert.to_str().unwrap(),
            key.to_str().unwrap(),
            "localhost",
            &["127.0.0.1".to_string()],
        )
        .unwrap();

        let pem = std::fs::read_to_string(&cert).unwrap();
        assert!(pem.contains("BEGIN CERTIFICATE"));
        assert!(tls::server_config(&cert, &key).is_ok());

        let _ = std::fs::remove_file(cert);
        let _ = std::fs::remove_file(key);
    }
}
