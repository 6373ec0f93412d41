use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::{AppConfig, ClientConfig, ServerConfig};

/// Expand path with tilde (~) and make it absolute
pub fn expand_path(path: &str) -> Result<String> {
    let expanded = shellexpand::tilde(path);
    let path_buf = PathBuf::from(expanded.as_ref());

    if path_buf.is_absolute() {
        Ok(expanded.into_owned())
    } else {
        std::env::current_dir()
            .context("Failed to get current directory")?
            .join(&path_buf)
            .to_str()
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("Invalid path: {}", path))
    }
}

/// Check configuration file format and print a summary
pub fn check_config(config_path: &str) -> Result<()> {
    if !Path::new(config_path).exists() {
        println!("✗ Configuration file not found: {}", config_path);
        anyhow::bail!("Configuration file not found: {}", config_path);
    }

    println!("Checking configuration file: {}\n", config_path);

    match AppConfig::from_file(config_path) {
        Ok(AppConfig::Server(config)) => print_server_summary(&config),
        Ok(AppConfig::Client(config)) => print_client_summary(&config),
        Err(e) => {
            println!("✗ Configuration validation failed!");
            println!("\nError details:");
            println!("{:#}", e);

            println!("\nCommon issues:");
            println!("  1. Check TOML syntax (brackets, quotes, commas)");
            println!("  2. Use exactly one [server] or [client] section");
            println!("  3. Server target must include a port, e.g. \"127.0.0.1:22\"");
            println!("  4. Client target must be a ws:// or wss:// URL");
            println!("  5. Set both cert_path and key_path, or neither");
            return Err(e);
        }
    }

    Ok(())
}

fn print_server_summary(config: &ServerConfig) {
    println!("✓ Configuration type: Server");
    match &config.listen {
        Some(listen) => println!("✓ Listen address: {}", listen),
        None => println!("⚠ Warning: listen is not set (use --listen or LISTEN)"),
    }
    match &config.target {
        Some(target) => println!("✓ Target address: {}", target),
        None => println!("⚠ Warning: target is not set (use --target or TARGET)"),
    }
    println!("✓ Path: {}", config.path);
    println!("✓ Buffer size: {} bytes", config.buffer_size);
    println!("✓ Write timeout: {}s", config.write_timeout_secs);
    println!("✓ Keepalive interval: {}s", config.keepalive_secs);
    println!("✓ Require Origin: {}", config.require_origin);

    if let (Some(cert), Some(key)) = (&config.cert_path, &config.key_path) {
        println!("✓ Certificate path: {:?}", cert);
        println!("✓ Key path: {:?}", key);
        if !cert.exists() {
            println!("⚠ Warning: Certificate file not found: {:?}", cert);
        }
        if !key.exists() {
            println!("⚠ Warning: Key file not found: {:?}", key);
        }
    } else {
        println!("✓ TLS: disabled (plain ws://)");
    }

    println!("\n✓ Server configuration is valid!");
}

fn print_client_summary(config: &ClientConfig) {
    println!("✓ Configuration type: Client");
    println!("✓ Target: {}", config.target);
    if let Some(host) = &config.host {
        println!("✓ Host: {}", host);
    }
    if let Some(name) = &config.server_name {
        println!("✓ Server name: {}", name);
    }
    println!("✓ Insecure: {}", config.insecure);
    println!("✓ Connect timeout: {}s", config.connect_timeout_secs);

    if let Some(ca_path) = &config.ca_cert_path {
        println!("✓ CA certificate path: {:?}", ca_path);
        if !ca_path.exists() {
            println!("⚠ Warning: CA certificate file not found: {:?}", ca_path);
        }
    }

    println!("\n✓ Client configuration is valid!");
}
