use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinError;
use tokio_rustls::TlsAcceptor;
use tracing::{info, warn};

use crate::client::{self, Dialer};
use crate::config::{AppConfig, ClientConfig, ServerConfig};
use crate::error::TunnelError;
use crate::server::{Handler, Server};
use crate::tls;

use super::cert;
use super::config::{check_config, expand_path};
use super::{Cli, Commands};

/// Execute CLI commands
pub async fn execute_command(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Check { config } => {
            let config_path = expand_path(config)?;
            check_config(&config_path)?;
        }
        Commands::Cert {
            cert_out,
            key_out,
            common_name,
            alt_names,
        } => {
            cert::generate_certificate(cert_out, key_out, common_name, alt_names)?;
        }
        Commands::Server {
            config,
            listen,
            target,
            path,
            cert,
            key,
        } => {
            let mut server_config = match config {
                Some(path) => load_server_file(path)?,
                None => ServerConfig::default(),
            };
            if listen.is_some() {
                server_config.listen = listen.clone();
            }
            if target.is_some() {
                server_config.target = target.clone();
            }
            if let Some(path) = path {
                server_config.path = path.clone();
            }
            if let (Some(cert), Some(key)) = (cert, key) {
                server_config.cert_path = Some(PathBuf::from(expand_path(cert)?));
                server_config.key_path = Some(PathBuf::from(expand_path(key)?));
            }
            server_config.validate()?;
            run_server(server_config).await?;
        }
        Commands::Client {
            config,
            target,
            host,
            server_name,
            insecure,
            ca_cert,
        } => {
            let mut client_config = match config {
                Some(path) => load_client_file(path)?,
                None => ClientConfig::default(),
            };
            if let Some(target) = target {
                client_config.target = target.clone();
            }
            if host.is_some() {
                client_config.host = host.clone();
            }
            if server_name.is_some() {
                client_config.server_name = server_name.clone();
            }
            if *insecure {
                client_config.insecure = true;
            }
            if let Some(ca_cert) = ca_cert {
                client_config.ca_cert_path = Some(PathBuf::from(expand_path(ca_cert)?));
            }
            client_config.validate()?;
            run_client(client_config).await?;
        }
    }

    Ok(())
}

fn load_server_file(path: &str) -> Result<ServerConfig> {
    let config_path = expand_path(path)?;
    info!("Loading server configuration from: {}", config_path);
    AppConfig::load_server_config(&config_path)
}

fn load_client_file(path: &str) -> Result<ClientConfig> {
    let config_path = expand_path(path)?;
    info!("Loading client configuration from: {}", config_path);
    AppConfig::load_client_config(&config_path)
}

/// Run tunnel server until Ctrl+C
async fn run_server(config: ServerConfig) -> Result<()> {
    let (listen, target) = match (&config.listen, &config.target) {
        (Some(listen), Some(target)) => (listen.clone(), target.clone()),
        _ => anyhow::bail!("LISTEN or TARGET is not set"),
    };

    let handler = Arc::new(Handler::with_config(target.clone(), config.handler_config()));
    let mut server = Server::new(listen, config.path.clone(), handler)
        .with_header_read_timeout(config.header_read_timeout())
        .with_max_header_bytes(config.max_header_bytes);

    if let (Some(cert), Some(key)) = (&config.cert_path, &config.key_path) {
        let tls_config = tls::server_config(cert, key)?;
        server = server.with_tls(TlsAcceptor::from(tls_config));
    }

    let server = Arc::new(server);
    info!("Forwarding tunnel traffic to {}", target);

    let mut serve_task = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.serve().await })
    };

    tokio::select! {
        result = &mut serve_task => return serve_result(result),
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
    }

    if let Err(e) = server.close().await {
        warn!("Graceful shutdown incomplete: {}", e);
    }
    serve_result(serve_task.await)
}

fn serve_result(result: std::result::Result<crate::error::Result<()>, JoinError>) -> Result<()> {
    match result {
        Ok(Ok(())) | Ok(Err(TunnelError::ServerClosed)) => {
            info!("Server stopped");
            Ok(())
        }
        Ok(Err(e)) => Err(e).context("Server failed"),
        Err(e) => Err(anyhow::anyhow!("Server task failed: {}", e)),
    }
}

/// Run tunnel client, relaying stdin/stdout
async fn run_client(config: ClientConfig) -> Result<()> {
    let connect_config = config.connect_config()?;
    info!("Connecting to {}", config.target);

    let conn = Dialer::new(connect_config)
        .dial()
        .await
        .with_context(|| format!("Failed to connect to {}", config.target))?;

    client::relay_stdio(conn).await.context("Relay failed")?;
    Ok(())
}
