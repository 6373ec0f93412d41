use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "ws-tunnel")]
#[command(author, version, about = "Tunnel TCP over WebSocket", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// 日志级别 (trace, debug, info, warn, error)，RUST_LOG 优先
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 运行服务器模式：接受 WebSocket 连接并转发到目标 TCP 地址
    Server {
        /// 配置文件路径（可选，命令行参数优先）
        #[arg(short, long)]
        config: Option<String>,

        /// 监听地址，如 ":8081"
        #[arg(long, env = "LISTEN")]
        listen: Option<String>,

        /// 目标 TCP 地址，如 "127.0.0.1:22"
        #[arg(long, env = "TARGET")]
        target: Option<String>,

        /// WebSocket 升级路径
        #[arg(long)]
        path: Option<String>,

        /// TLS 证书路径（启用 wss）
        #[arg(long, value_name = "PATH", requires = "key")]
        cert: Option<String>,

        /// TLS 私钥路径
        #[arg(long, value_name = "PATH", requires = "cert")]
        key: Option<String>,
    },
    /// 运行客户端模式：在标准输入/输出和隧道之间转发
    Client {
        /// 配置文件路径（可选，命令行参数优先）
        #[arg(short, long)]
        config: Option<String>,

        /// 隧道 URL（默认 ws://127.0.0.1:8081/ws）
        #[arg(short, long)]
        target: Option<String>,

        /// 覆盖 HTTP Host 头
        #[arg(long)]
        host: Option<String>,

        /// 覆盖 TLS 服务器名称
        #[arg(long)]
        server_name: Option<String>,

        /// 跳过证书验证（仅用于测试）
        #[arg(long)]
        insecure: bool,

        /// CA 证书路径
        #[arg(long, value_name = "PATH")]
        ca_cert: Option<String>,
    },
    /// 生成自签名证书
    Cert {
        /// 证书输出路径
        #[arg(long, value_name = "PATH", default_value = "cert.pem")]
        cert_out: String,

        /// 私钥输出路径
        #[arg(long, value_name = "PATH", default_value = "key.pem")]
        key_out: String,

        /// 证书的 Common Name
        #[arg(long, default_value = "localhost")]
        common_name: String,

        /// 证书的 SubjectAltName（用逗号分隔多个）
        #[arg(long, value_delimiter = ',', value_name = "DNS,...")]
        alt_names: Vec<String>,
    },
    /// 检查配置文件格式是否正确
    Check {
        /// 配置文件路径
        #[arg(short, long)]
        config: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_client() {
        let cli = Cli::parse_from([
            "ws-tunnel",
            "-l",
            "debug",
            "client",
            "-t",
            "wss://example.com/ws",
            "--insecure",
        ]);
        assert_eq!(cli.log_level, "debug");
        match cli.command {
            Commands::Client {
                target, insecure, ..
            } => {
                assert_eq!(target.as_deref(), Some("wss://example.com/ws"));
                assert!(insecure);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cert_requires_key() {
        assert!(Cli::try_parse_from(["ws-tunnel", "server", "--cert", "c.pem"]).is_err());
        assert!(
            Cli::try_parse_from(["ws-tunnel", "server", "--cert", "c.pem", "--key", "k.pem"])
                .is_ok()
        );
    }
}
