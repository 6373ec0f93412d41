/// WS Tunnel 库入口
///
/// 将核心模块导出为库，方便测试和复用
pub mod buffer_pool;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod io_util;
pub mod limited_reader;
pub mod server;
pub mod tls;
pub mod transport;

// 重新导出常用类型
pub use buffer_pool::{BufferPool, PooledBuffer, DEFAULT_BUFFER_SIZE};
pub use client::{connect, relay, relay_stdio, ConnectConfig, ConnectOption, Dialer, WsConnection};
pub use config::{AppConfig, ClientConfig, ServerConfig};
pub use error::{Result, TunnelError};
pub use io_util::{copy_buffer_with_write_timeout, CopyError, CopyOutcome, DEFAULT_WRITE_TIMEOUT};
pub use limited_reader::{LimitedStream, DEFAULT_MAX_HEADER_SIZE};
pub use server::{Handler, HandlerConfig, Server, Signal};
