//! kq-tunnel 客户端进程。
//!
//! 托管通道适配器连入的本地管道，并把每个会话与一条 TCP 连接对接：
//! `listen` 在 `127.0.0.1:<port>` 上接受本地程序的连接，
//! `connect` 主动拨向 `host:port`。每个会话结束后回到等待适配器的状态。

use std::net::{Ipv4Addr, SocketAddr};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kq_tunnel_core::{Cancellation, protocol, telemetry};
use kq_tunnel_relay::{
    PipeHost, PipeStream, RelayOptions, TcpAcceptor, TcpSocketConfig, dial, duplex_relay,
};
use tokio::net::TcpStream;
use tracing::{error, info, warn};

/// kq-tunnel client: bridges a local TCP endpoint to the channel adapter's pipe
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    mode: Option<Mode>,

    /// Pipe name (Unix: socket path) the channel adapter connects to
    #[arg(long, global = true, default_value_t = protocol::default_pipe_path())]
    pipe: String,

    /// Log level used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// SO_LINGER timeout in seconds for relayed TCP connections
    #[arg(long, global = true, value_name = "SECS")]
    linger: Option<u64>,
}

#[derive(Subcommand, Clone, Debug, PartialEq, Eq)]
enum Mode {
    /// Accept one local TCP connection per session on 127.0.0.1
    Listen {
        #[arg(default_value_t = protocol::DEFAULT_LOCAL_PORT)]
        port: u16,
    },
    /// Dial host:port for each session
    Connect {
        #[arg(default_value = "localhost")]
        host: String,
        #[arg(default_value_t = protocol::DEFAULT_LOCAL_PORT)]
        port: u16,
    },
}

impl Args {
    fn socket_config(&self) -> TcpSocketConfig {
        TcpSocketConfig::default().with_linger(self.linger.map(Duration::from_secs))
    }

    fn mode(&self) -> Mode {
        self.mode.clone().unwrap_or(Mode::Listen {
            port: protocol::DEFAULT_LOCAL_PORT,
        })
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(err) = telemetry::install(&args.log_level) {
        eprintln!("{err}");
    }

    info!(version = env!("CARGO_PKG_VERSION"), pipe = %args.pipe, "kq-tunnel-client starting");
    tokio::select! {
        result = run(&args) => match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                error!(error = %format!("{err:#}"), "kq-tunnel-client stopped");
                ExitCode::FAILURE
            }
        },
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, shutting down");
            ExitCode::SUCCESS
        }
    }
}

async fn run(args: &Args) -> Result<()> {
    let mut host = PipeHost::bind(args.pipe.clone()).context("failed to create pipe")?;

    match args.mode() {
        Mode::Listen { port } => {
            let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
            let acceptor = TcpAcceptor::bind(addr, args.socket_config())
                .await
                .with_context(|| format!("failed to listen on {addr}"))?;
            info!(mode = "listen", addr = %acceptor.local_addr(), "ready");
            loop {
                let pipe = host.accept().await.context("pipe accept failed")?;
                info!(port, "waiting for tcp connection");
                let tcp = match acceptor.accept().await {
                    Ok((tcp, _)) => tcp,
                    Err(err) => {
                        warn!(code = err.code(), error = %err, "tcp accept failed");
                        continue;
                    }
                };
                relay_session(pipe, tcp).await;
            }
        }
        Mode::Connect { host: target, port } => {
            info!(mode = "connect", target = %target, port, "ready");
            let config = args.socket_config();
            loop {
                let pipe = host.accept().await.context("pipe accept failed")?;
                let tcp = match dial(&target, port, &config).await {
                    Ok(tcp) => tcp,
                    Err(err) => {
                        error!(code = err.code(), error = %err, target = %target, port, "tcp connect failed");
                        continue;
                    }
                };
                relay_session(pipe, tcp).await;
            }
        }
    }
}

async fn relay_session(pipe: PipeStream, tcp: TcpStream) {
    let liveness = Cancellation::new();
    let report = duplex_relay(pipe, tcp, RelayOptions::default(), &liveness).await;
    info!(
        to_tcp = report.left_to_right.bytes,
        to_pipe = report.right_to_left.bytes,
        "session ended, ready for next connection"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_listen_on_local_port() {
        let args = Args::try_parse_from(["kq-tunnel-client"]).expect("无参数必须可解析");
        assert_eq!(args.mode(), Mode::Listen { port: 2222 });
        assert_eq!(args.log_level, "info");
        assert_eq!(args.pipe, protocol::default_pipe_path());
    }

    #[test]
    fn connect_takes_positional_host_and_port() {
        let args = Args::try_parse_from(["kq-tunnel-client", "connect", "10.0.0.5", "2200"])
            .expect("parse");
        assert_eq!(
            args.mode(),
            Mode::Connect {
                host: "10.0.0.5".into(),
                port: 2200
            }
        );
        let args = Args::try_parse_from(["kq-tunnel-client", "connect"]).expect("parse");
        assert_eq!(
            args.mode(),
            Mode::Connect {
                host: "localhost".into(),
                port: 2222
            }
        );
    }

    #[test]
    fn rejects_out_of_range_port() {
        assert!(Args::try_parse_from(["kq-tunnel-client", "listen", "70000"]).is_err());
    }

    #[test]
    fn linger_flag_reaches_socket_config() {
        let args = Args::try_parse_from(["kq-tunnel-client", "--linger", "5"]).expect("parse");
        assert_eq!(
            args.socket_config(),
            TcpSocketConfig::default().with_linger(Some(Duration::from_secs(5)))
        );
        let args = Args::try_parse_from(["kq-tunnel-client"]).expect("parse");
        assert_eq!(args.socket_config(), TcpSocketConfig::default());
    }
}
