//! kq-tunnel 服务端进程。
//!
//! 在远程会话内打开动态虚拟通道，把它与一条 TCP 连接对接：
//! `connect`（默认）拨向目标服务，`listen` 在 `0.0.0.0:<port>` 上接受一条连接。
//! 通道一侧的每次读取带有 8 字节 PDU 头，转发前剥离。会话结束后进程退出。

use std::net::{Ipv4Addr, SocketAddr};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kq_tunnel_core::{Cancellation, ReadFraming, protocol, telemetry};
use kq_tunnel_relay::{RelayOptions, TcpAcceptor, TcpSocketConfig, dial, duplex_relay, vchannel};
use tracing::{error, info};

/// kq-tunnel server: bridges the dynamic virtual channel to a TCP endpoint
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    mode: Option<Mode>,

    /// Dynamic virtual channel name
    #[arg(long, global = true, default_value = protocol::CHANNEL_NAME)]
    channel: String,

    /// Log level used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// SO_LINGER timeout in seconds for relayed TCP connections
    #[arg(long, global = true, value_name = "SECS")]
    linger: Option<u64>,
}

#[derive(Subcommand, Clone, Debug, PartialEq, Eq)]
enum Mode {
    /// Dial the target service
    Connect {
        #[arg(default_value = protocol::DEFAULT_TARGET_HOST)]
        host: String,
        #[arg(default_value_t = protocol::DEFAULT_TARGET_PORT)]
        port: u16,
    },
    /// Accept one TCP connection on 0.0.0.0
    Listen {
        #[arg(default_value_t = protocol::DEFAULT_TARGET_PORT)]
        port: u16,
    },
}

impl Args {
    fn socket_config(&self) -> TcpSocketConfig {
        TcpSocketConfig::default().with_linger(self.linger.map(Duration::from_secs))
    }

    fn mode(&self) -> Mode {
        self.mode.clone().unwrap_or(Mode::Connect {
            host: protocol::DEFAULT_TARGET_HOST.to_owned(),
            port: protocol::DEFAULT_TARGET_PORT,
        })
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(err) = telemetry::install(&args.log_level) {
        eprintln!("{err}");
    }

    info!(version = env!("CARGO_PKG_VERSION"), channel = %args.channel, "kq-tunnel-server starting");
    tokio::select! {
        result = run(&args) => match result {
            Ok(()) => {
                info!("shutting down");
                ExitCode::SUCCESS
            }
            Err(err) => {
                error!(error = %format!("{err:#}"), "kq-tunnel-server stopped");
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
    let mut channel = vchannel::open(&args.channel)
        .with_context(|| format!("failed to open virtual channel `{}`", args.channel))?;

    let tcp = match args.mode() {
        Mode::Connect { host, port } => {
            info!(mode = "connect", target = %host, port, "connecting");
            dial(&host, port, &args.socket_config())
                .await
                .with_context(|| format!("tcp connect to {host}:{port} failed"))?
        }
        Mode::Listen { port } => {
            let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
            let acceptor = TcpAcceptor::bind(addr, args.socket_config())
                .await
                .with_context(|| format!("failed to listen on {addr}"))?;
            info!(mode = "listen", port, "waiting for tcp connection");
            let (tcp, _) = acceptor.accept().await.context("tcp accept failed")?;
            tcp
        }
    };

    let options = RelayOptions {
        left_framing: ReadFraming::StripHeader(protocol::CHANNEL_PDU_HEADER_LEN),
        ..RelayOptions::default()
    };
    let liveness = Cancellation::new();
    let report = duplex_relay(channel.stream(), tcp, options, &liveness).await;
    info!(
        to_tcp = report.left_to_right.bytes,
        to_channel = report.right_to_left.bytes,
        "session ended"
    );
    Ok(())
}
