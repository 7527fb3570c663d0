use std::net::SocketAddr;
use std::time::Duration;

use kq_tunnel_core::{TunnelError, error};
use socket2::SockRef;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

/// 转发连接的套接字选项。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 隧道承载的多为交互式协议（如 SSH），小包延迟比吞吐更敏感，默认关闭 Nagle；
/// - `linger` 为 `None` 时沿用内核默认的关闭行为。
///
/// ## 契约 (What)
/// - `apply` 只在建连或接受之后调用一次，失败即视为该连接的建立失败。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TcpSocketConfig {
    nodelay: bool,
    linger: Option<Duration>,
}

impl Default for TcpSocketConfig {
    fn default() -> Self {
        Self {
            nodelay: true,
            linger: None,
        }
    }
}

impl TcpSocketConfig {
    pub fn with_linger(mut self, linger: Option<Duration>) -> Self {
        self.linger = linger;
        self
    }

    fn apply(&self, stream: &TcpStream) -> std::io::Result<()> {
        stream.set_nodelay(self.nodelay)?;
        if self.linger.is_some() {
            SockRef::from(stream).set_linger(self.linger)?;
        }
        Ok(())
    }
}

/// 单连接 TCP 接入端：绑定一次，按会话逐个接受。
#[derive(Debug)]
pub struct TcpAcceptor {
    inner: TcpListener,
    local_addr: SocketAddr,
    config: TcpSocketConfig,
}

impl TcpAcceptor {
    /// 绑定监听地址；`config` 应用于之后接受的每个连接。
    pub async fn bind(addr: SocketAddr, config: TcpSocketConfig) -> Result<Self, TunnelError> {
        let inner = TcpListener::bind(addr)
            .await
            .map_err(|err| TunnelError::setup(error::TCP_BIND, err))?;
        let local_addr = inner
            .local_addr()
            .map_err(|err| TunnelError::setup(error::TCP_BIND, err))?;
        debug!(%local_addr, "tcp acceptor bound");
        Ok(Self {
            inner,
            local_addr,
            config,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 等待下一个入站连接。
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), TunnelError> {
        let (stream, peer) = self
            .inner
            .accept()
            .await
            .map_err(|err| TunnelError::io(error::TCP_ACCEPT, err))?;
        self.config
            .apply(&stream)
            .map_err(|err| TunnelError::io(error::TCP_ACCEPT, err))?;
        info!(%peer, "tcp connection accepted");
        Ok((stream, peer))
    }
}

/// 解析 `host:port` 并依次尝试每个地址，返回第一个连通的连接。
pub async fn dial(host: &str, port: u16, config: &TcpSocketConfig) -> Result<TcpStream, TunnelError> {
    let stream = TcpStream::connect((host, port))
        .await
        .map_err(|err| TunnelError::setup(error::TCP_CONNECT, err))?;
    config
        .apply(&stream)
        .map_err(|err| TunnelError::setup(error::TCP_CONNECT, err))?;
    info!(host, port, "tcp connection established");
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kq_tunnel_core::ErrorCategory;

    #[tokio::test]
    async fn accepted_and_dialed_streams_carry_config() {
        let config = TcpSocketConfig::default().with_linger(Some(Duration::from_secs(1)));
        let acceptor = TcpAcceptor::bind("127.0.0.1:0".parse().expect("addr"), config.clone())
            .await
            .expect("回环地址必须可绑定");
        let port = acceptor.local_addr().port();
        let (dialed, accepted) = tokio::join!(dial("127.0.0.1", port, &config), acceptor.accept());
        let dialed = dialed.expect("拨号必须成功");
        let (accepted, _) = accepted.expect("接受必须成功");
        assert!(dialed.nodelay().expect("nodelay"));
        assert!(accepted.nodelay().expect("nodelay"));
        assert_eq!(
            SockRef::from(&dialed).linger().expect("linger"),
            Some(Duration::from_secs(1))
        );
    }

    #[tokio::test]
    async fn bind_conflict_is_fatal_setup() {
        let first = TcpAcceptor::bind("127.0.0.1:0".parse().expect("addr"), TcpSocketConfig::default())
            .await
            .expect("bind");
        let err = TcpAcceptor::bind(first.local_addr(), TcpSocketConfig::default())
            .await
            .expect_err("重复绑定必须失败");
        assert_eq!(err.code(), "kq.tunnel.tcp.bind_failed");
        assert_eq!(err.category(), ErrorCategory::FatalSetup);
    }
}
