//! 双工字节流边界：按名称连接的端点。

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use kq_tunnel_core::error::is_transient_connect_error;
use tokio::io::{AsyncRead, AsyncWrite};

/// 可按名称打开的双工字节流端点。
///
/// # 契约 (What)
/// - `open`：尝试一次连接；成功时返回的流已处于字节模式、支持异步读写；
/// - `is_transient`：判定一次失败是否属于“端点尚不存在/暂时繁忙”，
///   只有这一类会被 [`StreamConnector`](crate::StreamConnector) 重试；
/// - `zero_read_ends_stream`：该端点的零字节读取是否意味着对端已关闭。
///   默认 `false`：零字节读取只表示没有负载，反应器会继续读取。
#[async_trait]
pub trait StreamEndpoint: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// 用于日志的端点名称。
    fn name(&self) -> &str;

    async fn open(&self) -> io::Result<Self::Stream>;

    fn is_transient(&self, error: &io::Error) -> bool {
        is_transient_connect_error(error)
    }

    fn zero_read_ends_stream(&self) -> bool {
        false
    }
}

#[async_trait]
impl<T> StreamEndpoint for Arc<T>
where
    T: StreamEndpoint + ?Sized,
{
    type Stream = T::Stream;

    fn name(&self) -> &str {
        (**self).name()
    }

    async fn open(&self) -> io::Result<Self::Stream> {
        (**self).open().await
    }

    fn is_transient(&self, error: &io::Error) -> bool {
        (**self).is_transient(error)
    }

    fn zero_read_ends_stream(&self) -> bool {
        (**self).zero_read_ends_stream()
    }
}

/// Windows 命名管道客户端端点。
#[cfg(windows)]
#[derive(Clone, Debug)]
pub struct NamedPipeEndpoint {
    name: String,
}

#[cfg(windows)]
impl NamedPipeEndpoint {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[cfg(windows)]
#[async_trait]
impl StreamEndpoint for NamedPipeEndpoint {
    type Stream = tokio::net::windows::named_pipe::NamedPipeClient;

    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&self) -> io::Result<Self::Stream> {
        use tokio::net::windows::named_pipe::{ClientOptions, PipeMode};
        // tokio 以 FILE_FLAG_OVERLAPPED 打开句柄并注册到 IOCP。
        ClientOptions::new()
            .pipe_mode(PipeMode::Byte)
            .open(&self.name)
    }
}

/// Unix 域套接字端点，在非 Windows 平台上替代命名管道。
#[cfg(unix)]
#[derive(Clone, Debug)]
pub struct UnixSocketEndpoint {
    path: String,
}

#[cfg(unix)]
impl UnixSocketEndpoint {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

#[cfg(unix)]
#[async_trait]
impl StreamEndpoint for UnixSocketEndpoint {
    type Stream = tokio::net::UnixStream;

    fn name(&self) -> &str {
        &self.path
    }

    async fn open(&self) -> io::Result<Self::Stream> {
        tokio::net::UnixStream::connect(&self.path).await
    }

    /// 流式套接字上的零字节读取即对端 EOF，之后的每次读取都会立即返回零。
    fn zero_read_ends_stream(&self) -> bool {
        true
    }
}

#[cfg(windows)]
pub type PlatformEndpoint = NamedPipeEndpoint;
#[cfg(unix)]
pub type PlatformEndpoint = UnixSocketEndpoint;

/// 本平台的默认端点实现。
pub fn platform_endpoint(name: &str) -> PlatformEndpoint {
    PlatformEndpoint::new(name)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_socket_is_transient() {
        let path = std::env::temp_dir().join(format!("kq-tunnel-absent-{}.sock", std::process::id()));
        let endpoint = platform_endpoint(&path.to_string_lossy());
        let err = endpoint.open().await.expect_err("不存在的端点必须失败");
        assert!(endpoint.is_transient(&err));
    }

    #[tokio::test]
    async fn opens_listening_socket() {
        let path = std::env::temp_dir().join(format!("kq-tunnel-open-{}.sock", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let listener = tokio::net::UnixListener::bind(&path).expect("bind");
        let endpoint = Arc::new(platform_endpoint(&path.to_string_lossy()));
        let (opened, accepted) = tokio::join!(endpoint.open(), listener.accept());
        opened.expect("端点存在时必须连接成功");
        accepted.expect("accept");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn unix_socket_treats_zero_read_as_eof() {
        let endpoint = Arc::new(platform_endpoint("/tmp/kq-tunnel-eof.sock"));
        assert!(endpoint.zero_read_ends_stream(), "Unix 套接字的零字节读取即对端关闭");
    }
}
