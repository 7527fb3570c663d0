//! 客户端进程一侧的管道服务端：等待通道适配器连入。
//!
//! Windows 上是单实例、字节模式的命名管道，每个会话重新创建一次实例；
//! 其他平台以 Unix 域套接字代替，监听套接字在整个进程生命周期内复用。

use kq_tunnel_core::TunnelError;

#[cfg(windows)]
pub type PipeStream = tokio::net::windows::named_pipe::NamedPipeServer;
#[cfg(unix)]
pub type PipeStream = tokio::net::UnixStream;

/// 管道服务端。
#[derive(Debug)]
pub struct PipeHost {
    name: String,
    #[cfg(unix)]
    listener: tokio::net::UnixListener,
}

impl PipeHost {
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(windows)]
impl PipeHost {
    /// 记录管道名；实例在每次 [`PipeHost::accept`] 时创建。
    pub fn bind(name: impl Into<String>) -> Result<Self, TunnelError> {
        Ok(Self { name: name.into() })
    }

    /// 创建一个管道实例并等待适配器连入。
    pub async fn accept(&mut self) -> Result<PipeStream, TunnelError> {
        use kq_tunnel_core::{error, protocol::BUFFER_SIZE};
        use tokio::net::windows::named_pipe::{PipeMode, ServerOptions};

        let server = ServerOptions::new()
            .first_pipe_instance(true)
            .max_instances(1)
            .pipe_mode(PipeMode::Byte)
            .in_buffer_size(BUFFER_SIZE as u32)
            .out_buffer_size(BUFFER_SIZE as u32)
            .create(&self.name)
            .map_err(|err| TunnelError::setup(error::PIPE_CREATE, err))?;
        tracing::info!(pipe = %self.name, "waiting for channel adapter to connect");
        // 客户端先于 connect 连入时 tokio 同样返回成功。
        server
            .connect()
            .await
            .map_err(|err| TunnelError::setup(error::PIPE_ACCEPT, err))?;
        tracing::info!(pipe = %self.name, "channel adapter connected");
        Ok(server)
    }
}

#[cfg(unix)]
impl PipeHost {
    /// 绑定监听套接字；残留的套接字文件会先被移除。
    pub fn bind(name: impl Into<String>) -> Result<Self, TunnelError> {
        use kq_tunnel_core::error;

        let name = name.into();
        match std::fs::remove_file(&name) {
            Ok(()) => tracing::debug!(pipe = %name, "removed stale socket file"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(TunnelError::setup(error::PIPE_CREATE, err)),
        }
        let listener = tokio::net::UnixListener::bind(&name)
            .map_err(|err| TunnelError::setup(error::PIPE_CREATE, err))?;
        Ok(Self { name, listener })
    }

    pub async fn accept(&mut self) -> Result<PipeStream, TunnelError> {
        use kq_tunnel_core::error;

        tracing::info!(pipe = %self.name, "waiting for channel adapter to connect");
        let (stream, _) = self
            .listener
            .accept()
            .await
            .map_err(|err| TunnelError::setup(error::PIPE_ACCEPT, err))?;
        tracing::info!(pipe = %self.name, "channel adapter connected");
        Ok(stream)
    }
}

#[cfg(unix)]
impl Drop for PipeHost {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.name);
    }
}
