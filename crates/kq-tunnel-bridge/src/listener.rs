use std::sync::Arc;

use kq_tunnel_core::protocol::CHANNEL_NAME;
use kq_tunnel_core::{BridgeConfig, ConfigError, TunnelError};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::channel::PushChannel;
use crate::endpoint::{PlatformEndpoint, StreamEndpoint, platform_endpoint};
use crate::gateway::IngressGateway;
use crate::session::{BridgeSession, SessionHandle, SessionReport};

/// 新虚拟通道的接入点。
///
/// 宿主每打开一条名为 [`CHANNEL_NAME`] 的通道就调用一次 [`ChannelListener::accept`]，
/// 监听器为其启动一个独立的 [`BridgeSession`] 工作线程，并把入口交还宿主。
/// 会话之间除配置与端点外不共享任何状态。
pub struct ChannelListener<E> {
    config: BridgeConfig,
    endpoint: E,
    sessions: Mutex<Vec<SessionHandle>>,
}

impl<E> ChannelListener<E>
where
    E: StreamEndpoint + Clone + 'static,
{
    pub fn new(config: BridgeConfig, endpoint: E) -> Self {
        Self {
            config,
            endpoint,
            sessions: Mutex::new(Vec::new()),
        }
    }

    pub fn channel_name(&self) -> &'static str {
        CHANNEL_NAME
    }

    /// 接受一条新通道并启动对应会话。
    ///
    /// 只有工作线程无法创建时才返回错误，此时通道引用已被释放。
    pub fn accept(&self, channel: Arc<dyn PushChannel>) -> Result<IngressGateway, TunnelError> {
        let (session, gateway) =
            BridgeSession::new(self.config.clone(), self.endpoint.clone(), channel);
        let handle = session.spawn()?;
        info!(
            session = handle.id(),
            channel = CHANNEL_NAME,
            endpoint = self.endpoint.name(),
            "virtual channel accepted"
        );

        let mut sessions = self.sessions.lock();
        sessions.retain(|session| !session.is_finished());
        sessions.push(handle);
        Ok(gateway)
    }

    /// 尚未结束的会话数。
    pub fn active_sessions(&self) -> usize {
        self.sessions
            .lock()
            .iter()
            .filter(|session| !session.is_finished())
            .count()
    }

    /// 向所有会话发出关闭请求并等待其结束。
    pub fn shutdown(&self) -> Vec<SessionReport> {
        let sessions = std::mem::take(&mut *self.sessions.lock());
        for session in &sessions {
            session.shutdown();
        }
        let reports: Vec<_> = sessions.into_iter().filter_map(SessionHandle::join).collect();
        debug!(sessions = reports.len(), "channel listener shut down");
        reports
    }
}

impl ChannelListener<PlatformEndpoint> {
    /// 以环境配置与本平台默认端点构造监听器。
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = BridgeConfig::from_env()?;
        let endpoint = platform_endpoint(&config.pipe_name);
        Ok(Self::new(config, endpoint))
    }
}
