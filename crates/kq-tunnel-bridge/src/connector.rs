use std::time::Duration;

use kq_tunnel_core::{CancelReason, Cancellation, TunnelError, error};
use tracing::{debug, warn};

use crate::channel::ChannelLease;
use crate::endpoint::StreamEndpoint;

/// 一次建连的结果。
#[derive(Debug)]
pub enum ConnectOutcome<S> {
    Connected(S),
    Cancelled,
    Fatal(TunnelError),
}

/// 建立双工流一侧的连接。
///
/// # 教案式注释
///
/// ## 逻辑 (How)
/// - 每轮先检查取消，再尝试 `open`；`open` 本身也与取消竞赛；
/// - 瞬态失败后等待 `retry_interval`，等待与取消竞赛，取消胜出则返回 `Cancelled`；
/// - 非瞬态失败立即放弃：置取消原因 `ConnectFailed` 并释放通道租约，
///   与 `on_close` 的释放契约一致。
///
/// ## 契约 (What)
/// - 在取消置位后至多经过一个重试间隔即返回；
/// - `attempts` 记录 `open` 的调用次数，供会话报告使用。
pub struct StreamConnector<'a, E> {
    endpoint: &'a E,
    cancel: &'a Cancellation,
    lease: &'a ChannelLease,
    retry_interval: Duration,
    attempts: u32,
}

impl<'a, E> StreamConnector<'a, E>
where
    E: StreamEndpoint,
{
    pub fn new(
        endpoint: &'a E,
        cancel: &'a Cancellation,
        lease: &'a ChannelLease,
        retry_interval: Duration,
    ) -> Self {
        Self {
            endpoint,
            cancel,
            lease,
            retry_interval,
            attempts: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub async fn connect(&mut self) -> ConnectOutcome<E::Stream> {
        loop {
            if self.cancel.is_cancelled() {
                return ConnectOutcome::Cancelled;
            }
            self.attempts += 1;

            let opened = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return ConnectOutcome::Cancelled,
                opened = self.endpoint.open() => opened,
            };

            match opened {
                Ok(stream) => {
                    debug!(
                        endpoint = self.endpoint.name(),
                        attempts = self.attempts,
                        "stream endpoint connected"
                    );
                    return ConnectOutcome::Connected(stream);
                }
                Err(err) if self.endpoint.is_transient(&err) => {
                    debug!(
                        endpoint = self.endpoint.name(),
                        attempt = self.attempts,
                        error = %err,
                        "stream endpoint not available yet, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return ConnectOutcome::Cancelled,
                        _ = tokio::time::sleep(self.retry_interval) => {}
                    }
                }
                Err(err) => {
                    let err = TunnelError::setup(error::PIPE_OPEN, err);
                    warn!(
                        endpoint = self.endpoint.name(),
                        code = err.code(),
                        error = %err,
                        "stream endpoint open failed"
                    );
                    self.cancel.cancel(CancelReason::ConnectFailed);
                    self.lease.release();
                    return ConnectOutcome::Fatal(err);
                }
            }
        }
    }
}
