use std::sync::Arc;

use kq_tunnel_core::{CancelReason, Cancellation};
use tracing::{debug, trace};

use crate::channel::ChannelLease;
use crate::queue::BoundedRelayQueue;

/// 会话工作线程与入口回调共享的状态。
///
/// 只有队列（内部加锁）、取消信号（原子）与租约（单次释放）跨执行上下文共享，
/// 流句柄不在其中。
#[derive(Debug)]
pub(crate) struct SessionShared {
    pub(crate) queue: BoundedRelayQueue,
    pub(crate) cancel: Cancellation,
    pub(crate) lease: ChannelLease,
}

/// 推送侧宿主调用的会话入口。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 宿主在自己的线程上回调，回调栈不属于会话；入口因此只能做短临界区入队，
///   不能挂起，也不能把会话过载变成宿主可见的失败。
///
/// ## 逻辑 (How)
/// - `on_data`：已取消则丢弃；入队被拒（超过 `Qmax` 或分配失败）时触发
///   `CapacityExceeded` 取消后照常返回；
/// - `on_close`：触发 `PeerClosed` 取消，并经由 [`ChannelLease`] 恰好一次释放通道引用。
///
/// ## 契约 (What)
/// - 两个入口都可与会话工作线程以及彼此并发调用；
/// - 克隆共享同一会话。
#[derive(Clone, Debug)]
pub struct IngressGateway {
    shared: Arc<SessionShared>,
}

impl IngressGateway {
    pub(crate) fn new(shared: Arc<SessionShared>) -> Self {
        Self { shared }
    }

    /// 推送侧数据到达。
    pub fn on_data(&self, data: &[u8]) {
        if self.shared.cancel.is_cancelled() {
            trace!(len = data.len(), "session cancelled, dropping channel data");
            return;
        }
        if let Err(err) = self.shared.queue.push(data) {
            if self.shared.cancel.cancel(CancelReason::CapacityExceeded) {
                debug!(
                    code = err.code(),
                    queued = self.shared.queue.len(),
                    capacity = self.shared.queue.capacity(),
                    "relay queue overflow, cancelling session"
                );
            }
        }
    }

    /// 推送侧通道关闭。幂等。
    pub fn on_close(&self) {
        if self.shared.cancel.cancel(CancelReason::PeerClosed) {
            debug!("channel closed by host, cancelling session");
        }
        self.shared.lease.release();
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// 当前排队、尚未被反应器取走的字节数。
    pub fn queued_bytes(&self) -> usize {
        self.shared.queue.len()
    }
}
