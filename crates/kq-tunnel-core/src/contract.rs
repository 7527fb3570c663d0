use std::fmt;
use std::sync::{
    Arc, OnceLock,
    atomic::{AtomicBool, Ordering},
};

use tokio::sync::Notify;

/// 会话取消的首个触发原因。
///
/// 取消本身是一个布尔信号；原因只用于日志与会话报告之类的诊断输出，
/// 不参与任何控制流分支。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelReason {
    /// 推送侧宿主调用了 `on_close`。
    PeerClosed,
    /// 入队会超过 `Qmax`，或缓冲区分配失败。
    CapacityExceeded,
    /// 外部关闭请求。
    Shutdown,
    /// 建连阶段遇到非瞬态错误。
    ConnectFailed,
    /// 数据传输阶段遇到硬 IO 错误或出口写失败。
    TransferFailed,
    /// 字节流对端结束（连续空读超过上限，或中继一侧读到 EOF）。
    StreamEnded,
}

impl CancelReason {
    /// 返回稳定的小写标签，供结构化日志使用。
    pub fn as_str(self) -> &'static str {
        match self {
            CancelReason::PeerClosed => "peer_closed",
            CancelReason::CapacityExceeded => "capacity_exceeded",
            CancelReason::Shutdown => "shutdown",
            CancelReason::ConnectFailed => "connect_failed",
            CancelReason::TransferFailed => "transfer_failed",
            CancelReason::StreamEnded => "stream_ended",
        }
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 会话级取消信号。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 推送侧回调线程与会话工作线程需要共享同一个“停止”事实；
/// - 会话工作线程的两个挂起点（连接重试等待、反应器多源等待）都必须与之竞赛，
///   因此除了原子位外还需要一个可 `await` 的唤醒源。
///
/// ## 逻辑 (How)
/// - `flag` 使用 `Acquire/Release` 排序，任何线程置位后其他线程立即可见；
/// - `reason` 借助 `OnceLock` 实现“首写者胜出”，同时充当单次触发的判定；
/// - `notify.notify_waiters()` 唤醒所有已创建的 `Notified`，
///   [`Cancellation::cancelled`] 先创建 `Notified` 再检查原子位，避免丢失唤醒。
///
/// ## 契约 (What)
/// - `cancel` 幂等，可从任意线程、任意次数调用；只有首次调用返回 `true`；
/// - `cancelled().await` 在已取消时立即返回，否则在置位后返回，不做忙轮询；
/// - 克隆共享同一状态。
#[derive(Clone, Debug, Default)]
pub struct Cancellation {
    inner: Arc<CancellationState>,
}

#[derive(Debug, Default)]
struct CancellationState {
    flag: AtomicBool,
    reason: OnceLock<CancelReason>,
    notify: Notify,
}

impl Cancellation {
    /// 创建处于“未取消”状态的信号。
    pub fn new() -> Self {
        Self::default()
    }

    /// 查询是否已被取消。
    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::Acquire)
    }

    /// 触发取消。返回 `true` 表示本次调用首次触发。
    pub fn cancel(&self, reason: CancelReason) -> bool {
        let first = self.inner.reason.set(reason).is_ok();
        if first {
            self.inner.flag.store(true, Ordering::Release);
            self.inner.notify.notify_waiters();
        }
        first
    }

    /// 首个取消原因；未取消时为 `None`。
    pub fn reason(&self) -> Option<CancelReason> {
        if self.is_cancelled() {
            self.inner.reason.get().copied()
        } else {
            None
        }
    }

    /// 等待取消发生。
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// 派生共享同一状态的句柄，用于跨模块传播取消语义。
    pub fn child(&self) -> Self {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn cancel_is_single_shot_and_keeps_first_reason() {
        let token = Cancellation::new();
        assert!(token.reason().is_none());
        assert!(token.cancel(CancelReason::CapacityExceeded), "首次取消应返回 true");
        assert!(!token.cancel(CancelReason::PeerClosed), "重复取消应返回 false");
        assert!(token.is_cancelled());
        assert_eq!(token.reason(), Some(CancelReason::CapacityExceeded));
    }

    #[test]
    fn concurrent_cancel_has_exactly_one_winner() {
        let token = Cancellation::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let token = token.child();
                thread::spawn(move || token.cancel(CancelReason::Shutdown))
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().expect("取消线程不应 panic"))
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancelled_wakes_waiter_from_foreign_thread() {
        let token = Cancellation::new();
        let remote = token.child();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.cancel(CancelReason::PeerClosed);
        });
        tokio::time::timeout(Duration::from_secs(5), token.cancelled())
            .await
            .expect("取消必须唤醒等待者");
        canceller.join().expect("取消线程不应 panic");
    }

    #[tokio::test]
    async fn cancelled_returns_immediately_once_set() {
        let token = Cancellation::new();
        token.cancel(CancelReason::Shutdown);
        token.cancelled().await;
    }
}
