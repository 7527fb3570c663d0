use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use thiserror::Error;

/// 推送侧通道回写失败。
#[derive(Debug, Error)]
pub enum ChannelError {
    /// 会话已释放对通道的引用，或宿主已关闭通道。
    #[error("push channel is closed")]
    Closed,
    /// 宿主通道拒绝了写入。
    #[error("push channel write failed: {0}")]
    Write(String),
}

/// 推送侧通道，由宿主运行时提供。
///
/// # 教案式注释
///
/// ## 契约 (What)
/// - `egress`：把从字节流读到的数据写回通道，由会话工作线程调用；
/// - `on_released`：会话放弃其引用时恰好回调一次，宿主可借此归还自己的引用计数；
/// - 实现必须是 `Send + Sync`，因为入口回调与工作线程位于不同线程。
///
/// ## 注意事项 (Trade-offs)
/// - `egress` 在 [`ChannelLease`] 的锁外执行，宿主可以在其中同步投递 `on_close`；
///   此时 `on_released` 可能先于这次 `egress` 返回而被调用。
pub trait PushChannel: Send + Sync + 'static {
    fn egress(&self, data: &[u8]) -> Result<(), ChannelError>;

    fn on_released(&self) {}
}

/// 会话对推送侧通道持有的那一份引用。
///
/// `release` 无论从哪条退出路径调用（连接致命失败、`on_close`、反应器终态）都只生效一次；
/// 释放之后 `egress` 一律返回 [`ChannelError::Closed`]，不会再触碰宿主句柄。
pub struct ChannelLease {
    slot: Mutex<Option<Arc<dyn PushChannel>>>,
    released: AtomicBool,
}

impl ChannelLease {
    pub fn new(channel: Arc<dyn PushChannel>) -> Self {
        Self {
            slot: Mutex::new(Some(channel)),
            released: AtomicBool::new(false),
        }
    }

    /// 经由通道回写。
    ///
    /// 先在锁内克隆出通道句柄再调用，回写期间的并发或重入释放不会阻塞在租约锁上；
    /// 克隆出的句柄保证这次调用期间宿主通道仍然存活。
    pub fn egress(&self, data: &[u8]) -> Result<(), ChannelError> {
        let channel = self.slot.lock().clone().ok_or(ChannelError::Closed)?;
        channel.egress(data)
    }

    /// 释放引用。返回 `true` 表示本次调用真正执行了释放。
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        let channel = self.slot.lock().take();
        if let Some(channel) = channel {
            channel.on_released();
        }
        true
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for ChannelLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelLease")
            .field("released", &self.is_released())
            .finish()
    }
}
