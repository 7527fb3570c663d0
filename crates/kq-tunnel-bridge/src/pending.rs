use std::future::Future;
use std::io;

use futures::future::BoxFuture;

/// 一次流操作的结局。
#[derive(Debug)]
pub(crate) enum OpResult {
    Completed(io::Result<usize>),
    Cancelled,
}

/// 至多一个的未完成异步操作。
///
/// 操作 Future 持有缓冲区与流半部的所有权，完成（含被取消后的完成）时一并交还，
/// 因此在操作结束之前调用方拿不到可以关闭的句柄。
pub(crate) struct PendingOperation<T> {
    slot: Option<BoxFuture<'static, T>>,
}

impl<T> PendingOperation<T> {
    pub(crate) fn idle() -> Self {
        Self { slot: None }
    }

    pub(crate) fn is_outstanding(&self) -> bool {
        self.slot.is_some()
    }

    pub(crate) fn issue<F>(&mut self, operation: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        debug_assert!(self.slot.is_none(), "an operation is already outstanding");
        self.slot = Some(Box::pin(operation));
    }

    /// 等待当前操作完成并清除占位。
    ///
    /// 取消安全：在 `select!` 中落选被丢弃时，操作仍留在占位里。
    pub(crate) async fn completion(&mut self) -> T {
        let output = match self.slot.as_mut() {
            Some(operation) => operation.await,
            None => std::future::pending().await,
        };
        self.slot = None;
        output
    }
}
