use bytes::Bytes;
use kq_tunnel_core::TunnelError;
use parking_lot::Mutex;
use tokio::sync::Notify;

/// 推送侧生产者与反应器之间的有界字节队列。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 推送侧回调不能被阻塞，也不能被要求减速；队列只能以“拒绝并取消会话”
///   的方式约束内存，`Qmax` 即该上限。
///
/// ## 逻辑 (How)
/// - `push` 在互斥锁内比较 `len + data.len()` 与容量，通过后 `try_reserve` 再追加，
///   分配失败与容量超限同样返回 `CapacityExceeded`；解锁后发放一个就绪许可；
/// - `drain` 在同一临界区内用空缓冲换出旧缓冲，生产者不会观察到“半排空”状态，
///   反应器也不会重复读取已交出的字节；
/// - 就绪信号是 `Notify` 许可：多次 `push` 合并为一个许可，消费后再排空即可拿到全部数据，
///   因此排空结果为空的唤醒是允许的。
///
/// ## 契约 (What)
/// - 字节按 `push` 调用顺序出队（FIFO）；
/// - 被拒绝的 `push` 不改变队列内容。
#[derive(Debug)]
pub struct BoundedRelayQueue {
    buffer: Mutex<Vec<u8>>,
    capacity: usize,
    ready: Notify,
}

impl BoundedRelayQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Mutex::new(Vec::new()),
            capacity,
            ready: Notify::new(),
        }
    }

    /// 追加字节并发出就绪信号。
    pub fn push(&self, data: &[u8]) -> Result<(), TunnelError> {
        if data.is_empty() {
            return Ok(());
        }
        {
            let mut buffer = self.buffer.lock();
            let requested = buffer.len().saturating_add(data.len());
            if requested > self.capacity {
                return Err(TunnelError::capacity_exceeded(requested, self.capacity));
            }
            buffer
                .try_reserve(data.len())
                .map_err(|_| TunnelError::capacity_exceeded(requested, self.capacity))?;
            buffer.extend_from_slice(data);
        }
        self.ready.notify_one();
        Ok(())
    }

    /// 原子地取走全部内容。
    pub fn drain(&self) -> Bytes {
        let taken = std::mem::take(&mut *self.buffer.lock());
        Bytes::from(taken)
    }

    /// 等待下一个就绪许可。取消安全：未完成时被丢弃不会消耗许可。
    pub async fn ready(&self) {
        self.ready.notified().await;
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kq_tunnel_core::ErrorCategory;
    use proptest::prelude::*;
    use std::time::Duration;

    #[test]
    fn push_beyond_capacity_is_rejected_without_mutation() {
        let queue = BoundedRelayQueue::new(4);
        queue.push(&[1, 2, 3]).expect("容量内入队必须成功");
        let err = queue.push(&[4, 5]).expect_err("越界入队必须被拒绝");
        assert_eq!(err.category(), ErrorCategory::CapacityExceeded);
        assert_eq!(queue.len(), 3);
        queue.push(&[4]).expect("恰好填满仍然允许");
        assert_eq!(&queue.drain()[..], &[1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn drain_of_empty_queue_is_empty() {
        let queue = BoundedRelayQueue::new(16);
        assert!(queue.drain().is_empty());
        queue.push(&[]).expect("空入队是空操作");
        assert!(queue.drain().is_empty());
    }

    #[tokio::test]
    async fn push_leaves_a_ready_permit() {
        let queue = BoundedRelayQueue::new(16);
        queue.push(&[9]).expect("push");
        queue.push(&[8]).expect("push");
        tokio::time::timeout(Duration::from_secs(1), queue.ready())
            .await
            .expect("入队后必须存在就绪许可");
        assert_eq!(&queue.drain()[..], &[9, 8]);
    }

    proptest! {
        /// 任意入队/排空交错下，排空结果依次拼接等于入队负载依次拼接。
        #[test]
        fn interleaved_drains_preserve_fifo(
            chunks in proptest::collection::vec(
                (proptest::collection::vec(any::<u8>(), 0..64), any::<bool>()),
                0..48,
            )
        ) {
            let queue = BoundedRelayQueue::new(usize::MAX);
            let mut expected = Vec::new();
            let mut observed = Vec::new();
            for (chunk, drain_after) in chunks {
                expected.extend_from_slice(&chunk);
                queue.push(&chunk).expect("无界容量下入队必须成功");
                if drain_after {
                    observed.extend_from_slice(&queue.drain());
                }
            }
            observed.extend_from_slice(&queue.drain());
            prop_assert_eq!(observed, expected);
        }
    }
}
