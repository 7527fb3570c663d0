use std::io;

use bytes::Bytes;
use kq_tunnel_core::{
    CancelReason, Cancellation, ErrorCategory, ReadFraming, TunnelError, error,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tracing::{debug, trace, warn};

use crate::channel::ChannelLease;
use crate::pending::{OpResult, PendingOperation};
use crate::queue::BoundedRelayQueue;

/// 反应器状态机。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ReactorState {
    /// 建连由 [`StreamConnector`](crate::StreamConnector) 负责，反应器尚未接管流。
    Connecting,
    /// 正常搬运。
    Active,
    /// 已观察到取消，正在等待未完成的读写交还流半部。
    Draining,
    /// 流句柄与通道租约均已释放。
    Closed,
}

/// 一次会话的数据面统计。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReactorStats {
    /// 写入字节流的字节数。
    pub bytes_to_stream: u64,
    /// 经由通道回写的负载字节数（已剥离帧头）。
    pub bytes_to_channel: u64,
    pub writes_issued: u64,
    pub writes_completed: u64,
    pub reads_completed: u64,
    /// 完成但不含负载的读取次数。
    pub empty_reads: u64,
    /// 因取消而被放弃、并已确认结束的读写操作数。
    pub ops_cancelled: u32,
}

/// 反应器运行结果：统计加上导致传输阶段结束的硬错误（若有）。
#[derive(Debug)]
pub struct ReactorOutcome {
    pub stats: ReactorStats,
    pub error: Option<TunnelError>,
}

struct ReadDone<S> {
    half: ReadHalf<S>,
    buf: Vec<u8>,
    result: OpResult,
}

struct WriteDone<S> {
    half: WriteHalf<S>,
    result: OpResult,
}

/// 单会话的事件循环。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 取消、读完成、队列就绪、写完成四个事件源在同一个循环里复用，
///   流句柄只被这一个执行上下文触碰。
///
/// ## 逻辑 (How)
/// - `Active` 时 `biased` 的 `select!` 依次轮询：取消 → 读完成 → 队列就绪 → 写完成；
///   读完成仅在有未完成读时参与，队列就绪仅在没有未完成写时参与；
/// - 读完成后若负载非空，同步调用通道回写，再立即重新发起读取；零字节读取同样重新发起，
///   除非端点声明零字节读取即对端关闭（见 [`StreamEndpoint::zero_read_ends_stream`](crate::StreamEndpoint::zero_read_ends_stream)）；
/// - 队列就绪后原子排空，非空则发起一次写，空则视为虚假唤醒；
/// - 取消到来转入 `Draining`：操作 Future 内部与同一取消信号竞赛，
///   循环继续等待直到读写都交还流半部，之后才关闭流并释放租约。
///
/// ## 契约 (What)
/// - 同一时刻至多一个未完成读、一个未完成写；字节顺序与入队顺序一致；
/// - 传输阶段的硬错误不重试，直接以 `TransferFailed` 取消会话；
/// - 退出条件：取消已触发且无未完成操作。
pub struct BridgeReactor<'a> {
    queue: &'a BoundedRelayQueue,
    cancel: &'a Cancellation,
    lease: &'a ChannelLease,
    framing: ReadFraming,
    read_buffer_size: usize,
    zero_read_ends_stream: bool,
    state: ReactorState,
    stats: ReactorStats,
    error: Option<TunnelError>,
}

impl<'a> BridgeReactor<'a> {
    pub fn new(
        queue: &'a BoundedRelayQueue,
        cancel: &'a Cancellation,
        lease: &'a ChannelLease,
    ) -> Self {
        Self {
            queue,
            cancel,
            lease,
            framing: ReadFraming::None,
            read_buffer_size: kq_tunnel_core::protocol::BUFFER_SIZE,
            zero_read_ends_stream: false,
            state: ReactorState::Connecting,
            stats: ReactorStats::default(),
            error: None,
        }
    }

    pub fn with_framing(mut self, framing: ReadFraming) -> Self {
        self.framing = framing;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    /// 零字节读取是否表示对端已关闭。默认关闭：零字节读取只代表本次没有负载。
    pub fn with_zero_read_ends_stream(mut self, ends: bool) -> Self {
        self.zero_read_ends_stream = ends;
        self
    }

    /// 接管已连接的流并运行到 `Closed`。
    pub async fn run<S>(mut self, stream: S) -> ReactorOutcome
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let mut reader: Option<ReadHalf<S>> = Some(read_half);
        let mut writer: Option<WriteHalf<S>> = Some(write_half);
        let mut reads: PendingOperation<ReadDone<S>> = PendingOperation::idle();
        let mut writes: PendingOperation<WriteDone<S>> = PendingOperation::idle();

        self.transition(ReactorState::Active);
        if let Some(half) = reader.take() {
            self.arm_read(&mut reads, half, vec![0; self.read_buffer_size]);
        }

        loop {
            if self.state == ReactorState::Active && self.cancel.is_cancelled() {
                self.transition(ReactorState::Draining);
            }
            if self.state == ReactorState::Draining
                && !reads.is_outstanding()
                && !writes.is_outstanding()
            {
                break;
            }

            let active = self.state == ReactorState::Active;
            tokio::select! {
                biased;
                _ = self.cancel.cancelled(), if active => {
                    self.transition(ReactorState::Draining);
                }
                done = reads.completion(), if reads.is_outstanding() => {
                    let ReadDone { half, buf, result } = done;
                    if self.on_read_complete(result, &buf) && !self.cancel.is_cancelled() {
                        self.arm_read(&mut reads, half, buf);
                    } else {
                        reader = Some(half);
                    }
                }
                _ = self.queue.ready(), if active && !writes.is_outstanding() => {
                    let data = self.queue.drain();
                    if data.is_empty() {
                        trace!("spurious queue wake");
                    } else if let Some(half) = writer.take() {
                        self.issue_write(&mut writes, half, data);
                    }
                }
                done = writes.completion(), if writes.is_outstanding() => {
                    let WriteDone { half, result } = done;
                    self.on_write_complete(result);
                    writer = Some(half);
                }
            }
        }

        // 两个半部都已交还：此时不存在进行中的操作，丢弃即关闭句柄。
        drop(reader.take());
        drop(writer.take());
        debug!(
            bytes_to_stream = self.stats.bytes_to_stream,
            bytes_to_channel = self.stats.bytes_to_channel,
            "stream handle closed"
        );
        self.transition(ReactorState::Closed);
        self.lease.release();

        ReactorOutcome {
            stats: self.stats,
            error: self.error,
        }
    }

    fn transition(&mut self, next: ReactorState) {
        if self.state != next {
            trace!(from = ?self.state, to = ?next, "reactor state transition");
            self.state = next;
        }
    }

    /// 处理一次读完成，返回是否应当重新发起读取。
    fn on_read_complete(&mut self, result: OpResult, buf: &[u8]) -> bool {
        let read = match result {
            OpResult::Cancelled => {
                self.stats.ops_cancelled += 1;
                return false;
            }
            OpResult::Completed(Err(err)) if is_retryable(&err) => return true,
            OpResult::Completed(Err(err)) => {
                self.fail(TunnelError::io(error::STREAM_READ, err));
                return false;
            }
            OpResult::Completed(Ok(read)) => read,
        };
        self.stats.reads_completed += 1;

        if read == 0 && self.zero_read_ends_stream {
            debug!("stream reached end of file");
            self.cancel.cancel(CancelReason::StreamEnded);
            return false;
        }

        let payload = self.framing.payload(&buf[..read]);
        if payload.is_empty() {
            self.stats.empty_reads += 1;
            return true;
        }
        match self.lease.egress(payload) {
            Ok(()) => {
                self.stats.bytes_to_channel += payload.len() as u64;
                true
            }
            Err(err) => {
                self.fail(TunnelError::new(
                    error::CHANNEL_EGRESS,
                    ErrorCategory::FatalTransfer,
                    format!("{}: {err}", error::CHANNEL_EGRESS.message),
                ));
                false
            }
        }
    }

    fn on_write_complete(&mut self, result: OpResult) {
        match result {
            OpResult::Cancelled => self.stats.ops_cancelled += 1,
            OpResult::Completed(Ok(written)) => {
                self.stats.writes_completed += 1;
                self.stats.bytes_to_stream += written as u64;
            }
            OpResult::Completed(Err(err)) => self.fail(TunnelError::io(error::STREAM_WRITE, err)),
        }
    }

    fn fail(&mut self, err: TunnelError) {
        warn!(code = err.code(), error = %err, "bridge transfer failed");
        self.cancel.cancel(CancelReason::TransferFailed);
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    fn arm_read<S>(&mut self, reads: &mut PendingOperation<ReadDone<S>>, half: ReadHalf<S>, buf: Vec<u8>)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let cancel = self.cancel.child();
        let mut half = half;
        let mut buf = buf;
        reads.issue(async move {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => OpResult::Cancelled,
                read = half.read(&mut buf) => OpResult::Completed(read),
            };
            ReadDone { half, buf, result }
        });
    }

    fn issue_write<S>(&mut self, writes: &mut PendingOperation<WriteDone<S>>, half: WriteHalf<S>, data: Bytes)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        self.stats.writes_issued += 1;
        trace!(len = data.len(), "issuing stream write");
        let cancel = self.cancel.child();
        let mut half = half;
        writes.issue(async move {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => OpResult::Cancelled,
                written = half.write_all(&data) => OpResult::Completed(written.map(|()| data.len())),
            };
            WriteDone { half, result }
        });
    }
}

fn is_retryable(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock)
}
