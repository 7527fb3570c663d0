//! 会话场景测试共用的替身：脚本化字节流、可注入失败的端点、记录回写的通道。

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use async_trait::async_trait;
use kq_tunnel_bridge::{ChannelError, PushChannel, StreamEndpoint};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::{Notify, mpsc};

/// 等待条件成立，期间在通知上挂起；先创建 `Notified` 再检查条件，避免丢失唤醒。
async fn wait_until(notify: &Notify, mut ready: impl FnMut() -> bool) {
    loop {
        let notified = notify.notified();
        if ready() {
            return;
        }
        notified.await;
    }
}

#[derive(Default)]
struct StreamState {
    writes: Mutex<Vec<Vec<u8>>>,
    stalled_polls: AtomicUsize,
    stall_writes: AtomicBool,
    fail_writes: AtomicBool,
    stalled_waker: Mutex<Option<Waker>>,
    dropped: AtomicBool,
    activity: Notify,
}

/// 脚本化的双工字节流。
///
/// 读取结果来自 [`StreamControl::feed`] 等方法推入的脚本：
/// 空负载表示一次零字节读取，脚本耗尽时读取保持挂起。
/// 写入按 `poll_write` 调用逐次记录。
pub struct MockStream {
    reads: mpsc::UnboundedReceiver<io::Result<Vec<u8>>>,
    leftover: Vec<u8>,
    state: Arc<StreamState>,
}

/// 测试侧对 [`MockStream`] 的控制柄。
#[derive(Clone)]
pub struct StreamControl {
    reads: mpsc::UnboundedSender<io::Result<Vec<u8>>>,
    state: Arc<StreamState>,
}

impl MockStream {
    pub fn new() -> (Self, StreamControl) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(StreamState::default());
        let stream = Self {
            reads: rx,
            leftover: Vec::new(),
            state: Arc::clone(&state),
        };
        (stream, StreamControl { reads: tx, state })
    }
}

impl StreamControl {
    pub fn feed(&self, data: impl Into<Vec<u8>>) {
        let _ = self.reads.send(Ok(data.into()));
    }

    pub fn fail_read(&self, kind: io::ErrorKind) {
        let _ = self.reads.send(Err(io::Error::from(kind)));
    }

    pub fn stall_writes(&self) {
        self.state.stall_writes.store(true, Ordering::SeqCst);
    }

    pub fn fail_writes(&self) {
        self.state.fail_writes.store(true, Ordering::SeqCst);
    }

    /// 每次 `poll_write` 成功收下的数据。
    pub fn write_calls(&self) -> Vec<Vec<u8>> {
        self.state.writes.lock().clone()
    }

    pub fn written(&self) -> Vec<u8> {
        self.state.writes.lock().concat()
    }

    pub fn stalled_polls(&self) -> usize {
        self.state.stalled_polls.load(Ordering::SeqCst)
    }

    pub fn is_dropped(&self) -> bool {
        self.state.dropped.load(Ordering::SeqCst)
    }

    pub async fn wait_written(&self, len: usize) {
        wait_until(&self.state.activity, || self.written().len() >= len).await;
    }

    pub async fn wait_stalled_write(&self) {
        wait_until(&self.state.activity, || self.stalled_polls() > 0).await;
    }

    /// 在普通线程上轮询等待写入量达到 `len`。
    pub fn block_until_written(&self, len: usize, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        while std::time::Instant::now() < deadline {
            if self.written().len() >= len {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }
}

impl AsyncRead for MockStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.leftover.is_empty() {
            match this.reads.poll_recv(cx) {
                Poll::Ready(Some(Ok(data))) => this.leftover = data,
                Poll::Ready(Some(Err(err))) => return Poll::Ready(Err(err)),
                // 控制柄全部丢弃后读取永远挂起，只能由取消结束。
                Poll::Ready(None) | Poll::Pending => return Poll::Pending,
            }
        }
        let take = this.leftover.len().min(buf.remaining());
        buf.put_slice(&this.leftover[..take]);
        this.leftover.drain(..take);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MockStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let state = &self.state;
        if state.fail_writes.load(Ordering::SeqCst) {
            return Poll::Ready(Err(io::Error::from(io::ErrorKind::BrokenPipe)));
        }
        if state.stall_writes.load(Ordering::SeqCst) {
            *state.stalled_waker.lock() = Some(cx.waker().clone());
            state.stalled_polls.fetch_add(1, Ordering::SeqCst);
            state.activity.notify_waiters();
            return Poll::Pending;
        }
        state.writes.lock().push(buf.to_vec());
        state.activity.notify_waiters();
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl Drop for MockStream {
    fn drop(&mut self) {
        self.state.dropped.store(true, Ordering::SeqCst);
        self.state.activity.notify_waiters();
    }
}

#[derive(Default)]
struct EndpointState {
    failures: Mutex<VecDeque<io::ErrorKind>>,
    stream: Mutex<Option<MockStream>>,
    attempts: AtomicUsize,
    eof_on_zero_read: AtomicBool,
}

/// 可注入建连失败的端点；脚本失败用尽后交出预置的流，流已交出则报告 `NotFound`。
#[derive(Clone, Default)]
pub struct MockEndpoint {
    inner: Arc<EndpointState>,
}

impl MockEndpoint {
    pub fn new(stream: MockStream) -> Self {
        let endpoint = Self::default();
        *endpoint.inner.stream.lock() = Some(stream);
        endpoint
    }

    /// 永远不可用的端点。
    pub fn absent() -> Self {
        Self::default()
    }

    pub fn fail_first(self, count: usize, kind: io::ErrorKind) -> Self {
        self.inner
            .failures
            .lock()
            .extend(std::iter::repeat_n(kind, count));
        self
    }

    /// 像流式套接字一样把零字节读取视为对端关闭。
    pub fn ending_on_zero_read(self) -> Self {
        self.inner.eof_on_zero_read.store(true, Ordering::SeqCst);
        self
    }

    pub fn attempts(&self) -> usize {
        self.inner.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamEndpoint for MockEndpoint {
    type Stream = MockStream;

    fn name(&self) -> &str {
        "mock"
    }

    async fn open(&self) -> io::Result<MockStream> {
        self.inner.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(kind) = self.inner.failures.lock().pop_front() {
            return Err(io::Error::from(kind));
        }
        self.inner
            .stream
            .lock()
            .take()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
    }

    fn zero_read_ends_stream(&self) -> bool {
        self.inner.eof_on_zero_read.load(Ordering::SeqCst)
    }
}

/// 记录回写与释放次数的推送侧通道。
#[derive(Default)]
pub struct RecordingChannel {
    egress: Mutex<Vec<u8>>,
    egress_calls: AtomicUsize,
    releases: AtomicUsize,
    fail_egress: AtomicBool,
    activity: Notify,
}

impl RecordingChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let channel = Self::default();
        channel.fail_egress.store(true, Ordering::SeqCst);
        Arc::new(channel)
    }

    pub fn egress(&self) -> Vec<u8> {
        self.egress.lock().clone()
    }

    pub fn egress_calls(&self) -> usize {
        self.egress_calls.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub async fn wait_egress(&self, len: usize) {
        wait_until(&self.activity, || self.egress.lock().len() >= len).await;
    }
}

impl PushChannel for RecordingChannel {
    fn egress(&self, data: &[u8]) -> Result<(), ChannelError> {
        self.egress_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_egress.load(Ordering::SeqCst) {
            return Err(ChannelError::Write("host rejected write".into()));
        }
        self.egress.lock().extend_from_slice(data);
        self.activity.notify_waiters();
        Ok(())
    }

    fn on_released(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}
