use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

use kq_tunnel_core::error::WORKER_SPAWN;
use kq_tunnel_core::{BridgeConfig, CancelReason, Cancellation, ErrorCategory, TunnelError};
use tracing::{Instrument, debug, error, info, info_span};

use crate::channel::{ChannelLease, PushChannel};
use crate::connector::{ConnectOutcome, StreamConnector};
use crate::endpoint::StreamEndpoint;
use crate::gateway::{IngressGateway, SessionShared};
use crate::queue::BoundedRelayQueue;
use crate::reactor::{BridgeReactor, ReactorStats};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// 会话结束的方式。
#[derive(Debug)]
pub enum SessionExit {
    /// 协作式结束：宿主关闭、容量超限、外部关闭或字节流结束。
    Cancelled(CancelReason),
    ConnectFailed(TunnelError),
    TransferFailed(TunnelError),
}

impl SessionExit {
    /// 是否属于需要在进程级日志中呈现的失败。
    pub fn is_failure(&self) -> bool {
        !matches!(self, SessionExit::Cancelled(_))
    }
}

impl fmt::Display for SessionExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionExit::Cancelled(reason) => write!(f, "cancelled ({reason})"),
            SessionExit::ConnectFailed(err) => write!(f, "connect failed: {err}"),
            SessionExit::TransferFailed(err) => write!(f, "transfer failed: {err}"),
        }
    }
}

/// 一次会话的最终报告。
#[derive(Debug)]
pub struct SessionReport {
    pub exit: SessionExit,
    /// 端点 `open` 的调用次数。
    pub connect_attempts: u32,
    pub stats: ReactorStats,
}

/// 一个逻辑连接的桥接会话。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 把队列、取消信号、通道租约的创建与销毁收拢到一处，
///   让“队列与取消信号先于流句柄创建、后于流句柄销毁”的嵌套生命周期成为结构事实。
///
/// ## 逻辑 (How)
/// - `new` 创建共享状态并返回入口 [`IngressGateway`]，宿主从此刻起即可推送数据；
/// - `run` 依次执行 [`StreamConnector`] 与 [`BridgeReactor`]，流句柄只在两者之间移交；
/// - 任何退出路径的末尾都会再调用一次 `lease.release()`，单次释放标志保证只生效一次。
///
/// ## 契约 (What)
/// - `run` 返回时流句柄已关闭、通道引用已释放；
/// - `spawn` 在专用的命名线程上以 current-thread 运行时执行 `run`。
pub struct BridgeSession<E> {
    id: u64,
    config: BridgeConfig,
    endpoint: E,
    shared: Arc<SessionShared>,
}

impl<E> BridgeSession<E>
where
    E: StreamEndpoint + 'static,
{
    pub fn new(
        config: BridgeConfig,
        endpoint: E,
        channel: Arc<dyn PushChannel>,
    ) -> (Self, IngressGateway) {
        let shared = Arc::new(SessionShared {
            queue: BoundedRelayQueue::new(config.queue_capacity),
            cancel: Cancellation::new(),
            lease: ChannelLease::new(channel),
        });
        let session = Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            config,
            endpoint,
            shared: Arc::clone(&shared),
        };
        (session, IngressGateway::new(shared))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cancellation(&self) -> &Cancellation {
        &self.shared.cancel
    }

    pub async fn run(self) -> SessionReport {
        let span = info_span!("bridge_session", session = self.id, endpoint = self.endpoint.name());
        self.run_inner().instrument(span).await
    }

    async fn run_inner(self) -> SessionReport {
        let shared = &*self.shared;
        let mut connector = StreamConnector::new(
            &self.endpoint,
            &shared.cancel,
            &shared.lease,
            self.config.retry_interval(),
        );
        let outcome = connector.connect().await;
        let connect_attempts = connector.attempts();

        let (exit, stats) = match outcome {
            ConnectOutcome::Connected(stream) => {
                info!(attempts = connect_attempts, "bridge session active");
                let outcome = BridgeReactor::new(&shared.queue, &shared.cancel, &shared.lease)
                    .with_framing(self.config.read_framing())
                    .with_read_buffer_size(self.config.read_buffer_size)
                    .with_zero_read_ends_stream(self.endpoint.zero_read_ends_stream())
                    .run(stream)
                    .await;
                let exit = match outcome.error {
                    Some(err) => SessionExit::TransferFailed(err),
                    None => SessionExit::Cancelled(cancel_reason(&shared.cancel)),
                };
                (exit, outcome.stats)
            }
            ConnectOutcome::Cancelled => (
                SessionExit::Cancelled(cancel_reason(&shared.cancel)),
                ReactorStats::default(),
            ),
            ConnectOutcome::Fatal(err) => (SessionExit::ConnectFailed(err), ReactorStats::default()),
        };
        shared.lease.release();

        match &exit {
            SessionExit::Cancelled(reason) => debug!(
                reason = reason.as_str(),
                bytes_to_stream = stats.bytes_to_stream,
                bytes_to_channel = stats.bytes_to_channel,
                "bridge session ended"
            ),
            SessionExit::ConnectFailed(err) | SessionExit::TransferFailed(err)
                if err.category().is_surfaced() =>
            {
                error!(
                    code = err.code(),
                    error = %err,
                    bytes_to_stream = stats.bytes_to_stream,
                    bytes_to_channel = stats.bytes_to_channel,
                    "bridge session failed"
                )
            }
            SessionExit::ConnectFailed(err) | SessionExit::TransferFailed(err) => debug!(
                code = err.code(),
                category = ?err.category(),
                "bridge session stopped"
            ),
        }

        SessionReport {
            exit,
            connect_attempts,
            stats,
        }
    }

    /// 在专用工作线程上运行会话。
    pub fn spawn(self) -> Result<SessionHandle, TunnelError> {
        let id = self.id;
        let shared = Arc::clone(&self.shared);
        let spawned = std::thread::Builder::new()
            .name(format!("kq-bridge-{id}"))
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_io()
                    .enable_time()
                    .build();
                match runtime {
                    Ok(runtime) => runtime.block_on(self.run()),
                    Err(err) => self.abort(err),
                }
            });

        match spawned {
            Ok(thread) => Ok(SessionHandle {
                id,
                cancel: shared.cancel.clone(),
                thread: Some(thread),
            }),
            Err(err) => {
                shared.cancel.cancel(CancelReason::Shutdown);
                shared.lease.release();
                Err(TunnelError::io(WORKER_SPAWN, err))
            }
        }
    }

    fn abort(self, err: std::io::Error) -> SessionReport {
        let err = TunnelError::new(
            WORKER_SPAWN,
            ErrorCategory::FatalSetup,
            format!("{}: runtime build failed: {err}", WORKER_SPAWN.message),
        );
        error!(session = self.id, code = err.code(), error = %err, "bridge session worker failed");
        self.shared.cancel.cancel(CancelReason::ConnectFailed);
        self.shared.lease.release();
        SessionReport {
            exit: SessionExit::ConnectFailed(err),
            connect_attempts: 0,
            stats: ReactorStats::default(),
        }
    }
}

fn cancel_reason(cancel: &Cancellation) -> CancelReason {
    cancel.reason().unwrap_or(CancelReason::Shutdown)
}

/// 运行中会话的外部控制柄。
#[derive(Debug)]
pub struct SessionHandle {
    id: u64,
    cancel: Cancellation,
    thread: Option<JoinHandle<SessionReport>>,
}

impl SessionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// 外部关闭请求。
    pub fn shutdown(&self) {
        if self.cancel.cancel(CancelReason::Shutdown) {
            debug!(session = self.id, "bridge session shutdown requested");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(|thread| thread.is_finished())
    }

    /// 等待工作线程结束；线程恐慌时返回 `None`。
    pub fn join(mut self) -> Option<SessionReport> {
        self.thread.take()?.join().ok()
    }
}
