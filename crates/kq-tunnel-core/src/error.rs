//! 隧道错误分类与稳定错误码。
//!
//! 每个可失败的底层操作都对应一个 [`OperationKind`]：稳定错误码加默认文案。
//! IO 错误统一通过 [`TunnelError::io`]/[`TunnelError::setup`] 映射，分类规则集中在
//! 本模块，调用方只根据 [`ErrorCategory`] 决定是否重试、是否上报。

use std::borrow::Cow;
use std::io;

use thiserror::Error;

/// 本 crate 及下游 crate 统一使用的返回别名。
pub type Result<T, E = TunnelError> = std::result::Result<T, E>;

/// 错误分类。
///
/// - `Transient`：端点暂不可用，只在建连阶段重试；
/// - `CapacityExceeded`：生产者跑赢消费者，终止会话但不影响进程；
/// - `FatalSetup`：建连阶段的权限/名称错误，终止会话并记录日志；
/// - `FatalTransfer`：传输阶段的 IO 错误，终止会话并释放全部资源；
/// - `Cancelled`：协作式关闭，不视为错误。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    Transient,
    CapacityExceeded,
    FatalSetup,
    FatalTransfer,
    Cancelled,
}

impl ErrorCategory {
    /// 是否需要上报到进程级日志；容量超限与取消属于预期的生命周期事件。
    pub fn is_surfaced(self) -> bool {
        matches!(self, ErrorCategory::FatalSetup | ErrorCategory::FatalTransfer)
    }
}

/// 描述一次底层操作对应的稳定错误码与默认文案。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub const PIPE_OPEN: OperationKind = OperationKind {
    code: "kq.tunnel.pipe.open_failed",
    message: "pipe open",
};
pub const PIPE_CREATE: OperationKind = OperationKind {
    code: "kq.tunnel.pipe.create_failed",
    message: "pipe create",
};
pub const PIPE_ACCEPT: OperationKind = OperationKind {
    code: "kq.tunnel.pipe.accept_failed",
    message: "pipe accept",
};
pub const STREAM_READ: OperationKind = OperationKind {
    code: "kq.tunnel.stream.read_failed",
    message: "stream read",
};
pub const STREAM_WRITE: OperationKind = OperationKind {
    code: "kq.tunnel.stream.write_failed",
    message: "stream write",
};
pub const CHANNEL_EGRESS: OperationKind = OperationKind {
    code: "kq.tunnel.channel.egress_failed",
    message: "channel egress",
};
pub const CHANNEL_OPEN: OperationKind = OperationKind {
    code: "kq.tunnel.channel.open_failed",
    message: "virtual channel open",
};
pub const QUEUE_PUSH: OperationKind = OperationKind {
    code: "kq.tunnel.queue.push_failed",
    message: "relay queue push",
};
pub const TCP_BIND: OperationKind = OperationKind {
    code: "kq.tunnel.tcp.bind_failed",
    message: "tcp bind",
};
pub const TCP_ACCEPT: OperationKind = OperationKind {
    code: "kq.tunnel.tcp.accept_failed",
    message: "tcp accept",
};
pub const TCP_CONNECT: OperationKind = OperationKind {
    code: "kq.tunnel.tcp.connect_failed",
    message: "tcp connect",
};
pub const RELAY_COPY: OperationKind = OperationKind {
    code: "kq.tunnel.relay.copy_failed",
    message: "relay copy",
};
pub const WORKER_SPAWN: OperationKind = OperationKind {
    code: "kq.tunnel.session.spawn_failed",
    message: "session worker spawn",
};

/// 隧道统一错误类型。
#[derive(Debug, Error)]
#[error("[{code}] {message}")]
pub struct TunnelError {
    code: &'static str,
    message: Cow<'static, str>,
    category: ErrorCategory,
    #[source]
    source: Option<io::Error>,
}

impl TunnelError {
    /// 以显式分类构造错误。
    pub fn new(
        kind: OperationKind,
        category: ErrorCategory,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: kind.code,
            message: message.into(),
            category,
            source: None,
        }
    }

    /// 传输阶段的 IO 错误映射。
    pub fn io(kind: OperationKind, error: io::Error) -> Self {
        let category = categorize_io_error(&error);
        Self::with_source(kind, category, error)
    }

    /// 建连阶段的 IO 错误映射：非瞬态即 `FatalSetup`。
    pub fn setup(kind: OperationKind, error: io::Error) -> Self {
        let category = if is_transient_connect_error(&error) {
            ErrorCategory::Transient
        } else {
            ErrorCategory::FatalSetup
        };
        Self::with_source(kind, category, error)
    }

    /// 构造容量超限错误。
    pub fn capacity_exceeded(requested: usize, capacity: usize) -> Self {
        Self::new(
            QUEUE_PUSH,
            ErrorCategory::CapacityExceeded,
            format!("relay queue push of {requested} bytes would exceed {capacity} bytes"),
        )
    }

    fn with_source(kind: OperationKind, category: ErrorCategory, error: io::Error) -> Self {
        Self {
            code: kind.code,
            message: Cow::Owned(format!("{}: {}", kind.message, error)),
            category,
            source: Some(error),
        }
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    pub fn is_transient(&self) -> bool {
        self.category == ErrorCategory::Transient
    }
}

/// 建连阶段的瞬态判定：端点尚不存在或暂时繁忙。
///
/// Windows 命名管道的 `ERROR_PIPE_BUSY`（231）表示唯一实例正被占用；
/// Unix 套接字路径存在但无人监听时表现为 `ConnectionRefused`。
pub fn is_transient_connect_error(error: &io::Error) -> bool {
    const ERROR_PIPE_BUSY: i32 = 231;
    if cfg!(windows) && error.raw_os_error() == Some(ERROR_PIPE_BUSY) {
        return true;
    }
    matches!(
        error.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused | io::ErrorKind::WouldBlock
    )
}

fn categorize_io_error(error: &io::Error) -> ErrorCategory {
    use io::ErrorKind;
    match error.kind() {
        ErrorKind::WouldBlock | ErrorKind::Interrupted => ErrorCategory::Transient,
        ErrorKind::OutOfMemory => ErrorCategory::CapacityExceeded,
        _ => ErrorCategory::FatalTransfer,
    }
}
