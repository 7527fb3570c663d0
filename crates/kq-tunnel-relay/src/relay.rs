use kq_tunnel_core::protocol::BUFFER_SIZE;
use kq_tunnel_core::{CancelReason, Cancellation, ReadFraming, TunnelError, error};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

/// 双工转发的参数。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RelayOptions {
    /// 施加在“左侧”每次读取上的帧头剥离。
    pub left_framing: ReadFraming,
    pub buffer_size: usize,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            left_framing: ReadFraming::None,
            buffer_size: BUFFER_SIZE,
        }
    }
}

/// 一个方向的转发结果。
#[derive(Debug, Default)]
pub struct DirectionReport {
    pub bytes: u64,
    /// 结束该方向的 IO 错误；对端正常结束或被另一方向叫停时为 `None`。
    pub error: Option<TunnelError>,
}

#[derive(Debug, Default)]
pub struct RelayReport {
    pub left_to_right: DirectionReport,
    pub right_to_left: DirectionReport,
}

/// 在两个双工字节流之间转发，直到任一方向结束。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 进程一侧的转发不需要引擎那样的队列与反压：两个互不协调的拷贝循环足够，
///   它们只共享一个存活信号。
///
/// ## 逻辑 (How)
/// - 两个方向各自循环“读一次、整块写出”，读取与 `liveness` 竞赛；
/// - 读到 EOF、读写出错或观察到 `liveness` 置位时退出，退出时置位 `liveness`
///   并关闭本方向写半部，另一方向随之结束；
/// - 左侧读取经过 `left_framing`：不超过帧头长度的读取视为空读并继续。
///
/// ## 契约 (What)
/// - 返回时两个方向都已结束，`liveness` 已置位；
/// - 各方向字节按读取顺序写出，不做重排。
pub async fn duplex_relay<L, R>(
    left: L,
    right: R,
    options: RelayOptions,
    liveness: &Cancellation,
) -> RelayReport
where
    L: AsyncRead + AsyncWrite + Unpin,
    R: AsyncRead + AsyncWrite + Unpin,
{
    let (left_read, left_write) = tokio::io::split(left);
    let (right_read, right_write) = tokio::io::split(right);
    let buffer_size = options.buffer_size.max(1);

    let (left_to_right, right_to_left) = tokio::join!(
        copy_direction(
            "left->right",
            left_read,
            right_write,
            options.left_framing,
            buffer_size,
            liveness
        ),
        copy_direction(
            "right->left",
            right_read,
            left_write,
            ReadFraming::None,
            buffer_size,
            liveness
        ),
    );
    RelayReport {
        left_to_right,
        right_to_left,
    }
}

async fn copy_direction<Rd, Wr>(
    direction: &'static str,
    mut reader: Rd,
    mut writer: Wr,
    framing: ReadFraming,
    buffer_size: usize,
    liveness: &Cancellation,
) -> DirectionReport
where
    Rd: AsyncRead + Unpin,
    Wr: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size];
    let mut report = DirectionReport::default();

    loop {
        let read = tokio::select! {
            biased;
            _ = liveness.cancelled() => break,
            read = reader.read(&mut buf) => read,
        };
        let read = match read {
            Ok(0) => {
                debug!(direction, "relay source reached end of stream");
                break;
            }
            Ok(read) => read,
            Err(err) => {
                report.error = Some(TunnelError::io(error::RELAY_COPY, err));
                break;
            }
        };
        let payload = framing.payload(&buf[..read]);
        if payload.is_empty() {
            continue;
        }
        if let Err(err) = writer.write_all(payload).await {
            report.error = Some(TunnelError::io(error::RELAY_COPY, err));
            break;
        }
        report.bytes += payload.len() as u64;
    }

    liveness.cancel(CancelReason::StreamEnded);
    let _ = writer.shutdown().await;
    match &report.error {
        Some(err) => info!(direction, bytes = report.bytes, error = %err, "relay direction ended"),
        None => info!(direction, bytes = report.bytes, "relay direction ended"),
    }
    report
}
