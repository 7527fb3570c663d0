//! 进程入口的 `tracing` 订阅者安装。

use thiserror::Error;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Error)]
pub enum TelemetryError {
    /// 全局订阅者已由宿主或先前调用设置。
    #[error("global tracing subscriber already installed: {0}")]
    AlreadyInstalled(#[from] tracing_subscriber::util::TryInitError),
}

/// 安装 `fmt` 输出层；`RUST_LOG` 未设置时使用 `default_directive`（如 `"info"`）。
pub fn install(default_directive: &str) -> Result<(), TelemetryError> {
    tracing_subscriber::registry()
        .with(build_env_filter(default_directive))
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()?;
    tracing::debug!(default_directive, "tracing subscriber installed");
    Ok(())
}

fn build_env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}
