//! 适配器引擎配置。
//!
//! 宿主进程没有命令行，配置来自 `KQ_TUNNEL_CONFIG` 指向的 TOML 文件；
//! 变量缺失时使用参考尺寸作为默认值。所有字段均可省略。
//!
//! ```toml
//! pipe_name = '\\.\pipe\kq-tunnel'
//! queue_capacity = 33554432
//! read_buffer_size = 8192
//! connect_retry_interval_ms = 500
//! read_header_len = 0
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::protocol::{self, ReadFraming};

/// 指向配置文件的环境变量名。
pub const CONFIG_ENV: &str = "KQ_TUNNEL_CONFIG";

/// 中继队列的默认上限 `Qmax`：32 MiB。
pub const DEFAULT_QUEUE_CAPACITY: usize = 32 * 1024 * 1024;

/// 建连重试的固定间隔。
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// 配置加载失败。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file `{}`: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config field `{field}`: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

/// 单个桥接会话的参数。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// 双工流端点名称（Windows 命名管道名或 Unix 套接字路径）。
    pub pipe_name: String,
    /// 队列上限 `Qmax`，单位字节。
    pub queue_capacity: usize,
    /// 每次读操作的缓冲区大小。
    pub read_buffer_size: usize,
    /// 建连遇到瞬态错误后的等待间隔。
    pub connect_retry_interval_ms: u64,
    /// 每次读取需要剥离的帧头长度，0 表示不剥离。
    pub read_header_len: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            pipe_name: protocol::default_pipe_path(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            read_buffer_size: protocol::BUFFER_SIZE,
            connect_retry_interval_ms: DEFAULT_RETRY_INTERVAL.as_millis() as u64,
            read_header_len: 0,
        }
    }
}

impl BridgeConfig {
    /// 解析 TOML 文本并校验。
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// 从文件加载。
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// 若设置了 [`CONFIG_ENV`] 则从对应文件加载，否则返回默认值。
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(PathBuf::from(path)),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipe_name.is_empty() {
            return Err(ConfigError::Invalid {
                field: "pipe_name",
                reason: "must not be empty",
            });
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "queue_capacity",
                reason: "must be greater than zero",
            });
        }
        if self.read_buffer_size == 0 {
            return Err(ConfigError::Invalid {
                field: "read_buffer_size",
                reason: "must be greater than zero",
            });
        }
        if self.read_header_len >= self.read_buffer_size {
            return Err(ConfigError::Invalid {
                field: "read_header_len",
                reason: "must be smaller than read_buffer_size",
            });
        }
        Ok(())
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.connect_retry_interval_ms)
    }

    pub fn read_framing(&self) -> ReadFraming {
        match self.read_header_len {
            0 => ReadFraming::None,
            len => ReadFraming::StripHeader(len),
        }
    }
}
