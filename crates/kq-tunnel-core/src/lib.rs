#![deny(unsafe_code)]
#![doc = r#"
# kq-tunnel-core

## 定位（Why）
- 为隧道的三个进程（client、通道适配器、server）提供共同语言：
  取消原语、错误分类、配置以及众所周知的端点名称。
- 适配器引擎（`kq-tunnel-bridge`）与 TCP 中继（`kq-tunnel-relay`）只依赖本 crate
  交换语义，彼此之间没有直接依赖。

## 契约（What）
- [`Cancellation`]：每个会话一个，置位一次、可多次冗余置位，并记录首个原因；
- [`TunnelError`]/[`ErrorCategory`]：携带稳定错误码与五类错误分类（瞬态、容量超限、建连致命、传输致命、取消）；
- [`BridgeConfig`]：适配器引擎的参数，默认值即参考尺寸；
- [`protocol`]：通道名、管道名、默认端口与读帧头剥离规则；
- [`telemetry::install`]：进程入口安装 `tracing` 订阅者。
"#]

pub mod config;
pub mod contract;
pub mod error;
pub mod protocol;
pub mod telemetry;

pub use config::{BridgeConfig, ConfigError};
pub use contract::{CancelReason, Cancellation};
pub use error::{ErrorCategory, OperationKind, Result, TunnelError};
pub use protocol::ReadFraming;
