#![doc = r#"
# kq-tunnel-relay

## 设计动机（Why）
- 客户端与服务端进程都只需要“一条 TCP 连接对一条字节流”的简单双工转发，
  不承担引擎那样的队列、反压与取消排空职责。

## 核心契约（What）
- [`TcpAcceptor`] / [`dial`]：单连接的 TCP 接入与拨出，错误带稳定错误码；
- [`duplex_relay`]：两个互不协调的拷贝循环，只共享一个存活信号；
- [`PipeHost`]：客户端进程等待通道适配器连入的管道服务端；
- [`vchannel::open`]：服务端进程打开动态虚拟通道（仅 Windows）。
"#]
#![deny(unsafe_code)]

pub mod pipe;
pub mod relay;
pub mod tcp;
pub mod vchannel;

pub use pipe::{PipeHost, PipeStream};
pub use relay::{DirectionReport, RelayOptions, RelayReport, duplex_relay};
pub use tcp::{TcpAcceptor, TcpSocketConfig, dial};
pub use vchannel::{ChannelStream, VirtualChannel};
