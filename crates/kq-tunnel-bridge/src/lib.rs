#![doc = r#"
# kq-tunnel-bridge

## 设计动机（Why）
- 远程桌面客户端进程通过回调把动态虚拟通道的数据“推”给适配器，且不提供任何
  反压手段；命名管道一侧则是需要显式发起、可取消的读写操作。本 crate 负责在两者之间
  搬运字节，并保证顺序、完整性与干净的取消。

## 核心契约（What）
- [`IngressGateway`]：宿主线程调用的入口，`on_data` 只做一次短临界区入队，绝不阻塞；
  `on_close` 触发取消并恰好一次释放通道引用；
- [`BoundedRelayQueue`]：互斥保护的字节缓冲，超过 `Qmax` 的入队被拒绝并取消会话；
- [`StreamConnector`]：对瞬态的“端点尚不存在”按固定间隔重试，随时可被取消；
- [`BridgeReactor`]：单线程事件循环，复用取消、读完成、队列就绪、写完成四个事件源；
- [`BridgeSession`]：把上述组件串成一个会话，可在专用工作线程上运行；
- [`ChannelListener`]：新通道到来时为其创建会话并返回入口。

## 实现策略（How）
- 多源等待是一个 `biased` 的 `tokio::select!`，取消总是最先被轮询；
- 读写各自最多一个未完成操作，操作 Future 独占对应的流半部，
  取消时先等待操作交还半部，再关闭流句柄。
"#]

mod channel;
mod connector;
mod endpoint;
mod gateway;
mod listener;
mod pending;
mod queue;
mod reactor;
mod session;

pub use channel::{ChannelError, ChannelLease, PushChannel};
pub use connector::{ConnectOutcome, StreamConnector};
pub use endpoint::{PlatformEndpoint, StreamEndpoint, platform_endpoint};
#[cfg(unix)]
pub use endpoint::UnixSocketEndpoint;
#[cfg(windows)]
pub use endpoint::NamedPipeEndpoint;
pub use gateway::IngressGateway;
pub use listener::ChannelListener;
pub use queue::BoundedRelayQueue;
pub use reactor::{BridgeReactor, ReactorOutcome, ReactorStats};
pub use session::{BridgeSession, SessionExit, SessionHandle, SessionReport};
