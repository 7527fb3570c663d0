//! 服务端进程一侧的动态虚拟通道。
//!
//! 通道以名称在当前远程会话中打开，随后取出其文件句柄并复制一份，
//! 复制出的句柄注册到 tokio 的 IOCP 驱动上进行异步读写。
//! 每次读取都带有 8 字节的通道 PDU 头，写入则不需要头部，
//! 剥离由调用方通过 [`ReadFraming`](kq_tunnel_core::ReadFraming) 完成。

use kq_tunnel_core::{ErrorCategory, TunnelError, error};

#[cfg(windows)]
pub type ChannelStream = tokio::net::windows::named_pipe::NamedPipeClient;
#[cfg(not(windows))]
pub type ChannelStream = tokio::io::DuplexStream;

fn open_failed(stage: &str, err: impl std::fmt::Display) -> TunnelError {
    TunnelError::new(
        error::CHANNEL_OPEN,
        ErrorCategory::FatalSetup,
        format!("{} ({stage}): {err}", error::CHANNEL_OPEN.message),
    )
}

/// 已打开的动态虚拟通道。
///
/// 字段按声明顺序释放：先关闭复制出的文件句柄，再关闭通道本身。
#[cfg(windows)]
pub struct VirtualChannel {
    file: ChannelStream,
    _channel: imp::WtsChannel,
}

#[cfg(not(windows))]
pub struct VirtualChannel {
    never: std::convert::Infallible,
}

impl VirtualChannel {
    /// 通道的异步字节流视图。
    pub fn stream(&mut self) -> &mut ChannelStream {
        #[cfg(windows)]
        {
            &mut self.file
        }
        #[cfg(not(windows))]
        {
            match self.never {}
        }
    }
}

impl std::fmt::Debug for VirtualChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualChannel").finish_non_exhaustive()
    }
}

/// 在当前远程会话中打开名为 `name` 的动态虚拟通道。
#[cfg(windows)]
pub fn open(name: &str) -> Result<VirtualChannel, TunnelError> {
    let (channel, file) = imp::open(name)?;
    tracing::info!(channel = name, "dynamic virtual channel opened");
    Ok(VirtualChannel {
        file,
        _channel: channel,
    })
}

/// 动态虚拟通道只存在于 Windows 远程桌面会话中。
#[cfg(not(windows))]
pub fn open(name: &str) -> Result<VirtualChannel, TunnelError> {
    Err(open_failed(
        name,
        "dynamic virtual channels are only available inside a Windows remote desktop session",
    ))
}

#[cfg(windows)]
#[allow(unsafe_code)]
mod imp {
    use std::ffi::{CString, c_void};
    use std::io;
    use std::os::windows::io::RawHandle;
    use std::ptr;

    use kq_tunnel_core::TunnelError;
    use tokio::net::windows::named_pipe::NamedPipeClient;
    use windows_sys::Win32::Foundation::{DUPLICATE_SAME_ACCESS, DuplicateHandle, HANDLE};
    use windows_sys::Win32::System::RemoteDesktop::{
        WTS_CHANNEL_OPTION_DYNAMIC, WTS_CURRENT_SESSION, WTSFreeMemory, WTSVirtualChannelClose,
        WTSVirtualChannelOpenEx, WTSVirtualChannelQuery, WTSVirtualFileHandle,
    };
    use windows_sys::Win32::System::Threading::GetCurrentProcess;

    use super::open_failed;

    /// `WTSVirtualChannelOpenEx` 返回的通道句柄。
    pub(super) struct WtsChannel(HANDLE);

    // SAFETY: 通道句柄是进程级内核对象引用，不绑定创建线程。
    unsafe impl Send for WtsChannel {}

    impl Drop for WtsChannel {
        fn drop(&mut self) {
            // SAFETY: 句柄由 `open` 独占持有，只在此处关闭一次。
            unsafe {
                WTSVirtualChannelClose(self.0);
            }
        }
    }

    pub(super) fn open(name: &str) -> Result<(WtsChannel, NamedPipeClient), TunnelError> {
        let c_name = CString::new(name).map_err(|err| open_failed("name", err))?;

        // SAFETY: `c_name` 在调用期间保持有效且以 NUL 结尾。
        let raw = unsafe {
            WTSVirtualChannelOpenEx(
                WTS_CURRENT_SESSION,
                c_name.as_ptr().cast(),
                WTS_CHANNEL_OPTION_DYNAMIC,
            )
        };
        if raw.is_null() {
            return Err(open_failed("WTSVirtualChannelOpenEx", io::Error::last_os_error()));
        }
        let channel = WtsChannel(raw);

        let mut buffer: *mut c_void = ptr::null_mut();
        let mut returned = 0u32;
        // SAFETY: 输出指针均指向本栈帧内的有效变量。
        let queried =
            unsafe { WTSVirtualChannelQuery(channel.0, WTSVirtualFileHandle, &mut buffer, &mut returned) };
        if queried == 0 || buffer.is_null() {
            return Err(open_failed("WTSVirtualChannelQuery", io::Error::last_os_error()));
        }
        if (returned as usize) < size_of::<HANDLE>() {
            // SAFETY: `buffer` 由 WTSVirtualChannelQuery 分配。
            unsafe { WTSFreeMemory(buffer) };
            return Err(open_failed("WTSVirtualChannelQuery", "short file handle buffer"));
        }

        // SAFETY: 查询成功时缓冲区首部即为文件句柄。
        let file = unsafe { buffer.cast::<HANDLE>().read_unaligned() };
        let mut duplicated: HANDLE = ptr::null_mut();
        // SAFETY: 源与目标进程均为当前进程，输出指针有效。
        let ok = unsafe {
            DuplicateHandle(
                GetCurrentProcess(),
                file,
                GetCurrentProcess(),
                &mut duplicated,
                0,
                0,
                DUPLICATE_SAME_ACCESS,
            )
        };
        let duplicate_error = io::Error::last_os_error();
        // SAFETY: 原始句柄已复制，缓冲区不再被引用。
        unsafe { WTSFreeMemory(buffer) };
        if ok == 0 {
            return Err(open_failed("DuplicateHandle", duplicate_error));
        }

        // SAFETY: 复制出的句柄由本进程独占，通道文件句柄以重叠 IO 方式打开，
        // 可以注册到 IOCP。
        let file = unsafe { NamedPipeClient::from_raw_handle(duplicated as RawHandle) }
            .map_err(|err| open_failed("register", err))?;
        Ok((channel, file))
    }
}
