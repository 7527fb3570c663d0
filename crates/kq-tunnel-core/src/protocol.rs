//! 三个进程共享的众所周知的标识与尺寸。

/// 动态虚拟通道名称，适配器监听与 server 打开时使用同一名称。
pub const CHANNEL_NAME: &str = "KQTUNNEL";

/// client 创建、适配器连接的命名管道。
#[cfg(windows)]
pub const PIPE_NAME: &str = r"\\.\pipe\kq-tunnel";

/// 非 Windows 平台使用 Unix 域套接字替代命名管道，文件名位于临时目录。
#[cfg(not(windows))]
pub const PIPE_NAME: &str = "kq-tunnel.sock";

/// client `listen` 模式的默认本地端口。
pub const DEFAULT_LOCAL_PORT: u16 = 2222;

/// server `connect` 模式的默认目标。
pub const DEFAULT_TARGET_HOST: &str = "127.0.0.1";
pub const DEFAULT_TARGET_PORT: u16 = 22;

/// 单次读操作的缓冲区大小。
pub const BUFFER_SIZE: usize = 8192;

/// 虚拟通道文件句柄每次读取在负载前附带的 `CHANNEL_PDU_HEADER` 长度；写入不需要该头。
pub const CHANNEL_PDU_HEADER_LEN: usize = 8;

/// 返回本平台上管道端点的完整路径。
pub fn default_pipe_path() -> String {
    #[cfg(windows)]
    {
        PIPE_NAME.to_owned()
    }
    #[cfg(not(windows))]
    {
        std::env::temp_dir()
            .join(PIPE_NAME)
            .to_string_lossy()
            .into_owned()
    }
}

/// 读路径的帧头处理规则。
///
/// `StripHeader(n)`：每次读取的前 `n` 字节为帧头，长度不超过 `n` 的读取视为空。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReadFraming {
    #[default]
    None,
    StripHeader(usize),
}

impl ReadFraming {
    /// 从一次读取的有效字节中切出负载。
    pub fn payload<'a>(&self, read: &'a [u8]) -> &'a [u8] {
        match *self {
            ReadFraming::None => read,
            ReadFraming::StripHeader(len) if read.len() <= len => &[],
            ReadFraming::StripHeader(len) => &read[len..],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_header_yields_payload_of_full_read() {
        let read = vec![0xAB; BUFFER_SIZE];
        let framing = ReadFraming::StripHeader(CHANNEL_PDU_HEADER_LEN);
        assert_eq!(framing.payload(&read).len(), 8184);
    }

    #[test]
    fn read_at_or_below_header_is_empty() {
        let framing = ReadFraming::StripHeader(CHANNEL_PDU_HEADER_LEN);
        assert!(framing.payload(&[1, 2, 3, 4, 5, 6, 7, 8]).is_empty());
        assert!(framing.payload(&[1, 2, 3]).is_empty());
        assert_eq!(framing.payload(&[0, 0, 0, 0, 0, 0, 0, 0, 9]), &[9]);
    }

    #[test]
    fn no_framing_passes_through() {
        assert_eq!(ReadFraming::None.payload(&[1, 2]), &[1, 2]);
    }
}
