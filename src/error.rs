//! 错误类型定义
//!
//! 提供块缓存管理器（BCM）各操作的错误类型。

use core::fmt;

/// BCM 操作错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    message: &'static str,
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// 设备 I/O 错误
    Io,
    /// 无效参数（阈值颠倒、越界、缓冲区过小等）
    InvalidInput,
    /// 驱动器未挂载或设备信息无效
    BadDrive,
    /// 资源不可用（已有缓存、无缓存、无空闲槽位）
    Unavailable,
    /// 内存不足
    NoMemory,
    /// 内部不变量被破坏（锁中毒等）
    Internal,
}

impl Error {
    /// 创建新错误
    pub const fn new(kind: ErrorKind, message: &'static str) -> Self {
        Self { kind, message }
    }

    /// 获取错误类型
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// 获取错误消息
    pub const fn message(&self) -> &'static str {
        self.message
    }

    /// 是否为设备 I/O 错误
    pub fn is_io(&self) -> bool {
        self.kind == ErrorKind::Io
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

/// Result 类型别名
pub type Result<T> = core::result::Result<T, Error>;
