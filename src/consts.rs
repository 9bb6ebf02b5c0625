//! 块缓存常量定义
//!
//! 这个模块包含了 BCM 的编译期常量，包括：
//! - 物理块大小范围
//! - 错误日志队列容量
//! - 多扇区重排序缓冲区的几何参数

//=============================================================================
// 块大小
//=============================================================================

/// 允许的最小物理块大小（512 字节）
pub const BLOCK_SIZE_512B: usize = 512;

/// 允许的最大物理块大小（4096 字节）
pub const BLOCK_SIZE_4K: usize = 4096;

/// 槽位未装载任何块时的块号
pub const UNINITIALIZED_BLOCK: u32 = u32::MAX;

//=============================================================================
// 错误报告
//=============================================================================

/// 错误记录队列容量（条）
///
/// 队列满时新的记录被丢弃，由消费者负责及时读取。
pub const ERROR_LOG_SIZE: usize = 16;

//=============================================================================
// 多扇区重排序缓冲区
//=============================================================================

/// 重排序缓冲区容量（块）
pub const REORDER_BUFFER_BLOCK_COUNT: usize = 32;

/// 单次多扇区传输的最大块数
pub const REORDER_XFER_BLOCK_COUNT: usize = 8;

//=============================================================================
// 后台刷新任务
//=============================================================================

/// 周期刷新线程名
pub const FLUSH_TASK_NAME: &str = "bcm-flush";

//=============================================================================
// 默认配置
//=============================================================================

/// 默认缓存大小（字节）
pub const DEFAULT_CACHE_SIZE: usize = 64 * 1024;

/// 默认低水位（脏块数）
pub const DEFAULT_LOW_THRESHOLD: usize = 8;

/// 默认高水位（脏块数）
pub const DEFAULT_HIGH_THRESHOLD: usize = 32;
