//! vfs_bcm: 设备层块缓存管理器
//!
//! 位于挂载表/文件描述符层与块设备驱动之间的 LRU 写回缓存，提供：
//! - **可配置的高低水位**：脏块达到高水位时写回到低水位
//! - **周期/异步刷新**：每个缓存一个由事件驱动的后台刷新线程
//! - **异步错误报告**：后台写回失败以错误记录的形式进入有界队列
//! - **可选的多扇区重排序**：把连续块的写回合并成一次多扇区写
//!
//! # 示例
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vfs_bcm::{CacheConfig, CacheType, DiskTable, RamDisk, Result};
//!
//! fn main() -> Result<()> {
//!     let table = Arc::new(DiskTable::new());
//!     let dh = table.mount("A", Arc::new(RamDisk::new(512, 8192)), None)?;
//!
//!     let bcm = vfs_bcm::init(table)?;
//!     bcm.create("A:", CacheType::DeviceLayerLru, &CacheConfig::default())?;
//!
//!     let mut buf = vec![0u8; 512];
//!     bcm.write(dh, 0, &buf, 1)?;
//!     bcm.read(dh, 0, &mut buf, 1)?;
//!
//!     while let Some(record) = bcm.errors().try_recv() {
//!         log::warn!("{:?} failed on block {}", record.operation, record.block);
//!     }
//!     bcm.destroy("A:")
//! }
//! ```
//!
//! # 模块结构
//!
//! - [`error`] - 错误类型定义
//! - [`block`] - 块设备、磁盘句柄与设备层锁
//! - [`consts`] - 常量定义
//! - [`types`] - 配置与公共数据类型
//! - [`cache`] - 块缓存管理器

#![deny(unsafe_code)]
#![warn(missing_docs)]

// ===== 核心模块 =====

/// 错误处理
pub mod error;

/// 块设备抽象
pub mod block;

/// 常量定义
pub mod consts;

/// 数据结构定义
pub mod types;

/// 块缓存
pub mod cache;

#[cfg(test)]
mod testing;

// ===== 公共导出 =====

// 错误处理
pub use error::{Error, ErrorKind, Result};

// 块设备
pub use block::{BlockDevice, DevLayerGuard, Disk, DiskTable, MountTable, RamDisk};

// 配置
pub use types::{CacheConfig, CacheType, DiskHandle, ErrorOperation};

// Cache
pub use cache::{init, manager, BlockCacheManager, CacheStats, ErrorQueue, ErrorRecord};
