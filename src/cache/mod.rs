//! 设备层块缓存管理器（BCM）
//!
//! 位于挂载表/文件描述符层与块设备驱动之间的 LRU 写回缓存。
//!
//! # 主要组件
//!
//! - [`SlotSet`] - 固定数量、固定大小的块槽位
//! - [`OrderedList`] - 槽位下标上的 LRU 双向链表
//! - `CacheControl` - 每个被缓存设备一个的控制块（替换引擎、读写分派、阈值处理、刷新）
//! - `flush_task` - 由 [`EventGroup`] 驱动的周期/异步刷新线程
//! - [`ErrorQueue`] - 后台 I/O 错误的有界报告通道
//! - [`BlockCacheManager`] - 缓存注册表与对外接口
//! - `ReorderBuffer` - 可选的多扇区重排序缓冲区
//!
//! # 数据流
//!
//! ```text
//! read/write(dh, sector, buf, count)
//!   └─ 注册表查找 dh ──无缓存──▶ 设备 I/O 过程（整段一次调用）
//!        └─ 控制块（逐扇区）
//!             ├─ 命中：复制并提升为 MRU
//!             └─ 未命中：读直接走设备；写分配槽位（必要时替换）
//!                  └─ 写回 ─▶ DeviceIo ─▶ [ReorderBuffer] ─▶ 设备
//! ```
//!
//! # 使用示例
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vfs_bcm::{BlockCacheManager, CacheConfig, CacheType, DiskTable, RamDisk};
//!
//! let table = Arc::new(DiskTable::new());
//! let dh = table.mount("A", Arc::new(RamDisk::new(512, 4096)), None)?;
//! let manager = BlockCacheManager::new(table);
//!
//! manager.create("A:", CacheType::DeviceLayerLru, &CacheConfig::default())?;
//! manager.write(dh, 10, &[0xAB; 512], 1)?;
//! manager.flush("A:")?;
//! manager.destroy("A:")?;
//! ```

mod control;
mod device_io;
mod errlog;
mod event;
mod flush_task;
mod list;
mod registry;
mod reorder;
mod slot;

pub use control::CacheStats;
pub use errlog::{ErrorQueue, ErrorRecord};
pub use event::{EventGroup, FlushEvents, Retrieved};
pub use list::OrderedList;
pub use registry::{init, manager, BlockCacheManager};
pub use slot::{BlockState, Slot, SlotSet, SlotState};
