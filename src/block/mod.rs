//! 块设备抽象
//!
//! 提供缓存所消费的外部协作者接口：
//! - block/device.rs 定义设备 I/O 过程（扇区读写）
//! - block/disk.rs 定义磁盘句柄表项和挂载表，缓存只通过 "路径 → 句柄 → 设备" 这条窄接口访问挂载层
//! - block/lock.rs 提供设备层锁的有序获取

mod device;
mod disk;
mod lock;

pub use device::{BlockDevice, RamDisk};
pub use disk::{Disk, DiskTable, MountTable};
pub use lock::DevLayerGuard;

pub(crate) use lock::acquire;
