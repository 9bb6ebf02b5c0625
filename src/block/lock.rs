//! 设备层锁
//!
//! 每个磁盘句柄最多有两把设备层锁：
//! - 设备自带的锁（可选，用于共享硬件的串行化）
//! - VFS 内部的每句柄锁（总是存在）
//!
//! 固定的获取顺序是：设备层锁 → 控制块锁。注册表锁不与其他锁嵌套等待。

use super::Disk;
use crate::error::{Error, ErrorKind, Result};
use std::sync::{Mutex, MutexGuard};

/// 获取互斥锁
///
/// 锁中毒意味着持锁线程在临界区内 panic，内部状态不再可信，映射为 `Internal`。
pub(crate) fn acquire<'a, T>(mutex: &'a Mutex<T>, what: &'static str) -> Result<MutexGuard<'a, T>> {
    mutex.lock().map_err(|_| {
        log::error!("[BCM] {} lock poisoned", what);
        Error::new(ErrorKind::Internal, "lock poisoned")
    })
}

/// 设备层锁守卫
///
/// 先获取设备自带锁，再获取 VFS 内部锁；drop 时按相反顺序释放。
pub struct DevLayerGuard<'a> {
    // 字段按声明顺序 drop：先释放 VFS 锁，再释放设备锁
    _vfs: MutexGuard<'a, ()>,
    _device: Option<MutexGuard<'a, ()>>,
}

impl<'a> DevLayerGuard<'a> {
    /// 按固定顺序获取磁盘的设备层锁
    ///
    /// VFS 锁获取失败时，已获取的设备锁随局部变量一起释放。
    pub fn obtain(disk: &'a Disk) -> Result<Self> {
        let device = match disk.device_lock() {
            Some(lock) => Some(acquire(lock, "device")?),
            None => None,
        };
        let vfs = acquire(disk.vfs_lock(), "vfs device")?;
        Ok(Self {
            _vfs: vfs,
            _device: device,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::RamDisk;
    use std::sync::Arc;

    #[test]
    fn test_guard_holds_both_locks() {
        let device_lock = Arc::new(Mutex::new(()));
        let disk = Disk::new(0, "A", Arc::new(RamDisk::new(512, 8)))
            .with_device_lock(device_lock.clone());

        {
            let _guard = DevLayerGuard::obtain(&disk).unwrap();
            assert!(device_lock.try_lock().is_err());
            assert!(disk.vfs_lock().try_lock().is_err());
        }

        assert!(device_lock.try_lock().is_ok());
        assert!(disk.vfs_lock().try_lock().is_ok());
    }

    #[test]
    fn test_guard_without_device_lock() {
        let disk = Disk::new(1, "B", Arc::new(RamDisk::new(512, 8)));
        let guard = DevLayerGuard::obtain(&disk).unwrap();
        assert!(disk.vfs_lock().try_lock().is_err());
        drop(guard);
        assert!(disk.vfs_lock().try_lock().is_ok());
    }

    #[test]
    fn test_acquire_poisoned() {
        let mutex = Arc::new(Mutex::new(0u32));
        let poisoner = mutex.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison");
        })
        .join();

        let err = acquire(&mutex, "test").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
