//! 磁盘句柄与挂载表
//!
//! 缓存只通过一个很窄的接口使用挂载层：
//! - 路径 → 磁盘句柄（[`MountTable::resolve`]）
//! - 磁盘句柄 → 设备 I/O 过程、扇区大小和设备层锁（[`MountTable::disk`]）

use super::lock::acquire;
use super::BlockDevice;
use crate::error::{Error, ErrorKind, Result};
use crate::types::DiskHandle;
use std::sync::{Arc, Mutex};

/// 磁盘句柄表项
pub struct Disk {
    handle: DiskHandle,
    mount_name: String,
    device: Arc<dyn BlockDevice>,
    device_lock: Option<Arc<Mutex<()>>>,
    vfs_lock: Mutex<()>,
}

impl Disk {
    /// 创建磁盘表项（无设备自带锁）
    pub fn new(handle: DiskHandle, mount_name: &str, device: Arc<dyn BlockDevice>) -> Self {
        Self {
            handle,
            mount_name: mount_name.to_string(),
            device,
            device_lock: None,
            vfs_lock: Mutex::new(()),
        }
    }

    /// 附加设备自带的锁
    ///
    /// 多个磁盘共享同一硬件时，可以传入同一把锁。
    pub fn with_device_lock(mut self, lock: Arc<Mutex<()>>) -> Self {
        self.device_lock = Some(lock);
        self
    }

    /// 磁盘句柄
    pub fn handle(&self) -> DiskHandle {
        self.handle
    }

    /// 挂载名（如 `"A"`）
    pub fn mount_name(&self) -> &str {
        &self.mount_name
    }

    /// 设备 I/O 过程
    pub fn device(&self) -> &Arc<dyn BlockDevice> {
        &self.device
    }

    /// 物理扇区大小
    pub fn sector_size(&self) -> usize {
        self.device.sector_size()
    }

    /// 设备自带的锁
    pub fn device_lock(&self) -> Option<&Mutex<()>> {
        self.device_lock.as_deref()
    }

    /// VFS 内部的每句柄锁
    pub fn vfs_lock(&self) -> &Mutex<()> {
        &self.vfs_lock
    }
}

impl core::fmt::Debug for Disk {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Disk")
            .field("handle", &self.handle)
            .field("mount_name", &self.mount_name)
            .field("sector_size", &self.sector_size())
            .field("device_lock", &self.device_lock.is_some())
            .finish()
    }
}

/// 挂载表接口
pub trait MountTable: Send + Sync {
    /// 将路径解析为磁盘句柄
    ///
    /// 驱动器未挂载时返回 `BadDrive`。
    fn resolve(&self, path: &str) -> Result<DiskHandle>;

    /// 取得磁盘句柄对应的表项
    ///
    /// 未知句柄返回 `InvalidInput`。
    fn disk(&self, dh: DiskHandle) -> Result<Arc<Disk>>;
}

/// 从路径中取出驱动器名：`"A:"`、`"a:\\dir"` 都得到 `"A"`
fn drive_name(path: &str) -> &str {
    match path.find(':') {
        Some(pos) => &path[..pos],
        None => path,
    }
}

/// 内存挂载表
///
/// 以挂载名（驱动器名）为键，按挂载顺序分配磁盘句柄。
#[derive(Default)]
pub struct DiskTable {
    disks: Mutex<Vec<Arc<Disk>>>,
    next_handle: Mutex<DiskHandle>,
}

impl DiskTable {
    /// 创建空挂载表
    pub fn new() -> Self {
        Self::default()
    }

    /// 挂载设备
    ///
    /// # 参数
    ///
    /// * `name` - 挂载名（驱动器名，不含冒号）
    /// * `device` - 设备 I/O 过程
    /// * `device_lock` - 设备自带的锁（可选）
    ///
    /// # 返回
    ///
    /// 新分配的磁盘句柄；挂载名重复时返回 `Unavailable`
    pub fn mount(
        &self,
        name: &str,
        device: Arc<dyn BlockDevice>,
        device_lock: Option<Arc<Mutex<()>>>,
    ) -> Result<DiskHandle> {
        let name = drive_name(name);
        if name.is_empty() {
            return Err(Error::new(ErrorKind::InvalidInput, "empty mount name"));
        }

        let mut disks = acquire(&self.disks, "mount table")?;
        if disks.iter().any(|d| d.mount_name().eq_ignore_ascii_case(name)) {
            return Err(Error::new(ErrorKind::Unavailable, "drive already mounted"));
        }

        let mut next = acquire(&self.next_handle, "mount table")?;
        let handle = *next;
        *next = next
            .checked_add(1)
            .ok_or(Error::new(ErrorKind::NoMemory, "disk handles exhausted"))?;

        let mut disk = Disk::new(handle, name, device);
        if let Some(lock) = device_lock {
            disk = disk.with_device_lock(lock);
        }
        disks.push(Arc::new(disk));
        log::debug!("[MOUNT] mounted {}: as dh={}", name, handle);
        Ok(handle)
    }

    /// 卸载设备
    ///
    /// 调用方负责在卸载前销毁该设备上的缓存。
    pub fn unmount(&self, path: &str) -> Result<()> {
        let name = drive_name(path);
        let mut disks = acquire(&self.disks, "mount table")?;
        let pos = disks
            .iter()
            .position(|d| d.mount_name().eq_ignore_ascii_case(name))
            .ok_or(Error::new(ErrorKind::BadDrive, "drive not mounted"))?;
        disks.remove(pos);
        Ok(())
    }
}

impl MountTable for DiskTable {
    fn resolve(&self, path: &str) -> Result<DiskHandle> {
        let name = drive_name(path);
        let disks = acquire(&self.disks, "mount table")?;
        disks
            .iter()
            .find(|d| d.mount_name().eq_ignore_ascii_case(name))
            .map(|d| d.handle())
            .ok_or(Error::new(ErrorKind::BadDrive, "drive not mounted"))
    }

    fn disk(&self, dh: DiskHandle) -> Result<Arc<Disk>> {
        let disks = acquire(&self.disks, "mount table")?;
        disks
            .iter()
            .find(|d| d.handle() == dh)
            .cloned()
            .ok_or(Error::new(ErrorKind::InvalidInput, "unknown disk handle"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::RamDisk;

    fn ram() -> Arc<dyn BlockDevice> {
        Arc::new(RamDisk::new(512, 64))
    }

    #[test]
    fn test_drive_name() {
        assert_eq!(drive_name("A:"), "A");
        assert_eq!(drive_name("b:\\dir\\file"), "b");
        assert_eq!(drive_name("C"), "C");
    }

    #[test]
    fn test_mount_and_resolve() {
        let table = DiskTable::new();
        let a = table.mount("A", ram(), None).unwrap();
        let b = table.mount("B:", ram(), None).unwrap();
        assert_ne!(a, b);

        assert_eq!(table.resolve("A:").unwrap(), a);
        assert_eq!(table.resolve("b:\\x").unwrap(), b);
        assert_eq!(table.disk(b).unwrap().mount_name(), "B");
        assert_eq!(table.disk(a).unwrap().sector_size(), 512);
    }

    #[test]
    fn test_unmounted_is_bad_drive() {
        let table = DiskTable::new();
        let err = table.resolve("Z:").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadDrive);
        assert_eq!(table.unmount("Z:").unwrap_err().kind(), ErrorKind::BadDrive);
    }

    #[test]
    fn test_duplicate_mount_rejected() {
        let table = DiskTable::new();
        table.mount("A", ram(), None).unwrap();
        let err = table.mount("a:", ram(), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
    }

    #[test]
    fn test_unknown_handle() {
        let table = DiskTable::new();
        assert_eq!(table.disk(7).unwrap_err().kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_unmount() {
        let table = DiskTable::new();
        let dh = table.mount("A", ram(), None).unwrap();
        table.unmount("A:").unwrap();
        assert_eq!(table.resolve("A:").unwrap_err().kind(), ErrorKind::BadDrive);
        assert!(table.disk(dh).is_err());
    }
}
