//! 块设备核心类型

use crate::error::{Error, ErrorKind, Result};
use std::sync::Mutex;

/// 块设备接口
///
/// 即设备驱动提供的 I/O 过程：以物理扇区为单位读写。
/// 缓存在持有控制块锁的情况下调用这些方法，设备延迟对缓存不透明。
///
/// # 示例
///
/// ```rust,ignore
/// use vfs_bcm::{BlockDevice, Result};
///
/// struct MyDevice {
///     // ...
/// }
///
/// impl BlockDevice for MyDevice {
///     fn sector_size(&self) -> usize {
///         512
///     }
///
///     fn read_sectors(&self, sector: u32, count: u16, buf: &mut [u8]) -> Result<()> {
///         // 实现扇区读取
///         Ok(())
///     }
///
///     fn write_sectors(&self, sector: u32, count: u16, buf: &[u8]) -> Result<()> {
///         // 实现扇区写入
///         Ok(())
///     }
/// }
/// ```
pub trait BlockDevice: Send + Sync {
    /// 物理扇区大小（字节）
    fn sector_size(&self) -> usize;

    /// 读取扇区
    ///
    /// # 参数
    ///
    /// * `sector` - 起始扇区号
    /// * `count` - 要读取的扇区数
    /// * `buf` - 目标缓冲区（大小至少为 count * sector_size）
    fn read_sectors(&self, sector: u32, count: u16, buf: &mut [u8]) -> Result<()>;

    /// 写入扇区
    ///
    /// # 参数
    ///
    /// * `sector` - 起始扇区号
    /// * `count` - 要写入的扇区数
    /// * `buf` - 源缓冲区（大小至少为 count * sector_size）
    fn write_sectors(&self, sector: u32, count: u16, buf: &[u8]) -> Result<()>;
}

/// 内存块设备
///
/// 以一块连续内存模拟扇区设备，适合测试以及没有真实驱动的场景。
pub struct RamDisk {
    sector_size: usize,
    total_sectors: u32,
    storage: Mutex<Vec<u8>>,
}

impl RamDisk {
    /// 创建内存块设备
    ///
    /// # 参数
    ///
    /// * `sector_size` - 扇区大小（字节）
    /// * `total_sectors` - 扇区总数
    pub fn new(sector_size: usize, total_sectors: u32) -> Self {
        Self {
            sector_size,
            total_sectors,
            storage: Mutex::new(vec![0u8; sector_size * total_sectors as usize]),
        }
    }

    /// 扇区总数
    pub fn total_sectors(&self) -> u32 {
        self.total_sectors
    }

    /// 计算一次请求覆盖的字节范围，越界时返回错误
    fn span(&self, sector: u32, count: u16, buf_len: usize) -> Result<(usize, usize)> {
        let end_sector = sector as u64 + count as u64;
        if end_sector > self.total_sectors as u64 {
            return Err(Error::new(ErrorKind::Io, "sector out of device range"));
        }
        let len = count as usize * self.sector_size;
        if buf_len < len {
            return Err(Error::new(ErrorKind::InvalidInput, "buffer too small for request"));
        }
        Ok((sector as usize * self.sector_size, len))
    }
}

impl BlockDevice for RamDisk {
    fn sector_size(&self) -> usize {
        self.sector_size
    }

    fn read_sectors(&self, sector: u32, count: u16, buf: &mut [u8]) -> Result<()> {
        let (start, len) = self.span(sector, count, buf.len())?;
        let storage = self
            .storage
            .lock()
            .map_err(|_| Error::new(ErrorKind::Internal, "ram disk lock poisoned"))?;
        buf[..len].copy_from_slice(&storage[start..start + len]);
        Ok(())
    }

    fn write_sectors(&self, sector: u32, count: u16, buf: &[u8]) -> Result<()> {
        let (start, len) = self.span(sector, count, buf.len())?;
        let mut storage = self
            .storage
            .lock()
            .map_err(|_| Error::new(ErrorKind::Internal, "ram disk lock poisoned"))?;
        storage[start..start + len].copy_from_slice(&buf[..len]);
        Ok(())
    }
}
