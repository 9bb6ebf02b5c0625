//! 测试辅助：可观测、可注入故障的块设备

use crate::block::BlockDevice;
use crate::error::{Error, ErrorKind, Result};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// 记录每次设备访问的内存设备
pub(crate) struct MockDevice {
    sector_size: usize,
    total_sectors: u32,
    storage: Mutex<Vec<u8>>,
    failing: Mutex<BTreeSet<u32>>,
    writes: Mutex<Vec<(u32, u16)>>,
    write_delay: Mutex<Duration>,
    read_calls: AtomicUsize,
    write_calls: AtomicUsize,
}

impl MockDevice {
    pub(crate) fn new(sector_size: usize, total_sectors: u32) -> Self {
        Self {
            sector_size,
            total_sectors,
            storage: Mutex::new(vec![0u8; sector_size * total_sectors as usize]),
            failing: Mutex::new(BTreeSet::new()),
            writes: Mutex::new(Vec::new()),
            write_delay: Mutex::new(Duration::ZERO),
            read_calls: AtomicUsize::new(0),
            write_calls: AtomicUsize::new(0),
        }
    }

    /// 之后任何覆盖 `sector` 的写请求都失败
    pub(crate) fn fail_writes(&self, sector: u32) {
        self.failing.lock().unwrap().insert(sector);
    }

    /// 清除全部写故障
    pub(crate) fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    /// 之后每个写请求先等待 `delay`，模拟慢速设备
    pub(crate) fn set_write_delay(&self, delay: Duration) {
        *self.write_delay.lock().unwrap() = delay;
    }

    pub(crate) fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    /// 成功写请求的 `(起始扇区, 扇区数)` 记录
    pub(crate) fn write_log(&self) -> Vec<(u32, u16)> {
        self.writes.lock().unwrap().clone()
    }

    /// 直接读取设备上的一个扇区
    pub(crate) fn sector(&self, sector: u32) -> Vec<u8> {
        let storage = self.storage.lock().unwrap();
        let start = sector as usize * self.sector_size;
        storage[start..start + self.sector_size].to_vec()
    }

    fn check(&self, sector: u32, count: u16, buf_len: usize) -> Result<(usize, usize)> {
        if sector as u64 + count as u64 > self.total_sectors as u64 {
            return Err(Error::new(ErrorKind::Io, "sector out of device range"));
        }
        let len = count as usize * self.sector_size;
        if buf_len < len {
            return Err(Error::new(ErrorKind::InvalidInput, "buffer too small for request"));
        }
        Ok((sector as usize * self.sector_size, len))
    }
}

impl BlockDevice for MockDevice {
    fn sector_size(&self) -> usize {
        self.sector_size
    }

    fn read_sectors(&self, sector: u32, count: u16, buf: &mut [u8]) -> Result<()> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        let (start, len) = self.check(sector, count, buf.len())?;
        let storage = self.storage.lock().unwrap();
        buf[..len].copy_from_slice(&storage[start..start + len]);
        Ok(())
    }

    fn write_sectors(&self, sector: u32, count: u16, buf: &[u8]) -> Result<()> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.write_delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let (start, len) = self.check(sector, count, buf.len())?;
        {
            let failing = self.failing.lock().unwrap();
            if (sector..sector + count as u32).any(|s| failing.contains(&s)) {
                return Err(Error::new(ErrorKind::Io, "injected write failure"));
            }
        }
        self.storage.lock().unwrap()[start..start + len].copy_from_slice(&buf[..len]);
        self.writes.lock().unwrap().push((sector, count));
        Ok(())
    }
}

/// 以 `fill` 填满一个扇区
pub(crate) fn sector_of(fill: u8, size: usize) -> Vec<u8> {
    vec![fill; size]
}

/// 安装测试日志（多次调用无害）
pub(crate) fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}
