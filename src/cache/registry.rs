//! 缓存注册表与对外接口
//!
//! 注册表是全进程唯一的活动缓存列表，由自己的互斥锁保护，
//! 与各控制块的互斥锁相互独立。
//!
//! # 加锁顺序
//!
//! 设备层锁（设备自带锁 → VFS 每句柄锁）→ 控制块锁。读写路径不取设备层锁。
//! 注册表锁只在查找、插入和摘除表项时短暂持有，持有期间不再等待其他锁，
//! 不同磁盘句柄上的缓存互不阻塞。
//!
//! 拿到控制块锁后要检查事件组是否已删除：`destroy` 在控制块锁内刷新、
//! 删除事件组并摘除表项，等锁的一方看到删除标志后重新查找。
//!
//! # 生命周期
//!
//! `create` 先分配全部资源并启动（挂起的）刷新线程，最后插入注册表；
//! 插入就是发布点。中途任何一步失败都会按相反顺序回收已分配的资源。

use super::control::{CacheControl, CacheStats};
use super::device_io::{DeviceIo, IoTarget};
use super::errlog::ErrorQueue;
use super::event::{EventGroup, FlushEvents};
use super::flush_task;
use super::reorder::ReorderBuffer;
use crate::block::{acquire, DevLayerGuard, Disk, MountTable};
use crate::consts::{BLOCK_SIZE_4K, BLOCK_SIZE_512B, ERROR_LOG_SIZE, REORDER_BUFFER_BLOCK_COUNT};
use crate::error::{Error, ErrorKind, Result};
use crate::types::{CacheConfig, CacheType, DiskHandle};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::thread::JoinHandle;

/// 注册表中的一个活动缓存
pub(crate) struct CacheEntry {
    dh: DiskHandle,
    disk: Arc<Disk>,
    control: Mutex<CacheControl>,
    events: Arc<EventGroup>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CacheEntry {
    pub(crate) fn dh(&self) -> DiskHandle {
        self.dh
    }

    pub(crate) fn disk(&self) -> &Disk {
        &self.disk
    }

    pub(crate) fn control(&self) -> &Mutex<CacheControl> {
        &self.control
    }

    pub(crate) fn events(&self) -> &EventGroup {
        &self.events
    }

    /// 等待刷新线程退出（调用前应已删除事件组）
    fn join_task(&self) {
        let handle = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("[BCM] flush task for dh={} panicked", self.dh);
            }
        }
    }
}

/// 活动缓存列表
struct Registry {
    mounts: Arc<dyn MountTable>,
    caches: Mutex<Vec<Arc<CacheEntry>>>,
    errors: Arc<ErrorQueue>,
}

/// 刷新线程的启动闸门
///
/// 线程创建后挂起等待 `RESUME`。闸门在放行前被丢弃时删除事件组并回收线程。
struct StartGate {
    entry: Arc<CacheEntry>,
    armed: bool,
}

impl StartGate {
    fn spawn(entry: &Arc<CacheEntry>) -> Result<Self> {
        let handle = flush_task::spawn(entry.clone())?;
        *entry.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(Self {
            entry: entry.clone(),
            armed: true,
        })
    }

    fn resume(mut self) -> Result<()> {
        self.entry.events.set(FlushEvents::RESUME)?;
        self.armed = false;
        Ok(())
    }
}

impl Drop for StartGate {
    fn drop(&mut self) {
        if self.armed {
            self.entry.events.delete();
            self.entry.join_task();
        }
    }
}

/// 块缓存管理器
///
/// 持有注册表和错误队列。丢弃时刷新并停止所有缓存。
pub struct BlockCacheManager {
    inner: Arc<Registry>,
}

impl BlockCacheManager {
    /// 创建管理器
    ///
    /// # 参数
    ///
    /// * `mounts` - 挂载表，提供 "路径 → 句柄 → 设备" 的解析
    pub fn new(mounts: Arc<dyn MountTable>) -> Self {
        Self {
            inner: Arc::new(Registry {
                mounts,
                caches: Mutex::new(Vec::new()),
                errors: Arc::new(ErrorQueue::new(ERROR_LOG_SIZE)),
            }),
        }
    }

    /// 错误记录队列
    pub fn errors(&self) -> &ErrorQueue {
        &self.inner.errors
    }

    fn resolve(&self, path: &str) -> Result<(DiskHandle, Arc<Disk>)> {
        let dh = self.inner.mounts.resolve(path)?;
        let disk = self
            .inner
            .mounts
            .disk(dh)
            .map_err(|_| Error::new(ErrorKind::BadDrive, "no disk behind mounted drive"))?;
        Ok((dh, disk))
    }

    fn find(&self, dh: DiskHandle) -> Result<Option<Arc<CacheEntry>>> {
        let caches = acquire(&self.inner.caches, "registry")?;
        Ok(caches.iter().find(|e| e.dh == dh).cloned())
    }

    /// 在控制块锁内执行 `f`，设备没有缓存时返回 `None`
    ///
    /// 等待控制块锁时不持有注册表锁。
    fn with_control<T>(
        &self,
        dh: DiskHandle,
        f: impl FnOnce(&mut CacheControl) -> Result<T>,
    ) -> Result<Option<T>> {
        loop {
            let Some(entry) = self.find(dh)? else {
                return Ok(None);
            };
            let mut control = acquire(&entry.control, "cache control")?;
            if !entry.events.is_deleted() {
                return f(&mut *control).map(Some);
            }
            // 等锁期间缓存被销毁，表项已摘除
        }
    }

    /// 为设备创建缓存
    ///
    /// # 错误
    ///
    /// * `InvalidInput` - 水位颠倒、缓存容纳不下一个块或水位超过槽位数
    /// * `BadDrive` - 驱动器未挂载或扇区大小不受支持
    /// * `Unavailable` - 设备已有缓存
    /// * `NoMemory` - 内存或线程资源不足
    pub fn create(&self, path: &str, cache_type: CacheType, config: &CacheConfig) -> Result<()> {
        let CacheType::DeviceLayerLru = cache_type;

        if !config.thresholds_ordered() {
            return Err(Error::new(ErrorKind::InvalidInput, "low threshold above high threshold"));
        }
        let (dh, disk) = self.resolve(path)?;

        let block_size = disk.sector_size();
        if !(BLOCK_SIZE_512B..=BLOCK_SIZE_4K).contains(&block_size) {
            return Err(Error::new(ErrorKind::BadDrive, "unsupported sector size"));
        }
        let num_members = config.size / block_size;
        if num_members == 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "cache smaller than one block"));
        }
        if !config.thresholds_fit(num_members) {
            return Err(Error::new(ErrorKind::InvalidInput, "threshold exceeds cache capacity"));
        }
        if self.find(dh)?.is_some() {
            return Err(Error::new(ErrorKind::Unavailable, "device already cached"));
        }

        let reorder = if config.reorder {
            Some(ReorderBuffer::new(REORDER_BUFFER_BLOCK_COUNT, block_size)?)
        } else {
            None
        };
        let events = Arc::new(EventGroup::new());
        let target = IoTarget::new(dh, disk.mount_name(), disk.device().clone(), self.inner.errors.clone());
        let control = CacheControl::new(
            DeviceIo::new(target, reorder),
            num_members,
            block_size,
            config,
            events.clone(),
        )?;
        let entry = Arc::new(CacheEntry {
            dh,
            disk: disk.clone(),
            control: Mutex::new(control),
            events,
            task: Mutex::new(None),
        });
        let gate = StartGate::spawn(&entry)?;

        {
            let _dev = DevLayerGuard::obtain(&disk)?;
            let mut caches = acquire(&self.inner.caches, "registry")?;
            // 并发的 create 可能抢先发布
            if caches.iter().any(|e| e.dh == dh) {
                return Err(Error::new(ErrorKind::Unavailable, "device already cached"));
            }
            gate.resume()?;
            caches.insert(0, entry);
        }

        log::debug!(
            "[BCM] created cache for {} (dh={}, {} slots of {} bytes)",
            path,
            dh,
            num_members,
            block_size
        );
        Ok(())
    }

    /// 销毁设备的缓存
    ///
    /// 在控制块锁内刷新剩余脏块、删除事件组并从注册表摘除，最后停止刷新线程。
    /// 刷新中的设备错误不阻止销毁，但作为最终状态返回。
    pub fn destroy(&self, path: &str) -> Result<()> {
        let (dh, disk) = self.resolve(path)?;

        let (entry, status) = {
            let _dev = DevLayerGuard::obtain(&disk)?;
            let entry = self
                .find(dh)?
                .ok_or(Error::new(ErrorKind::Unavailable, "device has no cache"))?;
            let mut control = acquire(&entry.control, "cache control")?;
            if entry.events.is_deleted() {
                return Err(Error::new(ErrorKind::Unavailable, "device has no cache"));
            }

            let status = control.flush_cache();
            entry.events.delete();
            self.inner
                .caches
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|e| !Arc::ptr_eq(e, &entry));
            drop(control);
            (entry, status)
        };
        entry.join_task();

        log::debug!("[BCM] destroyed cache for {} (dh={})", path, dh);
        status
    }

    /// 读取缓存配置
    pub fn get_config(&self, path: &str) -> Result<CacheConfig> {
        let (dh, _) = self.resolve(path)?;
        self.with_control(dh, |control| Ok(control.config()))?
            .ok_or(Error::new(ErrorKind::Unavailable, "device has no cache"))
    }

    /// 修改缓存配置
    ///
    /// 只有水位和周期刷新间隔生效，`size` 与 `reorder` 在创建后不可修改。
    pub fn set_config(&self, path: &str, config: &CacheConfig) -> Result<()> {
        if !config.thresholds_ordered() {
            return Err(Error::new(ErrorKind::InvalidInput, "low threshold above high threshold"));
        }
        let (dh, _) = self.resolve(path)?;
        self.with_control(dh, |control| control.apply_config(config))?
            .ok_or(Error::new(ErrorKind::Unavailable, "device has no cache"))
    }

    /// 同步刷新设备的全部脏块
    pub fn flush(&self, path: &str) -> Result<()> {
        let (dh, _) = self.resolve(path)?;
        self.with_control(dh, |control| control.flush_cache())?
            .ok_or(Error::new(ErrorKind::Unavailable, "device has no cache"))
    }

    /// 缓存统计信息
    pub fn stats(&self, path: &str) -> Result<CacheStats> {
        let (dh, _) = self.resolve(path)?;
        self.with_control(dh, |control| Ok(control.stats()))?
            .ok_or(Error::new(ErrorKind::Unavailable, "device has no cache"))
    }

    /// 读取 `count` 个扇区
    ///
    /// 没有缓存的设备整段直接交给设备 I/O 过程。
    pub fn read(&self, dh: DiskHandle, sector: u32, buf: &mut [u8], count: u16) -> Result<()> {
        match self.with_control(dh, |control| control.read(sector, buf, count))? {
            Some(()) => Ok(()),
            None => self.inner.mounts.disk(dh)?.device().read_sectors(sector, count, buf),
        }
    }

    /// 写入 `count` 个扇区
    ///
    /// 没有缓存的设备整段直接交给设备 I/O 过程。
    pub fn write(&self, dh: DiskHandle, sector: u32, buf: &[u8], count: u16) -> Result<()> {
        match self.with_control(dh, |control| control.write(sector, buf, count))? {
            Some(()) => Ok(()),
            None => self.inner.mounts.disk(dh)?.device().write_sectors(sector, count, buf),
        }
    }

    /// 请求后台异步刷新（例如设备上所有文件都已关闭）
    pub fn request_async_flush(&self, dh: DiskHandle) -> Result<()> {
        let entry = self
            .find(dh)?
            .ok_or(Error::new(ErrorKind::Unavailable, "device has no cache"))?;
        entry.events.set(FlushEvents::ASYNC_FLUSH)
    }

    /// 设备是否有活动缓存
    pub fn device_has_cache(&self, dh: DiskHandle) -> Result<bool> {
        Ok(self.find(dh)?.is_some())
    }
}

impl Drop for BlockCacheManager {
    fn drop(&mut self) {
        let entries: Vec<Arc<CacheEntry>> = self
            .inner
            .caches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();

        for entry in entries {
            match entry.control.lock() {
                Ok(mut control) => {
                    if let Err(err) = control.flush_cache() {
                        log::warn!("[BCM] flush on shutdown of dh={} failed: {}", entry.dh, err);
                    }
                }
                Err(_) => log::error!("[BCM] cache control of dh={} poisoned on shutdown", entry.dh),
            }
            entry.events.delete();
            entry.join_task();
        }
    }
}

impl core::fmt::Debug for BlockCacheManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let cached: Vec<DiskHandle> = match self.inner.caches.lock() {
            Ok(caches) => caches.iter().map(|e| e.dh).collect(),
            Err(_) => Vec::new(),
        };
        f.debug_struct("BlockCacheManager")
            .field("cached", &cached)
            .field("errors", &self.inner.errors)
            .finish()
    }
}

static MANAGER: OnceLock<BlockCacheManager> = OnceLock::new();

/// 初始化全进程唯一的块缓存管理器
///
/// 重复初始化返回 `Unavailable`。
pub fn init(mounts: Arc<dyn MountTable>) -> Result<&'static BlockCacheManager> {
    let mut created = false;
    let manager = MANAGER.get_or_init(|| {
        created = true;
        BlockCacheManager::new(mounts)
    });
    if !created {
        return Err(Error::new(ErrorKind::Unavailable, "block cache manager already initialized"));
    }
    Ok(manager)
}

/// 全进程唯一的块缓存管理器，未初始化时返回 `None`
pub fn manager() -> Option<&'static BlockCacheManager> {
    MANAGER.get()
}
