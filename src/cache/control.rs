//! 缓存控制块
//!
//! 每个被缓存的磁盘句柄一个控制块，绑定槽位集合、LRU 链、脏块计数、
//! 高低水位和周期刷新配置。控制块的全部操作都在其所属互斥锁内执行，
//! 同一缓存上的所有流量因此被串行化。
//!
//! 只有替换引擎（[`CacheControl::do_replacement`]）和刷新路径
//! （[`CacheControl::process_threshold`]、[`CacheControl::flush_cache`]）
//! 会对脏槽位发起写回，两者都经过同一个设备 I/O 包装。

use super::device_io::DeviceIo;
use super::event::{EventGroup, FlushEvents};
use super::list::OrderedList;
use super::slot::{BlockState, SlotSet};
use crate::error::{Error, ErrorKind, Result};
use crate::types::{CacheConfig, ErrorOperation};
use std::sync::Arc;
use std::time::Duration;

/// 缓存统计信息
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// 缓存命中次数（读写合计）
    pub hits: u64,
    /// 缓存未命中次数（读写合计）
    pub misses: u64,
    /// 成功写回的脏块数
    pub writebacks: u64,
    /// 替换引擎释放的槽位数
    pub replacements: u64,
    /// 后台写回失败次数
    pub io_errors: u64,
    /// 槽位总数
    pub capacity: usize,
    /// 已占用槽位数
    pub occupied: usize,
    /// 当前脏块数
    pub dirty_blocks: usize,
}

impl CacheStats {
    /// 计算命中率
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// 缓存控制块
pub(crate) struct CacheControl {
    io: DeviceIo,
    slots: SlotSet,
    list: OrderedList,
    dirty_count: usize,
    low_threshold: usize,
    high_threshold: usize,
    periodic_flush: Option<Duration>,
    events: Arc<EventGroup>,
    stats: CacheStats,
}

impl CacheControl {
    /// 创建控制块，一次性分配槽位和链表
    ///
    /// 水位已由调用方校验。
    pub(crate) fn new(
        io: DeviceIo,
        num_members: usize,
        block_size: usize,
        config: &CacheConfig,
        events: Arc<EventGroup>,
    ) -> Result<Self> {
        let slots = SlotSet::new(num_members, block_size)?;
        let list = OrderedList::new(num_members)?;
        Ok(Self {
            io,
            slots,
            list,
            dirty_count: 0,
            low_threshold: config.low_threshold,
            high_threshold: config.high_threshold,
            periodic_flush: config.flush_period(),
            events,
            stats: CacheStats::default(),
        })
    }

    pub(crate) fn dirty_count(&self) -> usize {
        self.dirty_count
    }

    /// 周期刷新间隔，`None` 表示不做周期刷新
    pub(crate) fn periodic_flush(&self) -> Option<Duration> {
        self.periodic_flush
    }

    /// 当前配置
    pub(crate) fn config(&self) -> CacheConfig {
        CacheConfig {
            size: self.slots.num_members() * self.slots.block_size(),
            low_threshold: self.low_threshold,
            high_threshold: self.high_threshold,
            periodic_flush: self.periodic_flush,
            reorder: self.io.has_reorder(),
        }
    }

    /// 统计快照
    pub(crate) fn stats(&self) -> CacheStats {
        CacheStats {
            capacity: self.slots.num_members(),
            occupied: self.slots.occupied_count(),
            dirty_blocks: self.dirty_count,
            ..self.stats.clone()
        }
    }

    /// 写回一个脏槽位
    ///
    /// 成功时标记为干净并清零错误计数；失败时增加 `error_pending` 并报告错误，槽位保持脏。
    fn write_back(&mut self, idx: usize) -> Result<()> {
        let block_number = self.slots.slot(idx)?.block_number;
        let data = self.slots.block(idx)?;

        match self.io.write(block_number, data) {
            Ok(()) => {
                let slot = self.slots.slot_mut(idx)?;
                slot.block_state = BlockState::Clean;
                slot.error_pending = 0;
                self.dirty_count -= 1;
                self.stats.writebacks += 1;
                Ok(())
            }
            Err(err) => {
                self.slots.slot_mut(idx)?.error_pending += 1;
                self.stats.io_errors += 1;
                self.io.report(ErrorOperation::Write, block_number, &err);
                Err(err)
            }
        }
    }

    /// 替换：从 LRU 端开始释放一个槽位
    ///
    /// 干净槽位直接释放；脏槽位先写回，写回失败则跳过它继续看下一个。
    /// 没有任何槽位能释放时返回 `Unavailable`。
    pub(crate) fn do_replacement(&mut self) -> Result<()> {
        let mut cursor = self.list.lru();
        while let Some(idx) = cursor {
            cursor = self.list.next(idx);

            let slot = *self.slots.slot(idx)?;
            if slot.is_dirty() && self.write_back(idx).is_err() {
                continue;
            }

            self.list.remove(idx)?;
            self.slots.free(idx)?;
            self.stats.replacements += 1;
            log::debug!(
                "[BCM] dh={} replaced block {} from slot {}",
                self.io.target().dh(),
                slot.block_number,
                idx
            );
            return Ok(());
        }

        log::debug!("[BCM] dh={} replacement found no freeable slot", self.io.target().dh());
        Err(Error::new(ErrorKind::Unavailable, "no slot could be freed"))
    }

    /// 阈值处理
    ///
    /// 脏块数达到高水位时，沿 LRU → MRU 写回脏槽位直到不超过低水位。
    /// 写回失败的槽位被跳过，扫描继续。
    pub(crate) fn process_threshold(&mut self) -> Result<()> {
        if self.dirty_count < self.high_threshold {
            return Ok(());
        }

        log::debug!(
            "[BCM] dh={} dirty {} reached high threshold {}",
            self.io.target().dh(),
            self.dirty_count,
            self.high_threshold
        );
        let mut cursor = self.list.lru();
        while let Some(idx) = cursor {
            if self.dirty_count <= self.low_threshold {
                break;
            }
            cursor = self.list.next(idx);
            if self.slots.slot(idx)?.is_dirty() {
                // 错误已进入错误队列
                let _ = self.write_back(idx);
            }
        }
        Ok(())
    }

    /// 写回全部脏槽位，并清空重排序缓冲区
    ///
    /// 任何一个槽位写回失败或重排序缓冲区中有块没能写出都返回 `Io`，
    /// 但扫描会处理完所有槽位。
    pub(crate) fn flush_cache(&mut self) -> Result<()> {
        let mut failures = 0usize;
        if self.dirty_count > 0 {
            for idx in 0..self.slots.num_members() {
                let slot = *self.slots.slot(idx)?;
                if slot.is_occupied() && slot.is_dirty() && self.write_back(idx).is_err() {
                    failures += 1;
                }
            }
        }
        let lost = self.io.drain();
        if lost > 0 {
            self.stats.io_errors += lost as u64;
            failures += lost;
        }

        if failures > 0 {
            log::debug!(
                "[BCM] dh={} flush failed on {} blocks",
                self.io.target().dh(),
                failures
            );
            return Err(Error::new(ErrorKind::Io, "flush encountered device errors"));
        }
        Ok(())
    }

    /// 读取 `count` 个扇区
    ///
    /// 命中时从缓存复制并提升为 MRU；未命中时直接从设备读入目标缓冲区，不填充缓存。
    /// 遇到第一个错误即返回。
    pub(crate) fn read(&mut self, sector: u32, buf: &mut [u8], count: u16) -> Result<()> {
        let bs = self.slots.block_size();
        check_len(buf.len(), bs, count)?;
        for (i, chunk) in buf.chunks_exact_mut(bs).take(count as usize).enumerate() {
            let block = sector_at(sector, i)?;
            match self.slots.find(block) {
                Some(idx) => {
                    chunk.copy_from_slice(self.slots.block(idx)?);
                    self.list.promote(idx)?;
                    self.stats.hits += 1;
                    log::trace!("[BCM] read hit block {} in slot {}", block, idx);
                }
                None => {
                    self.stats.misses += 1;
                    log::trace!("[BCM] read miss block {}", block);
                    self.io.read(block, chunk)?;
                }
            }
        }
        Ok(())
    }

    /// 写入 `count` 个扇区
    ///
    /// 每个扇区进入缓存并成为 MRU 脏块，随后做阈值处理。
    /// 缓存路径失败时该扇区直接写设备，设备错误中止本次调用。
    pub(crate) fn write(&mut self, sector: u32, buf: &[u8], count: u16) -> Result<()> {
        let bs = self.slots.block_size();
        check_len(buf.len(), bs, count)?;
        for (i, chunk) in buf.chunks_exact(bs).take(count as usize).enumerate() {
            let block = sector_at(sector, i)?;
            match self.cache_block(block, chunk) {
                Ok(()) => self.process_threshold()?,
                Err(err) => {
                    log::debug!("[BCM] caching block {} failed ({}), writing through", block, err);
                    self.io.write(block, chunk)?;
                }
            }
        }
        Ok(())
    }

    fn cache_block(&mut self, block: u32, data: &[u8]) -> Result<()> {
        let idx = match self.slots.find(block) {
            Some(idx) => {
                self.stats.hits += 1;
                if self.slots.slot(idx)?.is_dirty() {
                    // 下面统一加回
                    self.dirty_count -= 1;
                }
                self.list.remove(idx)?;
                idx
            }
            None => {
                self.stats.misses += 1;
                match self.slots.allocate() {
                    Ok(idx) => idx,
                    Err(_) => {
                        self.do_replacement()?;
                        self.slots.allocate()?
                    }
                }
            }
        };

        self.slots.block_mut(idx)?.copy_from_slice(data);
        let slot = self.slots.slot_mut(idx)?;
        slot.block_number = block;
        slot.block_state = BlockState::Dirty;
        slot.error_pending = 0;
        self.list.add(idx)?;
        self.dirty_count += 1;

        if self.dirty_count == 1 && self.periodic_flush.is_some() {
            if let Err(err) = self.events.set(FlushEvents::TIMEOUT_START) {
                log::warn!("[BCM] cannot arm periodic flush: {}", err);
            }
        }
        Ok(())
    }

    /// 应用新配置
    ///
    /// 只有水位和周期刷新间隔可以修改。间隔变化通知刷新任务，水位变化立即做一次阈值处理。
    pub(crate) fn apply_config(&mut self, config: &CacheConfig) -> Result<()> {
        if !config.thresholds_ordered() {
            return Err(Error::new(ErrorKind::InvalidInput, "low threshold above high threshold"));
        }
        if !config.thresholds_fit(self.slots.num_members()) {
            return Err(Error::new(ErrorKind::InvalidInput, "threshold exceeds cache capacity"));
        }

        // 通知失败时配置保持不变；刷新任务拿到控制块锁后才读取间隔
        let period = config.flush_period();
        if period != self.periodic_flush {
            self.events.set(FlushEvents::TIMEOUT_MODIFIED)?;
            self.periodic_flush = period;
        }

        if config.low_threshold != self.low_threshold || config.high_threshold != self.high_threshold {
            self.low_threshold = config.low_threshold;
            self.high_threshold = config.high_threshold;
            self.process_threshold()?;
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn slots(&self) -> &SlotSet {
        &self.slots
    }

    #[cfg(test)]
    pub(crate) fn list(&self) -> &OrderedList {
        &self.list
    }

    /// 检查槽位、链表和脏块计数之间的不变量
    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        let empty = self.slots.iter().filter(|s| !s.is_occupied()).count();
        assert_eq!(empty, self.slots.empty_count());

        let mut linked: Vec<usize> = self.list.iter().collect();
        linked.sort_unstable();
        let occupied: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_occupied())
            .map(|(i, _)| i)
            .collect();
        assert_eq!(linked, occupied);

        let dirty = self.slots.iter().filter(|s| s.is_occupied() && s.is_dirty()).count();
        assert_eq!(dirty, self.dirty_count);
    }
}

fn check_len(len: usize, block_size: usize, count: u16) -> Result<()> {
    if len < block_size * count as usize {
        return Err(Error::new(ErrorKind::InvalidInput, "buffer too small for request"));
    }
    Ok(())
}

fn sector_at(sector: u32, offset: usize) -> Result<u32> {
    u32::try_from(offset)
        .ok()
        .and_then(|offset| sector.checked_add(offset))
        .ok_or(Error::new(ErrorKind::InvalidInput, "sector number overflows"))
}

impl core::fmt::Debug for CacheControl {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CacheControl")
            .field("dh", &self.io.target().dh())
            .field("slots", &self.slots)
            .field("dirty_count", &self.dirty_count)
            .field("low_threshold", &self.low_threshold)
            .field("high_threshold", &self.high_threshold)
            .field("periodic_flush", &self.periodic_flush)
            .finish()
    }
}
