//! 多扇区重排序缓冲区
//!
//! 挂在缓存的设备 I/O 包装之下。缓存写回的单个扇区先按块号有序存放在这里，
//! 达到高水位后挑出块号连续的最长一段，合并成一次多扇区写，
//! 直到缓冲区降到低水位。
//!
//! 多扇区写失败时逐块重试，仍失败的块报告到错误队列。
//! 无论成功与否，处理过的块都离开缓冲区。

use super::device_io::IoTarget;
use crate::consts::REORDER_XFER_BLOCK_COUNT;
use crate::error::{Error, ErrorKind, Result};
use crate::types::ErrorOperation;
use std::collections::BTreeMap;

/// 重排序缓冲区
pub(crate) struct ReorderBuffer {
    /// 块号 → 块数据，按块号有序
    blocks: BTreeMap<u32, Box<[u8]>>,
    /// 空闲块缓冲池（创建时一次性分配）
    pool: Vec<Box<[u8]>>,
    /// 多扇区写的聚合缓冲区
    xfer: Vec<u8>,
    num_members: usize,
    block_size: usize,
    low_threshold: usize,
    high_threshold: usize,
}

fn alloc_block(len: usize) -> Result<Box<[u8]>> {
    let mut block = Vec::new();
    block
        .try_reserve_exact(len)
        .map_err(|_| Error::new(ErrorKind::NoMemory, "cannot allocate reorder block"))?;
    block.resize(len, 0);
    Ok(block.into_boxed_slice())
}

impl ReorderBuffer {
    /// 创建缓冲区
    ///
    /// 高水位等于容量；低水位为容量减去一次多扇区写的块数（不足时为 0）。
    pub(crate) fn new(num_members: usize, block_size: usize) -> Result<Self> {
        let mut pool = Vec::new();
        pool.try_reserve_exact(num_members)
            .map_err(|_| Error::new(ErrorKind::NoMemory, "cannot allocate reorder pool"))?;
        for _ in 0..num_members {
            pool.push(alloc_block(block_size)?);
        }

        let mut xfer = Vec::new();
        xfer.try_reserve_exact(block_size * REORDER_XFER_BLOCK_COUNT)
            .map_err(|_| Error::new(ErrorKind::NoMemory, "cannot allocate transfer buffer"))?;
        xfer.resize(block_size * REORDER_XFER_BLOCK_COUNT, 0);

        Ok(Self {
            blocks: BTreeMap::new(),
            pool,
            xfer,
            num_members,
            block_size,
            low_threshold: num_members.saturating_sub(REORDER_XFER_BLOCK_COUNT),
            high_threshold: num_members,
        })
    }

    /// 缓冲中的块数
    pub(crate) fn len(&self) -> usize {
        self.blocks.len()
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// 读取缓冲中的块，未命中返回 `false`
    pub(crate) fn read(&self, block_number: u32, buf: &mut [u8]) -> bool {
        match self.blocks.get(&block_number) {
            Some(data) => {
                buf[..self.block_size].copy_from_slice(data);
                true
            }
            None => false,
        }
    }

    /// 写入一个块
    ///
    /// 已在缓冲中的块直接覆盖；新块占用一个池缓冲，可能触发阈值处理。
    pub(crate) fn write(&mut self, target: &IoTarget, block_number: u32, data: &[u8]) -> Result<()> {
        if let Some(existing) = self.blocks.get_mut(&block_number) {
            existing.copy_from_slice(&data[..self.block_size]);
            return Ok(());
        }

        let mut slot = self
            .pool
            .pop()
            .ok_or(Error::new(ErrorKind::Unavailable, "reorder buffer full"))?;
        slot.copy_from_slice(&data[..self.block_size]);
        self.blocks.insert(block_number, slot);

        self.process_threshold(target);
        Ok(())
    }

    /// 清空缓冲区：从最长的连续段开始逐段写出
    ///
    /// 返回没能写到设备上的块数。
    pub(crate) fn flush(&mut self, target: &IoTarget) -> usize {
        let mut failures = 0;
        while let Some((start, count)) = self.longest_sequence() {
            failures += self.perform_io(target, start, count);
        }
        failures
    }

    /// 块号连续的最长一段 `(起始块号, 块数)`
    ///
    /// 长度相同时取块号最小的一段。
    fn longest_sequence(&self) -> Option<(u32, usize)> {
        let mut keys = self.blocks.keys().copied();
        let first = keys.next()?;

        let (mut best_start, mut best_count) = (first, 1usize);
        let (mut run_start, mut run_count, mut prev) = (first, 1usize, first);
        for block in keys {
            if prev.checked_add(1) == Some(block) {
                run_count += 1;
            } else {
                if run_count > best_count {
                    best_start = run_start;
                    best_count = run_count;
                }
                run_start = block;
                run_count = 1;
            }
            prev = block;
        }
        if run_count > best_count {
            best_start = run_start;
            best_count = run_count;
        }
        Some((best_start, best_count))
    }

    /// 写出从 `start` 开始的连续段，最多一次多扇区写的块数
    ///
    /// 返回逐块重试后仍失败的块数。
    fn perform_io(&mut self, target: &IoTarget, start: u32, count: usize) -> usize {
        let count = count.min(REORDER_XFER_BLOCK_COUNT);
        let mut failures = 0;
        let bs = self.block_size;

        for (i, data) in self.blocks.range(start..).take(count).map(|(_, d)| d).enumerate() {
            self.xfer[i * bs..(i + 1) * bs].copy_from_slice(data);
        }

        if let Err(err) = target.write_run(start, count as u16, &self.xfer[..count * bs]) {
            log::debug!(
                "[BCMMS] multi-sector write of {} blocks at {} failed ({}), retrying per block",
                count,
                start,
                err
            );
            for (&block, data) in self.blocks.range(start..).take(count) {
                if let Err(err) = target.write_block(block, data) {
                    target.report(ErrorOperation::Write, block, &err);
                    failures += 1;
                }
            }
        } else {
            log::trace!("[BCMMS] wrote {} blocks at {}", count, start);
        }

        for offset in 0..count as u32 {
            if let Some(buf) = self.blocks.remove(&(start + offset)) {
                self.pool.push(buf);
            }
        }
        failures
    }

    /// 达到高水位时一直写出到低水位
    fn process_threshold(&mut self, target: &IoTarget) {
        if self.blocks.len() < self.high_threshold {
            return;
        }
        while self.blocks.len() > self.low_threshold {
            // 失败已进入错误队列
            match self.longest_sequence() {
                Some((start, count)) => {
                    let _ = self.perform_io(target, start, count);
                }
                None => break,
            }
        }
    }
}

impl core::fmt::Debug for ReorderBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ReorderBuffer")
            .field("len", &self.len())
            .field("num_members", &self.num_members)
            .field("low_threshold", &self.low_threshold)
            .field("high_threshold", &self.high_threshold)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::errlog::ErrorQueue;
    use crate::consts::{ERROR_LOG_SIZE, REORDER_BUFFER_BLOCK_COUNT};
    use crate::testing::{sector_of, MockDevice};
    use std::sync::Arc;

    fn setup() -> (Arc<MockDevice>, Arc<ErrorQueue>, IoTarget) {
        let device = Arc::new(MockDevice::new(512, 256));
        let errors = Arc::new(ErrorQueue::new(ERROR_LOG_SIZE));
        let target = IoTarget::new(0, "A", device.clone(), errors.clone());
        (device, errors, target)
    }

    #[test]
    fn test_thresholds_from_capacity() {
        let buffer = ReorderBuffer::new(REORDER_BUFFER_BLOCK_COUNT, 512).unwrap();
        assert_eq!(buffer.high_threshold, 32);
        assert_eq!(buffer.low_threshold, 24);

        let small = ReorderBuffer::new(4, 512).unwrap();
        assert_eq!(small.low_threshold, 0);
    }

    #[test]
    fn test_write_buffers_and_read_back() {
        let (device, _errors, target) = setup();
        let mut buffer = ReorderBuffer::new(8, 512).unwrap();

        buffer.write(&target, 5, &sector_of(1, 512)).unwrap();
        buffer.write(&target, 5, &sector_of(2, 512)).unwrap();
        assert_eq!(buffer.len(), 1);
        assert_eq!(device.write_calls(), 0);

        let mut out = vec![0u8; 512];
        assert!(buffer.read(5, &mut out));
        assert_eq!(out, sector_of(2, 512));
        assert!(!buffer.read(6, &mut out));
    }

    #[test]
    fn test_longest_sequence_prefers_first() {
        let (_device, _errors, target) = setup();
        let mut buffer = ReorderBuffer::new(32, 512).unwrap();
        for block in [3, 4, 10, 11, 20, 21, 22, 40] {
            buffer.write(&target, block, &sector_of(0, 512)).unwrap();
        }
        assert_eq!(buffer.longest_sequence(), Some((20, 3)));

        let mut tie = ReorderBuffer::new(32, 512).unwrap();
        for block in [7, 8, 1, 2] {
            tie.write(&target, block, &sector_of(0, 512)).unwrap();
        }
        assert_eq!(tie.longest_sequence(), Some((1, 2)));
    }

    #[test]
    fn test_flush_merges_runs() {
        let (device, errors, target) = setup();
        let mut buffer = ReorderBuffer::new(32, 512).unwrap();
        for block in [12, 10, 11, 30, 13] {
            buffer.write(&target, block, &sector_of(block as u8, 512)).unwrap();
        }

        assert_eq!(buffer.flush(&target), 0);
        assert!(buffer.is_empty());
        assert_eq!(device.write_log(), vec![(10, 4), (30, 1)]);
        assert_eq!(device.sector(13), sector_of(13, 512));
        assert!(errors.is_empty());
    }

    #[test]
    fn test_run_capped_at_transfer_size() {
        let (device, _errors, target) = setup();
        let mut buffer = ReorderBuffer::new(32, 512).unwrap();
        for block in 100..110 {
            buffer.write(&target, block, &sector_of(0, 512)).unwrap();
        }
        buffer.flush(&target);
        assert_eq!(device.write_log(), vec![(100, 8), (108, 2)]);
    }

    #[test]
    fn test_high_threshold_drains_to_low() {
        let (device, _errors, target) = setup();
        let mut buffer = ReorderBuffer::new(16, 512).unwrap();
        // 偶数块号，互不连续
        for i in 0..15u32 {
            buffer.write(&target, i * 2, &sector_of(0, 512)).unwrap();
        }
        assert_eq!(device.write_calls(), 0);

        buffer.write(&target, 100, &sector_of(0, 512)).unwrap();
        assert_eq!(buffer.len(), 8);
        assert_eq!(device.write_calls(), 8);
        // 长度都为 1 时从最小块号开始写出
        assert_eq!(device.write_log()[0], (0, 1));
    }

    #[test]
    fn test_failed_run_retried_per_block() {
        let (device, errors, target) = setup();
        device.fail_writes(51);
        let mut buffer = ReorderBuffer::new(32, 512).unwrap();
        for block in 50..53 {
            buffer.write(&target, block, &sector_of(block as u8, 512)).unwrap();
        }

        assert_eq!(buffer.flush(&target), 1);
        assert!(buffer.is_empty());
        assert_eq!(device.write_log(), vec![(50, 1), (52, 1)]);

        let record = errors.try_recv().unwrap();
        assert_eq!(record.block, 51);
        assert_eq!(record.operation, ErrorOperation::Write);
        assert!(errors.try_recv().is_none());
    }
}
