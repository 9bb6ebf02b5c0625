//! 错误报告通道
//!
//! 后台路径（替换写回、阈值刷新、周期刷新）上的设备 I/O 错误无法同步返回给调用者，
//! 这些错误以 [`ErrorRecord`] 的形式推入一个有界 FIFO，由外部消费者读取。
//!
//! 发送永不阻塞：队列满时丢弃新记录，丢弃次数可通过 [`ErrorQueue::dropped`] 查询。

use crate::error::Error;
use crate::types::ErrorOperation;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// 错误记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    /// 出错的操作
    pub operation: ErrorOperation,
    /// 出错的块号
    pub block: u32,
    /// 设备返回的错误
    pub device_error: Error,
    /// 记录产生的时刻
    pub time: Instant,
    /// 挂载路径（如 `"A:"`）
    pub path: String,
}

/// 有界错误记录队列
pub struct ErrorQueue {
    records: Mutex<VecDeque<ErrorRecord>>,
    available: Condvar,
    capacity: usize,
    dropped: AtomicU64,
}

impl ErrorQueue {
    /// 创建容量为 `capacity` 条记录的队列
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity)),
            available: Condvar::new(),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    // 队列内容只是普通记录，持锁方 panic 不会破坏它
    fn records(&self) -> MutexGuard<'_, VecDeque<ErrorRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 推入一条记录（不阻塞，满则丢弃）
    pub fn push(&self, record: ErrorRecord) {
        let mut records = self.records();
        if records.len() >= self.capacity {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            log::warn!(
                "[BCM] error queue full, dropped {:?} error for block {} on {} (total dropped {})",
                record.operation,
                record.block,
                record.path,
                dropped
            );
            return;
        }
        records.push_back(record);
        drop(records);
        self.available.notify_one();
    }

    /// 取出一条记录，队列为空时立即返回 `None`
    pub fn try_recv(&self) -> Option<ErrorRecord> {
        self.records().pop_front()
    }

    /// 取出一条记录，最多等待 `timeout`
    ///
    /// `timeout` 为 `None` 时一直等待到有记录为止。
    pub fn recv(&self, timeout: Option<Duration>) -> Option<ErrorRecord> {
        let mut records = self.records();
        match timeout {
            None => loop {
                if let Some(record) = records.pop_front() {
                    return Some(record);
                }
                records = self
                    .available
                    .wait(records)
                    .unwrap_or_else(PoisonError::into_inner);
            },
            Some(timeout) => {
                let (mut records, _) = self
                    .available
                    .wait_timeout_while(records, timeout, |r| r.is_empty())
                    .unwrap_or_else(PoisonError::into_inner);
                records.pop_front()
            }
        }
    }

    /// 当前排队的记录数
    pub fn len(&self) -> usize {
        self.records().len()
    }

    /// 队列是否为空
    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    /// 队列容量
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 因队列满而丢弃的记录总数
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl core::fmt::Debug for ErrorQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ErrorQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("dropped", &self.dropped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::Arc;

    fn record(block: u32) -> ErrorRecord {
        ErrorRecord {
            operation: ErrorOperation::Write,
            block,
            device_error: Error::new(ErrorKind::Io, "media error"),
            time: Instant::now(),
            path: "A:".to_string(),
        }
    }

    #[test]
    fn test_fifo_order() {
        let queue = ErrorQueue::new(4);
        queue.push(record(1));
        queue.push(record(2));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.try_recv().unwrap().block, 1);
        assert_eq!(queue.try_recv().unwrap().block, 2);
        assert!(queue.try_recv().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_full_queue_drops_newest() {
        let queue = ErrorQueue::new(2);
        queue.push(record(1));
        queue.push(record(2));
        queue.push(record(3));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.try_recv().unwrap().block, 1);
        assert_eq!(queue.try_recv().unwrap().block, 2);
    }

    #[test]
    fn test_recv_timeout_empty() {
        let queue = ErrorQueue::new(2);
        assert!(queue.recv(Some(Duration::from_millis(10))).is_none());
    }

    #[test]
    fn test_recv_wakes_on_push() {
        let queue = Arc::new(ErrorQueue::new(2));
        let producer = queue.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            producer.push(record(9));
        });

        let got = queue.recv(Some(Duration::from_secs(5))).unwrap();
        assert_eq!(got.block, 9);
        assert_eq!(got.operation, ErrorOperation::Write);
        assert_eq!(got.path, "A:");
        handle.join().unwrap();
    }

    #[test]
    fn test_recv_blocking() {
        let queue = Arc::new(ErrorQueue::new(2));
        let producer = queue.clone();
        let handle = std::thread::spawn(move || producer.push(record(4)));
        assert_eq!(queue.recv(None).unwrap().block, 4);
        handle.join().unwrap();
    }
}
