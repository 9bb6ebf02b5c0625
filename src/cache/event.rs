//! 刷新事件组
//!
//! 用互斥锁 + 条件变量模拟内核事件组：一个小位集，等待时可带超时，
//! 取到的事件会被消费。删除事件组会唤醒所有等待者，这是刷新任务唯一的退出信号。

use crate::block::acquire;
use crate::error::{Error, ErrorKind, Result};
use bitflags::bitflags;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

bitflags! {
    /// 刷新任务事件
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FlushEvents: u32 {
        /// 周期刷新间隔被修改
        const TIMEOUT_MODIFIED = 0x01;
        /// 第一个脏块进入缓存，启动计时
        const TIMEOUT_START    = 0x02;
        /// 外部请求的异步刷新
        const ASYNC_FLUSH      = 0x04;
        /// 缓存已发布，任务可以开始运行
        const RESUME           = 0x08;
    }
}

impl FlushEvents {
    /// 刷新任务主循环等待的事件
    pub const TASK_EVENTS: FlushEvents = FlushEvents::TIMEOUT_MODIFIED
        .union(FlushEvents::TIMEOUT_START)
        .union(FlushEvents::ASYNC_FLUSH);
}

/// 等待结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retrieved {
    /// 取到（并消费）的事件
    Events(FlushEvents),
    /// 等待超时
    Timeout,
    /// 事件组已删除
    Deleted,
}

struct EventState {
    pending: FlushEvents,
    deleted: bool,
}

/// 事件组
pub struct EventGroup {
    state: Mutex<EventState>,
    signal: Condvar,
}

impl Default for EventGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl EventGroup {
    /// 创建空事件组
    pub fn new() -> Self {
        Self {
            state: Mutex::new(EventState {
                pending: FlushEvents::empty(),
                deleted: false,
            }),
            signal: Condvar::new(),
        }
    }

    /// 置位事件（OR 语义）
    pub fn set(&self, events: FlushEvents) -> Result<()> {
        let mut state = acquire(&self.state, "event group")?;
        if state.deleted {
            return Err(Error::new(ErrorKind::Unavailable, "event group deleted"));
        }
        state.pending.insert(events);
        drop(state);
        self.signal.notify_all();
        Ok(())
    }

    /// 删除事件组，唤醒所有等待者
    pub fn delete(&self) {
        // 删除必须成功：即使锁中毒也要让等待者看到删除标志
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        state.deleted = true;
        drop(state);
        self.signal.notify_all();
    }

    /// 事件组是否已删除
    pub fn is_deleted(&self) -> bool {
        self.state
            .lock()
            .map(|state| state.deleted)
            .unwrap_or(true)
    }

    /// 等待 `requested` 中任一事件（OR_CONSUME 语义）
    ///
    /// `timeout` 为 `None` 时无限等待。
    pub fn retrieve(&self, requested: FlushEvents, timeout: Option<Duration>) -> Result<Retrieved> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = acquire(&self.state, "event group")?;
        loop {
            if state.deleted {
                return Ok(Retrieved::Deleted);
            }
            let hit = state.pending & requested;
            if !hit.is_empty() {
                state.pending.remove(hit);
                return Ok(Retrieved::Events(hit));
            }

            state = match deadline {
                None => self
                    .signal
                    .wait(state)
                    .map_err(|_| Error::new(ErrorKind::Internal, "event group poisoned"))?,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(Retrieved::Timeout);
                    }
                    self.signal
                        .wait_timeout(state, deadline - now)
                        .map_err(|_| Error::new(ErrorKind::Internal, "event group poisoned"))?
                        .0
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_pending_event_consumed() {
        let group = EventGroup::new();
        group.set(FlushEvents::ASYNC_FLUSH).unwrap();
        let got = group.retrieve(FlushEvents::TASK_EVENTS, None).unwrap();
        assert_eq!(got, Retrieved::Events(FlushEvents::ASYNC_FLUSH));

        // 已被消费
        let again = group
            .retrieve(FlushEvents::TASK_EVENTS, Some(Duration::from_millis(5)))
            .unwrap();
        assert_eq!(again, Retrieved::Timeout);
    }

    #[test]
    fn test_only_requested_events_taken() {
        let group = EventGroup::new();
        group.set(FlushEvents::RESUME | FlushEvents::TIMEOUT_START).unwrap();
        let got = group.retrieve(FlushEvents::RESUME, None).unwrap();
        assert_eq!(got, Retrieved::Events(FlushEvents::RESUME));

        let rest = group.retrieve(FlushEvents::TASK_EVENTS, None).unwrap();
        assert_eq!(rest, Retrieved::Events(FlushEvents::TIMEOUT_START));
    }

    #[test]
    fn test_multiple_events_returned_together() {
        let group = EventGroup::new();
        group.set(FlushEvents::TIMEOUT_MODIFIED).unwrap();
        group.set(FlushEvents::ASYNC_FLUSH).unwrap();
        let got = group.retrieve(FlushEvents::TASK_EVENTS, None).unwrap();
        assert_eq!(
            got,
            Retrieved::Events(FlushEvents::TIMEOUT_MODIFIED | FlushEvents::ASYNC_FLUSH)
        );
    }

    #[test]
    fn test_timeout() {
        let group = EventGroup::new();
        let start = Instant::now();
        let got = group
            .retrieve(FlushEvents::TASK_EVENTS, Some(Duration::from_millis(20)))
            .unwrap();
        assert_eq!(got, Retrieved::Timeout);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_delete_wakes_waiter() {
        let group = Arc::new(EventGroup::new());
        let waiter = group.clone();
        let handle = std::thread::spawn(move || waiter.retrieve(FlushEvents::TASK_EVENTS, None));

        std::thread::sleep(Duration::from_millis(20));
        group.delete();
        assert_eq!(handle.join().unwrap().unwrap(), Retrieved::Deleted);
        assert!(group.is_deleted());
        assert_eq!(
            group.set(FlushEvents::ASYNC_FLUSH).unwrap_err().kind(),
            ErrorKind::Unavailable
        );
    }

    #[test]
    fn test_set_wakes_waiter() {
        let group = Arc::new(EventGroup::new());
        let waiter = group.clone();
        let handle = std::thread::spawn(move || {
            waiter.retrieve(FlushEvents::TASK_EVENTS, Some(Duration::from_secs(5)))
        });

        std::thread::sleep(Duration::from_millis(20));
        group.set(FlushEvents::TIMEOUT_START).unwrap();
        assert_eq!(
            handle.join().unwrap().unwrap(),
            Retrieved::Events(FlushEvents::TIMEOUT_START)
        );
    }
}
