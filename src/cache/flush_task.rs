//! 周期/异步刷新任务
//!
//! 每个缓存一个后台线程，被事件组驱动：
//!
//! | 事件 | 处理 |
//! |------|------|
//! | 超时 | 全量刷新，之后停表（无限等待） |
//! | `TIMEOUT_START` | 按周期刷新间隔开始计时 |
//! | `TIMEOUT_MODIFIED` | 有脏块时按新的间隔重新计时 |
//! | `ASYNC_FLUSH` | 全量刷新，不改变计时 |
//!
//! 线程创建后先等待 `RESUME`，缓存发布到注册表之后才开始工作。
//! 事件组被删除是它唯一的退出条件。

use super::event::{FlushEvents, Retrieved};
use super::registry::CacheEntry;
use crate::block::{acquire, DevLayerGuard};
use crate::consts::FLUSH_TASK_NAME;
use crate::error::{Error, ErrorKind, Result};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// 启动刷新线程（等待 `RESUME` 后才进入主循环）
pub(crate) fn spawn(entry: Arc<CacheEntry>) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("{}-{}", FLUSH_TASK_NAME, entry.dh()))
        .spawn(move || run(&entry))
        .map_err(|_| Error::new(ErrorKind::NoMemory, "cannot spawn flush task"))
}

fn run(entry: &CacheEntry) {
    match entry.events().retrieve(FlushEvents::RESUME, None) {
        Ok(Retrieved::Events(_)) => {}
        _ => return,
    }
    log::debug!("[BCM] flush task for dh={} running", entry.dh());

    let mut timeout: Option<Duration> = None;
    loop {
        let received = match entry.events().retrieve(FlushEvents::TASK_EVENTS, timeout) {
            Ok(Retrieved::Deleted) => break,
            Ok(received) => received,
            Err(err) => {
                log::error!("[BCM] flush task for dh={} lost its event group: {}", entry.dh(), err);
                break;
            }
        };

        if let Err(err) = handle(entry, received, &mut timeout) {
            log::error!("[BCM] flush task for dh={} stopping: {}", entry.dh(), err);
            break;
        }
    }
    log::debug!("[BCM] flush task for dh={} exiting", entry.dh());
}

/// 处理一次唤醒
///
/// 加锁顺序：设备层锁 → 控制块锁，不取注册表锁。
fn handle(entry: &CacheEntry, received: Retrieved, timeout: &mut Option<Duration>) -> Result<()> {
    let _dev = DevLayerGuard::obtain(entry.disk())?;
    let mut control = acquire(entry.control(), "cache control")?;

    // 等锁期间缓存可能已被销毁
    if entry.events().is_deleted() {
        return Ok(());
    }

    match received {
        Retrieved::Timeout => {
            log::debug!("[BCM] periodic flush of dh={}", entry.dh());
            // 错误已进入错误队列
            let _ = control.flush_cache();
            *timeout = None;
        }
        Retrieved::Events(events) => {
            if events.contains(FlushEvents::TIMEOUT_MODIFIED) && control.dirty_count() > 0 {
                *timeout = control.periodic_flush();
            }
            if events.contains(FlushEvents::TIMEOUT_START) {
                *timeout = control.periodic_flush();
            }
            if events.contains(FlushEvents::ASYNC_FLUSH) {
                log::debug!("[BCM] async flush of dh={}", entry.dh());
                let _ = control.flush_cache();
            }
        }
        Retrieved::Deleted => {}
    }
    Ok(())
}
