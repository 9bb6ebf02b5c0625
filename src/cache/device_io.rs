//! 缓存的设备 I/O 包装
//!
//! 缓存对设备的所有单扇区访问都经过 [`DeviceIo`]：
//! 启用重排序缓冲区时写入先进入缓冲区，读取先查缓冲区；
//! 否则直接调用设备 I/O 过程。
//!
//! 后台路径上的失败通过 [`IoTarget::report`] 推入错误队列。

use super::errlog::{ErrorQueue, ErrorRecord};
use super::reorder::ReorderBuffer;
use crate::block::BlockDevice;
use crate::error::{Error, Result};
use crate::types::{DiskHandle, ErrorOperation};
use std::sync::Arc;
use std::time::Instant;

/// 设备 I/O 目标：设备本身以及出错时需要的上下文
pub(crate) struct IoTarget {
    dh: DiskHandle,
    path: String,
    device: Arc<dyn BlockDevice>,
    errors: Arc<ErrorQueue>,
}

impl IoTarget {
    pub(crate) fn new(
        dh: DiskHandle,
        mount_name: &str,
        device: Arc<dyn BlockDevice>,
        errors: Arc<ErrorQueue>,
    ) -> Self {
        Self {
            dh,
            path: format!("{}:", mount_name),
            device,
            errors,
        }
    }

    pub(crate) fn dh(&self) -> DiskHandle {
        self.dh
    }

    pub(crate) fn read_block(&self, sector: u32, buf: &mut [u8]) -> Result<()> {
        self.device.read_sectors(sector, 1, buf)
    }

    pub(crate) fn write_block(&self, sector: u32, buf: &[u8]) -> Result<()> {
        self.device.write_sectors(sector, 1, buf)
    }

    /// 一次多扇区写
    pub(crate) fn write_run(&self, sector: u32, count: u16, buf: &[u8]) -> Result<()> {
        self.device.write_sectors(sector, count, buf)
    }

    /// 报告后台 I/O 错误
    pub(crate) fn report(&self, operation: ErrorOperation, block: u32, err: &Error) {
        log::warn!(
            "[BCM] {} {:?} error on block {}: {}",
            self.path,
            operation,
            block,
            err
        );
        self.errors.push(ErrorRecord {
            operation,
            block,
            device_error: err.clone(),
            time: Instant::now(),
            path: self.path.clone(),
        });
    }
}

/// 单扇区 I/O 分派
pub(crate) struct DeviceIo {
    target: IoTarget,
    reorder: Option<ReorderBuffer>,
}

impl DeviceIo {
    pub(crate) fn new(target: IoTarget, reorder: Option<ReorderBuffer>) -> Self {
        Self { target, reorder }
    }

    pub(crate) fn target(&self) -> &IoTarget {
        &self.target
    }

    /// 是否挂有重排序缓冲区
    pub(crate) fn has_reorder(&self) -> bool {
        self.reorder.is_some()
    }

    /// 读取一个扇区，重排序缓冲区中的数据优先
    pub(crate) fn read(&self, sector: u32, buf: &mut [u8]) -> Result<()> {
        if let Some(reorder) = &self.reorder {
            if reorder.read(sector, buf) {
                return Ok(());
            }
        }
        self.target.read_block(sector, buf)
    }

    /// 写入一个扇区
    pub(crate) fn write(&mut self, sector: u32, buf: &[u8]) -> Result<()> {
        match &mut self.reorder {
            Some(reorder) => reorder.write(&self.target, sector, buf),
            None => self.target.write_block(sector, buf),
        }
    }

    /// 清空重排序缓冲区，返回没能写到设备上的块数
    pub(crate) fn drain(&mut self) -> usize {
        match &mut self.reorder {
            Some(reorder) => reorder.flush(&self.target),
            None => 0,
        }
    }

    pub(crate) fn report(&self, operation: ErrorOperation, block: u32, err: &Error) {
        self.target.report(operation, block, err);
    }
}
