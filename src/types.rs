//! BCM 公共数据类型
//!
//! 包含磁盘句柄、缓存类型、缓存配置以及错误记录相关的枚举。

use crate::consts::{DEFAULT_CACHE_SIZE, DEFAULT_HIGH_THRESHOLD, DEFAULT_LOW_THRESHOLD};
use core::time::Duration;

/// 磁盘句柄
///
/// 由挂载表分配的不透明整数，标识一个已挂载或裸块设备。
pub type DiskHandle = u16;

/// 缓存类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheType {
    /// 设备层 LRU 写回缓存
    #[default]
    DeviceLayerLru,
}

/// 设备层 LRU 缓存配置
///
/// `periodic_flush` 为 `None` 表示永不周期刷新。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// 缓存总大小（字节），槽位数 = `size / block_size`
    pub size: usize,
    /// 低水位：阈值刷新一直写回到脏块数不超过此值
    pub low_threshold: usize,
    /// 高水位：脏块数达到此值时触发阈值刷新
    pub high_threshold: usize,
    /// 周期刷新间隔
    pub periodic_flush: Option<Duration>,
    /// 是否在设备之下启用多扇区重排序缓冲区
    pub reorder: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_CACHE_SIZE,
            low_threshold: DEFAULT_LOW_THRESHOLD,
            high_threshold: DEFAULT_HIGH_THRESHOLD,
            periodic_flush: None,
            reorder: false,
        }
    }
}

impl CacheConfig {
    /// 检查水位顺序（`low <= high`）
    pub fn thresholds_ordered(&self) -> bool {
        self.low_threshold <= self.high_threshold
    }

    /// 实际生效的周期刷新间隔，零间隔视为不刷新
    pub fn flush_period(&self) -> Option<Duration> {
        self.periodic_flush.filter(|period| !period.is_zero())
    }

    /// 检查水位是否在槽位容量范围内
    pub fn thresholds_fit(&self, num_members: usize) -> bool {
        self.low_threshold <= num_members && self.high_threshold <= num_members
    }
}

/// 出错的操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorOperation {
    /// 读操作
    Read,
    /// 写操作
    Write,
}
