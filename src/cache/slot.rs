//! 槽位集合
//!
//! 固定数量、固定大小的块槽位。每个槽位记录占用状态、装载的块号、
//! 干净/脏状态以及自上次成功写回以来失败的写回次数。
//!
//! 块数据存放在一块扁平内存中，槽位 `i` 的数据位于
//! `[i * block_size, (i + 1) * block_size)`，与有序链表使用同一个下标。
//!
//! 所有操作都假定调用方已持有所属控制块的锁。

use crate::consts::UNINITIALIZED_BLOCK;
use crate::error::{Error, ErrorKind, Result};

/// 槽位占用状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// 空闲
    Empty,
    /// 已占用
    Occupied,
}

/// 块状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    /// 与设备一致
    Clean,
    /// 已被写入，尚未持久化
    Dirty,
}

/// 单个槽位
///
/// `block_number` 仅在 `slot_state == Occupied` 时有意义。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    /// 占用状态
    pub slot_state: SlotState,
    /// 装载的逻辑扇区号
    pub block_number: u32,
    /// 干净/脏
    pub block_state: BlockState,
    /// 自上次成功写回以来失败的写回次数
    pub error_pending: u32,
}

impl Slot {
    const fn empty() -> Self {
        Self {
            slot_state: SlotState::Empty,
            block_number: UNINITIALIZED_BLOCK,
            block_state: BlockState::Clean,
            error_pending: 0,
        }
    }

    /// 是否已占用
    pub fn is_occupied(&self) -> bool {
        self.slot_state == SlotState::Occupied
    }

    /// 是否为脏块
    pub fn is_dirty(&self) -> bool {
        self.block_state == BlockState::Dirty
    }
}

/// 槽位集合控制块
pub struct SlotSet {
    slots: Vec<Slot>,
    blocks: Vec<u8>,
    empty_count: usize,
    block_size: usize,
}

impl SlotSet {
    /// 创建槽位集合
    ///
    /// 所有内存在此一次性分配，分配失败返回 `NoMemory`。
    ///
    /// # 参数
    ///
    /// * `num_members` - 槽位数量
    /// * `block_size` - 每个槽位的字节数
    pub fn new(num_members: usize, block_size: usize) -> Result<Self> {
        let total = num_members
            .checked_mul(block_size)
            .ok_or(Error::new(ErrorKind::InvalidInput, "cache size overflows"))?;

        let mut slots = Vec::new();
        slots
            .try_reserve_exact(num_members)
            .map_err(|_| Error::new(ErrorKind::NoMemory, "cannot allocate slot set"))?;
        slots.resize(num_members, Slot::empty());

        let mut blocks = Vec::new();
        blocks
            .try_reserve_exact(total)
            .map_err(|_| Error::new(ErrorKind::NoMemory, "cannot allocate cache blocks"))?;
        blocks.resize(total, 0);

        Ok(Self {
            slots,
            blocks,
            empty_count: num_members,
            block_size,
        })
    }

    /// 槽位数量
    pub fn num_members(&self) -> usize {
        self.slots.len()
    }

    /// 空闲槽位数量
    pub fn empty_count(&self) -> usize {
        self.empty_count
    }

    /// 已占用槽位数量
    pub fn occupied_count(&self) -> usize {
        self.slots.len() - self.empty_count
    }

    /// 每个槽位的字节数
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// 分配槽位
    ///
    /// 扫描第一个空闲槽位，标记为占用并清空块号、脏状态和错误计数。
    ///
    /// # 返回
    ///
    /// 分配到的槽位下标；没有空闲槽位时返回 `Unavailable`
    pub fn allocate(&mut self) -> Result<usize> {
        if self.empty_count == 0 {
            return Err(Error::new(ErrorKind::Unavailable, "no free slot"));
        }

        // empty_count 与实际内容不一致时同样视为没有空闲槽位
        let idx = self
            .slots
            .iter()
            .position(|slot| !slot.is_occupied())
            .ok_or(Error::new(ErrorKind::Unavailable, "no free slot"))?;

        self.slots[idx] = Slot {
            slot_state: SlotState::Occupied,
            ..Slot::empty()
        };
        self.empty_count -= 1;
        Ok(idx)
    }

    /// 释放槽位
    ///
    /// 下标越界或槽位本已空闲时返回 `InvalidInput`。
    pub fn free(&mut self, idx: usize) -> Result<()> {
        let slot = self
            .slots
            .get_mut(idx)
            .ok_or(Error::new(ErrorKind::InvalidInput, "slot index out of range"))?;
        if !slot.is_occupied() {
            return Err(Error::new(ErrorKind::InvalidInput, "slot already free"));
        }
        *slot = Slot::empty();
        self.empty_count += 1;
        Ok(())
    }

    /// 取得槽位
    pub fn slot(&self, idx: usize) -> Result<&Slot> {
        self.slots
            .get(idx)
            .ok_or(Error::new(ErrorKind::InvalidInput, "slot index out of range"))
    }

    /// 取得可变槽位
    pub fn slot_mut(&mut self, idx: usize) -> Result<&mut Slot> {
        self.slots
            .get_mut(idx)
            .ok_or(Error::new(ErrorKind::InvalidInput, "slot index out of range"))
    }

    /// 取得槽位的块数据
    pub fn block(&self, idx: usize) -> Result<&[u8]> {
        if idx >= self.slots.len() {
            return Err(Error::new(ErrorKind::InvalidInput, "slot index out of range"));
        }
        let start = idx * self.block_size;
        Ok(&self.blocks[start..start + self.block_size])
    }

    /// 取得槽位的可变块数据
    pub fn block_mut(&mut self, idx: usize) -> Result<&mut [u8]> {
        if idx >= self.slots.len() {
            return Err(Error::new(ErrorKind::InvalidInput, "slot index out of range"));
        }
        let start = idx * self.block_size;
        Ok(&mut self.blocks[start..start + self.block_size])
    }

    /// 查找装载了指定块号的槽位
    pub fn find(&self, block_number: u32) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.is_occupied() && slot.block_number == block_number)
    }

    /// 遍历所有槽位
    pub fn iter(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter()
    }
}

impl core::fmt::Debug for SlotSet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SlotSet")
            .field("num_members", &self.slots.len())
            .field("empty_count", &self.empty_count)
            .field("block_size", &self.block_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_matches(set: &SlotSet) -> bool {
        set.iter().filter(|s| !s.is_occupied()).count() == set.empty_count()
    }

    #[test]
    fn test_slot_set_creation() {
        let set = SlotSet::new(8, 512).unwrap();
        assert_eq!(set.num_members(), 8);
        assert_eq!(set.empty_count(), 8);
        assert_eq!(set.occupied_count(), 0);
        assert_eq!(set.block(7).unwrap().len(), 512);
        assert!(empty_matches(&set));
    }

    #[test]
    fn test_allocate_until_exhausted() {
        let mut set = SlotSet::new(3, 512).unwrap();
        assert_eq!(set.allocate().unwrap(), 0);
        assert_eq!(set.allocate().unwrap(), 1);
        assert_eq!(set.allocate().unwrap(), 2);
        assert!(empty_matches(&set));

        let err = set.allocate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
    }

    #[test]
    fn test_allocate_resets_slot() {
        let mut set = SlotSet::new(2, 512).unwrap();
        let idx = set.allocate().unwrap();
        {
            let slot = set.slot_mut(idx).unwrap();
            slot.block_number = 42;
            slot.block_state = BlockState::Dirty;
            slot.error_pending = 3;
        }
        set.free(idx).unwrap();

        let again = set.allocate().unwrap();
        assert_eq!(again, idx);
        let slot = set.slot(again).unwrap();
        assert!(slot.is_occupied());
        assert_eq!(slot.block_number, UNINITIALIZED_BLOCK);
        assert!(!slot.is_dirty());
        assert_eq!(slot.error_pending, 0);
    }

    #[test]
    fn test_free_reuses_lowest_slot() {
        let mut set = SlotSet::new(4, 512).unwrap();
        for _ in 0..4 {
            set.allocate().unwrap();
        }
        set.free(2).unwrap();
        assert_eq!(set.empty_count(), 1);
        assert_eq!(set.allocate().unwrap(), 2);
    }

    #[test]
    fn test_free_bad_param() {
        let mut set = SlotSet::new(2, 512).unwrap();
        assert_eq!(set.free(2).unwrap_err().kind(), ErrorKind::InvalidInput);
        // 空闲槽位不能重复释放
        assert_eq!(set.free(0).unwrap_err().kind(), ErrorKind::InvalidInput);
        assert_eq!(set.empty_count(), 2);
    }

    #[test]
    fn test_accessors_bounds_checked() {
        let mut set = SlotSet::new(2, 512).unwrap();
        assert!(set.slot(2).is_err());
        assert!(set.slot_mut(2).is_err());
        assert!(set.block(2).is_err());
        assert!(set.block_mut(2).is_err());
    }

    #[test]
    fn test_find_only_occupied() {
        let mut set = SlotSet::new(4, 512).unwrap();
        let idx = set.allocate().unwrap();
        set.slot_mut(idx).unwrap().block_number = 10;
        assert_eq!(set.find(10), Some(idx));

        set.free(idx).unwrap();
        assert_eq!(set.find(10), None);
        // 空槽位的块号哨兵不能被当作命中
        assert_eq!(set.find(UNINITIALIZED_BLOCK), None);
    }

    #[test]
    fn test_block_data_is_per_slot() {
        let mut set = SlotSet::new(2, 4).unwrap();
        set.block_mut(1).unwrap().copy_from_slice(&[1, 2, 3, 4]);
        assert_eq!(set.block(0).unwrap(), &[0, 0, 0, 0]);
        assert_eq!(set.block(1).unwrap(), &[1, 2, 3, 4]);
    }
}
