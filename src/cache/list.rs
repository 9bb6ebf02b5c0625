//! 有序链表（LRU 链）
//!
//! 建立在槽位下标之上的双向链表，维护访问顺序：一端是 LRU，另一端是 MRU。
//! 链表项与槽位一一对应（同长度数组，同一下标），因此由槽位找到链表项是 O(1)。
//!
//! 不变量：链表项在链中当且仅当对应槽位已占用。

use crate::error::{Error, ErrorKind, Result};

#[derive(Debug, Clone, Copy, Default)]
struct Entry {
    /// 更靠近 LRU 的一项
    prev: Option<usize>,
    /// 更靠近 MRU 的一项
    next: Option<usize>,
    linked: bool,
}

/// 有序链表控制块
pub struct OrderedList {
    entries: Vec<Entry>,
    lru: Option<usize>,
    mru: Option<usize>,
    len: usize,
}

impl OrderedList {
    /// 创建链表，预留 `num_members` 个链表项
    pub fn new(num_members: usize) -> Result<Self> {
        let mut entries = Vec::new();
        entries
            .try_reserve_exact(num_members)
            .map_err(|_| Error::new(ErrorKind::NoMemory, "cannot allocate ordered list"))?;
        entries.resize(num_members, Entry::default());
        Ok(Self {
            entries,
            lru: None,
            mru: None,
            len: 0,
        })
    }

    /// 加入链表，总是作为新的 MRU
    ///
    /// 下标越界或已在链中时返回 `InvalidInput`。
    pub fn add(&mut self, idx: usize) -> Result<()> {
        let entry = self
            .entries
            .get(idx)
            .ok_or(Error::new(ErrorKind::InvalidInput, "list entry out of range"))?;
        if entry.linked {
            return Err(Error::new(ErrorKind::InvalidInput, "entry already linked"));
        }

        match self.mru {
            None => {
                // 空链表：既是 LRU 也是 MRU
                self.lru = Some(idx);
                self.entries[idx] = Entry {
                    prev: None,
                    next: None,
                    linked: true,
                };
            }
            Some(current_mru) => {
                self.entries[current_mru].next = Some(idx);
                self.entries[idx] = Entry {
                    prev: Some(current_mru),
                    next: None,
                    linked: true,
                };
            }
        }
        self.mru = Some(idx);
        self.len += 1;
        Ok(())
    }

    /// 从链表中摘除
    ///
    /// 链表为空或该项不在链中时返回 `InvalidInput`。
    pub fn remove(&mut self, idx: usize) -> Result<()> {
        if self.lru.is_none() || self.mru.is_none() {
            return Err(Error::new(ErrorKind::InvalidInput, "list is empty"));
        }
        let entry = *self
            .entries
            .get(idx)
            .ok_or(Error::new(ErrorKind::InvalidInput, "list entry out of range"))?;
        if !entry.linked {
            return Err(Error::new(ErrorKind::InvalidInput, "entry not in list"));
        }

        match entry.prev {
            Some(prev) => self.entries[prev].next = entry.next,
            None => self.lru = entry.next,
        }
        match entry.next {
            Some(next) => self.entries[next].prev = entry.prev,
            None => self.mru = entry.prev,
        }

        self.entries[idx] = Entry::default();
        self.len -= 1;
        Ok(())
    }

    /// 提升为 MRU（摘除后重新加入）
    pub fn promote(&mut self, idx: usize) -> Result<()> {
        self.remove(idx)?;
        self.add(idx)
    }

    /// 最久未使用的一项
    pub fn lru(&self) -> Option<usize> {
        self.lru
    }

    /// 最近使用的一项
    pub fn mru(&self) -> Option<usize> {
        self.mru
    }

    /// 沿 LRU → MRU 方向的下一项
    pub fn next(&self, idx: usize) -> Option<usize> {
        self.entries.get(idx).and_then(|e| e.next)
    }

    /// 是否在链中
    pub fn contains(&self, idx: usize) -> bool {
        self.entries.get(idx).is_some_and(|e| e.linked)
    }

    /// 链中项数
    pub fn len(&self) -> usize {
        self.len
    }

    /// 链表是否为空
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 按 LRU → MRU 顺序遍历下标
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            list: self,
            cursor: self.lru,
        }
    }
}

impl core::fmt::Debug for OrderedList {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// LRU → MRU 迭代器
pub struct Iter<'a> {
    list: &'a OrderedList,
    cursor: Option<usize>,
}

impl Iterator for Iter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let idx = self.cursor?;
        self.cursor = self.list.next(idx);
        Some(idx)
    }
}
