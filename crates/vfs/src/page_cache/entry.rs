//! 页缓存项
//!
//! 每项代表某文件某页偏移对应的一个物理页。物理页的所有权唯一：
//! 恰有一项带 `PAGE_OWNER`；与它共享物理页的项（块设备页与文件页
//! 重合时）经 `backing` 指向所有者并对其持引用。虚拟地址懒映射，
//! 用单次 CAS 安装，输家释放自己的候选映射。

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use sync::SpinLock;

use crate::config::PAGE_SIZE;
use crate::file_object::FileObject;
use crate::ops::memory_ops;

bitflags::bitflags! {
    /// 页缓存项状态位
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u32 {
        /// 内容比后备存储新
        const DIRTY      = 1 << 0;
        /// 已对新查找隐身，等待销毁
        const EVICTED    = 1 << 1;
        /// 有迭代在锁外引用本项，不得离树
        const BUSY       = 1 << 2;
        /// 本项拥有物理页
        const PAGE_OWNER = 1 << 3;
        /// 计数已结算；推回移除表重试的项不再重复结算
        const ACCOUNTED  = 1 << 4;
    }
}

/// 页缓存项
pub struct PageCacheEntry {
    file: Arc<FileObject>,
    offset: u64,
    /// 物理地址；链接到后备项时改指所有者的页
    physical: AtomicUsize,
    /// 懒映射的内核虚拟地址；0 表示未映射
    virtual_address: AtomicUsize,
    /// 共享物理页时指向页所有者
    backing: SpinLock<Option<Arc<PageCacheEntry>>>,
    ref_count: AtomicUsize,
    flags: AtomicU32,
    /// 在全局 LRU 中的刻度；0 表示不在表上
    lru_tick: AtomicU64,
}

impl PageCacheEntry {
    /// 建页所有者项；拿走 `physical` 的所有权并对文件对象取引用
    pub fn new_owner(file: Arc<FileObject>, offset: u64, physical: usize) -> Arc<PageCacheEntry> {
        file.acquire();
        Arc::new(PageCacheEntry {
            file,
            offset,
            physical: AtomicUsize::new(physical),
            virtual_address: AtomicUsize::new(0),
            backing: SpinLock::new(None),
            ref_count: AtomicUsize::new(1),
            flags: AtomicU32::new(PageFlags::PAGE_OWNER.bits()),
            lru_tick: AtomicU64::new(0),
        })
    }

    /// 建共享项：物理页归 `backing` 所有，对它取引用
    pub fn new_linked(
        file: Arc<FileObject>,
        offset: u64,
        backing: Arc<PageCacheEntry>,
    ) -> Arc<PageCacheEntry> {
        file.acquire();
        backing.acquire();
        let physical = backing.physical();
        Arc::new(PageCacheEntry {
            file,
            offset,
            physical: AtomicUsize::new(physical),
            virtual_address: AtomicUsize::new(0),
            backing: SpinLock::new(Some(backing)),
            ref_count: AtomicUsize::new(1),
            flags: AtomicU32::new(0),
            lru_tick: AtomicU64::new(0),
        })
    }

    /// 所属文件对象
    pub fn file(&self) -> &Arc<FileObject> {
        &self.file
    }

    /// 文件内页偏移
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// 物理地址
    pub fn physical(&self) -> usize {
        self.physical.load(Ordering::Acquire)
    }

    pub(crate) fn set_physical(&self, physical: usize) {
        self.physical.store(physical, Ordering::Release);
    }

    /// 页所有者：共享项返回其后备项，所有者返回自身
    pub fn owner(self: &Arc<Self>) -> Arc<PageCacheEntry> {
        match self.backing.lock().as_ref() {
            Some(backing) => backing.clone(),
            None => self.clone(),
        }
    }

    /// 后备项
    pub fn backing(&self) -> Option<Arc<PageCacheEntry>> {
        self.backing.lock().clone()
    }

    pub(crate) fn take_backing(&self) -> Option<Arc<PageCacheEntry>> {
        self.backing.lock().take()
    }

    pub(crate) fn set_backing(&self, backing: Arc<PageCacheEntry>) {
        *self.backing.lock() = Some(backing);
    }

    // ========== 引用计数 ==========

    /// 增加引用
    pub fn acquire(&self) {
        self.ref_count.fetch_add(1, Ordering::AcqRel);
    }

    /// 释放引用；返回释放后的计数
    pub fn release(&self) -> usize {
        self.ref_count.fetch_sub(1, Ordering::AcqRel) - 1
    }

    /// 当前引用计数
    pub fn reference_count(&self) -> usize {
        self.ref_count.load(Ordering::Acquire)
    }

    // ========== 标志位（CAS） ==========

    /// 置位；返回之前未置的位
    pub fn set_flags(&self, flags: PageFlags) -> PageFlags {
        let old = self.flags.fetch_or(flags.bits(), Ordering::AcqRel);
        PageFlags::from_bits_truncate(!old & flags.bits())
    }

    /// 清位；返回之前是否全部置位
    pub fn clear_flags(&self, flags: PageFlags) -> bool {
        let old = self.flags.fetch_and(!flags.bits(), Ordering::AcqRel);
        old & flags.bits() == flags.bits()
    }

    /// 查询标志位
    pub fn flag_set(&self, flags: PageFlags) -> bool {
        self.flags.load(Ordering::Acquire) & flags.bits() == flags.bits()
    }

    pub(crate) fn lru_tick(&self) -> &AtomicU64 {
        &self.lru_tick
    }

    // ========== 虚拟地址 ==========

    /// 已安装的虚拟地址
    pub fn virtual_address(&self) -> Option<usize> {
        match self.virtual_address.load(Ordering::Acquire) {
            0 => None,
            address => Some(address),
        }
    }

    /// 安装虚拟地址映射；并发安装只留一个赢家，输家释放候选映射
    ///
    /// 返回 `(地址, 本次是否新安装)`。
    pub fn map(&self) -> Option<(usize, bool)> {
        if let Some(address) = self.virtual_address() {
            return Some((address, false));
        }
        let candidate = memory_ops().map_page(self.physical())?;
        match self.virtual_address.compare_exchange(
            0,
            candidate,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Some((candidate, true)),
            Err(winner) => {
                memory_ops().unmap_page(candidate);
                Some((winner, false))
            }
        }
    }

    /// 解除虚拟地址映射；返回之前的地址
    pub(crate) fn take_virtual_address(&self) -> Option<usize> {
        match self.virtual_address.swap(0, Ordering::AcqRel) {
            0 => None,
            address => Some(address),
        }
    }

    // ========== 页内容 ==========

    /// 从页内读出
    pub fn read(&self, page_offset: usize, buffer: &mut [u8]) {
        debug_assert!(page_offset + buffer.len() <= PAGE_SIZE);
        memory_ops().read_page(self.physical(), page_offset, buffer);
    }

    /// 写入页内
    pub fn write(&self, page_offset: usize, buffer: &[u8]) {
        debug_assert!(page_offset + buffer.len() <= PAGE_SIZE);
        memory_ops().write_page(self.physical(), page_offset, buffer);
    }
}
