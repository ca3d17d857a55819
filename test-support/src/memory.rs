//! 物理页与地址空间桩
//!
//! "物理页"是泄漏的堆块，物理地址即宿主指针，映射是恒等的。
//! 剩余页数按已分配数折算，供水位线测试驱动清理路径。

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use vfs::MemoryOps;

const PAGE_SIZE: usize = 4096;
const TOTAL_PAGES: usize = 4096;

/// 测试页池
pub struct PageArena {
    allocated: AtomicUsize,
    warning_level: AtomicU32,
}

lazy_static::lazy_static! {
    /// 全局实例
    pub static ref PAGE_ARENA: PageArena = PageArena {
        allocated: AtomicUsize::new(0),
        warning_level: AtomicU32::new(0),
    };
}

impl PageArena {
    /// 当前已分配页数
    pub fn allocated_pages(&self) -> usize {
        self.allocated.load(Ordering::Acquire)
    }

    /// 设置内存告警等级（0 为无告警）
    pub fn set_warning_level(&self, level: u32) {
        self.warning_level.store(level, Ordering::Release);
    }
}

impl MemoryOps for PageArena {
    fn allocate_page(&self) -> Option<usize> {
        let block: Box<[u8; PAGE_SIZE]> = Box::new([0u8; PAGE_SIZE]);
        self.allocated.fetch_add(1, Ordering::AcqRel);
        Some(Box::into_raw(block) as usize)
    }

    fn free_page(&self, physical: usize) {
        self.allocated.fetch_sub(1, Ordering::AcqRel);
        // SAFETY: 只归还 allocate_page 发出的指针
        unsafe { drop(Box::from_raw(physical as *mut [u8; PAGE_SIZE])) };
    }

    fn map_page(&self, physical: usize) -> Option<usize> {
        Some(physical)
    }

    fn unmap_page(&self, _virtual_address: usize) {}

    fn read_page(&self, physical: usize, offset: usize, buffer: &mut [u8]) {
        debug_assert!(offset + buffer.len() <= PAGE_SIZE);
        // SAFETY: physical 来自 allocate_page，区间经上面断言约束
        unsafe {
            core::ptr::copy_nonoverlapping(
                (physical + offset) as *const u8,
                buffer.as_mut_ptr(),
                buffer.len(),
            );
        }
    }

    fn write_page(&self, physical: usize, offset: usize, buffer: &[u8]) {
        debug_assert!(offset + buffer.len() <= PAGE_SIZE);
        // SAFETY: 同 read_page
        unsafe {
            core::ptr::copy_nonoverlapping(
                buffer.as_ptr(),
                (physical + offset) as *mut u8,
                buffer.len(),
            );
        }
    }

    fn total_physical_pages(&self) -> usize {
        TOTAL_PAGES
    }

    fn free_physical_pages(&self) -> usize {
        TOTAL_PAGES.saturating_sub(self.allocated.load(Ordering::Acquire))
    }

    fn total_virtual_bytes(&self) -> u64 {
        (TOTAL_PAGES * PAGE_SIZE * 16) as u64
    }

    fn free_virtual_bytes(&self) -> u64 {
        self.total_virtual_bytes()
    }

    fn unmap_image_sections(&self, _physical: usize) -> bool {
        false
    }

    fn request_page_out(&self, _pages: usize) {}

    fn memory_warning_level(&self) -> u32 {
        self.warning_level.load(Ordering::Acquire)
    }
}
