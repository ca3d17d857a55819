//! 页缓存
//!
//! 页树按文件对象分治：每个文件对象带自己的共享-排他页树锁，
//! 不同文件的缓存操作互不串行。全局侧只剩 LRU 表、移除表和
//! 原子计数器。脏页不上 LRU；被逐出的项等所有引用归还后销毁。

pub mod cleaner;
pub mod entry;
pub mod ops;

pub use entry::{PageCacheEntry, PageFlags};
pub use ops::{flush, flush_properties, read_cached, truncate_file, write_cached};

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use lazy_static::lazy_static;
use sync::SpinLock;

use crate::config::{CLEANER_DELAY_MS, PAGE_SIZE};
use crate::file_object::{FileObject, FileObjectFlags};
use crate::ops::memory_ops;
use crate::util::LruList;

struct CacheLists {
    /// 干净页的重用次序；脏页和被逐出页不在表上
    lru: LruList<Arc<PageCacheEntry>>,
    /// 待销毁但暂不能动（BUSY 或引用未归零）的项
    removal: Vec<Arc<PageCacheEntry>>,
}

lazy_static! {
    static ref LISTS: SpinLock<CacheLists> = SpinLock::new(CacheLists {
        lru: LruList::new(),
        removal: Vec::new(),
    });
    /// 有待回写内容或属性的文件对象（各持一次文件引用）
    static ref DIRTY_FILES: SpinLock<Vec<Arc<FileObject>>> = SpinLock::new(Vec::new());
    static ref TUNABLES: SpinLock<Option<Tunables>> = SpinLock::new(None);
}

static ENTRY_COUNT: AtomicUsize = AtomicUsize::new(0);
static EVICTED_COUNT: AtomicUsize = AtomicUsize::new(0);
static PHYSICAL_PAGES: AtomicUsize = AtomicUsize::new(0);
static DIRTY_PAGES: AtomicUsize = AtomicUsize::new(0);
static MAPPED_PAGES: AtomicUsize = AtomicUsize::new(0);
static MAPPED_DIRTY_PAGES: AtomicUsize = AtomicUsize::new(0);

/// 由物理内存与虚拟地址总量推出的缓存调节参数
#[derive(Debug, Clone, Copy)]
pub struct Tunables {
    /// 空闲页低于此数触发收缩
    pub headroom_trigger: usize,
    /// 收缩进行到空闲页达到此数为止
    pub headroom_retreat: usize,
    /// 理想缓存规模（页）；脏页上限是它的一半
    pub ideal_size: usize,
    /// 无论压力多大都保留的缓存页数
    pub min_floor: usize,
    /// 内存紧张时清理线程转向回收前至少产出的干净页数
    pub low_mem_clean_minimum: usize,
    /// 空闲虚拟地址低于此字节数触发解映射
    pub va_trigger: u64,
    /// 解映射进行到空闲虚拟地址达到此字节数为止
    pub va_retreat: u64,
}

fn compute_tunables() -> Tunables {
    let total = memory_ops().total_physical_pages();
    #[cfg(target_pointer_width = "64")]
    let (va_trigger, va_retreat) = (1 << 30, 3u64 << 30);
    #[cfg(not(target_pointer_width = "64"))]
    let (va_trigger, va_retreat) = (512 << 20, (922u64) << 20);
    let total_va = memory_ops().total_virtual_bytes();
    Tunables {
        headroom_trigger: total / 10,
        headroom_retreat: total * 15 / 100,
        ideal_size: total / 3,
        min_floor: total * 7 / 100,
        low_mem_clean_minimum: 64,
        va_trigger: va_trigger.min(total_va / 4),
        va_retreat: va_retreat.min(total_va / 2),
    }
}

/// 初始化调节参数
pub fn init() {
    *TUNABLES.lock() = Some(compute_tunables());
}

/// 覆盖调节参数；再调 [`init`] 恢复推算值
pub fn set_tunables(tunables: Tunables) {
    *TUNABLES.lock() = Some(tunables);
}

pub(crate) fn tunables() -> Tunables {
    let mut slot = TUNABLES.lock();
    match *slot {
        Some(tunables) => tunables,
        None => {
            let computed = compute_tunables();
            *slot = Some(computed);
            computed
        }
    }
}

/// 计数器快照（观测与测试）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStatistics {
    /// 缓存项总数
    pub entry_count: usize,
    /// 被逐出未销毁的项数
    pub evicted_count: usize,
    /// 占用的物理页数
    pub physical_pages: usize,
    /// 脏页数
    pub dirty_pages: usize,
    /// 已映射页数
    pub mapped_pages: usize,
    /// 已映射且脏的页数
    pub mapped_dirty_pages: usize,
}

/// 拍一份计数器快照
pub fn statistics() -> CacheStatistics {
    CacheStatistics {
        entry_count: ENTRY_COUNT.load(Ordering::Acquire),
        evicted_count: EVICTED_COUNT.load(Ordering::Acquire),
        physical_pages: PHYSICAL_PAGES.load(Ordering::Acquire),
        dirty_pages: DIRTY_PAGES.load(Ordering::Acquire),
        mapped_pages: MAPPED_PAGES.load(Ordering::Acquire),
        mapped_dirty_pages: MAPPED_DIRTY_PAGES.load(Ordering::Acquire),
    }
}

/// 脏页是否超过理想规模的一半（普通写入方停写等清理追上）
pub fn is_too_dirty() -> bool {
    DIRTY_PAGES.load(Ordering::Acquire) > tunables().ideal_size >> 1
}

// ========== LRU 联动 ==========

fn lru_insert(entry: &Arc<PageCacheEntry>) {
    let mut lists = LISTS.lock();
    let tick = lists.lru.push_back(entry.clone());
    // 竞争中的并发移除以换出的刻度为准
    let previous = entry.lru_tick().swap(tick, Ordering::AcqRel);
    if previous != 0 {
        lists.lru.remove(previous);
    }
}

fn lru_remove(entry: &PageCacheEntry) {
    let tick = entry.lru_tick().swap(0, Ordering::AcqRel);
    if tick != 0 {
        LISTS.lock().lru.remove(tick);
    }
}

// ========== 查找与插入 ==========

/// 查缓存页；命中时取引用并更新重用次序
///
/// 写命中把页从 LRU 摘下（即将变脏），读命中移到表尾。
pub fn lookup(file: &Arc<FileObject>, offset: u64, is_write: bool) -> Option<Arc<PageCacheEntry>> {
    let entry = {
        let pages = file.pages.read();
        pages.get(&offset).cloned()
    }?;
    if entry.flag_set(PageFlags::EVICTED) {
        return None;
    }
    entry.acquire();
    if is_write {
        lru_remove(&entry);
    } else if entry.lru_tick().load(Ordering::Acquire) != 0 {
        lru_insert(&entry);
    }
    Some(entry)
}

/// 插入新页或命中既有页
///
/// 排他页树锁下重查；既有项直接返回（调用者负责归还自己预分配的
/// 物理页）。`link_entry` 的物理页与 `physical` 相同时建共享项。
/// 返回 `(项, 是否新插入)`；两种情况调用者都已持有一次引用。
pub fn create_or_lookup(
    file: &Arc<FileObject>,
    offset: u64,
    physical: usize,
    link_entry: Option<&Arc<PageCacheEntry>>,
    is_write: bool,
) -> (Arc<PageCacheEntry>, bool) {
    let entry = {
        let mut pages = file.pages.write();
        if let Some(existing) = pages.get(&offset) {
            if !existing.flag_set(PageFlags::EVICTED) {
                existing.acquire();
                return (existing.clone(), false);
            }
            // 被逐出的残留让位给新项
            pages.remove(&offset);
        }
        let entry = match link_entry {
            Some(backing) if backing.physical() == physical => {
                PageCacheEntry::new_linked(file.clone(), offset, backing.clone())
            }
            _ => {
                PHYSICAL_PAGES.fetch_add(1, Ordering::AcqRel);
                PageCacheEntry::new_owner(file.clone(), offset, physical)
            }
        };
        pages.insert(offset, entry.clone());
        ENTRY_COUNT.fetch_add(1, Ordering::AcqRel);
        entry
    };
    // 树持创建引用，调用者另取一次
    entry.acquire();
    if !is_write {
        lru_insert(&entry);
    }
    (entry, true)
}

/// 把 `entry` 的物理页所有权转交给既有的 `backing`
///
/// `entry` 还有外部引用或已脏时失败。成功后旧物理页与旧映射
/// 归还。
pub fn link(entry: &Arc<PageCacheEntry>, backing: &Arc<PageCacheEntry>) -> bool {
    let _guard = entry.file().pages.write();
    if entry.reference_count() > 1 {
        return false;
    }
    if !entry.flag_set(PageFlags::PAGE_OWNER) || entry.flag_set(PageFlags::DIRTY) {
        return false;
    }
    let old_physical = entry.physical();
    let old_virtual = entry.take_virtual_address();
    backing.acquire();
    entry.clear_flags(PageFlags::PAGE_OWNER);
    entry.set_backing(backing.clone());
    entry.set_physical(backing.physical());
    drop(_guard);

    if let Some(address) = old_virtual {
        memory_ops().unmap_page(address);
        MAPPED_PAGES.fetch_sub(1, Ordering::AcqRel);
    }
    memory_ops().free_page(old_physical);
    PHYSICAL_PAGES.fetch_sub(1, Ordering::AcqRel);
    true
}

// ========== 脏页记账 ==========

/// 标脏：落到页所有者上，脏页离开 LRU
///
/// 所有者与本项不同（文件页后备在块设备页上）时按写入尾扩文件
/// 大小。同时把文件对象记到回写名单。
pub fn mark_dirty(entry: &Arc<PageCacheEntry>, page_offset: usize, bytes: usize) {
    let owner = entry.owner();
    let newly = owner.set_flags(PageFlags::DIRTY);
    if newly.contains(PageFlags::DIRTY) {
        DIRTY_PAGES.fetch_add(1, Ordering::AcqRel);
        if owner.virtual_address().is_some() {
            MAPPED_DIRTY_PAGES.fetch_add(1, Ordering::AcqRel);
        }
        lru_remove(&owner);
    }
    lru_remove(entry);
    if !Arc::ptr_eq(&owner, entry) {
        entry
            .file()
            .extend_size(entry.offset() + (page_offset + bytes) as u64);
    }
    entry.file().set_flags(FileObjectFlags::DIRTY);
    mark_file_object_dirty(entry.file());
}

/// 标净；按需回到 LRU 尾部
pub fn mark_clean(entry: &Arc<PageCacheEntry>, move_to_lru: bool) {
    let owner = entry.owner();
    if owner.clear_flags(PageFlags::DIRTY) {
        DIRTY_PAGES.fetch_sub(1, Ordering::AcqRel);
        if owner.virtual_address().is_some() {
            MAPPED_DIRTY_PAGES.fetch_sub(1, Ordering::AcqRel);
        }
        if move_to_lru {
            lru_insert(&owner);
        }
    }
}

// ========== 逐出与销毁 ==========

/// 归还一次查找引用；被逐出的项在最后引用归还时销毁
pub fn release_entry(entry: Arc<PageCacheEntry>) {
    if entry.release() == 0 && entry.flag_set(PageFlags::EVICTED) {
        finalize_entry(entry, false);
    }
}

/// 自 `from_offset` 起逐出文件的缓存页
///
/// BUSY 的项只打标记留在树上，由冲刷收尾路径移交销毁；其余项
/// 离树进销毁流程。
pub fn evict_file(file: &Arc<FileObject>, from_offset: u64) {
    let mut victims: Vec<Arc<PageCacheEntry>> = Vec::new();
    {
        let mut pages = file.pages.write();
        let keys: Vec<u64> = pages.range(from_offset..).map(|(key, _)| *key).collect();
        for key in keys {
            let entry = match pages.get(&key) {
                Some(entry) => entry.clone(),
                None => continue,
            };
            let newly = entry.set_flags(PageFlags::EVICTED);
            if newly.contains(PageFlags::EVICTED) {
                EVICTED_COUNT.fetch_add(1, Ordering::AcqRel);
            }
            if entry.flag_set(PageFlags::BUSY) {
                continue;
            }
            pages.remove(&key);
            victims.push(entry);
        }
    }
    for victim in &victims {
        lru_remove(victim);
    }
    destroy_entries(victims, false);
}

/// 销毁一批已离树的项
///
/// 仍有引用的项靠 `EVICTED` 标志延迟到最后归还；文件对象引用
/// 不能作为最后一次释放时（递归 I/O），项被推回移除表重试。
pub fn destroy_entries(entries: Vec<Arc<PageCacheEntry>>, avoid_last_file_object_reference: bool) {
    for entry in entries {
        entry.set_flags(PageFlags::EVICTED);
        if entry.release() == 0 {
            finalize_entry(entry, avoid_last_file_object_reference);
        }
    }
}

fn finalize_entry(entry: Arc<PageCacheEntry>, avoid_last_file_object_reference: bool) {
    lru_remove(&entry);
    mark_clean(&entry, false);
    if let Some(address) = entry.take_virtual_address() {
        memory_ops().unmap_page(address);
        MAPPED_PAGES.fetch_sub(1, Ordering::AcqRel);
    }
    if entry.clear_flags(PageFlags::PAGE_OWNER) {
        memory_ops().free_page(entry.physical());
        PHYSICAL_PAGES.fetch_sub(1, Ordering::AcqRel);
    } else if let Some(backing) = entry.take_backing() {
        release_entry(backing);
    }
    // 推回重试的项第二次走到这里，计数只结算一次
    if entry
        .set_flags(PageFlags::ACCOUNTED)
        .contains(PageFlags::ACCOUNTED)
    {
        ENTRY_COUNT.fetch_sub(1, Ordering::AcqRel);
        EVICTED_COUNT.fetch_sub(1, Ordering::AcqRel);
    }
    if entry.file().release(avoid_last_file_object_reference).is_err() {
        // 不能作为最后一次文件引用释放：项带着原有的文件引用
        // 留在移除表里重试
        entry.acquire();
        LISTS.lock().removal.push(entry);
    }
}

/// 清理线程排空移除表
pub(crate) fn drain_removal_list() {
    let taken: Vec<Arc<PageCacheEntry>> = core::mem::take(&mut LISTS.lock().removal);
    for entry in taken {
        if entry.flag_set(PageFlags::BUSY) || entry.reference_count() > 1 {
            LISTS.lock().removal.push(entry);
            continue;
        }
        if entry.release() == 0 {
            finalize_entry(entry, true);
        }
    }
}

// ========== 按压力收缩 ==========

/// 从 LRU 头回收干净页，直到空闲页达到退距或触底
///
/// 回收前先把页从用户映像节解除映射；解除时发现被写脏的页重新
/// 标脏并跳过。缓存缩到理想规模以下后请求虚拟内存层换出。
pub fn trim_lru(avoid_last_file_object_reference: bool) {
    let tunables = tunables();
    let mut postponed: Vec<Arc<PageCacheEntry>> = Vec::new();
    let mut destroy: Vec<Arc<PageCacheEntry>> = Vec::new();
    let mut budget = LISTS.lock().lru.len();

    while budget > 0 {
        budget -= 1;
        if memory_ops().free_physical_pages() >= tunables.headroom_retreat {
            break;
        }
        if ENTRY_COUNT.load(Ordering::Acquire) <= tunables.min_floor {
            break;
        }
        let entry = match LISTS.lock().lru.pop_front() {
            Some((_, entry)) => entry,
            None => break,
        };
        entry.lru_tick().store(0, Ordering::Release);
        if entry.reference_count() > 1 || entry.flag_set(PageFlags::BUSY) {
            postponed.push(entry);
            continue;
        }
        if memory_ops().unmap_image_sections(entry.physical()) {
            // 用户映射期间被写脏：重新入账，不回收
            mark_dirty(&entry, 0, 0);
            continue;
        }
        let removed = {
            let mut pages = entry.file().pages.write();
            pages.remove(&entry.offset())
        };
        if removed.is_none() {
            continue;
        }
        let newly = entry.set_flags(PageFlags::EVICTED);
        if newly.contains(PageFlags::EVICTED) {
            EVICTED_COUNT.fetch_add(1, Ordering::AcqRel);
        }
        destroy.push(entry);
    }
    for entry in postponed {
        lru_insert(&entry);
    }
    destroy_entries(destroy, avoid_last_file_object_reference);

    if ENTRY_COUNT.load(Ordering::Acquire) < tunables.ideal_size
        && memory_ops().free_physical_pages() < tunables.headroom_retreat
    {
        memory_ops().request_page_out(tunables.headroom_trigger);
    }
}

/// 虚拟地址吃紧时从 LRU 头起解除内核映射
pub fn unmap_lru() {
    let tunables = tunables();
    if memory_ops().free_virtual_bytes() >= tunables.va_trigger {
        return;
    }
    let candidates: Vec<Arc<PageCacheEntry>> = {
        let lists = LISTS.lock();
        lists.lru.iter().map(|(_, entry)| entry.clone()).collect()
    };
    for entry in candidates {
        if memory_ops().free_virtual_bytes() >= tunables.va_retreat {
            break;
        }
        if let Some(address) = entry.take_virtual_address() {
            memory_ops().unmap_page(address);
            MAPPED_PAGES.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

// ========== 回写名单 ==========

/// 把文件对象登记到清理线程的回写名单并排期
pub fn mark_file_object_dirty(file: &FileObject) {
    let newly = file.set_flags(FileObjectFlags::FLUSH_LISTED);
    if newly.contains(FileObjectFlags::FLUSH_LISTED) {
        if let Some(holder) = FileObject::lookup(file.device_id, file.file_id) {
            DIRTY_FILES.lock().push(holder);
        }
    }
    cleaner::schedule_cleaning(CLEANER_DELAY_MS);
}

pub(crate) fn take_dirty_files() -> Vec<Arc<FileObject>> {
    core::mem::take(&mut *DIRTY_FILES.lock())
}

/// 文件偏移向下对齐到页边界
pub(crate) fn page_align_down(offset: u64) -> u64 {
    offset & !(PAGE_SIZE as u64 - 1)
}
