//! 路径项 LRU 缓存
//!
//! 缓存里的项引用计数为零，但仍挂在父的子项列表上、可以被查找
//! 复活。容量按物理内存的一个百分比（以路径项尺寸为单位）封顶；
//! 插入超额时从头部销毁，带防止销毁刚被并发复活的项的守卫。
//! 内存告警一级把目标减半，二级清空缓存。

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::mem::size_of;
use core::sync::atomic::Ordering;

use lazy_static::lazy_static;
use sync::SpinLock;

use crate::config::{ENTRY_CACHE_PERCENT, PAGE_SIZE};
use crate::path_entry::{self, PathEntry};
use crate::util::LruList;

struct EntryCache {
    lru: LruList<Arc<PathEntry>>,
    target: usize,
    base_target: usize,
}

lazy_static! {
    static ref ENTRY_CACHE: SpinLock<EntryCache> = SpinLock::new(EntryCache {
        lru: LruList::new(),
        target: 0,
        base_target: 0,
    });
}

/// 按物理内存总量配置缓存目标
pub fn init(total_physical_pages: usize) {
    let bytes = total_physical_pages * PAGE_SIZE / 100 * ENTRY_CACHE_PERCENT;
    let target = (bytes / size_of::<PathEntry>()).max(16);
    let mut cache = ENTRY_CACHE.lock();
    cache.target = target;
    cache.base_target = target;
}

/// 缓存中的项数（测试）
pub fn len() -> usize {
    ENTRY_CACHE.lock().lru.len()
}

/// 引用计数归零的项进入缓存尾部
///
/// 超过目标时从头部取出待销毁的项；销毁在放开缓存锁之后进行
/// （文件对象锁在锁序上先于缓存锁）。
pub fn insert(entry: Arc<PathEntry>) {
    let mut overflow: Vec<Arc<PathEntry>> = Vec::new();
    {
        let mut cache = ENTRY_CACHE.lock();
        // 守卫：并发 acquire 赢了的话不再入缓存
        if entry.ref_count_raw().load(Ordering::Acquire) != 0 {
            return;
        }
        let tick = cache.lru.push_back(entry.clone());
        entry.cache_tick().store(tick, Ordering::Release);

        while cache.lru.len() > cache.target {
            match cache.lru.pop_front() {
                Some((tick, victim)) => {
                    // 守卫：被并发复活的项已把 tick 清零，跳过
                    if victim.cache_tick().swap(0, Ordering::AcqRel) == tick
                        && victim.ref_count_raw().load(Ordering::Acquire) == 0
                    {
                        overflow.push(victim);
                    }
                }
                None => break,
            }
        }
    }
    for victim in overflow {
        path_entry::destroy(&victim);
    }
}

/// 成功复活的项被从缓存摘除（acquire 0→1 路径）
pub fn remove(entry: &Arc<PathEntry>) {
    let tick = entry.cache_tick().swap(0, Ordering::AcqRel);
    if tick != 0 {
        ENTRY_CACHE.lock().lru.remove(tick);
    }
}

/// 内存告警：一级减半目标，二级清空
pub fn memory_warning(level: u32) {
    let mut victims = Vec::new();
    {
        let mut cache = ENTRY_CACHE.lock();
        match level {
            0 => cache.target = cache.base_target,
            1 => cache.target = (cache.base_target / 2).max(1),
            _ => cache.target = 0,
        }
        while cache.lru.len() > cache.target {
            match cache.lru.pop_front() {
                Some((tick, victim)) => {
                    if victim.cache_tick().swap(0, Ordering::AcqRel) == tick
                        && victim.ref_count_raw().load(Ordering::Acquire) == 0
                    {
                        victims.push(victim);
                    }
                }
                None => break,
            }
        }
    }
    for victim in victims {
        path_entry::destroy(&victim);
    }
}

/// 清理一棵子树下的全部缓存项
///
/// 先把子树摊平成工作列表，再自底向上销毁缓存中的后代；
/// 仍被打开的后代只与父解链，留待各自最后一次释放时消亡。
pub fn clean_cache(root: &Arc<PathEntry>) {
    // 摊平：工作列表按发现顺序生长，反向遍历即自底向上
    let mut flattened: Vec<Arc<PathEntry>> = Vec::new();
    let mut cursor = 0usize;
    flattened.push(root.clone());
    while cursor < flattened.len() {
        let node = flattened[cursor].clone();
        flattened.extend(node.children_snapshot());
        cursor += 1;
    }

    for node in flattened.iter().skip(1).rev() {
        if node.ref_count_raw().load(Ordering::Acquire) == 0 {
            remove(node);
            path_entry::destroy(node);
        } else {
            // 打开中的后代：脱离父亲，自生自灭
            path_entry::unlink(node);
        }
    }
}
