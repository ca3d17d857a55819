//! 路径项树
//!
//! 路径项是命名树中的一个节点：名字字节加预计算 CRC-32 散列、
//! 指向父的强指针、由父拥有的子项列表、文件对象指针与否定标志。
//! 父子相互强引用构成环，由显式的 [`unlink`] 在引用归零前切断
//! 兄弟链；销毁动作在最后一次释放时运行。
//!
//! 引用计数驱动缓存策略：计数降到零的可缓存项进入全局 LRU 缓存
//! 尾部，再次成功引用时从缓存摘除、计数回到 1。`mount_count > 0`
//! 的项不会被改名、删除或淘汰。

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use sync::SpinLock;

use crate::entry_cache;
use crate::file_object::FileObject;
use crate::util::name_hash;

bitflags::bitflags! {
    /// 路径项标志位
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PathEntryFlags: u32 {
        /// 存在性已被证伪（没有文件对象）
        const NEGATIVE    = 1 << 0;
        /// 不进入缓存
        const NO_CACHE    = 1 << 1;
        /// 正被卸载，不进入缓存
        const FOR_UNMOUNT = 1 << 2;
    }
}

/// 命名树节点
pub struct PathEntry {
    name: Option<Vec<u8>>,
    hash: u32,
    parent: SpinLock<Option<Arc<PathEntry>>>,
    children: SpinLock<Vec<Arc<PathEntry>>>,
    file_object: SpinLock<Option<Arc<FileObject>>>,
    flags: AtomicU32,
    mount_count: AtomicUsize,
    ref_count: AtomicUsize,
    /// 在全局缓存中的刻度；0 表示不在缓存
    cache_tick: AtomicU64,
}

impl PathEntry {
    /// 创建有名字的路径项；`file` 为 None 时是否定项
    pub fn new(name: &[u8], file: Option<Arc<FileObject>>) -> Arc<PathEntry> {
        let negative = file.is_none();
        if let Some(ref file) = file {
            file.attach_path_entry();
        }
        Arc::new(PathEntry {
            name: Some(name.to_vec()),
            hash: name_hash(name),
            parent: SpinLock::new(None),
            children: SpinLock::new(Vec::new()),
            file_object: SpinLock::new(file),
            flags: AtomicU32::new(if negative {
                PathEntryFlags::NEGATIVE.bits()
            } else {
                0
            }),
            mount_count: AtomicUsize::new(0),
            ref_count: AtomicUsize::new(1),
            cache_tick: AtomicU64::new(0),
        })
    }

    /// 创建匿名路径项（管道、套接字等无目录位置的对象）
    pub fn new_anonymous(file: Arc<FileObject>) -> Arc<PathEntry> {
        file.attach_path_entry();
        Arc::new(PathEntry {
            name: None,
            hash: 0,
            parent: SpinLock::new(None),
            children: SpinLock::new(Vec::new()),
            file_object: SpinLock::new(Some(file)),
            flags: AtomicU32::new(PathEntryFlags::NO_CACHE.bits()),
            mount_count: AtomicUsize::new(0),
            ref_count: AtomicUsize::new(1),
            cache_tick: AtomicU64::new(0),
        })
    }

    /// 名字字节
    pub fn name(&self) -> Option<&[u8]> {
        self.name.as_deref()
    }

    /// 预计算的名字散列
    pub fn hash(&self) -> u32 {
        self.hash
    }

    /// 是否匿名（无目录位置）
    pub fn is_anonymous(&self) -> bool {
        self.name.is_none()
    }

    // ========== 引用计数与缓存互动 ==========

    /// 增加引用；从缓存复活的项被同时摘出缓存
    pub fn acquire(self: &Arc<Self>) {
        let old = self.ref_count.fetch_add(1, Ordering::AcqRel);
        if old == 0 {
            entry_cache::remove(self);
        }
    }

    /// 释放引用；归零的可缓存项进入缓存尾部，否则就地销毁
    pub fn release(self: &Arc<Self>) {
        if self.ref_count.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        let cacheable = !self.is_anonymous()
            && !self.flag_set(PathEntryFlags::NO_CACHE)
            && !self.flag_set(PathEntryFlags::FOR_UNMOUNT)
            && self.mount_count() == 0;
        if cacheable {
            entry_cache::insert(self.clone());
        } else {
            destroy(self);
        }
    }

    /// 当前引用计数
    pub fn reference_count(&self) -> usize {
        self.ref_count.load(Ordering::Acquire)
    }

    pub(crate) fn cache_tick(&self) -> &AtomicU64 {
        &self.cache_tick
    }

    pub(crate) fn ref_count_raw(&self) -> &AtomicUsize {
        &self.ref_count
    }

    // ========== 标志位 ==========

    /// 查询标志
    pub fn flag_set(&self, flags: PathEntryFlags) -> bool {
        self.flags.load(Ordering::Acquire) & flags.bits() == flags.bits()
    }

    /// 置标志
    pub fn set_flags(&self, flags: PathEntryFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    /// 是否为否定项
    pub fn is_negative(&self) -> bool {
        self.flag_set(PathEntryFlags::NEGATIVE)
    }

    // ========== 挂载计数 ==========

    /// 作为挂载目标的挂载数
    pub fn mount_count(&self) -> usize {
        self.mount_count.load(Ordering::Acquire)
    }

    /// 增加挂载计数
    pub fn increment_mount_count(&self) {
        self.mount_count.fetch_add(1, Ordering::AcqRel);
    }

    /// 减少挂载计数
    pub fn decrement_mount_count(&self) {
        self.mount_count.fetch_sub(1, Ordering::AcqRel);
    }

    // ========== 文件对象 ==========

    /// 关联的文件对象；否定项返回 None
    pub fn file_object(&self) -> Option<Arc<FileObject>> {
        self.file_object.lock().clone()
    }

    /// 把否定项原地转正（创建命中同名否定项时）
    pub fn convert_negative(&self, file: Arc<FileObject>) {
        file.attach_path_entry();
        *self.file_object.lock() = Some(file);
        self.flags
            .fetch_and(!PathEntryFlags::NEGATIVE.bits(), Ordering::AcqRel);
    }

    // ========== 树结构 ==========

    /// 父路径项
    pub fn parent(&self) -> Option<Arc<PathEntry>> {
        self.parent.lock().clone()
    }

    /// 在子项列表中按散列与字节精确匹配查找
    ///
    /// 调用者应持有父文件对象的共享锁。
    pub fn find_child(&self, name: &[u8], hash: u32) -> Option<Arc<PathEntry>> {
        let children = self.children.lock();
        children
            .iter()
            .find(|child| child.hash == hash && child.name.as_deref() == Some(name))
            .cloned()
    }

    /// 把 `child` 挂到本项的子列表
    ///
    /// 调用者应持有父文件对象的排他锁。
    pub fn add_child(self: &Arc<Self>, child: &Arc<PathEntry>) {
        *child.parent.lock() = Some(self.clone());
        self.children.lock().push(child.clone());
    }

    /// 子项数量（测试）
    pub fn child_count(&self) -> usize {
        self.children.lock().len()
    }

    /// 拍一份子项列表快照（clean_cache 的摊平遍历）
    pub fn children_snapshot(&self) -> Vec<Arc<PathEntry>> {
        self.children.lock().clone()
    }
}

/// 把路径项从父的兄弟链上摘除
///
/// 按"父先于子"的顺序持有两端的文件对象排他锁。
pub fn unlink(entry: &Arc<PathEntry>) {
    let parent = entry.parent.lock().take();
    if let Some(parent) = parent {
        let parent_file = parent.file_object();
        let _parent_guard = parent_file.as_ref().map(|file| file.lock.write());
        let entry_file = entry.file_object();
        let _entry_guard = entry_file.as_ref().map(|file| file.lock.write());

        let mut children = parent.children.lock();
        children.retain(|child| !Arc::ptr_eq(child, entry));
    }
}

/// 销毁路径项：脱链、与文件对象解绑
///
/// 只能对引用计数为零（或从未发布）的项调用。
pub fn destroy(entry: &Arc<PathEntry>) {
    unlink(entry);
    let file = entry.file_object.lock().take();
    if let Some(file) = file {
        file.detach_path_entry();
    }
}
