//! 挂载点树
//!
//! 挂载树覆盖在路径项树之上：每个挂载点用目标根路径项替换被覆盖
//! 路径项的子树。支持绑定挂载、递归复制子挂载、在被覆盖路径项
//! 出现的所有位置同时生效的联动挂载，以及惰性（脱链）卸载。
//!
//! 全部结构性修改都在全局挂载锁排他段内完成；名字查找以共享方式
//! 持有它。[`PathPoint`] 是贯穿全系统的 `{路径项, 挂载点}` 绑定对，
//! Clone/Drop 同时增减两者的引用。

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use lazy_static::lazy_static;
use sync::{RwSpinLock, SpinLock};
use uapi::cred::Capabilities;
use uapi::mount::MountFlags;

use crate::error::{KResult, KernelError};
use crate::ops::kernel_ops;
use crate::path_entry::{PathEntry, PathEntryFlags};

/// 挂载点
pub struct MountPoint {
    parent: SpinLock<Option<Arc<MountPoint>>>,
    /// 被本挂载覆盖的路径项（父树中的挂载目标）
    mount_entry: Arc<PathEntry>,
    /// 暴露出来的根路径项
    target_entry: Arc<PathEntry>,
    /// 挂载时解析出的目标路径（仅用于报告）
    target_path: SpinLock<Vec<u8>>,
    flags: MountFlags,
    /// 已被惰性卸载（与父脱链但仍有引用）
    detached: AtomicBool,
    ref_count: AtomicUsize,
    children: SpinLock<Vec<Arc<MountPoint>>>,
}

lazy_static! {
    /// 全局挂载锁：结构修改排他，查找共享
    static ref MOUNT_LOCK: RwSpinLock<()> = RwSpinLock::new(());
    static ref ROOT_MOUNT: SpinLock<Option<Arc<MountPoint>>> = SpinLock::new(None);
}

impl MountPoint {
    /// 创建挂载点；为两端路径项各取一次引用，自身引用从 1 起
    /// （父子列表所有权），尚未挂进树。
    fn new(
        mount_entry: Arc<PathEntry>,
        target_entry: Arc<PathEntry>,
        target_path: Vec<u8>,
        flags: MountFlags,
    ) -> Arc<MountPoint> {
        mount_entry.acquire();
        target_entry.acquire();
        Arc::new(MountPoint {
            parent: SpinLock::new(None),
            mount_entry,
            target_entry,
            target_path: SpinLock::new(target_path),
            flags,
            detached: AtomicBool::new(false),
            ref_count: AtomicUsize::new(1),
            children: SpinLock::new(Vec::new()),
        })
    }

    /// 被覆盖的路径项
    pub fn mount_entry(&self) -> &Arc<PathEntry> {
        &self.mount_entry
    }

    /// 暴露的根路径项
    pub fn target_entry(&self) -> &Arc<PathEntry> {
        &self.target_entry
    }

    /// 父挂载点；全局根和已脱链挂载返回 None
    pub fn parent(&self) -> Option<Arc<MountPoint>> {
        self.parent.lock().clone()
    }

    /// 挂载标志
    pub fn flags(&self) -> MountFlags {
        self.flags
    }

    /// 是否已被惰性卸载
    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    /// 报告用的目标路径
    pub fn target_path(&self) -> Vec<u8> {
        self.target_path.lock().clone()
    }

    /// 增加引用
    pub fn acquire(&self) {
        self.ref_count.fetch_add(1, Ordering::AcqRel);
    }

    /// 释放引用；归零时归还两端路径项的引用
    pub fn release(&self) {
        if self.ref_count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.mount_entry.release();
            self.target_entry.release();
        }
    }

    /// 当前引用计数
    pub fn reference_count(&self) -> usize {
        self.ref_count.load(Ordering::Acquire)
    }

    /// 子挂载快照
    pub fn children_snapshot(&self) -> Vec<Arc<MountPoint>> {
        self.children.lock().clone()
    }
}

/// `{路径项, 挂载点}` 绑定对
///
/// Clone 同时增加两者的引用，Drop 同时释放。
pub struct PathPoint {
    /// 路径项
    pub entry: Arc<PathEntry>,
    /// 所处挂载点
    pub mount: Arc<MountPoint>,
}

impl PathPoint {
    /// 构造并取引用
    pub fn new(entry: Arc<PathEntry>, mount: Arc<MountPoint>) -> PathPoint {
        entry.acquire();
        mount.acquire();
        PathPoint { entry, mount }
    }

    /// 接管调用者已持有的路径项引用，仅对挂载点取引用
    pub fn adopt(entry: Arc<PathEntry>, mount: Arc<MountPoint>) -> PathPoint {
        mount.acquire();
        PathPoint { entry, mount }
    }

    /// 两个路径点是否指向同一位置
    pub fn same_location(&self, other: &PathPoint) -> bool {
        Arc::ptr_eq(&self.entry, &other.entry) && Arc::ptr_eq(&self.mount, &other.mount)
    }

    /// 本点是否是所处挂载的根
    pub fn is_mount_root(&self) -> bool {
        Arc::ptr_eq(&self.entry, self.mount.target_entry())
    }
}

impl Clone for PathPoint {
    fn clone(&self) -> Self {
        PathPoint::new(self.entry.clone(), self.mount.clone())
    }
}

impl Drop for PathPoint {
    fn drop(&mut self) {
        self.entry.release();
        self.mount.release();
    }
}

/// 建立全局根挂载
pub fn init(root_entry: &Arc<PathEntry>) {
    let root = MountPoint::new(
        root_entry.clone(),
        root_entry.clone(),
        alloc::vec![b'/'],
        MountFlags::empty(),
    );
    root_entry.increment_mount_count();
    *ROOT_MOUNT.lock() = Some(root);
}

fn root_mount() -> Arc<MountPoint> {
    ROOT_MOUNT
        .lock()
        .clone()
        .expect("vfs: mount tree not initialized")
}

/// 全局根路径点
pub fn root_point() -> PathPoint {
    let root = root_mount();
    let entry = root.target_entry().clone();
    PathPoint::new(entry, root)
}

/// 沿覆盖链下行：若路径项被挂载覆盖则走进最新的覆盖挂载
///
/// 查找命中挂载目标项时调用；`NO_MOUNT_POINT` 查找不走这里。
pub fn enter_mount(point: PathPoint) -> PathPoint {
    let _guard = MOUNT_LOCK.read();
    let mut current = point;
    loop {
        if current.entry.mount_count() == 0 {
            return current;
        }
        // 首个匹配即最新生效的覆盖（原始挂载插在子列表头部）
        let covering = current
            .mount
            .children_snapshot()
            .into_iter()
            .find(|child| Arc::ptr_eq(child.mount_entry(), &current.entry));
        match covering {
            Some(mount) => {
                let entry = mount.target_entry().clone();
                current = PathPoint::new(entry, mount);
            }
            None => return current,
        }
    }
}

/// 取路径点的父（`..` 语义）
///
/// 挂载根先退到父挂载中的被覆盖项再取父；给定进程根时永不越过它。
pub fn get_parent(process_root: Option<&PathPoint>, point: &PathPoint) -> PathPoint {
    if let Some(root) = process_root {
        if point.same_location(root) {
            return point.clone();
        }
    }
    let mut current = point.clone();
    loop {
        if current.is_mount_root() {
            match current.mount.parent() {
                // 全局根或已脱链挂载：父是自己
                None => return current,
                Some(parent_mount) => {
                    let entry = current.mount.mount_entry().clone();
                    current = PathPoint::new(entry, parent_mount);
                    // 叠放的挂载：继续向外层退
                    continue;
                }
            }
        }
        return match current.entry.parent() {
            Some(parent) => PathPoint::new(parent, current.mount.clone()),
            None => current,
        };
    }
}

/// 自根向下组装路径点的全路径
///
/// 链条中出现惰性脱链的挂载时，在结果前面冠以字面量
/// `(unreachable)/`。`stop_at` 为进程根：到达即视为根。
pub fn get_path_from_root(point: &PathPoint, stop_at: Option<&PathPoint>) -> Vec<u8> {
    let _guard = MOUNT_LOCK.read();
    let global_root = root_mount();

    // 第一遍：收集叶到根的名字
    let mut names: Vec<Vec<u8>> = Vec::new();
    let mut unreachable = false;
    let mut current = point.clone();
    loop {
        if let Some(stop) = stop_at {
            if current.same_location(stop) {
                break;
            }
        }
        if current.is_mount_root() {
            if Arc::ptr_eq(&current.mount, &global_root) {
                break;
            }
            match current.mount.parent() {
                Some(parent_mount) => {
                    let entry = current.mount.mount_entry().clone();
                    current = PathPoint::new(entry, parent_mount);
                }
                None => {
                    unreachable = true;
                    break;
                }
            }
            continue;
        }
        match current.entry.parent() {
            Some(parent) => {
                if let Some(name) = current.entry.name() {
                    names.push(name.to_vec());
                }
                current = PathPoint::new(parent, current.mount.clone());
            }
            None => break,
        }
    }

    // 第二遍：自右向左写出
    let mut path: Vec<u8> = Vec::new();
    if unreachable {
        path.extend_from_slice(b"(unreachable)");
    }
    if names.is_empty() {
        path.push(b'/');
    } else {
        for name in names.iter().rev() {
            path.push(b'/');
            path.extend_from_slice(name);
        }
    }
    path
}

/// `entry` 在不越过挂载边界的情况下是否位于 `ancestor` 之下
fn entry_under(entry: &Arc<PathEntry>, ancestor: &Arc<PathEntry>) -> bool {
    let mut cursor = entry.clone();
    loop {
        if Arc::ptr_eq(&cursor, ancestor) {
            return true;
        }
        match cursor.parent() {
            Some(parent) => cursor = parent,
            None => return false,
        }
    }
}

/// 收集整棵挂载树（先序）
fn collect_tree(root: &Arc<MountPoint>, out: &mut Vec<Arc<MountPoint>>) {
    out.push(root.clone());
    for child in root.children_snapshot() {
        collect_tree(&child, out);
    }
}

/// 挂载
///
/// `mount_point` 是要被覆盖的位置，`target` 是要暴露的子树根。
/// 先构成本地列表（主挂载、递归/联动复制的挂载、联动位置的配对
/// 挂载），全部成功后一次性拼进活动树；任何失败都把已生成的挂载
/// 点销毁并回滚挂载计数。
pub fn mount(
    from_kernel: bool,
    mount_point: &PathPoint,
    target: &PathPoint,
    flags: MountFlags,
) -> KResult<()> {
    if !from_kernel
        && !kernel_ops()
            .credentials()
            .capabilities
            .contains(Capabilities::MOUNT)
    {
        return Err(KernelError::AccessDenied);
    }
    // 挂载目标不能自身就是一个挂载的根
    if mount_point.is_mount_root() {
        return Err(KernelError::NotMountable);
    }
    let directory = mount_point
        .entry
        .file_object()
        .ok_or(KernelError::PathNotFound)?;
    if !directory.file_type().is_directory() {
        return Err(KernelError::NotADirectory);
    }

    // 步骤 1：报告路径 + 挂载计数（文件对象共享锁内，0→1 允许：
    // 锁序上文件对象锁先于路径项缓存锁）
    let target_path = get_path_from_root(target, None);
    {
        let _guard = directory.lock.read();
        mount_point.entry.increment_mount_count();
    }

    // 步骤 2：整个操作持排他挂载锁
    let _mount_guard = MOUNT_LOCK.write();

    let mut produced: Vec<(Arc<MountPoint>, Arc<MountPoint>, bool)> = Vec::new();

    // 步骤 3：主挂载点 + 复制目标子树中的子挂载
    let primary = MountPoint::new(
        mount_point.entry.clone(),
        target.entry.clone(),
        target_path.clone(),
        flags & (MountFlags::BIND | MountFlags::RECURSIVE | MountFlags::LINKED),
    );
    produced.push((primary.clone(), mount_point.mount.clone(), false));

    let recursive = flags.contains(MountFlags::RECURSIVE) && flags.contains(MountFlags::BIND);
    for child in target.mount.children_snapshot() {
        if !entry_under(child.mount_entry(), &target.entry) {
            continue;
        }
        if !recursive && !child.flags().contains(MountFlags::LINKED) {
            continue;
        }
        child.mount_entry().increment_mount_count();
        let copy = MountPoint::new(
            child.mount_entry().clone(),
            child.target_entry().clone(),
            child.target_path(),
            child.flags(),
        );
        produced.push((copy, primary.clone(), false));
    }

    // 步骤 4：联动挂载在被覆盖路径项出现的所有其它位置配对生效
    if flags.contains(MountFlags::LINKED) {
        let mut all = Vec::new();
        collect_tree(&root_mount(), &mut all);
        for other in all {
            if Arc::ptr_eq(&other, &mount_point.mount) {
                continue;
            }
            if !entry_under(&mount_point.entry, other.target_entry()) {
                continue;
            }
            mount_point.entry.increment_mount_count();
            let paired = MountPoint::new(
                mount_point.entry.clone(),
                target.entry.clone(),
                target_path.clone(),
                flags & (MountFlags::BIND | MountFlags::RECURSIVE | MountFlags::LINKED),
            );
            produced.push((paired, other, true));
        }
    }

    // 步骤 5：拼接。原始挂载插在父子列表头部，联动挂载追加到尾部。
    for (mount, parent, at_tail) in &produced {
        *mount.parent.lock() = Some(parent.clone());
        let mut children = parent.children.lock();
        if *at_tail {
            children.push(mount.clone());
        } else {
            children.insert(0, mount.clone());
        }
    }
    Ok(())
}

/// 卸载繁忙判定：基线引用（父列表 1 + 原始挂载的调用者 1）之外
/// 还有引用、存在非联动子挂载、或联动子挂载有额外引用。
fn is_busy(mount: &Arc<MountPoint>, baseline: usize) -> bool {
    if mount.reference_count() > baseline {
        return true;
    }
    for child in mount.children_snapshot() {
        if !child.flags().contains(MountFlags::LINKED) {
            return true;
        }
        if child.reference_count() > 1 {
            return true;
        }
    }
    false
}

/// 把挂载子树摊进销毁列表；每个成员与父脱链
fn detach_subtree(mount: &Arc<MountPoint>, out: &mut Vec<Arc<MountPoint>>) {
    for child in mount.children_snapshot() {
        detach_subtree(&child, out);
    }
    if let Some(parent) = mount.parent.lock().take() {
        let mut children = parent.children.lock();
        children.retain(|c| !Arc::ptr_eq(c, mount));
    }
    mount.detached.store(true, Ordering::Release);
    mount.mount_entry().decrement_mount_count();
    mount
        .target_entry()
        .set_flags(PathEntryFlags::FOR_UNMOUNT);
    out.push(mount.clone());
}

/// 卸载
///
/// `point` 必须是挂载根。非 `DETACH` 卸载在繁忙时返回
/// `ResourceInUse`；`DETACH` 卸载立即脱链，把存活交给未归零的
/// 引用。联动挂载在所有联动位置一并卸载。
pub fn unmount(point: &PathPoint, flags: MountFlags) -> KResult<()> {
    if !point.is_mount_root() {
        return Err(KernelError::NotAMountPoint);
    }
    let mount = point.mount.clone();
    if Arc::ptr_eq(&mount, &root_mount()) {
        return Err(KernelError::ResourceInUse);
    }

    let _mount_guard = MOUNT_LOCK.write();

    // 联动亲属：同一被覆盖项、同一目标根的其它挂载
    let mut relatives: Vec<Arc<MountPoint>> = Vec::new();
    if mount.flags().contains(MountFlags::LINKED) {
        let mut all = Vec::new();
        collect_tree(&root_mount(), &mut all);
        for other in all {
            if Arc::ptr_eq(&other, &mount) {
                continue;
            }
            if Arc::ptr_eq(other.mount_entry(), mount.mount_entry())
                && Arc::ptr_eq(other.target_entry(), mount.target_entry())
            {
                relatives.push(other);
            }
        }
    }

    if !flags.contains(MountFlags::DETACH) {
        // 基线：父列表 1 + 调用者路径点 1
        if is_busy(&mount, 2) {
            return Err(KernelError::ResourceInUse);
        }
        for relative in &relatives {
            if is_busy(relative, 1) {
                return Err(KernelError::ResourceInUse);
            }
        }
    }

    let mut destroy_list: Vec<Arc<MountPoint>> = Vec::new();
    detach_subtree(&mount, &mut destroy_list);
    for relative in &relatives {
        detach_subtree(relative, &mut destroy_list);
    }
    drop(_mount_guard);

    // 归还父列表持有的那一次引用；未归零的（惰性卸载）自生自灭
    for member in destroy_list {
        member.release();
    }
    Ok(())
}
