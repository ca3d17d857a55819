//! 文件对象管理
//!
//! 文件对象是 `(设备, 文件编号)` 对的规范化元数据与状态，保存在
//! 全局表中。首次查找时创建，由"一个创建者初始化"协议保证只有
//! 一个线程填充内容，其余线程在就绪事件上等待。
//!
//! 引用计数分两路：总引用与路径项引用（后者是前者的子集）。
//! 两者归零且硬链接数为零时对象销毁；递归 I/O 期间的释放可以带
//! "若是最后引用则失败"标志，由调用方稍后重试。

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use hashbrown::HashMap;
use lazy_static::lazy_static;
use sync::{Event, RwSpinLock, SpinLock, WAIT_FOREVER};
use uapi::fs::{DeviceId, FileId, FilePermissions, FileProperties, FileType};
use uapi::poll::PollEvents;
use uapi::time::TimeSpec;

use crate::error::{KResult, KernelError};
use crate::file_lock::FileLockEntry;
use crate::io_state::IoState;
use crate::page_cache::entry::PageCacheEntry;
use crate::stream::StreamBuffer;
use crate::terminal::Terminal;

/// 内存对象（对象管理器）所在的虚拟设备号
pub const OBJECT_DEVICE: DeviceId = 0;

bitflags::bitflags! {
    /// 文件对象状态位（CAS 修改）
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileObjectFlags: u32 {
        /// 初始化已完成
        const INITIALIZED      = 1 << 0;
        /// 存在脏页
        const DIRTY            = 1 << 1;
        /// 属性待回写
        const DIRTY_PROPERTIES = 1 << 2;
        /// 已从命名空间删除
        const DELETED          = 1 << 3;
        /// 已登记到清理线程的冲刷列表
        const FLUSH_LISTED     = 1 << 4;
    }
}

/// 类型特定状态
pub enum SpecialIo {
    /// 管道：一条共享的流缓冲区
    Pipe(Arc<StreamBuffer>),
    /// 终端：主从两端共享的双向流对
    Terminal {
        /// 共享的终端状态
        terminal: Arc<Terminal>,
        /// 本对象是否为主端
        master: bool,
    },
    /// 套接字（协议栈在本层之外）
    Socket,
    /// 内存对象的后备存储（共享内存对象、对象设备上的符号链接）
    Memory(SpinLock<Vec<u8>>),
    /// 对象目录的内存子项表
    ObjectDirectory(SpinLock<HashMap<Vec<u8>, FileProperties>>),
}

/// 可变的文件元数据（文件对象锁保护之外的快照字段）
#[derive(Debug, Clone, Copy)]
pub struct FileMetadata {
    /// 属主用户
    pub user_id: u32,
    /// 属主组
    pub group_id: u32,
    /// 权限位
    pub permissions: FilePermissions,
    /// 硬链接数
    pub hard_link_count: u32,
    /// 访问时间
    pub access_time: TimeSpec,
    /// 修改时间
    pub modified_time: TimeSpec,
    /// 状态变更时间
    pub status_change_time: TimeSpec,
}

/// 文件对象
pub struct FileObject {
    /// 所属设备
    pub device_id: DeviceId,
    /// 设备内文件编号
    pub file_id: FileId,
    /// 文件类型（初始化后不变）
    file_type: SpinLock<FileType>,
    /// 共享-排他文件对象锁；路径项子表操作按"父先于子"的顺序持有
    pub lock: RwSpinLock<()>,
    metadata: SpinLock<FileMetadata>,
    size: AtomicU64,
    ref_count: AtomicUsize,
    path_entry_count: AtomicUsize,
    flags: AtomicU32,
    /// I/O 就绪状态（流式类型另有每流状态）
    pub io_state: IoState,
    /// 页缓存树：偏移到页缓存项
    pub pages: RwSpinLock<alloc::collections::BTreeMap<u64, Arc<PageCacheEntry>>>,
    /// 文件区域锁列表
    pub locks: SpinLock<Vec<FileLockEntry>>,
    /// 锁表变更事件，唤醒阻塞的加锁者
    pub lock_event: Event,
    special: SpinLock<Option<Arc<SpecialIo>>>,
    /// 首次初始化完成事件
    ready: Event,
}

lazy_static! {
    /// 全局文件对象表
    static ref FILE_OBJECTS: SpinLock<HashMap<(DeviceId, FileId), Arc<FileObject>>> =
        SpinLock::new(HashMap::new());
}

impl FileObject {
    fn new(device_id: DeviceId, file_id: FileId) -> Arc<FileObject> {
        Arc::new(FileObject {
            device_id,
            file_id,
            file_type: SpinLock::new(FileType::RegularFile),
            lock: RwSpinLock::new(()),
            metadata: SpinLock::new(FileMetadata {
                user_id: 0,
                group_id: 0,
                permissions: FilePermissions::empty(),
                hard_link_count: 0,
                access_time: TimeSpec::zero(),
                modified_time: TimeSpec::zero(),
                status_change_time: TimeSpec::zero(),
            }),
            size: AtomicU64::new(0),
            ref_count: AtomicUsize::new(1),
            path_entry_count: AtomicUsize::new(0),
            flags: AtomicU32::new(0),
            io_state: IoState::new(PollEvents::IN.union(PollEvents::OUT)),
            pages: RwSpinLock::new(alloc::collections::BTreeMap::new()),
            locks: SpinLock::new(Vec::new()),
            lock_event: Event::new(),
            special: SpinLock::new(None),
            ready: Event::new(),
        })
    }

    /// 按 `(设备, 文件编号)` 查找或创建文件对象
    ///
    /// 返回 `(对象, 是否为创建者)`。创建者负责随后调用
    /// [`FileObject::complete_initialization`]（或失败时
    /// [`FileObject::abort_initialization`]）；非创建者应调用
    /// [`FileObject::wait_ready`] 再使用对象。两种路径都已持有
    /// 一次总引用。
    pub fn lookup_or_create(device_id: DeviceId, file_id: FileId) -> (Arc<FileObject>, bool) {
        let mut table = FILE_OBJECTS.lock();
        if let Some(existing) = table.get(&(device_id, file_id)) {
            existing.acquire();
            return (existing.clone(), false);
        }
        let fresh = Self::new(device_id, file_id);
        table.insert((device_id, file_id), fresh.clone());
        (fresh, true)
    }

    /// 仅查找，不创建
    pub fn lookup(device_id: DeviceId, file_id: FileId) -> Option<Arc<FileObject>> {
        let table = FILE_OBJECTS.lock();
        table.get(&(device_id, file_id)).map(|file| {
            file.acquire();
            file.clone()
        })
    }

    /// 创建者在填充属性后宣告初始化完成
    pub fn complete_initialization(&self, properties: &FileProperties) {
        {
            let mut file_type = self.file_type.lock();
            *file_type = properties.file_type;
        }
        {
            let mut metadata = self.metadata.lock();
            metadata.user_id = properties.user_id;
            metadata.group_id = properties.group_id;
            metadata.permissions = properties.permissions;
            metadata.hard_link_count = properties.hard_link_count;
            metadata.access_time = properties.access_time;
            metadata.modified_time = properties.modified_time;
            metadata.status_change_time = properties.status_change_time;
        }
        self.size.store(properties.size, Ordering::Release);

        let special = match properties.file_type {
            FileType::Pipe => Some(Arc::new(SpecialIo::Pipe(Arc::new(
                StreamBuffer::with_default_capacity(),
            )))),
            FileType::Socket => Some(Arc::new(SpecialIo::Socket)),
            FileType::ObjectDirectory => Some(Arc::new(SpecialIo::ObjectDirectory(
                SpinLock::new(HashMap::new()),
            ))),
            FileType::SharedMemoryObject => {
                Some(Arc::new(SpecialIo::Memory(SpinLock::new(Vec::new()))))
            }
            FileType::SymbolicLink if properties.device_id == OBJECT_DEVICE => {
                Some(Arc::new(SpecialIo::Memory(SpinLock::new(Vec::new()))))
            }
            _ => None,
        };
        if special.is_some() {
            *self.special.lock() = special;
        }

        self.set_flags(FileObjectFlags::INITIALIZED);
        self.ready.signal();
    }

    /// 创建失败时由创建者撤销对象
    pub fn abort_initialization(self: &Arc<Self>) {
        let mut table = FILE_OBJECTS.lock();
        table.remove(&(self.device_id, self.file_id));
        drop(table);
        self.ref_count.fetch_sub(1, Ordering::AcqRel);
        // 唤醒等待者；它们将看到未初始化状态并重试
        self.ready.signal();
    }

    /// 非创建者等待初始化完成
    pub fn wait_ready(&self) -> KResult<()> {
        // 初始化不可中断：创建者很快就会完成或撤销
        self.ready
            .wait(WAIT_FOREVER, false)
            .map_err(KernelError::from)?;
        if self.flag_set(FileObjectFlags::INITIALIZED) {
            Ok(())
        } else {
            Err(KernelError::TryAgain)
        }
    }

    // ========== 引用计数 ==========

    /// 增加一次总引用
    pub fn acquire(&self) {
        self.ref_count.fetch_add(1, Ordering::AcqRel);
    }

    /// 释放一次总引用
    ///
    /// `fail_if_last` 为真且本次释放会触发销毁时不做释放并返回
    /// `TryAgain`，调用方保持对象存活稍后重试（递归 I/O 路径）。
    pub fn release(self: &Arc<Self>, fail_if_last: bool) -> KResult<()> {
        if fail_if_last {
            let mut refs = self.ref_count.load(Ordering::Acquire);
            loop {
                if refs == 1 && self.would_destroy() {
                    return Err(KernelError::TryAgain);
                }
                match self.ref_count.compare_exchange(
                    refs,
                    refs - 1,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        if refs == 1 {
                            self.try_destroy();
                        }
                        return Ok(());
                    }
                    Err(current) => refs = current,
                }
            }
        }
        if self.ref_count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.try_destroy();
        }
        Ok(())
    }

    /// 路径项挂上本对象：同时计入总引用和路径项引用
    pub fn attach_path_entry(&self) {
        self.ref_count.fetch_add(1, Ordering::AcqRel);
        self.path_entry_count.fetch_add(1, Ordering::AcqRel);
    }

    /// 路径项脱离本对象
    pub fn detach_path_entry(self: &Arc<Self>) {
        self.path_entry_count.fetch_sub(1, Ordering::AcqRel);
        if self.ref_count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.try_destroy();
        }
    }

    /// 当前总引用数（测试与卸载繁忙判定使用）
    pub fn reference_count(&self) -> usize {
        self.ref_count.load(Ordering::Acquire)
    }

    /// 当前路径项引用数
    pub fn path_entry_references(&self) -> usize {
        self.path_entry_count.load(Ordering::Acquire)
    }

    fn would_destroy(&self) -> bool {
        self.path_entry_count.load(Ordering::Acquire) == 0
            && self.metadata.lock().hard_link_count == 0
    }

    fn try_destroy(&self) {
        if self.path_entry_count.load(Ordering::Acquire) != 0 {
            return;
        }
        if self.metadata.lock().hard_link_count != 0 {
            return;
        }
        let mut table = FILE_OBJECTS.lock();
        // 守卫：表锁内重查，输掉竞争就把对象留给赢家
        if self.ref_count.load(Ordering::Acquire) == 0 {
            table.remove(&(self.device_id, self.file_id));
        }
    }

    // ========== 属性 ==========

    /// 文件类型
    pub fn file_type(&self) -> FileType {
        *self.file_type.lock()
    }

    /// 文件大小（原子读）
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    /// 设置文件大小（原子写）
    pub fn set_size(&self, size: u64) {
        self.size.store(size, Ordering::Release);
    }

    /// 必要时把文件大小扩展到至少 `size`
    pub fn extend_size(&self, size: u64) {
        self.size.fetch_max(size, Ordering::AcqRel);
    }

    /// 读取元数据快照
    pub fn metadata(&self) -> FileMetadata {
        *self.metadata.lock()
    }

    /// 以闭包修改元数据，并标记属性待回写
    pub fn update_metadata(&self, update: impl FnOnce(&mut FileMetadata)) {
        {
            let mut metadata = self.metadata.lock();
            update(&mut metadata);
        }
        self.notify_properties_update();
    }

    /// 组装完整的文件属性
    pub fn properties(&self) -> FileProperties {
        let metadata = self.metadata();
        FileProperties {
            device_id: self.device_id,
            file_id: self.file_id,
            file_type: self.file_type(),
            user_id: metadata.user_id,
            group_id: metadata.group_id,
            permissions: metadata.permissions,
            hard_link_count: metadata.hard_link_count,
            size: self.size(),
            access_time: metadata.access_time,
            modified_time: metadata.modified_time,
            status_change_time: metadata.status_change_time,
        }
    }

    /// 属性发生变化：置待回写位并调度清理线程
    pub fn notify_properties_update(&self) {
        self.set_flags(FileObjectFlags::DIRTY_PROPERTIES);
        crate::page_cache::mark_file_object_dirty(self);
    }

    /// 标记为已删除
    pub fn mark_deleted(&self) {
        self.set_flags(FileObjectFlags::DELETED);
    }

    // ========== 标志位（CAS） ==========

    /// 置位；返回其中此前未置的位
    pub fn set_flags(&self, flags: FileObjectFlags) -> FileObjectFlags {
        let old = self.flags.fetch_or(flags.bits(), Ordering::AcqRel);
        FileObjectFlags::from_bits_truncate(!old & flags.bits())
    }

    /// 清位；返回之前是否置位
    pub fn clear_flags(&self, flags: FileObjectFlags) -> bool {
        let old = self.flags.fetch_and(!flags.bits(), Ordering::AcqRel);
        old & flags.bits() != 0
    }

    /// 查询标志位
    pub fn flag_set(&self, flags: FileObjectFlags) -> bool {
        self.flags.load(Ordering::Acquire) & flags.bits() == flags.bits()
    }

    // ========== 类型特定状态 ==========

    /// 取类型特定状态
    pub fn special(&self) -> Option<Arc<SpecialIo>> {
        self.special.lock().clone()
    }

    /// 安装类型特定状态（终端创建路径）
    pub fn set_special(&self, special: Arc<SpecialIo>) {
        *self.special.lock() = Some(special);
    }

    /// 管道的流缓冲区
    pub fn pipe_stream(&self) -> Option<Arc<StreamBuffer>> {
        match self.special().as_deref() {
            Some(SpecialIo::Pipe(stream)) => Some(stream.clone()),
            _ => None,
        }
    }
}

/// 全局表中的文件对象数量（调试与测试）
pub fn file_object_count() -> usize {
    FILE_OBJECTS.lock().len()
}
