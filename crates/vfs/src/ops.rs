//! VFS 运行时操作 trait 定义和注册
//!
//! 此模块定义了 VFS 层需要的三组外部依赖接口：进程上下文
//! （[`KernelOps`]）、下游文件系统与设备（[`DeviceOps`]）以及
//! 物理页与虚拟地址管理（[`MemoryOps`]）。通过 trait 抽象实现
//! 与 os crate 的解耦，os crate 在启动时注册实现。

use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};

use uapi::cred::{Credentials, TaskId};
use uapi::fs::{DeviceId, FileId, FileProperties};
use uapi::signal::SignalMask;
use uapi::time::TimeSpec;

use crate::error::KResult;
use crate::handle_table::HandleTable;
use crate::mount::PathPoint;

/// 进程上下文操作
///
/// VFS 对"当前进程"的全部认知都经过这个接口。
pub trait KernelOps: Send + Sync {
    /// 当前任务编号
    fn current_task(&self) -> TaskId;

    /// 当前任务的凭证
    fn credentials(&self) -> Credentials;

    /// 当前进程的句柄表
    fn handle_table(&self) -> Arc<HandleTable>;

    /// 当前进程的线程数（chroot 要求单线程）
    fn thread_count(&self) -> usize;

    /// 当前工作目录
    fn current_directory(&self) -> Option<PathPoint>;

    /// 设置当前工作目录
    fn set_current_directory(&self, directory: PathPoint);

    /// 当前进程根目录（None 表示全局根）
    fn current_root(&self) -> Option<PathPoint>;

    /// 设置当前进程根目录
    fn set_current_root(&self, root: Option<PathPoint>);

    /// 向任务投递信号
    fn send_signal(&self, task: TaskId, signal: u32);

    /// 安装新的信号掩码，返回旧掩码
    fn set_signal_mask(&self, mask: SignalMask) -> SignalMask;

    /// 当前任务是否有未决信号
    fn signal_pending(&self) -> bool;

    /// 当前时间
    fn timespec_now(&self) -> TimeSpec;
}

/// 下游文件系统与设备操作
///
/// 目录型设备的查找、创建与不经缓存的区间读写都走这里；
/// 内存对象目录（对象管理器）不经过此接口。
pub trait DeviceOps: Send + Sync {
    /// 在设备目录中按名字查找，返回文件属性
    fn device_lookup(
        &self,
        device: DeviceId,
        directory: FileId,
        name: &[u8],
    ) -> KResult<FileProperties>;

    /// 在设备目录中创建文件
    fn device_create(
        &self,
        device: DeviceId,
        directory: FileId,
        name: &[u8],
        properties: &FileProperties,
    ) -> KResult<FileProperties>;

    /// 不经缓存读取区间
    fn read_range(
        &self,
        device: DeviceId,
        file: FileId,
        offset: u64,
        buffer: &mut [u8],
    ) -> KResult<usize>;

    /// 不经缓存写入区间
    fn write_range(
        &self,
        device: DeviceId,
        file: FileId,
        offset: u64,
        buffer: &[u8],
    ) -> KResult<usize>;

    /// 删除目录项
    fn unlink(
        &self,
        device: DeviceId,
        directory: FileId,
        name: &[u8],
        file: FileId,
    ) -> KResult<()>;

    /// 重命名目录项（同设备内原子）
    fn rename(
        &self,
        device: DeviceId,
        source_directory: FileId,
        source_name: &[u8],
        target_directory: FileId,
        target_name: &[u8],
        file: FileId,
    ) -> KResult<()>;

    /// 截断文件
    fn truncate(&self, device: DeviceId, file: FileId, size: u64) -> KResult<()>;

    /// 回写文件属性
    fn write_properties(&self, device: DeviceId, properties: &FileProperties) -> KResult<()>;
}

/// 物理页与虚拟地址管理操作
///
/// 页缓存通过它分配、映射和统计页面；映像节反映射用于在回收
/// 前探测被用户映射写脏的页。
pub trait MemoryOps: Send + Sync {
    /// 分配一个物理页，返回物理地址
    fn allocate_page(&self) -> Option<usize>;

    /// 释放物理页
    fn free_page(&self, physical: usize);

    /// 把物理页映射进内核虚拟地址空间
    fn map_page(&self, physical: usize) -> Option<usize>;

    /// 解除内核虚拟地址映射
    fn unmap_page(&self, virtual_address: usize);

    /// 读取物理页内容
    fn read_page(&self, physical: usize, offset: usize, buffer: &mut [u8]);

    /// 写入物理页内容
    fn write_page(&self, physical: usize, offset: usize, buffer: &[u8]);

    /// 物理页总数
    fn total_physical_pages(&self) -> usize;

    /// 空闲物理页数
    fn free_physical_pages(&self) -> usize;

    /// 内核虚拟地址空间总量（字节）
    fn total_virtual_bytes(&self) -> u64;

    /// 内核虚拟地址空间剩余量（字节）
    fn free_virtual_bytes(&self) -> u64;

    /// 把物理页从所有用户映像节中解除映射；返回页在映射期间是否被写脏
    fn unmap_image_sections(&self, physical: usize) -> bool;

    /// 请求虚拟内存层换出若干页
    fn request_page_out(&self, pages: usize);

    /// 内存告警级别（0 正常，1 紧张，2 危急）
    fn memory_warning_level(&self) -> u32;
}

// ========== 注册（fat pointer 的两个部分分别原子存储） ==========

static KERNEL_OPS_DATA: AtomicUsize = AtomicUsize::new(0);
static KERNEL_OPS_VTABLE: AtomicUsize = AtomicUsize::new(0);

static DEVICE_OPS_DATA: AtomicUsize = AtomicUsize::new(0);
static DEVICE_OPS_VTABLE: AtomicUsize = AtomicUsize::new(0);

static MEMORY_OPS_DATA: AtomicUsize = AtomicUsize::new(0);
static MEMORY_OPS_VTABLE: AtomicUsize = AtomicUsize::new(0);

/// 注册进程上下文操作实现
///
/// # Safety
/// 必须在单线程环境下调用，且只能调用一次
pub unsafe fn register_kernel_ops(ops: &'static dyn KernelOps) {
    let ptr = ops as *const dyn KernelOps;
    // SAFETY: fat pointer 的布局是 (data, vtable)
    let (data, vtable) =
        unsafe { core::mem::transmute::<*const dyn KernelOps, (usize, usize)>(ptr) };
    KERNEL_OPS_DATA.store(data, Ordering::Release);
    KERNEL_OPS_VTABLE.store(vtable, Ordering::Release);
}

/// 注册设备操作实现
///
/// # Safety
/// 必须在单线程环境下调用，且只能调用一次
pub unsafe fn register_device_ops(ops: &'static dyn DeviceOps) {
    let ptr = ops as *const dyn DeviceOps;
    // SAFETY: fat pointer 的布局是 (data, vtable)
    let (data, vtable) =
        unsafe { core::mem::transmute::<*const dyn DeviceOps, (usize, usize)>(ptr) };
    DEVICE_OPS_DATA.store(data, Ordering::Release);
    DEVICE_OPS_VTABLE.store(vtable, Ordering::Release);
}

/// 注册内存操作实现
///
/// # Safety
/// 必须在单线程环境下调用，且只能调用一次
pub unsafe fn register_memory_ops(ops: &'static dyn MemoryOps) {
    let ptr = ops as *const dyn MemoryOps;
    // SAFETY: fat pointer 的布局是 (data, vtable)
    let (data, vtable) =
        unsafe { core::mem::transmute::<*const dyn MemoryOps, (usize, usize)>(ptr) };
    MEMORY_OPS_DATA.store(data, Ordering::Release);
    MEMORY_OPS_VTABLE.store(vtable, Ordering::Release);
}

/// 获取已注册的进程上下文操作实现
///
/// # Panics
/// 如果尚未调用 [`register_kernel_ops`] 注册实现，则 panic
#[inline]
pub fn kernel_ops() -> &'static dyn KernelOps {
    let data = KERNEL_OPS_DATA.load(Ordering::Acquire);
    let vtable = KERNEL_OPS_VTABLE.load(Ordering::Acquire);
    if data == 0 {
        panic!("vfs: KernelOps not registered");
    }
    // SAFETY: 重组 fat pointer
    unsafe { &*core::mem::transmute::<(usize, usize), *const dyn KernelOps>((data, vtable)) }
}

/// 获取已注册的设备操作实现
///
/// # Panics
/// 如果尚未调用 [`register_device_ops`] 注册实现，则 panic
#[inline]
pub fn device_ops() -> &'static dyn DeviceOps {
    let data = DEVICE_OPS_DATA.load(Ordering::Acquire);
    let vtable = DEVICE_OPS_VTABLE.load(Ordering::Acquire);
    if data == 0 {
        panic!("vfs: DeviceOps not registered");
    }
    // SAFETY: 重组 fat pointer
    unsafe { &*core::mem::transmute::<(usize, usize), *const dyn DeviceOps>((data, vtable)) }
}

/// 获取已注册的内存操作实现
///
/// # Panics
/// 如果尚未调用 [`register_memory_ops`] 注册实现，则 panic
#[inline]
pub fn memory_ops() -> &'static dyn MemoryOps {
    let data = MEMORY_OPS_DATA.load(Ordering::Acquire);
    let vtable = MEMORY_OPS_VTABLE.load(Ordering::Acquire);
    if data == 0 {
        panic!("vfs: MemoryOps not registered");
    }
    // SAFETY: 重组 fat pointer
    unsafe { &*core::mem::transmute::<(usize, usize), *const dyn MemoryOps>((data, vtable)) }
}
