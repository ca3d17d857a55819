//! 同步原语
//!
//! 向其它内核模块提供基本的锁和同步原语，包括自旋锁、共享-排他锁、
//! 中断保护和带超时/可中断语义的内核事件。
//!
//! # 外部依赖
//!
//! 此 crate 通过两个 trait 抽象外部操作：
//!
//! - [`ArchOps`]：中断控制与 CPU 信息，由架构层实现
//! - [`SchedOps`]：让出 CPU、单调时钟与信号查询，由调度器实现
//!
//! 使用前必须分别调用 [`register_arch_ops`] / [`register_sched_ops`] 注册。

#![no_std]

mod event;
mod intr_guard;
mod rw_lock;
mod spin_lock;

pub use event::*;
pub use intr_guard::*;
pub use rw_lock::*;
pub use spin_lock::*;

use core::sync::atomic::{AtomicUsize, Ordering};

/// 架构相关操作
///
/// 由内核的架构层实现并注册，提供中断控制和 CPU 信息。
pub trait ArchOps: Send + Sync {
    /// 读取并禁用本地中断，返回之前的状态字
    ///
    /// # Safety
    /// 调用者必须保证随后用同一个状态字调用 [`ArchOps::restore_interrupts`]
    unsafe fn read_and_disable_interrupts(&self) -> usize;

    /// 恢复中断状态
    ///
    /// # Safety
    /// `flags` 必须是之前 `read_and_disable_interrupts` 返回的值
    unsafe fn restore_interrupts(&self, flags: usize);

    /// 判断状态字中中断是否处于使能状态
    fn interrupts_enabled(&self, flags: usize) -> bool;

    /// 当前 CPU 编号
    fn cpu_id(&self) -> usize;
}

/// 调度器相关操作
///
/// 事件等待循环通过它让出 CPU、读取时间并探测未决信号。
pub trait SchedOps: Send + Sync {
    /// 让出 CPU
    fn yield_now(&self);

    /// 单调毫秒时钟
    fn monotonic_ms(&self) -> u64;

    /// 当前任务编号
    fn current_task(&self) -> u64;

    /// 当前任务是否有未决信号
    fn signal_pending(&self) -> bool;
}

/// 全局架构操作实例（fat pointer 的两个部分）
static ARCH_OPS_DATA: AtomicUsize = AtomicUsize::new(0);
static ARCH_OPS_VTABLE: AtomicUsize = AtomicUsize::new(0);

static SCHED_OPS_DATA: AtomicUsize = AtomicUsize::new(0);
static SCHED_OPS_VTABLE: AtomicUsize = AtomicUsize::new(0);

/// 注册架构操作实现
///
/// # Safety
/// 必须在单线程环境下调用，且只能调用一次
pub unsafe fn register_arch_ops(ops: &'static dyn ArchOps) {
    let ptr = ops as *const dyn ArchOps;
    // SAFETY: fat pointer 的布局是 (data, vtable)
    let (data, vtable) = unsafe { core::mem::transmute::<*const dyn ArchOps, (usize, usize)>(ptr) };
    ARCH_OPS_DATA.store(data, Ordering::Release);
    ARCH_OPS_VTABLE.store(vtable, Ordering::Release);
}

/// 注册调度器操作实现
///
/// # Safety
/// 必须在单线程环境下调用，且只能调用一次
pub unsafe fn register_sched_ops(ops: &'static dyn SchedOps) {
    let ptr = ops as *const dyn SchedOps;
    // SAFETY: fat pointer 的布局是 (data, vtable)
    let (data, vtable) =
        unsafe { core::mem::transmute::<*const dyn SchedOps, (usize, usize)>(ptr) };
    SCHED_OPS_DATA.store(data, Ordering::Release);
    SCHED_OPS_VTABLE.store(vtable, Ordering::Release);
}

/// 获取架构操作实例
#[inline]
pub(crate) fn arch_ops() -> &'static dyn ArchOps {
    let data = ARCH_OPS_DATA.load(Ordering::Acquire);
    let vtable = ARCH_OPS_VTABLE.load(Ordering::Acquire);
    if data == 0 {
        panic!("sync: ArchOps not registered, call register_arch_ops first");
    }
    // SAFETY: data 和 vtable 是通过 register_arch_ops 设置的有效指针
    unsafe { &*core::mem::transmute::<(usize, usize), *const dyn ArchOps>((data, vtable)) }
}

/// 获取调度器操作实例
#[inline]
pub fn sched_ops() -> &'static dyn SchedOps {
    let data = SCHED_OPS_DATA.load(Ordering::Acquire);
    let vtable = SCHED_OPS_VTABLE.load(Ordering::Acquire);
    if data == 0 {
        panic!("sync: SchedOps not registered, call register_sched_ops first");
    }
    // SAFETY: data 和 vtable 是通过 register_sched_ops 设置的有效指针
    unsafe { &*core::mem::transmute::<(usize, usize), *const dyn SchedOps>((data, vtable)) }
}
