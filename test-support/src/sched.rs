//! 调度器与架构桩
//!
//! 宿主线程就是"任务"：让出即 `thread::yield_now`，时钟来自
//! 进程启动后的单调时间。中断控制是空转——宿主上自旋锁本身
//! 就足够。

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use sync::{ArchOps, SchedOps};

lazy_static::lazy_static! {
    static ref START: Instant = Instant::now();
}

/// 测试调度器（同时充当架构桩）
pub struct TestSched {
    next_task: AtomicU64,
    signal_pending: AtomicBool,
}

std::thread_local! {
    static CURRENT_TASK: std::cell::Cell<u64> = const { std::cell::Cell::new(0) };
}

/// 全局实例
pub static TEST_SCHED: TestSched = TestSched {
    next_task: AtomicU64::new(1),
    signal_pending: AtomicBool::new(false),
};

impl TestSched {
    /// 当前线程的任务编号（首次访问时分配）
    pub fn task_of_current_thread(&self) -> u64 {
        CURRENT_TASK.with(|cell| {
            if cell.get() == 0 {
                cell.set(self.next_task.fetch_add(1, Ordering::Relaxed));
            }
            cell.get()
        })
    }

    /// 设置或清除"有未决信号"
    pub fn set_signal_pending(&self, pending: bool) {
        self.signal_pending.store(pending, Ordering::Release);
    }
}

impl SchedOps for TestSched {
    fn yield_now(&self) {
        std::thread::yield_now();
    }

    fn monotonic_ms(&self) -> u64 {
        START.elapsed().as_millis() as u64
    }

    fn current_task(&self) -> u64 {
        self.task_of_current_thread()
    }

    fn signal_pending(&self) -> bool {
        self.signal_pending.load(Ordering::Acquire)
    }
}

impl ArchOps for TestSched {
    unsafe fn read_and_disable_interrupts(&self) -> usize {
        1
    }

    unsafe fn restore_interrupts(&self, _flags: usize) {}

    fn interrupts_enabled(&self, flags: usize) -> bool {
        flags != 0
    }

    fn cpu_id(&self) -> usize {
        0
    }
}
