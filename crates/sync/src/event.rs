//! 内核事件
//!
//! 事件是 VFS 等子系统的基本等待原语：等待方挂在事件上，修改共享
//! 状态的一方通过 [`Event::signal`]（粘滞置位）或 [`Event::pulse`]
//! （仅唤醒，条件变量式）通知它们。
//!
//! 等待支持毫秒超时（[`WAIT_FOREVER`] 表示无限等待）与可中断语义：
//! 可中断等待在当前任务有未决信号时以 [`WaitError::Interrupted`] 返回，
//! 由调用方决定要不要换算成"信号后重启"。

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::sched_ops;

/// 表示无限等待的毫秒超时值
pub const WAIT_FOREVER: u64 = u64::MAX;

/// 事件等待的失败方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    /// 超时
    Timeout,
    /// 被未决信号打断
    Interrupted,
}

/// 内核事件
///
/// `signal` 置位后保持置位直到 `reset`，适合"一次性就绪"协议
/// （如文件对象的首次初始化）；`pulse` 只递增代数唤醒当前等待者，
/// 适合"状态变了，重新检查条件"的协议（如锁表变更、流缓冲区变化）。
#[derive(Debug)]
pub struct Event {
    signaled: AtomicBool,
    generation: AtomicU64,
}

impl Event {
    /// 创建一个未置位的事件
    pub const fn new() -> Self {
        Event {
            signaled: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        }
    }

    /// 置位并唤醒所有等待者
    pub fn signal(&self) {
        self.signaled.store(true, Ordering::Release);
        self.generation.fetch_add(1, Ordering::Release);
    }

    /// 仅唤醒当前等待者，不改变置位状态
    pub fn pulse(&self) {
        self.generation.fetch_add(1, Ordering::Release);
    }

    /// 清除置位状态
    pub fn reset(&self) {
        self.signaled.store(false, Ordering::Release);
    }

    /// 事件是否处于置位状态
    pub fn is_signaled(&self) -> bool {
        self.signaled.load(Ordering::Acquire)
    }

    /// 读取当前代数
    ///
    /// 条件变量式用法必须在持有保护共享状态的锁时读取代数，
    /// 释放锁后用 [`Event::wait_for_change`] 等待，否则置锁与等待
    /// 之间的脉冲会丢失。
    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// 等待代数越过 `observed`（或事件置位）
    pub fn wait_for_change(
        &self,
        observed: u64,
        timeout_ms: u64,
        interruptible: bool,
    ) -> Result<(), WaitError> {
        let sched = sched_ops();
        let start = sched.monotonic_ms();

        loop {
            if self.is_signaled() || self.generation.load(Ordering::Acquire) != observed {
                return Ok(());
            }
            if interruptible && sched.signal_pending() {
                return Err(WaitError::Interrupted);
            }
            if timeout_ms != WAIT_FOREVER && sched.monotonic_ms().wrapping_sub(start) >= timeout_ms
            {
                return Err(WaitError::Timeout);
            }
            sched.yield_now();
        }
    }

    /// 等待事件置位或被唤醒
    ///
    /// 返回 `Ok(())` 表示事件置位或代数发生了变化；调用方在条件
    /// 变量式用法中必须重新检查自己的条件。
    pub fn wait(&self, timeout_ms: u64, interruptible: bool) -> Result<(), WaitError> {
        if self.is_signaled() {
            return Ok(());
        }

        let sched = sched_ops();
        let start = sched.monotonic_ms();
        let observed = self.generation.load(Ordering::Acquire);

        loop {
            if self.is_signaled() || self.generation.load(Ordering::Acquire) != observed {
                return Ok(());
            }
            if interruptible && sched.signal_pending() {
                return Err(WaitError::Interrupted);
            }
            if timeout_ms != WAIT_FOREVER && sched.monotonic_ms().wrapping_sub(start) >= timeout_ms
            {
                return Err(WaitError::Timeout);
            }
            sched.yield_now();
        }
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}
