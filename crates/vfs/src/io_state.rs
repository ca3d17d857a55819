//! I/O 就绪状态
//!
//! 每个文件对象（对流式类型是每个流）携带一份 [`IoState`]：
//! 当前就绪事件位、状态变化事件和可选的异步信号所有权记录。
//! 轮询读取事件位，阻塞 I/O 挂在事件上等待变化。

use core::sync::atomic::{AtomicU32, Ordering};

use sync::{Event, SpinLock};
use uapi::cred::{Capabilities, TaskId};
use uapi::poll::PollEvents;
use uapi::signal::SIGNAL_IO;

use crate::ops::kernel_ops;

/// 异步信号所有权记录
///
/// 除所有者任务外还拍下设置者的真实/有效用户与能力快照，
/// 使信号投递不会越过设置者当时的权限。
#[derive(Debug, Clone, Copy)]
pub struct AsyncOwner {
    /// 接收信号的任务
    pub task: TaskId,
    /// 设置者的实际用户
    pub real_user_id: u32,
    /// 设置者的有效用户
    pub effective_user_id: u32,
    /// 设置者的能力快照
    pub capabilities: Capabilities,
}

/// I/O 就绪状态
#[derive(Debug)]
pub struct IoState {
    events: AtomicU32,
    /// 状态变化事件；每次事件位改变时脉冲唤醒等待者
    pub event: Event,
    async_owner: SpinLock<Option<AsyncOwner>>,
}

impl IoState {
    /// 以初始事件位构造
    pub const fn new(initial: PollEvents) -> Self {
        IoState {
            events: AtomicU32::new(initial.bits()),
            event: Event::new(),
            async_owner: SpinLock::new(None),
        }
    }

    /// 当前就绪事件位
    pub fn poll(&self) -> PollEvents {
        PollEvents::from_bits_truncate(self.events.load(Ordering::Acquire))
    }

    /// 置位事件并唤醒等待者；新置位的就绪事件通知异步所有者
    pub fn raise(&self, events: PollEvents) {
        let old = self.events.fetch_or(events.bits(), Ordering::AcqRel);
        if old & events.bits() != events.bits() {
            self.event.pulse();
            self.notify_async_owner();
        }
    }

    /// 清除事件位并唤醒等待者
    pub fn clear(&self, events: PollEvents) {
        let old = self.events.fetch_and(!events.bits(), Ordering::AcqRel);
        if old & events.bits() != 0 {
            self.event.pulse();
        }
    }

    /// 读取异步信号所有权记录
    pub fn async_owner(&self) -> Option<AsyncOwner> {
        *self.async_owner.lock()
    }

    /// 设置（或清除）异步信号所有权记录
    pub fn set_async_owner(&self, owner: Option<AsyncOwner>) {
        *self.async_owner.lock() = owner;
    }

    fn notify_async_owner(&self) {
        let owner = *self.async_owner.lock();
        if let Some(owner) = owner {
            kernel_ops().send_signal(owner.task, SIGNAL_IO);
        }
    }
}
