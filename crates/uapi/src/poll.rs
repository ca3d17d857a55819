//! `poll` 事件与描述符

bitflags::bitflags! {
    /// 轮询事件位
    ///
    /// 普通文件与目录恒定报告 `IN | OUT`。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PollEvents: u32 {
        /// 可读
        const IN             = 1 << 0;
        /// 高优先级可读
        const IN_HIGH        = 1 << 1;
        /// 可写
        const OUT            = 1 << 2;
        /// 高优先级可写
        const OUT_HIGH       = 1 << 3;
        /// 出错
        const ERROR          = 1 << 4;
        /// 对端断开
        const DISCONNECTED   = 1 << 5;
        /// 描述符无效
        const INVALID_HANDLE = 1 << 6;
    }
}

/// 单个被轮询的描述符
///
/// `handle` 为负时该项直接以 `INVALID_HANDLE` 返回并计入结果。
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct PollDescriptor {
    /// 描述符编号
    pub handle: i32,
    /// 关注的事件
    pub events: PollEvents,
    /// 返回的事件
    pub returned_events: PollEvents,
}

impl PollDescriptor {
    /// 构造一个关注 `events` 的轮询项
    pub const fn new(handle: i32, events: PollEvents) -> Self {
        Self {
            handle,
            events,
            returned_events: PollEvents::empty(),
        }
    }
}
