//! 轮询
//!
//! 逐描述符求值就绪事件：负描述符以 `INVALID_HANDLE` 回报并计数，
//! 普通文件与目录恒定 `IN|OUT`，流式类型取各自的 I/O 状态。可选
//! 信号掩码在轮询期间安装、退出时恢复。

use sync::{sched_ops, WAIT_FOREVER};
use uapi::fs::FileType;
use uapi::poll::{PollDescriptor, PollEvents};
use uapi::signal::SignalMask;

use crate::error::{KResult, KernelError};
use crate::ops::kernel_ops;

/// 无论请求什么都回报的事件
fn always_reported() -> PollEvents {
    PollEvents::ERROR | PollEvents::DISCONNECTED | PollEvents::INVALID_HANDLE
}

fn evaluate(descriptors: &mut [PollDescriptor]) -> usize {
    let table = kernel_ops().handle_table();
    let mut ready = 0usize;
    for descriptor in descriptors.iter_mut() {
        descriptor.returned_events = PollEvents::empty();
        if descriptor.handle < 0 {
            descriptor.returned_events = PollEvents::INVALID_HANDLE;
            ready += 1;
            continue;
        }
        let handle = match table.get(descriptor.handle) {
            Ok(handle) => handle,
            Err(_) => {
                descriptor.returned_events = PollEvents::INVALID_HANDLE;
                ready += 1;
                continue;
            }
        };
        let events = match handle.file().file_type() {
            FileType::RegularFile
            | FileType::RegularDirectory
            | FileType::ObjectDirectory
            | FileType::BlockDevice
            | FileType::SymbolicLink
            | FileType::SharedMemoryObject => PollEvents::IN | PollEvents::OUT,
            _ => handle.poll_events(),
        };
        let visible = events & (descriptor.events | always_reported());
        if !visible.is_empty() {
            descriptor.returned_events = visible;
            ready += 1;
        }
    }
    ready
}

/// 轮询一组描述符
///
/// 返回有任一事件的描述符数。`timeout_ms` 为零只做一次求值，
/// [`WAIT_FOREVER`] 无限等待。等待期间来了未决信号报
/// `Interrupted`，由系统调用边界折算。
pub fn poll(
    descriptors: &mut [PollDescriptor],
    timeout_ms: u64,
    signal_mask: Option<SignalMask>,
) -> KResult<usize> {
    let saved = signal_mask.map(|mask| kernel_ops().set_signal_mask(mask));
    let result = poll_inner(descriptors, timeout_ms);
    if let Some(saved) = saved {
        kernel_ops().set_signal_mask(saved);
    }
    result
}

fn poll_inner(descriptors: &mut [PollDescriptor], timeout_ms: u64) -> KResult<usize> {
    let deadline = if timeout_ms == WAIT_FOREVER {
        None
    } else {
        Some(sched_ops().monotonic_ms().saturating_add(timeout_ms))
    };
    loop {
        let ready = evaluate(descriptors);
        if ready > 0 || timeout_ms == 0 {
            return Ok(ready);
        }
        if let Some(deadline) = deadline {
            if sched_ops().monotonic_ms() >= deadline {
                return Ok(0);
            }
        }
        if kernel_ops().signal_pending() {
            return Err(KernelError::Interrupted);
        }
        sched_ops().yield_now();
    }
}
