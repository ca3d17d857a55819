//! 进程上下文桩
//!
//! 单进程模型：一张句柄表、一份凭证、一个当前目录，全体测试
//! 线程共享。投递的信号进入记录表供断言。

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use sync::SchedOps;
use uapi::cred::{Capabilities, Credentials, TaskId};
use uapi::signal::SignalMask;
use uapi::time::TimeSpec;
use vfs::mount::PathPoint;
use vfs::{HandleTable, KernelOps};

struct KernelState {
    credentials: Credentials,
    table: Option<std::sync::Arc<HandleTable>>,
    current_directory: Option<PathPoint>,
    current_root: Option<PathPoint>,
    signal_mask: SignalMask,
    delivered_signals: Vec<(TaskId, u32)>,
}

/// 测试内核
pub struct TestKernel {
    state: Mutex<KernelState>,
    thread_count: AtomicUsize,
}

fn default_credentials() -> Credentials {
    Credentials {
        real_user_id: 0,
        effective_user_id: 0,
        real_group_id: 0,
        effective_group_id: 0,
        capabilities: Capabilities::MOUNT | Capabilities::CHROOT | Capabilities::ESCAPE_CHROOT,
    }
}

lazy_static::lazy_static! {
    /// 全局实例
    pub static ref TEST_KERNEL: TestKernel = TestKernel {
        state: Mutex::new(KernelState {
            credentials: default_credentials(),
            table: None,
            current_directory: None,
            current_root: None,
            signal_mask: 0,
            delivered_signals: Vec::new(),
        }),
        thread_count: AtomicUsize::new(1),
    };
}

impl TestKernel {
    fn state(&self) -> std::sync::MutexGuard<'_, KernelState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 换上一份凭证，返回旧凭证
    pub fn set_credentials(&self, credentials: Credentials) -> Credentials {
        let mut state = self.state();
        core::mem::replace(&mut state.credentials, credentials)
    }

    /// 恢复默认凭证并清空目录与信号记录
    pub fn reset(&self) {
        let mut state = self.state();
        state.credentials = default_credentials();
        state.current_directory = None;
        state.current_root = None;
        state.delivered_signals.clear();
        self.thread_count.store(1, Ordering::Release);
    }

    /// 设置 `thread_count` 的返回值
    pub fn set_thread_count(&self, count: usize) {
        self.thread_count.store(count, Ordering::Release);
    }

    /// 取走已投递信号的记录
    pub fn take_delivered_signals(&self) -> Vec<(TaskId, u32)> {
        core::mem::take(&mut self.state().delivered_signals)
    }
}

impl KernelOps for TestKernel {
    fn current_task(&self) -> TaskId {
        crate::sched::TEST_SCHED.task_of_current_thread()
    }

    fn credentials(&self) -> Credentials {
        self.state().credentials
    }

    fn handle_table(&self) -> std::sync::Arc<HandleTable> {
        let mut state = self.state();
        state
            .table
            .get_or_insert_with(HandleTable::new)
            .clone()
    }

    fn thread_count(&self) -> usize {
        self.thread_count.load(Ordering::Acquire)
    }

    fn current_directory(&self) -> Option<PathPoint> {
        self.state().current_directory.clone()
    }

    fn set_current_directory(&self, directory: PathPoint) {
        self.state().current_directory = Some(directory);
    }

    fn current_root(&self) -> Option<PathPoint> {
        self.state().current_root.clone()
    }

    fn set_current_root(&self, root: Option<PathPoint>) {
        self.state().current_root = root;
    }

    fn send_signal(&self, task: TaskId, signal: u32) {
        self.state().delivered_signals.push((task, signal));
    }

    fn set_signal_mask(&self, mask: SignalMask) -> SignalMask {
        let mut state = self.state();
        core::mem::replace(&mut state.signal_mask, mask)
    }

    fn signal_pending(&self) -> bool {
        crate::sched::TEST_SCHED.signal_pending()
    }

    fn timespec_now(&self) -> TimeSpec {
        TimeSpec::from_milliseconds(crate::sched::TEST_SCHED.monotonic_ms())
    }
}
