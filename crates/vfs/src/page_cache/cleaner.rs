//! 后台清理
//!
//! 单工作者状态机：`CLEAN → WORKER_QUEUED → WORKER_BUSY →
//! (CLEAN | DIRTY)`，全部迁移用 CAS。写脏方调用
//! [`schedule_cleaning`] 在自旋锁下压低到期时间并唤醒工作者；
//! 工作中再次写脏迁到 `DIRTY`，收尾 CAS 失败即以最小延迟重排。

use core::sync::atomic::{AtomicU32, Ordering};

use lazy_static::lazy_static;
use log::debug;
use sync::{sched_ops, Event, SpinLock, WaitError, WAIT_FOREVER};

use crate::config::CLEANER_MIN_DELAY_MS;
use crate::entry_cache;
use crate::error::{KResult, KernelError};
use crate::file_object::FileObjectFlags;
use crate::ops::memory_ops;
use crate::page_cache::{self, ops};

const STATE_CLEAN: u32 = 0;
const STATE_WORKER_QUEUED: u32 = 1;
const STATE_WORKER_BUSY: u32 = 2;
const STATE_DIRTY: u32 = 3;

static STATE: AtomicU32 = AtomicU32::new(STATE_CLEAN);

lazy_static! {
    /// 下次工作的到期时刻（单调毫秒；0 表示未排期）
    static ref DUE_TIME: SpinLock<u64> = SpinLock::new(0);
    static ref WAKE: Event = Event::new();
    /// 每趟清理收尾时脉冲一次；脏页超限的写入方在此等待
    static ref PROGRESS: Event = Event::new();
}

/// 等清理线程跑完一趟
///
/// 超时按无事发生返回，调用方重查脏页水位；被信号打断上报
/// `Interrupted`。
pub fn wait_for_progress(timeout_ms: u64) -> KResult<()> {
    match PROGRESS.wait(timeout_ms, true) {
        Ok(()) | Err(WaitError::Timeout) => Ok(()),
        Err(WaitError::Interrupted) => Err(KernelError::Interrupted),
    }
}

/// 请求在 `delay_ms` 内跑一趟清理；更早的并发请求压低到期时间
pub fn schedule_cleaning(delay_ms: u64) {
    let due = sched_ops().monotonic_ms().saturating_add(delay_ms);
    let mut lowered = false;
    {
        let mut slot = DUE_TIME.lock();
        if *slot == 0 || due < *slot {
            *slot = due;
            lowered = true;
        }
    }

    let mut state = STATE.load(Ordering::Acquire);
    loop {
        let target = match state {
            STATE_CLEAN => STATE_WORKER_QUEUED,
            STATE_WORKER_BUSY => STATE_DIRTY,
            _ => break,
        };
        match STATE.compare_exchange(state, target, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => break,
            Err(observed) => state = observed,
        }
    }
    if lowered {
        WAKE.pulse();
    }
}

/// 是否有排定且已到期的工作
fn work_due() -> bool {
    let due = *DUE_TIME.lock();
    due != 0 && sched_ops().monotonic_ms() >= due
}

/// 跑一趟完整的清理
///
/// 排空移除表、按内存压力收缩两份缓存与内核映射、冲刷回写名单。
/// 冲刷中途被要求让位（内存紧张）时把文件重新挂回名单。
pub fn cleaner_pass() {
    STATE.store(STATE_WORKER_BUSY, Ordering::Release);
    *DUE_TIME.lock() = 0;

    page_cache::drain_removal_list();

    let warning = memory_ops().memory_warning_level();
    if warning > 0 {
        entry_cache::memory_warning(warning);
    }
    let tunables = page_cache::tunables();
    if memory_ops().free_physical_pages() < tunables.headroom_trigger {
        page_cache::trim_lru(true);
    }
    page_cache::unmap_lru();

    let files = page_cache::take_dirty_files();
    let mut interrupted = false;
    for file in files {
        file.clear_flags(FileObjectFlags::FLUSH_LISTED);
        let flushed = ops::flush(&file, 0, 0, true);
        let _ = ops::flush_properties(&file);
        if flushed.is_err() {
            debug!(
                "vfs: cleaner re-queueing device {} file {}",
                file.device_id, file.file_id
            );
            page_cache::mark_file_object_dirty(&file);
            interrupted = true;
        }
        // 归还回写名单持有的引用
        let _ = file.release(false);
    }

    PROGRESS.pulse();

    match STATE.compare_exchange(
        STATE_WORKER_BUSY,
        STATE_CLEAN,
        Ordering::AcqRel,
        Ordering::Acquire,
    ) {
        Ok(_) => {
            if interrupted {
                schedule_cleaning(CLEANER_MIN_DELAY_MS);
            }
        }
        Err(_) => {
            // 工作期间又有人写脏：立即重排
            STATE.store(STATE_WORKER_QUEUED, Ordering::Release);
            let due = sched_ops().monotonic_ms().saturating_add(CLEANER_MIN_DELAY_MS);
            let mut slot = DUE_TIME.lock();
            if *slot == 0 || due < *slot {
                *slot = due;
            }
            drop(slot);
            WAKE.pulse();
        }
    }
}

/// 清理线程主体；由内核在启动时作为独立线程运行
pub fn cleaner_thread() -> ! {
    loop {
        let timeout = {
            let due = *DUE_TIME.lock();
            if due == 0 {
                WAIT_FOREVER
            } else {
                due.saturating_sub(sched_ops().monotonic_ms()).max(1)
            }
        };
        let _ = WAKE.wait(timeout, false);
        if work_due() || memory_ops().memory_warning_level() > 0 {
            cleaner_pass();
        }
    }
}
