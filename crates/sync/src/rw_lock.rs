//! 共享-排他自旋锁
//!
//! 通过为 `lock_api` 实现 [`RawRwSpinLock`] 获得完整的读写锁 API。
//! 写者优先：有写者等待时新读者不再进入，避免写者饥饿。
//!
//! 文件对象锁、挂载树锁和页树锁都建立在这个原语之上。

use core::hint;
use core::sync::atomic::{AtomicUsize, Ordering};

use lock_api::{GuardSend, RawRwLock, RawRwLockDowngrade};

/// 写者持有位
const WRITER: usize = 1 << (usize::BITS - 1);
/// 写者等待位
const WRITER_WAITING: usize = 1 << (usize::BITS - 2);
/// 读者计数掩码
const READER_MASK: usize = WRITER_WAITING - 1;

/// 共享-排他自旋锁的原始实现
///
/// 状态字：最高位为写者持有位，次高位为写者等待位，其余为读者计数。
pub struct RawRwSpinLock {
    state: AtomicUsize,
}

impl RawRwSpinLock {
    fn try_shared(&self) -> bool {
        let state = self.state.load(Ordering::Relaxed);
        if state & (WRITER | WRITER_WAITING) != 0 {
            return false;
        }
        self.state
            .compare_exchange_weak(state, state + 1, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn try_exclusive(&self) -> bool {
        self.state
            .compare_exchange(0, WRITER, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
            || self
                .state
                .compare_exchange(WRITER_WAITING, WRITER, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
    }
}

unsafe impl RawRwLock for RawRwSpinLock {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = RawRwSpinLock {
        state: AtomicUsize::new(0),
    };

    type GuardMarker = GuardSend;

    fn lock_shared(&self) {
        while !self.try_shared() {
            hint::spin_loop();
        }
    }

    fn try_lock_shared(&self) -> bool {
        self.try_shared()
    }

    unsafe fn unlock_shared(&self) {
        self.state.fetch_sub(1, Ordering::Release);
    }

    fn lock_exclusive(&self) {
        // 先登记等待位，挡住新读者，再等存量读者离场
        self.state.fetch_or(WRITER_WAITING, Ordering::Relaxed);
        loop {
            let state = self.state.load(Ordering::Relaxed);
            if state & (WRITER | READER_MASK) == 0
                && self
                    .state
                    .compare_exchange_weak(state, WRITER, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            {
                return;
            }
            hint::spin_loop();
        }
    }

    fn try_lock_exclusive(&self) -> bool {
        self.try_exclusive()
    }

    unsafe fn unlock_exclusive(&self) {
        self.state.fetch_and(!WRITER, Ordering::Release);
    }

    fn is_locked(&self) -> bool {
        self.state.load(Ordering::Relaxed) & (WRITER | READER_MASK) != 0
    }
}

unsafe impl RawRwLockDowngrade for RawRwSpinLock {
    unsafe fn downgrade(&self) {
        // 写者持有位换成一个读者计数，等待位保持原样
        self.state.fetch_add(1, Ordering::Relaxed);
        self.state.fetch_and(!WRITER, Ordering::Release);
    }
}

/// 共享-排他自旋锁
pub type RwSpinLock<T> = lock_api::RwLock<RawRwSpinLock, T>;
/// 共享（读）保护器
pub type RwSpinLockReadGuard<'a, T> = lock_api::RwLockReadGuard<'a, RawRwSpinLock, T>;
/// 排他（写）保护器
pub type RwSpinLockWriteGuard<'a, T> = lock_api::RwLockWriteGuard<'a, RawRwSpinLock, T>;
