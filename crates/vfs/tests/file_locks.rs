//! 区域锁：探测、切分、跨线程阻塞与关闭时清理

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use uapi::fcntl::{FileLockDescription, FileLockKind, OpenFlags};
use uapi::fs::FilePermissions;
use vfs::syscall::{self, FileControlRequest};

fn perms(bits: u32) -> FilePermissions {
    FilePermissions::from_bits_truncate(bits)
}

fn open_locked_file(name: &[u8]) -> i32 {
    let mut path = b"lock-".to_vec();
    path.extend_from_slice(name);
    syscall::open(None,
        &path,
        OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::SHARED_MEMORY,
        perms(0o600),
    )
    .unwrap()
}

fn lock(kind: FileLockKind, offset: u64, size: u64) -> FileLockDescription {
    FileLockDescription {
        kind,
        offset,
        size,
        owner: 0,
    }
}

#[test]
fn probe_reports_conflicting_region() {
    let _guard = test_support::serial();
    let descriptor = open_locked_file(b"probe");

    syscall::file_control(
        descriptor,
        FileControlRequest::SetLock(&lock(FileLockKind::Write, 100, 50)),
    )
    .unwrap();

    // 自己的锁对自己不构成冲突（传入的 owner 字段不作数）
    let mut probe = lock(FileLockKind::Write, 120, 10);
    syscall::file_control(descriptor, FileControlRequest::GetLock(&mut probe)).unwrap();
    assert_eq!(probe.kind, FileLockKind::Unlock);

    // 另一任务的探测如实看到冲突区域
    let observed = std::thread::spawn(move || {
        let mut probe = lock(FileLockKind::Write, 120, 10);
        syscall::file_control(descriptor, FileControlRequest::GetLock(&mut probe)).unwrap();
        probe
    })
    .join()
    .unwrap();
    assert_eq!(observed.kind, FileLockKind::Write);
    assert_eq!(observed.offset, 100);
    assert_eq!(observed.size, 50);

    syscall::close(descriptor).unwrap();
    syscall::delete(None, b"lock-probe", OpenFlags::SHARED_MEMORY).unwrap();
}

#[test]
fn unlock_splits_covering_region() {
    let _guard = test_support::serial();
    let descriptor = open_locked_file(b"split");

    syscall::file_control(
        descriptor,
        FileControlRequest::SetLock(&lock(FileLockKind::Write, 0, 100)),
    )
    .unwrap();
    // 挖掉中段，留下两端
    syscall::file_control(
        descriptor,
        FileControlRequest::SetLock(&lock(FileLockKind::Unlock, 40, 20)),
    )
    .unwrap();
    // 中段立即可由读锁占据
    syscall::file_control(
        descriptor,
        FileControlRequest::SetLock(&lock(FileLockKind::Read, 40, 20)),
    )
    .unwrap();

    syscall::close(descriptor).unwrap();
    syscall::delete(None, b"lock-split", OpenFlags::SHARED_MEMORY).unwrap();
}

#[test]
fn closing_descriptor_releases_blocking_waiter() {
    let _guard = test_support::serial();
    let descriptor = open_locked_file(b"block");

    syscall::file_control(
        descriptor,
        FileControlRequest::SetLock(&lock(FileLockKind::Write, 0, 10)),
    )
    .unwrap();

    let acquired = Arc::new(AtomicBool::new(false));
    let acquired_clone = acquired.clone();
    let waiter = std::thread::spawn(move || {
        // 另一任务的非阻塞尝试先失败
        let contender = syscall::open(None,
            b"lock-block",
            OpenFlags::READ | OpenFlags::WRITE | OpenFlags::SHARED_MEMORY,
            perms(0),
        )
        .unwrap();
        assert!(
            syscall::file_control(
                contender,
                FileControlRequest::SetLock(&lock(FileLockKind::Write, 0, 10)),
            )
            .is_err()
        );
        // 阻塞等待直到持有者关闭
        syscall::file_control(
            contender,
            FileControlRequest::SetLockWait(&lock(FileLockKind::Write, 0, 10)),
        )
        .unwrap();
        acquired_clone.store(true, Ordering::Release);
        syscall::close(contender).unwrap();
    });

    std::thread::sleep(std::time::Duration::from_millis(50));
    assert!(!acquired.load(Ordering::Acquire));

    // 关闭清掉本任务的全部区域锁，唤醒等待者
    syscall::close(descriptor).unwrap();
    waiter.join().unwrap();
    assert!(acquired.load(Ordering::Acquire));

    syscall::delete(None, b"lock-block", OpenFlags::SHARED_MEMORY).unwrap();
}

#[test]
fn lock_kind_requires_matching_access() {
    let _guard = test_support::serial();
    let descriptor = open_locked_file(b"access");

    let read_only = syscall::open(None,
        b"lock-access",
        OpenFlags::READ | OpenFlags::SHARED_MEMORY,
        perms(0),
    )
    .unwrap();
    assert!(
        syscall::file_control(
            read_only,
            FileControlRequest::SetLock(&lock(FileLockKind::Write, 0, 1)),
        )
        .is_err()
    );

    syscall::close(read_only).unwrap();
    syscall::close(descriptor).unwrap();
    syscall::delete(None, b"lock-access", OpenFlags::SHARED_MEMORY).unwrap();
}
