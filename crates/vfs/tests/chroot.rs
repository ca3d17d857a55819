//! 受限根：进入、绝对路径解析、`..` 护栏与逃出
//!
//! 改根对描述符表有全局要求（除目标外不能有打开的目录描述
//! 符），所以整个流程放在一个测试里串行执行。

use uapi::fcntl::OpenFlags;
use uapi::fs::FilePermissions;
use vfs::{KernelError, syscall};

fn perms(bits: u32) -> FilePermissions {
    FilePermissions::from_bits_truncate(bits)
}

#[test]
fn restricted_root_confines_resolution() {
    let _guard = test_support::serial();

    // 牢内一个文件、牢外一个对照文件
    let jail = syscall::open(None,
        b"/jail",
        OpenFlags::DIRECTORY | OpenFlags::CREATE,
        perms(0o755),
    )
    .unwrap();
    syscall::close(jail).unwrap();
    let inner = syscall::open(None,
        b"/jail/data",
        OpenFlags::WRITE | OpenFlags::CREATE,
        perms(0o644),
    )
    .unwrap();
    assert_eq!(syscall::write(inner, b"inside").unwrap(), 6);
    syscall::close(inner).unwrap();
    let outer = syscall::open(None,
        b"/outside",
        OpenFlags::WRITE | OpenFlags::CREATE,
        perms(0o644),
    )
    .unwrap();
    syscall::close(outer).unwrap();

    syscall::change_directory(true, Some(b"/jail")).unwrap();

    // 受限根下当前目录与进程根都显示为 `/`，绝对路径都落在牢内
    assert_eq!(syscall::get_current_directory(false).unwrap(), b"/");
    assert_eq!(syscall::get_current_directory(true).unwrap(), b"/");
    let descriptor = syscall::open(None, b"/data", OpenFlags::READ, perms(0)).unwrap();
    let mut buffer = [0u8; 6];
    assert_eq!(syscall::read(descriptor, &mut buffer).unwrap(), 6);
    assert_eq!(&buffer, b"inside");
    syscall::close(descriptor).unwrap();
    assert_eq!(
        syscall::open(None, b"/outside", OpenFlags::READ, perms(0)),
        Err(KernelError::PathNotFound)
    );

    // `..` 在受限根处止步，不泄露外层树
    let clamped = syscall::open(None, b"/../../data", OpenFlags::READ, perms(0)).unwrap();
    syscall::close(clamped).unwrap();

    // 逃出后牢外文件重新可见
    syscall::change_directory(true, None).unwrap();
    syscall::change_directory(false, Some(b"/")).unwrap();
    let outer = syscall::open(None, b"/outside", OpenFlags::READ, perms(0)).unwrap();
    syscall::close(outer).unwrap();

    syscall::delete(None, b"/outside", OpenFlags::empty()).unwrap();
    syscall::delete(None, b"/jail/data", OpenFlags::empty()).unwrap();
    syscall::delete(None, b"/jail", OpenFlags::DIRECTORY).unwrap();
}

#[test]
fn chroot_requires_capability_and_quiesced_process() {
    let _guard = test_support::serial();

    let jail = syscall::open(None,
        b"/jail2",
        OpenFlags::DIRECTORY | OpenFlags::CREATE,
        perms(0o755),
    )
    .unwrap();
    syscall::close(jail).unwrap();

    // 多线程进程拒绝改根
    test_support::TEST_KERNEL.set_thread_count(2);
    assert_eq!(
        syscall::change_directory(true, Some(b"/jail2")),
        Err(KernelError::ResourceInUse)
    );
    test_support::TEST_KERNEL.set_thread_count(1);

    // 无能力拒绝改根与逃出
    let saved = test_support::TEST_KERNEL.set_credentials(uapi::cred::Credentials {
        real_user_id: 0,
        effective_user_id: 0,
        real_group_id: 0,
        effective_group_id: 0,
        capabilities: uapi::cred::Capabilities::empty(),
    });
    assert_eq!(
        syscall::change_directory(true, Some(b"/jail2")),
        Err(KernelError::AccessDenied)
    );
    assert_eq!(
        syscall::change_directory(true, None),
        Err(KernelError::AccessDenied)
    );
    test_support::TEST_KERNEL.set_credentials(saved);

    // 除目标外还握着目录描述符时拒绝改根
    let held = syscall::open(None, b"/", OpenFlags::DIRECTORY, perms(0)).unwrap();
    assert_eq!(
        syscall::change_directory(true, Some(b"/jail2")),
        Err(KernelError::ResourceInUse)
    );
    syscall::close(held).unwrap();

    syscall::delete(None, b"/jail2", OpenFlags::DIRECTORY).unwrap();
}

#[test]
fn effective_access_reflects_credentials() {
    let _guard = test_support::serial();

    let descriptor = syscall::open(None,
        b"/guarded",
        OpenFlags::WRITE | OpenFlags::CREATE,
        perms(0o640),
    )
    .unwrap();
    syscall::close(descriptor).unwrap();

    // 属主看到读写，无关用户一无所得
    let full = syscall::get_effective_access(None, b"/guarded", OpenFlags::READ | OpenFlags::WRITE)
        .unwrap();
    assert_eq!(full, OpenFlags::READ | OpenFlags::WRITE);

    let saved = test_support::TEST_KERNEL.set_credentials(uapi::cred::Credentials {
        real_user_id: 1000,
        effective_user_id: 1000,
        real_group_id: 1000,
        effective_group_id: 1000,
        capabilities: uapi::cred::Capabilities::empty(),
    });
    assert_eq!(
        syscall::get_effective_access(None, b"/guarded", OpenFlags::READ | OpenFlags::WRITE).unwrap(),
        OpenFlags::empty()
    );
    test_support::TEST_KERNEL.set_credentials(saved);

    syscall::delete(None, b"/guarded", OpenFlags::empty()).unwrap();
}
