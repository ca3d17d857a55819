//! 挂载树：内存盘挂载、绑定挂载、忙卸载与惰性卸载

use uapi::fcntl::OpenFlags;
use uapi::fs::{FilePermissions, FlushFlags};
use uapi::mount::MountFlags;
use vfs::{KernelError, syscall};

fn perms(bits: u32) -> FilePermissions {
    FilePermissions::from_bits_truncate(bits)
}

#[test]
fn ram_disk_mount_flush_and_reload() {
    let _guard = test_support::serial();

    test_support::mount_ram_disk(b"/disk", 11).unwrap();

    let file = syscall::open(None,
        b"/disk/journal",
        OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE,
        perms(0o644),
    )
    .unwrap();
    syscall::write(file, b"first line\n").unwrap();

    // 回写并丢弃缓存页；再读必然来自设备
    syscall::flush(Some(file), FlushFlags::WRITE | FlushFlags::DISCARD).unwrap();
    let mut buffer = [0u8; 16];
    assert_eq!(syscall::read_at(file, &mut buffer, 0).unwrap(), 11);
    assert_eq!(&buffer[..11], b"first line\n");

    syscall::close(file).unwrap();
    syscall::unmount(b"/disk", MountFlags::empty()).unwrap();
}

#[test]
fn bind_mount_aliases_subtree() {
    let _guard = test_support::serial();

    for path in [&b"/bind-src"[..], &b"/bind-dst"[..]] {
        let directory = syscall::open(None,
            path,
            OpenFlags::DIRECTORY | OpenFlags::CREATE,
            perms(0o755),
        )
        .unwrap();
        syscall::close(directory).unwrap();
    }
    let file = syscall::open(None,
        b"/bind-src/shared",
        OpenFlags::WRITE | OpenFlags::CREATE,
        perms(0o644),
    )
    .unwrap();
    syscall::close(file).unwrap();

    syscall::mount(b"/bind-dst", b"/bind-src", MountFlags::BIND).unwrap();

    // 同一个文件对象从两个名字可达
    let through = syscall::open(None, b"/bind-dst/shared", OpenFlags::READ, perms(0)).unwrap();
    let mut path = Vec::new();
    syscall::file_control(through, syscall::FileControlRequest::GetPath(&mut path)).unwrap();
    assert_eq!(path, b"/bind-dst/shared");
    syscall::close(through).unwrap();

    syscall::unmount(b"/bind-dst", MountFlags::empty()).unwrap();
    assert_eq!(
        syscall::open(None, b"/bind-dst/shared", OpenFlags::READ, perms(0)),
        Err(KernelError::PathNotFound)
    );

    syscall::delete(None, b"/bind-src/shared", OpenFlags::empty()).unwrap();
    syscall::delete(None, b"/bind-src", OpenFlags::DIRECTORY).unwrap();
    syscall::delete(None, b"/bind-dst", OpenFlags::DIRECTORY).unwrap();
}

#[test]
fn busy_mount_rejects_unmount_until_closed() {
    let _guard = test_support::serial();

    test_support::mount_ram_disk(b"/busy", 12).unwrap();
    let file = syscall::open(None,
        b"/busy/pin",
        OpenFlags::WRITE | OpenFlags::CREATE,
        perms(0o644),
    )
    .unwrap();

    assert_eq!(
        syscall::unmount(b"/busy", MountFlags::empty()),
        Err(KernelError::ResourceInUse)
    );

    syscall::close(file).unwrap();
    syscall::unmount(b"/busy", MountFlags::empty()).unwrap();
}

#[test]
fn lazy_detach_keeps_open_handles_alive() {
    let _guard = test_support::serial();

    test_support::mount_ram_disk(b"/lazy", 13).unwrap();
    let file = syscall::open(None,
        b"/lazy/survivor",
        OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE,
        perms(0o644),
    )
    .unwrap();
    syscall::write(file, b"still here").unwrap();

    syscall::unmount(b"/lazy", MountFlags::DETACH).unwrap();

    // 名字已不可达，句柄照常工作
    assert_eq!(
        syscall::open(None, b"/lazy/survivor", OpenFlags::READ, perms(0)),
        Err(KernelError::PathNotFound)
    );
    let mut buffer = [0u8; 16];
    assert_eq!(syscall::read_at(file, &mut buffer, 0).unwrap(), 10);
    assert_eq!(&buffer[..10], b"still here");

    syscall::close(file).unwrap();
}

#[test]
fn unmount_requires_mount_root() {
    let _guard = test_support::serial();

    let directory = syscall::open(None,
        b"/plain",
        OpenFlags::DIRECTORY | OpenFlags::CREATE,
        perms(0o755),
    )
    .unwrap();
    syscall::close(directory).unwrap();

    assert_eq!(
        syscall::unmount(b"/plain", MountFlags::empty()),
        Err(KernelError::NotAMountPoint)
    );
    syscall::delete(None, b"/plain", OpenFlags::DIRECTORY).unwrap();
}
