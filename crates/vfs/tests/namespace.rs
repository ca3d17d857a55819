//! 命名空间操作的端到端测试：创建、读写、符号链接、删除与重命名

use uapi::fcntl::OpenFlags;
use uapi::fs::FilePermissions;
use vfs::{KernelError, syscall};

fn perms(bits: u32) -> FilePermissions {
    FilePermissions::from_bits_truncate(bits)
}

#[test]
fn shared_memory_object_round_trip() {
    let _guard = test_support::serial();

    let flags = OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::SHARED_MEMORY;
    let descriptor = syscall::open(None, b"scratch", flags, perms(0o600)).unwrap();

    assert_eq!(syscall::write(descriptor, b"hello shared memory").unwrap(), 19);
    let mut buffer = [0u8; 32];
    assert_eq!(syscall::read_at(descriptor, &mut buffer, 6).unwrap(), 13);
    assert_eq!(&buffer[..13], b"shared memory");

    // 同一对象按名字再打开，看到同一份内容
    let other = syscall::open(None,
        b"scratch",
        OpenFlags::READ | OpenFlags::SHARED_MEMORY,
        perms(0),
    )
    .unwrap();
    let mut verify = [0u8; 5];
    assert_eq!(syscall::read(other, &mut verify).unwrap(), 5);
    assert_eq!(&verify, b"hello");

    syscall::close(descriptor).unwrap();
    syscall::close(other).unwrap();
    syscall::delete(None, b"scratch", OpenFlags::SHARED_MEMORY).unwrap();
    assert_eq!(
        syscall::open(None, b"scratch", OpenFlags::READ | OpenFlags::SHARED_MEMORY, perms(0)),
        Err(KernelError::PathNotFound)
    );
}

#[test]
fn directory_create_and_trailing_slash() {
    let _guard = test_support::serial();

    let descriptor = syscall::open(None,
        b"/work",
        OpenFlags::DIRECTORY | OpenFlags::CREATE,
        perms(0o755),
    )
    .unwrap();
    syscall::close(descriptor).unwrap();

    // 尾随分隔符强制目录语义
    let file = syscall::open(None, b"/work/notes", OpenFlags::WRITE | OpenFlags::CREATE, perms(0o644))
        .unwrap();
    syscall::close(file).unwrap();
    assert_eq!(
        syscall::open(None, b"/work/notes/", OpenFlags::READ, perms(0)),
        Err(KernelError::NotADirectory)
    );

    // 目录不可按写打开
    assert_eq!(
        syscall::open(None, b"/work", OpenFlags::WRITE, perms(0)),
        Err(KernelError::FileIsDirectory)
    );

    syscall::delete(None, b"/work/notes", OpenFlags::empty()).unwrap();
    syscall::delete(None, b"/work", OpenFlags::DIRECTORY).unwrap();
}

#[test]
fn symbolic_link_follow_and_loop() {
    let _guard = test_support::serial();

    let directory = syscall::open(None,
        b"/links",
        OpenFlags::DIRECTORY | OpenFlags::CREATE,
        perms(0o755),
    )
    .unwrap();
    syscall::close(directory).unwrap();

    let file = syscall::open(None,
        b"target",
        OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::SHARED_MEMORY,
        perms(0o644),
    )
    .unwrap();
    syscall::write(file, b"payload").unwrap();
    syscall::close(file).unwrap();

    syscall::create_symbolic_link(None, b"/links/alias", b"/shm/target").unwrap();
    assert_eq!(syscall::read_symbolic_link(None, b"/links/alias").unwrap(), b"/shm/target");

    let through = syscall::open(None, b"/links/alias", OpenFlags::READ, perms(0)).unwrap();
    let mut buffer = [0u8; 16];
    assert_eq!(syscall::read(through, &mut buffer).unwrap(), 7);
    assert_eq!(&buffer[..7], b"payload");
    syscall::close(through).unwrap();

    // 不跟随模式落在链接本身上
    let raw = syscall::open(None,
        b"/links/alias",
        OpenFlags::READ | OpenFlags::SYMBOLIC_LINK,
        perms(0),
    );
    assert!(raw.is_ok());
    syscall::close(raw.unwrap()).unwrap();

    // 互指链接在深度上限处报环
    syscall::create_symbolic_link(None, b"/links/ping", b"/links/pong").unwrap();
    syscall::create_symbolic_link(None, b"/links/pong", b"/links/ping").unwrap();
    assert_eq!(
        syscall::open(None, b"/links/ping", OpenFlags::READ, perms(0)),
        Err(KernelError::SymbolicLinkLoop)
    );

    syscall::delete(None, b"/links/ping", OpenFlags::empty()).unwrap();
    syscall::delete(None, b"/links/pong", OpenFlags::empty()).unwrap();
    syscall::delete(None, b"/links/alias", OpenFlags::empty()).unwrap();
    syscall::delete(None, b"target", OpenFlags::SHARED_MEMORY).unwrap();
    syscall::delete(None, b"/links", OpenFlags::DIRECTORY).unwrap();
}

#[test]
fn delete_requires_matching_kind() {
    let _guard = test_support::serial();

    let directory = syscall::open(None,
        b"/kinds",
        OpenFlags::DIRECTORY | OpenFlags::CREATE,
        perms(0o755),
    )
    .unwrap();
    syscall::close(directory).unwrap();

    assert_eq!(
        syscall::delete(None, b"/kinds", OpenFlags::empty()),
        Err(KernelError::FileIsDirectory)
    );

    let file = syscall::open(None, b"/kinds/one", OpenFlags::WRITE | OpenFlags::CREATE, perms(0o644))
        .unwrap();
    syscall::close(file).unwrap();
    assert_eq!(
        syscall::delete(None, b"/kinds/one", OpenFlags::DIRECTORY),
        Err(KernelError::NotADirectory)
    );
    assert_eq!(
        syscall::delete(None, b"/kinds", OpenFlags::DIRECTORY),
        Err(KernelError::DirectoryNotEmpty)
    );

    syscall::delete(None, b"/kinds/one", OpenFlags::empty()).unwrap();
    syscall::delete(None, b"/kinds", OpenFlags::DIRECTORY).unwrap();
}

#[test]
fn rename_moves_and_replaces() {
    let _guard = test_support::serial();

    let directory = syscall::open(None,
        b"/ren",
        OpenFlags::DIRECTORY | OpenFlags::CREATE,
        perms(0o755),
    )
    .unwrap();
    syscall::close(directory).unwrap();

    let source = syscall::open(None, b"/ren/old", OpenFlags::WRITE | OpenFlags::CREATE, perms(0o644))
        .unwrap();
    syscall::close(source).unwrap();

    syscall::rename(None, b"/ren/old", None, b"/ren/new").unwrap();
    assert_eq!(
        syscall::open(None, b"/ren/old", OpenFlags::READ, perms(0)),
        Err(KernelError::PathNotFound)
    );
    let renamed = syscall::open(None, b"/ren/new", OpenFlags::READ, perms(0)).unwrap();
    syscall::close(renamed).unwrap();

    // 目标已占用时顶替
    let blocker = syscall::open(None, b"/ren/other", OpenFlags::WRITE | OpenFlags::CREATE, perms(0o644))
        .unwrap();
    syscall::close(blocker).unwrap();
    syscall::rename(None, b"/ren/new", None, b"/ren/other").unwrap();
    assert_eq!(
        syscall::open(None, b"/ren/new", OpenFlags::READ, perms(0)),
        Err(KernelError::PathNotFound)
    );
    let displaced = syscall::open(None, b"/ren/other", OpenFlags::READ, perms(0)).unwrap();
    syscall::close(displaced).unwrap();

    syscall::delete(None, b"/ren/other", OpenFlags::empty()).unwrap();
    syscall::delete(None, b"/ren", OpenFlags::DIRECTORY).unwrap();
}

#[test]
fn current_directory_and_relative_walk() {
    let _guard = test_support::serial();

    let directory = syscall::open(None,
        b"/cwd-test",
        OpenFlags::DIRECTORY | OpenFlags::CREATE,
        perms(0o755),
    )
    .unwrap();
    syscall::close(directory).unwrap();

    syscall::change_directory(false, Some(b"/cwd-test")).unwrap();
    assert_eq!(syscall::get_current_directory(false).unwrap(), b"/cwd-test");

    let file = syscall::open(None, b"inside", OpenFlags::WRITE | OpenFlags::CREATE, perms(0o644))
        .unwrap();
    syscall::close(file).unwrap();
    let absolute = syscall::open(None, b"/cwd-test/inside", OpenFlags::READ, perms(0)).unwrap();
    syscall::close(absolute).unwrap();

    // ".." 回到父目录
    let parent = syscall::open(None, b"..", OpenFlags::DIRECTORY, perms(0)).unwrap();
    syscall::close(parent).unwrap();

    syscall::change_directory(false, Some(b"/")).unwrap();
    syscall::delete(None, b"/cwd-test/inside", OpenFlags::empty()).unwrap();
    syscall::delete(None, b"/cwd-test", OpenFlags::DIRECTORY).unwrap();
    test_support::TEST_KERNEL.reset();
}

#[test]
fn directory_descriptor_anchors_relative_paths() {
    let _guard = test_support::serial();

    let anchor = syscall::open(None,
        b"/anchor",
        OpenFlags::DIRECTORY | OpenFlags::CREATE,
        perms(0o755),
    )
    .unwrap();

    // 当前目录仍是根：相对路径以描述符为起点，而不是进程当前目录
    let file = syscall::open(
        Some(anchor),
        b"inside",
        OpenFlags::WRITE | OpenFlags::CREATE,
        perms(0o644),
    )
    .unwrap();
    assert_eq!(syscall::write(file, b"anchored").unwrap(), 8);
    syscall::close(file).unwrap();
    assert_eq!(
        syscall::open(None, b"inside", OpenFlags::READ, perms(0)),
        Err(KernelError::PathNotFound)
    );
    let absolute = syscall::open(None, b"/anchor/inside", OpenFlags::READ, perms(0)).unwrap();
    syscall::close(absolute).unwrap();

    let info = syscall::get_set_file_information(Some(anchor), b"inside", true, None).unwrap();
    assert_eq!(info.size, 8);

    syscall::rename(Some(anchor), b"inside", Some(anchor), b"moved").unwrap();
    let moved = syscall::open(Some(anchor), b"moved", OpenFlags::READ, perms(0)).unwrap();
    syscall::close(moved).unwrap();

    // 非目录描述符不能作起点
    let plain = syscall::open(Some(anchor), b"moved", OpenFlags::READ, perms(0)).unwrap();
    assert_eq!(
        syscall::open(Some(plain), b"x", OpenFlags::READ, perms(0)),
        Err(KernelError::NotADirectory)
    );
    syscall::close(plain).unwrap();

    syscall::delete(Some(anchor), b"moved", OpenFlags::empty()).unwrap();
    syscall::close(anchor).unwrap();
    syscall::delete(None, b"/anchor", OpenFlags::DIRECTORY).unwrap();
}
