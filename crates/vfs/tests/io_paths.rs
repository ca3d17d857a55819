//! 向量读写、命名管道、用户控制码与边界折算

use uapi::fcntl::{OpenFlags, USER_CONTROL_NON_BLOCKING};
use uapi::fs::{FilePermissions, FileSetInformation, FileType};
use vfs::{KernelError, syscall};

fn perms(bits: u32) -> FilePermissions {
    FilePermissions::from_bits_truncate(bits)
}

#[test]
fn vectored_io_crosses_buffer_boundaries() {
    let _guard = test_support::serial();

    let descriptor = syscall::open(None,
        b"vectors",
        OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::SHARED_MEMORY,
        perms(0o600),
    )
    .unwrap();

    let written =
        syscall::write_vectored(descriptor, &[&b"alpha"[..], &b"-"[..], &b"beta"[..]]).unwrap();
    assert_eq!(written, 10);

    // 读侧缓冲切分与写侧不同，拼回同一串字节
    syscall::seek(descriptor, uapi::fcntl::SeekCommand::Set, 0).unwrap();
    let mut head = [0u8; 4];
    let mut tail = [0u8; 6];
    let read = {
        let mut buffers: [&mut [u8]; 2] = [&mut head, &mut tail];
        syscall::read_vectored(descriptor, &mut buffers).unwrap()
    };
    assert_eq!(read, 10);
    assert_eq!(&head, b"alph");
    assert_eq!(&tail, b"a-beta");

    syscall::close(descriptor).unwrap();
    syscall::delete(None, b"vectors", OpenFlags::SHARED_MEMORY).unwrap();
}

#[test]
fn named_pipe_connects_independent_opens() {
    let _guard = test_support::serial();

    syscall::create_named_pipe(None, b"/fifo", perms(0o644)).unwrap();
    assert_eq!(
        syscall::create_named_pipe(None, b"/fifo", perms(0o644)),
        Err(KernelError::FileExists)
    );

    let reader = syscall::open(None, b"/fifo", OpenFlags::READ | OpenFlags::NON_BLOCKING, perms(0))
        .unwrap();
    let writer = syscall::open(None, b"/fifo", OpenFlags::WRITE | OpenFlags::NON_BLOCKING, perms(0))
        .unwrap();

    assert_eq!(syscall::write(writer, b"through the name").unwrap(), 16);
    let mut buffer = [0u8; 16];
    assert_eq!(syscall::read(reader, &mut buffer).unwrap(), 16);
    assert_eq!(&buffer, b"through the name");

    syscall::close(writer).unwrap();
    syscall::close(reader).unwrap();
    syscall::delete(None, b"/fifo", OpenFlags::empty()).unwrap();
}

#[test]
fn user_control_toggles_non_blocking() {
    let _guard = test_support::serial();

    let (read_end, write_end) = syscall::create_pipe(OpenFlags::empty()).unwrap();

    syscall::user_control(read_end, USER_CONTROL_NON_BLOCKING, 1).unwrap();
    let flags = syscall::file_control(read_end, vfs::FileControlRequest::GetStatusAndAccess)
        .unwrap();
    assert!(OpenFlags::from_bits_truncate(flags as u32).contains(OpenFlags::NON_BLOCKING));
    let mut buffer = [0u8; 4];
    assert_eq!(
        syscall::read(read_end, &mut buffer),
        Err(KernelError::TryAgain)
    );

    syscall::user_control(read_end, USER_CONTROL_NON_BLOCKING, 0).unwrap();
    let flags = syscall::file_control(read_end, vfs::FileControlRequest::GetStatusAndAccess)
        .unwrap();
    assert!(!OpenFlags::from_bits_truncate(flags as u32).contains(OpenFlags::NON_BLOCKING));

    assert_eq!(
        syscall::user_control(read_end, 0xdead_beef, 0),
        Err(KernelError::NotSupported)
    );

    syscall::close(read_end).unwrap();
    syscall::close(write_end).unwrap();
}

#[test]
fn file_information_by_path() {
    let _guard = test_support::serial();

    let descriptor = syscall::open(None,
        b"/info-file",
        OpenFlags::WRITE | OpenFlags::CREATE,
        perms(0o640),
    )
    .unwrap();
    assert_eq!(syscall::write(descriptor, b"abc").unwrap(), 3);
    syscall::close(descriptor).unwrap();

    let info = syscall::get_set_file_information(None, b"/info-file", true, None).unwrap();
    assert_eq!(info.size, 3);
    assert_eq!(info.file_type, FileType::RegularFile);
    assert_eq!(info.permissions, perms(0o640));

    let mut update = info;
    update.permissions = perms(0o600);
    syscall::get_set_file_information(None,
        b"/info-file",
        true,
        Some((&update, FileSetInformation::PERMISSIONS)),
    )
    .unwrap();
    let reread = syscall::get_set_file_information(None, b"/info-file", true, None).unwrap();
    assert_eq!(reread.permissions, perms(0o600));

    syscall::delete(None, b"/info-file", OpenFlags::empty()).unwrap();
}

#[test]
fn boundary_translation_negates_errno() {
    assert_eq!(syscall::syscall_result(Ok(7)), 7);
    assert_eq!(
        syscall::syscall_result(Err(KernelError::PathNotFound)),
        -uapi::errno::PATH_NOT_FOUND
    );
    // 中断在边界折算成重启语义
    assert_eq!(
        syscall::syscall_result(Err(KernelError::Interrupted)),
        -uapi::errno::RESTART_AFTER_SIGNAL
    );
}
