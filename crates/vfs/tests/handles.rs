//! 句柄表与句柄控制：复制、exec 关闭清扫、状态标志、偏移与属性

use uapi::fcntl::{DescriptorFlags, OpenFlags, SeekCommand};
use uapi::fs::{FilePermissions, FileProperties, FileSetInformation, FileType};
use uapi::time::TimeSpec;
use vfs::syscall::{self, FileControlRequest};
use vfs::KernelError;

fn perms(bits: u32) -> FilePermissions {
    FilePermissions::from_bits_truncate(bits)
}

fn blank_properties() -> FileProperties {
    FileProperties {
        device_id: 0,
        file_id: 0,
        file_type: FileType::RegularFile,
        user_id: 0,
        group_id: 0,
        permissions: FilePermissions::empty(),
        hard_link_count: 0,
        size: 0,
        access_time: TimeSpec::zero(),
        modified_time: TimeSpec::zero(),
        status_change_time: TimeSpec::zero(),
    }
}

fn scratch(name: &[u8]) -> i32 {
    let mut path = b"h-".to_vec();
    path.extend_from_slice(name);
    syscall::open(None,
        &path,
        OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::SHARED_MEMORY,
        perms(0o600),
    )
    .unwrap()
}

fn drop_scratch(name: &[u8]) {
    let mut path = b"h-".to_vec();
    path.extend_from_slice(name);
    syscall::delete(None, &path, OpenFlags::SHARED_MEMORY).unwrap();
}

#[test]
fn duplicate_shares_offset() {
    let _guard = test_support::serial();
    let descriptor = scratch(b"dup");
    syscall::write(descriptor, b"0123456789").unwrap();

    let duplicate = syscall::duplicate_handle(descriptor, None, false).unwrap();
    assert_ne!(duplicate, descriptor);

    // 两个描述符共享同一个句柄，偏移一致
    syscall::seek(descriptor, SeekCommand::Set, 4).unwrap();
    let mut buffer = [0u8; 2];
    assert_eq!(syscall::read(duplicate, &mut buffer).unwrap(), 2);
    assert_eq!(&buffer, b"45");

    syscall::close(duplicate).unwrap();
    syscall::close(descriptor).unwrap();
    drop_scratch(b"dup");
}

#[test]
fn duplicate_at_replaces_and_self_is_noop() {
    let _guard = test_support::serial();
    let first = scratch(b"resolve1");
    let second = scratch(b"resolve2");

    // 顶掉 second，原句柄被关闭
    let placed = syscall::duplicate_handle(first, Some(second), false).unwrap();
    assert_eq!(placed, second);
    syscall::seek(second, SeekCommand::End, 0).unwrap();

    // 复制到自身不关闭任何东西
    assert_eq!(syscall::duplicate_handle(first, Some(first), false).unwrap(), first);
    syscall::read(first, &mut [0u8; 1]).ok();

    syscall::close(first).unwrap();
    syscall::close(second).unwrap();
    drop_scratch(b"resolve1");
    drop_scratch(b"resolve2");
}

#[test]
fn close_on_execute_sweep_is_selective() {
    let _guard = test_support::serial();
    let keep = scratch(b"keep");
    let lose = scratch(b"lose");

    syscall::file_control(
        lose,
        FileControlRequest::SetFlags(DescriptorFlags::CLOSE_ON_EXECUTE),
    )
    .unwrap();
    assert_eq!(
        syscall::file_control(lose, FileControlRequest::GetFlags).unwrap(),
        DescriptorFlags::CLOSE_ON_EXECUTE.bits() as isize
    );

    syscall::close_on_execute();

    assert!(syscall::read(keep, &mut [0u8; 1]).is_ok());
    assert_eq!(
        syscall::read(lose, &mut [0u8; 1]),
        Err(KernelError::InvalidHandle)
    );

    syscall::close(keep).unwrap();
    drop_scratch(b"keep");
    drop_scratch(b"lose");
}

#[test]
fn close_from_sweeps_tail() {
    let _guard = test_support::serial();
    let low = scratch(b"low");
    let middle = scratch(b"middle");
    let high = scratch(b"high");
    assert!(low < middle && middle < high);

    syscall::file_control(middle, FileControlRequest::CloseFrom).unwrap();

    assert!(syscall::read(low, &mut [0u8; 1]).is_ok());
    assert_eq!(
        syscall::read(middle, &mut [0u8; 1]),
        Err(KernelError::InvalidHandle)
    );
    assert_eq!(
        syscall::read(high, &mut [0u8; 1]),
        Err(KernelError::InvalidHandle)
    );

    syscall::close(low).unwrap();
    drop_scratch(b"low");
    drop_scratch(b"middle");
    drop_scratch(b"high");
}

#[test]
fn fork_inheritance_shares_handles() {
    let _guard = test_support::serial();
    let descriptor = scratch(b"fork");
    syscall::write(descriptor, b"xyz").unwrap();

    // fork 继承整表；继承的描述符指向同一个句柄（偏移共享）
    let child = vfs::kernel_ops().handle_table().inherit();
    let inherited = child.get(descriptor).unwrap();
    assert_eq!(inherited.offset(), 3);
    drop(inherited);

    // 终止清扫把子表摘空，父表不受影响
    let closed = child.terminate_sweep();
    assert_eq!(closed.len(), 1);
    assert_eq!(child.open_count(), 0);
    drop(closed);
    assert!(syscall::read_at(descriptor, &mut [0u8; 1], 0).is_ok());

    syscall::close(descriptor).unwrap();
    drop_scratch(b"fork");
}

#[test]
fn status_flags_only_touch_mutable_subset() {
    let _guard = test_support::serial();
    let descriptor = scratch(b"status");

    syscall::file_control(descriptor, FileControlRequest::SetStatus(OpenFlags::APPEND)).unwrap();
    let status = syscall::file_control(descriptor, FileControlRequest::GetStatusAndAccess)
        .unwrap() as u32;
    let flags = OpenFlags::from_bits_truncate(status);
    assert!(flags.contains(OpenFlags::APPEND));
    // 访问位不随状态设置而丢失
    assert!(flags.contains(OpenFlags::READ) && flags.contains(OpenFlags::WRITE));

    // APPEND 生效：写总是落到文件尾
    syscall::write(descriptor, b"abc").unwrap();
    syscall::seek(descriptor, SeekCommand::Set, 0).unwrap();
    syscall::write(descriptor, b"def").unwrap();
    let mut buffer = [0u8; 8];
    assert_eq!(syscall::read_at(descriptor, &mut buffer, 0).unwrap(), 6);
    assert_eq!(&buffer[..6], b"abcdef");

    syscall::close(descriptor).unwrap();
    drop_scratch(b"status");
}

#[test]
fn seek_validates_target() {
    let _guard = test_support::serial();
    let descriptor = scratch(b"seek");
    syscall::write(descriptor, b"123456").unwrap();

    assert_eq!(syscall::seek(descriptor, SeekCommand::End, -2).unwrap(), 4);
    assert_eq!(
        syscall::seek(descriptor, SeekCommand::Set, -1),
        Err(KernelError::InvalidParameter)
    );

    let (read_end, write_end) = syscall::create_pipe(OpenFlags::empty()).unwrap();
    assert_eq!(
        syscall::seek(read_end, SeekCommand::Set, 0),
        Err(KernelError::NotSupported)
    );
    syscall::close(read_end).unwrap();
    syscall::close(write_end).unwrap();

    syscall::close(descriptor).unwrap();
    drop_scratch(b"seek");
}

#[test]
fn file_information_set_size_truncates() {
    let _guard = test_support::serial();
    let descriptor = scratch(b"info");
    syscall::write(descriptor, b"long content here").unwrap();

    let mut properties = blank_properties();
    syscall::file_control(
        descriptor,
        FileControlRequest::GetFileInformation(&mut properties),
    )
    .unwrap();
    assert_eq!(properties.size, 17);

    properties.size = 4;
    syscall::file_control(
        descriptor,
        FileControlRequest::SetFileInformation {
            properties: &properties,
            fields: FileSetInformation::SIZE,
        },
    )
    .unwrap();

    let mut buffer = [0u8; 16];
    assert_eq!(syscall::read_at(descriptor, &mut buffer, 0).unwrap(), 4);
    assert_eq!(&buffer[..4], b"long");

    syscall::close(descriptor).unwrap();
    drop_scratch(b"info");
}
