//! 页缓存：回写、截断零化、清理線程的一轮扫描

use uapi::fcntl::OpenFlags;
use uapi::fs::{FilePermissions, FlushFlags};
use vfs::{page_cache, syscall};

fn perms(bits: u32) -> FilePermissions {
    FilePermissions::from_bits_truncate(bits)
}

#[test]
fn write_back_reaches_device() {
    let _guard = test_support::serial();
    test_support::mount_ram_disk(b"/wb", 21).unwrap();

    let descriptor = syscall::open(None,
        b"/wb/data",
        OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE,
        perms(0o644),
    )
    .unwrap();
    syscall::write(descriptor, &[0xabu8; 5000]).unwrap();

    let before = page_cache::statistics();
    assert!(before.dirty_pages >= 2);

    syscall::flush(Some(descriptor), FlushFlags::WRITE).unwrap();
    let after = page_cache::statistics();
    assert_eq!(after.dirty_pages, before.dirty_pages - 2);

    // 设备上看到完整内容
    let mut raw = vec![0u8; 5000];
    let found = vfs::device_ops().device_lookup(21, 1, b"data").unwrap();
    let read = vfs::device_ops()
        .read_range(21, found.file_id, 0, &mut raw)
        .unwrap();
    assert_eq!(read, 5000);
    assert!(raw.iter().all(|byte| *byte == 0xab));

    syscall::close(descriptor).unwrap();
    let _ = syscall::unmount(b"/wb", uapi::mount::MountFlags::empty());
}

#[test]
fn truncate_zeroes_partial_page() {
    let _guard = test_support::serial();

    let descriptor = syscall::open(None,
        b"trunc",
        OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::SHARED_MEMORY,
        perms(0o600),
    )
    .unwrap();
    syscall::write(descriptor, &[0x55u8; 5000]).unwrap();

    // 截断到页中间再写回页尾，缩掉的区间必须读出零
    use uapi::fs::{FileSetInformation, FileProperties, FileType};
    use uapi::time::TimeSpec;
    let mut properties = FileProperties {
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
    };
    syscall::file_control(
        descriptor,
        vfs::FileControlRequest::GetFileInformation(&mut properties),
    )
    .unwrap();
    assert_eq!(properties.size, 5000);

    properties.size = 4100;
    syscall::file_control(
        descriptor,
        vfs::FileControlRequest::SetFileInformation {
            properties: &properties,
            fields: FileSetInformation::SIZE,
        },
    )
    .unwrap();

    syscall::write_at(descriptor, &[0x77u8; 4], 4600).unwrap();
    let mut buffer = [0xffu8; 8];
    assert_eq!(syscall::read_at(descriptor, &mut buffer, 4100).unwrap(), 8);
    assert_eq!(buffer, [0u8; 8]);

    syscall::close(descriptor).unwrap();
    syscall::delete(None, b"trunc", OpenFlags::SHARED_MEMORY).unwrap();
}

#[test]
fn cleaner_pass_writes_back_listed_files() {
    let _guard = test_support::serial();
    test_support::mount_ram_disk(b"/cl", 22).unwrap();

    let descriptor = syscall::open(None,
        b"/cl/log",
        OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE,
        perms(0o644),
    )
    .unwrap();
    syscall::write(descriptor, b"cleaner target").unwrap();
    let dirty_before = page_cache::statistics().dirty_pages;
    assert!(dirty_before >= 1);

    page_cache::cleaner::cleaner_pass();

    assert!(page_cache::statistics().dirty_pages < dirty_before);
    let found = vfs::device_ops().device_lookup(22, 1, b"log").unwrap();
    let mut raw = [0u8; 14];
    assert_eq!(
        vfs::device_ops().read_range(22, found.file_id, 0, &mut raw).unwrap(),
        14
    );
    assert_eq!(&raw, b"cleaner target");

    syscall::close(descriptor).unwrap();
    let _ = syscall::unmount(b"/cl", uapi::mount::MountFlags::empty());
}

#[test]
fn requeued_destruction_settles_counters_once() {
    let _guard = test_support::serial();

    let descriptor = syscall::open(None,
        b"requeue",
        OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::SHARED_MEMORY,
        perms(0o600),
    )
    .unwrap();
    syscall::write(descriptor, b"x").unwrap();

    use uapi::fs::{FileProperties, FileType};
    use uapi::time::TimeSpec;
    let mut properties = FileProperties {
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
    };
    syscall::file_control(
        descriptor,
        vfs::FileControlRequest::GetFileInformation(&mut properties),
    )
    .unwrap();

    // 排空回写名单并关闭、除名：缓存页成为文件的最后引用
    syscall::flush(None, FlushFlags::ALL | FlushFlags::WRITE).unwrap();
    let file = vfs::FileObject::lookup(properties.device_id, properties.file_id).unwrap();
    syscall::close(descriptor).unwrap();
    syscall::delete(None, b"requeue", OpenFlags::SHARED_MEMORY).unwrap();

    let entry = page_cache::lookup(&file, 0, false).unwrap();
    page_cache::evict_file(&file, 0);
    let _ = file.release(false);
    let before = page_cache::statistics().entry_count;

    // 清理上下文的销毁不许做最后一次文件引用释放，项被推回重试
    page_cache::destroy_entries(vec![entry], true);
    assert_eq!(page_cache::statistics().entry_count, before - 1);

    // 重试仍失败：计数不再重复结算
    page_cache::cleaner::cleaner_pass();
    assert_eq!(page_cache::statistics().entry_count, before - 1);

    // 别处补上一次引用后重试成功，项离开移除表
    file.acquire();
    page_cache::cleaner::cleaner_pass();
    assert_eq!(page_cache::statistics().entry_count, before - 1);
    let _ = file.release(false);
}

#[test]
fn discard_drops_clean_pages() {
    let _guard = test_support::serial();
    test_support::mount_ram_disk(b"/disc", 23).unwrap();

    let descriptor = syscall::open(None,
        b"/disc/file",
        OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE,
        perms(0o644),
    )
    .unwrap();
    syscall::write(descriptor, &[1u8; 4096]).unwrap();

    let before = page_cache::statistics().entry_count;
    syscall::flush(Some(descriptor), FlushFlags::WRITE | FlushFlags::DISCARD).unwrap();
    assert!(page_cache::statistics().entry_count < before);

    // 丢弃后再读，内容从设备恢复
    let mut buffer = [0u8; 4];
    assert_eq!(syscall::read_at(descriptor, &mut buffer, 0).unwrap(), 4);
    assert_eq!(buffer, [1u8; 4]);

    syscall::close(descriptor).unwrap();
    let _ = syscall::unmount(b"/disc", uapi::mount::MountFlags::empty());
}

#[test]
fn dirty_limit_blocks_writers_until_cleaner_runs() {
    let _guard = test_support::serial();
    test_support::mount_ram_disk(b"/dl", 24).unwrap();

    let descriptor = syscall::open(None,
        b"/dl/burst",
        OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE,
        perms(0o644),
    )
    .unwrap();

    // 清空存量脏页，再把脏页上限压到两页
    syscall::flush(None, FlushFlags::ALL | FlushFlags::WRITE).unwrap();
    page_cache::set_tunables(page_cache::Tunables {
        headroom_trigger: 0,
        headroom_retreat: 0,
        ideal_size: 4,
        min_floor: 0,
        low_mem_clean_minimum: 64,
        va_trigger: 0,
        va_retreat: 0,
    });

    // 一次写越过水位；后续写入方必须停在水位前
    syscall::write(descriptor, &[0x5au8; 3 * 4096]).unwrap();
    assert!(page_cache::is_too_dirty());

    let done = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let done_flag = done.clone();
    let writer = std::thread::spawn(move || {
        syscall::write_at(descriptor, b"late", 3 * 4096).unwrap();
        done_flag.store(true, std::sync::atomic::Ordering::Release);
    });

    // 清理线程没跑，写入方一直停着
    std::thread::sleep(std::time::Duration::from_millis(100));
    assert!(!done.load(std::sync::atomic::Ordering::Acquire));

    page_cache::cleaner::cleaner_pass();
    writer.join().unwrap();
    assert!(done.load(std::sync::atomic::Ordering::Acquire));
    assert!(!page_cache::is_too_dirty());

    page_cache::init();
    syscall::close(descriptor).unwrap();
    let _ = syscall::unmount(b"/dl", uapi::mount::MountFlags::empty());
}
