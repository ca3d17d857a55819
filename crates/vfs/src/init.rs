//! 子系统初始化
//!
//! 必须在三张操作表注册之后、任何路径操作之前调用一次。根命名
//! 空间是对象设备上的一个对象目录；真实文件系统随后经 `mount`
//! 挂到它下面。

use alloc::sync::Arc;

use uapi::fs::{FilePermissions, FileProperties, FileType};

use crate::entry_cache;
use crate::error::KResult;
use crate::file_object::{FileObject, OBJECT_DEVICE};
use crate::lookup;
use crate::mount;
use crate::ops::{kernel_ops, memory_ops};
use crate::page_cache;
use crate::path_entry::PathEntry;
use crate::shm;

fn root_properties() -> FileProperties {
    let now = kernel_ops().timespec_now();
    FileProperties {
        device_id: OBJECT_DEVICE,
        file_id: lookup::allocate_object_file_id(),
        file_type: FileType::ObjectDirectory,
        user_id: 0,
        group_id: 0,
        permissions: FilePermissions::from_bits_truncate(0o755),
        hard_link_count: 1,
        size: 0,
        access_time: now,
        modified_time: now,
        status_change_time: now,
    }
}

/// 建立根命名空间并初始化各缓存
pub fn init() -> KResult<()> {
    entry_cache::init(memory_ops().total_physical_pages());
    page_cache::init();

    let properties = root_properties();
    let (root_file, creator) = FileObject::lookup_or_create(OBJECT_DEVICE, properties.file_id);
    debug_assert!(creator);
    root_file.complete_initialization(&properties);

    let root_entry: Arc<PathEntry> = PathEntry::new_anonymous(root_file.clone());
    mount::init(&root_entry);
    root_entry.release();
    let _ = root_file.release(false);

    shm::init()
}
