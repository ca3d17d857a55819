//! 管道
//!
//! 管道是单个 `Pipe` 类型的文件对象加一条共享流缓冲区；读写两端
//! 是同一对象上访问模式不同的两个句柄，各自在流上登记读方或写方。

use alloc::sync::Arc;

use uapi::fcntl::OpenFlags;
use uapi::fs::{FilePermissions, FileProperties, FileType};

use crate::error::KResult;
use crate::file_object::{FileObject, OBJECT_DEVICE};
use crate::handle::IoHandle;
use crate::lookup::allocate_object_file_id;
use crate::ops::kernel_ops;

/// 创建一条管道，返回（读端，写端）
///
/// `flags` 中的状态位（非阻塞、exec 关闭等）同时施加到两端。
pub fn create_pipe(flags: OpenFlags) -> KResult<(Arc<IoHandle>, Arc<IoHandle>)> {
    let credentials = kernel_ops().credentials();
    let now = kernel_ops().timespec_now();
    let properties = FileProperties {
        device_id: OBJECT_DEVICE,
        file_id: allocate_object_file_id(),
        file_type: FileType::Pipe,
        user_id: credentials.effective_user_id,
        group_id: credentials.effective_group_id,
        permissions: FilePermissions::USER_READ | FilePermissions::USER_WRITE,
        // 匿名对象：最后一个句柄释放即销毁
        hard_link_count: 0,
        size: 0,
        access_time: now,
        modified_time: now,
        status_change_time: now,
    };
    let (file, _creator) = FileObject::lookup_or_create(properties.device_id, properties.file_id);
    file.complete_initialization(&properties);

    let status = flags & !(OpenFlags::READ | OpenFlags::WRITE | OpenFlags::EXECUTE);
    let read_end = IoHandle::new(file.clone(), None, status | OpenFlags::READ);
    let write_end = IoHandle::new(file.clone(), None, status | OpenFlags::WRITE);
    let _ = file.release(false);
    Ok((read_end, write_end))
}
