//! 共享内存对象目录
//!
//! 共享内存对象统一放在一个内存对象目录下；带 `SHARED_MEMORY`
//! 标志的打开在这里解析路径。对象本体是 `SharedMemoryObject`
//! 类型的文件对象，数据由页缓存后备在内存缓冲上。

use lazy_static::lazy_static;
use sync::SpinLock;
use uapi::fcntl::OpenFlags;
use uapi::fs::{FilePermissions, FileType};

use crate::error::KResult;
use crate::lookup::CreateParameters;
use crate::mount::PathPoint;
use crate::walk;

/// 共享内存目录在全局命名空间中的名字
pub const SHARED_MEMORY_DIRECTORY: &[u8] = b"shm";

lazy_static! {
    static ref SHM_DIRECTORY: SpinLock<Option<PathPoint>> = SpinLock::new(None);
}

/// 在根下建立共享内存目录
pub fn init() -> KResult<()> {
    let create = CreateParameters {
        file_type: FileType::ObjectDirectory,
        permissions: FilePermissions::from_bits_truncate(0o1777),
    };
    let (point, _) = walk::path_walk(
        true,
        None,
        b"/shm",
        OpenFlags::DIRECTORY | OpenFlags::CREATE,
        Some(&create),
    )?;
    *SHM_DIRECTORY.lock() = Some(point);
    Ok(())
}

/// 共享内存目录路径点
///
/// # Panics
/// 初始化之前调用则 panic
pub fn directory_point() -> PathPoint {
    SHM_DIRECTORY
        .lock()
        .clone()
        .expect("vfs: shared memory directory not initialized")
}
