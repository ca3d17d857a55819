//! I/O 句柄
//!
//! 句柄把文件对象、命名空间位置、访问模式、可变状态标志和文件
//! 偏移捆在一起。`duplicate` 共享同一个句柄（偏移共享），描述符
//! 标志留在句柄表槽位里。句柄持有一次文件对象引用，流式类型还在
//! 打开时登记读写方。

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use uapi::fcntl::OpenFlags;
use uapi::fs::{FilePermissions, FileType};

use crate::error::{KResult, KernelError};
use crate::file_object::{FileObject, SpecialIo};
use crate::lookup::CreateParameters;
use crate::mount::PathPoint;
use crate::ops::kernel_ops;
use crate::perm;
use crate::walk;

/// `file_control` 可以改写的状态标志
pub fn mutable_status() -> OpenFlags {
    OpenFlags::APPEND
        | OpenFlags::NON_BLOCKING
        | OpenFlags::ASYNCHRONOUS
        | OpenFlags::NO_ACCESS_TIME
}

/// I/O 句柄
pub struct IoHandle {
    file: Arc<FileObject>,
    /// 命名空间位置；匿名对象（管道、终端端点）没有
    path: Option<PathPoint>,
    /// 访问模式（打开后不变）
    access: OpenFlags,
    /// 可变状态标志
    status: AtomicU32,
    offset: AtomicU64,
}

impl IoHandle {
    /// 构造句柄：取一次文件引用并登记流式端点
    pub fn new(file: Arc<FileObject>, path: Option<PathPoint>, flags: OpenFlags) -> Arc<IoHandle> {
        file.acquire();
        let access = flags.access();
        match file.special().as_deref() {
            Some(SpecialIo::Pipe(stream)) => {
                if access.contains(OpenFlags::READ) {
                    stream.add_reader();
                }
                if access.contains(OpenFlags::WRITE) {
                    stream.add_writer();
                }
            }
            Some(SpecialIo::Terminal { terminal, master }) => {
                terminal.register(*master, access);
            }
            _ => {}
        }
        Arc::new(IoHandle {
            file,
            path,
            access,
            status: AtomicU32::new((flags & !flags.access()).bits()),
            offset: AtomicU64::new(0),
        })
    }

    /// 文件对象
    pub fn file(&self) -> &Arc<FileObject> {
        &self.file
    }

    /// 命名空间位置
    pub fn path(&self) -> Option<&PathPoint> {
        self.path.as_ref()
    }

    /// 访问模式
    pub fn access(&self) -> OpenFlags {
        self.access
    }

    /// 当前状态标志
    pub fn status(&self) -> OpenFlags {
        OpenFlags::from_bits_truncate(self.status.load(Ordering::Acquire))
    }

    /// 改写状态标志中允许修改的部分
    pub fn set_status(&self, new_status: OpenFlags) {
        let mutable = mutable_status();
        let mut current = self.status.load(Ordering::Acquire);
        loop {
            let updated = (current & !mutable.bits()) | (new_status & mutable).bits();
            match self.status.compare_exchange(
                current,
                updated,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    /// 访问模式与状态标志的合并视图
    pub fn flags(&self) -> OpenFlags {
        self.access | self.status()
    }

    /// 此句柄的 I/O 是否非阻塞
    pub fn is_non_blocking(&self) -> bool {
        self.status().contains(OpenFlags::NON_BLOCKING)
    }

    /// 当前偏移
    pub fn offset(&self) -> u64 {
        self.offset.load(Ordering::Acquire)
    }

    /// 设置偏移
    pub fn set_offset(&self, offset: u64) {
        self.offset.store(offset, Ordering::Release);
    }

    /// 就绪事件
    pub fn poll_events(&self) -> uapi::poll::PollEvents {
        match self.file.special().as_deref() {
            Some(SpecialIo::Pipe(stream)) => stream.io_state().poll(),
            Some(SpecialIo::Terminal { terminal, master }) => terminal.poll(*master),
            _ => self.file.io_state.poll(),
        }
    }
}

impl Drop for IoHandle {
    fn drop(&mut self) {
        match self.file.special().as_deref() {
            Some(SpecialIo::Pipe(stream)) => {
                if self.access.contains(OpenFlags::READ) {
                    stream.remove_reader();
                }
                if self.access.contains(OpenFlags::WRITE) {
                    stream.remove_writer();
                }
            }
            Some(SpecialIo::Terminal { terminal, master }) => {
                terminal.unregister(*master, self.access);
            }
            _ => {}
        }
        let _ = self.file.release(false);
    }
}

/// 打开路径并生成句柄
///
/// 走完整路径遍历；新创建的文件不再做权限检查（创建者按参数拿到
/// 它），已存在的按访问模式检查。目录拒绝写打开；`TRUNCATE`
/// 联合写访问把普通文件截到零。
pub fn open_file(
    from_kernel: bool,
    start: Option<&PathPoint>,
    path: &[u8],
    flags: OpenFlags,
    create_permissions: FilePermissions,
) -> KResult<Arc<IoHandle>> {
    let create = if flags.contains(OpenFlags::CREATE) {
        let file_type = if flags.contains(OpenFlags::DIRECTORY) {
            FileType::RegularDirectory
        } else if flags.contains(OpenFlags::SHARED_MEMORY) {
            FileType::SharedMemoryObject
        } else {
            FileType::RegularFile
        };
        Some(CreateParameters {
            file_type,
            permissions: create_permissions,
        })
    } else {
        None
    };

    let (point, created) = walk::path_walk(from_kernel, start, path, flags, create.as_ref())?;
    let file = point
        .entry
        .file_object()
        .ok_or(KernelError::PathNotFound)?;
    let file_type = file.file_type();

    if file_type.is_directory() && flags.contains(OpenFlags::WRITE) {
        return Err(KernelError::FileIsDirectory);
    }
    if !created {
        let access = flags.access();
        if !access.is_empty() {
            let credentials = kernel_ops().credentials();
            perm::check_access(from_kernel, &credentials, &file, access)?;
        }
    }
    if flags.contains(OpenFlags::TRUNCATE)
        && flags.contains(OpenFlags::WRITE)
        && !created
        && matches!(
            file_type,
            FileType::RegularFile | FileType::SharedMemoryObject
        )
    {
        crate::page_cache::truncate_file(&file, 0)?;
    }
    Ok(IoHandle::new(file, Some(point), flags))
}
