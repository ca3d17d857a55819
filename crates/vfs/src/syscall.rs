//! 系统调用面
//!
//! 内核出入口的语义层：参数已经过调用门拷贝与校验，这里以安全
//! 类型操作。返回约定由 [`syscall_result`] 统一折算：非负为成功
//! 或字节数，负数为取负的错误码；被信号打断且没有字节转移的
//! 等待折算成 `RestartAfterSignal`。

use alloc::sync::Arc;
use alloc::vec::Vec;

use uapi::cred::{Capabilities, TaskId};
use uapi::fcntl::{
    DescriptorFlags, FileLockDescription, FileLockKind, OpenFlags, SeekCommand,
    USER_CONTROL_ASYNC, USER_CONTROL_NON_BLOCKING,
};
use uapi::fs::{
    DeviceId, FilePermissions, FileProperties, FileSetInformation, FileType, FlushFlags,
};
use uapi::mount::MountFlags;
use uapi::poll::PollDescriptor;
use uapi::signal::SignalMask;

use crate::error::{KResult, KernelError};
use crate::file_lock;
use crate::file_object::{FileObject, FileObjectFlags};
use crate::handle::{self, IoHandle};
use crate::handle_table::HandleTable;
use crate::io;
use crate::io_state::AsyncOwner;
use crate::lookup::{self, CreateParameters};
use crate::mount::{self, PathPoint};
use crate::ops::kernel_ops;
use crate::page_cache;
use crate::path_entry::{self, PathEntryFlags};
use crate::perm;
use crate::pipe;
use crate::poll as poll_impl;
use crate::terminal;
use crate::walk;

/// 把结果折算成系统调用返回值
pub fn syscall_result(result: KResult<isize>) -> isize {
    match result {
        Ok(value) => value,
        Err(error) => error.at_boundary().to_errno(),
    }
}

fn current_table() -> Arc<HandleTable> {
    kernel_ops().handle_table()
}

/// 关闭协议：先摘掉本任务在该文件上的区域锁，再归还句柄
fn close_handle(handle: Arc<IoHandle>) {
    let file = handle.file().clone();
    file_lock::remove_file_locks(&file, kernel_ops().current_task());
    drop(handle);
    if file.flag_set(FileObjectFlags::DELETED) {
        page_cache::evict_file(&file, 0);
    }
}

fn descriptor_flags_for(flags: OpenFlags) -> DescriptorFlags {
    if flags.contains(OpenFlags::CLOSE_ON_EXECUTE) {
        DescriptorFlags::CLOSE_ON_EXECUTE
    } else {
        DescriptorFlags::empty()
    }
}

/// 相对路径的起点：传了目录描述符就用它的路径点，否则交给
/// 路径解析取进程当前目录
fn resolve_start(directory: Option<i32>) -> KResult<Option<PathPoint>> {
    let Some(descriptor) = directory else {
        return Ok(None);
    };
    let handle = current_table().get(descriptor)?;
    if !handle.file().file_type().is_directory() {
        return Err(KernelError::NotADirectory);
    }
    let point = handle.path().ok_or(KernelError::NotADirectory)?;
    Ok(Some(point.clone()))
}

// ========== 打开与关闭 ==========

/// 打开路径；相对路径从 `directory` 描述符起步
pub fn open(
    directory: Option<i32>,
    path: &[u8],
    flags: OpenFlags,
    create_permissions: FilePermissions,
) -> KResult<i32> {
    let start = resolve_start(directory)?;
    let handle = handle::open_file(false, start.as_ref(), path, flags, create_permissions)?;
    current_table().allocate(handle, descriptor_flags_for(flags))
}

/// 绕过名字直接打开设备
pub fn open_device(device_id: DeviceId, flags: OpenFlags) -> KResult<i32> {
    let properties =
        crate::ops::device_ops().device_lookup(device_id, 0, b"")?;
    let (file, creator) = FileObject::lookup_or_create(properties.device_id, properties.file_id);
    if creator {
        file.complete_initialization(&properties);
    } else {
        file.wait_ready()?;
    }
    let access = flags.access();
    if !access.is_empty() {
        let credentials = kernel_ops().credentials();
        if let Err(error) = perm::check_access(false, &credentials, &file, access) {
            let _ = file.release(false);
            return Err(error);
        }
    }
    let handle = IoHandle::new(file.clone(), None, flags);
    let _ = file.release(false);
    current_table().allocate(handle, descriptor_flags_for(flags))
}

/// 关闭描述符
pub fn close(descriptor: i32) -> KResult<()> {
    let handle = current_table().remove(descriptor)?;
    close_handle(handle);
    Ok(())
}

// ========== 读写 ==========

/// 读（句柄偏移）
pub fn read(descriptor: i32, buffer: &mut [u8]) -> KResult<usize> {
    let handle = current_table().get(descriptor)?;
    io::perform_read(&handle, buffer, None)
}

/// 读（显式偏移）
pub fn read_at(descriptor: i32, buffer: &mut [u8], offset: u64) -> KResult<usize> {
    let handle = current_table().get(descriptor)?;
    io::perform_read(&handle, buffer, Some(offset))
}

/// 写（句柄偏移）
pub fn write(descriptor: i32, buffer: &[u8]) -> KResult<usize> {
    let handle = current_table().get(descriptor)?;
    io::perform_write(&handle, buffer, None)
}

/// 写（显式偏移）
pub fn write_at(descriptor: i32, buffer: &[u8], offset: u64) -> KResult<usize> {
    let handle = current_table().get(descriptor)?;
    io::perform_write(&handle, buffer, Some(offset))
}

/// 向量读
pub fn read_vectored(descriptor: i32, buffers: &mut [&mut [u8]]) -> KResult<usize> {
    let handle = current_table().get(descriptor)?;
    io::perform_vectored_read(&handle, buffers)
}

/// 向量写
pub fn write_vectored(descriptor: i32, buffers: &[&[u8]]) -> KResult<usize> {
    let handle = current_table().get(descriptor)?;
    io::perform_vectored_write(&handle, buffers)
}

// ========== 冲刷 ==========

/// 同步冲刷
///
/// `ALL` 回写全部挂账文件；否则作用于单个描述符，`DISCARD`
/// 在回写后丢弃缓存页。
pub fn flush(descriptor: Option<i32>, flags: FlushFlags) -> KResult<()> {
    if flags.contains(FlushFlags::ALL) {
        let files = page_cache::take_dirty_files();
        let mut first_error = Ok(());
        for file in files {
            file.clear_flags(FileObjectFlags::FLUSH_LISTED);
            let result = page_cache::flush(&file, 0, 0, false)
                .and_then(|_| page_cache::flush_properties(&file));
            if result.is_err() && first_error.is_ok() {
                first_error = result;
            }
            let _ = file.release(false);
        }
        return first_error;
    }
    let descriptor = descriptor.ok_or(KernelError::InvalidParameter)?;
    let handle = current_table().get(descriptor)?;
    let file = handle.file();
    page_cache::flush(file, 0, 0, false)?;
    page_cache::flush_properties(file)?;
    if flags.contains(FlushFlags::DISCARD) {
        page_cache::evict_file(file, 0);
    }
    Ok(())
}

// ========== 管道与终端 ==========

/// 创建匿名管道，返回（读端，写端）描述符
pub fn create_pipe(flags: OpenFlags) -> KResult<(i32, i32)> {
    let (read_end, write_end) = pipe::create_pipe(flags)?;
    let table = current_table();
    let descriptor_flags = descriptor_flags_for(flags);
    let read_descriptor = table.allocate(read_end, descriptor_flags)?;
    match table.allocate(write_end, descriptor_flags) {
        Ok(write_descriptor) => Ok((read_descriptor, write_descriptor)),
        Err(error) => {
            if let Ok(handle) = table.remove(read_descriptor) {
                close_handle(handle);
            }
            Err(error)
        }
    }
}

/// 在命名空间中创建命名管道（不返回描述符）
pub fn create_named_pipe(
    directory: Option<i32>,
    path: &[u8],
    permissions: FilePermissions,
) -> KResult<()> {
    let create = CreateParameters {
        file_type: FileType::Pipe,
        permissions,
    };
    let start = resolve_start(directory)?;
    let (_, created) = walk::path_walk(
        false,
        start.as_ref(),
        path,
        OpenFlags::CREATE | OpenFlags::FAIL_IF_EXISTS,
        Some(&create),
    )?;
    debug_assert!(created);
    Ok(())
}

/// 创建终端主从对，返回（主端，从端）描述符
pub fn create_terminal(
    master_flags: OpenFlags,
    slave_flags: OpenFlags,
) -> KResult<(i32, i32)> {
    let (master, slave) = terminal::create_terminal(master_flags, slave_flags)?;
    let table = current_table();
    let master_descriptor = table.allocate(master, descriptor_flags_for(master_flags))?;
    match table.allocate(slave, descriptor_flags_for(slave_flags)) {
        Ok(slave_descriptor) => Ok((master_descriptor, slave_descriptor)),
        Err(error) => {
            if let Ok(handle) = table.remove(master_descriptor) {
                close_handle(handle);
            }
            Err(error)
        }
    }
}

// ========== 目录 ==========

/// 取当前目录（或进程根）的全路径
pub fn get_current_directory(root: bool) -> KResult<Vec<u8>> {
    let process_root = kernel_ops().current_root();
    if root {
        let point = match &process_root {
            Some(point) => point.clone(),
            None => mount::root_point(),
        };
        // 受限根对进程自身渲染为 `/`，不泄露其在全局树中的位置
        return Ok(mount::get_path_from_root(&point, process_root.as_ref()));
    }
    let cwd = kernel_ops()
        .current_directory()
        .unwrap_or_else(mount::root_point);
    Ok(mount::get_path_from_root(&cwd, process_root.as_ref()))
}

/// 切换当前目录或进程根
///
/// 改根要求 `CHROOT` 能力、单线程、且除目标外没有打开的目录
/// 描述符；带空路径的改根调用在 `ESCAPE_CHROOT` 能力下逃出
/// 受限根。
pub fn change_directory(root: bool, path: Option<&[u8]>) -> KResult<()> {
    let credentials = kernel_ops().credentials();
    match (root, path) {
        (false, Some(path)) => {
            let (point, _) = walk::path_walk(false, None, path, OpenFlags::DIRECTORY, None)?;
            kernel_ops().set_current_directory(point);
            Ok(())
        }
        (true, Some(path)) => {
            if !credentials.capabilities.contains(Capabilities::CHROOT) {
                return Err(KernelError::AccessDenied);
            }
            if kernel_ops().thread_count() != 1 {
                return Err(KernelError::ResourceInUse);
            }
            let (point, _) = walk::path_walk(false, None, path, OpenFlags::DIRECTORY, None)?;
            let target = point
                .entry
                .file_object()
                .ok_or(KernelError::PathNotFound)?;
            let mut busy = false;
            current_table().for_each(|_, handle, _| {
                let file = handle.file();
                if file.file_type().is_directory() && !Arc::ptr_eq(file, &target) {
                    busy = true;
                }
            });
            if busy {
                return Err(KernelError::ResourceInUse);
            }
            kernel_ops().set_current_directory(point.clone());
            kernel_ops().set_current_root(Some(point));
            Ok(())
        }
        (true, None) => {
            if !credentials
                .capabilities
                .contains(Capabilities::ESCAPE_CHROOT)
            {
                return Err(KernelError::AccessDenied);
            }
            kernel_ops().set_current_root(None);
            Ok(())
        }
        (false, None) => Err(KernelError::InvalidParameter),
    }
}

// ========== 轮询与复制 ==========

/// 轮询
pub fn poll(
    descriptors: &mut [PollDescriptor],
    timeout_ms: u64,
    signal_mask: Option<SignalMask>,
) -> KResult<usize> {
    poll_impl::poll(descriptors, timeout_ms, signal_mask)
}

/// 复制描述符
///
/// `target` 为 None 时取最小空闲描述符；指定时顶掉旧占用者。
/// 新描述符默认清除 exec 关闭标志。
pub fn duplicate_handle(
    descriptor: i32,
    target: Option<i32>,
    close_on_execute: bool,
) -> KResult<i32> {
    let flags = if close_on_execute {
        DescriptorFlags::CLOSE_ON_EXECUTE
    } else {
        DescriptorFlags::empty()
    };
    let table = current_table();
    match target {
        None => table.duplicate(descriptor, 0, flags),
        Some(target) => {
            let displaced = table.duplicate_at(descriptor, target, flags)?;
            if let Some(handle) = displaced {
                close_handle(handle);
            }
            Ok(target)
        }
    }
}

// ========== 句柄控制 ==========

/// `file_control` 的类型化请求
pub enum FileControlRequest<'a> {
    /// 复制到自 `minimum` 起的最小空闲描述符
    Duplicate {
        /// 新描述符下界
        minimum: i32,
    },
    /// 读描述符标志
    GetFlags,
    /// 写描述符标志
    SetFlags(DescriptorFlags),
    /// 读状态与访问标志
    GetStatusAndAccess,
    /// 写状态标志
    SetStatus(OpenFlags),
    /// 读异步信号所有者
    GetSignalOwner,
    /// 设异步信号所有者
    SetSignalOwner(TaskId),
    /// 探测区域锁
    GetLock(&'a mut FileLockDescription),
    /// 设置区域锁（非阻塞）
    SetLock(&'a FileLockDescription),
    /// 设置区域锁（阻塞）
    SetLockWait(&'a FileLockDescription),
    /// 读文件属性
    GetFileInformation(&'a mut FileProperties),
    /// 写文件属性
    SetFileInformation {
        /// 新属性值
        properties: &'a FileProperties,
        /// 应用哪些字段
        fields: FileSetInformation,
    },
    /// 要求目标为目录
    SetDirectoryFlag,
    /// 关闭自本描述符起的全部描述符
    CloseFrom,
    /// 取句柄全路径
    GetPath(&'a mut Vec<u8>),
}

fn rewire_async_owner(handle: &IoHandle, enable: bool, owner: Option<TaskId>) {
    let record = if enable {
        let credentials = kernel_ops().credentials();
        Some(AsyncOwner {
            task: owner.unwrap_or_else(|| kernel_ops().current_task()),
            real_user_id: credentials.real_user_id,
            effective_user_id: credentials.effective_user_id,
            capabilities: credentials.capabilities,
        })
    } else {
        None
    };
    match handle.file().pipe_stream() {
        Some(stream) => stream.io_state().set_async_owner(record),
        None => handle.file().io_state.set_async_owner(record),
    }
}

/// 句柄控制
pub fn file_control(descriptor: i32, request: FileControlRequest) -> KResult<isize> {
    let table = current_table();
    match request {
        FileControlRequest::Duplicate { minimum } => {
            let new = table.duplicate(descriptor, minimum, DescriptorFlags::empty())?;
            Ok(new as isize)
        }
        FileControlRequest::GetFlags => {
            Ok(table.get_flags(descriptor)?.bits() as isize)
        }
        FileControlRequest::SetFlags(flags) => {
            table.set_flags(descriptor, flags)?;
            Ok(0)
        }
        FileControlRequest::GetStatusAndAccess => {
            let handle = table.get(descriptor)?;
            Ok(handle.flags().bits() as isize)
        }
        FileControlRequest::SetStatus(status) => {
            let handle = table.get(descriptor)?;
            let was_async = handle.status().contains(OpenFlags::ASYNCHRONOUS);
            handle.set_status(status);
            let now_async = handle.status().contains(OpenFlags::ASYNCHRONOUS);
            if was_async != now_async {
                rewire_async_owner(&handle, now_async, None);
            }
            Ok(0)
        }
        FileControlRequest::GetSignalOwner => {
            let handle = table.get(descriptor)?;
            let owner = match handle.file().pipe_stream() {
                Some(stream) => stream.io_state().async_owner(),
                None => handle.file().io_state.async_owner(),
            };
            Ok(owner.map(|record| record.task as isize).unwrap_or(0))
        }
        FileControlRequest::SetSignalOwner(task) => {
            let handle = table.get(descriptor)?;
            rewire_async_owner(&handle, true, Some(task));
            Ok(0)
        }
        FileControlRequest::GetLock(probe) => {
            let handle = table.get(descriptor)?;
            // 调用方传入的 owner 不作数，冲突判定以当前任务为准
            probe.owner = kernel_ops().current_task();
            *probe = file_lock::get_lock(handle.file(), probe);
            Ok(0)
        }
        FileControlRequest::SetLock(description) => {
            set_lock_checked(descriptor, description, false)
        }
        FileControlRequest::SetLockWait(description) => {
            set_lock_checked(descriptor, description, true)
        }
        FileControlRequest::GetFileInformation(properties) => {
            let handle = table.get(descriptor)?;
            *properties = handle.file().properties();
            Ok(0)
        }
        FileControlRequest::SetFileInformation { properties, fields } => {
            let handle = table.get(descriptor)?;
            apply_file_information(false, handle.file(), properties, fields)?;
            Ok(0)
        }
        FileControlRequest::SetDirectoryFlag => {
            let handle = table.get(descriptor)?;
            if !handle.file().file_type().is_directory() {
                return Err(KernelError::NotADirectory);
            }
            Ok(0)
        }
        FileControlRequest::CloseFrom => {
            let closed = table.close_from(descriptor)?;
            for handle in closed {
                close_handle(handle);
            }
            Ok(0)
        }
        FileControlRequest::GetPath(path) => {
            let handle = table.get(descriptor)?;
            let point = handle.path().ok_or(KernelError::PathNotFound)?;
            let root = kernel_ops().current_root();
            *path = mount::get_path_from_root(point, root.as_ref());
            Ok(0)
        }
    }
}

fn set_lock_checked(
    descriptor: i32,
    description: &FileLockDescription,
    blocking: bool,
) -> KResult<isize> {
    let handle = current_table().get(descriptor)?;
    match description.kind {
        FileLockKind::Read => {
            if !handle.access().contains(OpenFlags::READ) {
                return Err(KernelError::AccessDenied);
            }
        }
        FileLockKind::Write => {
            if !handle.access().contains(OpenFlags::WRITE) {
                return Err(KernelError::AccessDenied);
            }
        }
        FileLockKind::Unlock => {}
    }
    let owned = FileLockDescription {
        owner: kernel_ops().current_task(),
        ..*description
    };
    file_lock::set_lock(handle.file(), &owned, blocking)?;
    Ok(0)
}

/// `user_control` 通用请求码
pub fn user_control(descriptor: i32, code: u32, argument: usize) -> KResult<isize> {
    let handle = current_table().get(descriptor)?;
    match code {
        USER_CONTROL_ASYNC => {
            let enable = argument != 0;
            let mut status = handle.status();
            status.set(OpenFlags::ASYNCHRONOUS, enable);
            handle.set_status(status);
            rewire_async_owner(&handle, enable, None);
            Ok(0)
        }
        USER_CONTROL_NON_BLOCKING => {
            let mut status = handle.status();
            status.set(OpenFlags::NON_BLOCKING, argument != 0);
            handle.set_status(status);
            Ok(0)
        }
        _ => Err(KernelError::NotSupported),
    }
}

// ========== 文件属性 ==========

fn apply_file_information(
    from_kernel: bool,
    file: &Arc<FileObject>,
    properties: &FileProperties,
    fields: FileSetInformation,
) -> KResult<()> {
    let credentials = kernel_ops().credentials();
    let privileged = from_kernel
        || credentials.capabilities.contains(Capabilities::FILE_ACCESS);
    let owner = privileged || credentials.effective_user_id == file.metadata().user_id;

    if fields.contains(FileSetInformation::OWNER) && !privileged {
        return Err(KernelError::AccessDenied);
    }
    if fields.intersects(FileSetInformation::PERMISSIONS | FileSetInformation::TIMES) && !owner {
        return Err(KernelError::AccessDenied);
    }
    if fields.contains(FileSetInformation::SIZE) {
        perm::check_access(from_kernel, &credentials, file, OpenFlags::WRITE)?;
        page_cache::truncate_file(file, properties.size)?;
    }
    if fields.intersects(
        FileSetInformation::OWNER | FileSetInformation::PERMISSIONS | FileSetInformation::TIMES,
    ) {
        let now = kernel_ops().timespec_now();
        file.update_metadata(|metadata| {
            if fields.contains(FileSetInformation::OWNER) {
                metadata.user_id = properties.user_id;
                metadata.group_id = properties.group_id;
            }
            if fields.contains(FileSetInformation::PERMISSIONS) {
                metadata.permissions = properties.permissions;
            }
            if fields.contains(FileSetInformation::TIMES) {
                metadata.access_time = properties.access_time;
                metadata.modified_time = properties.modified_time;
            }
            metadata.status_change_time = now;
        });
    }
    Ok(())
}

/// 按路径读写文件属性
pub fn get_set_file_information(
    directory: Option<i32>,
    path: &[u8],
    follow_link: bool,
    set: Option<(&FileProperties, FileSetInformation)>,
) -> KResult<FileProperties> {
    let mut flags = OpenFlags::empty();
    if !follow_link {
        flags |= OpenFlags::SYMBOLIC_LINK;
    }
    let start = resolve_start(directory)?;
    let (point, _) = walk::path_walk(false, start.as_ref(), path, flags, None)?;
    let file = point
        .entry
        .file_object()
        .ok_or(KernelError::PathNotFound)?;
    if let Some((properties, fields)) = set {
        apply_file_information(false, &file, properties, fields)?;
    }
    Ok(file.properties())
}

// ========== 偏移 ==========

/// 移动句柄偏移
pub fn seek(descriptor: i32, command: SeekCommand, offset: i64) -> KResult<u64> {
    let handle = current_table().get(descriptor)?;
    let file = handle.file();
    match file.file_type() {
        FileType::Pipe
        | FileType::Socket
        | FileType::TerminalMaster
        | FileType::TerminalSlave => return Err(KernelError::NotSupported),
        _ => {}
    }
    let base = match command {
        SeekCommand::Set => 0,
        SeekCommand::Current => handle.offset() as i64,
        SeekCommand::End => file.size() as i64,
    };
    let target = base.checked_add(offset).ok_or(KernelError::InvalidParameter)?;
    if target < 0 {
        return Err(KernelError::InvalidParameter);
    }
    handle.set_offset(target as u64);
    Ok(target as u64)
}

// ========== 符号链接 ==========

/// 创建符号链接
pub fn create_symbolic_link(
    directory: Option<i32>,
    path: &[u8],
    target: &[u8],
) -> KResult<()> {
    if target.is_empty() {
        return Err(KernelError::InvalidParameter);
    }
    let start = resolve_start(directory)?;
    let (parent, name) =
        walk::path_walk_parent(false, start.as_ref(), path, OpenFlags::empty())?;
    let create = CreateParameters {
        file_type: FileType::SymbolicLink,
        permissions: FilePermissions::from_bits_truncate(0o777),
    };
    let (point, created) =
        lookup::lookup_component(false, &parent, &name, OpenFlags::empty(), Some(&create))?;
    if !created {
        return Err(KernelError::FileExists);
    }
    let link = point
        .entry
        .file_object()
        .ok_or(KernelError::PathNotFound)?;
    page_cache::ops::uncached_write(&link, 0, target)?;
    link.set_size(target.len() as u64);
    link.notify_properties_update();
    Ok(())
}

/// 读符号链接目标
pub fn read_symbolic_link(directory: Option<i32>, path: &[u8]) -> KResult<Vec<u8>> {
    let start = resolve_start(directory)?;
    let (point, _) =
        walk::path_walk(false, start.as_ref(), path, OpenFlags::SYMBOLIC_LINK, None)?;
    let file = point
        .entry
        .file_object()
        .ok_or(KernelError::PathNotFound)?;
    walk::read_symbolic_link_target(&file)
}

// ========== 删除与重命名 ==========

/// 删除命名空间里的名字
///
/// `DIRECTORY` 要求目标是空目录；`SHARED_MEMORY` 在共享内存
/// 目录下解析。挂载目标不可删。
pub fn delete(directory: Option<i32>, path: &[u8], flags: OpenFlags) -> KResult<()> {
    let walk_flags = flags & OpenFlags::SHARED_MEMORY;
    let start = resolve_start(directory)?;
    let (parent, name) = walk::path_walk_parent(false, start.as_ref(), path, walk_flags)?;
    let credentials = kernel_ops().credentials();
    let parent_file = parent
        .entry
        .file_object()
        .ok_or(KernelError::PathNotFound)?;
    perm::check_access(false, &credentials, &parent_file, OpenFlags::WRITE)?;

    let (point, _) = lookup::lookup_component(
        false,
        &parent,
        &name,
        OpenFlags::NO_MOUNT_POINT,
        None,
    )?;
    let file = point
        .entry
        .file_object()
        .ok_or(KernelError::PathNotFound)?;
    perm::check_delete(false, &credentials, &parent_file, &file)?;

    if point.entry.mount_count() > 0 {
        return Err(KernelError::ResourceInUse);
    }
    let is_directory = file.file_type().is_directory();
    if flags.contains(OpenFlags::DIRECTORY) && !is_directory {
        return Err(KernelError::NotADirectory);
    }
    if is_directory && !flags.contains(OpenFlags::DIRECTORY) {
        return Err(KernelError::FileIsDirectory);
    }
    if is_directory && point.entry.child_count() > 0 {
        // 缓存视图里还有活着的子项
        let occupied = point
            .entry
            .children_snapshot()
            .iter()
            .any(|child| !child.is_negative());
        if occupied {
            return Err(KernelError::DirectoryNotEmpty);
        }
    }

    if parent_file.file_type() == FileType::ObjectDirectory {
        lookup::object_directory_remove(&parent_file, &name)?;
    } else {
        crate::ops::device_ops().unlink(
            parent_file.device_id,
            parent_file.file_id,
            &name,
            file.file_id,
        )?;
    }

    path_entry::unlink(&point.entry);
    point.entry.set_flags(PathEntryFlags::NO_CACHE);
    let mut destroyed = false;
    file.update_metadata(|metadata| {
        if metadata.hard_link_count > 0 {
            metadata.hard_link_count -= 1;
        }
        destroyed = metadata.hard_link_count == 0;
    });
    if destroyed {
        file.mark_deleted();
    }
    Ok(())
}

/// 重命名（同设备内）
pub fn rename(
    source_directory: Option<i32>,
    source_path: &[u8],
    target_directory: Option<i32>,
    target_path: &[u8],
) -> KResult<()> {
    let source_start = resolve_start(source_directory)?;
    let target_start = resolve_start(target_directory)?;
    let (source_parent, source_name) =
        walk::path_walk_parent(false, source_start.as_ref(), source_path, OpenFlags::empty())?;
    let (target_parent, target_name) =
        walk::path_walk_parent(false, target_start.as_ref(), target_path, OpenFlags::empty())?;
    let credentials = kernel_ops().credentials();
    let source_directory = source_parent
        .entry
        .file_object()
        .ok_or(KernelError::PathNotFound)?;
    let target_directory = target_parent
        .entry
        .file_object()
        .ok_or(KernelError::PathNotFound)?;
    if source_directory.device_id != target_directory.device_id {
        return Err(KernelError::CrossDevice);
    }
    perm::check_access(false, &credentials, &source_directory, OpenFlags::WRITE)?;
    perm::check_access(false, &credentials, &target_directory, OpenFlags::WRITE)?;

    let (source_point, _) = lookup::lookup_component(
        false,
        &source_parent,
        &source_name,
        OpenFlags::NO_MOUNT_POINT,
        None,
    )?;
    let file = source_point
        .entry
        .file_object()
        .ok_or(KernelError::PathNotFound)?;
    perm::check_delete(false, &credentials, &source_directory, &file)?;
    if source_point.entry.mount_count() > 0 {
        return Err(KernelError::ResourceInUse);
    }

    // 目标名已占用时先腾位
    let existing = lookup::lookup_component(
        false,
        &target_parent,
        &target_name,
        OpenFlags::NO_MOUNT_POINT,
        None,
    );
    if let Ok((target_point, _)) = existing {
        let target_file = target_point
            .entry
            .file_object()
            .ok_or(KernelError::PathNotFound)?;
        if Arc::ptr_eq(&target_file, &file) {
            return Ok(());
        }
        if target_point.entry.mount_count() > 0 {
            return Err(KernelError::ResourceInUse);
        }
        if target_file.file_type().is_directory() {
            let occupied = target_point
                .entry
                .children_snapshot()
                .iter()
                .any(|child| !child.is_negative());
            if occupied {
                return Err(KernelError::DirectoryNotEmpty);
            }
        }
        perm::check_delete(false, &credentials, &target_directory, &target_file)?;
        path_entry::unlink(&target_point.entry);
        target_point.entry.set_flags(PathEntryFlags::NO_CACHE);
        let mut removed = false;
        target_file.update_metadata(|metadata| {
            if metadata.hard_link_count > 0 {
                metadata.hard_link_count -= 1;
            }
            removed = metadata.hard_link_count == 0;
        });
        if removed {
            target_file.mark_deleted();
        }
    }

    if source_directory.file_type() == FileType::ObjectDirectory {
        let properties = file.properties();
        lookup::object_directory_remove(&source_directory, &source_name)?;
        lookup::object_directory_insert(&target_directory, &target_name, properties)?;
    } else {
        crate::ops::device_ops().rename(
            source_directory.device_id,
            source_directory.file_id,
            &source_name,
            target_directory.file_id,
            &target_name,
            file.file_id,
        )?;
    }

    path_entry::unlink(&source_point.entry);
    source_point.entry.set_flags(PathEntryFlags::NO_CACHE);
    let hash = crate::util::name_hash(&target_name);
    let moved = {
        let _guard = target_directory.lock.write();
        match target_parent.entry.find_child(&target_name, hash) {
            // 目标名探测留下的否定项原地转正，避免遮蔽新项
            Some(stale) if stale.is_negative() => {
                stale.convert_negative(file);
                None
            }
            _ => {
                let fresh = crate::path_entry::PathEntry::new(&target_name, Some(file));
                target_parent.entry.add_child(&fresh);
                Some(fresh)
            }
        }
    };
    // 释放推迟到锁外，缓存溢出回收可能需要父目录锁
    if let Some(entry) = moved {
        entry.release();
    }
    Ok(())
}

// ========== 挂载 ==========

/// 挂载或卸载
///
/// `UNMOUNT` 走卸载路径；`BIND` 要求目标是目录，非绑定挂载要求
/// 目标是块设备并以其文件系统根作为目标子树。
pub fn mount(mount_path: &[u8], target_path: &[u8], flags: MountFlags) -> KResult<()> {
    if flags.contains(MountFlags::UNMOUNT) {
        return unmount(mount_path, flags);
    }
    let (mount_point, _) =
        walk::path_walk(false, None, mount_path, OpenFlags::DIRECTORY, None)?;
    let target = if flags.contains(MountFlags::BIND) {
        let (target, _) =
            walk::path_walk(false, None, target_path, OpenFlags::DIRECTORY, None)?;
        target
    } else {
        let (device_point, _) = walk::path_walk(false, None, target_path, OpenFlags::empty(), None)?;
        let device_file = device_point
            .entry
            .file_object()
            .ok_or(KernelError::PathNotFound)?;
        if device_file.file_type() != FileType::BlockDevice {
            return Err(KernelError::NotMountable);
        }
        // 块设备的文件编号即其承载的文件系统设备号
        let device_id = device_file.file_id;
        let properties = crate::ops::device_ops().device_lookup(device_id, 0, b"/")?;
        let (root_file, creator) =
            FileObject::lookup_or_create(properties.device_id, properties.file_id);
        if creator {
            root_file.complete_initialization(&properties);
        } else {
            root_file.wait_ready()?;
        }
        let root_entry = crate::path_entry::PathEntry::new_anonymous(root_file.clone());
        let _ = root_file.release(false);
        PathPoint::adopt(root_entry, mount_point.mount.clone())
    };
    mount::mount(false, &mount_point, &target, flags)
}

/// 卸载
pub fn unmount(path: &[u8], flags: MountFlags) -> KResult<()> {
    let (point, _) = walk::path_walk(false, None, path, OpenFlags::DIRECTORY, None)?;
    mount::unmount(&point, flags)
}

// ========== 访问探测 ==========

/// 计算对路径的实际可用访问
pub fn get_effective_access(
    directory: Option<i32>,
    path: &[u8],
    desired: OpenFlags,
) -> KResult<OpenFlags> {
    let start = resolve_start(directory)?;
    let (point, _) = walk::path_walk(false, start.as_ref(), path, OpenFlags::empty(), None)?;
    let file = point
        .entry
        .file_object()
        .ok_or(KernelError::PathNotFound)?;
    let credentials = kernel_ops().credentials();
    Ok(perm::effective_access(false, &credentials, &file) & desired)
}

// ========== 进程收尾 ==========

/// exec 时关闭带标志的描述符
pub fn close_on_execute() {
    let closed = current_table().close_on_execute_sweep();
    for handle in closed {
        close_handle(handle);
    }
}

/// 进程终止时清空句柄表
pub fn terminate_process_handles() {
    let closed = current_table().terminate_sweep();
    for handle in closed {
        close_handle(handle);
    }
}
