//! 单组件名字解析
//!
//! 在父目录下解析一个路径组件：先以共享文件对象锁在子项列表中按
//! 散列查找，未命中再升级到排他锁重查并咨询后备存储（目录型设备
//! 走 [`DeviceOps`](crate::ops::DeviceOps)，对象目录走内存子项表）。
//! 证实不存在的名字以否定项形式留在树上；创建命中同名否定项时
//! 原地转正。

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use uapi::cred::Credentials;
use uapi::fcntl::OpenFlags;
use uapi::fs::{FileId, FilePermissions, FileProperties, FileType};

use crate::error::{KResult, KernelError};
use crate::file_object::{FileObject, SpecialIo};
use crate::mount::{self, PathPoint};
use crate::ops::{device_ops, kernel_ops};
use crate::path_entry::PathEntry;
use crate::perm;
use crate::util::name_hash;

/// 创建参数（`CREATE` 打开的最终组件携带）
#[derive(Debug, Clone, Copy)]
pub struct CreateParameters {
    /// 要创建的文件类型
    pub file_type: FileType,
    /// 权限位
    pub permissions: FilePermissions,
}

static NEXT_OBJECT_FILE_ID: AtomicU64 = AtomicU64::new(1);

/// 为内存对象分配设备内唯一文件编号
pub fn allocate_object_file_id() -> FileId {
    NEXT_OBJECT_FILE_ID.fetch_add(1, Ordering::AcqRel)
}

/// 按创建参数组装新文件的属性
///
/// 属主取调用者有效用户；父目录带 set-gid 位时组随父目录，否则
/// 取调用者有效组。
fn build_create_properties(
    credentials: &Credentials,
    parent: &FileObject,
    file_id: FileId,
    create: &CreateParameters,
) -> FileProperties {
    let parent_metadata = parent.metadata();
    let group_id = if parent_metadata
        .permissions
        .contains(FilePermissions::SET_GROUP_ID)
    {
        parent_metadata.group_id
    } else {
        credentials.effective_group_id
    };
    let now = kernel_ops().timespec_now();
    FileProperties {
        device_id: parent.device_id,
        file_id,
        file_type: create.file_type,
        user_id: credentials.effective_user_id,
        group_id,
        permissions: create.permissions,
        hard_link_count: 1,
        size: 0,
        access_time: now,
        modified_time: now,
        status_change_time: now,
    }
}

/// 向对象目录的内存子项表问询；返回属性与"是否新建"
fn object_directory_consult(
    from_kernel: bool,
    credentials: &Credentials,
    directory: &FileObject,
    name: &[u8],
    create: Option<&CreateParameters>,
) -> KResult<(FileProperties, bool)> {
    let special = directory.special().ok_or(KernelError::NotSupported)?;
    let table = match special.as_ref() {
        SpecialIo::ObjectDirectory(table) => table,
        _ => return Err(KernelError::NotSupported),
    };
    let mut table = table.lock();
    if let Some(properties) = table.get(name) {
        return Ok((*properties, false));
    }
    match create {
        Some(parameters) => {
            perm::check_access(from_kernel, credentials, directory, OpenFlags::WRITE)?;
            // 对象设备没有下游文件系统，目录一律落成对象目录
            let mut parameters = *parameters;
            if parameters.file_type == FileType::RegularDirectory {
                parameters.file_type = FileType::ObjectDirectory;
            }
            let properties = build_create_properties(
                credentials,
                directory,
                allocate_object_file_id(),
                &parameters,
            );
            table.insert(name.to_vec(), properties);
            Ok((properties, true))
        }
        None => Err(KernelError::PathNotFound),
    }
}

/// 从对象目录的子项表中除名（删除/重命名路径）
pub(crate) fn object_directory_remove(directory: &FileObject, name: &[u8]) -> KResult<()> {
    let special = directory.special().ok_or(KernelError::NotSupported)?;
    match special.as_ref() {
        SpecialIo::ObjectDirectory(table) => {
            table.lock().remove(name).ok_or(KernelError::PathNotFound)?;
            Ok(())
        }
        _ => Err(KernelError::NotSupported),
    }
}

/// 把属性登记进对象目录的子项表（重命名落地）
pub(crate) fn object_directory_insert(
    directory: &FileObject,
    name: &[u8],
    properties: FileProperties,
) -> KResult<()> {
    let special = directory.special().ok_or(KernelError::NotSupported)?;
    match special.as_ref() {
        SpecialIo::ObjectDirectory(table) => {
            table.lock().insert(name.to_vec(), properties);
            Ok(())
        }
        _ => Err(KernelError::NotSupported),
    }
}

/// 向目录型设备问询
fn device_consult(
    from_kernel: bool,
    credentials: &Credentials,
    directory: &FileObject,
    name: &[u8],
    create: Option<&CreateParameters>,
) -> KResult<(FileProperties, bool)> {
    match device_ops().device_lookup(directory.device_id, directory.file_id, name) {
        Ok(properties) => Ok((properties, false)),
        Err(KernelError::PathNotFound) => match create {
            Some(parameters) => {
                perm::check_access(from_kernel, credentials, directory, OpenFlags::WRITE)?;
                let template = build_create_properties(credentials, directory, 0, parameters);
                let properties = device_ops().device_create(
                    directory.device_id,
                    directory.file_id,
                    name,
                    &template,
                )?;
                Ok((properties, true))
            }
            None => Err(KernelError::PathNotFound),
        },
        Err(error) => Err(error),
    }
}

/// 命中挂载目标时走进覆盖挂载
fn finish(point: PathPoint, follow_mounts: bool) -> PathPoint {
    if follow_mounts && point.entry.mount_count() > 0 {
        mount::enter_mount(point)
    } else {
        point
    }
}

/// 由属性建立或复用文件对象，并保证其已初始化
fn materialize_file(properties: &FileProperties) -> KResult<Arc<FileObject>> {
    let (file, creator) = FileObject::lookup_or_create(properties.device_id, properties.file_id);
    if creator {
        file.complete_initialization(properties);
    } else if let Err(error) = file.wait_ready() {
        let _ = file.release(false);
        return Err(error);
    }
    Ok(file)
}

/// 在 `parent` 下解析组件 `name`
///
/// 返回解析出的路径点和"本次调用是否创建了文件"。`.` 与 `..`
/// 在这里吸收；`..` 使用进程根护栏，永不越过它。
pub fn lookup_component(
    from_kernel: bool,
    parent: &PathPoint,
    name: &[u8],
    flags: OpenFlags,
    create: Option<&CreateParameters>,
) -> KResult<(PathPoint, bool)> {
    if name.is_empty() || name == b"." {
        return Ok((parent.clone(), false));
    }
    if name == b".." {
        let root = if from_kernel {
            None
        } else {
            kernel_ops().current_root()
        };
        return Ok((mount::get_parent(root.as_ref(), parent), false));
    }

    let directory = parent
        .entry
        .file_object()
        .ok_or(KernelError::PathNotFound)?;
    if !directory.file_type().is_directory() {
        return Err(KernelError::NotADirectory);
    }
    let credentials = kernel_ops().credentials();
    let hash = name_hash(name);
    let follow_mounts = !flags.contains(OpenFlags::NO_MOUNT_POINT);

    // 共享锁命中路径
    {
        let _guard = directory.lock.read();
        if let Some(child) = parent.entry.find_child(name, hash) {
            if !child.is_negative() {
                child.acquire();
                let point = PathPoint::adopt(child, parent.mount.clone());
                drop(_guard);
                return Ok((finish(point, follow_mounts), false));
            }
            if create.is_none() {
                return Err(KernelError::PathNotFound);
            }
        }
    }

    // 未命中或要转正否定项：排他锁下重查再问后备存储
    let _guard = directory.lock.write();
    let existing = parent.entry.find_child(name, hash);
    if let Some(child) = &existing {
        if !child.is_negative() {
            child.acquire();
            let point = PathPoint::adopt(child.clone(), parent.mount.clone());
            drop(_guard);
            return Ok((finish(point, follow_mounts), false));
        }
        if create.is_none() {
            return Err(KernelError::PathNotFound);
        }
    }

    let object_directory = directory.file_type() == FileType::ObjectDirectory;
    let consulted = if object_directory {
        object_directory_consult(from_kernel, &credentials, &directory, name, create)
    } else {
        device_consult(from_kernel, &credentials, &directory, name, create)
    };
    let (properties, created) = match consulted {
        Ok(found) => found,
        Err(KernelError::PathNotFound) => {
            // 留下否定项作为不存在的证据；释放推迟到锁外，
            // 缓存溢出回收可能需要父目录锁
            if existing.is_none() {
                let negative = PathEntry::new(name, None);
                parent.entry.add_child(&negative);
                drop(_guard);
                negative.release();
            }
            return Err(KernelError::PathNotFound);
        }
        Err(error) => return Err(error),
    };

    let file = materialize_file(&properties)?;
    let entry = match existing {
        Some(child) => {
            child.acquire();
            child.convert_negative(file.clone());
            child
        }
        None => {
            let fresh = PathEntry::new(name, Some(file.clone()));
            parent.entry.add_child(&fresh);
            fresh
        }
    };
    let _ = file.release(false);
    let point = PathPoint::adopt(entry, parent.mount.clone());
    drop(_guard);
    Ok((finish(point, follow_mounts), created))
}
