//! 权限判定
//!
//! 读/写/执行三位按属主、属组、其他三组选择；精确匹配失败后再看
//! 能力位。内核态调用方只受"非目录执行必须带执行位"的约束。

use uapi::cred::{Capabilities, Credentials};
use uapi::fcntl::OpenFlags;
use uapi::fs::FilePermissions;

use crate::error::{KResult, KernelError};
use crate::file_object::FileObject;

/// 根据身份选出适用的一组权限位，归一化到 other 三位
fn class_bits(credentials: &Credentials, user_id: u32, group_id: u32, bits: FilePermissions) -> u32 {
    let raw = bits.bits();
    if credentials.effective_user_id == user_id {
        (raw >> 6) & 0o7
    } else if credentials.effective_group_id == group_id || credentials.real_group_id == group_id {
        (raw >> 3) & 0o7
    } else {
        raw & 0o7
    }
}

/// 把访问模式折算成 other 组的三位
fn wanted_bits(access: OpenFlags) -> u32 {
    let mut wanted = 0;
    if access.contains(OpenFlags::READ) {
        wanted |= 0o4;
    }
    if access.contains(OpenFlags::WRITE) {
        wanted |= 0o2;
    }
    if access.contains(OpenFlags::EXECUTE) {
        wanted |= 0o1;
    }
    wanted
}

/// 检查调用者能否以 `access` 访问 `file`
///
/// 非目录上的执行要求文件至少带一个执行位，内核态也不豁免；
/// 之后内核态直接放行。用户态精确匹配失败后，`FILE_ACCESS`
/// 放行一切，`READ_SEARCH` 放行读以及目录上的执行。
pub fn check_access(
    from_kernel: bool,
    credentials: &Credentials,
    file: &FileObject,
    access: OpenFlags,
) -> KResult<()> {
    let metadata = file.metadata();
    let file_type = file.file_type();

    if access.contains(OpenFlags::EXECUTE)
        && !file_type.is_directory()
        && !metadata.permissions.any_execute()
    {
        return Err(KernelError::AccessDenied);
    }
    if from_kernel {
        return Ok(());
    }

    let wanted = wanted_bits(access);
    let granted = class_bits(
        credentials,
        metadata.user_id,
        metadata.group_id,
        metadata.permissions,
    );
    if wanted & !granted == 0 {
        return Ok(());
    }

    if credentials.capabilities.contains(Capabilities::FILE_ACCESS) {
        return Ok(());
    }
    if credentials.capabilities.contains(Capabilities::READ_SEARCH) {
        let mut covered = 0o4;
        if file_type.is_directory() {
            covered |= 0o1;
        }
        if wanted & !covered == 0 {
            return Ok(());
        }
    }
    Err(KernelError::AccessDenied)
}

/// 目录搜索检查（路径中间组件的执行权）
pub fn check_search(
    from_kernel: bool,
    credentials: &Credentials,
    directory: &FileObject,
) -> KResult<()> {
    check_access(from_kernel, credentials, directory, OpenFlags::EXECUTE)
}

/// 受限删除目录（sticky）中的删除/重命名检查
///
/// 目录带 `RESTRICTED` 位时，调用者必须拥有被删项或持有
/// `FILE_ACCESS` 能力。
pub fn check_delete(
    from_kernel: bool,
    credentials: &Credentials,
    directory: &FileObject,
    victim: &FileObject,
) -> KResult<()> {
    if from_kernel {
        return Ok(());
    }
    let directory_metadata = directory.metadata();
    if !directory_metadata
        .permissions
        .contains(FilePermissions::RESTRICTED)
    {
        return Ok(());
    }
    if credentials.effective_user_id == victim.metadata().user_id {
        return Ok(());
    }
    if credentials.capabilities.contains(Capabilities::FILE_ACCESS) {
        return Ok(());
    }
    Err(KernelError::AccessDenied)
}

/// 计算调用者在 `file` 上实际可用的访问模式
pub fn effective_access(
    from_kernel: bool,
    credentials: &Credentials,
    file: &FileObject,
) -> OpenFlags {
    let mut granted = OpenFlags::empty();
    for access in [OpenFlags::READ, OpenFlags::WRITE, OpenFlags::EXECUTE] {
        if check_access(from_kernel, credentials, file, access).is_ok() {
            granted |= access;
        }
    }
    granted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_selection() {
        let credentials = Credentials {
            real_user_id: 100,
            effective_user_id: 100,
            real_group_id: 50,
            effective_group_id: 50,
            capabilities: Capabilities::empty(),
        };
        let bits = FilePermissions::from_bits_truncate(0o750);
        assert_eq!(class_bits(&credentials, 100, 50, bits), 0o7);
        assert_eq!(class_bits(&credentials, 7, 50, bits), 0o5);
        assert_eq!(class_bits(&credentials, 7, 8, bits), 0o0);
    }

    #[test]
    fn test_wanted_bits() {
        assert_eq!(wanted_bits(OpenFlags::READ | OpenFlags::WRITE), 0o6);
        assert_eq!(wanted_bits(OpenFlags::EXECUTE), 0o1);
        assert_eq!(wanted_bits(OpenFlags::empty()), 0);
    }
}
