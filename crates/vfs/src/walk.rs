//! 路径遍历
//!
//! 以 `/` 判定绝对路径（从进程根出发）或相对路径（从给定起点或
//! 当前目录出发），逐组件调用单组件解析。中间组件要求目录搜索权
//! 并强制目录语义；符号链接通过把目标与剩余后缀拼接后递归遍历来
//! 跟随，递归深度有界。

use alloc::vec::Vec;

use uapi::fcntl::OpenFlags;
use uapi::fs::FileType;

use crate::config::MAX_SYMBOLIC_LINK_RECURSION;
use crate::error::{KResult, KernelError};
use crate::file_object::{FileObject, SpecialIo, OBJECT_DEVICE};
use crate::lookup::{self, CreateParameters};
use crate::mount::{self, PathPoint};
use crate::ops::{device_ops, kernel_ops};
use crate::perm;

/// 选择遍历起点
fn starting_point(
    from_kernel: bool,
    start: Option<&PathPoint>,
    flags: OpenFlags,
    absolute: bool,
) -> PathPoint {
    // 共享内存打开一律在共享内存目录下解析
    if flags.contains(OpenFlags::SHARED_MEMORY) {
        return crate::shm::directory_point();
    }
    if absolute {
        if !from_kernel {
            if let Some(root) = kernel_ops().current_root() {
                return root;
            }
        }
        return mount::root_point();
    }
    if let Some(start) = start {
        return start.clone();
    }
    if !from_kernel {
        if let Some(cwd) = kernel_ops().current_directory() {
            return cwd;
        }
    }
    mount::root_point()
}

/// 跳过前导分隔符后切出下一个组件；路径耗尽返回 None
fn next_component(path: &[u8]) -> Option<(&[u8], &[u8])> {
    let mut index = 0;
    while index < path.len() && path[index] == b'/' {
        index += 1;
    }
    if index == path.len() {
        return None;
    }
    let start = index;
    while index < path.len() && path[index] != b'/' {
        index += 1;
    }
    Some((&path[start..index], &path[index..]))
}

/// 读出符号链接的目标字节
pub fn read_symbolic_link_target(file: &FileObject) -> KResult<Vec<u8>> {
    if file.file_type() != FileType::SymbolicLink {
        return Err(KernelError::InvalidParameter);
    }
    if file.device_id == OBJECT_DEVICE {
        match file.special().as_deref() {
            Some(SpecialIo::Memory(content)) => Ok(content.lock().clone()),
            _ => Err(KernelError::NotSupported),
        }
    } else {
        let mut buffer = alloc::vec![0u8; file.size() as usize];
        let read = device_ops().read_range(file.device_id, file.file_id, 0, &mut buffer)?;
        buffer.truncate(read);
        Ok(buffer)
    }
}

/// 路径遍历入口
///
/// 返回解析出的路径点和"最终组件是否由本次调用创建"。
pub fn path_walk(
    from_kernel: bool,
    start: Option<&PathPoint>,
    path: &[u8],
    flags: OpenFlags,
    create: Option<&CreateParameters>,
) -> KResult<(PathPoint, bool)> {
    let mut depth = 0usize;
    walk_inner(from_kernel, start, path, flags, create, &mut depth)
}

fn walk_inner(
    from_kernel: bool,
    start: Option<&PathPoint>,
    path: &[u8],
    flags: OpenFlags,
    create: Option<&CreateParameters>,
    depth: &mut usize,
) -> KResult<(PathPoint, bool)> {
    if path.is_empty() {
        return Err(KernelError::PathNotFound);
    }
    let absolute = path[0] == b'/';
    let mut current = starting_point(from_kernel, start, flags, absolute);
    let credentials = kernel_ops().credentials();

    // 纯分隔符路径（"/"、"///"）直接落在起点上
    if next_component(path).is_none() {
        let file = current
            .entry
            .file_object()
            .ok_or(KernelError::PathNotFound)?;
        if !file.file_type().is_directory() {
            return Err(KernelError::NotADirectory);
        }
        return Ok((current, false));
    }

    let mut remaining: &[u8] = path;
    loop {
        let (component, rest) = match next_component(remaining) {
            Some(split) => split,
            None => unreachable!(),
        };
        let is_final = next_component(rest).is_none();
        // 尾随分隔符要求最终组件是目录
        let trailing_directory = is_final && !rest.is_empty();

        let directory = current
            .entry
            .file_object()
            .ok_or(KernelError::PathNotFound)?;
        if !directory.file_type().is_directory() {
            return Err(KernelError::NotADirectory);
        }
        perm::check_search(from_kernel, &credentials, &directory)?;

        let (component_flags, component_create) = if is_final {
            let mut final_flags = flags;
            if trailing_directory {
                final_flags |= OpenFlags::DIRECTORY;
            }
            (final_flags, create)
        } else {
            (OpenFlags::DIRECTORY, None)
        };

        let (next, fresh) = lookup::lookup_component(
            from_kernel,
            &current,
            component,
            component_flags,
            component_create,
        )?;

        let file = next.entry.file_object();
        let is_link = matches!(
            file.as_ref().map(|f| f.file_type()),
            Some(FileType::SymbolicLink)
        );
        let follow = is_link
            && (!is_final || trailing_directory || !flags.contains(OpenFlags::SYMBOLIC_LINK));
        if follow {
            if is_final && flags.contains(OpenFlags::NO_SYMBOLIC_LINK) && !trailing_directory {
                return Err(KernelError::SymbolicLinkLoop);
            }
            *depth += 1;
            if *depth > MAX_SYMBOLIC_LINK_RECURSION {
                return Err(KernelError::SymbolicLinkLoop);
            }
            let link = file.ok_or(KernelError::PathNotFound)?;
            let target = read_symbolic_link_target(&link)?;
            if target.is_empty() {
                return Err(KernelError::PathNotFound);
            }
            // 目标拼上剩余后缀，从链接所在目录重新遍历
            let mut joined = target;
            joined.extend_from_slice(rest);
            let inner_flags = flags & !OpenFlags::SHARED_MEMORY;
            return walk_inner(from_kernel, Some(&current), &joined, inner_flags, create, depth);
        }

        if is_final {
            let file = file.ok_or(KernelError::PathNotFound)?;
            if component_flags.contains(OpenFlags::DIRECTORY) && !file.file_type().is_directory() {
                return Err(KernelError::NotADirectory);
            }
            if create.is_some() && !fresh && flags.contains(OpenFlags::FAIL_IF_EXISTS) {
                return Err(KernelError::FileExists);
            }
            return Ok((next, fresh));
        }
        current = next;
        remaining = rest;
    }
}

/// 解析到最终组件的父目录，返回父路径点与最终组件名
///
/// 删除、重命名和符号链接创建用它对名字本身而非其指向操作。
/// 最终组件是 `.` 或 `..` 时拒绝。
pub fn path_walk_parent(
    from_kernel: bool,
    start: Option<&PathPoint>,
    path: &[u8],
    flags: OpenFlags,
) -> KResult<(PathPoint, Vec<u8>)> {
    let mut end = path.len();
    while end > 0 && path[end - 1] == b'/' {
        end -= 1;
    }
    if end == 0 {
        return Err(KernelError::InvalidParameter);
    }
    let trimmed = &path[..end];
    let (directory_part, base): (&[u8], &[u8]) = match trimmed.iter().rposition(|&b| b == b'/') {
        Some(index) => (&trimmed[..=index], &trimmed[index + 1..]),
        None => (b".", trimmed),
    };
    if base == b"." || base == b".." {
        return Err(KernelError::InvalidParameter);
    }
    let (parent, _) = path_walk(
        from_kernel,
        start,
        directory_part,
        flags | OpenFlags::DIRECTORY,
        None,
    )?;
    Ok((parent, base.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::next_component;

    #[test]
    fn test_next_component() {
        assert_eq!(next_component(b"a/b"), Some((&b"a"[..], &b"/b"[..])));
        assert_eq!(next_component(b"//a//b"), Some((&b"a"[..], &b"//b"[..])));
        assert_eq!(next_component(b"a"), Some((&b"a"[..], &b""[..])));
        assert_eq!(next_component(b"///"), None);
        assert_eq!(next_component(b""), None);
    }
}
