//! I/O 分发
//!
//! 按文件类型把句柄上的读写请求分派到流式路径（管道、终端）、
//! 页缓存路径（普通文件、块设备、共享内存）或直通设备路径
//! （字符设备）。读写默认用句柄偏移并在成功后推进；显式偏移
//! 不动句柄。部分完成优先于错误：已有字节转移时返回字节数。

use alloc::sync::Arc;

use sync::WAIT_FOREVER;
use uapi::fcntl::OpenFlags;
use uapi::fs::FileType;
use uapi::signal::SIGNAL_PIPE;

use crate::error::{KResult, KernelError};
use crate::file_object::SpecialIo;
use crate::handle::IoHandle;
use crate::ops::kernel_ops;
use crate::page_cache;

fn update_access_time(handle: &IoHandle) {
    if handle.status().contains(OpenFlags::NO_ACCESS_TIME) {
        return;
    }
    let now = kernel_ops().timespec_now();
    handle.file().update_metadata(|metadata| {
        metadata.access_time = now;
    });
}

fn update_modified_time(handle: &IoHandle) {
    let now = kernel_ops().timespec_now();
    handle.file().update_metadata(|metadata| {
        metadata.modified_time = now;
    });
}

/// 读
///
/// `offset` 为 None 时使用并推进句柄偏移。
pub fn perform_read(
    handle: &Arc<IoHandle>,
    buffer: &mut [u8],
    offset: Option<u64>,
) -> KResult<usize> {
    if !handle.access().contains(OpenFlags::READ) {
        return Err(KernelError::AccessDenied);
    }
    let file = handle.file();
    let non_blocking = handle.is_non_blocking();
    let transferred = match file.file_type() {
        FileType::Pipe => {
            let stream = file.pipe_stream().ok_or(KernelError::NotSupported)?;
            stream.read(buffer, non_blocking, WAIT_FOREVER)?
        }
        FileType::TerminalMaster | FileType::TerminalSlave => {
            match file.special().as_deref() {
                Some(SpecialIo::Terminal { terminal, master }) => {
                    terminal.read(*master, buffer, non_blocking, WAIT_FOREVER)?
                }
                _ => return Err(KernelError::NotSupported),
            }
        }
        FileType::CharacterDevice => {
            page_cache::ops::uncached_read(file, offset.unwrap_or(0), buffer)?
        }
        FileType::Socket => return Err(KernelError::NotSupported),
        FileType::RegularDirectory | FileType::ObjectDirectory => {
            return Err(KernelError::FileIsDirectory)
        }
        _ => {
            let position = offset.unwrap_or_else(|| handle.offset());
            let read = page_cache::read_cached(file, position, buffer)?;
            if offset.is_none() {
                handle.set_offset(position + read as u64);
            }
            read
        }
    };
    update_access_time(handle);
    Ok(transferred)
}

/// 写
///
/// 管道写在读端尽失时合成 `SIGNAL_PIPE` 再报 `BrokenPipe`；
/// `APPEND` 句柄每次写前移到文件尾。
pub fn perform_write(
    handle: &Arc<IoHandle>,
    buffer: &[u8],
    offset: Option<u64>,
) -> KResult<usize> {
    if !handle.access().contains(OpenFlags::WRITE) {
        return Err(KernelError::AccessDenied);
    }
    let file = handle.file();
    let non_blocking = handle.is_non_blocking();
    let transferred = match file.file_type() {
        FileType::Pipe => {
            let stream = file.pipe_stream().ok_or(KernelError::NotSupported)?;
            match stream.write(buffer, non_blocking, WAIT_FOREVER) {
                Ok(written) => written,
                Err(KernelError::BrokenPipe) => {
                    kernel_ops().send_signal(kernel_ops().current_task(), SIGNAL_PIPE);
                    return Err(KernelError::BrokenPipe);
                }
                Err(error) => return Err(error),
            }
        }
        FileType::TerminalMaster | FileType::TerminalSlave => {
            match file.special().as_deref() {
                Some(SpecialIo::Terminal { terminal, master }) => {
                    terminal.write(*master, buffer, non_blocking, WAIT_FOREVER)?
                }
                _ => return Err(KernelError::NotSupported),
            }
        }
        FileType::CharacterDevice => {
            page_cache::ops::uncached_write(file, offset.unwrap_or(0), buffer)?
        }
        FileType::Socket => return Err(KernelError::NotSupported),
        FileType::RegularDirectory | FileType::ObjectDirectory => {
            return Err(KernelError::FileIsDirectory)
        }
        _ => {
            let position = match offset {
                Some(position) => position,
                None if handle.status().contains(OpenFlags::APPEND) => file.size(),
                None => handle.offset(),
            };
            let written = page_cache::write_cached(file, position, buffer)?;
            if offset.is_none() {
                handle.set_offset(position + written as u64);
            }
            written
        }
    };
    update_modified_time(handle);
    Ok(transferred)
}

/// 向量读：顺次填充各缓冲，短读即停
///
/// 已有字节转移后发生的错误折算成部分成功。
pub fn perform_vectored_read(
    handle: &Arc<IoHandle>,
    buffers: &mut [&mut [u8]],
) -> KResult<usize> {
    let mut total = 0usize;
    for buffer in buffers.iter_mut() {
        match perform_read(handle, buffer, None) {
            Ok(read) => {
                total += read;
                if read < buffer.len() {
                    break;
                }
            }
            Err(error) => {
                if total > 0 {
                    break;
                }
                return Err(error);
            }
        }
    }
    Ok(total)
}

/// 向量写：顺次写出各缓冲，短写即停
pub fn perform_vectored_write(handle: &Arc<IoHandle>, buffers: &[&[u8]]) -> KResult<usize> {
    let mut total = 0usize;
    for buffer in buffers.iter() {
        match perform_write(handle, buffer, None) {
            Ok(written) => {
                total += written;
                if written < buffer.len() {
                    break;
                }
            }
            Err(error) => {
                if total > 0 {
                    break;
                }
                return Err(error);
            }
        }
    }
    Ok(total)
}
