//! 终端
//!
//! 一个终端是两条方向相反的流：输入流由主端写入、从端读出，
//! 输出流由从端写入、主端读出。主从两个文件对象共享同一份
//! [`Terminal`]，各自按访问模式在对应的流上登记读写端。

use alloc::sync::Arc;

use uapi::fcntl::OpenFlags;
use uapi::fs::{FilePermissions, FileProperties, FileType};
use uapi::poll::PollEvents;

use crate::config::DEFAULT_STREAM_CAPACITY;
use crate::error::{KResult, KernelError};
use crate::file_object::{FileObject, SpecialIo, OBJECT_DEVICE};
use crate::handle::IoHandle;
use crate::lookup::allocate_object_file_id;
use crate::ops::kernel_ops;
use crate::stream::StreamBuffer;

/// 终端的双向流对
pub struct Terminal {
    /// 主端写、从端读
    input: Arc<StreamBuffer>,
    /// 从端写、主端读
    output: Arc<StreamBuffer>,
}

impl Terminal {
    /// 创建空终端
    pub fn new() -> Arc<Terminal> {
        Arc::new(Terminal {
            input: Arc::new(StreamBuffer::new(DEFAULT_STREAM_CAPACITY)),
            output: Arc::new(StreamBuffer::new(DEFAULT_STREAM_CAPACITY)),
        })
    }

    /// 某端读取数据时所走的流
    fn read_stream(&self, master: bool) -> &Arc<StreamBuffer> {
        if master {
            &self.output
        } else {
            &self.input
        }
    }

    /// 某端写入数据时所走的流
    fn write_stream(&self, master: bool) -> &Arc<StreamBuffer> {
        if master {
            &self.input
        } else {
            &self.output
        }
    }

    /// 按端别与访问模式登记流的读写方
    pub fn register(&self, master: bool, access: OpenFlags) {
        if access.contains(OpenFlags::READ) {
            self.read_stream(master).add_reader();
        }
        if access.contains(OpenFlags::WRITE) {
            self.write_stream(master).add_writer();
        }
    }

    /// 注销登记
    pub fn unregister(&self, master: bool, access: OpenFlags) {
        if access.contains(OpenFlags::READ) {
            self.read_stream(master).remove_reader();
        }
        if access.contains(OpenFlags::WRITE) {
            self.write_stream(master).remove_writer();
        }
    }

    /// 从某端读
    pub fn read(
        &self,
        master: bool,
        buffer: &mut [u8],
        non_blocking: bool,
        timeout_ms: u64,
    ) -> KResult<usize> {
        self.read_stream(master).read(buffer, non_blocking, timeout_ms)
    }

    /// 向某端写
    pub fn write(
        &self,
        master: bool,
        buffer: &[u8],
        non_blocking: bool,
        timeout_ms: u64,
    ) -> KResult<usize> {
        self.write_stream(master).write(buffer, non_blocking, timeout_ms)
    }

    /// 某端的就绪事件：读方向取读流，写方向取写流
    pub fn poll(&self, master: bool) -> PollEvents {
        let readable = self.read_stream(master).io_state().poll()
            & (PollEvents::IN | PollEvents::ERROR | PollEvents::DISCONNECTED);
        let writable = self.write_stream(master).io_state().poll()
            & (PollEvents::OUT | PollEvents::ERROR | PollEvents::DISCONNECTED);
        readable | writable
    }
}

/// 组装终端端点的文件属性
fn terminal_properties(file_type: FileType) -> FileProperties {
    let credentials = kernel_ops().credentials();
    let now = kernel_ops().timespec_now();
    FileProperties {
        device_id: OBJECT_DEVICE,
        file_id: allocate_object_file_id(),
        file_type,
        user_id: credentials.effective_user_id,
        group_id: credentials.effective_group_id,
        permissions: FilePermissions::USER_READ | FilePermissions::USER_WRITE,
        // 匿名对象：最后一个句柄释放即销毁
        hard_link_count: 0,
        size: 0,
        access_time: now,
        modified_time: now,
        status_change_time: now,
    }
}

/// 建一个终端端点的文件对象并装上共享终端状态
fn terminal_endpoint(
    terminal: &Arc<Terminal>,
    master: bool,
    flags: OpenFlags,
) -> KResult<Arc<IoHandle>> {
    let file_type = if master {
        FileType::TerminalMaster
    } else {
        FileType::TerminalSlave
    };
    let properties = terminal_properties(file_type);
    let (file, creator) = FileObject::lookup_or_create(properties.device_id, properties.file_id);
    if !creator {
        // 对象编号由分配器保证唯一
        let _ = file.release(false);
        return Err(KernelError::FileExists);
    }
    file.complete_initialization(&properties);
    file.set_special(Arc::new(SpecialIo::Terminal {
        terminal: terminal.clone(),
        master,
    }));
    let handle = IoHandle::new(file.clone(), None, flags);
    let _ = file.release(false);
    Ok(handle)
}

/// 创建一对终端主从句柄
pub fn create_terminal(
    master_flags: OpenFlags,
    slave_flags: OpenFlags,
) -> KResult<(Arc<IoHandle>, Arc<IoHandle>)> {
    let terminal = Terminal::new();
    let master = terminal_endpoint(
        &terminal,
        true,
        master_flags | OpenFlags::READ | OpenFlags::WRITE,
    )?;
    let slave = terminal_endpoint(
        &terminal,
        false,
        slave_flags | OpenFlags::READ | OpenFlags::WRITE,
    )?;
    Ok((master, slave))
}
