//! FontaOS 虚拟文件系统核心
//!
//! 路径命名空间、文件对象与页缓存的共同底座。设备驱动、调度器
//! 与内存管理经 [`ops`] 中的三张操作表接入；系统调用层经
//! [`syscall`] 暴露。
//!
//! 主要组成：
//!
//! - [`path_entry`] / [`entry_cache`] — 路径项树与负项缓存
//! - [`mount`] — 挂载树与路径点
//! - [`file_object`] — 按（设备，文件）编号索引的活动文件对象
//! - [`page_cache`] — 写回页缓存与后台清理
//! - [`stream`] / [`file_lock`] — 流缓冲与区域锁
//! - [`handle`] / [`handle_table`] — I/O 句柄与每进程句柄表

#![no_std]

extern crate alloc;

pub mod config;
pub mod entry_cache;
pub mod error;
pub mod file_lock;
pub mod file_object;
pub mod handle;
pub mod handle_table;
pub mod init;
pub mod io;
pub mod io_state;
pub mod lookup;
pub mod mount;
pub mod ops;
pub mod page_cache;
pub mod path_entry;
pub mod perm;
pub mod pipe;
pub mod poll;
pub mod shm;
pub mod stream;
pub mod syscall;
pub mod terminal;
pub mod walk;

mod util;

pub use error::{KResult, KernelError};
pub use file_object::{FileObject, FileObjectFlags, OBJECT_DEVICE, SpecialIo};
pub use handle::IoHandle;
pub use handle_table::HandleTable;
pub use init::init;
pub use mount::PathPoint;
pub use ops::{
    DeviceOps, KernelOps, MemoryOps, device_ops, kernel_ops, memory_ops, register_device_ops,
    register_kernel_ops, register_memory_ops,
};
pub use page_cache::cleaner::cleaner_thread;
pub use syscall::{FileControlRequest, syscall_result};
