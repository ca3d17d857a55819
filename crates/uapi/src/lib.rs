//! 与用户空间共用的定义和声明
//!
//! 包含系统调用层可见的常量、标志位和结构体，确保内核和用户空间对
//! 同一份 ABI 的理解一致。所有结构体均为 `repr(C)` 或纯值类型，
//! 不依赖内核内部状态。

#![no_std]
#![allow(dead_code)]

pub mod cred;
pub mod errno;
pub mod fcntl;
pub mod fs;
pub mod mount;
pub mod poll;
pub mod signal;
pub mod time;
