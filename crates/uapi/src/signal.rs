//! 信号编号与信号掩码
//!
//! VFS 核心只合成两种信号：向无读者管道写入时的 `SIGNAL_PIPE`，
//! 以及异步 I/O 就绪时投递给所有者的 `SIGNAL_IO`。

/// 信号掩码：每个比特对应一个信号编号
pub type SignalMask = u64;

/// 管道写端无读者
pub const SIGNAL_PIPE: u32 = 13;
/// 异步 I/O 就绪
pub const SIGNAL_IO: u32 = 29;
