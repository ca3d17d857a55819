//! VFS 编译期可调参数
//!
//! 运行期派生的页缓存水位线在 `page_cache::init` 中由物理内存
//! 总量计算，不在这里。

/// 页大小（字节）
pub const PAGE_SIZE: usize = 4096;
/// 页内偏移位数
pub const PAGE_SHIFT: usize = 12;

/// 符号链接解析的最大递归层数
pub const MAX_SYMBOLIC_LINK_RECURSION: usize = 8;

/// 流缓冲区默认容量（含一个哨兵字节，可用 8191 字节）
pub const DEFAULT_STREAM_CAPACITY: usize = 8192;
/// 不被拆分的最大单次流写入长度
pub const ATOMIC_WRITE_SIZE: usize = 4096;

/// 单次页缓存冲刷最多聚集的字节数
pub const PAGE_CACHE_FLUSH_MAX: usize = 128 * 1024;
/// 冲刷聚集时容忍的最大连续干净页数
pub const FLUSH_CLEAN_STREAK_MAX: usize = 4;

/// 每进程句柄表的默认容量
pub const DEFAULT_MAX_HANDLES: usize = 1024;

/// 清理线程的常规调度延迟（毫秒）
pub const CLEANER_DELAY_MS: u64 = 1000;
/// 清理线程的最小调度延迟（毫秒）
pub const CLEANER_MIN_DELAY_MS: u64 = 10;

/// 路径项缓存占物理内存的百分比上限
pub const ENTRY_CACHE_PERCENT: usize = 30;
