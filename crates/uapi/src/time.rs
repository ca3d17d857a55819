//! 系统时间格式
//!
//! 内核对外暴露的时间戳以秒 + 纳秒表示，文件属性中的三个时间戳
//! （访问/修改/状态变更）均使用该格式。

/// 表示"无限等待"的毫秒超时值
pub const WAIT_TIME_INDEFINITE: u64 = u64::MAX;

/// 秒 + 纳秒的时间表示
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct TimeSpec {
    /// 秒
    pub seconds: i64,
    /// 纳秒（0..1_000_000_000）
    pub nanoseconds: i64,
}

impl TimeSpec {
    /// 全零时间戳
    pub const fn zero() -> Self {
        Self {
            seconds: 0,
            nanoseconds: 0,
        }
    }

    /// 由毫秒构造
    pub const fn from_milliseconds(ms: u64) -> Self {
        Self {
            seconds: (ms / 1000) as i64,
            nanoseconds: ((ms % 1000) * 1_000_000) as i64,
        }
    }

    /// 转换为毫秒（向下取整）
    pub const fn as_milliseconds(&self) -> u64 {
        self.seconds as u64 * 1000 + self.nanoseconds as u64 / 1_000_000
    }
}
