//! 打开标志、描述符标志与句柄控制命令
//!
//! `open` 的标志字高位承载访问模式（读/写/执行），低位承载创建与
//! 状态标志；两段可以独立掩取。

bitflags::bitflags! {
    /// 打开标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        // 低位：创建与状态标志
        /// 路径不存在时创建
        const CREATE                  = 0x0000_0001;
        /// 打开后截断到零
        const TRUNCATE                = 0x0000_0002;
        /// 与 CREATE 联用：已存在则失败
        const FAIL_IF_EXISTS          = 0x0000_0004;
        /// 每次写前移到文件尾
        const APPEND                  = 0x0000_0008;
        /// 目标必须是目录
        const DIRECTORY               = 0x0000_0010;
        /// 非阻塞 I/O
        const NON_BLOCKING            = 0x0000_0020;
        /// 在共享内存目录下解析路径
        const SHARED_MEMORY           = 0x0000_0040;
        /// 最终组件是符号链接则失败
        const NO_SYMBOLIC_LINK        = 0x0000_0080;
        /// 写入同步落盘
        const SYNCHRONIZED            = 0x0000_0100;
        /// 打开终端时不把它设为控制终端
        const NO_CONTROLLING_TERMINAL = 0x0000_0200;
        /// 不更新访问时间
        const NO_ACCESS_TIME          = 0x0000_0400;
        /// 异步 I/O 通知
        const ASYNCHRONOUS            = 0x0000_0800;
        /// exec 时关闭对应描述符
        const CLOSE_ON_EXECUTE        = 0x0000_1000;
        /// 打开符号链接本身而非其目标
        const SYMBOLIC_LINK           = 0x0000_2000;
        /// 查找时忽略挂载点（内核内部使用）
        const NO_MOUNT_POINT          = 0x0000_4000;

        // 高位：访问模式
        /// 读访问
        const READ    = 0x1000_0000;
        /// 写访问
        const WRITE   = 0x2000_0000;
        /// 执行访问
        const EXECUTE = 0x4000_0000;
    }
}

impl OpenFlags {
    /// 取出访问模式部分
    pub fn access(&self) -> OpenFlags {
        *self & (OpenFlags::READ | OpenFlags::WRITE | OpenFlags::EXECUTE)
    }
}

bitflags::bitflags! {
    /// 描述符槽位标志（随描述符而非句柄存在）
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DescriptorFlags: u32 {
        /// exec 时关闭
        const CLOSE_ON_EXECUTE = 1 << 0;
    }
}

/// 句柄控制命令（`file_control`）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FileControl {
    /// 复制到最小可用描述符
    Duplicate = 1,
    /// 读取描述符标志
    GetFlags = 2,
    /// 设置描述符标志
    SetFlags = 3,
    /// 读取状态与访问标志
    GetStatusAndAccess = 4,
    /// 设置状态标志（仅 APPEND/NON_BLOCKING/ASYNCHRONOUS/NO_ACCESS_TIME）
    SetStatus = 5,
    /// 读取异步信号所有者
    GetSignalOwner = 6,
    /// 设置异步信号所有者
    SetSignalOwner = 7,
    /// 探测区域锁
    GetLock = 8,
    /// 设置区域锁（非阻塞）
    SetLock = 9,
    /// 设置区域锁（阻塞等待）
    SetLockWait = 10,
    /// 读取文件属性
    GetFileInformation = 11,
    /// 写入文件属性
    SetFileInformation = 12,
    /// 要求目标为目录
    SetDirectoryFlag = 13,
    /// 关闭自给定编号起的全部描述符
    CloseFrom = 14,
    /// 取回句柄的全路径
    GetPath = 15,
}

impl FileControl {
    /// 从原始命令字解码
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            1 => FileControl::Duplicate,
            2 => FileControl::GetFlags,
            3 => FileControl::SetFlags,
            4 => FileControl::GetStatusAndAccess,
            5 => FileControl::SetStatus,
            6 => FileControl::GetSignalOwner,
            7 => FileControl::SetSignalOwner,
            8 => FileControl::GetLock,
            9 => FileControl::SetLock,
            10 => FileControl::SetLockWait,
            11 => FileControl::GetFileInformation,
            12 => FileControl::SetFileInformation,
            13 => FileControl::SetDirectoryFlag,
            14 => FileControl::CloseFrom,
            15 => FileControl::GetPath,
            _ => return None,
        })
    }
}

/// `seek` 命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SeekCommand {
    /// 设为绝对偏移
    Set = 0,
    /// 相对当前偏移
    Current = 1,
    /// 相对文件尾
    End = 2,
}

/// 区域锁类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FileLockKind {
    /// 共享读锁
    Read = 0,
    /// 排他写锁
    Write = 1,
    /// 解锁
    Unlock = 2,
}

/// 区域锁描述
///
/// `size == 0` 表示锁到文件尾。`owner` 由内核在返回冲突锁时填写，
/// 设置锁时忽略调用者填入的值。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileLockDescription {
    /// 锁类型
    pub kind: FileLockKind,
    /// 起始偏移（字节）
    pub offset: u64,
    /// 区域长度（字节），0 表示到文件尾
    pub size: u64,
    /// 持有者任务
    pub owner: crate::cred::TaskId,
}

/// `user_control` 通用请求码：设置异步标志
pub const USER_CONTROL_ASYNC: u32 = 0x5452_0001;
/// `user_control` 通用请求码：设置非阻塞标志
pub const USER_CONTROL_NON_BLOCKING: u32 = 0x5452_0002;
