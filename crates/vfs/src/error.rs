//! VFS 错误类型
//!
//! 错误以返回值传播，没有异常；[`KernelError::to_errno()`] 在
//! 系统调用边界把错误换算成取负的错误码。

use sync::WaitError;

/// 统一的内核错误类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// 参数无效
    InvalidParameter,
    /// 句柄无效或已关闭
    InvalidHandle,
    /// 访问被拒绝
    AccessDenied,
    /// 资源不足
    InsufficientResources,
    /// 路径不存在
    PathNotFound,
    /// 文件已存在
    FileExists,
    /// 目标是目录（期望文件）
    FileIsDirectory,
    /// 目标不是目录（期望目录）
    NotADirectory,
    /// 目标不是挂载点
    NotAMountPoint,
    /// 目标不可被挂载覆盖
    NotMountable,
    /// 符号链接解析层数超限
    SymbolicLinkLoop,
    /// 资源正在使用中
    ResourceInUse,
    /// 管道写端无读者
    BrokenPipe,
    /// 已到达文件（或流）结尾
    EndOfFile,
    /// 数据长度与请求不符
    DataLengthMismatch,
    /// 非阻塞操作将会阻塞
    TryAgain,
    /// 阻塞等待被信号打断（内核内部形态）
    Interrupted,
    /// 信号处理完成后需要重启系统调用
    RestartAfterSignal,
    /// 操作不受支持
    NotSupported,
    /// 等待超时
    Timeout,
    /// 句柄表已满
    TooManyHandles,
    /// 目录非空
    DirectoryNotEmpty,
    /// 跨设备操作
    CrossDevice,
}

/// VFS 内部通用的结果类型
pub type KResult<T> = Result<T, KernelError>;

impl KernelError {
    /// 转换为系统调用错误码（负数）
    pub fn to_errno(&self) -> isize {
        let code = match self {
            KernelError::InvalidParameter => uapi::errno::INVALID_PARAMETER,
            KernelError::InvalidHandle => uapi::errno::INVALID_HANDLE,
            KernelError::AccessDenied => uapi::errno::ACCESS_DENIED,
            KernelError::InsufficientResources => uapi::errno::INSUFFICIENT_RESOURCES,
            KernelError::PathNotFound => uapi::errno::PATH_NOT_FOUND,
            KernelError::FileExists => uapi::errno::FILE_EXISTS,
            KernelError::FileIsDirectory => uapi::errno::FILE_IS_DIRECTORY,
            KernelError::NotADirectory => uapi::errno::NOT_A_DIRECTORY,
            KernelError::NotAMountPoint => uapi::errno::NOT_A_MOUNT_POINT,
            KernelError::NotMountable => uapi::errno::NOT_MOUNTABLE,
            KernelError::SymbolicLinkLoop => uapi::errno::SYMBOLIC_LINK_LOOP,
            KernelError::ResourceInUse => uapi::errno::RESOURCE_IN_USE,
            KernelError::BrokenPipe => uapi::errno::BROKEN_PIPE,
            KernelError::EndOfFile => uapi::errno::END_OF_FILE,
            KernelError::DataLengthMismatch => uapi::errno::DATA_LENGTH_MISMATCH,
            KernelError::TryAgain => uapi::errno::TRY_AGAIN,
            KernelError::Interrupted => uapi::errno::INTERRUPTED,
            KernelError::RestartAfterSignal => uapi::errno::RESTART_AFTER_SIGNAL,
            KernelError::NotSupported => uapi::errno::NOT_SUPPORTED,
            KernelError::Timeout => uapi::errno::TIMEOUT,
            KernelError::TooManyHandles => uapi::errno::TOO_MANY_HANDLES,
            KernelError::DirectoryNotEmpty => uapi::errno::DIRECTORY_NOT_EMPTY,
            KernelError::CrossDevice => uapi::errno::CROSS_DEVICE,
        };
        -code
    }

    /// 在用户-内核边界把内部的"被信号打断"换算成"信号后重启"
    ///
    /// 仅当还没有任何字节完成传输时才换算；已有部分传输的调用
    /// 以成功加部分计数返回（见 io 模块）。
    pub fn at_boundary(self) -> Self {
        match self {
            KernelError::Interrupted => KernelError::RestartAfterSignal,
            other => other,
        }
    }
}

impl From<WaitError> for KernelError {
    fn from(err: WaitError) -> Self {
        match err {
            WaitError::Timeout => KernelError::Timeout,
            WaitError::Interrupted => KernelError::Interrupted,
        }
    }
}
