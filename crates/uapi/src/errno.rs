//! 系统调用错误码
//!
//! 系统调用的返回约定：非负值表示成功（或传输的字节数），负值表示
//! 取负后的错误码。此处定义正的错误码常量，由内核在系统调用边界取负。

/// 参数无效
pub const INVALID_PARAMETER: isize = 1;
/// 句柄无效或已关闭
pub const INVALID_HANDLE: isize = 2;
/// 访问被拒绝
pub const ACCESS_DENIED: isize = 3;
/// 资源不足（内存、表项等）
pub const INSUFFICIENT_RESOURCES: isize = 4;
/// 路径不存在
pub const PATH_NOT_FOUND: isize = 5;
/// 文件已存在
pub const FILE_EXISTS: isize = 6;
/// 目标是目录（期望文件）
pub const FILE_IS_DIRECTORY: isize = 7;
/// 目标不是目录（期望目录）
pub const NOT_A_DIRECTORY: isize = 8;
/// 目标不是挂载点
pub const NOT_A_MOUNT_POINT: isize = 9;
/// 目标不可被挂载覆盖
pub const NOT_MOUNTABLE: isize = 10;
/// 符号链接解析层数超限
pub const SYMBOLIC_LINK_LOOP: isize = 11;
/// 资源正在使用中
pub const RESOURCE_IN_USE: isize = 12;
/// 管道写端无读者
pub const BROKEN_PIPE: isize = 13;
/// 已到达文件（或流）结尾
pub const END_OF_FILE: isize = 14;
/// 数据长度与请求不符
pub const DATA_LENGTH_MISMATCH: isize = 15;
/// 非阻塞操作将会阻塞，稍后重试
pub const TRY_AGAIN: isize = 16;
/// 阻塞等待被信号打断
pub const INTERRUPTED: isize = 17;
/// 信号处理完成后需要重启系统调用
pub const RESTART_AFTER_SIGNAL: isize = 18;
/// 操作不受支持
pub const NOT_SUPPORTED: isize = 19;
/// 等待超时
pub const TIMEOUT: isize = 20;
/// 句柄表已满
pub const TOO_MANY_HANDLES: isize = 21;
/// 目录非空
pub const DIRECTORY_NOT_EMPTY: isize = 22;
/// 跨设备操作（重命名跨越文件系统边界）
pub const CROSS_DEVICE: isize = 23;
