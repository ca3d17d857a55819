//! 进程身份与能力
//!
//! 权限检查只依赖这里定义的身份四元组和能力位；内核态调用方绕过
//! 全部检查（见 vfs 的权限模块）。

/// 任务（线程/进程）标识符
pub type TaskId = u64;

bitflags::bitflags! {
    /// 进程能力位
    ///
    /// 能力检查在精确匹配权限位失败后进行，作为兜底授权。
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capabilities: u32 {
        /// 允许挂载与卸载
        const MOUNT         = 1 << 0;
        /// 允许更改进程根目录
        const CHROOT        = 1 << 1;
        /// 允许离开已更改的根目录
        const ESCAPE_CHROOT = 1 << 2;
        /// 跳过全部文件访问检查
        const FILE_ACCESS   = 1 << 3;
        /// 任意读取；目录上额外授予搜索（执行）
        const READ_SEARCH   = 1 << 4;
    }
}

/// 进程凭证
///
/// 异步信号所有权记录会在设置时拍下一份快照，使得之后的信号投递
/// 不会超出设置者当时的权限。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials {
    /// 实际用户
    pub real_user_id: u32,
    /// 有效用户
    pub effective_user_id: u32,
    /// 实际组
    pub real_group_id: u32,
    /// 有效组
    pub effective_group_id: u32,
    /// 能力位
    pub capabilities: Capabilities,
}

impl Credentials {
    /// 内核身份：uid/gid 全零，持有全部能力
    pub const fn kernel() -> Self {
        Self {
            real_user_id: 0,
            effective_user_id: 0,
            real_group_id: 0,
            effective_group_id: 0,
            capabilities: Capabilities::all(),
        }
    }
}
