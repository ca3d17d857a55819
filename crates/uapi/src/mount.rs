//! 挂载标志

bitflags::bitflags! {
    /// `mount` / `unmount` 标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MountFlags: u32 {
        /// 执行卸载而非挂载
        const UNMOUNT   = 1 << 0;
        /// 绑定挂载：目标是现有目录而非设备
        const BIND      = 1 << 1;
        /// 连同目标子树中的挂载一起复制
        const RECURSIVE = 1 << 2;
        /// 惰性卸载：立即与父脱链，引用归零后销毁
        const DETACH    = 1 << 3;
        /// 在被覆盖路径项出现的所有位置同时挂载
        const LINKED    = 1 << 4;
        /// 只读挂载
        const READ      = 1 << 5;
        /// 读写挂载
        const WRITE     = 1 << 6;
    }
}
