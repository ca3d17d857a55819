//! 文件系统公共类型
//!
//! 定义文件类型、权限位和 `FileProperties` 结构。`FileProperties`
//! 是内核与下游文件系统之间交换（并由后者持久化）的唯一元数据格式。

use crate::time::TimeSpec;

/// 设备标识符
pub type DeviceId = u64;
/// 设备内文件标识符
pub type FileId = u64;

/// 文件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FileType {
    /// 普通文件
    RegularFile,
    /// 普通目录（由文件系统支撑）
    RegularDirectory,
    /// 对象目录（内核内存中的子项表）
    ObjectDirectory,
    /// 符号链接
    SymbolicLink,
    /// 块设备
    BlockDevice,
    /// 字符设备
    CharacterDevice,
    /// 管道
    Pipe,
    /// 套接字
    Socket,
    /// 终端主端
    TerminalMaster,
    /// 终端从端
    TerminalSlave,
    /// 共享内存对象
    SharedMemoryObject,
}

impl FileType {
    /// 是否为目录类型（普通目录或对象目录）
    pub fn is_directory(&self) -> bool {
        matches!(self, FileType::RegularDirectory | FileType::ObjectDirectory)
    }

    /// I/O 是否经过页缓存
    ///
    /// 普通文件、目录、块设备、符号链接和共享内存对象由页缓存支撑；
    /// 管道、套接字、字符设备和终端走各自的流式路径。
    pub fn is_cached(&self) -> bool {
        matches!(
            self,
            FileType::RegularFile
                | FileType::RegularDirectory
                | FileType::BlockDevice
                | FileType::SymbolicLink
                | FileType::SharedMemoryObject
        )
    }
}

bitflags::bitflags! {
    /// 文件权限位
    ///
    /// 按用户/组/其他三组读写执行位组织，外加 set-uid/set-gid 与
    /// 受限删除（restricted）位。数值布局与传统八进制权限一致。
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FilePermissions: u32 {
        /// 其他用户可执行
        const OTHER_EXECUTE = 0o001;
        /// 其他用户可写
        const OTHER_WRITE   = 0o002;
        /// 其他用户可读
        const OTHER_READ    = 0o004;
        /// 组可执行
        const GROUP_EXECUTE = 0o010;
        /// 组可写
        const GROUP_WRITE   = 0o020;
        /// 组可读
        const GROUP_READ    = 0o040;
        /// 属主可执行
        const USER_EXECUTE  = 0o100;
        /// 属主可写
        const USER_WRITE    = 0o200;
        /// 属主可读
        const USER_READ     = 0o400;
        /// 受限删除目录（仅属主可删除/重命名其中的项）
        const RESTRICTED    = 0o1000;
        /// 执行时继承组身份；目录上表示新建子项继承目录组
        const SET_GROUP_ID  = 0o2000;
        /// 执行时继承属主身份
        const SET_USER_ID   = 0o4000;
    }
}

impl FilePermissions {
    /// 任意一组的执行位
    pub fn any_execute(&self) -> bool {
        self.intersects(
            FilePermissions::USER_EXECUTE
                | FilePermissions::GROUP_EXECUTE
                | FilePermissions::OTHER_EXECUTE,
        )
    }
}

/// 文件属性
///
/// 由路径查找从文件系统取回，随修改在内核中更新，最终由
/// 文件系统负责持久化。`size` 在内核中以原子方式读写。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileProperties {
    /// 所属设备
    pub device_id: DeviceId,
    /// 设备内唯一文件编号
    pub file_id: FileId,
    /// 文件类型
    pub file_type: FileType,
    /// 属主用户
    pub user_id: u32,
    /// 属主组
    pub group_id: u32,
    /// 权限位
    pub permissions: FilePermissions,
    /// 硬链接数
    pub hard_link_count: u32,
    /// 文件大小（字节）
    pub size: u64,
    /// 访问时间
    pub access_time: TimeSpec,
    /// 修改时间
    pub modified_time: TimeSpec,
    /// 状态变更时间
    pub status_change_time: TimeSpec,
}

bitflags::bitflags! {
    /// `set_file_information` 应用哪些字段
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileSetInformation: u32 {
        /// 属主用户与组
        const OWNER       = 1 << 0;
        /// 权限位
        const PERMISSIONS = 1 << 1;
        /// 访问与修改时间
        const TIMES       = 1 << 2;
        /// 截断（或扩展）到给定大小
        const SIZE        = 1 << 3;
    }
}

bitflags::bitflags! {
    /// `flush` 请求
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FlushFlags: u32 {
        /// 使读缓存失效
        const READ    = 1 << 0;
        /// 回写脏数据
        const WRITE   = 1 << 1;
        /// 回写后丢弃缓存
        const DISCARD = 1 << 2;
        /// 作用于所有脏文件而非单个描述符
        const ALL     = 1 << 3;
    }
}

/// 分散/聚集 I/O 的单个缓冲区描述
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct IoVec {
    /// 缓冲区起始地址
    pub base: u64,
    /// 缓冲区长度（字节）
    pub length: u64,
}

impl FileProperties {
    /// 构造一个除标识与类型外全部为默认值的属性
    pub fn new(device_id: DeviceId, file_id: FileId, file_type: FileType) -> Self {
        Self {
            device_id,
            file_id,
            file_type,
            user_id: 0,
            group_id: 0,
            permissions: FilePermissions::empty(),
            hard_link_count: 1,
            size: 0,
            access_time: TimeSpec::zero(),
            modified_time: TimeSpec::zero(),
            status_change_time: TimeSpec::zero(),
        }
    }
}
