//! VFS 宿主测试环境
//!
//! 在普通线程上模拟内核运行环境：注册 `sync` 与 `vfs` 需要的五
//! 张操作表，用内存盘充当目录型设备，用泄漏的堆块充当物理页。
//! 全局状态（句柄表、当前目录、凭证）是进程级单例，并发测试用
//! [`serial`] 串行化。

pub mod device;
pub mod kernel;
pub mod memory;
pub mod sched;

use std::sync::{Mutex, MutexGuard, Once};

use uapi::fs::DeviceId;
use uapi::mount::MountFlags;
use vfs::file_object::FileObject;
use vfs::mount::PathPoint;
use vfs::path_entry::PathEntry;

pub use device::RAM_DEVICE;
pub use kernel::TEST_KERNEL;
pub use memory::PAGE_ARENA;
pub use sched::TEST_SCHED;

static SETUP: Once = Once::new();

lazy_static::lazy_static! {
    static ref SERIAL: Mutex<()> = Mutex::new(());
}

/// 注册全部操作表并建立根命名空间（进程内只执行一次）
pub fn setup() {
    SETUP.call_once(|| {
        // SAFETY: Once 保证单次单线程执行
        unsafe {
            sync::register_arch_ops(&sched::TEST_SCHED);
            sync::register_sched_ops(&sched::TEST_SCHED);
            vfs::register_kernel_ops(&*kernel::TEST_KERNEL);
            vfs::register_device_ops(&*device::RAM_DEVICE);
            vfs::register_memory_ops(&*memory::PAGE_ARENA);
        }
        vfs::init().expect("test environment: vfs init failed");
    });
}

/// 串行化共享全局状态的测试
pub fn serial() -> MutexGuard<'static, ()> {
    setup();
    SERIAL.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 把内存盘 `device` 的根挂到 `mount_path`（目录不存在则创建）
pub fn mount_ram_disk(mount_path: &[u8], device: DeviceId) -> vfs::KResult<()> {
    use uapi::fcntl::OpenFlags;
    use uapi::fs::FilePermissions;

    device::RAM_DEVICE.format(device);
    let create = vfs::lookup::CreateParameters {
        file_type: uapi::fs::FileType::RegularDirectory,
        permissions: FilePermissions::from_bits_truncate(0o755),
    };
    let (mount_point, _) = vfs::walk::path_walk(
        true,
        None,
        mount_path,
        OpenFlags::DIRECTORY | OpenFlags::CREATE,
        Some(&create),
    )?;

    let properties = vfs::device_ops().device_lookup(device, 0, b"/")?;
    let (root_file, creator) =
        FileObject::lookup_or_create(properties.device_id, properties.file_id);
    if creator {
        root_file.complete_initialization(&properties);
    } else {
        root_file.wait_ready()?;
    }
    let root_entry = PathEntry::new_anonymous(root_file.clone());
    let _ = root_file.release(false);
    let target = PathPoint::adopt(root_entry, mount_point.mount.clone());
    vfs::mount::mount(true, &mount_point, &target, MountFlags::empty())
}
