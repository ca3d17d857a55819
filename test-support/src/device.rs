//! 内存盘
//!
//! 一个 `DeviceOps` 实现可以同时扮演多块盘：按设备号分开的
//! 节点表，目录是名字到文件号的映射，数据就是字节向量。root
//! 固定为 1 号文件。

use std::collections::HashMap;
use std::sync::Mutex;

use uapi::fs::{DeviceId, FileId, FilePermissions, FileProperties, FileType};
use vfs::{DeviceOps, KResult, KernelError};

const ROOT_FILE: FileId = 1;

struct Node {
    properties: FileProperties,
    data: Vec<u8>,
    children: HashMap<Vec<u8>, FileId>,
}

struct Disk {
    nodes: HashMap<FileId, Node>,
    next_id: FileId,
}

/// 内存盘集合
pub struct RamDevice {
    disks: Mutex<HashMap<DeviceId, Disk>>,
}

lazy_static::lazy_static! {
    /// 全局实例
    pub static ref RAM_DEVICE: RamDevice = RamDevice {
        disks: Mutex::new(HashMap::new()),
    };
}

fn root_properties(device: DeviceId) -> FileProperties {
    FileProperties {
        device_id: device,
        file_id: ROOT_FILE,
        file_type: FileType::RegularDirectory,
        user_id: 0,
        group_id: 0,
        permissions: FilePermissions::from_bits_truncate(0o755),
        hard_link_count: 1,
        size: 0,
        access_time: Default::default(),
        modified_time: Default::default(),
        status_change_time: Default::default(),
    }
}

impl RamDevice {
    fn disks(&self) -> std::sync::MutexGuard<'_, HashMap<DeviceId, Disk>> {
        self.disks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 准备一块空盘（已存在则保留内容）
    pub fn format(&self, device: DeviceId) {
        let mut disks = self.disks();
        disks.entry(device).or_insert_with(|| {
            let mut nodes = HashMap::new();
            nodes.insert(
                ROOT_FILE,
                Node {
                    properties: root_properties(device),
                    data: Vec::new(),
                    children: HashMap::new(),
                },
            );
            Disk {
                nodes,
                next_id: ROOT_FILE + 1,
            }
        });
    }

    /// 盘上现存的节点数（含根）
    pub fn node_count(&self, device: DeviceId) -> usize {
        self.disks()
            .get(&device)
            .map(|disk| disk.nodes.len())
            .unwrap_or(0)
    }
}

fn linked_elsewhere(disk: &Disk, file: FileId) -> bool {
    disk.nodes
        .values()
        .any(|node| node.children.values().any(|child| *child == file))
}

impl DeviceOps for RamDevice {
    fn device_lookup(
        &self,
        device: DeviceId,
        directory: FileId,
        name: &[u8],
    ) -> KResult<FileProperties> {
        let disks = self.disks();
        let disk = disks.get(&device).ok_or(KernelError::PathNotFound)?;
        if directory == 0 && (name.is_empty() || name == b"/") {
            let root = disk.nodes.get(&ROOT_FILE).ok_or(KernelError::PathNotFound)?;
            return Ok(root.properties);
        }
        let parent = disk.nodes.get(&directory).ok_or(KernelError::PathNotFound)?;
        let child = parent.children.get(name).ok_or(KernelError::PathNotFound)?;
        let node = disk.nodes.get(child).ok_or(KernelError::PathNotFound)?;
        Ok(node.properties)
    }

    fn device_create(
        &self,
        device: DeviceId,
        directory: FileId,
        name: &[u8],
        properties: &FileProperties,
    ) -> KResult<FileProperties> {
        let mut disks = self.disks();
        let disk = disks.get_mut(&device).ok_or(KernelError::PathNotFound)?;
        let file_id = disk.next_id;
        let parent = disk
            .nodes
            .get_mut(&directory)
            .ok_or(KernelError::PathNotFound)?;
        if parent.children.contains_key(name) {
            return Err(KernelError::FileExists);
        }
        parent.children.insert(name.to_vec(), file_id);
        disk.next_id += 1;
        let mut stored = *properties;
        stored.device_id = device;
        stored.file_id = file_id;
        disk.nodes.insert(
            file_id,
            Node {
                properties: stored,
                data: Vec::new(),
                children: HashMap::new(),
            },
        );
        Ok(stored)
    }

    fn read_range(
        &self,
        device: DeviceId,
        file: FileId,
        offset: u64,
        buffer: &mut [u8],
    ) -> KResult<usize> {
        let disks = self.disks();
        let disk = disks.get(&device).ok_or(KernelError::PathNotFound)?;
        let node = disk.nodes.get(&file).ok_or(KernelError::PathNotFound)?;
        let start = (offset as usize).min(node.data.len());
        let count = buffer.len().min(node.data.len() - start);
        buffer[..count].copy_from_slice(&node.data[start..start + count]);
        Ok(count)
    }

    fn write_range(
        &self,
        device: DeviceId,
        file: FileId,
        offset: u64,
        buffer: &[u8],
    ) -> KResult<usize> {
        let mut disks = self.disks();
        let disk = disks.get_mut(&device).ok_or(KernelError::PathNotFound)?;
        let node = disk.nodes.get_mut(&file).ok_or(KernelError::PathNotFound)?;
        let end = offset as usize + buffer.len();
        if node.data.len() < end {
            node.data.resize(end, 0);
        }
        node.data[offset as usize..end].copy_from_slice(buffer);
        Ok(buffer.len())
    }

    fn unlink(
        &self,
        device: DeviceId,
        directory: FileId,
        name: &[u8],
        file: FileId,
    ) -> KResult<()> {
        let mut disks = self.disks();
        let disk = disks.get_mut(&device).ok_or(KernelError::PathNotFound)?;
        let parent = disk
            .nodes
            .get_mut(&directory)
            .ok_or(KernelError::PathNotFound)?;
        match parent.children.get(name) {
            Some(child) if *child == file => {
                parent.children.remove(name);
            }
            _ => return Err(KernelError::PathNotFound),
        }
        if !linked_elsewhere(disk, file) {
            disk.nodes.remove(&file);
        }
        Ok(())
    }

    fn rename(
        &self,
        device: DeviceId,
        source_directory: FileId,
        source_name: &[u8],
        target_directory: FileId,
        target_name: &[u8],
        file: FileId,
    ) -> KResult<()> {
        let mut disks = self.disks();
        let disk = disks.get_mut(&device).ok_or(KernelError::PathNotFound)?;
        {
            let source = disk
                .nodes
                .get_mut(&source_directory)
                .ok_or(KernelError::PathNotFound)?;
            match source.children.get(source_name) {
                Some(child) if *child == file => {
                    source.children.remove(source_name);
                }
                _ => return Err(KernelError::PathNotFound),
            }
        }
        let displaced = {
            let target = disk
                .nodes
                .get_mut(&target_directory)
                .ok_or(KernelError::PathNotFound)?;
            target.children.insert(target_name.to_vec(), file)
        };
        if let Some(displaced) = displaced {
            if !linked_elsewhere(disk, displaced) {
                disk.nodes.remove(&displaced);
            }
        }
        Ok(())
    }

    fn truncate(&self, device: DeviceId, file: FileId, size: u64) -> KResult<()> {
        let mut disks = self.disks();
        let disk = disks.get_mut(&device).ok_or(KernelError::PathNotFound)?;
        let node = disk.nodes.get_mut(&file).ok_or(KernelError::PathNotFound)?;
        node.data.resize(size as usize, 0);
        node.properties.size = size;
        Ok(())
    }

    fn write_properties(&self, device: DeviceId, properties: &FileProperties) -> KResult<()> {
        let mut disks = self.disks();
        let disk = disks.get_mut(&device).ok_or(KernelError::PathNotFound)?;
        let node = disk
            .nodes
            .get_mut(&properties.file_id)
            .ok_or(KernelError::PathNotFound)?;
        node.properties = *properties;
        Ok(())
    }
}
