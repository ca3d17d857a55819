//! 句柄表
//!
//! 以整数描述符为键的稀疏表。分配取最小空闲描述符；`install_at`
//! 替换指定槽位并交回旧句柄，由调用方在表锁之外走关闭协议。
//! exec 清扫与进程终止都先收集后关闭，禁止在遍历中就地关闭。

use alloc::sync::Arc;
use alloc::vec::Vec;

use sync::SpinLock;
use uapi::fcntl::DescriptorFlags;

use crate::config::DEFAULT_MAX_HANDLES;
use crate::error::{KResult, KernelError};
use crate::handle::IoHandle;

#[derive(Clone)]
struct HandleSlot {
    handle: Arc<IoHandle>,
    flags: DescriptorFlags,
}

/// 句柄表
pub struct HandleTable {
    slots: SpinLock<Vec<Option<HandleSlot>>>,
    max_handles: usize,
}

impl HandleTable {
    /// 建空表
    pub fn new() -> Arc<HandleTable> {
        Self::with_limit(DEFAULT_MAX_HANDLES)
    }

    /// 建空表并指定描述符上限
    pub fn with_limit(max_handles: usize) -> Arc<HandleTable> {
        Arc::new(HandleTable {
            slots: SpinLock::new(Vec::new()),
            max_handles,
        })
    }

    fn check_descriptor(&self, descriptor: i32) -> KResult<usize> {
        if descriptor < 0 {
            return Err(KernelError::InvalidHandle);
        }
        let index = descriptor as usize;
        if index >= self.max_handles {
            return Err(KernelError::InvalidHandle);
        }
        Ok(index)
    }

    /// 从 `minimum` 起分配最小空闲描述符
    pub fn allocate_from(
        &self,
        minimum: i32,
        handle: Arc<IoHandle>,
        flags: DescriptorFlags,
    ) -> KResult<i32> {
        let minimum = self.check_descriptor(minimum.max(0))?;
        let mut slots = self.slots.lock();
        let mut index = minimum;
        while index < slots.len() {
            if slots[index].is_none() {
                slots[index] = Some(HandleSlot { handle, flags });
                return Ok(index as i32);
            }
            index += 1;
        }
        if index >= self.max_handles {
            return Err(KernelError::TooManyHandles);
        }
        slots.resize(index + 1, None);
        slots[index] = Some(HandleSlot { handle, flags });
        Ok(index as i32)
    }

    /// 分配最小空闲描述符
    pub fn allocate(&self, handle: Arc<IoHandle>, flags: DescriptorFlags) -> KResult<i32> {
        self.allocate_from(0, handle, flags)
    }

    /// 安装到指定描述符，交回被顶掉的旧句柄
    pub fn install_at(
        &self,
        descriptor: i32,
        handle: Arc<IoHandle>,
        flags: DescriptorFlags,
    ) -> KResult<Option<Arc<IoHandle>>> {
        let index = self.check_descriptor(descriptor)?;
        let mut slots = self.slots.lock();
        if slots.len() <= index {
            slots.resize(index + 1, None);
        }
        let old = slots[index].take().map(|slot| slot.handle);
        slots[index] = Some(HandleSlot { handle, flags });
        Ok(old)
    }

    /// 取句柄（增 Arc 引用）
    pub fn get(&self, descriptor: i32) -> KResult<Arc<IoHandle>> {
        let index = self.check_descriptor(descriptor)?;
        let slots = self.slots.lock();
        slots
            .get(index)
            .and_then(|slot| slot.as_ref())
            .map(|slot| slot.handle.clone())
            .ok_or(KernelError::InvalidHandle)
    }

    /// 取槽位描述符标志
    pub fn get_flags(&self, descriptor: i32) -> KResult<DescriptorFlags> {
        let index = self.check_descriptor(descriptor)?;
        let slots = self.slots.lock();
        slots
            .get(index)
            .and_then(|slot| slot.as_ref())
            .map(|slot| slot.flags)
            .ok_or(KernelError::InvalidHandle)
    }

    /// 改槽位描述符标志
    pub fn set_flags(&self, descriptor: i32, flags: DescriptorFlags) -> KResult<()> {
        let index = self.check_descriptor(descriptor)?;
        let mut slots = self.slots.lock();
        match slots.get_mut(index).and_then(|slot| slot.as_mut()) {
            Some(slot) => {
                slot.flags = flags;
                Ok(())
            }
            None => Err(KernelError::InvalidHandle),
        }
    }

    /// 摘下描述符，交回句柄
    pub fn remove(&self, descriptor: i32) -> KResult<Arc<IoHandle>> {
        let index = self.check_descriptor(descriptor)?;
        let mut slots = self.slots.lock();
        slots
            .get_mut(index)
            .and_then(|slot| slot.take())
            .map(|slot| slot.handle)
            .ok_or(KernelError::InvalidHandle)
    }

    /// 复制到自 `minimum` 起的最小空闲描述符
    pub fn duplicate(
        &self,
        descriptor: i32,
        minimum: i32,
        flags: DescriptorFlags,
    ) -> KResult<i32> {
        let handle = self.get(descriptor)?;
        self.allocate_from(minimum, handle, flags)
    }

    /// 复制到指定描述符，交回被顶掉的旧句柄
    pub fn duplicate_at(
        &self,
        descriptor: i32,
        target: i32,
        flags: DescriptorFlags,
    ) -> KResult<Option<Arc<IoHandle>>> {
        if descriptor == target {
            // 自复制不关闭任何东西
            self.get(descriptor)?;
            return Ok(None);
        }
        let handle = self.get(descriptor)?;
        self.install_at(target, handle, flags)
    }

    /// exec 清扫：先收集再交回，调用方逐个关闭
    pub fn close_on_execute_sweep(&self) -> Vec<Arc<IoHandle>> {
        let descriptors: Vec<usize> = {
            let slots = self.slots.lock();
            slots
                .iter()
                .enumerate()
                .filter(|(_, slot)| {
                    slot.as_ref()
                        .map(|s| s.flags.contains(DescriptorFlags::CLOSE_ON_EXECUTE))
                        .unwrap_or(false)
                })
                .map(|(index, _)| index)
                .collect()
        };
        let mut closed = Vec::with_capacity(descriptors.len());
        let mut slots = self.slots.lock();
        for index in descriptors {
            if let Some(slot) = slots.get_mut(index).and_then(|slot| slot.take()) {
                closed.push(slot.handle);
            }
        }
        closed
    }

    /// fork 继承：整表复制，Arc 克隆即加引用
    pub fn inherit(&self) -> Arc<HandleTable> {
        let slots = self.slots.lock().clone();
        Arc::new(HandleTable {
            slots: SpinLock::new(slots),
            max_handles: self.max_handles,
        })
    }

    /// 终止清扫：从最高描述符起逐个摘下
    pub fn terminate_sweep(&self) -> Vec<Arc<IoHandle>> {
        let mut closed = Vec::new();
        loop {
            let taken = {
                let mut slots = self.slots.lock();
                let highest = slots.iter().rposition(|slot| slot.is_some());
                match highest {
                    Some(index) => slots[index].take().map(|slot| slot.handle),
                    None => None,
                }
            };
            match taken {
                Some(handle) => closed.push(handle),
                None => break,
            }
        }
        closed
    }

    /// 关闭自 `minimum` 起的全部描述符，交回句柄
    pub fn close_from(&self, minimum: i32) -> KResult<Vec<Arc<IoHandle>>> {
        let minimum = self.check_descriptor(minimum)?;
        let mut slots = self.slots.lock();
        let mut closed = Vec::new();
        for slot in slots.iter_mut().skip(minimum) {
            if let Some(slot) = slot.take() {
                closed.push(slot.handle);
            }
        }
        Ok(closed)
    }

    /// 遍历所有占用的槽位
    pub fn for_each(&self, mut visit: impl FnMut(i32, &Arc<IoHandle>, DescriptorFlags)) {
        let slots = self.slots.lock();
        for (index, slot) in slots.iter().enumerate() {
            if let Some(slot) = slot {
                visit(index as i32, &slot.handle, slot.flags);
            }
        }
    }

    /// 占用的描述符数量
    pub fn open_count(&self) -> usize {
        self.slots.lock().iter().filter(|slot| slot.is_some()).count()
    }
}
