//! 文件区域锁管理
//!
//! 每个文件对象带一张松散有序的劝告式区域锁列表。设置锁时先在
//! 文件对象锁下做一次只探测冲突的"干跑"；阻塞模式下遇到冲突就
//! 释放锁挂到文件对象的锁事件上，被唤醒后重试。成功后的"实跑"
//! 对同属主的重叠区域做裁剪、拆分与吞并。
//!
//! 区域长度为 0 表示"锁到文件尾"。读锁之间永不冲突，写锁与
//! 任何锁冲突。

use alloc::sync::Arc;

use sync::WAIT_FOREVER;
use uapi::cred::TaskId;
use uapi::fcntl::{FileLockDescription, FileLockKind};

use crate::error::{KResult, KernelError};
use crate::file_object::FileObject;

/// 锁列表中的一项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileLockEntry {
    /// 锁类型（列表中不会出现 Unlock）
    pub kind: FileLockKind,
    /// 持有者任务
    pub owner: TaskId,
    /// 起始偏移
    pub offset: u64,
    /// 长度，0 表示到文件尾
    pub size: u64,
}

/// 区域结束位置；到文件尾用 `u64::MAX` 表示
fn region_end(offset: u64, size: u64) -> u64 {
    if size == 0 {
        u64::MAX
    } else {
        offset.saturating_add(size)
    }
}

/// 两个区域是否重叠（分段定义，长度 0 为到文件尾）
pub fn regions_overlap(a_offset: u64, a_size: u64, b_offset: u64, b_size: u64) -> bool {
    a_offset < region_end(b_offset, b_size) && b_offset < region_end(a_offset, a_size)
}

fn conflicts(entry: &FileLockEntry, desc: &FileLockDescription) -> bool {
    if entry.owner == desc.owner {
        return false;
    }
    if !regions_overlap(entry.offset, entry.size, desc.offset, desc.size) {
        return false;
    }
    // 读+读永不冲突，任一方是写锁即冲突
    entry.kind == FileLockKind::Write || desc.kind == FileLockKind::Write
}

/// 探测给定区域上的第一把冲突锁
///
/// 无冲突时返回 `kind == Unlock` 的描述。
pub fn get_lock(file: &FileObject, probe: &FileLockDescription) -> FileLockDescription {
    let _guard = file.lock.read();
    let locks = file.locks.lock();
    for entry in locks.iter() {
        if conflicts(entry, probe) {
            return FileLockDescription {
                kind: entry.kind,
                offset: entry.offset,
                size: entry.size,
                owner: entry.owner,
            };
        }
    }
    FileLockDescription {
        kind: FileLockKind::Unlock,
        offset: probe.offset,
        size: probe.size,
        owner: 0,
    }
}

/// 设置（或解除）区域锁
///
/// 非阻塞模式遇冲突返回 `TryAgain`；阻塞模式等待锁事件并重试，
/// 等待被信号打断时返回 `RestartAfterSignal`。
pub fn set_lock(
    file: &Arc<FileObject>,
    desc: &FileLockDescription,
    blocking: bool,
) -> KResult<()> {
    loop {
        let observed;
        {
            let _guard = file.lock.write();
            let mut locks = file.locks.lock();

            // 干跑：只探测冲突
            let conflict = desc.kind != FileLockKind::Unlock
                && locks.iter().any(|entry| conflicts(entry, desc));
            if !conflict {
                apply_lock(&mut locks, desc);
                drop(locks);
                file.lock_event.pulse();
                return Ok(());
            }
            if !blocking {
                return Err(KernelError::TryAgain);
            }
            observed = file.lock_event.current_generation();
        }
        file.lock_event
            .wait_for_change(observed, WAIT_FOREVER, true)
            .map_err(|_| KernelError::RestartAfterSignal)?;
    }
}

/// 实跑：调整同属主的重叠区域后插入新锁
fn apply_lock(locks: &mut alloc::vec::Vec<FileLockEntry>, desc: &FileLockDescription) {
    let new_start = desc.offset;
    let new_end = region_end(desc.offset, desc.size);

    let mut index = 0;
    while index < locks.len() {
        let entry = locks[index];
        if entry.owner != desc.owner
            || !regions_overlap(entry.offset, entry.size, desc.offset, desc.size)
        {
            index += 1;
            continue;
        }
        let entry_start = entry.offset;
        let entry_end = region_end(entry.offset, entry.size);

        if new_start <= entry_start && new_end >= entry_end {
            // 完全覆盖：移除
            locks.swap_remove(index);
            continue;
        }
        if entry_start < new_start && entry_end > new_end {
            // 严格包含：拆成左右两段
            let mut left = entry;
            left.size = new_start - entry_start;
            let right = FileLockEntry {
                kind: entry.kind,
                owner: entry.owner,
                offset: new_end,
                size: if entry_end == u64::MAX {
                    0
                } else {
                    entry_end - new_end
                },
            };
            locks[index] = left;
            locks.push(right);
            index += 1;
            continue;
        }
        if entry_start < new_start {
            // 左侧重叠：裁掉右边
            let mut trimmed = entry;
            trimmed.size = new_start - entry_start;
            locks[index] = trimmed;
        } else {
            // 右侧重叠：裁掉左边
            let mut trimmed = entry;
            trimmed.offset = new_end;
            trimmed.size = if entry_end == u64::MAX {
                0
            } else {
                entry_end - new_end
            };
            locks[index] = trimmed;
        }
        index += 1;
    }

    if desc.kind != FileLockKind::Unlock {
        locks.push(FileLockEntry {
            kind: desc.kind,
            owner: desc.owner,
            offset: desc.offset,
            size: desc.size,
        });
    }
}

/// 移除某任务在该文件上持有的全部区域锁（句柄关闭路径）
pub fn remove_file_locks(file: &FileObject, owner: TaskId) {
    let _guard = file.lock.write();
    let mut locks = file.locks.lock();
    let before = locks.len();
    locks.retain(|entry| entry.owner != owner);
    let changed = locks.len() != before;
    drop(locks);
    if changed {
        file.lock_event.pulse();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlap_predicate() {
        assert!(regions_overlap(0, 100, 50, 150));
        assert!(!regions_overlap(0, 100, 100, 50));
        // 长度 0：到文件尾
        assert!(regions_overlap(50, 0, 100, 10));
        assert!(!regions_overlap(50, 0, 0, 50));
        assert!(regions_overlap(0, 0, 0, 0));
    }

    #[test]
    fn test_apply_lock_split() {
        let mut locks = alloc::vec![FileLockEntry {
            kind: FileLockKind::Write,
            owner: 1,
            offset: 0,
            size: 100,
        }];
        // 同属主在中段解锁：拆成 [0,40) 和 [60,100)
        apply_lock(
            &mut locks,
            &FileLockDescription {
                kind: FileLockKind::Unlock,
                offset: 40,
                size: 20,
                owner: 1,
            },
        );
        assert_eq!(locks.len(), 2);
        assert!(locks.iter().any(|l| l.offset == 0 && l.size == 40));
        assert!(locks.iter().any(|l| l.offset == 60 && l.size == 40));
    }

    #[test]
    fn test_apply_lock_trim() {
        let mut locks = alloc::vec![FileLockEntry {
            kind: FileLockKind::Read,
            owner: 7,
            offset: 10,
            size: 30,
        }];
        // 覆盖右半：原锁裁剩 [10,20)，新写锁 [20,50)
        apply_lock(
            &mut locks,
            &FileLockDescription {
                kind: FileLockKind::Write,
                offset: 20,
                size: 30,
                owner: 7,
            },
        );
        assert_eq!(locks.len(), 2);
        assert!(
            locks
                .iter()
                .any(|l| l.offset == 10 && l.size == 10 && l.kind == FileLockKind::Read)
        );
        assert!(
            locks
                .iter()
                .any(|l| l.offset == 20 && l.size == 30 && l.kind == FileLockKind::Write)
        );
    }
}
