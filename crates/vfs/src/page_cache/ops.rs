//! 页缓存 I/O 路径
//!
//! 经缓存的读写按页拆分：未命中先分配物理页并从后备存储填充，
//! 排他页树锁下插入（输掉竞争就归还预分配页）。不经缓存的区间
//! 读写按设备路由：对象设备上的文件落在内存后备缓冲，其余走
//! 下游设备接口。

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use log::warn;

use crate::config::{
    CLEANER_MIN_DELAY_MS, FLUSH_CLEAN_STREAK_MAX, PAGE_CACHE_FLUSH_MAX, PAGE_SIZE,
};
use crate::error::{KResult, KernelError};
use crate::file_object::{FileObject, FileObjectFlags, SpecialIo, OBJECT_DEVICE};
use crate::ops::{device_ops, kernel_ops, memory_ops};
use crate::page_cache::{self, cleaner, entry::PageFlags, PageCacheEntry};

/// 不经缓存读取区间
pub fn uncached_read(file: &FileObject, offset: u64, buffer: &mut [u8]) -> KResult<usize> {
    if file.device_id == OBJECT_DEVICE {
        match file.special().as_deref() {
            Some(SpecialIo::Memory(content)) => {
                let content = content.lock();
                let start = (offset as usize).min(content.len());
                let end = (start + buffer.len()).min(content.len());
                buffer[..end - start].copy_from_slice(&content[start..end]);
                Ok(end - start)
            }
            _ => Ok(0),
        }
    } else {
        device_ops().read_range(file.device_id, file.file_id, offset, buffer)
    }
}

/// 不经缓存写入区间
pub fn uncached_write(file: &FileObject, offset: u64, buffer: &[u8]) -> KResult<usize> {
    if file.device_id == OBJECT_DEVICE {
        match file.special().as_deref() {
            Some(SpecialIo::Memory(content)) => {
                let mut content = content.lock();
                let end = offset as usize + buffer.len();
                if content.len() < end {
                    content.resize(end, 0);
                }
                content[offset as usize..end].copy_from_slice(buffer);
                Ok(buffer.len())
            }
            _ => Err(KernelError::NotSupported),
        }
    } else {
        device_ops().write_range(file.device_id, file.file_id, offset, buffer)
    }
}

/// 找到或建立 `page_offset` 处的缓存页
///
/// `fill` 为真时未命中页先从后备存储读满（短读部分补零）。
fn ensure_page(
    file: &Arc<FileObject>,
    page_offset: u64,
    is_write: bool,
    fill: bool,
) -> KResult<Arc<PageCacheEntry>> {
    if let Some(entry) = page_cache::lookup(file, page_offset, is_write) {
        return Ok(entry);
    }
    let physical = memory_ops()
        .allocate_page()
        .ok_or(KernelError::InsufficientResources)?;
    if fill {
        let mut content = vec![0u8; PAGE_SIZE];
        let read = uncached_read(file, page_offset, &mut content)?;
        content[read..].fill(0);
        memory_ops().write_page(physical, 0, &content);
    } else {
        memory_ops().write_page(physical, 0, &[0u8; PAGE_SIZE]);
    }
    let (entry, inserted) = page_cache::create_or_lookup(file, page_offset, physical, None, is_write);
    if !inserted {
        // 竞争输家归还预分配页
        memory_ops().free_page(physical);
    }
    Ok(entry)
}

/// 经缓存读
///
/// 读到文件尾为止；起点在尾后返回零字节。
pub fn read_cached(file: &Arc<FileObject>, offset: u64, buffer: &mut [u8]) -> KResult<usize> {
    let size = file.size();
    if offset >= size || buffer.is_empty() {
        return Ok(0);
    }
    let end = size.min(offset + buffer.len() as u64);
    let mut position = offset;
    while position < end {
        let page_offset = page_cache::page_align_down(position);
        let in_page = (position - page_offset) as usize;
        let chunk = ((end - position) as usize).min(PAGE_SIZE - in_page);
        let entry = ensure_page(file, page_offset, false, true)?;
        let start = (position - offset) as usize;
        entry.read(in_page, &mut buffer[start..start + chunk]);
        page_cache::release_entry(entry);
        position += chunk as u64;
    }
    Ok((end - offset) as usize)
}

/// 经缓存写
///
/// 普通写入方在脏页超限时停下来，等清理线程追上再继续；清理
/// 线程自己走冲刷路径回写，不经此处。写过文件尾即扩大小。
pub fn write_cached(file: &Arc<FileObject>, offset: u64, buffer: &[u8]) -> KResult<usize> {
    if buffer.is_empty() {
        return Ok(0);
    }
    while page_cache::is_too_dirty() {
        cleaner::schedule_cleaning(CLEANER_MIN_DELAY_MS);
        cleaner::wait_for_progress(CLEANER_MIN_DELAY_MS)?;
    }

    let end = offset + buffer.len() as u64;
    let mut position = offset;
    while position < end {
        let page_offset = page_cache::page_align_down(position);
        let in_page = (position - page_offset) as usize;
        let chunk = ((end - position) as usize).min(PAGE_SIZE - in_page);
        // 整页覆盖不必预读
        let fill = !(in_page == 0 && chunk == PAGE_SIZE) && page_offset < file.size();
        let entry = ensure_page(file, page_offset, true, fill)?;
        let start = (position - offset) as usize;
        entry.write(in_page, &buffer[start..start + chunk]);
        page_cache::mark_dirty(&entry, in_page, chunk);
        page_cache::release_entry(entry);
        position += chunk as u64;
    }
    file.extend_size(end);
    Ok(buffer.len())
}

/// 冲刷文件的脏页区间
///
/// `size` 为零表示到文件尾。从最近的脏页起聚集连续的一段（容忍
/// 不超过四页的干净插段，最多 128 KiB），标净置 BUSY 后在树锁外
/// 一次性写出；失败把未写出的尾部重新标脏。清理线程在内存紧张
/// 且已产出足够干净页时得到 `TryAgain`，转去做回收。
pub fn flush(file: &Arc<FileObject>, offset: u64, size: u64, from_cleaner: bool) -> KResult<()> {
    let limit = if size == 0 {
        u64::MAX
    } else {
        offset.saturating_add(size)
    };
    let tunables = page_cache::tunables();
    let mut position = page_cache::page_align_down(offset);
    let mut cleaned = 0usize;

    loop {
        // 聚集阶段：树锁内挑出一段连续区间
        let mut batch: Vec<Arc<PageCacheEntry>> = Vec::new();
        {
            let pages = file.pages.read();
            let mut clean_streak = 0usize;
            let mut expected: Option<u64> = None;
            for (key, entry) in pages.range(position..limit) {
                if batch.len() * PAGE_SIZE >= PAGE_CACHE_FLUSH_MAX {
                    break;
                }
                if let Some(next) = expected {
                    if *key != next {
                        if batch.is_empty() {
                            expected = None;
                        } else {
                            break;
                        }
                    }
                }
                let dirty = entry.owner().flag_set(PageFlags::DIRTY);
                if !dirty {
                    if batch.is_empty() {
                        continue;
                    }
                    clean_streak += 1;
                    if clean_streak > FLUSH_CLEAN_STREAK_MAX {
                        break;
                    }
                } else {
                    clean_streak = 0;
                }
                entry.acquire();
                entry.set_flags(PageFlags::BUSY);
                batch.push(entry.clone());
                expected = Some(*key + PAGE_SIZE as u64);
            }
            // 干净尾巴不值得写
            while let Some(last) = batch.last() {
                if last.owner().flag_set(PageFlags::DIRTY) {
                    break;
                }
                if let Some(entry) = batch.pop() {
                    entry.clear_flags(PageFlags::BUSY);
                    page_cache::release_entry(entry);
                }
            }
        }
        let run = match (batch.first(), batch.last()) {
            (Some(first), Some(last)) => (first.offset(), last.offset() + PAGE_SIZE as u64),
            _ => break,
        };
        for entry in &batch {
            page_cache::mark_clean(entry, false);
        }

        // 写出阶段：树锁外组装缓冲，一次写出（夹到文件大小）
        let file_size = file.size();
        let write_end = run.1.min(file_size).max(run.0);
        let mut assembled = vec![0u8; (run.1 - run.0) as usize];
        for entry in &batch {
            let start = (entry.offset() - run.0) as usize;
            entry.read(0, &mut assembled[start..start + PAGE_SIZE]);
        }
        let write_result = if write_end > run.0 {
            uncached_write(file, run.0, &assembled[..(write_end - run.0) as usize]).map(|_| ())
        } else {
            Ok(())
        };

        // 收尾阶段：清 BUSY，被逐出的项移交销毁
        let mut evicted: Vec<Arc<PageCacheEntry>> = Vec::new();
        {
            let mut pages = file.pages.write();
            for entry in &batch {
                entry.clear_flags(PageFlags::BUSY);
                if entry.flag_set(PageFlags::EVICTED) {
                    if pages.remove(&entry.offset()).is_some() {
                        evicted.push(entry.clone());
                    }
                }
            }
        }
        if let Err(error) = &write_result {
            warn!(
                "vfs: flush of device {} file {} failed: {:?}",
                file.device_id, file.file_id, error
            );
            // 未落盘的内容重新标脏
            for entry in &batch {
                if !entry.flag_set(PageFlags::EVICTED) {
                    page_cache::mark_dirty(entry, 0, 0);
                }
            }
        } else {
            for entry in &batch {
                if entry.lru_tick().load(core::sync::atomic::Ordering::Acquire) == 0
                    && !entry.flag_set(PageFlags::EVICTED)
                {
                    page_cache::mark_clean(entry, true);
                }
            }
        }
        cleaned += batch.len();
        for entry in batch {
            page_cache::release_entry(entry);
        }
        page_cache::destroy_entries(evicted, from_cleaner);
        write_result?;

        if from_cleaner
            && cleaned >= tunables.low_mem_clean_minimum
            && memory_ops().memory_warning_level() > 0
        {
            return Err(KernelError::TryAgain);
        }
        position = run.1;
    }

    if offset == 0 && size == 0 {
        file.clear_flags(FileObjectFlags::DIRTY);
    }
    Ok(())
}

/// 回写待持久化的文件属性
pub fn flush_properties(file: &Arc<FileObject>) -> KResult<()> {
    if !file.clear_flags(FileObjectFlags::DIRTY_PROPERTIES) {
        return Ok(());
    }
    if file.device_id == OBJECT_DEVICE {
        return Ok(());
    }
    let properties = file.properties();
    if let Err(error) = device_ops().write_properties(file.device_id, &properties) {
        file.set_flags(FileObjectFlags::DIRTY_PROPERTIES);
        return Err(error);
    }
    Ok(())
}

/// 截断文件到 `size`
///
/// 通知后备存储、收掉尾后的缓存页、抹掉末页越界部分并更新时间。
pub fn truncate_file(file: &Arc<FileObject>, size: u64) -> KResult<()> {
    if file.device_id == OBJECT_DEVICE {
        if let Some(SpecialIo::Memory(content)) = file.special().as_deref() {
            let mut content = content.lock();
            content.resize(size as usize, 0);
        }
    } else {
        device_ops().truncate(file.device_id, file.file_id, size)?;
    }
    file.set_size(size);
    page_cache::evict_file(file, page_cache::page_align_down(size.saturating_add(PAGE_SIZE as u64 - 1)));
    // 末页越过新尾的部分清零
    let tail = size % PAGE_SIZE as u64;
    if tail != 0 {
        let page_offset = page_cache::page_align_down(size);
        if let Some(entry) = page_cache::lookup(file, page_offset, true) {
            let zeroes = vec![0u8; PAGE_SIZE - tail as usize];
            entry.write(tail as usize, &zeroes);
            page_cache::mark_dirty(&entry, tail as usize, zeroes.len());
            page_cache::release_entry(entry);
        }
    }
    let now = kernel_ops().timespec_now();
    file.update_metadata(|metadata| {
        metadata.modified_time = now;
        metadata.status_change_time = now;
    });
    Ok(())
}
