//! 流缓冲区
//!
//! 互斥锁保护的有界环形缓冲区，配一份就绪状态。管道与终端的
//! 两个方向各自持有一条流。环里保留一个哨兵字节区分满与空，
//! 默认 8192 字节容量即可用 8191 字节。
//!
//! 契约：
//! - 不超过 [`crate::config::ATOMIC_WRITE_SIZE`] 的写入不会与其它写入交错
//! - 读到 0 字节仅在写端断开时才意味着 EOF（以 `EndOfFile` 错误表达）
//! - 无读者的写入报 `BrokenPipe`；非阻塞且会阻塞的调用报 `TryAgain`

use alloc::vec;
use alloc::vec::Vec;

use sync::SpinLock;
use uapi::poll::PollEvents;

use crate::config::{ATOMIC_WRITE_SIZE, DEFAULT_STREAM_CAPACITY};
use crate::error::{KResult, KernelError};
use crate::io_state::IoState;

struct Ring {
    data: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
    readers: usize,
    writers: usize,
}

impl Ring {
    fn len(&self) -> usize {
        (self.write_pos + self.data.len() - self.read_pos) % self.data.len()
    }

    /// 可写空间；一个哨兵字节永远留空
    fn space(&self) -> usize {
        self.data.len() - 1 - self.len()
    }

    fn push(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.data[self.write_pos] = byte;
            self.write_pos = (self.write_pos + 1) % self.data.len();
        }
    }

    fn pop(&mut self, out: &mut [u8]) {
        for slot in out.iter_mut() {
            *slot = self.data[self.read_pos];
            self.read_pos = (self.read_pos + 1) % self.data.len();
        }
    }
}

/// 互斥保护的有界流缓冲区
pub struct StreamBuffer {
    ring: SpinLock<Ring>,
    io_state: IoState,
}

impl StreamBuffer {
    /// 以给定容量创建；实际可用容量比 `capacity` 少一个哨兵字节
    pub fn new(capacity: usize) -> Self {
        StreamBuffer {
            ring: SpinLock::new(Ring {
                data: vec![0; capacity],
                read_pos: 0,
                write_pos: 0,
                readers: 0,
                writers: 0,
            }),
            io_state: IoState::new(PollEvents::OUT),
        }
    }

    /// 以默认容量创建
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_STREAM_CAPACITY)
    }

    /// 就绪状态
    pub fn io_state(&self) -> &IoState {
        &self.io_state
    }

    /// 可用容量（不含哨兵字节）
    pub fn capacity(&self) -> usize {
        self.ring.lock().data.len() - 1
    }

    /// 登记一个读端
    pub fn add_reader(&self) {
        let mut ring = self.ring.lock();
        ring.readers += 1;
        drop(ring);
        self.refresh_events();
    }

    /// 登记一个写端
    pub fn add_writer(&self) {
        let mut ring = self.ring.lock();
        ring.writers += 1;
        drop(ring);
        self.refresh_events();
    }

    /// 注销一个读端；最后一个读端离开后写入报 `BrokenPipe`
    pub fn remove_reader(&self) {
        let mut ring = self.ring.lock();
        ring.readers -= 1;
        drop(ring);
        self.refresh_events();
    }

    /// 注销一个写端；最后一个写端离开且缓冲区变空后读端到达 EOF
    pub fn remove_writer(&self) {
        let mut ring = self.ring.lock();
        ring.writers -= 1;
        drop(ring);
        self.refresh_events();
    }

    fn refresh_events(&self) {
        let ring = self.ring.lock();
        let mut raise = PollEvents::empty();
        let mut clear = PollEvents::empty();

        if ring.len() > 0 {
            raise |= PollEvents::IN;
        } else {
            clear |= PollEvents::IN;
        }
        if ring.space() > 0 && ring.readers > 0 {
            raise |= PollEvents::OUT;
        } else {
            clear |= PollEvents::OUT;
        }
        if ring.writers == 0 {
            raise |= PollEvents::DISCONNECTED;
        } else {
            clear |= PollEvents::DISCONNECTED;
        }
        if ring.readers == 0 {
            raise |= PollEvents::ERROR;
        } else {
            clear |= PollEvents::ERROR;
        }
        drop(ring);

        self.io_state.clear(clear);
        self.io_state.raise(raise);
    }

    /// 读取至少一个字节
    ///
    /// 空缓冲区且写端全部断开时返回 `EndOfFile`；非阻塞且无数据时
    /// 返回 `TryAgain`；等待被信号打断时返回 `Interrupted`。
    pub fn read(&self, buffer: &mut [u8], non_blocking: bool, timeout_ms: u64) -> KResult<usize> {
        if buffer.is_empty() {
            return Ok(0);
        }
        loop {
            let observed;
            {
                let mut ring = self.ring.lock();
                let available = ring.len();
                if available > 0 {
                    let count = buffer.len().min(available);
                    ring.pop(&mut buffer[..count]);
                    drop(ring);
                    self.refresh_events();
                    return Ok(count);
                }
                if ring.writers == 0 {
                    return Err(KernelError::EndOfFile);
                }
                if non_blocking {
                    return Err(KernelError::TryAgain);
                }
                // 在持锁状态下取代数，防止解锁与等待之间的脉冲丢失
                observed = self.io_state.event.current_generation();
            }
            self.io_state.event.wait_for_change(observed, timeout_ms, true)?;
        }
    }

    /// 写入数据
    ///
    /// 长度不超过原子写上限的请求要么整体写入要么不写；更长的
    /// 请求按空间分段写入，可能返回部分计数。无读者时返回
    /// `BrokenPipe`（已有部分写入则返回部分计数）。
    pub fn write(&self, buffer: &[u8], non_blocking: bool, timeout_ms: u64) -> KResult<usize> {
        if buffer.is_empty() {
            return Ok(0);
        }
        let atomic = buffer.len() <= ATOMIC_WRITE_SIZE;
        let mut written = 0usize;

        loop {
            let observed;
            {
                let mut ring = self.ring.lock();
                if ring.readers == 0 {
                    return if written > 0 {
                        Ok(written)
                    } else {
                        Err(KernelError::BrokenPipe)
                    };
                }

                let space = ring.space();
                if atomic {
                    if space >= buffer.len() {
                        ring.push(buffer);
                        drop(ring);
                        self.refresh_events();
                        return Ok(buffer.len());
                    }
                } else if space > 0 {
                    let chunk = space.min(buffer.len() - written);
                    ring.push(&buffer[written..written + chunk]);
                    written += chunk;
                    drop(ring);
                    self.refresh_events();
                    if written == buffer.len() {
                        return Ok(written);
                    }
                    continue;
                }

                if non_blocking {
                    return if written > 0 {
                        Ok(written)
                    } else {
                        Err(KernelError::TryAgain)
                    };
                }
                observed = self.io_state.event.current_generation();
            }
            if let Err(err) = self.io_state.event.wait_for_change(observed, timeout_ms, true) {
                return if written > 0 {
                    Ok(written)
                } else {
                    Err(err.into())
                };
            }
        }
    }
}
