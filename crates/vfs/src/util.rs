//! 公共工具：名字散列与 LRU 列表
//!
//! 路径项以名字字节（不含结尾符）的 CRC-32 作为预计算散列；
//! 比较是逐字节精确的，非 ASCII 名字按不透明字节处理。

use alloc::collections::BTreeMap;

/// CRC-32（反射多项式 0xEDB88320）的半字节查找表
const CRC32_NIBBLE: [u32; 16] = [
    0x0000_0000,
    0x1db7_1064,
    0x3b6e_20c8,
    0x26d9_30ac,
    0x76dc_4190,
    0x6b6b_51f4,
    0x4db2_6158,
    0x5005_713c,
    0xedb8_8320,
    0xf00f_9344,
    0xd6d6_a3e8,
    0xcb61_b38c,
    0x9b64_c2b0,
    0x86d3_d2d4,
    0xa00a_e278,
    0xbdbd_f21c,
];

/// 计算名字字节的 CRC-32 散列
pub fn name_hash(name: &[u8]) -> u32 {
    let mut crc = !0u32;
    for &byte in name {
        crc = (crc >> 4) ^ CRC32_NIBBLE[((crc ^ byte as u32) & 0xf) as usize];
        crc = (crc >> 4) ^ CRC32_NIBBLE[((crc ^ (byte >> 4) as u32) & 0xf) as usize];
    }
    !crc
}

/// 以单调递增刻度为键的 LRU 列表
///
/// 刻度越小越旧；`push_back` 返回的刻度交由元素保存，之后可用
/// 它 O(log n) 地把元素从列表中摘走。刻度 0 保留为"不在列表中"。
#[derive(Debug)]
pub struct LruList<T> {
    entries: BTreeMap<u64, T>,
    next_tick: u64,
}

impl<T> LruList<T> {
    /// 创建空列表
    pub const fn new() -> Self {
        LruList {
            entries: BTreeMap::new(),
            next_tick: 1,
        }
    }

    /// 追加到尾部（最新端），返回分配的刻度
    pub fn push_back(&mut self, value: T) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        self.entries.insert(tick, value);
        tick
    }

    /// 按刻度摘除
    pub fn remove(&mut self, tick: u64) -> Option<T> {
        self.entries.remove(&tick)
    }

    /// 取走头部（最旧端）
    pub fn pop_front(&mut self) -> Option<(u64, T)> {
        let tick = *self.entries.keys().next()?;
        self.entries.remove(&tick).map(|v| (tick, v))
    }

    /// 元素个数
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 自旧向新遍历
    pub fn iter(&self) -> impl Iterator<Item = (&u64, &T)> {
        self.entries.iter()
    }
}

impl<T> Default for LruList<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_hash_matches_reference() {
        // 标准 CRC-32 校验值："123456789" -> 0xCBF43926
        assert_eq!(name_hash(b"123456789"), 0xcbf4_3926);
        assert_eq!(name_hash(b""), 0);
    }

    #[test]
    fn test_name_hash_distinguishes_bytes() {
        assert_ne!(name_hash(b"foo"), name_hash(b"Foo"));
        assert_ne!(name_hash(b"a"), name_hash(b"a\0"));
    }

    #[test]
    fn test_lru_order() {
        let mut lru = LruList::new();
        let a = lru.push_back('a');
        let b = lru.push_back('b');
        let c = lru.push_back('c');
        assert_eq!(lru.len(), 3);

        assert_eq!(lru.remove(b), Some('b'));
        assert_eq!(lru.pop_front(), Some((a, 'a')));
        assert_eq!(lru.pop_front(), Some((c, 'c')));
        assert!(lru.is_empty());
    }
}
