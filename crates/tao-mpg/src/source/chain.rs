//! 缓冲链.
//!
//! 对标 mpg123 `readers.c` 中的 bufferchain: 由若干 `Bytes` 块串成的只追加缓冲,
//! 记录链首在整个输入中的绝对偏移, 供推送模式与不可定位流的回看/预读使用.

use std::collections::VecDeque;

use bytes::Bytes;

/// 缓冲链
#[derive(Debug, Default)]
pub(crate) struct BufferChain {
    chunks: VecDeque<Bytes>,
    /// 链中数据总字节数
    size: usize,
    /// 读位置 (相对链首)
    pos: usize,
    /// 链首在输入中的绝对偏移
    fileoff: u64,
}

impl BufferChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一块数据
    pub fn append(&mut self, data: Bytes) {
        if data.is_empty() {
            return;
        }
        self.size += data.len();
        self.chunks.push_back(data);
    }

    /// 读位置之后可用的字节数
    pub fn available(&self) -> usize {
        self.size - self.pos
    }

    /// 当前绝对读位置
    pub fn tell(&self) -> u64 {
        self.fileoff + self.pos as u64
    }

    /// 链首绝对偏移
    pub fn start(&self) -> u64 {
        self.fileoff
    }

    /// 链尾绝对偏移 (下一块追加数据的位置)
    pub fn end(&self) -> u64 {
        self.fileoff + self.size as u64
    }

    /// 从链内相对位置 `at` 起复制数据, 返回是否复制完整
    fn copy_at(&self, mut at: usize, buf: &mut [u8]) -> bool {
        if at + buf.len() > self.size {
            return false;
        }
        let mut written = 0;
        for chunk in &self.chunks {
            if written == buf.len() {
                break;
            }
            if at >= chunk.len() {
                at -= chunk.len();
                continue;
            }
            let n = (chunk.len() - at).min(buf.len() - written);
            buf[written..written + n].copy_from_slice(&chunk[at..at + n]);
            written += n;
            at = 0;
        }
        written == buf.len()
    }

    /// 读满 `buf`; 数据不足时不消耗任何字节并返回 false
    pub fn read_exact(&mut self, buf: &mut [u8]) -> bool {
        if !self.copy_at(self.pos, buf) {
            return false;
        }
        self.pos += buf.len();
        true
    }

    /// 预读读位置之后 `ahead` 字节处的数据
    pub fn peek(&self, ahead: usize, buf: &mut [u8]) -> bool {
        self.copy_at(self.pos + ahead, buf)
    }

    /// 跳过至多 `n` 字节, 返回实际跳过数
    pub fn skip(&mut self, n: u64) -> u64 {
        let step = (self.available() as u64).min(n);
        self.pos += step as usize;
        step
    }

    /// 在已缓冲的历史范围内定位
    pub fn seek_within(&mut self, offset: u64) -> bool {
        if offset < self.fileoff || offset > self.end() {
            return false;
        }
        self.pos = (offset - self.fileoff) as usize;
        true
    }

    /// 丢弃读位置之前已完整消费的块
    pub fn forget(&mut self) {
        while let Some(front) = self.chunks.front() {
            if front.len() > self.pos {
                break;
            }
            let len = front.len();
            self.pos -= len;
            self.size -= len;
            self.fileoff += len as u64;
            self.chunks.pop_front();
        }
    }

    /// 清空链并把链首设为 `offset`
    pub fn reset_at(&mut self, offset: u64) {
        self.chunks.clear();
        self.size = 0;
        self.pos = 0;
        self.fileoff = offset;
    }
}
