//! 帧索引: 帧号 → 字节偏移的稀疏表.
//!
//! 对标 mpg123 的 `frame_index`. 每隔 `step` 帧记录一次帧头偏移,
//! 仅在帧计数准确的顺序解码过程中填充, 帧号与偏移都严格递增.

use serde::{Deserialize, Serialize};
use tao_core::{TaoError, TaoResult};

/// 索引容量策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexPolicy {
    /// 固定容量, 写满后停止记录
    Fixed(usize),
    /// 写满后按增量扩容
    Growing(usize),
}

impl Default for IndexPolicy {
    fn default() -> Self {
        Self::Growing(128)
    }
}

/// 索引项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub frame: u64,
    pub offset: u64,
}

/// 帧索引
#[derive(Debug, Clone)]
pub struct FrameIndex {
    offsets: Vec<u64>,
    step: u64,
    policy: IndexPolicy,
    /// 下一个待记录的帧号
    next: u64,
}

impl FrameIndex {
    pub fn new(policy: IndexPolicy, step: u64) -> TaoResult<Self> {
        if step == 0 {
            return Err(TaoError::BadParameter("索引步长不能为 0".into()));
        }
        if policy == IndexPolicy::Growing(0) {
            return Err(TaoError::BadParameter("索引扩容增量不能为 0".into()));
        }
        let mut index = Self {
            offsets: Vec::new(),
            step,
            policy,
            next: 0,
        };
        index.reserve_initial()?;
        Ok(index)
    }

    fn reserve_initial(&mut self) -> TaoResult<()> {
        let want = match self.policy {
            IndexPolicy::Fixed(cap) | IndexPolicy::Growing(cap) => cap,
        };
        if self.offsets.capacity() < want {
            self.offsets
                .try_reserve_exact(want - self.offsets.len())
                .map_err(|e| TaoError::OutOfMemory(format!("帧索引 {want} 项: {e}")))?;
        }
        Ok(())
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn policy(&self) -> IndexPolicy {
        self.policy
    }

    /// 已记录项数
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// 下一个待记录的帧号
    pub fn next_frame(&self) -> u64 {
        self.next
    }

    /// 记录第 `frame` 帧的偏移, 返回是否记录
    pub fn add(&mut self, frame: u64, offset: u64) -> TaoResult<bool> {
        if frame != self.next {
            return Ok(false);
        }
        if self.offsets.last().is_some_and(|&last| offset <= last) {
            log::debug!("帧 {frame} 偏移 {offset} 未递增, 不记录");
            return Ok(false);
        }
        if self.offsets.len() == self.offsets.capacity() {
            match self.policy {
                IndexPolicy::Fixed(_) => return Ok(false),
                IndexPolicy::Growing(inc) => {
                    self.offsets
                        .try_reserve_exact(inc)
                        .map_err(|e| TaoError::OutOfMemory(format!("帧索引扩容 {inc} 项: {e}")))?;
                }
            }
        }
        if let IndexPolicy::Fixed(cap) = self.policy {
            if self.offsets.len() >= cap {
                return Ok(false);
            }
        }
        self.offsets.push(offset);
        self.next = self.offsets.len() as u64 * self.step;
        Ok(true)
    }

    /// 帧号不超过 `want` 的最后一项
    pub fn find(&self, want: u64) -> Option<IndexEntry> {
        if self.offsets.is_empty() {
            return None;
        }
        let i = ((want / self.step) as usize).min(self.offsets.len() - 1);
        Some(self.entry(i))
    }

    /// 最后一项
    pub fn last(&self) -> Option<IndexEntry> {
        (!self.offsets.is_empty()).then(|| self.entry(self.offsets.len() - 1))
    }

    fn entry(&self, i: usize) -> IndexEntry {
        IndexEntry {
            frame: i as u64 * self.step,
            offset: self.offsets[i],
        }
    }

    /// 全部索引项
    pub fn entries(&self) -> impl Iterator<Item = IndexEntry> + '_ {
        (0..self.offsets.len()).map(|i| self.entry(i))
    }

    /// 更换容量策略, 固定容量小于现有项数时截断尾部
    pub fn set_policy(&mut self, policy: IndexPolicy) -> TaoResult<()> {
        if policy == IndexPolicy::Growing(0) {
            return Err(TaoError::BadParameter("索引扩容增量不能为 0".into()));
        }
        if let IndexPolicy::Fixed(cap) = policy {
            self.offsets.truncate(cap);
            self.offsets.shrink_to(cap);
        }
        self.policy = policy;
        self.next = self.offsets.len() as u64 * self.step;
        self.reserve_initial()
    }

    /// 清空 (新曲目), 保留已分配空间
    pub fn reset(&mut self) {
        self.offsets.clear();
        self.next = 0;
    }
}
