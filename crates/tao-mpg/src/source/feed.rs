//! 推送模式字节源.
//!
//! 调用方以任意分块调用 `feed` 注入数据; 定位时若目标仍在缓冲历史中则直接回放,
//! 否则清空缓冲并告知调用方需从哪个字节偏移重新提供数据.

use bytes::Bytes;
use tao_core::{TaoError, TaoResult};

use super::chain::BufferChain;
use super::{ByteSource, SeekTarget, SourceKind};

/// 推送模式字节源
#[derive(Debug, Default)]
pub struct FeedSource {
    chain: BufferChain,
    /// 调用方已声明输入结束
    finished: bool,
}

impl FeedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已缓冲但尚未读取的字节数
    pub fn buffered(&self) -> usize {
        self.chain.available()
    }

    fn shortage(&self) -> TaoError {
        if self.finished {
            TaoError::Eof
        } else {
            TaoError::NeedMoreData
        }
    }
}

impl ByteSource for FeedSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Feed
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> TaoResult<()> {
        if self.chain.read_exact(buf) {
            Ok(())
        } else {
            Err(self.shortage())
        }
    }

    fn peek(&mut self, ahead: u64, buf: &mut [u8]) -> TaoResult<bool> {
        if self.chain.peek(ahead as usize, buf) {
            return Ok(true);
        }
        if self.finished {
            Ok(false)
        } else {
            Err(TaoError::NeedMoreData)
        }
    }

    fn skip(&mut self, n: u64) -> TaoResult<u64> {
        let step = self.chain.skip(n);
        if step == 0 && n > 0 {
            return Err(self.shortage());
        }
        Ok(step)
    }

    fn seek_to(&mut self, offset: u64) -> TaoResult<SeekTarget> {
        if self.chain.seek_within(offset) {
            return Ok(SeekTarget::Ready);
        }
        log::debug!("推送缓冲中没有偏移 {offset}, 需要调用方重新提供数据");
        self.chain.reset_at(offset);
        self.finished = false;
        Ok(SeekTarget::FeedFrom(offset))
    }

    fn tell(&self) -> u64 {
        self.chain.tell()
    }

    fn forget(&mut self) {
        self.chain.forget();
    }

    fn feed(&mut self, data: &[u8]) -> TaoResult<()> {
        let mut owned = Vec::new();
        owned.try_reserve_exact(data.len()).map_err(|e| {
            TaoError::OutOfMemory(format!("推送缓冲扩展 {} 字节失败: {e}", data.len()))
        })?;
        owned.extend_from_slice(data);
        self.chain.append(Bytes::from(owned));
        Ok(())
    }

    fn finish(&mut self) {
        self.finished = true;
    }
}
