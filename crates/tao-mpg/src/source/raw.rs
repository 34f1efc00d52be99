//! 原始帧注入字节源.
//!
//! 调用方每次 `feed` 一整帧 (含 4 字节帧头), 帧边界由调用方保证, 不做帧头搜索.

use std::collections::VecDeque;

use bytes::Bytes;
use tao_core::{TaoError, TaoResult};

use super::{ByteSource, SeekTarget, SourceKind};

/// 原始帧字节源
#[derive(Debug, Default)]
pub struct RawSource {
    frames: VecDeque<Bytes>,
    /// 队首帧内的读位置
    pos: usize,
    /// 已完整消费的字节数
    consumed: u64,
    finished: bool,
}

impl RawSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// 排队中的帧数
    pub fn queued(&self) -> usize {
        self.frames.len()
    }

    fn shortage(&self) -> TaoError {
        if self.finished {
            TaoError::Eof
        } else {
            TaoError::NeedMoreData
        }
    }
}

impl ByteSource for RawSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Raw
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> TaoResult<()> {
        let Some(front) = self.frames.front() else {
            return Err(self.shortage());
        };
        // 读取不跨越帧边界
        if self.pos + buf.len() > front.len() {
            return Err(TaoError::Stream(format!(
                "原始帧长度 {} 不足, 需要 {} 字节",
                front.len(),
                self.pos + buf.len()
            )));
        }
        buf.copy_from_slice(&front[self.pos..self.pos + buf.len()]);
        self.pos += buf.len();
        if self.pos == front.len() {
            self.consumed += front.len() as u64;
            self.frames.pop_front();
            self.pos = 0;
        }
        Ok(())
    }

    fn peek(&mut self, _ahead: u64, _buf: &mut [u8]) -> TaoResult<bool> {
        Ok(false)
    }

    fn skip(&mut self, n: u64) -> TaoResult<u64> {
        let Some(front) = self.frames.front() else {
            return Err(self.shortage());
        };
        let step = (front.len() - self.pos).min(n as usize);
        self.pos += step;
        if self.pos == front.len() {
            self.consumed += front.len() as u64;
            self.frames.pop_front();
            self.pos = 0;
        }
        Ok(step as u64)
    }

    fn seek_to(&mut self, offset: u64) -> TaoResult<SeekTarget> {
        // 原始模式没有历史, 丢弃排队的帧并由调用方从目标处重新注入
        self.frames.clear();
        self.pos = 0;
        self.consumed = offset;
        self.finished = false;
        Ok(SeekTarget::FeedFrom(offset))
    }

    fn tell(&self) -> u64 {
        self.consumed + self.pos as u64
    }

    fn feed(&mut self, data: &[u8]) -> TaoResult<()> {
        if data.len() < 4 {
            return Err(TaoError::BadParameter(format!(
                "原始帧至少包含 4 字节帧头, 实际 {} 字节",
                data.len()
            )));
        }
        self.frames.push_back(Bytes::copy_from_slice(data));
        Ok(())
    }

    fn finish(&mut self) {
        self.finished = true;
    }

    fn pending_frame_len(&self) -> Option<usize> {
        self.frames.front().map(|f| f.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_按帧读取() {
        let mut src = RawSource::new();
        src.feed(&[0xFF, 0xFB, 0x90, 0x64, 1, 2]).unwrap();
        src.feed(&[0xFF, 0xFB, 0x90, 0x64]).unwrap();
        assert_eq!(src.pending_frame_len(), Some(6));
        let mut head = [0u8; 4];
        src.read_exact(&mut head).unwrap();
        let mut body = [0u8; 2];
        src.read_exact(&mut body).unwrap();
        assert_eq!(body, [1, 2]);
        assert_eq!(src.queued(), 1);
        assert_eq!(src.tell(), 6);
    }

    #[test]
    fn test_拒绝过短帧() {
        let mut src = RawSource::new();
        assert!(src.feed(&[0xFF, 0xFB]).is_err());
        let mut head = [0u8; 4];
        assert!(matches!(
            src.read_exact(&mut head),
            Err(TaoError::NeedMoreData)
        ));
    }
}
