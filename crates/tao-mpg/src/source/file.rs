//! 可随机访问的文件字节源.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use tao_core::{TaoError, TaoResult};

use super::{ByteSource, SeekTarget, SourceKind};

/// 默认缓冲区大小 (32 KB)
const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

/// 文件字节源
///
/// 长度在打开时确定, 末尾不足一次读取的数据视为干净结束 (`Eof`).
pub struct FileSource<R: Read + Seek + Send> {
    inner: R,
    /// 读缓冲区
    buffer: Vec<u8>,
    /// 缓冲区首字节的绝对偏移
    buf_start: u64,
    /// 缓冲区中的有效数据长度
    buf_len: usize,
    /// 缓冲区当前读取位置
    buf_pos: usize,
    /// 文件总长度
    len: u64,
}

impl FileSource<File> {
    /// 从文件路径打开
    pub fn open(path: impl AsRef<Path>) -> TaoResult<Self> {
        let file = File::open(path)?;
        Self::new(file)
    }
}

impl<R: Read + Seek + Send> FileSource<R> {
    /// 包装任意可定位读取器
    pub fn new(mut inner: R) -> TaoResult<Self> {
        let len = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(0))?;
        Ok(Self {
            inner,
            buffer: vec![0u8; DEFAULT_BUFFER_SIZE],
            buf_start: 0,
            buf_len: 0,
            buf_pos: 0,
            len,
        })
    }

    fn remaining(&self) -> u64 {
        self.len.saturating_sub(self.tell())
    }

    /// 从当前位置重新填充缓冲区
    fn refill(&mut self) -> TaoResult<()> {
        let pos = self.tell();
        self.inner.seek(SeekFrom::Start(pos))?;
        let n = self.inner.read(&mut self.buffer)?;
        if n == 0 {
            return Err(TaoError::Eof);
        }
        self.buf_start = pos;
        self.buf_len = n;
        self.buf_pos = 0;
        Ok(())
    }

    /// 使缓冲区失效并把读位置设为 `offset`
    fn reposition(&mut self, offset: u64) {
        let buf_end = self.buf_start + self.buf_len as u64;
        if offset >= self.buf_start && offset <= buf_end {
            self.buf_pos = (offset - self.buf_start) as usize;
        } else {
            self.buf_start = offset;
            self.buf_len = 0;
            self.buf_pos = 0;
        }
    }
}

impl<R: Read + Seek + Send> ByteSource for FileSource<R> {
    fn kind(&self) -> SourceKind {
        SourceKind::File
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> TaoResult<()> {
        if (buf.len() as u64) > self.remaining() {
            return Err(TaoError::Eof);
        }
        let mut total_read = 0;
        while total_read < buf.len() {
            let buffered = self.buf_len - self.buf_pos;
            if buffered > 0 {
                let to_copy = buffered.min(buf.len() - total_read);
                buf[total_read..total_read + to_copy]
                    .copy_from_slice(&self.buffer[self.buf_pos..self.buf_pos + to_copy]);
                self.buf_pos += to_copy;
                total_read += to_copy;
            } else {
                self.refill()?;
            }
        }
        Ok(())
    }

    fn peek(&mut self, ahead: u64, buf: &mut [u8]) -> TaoResult<bool> {
        if ahead + buf.len() as u64 > self.remaining() {
            return Ok(false);
        }
        let start = self.buf_pos + ahead as usize;
        if start + buf.len() <= self.buf_len {
            buf.copy_from_slice(&self.buffer[start..start + buf.len()]);
            return Ok(true);
        }
        // 超出缓冲区: 直接读取底层, 下次 refill 会重新定位
        self.inner.seek(SeekFrom::Start(self.tell() + ahead))?;
        self.inner.read_exact(buf)?;
        Ok(true)
    }

    fn skip(&mut self, n: u64) -> TaoResult<u64> {
        let step = n.min(self.remaining());
        self.reposition(self.tell() + step);
        Ok(step)
    }

    fn seek_to(&mut self, offset: u64) -> TaoResult<SeekTarget> {
        if offset > self.len {
            return Err(TaoError::SeekOutOfRange {
                target: offset,
                limit: self.len,
            });
        }
        self.reposition(offset);
        Ok(SeekTarget::Ready)
    }

    fn tell(&self) -> u64 {
        self.buf_start + self.buf_pos as u64
    }

    fn total_len(&self) -> Option<u64> {
        Some(self.len)
    }

    fn is_seekable(&self) -> bool {
        true
    }
}
