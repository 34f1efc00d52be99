//! 不可定位的流字节源.
//!
//! 读取经缓冲链中转, 以支持预读和在保留历史内回看. 设置超时后,
//! 读取由后台线程完成, 单次等待超过超时即视为致命的码流错误.

use std::io::{self, Read};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use tao_core::{TaoError, TaoResult};

use super::chain::BufferChain;
use super::{ByteSource, SeekTarget, SourceKind};

/// 单次读取块大小 (16 KB)
const CHUNK_SIZE: usize = 16 * 1024;

/// 后台读取线程与主线程之间最多排队的块数
const PUMP_QUEUE: usize = 8;

enum Input {
    /// 在调用线程上直接读取
    Direct(Box<dyn Read + Send>),
    /// 后台线程读取, 主线程带超时等待
    Pumped {
        rx: Receiver<io::Result<Bytes>>,
        timeout: Duration,
    },
}

/// 流字节源
pub struct StreamSource {
    chain: BufferChain,
    input: Input,
    eof: bool,
}

impl StreamSource {
    /// 在调用线程上直接读取 (可能无限期阻塞)
    pub fn new(reader: impl Read + Send + 'static) -> Self {
        Self {
            chain: BufferChain::new(),
            input: Input::Direct(Box::new(reader)),
            eof: false,
        }
    }

    /// 由后台线程读取, 单次等待超过 `timeout` 返回码流错误
    pub fn with_timeout(reader: impl Read + Send + 'static, timeout: Duration) -> TaoResult<Self> {
        let (tx, rx) = mpsc::sync_channel(PUMP_QUEUE);
        thread::Builder::new()
            .name("tao-mpg-stream".into())
            .spawn(move || {
                let mut reader = reader;
                let mut buf = vec![0u8; CHUNK_SIZE];
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            if tx.send(Ok(Bytes::copy_from_slice(&buf[..n]))).is_err() {
                                break;
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => {
                            let _ = tx.send(Err(e));
                            break;
                        }
                    }
                }
            })?;
        Ok(Self {
            chain: BufferChain::new(),
            input: Input::Pumped { rx, timeout },
            eof: false,
        })
    }

    /// 读取一块数据追加到缓冲链
    fn fetch_chunk(&mut self) -> TaoResult<()> {
        match &mut self.input {
            Input::Direct(reader) => {
                let mut buf = vec![0u8; CHUNK_SIZE];
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) => {
                            self.eof = true;
                            return Ok(());
                        }
                        Ok(n) => {
                            buf.truncate(n);
                            self.chain.append(Bytes::from(buf));
                            return Ok(());
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => return Err(e.into()),
                    }
                }
            }
            Input::Pumped { rx, timeout } => match rx.recv_timeout(*timeout) {
                Ok(Ok(chunk)) => {
                    self.chain.append(chunk);
                    Ok(())
                }
                Ok(Err(e)) => Err(e.into()),
                Err(RecvTimeoutError::Timeout) => {
                    log::warn!("流读取超时 ({timeout:?})");
                    Err(TaoError::Stream(format!("读取超时 ({timeout:?})")))
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.eof = true;
                    Ok(())
                }
            },
        }
    }

    /// 保证缓冲链中至少有 `min` 字节可读 (除非流已结束)
    fn fill(&mut self, min: usize) -> TaoResult<()> {
        while self.chain.available() < min && !self.eof {
            self.fetch_chunk()?;
        }
        Ok(())
    }
}

impl ByteSource for StreamSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Stream
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> TaoResult<()> {
        self.fill(buf.len())?;
        if self.chain.read_exact(buf) {
            Ok(())
        } else {
            Err(TaoError::Eof)
        }
    }

    fn peek(&mut self, ahead: u64, buf: &mut [u8]) -> TaoResult<bool> {
        self.fill(ahead as usize + buf.len())?;
        Ok(self.chain.peek(ahead as usize, buf))
    }

    fn skip(&mut self, n: u64) -> TaoResult<u64> {
        let mut left = n;
        while left > 0 {
            if self.chain.available() == 0 {
                self.fill(1)?;
                if self.chain.available() == 0 {
                    break;
                }
            }
            left -= self.chain.skip(left);
        }
        Ok(n - left)
    }

    fn seek_to(&mut self, offset: u64) -> TaoResult<SeekTarget> {
        if self.chain.seek_within(offset) {
            return Ok(SeekTarget::Ready);
        }
        if offset < self.chain.start() {
            return Err(TaoError::Unsupported(format!(
                "流不可回退定位到 {offset} (最早保留 {})",
                self.chain.start()
            )));
        }
        // 向前定位: 读取并丢弃
        self.chain.seek_within(self.chain.end());
        let want = offset - self.chain.tell();
        let got = self.skip(want)?;
        if got < want {
            return Err(TaoError::SeekOutOfRange {
                target: offset,
                limit: self.chain.tell(),
            });
        }
        Ok(SeekTarget::Ready)
    }

    fn tell(&self) -> u64 {
        self.chain.tell()
    }

    fn forget(&mut self) {
        self.chain.forget();
    }
}
