//! 输入字节源抽象.
//!
//! 对标 mpg123 的 reader 层: 可随机访问的文件、不可定位的流、
//! 由调用方逐块推送的缓冲链 (feed), 以及调用方自行保证帧边界的原始帧注入 (raw).

mod chain;
mod feed;
mod file;
mod raw;
mod stream;

pub use feed::FeedSource;
pub use file::FileSource;
pub use raw::RawSource;
pub use stream::StreamSource;

use tao_core::{TaoError, TaoResult};

/// 字节源类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// 可随机访问的文件
    File,
    /// 不可定位的流 (管道, 网络)
    Stream,
    /// 推送模式缓冲链
    Feed,
    /// 原始帧注入, 不搜索帧头
    Raw,
}

/// 定位结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekTarget {
    /// 已定位到目标偏移
    Ready,
    /// 推送模式: 调用方需从该字节偏移开始重新提供数据
    FeedFrom(u64),
}

/// 字节源 trait
///
/// 所有读取都是原子的: 数据不足时不消耗任何字节.
pub trait ByteSource: Send {
    /// 字节源类别
    fn kind(&self) -> SourceKind;

    /// 读满 `buf`.
    ///
    /// 推送模式数据不足返回 `NeedMoreData`, 有限输入耗尽返回 `Eof`.
    fn read_exact(&mut self, buf: &mut [u8]) -> TaoResult<()>;

    /// 预读读位置之后 `ahead` 字节处的数据, 不移动读位置.
    ///
    /// 无法判断 (已到末尾或字节源不支持) 时返回 `Ok(false)`.
    fn peek(&mut self, ahead: u64, buf: &mut [u8]) -> TaoResult<bool>;

    /// 跳过至多 `n` 字节, 返回实际跳过的字节数
    fn skip(&mut self, n: u64) -> TaoResult<u64>;

    /// 定位到绝对字节偏移
    fn seek_to(&mut self, offset: u64) -> TaoResult<SeekTarget>;

    /// 下一个未读字节的绝对偏移
    fn tell(&self) -> u64;

    /// 释放已消费的历史数据
    fn forget(&mut self) {}

    /// 输入总长度 (如果可知)
    fn total_len(&self) -> Option<u64> {
        None
    }

    /// 是否支持任意定位
    fn is_seekable(&self) -> bool {
        false
    }

    /// 推送数据 (feed / raw 模式)
    fn feed(&mut self, _data: &[u8]) -> TaoResult<()> {
        Err(TaoError::Unsupported(format!(
            "{:?} 字节源不接受推送数据",
            self.kind()
        )))
    }

    /// 声明不再有后续数据
    fn finish(&mut self) {}

    /// raw 模式: 下一帧由调用方声明的长度
    fn pending_frame_len(&self) -> Option<usize> {
        None
    }
}

/// 读取 4 字节大端整数
pub(crate) fn read_u32_be(src: &mut dyn ByteSource) -> TaoResult<u32> {
    let mut buf = [0u8; 4];
    src.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

/// 读取 1 字节
pub(crate) fn read_u8(src: &mut dyn ByteSource) -> TaoResult<u8> {
    let mut buf = [0u8; 1];
    src.read_exact(&mut buf)?;
    Ok(buf[0])
}
