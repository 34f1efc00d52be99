//! 帧同步与帧读取.
//!
//! 从字节源中找出字节对齐的 MPEG 音频帧头并读出整帧数据.
//! 帧头非法时逐字节向前滑动 (重同步), 超过配置的字节上限即报告致命码流错误.
//! 推送模式下数据不足时保存搜索状态, 补充数据后从原处继续, 不会丢失已读帧头.

use tao_core::{TaoError, TaoResult};

use crate::header::FrameHeader;
use crate::source::{ByteSource, SourceKind, read_u8, read_u32_be};

/// "ID3" + 主版本号所在字节
const ID3V2_MAGIC: u32 = 0x0049_4433;
/// "TAG"
const ID3V1_MAGIC: u32 = 0x0054_4147;
/// 自由格式帧体搜索范围
const FREE_FORMAT_MIN: u64 = 16;
const FREE_FORMAT_MAX: u64 = 4096;

/// 已定位的帧
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocatedFrame {
    pub header: FrameHeader,
    /// 整帧字节数 (含帧头)
    pub size: usize,
    /// 帧头在输入中的绝对偏移
    pub offset: u64,
    /// 是否经过重同步才找到
    pub resynced: bool,
}

/// 帧头搜索进度
#[derive(Debug, Clone, Copy)]
struct Search {
    head: u32,
    offset: u64,
    skipped: usize,
}

/// 帧同步器
#[derive(Debug)]
pub struct Framer {
    resync_limit: Option<usize>,
    no_resync: bool,
    quiet: bool,
    /// 首次锁定的帧头
    firsthead: Option<u32>,
    /// 上一个完整读出的帧头
    oldhead: Option<u32>,
    /// 自由格式帧长 (不含填充)
    freeformat_size: Option<usize>,
    search: Option<Search>,
    /// 帧头已定位但帧体尚未读完
    pending: Option<LocatedFrame>,
    /// 待跳过的标签字节
    skip_left: u64,
    resyncs: u64,
    /// 剩余静默重同步帧数
    silent_frames: u32,
}

impl Framer {
    pub fn new(resync_limit: Option<usize>, no_resync: bool, quiet: bool) -> Self {
        Self {
            resync_limit,
            no_resync,
            quiet,
            firsthead: None,
            oldhead: None,
            freeformat_size: None,
            search: None,
            pending: None,
            skip_left: 0,
            resyncs: 0,
            silent_frames: 0,
        }
    }

    /// 完全重置 (新曲目)
    pub fn reset(&mut self) {
        *self = Self::new(self.resync_limit, self.no_resync, self.quiet);
    }

    /// 定位后重置搜索状态, 保留首帧头与自由格式帧长
    pub fn reset_for_seek(&mut self) {
        self.search = None;
        self.pending = None;
        self.skip_left = 0;
    }

    /// 清除锁定的帧头, 下一帧重新做首次锁定校验
    pub fn unlock(&mut self) {
        self.firsthead = None;
        self.oldhead = None;
    }

    /// 接下来 `frames` 帧内的重同步不发出警告
    pub fn silence_resync(&mut self, frames: u32) {
        self.silent_frames = frames;
    }

    /// 初始锁定后的重同步次数
    pub fn resync_count(&self) -> u64 {
        self.resyncs
    }

    /// 是否已锁定过首帧
    pub fn is_locked(&self) -> bool {
        self.firsthead.is_some()
    }

    /// 读取下一帧到 `buf` (含帧头)
    pub fn next_frame(
        &mut self,
        src: &mut dyn ByteSource,
        buf: &mut Vec<u8>,
    ) -> TaoResult<LocatedFrame> {
        let located = match self.pending {
            Some(located) => located,
            None => {
                let located = self.locate(src)?;
                self.pending = Some(located);
                located
            }
        };

        buf.clear();
        if buf.capacity() < located.size {
            buf.try_reserve(located.size - buf.len()).map_err(|e| {
                TaoError::OutOfMemory(format!("帧缓冲 {} 字节: {e}", located.size))
            })?;
        }
        buf.extend_from_slice(&located.header.raw.to_be_bytes());
        buf.resize(located.size, 0);
        match src.read_exact(&mut buf[4..]) {
            Ok(()) => {}
            Err(TaoError::NeedMoreData) => return Err(TaoError::NeedMoreData),
            Err(TaoError::Eof) => {
                self.pending = None;
                log::debug!("末帧在偏移 {} 处被截断, 视为流结束", located.offset);
                return Err(TaoError::Eof);
            }
            Err(e) => {
                self.pending = None;
                return Err(e);
            }
        }

        self.pending = None;
        self.oldhead = Some(located.header.raw);
        self.silent_frames = self.silent_frames.saturating_sub(1);
        Ok(located)
    }

    /// 跳过尚未跳完的标签数据
    fn drain_skip(&mut self, src: &mut dyn ByteSource) -> TaoResult<()> {
        while self.skip_left > 0 {
            let n = src.skip(self.skip_left)?;
            if n == 0 {
                return Err(TaoError::Eof);
            }
            self.skip_left -= n;
        }
        Ok(())
    }

    fn locate(&mut self, src: &mut dyn ByteSource) -> TaoResult<LocatedFrame> {
        if src.kind() == SourceKind::Raw {
            return self.locate_raw(src);
        }
        loop {
            self.drain_skip(src)?;
            let mut search = match self.search.take() {
                Some(search) => search,
                None => {
                    let offset = src.tell();
                    let head = read_u32_be(src)?;
                    Search {
                        head,
                        offset,
                        skipped: 0,
                    }
                }
            };
            match self.examine(src, &mut search) {
                Ok(Some(located)) => return Ok(located),
                Ok(None) => continue,
                Err(TaoError::NeedMoreData) => {
                    self.search = Some(search);
                    return Err(TaoError::NeedMoreData);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// 从 `search.head` 开始检查并滑动, 找到帧返回 Some, 遇到标签返回 None
    fn examine(
        &mut self,
        src: &mut dyn ByteSource,
        search: &mut Search,
    ) -> TaoResult<Option<LocatedFrame>> {
        loop {
            let head = search.head;
            if head >> 8 == ID3V2_MAGIC {
                let mut tag = [0u8; 6];
                if src.peek(0, &mut tag)? && tag[2..].iter().all(|b| b & 0x80 == 0) {
                    let size = tag[2..]
                        .iter()
                        .fold(0u64, |acc, &b| (acc << 7) | u64::from(b));
                    let footer = if tag[1] & 0x10 != 0 { 10 } else { 0 };
                    log::debug!("跳过 ID3v2 标签: {} 字节", size + 10 + footer);
                    self.skip_left = 6 + size + footer;
                    return Ok(None);
                }
            } else if head >> 8 == ID3V1_MAGIC {
                log::debug!("跳过 ID3v1 标签");
                self.skip_left = 124;
                return Ok(None);
            }

            if FrameHeader::is_candidate(head) {
                if let Some(located) = self.accept(src, search)? {
                    return Ok(Some(located));
                }
            }

            if self.no_resync && self.firsthead.is_some() {
                return Err(TaoError::Stream(format!(
                    "偏移 {} 处帧头非法且已禁用重同步",
                    search.offset
                )));
            }
            if let Some(limit) = self.resync_limit {
                if search.skipped >= limit {
                    return Err(TaoError::Stream(format!(
                        "跳过 {limit} 字节仍未找到合法帧头, 放弃重同步"
                    )));
                }
            }
            let b = read_u8(src)?;
            search.head = (head << 8) | u32::from(b);
            search.offset += 1;
            search.skipped += 1;
        }
    }

    /// 校验候选帧头, 合格则返回定位结果
    fn accept(
        &mut self,
        src: &mut dyn ByteSource,
        search: &Search,
    ) -> TaoResult<Option<LocatedFrame>> {
        let header = FrameHeader::parse(search.head)?;
        let reference = self.oldhead.or(self.firsthead);
        if search.skipped > 0 {
            if let Some(reference) = reference {
                if !header.is_compatible(reference) {
                    return Ok(None);
                }
            }
        }

        let size = match header.frame_size() {
            Some(size) => size,
            None => match self.freeformat_size {
                Some(size) => size + header.padding_bytes(),
                None => self.detect_free_format(src, &header)?,
            },
        };

        if self.firsthead.is_none() {
            // 首次锁定: 要求后继位置也是兼容帧头 (或 ID3v1 标签)
            let mut next = [0u8; 4];
            if src.peek(size as u64 - 4, &mut next)? {
                let nh = u32::from_be_bytes(next);
                let follows = (FrameHeader::is_candidate(nh) && header.is_compatible(nh))
                    || nh >> 8 == ID3V1_MAGIC;
                if !follows {
                    log::trace!("偏移 {} 处的候选帧头未通过后继校验", search.offset);
                    return Ok(None);
                }
            }
            self.firsthead = Some(header.raw);
            if search.skipped > 0 {
                log::debug!("跳过 {} 字节前导数据后锁定首帧", search.skipped);
            }
        } else if search.skipped > 0 {
            self.resyncs += 1;
            if self.quiet || self.silent_frames > 0 {
                log::debug!("跳过 {} 字节后重新同步 (偏移 {})", search.skipped, search.offset);
            } else {
                log::warn!("跳过 {} 字节后重新同步 (偏移 {})", search.skipped, search.offset);
            }
        }

        Ok(Some(LocatedFrame {
            header,
            size,
            offset: search.offset,
            resynced: search.skipped > 0,
        }))
    }

    /// 向前搜索下一个兼容的自由格式帧头以确定帧长
    fn detect_free_format(
        &mut self,
        src: &mut dyn ByteSource,
        header: &FrameHeader,
    ) -> TaoResult<usize> {
        let mut probe = [0u8; 4];
        for ahead in FREE_FORMAT_MIN..=FREE_FORMAT_MAX {
            if !src.peek(ahead, &mut probe)? {
                break;
            }
            let nh = u32::from_be_bytes(probe);
            if FrameHeader::is_candidate(nh) && header.is_compatible(nh) && (nh >> 12) & 0xF == 0 {
                let size = ahead as usize + 4;
                self.freeformat_size = Some(size - header.padding_bytes());
                log::debug!("自由格式帧长: {size} 字节");
                return Ok(size);
            }
        }
        Err(TaoError::Stream("无法确定自由格式帧长度".into()))
    }

    /// raw 模式: 帧边界由调用方保证
    fn locate_raw(&mut self, src: &mut dyn ByteSource) -> TaoResult<LocatedFrame> {
        loop {
            let offset = src.tell();
            let len = src.pending_frame_len();
            let head = read_u32_be(src)?;
            let size = len.unwrap_or(4);
            match FrameHeader::parse(head) {
                Ok(header) => {
                    self.firsthead.get_or_insert(head);
                    return Ok(LocatedFrame {
                        header,
                        size,
                        offset,
                        resynced: false,
                    });
                }
                Err(_) => {
                    log::warn!("原始帧帧头非法 (0x{head:08X}), 丢弃该帧");
                    if size > 4 {
                        src.skip(size as u64 - 4)?;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{FeedSource, FileSource, RawSource};
    use std::io::Cursor;

    /// MPEG-1 Layer 3, 128kbps, 44100 Hz, 立体声, 无填充: 417 字节
    const HEAD: u32 = 0xFFFB_9000;
    const FRAME_SIZE: usize = 417;

    fn frame() -> Vec<u8> {
        let mut f = HEAD.to_be_bytes().to_vec();
        f.resize(FRAME_SIZE, 0);
        f
    }

    fn stream(frames: usize) -> Vec<u8> {
        (0..frames).flat_map(|_| frame()).collect()
    }

    fn file(data: Vec<u8>) -> FileSource<Cursor<Vec<u8>>> {
        FileSource::new(Cursor::new(data)).unwrap()
    }

    #[test]
    fn test_顺序读帧() {
        let mut src = file(stream(3));
        let mut framer = Framer::new(Some(1024), false, false);
        let mut buf = Vec::new();
        for i in 0..3 {
            let located = framer.next_frame(&mut src, &mut buf).unwrap();
            assert_eq!(located.offset, (i * FRAME_SIZE) as u64);
            assert_eq!(buf.len(), FRAME_SIZE);
        }
        assert!(matches!(
            framer.next_frame(&mut src, &mut buf),
            Err(TaoError::Eof)
        ));
        assert_eq!(framer.resync_count(), 0);
    }

    #[test]
    fn test_跳过_id3v2_与前导垃圾() {
        let mut data = b"ID3\x04\x00\x00\x00\x00\x00\x05hello".to_vec();
        data.extend_from_slice(&[0x12, 0x34, 0x56]);
        data.extend(stream(2));
        let mut src = file(data);
        let mut framer = Framer::new(Some(1024), false, false);
        let mut buf = Vec::new();
        let located = framer.next_frame(&mut src, &mut buf).unwrap();
        assert_eq!(located.offset, 18);
        // 首次锁定前的前导数据不计入重同步
        assert_eq!(framer.resync_count(), 0);
    }

    #[test]
    fn test_损坏帧头触发一次重同步() {
        let mut data = stream(5);
        data[2 * FRAME_SIZE + 1] = 0x00;
        let mut src = file(data);
        let mut framer = Framer::new(Some(1024), false, false);
        let mut buf = Vec::new();
        let mut offsets = Vec::new();
        while let Ok(located) = framer.next_frame(&mut src, &mut buf) {
            offsets.push(located.offset);
        }
        let f = FRAME_SIZE as u64;
        assert_eq!(offsets, vec![0, f, 3 * f, 4 * f]);
        assert_eq!(framer.resync_count(), 1);
    }

    #[test]
    fn test_超过重同步上限为码流错误() {
        let mut data = stream(2);
        for _ in 0..1000 {
            data.extend_from_slice(&[0xFF, 0xE0, 0x00, 0x00]);
        }
        let mut src = file(data);
        let mut framer = Framer::new(Some(256), false, false);
        let mut buf = Vec::new();
        framer.next_frame(&mut src, &mut buf).unwrap();
        framer.next_frame(&mut src, &mut buf).unwrap();
        let err = framer.next_frame(&mut src, &mut buf).unwrap_err();
        assert!(matches!(err, TaoError::Stream(_)));
    }

    #[test]
    fn test_推送模式断点续读() {
        let data = stream(2);
        let mut src = FeedSource::new();
        let mut framer = Framer::new(Some(1024), false, false);
        let mut buf = Vec::new();
        src.feed(&data[..100]).unwrap();
        assert!(matches!(
            framer.next_frame(&mut src, &mut buf),
            Err(TaoError::NeedMoreData)
        ));
        src.feed(&data[100..600]).unwrap();
        let located = framer.next_frame(&mut src, &mut buf).unwrap();
        assert_eq!(located.offset, 0);
        src.feed(&data[600..]).unwrap();
        let located = framer.next_frame(&mut src, &mut buf).unwrap();
        assert_eq!(located.offset, FRAME_SIZE as u64);
    }

    #[test]
    fn test_自由格式帧长探测() {
        // MPEG-1 Layer 3, 码率索引 0
        let mut f = 0xFFFB_0000u32.to_be_bytes().to_vec();
        f.resize(300, 0);
        let data: Vec<u8> = (0..3).flat_map(|_| f.clone()).collect();
        let mut src = file(data);
        let mut framer = Framer::new(Some(1024), false, false);
        let mut buf = Vec::new();
        for i in 0..3 {
            let located = framer.next_frame(&mut src, &mut buf).unwrap();
            assert_eq!(located.size, 300);
            assert_eq!(located.offset, i * 300);
        }
    }

    #[test]
    fn test_原始帧模式() {
        let mut src = RawSource::new();
        src.feed(&frame()[..100]).unwrap();
        src.feed(&[0x00, 0x11, 0x22, 0x33, 0x44]).unwrap();
        src.feed(&frame()[..50]).unwrap();
        let mut framer = Framer::new(Some(1024), false, false);
        let mut buf = Vec::new();
        assert_eq!(framer.next_frame(&mut src, &mut buf).unwrap().size, 100);
        assert_eq!(framer.next_frame(&mut src, &mut buf).unwrap().size, 50);
        assert!(matches!(
            framer.next_frame(&mut src, &mut buf),
            Err(TaoError::NeedMoreData)
        ));
    }

    #[test]
    fn test_解除锁定后重新校验首帧() {
        // 开头的候选帧头后面跟的不是帧头, 只有未锁定时才会被拒绝
        let mut data = HEAD.to_be_bytes().to_vec();
        data.resize(FRAME_SIZE + 3, 0x11);
        data.extend(stream(2));
        let mut src = file(data.clone());
        let mut framer = Framer::new(Some(1024), false, false);
        let mut buf = Vec::new();
        let first = framer.next_frame(&mut src, &mut buf).unwrap();
        assert_eq!(first.offset, FRAME_SIZE as u64 + 3);
        assert!(framer.is_locked());

        // 锁定状态下回到开头, 假帧头被当作合法帧读出
        src.seek_to(0).unwrap();
        framer.reset_for_seek();
        assert_eq!(framer.next_frame(&mut src, &mut buf).unwrap().offset, 0);

        src.seek_to(0).unwrap();
        framer.reset_for_seek();
        framer.unlock();
        assert!(!framer.is_locked());
        let again = framer.next_frame(&mut src, &mut buf).unwrap();
        assert_eq!(again.offset, FRAME_SIZE as u64 + 3);
        assert_eq!(framer.resync_count(), 0);
    }
}
