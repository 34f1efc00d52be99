//! 首帧 VBR 信息标签解析.
//!
//! 支持 Xing/Info (含 LAME 扩展) 与 VBRI. 标签帧本身不含音频, 解码时跳过.
//!
//! LAME 扩展布局 (位于 Xing 可选字段之后):
//! - `[0..9]`   编码器版本字符串 (如 "LAME3.99r", "Lavc62.11")
//! - `[9]`      标签版本 (高 4 位) + VBR 方法 (低 4 位)
//! - `[10]`     低通频率
//! - `[11..15]` 峰值 (定点数, 2^23 为满幅)
//! - `[15..17]` 电台 (radio) 增益
//! - `[17..19]` 发烧友 (audiophile) 增益
//! - `[19]`     编码标志
//! - `[20]`     ABR 码率 / 最小码率
//! - `[21..24]` 编码延迟 12 bit + 填充 12 bit

use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt};

use crate::header::{FrameHeader, VbrMode};
use crate::volume::ReplayGain;

const XING_FRAMES: u32 = 0x1;
const XING_BYTES: u32 = 0x2;
const XING_TOC: u32 = 0x4;
const XING_QUALITY: u32 = 0x8;

/// 延迟/填充合理上限 (样本)
const MAX_ENCODER_PADDING: u32 = 2880;

/// 标签类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    /// "Xing": VBR
    Xing,
    /// "Info": CBR
    Info,
    /// Fraunhofer VBRI
    Vbri,
}

/// LAME 扩展信息
#[derive(Debug, Clone, PartialEq)]
pub struct LameTag {
    pub encoder: String,
    pub vbr_method: u8,
    /// ABR 码率 (kbps)
    pub abr_rate: u32,
    pub delay: u32,
    pub padding: u32,
    pub radio: Option<ReplayGain>,
    pub album: Option<ReplayGain>,
}

/// 首帧信息标签
#[derive(Debug, Clone, PartialEq)]
pub struct XingTag {
    pub kind: TagKind,
    /// 音频帧数 (不含标签帧)
    pub frames: Option<u64>,
    /// 流字节数
    pub bytes: Option<u64>,
    /// 100 项定位表, 每项为 0..=255 表示的文件位置比例
    pub toc: Option<[u8; 100]>,
    pub quality: Option<u32>,
    pub lame: Option<LameTag>,
}

impl XingTag {
    /// 码率模式
    pub fn vbr_mode(&self) -> VbrMode {
        match (&self.kind, &self.lame) {
            (_, Some(lame)) if matches!(lame.vbr_method, 2 | 8 | 9 | 10 | 11 | 12 | 13 | 14) => {
                VbrMode::Abr
            }
            (TagKind::Info, _) => VbrMode::Cbr,
            _ => VbrMode::Vbr,
        }
    }

    /// 从整帧数据 (含帧头) 中解析
    pub fn parse(header: &FrameHeader, frame: &[u8]) -> Option<Self> {
        let crc = if header.has_crc { 2 } else { 0 };
        let xing_at = 4 + crc + header.side_info_size();
        if let Some(tag) = frame.get(xing_at..xing_at + 4) {
            if tag == b"Xing" || tag == b"Info" {
                let kind = if tag == b"Xing" {
                    TagKind::Xing
                } else {
                    TagKind::Info
                };
                return Self::parse_xing(kind, &frame[xing_at + 4..]);
            }
        }
        match frame.get(36..40) {
            Some(b"VBRI") => Self::parse_vbri(&frame[40..]),
            _ => None,
        }
    }

    fn parse_xing(kind: TagKind, data: &[u8]) -> Option<Self> {
        let mut rd = Cursor::new(data);
        let flags = rd.read_u32::<BigEndian>().ok()?;
        let frames = if flags & XING_FRAMES != 0 {
            Some(u64::from(rd.read_u32::<BigEndian>().ok()?))
        } else {
            None
        };
        let bytes = if flags & XING_BYTES != 0 {
            Some(u64::from(rd.read_u32::<BigEndian>().ok()?))
        } else {
            None
        };
        let toc = if flags & XING_TOC != 0 {
            let mut toc = [0u8; 100];
            rd.read_exact(&mut toc).ok()?;
            Some(toc)
        } else {
            None
        };
        let quality = if flags & XING_QUALITY != 0 {
            Some(rd.read_u32::<BigEndian>().ok()?)
        } else {
            None
        };

        let mut lame_buf = [0u8; 24];
        let lame = match rd.read_exact(&mut lame_buf) {
            Ok(()) => parse_lame(&lame_buf),
            Err(_) => None,
        };

        log::debug!(
            "发现 {kind:?} 标签: frames={frames:?}, bytes={bytes:?}, toc={}, lame={}",
            toc.is_some(),
            lame.as_ref().map_or("-", |l| l.encoder.as_str())
        );
        Some(Self {
            kind,
            frames,
            bytes,
            toc,
            quality,
            lame,
        })
    }

    fn parse_vbri(data: &[u8]) -> Option<Self> {
        let mut rd = Cursor::new(data);
        let _version = rd.read_u16::<BigEndian>().ok()?;
        let _delay = rd.read_u16::<BigEndian>().ok()?;
        let quality = rd.read_u16::<BigEndian>().ok()?;
        let bytes = rd.read_u32::<BigEndian>().ok()?;
        let frames = rd.read_u32::<BigEndian>().ok()?;
        log::debug!("发现 VBRI 标签: frames={frames}, bytes={bytes}");
        Some(Self {
            kind: TagKind::Vbri,
            frames: Some(u64::from(frames)),
            bytes: Some(u64::from(bytes)),
            toc: None,
            quality: Some(u32::from(quality)),
            lame: None,
        })
    }
}

/// 解析 LAME 扩展, 编码器字符串不可打印时视为不存在
fn parse_lame(buf: &[u8; 24]) -> Option<LameTag> {
    let encoder = &buf[..9];
    if !encoder[..4].iter().all(|b| b.is_ascii_alphanumeric()) {
        return None;
    }
    let encoder = String::from_utf8_lossy(encoder)
        .trim_end_matches(['\0', ' '])
        .to_string();

    let peak_raw = u32::from_be_bytes([buf[11], buf[12], buf[13], buf[14]]);
    let peak = (peak_raw != 0).then(|| f64::from(peak_raw) / f64::from(1u32 << 23));

    let mut radio = None;
    let mut album = None;
    for field in [&buf[15..17], &buf[17..19]] {
        let raw = u16::from_be_bytes([field[0], field[1]]);
        let name = raw >> 13;
        let originator = (raw >> 10) & 0x7;
        if originator == 0 {
            continue;
        }
        let mut gain_db = f64::from(raw & 0x1FF) / 10.0;
        if raw & 0x200 != 0 {
            gain_db = -gain_db;
        }
        let gain = ReplayGain {
            gain_db,
            peak: peak.unwrap_or(0.0),
        };
        match name {
            1 => radio = Some(gain),
            2 => album = Some(gain),
            _ => {}
        }
    }

    let delay = (u32::from(buf[21]) << 4) | (u32::from(buf[22]) >> 4);
    let padding = ((u32::from(buf[22]) & 0xF) << 8) | u32::from(buf[23]);
    let (delay, padding) = if delay <= MAX_ENCODER_PADDING && padding <= MAX_ENCODER_PADDING {
        (delay, padding)
    } else {
        log::warn!("LAME 延迟/填充超出范围 ({delay}/{padding}), 忽略");
        (0, 0)
    };

    Some(LameTag {
        encoder,
        vbr_method: buf[9] & 0xF,
        abr_rate: u32::from(buf[20]),
        delay,
        padding,
        radio,
        album,
    })
}
