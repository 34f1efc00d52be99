//! MPEG 音频帧头解析.
//!
//! 覆盖 MPEG-1 / MPEG-2 (LSF) / MPEG-2.5, Layer 1/2/3, 含自由格式 (码率索引 0).

use bitflags::bitflags;
use serde::Serialize;
use tao_core::{TaoError, TaoResult};

/// 比较掩码: 同步字 + 版本 + 层 + 采样率索引.
///
/// 重同步时候选帧头必须在这些位上与首帧一致.
pub const HDR_CMPMASK: u32 = 0xFFFE_0C00;

/// 每帧最大采样数 (MPEG-1 Layer 2/3)
pub const MAX_SAMPLES_PER_FRAME: usize = 1152;

/// MPEG 版本
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MpegVersion {
    Mpeg1,
    Mpeg2,
    Mpeg25,
}

impl MpegVersion {
    /// 是否为低采样率扩展 (MPEG-2 / MPEG-2.5)
    pub fn is_lsf(&self) -> bool {
        !matches!(self, Self::Mpeg1)
    }
}

/// MPEG Layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Layer {
    Layer1,
    Layer2,
    Layer3,
}

impl Layer {
    /// 层号 (1/2/3)
    pub fn number(&self) -> u8 {
        match self {
            Self::Layer1 => 1,
            Self::Layer2 => 2,
            Self::Layer3 => 3,
        }
    }
}

/// 声道模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChannelMode {
    Stereo,
    JointStereo,
    DualChannel,
    Mono,
}

/// 码率表 (kbps), [lsf][layer - 1][index]
const BITRATES: [[[u32; 15]; 3]; 2] = [
    [
        [0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448],
        [0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384],
        [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320],
    ],
    [
        [0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256],
        [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160],
        [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160],
    ],
];

/// 采样率表, 按 MPEG-1 / MPEG-2 / MPEG-2.5 排列
pub const SAMPLE_RATES: [u32; 9] = [44100, 48000, 32000, 22050, 24000, 16000, 11025, 12000, 8000];

/// MPEG 音频帧头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// 原始 32 位帧头
    pub raw: u32,
    pub version: MpegVersion,
    pub layer: Layer,
    pub has_crc: bool,
    pub bitrate_index: u8,
    /// 码率 (kbps), 自由格式为 0
    pub bitrate: u32,
    pub sample_rate: u32,
    pub padding: bool,
    pub private: bool,
    pub mode: ChannelMode,
    pub mode_extension: u8,
    pub copyright: bool,
    pub original: bool,
    pub emphasis: u8,
}

impl FrameHeader {
    /// 快速检查 32 位值是否可能是合法帧头 (不做完整解析)
    pub fn is_candidate(head: u32) -> bool {
        (head & 0xFFE0_0000) == 0xFFE0_0000
            && (head >> 19) & 0x3 != 1
            && (head >> 17) & 0x3 != 0
            && (head >> 12) & 0xF != 0xF
            && (head >> 10) & 0x3 != 0x3
            && head & 0x3 != 0x2
    }

    /// 解析 4 字节帧头
    pub fn parse(head: u32) -> TaoResult<Self> {
        // AAAAAAAA AAABBCCD EEEEFFGH IIJJKLMM
        // A: 同步字 (11 bits)  B: 版本  C: 层  D: 无 CRC 标志
        // E: 码率索引  F: 采样率索引  G: 填充  H: 私有
        // I: 声道模式  J: 模式扩展  K: 版权  L: 原始  M: 加重
        if !Self::is_candidate(head) {
            return Err(TaoError::Stream(format!("非法帧头: 0x{head:08X}")));
        }

        let version = match (head >> 19) & 0x3 {
            3 => MpegVersion::Mpeg1,
            2 => MpegVersion::Mpeg2,
            _ => MpegVersion::Mpeg25,
        };
        let layer = match (head >> 17) & 0x3 {
            3 => Layer::Layer1,
            2 => Layer::Layer2,
            _ => Layer::Layer3,
        };
        let bitrate_index = ((head >> 12) & 0xF) as u8;
        let lsf = usize::from(version.is_lsf());
        let bitrate = BITRATES[lsf][layer.number() as usize - 1][bitrate_index as usize];

        let sr_base = match version {
            MpegVersion::Mpeg1 => 0,
            MpegVersion::Mpeg2 => 3,
            MpegVersion::Mpeg25 => 6,
        };
        let sample_rate = SAMPLE_RATES[sr_base + ((head >> 10) & 0x3) as usize];

        let mode = match (head >> 6) & 0x3 {
            0 => ChannelMode::Stereo,
            1 => ChannelMode::JointStereo,
            2 => ChannelMode::DualChannel,
            _ => ChannelMode::Mono,
        };

        Ok(Self {
            raw: head,
            version,
            layer,
            has_crc: (head >> 16) & 0x1 == 0,
            bitrate_index,
            bitrate,
            sample_rate,
            padding: (head >> 9) & 0x1 == 1,
            private: (head >> 8) & 0x1 == 1,
            mode,
            mode_extension: ((head >> 4) & 0x3) as u8,
            copyright: (head >> 3) & 0x1 == 1,
            original: (head >> 2) & 0x1 == 1,
            emphasis: (head & 0x3) as u8,
        })
    }

    /// 声道数
    pub fn channels(&self) -> u16 {
        if self.mode == ChannelMode::Mono { 1 } else { 2 }
    }

    /// 每帧采样数 (每声道)
    pub fn samples_per_frame(&self) -> usize {
        match self.layer {
            Layer::Layer1 => 384,
            Layer::Layer2 => 1152,
            Layer::Layer3 if self.version.is_lsf() => 576,
            Layer::Layer3 => 1152,
        }
    }

    /// 是否为自由格式 (帧长无法由帧头算出)
    pub fn is_free_format(&self) -> bool {
        self.bitrate_index == 0
    }

    /// 填充字节数 (Layer 1 的填充单位为 4 字节槽)
    pub fn padding_bytes(&self) -> usize {
        match (self.padding, self.layer) {
            (false, _) => 0,
            (true, Layer::Layer1) => 4,
            (true, _) => 1,
        }
    }

    /// 完整帧长 (含 4 字节帧头), 自由格式返回 None
    pub fn frame_size(&self) -> Option<usize> {
        if self.is_free_format() {
            return None;
        }
        let br = self.bitrate as usize * 1000;
        let sr = self.sample_rate as usize;
        let size = match self.layer {
            Layer::Layer1 => (12 * br / sr) * 4,
            Layer::Layer2 => 144 * br / sr,
            Layer::Layer3 if self.version.is_lsf() => 72 * br / sr,
            Layer::Layer3 => 144 * br / sr,
        };
        Some(size + self.padding_bytes())
    }

    /// Layer 3 侧边信息长度
    pub fn side_info_size(&self) -> usize {
        match (self.version.is_lsf(), self.mode == ChannelMode::Mono) {
            (false, true) => 17,
            (false, false) => 32,
            (true, true) => 9,
            (true, false) => 17,
        }
    }

    /// 是否与另一帧头在比较掩码上一致
    pub fn is_compatible(&self, other: u32) -> bool {
        (self.raw & HDR_CMPMASK) == (other & HDR_CMPMASK)
    }
}

bitflags! {
    /// 帧头标志位
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    pub struct HeaderFlags: u8 {
        const CRC = 1 << 0;
        const COPYRIGHT = 1 << 1;
        const PRIVATE = 1 << 2;
        const ORIGINAL = 1 << 3;
    }
}

/// 码率模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VbrMode {
    Cbr,
    Vbr,
    Abr,
}

/// 当前帧信息
#[derive(Debug, Clone, Serialize)]
pub struct FrameInfo {
    pub version: MpegVersion,
    pub layer: u8,
    pub rate: u32,
    pub mode: ChannelMode,
    pub mode_ext: u8,
    /// 帧长 (含帧头)
    pub framesize: usize,
    pub flags: HeaderFlags,
    pub emphasis: u8,
    /// 码率 (kbps)
    pub bitrate: u32,
    /// ABR 目标码率 (kbps)
    pub abr_rate: u32,
    pub vbr: VbrMode,
}

impl FrameInfo {
    pub(crate) fn new(header: &FrameHeader, framesize: usize, vbr: VbrMode, abr_rate: u32) -> Self {
        let mut flags = HeaderFlags::empty();
        flags.set(HeaderFlags::CRC, header.has_crc);
        flags.set(HeaderFlags::COPYRIGHT, header.copyright);
        flags.set(HeaderFlags::PRIVATE, header.private);
        flags.set(HeaderFlags::ORIGINAL, header.original);
        Self {
            version: header.version,
            layer: header.layer.number(),
            rate: header.sample_rate,
            mode: header.mode,
            mode_ext: header.mode_extension,
            framesize,
            flags,
            emphasis: header.emphasis,
            bitrate: header.bitrate,
            abr_rate,
            vbr,
        }
    }
}
