//! 采样写出: 内部浮点样本 → 目标 PCM 编码.
//!
//! 对标 mpg123 的 synth 输出阶段. 内部样本为满幅 ±1.0 的 `f32`,
//! 整数编码在 `x × 32768 × scale` 上取整并饱和, 每次饱和计入削波计数.
//! 8 位编码先得到 16 位值, 再以 `s16 >> 3` 为下标查 8192 项表.
//! 输出为按声道交错排列的本机字节序数据.

use serde::{Deserialize, Serialize};
use tao_core::Encoding;

/// 8 位查表项数 (13 位有符号下标)
const TABLE8_SIZE: usize = 8192;
const TABLE8_OFFSET: i32 = 4096;

/// A-law 各段上界 (13 位)
const ALAW_SEG_END: [i32; 8] = [0x1F, 0x3F, 0x7F, 0xFF, 0x1FF, 0x3FF, 0x7FF, 0xFFF];

/// 取整方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rounding {
    /// 向零截断
    Truncate,
    /// 四舍五入
    #[default]
    Nearest,
}

/// 采样写出器
#[derive(Debug, Clone)]
pub struct SampleWriter {
    encoding: Encoding,
    scale: f64,
    rounding: Rounding,
    /// 8 位编码查表, 仅 8 位编码时非空
    table8: Vec<u8>,
    clipped: u64,
    regenerations: u64,
}

impl SampleWriter {
    pub fn new(encoding: Encoding, rounding: Rounding) -> Self {
        let mut writer = Self {
            encoding,
            scale: 1.0,
            rounding,
            table8: Vec::new(),
            clipped: 0,
            regenerations: 0,
        };
        writer.regenerate(encoding, 1.0);
        writer
    }

    /// 按新的编码与有效缩放重建输出表
    pub fn regenerate(&mut self, encoding: Encoding, scale: f64) {
        self.encoding = encoding;
        self.scale = scale;
        if encoding.is_8bit() {
            self.table8 = build_table8(encoding);
        } else {
            self.table8.clear();
        }
        self.regenerations += 1;
        log::debug!("重建输出表: 编码 {encoding}, 缩放 {scale:.4}");
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// 输出表重建次数
    pub fn regenerations(&self) -> u64 {
        self.regenerations
    }

    /// 累计削波样本数
    pub fn clip_count(&self) -> u64 {
        self.clipped
    }

    /// 取出并清零削波计数
    pub fn take_clip_count(&mut self) -> u64 {
        std::mem::take(&mut self.clipped)
    }

    /// 将交错样本编码后追加到 `out`
    pub fn write(&mut self, samples: &[f32], out: &mut Vec<u8>) {
        out.reserve(samples.len() * self.encoding.bytes_per_sample());
        match self.encoding {
            Encoding::S16 => {
                for &x in samples {
                    let v = self.to_s16(x);
                    out.extend_from_slice(&v.to_ne_bytes());
                }
            }
            Encoding::S32 => {
                for &x in samples {
                    let v = self.to_s32(x);
                    out.extend_from_slice(&v.to_ne_bytes());
                }
            }
            Encoding::F32 => {
                let scale = self.scale as f32;
                for &x in samples {
                    out.extend_from_slice(&(x * scale).to_ne_bytes());
                }
            }
            Encoding::U8 | Encoding::S8 | Encoding::Ulaw8 | Encoding::Alaw8 => {
                for &x in samples {
                    let v = self.to_s16(x);
                    let idx = ((i32::from(v) >> 3) + TABLE8_OFFSET) as usize;
                    out.push(self.table8[idx]);
                }
            }
        }
    }

    fn round(&self, sum: f64) -> f64 {
        match self.rounding {
            Rounding::Truncate => sum.trunc(),
            Rounding::Nearest => sum.round(),
        }
    }

    fn to_s16(&mut self, x: f32) -> i16 {
        let sum = self.round(f64::from(x) * 32768.0 * self.scale);
        if sum > f64::from(i16::MAX) {
            self.clipped += 1;
            i16::MAX
        } else if sum < f64::from(i16::MIN) {
            self.clipped += 1;
            i16::MIN
        } else {
            sum as i16
        }
    }

    fn to_s32(&mut self, x: f32) -> i32 {
        let sum = self.round(f64::from(x) * 32768.0 * 65536.0 * self.scale);
        if sum > f64::from(i32::MAX) {
            self.clipped += 1;
            i32::MAX
        } else if sum < f64::from(i32::MIN) {
            self.clipped += 1;
            i32::MIN
        } else {
            sum as i32
        }
    }
}

/// 生成 8 位编码查表, 下标为 13 位有符号值 + 4096
fn build_table8(encoding: Encoding) -> Vec<u8> {
    (0..TABLE8_SIZE as i32)
        .map(|idx| {
            let i = idx - TABLE8_OFFSET;
            match encoding {
                Encoding::S8 => (i >> 5) as i8 as u8,
                Encoding::U8 => ((i >> 5) + 128) as u8,
                Encoding::Ulaw8 => linear_to_ulaw(i),
                Encoding::Alaw8 => linear_to_alaw(i),
                _ => 0,
            }
        })
        .collect()
}

/// 13 位线性值 → µ-law
fn linear_to_ulaw(i: i32) -> u8 {
    let m = 127.0 / 256.0_f64.ln();
    let x = f64::from(i) * 8.0 * 255.0 / 32768.0;
    let c = if i < 0 {
        127 - ((1.0 - x).ln() * m) as i32
    } else {
        255 - ((1.0 + x).ln() * m) as i32
    };
    if c == 0 { 2 } else { c as u8 }
}

/// 13 位线性值 → A-law (G.711)
fn linear_to_alaw(i: i32) -> u8 {
    let (mask, pcm) = if i >= 0 { (0xD5, i) } else { (0x55, -i - 1) };
    let seg = ALAW_SEG_END.iter().position(|&end| pcm <= end).unwrap_or(8);
    if seg >= 8 {
        return 0x7F ^ mask;
    }
    let mantissa = if seg < 2 { (pcm >> 1) & 0xF } else { (pcm >> seg) & 0xF };
    (((seg as i32) << 4) | mantissa) as u8 ^ mask
}
