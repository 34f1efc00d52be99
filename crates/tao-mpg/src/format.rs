//! 输出格式协商.
//!
//! 对标 mpg123 的 `mpg123_format` / `frame_output_format`.
//! 依次尝试采样率 (原速, 2:1, 4:1), 声道数 (原声道优先), 编码 (按偏好顺序),
//! 取第一个被允许的组合.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tao_core::{Encoding, Encodings, TaoError, TaoResult};

use crate::config::DecodeFlags;
use crate::resample::DownSample;

/// 协商后的输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputFormat {
    pub rate: u32,
    pub channels: u16,
    pub encoding: Encoding,
}

impl OutputFormat {
    /// 一个采样帧 (所有声道) 的字节数
    pub fn frame_bytes(&self) -> usize {
        usize::from(self.channels) * self.encoding.bytes_per_sample()
    }
}

/// 输出格式能力
///
/// 默认接受任何格式. `none()` 之后通过 `allow` 逐项放开.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormatCaps {
    /// None 表示全部接受; 否则按采样率记录 [单声道, 立体声] 允许的编码
    allowed: Option<BTreeMap<u32, [Encodings; 2]>>,
}

impl FormatCaps {
    /// 接受任何格式
    pub fn all() -> Self {
        Self::default()
    }

    /// 不接受任何格式
    pub fn none() -> Self {
        Self {
            allowed: Some(BTreeMap::new()),
        }
    }

    /// 允许某采样率下给定声道数的编码集合
    pub fn allow(&mut self, rate: u32, channels: &[u16], encodings: Encodings) -> TaoResult<()> {
        if rate == 0 {
            return Err(TaoError::BadParameter("采样率不能为 0".into()));
        }
        let table = self.allowed.get_or_insert_with(BTreeMap::new);
        let slot = table.entry(rate).or_insert([Encodings::empty(); 2]);
        for &ch in channels {
            match ch {
                1 | 2 => slot[usize::from(ch) - 1] |= encodings,
                other => {
                    return Err(TaoError::BadParameter(format!("不支持的声道数: {other}")));
                }
            }
        }
        Ok(())
    }

    /// 是否接受该组合
    pub fn allows(&self, rate: u32, channels: u16, encoding: Encoding) -> bool {
        let Some(table) = &self.allowed else {
            return true;
        };
        if !(1..=2).contains(&channels) {
            return false;
        }
        table
            .get(&rate)
            .is_some_and(|slot| slot[usize::from(channels) - 1].allows(encoding))
    }
}

/// 协商输出格式, 返回格式与最终使用的转换模式
pub fn negotiate(
    caps: &FormatCaps,
    flags: DecodeFlags,
    mode: DownSample,
    native_rate: u32,
    native_channels: u16,
) -> TaoResult<(OutputFormat, DownSample)> {
    let channels: Vec<u16> = if flags.intersects(DecodeFlags::FORCE_MONO) {
        vec![1]
    } else if flags.contains(DecodeFlags::FORCE_STEREO) {
        vec![2]
    } else if native_channels == 1 {
        vec![1, 2]
    } else {
        vec![2, 1]
    };

    let encodings: Vec<Encoding> = Encoding::PREFERENCE
        .iter()
        .copied()
        .filter(|enc| {
            if flags.contains(DecodeFlags::FORCE_8BIT) {
                enc.is_8bit()
            } else if flags.contains(DecodeFlags::FORCE_FLOAT) {
                *enc == Encoding::F32
            } else {
                true
            }
        })
        .collect();

    let modes: Vec<DownSample> = match mode {
        DownSample::Native => vec![DownSample::Native, DownSample::Half, DownSample::Quarter],
        other => vec![other],
    };

    for mode in modes {
        let rate = mode.out_rate(native_rate);
        for &ch in &channels {
            if let Some(&encoding) = encodings.iter().find(|&&enc| caps.allows(rate, ch, enc)) {
                let format = OutputFormat {
                    rate,
                    channels: ch,
                    encoding,
                };
                log::debug!("协商输出格式: {format:?} ({mode:?})");
                return Ok((format, mode));
            }
        }
    }
    Err(TaoError::BadParameter(format!(
        "没有可接受的输出格式 (原始 {native_rate} Hz, {native_channels} 声道)"
    )))
}
