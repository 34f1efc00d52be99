//! 解码参数.
//!
//! 对标 mpg123 的 `mpg123_pars`, 默认值与 libmpg123 一致.

use std::time::Duration;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use tao_core::{TaoError, TaoResult};

use crate::index::IndexPolicy;
use crate::resample::DownSample;
use crate::volume::RvaMode;
use crate::writer::Rounding;

bitflags! {
    /// 解码行为标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct DecodeFlags: u32 {
        /// 按 LAME 标签裁剪编码延迟与填充
        const GAPLESS          = 1 << 0;
        /// 允许依据 TOC 或平均帧长做模糊定位
        const FUZZY            = 1 << 1;
        /// 重同步只记调试日志
        const QUIET            = 1 << 2;
        /// 锁定后遇到非法帧头直接报错
        const NO_RESYNC        = 1 << 3;
        /// 立体声混合为单声道
        const FORCE_MONO_MIX   = 1 << 4;
        /// 只取左声道
        const FORCE_MONO_LEFT  = 1 << 5;
        /// 只取右声道
        const FORCE_MONO_RIGHT = 1 << 6;
        /// 强制立体声输出
        const FORCE_STEREO     = 1 << 7;
        /// 只协商 8 位编码
        const FORCE_8BIT       = 1 << 8;
        /// 只协商浮点编码
        const FORCE_FLOAT      = 1 << 9;
        /// 保留已读数据以便在推送/流模式中回退定位
        const SEEKBUFFER       = 1 << 10;

        const FORCE_MONO = Self::FORCE_MONO_MIX.bits()
            | Self::FORCE_MONO_LEFT.bits()
            | Self::FORCE_MONO_RIGHT.bits();
    }
}

/// 解码内核选择
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelChoice {
    /// 使用可用的最佳内核
    #[default]
    Auto,
    /// symphonia MPEG 音频解码器
    Symphonia,
}

/// 解码参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderParams {
    pub flags: DecodeFlags,
    /// 重同步最多跳过的字节数, None 为不限
    pub resync_limit: Option<usize>,
    /// 定位后预先解码的帧数
    pub preframes: u32,
    pub index_policy: IndexPolicy,
    /// 每隔多少帧记录一次索引
    pub index_step: u64,
    pub rva: RvaMode,
    /// 用户音量缩放
    pub outscale: f64,
    pub rounding: Rounding,
    pub down_sample: DownSample,
    pub kernel: KernelChoice,
    /// 流读取超时, None 为无限等待
    pub timeout: Option<Duration>,
}

impl Default for DecoderParams {
    fn default() -> Self {
        Self {
            flags: DecodeFlags::GAPLESS,
            resync_limit: Some(1024),
            preframes: 4,
            index_policy: IndexPolicy::default(),
            index_step: 1,
            rva: RvaMode::Off,
            outscale: 1.0,
            rounding: Rounding::default(),
            down_sample: DownSample::Native,
            kernel: KernelChoice::Auto,
            timeout: None,
        }
    }
}

impl DecoderParams {
    /// 校验参数组合
    pub fn validate(&self) -> TaoResult<()> {
        let mono = self.flags & DecodeFlags::FORCE_MONO;
        if mono.bits().count_ones() > 1 {
            return Err(TaoError::BadParameter(format!(
                "单声道强制标志互斥: {mono:?}"
            )));
        }
        if !mono.is_empty() && self.flags.contains(DecodeFlags::FORCE_STEREO) {
            return Err(TaoError::BadParameter("不能同时强制单声道与立体声".into()));
        }
        if self.flags.contains(DecodeFlags::FORCE_8BIT | DecodeFlags::FORCE_FLOAT) {
            return Err(TaoError::BadParameter("不能同时强制 8 位与浮点编码".into()));
        }
        if !self.outscale.is_finite() {
            return Err(TaoError::BadParameter(format!(
                "无效的音量缩放: {}",
                self.outscale
            )));
        }
        if self.index_step == 0 {
            return Err(TaoError::BadParameter("索引步长不能为 0".into()));
        }
        if self.preframes > 64 {
            return Err(TaoError::BadParameter(format!(
                "前置帧数过大: {}",
                self.preframes
            )));
        }
        if self.timeout == Some(Duration::ZERO) {
            return Err(TaoError::BadParameter("读取超时不能为 0".into()));
        }
        Ok(())
    }
}
