//! # Tao MPA
//!
//! 纯 Rust 实现的流式 MPEG 音频解码引擎, 对标 mpg123.
//!
//! 把任意切分, 可能损坏或逐块到达的 MPEG 1/2/2.5 Layer 1/2/3 码流解码为 PCM:
//! - **帧同步**: 逐字节重同步, 跳过 ID3 标签, 自由格式帧长探测
//! - **定位**: 帧索引精确定位, 依据 Xing TOC 的模糊定位
//! - **无缝播放**: 按 LAME 标签裁剪编码延迟与填充
//! - **音量**: 用户缩放与 ReplayGain, 防削波
//! - **输出**: s16 / s32 / u8 / s8 / µ-law / A-law / f32, 削波计数
//! - **缓冲**: 解码线程与输出线程之间的环形缓冲与控制消息
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use tao_mpa::mpg::{DecodeHandle, DecoderParams};
//!
//! let mut handle = DecodeHandle::new(DecoderParams::default())?;
//! handle.open_file("input.mp3")?;
//! println!("总样本数: {:?}", handle.length()?);
//! # Ok::<(), tao_mpa::core::TaoError>(())
//! ```
//!
//! # Crate 结构
//!
//! | Crate | 功能 |
//! |-------|------|
//! | `tao-core` | 错误类型与输出编码 |
//! | `tao-mpg` | 解码引擎 |

/// 错误类型与输出编码 (对标 mpg123.h)
pub use tao_core as core;

/// 解码引擎 (对标 libmpg123)
pub use tao_mpg as mpg;

/// 获取版本信息
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
