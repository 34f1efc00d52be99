//! # tao-mpg
//!
//! Tao 流式 MPEG 音频 (Layer 1/2/3) 解码引擎.
//!
//! 本 crate 对标 libmpg123 的解码句柄: 帧同步与重同步, 帧索引与定位,
//! 无缝裁剪, 音量与 ReplayGain, PCM 编码输出, 以及生产者/消费者音频缓冲.
//! 逐帧的 Huffman / IMDCT / 合成滤波由可替换的 [`DecodeKernel`] 完成.
//!
//! ## 使用示例
//!
//! ```rust,no_run
//! use tao_core::TaoError;
//! use tao_mpg::{DecodeHandle, DecoderParams};
//!
//! let mut handle = DecodeHandle::new(DecoderParams::default())?;
//! handle.open_file("input.mp3")?;
//! let mut buf = vec![0u8; 16384];
//! loop {
//!     match handle.read(&mut buf) {
//!         Ok(n) => { /* 写出 buf[..n] */ let _ = n; }
//!         Err(TaoError::NewFormat) => println!("输出格式: {:?}", handle.format()),
//!         Err(TaoError::Eof) => break,
//!         Err(e) => return Err(e),
//!     }
//! }
//! # Ok::<(), TaoError>(())
//! ```

pub mod config;
pub mod format;
pub mod framer;
pub mod gapless;
pub mod handle;
pub mod header;
pub mod index;
pub mod kernel;
pub mod resample;
pub mod source;
pub mod stream_buffer;
pub mod volume;
pub mod writer;
pub mod xing;

// 重导出常用类型
pub use config::{DecodeFlags, DecoderParams, KernelChoice};
pub use format::{FormatCaps, OutputFormat};
pub use gapless::{GAPLESS_DELAY, GaplessEngine, GaplessRange};
pub use handle::{DecodeHandle, DecodeState};
pub use header::{FrameHeader, FrameInfo, Layer, MpegVersion, VbrMode};
pub use index::{FrameIndex, IndexEntry, IndexPolicy};
pub use kernel::{DecodeKernel, select_kernel};
pub use resample::{DownSample, RateConverter};
pub use source::{ByteSource, FeedSource, FileSource, RawSource, SeekTarget, SourceKind, StreamSource};
pub use stream_buffer::{BufferEvent, BufferReader, BufferWriter, ControlMessage, stream_buffer};
pub use volume::{GainKind, ReplayGain, RvaMode};
pub use writer::{Rounding, SampleWriter};
pub use xing::XingTag;

#[cfg(feature = "symphonia-backend")]
pub use kernel::SymphoniaKernel;
