//! 逐帧解码内核.
//!
//! 句柄负责帧同步、定位、裁剪和输出, 内核只把一整帧压缩数据变成浮点 PCM.
//! 内核在句柄创建时选定一次, 之后每帧直接调用, 不再逐帧判断.

use tao_core::{TaoError, TaoResult};

use crate::config::KernelChoice;
use crate::header::FrameHeader;

/// 解码内核
pub trait DecodeKernel: Send {
    /// 内核名称 (日志用)
    fn name(&self) -> &str;

    /// 首帧或帧头参数变化时调用
    fn configure(&mut self, header: &FrameHeader) -> TaoResult<()>;

    /// 解码一整帧 (含帧头), 交错样本追加到 `out`, 返回每声道样本数
    fn decode(&mut self, header: &FrameHeader, frame: &[u8], out: &mut Vec<f32>)
    -> TaoResult<usize>;

    /// 定位或换曲后清空帧间状态 (如 Layer 3 位存储器)
    fn reset(&mut self);
}

/// 按选择创建内核
pub fn select_kernel(choice: KernelChoice) -> TaoResult<Box<dyn DecodeKernel>> {
    match choice {
        #[cfg(feature = "symphonia-backend")]
        KernelChoice::Auto | KernelChoice::Symphonia => {
            log::debug!("选用解码内核: symphonia");
            Ok(Box::new(symphonia_kernel::SymphoniaKernel::new()))
        }
        #[cfg(not(feature = "symphonia-backend"))]
        other => Err(TaoError::Unsupported(format!(
            "没有可用的解码内核 ({other:?}), 请启用 symphonia-backend 特性或自定义内核"
        ))),
    }
}

#[cfg(feature = "symphonia-backend")]
pub use symphonia_kernel::SymphoniaKernel;

#[cfg(feature = "symphonia-backend")]
mod symphonia_kernel {
    use symphonia_bundle_mp3::MpaDecoder;
    use symphonia_core::audio::{SampleBuffer, SignalSpec};
    use symphonia_core::codecs::{
        CODEC_TYPE_MP1, CODEC_TYPE_MP2, CODEC_TYPE_MP3, CodecParameters, Decoder, DecoderOptions,
    };
    use symphonia_core::formats::Packet;

    use super::*;
    use crate::header::Layer;

    /// 基于 symphonia `MpaDecoder` 的内核
    #[derive(Default)]
    pub struct SymphoniaKernel {
        decoder: Option<MpaDecoder>,
        layer: Option<Layer>,
        /// 复用的交错缓冲, 按信号规格与容量缓存
        samples: Option<(SignalSpec, usize, SampleBuffer<f32>)>,
        ts: u64,
    }

    impl SymphoniaKernel {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl DecodeKernel for SymphoniaKernel {
        fn name(&self) -> &str {
            "symphonia"
        }

        fn configure(&mut self, header: &FrameHeader) -> TaoResult<()> {
            if self.decoder.is_some() && self.layer == Some(header.layer) {
                return Ok(());
            }
            let codec = match header.layer {
                Layer::Layer1 => CODEC_TYPE_MP1,
                Layer::Layer2 => CODEC_TYPE_MP2,
                Layer::Layer3 => CODEC_TYPE_MP3,
            };
            let mut params = CodecParameters::new();
            params.for_codec(codec).with_sample_rate(header.sample_rate);
            let decoder = MpaDecoder::try_new(&params, &DecoderOptions::default())
                .map_err(|e| TaoError::Kernel(format!("创建 symphonia 解码器失败: {e}")))?;
            log::debug!("symphonia 内核配置为 Layer {}", header.layer.number());
            self.decoder = Some(decoder);
            self.layer = Some(header.layer);
            Ok(())
        }

        fn decode(
            &mut self,
            header: &FrameHeader,
            frame: &[u8],
            out: &mut Vec<f32>,
        ) -> TaoResult<usize> {
            if self.layer != Some(header.layer) {
                self.configure(header)?;
            }
            let Some(decoder) = self.decoder.as_mut() else {
                return Err(TaoError::Internal("symphonia 内核未配置".into()));
            };
            let spf = header.samples_per_frame() as u64;
            let packet = Packet::new_from_slice(0, self.ts, spf, frame);
            self.ts += spf;

            let decoded = decoder
                .decode(&packet)
                .map_err(|e| TaoError::Kernel(e.to_string()))?;
            let spec = *decoded.spec();
            let capacity = decoded.capacity();
            let frames = decoded.frames();

            let reuse = matches!(&self.samples, Some((s, c, _)) if *s == spec && *c == capacity);
            if !reuse {
                self.samples = Some((
                    spec,
                    capacity,
                    SampleBuffer::<f32>::new(capacity as u64, spec),
                ));
            }
            if let Some((_, _, buf)) = self.samples.as_mut() {
                buf.copy_interleaved_ref(decoded);
                out.extend_from_slice(buf.samples());
            }
            Ok(frames)
        }

        fn reset(&mut self) {
            if let Some(decoder) = self.decoder.as_mut() {
                decoder.reset();
            }
        }
    }

}
