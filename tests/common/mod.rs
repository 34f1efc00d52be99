//! 集成测试公共工具: 合成 MPEG 码流与确定性测试内核.
//!
//! 合成帧为 MPEG-1 Layer 3, 128kbps, 44100 Hz, 单声道, 417 字节.
//! 帧数据第 4..8 字节写入帧号, 测试内核据此输出 "样本序号 / 2^20",
//! 因此 f32 输出可以精确还原出每个样本在整条流中的序号.

#![allow(dead_code)]

use std::io::Cursor;

use tao_mpa::core::{Encoding, TaoError, TaoResult};
use tao_mpa::mpg::{
    DecodeHandle, DecodeKernel, DecoderParams, FileSource, FormatCaps, FrameHeader,
};

pub const MONO: u32 = 0xFFFB_90C0;
pub const FRAME_SIZE: usize = 417;
pub const SPF: usize = 1152;
pub const RAMP_SCALE: f32 = (1 << 20) as f32;

/// 测试内核的输出
#[derive(Debug, Clone, Copy)]
pub enum Wave {
    /// 样本序号 / 2^20
    Ramp,
    /// 恒定幅度
    Constant(f32),
}

/// 确定性测试内核
pub struct TestKernel {
    pub wave: Wave,
    /// 该帧号解码失败
    pub fail_frame: Option<u32>,
}

impl TestKernel {
    pub fn ramp() -> Box<Self> {
        Box::new(Self {
            wave: Wave::Ramp,
            fail_frame: None,
        })
    }
}

impl DecodeKernel for TestKernel {
    fn name(&self) -> &str {
        "test"
    }

    fn configure(&mut self, _header: &FrameHeader) -> TaoResult<()> {
        Ok(())
    }

    fn decode(&mut self, header: &FrameHeader, frame: &[u8], out: &mut Vec<f32>) -> TaoResult<usize> {
        let num = u32::from_be_bytes([frame[4], frame[5], frame[6], frame[7]]);
        if self.fail_frame == Some(num) {
            return Err(TaoError::Kernel(format!("第 {num} 帧损坏")));
        }
        let spf = header.samples_per_frame();
        for i in 0..spf {
            let v = match self.wave {
                Wave::Ramp => (num as usize * spf + i) as f32 / RAMP_SCALE,
                Wave::Constant(a) => a,
            };
            for _ in 0..header.channels() {
                out.push(v);
            }
        }
        Ok(spf)
    }

    fn reset(&mut self) {}
}

/// 单个合成音频帧
pub fn audio_frame(num: u32) -> Vec<u8> {
    let mut f = MONO.to_be_bytes().to_vec();
    f.extend_from_slice(&num.to_be_bytes());
    f.resize(FRAME_SIZE, 0);
    f
}

/// `frames` 个连续音频帧
pub fn stream(frames: u32) -> Vec<u8> {
    (0..frames).flat_map(audio_frame).collect()
}

/// 带 LAME Info 标签的码流: 标签帧 + `frames` 个音频帧
pub fn lame_stream(frames: u32, delay: u32, padding: u32) -> Vec<u8> {
    let mut tag = MONO.to_be_bytes().to_vec();
    // 单声道 MPEG-1 侧边信息 17 字节
    tag.resize(4 + 17, 0);
    tag.extend_from_slice(b"Info");
    // 帧数 | 字节数 | TOC
    tag.extend_from_slice(&0x7u32.to_be_bytes());
    tag.extend_from_slice(&frames.to_be_bytes());
    tag.extend_from_slice(&(frames * FRAME_SIZE as u32).to_be_bytes());
    tag.extend((0..100u32).map(|i| (i * 256 / 100) as u8));
    tag.extend_from_slice(b"LAME3.100");
    tag.extend_from_slice(&[0x00, 0x00]);
    tag.extend_from_slice(&[0; 4 + 2 + 2 + 1 + 1]);
    tag.push((delay >> 4) as u8);
    tag.push((((delay & 0xF) << 4) | (padding >> 8)) as u8);
    tag.push((padding & 0xFF) as u8);
    tag.resize(FRAME_SIZE, 0);
    tag.extend(stream(frames));
    tag
}

/// 测试日志, 由 RUST_LOG 控制
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 使用指定内核, 输出限定为 44100 Hz 单声道 `encoding` 的句柄
pub fn handle_with(params: DecoderParams, kernel: Box<dyn DecodeKernel>, encoding: Encoding) -> DecodeHandle {
    init_logging();
    let mut handle = DecodeHandle::with_kernel(params, kernel).unwrap();
    let mut caps = FormatCaps::none();
    caps.allow(44100, &[1], encoding.flag()).unwrap();
    handle.set_format_caps(caps).unwrap();
    handle
}

/// f32 输出的斜坡内核句柄
pub fn ramp_handle(params: DecoderParams) -> DecodeHandle {
    handle_with(params, TestKernel::ramp(), Encoding::F32)
}

pub fn open_memory(handle: &mut DecodeHandle, data: Vec<u8>) {
    let source = FileSource::new(Cursor::new(data)).unwrap();
    handle.open(Box::new(source));
}

/// 读到流结束, 返回全部输出字节
pub fn decode_all(handle: &mut DecodeHandle) -> Vec<u8> {
    let mut all = Vec::new();
    let mut buf = vec![0u8; 4096];
    loop {
        match handle.read(&mut buf) {
            Ok(n) => all.extend_from_slice(&buf[..n]),
            Err(TaoError::NewFormat) => {}
            Err(TaoError::Eof) => return all,
            Err(e) => panic!("解码失败: {e}"),
        }
    }
}

/// f32 斜坡输出 → 样本序号
pub fn ramp_indices(bytes: &[u8]) -> Vec<u64> {
    bytes
        .chunks_exact(4)
        .map(|c| (f32::from_ne_bytes([c[0], c[1], c[2], c[3]]) * RAMP_SCALE) as u64)
        .collect()
}

