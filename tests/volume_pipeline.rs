//! 端到端集成测试: 音量, ReplayGain 与削波计数.
//!
//! 测试流程: 恒定幅度内核 → 设置音量 / RVA → 解码为 s16 / f32 → 验证缩放与削波

mod common;

use common::*;
use tao_mpa::core::Encoding;
use tao_mpa::mpg::{DecodeFlags, DecoderParams, GainKind, ReplayGain, RvaMode};

fn constant(amplitude: f32) -> Box<TestKernel> {
    Box::new(TestKernel {
        wave: Wave::Constant(amplitude),
        fail_frame: None,
    })
}

fn no_gapless() -> DecoderParams {
    let mut params = DecoderParams::default();
    params.flags.remove(DecodeFlags::GAPLESS);
    params
}

fn s16_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|c| i16::from_ne_bytes([c[0], c[1]]))
        .collect()
}

#[test]
fn test_增益按峰值钳制() {
    let mut h = handle_with(no_gapless(), constant(0.79), Encoding::S16);
    open_memory(&mut h, stream(3));
    h.set_rva(RvaMode::Mix);
    h.set_replay_gain(
        GainKind::Mix,
        Some(ReplayGain {
            gain_db: 6.0,
            peak: 0.8,
        }),
    );
    assert!((h.effective_volume() - 1.25).abs() < 1e-9);
    assert_eq!(h.volume(), 1.0);

    let samples = s16_samples(&decode_all(&mut h));
    assert_eq!(samples.len(), 3 * SPF);
    assert_eq!(h.clip_count(), 0);
    let expected = (0.79f64 * 1.25 * 32768.0) as i16;
    assert!(samples.iter().all(|&s| (s - expected).abs() <= 1));
}

#[test]
fn test_专辑增益缺失时回落到电台增益() {
    let mut h = handle_with(no_gapless(), constant(0.5), Encoding::F32);
    open_memory(&mut h, stream(1));
    h.set_replay_gain(
        GainKind::Mix,
        Some(ReplayGain {
            gain_db: -6.0,
            peak: 0.0,
        }),
    );
    // 未启用 RVA 时不应用增益
    assert_eq!(h.effective_volume(), 1.0);
    h.set_rva(RvaMode::Album);
    assert!((h.effective_volume() - 0.501_187).abs() < 1e-5);
}

#[test]
fn test_音量过大时计数削波() {
    let mut params = no_gapless();
    params.outscale = 2.0;
    let mut h = handle_with(params, constant(0.79), Encoding::S16);
    open_memory(&mut h, stream(3));
    let samples = s16_samples(&decode_all(&mut h));
    assert!(samples.iter().all(|&s| s == i16::MAX));
    assert_eq!(h.clip_count(), 3 * SPF as u64);
    assert_eq!(h.take_clip_count(), 3 * SPF as u64);
    assert_eq!(h.clip_count(), 0);
}

#[test]
fn test_音量不变时不重建输出表() {
    let mut h = handle_with(no_gapless(), constant(0.5), Encoding::F32);
    open_memory(&mut h, stream(4));
    decode_all(&mut h);
    let before = h.table_regenerations();
    h.set_volume(0.5);
    assert_eq!(h.table_regenerations(), before + 1);
    h.set_volume(0.5);
    assert_eq!(h.table_regenerations(), before + 1);
    h.volume_change(0.25);
    assert_eq!(h.volume(), 0.75);
    assert_eq!(h.table_regenerations(), before + 2);

    h.seek_frame(0).unwrap();
    let pcm = decode_all(&mut h);
    let first = f32::from_ne_bytes([pcm[0], pcm[1], pcm[2], pcm[3]]);
    assert_eq!(first, 0.375);
}
