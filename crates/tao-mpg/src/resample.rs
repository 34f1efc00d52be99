//! 输出采样率转换.
//!
//! 对标 mpg123 的 2:1 / 4:1 降采样与 N-to-M 合成. 样本数换算与实际转换共用
//! 同一套相位计数, 保证 `frame_outs` 与解码产出的样本数逐帧一致.
//!
//! N-to-M 相位: 每个输入样本累加 `step = out_rate × 32768 / in_rate`,
//! 累计值每满 32768 输出一个样本. 首帧相位从 32768 / 2 开始.

use serde::{Deserialize, Serialize};
use tao_core::{TaoError, TaoResult};

/// N-to-M 相位精度
pub const NTOM_MUL: u64 = 32768;
/// N-to-M 最大上采样倍数
pub const NTOM_MAX: u64 = 8;
/// N-to-M 允许的最高采样率
pub const NTOM_MAX_FREQ: u32 = 96000;

/// 采样率转换模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownSample {
    /// 原始采样率
    #[default]
    Native,
    /// 2:1 降采样
    Half,
    /// 4:1 降采样
    Quarter,
    /// 任意目标采样率
    NtoM(u32),
}

impl DownSample {
    /// 给定输入采样率时的输出采样率
    pub fn out_rate(&self, in_rate: u32) -> u32 {
        match self {
            Self::Native => in_rate,
            Self::Half => in_rate >> 1,
            Self::Quarter => in_rate >> 2,
            Self::NtoM(rate) => *rate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    /// 右移位数: 0 原速, 1 为 2:1, 2 为 4:1
    Shift(u32),
    NtoM { step: u64 },
}

/// 采样率转换器
#[derive(Debug, Clone)]
pub struct RateConverter {
    kind: Kind,
    in_rate: u32,
    out_rate: u32,
    spf: u64,
    /// 当前 N-to-M 相位
    ntm: u64,
    /// 上一帧末样本 (按声道), 降采样平均用不到
    held: Vec<f32>,
}

impl RateConverter {
    pub fn new(mode: DownSample, in_rate: u32, spf: usize) -> TaoResult<Self> {
        if in_rate == 0 || spf == 0 {
            return Err(TaoError::BadParameter(format!(
                "无效的输入参数: 采样率 {in_rate}, 每帧样本 {spf}"
            )));
        }
        let kind = match mode {
            DownSample::Native => Kind::Shift(0),
            DownSample::Half => Kind::Shift(1),
            DownSample::Quarter => Kind::Shift(2),
            DownSample::NtoM(out_rate) => {
                if out_rate == 0 || out_rate > NTOM_MAX_FREQ || in_rate > NTOM_MAX_FREQ {
                    return Err(TaoError::BadParameter(format!(
                        "N-to-M 采样率超出范围: {in_rate} -> {out_rate}"
                    )));
                }
                let step = u64::from(out_rate) * NTOM_MUL / u64::from(in_rate);
                if step > NTOM_MAX * NTOM_MUL || step == 0 {
                    return Err(TaoError::BadParameter(format!(
                        "N-to-M 转换比例过大: {in_rate} -> {out_rate}"
                    )));
                }
                Kind::NtoM { step }
            }
        };
        let out_rate = mode.out_rate(in_rate);
        let mut conv = Self {
            kind,
            in_rate,
            out_rate,
            spf: spf as u64,
            ntm: 0,
            held: Vec::new(),
        };
        conv.set_frame(0);
        Ok(conv)
    }

    pub fn in_rate(&self) -> u32 {
        self.in_rate
    }

    pub fn out_rate(&self) -> u32 {
        self.out_rate
    }

    pub fn samples_per_frame(&self) -> usize {
        self.spf as usize
    }

    /// 单帧输出样本数相对输入的最大倍数 (向上取整)
    pub fn max_factor(&self) -> usize {
        match self.kind {
            Kind::Shift(_) => 1,
            Kind::NtoM { step } => step.div_ceil(NTOM_MUL).max(1) as usize,
        }
    }

    /// 第 `frame` 帧开始时的相位
    fn ntom_val(step: u64, spf: u64, frame: u64) -> u64 {
        ((NTOM_MUL >> 1) + frame * spf * step) % NTOM_MUL
    }

    /// 输入样本数 → 输出样本数
    pub fn ins_to_outs(&self, ins: u64) -> u64 {
        match self.kind {
            Kind::Shift(ds) => ins >> ds,
            Kind::NtoM { step } => ((NTOM_MUL >> 1) + ins * step) / NTOM_MUL,
        }
    }

    /// 第 `frame` 帧之前的累计输出样本数
    pub fn frame_outs(&self, frame: u64) -> u64 {
        match self.kind {
            Kind::Shift(ds) => frame * (self.spf >> ds),
            Kind::NtoM { step } => ((NTOM_MUL >> 1) + frame * self.spf * step) / NTOM_MUL,
        }
    }

    /// 包含第 `outs` 个输出样本的帧号
    pub fn frame_offset(&self, outs: u64) -> u64 {
        match self.kind {
            Kind::Shift(ds) => outs / (self.spf >> ds),
            Kind::NtoM { step } => {
                let per_frame = self.spf * step;
                let mut frame = outs * NTOM_MUL / per_frame;
                while frame > 0 && self.frame_outs(frame) > outs {
                    frame -= 1;
                }
                while self.frame_outs(frame + 1) <= outs {
                    frame += 1;
                }
                frame
            }
        }
    }

    /// 第 `frame` 帧产出的输出样本数
    pub fn expected_outsamples(&self, frame: u64) -> usize {
        match self.kind {
            Kind::Shift(ds) => (self.spf >> ds) as usize,
            Kind::NtoM { step } => {
                ((Self::ntom_val(step, self.spf, frame) + self.spf * step) / NTOM_MUL) as usize
            }
        }
    }

    /// 定位后从第 `frame` 帧的相位继续
    pub fn set_frame(&mut self, frame: u64) {
        if let Kind::NtoM { step } = self.kind {
            self.ntm = Self::ntom_val(step, self.spf, frame);
        }
        self.held.clear();
    }

    /// 转换一帧交错样本, 结果追加到 `out`
    pub fn process(&mut self, input: &[f32], channels: usize, out: &mut Vec<f32>) {
        if channels == 0 {
            return;
        }
        match self.kind {
            Kind::Shift(0) => out.extend_from_slice(input),
            Kind::Shift(ds) => {
                // 每 2^ds 个输入样本取平均
                let group = 1usize << ds;
                let norm = 1.0 / group as f32;
                for block in input.chunks_exact(group * channels) {
                    for ch in 0..channels {
                        let sum: f32 = (0..group).map(|i| block[i * channels + ch]).sum();
                        out.push(sum * norm);
                    }
                }
            }
            Kind::NtoM { step } => {
                if self.held.len() != channels {
                    self.held = vec![0.0; channels];
                }
                // 在相邻输入样本间线性插值, 相位越界的剩余量即插值位置
                for sample in input.chunks_exact(channels) {
                    self.ntm += step;
                    while self.ntm >= NTOM_MUL {
                        self.ntm -= NTOM_MUL;
                        let frac = self.ntm as f32 / step as f32;
                        for ch in 0..channels {
                            let prev = self.held[ch];
                            out.push(sample[ch] + (prev - sample[ch]) * frac);
                        }
                    }
                    self.held.copy_from_slice(sample);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_原速与降采样换算() {
        let conv = RateConverter::new(DownSample::Native, 44100, 1152).unwrap();
        assert_eq!(conv.frame_outs(10), 11520);
        assert_eq!(conv.frame_offset(11519), 9);
        assert_eq!(conv.ins_to_outs(1000), 1000);

        let conv = RateConverter::new(DownSample::Quarter, 44100, 1152).unwrap();
        assert_eq!(conv.out_rate(), 11025);
        assert_eq!(conv.expected_outsamples(3), 288);
        assert_eq!(conv.ins_to_outs(1001), 250);
        assert_eq!(conv.frame_offset(288), 1);
    }

    #[test]
    fn test_ntom_逐帧计数一致() {
        let conv = RateConverter::new(DownSample::NtoM(48000), 44100, 1152).unwrap();
        let mut total = 0u64;
        for frame in 0..200u64 {
            assert_eq!(conv.frame_outs(frame), total);
            assert_eq!(conv.frame_offset(total), frame);
            total += conv.expected_outsamples(frame) as u64;
        }
        // 1152 × 48000 / 44100 ≈ 1253.9
        assert!((1253..=1254).contains(&conv.expected_outsamples(7)));
    }

    #[test]
    fn test_ntom_实际产出与预期一致() {
        let mut conv = RateConverter::new(DownSample::NtoM(22050), 44100, 576).unwrap();
        let input = vec![0.25f32; 576 * 2];
        for frame in 0..5 {
            let mut out = Vec::new();
            conv.process(&input, 2, &mut out);
            assert_eq!(out.len() / 2, conv.expected_outsamples(frame));
        }
        conv.set_frame(3);
        let mut out = Vec::new();
        conv.process(&input, 2, &mut out);
        assert_eq!(out.len() / 2, conv.expected_outsamples(3));
    }

    #[test]
    fn test_降采样取平均() {
        let mut conv = RateConverter::new(DownSample::Half, 32000, 4).unwrap();
        let mut out = Vec::new();
        // 单声道: 1, 3, 5, 7
        conv.process(&[1.0, 3.0, 5.0, 7.0], 1, &mut out);
        assert_eq!(out, vec![2.0, 6.0]);
    }

    #[test]
    fn test_ntom_参数校验() {
        assert!(RateConverter::new(DownSample::NtoM(96000), 8000, 1152).is_err());
        assert!(RateConverter::new(DownSample::NtoM(192000), 48000, 1152).is_err());
        assert!(RateConverter::new(DownSample::NtoM(0), 48000, 1152).is_err());
        let conv = RateConverter::new(DownSample::NtoM(64000), 8000, 576).unwrap();
        assert_eq!(conv.max_factor(), 8);
    }
}
