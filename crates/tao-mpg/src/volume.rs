//! 音量与 ReplayGain (RVA).
//!
//! 有效缩放 = 用户缩放 × 10^(增益/20). 若峰值 × 有效缩放超过满幅,
//! 有效缩放钳制到 1/峰值, 用户缩放本身保持不变.
//! 仅当有效缩放变化或解码格式变化时才需要重建输出表.

use serde::{Deserialize, Serialize};

/// ReplayGain 记录
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReplayGain {
    /// 增益 (dB)
    pub gain_db: f64,
    /// 峰值 (满幅 1.0), 0 表示未知
    pub peak: f64,
}

/// RVA 模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RvaMode {
    /// 不应用 ReplayGain
    #[default]
    Off,
    /// 电台/混播增益
    Mix,
    /// 专辑增益, 缺失时回落到电台增益
    Album,
}

/// 增益记录类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GainKind {
    Mix,
    Album,
}

/// 分贝转线性倍数
pub fn db_to_factor(db: f64) -> f64 {
    10.0_f64.powf(db / 20.0)
}

/// 音量状态
#[derive(Debug, Clone)]
pub struct VolumeState {
    /// 用户缩放 (>= 0)
    base: f64,
    /// 上次应用的有效缩放
    last: Option<f64>,
    /// [电台, 专辑], None 表示未设置
    gains: [Option<ReplayGain>; 2],
    mode: RvaMode,
}

impl VolumeState {
    pub fn new(base: f64, mode: RvaMode) -> Self {
        Self {
            base: base.max(0.0),
            last: None,
            gains: [None, None],
            mode,
        }
    }

    /// 设置用户缩放, 负值按 0 处理
    pub fn set_base(&mut self, base: f64) {
        self.base = base.max(0.0);
    }

    /// 在当前用户缩放上增减
    pub fn change(&mut self, delta: f64) {
        self.set_base(self.base + delta);
    }

    pub fn base(&self) -> f64 {
        self.base
    }

    pub fn mode(&self) -> RvaMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: RvaMode) {
        self.mode = mode;
    }

    /// 设置或清除一条增益记录
    pub fn set_gain(&mut self, kind: GainKind, gain: Option<ReplayGain>) {
        let slot = match kind {
            GainKind::Mix => 0,
            GainKind::Album => 1,
        };
        self.gains[slot] = gain;
    }

    /// 新曲目: 清除增益记录并强制下次重建
    pub fn reset_track(&mut self) {
        self.gains = [None, None];
        self.last = None;
    }

    /// 当前模式下生效的增益记录
    pub fn selected(&self) -> Option<&ReplayGain> {
        match self.mode {
            RvaMode::Off => None,
            RvaMode::Mix => self.gains[0].as_ref(),
            RvaMode::Album => self.gains[1].as_ref().or(self.gains[0].as_ref()),
        }
    }

    /// 计算有效缩放, 返回 (缩放, 是否被峰值钳制)
    pub fn effective(&self) -> (f64, bool) {
        let Some(gain) = self.selected() else {
            return (self.base, false);
        };
        let scale = self.base * db_to_factor(gain.gain_db);
        if gain.peak > 0.0 && scale * gain.peak > 1.0 {
            (1.0 / gain.peak, true)
        } else {
            (scale, false)
        }
    }

    /// 重新计算有效缩放, 需要重建输出表时返回新值
    pub fn update(&mut self, decoder_change: bool) -> Option<f64> {
        let (scale, clamped) = self.effective();
        if self.last == Some(scale) && !decoder_change {
            return None;
        }
        if clamped {
            log::warn!(
                "ReplayGain 后峰值超出满幅, 有效缩放钳制为 {scale:.4} (用户缩放 {:.4})",
                self.base
            );
        }
        self.last = Some(scale);
        Some(scale)
    }

    /// 上次应用的有效缩放
    pub fn applied(&self) -> f64 {
        self.last.unwrap_or_else(|| self.effective().0)
    }

    /// 当前生效的增益 (dB)
    pub fn gain_db(&self) -> f64 {
        self.selected().map_or(0.0, |g| g.gain_db)
    }
}
