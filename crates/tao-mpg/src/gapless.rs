//! 无缝播放 (gapless): 编码延迟与末尾填充的裁剪.
//!
//! 对标 mpg123 的 `frame_gapless_*` 与 `frame_set_frameseek` / `frame_set_seek`.
//! 区间 `[begin, end)` 位于输入样本域, 经当前转换器投影到输出样本域.
//! 帧计划 (首帧, 首帧偏移, 末帧, 末帧偏移, 忽略帧) 每次打开, 定位或格式变化时
//! 都从持久区间重新推导, 因此定位到 0 与从头解码得到相同的裁剪.

use tao_core::{TaoError, TaoResult};

use crate::resample::RateConverter;

/// 解码器固有延迟 (样本)
pub const GAPLESS_DELAY: u64 = 529;

/// 无缝区间 (输入样本域)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GaplessRange {
    pub begin: u64,
    /// None 表示末尾未知
    pub end: Option<u64>,
}

impl GaplessRange {
    pub fn new(begin: u64, end: Option<u64>) -> TaoResult<Self> {
        if let Some(end) = end {
            if end < begin {
                return Err(TaoError::BadParameter(format!(
                    "无缝区间末尾 {end} 早于开头 {begin}"
                )));
            }
        }
        Ok(Self { begin, end })
    }

    /// 由 LAME 标签的延迟与填充推导
    pub fn from_lame(delay: u32, padding: u32, track_frames: Option<u64>, spf: usize) -> Self {
        let begin = u64::from(delay) + GAPLESS_DELAY;
        let end = track_frames
            .filter(|&frames| frames > 0)
            .map(|frames| (frames * spf as u64).saturating_sub(u64::from(padding)) + GAPLESS_DELAY)
            .map(|end| end.max(begin));
        Self { begin, end }
    }

    /// 是否有需要裁剪的内容
    pub fn is_trimming(&self) -> bool {
        self.begin > 0 || self.end.is_some()
    }
}

/// 由区间推导出的帧计划
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FramePlan {
    /// 第一个输出样本所在帧
    pub firstframe: u64,
    /// 首帧需丢弃的前导输出样本数
    pub firstoff: u64,
    /// 最后一个输出样本所在帧
    pub lastframe: Option<u64>,
    /// 末帧保留的输出样本数
    pub lastoff: u64,
    /// 在此之前的帧只读不解码
    pub ignoreframe: u64,
}

/// 无缝播放引擎
#[derive(Debug, Clone, Default)]
pub struct GaplessEngine {
    enabled: bool,
    range: GaplessRange,
    begin_os: u64,
    end_os: Option<u64>,
    plan: FramePlan,
}

impl GaplessEngine {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            ..Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// 启用且区间非空时才裁剪
    pub fn is_active(&self) -> bool {
        self.enabled && self.range.is_trimming()
    }

    pub fn range(&self) -> GaplessRange {
        self.range
    }

    /// 设置区间, 需随后调用 `project` 与重新规划
    pub fn set_range(&mut self, range: GaplessRange) {
        self.range = range;
    }

    /// 新曲目: 清空区间与计划
    pub fn clear(&mut self) {
        *self = Self::new(self.enabled);
    }

    /// 按当前转换器计算输出域投影
    pub fn project(&mut self, conv: &RateConverter) {
        self.begin_os = conv.ins_to_outs(self.range.begin);
        self.end_os = self.range.end.map(|end| conv.ins_to_outs(end));
    }

    pub fn begin_os(&self) -> u64 {
        if self.is_active() { self.begin_os } else { 0 }
    }

    pub fn end_os(&self) -> Option<u64> {
        if self.is_active() { self.end_os } else { None }
    }

    pub fn plan(&self) -> &FramePlan {
        &self.plan
    }

    /// 重新计算末帧计划, 只依赖区间
    pub fn plan_last(&mut self, conv: &RateConverter) {
        match self.end_os() {
            Some(end_os) => {
                let lastframe = conv.frame_offset(end_os);
                self.plan.lastframe = Some(lastframe);
                self.plan.lastoff = end_os - conv.frame_outs(lastframe);
            }
            None => {
                self.plan.lastframe = None;
                self.plan.lastoff = 0;
            }
        }
    }

    /// 按帧定位规划: 从第 `frame` 帧开始输出
    pub fn plan_frame(&mut self, frame: u64, conv: &RateConverter, preshift: u64) {
        self.plan.firstframe = frame;
        self.plan.firstoff = 0;
        if self.is_active() {
            let beg_f = conv.frame_offset(self.begin_os);
            if frame <= beg_f {
                self.plan.firstframe = beg_f;
                self.plan.firstoff = self.begin_os - conv.frame_outs(beg_f);
            }
        }
        self.plan_last(conv);
        self.plan.ignoreframe = self.plan.firstframe.saturating_sub(preshift);
        log::debug!("帧计划: {:?}", self.plan);
    }

    /// 按样本定位规划, `sample` 为裁剪后的输出样本位置
    pub fn plan_sample(&mut self, sample: u64, conv: &RateConverter, preshift: u64) {
        let sp = sample + self.begin_os();
        self.plan.firstframe = conv.frame_offset(sp);
        self.plan.firstoff = sp - conv.frame_outs(self.plan.firstframe);
        self.plan_last(conv);
        self.plan.ignoreframe = self.plan.firstframe.saturating_sub(preshift);
        log::debug!("帧计划: {:?}", self.plan);
    }

    /// 第 `frame` 帧的 `n` 个输出样本中应保留的范围 `[start, end)`
    pub fn trim(&mut self, frame: u64, n: usize) -> (usize, usize) {
        let mut end = n;
        if let Some(lastframe) = self.plan.lastframe {
            if frame > lastframe {
                end = 0;
            } else if frame == lastframe {
                end = end.min(self.plan.lastoff as usize);
            }
        }
        let mut start = 0;
        if self.plan.firstoff > 0 && frame == self.plan.firstframe {
            start = (self.plan.firstoff as usize).min(end);
            self.plan.firstoff = 0;
        }
        (start, end)
    }

    /// 流结束且帧计数准确时, 用实际解码样本总数校正末尾
    ///
    /// 返回区间是否改变.
    pub fn reconcile_end(&mut self, total: u64) -> bool {
        match self.range.end {
            None => {
                log::debug!("无缝区间末尾未知, 采用实际样本总数 {total}");
                self.range.end = Some(total.max(self.range.begin));
                true
            }
            Some(end) if end > total => {
                log::warn!("无缝区间末尾 {end} 超出实际样本总数 {total}, 已钳制");
                self.range.end = Some(total.max(self.range.begin));
                true
            }
            Some(end) if end < total && !self.is_active() => {
                log::warn!("实际样本总数 {total} 超出无缝区间末尾 {end}, 已扩展");
                self.range.end = Some(total);
                true
            }
            Some(_) => false,
        }
    }

    /// 未裁剪的输出样本数 → 裁剪后的长度
    pub fn adjust_length(&self, outs: u64) -> u64 {
        if !self.is_active() {
            return outs;
        }
        let end = self.end_os.map_or(outs, |end| end.min(outs));
        end.saturating_sub(self.begin_os)
    }

    /// 未裁剪的输出位置 → 裁剪后的位置
    pub fn adjust_position(&self, outs: u64) -> u64 {
        if !self.is_active() {
            return outs;
        }
        let pos = self.end_os.map_or(outs, |end| outs.min(end));
        pos.saturating_sub(self.begin_os)
    }
}

/// 前置解码帧数: Layer 3 至少 1 帧 (位存储器), Layer 1/2 至多 2 帧
pub fn preshift(layer: u8, preframes: u32) -> u64 {
    let preframes = u64::from(preframes);
    if layer == 3 { preframes.max(1) } else { preframes.min(2) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resample::DownSample;

    fn native(spf: usize) -> RateConverter {
        RateConverter::new(DownSample::Native, 44100, spf).unwrap()
    }

    fn engine(range: GaplessRange, conv: &RateConverter) -> GaplessEngine {
        let mut g = GaplessEngine::new(true);
        g.set_range(range);
        g.project(conv);
        g
    }

    #[test]
    fn test_lame_区间() {
        let range = GaplessRange::from_lame(576, 1200, Some(100), 1152);
        assert_eq!(range.begin, 1105);
        assert_eq!(range.end, Some(114_529));
        assert_eq!(GaplessRange::from_lame(576, 1200, None, 1152).end, None);
    }

    #[test]
    fn test_从头规划与裁剪() {
        let conv = native(1152);
        let mut g = engine(GaplessRange::from_lame(576, 1200, Some(100), 1152), &conv);
        g.plan_frame(0, &conv, 4);
        let plan = *g.plan();
        assert_eq!(plan.firstframe, 0);
        assert_eq!(plan.firstoff, 1105);
        assert_eq!(plan.lastframe, Some(99));
        assert_eq!(plan.lastoff, 481);
        assert_eq!(plan.ignoreframe, 0);
        assert_eq!(g.trim(0, 1152), (1105, 1152));
        assert_eq!(g.trim(50, 1152), (0, 1152));
        assert_eq!(g.trim(99, 1152), (0, 481));
        assert_eq!(g.trim(100, 1152), (0, 0));
    }

    #[test]
    fn test_定位到零不丢失末尾裁剪() {
        let conv = native(1152);
        let mut g = engine(GaplessRange::new(1000, Some(5000)).unwrap(), &conv);
        g.plan_frame(0, &conv, 1);
        let fresh = *g.plan();
        g.plan_sample(2000, &conv, 1);
        g.plan_sample(0, &conv, 1);
        assert_eq!(*g.plan(), fresh);
        let kept: usize = (0..6)
            .map(|f| {
                let (s, e) = g.trim(f, 1152);
                e - s
            })
            .sum();
        assert_eq!(kept, 4000);
    }

    #[test]
    fn test_定位越过开头帧() {
        let conv = native(1152);
        let mut g = engine(GaplessRange::new(1000, Some(50_000)).unwrap(), &conv);
        g.plan_frame(10, &conv, 4);
        assert_eq!(g.plan().firstframe, 10);
        assert_eq!(g.plan().firstoff, 0);
        assert_eq!(g.plan().ignoreframe, 6);
        g.plan_sample(10_000, &conv, 4);
        // 11000 = 9 × 1152 + 632
        assert_eq!(g.plan().firstframe, 9);
        assert_eq!(g.plan().firstoff, 632);
    }

    #[test]
    fn test_禁用时不裁剪() {
        let conv = native(1152);
        let mut g = GaplessEngine::new(false);
        g.set_range(GaplessRange::new(1000, Some(5000)).unwrap());
        g.project(&conv);
        g.plan_frame(0, &conv, 4);
        assert_eq!(g.trim(0, 1152), (0, 1152));
        assert_eq!(g.adjust_length(10_000), 10_000);
    }

    #[test]
    fn test_末尾校正() {
        let mut g = GaplessEngine::new(true);
        g.set_range(GaplessRange::new(529, None).unwrap());
        assert!(g.reconcile_end(10_000));
        assert_eq!(g.range().end, Some(10_000));
        assert!(!g.reconcile_end(10_000));
        g.set_range(GaplessRange::new(529, Some(20_000)).unwrap());
        assert!(g.reconcile_end(10_000));
        assert_eq!(g.range().end, Some(10_000));

        let mut off = GaplessEngine::new(false);
        off.set_range(GaplessRange::new(0, Some(5000)).unwrap());
        assert!(off.reconcile_end(8000));
        assert_eq!(off.range().end, Some(8000));
    }

    #[test]
    fn test_长度与位置换算() {
        let conv = native(1152);
        let g = engine(GaplessRange::new(1000, Some(5000)).unwrap(), &conv);
        assert_eq!(g.adjust_length(5760), 4000);
        assert_eq!(g.adjust_position(1000), 0);
        assert_eq!(g.adjust_position(3000), 2000);
        assert_eq!(g.adjust_position(9000), 4000);
    }

    #[test]
    fn test_前置帧数() {
        assert_eq!(preshift(3, 0), 1);
        assert_eq!(preshift(3, 4), 4);
        assert_eq!(preshift(2, 4), 2);
        assert_eq!(preshift(1, 1), 1);
    }
}
