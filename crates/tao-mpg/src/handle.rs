//! 解码句柄.
//!
//! 对标 mpg123 的 `mpg123_handle`: 持有输入字节源、帧同步器、帧索引、
//! 无缝裁剪、音量和输出缓冲, 调用方通过它拉取 PCM.
//!
//! 状态: `Fresh` (刚打开, 尚未解析帧头) → `FormatChanged` (首帧或格式变化,
//! 以 `NewFormat` 报告一次) → `Decoding` → `Ended` (输入耗尽或关闭).
//! 报告 `NewFormat` 的调用不输出样本, 触发它的帧保留到下一次调用再解码.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tao_core::{TaoError, TaoResult};

use crate::config::{DecodeFlags, DecoderParams};
use crate::format::{FormatCaps, OutputFormat, negotiate};
use crate::framer::{Framer, LocatedFrame};
use crate::gapless::{GaplessEngine, GaplessRange, preshift};
use crate::header::{FrameHeader, FrameInfo, VbrMode};
use crate::index::FrameIndex;
use crate::kernel::{DecodeKernel, select_kernel};
use crate::resample::RateConverter;
use crate::source::{ByteSource, FeedSource, FileSource, RawSource, SeekTarget, StreamSource};
use crate::volume::{GainKind, ReplayGain, RvaMode, VolumeState};
use crate::writer::SampleWriter;
use crate::xing::XingTag;

/// 模糊定位后静默重同步的帧数
const FUZZY_QUIET_FRAMES: u32 = 4;

/// 模糊定位与最后索引项的最小帧距
const FUZZY_MIN_GAP: u64 = 10;

/// 句柄状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    /// 刚创建或重置, 尚未解析帧头
    Fresh,
    /// 正常解码
    Decoding,
    /// 输出格式已变化, 等待调用方确认
    FormatChanged,
    /// 输入耗尽或已关闭
    Ended,
}

/// 解码句柄
pub struct DecodeHandle {
    params: DecoderParams,
    caps: FormatCaps,
    kernel: Box<dyn DecodeKernel>,
    source: Option<Box<dyn ByteSource>>,
    framer: Framer,
    index: FrameIndex,
    gapless: GaplessEngine,
    volume: VolumeState,
    writer: SampleWriter,
    converter: Option<RateConverter>,
    format: Option<OutputFormat>,
    /// 已通过 `NewFormat` 交给调用方的格式
    announced: Option<OutputFormat>,
    state: DecodeState,

    /// 当前帧数据 (含帧头)
    frame_buf: Vec<u8>,
    /// 内核输出
    pcm: Vec<f32>,
    /// 声道适配后
    adapted: Vec<f32>,
    /// 采样率转换后
    staged: Vec<f32>,
    /// 待取走的输出字节
    out: Vec<u8>,
    out_pos: usize,

    /// 已读出但尚未解码的帧, 数据在 `frame_buf` 中
    pending: Option<LocatedFrame>,
    /// 已读出但格式协商失败的帧, 数据在 `frame_buf` 中, 下次读帧时重试
    unsettled: Option<LocatedFrame>,
    /// 当前格式是否已报告
    format_announced: bool,
    /// 解码格式变化, 需要重建输出表
    decoder_change: bool,
    /// 格式偏好已变, 下一帧重新协商
    force_format: bool,
    /// 用于格式判断的上一帧头
    header: Option<FrameHeader>,
    frame_size: usize,
    /// 下一个读出帧的帧号
    next_num: u64,
    /// 最近解码的帧号 (定位后为目标帧)
    cur_frame: u64,
    /// 转换器下一帧的帧号, 不连续时需重设相位
    conv_next: Option<u64>,
    /// 已输出部分末尾对应的未裁剪输出样本位置
    out_frame_end: u64,
    /// 帧号是否准确 (模糊定位后为否)
    accurate: bool,

    tag_checked: bool,
    /// 首个音频帧的字节偏移
    audio_start: u64,
    /// 信息标签帧的字节偏移
    tag_start: u64,
    xing: Option<XingTag>,
    track_frames: Option<u64>,
    /// 调用方设置的无缝区间, 不被标签覆盖
    user_range: bool,
    framesize_sum: u64,
    framesize_count: u64,

    pending_feed: Option<u64>,
    cancel: Arc<AtomicBool>,
}

impl DecodeHandle {
    /// 按参数创建句柄, 内核在此选定一次
    pub fn new(params: DecoderParams) -> TaoResult<Self> {
        params.validate()?;
        let kernel = select_kernel(params.kernel)?;
        Self::with_kernel(params, kernel)
    }

    /// 使用自定义内核创建句柄
    pub fn with_kernel(params: DecoderParams, kernel: Box<dyn DecodeKernel>) -> TaoResult<Self> {
        params.validate()?;
        let flags = params.flags;
        log::debug!("创建解码句柄, 内核 {}, 标志 {flags:?}", kernel.name());
        Ok(Self {
            caps: FormatCaps::all(),
            kernel,
            source: None,
            framer: Framer::new(
                params.resync_limit,
                flags.contains(DecodeFlags::NO_RESYNC),
                flags.contains(DecodeFlags::QUIET),
            ),
            index: FrameIndex::new(params.index_policy, params.index_step)?,
            gapless: GaplessEngine::new(flags.contains(DecodeFlags::GAPLESS)),
            volume: VolumeState::new(params.outscale, params.rva),
            writer: SampleWriter::new(tao_core::Encoding::S16, params.rounding),
            converter: None,
            format: None,
            announced: None,
            state: DecodeState::Fresh,
            frame_buf: Vec::new(),
            pcm: Vec::new(),
            adapted: Vec::new(),
            staged: Vec::new(),
            out: Vec::new(),
            out_pos: 0,
            pending: None,
            unsettled: None,
            format_announced: false,
            decoder_change: false,
            force_format: false,
            header: None,
            frame_size: 0,
            next_num: 0,
            cur_frame: 0,
            conv_next: None,
            out_frame_end: 0,
            accurate: true,
            tag_checked: false,
            audio_start: 0,
            tag_start: 0,
            xing: None,
            track_frames: None,
            user_range: false,
            framesize_sum: 0,
            framesize_count: 0,
            pending_feed: None,
            cancel: Arc::new(AtomicBool::new(false)),
            params,
        })
    }

    // ========================
    // 打开与关闭
    // ========================

    /// 挂接字节源并开始新曲目
    pub fn open(&mut self, source: Box<dyn ByteSource>) {
        self.reset();
        log::debug!("打开 {:?} 输入", source.kind());
        self.source = Some(source);
    }

    /// 打开文件
    pub fn open_file(&mut self, path: impl AsRef<Path>) -> TaoResult<()> {
        let source = FileSource::open(path)?;
        self.open(Box::new(source));
        Ok(())
    }

    /// 推送模式, 之后用 `feed` 提供数据
    pub fn open_feed(&mut self) {
        self.open(Box::new(FeedSource::new()));
    }

    /// 原始帧模式, 之后用 `feed` 逐帧提供数据
    pub fn open_raw(&mut self) {
        self.open(Box::new(RawSource::new()));
    }

    /// 打开不可定位的流, 参数中设置了超时时由后台线程读取
    pub fn open_stream(&mut self, reader: impl std::io::Read + Send + 'static) -> TaoResult<()> {
        let source = match self.params.timeout {
            Some(timeout) => StreamSource::with_timeout(reader, timeout)?,
            None => StreamSource::new(reader),
        };
        self.open(Box::new(source));
        Ok(())
    }

    /// 释放字节源
    pub fn close(&mut self) {
        self.source = None;
        self.pending = None;
        self.unsettled = None;
        self.state = DecodeState::Ended;
    }

    /// 回到 `Fresh`, 释放字节源, 保留已分配的缓冲
    pub fn reset(&mut self) {
        self.source = None;
        self.framer.reset();
        self.index.reset();
        self.gapless.clear();
        self.volume.reset_track();
        self.kernel.reset();
        self.converter = None;
        self.format = None;
        self.announced = None;
        self.state = DecodeState::Fresh;
        self.out.clear();
        self.out_pos = 0;
        self.pending = None;
        self.unsettled = None;
        self.format_announced = false;
        self.decoder_change = false;
        self.force_format = false;
        self.header = None;
        self.frame_size = 0;
        self.next_num = 0;
        self.cur_frame = 0;
        self.conv_next = None;
        self.out_frame_end = 0;
        self.accurate = true;
        self.tag_checked = false;
        self.audio_start = 0;
        self.tag_start = 0;
        self.xing = None;
        self.track_frames = None;
        self.user_range = false;
        self.framesize_sum = 0;
        self.framesize_count = 0;
        self.pending_feed = None;
    }

    /// 推送数据 (feed / raw 模式)
    pub fn feed(&mut self, data: &[u8]) -> TaoResult<()> {
        let source = self.source_mut()?;
        source.feed(data)?;
        self.pending_feed = None;
        Ok(())
    }

    /// 声明推送数据已结束
    pub fn finish_feed(&mut self) -> TaoResult<()> {
        self.source_mut()?.finish();
        Ok(())
    }

    fn source_mut(&mut self) -> TaoResult<&mut dyn ByteSource> {
        match self.source.as_deref_mut() {
            Some(source) => Ok(source),
            None => Err(TaoError::BadParameter("尚未打开输入".into())),
        }
    }

    // ========================
    // 解码
    // ========================

    /// 解码一帧, 返回其 PCM 字节
    ///
    /// 首帧与格式变化时返回 `NewFormat`, 此时没有样本输出.
    pub fn decode_frame(&mut self) -> TaoResult<&[u8]> {
        self.out.clear();
        self.out_pos = 0;
        if let Err(e) = self.produce() {
            if matches!(e, TaoError::NewFormat) {
                self.announced = self.format;
            }
            return Err(e);
        }
        let start = self.out_pos;
        self.out_pos = self.out.len();
        Ok(&self.out[start..])
    }

    /// 尽量填满 `buf`, 返回写入的字节数
    ///
    /// 已写入部分数据时, 遇到数据不足, 流结束或格式变化会先返回已写入的字节数,
    /// 下一次调用再报告对应信号.
    pub fn read(&mut self, buf: &mut [u8]) -> TaoResult<usize> {
        let mut written = 0;
        while written < buf.len() {
            if self.out_pos < self.out.len() {
                let n = (self.out.len() - self.out_pos).min(buf.len() - written);
                buf[written..written + n].copy_from_slice(&self.out[self.out_pos..self.out_pos + n]);
                self.out_pos += n;
                written += n;
                continue;
            }
            self.out.clear();
            self.out_pos = 0;
            match self.produce() {
                Ok(()) => {}
                Err(TaoError::NewFormat) if written > 0 => {
                    // 推迟到下一次调用报告
                    self.format_announced = false;
                    self.state = DecodeState::Decoding;
                    return Ok(written);
                }
                Err(e) if written > 0 && (e.is_signal() || matches!(e, TaoError::Cancelled)) => {
                    return Ok(written);
                }
                Err(TaoError::NewFormat) => {
                    self.announced = self.format;
                    return Err(TaoError::NewFormat);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(written)
    }

    /// 推送 `input` (可为空) 后读取到 `out`
    pub fn decode(&mut self, input: &[u8], out: &mut [u8]) -> TaoResult<usize> {
        if !input.is_empty() {
            self.feed(input)?;
        }
        self.read(out)
    }

    /// 产生下一帧输出到 `out`, 裁剪后为空的帧继续向后读
    fn produce(&mut self) -> TaoResult<()> {
        loop {
            if self.cancel.load(Ordering::Relaxed) {
                return Err(TaoError::Cancelled);
            }
            if self.state == DecodeState::Ended {
                return Err(TaoError::Eof);
            }
            if self.source.is_none() {
                return Err(TaoError::BadParameter("尚未打开输入".into()));
            }
            let located = match self.pending.take() {
                Some(located) if self.force_format => {
                    // 偏好变化时未能协商的待解码帧
                    if let Err(e) = self.setup_format(&located.header) {
                        self.pending = Some(located);
                        return Err(e);
                    }
                    located
                }
                Some(located) => located,
                None => self.read_audio_frame()?,
            };
            if !self.format_announced {
                self.format_announced = true;
                self.pending = Some(located);
                self.state = DecodeState::FormatChanged;
                return Err(TaoError::NewFormat);
            }
            self.state = DecodeState::Decoding;

            let num = self.next_num;
            self.next_num += 1;
            self.cur_frame = num;
            self.process_frame(num, &located)?;

            if !self.params.flags.contains(DecodeFlags::SEEKBUFFER) {
                if let Some(source) = self.source.as_deref_mut() {
                    source.forget();
                }
            }
            if self.out_pos < self.out.len() {
                return Ok(());
            }
        }
    }

    /// 读出下一个音频帧, 处理格式与层变化
    ///
    /// 协商成功后才记入索引与帧长统计, 失败的帧保留到下次调用重试.
    fn read_audio_frame(&mut self) -> TaoResult<LocatedFrame> {
        let located = match self.unsettled.take() {
            Some(located) => located,
            None => self.next_audio_frame()?,
        };

        let settled = if self.format_differs(&located.header) {
            self.setup_format(&located.header)
        } else if self
            .header
            .is_some_and(|old| old.layer != located.header.layer)
        {
            self.switch_layer(&located.header)
        } else {
            Ok(())
        };
        if let Err(e) = settled {
            self.unsettled = Some(located);
            return Err(e);
        }

        if self.accurate {
            self.index.add(self.next_num, located.offset)?;
        }
        self.framesize_sum += located.size as u64;
        self.framesize_count += 1;
        self.header = Some(located.header);
        self.frame_size = located.size;
        log::trace!("帧 {} @ {}: {} 字节", self.next_num, located.offset, located.size);
        Ok(located)
    }

    /// 从帧同步器取下一帧, 首帧为信息标签时跳过
    fn next_audio_frame(&mut self) -> TaoResult<LocatedFrame> {
        loop {
            let Some(source) = self.source.as_deref_mut() else {
                return Err(TaoError::BadParameter("尚未打开输入".into()));
            };
            let located = match self.framer.next_frame(source, &mut self.frame_buf) {
                Ok(located) => located,
                Err(TaoError::Eof) => {
                    self.on_eof();
                    return Err(TaoError::Eof);
                }
                Err(e) => return Err(e),
            };
            self.pending_feed = None;

            if !self.tag_checked {
                self.tag_checked = true;
                if let Some(tag) = XingTag::parse(&located.header, &self.frame_buf) {
                    self.apply_tag(tag, &located);
                    continue;
                }
                self.audio_start = located.offset;
            }
            return Ok(located);
        }
    }

    fn apply_tag(&mut self, tag: XingTag, located: &LocatedFrame) {
        self.tag_start = located.offset;
        self.audio_start = located.offset + located.size as u64;
        if tag.frames.is_some() {
            self.track_frames = tag.frames;
        }
        if let Some(lame) = &tag.lame {
            if !self.user_range {
                let range = GaplessRange::from_lame(
                    lame.delay,
                    lame.padding,
                    tag.frames,
                    located.header.samples_per_frame(),
                );
                log::debug!("LAME 无缝区间: {range:?}");
                self.gapless.set_range(range);
            }
            self.volume.set_gain(GainKind::Mix, lame.radio);
            self.volume.set_gain(GainKind::Album, lame.album);
            self.apply_volume();
        }
        self.xing = Some(tag);
    }

    fn format_differs(&self, header: &FrameHeader) -> bool {
        if self.force_format {
            return true;
        }
        match &self.header {
            None => true,
            Some(old) => {
                old.sample_rate != header.sample_rate || old.channels() != header.channels()
            }
        }
    }

    /// 协商输出格式并重建转换器, 输出表, 内核与无缝投影
    fn setup_format(&mut self, header: &FrameHeader) -> TaoResult<()> {
        let (format, mode) = negotiate(
            &self.caps,
            self.params.flags,
            self.params.down_sample,
            header.sample_rate,
            header.channels(),
        )?;
        let spf = header.samples_per_frame();
        let conv = RateConverter::new(mode, header.sample_rate, spf)?;
        let required = spf * conv.max_factor() * format.frame_bytes();
        if self.out.capacity() < required {
            self.out
                .try_reserve_exact(required - self.out.len())
                .map_err(|e| TaoError::OutOfMemory(format!("输出缓冲 {required} 字节: {e}")))?;
        }
        self.kernel.configure(header)?;
        self.force_format = false;

        let first = self.format.is_none();
        if !first {
            log::info!(
                "输出格式变化: {:?} -> {format:?}",
                self.format.unwrap_or(format)
            );
        }
        self.format = Some(format);
        self.decoder_change = true;
        self.apply_volume();

        self.gapless.project(&conv);
        let start = if first { 0 } else { self.next_num };
        self.gapless
            .plan_frame(start, &conv, preshift(header.layer.number(), self.params.preframes));
        self.converter = Some(conv);
        self.conv_next = None;
        self.format_announced = false;
        Ok(())
    }

    /// 层变化但输出格式不变: 只重建内核, 每帧样本数变化时重建转换器与无缝计划
    fn switch_layer(&mut self, header: &FrameHeader) -> TaoResult<()> {
        log::debug!("帧 {} 起切换到 Layer {}", self.next_num, header.layer.number());
        self.kernel.configure(header)?;
        let spf = header.samples_per_frame();
        if self
            .converter
            .as_ref()
            .is_none_or(|conv| conv.samples_per_frame() == spf)
        {
            return Ok(());
        }
        let (_, mode) = negotiate(
            &self.caps,
            self.params.flags,
            self.params.down_sample,
            header.sample_rate,
            header.channels(),
        )?;
        let conv = RateConverter::new(mode, header.sample_rate, spf)?;
        self.gapless.project(&conv);
        self.gapless.plan_frame(
            self.next_num,
            &conv,
            preshift(header.layer.number(), self.params.preframes),
        );
        self.converter = Some(conv);
        self.conv_next = None;
        Ok(())
    }

    /// 解码一帧并把保留的样本写入输出缓冲
    fn process_frame(&mut self, num: u64, located: &LocatedFrame) -> TaoResult<()> {
        let header = located.header;
        let plan = *self.gapless.plan();
        if num < plan.ignoreframe {
            log::trace!("跳过帧 {num} (忽略到 {})", plan.ignoreframe);
            return Ok(());
        }
        if self.accurate && plan.lastframe.is_some_and(|last| num > last) {
            return Ok(());
        }

        let spf = header.samples_per_frame();
        let channels = usize::from(header.channels());
        self.pcm.clear();
        match self
            .kernel
            .decode(&header, &self.frame_buf[..located.size], &mut self.pcm)
        {
            Ok(n) if n == spf && self.pcm.len() == spf * channels => {}
            Ok(n) => {
                log::debug!("帧 {num}: 内核输出 {n} 样本, 按 {spf} 补齐");
                self.pcm.resize(spf * channels, 0.0);
            }
            Err(e) => {
                if self.params.flags.contains(DecodeFlags::QUIET) {
                    log::debug!("帧 {num} 解码失败, 以静音代替: {e}");
                } else {
                    log::warn!("帧 {num} 解码失败, 以静音代替: {e}");
                }
                self.pcm.clear();
                self.pcm.resize(spf * channels, 0.0);
            }
        }

        let Some(format) = self.format else {
            return Err(TaoError::Internal("解码前未协商输出格式".into()));
        };
        let Some(conv) = self.converter.as_mut() else {
            return Err(TaoError::Internal("解码前未创建采样率转换器".into()));
        };
        let out_channels = usize::from(format.channels);
        adapt_channels(
            &self.pcm,
            channels,
            out_channels,
            self.params.flags,
            &mut self.adapted,
        );
        if self.conv_next != Some(num) {
            conv.set_frame(num);
        }
        self.conv_next = Some(num + 1);
        self.staged.clear();
        conv.process(&self.adapted, out_channels, &mut self.staged);

        if num < plan.firstframe {
            log::trace!("前置帧 {num} 已解码并丢弃");
            return Ok(());
        }
        let n = self.staged.len() / out_channels;
        let (start, end) = if self.accurate {
            self.gapless.trim(num, n)
        } else {
            (0, n)
        };
        self.out_frame_end = conv.frame_outs(num) + end as u64;
        self.writer.write(
            &self.staged[start * out_channels..end * out_channels],
            &mut self.out,
        );
        Ok(())
    }

    /// 输入耗尽: 帧计数准确时校正曲目长度与无缝末尾
    fn on_eof(&mut self) {
        self.state = DecodeState::Ended;
        let Some(header) = self.header else {
            return;
        };
        if !self.accurate {
            return;
        }
        let frames = self.next_num;
        if self.track_frames != Some(frames) {
            if let Some(claimed) = self.track_frames {
                log::warn!("实际帧数 {frames} 与标签记录 {claimed} 不符");
            }
            self.track_frames = Some(frames);
        }
        let total = frames * header.samples_per_frame() as u64;
        if self.gapless.reconcile_end(total) {
            if let Some(conv) = &self.converter {
                self.gapless.project(conv);
                self.gapless.plan_last(conv);
            }
        }
    }

    /// 确保已读出首个音频帧 (定位与长度计算需要帧头)
    fn init_track(&mut self) -> TaoResult<()> {
        if self.header.is_some() {
            return Ok(());
        }
        let located = self.read_audio_frame()?;
        self.pending = Some(located);
        Ok(())
    }

    fn preshift(&self) -> u64 {
        self.header
            .map_or(1, |h| preshift(h.layer.number(), self.params.preframes))
    }

    // ========================
    // 定位
    // ========================

    /// 定位到第 `frame` 帧
    pub fn seek_frame(&mut self, frame: u64) -> TaoResult<()> {
        self.init_track()?;
        if let Some(limit) = self.track_frames {
            if frame > limit {
                return Err(TaoError::SeekOutOfRange {
                    target: frame,
                    limit,
                });
            }
        }
        let Some(conv) = &self.converter else {
            return Err(TaoError::Internal("定位前未创建采样率转换器".into()));
        };
        let mut gapless = self.gapless.clone();
        gapless.plan_frame(frame, conv, self.preshift());
        self.commit_seek(gapless)
    }

    /// 定位到裁剪后的第 `sample` 个输出样本
    pub fn seek_sample(&mut self, sample: u64) -> TaoResult<()> {
        self.init_track()?;
        if let Some(limit) = self.exact_length() {
            if sample > limit {
                return Err(TaoError::SeekOutOfRange {
                    target: sample,
                    limit,
                });
            }
        }
        let Some(conv) = &self.converter else {
            return Err(TaoError::Internal("定位前未创建采样率转换器".into()));
        };
        let mut gapless = self.gapless.clone();
        gapless.plan_sample(sample, conv, self.preshift());
        self.commit_seek(gapless)
    }

    /// 按新计划移动字节源, 失败时句柄保持原状
    fn commit_seek(&mut self, gapless: GaplessEngine) -> TaoResult<()> {
        let plan = *gapless.plan();
        let target = plan.ignoreframe;
        let (frame, offset, fuzzy) = self.find_seek_point(target);
        let unindexed = !fuzzy && self.index.is_empty();

        // 目标在当前读位置之后且不早于索引点时, 直接向后读即可
        let forward = !fuzzy
            && self.accurate
            && self.state != DecodeState::Ended
            && frame <= self.next_num
            && self.next_num <= target;
        if !forward {
            let source = self.source_mut()?;
            let seek = source.seek_to(offset)?;
            if let SeekTarget::FeedFrom(at) = seek {
                log::debug!("推送模式定位, 需从偏移 {at} 重新提供数据");
                self.pending_feed = Some(at);
            }
            self.framer.reset_for_seek();
            if unindexed {
                // 没有索引可依, 回到曲目开头重新锁定首帧
                self.framer.unlock();
            }
            self.pending = None;
            self.unsettled = None;
            self.next_num = frame;
            self.kernel.reset();
            self.accurate = !fuzzy;
            if fuzzy {
                log::debug!("模糊定位到帧 {frame} (偏移 {offset})");
                self.framer.silence_resync(FUZZY_QUIET_FRAMES);
            }
        }

        self.gapless = gapless;
        self.conv_next = None;
        self.out.clear();
        self.out_pos = 0;
        self.cur_frame = plan.firstframe;
        if let Some(conv) = &self.converter {
            self.out_frame_end = conv.frame_outs(plan.firstframe) + plan.firstoff;
        }
        if self.state == DecodeState::Ended {
            self.state = DecodeState::Decoding;
        }
        Ok(())
    }

    /// 选择定位起点, 返回 (帧号, 字节偏移, 是否模糊)
    fn find_seek_point(&self, want: u64) -> (u64, u64, bool) {
        let beyond = want / self.index.step() >= self.index.len() as u64;
        if beyond {
            let last = self.index.last();
            let far = last.is_none_or(|l| want - l.frame > FUZZY_MIN_GAP);
            if self.params.flags.contains(DecodeFlags::FUZZY) && far {
                if let Some((frame, offset)) = self.fuzzy_point(want) {
                    if offset > self.audio_start {
                        return (frame, offset, true);
                    }
                }
            }
            return match last {
                Some(entry) => (entry.frame, entry.offset, false),
                None => (0, self.audio_start, false),
            };
        }
        match self.index.find(want) {
            Some(entry) => (entry.frame, entry.offset, false),
            None => (0, self.audio_start, false),
        }
    }

    /// 依据 TOC 或平均帧长估算第 `want` 帧的位置
    fn fuzzy_point(&self, want: u64) -> Option<(u64, u64)> {
        let toc = self.xing.as_ref().and_then(|x| x.toc.as_ref());
        let track_frames = self.track_frames.filter(|&f| f > 0);
        let stream_len = self
            .xing
            .as_ref()
            .and_then(|x| x.bytes)
            .or_else(|| {
                self.source
                    .as_deref()
                    .and_then(|s| s.total_len())
                    .map(|len| len.saturating_sub(self.tag_start))
            });
        if let (Some(toc), Some(frames), Some(len)) = (toc, track_frames, stream_len) {
            let entry = (want * 100 / frames).min(99);
            let frame = entry * frames / 100;
            let offset = self.tag_start + u64::from(toc[entry as usize]) * len / 256;
            return Some((frame, offset));
        }
        let mean = self.mean_framesize()?;
        Some((want, self.audio_start + (mean * want as f64) as u64))
    }

    fn mean_framesize(&self) -> Option<f64> {
        (self.framesize_count > 0).then(|| self.framesize_sum as f64 / self.framesize_count as f64)
    }

    /// 当前帧号
    pub fn tell_frame(&self) -> u64 {
        self.cur_frame
    }

    /// 裁剪后的当前输出样本位置
    pub fn tell_sample(&self) -> u64 {
        let remaining = match self.format {
            Some(format) => ((self.out.len() - self.out_pos) / format.frame_bytes()) as u64,
            None => 0,
        };
        self.gapless
            .adjust_position(self.out_frame_end.saturating_sub(remaining))
    }

    /// 推送模式定位后, 调用方需从该字节偏移重新提供数据
    pub fn pending_feed_offset(&self) -> Option<u64> {
        self.pending_feed
    }

    /// 读取全部帧建立索引并确定准确长度, 之后回到原位置
    pub fn scan(&mut self) -> TaoResult<u64> {
        if !self.source.as_deref().is_some_and(|s| s.is_seekable()) {
            return Err(TaoError::Unsupported("只有可定位的输入支持扫描".into()));
        }
        self.init_track()?;
        let back = self.tell_sample();
        let Some(header) = self.header else {
            return Err(TaoError::Internal("扫描前未读出帧头".into()));
        };

        let audio_start = self.audio_start;
        let source = self.source_mut()?;
        source.seek_to(audio_start)?;
        self.framer.reset_for_seek();
        self.pending = None;
        self.unsettled = None;
        self.index.reset();
        self.framesize_sum = 0;
        self.framesize_count = 0;

        let mut frames = 0u64;
        loop {
            let Some(source) = self.source.as_deref_mut() else {
                return Err(TaoError::BadParameter("尚未打开输入".into()));
            };
            match self.framer.next_frame(source, &mut self.frame_buf) {
                Ok(located) => {
                    self.index.add(frames, located.offset)?;
                    self.framesize_sum += located.size as u64;
                    self.framesize_count += 1;
                    frames += 1;
                }
                Err(TaoError::Eof) => break,
                Err(e) => return Err(e),
            }
        }
        log::debug!("扫描完成: {frames} 帧");
        self.track_frames = Some(frames);
        self.accurate = true;
        let total = frames * header.samples_per_frame() as u64;
        if self.gapless.reconcile_end(total) {
            if let Some(conv) = &self.converter {
                self.gapless.project(conv);
            }
        }

        // 扫描后读位置已在末尾, 按样本位置回到原处
        self.next_num = frames;
        self.state = DecodeState::Ended;
        self.seek_sample(back)?;
        Ok(frames)
    }

    /// 裁剪后的总输出样本数 (已知或可估算时)
    pub fn length(&mut self) -> TaoResult<Option<u64>> {
        match self.init_track() {
            Ok(()) | Err(TaoError::NeedMoreData) | Err(TaoError::Eof) => {}
            Err(e) => return Err(e),
        }
        if let Some(len) = self.exact_length() {
            return Ok(Some(len));
        }
        let (Some(conv), Some(mean), Some(total)) = (
            &self.converter,
            self.mean_framesize(),
            self.source.as_deref().and_then(|s| s.total_len()),
        ) else {
            return Ok(None);
        };
        let frames = (total.saturating_sub(self.audio_start) as f64 / mean) as u64;
        Ok(Some(self.gapless.adjust_length(conv.frame_outs(frames))))
    }

    fn exact_length(&self) -> Option<u64> {
        let conv = self.converter.as_ref()?;
        let frames = self.track_frames?;
        Some(self.gapless.adjust_length(conv.frame_outs(frames)))
    }

    // ========================
    // 状态查询
    // ========================

    /// 最近一次以 `NewFormat` 报告的输出格式
    ///
    /// 格式变化被 `read` 推迟报告期间仍返回旧格式, 与已交出的字节一致.
    pub fn format(&self) -> Option<OutputFormat> {
        self.announced
    }

    pub fn state(&self) -> DecodeState {
        self.state
    }

    /// 最近一帧的帧头信息
    pub fn frame_info(&self) -> Option<FrameInfo> {
        let header = self.header.as_ref()?;
        let (vbr, abr_rate) = match &self.xing {
            Some(tag) => (
                tag.vbr_mode(),
                tag.lame.as_ref().map_or(0, |lame| lame.abr_rate),
            ),
            None => (VbrMode::Cbr, 0),
        };
        Some(FrameInfo::new(header, self.frame_size, vbr, abr_rate))
    }

    /// 首帧信息标签
    pub fn xing_tag(&self) -> Option<&XingTag> {
        self.xing.as_ref()
    }

    pub fn index(&self) -> &FrameIndex {
        &self.index
    }

    pub fn params(&self) -> &DecoderParams {
        &self.params
    }

    pub fn clip_count(&self) -> u64 {
        self.writer.clip_count()
    }

    /// 取出并清零削波计数
    pub fn take_clip_count(&mut self) -> u64 {
        self.writer.take_clip_count()
    }

    /// 初始锁定后的重同步次数
    pub fn resync_count(&self) -> u64 {
        self.framer.resync_count()
    }

    /// 帧号是否准确
    pub fn is_accurate(&self) -> bool {
        self.accurate
    }

    /// 输出表重建次数
    pub fn table_regenerations(&self) -> u64 {
        self.writer.regenerations()
    }

    /// 取消标记, 在帧之间检查
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    // ========================
    // 格式, 音量与无缝设置
    // ========================

    /// 设置输出格式偏好, 已读出的待解码帧立即重新协商, 否则下一帧起生效
    pub fn set_format_caps(&mut self, caps: FormatCaps) -> TaoResult<()> {
        self.caps = caps;
        match self.pending {
            Some(located) => {
                let result = self.setup_format(&located.header);
                if result.is_err() {
                    // 待解码帧在下次调用时按新偏好重试
                    self.force_format = true;
                }
                result
            }
            None => {
                self.force_format = self.header.is_some();
                Ok(())
            }
        }
    }

    /// 设置用户音量缩放
    pub fn set_volume(&mut self, volume: f64) {
        self.volume.set_base(volume);
        self.apply_volume();
    }

    /// 调整用户音量缩放
    pub fn volume_change(&mut self, delta: f64) {
        self.volume.change(delta);
        self.apply_volume();
    }

    /// 用户音量缩放
    pub fn volume(&self) -> f64 {
        self.volume.base()
    }

    /// 实际生效的缩放 (含 ReplayGain)
    pub fn effective_volume(&self) -> f64 {
        self.volume.applied()
    }

    pub fn set_rva(&mut self, mode: RvaMode) {
        self.volume.set_mode(mode);
        self.apply_volume();
    }

    pub fn set_replay_gain(&mut self, kind: GainKind, gain: Option<ReplayGain>) {
        self.volume.set_gain(kind, gain);
        self.apply_volume();
    }

    fn apply_volume(&mut self) {
        let change = std::mem::take(&mut self.decoder_change);
        if let Some(scale) = self.volume.update(change) {
            let encoding = self.format.map_or(self.writer.encoding(), |f| f.encoding);
            self.writer.regenerate(encoding, scale);
        }
    }

    /// 设置无缝区间 (输入样本域), 覆盖标签中的值
    pub fn set_gapless_range(&mut self, begin: u64, end: Option<u64>) -> TaoResult<()> {
        let range = GaplessRange::new(begin, end)?;
        match self.init_track() {
            Ok(()) | Err(TaoError::NeedMoreData) | Err(TaoError::Eof) => {}
            Err(e) => return Err(e),
        }
        self.user_range = true;
        self.gapless.set_range(range);
        let preshift = self.preshift();
        if let Some(conv) = &self.converter {
            self.gapless.project(conv);
            self.gapless.plan_frame(self.next_num, conv, preshift);
        }
        Ok(())
    }
}

/// 声道适配: 单声道复制为立体声, 立体声按标志取左, 取右或混合
fn adapt_channels(input: &[f32], from: usize, to: usize, flags: DecodeFlags, out: &mut Vec<f32>) {
    out.clear();
    match (from, to) {
        (1, 2) => {
            out.reserve(input.len() * 2);
            for &s in input {
                out.push(s);
                out.push(s);
            }
        }
        (2, 1) => {
            out.reserve(input.len() / 2);
            for pair in input.chunks_exact(2) {
                let s = if flags.contains(DecodeFlags::FORCE_MONO_LEFT) {
                    pair[0]
                } else if flags.contains(DecodeFlags::FORCE_MONO_RIGHT) {
                    pair[1]
                } else {
                    (pair[0] + pair[1]) * 0.5
                };
                out.push(s);
            }
        }
        _ => out.extend_from_slice(input),
    }
}
