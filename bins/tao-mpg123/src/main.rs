//! tao-mpg123 - MPEG 音频解码命令行工具
//!
//! 对标 mpg123 的 `-s` / `-w` 输出模式: 把 MPEG 音频解码为原始 PCM 写到文件或 stdout.
//! `-R` 时从 stdin 逐行读取控制命令 (JUMP / STOP).

mod decode;
mod logging;

use std::fs::File;
use std::io::{self, BufRead, BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::sync::mpsc::{self, Receiver};
use std::thread;

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{info, warn};
use tao_core::Encoding;
use tao_mpg::{
    DecodeFlags, DecodeHandle, DecoderParams, DownSample, FormatCaps, RvaMode,
};

/// MPEG 1/2/2.5 的全部原始采样率
const MPEG_RATES: [u32; 9] = [8000, 11025, 12000, 16000, 22050, 24000, 32000, 44100, 48000];

#[derive(Parser, Debug)]
#[command(name = "tao-mpg123", version, about = "纯 Rust MPEG 音频解码工具")]
struct Cli {
    /// 输入文件路径 ("-" 表示 stdin)
    input: String,

    /// 输出文件路径 ("-" 表示 stdout)
    #[arg(short, long, default_value = "-")]
    output: String,

    /// 输出编码 (s16, s32, u8, s8, ulaw, alaw, f32)
    #[arg(short, long)]
    encoding: Option<Encoding>,

    /// 降采样: 0=原速, 1=2:1, 2=4:1
    #[arg(long = "down-sample", value_parser = clap::value_parser!(u8).range(0..=2))]
    down_sample: Option<u8>,

    /// 任意输出采样率 (N-to-M 转换)
    #[arg(short, long, conflicts_with = "down_sample")]
    rate: Option<u32>,

    /// 输出单声道 (混合左右声道)
    #[arg(long, conflicts_with = "stereo")]
    mono: bool,

    /// 输出立体声
    #[arg(long)]
    stereo: bool,

    /// 不裁剪编码延迟与填充
    #[arg(long)]
    no_gapless: bool,

    /// ReplayGain 模式 (off, mix, album)
    #[arg(long, value_parser = parse_rva)]
    rva: Option<RvaMode>,

    /// 音量缩放
    #[arg(long)]
    volume: Option<f64>,

    /// 从第 N 帧开始
    #[arg(short = 'k', long = "start-frame")]
    start_frame: Option<u64>,

    /// 只解码 N 帧
    #[arg(short = 'n', long)]
    frames: Option<u64>,

    /// 经音频缓冲输出, 缓冲大小 (KiB)
    #[arg(short, long)]
    buffer: Option<usize>,

    /// 允许依据 TOC 模糊定位
    #[arg(long)]
    fuzzy: bool,

    /// 重同步最多跳过的字节数 (0 表示不限)
    #[arg(long = "resync-limit")]
    resync_limit: Option<usize>,

    /// 从 JSON 文件加载解码参数 (命令行参数优先)
    #[arg(long)]
    params: Option<PathBuf>,

    /// 先扫描整个文件以获得准确长度
    #[arg(long)]
    scan: bool,

    /// 从 stdin 读取控制命令: JUMP [+|-]帧号, STOP
    #[arg(short = 'R', long)]
    remote: bool,

    /// 日志级别 (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn parse_rva(s: &str) -> Result<RvaMode, String> {
    match s.to_ascii_lowercase().as_str() {
        "off" => Ok(RvaMode::Off),
        "mix" | "radio" => Ok(RvaMode::Mix),
        "album" | "audiophile" => Ok(RvaMode::Album),
        other => Err(format!("未知 RVA 模式: {other}")),
    }
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = logging::init("tao-mpg123", cli.verbose) {
        eprintln!("警告: 日志初始化失败: {e:#}");
    }

    if let Err(e) = run(&cli) {
        eprintln!("错误: {e:#}");
        process::exit(1);
    }
}

/// 合并 JSON 参数与命令行参数
fn build_params(cli: &Cli) -> Result<DecoderParams> {
    let mut params = match &cli.params {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("读取参数文件 {} 失败", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("解析参数文件 {} 失败", path.display()))?
        }
        None => DecoderParams::default(),
    };

    if cli.no_gapless {
        params.flags.remove(DecodeFlags::GAPLESS);
    }
    if cli.fuzzy {
        params.flags.insert(DecodeFlags::FUZZY);
    }
    if cli.mono {
        params.flags.remove(DecodeFlags::FORCE_MONO | DecodeFlags::FORCE_STEREO);
        params.flags.insert(DecodeFlags::FORCE_MONO_MIX);
    }
    if cli.stereo {
        params.flags.remove(DecodeFlags::FORCE_MONO);
        params.flags.insert(DecodeFlags::FORCE_STEREO);
    }
    if let Some(limit) = cli.resync_limit {
        params.resync_limit = (limit > 0).then_some(limit);
    }
    if let Some(rva) = cli.rva {
        params.rva = rva;
    }
    if let Some(volume) = cli.volume {
        params.outscale = volume;
    }
    match (cli.down_sample, cli.rate) {
        (_, Some(rate)) => params.down_sample = DownSample::NtoM(rate),
        (Some(1), None) => params.down_sample = DownSample::Half,
        (Some(2), None) => params.down_sample = DownSample::Quarter,
        (Some(_), None) => params.down_sample = DownSample::Native,
        (None, None) => {}
    }
    params.validate()?;
    Ok(params)
}

/// 只允许指定编码: 所有可能的输出采样率都放开该编码
fn encoding_caps(encoding: Encoding, rate: Option<u32>) -> Result<FormatCaps> {
    let mut caps = FormatCaps::none();
    for base in MPEG_RATES {
        for rate in [base, base / 2, base / 4] {
            caps.allow(rate, &[1, 2], encoding.flag())?;
        }
    }
    if let Some(rate) = rate {
        caps.allow(rate, &[1, 2], encoding.flag())?;
    }
    Ok(caps)
}

/// 启动读取 stdin 的控制线程, 未开启远程控制时返回空通道
fn remote_commands(enabled: bool) -> Result<Receiver<decode::Command>> {
    let (tx, rx) = mpsc::channel();
    if !enabled {
        return Ok(rx);
    }
    thread::Builder::new()
        .name("tao-mpg123 remote".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<decode::Command>() {
                    Ok(command) => {
                        if tx.send(command).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("忽略控制命令 {line:?}: {e:#}"),
                }
            }
        })
        .context("创建控制线程失败")?;
    Ok(rx)
}

fn run(cli: &Cli) -> Result<()> {
    if cli.remote && cli.input == "-" {
        bail!("远程控制占用 stdin, 输入不能为 \"-\"");
    }
    let params = build_params(cli)?;
    let mut handle = DecodeHandle::new(params)?;
    if let Some(encoding) = cli.encoding {
        handle.set_format_caps(encoding_caps(encoding, cli.rate)?)?;
    }

    if cli.input == "-" {
        handle.open_stream(io::stdin())?;
    } else {
        handle
            .open_file(&cli.input)
            .with_context(|| format!("打开输入 {} 失败", cli.input))?;
    }
    info!("输入: {}", cli.input);

    if cli.scan {
        let frames = handle.scan().context("扫描输入失败")?;
        info!("扫描完成: {frames} 帧, {:?} 样本", handle.length()?);
    }
    if let Some(frame) = cli.start_frame {
        handle
            .seek_frame(frame)
            .with_context(|| format!("定位到第 {frame} 帧失败"))?;
    }

    let mut out: Box<dyn Write> = if cli.output == "-" {
        Box::new(BufWriter::new(io::stdout().lock()))
    } else {
        let file = File::create(&cli.output)
            .with_context(|| format!("创建输出文件 {} 失败", cli.output))?;
        Box::new(BufWriter::new(file))
    };

    let commands = remote_commands(cli.remote)?;
    let (stats, clipped, resyncs) = match cli.buffer {
        Some(0) => bail!("缓冲大小不能为 0"),
        Some(kib) => {
            let stats =
                decode::decode_buffered(handle, cli.frames, kib * 1024, commands, &mut out)?;
            (stats, None, None)
        }
        None => {
            let stats = decode::decode_direct(&mut handle, cli.frames, &commands, &mut out)?;
            (
                stats,
                Some(handle.take_clip_count()),
                Some(handle.resync_count()),
            )
        }
    };

    info!(
        "完成: {} 帧, {} 字节, 格式 {:?}, 跳转 {} 次",
        stats.frames, stats.bytes, stats.format, stats.jumps
    );
    if let Some(clipped) = clipped.filter(|&n| n > 0) {
        warn!("{clipped} 个样本被削波");
    }
    if let Some(resyncs) = resyncs.filter(|&n| n > 0) {
        warn!("重同步 {resyncs} 次");
    }
    Ok(())
}
