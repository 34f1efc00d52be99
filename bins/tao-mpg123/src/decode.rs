//! 解码循环: 直接写出, 或经音频缓冲由输出线程写出.
//!
//! 解码过程中可以收到远程控制命令 (对标 mpg123 `-R` 的 JUMP / STOP).
//! 缓冲模式下跳转后发送 `Resync`, 输出端丢弃跳转前已缓冲的音频.

use std::io::Write;
use std::str::FromStr;
use std::sync::mpsc::Receiver;
use std::thread;

use anyhow::{Context, Result, anyhow, bail};
use log::{debug, info, warn};
use tao_core::TaoError;
use tao_mpg::{BufferEvent, ControlMessage, DecodeHandle, OutputFormat, stream_buffer};

/// 解码统计
#[derive(Debug, Default, Clone, Copy)]
pub struct Stats {
    pub frames: u64,
    pub bytes: u64,
    pub format: Option<OutputFormat>,
    /// 执行成功的跳转次数
    pub jumps: u64,
}

/// 远程控制命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// 跳到指定帧, `relative` 时相对当前帧
    Jump { offset: i64, relative: bool },
    /// 停止解码
    Stop,
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            bail!("空命令");
        };
        match verb.to_ascii_uppercase().as_str() {
            "J" | "JUMP" => {
                let Some(arg) = words.next() else {
                    bail!("JUMP 缺少帧号");
                };
                let relative = arg.starts_with(['+', '-']);
                let offset = arg
                    .parse::<i64>()
                    .with_context(|| format!("无效的帧号: {arg}"))?;
                Ok(Self::Jump { offset, relative })
            }
            "S" | "STOP" | "Q" | "QUIT" => Ok(Self::Stop),
            other => bail!("未知命令: {other}"),
        }
    }
}

impl Command {
    /// 按当前帧求出跳转目标
    fn target(offset: i64, relative: bool, current: u64) -> u64 {
        if relative {
            current.saturating_add_signed(offset)
        } else {
            offset.max(0) as u64
        }
    }
}

enum Event<'a> {
    Data(&'a [u8]),
    Format(OutputFormat),
    /// 跳转已完成, 此前产生的音频作废
    Jumped(u64),
}

/// 逐帧解码, 对每个事件调用 `on_event`, 帧之间处理控制命令
fn pump(
    handle: &mut DecodeHandle,
    limit: Option<u64>,
    commands: &Receiver<Command>,
    mut on_event: impl FnMut(Event<'_>) -> Result<()>,
) -> Result<u64> {
    let mut frames = 0u64;
    'decode: while limit.is_none_or(|limit| frames < limit) {
        while let Ok(command) = commands.try_recv() {
            match command {
                Command::Stop => {
                    info!("收到停止命令");
                    break 'decode;
                }
                Command::Jump { offset, relative } => {
                    let target = Command::target(offset, relative, handle.tell_frame());
                    match handle.seek_frame(target) {
                        Ok(()) => on_event(Event::Jumped(target))?,
                        Err(e) => warn!("跳转到第 {target} 帧失败: {e}"),
                    }
                }
            }
        }
        match handle.decode_frame() {
            Ok(pcm) => {
                frames += 1;
                if !pcm.is_empty() {
                    on_event(Event::Data(pcm))?;
                }
            }
            Err(TaoError::NewFormat) => {
                if let Some(format) = handle.format() {
                    on_event(Event::Format(format))?;
                }
            }
            Err(TaoError::Eof) => break,
            Err(TaoError::NeedMoreData) => {
                warn!("输入在帧中途结束");
                break;
            }
            Err(e) => return Err(e).context(format!("解码第 {frames} 帧失败")),
        }
    }
    Ok(frames)
}

fn announce(format: OutputFormat) {
    info!(
        "输出格式: {} Hz, {} 声道, {}",
        format.rate, format.channels, format.encoding
    );
}

/// 在当前线程解码并写出
pub fn decode_direct(
    handle: &mut DecodeHandle,
    limit: Option<u64>,
    commands: &Receiver<Command>,
    out: &mut dyn Write,
) -> Result<Stats> {
    let mut stats = Stats::default();
    let frames = pump(handle, limit, commands, |event| {
        match event {
            Event::Data(pcm) => {
                out.write_all(pcm).context("写出 PCM 失败")?;
                stats.bytes += pcm.len() as u64;
            }
            Event::Format(format) => {
                announce(format);
                stats.format = Some(format);
            }
            Event::Jumped(frame) => {
                debug!("跳转到第 {frame} 帧");
                stats.jumps += 1;
            }
        }
        Ok(())
    })?;
    stats.frames = frames;
    out.flush().context("刷新输出失败")?;
    Ok(stats)
}

/// 解码线程写入容量为 `capacity` 字节的音频缓冲, 当前线程读出并写出
pub fn decode_buffered(
    mut handle: DecodeHandle,
    limit: Option<u64>,
    capacity: usize,
    commands: Receiver<Command>,
    out: &mut dyn Write,
) -> Result<Stats> {
    let (mut writer, mut reader) = stream_buffer(capacity)?;
    let producer = thread::Builder::new()
        .name("tao-mpg123 decoder".into())
        .spawn(move || -> Result<(u64, u64)> {
            let mut jumps = 0u64;
            let frames = pump(&mut handle, limit, &commands, |event| {
                match event {
                    Event::Data(pcm) => writer.write(pcm)?,
                    Event::Format(format) => writer.format_changed(format)?,
                    Event::Jumped(frame) => {
                        debug!("跳转到第 {frame} 帧, 丢弃已缓冲音频");
                        writer.resync()?;
                        jumps += 1;
                    }
                }
                Ok(())
            })?;
            writer.terminate()?;
            Ok((frames, jumps))
        })
        .context("创建解码线程失败")?;

    let mut stats = Stats::default();
    let mut buf = vec![0u8; capacity.clamp(1024, 64 * 1024)];
    loop {
        match reader.read(&mut buf) {
            Ok(BufferEvent::Data(n)) => {
                out.write_all(&buf[..n]).context("写出 PCM 失败")?;
                stats.bytes += n as u64;
            }
            Ok(BufferEvent::Control(ControlMessage::FormatChanged(format))) => {
                announce(format);
                stats.format = Some(format);
            }
            Ok(BufferEvent::Control(ControlMessage::Resync)) => {
                debug!("缓冲重同步, 读位置 {}", reader.position());
            }
            Ok(BufferEvent::Control(ControlMessage::Terminate)) | Err(TaoError::Eof) => break,
            Err(e) => return Err(e.into()),
        }
    }
    drop(reader);
    out.flush().context("刷新输出失败")?;

    let (frames, jumps) = producer
        .join()
        .map_err(|_| anyhow!("解码线程异常退出"))??;
    stats.frames = frames;
    stats.jumps = jumps;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::mpsc;
    use tao_core::{Encoding, TaoResult};
    use tao_mpg::{DecodeKernel, DecoderParams, FileSource, FormatCaps, FrameHeader};

    /// MPEG-1 Layer 3 128kbps 44100 Hz 单声道, 417 字节
    const MONO: u32 = 0xFFFB_90C0;
    const SPF: usize = 1152;

    /// 输出帧号 · 每帧样本数 + 帧内序号, 按 2^20 缩放
    struct RampKernel;

    impl DecodeKernel for RampKernel {
        fn name(&self) -> &str {
            "ramp"
        }

        fn configure(&mut self, _header: &FrameHeader) -> TaoResult<()> {
            Ok(())
        }

        fn decode(
            &mut self,
            header: &FrameHeader,
            frame: &[u8],
            out: &mut Vec<f32>,
        ) -> TaoResult<usize> {
            let num = u32::from_be_bytes([frame[4], frame[5], frame[6], frame[7]]) as usize;
            let spf = header.samples_per_frame();
            out.extend((0..spf).map(|i| (num * spf + i) as f32 / (1 << 20) as f32));
            Ok(spf)
        }

        fn reset(&mut self) {}
    }

    fn handle(frames: u32) -> DecodeHandle {
        let mut params = DecoderParams::default();
        params.flags.remove(tao_mpg::DecodeFlags::GAPLESS);
        let mut h = DecodeHandle::with_kernel(params, Box::new(RampKernel)).unwrap();
        let mut caps = FormatCaps::none();
        caps.allow(44100, &[1], Encoding::F32.flag()).unwrap();
        h.set_format_caps(caps).unwrap();
        let mut data = Vec::new();
        for n in 0..frames {
            let mut f = MONO.to_be_bytes().to_vec();
            f.extend_from_slice(&n.to_be_bytes());
            f.resize(417, 0);
            data.extend(f);
        }
        h.open(Box::new(FileSource::new(Cursor::new(data)).unwrap()));
        h
    }

    fn first_index(pcm: &[u8]) -> u64 {
        (f32::from_ne_bytes([pcm[0], pcm[1], pcm[2], pcm[3]]) * (1 << 20) as f32) as u64
    }

    #[test]
    fn test_命令解析() {
        assert_eq!(
            "JUMP 120".parse::<Command>().unwrap(),
            Command::Jump {
                offset: 120,
                relative: false
            }
        );
        assert_eq!(
            "j -5".parse::<Command>().unwrap(),
            Command::Jump {
                offset: -5,
                relative: true
            }
        );
        assert_eq!("quit".parse::<Command>().unwrap(), Command::Stop);
        assert!("JUMP".parse::<Command>().is_err());
        assert!("JUMP x".parse::<Command>().is_err());
        assert!("PAUSE".parse::<Command>().is_err());
        assert_eq!(Command::target(-5, true, 3), 0);
        assert_eq!(Command::target(4, true, 3), 7);
    }

    #[test]
    fn test_缓冲模式跳转后只输出新位置的音频() {
        let (tx, rx) = mpsc::channel();
        tx.send(Command::Jump {
            offset: 6,
            relative: false,
        })
        .unwrap();
        let mut out = Vec::new();
        let stats = decode_buffered(handle(10), None, 8 * 1024, rx, &mut out).unwrap();
        assert_eq!(stats.jumps, 1);
        assert_eq!(out.len(), 4 * SPF * 4);
        assert_eq!(first_index(&out), 6 * SPF as u64);
    }

    #[test]
    fn test_直接模式停止命令() {
        let (tx, rx) = mpsc::channel();
        tx.send(Command::Stop).unwrap();
        let mut h = handle(3);
        let mut out = Vec::new();
        let stats = decode_direct(&mut h, None, &rx, &mut out).unwrap();
        assert_eq!(stats.frames, 0);
        assert!(out.is_empty());
    }
}
