//! 日志初始化模块.
//!
//! 双输出 (统一级别):
//! - console: 彩色, 写到 stderr (stdout 可能是 PCM 输出)
//! - file: 无色
//!
//! 级别体系 (优先级: TAO_LOG 环境变量 > 命令行 > 默认):
//! - 默认:   info  (关键生命周期事件)
//! - `-v`:   debug (格式协商, 定位计划, 重同步)
//! - `-vv`:  trace (仅 tao crate, 含逐帧日志)
//! - `-vvv`: trace (全局, 含第三方依赖)
//!
//! 解码引擎通过 `log` 门面输出, 由 tracing-subscriber 的 log 桥接收集.
//! 日志文件输出到 $cwd/logs/{prefix}.{date}.log

use std::sync::OnceLock;

use anyhow::Context;
use chrono::{Datelike, Local, Timelike};
use tracing_subscriber::{
    EnvFilter, Registry,
    fmt::{self, FormatEvent, FormatFields, format::Writer},
    layer::{Layer, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
};

static LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// 本项目 crate 的 target 前缀
const TAO_CRATE_TARGETS: &[&str] = &["tao_mpa", "tao_core", "tao_mpg", "tao_mpg123"];

fn build_filter(verbosity: u8) -> EnvFilter {
    match verbosity {
        0 => EnvFilter::new("info"),
        1 => EnvFilter::new("debug"),
        2 => {
            let mut directives = TAO_CRATE_TARGETS
                .iter()
                .map(|t| format!("{t}=trace"))
                .collect::<Vec<_>>();
            directives.push("info".to_string());
            EnvFilter::new(directives.join(","))
        }
        _ => EnvFilter::new("trace"),
    }
}

fn filter(verbosity: u8) -> EnvFilter {
    EnvFilter::try_from_env("TAO_LOG").unwrap_or_else(|_| build_filter(verbosity))
}

/// 初始化日志系统
///
/// - `file_prefix`: 日志文件前缀
/// - `verbosity`: 0=info, 1=debug, 2=trace(tao), 3+=trace(all)
pub fn init(file_prefix: &str, verbosity: u8) -> anyhow::Result<()> {
    std::fs::create_dir_all("logs").context("创建 logs 目录失败")?;

    let file_appender = tracing_appender::rolling::RollingFileAppender::builder()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix(file_prefix)
        .filename_suffix("log")
        .build("logs")
        .context("创建日志文件失败")?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    LOG_GUARD.set(guard).ok();

    let console_layer = fmt::Layer::default()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .event_format(LineFormatter { color: true })
        .with_filter(filter(verbosity));

    let file_layer = fmt::Layer::default()
        .with_writer(non_blocking)
        .with_ansi(false)
        .event_format(LineFormatter { color: false })
        .with_filter(filter(verbosity));

    Registry::default()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("日志系统已初始化")?;
    Ok(())
}

/// 时间戳 + 级别 + 消息, console 按级别着色
struct LineFormatter {
    color: bool,
}

impl<S, N> FormatEvent<S, N> for LineFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = Local::now();
        let level = *event.metadata().level();
        let (start, end) = if self.color {
            let start = match level {
                tracing::Level::ERROR => "\x1b[31m",
                tracing::Level::WARN => "\x1b[33m",
                tracing::Level::INFO => "\x1b[32m",
                _ => "\x1b[34m",
            };
            (start, "\x1b[0m")
        } else {
            ("", "")
        };
        write!(
            writer,
            "[{:02}-{:02} {:02}:{:02}:{:02}.{:03}] {start}{level:5}{end} > ",
            now.month(),
            now.day(),
            now.hour(),
            now.minute(),
            now.second(),
            now.timestamp_subsec_millis(),
        )?;
        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
