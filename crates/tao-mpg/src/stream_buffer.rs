//! 生产者/消费者音频缓冲.
//!
//! 对标 mpg123 的 xfermem: 解码端写入 PCM, 输出端读出, 两端可在同一进程的
//! 不同线程, 也可在不同进程. 缓冲是一段内存映射: 头部放读写游标与控制槽,
//! 其后是环形数据区. 匿名映射用于线程间, 文件映射用于进程间, 两者接口相同.
//!
//! 写游标只由生产端推进, 读游标只由消费端推进, 用量 = 写游标 - 读游标.
//! 控制消息记录发送时的写游标位置, 消费端读到该位置时取出. `FormatChanged`
//! 与 `Resync` 会阻塞生产端直到消费端确认; `Resync` 让消费端丢弃尚未读出的音频.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use memmap2::{MmapMut, MmapOptions};
use tao_core::{Encoding, TaoError, TaoResult};

use crate::format::OutputFormat;

/// "TAOXFERM"
const MAGIC: u64 = 0x5441_4F58_4645_524D;

const MAGIC_AT: usize = 0;
const CAPACITY_AT: usize = 8;
const WRITE_POS_AT: usize = 16;
const READ_POS_AT: usize = 24;
const WRITER_CLOSED_AT: usize = 32;
const READER_CLOSED_AT: usize = 40;
/// 已发送 / 已确认的控制消息数
const CTRL_SENT_AT: usize = 48;
const CTRL_ACKED_AT: usize = 56;
/// 控制槽: 位置, 类型, 格式
const CTRL_POS_AT: usize = 64;
const CTRL_KIND_AT: usize = 72;
const CTRL_RATE_AT: usize = 80;
const CTRL_CHANNELS_AT: usize = 88;
const CTRL_ENCODING_AT: usize = 96;
const HEADER_LEN: usize = 128;

const KIND_TERMINATE: u64 = 1;
const KIND_FORMAT: u64 = 2;
const KIND_RESYNC: u64 = 3;

/// 轮询等待的最长间隔
const MAX_BACKOFF: Duration = Duration::from_millis(2);

/// 控制消息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// 此前写入的音频之后不再有数据
    Terminate,
    /// 此位置之后的音频使用新格式
    FormatChanged(OutputFormat),
    /// 丢弃尚未读出的音频 (如定位后)
    Resync,
}

impl ControlMessage {
    fn kind(&self) -> u64 {
        match self {
            Self::Terminate => KIND_TERMINATE,
            Self::FormatChanged(_) => KIND_FORMAT,
            Self::Resync => KIND_RESYNC,
        }
    }
}

/// 消费端读到的事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferEvent {
    /// 读出的字节数
    Data(usize),
    Control(ControlMessage),
}

#[derive(Debug, Clone, Copy)]
struct Control {
    /// 发送时生产端已写入的字节总数
    at: u64,
    msg: ControlMessage,
}

/// 共享映射区
struct Region {
    /// 只用于保持映射存活, 访问一律经由 `base`
    _map: MmapMut,
    base: *mut u8,
    capacity: usize,
}

// 映射区头部只通过原子操作访问, 数据区的同一段同一时刻只归一端所有
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    fn anonymous(capacity: usize) -> TaoResult<Self> {
        let map = MmapOptions::new()
            .len(HEADER_LEN + capacity)
            .map_anon()
            .map_err(|e| TaoError::OutOfMemory(format!("音频缓冲 {capacity} 字节: {e}")))?;
        let region = Self::wrap(map, capacity);
        region.init();
        Ok(region)
    }

    fn create(path: &Path, capacity: usize) -> TaoResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len((HEADER_LEN + capacity) as u64)?;
        let map = Self::map_file(&file)?;
        let region = Self::wrap(map, capacity);
        region.init();
        Ok(region)
    }

    fn open(path: &Path) -> TaoResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let map = Self::map_file(&file)?;
        let len = map.len();
        if len < HEADER_LEN {
            return Err(TaoError::Stream(format!(
                "{} 不是音频缓冲文件: 长度 {len}",
                path.display()
            )));
        }
        let mut region = Self::wrap(map, 0);
        if region.cell(MAGIC_AT).load(Ordering::Acquire) != MAGIC {
            return Err(TaoError::Stream(format!(
                "{} 不是音频缓冲文件: 标识不符",
                path.display()
            )));
        }
        let capacity = region.cell(CAPACITY_AT).load(Ordering::Relaxed) as usize;
        if capacity == 0 || len != HEADER_LEN + capacity {
            return Err(TaoError::Stream(format!(
                "音频缓冲文件 {} 长度 {len} 与容量 {capacity} 不符",
                path.display()
            )));
        }
        region.capacity = capacity;
        Ok(region)
    }

    fn wrap(mut map: MmapMut, capacity: usize) -> Self {
        let base = map.as_mut_ptr();
        Self {
            _map: map,
            base,
            capacity,
        }
    }

    fn map_file(file: &File) -> TaoResult<MmapMut> {
        // 映射期间文件长度不变, 只有两端通过本模块访问
        unsafe { MmapMut::map_mut(file) }.map_err(TaoError::from)
    }

    /// 写入头部, 标识最后写入
    fn init(&self) {
        for at in (CAPACITY_AT..HEADER_LEN).step_by(8) {
            self.cell(at).store(0, Ordering::Relaxed);
        }
        self.cell(CAPACITY_AT)
            .store(self.capacity as u64, Ordering::Relaxed);
        self.cell(MAGIC_AT).store(MAGIC, Ordering::Release);
    }

    fn cell(&self, at: usize) -> &AtomicU64 {
        debug_assert!(at % 8 == 0 && at < HEADER_LEN);
        // 映射按页对齐, 头部字段 8 字节对齐且在映射范围内
        unsafe { &*(self.base.add(at) as *const AtomicU64) }
    }

    fn load(&self, at: usize) -> u64 {
        self.cell(at).load(Ordering::Acquire)
    }

    fn is_set(&self, at: usize) -> bool {
        self.load(at) != 0
    }

    fn data(&self) -> *mut u8 {
        // 数据区紧随头部
        unsafe { self.base.add(HEADER_LEN) }
    }

    /// 把 `src` 复制到环形位置 `pos`, 调用方保证该段空闲
    fn copy_in(&self, pos: u64, src: &[u8]) {
        let start = (pos % self.capacity as u64) as usize;
        let first = src.len().min(self.capacity - start);
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), self.data().add(start), first);
            ptr::copy_nonoverlapping(src[first..].as_ptr(), self.data(), src.len() - first);
        }
    }

    /// 从环形位置 `pos` 复制到 `dst`, 调用方保证该段已写入
    fn copy_out(&self, pos: u64, dst: &mut [u8]) {
        let start = (pos % self.capacity as u64) as usize;
        let first = dst.len().min(self.capacity - start);
        unsafe {
            ptr::copy_nonoverlapping(self.data().add(start), dst.as_mut_ptr(), first);
            ptr::copy_nonoverlapping(self.data(), dst[first..].as_mut_ptr(), dst.len() - first);
        }
    }

    fn used(&self) -> usize {
        let write = self.load(WRITE_POS_AT);
        let read = self.load(READ_POS_AT);
        write.saturating_sub(read) as usize
    }

    fn post(&self, control: Control) {
        let (rate, channels, encoding) = match control.msg {
            ControlMessage::FormatChanged(format) => (
                u64::from(format.rate),
                u64::from(format.channels),
                u64::from(format.encoding.flag().bits()),
            ),
            _ => (0, 0, 0),
        };
        self.cell(CTRL_POS_AT).store(control.at, Ordering::Relaxed);
        self.cell(CTRL_KIND_AT)
            .store(control.msg.kind(), Ordering::Relaxed);
        self.cell(CTRL_RATE_AT).store(rate, Ordering::Relaxed);
        self.cell(CTRL_CHANNELS_AT)
            .store(channels, Ordering::Relaxed);
        self.cell(CTRL_ENCODING_AT)
            .store(encoding, Ordering::Relaxed);
        self.cell(CTRL_SENT_AT).fetch_add(1, Ordering::AcqRel);
    }

    /// 取出控制槽中尚未确认的消息
    fn peek_control(&self) -> TaoResult<Option<Control>> {
        if self.load(CTRL_SENT_AT) == self.load(CTRL_ACKED_AT) {
            return Ok(None);
        }
        let at = self.cell(CTRL_POS_AT).load(Ordering::Relaxed);
        let msg = match self.cell(CTRL_KIND_AT).load(Ordering::Relaxed) {
            KIND_TERMINATE => ControlMessage::Terminate,
            KIND_RESYNC => ControlMessage::Resync,
            KIND_FORMAT => {
                let bits = self.cell(CTRL_ENCODING_AT).load(Ordering::Relaxed);
                let encoding = Encoding::PREFERENCE
                    .into_iter()
                    .find(|e| u64::from(e.flag().bits()) == bits)
                    .ok_or_else(|| TaoError::Stream(format!("未知的样本编码位 {bits:#x}")))?;
                let rate = self.cell(CTRL_RATE_AT).load(Ordering::Relaxed);
                let channels = self.cell(CTRL_CHANNELS_AT).load(Ordering::Relaxed);
                ControlMessage::FormatChanged(OutputFormat {
                    rate: rate as u32,
                    channels: channels as u16,
                    encoding,
                })
            }
            kind => return Err(TaoError::Stream(format!("未知的控制消息类型 {kind}"))),
        };
        Ok(Some(Control { at, msg }))
    }
}

/// 轮询等待条件成立, 间隔逐步加长
fn wait_until(mut ready: impl FnMut() -> bool) {
    let mut backoff = Duration::from_micros(10);
    while !ready() {
        thread::sleep(backoff);
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

/// 创建进程内使用的容量为 `capacity` 字节的缓冲
pub fn stream_buffer(capacity: usize) -> TaoResult<(BufferWriter, BufferReader)> {
    if capacity == 0 {
        return Err(TaoError::BadParameter("缓冲容量不能为 0".into()));
    }
    let region = Arc::new(Region::anonymous(capacity)?);
    log::debug!("创建 {capacity} 字节音频缓冲");
    Ok((
        BufferWriter::new(Arc::clone(&region)),
        BufferReader::new(region),
    ))
}

/// 生产端
pub struct BufferWriter {
    region: Arc<Region>,
    position: u64,
}

impl BufferWriter {
    fn new(region: Arc<Region>) -> Self {
        Self {
            region,
            position: 0,
        }
    }

    /// 在 `path` 创建跨进程共享的缓冲文件, 消费端用 [`BufferReader::open_shared`] 打开
    pub fn create_shared(path: impl AsRef<Path>, capacity: usize) -> TaoResult<Self> {
        if capacity == 0 {
            return Err(TaoError::BadParameter("缓冲容量不能为 0".into()));
        }
        let path = path.as_ref();
        let region = Region::create(path, capacity)?;
        log::debug!("在 {} 创建 {capacity} 字节共享音频缓冲", path.display());
        Ok(Self::new(Arc::new(region)))
    }

    pub fn capacity(&self) -> usize {
        self.region.capacity
    }

    pub fn free(&self) -> usize {
        self.capacity() - self.used()
    }

    pub fn used(&self) -> usize {
        self.region.used()
    }

    /// 已写入的字节总数
    pub fn position(&self) -> u64 {
        self.position
    }

    fn reader_gone(&self) -> TaoError {
        TaoError::Stream("音频缓冲消费端已关闭".into())
    }

    fn reader_closed(&self) -> bool {
        self.region.is_set(READER_CLOSED_AT)
    }

    /// 写入全部数据, 空间不足时阻塞
    pub fn write(&mut self, mut data: &[u8]) -> TaoResult<()> {
        while !data.is_empty() {
            if self.reader_closed() {
                return Err(self.reader_gone());
            }
            let n = self.free().min(data.len());
            if n == 0 {
                wait_until(|| self.free() > 0 || self.reader_closed());
                continue;
            }
            self.region.copy_in(self.position, &data[..n]);
            self.position += n as u64;
            self.region
                .cell(WRITE_POS_AT)
                .store(self.position, Ordering::Release);
            data = &data[n..];
        }
        Ok(())
    }

    /// 控制槽空出后放入消息
    fn send(&mut self, msg: ControlMessage) -> TaoResult<()> {
        let region = &self.region;
        wait_until(|| {
            region.load(CTRL_SENT_AT) == region.load(CTRL_ACKED_AT)
                || region.is_set(READER_CLOSED_AT)
        });
        if self.reader_closed() {
            return Err(self.reader_gone());
        }
        self.region.post(Control {
            at: self.position,
            msg,
        });
        Ok(())
    }

    fn send_and_wait(&mut self, msg: ControlMessage) -> TaoResult<()> {
        self.send(msg)?;
        let region = &self.region;
        let sent = region.load(CTRL_SENT_AT);
        wait_until(|| {
            region.load(CTRL_ACKED_AT) >= sent || region.is_set(READER_CLOSED_AT)
        });
        if self.region.load(CTRL_ACKED_AT) >= sent {
            Ok(())
        } else {
            Err(self.reader_gone())
        }
    }

    /// 通知格式变化, 消费端确认后返回
    pub fn format_changed(&mut self, format: OutputFormat) -> TaoResult<()> {
        log::debug!("缓冲位置 {}: 格式变为 {format:?}", self.position);
        self.send_and_wait(ControlMessage::FormatChanged(format))
    }

    /// 让消费端丢弃未读出的音频, 消费端确认后返回
    pub fn resync(&mut self) -> TaoResult<()> {
        log::debug!("缓冲位置 {}: 重同步", self.position);
        self.send_and_wait(ControlMessage::Resync)
    }

    /// 声明数据结束, 消费端读完已写入的音频后收到 `Terminate`
    pub fn terminate(mut self) -> TaoResult<()> {
        self.send(ControlMessage::Terminate)
    }
}

impl Drop for BufferWriter {
    fn drop(&mut self) {
        self.region
            .cell(WRITER_CLOSED_AT)
            .store(1, Ordering::Release);
    }
}

/// 消费端
pub struct BufferReader {
    region: Arc<Region>,
    position: u64,
    next: Option<Control>,
}

impl BufferReader {
    fn new(region: Arc<Region>) -> Self {
        Self {
            region,
            position: 0,
            next: None,
        }
    }

    /// 打开生产端用 [`BufferWriter::create_shared`] 创建的缓冲文件
    pub fn open_shared(path: impl AsRef<Path>) -> TaoResult<Self> {
        let path = path.as_ref();
        let region = Region::open(path)?;
        let position = region.load(READ_POS_AT);
        log::debug!(
            "打开共享音频缓冲 {}: {} 字节",
            path.display(),
            region.capacity
        );
        Ok(Self {
            region: Arc::new(region),
            position,
            next: None,
        })
    }

    pub fn capacity(&self) -> usize {
        self.region.capacity
    }

    pub fn used(&self) -> usize {
        self.region.used()
    }

    pub fn free(&self) -> usize {
        self.capacity() - self.used()
    }

    /// 已读出 (含丢弃) 的字节总数
    pub fn position(&self) -> u64 {
        self.position
    }

    /// 读取下一个事件, 没有数据时阻塞
    ///
    /// 生产端未发送 `Terminate` 就关闭时, 读完剩余数据后返回 `Eof`.
    pub fn read(&mut self, buf: &mut [u8]) -> TaoResult<BufferEvent> {
        loop {
            if let Some(event) = self.poll(buf)? {
                return Ok(event);
            }
            let region = &self.region;
            wait_until(|| {
                region.used() > 0
                    || region.load(CTRL_SENT_AT) != region.load(CTRL_ACKED_AT)
                    || region.is_set(WRITER_CLOSED_AT)
            });
        }
    }

    /// 非阻塞读取, 暂无事件时返回 None
    pub fn try_read(&mut self, buf: &mut [u8]) -> TaoResult<Option<BufferEvent>> {
        self.poll(buf)
    }

    fn poll(&mut self, buf: &mut [u8]) -> TaoResult<Option<BufferEvent>> {
        if self.next.is_none() {
            self.next = self.region.peek_control()?;
        }

        if let Some(control) = self.next {
            if control.msg == ControlMessage::Resync && self.position < control.at {
                let dropped = control.at - self.position;
                self.advance(dropped as usize);
                log::debug!("重同步: 丢弃 {dropped} 字节");
            }
            if self.position >= control.at {
                self.next = None;
                self.region
                    .cell(CTRL_ACKED_AT)
                    .fetch_add(1, Ordering::AcqRel);
                return Ok(Some(BufferEvent::Control(control.msg)));
            }
        }

        let mut n = self.used().min(buf.len());
        if let Some(control) = &self.next {
            n = n.min((control.at - self.position) as usize);
        }
        if n > 0 {
            self.region.copy_out(self.position, &mut buf[..n]);
            self.advance(n);
            return Ok(Some(BufferEvent::Data(n)));
        }

        if self.next.is_none()
            && self.used() == 0
            && self.region.is_set(WRITER_CLOSED_AT)
            && self.region.load(CTRL_SENT_AT) == self.region.load(CTRL_ACKED_AT)
        {
            return Err(TaoError::Eof);
        }
        Ok(None)
    }

    fn advance(&mut self, n: usize) {
        self.position += n as u64;
        self.region
            .cell(READ_POS_AT)
            .store(self.position, Ordering::Release);
    }
}

impl Drop for BufferReader {
    fn drop(&mut self) {
        self.region
            .cell(READER_CLOSED_AT)
            .store(1, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    const FORMAT: OutputFormat = OutputFormat {
        rate: 44100,
        channels: 2,
        encoding: Encoding::S16,
    };

    /// 跨进程测试中子进程读取的缓冲文件
    const SHARED_PATH_ENV: &str = "TAO_MPG_SHARED_BUFFER";

    /// 读到 Terminate 为止, 返回 (数据, 控制消息及其位置)
    fn drain(reader: &mut BufferReader) -> (Vec<u8>, Vec<(u64, ControlMessage)>) {
        let mut data = Vec::new();
        let mut controls = Vec::new();
        let mut buf = [0u8; 37];
        loop {
            match reader.read(&mut buf).unwrap() {
                BufferEvent::Data(n) => data.extend_from_slice(&buf[..n]),
                BufferEvent::Control(msg) => {
                    controls.push((reader.position(), msg));
                    if msg == ControlMessage::Terminate {
                        return (data, controls);
                    }
                }
            }
        }
    }

    fn pattern(len: u32) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_用量与空闲之和等于容量() {
        let (mut writer, mut reader) = stream_buffer(64).unwrap();
        assert_eq!(writer.used() + writer.free(), writer.capacity());
        writer.write(&[1u8; 40]).unwrap();
        assert_eq!(writer.used(), 40);
        assert_eq!(reader.used() + reader.free(), 64);
        let mut buf = [0u8; 16];
        assert_eq!(reader.read(&mut buf).unwrap(), BufferEvent::Data(16));
        assert_eq!(reader.used(), 24);
        assert_eq!(writer.used() + writer.free(), 64);
    }

    #[test]
    fn test_环绕后数据不错位() {
        let (mut writer, mut reader) = stream_buffer(10).unwrap();
        let mut buf = [0u8; 10];
        writer.write(&[1, 2, 3, 4, 5, 6, 7]).unwrap();
        assert_eq!(reader.read(&mut buf[..6]).unwrap(), BufferEvent::Data(6));
        writer.write(&[8, 9, 10, 11, 12, 13, 14, 15]).unwrap();
        assert_eq!(reader.read(&mut buf).unwrap(), BufferEvent::Data(9));
        assert_eq!(buf[..9], [7, 8, 9, 10, 11, 12, 13, 14, 15]);
    }

    #[test]
    fn test_跨线程按序传输() {
        let (mut writer, mut reader) = stream_buffer(16).unwrap();
        let expected = pattern(5000);
        let send = expected.clone();
        let producer = thread::spawn(move || {
            for chunk in send.chunks(97) {
                writer.write(chunk).unwrap();
            }
            writer.terminate().unwrap();
        });
        let (data, controls) = drain(&mut reader);
        producer.join().unwrap();
        assert_eq!(data, expected);
        assert_eq!(controls, vec![(5000, ControlMessage::Terminate)]);
    }

    #[test]
    fn test_格式变化在对应位置送达() {
        let (mut writer, mut reader) = stream_buffer(256).unwrap();
        let producer = thread::spawn(move || {
            writer.write(&[1u8; 100]).unwrap();
            writer.format_changed(FORMAT).unwrap();
            writer.write(&[2u8; 50]).unwrap();
            writer.terminate().unwrap();
        });
        let (data, controls) = drain(&mut reader);
        producer.join().unwrap();
        assert_eq!(data.len(), 150);
        assert!(data[..100].iter().all(|&b| b == 1));
        assert_eq!(
            controls,
            vec![
                (100, ControlMessage::FormatChanged(FORMAT)),
                (150, ControlMessage::Terminate)
            ]
        );
    }

    #[test]
    fn test_重同步丢弃未读音频() {
        let (mut writer, mut reader) = stream_buffer(128).unwrap();
        writer.write(&[9u8; 64]).unwrap();
        let producer = thread::spawn(move || {
            writer.resync().unwrap();
            writer.write(b"after").unwrap();
            writer.terminate().unwrap();
        });
        let (data, controls) = drain(&mut reader);
        producer.join().unwrap();
        assert_eq!(controls[0], (64, ControlMessage::Resync));
        assert!(data.ends_with(b"after"));
        assert_eq!(reader.position(), 69);
    }

    #[test]
    fn test_消费端关闭唤醒生产端() {
        let (mut writer, reader) = stream_buffer(4).unwrap();
        let producer = thread::spawn(move || writer.write(&[0u8; 100]));
        thread::sleep(Duration::from_millis(20));
        drop(reader);
        assert!(matches!(
            producer.join().unwrap(),
            Err(TaoError::Stream(_))
        ));
    }

    #[test]
    fn test_生产端关闭后为_eof() {
        let (mut writer, mut reader) = stream_buffer(8).unwrap();
        writer.write(&[5u8; 3]).unwrap();
        drop(writer);
        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).unwrap(), BufferEvent::Data(3));
        assert!(matches!(reader.read(&mut buf), Err(TaoError::Eof)));
        assert!(stream_buffer(0).is_err());
    }

    #[test]
    fn test_共享文件校验标识与容量() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xfer");
        std::fs::write(&path, [0u8; HEADER_LEN + 16]).unwrap();
        assert!(matches!(
            BufferReader::open_shared(&path),
            Err(TaoError::Stream(_))
        ));

        let writer = BufferWriter::create_shared(&path, 16).unwrap();
        let reader = BufferReader::open_shared(&path).unwrap();
        assert_eq!(reader.capacity(), 16);
        assert_eq!(writer.capacity(), 16);
        assert!(BufferWriter::create_shared(dir.path().join("zero"), 0).is_err());
    }

    /// 子进程一侧: 未设置环境变量时 (普通测试运行) 直接通过
    #[test]
    fn test_跨进程消费端() {
        let Ok(path) = std::env::var(SHARED_PATH_ENV) else {
            return;
        };
        let mut reader = BufferReader::open_shared(path).unwrap();
        let (data, controls) = drain(&mut reader);
        assert_eq!(data, pattern(3000));
        assert_eq!(
            controls,
            vec![
                (1000, ControlMessage::FormatChanged(FORMAT)),
                (3000, ControlMessage::Terminate)
            ]
        );
    }

    #[test]
    fn test_跨进程传输() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xfer");
        let mut writer = BufferWriter::create_shared(&path, 64).unwrap();

        let exe = std::env::current_exe().unwrap();
        let mut child = Command::new(exe)
            .args([
                "--exact",
                "stream_buffer::tests::test_跨进程消费端",
                "--test-threads=1",
            ])
            .env(SHARED_PATH_ENV, &path)
            .spawn()
            .unwrap();

        // 子进程未按预期读取时生产端会一直阻塞, 放到线程里限时等待
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        thread::spawn(move || {
            let data = pattern(3000);
            let result = (|| {
                for chunk in data[..1000].chunks(61) {
                    writer.write(chunk)?;
                }
                writer.format_changed(FORMAT)?;
                for chunk in data[1000..].chunks(61) {
                    writer.write(chunk)?;
                }
                writer.terminate()
            })();
            let _ = done_tx.send(result);
        });
        assert!(child.wait().unwrap().success());
        let result = done_rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert!(result.is_ok());
    }
}
