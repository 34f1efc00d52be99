//! 端到端集成测试: 解码线程经音频缓冲向输出线程传递数据.
//!
//! 测试流程: 解码线程 → 音频缓冲 (数据 + 控制消息) → 读取线程 → 与直接解码比较

mod common;

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use common::*;
use tao_mpa::core::TaoError;
use tao_mpa::mpg::{BufferEvent, ControlMessage, DecoderParams, stream_buffer};

#[test]
fn test_经缓冲输出与直接解码一致() {
    let data = lame_stream(12, 576, 700);
    let mut direct = ramp_handle(DecoderParams::default());
    open_memory(&mut direct, data.clone());
    let expected = decode_all(&mut direct);

    let (mut writer, mut reader) = stream_buffer(3000).unwrap();
    let producer = thread::spawn(move || {
        let mut h = ramp_handle(DecoderParams::default());
        open_memory(&mut h, data);
        loop {
            match h.decode_frame() {
                Ok(pcm) => writer.write(pcm).unwrap(),
                Err(TaoError::NewFormat) => writer.format_changed(h.format().unwrap()).unwrap(),
                Err(TaoError::Eof) => break,
                Err(e) => panic!("{e}"),
            }
        }
        writer.terminate().unwrap();
    });

    let mut out = Vec::new();
    let mut formats = 0;
    let mut buf = vec![0u8; 1000];
    loop {
        match reader.read(&mut buf).unwrap() {
            BufferEvent::Data(n) => out.extend_from_slice(&buf[..n]),
            BufferEvent::Control(ControlMessage::FormatChanged(format)) => {
                assert_eq!(format.rate, 44100);
                assert_eq!(out.len(), 0);
                formats += 1;
            }
            BufferEvent::Control(ControlMessage::Terminate) => break,
            BufferEvent::Control(ControlMessage::Resync) => {}
        }
        assert!(reader.used() <= reader.capacity());
    }
    producer.join().unwrap();
    assert_eq!(formats, 1);
    assert_eq!(reader.position(), expected.len() as u64);
    assert_eq!(out, expected);
}

#[test]
fn test_定位后重同步丢弃缓冲中的旧音频() {
    let frame_bytes = SPF * 4;
    let (mut writer, mut reader) = stream_buffer(4 * frame_bytes).unwrap();
    let (gate_tx, gate_rx) = mpsc::channel::<()>();

    let consumer = thread::spawn(move || {
        let mut buf = vec![0u8; 1000];
        assert!(matches!(
            reader.read(&mut buf).unwrap(),
            BufferEvent::Control(ControlMessage::FormatChanged(_))
        ));
        // 定位前的音频留在缓冲中, 等生产端发出重同步后再读
        gate_rx.recv().unwrap();
        thread::sleep(Duration::from_millis(50));

        let mut before = Vec::new();
        let mut after = Vec::new();
        let mut resync_at = None;
        loop {
            match reader.read(&mut buf).unwrap() {
                BufferEvent::Data(n) if resync_at.is_none() => before.extend_from_slice(&buf[..n]),
                BufferEvent::Data(n) => after.extend_from_slice(&buf[..n]),
                BufferEvent::Control(ControlMessage::Resync) => {
                    assert!(resync_at.is_none());
                    resync_at = Some(reader.position());
                }
                BufferEvent::Control(ControlMessage::Terminate) => break,
                BufferEvent::Control(other) => panic!("意外的控制消息 {other:?}"),
            }
        }
        (before, resync_at, after)
    });

    let mut h = ramp_handle(DecoderParams::default());
    open_memory(&mut h, stream(10));
    assert!(matches!(h.decode_frame(), Err(TaoError::NewFormat)));
    writer.format_changed(h.format().unwrap()).unwrap();
    for _ in 0..3 {
        let pcm = h.decode_frame().unwrap();
        writer.write(pcm).unwrap();
    }
    let stale = writer.position();
    assert_eq!(stale, 3 * frame_bytes as u64);

    h.seek_frame(8).unwrap();
    gate_tx.send(()).unwrap();
    writer.resync().unwrap();
    loop {
        match h.decode_frame() {
            Ok(pcm) => writer.write(pcm).unwrap(),
            Err(TaoError::Eof) => break,
            Err(e) => panic!("{e}"),
        }
    }
    writer.terminate().unwrap();

    let (before, resync_at, after) = consumer.join().unwrap();
    // 确认位置就是发出重同步时生产端的写入位置
    assert_eq!(resync_at, Some(stale));
    // 重同步前读到的只能是旧音频的开头, 其余被丢弃
    let old = ramp_indices(&before);
    assert!(old.len() as u64 * 4 <= stale);
    assert!(old.iter().enumerate().all(|(i, &v)| v == i as u64));
    let new = ramp_indices(&after);
    assert_eq!(new.len(), 2 * SPF);
    assert_eq!(new[0], 8 * SPF as u64);
    assert!(new.windows(2).all(|w| w[1] == w[0] + 1));
}
