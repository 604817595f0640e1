//! 并发测试
//!
//! 调用方线程写设定值、读遥测，同时后台轮询线程在运行：
//! - 读回的浮点数必须是某次完整写入的值（无撕裂）；
//! - 遥测快照内各字段来自同一次应答。

mod common;

use candle_sdk::bus::BusKind;
use candle_sdk::protocol::read_f32_le;
use candle_sdk::ControlMode;
use common::{WAIT, mock_session, telemetry};
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// 位模式差异很大的一组值，撕裂写入几乎不可能恰好落在集合内
const TARGETS: [f32; 6] = [0.0, -1.0, 1.5e-7, 7.25, -2.5e6, f32::MAX];

const IMPEDANCE_TARGET_POSITION: usize = 14;

#[test]
fn test_concurrent_target_writes_are_never_torn() {
    let (mut candle, mock) = mock_session(BusKind::Usb, &[300]);
    let drive = candle.drive(300).unwrap();
    drive.set_mode(ControlMode::Impedance);
    candle.start().unwrap();

    let done = Arc::new(AtomicBool::new(false));

    let writers: Vec<_> = (0..2)
        .map(|_| {
            let drive = drive.clone();
            let done = done.clone();
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                while !done.load(Ordering::Relaxed) {
                    let value = TARGETS[rng.gen_range(0..TARGETS.len())];
                    drive.set_target_position(value).unwrap();
                }
            })
        })
        .collect();

    let reader = {
        let drive = drive.clone();
        let done = done.clone();
        thread::spawn(move || {
            let mut reads = 0u64;
            while !done.load(Ordering::Relaxed) {
                let value = drive.target_position();
                assert!(TARGETS.contains(&value), "torn read: {value}");
                reads += 1;
            }
            reads
        })
    };

    for _ in 0..20 {
        candle.wait_for_cycles(1, WAIT).unwrap();
        let frame = mock.last_command(300).unwrap();
        let sent = read_f32_le(&frame, IMPEDANCE_TARGET_POSITION);
        assert!(TARGETS.contains(&sent), "torn value on the wire: {sent}");
    }

    done.store(true, Ordering::Relaxed);
    for writer in writers {
        writer.join().unwrap();
    }
    assert!(reader.join().unwrap() > 0);

    candle.stop().unwrap();
}

#[test]
fn test_telemetry_snapshot_is_consistent() {
    let (mut candle, mock) = mock_session(BusKind::Usb, &[300]);
    let drive = candle.drive(300).unwrap();
    mock.set_telemetry(300, telemetry(2.0, 2.0, 2.0));
    candle.start().unwrap();

    let done = Arc::new(AtomicBool::new(false));

    // 交替切换应答内容，每次应答的三个字段取相同的值
    let switcher = {
        let done = done.clone();
        thread::spawn(move || {
            let mut rng = rand::thread_rng();
            while !done.load(Ordering::Relaxed) {
                let v: f32 = rng.gen_range(-100.0..100.0);
                mock.set_telemetry(300, telemetry(v, v, v));
                thread::sleep(Duration::from_micros(100));
            }
        })
    };

    let readers: Vec<_> = (0..3)
        .map(|_| {
            let drive = drive.clone();
            let done = done.clone();
            thread::spawn(move || {
                while !done.load(Ordering::Relaxed) {
                    let t = drive.telemetry();
                    assert_eq!(t.position, t.velocity);
                    assert_eq!(t.velocity, t.torque);
                }
            })
        })
        .collect();

    candle.wait_for_cycles(50, WAIT).unwrap();
    done.store(true, Ordering::Relaxed);

    switcher.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    candle.stop().unwrap();
}

#[test]
fn test_cycle_numbers_are_monotonic() {
    let (mut candle, _mock) = mock_session(BusKind::Usb, &[300, 350]);
    let drive = candle.drive(350).unwrap();
    candle.start().unwrap();

    let mut last = 0;
    for _ in 0..10 {
        let completed = candle.wait_for_cycles(1, WAIT).unwrap();
        let cycle = drive.telemetry().cycle;
        assert!(cycle >= last);
        // wait 返回时该周期的遥测已经发布
        assert!(cycle >= completed);
        last = cycle;
    }

    candle.stop().unwrap();
}
