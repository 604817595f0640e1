//! 双驱动器阻抗镜像示例
//!
//! 两个驱动器都工作在阻抗模式，各自的目标位置/速度跟随对方的（滤波后）实际值，
//! 中间按减速比换算：转动一个，另一个按比例跟随。
//!
//! ```bash
//! cargo run -p candle-sdk --example impedance_mirror
//! # 或者使用配置文件选择 SPI / UART 后端
//! cargo run -p candle-sdk --example impedance_mirror -- candle.toml
//! ```

use candle_sdk::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const FIRST_ID: u16 = 300;
const SECOND_ID: u16 = 350;
const GEARBOX: f32 = 0.2;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    candle_sdk::init_logging();

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
        println!("\n收到退出信号，正在关闭...");
    })?;

    let builder = match std::env::args().nth(1) {
        Some(path) => CandleBuilder::from_config(&CandleConfig::load(path)?),
        None => CandleBuilder::new(),
    };
    let mut candle = builder.build()?;

    let first = candle.add_drive(FIRST_ID)?;
    let second = candle.add_drive(SECOND_ID)?;

    for drive in [&first, &second] {
        drive.set_mode(ControlMode::Impedance);
        drive.set_enabled(true);
    }
    first.set_impedance(ImpedanceParams::new(1.0, 0.02))?;
    second.set_impedance(ImpedanceParams::new(4.0, 0.02))?;

    candle.start()?;
    println!("✓ 轮询已启动（{} 总线），按 Ctrl+C 退出", candle.bus_kind());

    let (mut pos_first, mut pos_second) = (0.0f32, 0.0f32);
    let (mut vel_first, mut vel_second) = (0.0f32, 0.0f32);

    while running.load(Ordering::SeqCst) {
        // 一阶低通
        pos_first = pos_first * 0.9 + first.position() * 0.1;
        pos_second = pos_second * 0.9 + second.position() * 0.1;
        vel_first = vel_first * 0.99 + first.velocity() * 0.01;
        vel_second = vel_second * 0.99 + second.velocity() * 0.01;

        second.set_target_position(GEARBOX * pos_first)?;
        first.set_target_position(pos_second / GEARBOX)?;
        second.set_target_velocity(GEARBOX * vel_first)?;
        first.set_target_velocity(vel_second / GEARBOX)?;

        if first.is_communication_lost() || second.is_communication_lost() {
            eprintln!("⚠ 驱动器通信丢失，停止");
            break;
        }

        std::thread::sleep(Duration::from_micros(100));
    }

    for drive in [&first, &second] {
        drive.set_enabled(false);
    }
    candle.wait_for_cycles(2, Duration::from_millis(100))?;
    candle.stop()?;

    let metrics = candle.metrics();
    println!(
        "✓ 已关闭：{} 个周期，交换成功率 {:.2}%",
        metrics.cycles_total,
        metrics.success_rate()
    );
    Ok(())
}
