//! 集成测试公共工具

#![allow(dead_code)]

use candle_sdk::bus::{BusKind, MockHandle, MockTransport};
use candle_sdk::protocol::{ErrorVector, Telemetry};
use candle_sdk::{Candle, CandleBuilder};
use std::time::Duration;

/// 测试用周期（比默认 1ms 稍长，避免 CI 上大量超时告警）
pub const TEST_PERIOD: Duration = Duration::from_micros(500);

/// 等待周期数时使用的超时
pub const WAIT: Duration = Duration::from_secs(5);

pub fn telemetry(position: f32, velocity: f32, torque: f32) -> Telemetry {
    Telemetry {
        position,
        velocity,
        torque,
        error_vector: ErrorVector::default(),
        temperature: 30,
    }
}

/// 在模拟总线上构建会话并注册给定地址
pub fn mock_session(kind: BusKind, addresses: &[u16]) -> (Candle, MockHandle) {
    let (transport, mock) = MockTransport::new(kind);
    mock.set_default_telemetry(telemetry(1.0, 0.5, 0.0));

    let builder = addresses
        .iter()
        .fold(CandleBuilder::new().transport(transport), |b, &address| b.drive(address));
    let candle = builder
        .cycle_period(TEST_PERIOD)
        .build()
        .expect("mock session should build");
    (candle, mock)
}
