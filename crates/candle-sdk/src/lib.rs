//! CANdle SDK - MD80 驱动器主机端 Rust SDK
//!
//! 通过 CANdle 适配器（USB / SPI / UART）以固定周期轮询一组 MD80 驱动器：
//! 每个周期向每个驱动器下发一帧命令并读回位置、速度、力矩遥测。
//!
//! # 架构设计
//!
//! - **协议层** (`protocol`): 帧编码/解码，无硬件依赖
//! - **总线层** (`bus`): 传输后端抽象与具体实现
//! - **驱动层** (`driver`): 注册表、后台轮询线程、会话生命周期
//!
//! # 快速开始
//!
//! ```no_run
//! use candle_sdk::prelude::*;
//!
//! candle_sdk::init_logging();
//!
//! let mut candle = CandleBuilder::new().build()?;
//! let drive = candle.add_drive(300)?;
//! drive.set_mode(ControlMode::Impedance);
//! drive.set_enabled(true);
//! candle.start()?;
//!
//! println!("position = {:.3}", drive.position());
//! candle.stop()?;
//! # Ok::<(), DriverError>(())
//! ```

pub use candle_bus as bus;
pub use candle_driver as driver;
pub use candle_protocol as protocol;

pub mod prelude;

// 会话与驱动器
pub use candle_driver::{
    Candle, CandleBuilder, CandleConfig, DriveConfig, DriveHandle, DriveTelemetry, LoopState,
    MetricsSnapshot, PipelineConfig, TransportConfig,
};

// 协议层常用类型
pub use candle_protocol::{ControlMode, ErrorVector, ImpedanceParams, PidParams};

// 总线层
pub use candle_bus::{Bus, BusKind, Transport};

// 错误类型
pub use candle_bus::TransportError;
pub use candle_driver::DriverError;
pub use candle_protocol::ProtocolError;

use tracing_subscriber::EnvFilter;

/// 安装全局 `tracing` 订阅器（级别取自 `RUST_LOG`，默认 `info`）
///
/// 已有订阅器时不做任何事，返回 `false`。
pub fn init_logging() -> bool {
    init_logging_with("info")
}

/// 同 [`init_logging`]，`RUST_LOG` 未设置时使用 `default_directive`
pub fn init_logging_with(default_directive: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let installed = tracing_subscriber::fmt().with_env_filter(filter).try_init().is_ok();
    if installed {
        tracing::debug!("tracing subscriber installed (default: {})", default_directive);
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging();
        assert!(!init_logging());
        assert!(!init_logging_with("debug"));
    }
}
