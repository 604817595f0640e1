//! 驱动层模块
//!
//! 本模块提供 CANdle 会话的设备驱动功能，包括：
//! - 驱动器注册表（按地址索引，注册顺序即轮询顺序）
//! - 后台轮询线程（固定周期，逐个驱动器交换命令与遥测）
//! - 状态同步（设定值原子写入，遥测 ArcSwap 无锁读取）
//! - 故障降级（单次失败标记 stale，连续失败标记通信丢失）
//!
//! # 使用场景
//!
//! ```no_run
//! use candle_driver::{CandleBuilder, ControlMode};
//!
//! let mut candle = CandleBuilder::new().build().unwrap();
//! let drive = candle.add_drive(300).unwrap();
//! drive.set_mode(ControlMode::Impedance);
//! drive.set_enabled(true);
//! candle.start().unwrap();
//!
//! let position = drive.position();
//! # let _ = position;
//! candle.stop().unwrap();
//! ```

mod builder;
mod candle;
pub mod config;
pub mod drive;
mod error;
pub mod metrics;
pub mod pipeline;
pub mod registry;
pub mod state;

pub use builder::CandleBuilder;
pub use candle::Candle;
pub use config::{CandleConfig, DriveConfig, TransportConfig};
pub use drive::{DriveHandle, DriveTelemetry};
pub use error::DriverError;
pub use metrics::{MetricsSnapshot, PollMetrics};
pub use pipeline::{PipelineConfig, poll_loop, run_cycle};
pub use registry::DriveRegistry;
pub use state::{AtomicLoopState, LoopState};

// 常用协议类型
pub use candle_protocol::{ControlMode, ErrorVector, ImpedanceParams, PidParams};
