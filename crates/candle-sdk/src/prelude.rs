//! Prelude - 常用类型的便捷导入
//!
//! ```rust
//! use candle_sdk::prelude::*;
//! ```

pub use crate::{
    Candle, CandleBuilder, CandleConfig, ControlMode, DriveHandle, DriveTelemetry, DriverError,
    ErrorVector, ImpedanceParams, LoopState, PidParams, PipelineConfig, TransportConfig,
};

pub use crate::{BusKind, Transport};
