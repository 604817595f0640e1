//! 会话配置文件（TOML）
//!
//! ```toml
//! [transport]
//! kind = "spi"
//! path = "/dev/spidev0.0"
//! speed_hz = 12500000
//!
//! [pipeline]
//! cycle_period_us = 1000
//! transfer_timeout_us = 2000
//! max_consecutive_failures = 3
//!
//! [[drives]]
//! address = 300
//! mode = "impedance"
//! max_torque = 1.0
//! ```

use crate::drive::DriveHandle;
use crate::error::DriverError;
use crate::pipeline::PipelineConfig;
use candle_protocol::{ControlMode, ImpedanceParams, PidParams};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

fn default_spi_path() -> String {
    "/dev/spidev0.0".to_string()
}

fn default_spi_speed_hz() -> u32 {
    12_500_000
}

fn default_uart_baud_rate() -> u32 {
    460_800
}

/// 传输后端选择
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransportConfig {
    /// CANdle USB 适配器（默认）
    #[default]
    Usb,
    Spi {
        #[serde(default = "default_spi_path")]
        path: String,
        #[serde(default = "default_spi_speed_hz")]
        speed_hz: u32,
    },
    Uart {
        path: String,
        #[serde(default = "default_uart_baud_rate")]
        baud_rate: u32,
    },
}

/// `[pipeline]` 表（时间单位为微秒）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    pub cycle_period_us: u64,
    pub transfer_timeout_us: u64,
    pub max_consecutive_failures: u32,
}

impl Default for PipelineSection {
    fn default() -> Self {
        PipelineConfig::default().into()
    }
}

impl From<PipelineConfig> for PipelineSection {
    fn from(config: PipelineConfig) -> Self {
        Self {
            cycle_period_us: config.cycle_period.as_micros() as u64,
            transfer_timeout_us: config.transfer_timeout.as_micros() as u64,
            max_consecutive_failures: config.max_consecutive_failures,
        }
    }
}

impl From<&PipelineSection> for PipelineConfig {
    fn from(section: &PipelineSection) -> Self {
        Self {
            cycle_period: Duration::from_micros(section.cycle_period_us),
            transfer_timeout: Duration::from_micros(section.transfer_timeout_us),
            max_consecutive_failures: section.max_consecutive_failures,
        }
    }
}

/// `[[drives]]` 条目
///
/// 未给出的字段保持驱动器默认值。使能状态不从配置文件读取，
/// 必须由程序显式调用 `set_enabled`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriveConfig {
    pub address: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ControlMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_torque: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_velocity: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_pid: Option<PidParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocity_pid: Option<PidParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impedance: Option<ImpedanceParams>,
}

impl DriveConfig {
    pub fn new(address: u16) -> Self {
        Self {
            address,
            mode: None,
            max_torque: None,
            max_velocity: None,
            position_pid: None,
            velocity_pid: None,
            impedance: None,
        }
    }

    /// 把配置写入驱动器（任一字段校验失败即返回）
    pub fn apply(&self, drive: &DriveHandle) -> Result<(), DriverError> {
        if let Some(mode) = self.mode {
            drive.set_mode(mode);
        }
        if let Some(max_torque) = self.max_torque {
            drive.set_max_torque(max_torque)?;
        }
        if let Some(max_velocity) = self.max_velocity {
            drive.set_max_velocity(max_velocity)?;
        }
        if let Some(gains) = self.position_pid {
            drive.set_position_pid(gains)?;
        }
        if let Some(gains) = self.velocity_pid {
            drive.set_velocity_pid(gains)?;
        }
        if let Some(gains) = self.impedance {
            drive.set_impedance(gains)?;
        }
        Ok(())
    }
}

/// 会话配置
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CandleConfig {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub drives: Vec<DriveConfig>,
}

impl CandleConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, DriverError> {
        toml::from_str(content).map_err(|e| DriverError::Config(e.to_string()))
    }

    /// 从文件加载配置
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DriverError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| DriverError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String, DriverError> {
        toml::to_string(self).map_err(|e| DriverError::Config(e.to_string()))
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        (&self.pipeline).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[transport]
kind = "uart"
path = "/dev/ttyACM0"

[pipeline]
cycle_period_us = 500

[[drives]]
address = 300
mode = "impedance"
max_torque = 1.0
impedance = { kp = 4.0, kd = 0.02 }

[[drives]]
address = 350
"#;

    #[test]
    fn test_parse_sample() {
        let config = CandleConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(
            config.transport,
            TransportConfig::Uart {
                path: "/dev/ttyACM0".into(),
                baud_rate: 460_800
            }
        );

        let pipeline = config.pipeline_config();
        assert_eq!(pipeline.cycle_period, Duration::from_micros(500));
        // 未给出的字段使用默认值
        assert_eq!(pipeline.transfer_timeout, Duration::from_millis(2));
        assert_eq!(pipeline.max_consecutive_failures, 3);

        assert_eq!(config.drives.len(), 2);
        assert_eq!(config.drives[0].mode, Some(ControlMode::Impedance));
        assert_eq!(config.drives[0].impedance, Some(ImpedanceParams::new(4.0, 0.02)));
        assert_eq!(config.drives[1], DriveConfig::new(350));
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = CandleConfig::from_toml_str("").unwrap();
        assert_eq!(config, CandleConfig::default());
        assert_eq!(config.transport, TransportConfig::Usb);
        assert_eq!(config.pipeline_config(), PipelineConfig::default());
    }

    #[test]
    fn test_spi_defaults() {
        let config = CandleConfig::from_toml_str("[transport]\nkind = \"spi\"\n").unwrap();
        assert_eq!(
            config.transport,
            TransportConfig::Spi {
                path: "/dev/spidev0.0".into(),
                speed_hz: 12_500_000
            }
        );
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            CandleConfig::from_toml_str("[transport]\nkind = \"can\"\n"),
            Err(DriverError::Config(_))
        ));
        assert!(matches!(
            CandleConfig::from_toml_str("[[drives]]\nmode = \"idle\"\n"),
            Err(DriverError::Config(_))
        ));
        assert!(CandleConfig::load("/nonexistent/candle.toml").is_err());
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = CandleConfig::from_toml_str(SAMPLE).unwrap();
        let text = config.to_toml_string().unwrap();
        assert_eq!(CandleConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_apply_drive_config() {
        let drive = DriveHandle::new(300);
        let config = DriveConfig {
            mode: Some(ControlMode::Position),
            max_velocity: Some(20.0),
            position_pid: Some(PidParams::new(5.0, 0.1, 0.0, 1.0)),
            ..DriveConfig::new(300)
        };
        config.apply(&drive).unwrap();
        assert_eq!(drive.mode(), ControlMode::Position);
        assert_eq!(drive.max_velocity(), 20.0);
        assert_eq!(drive.position_pid(), PidParams::new(5.0, 0.1, 0.0, 1.0));

        let bad = DriveConfig {
            max_torque: Some(-1.0),
            ..DriveConfig::new(300)
        };
        assert!(matches!(bad.apply(&drive), Err(DriverError::InvalidValue { .. })));
    }
}
