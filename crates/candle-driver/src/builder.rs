//! Builder 模式实现
//!
//! 提供链式构造 `Candle` 会话的便捷方式。

use crate::candle::Candle;
use crate::config::{CandleConfig, DriveConfig, TransportConfig};
use crate::error::DriverError;
use crate::pipeline::PipelineConfig;
use candle_bus::{Bus, Transport};
use std::time::Duration;
use tracing::debug;

/// Candle Builder（链式构造）
///
/// # Example
///
/// ```no_run
/// use candle_driver::CandleBuilder;
/// use std::time::Duration;
///
/// let candle = CandleBuilder::new()
///     .cycle_period(Duration::from_millis(2))
///     .drive(300)
///     .drive(350)
///     .build()
///     .unwrap();
/// assert_eq!(candle.drives().len(), 2);
/// ```
pub struct CandleBuilder {
    /// 已打开的传输后端（优先于 `transport_config`）
    transport: Option<Box<dyn Transport>>,
    transport_config: TransportConfig,
    pipeline_config: PipelineConfig,
    drives: Vec<DriveConfig>,
}

impl CandleBuilder {
    pub fn new() -> Self {
        Self {
            transport: None,
            transport_config: TransportConfig::default(),
            pipeline_config: PipelineConfig::default(),
            drives: Vec::new(),
        }
    }

    /// 从配置文件内容创建
    pub fn from_config(config: &CandleConfig) -> Self {
        Self {
            transport: None,
            transport_config: config.transport.clone(),
            pipeline_config: config.pipeline_config(),
            drives: config.drives.clone(),
        }
    }

    /// 直接使用已打开的传输后端（例如测试用的 mock）
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    /// 选择要打开的后端（默认 USB）
    pub fn transport_config(mut self, config: TransportConfig) -> Self {
        self.transport_config = config;
        self
    }

    pub fn pipeline_config(mut self, config: PipelineConfig) -> Self {
        self.pipeline_config = config;
        self
    }

    pub fn cycle_period(mut self, period: Duration) -> Self {
        self.pipeline_config.cycle_period = period;
        self
    }

    pub fn transfer_timeout(mut self, timeout: Duration) -> Self {
        self.pipeline_config.transfer_timeout = timeout;
        self
    }

    pub fn max_consecutive_failures(mut self, failures: u32) -> Self {
        self.pipeline_config.max_consecutive_failures = failures;
        self
    }

    /// 注册一个使用默认参数的驱动器
    pub fn drive(self, address: u16) -> Self {
        self.drive_config(DriveConfig::new(address))
    }

    pub fn drive_config(mut self, config: DriveConfig) -> Self {
        self.drives.push(config);
        self
    }

    /// 构建会话
    ///
    /// 打开传输后端、校验周期参数并注册所有驱动器。会话处于 `Stopped`
    /// 状态，需要调用 [`Candle::start`] 启动轮询。
    ///
    /// # Errors
    /// - `Config`: 周期参数非法，或所选后端未编译进来
    /// - `Transport`: 设备打开失败
    /// - `InvalidAddress` / `DuplicateAddress` / `InvalidValue`: 驱动器配置错误
    pub fn build(self) -> Result<Candle, DriverError> {
        self.pipeline_config.validate()?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => open_transport(&self.transport_config)?,
        };
        let bus = Bus::from_boxed(transport);
        debug!("Opened {} bus", bus.kind());

        let mut candle = Candle::new(bus, self.pipeline_config);
        for config in &self.drives {
            let drive = candle.add_drive(config.address)?;
            config.apply(&drive)?;
        }
        Ok(candle)
    }
}

impl Default for CandleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn open_transport(config: &TransportConfig) -> Result<Box<dyn Transport>, DriverError> {
    match config {
        TransportConfig::Usb => {
            #[cfg(feature = "usb")]
            {
                Ok(Box::new(candle_bus::UsbTransport::open()?))
            }
            #[cfg(not(feature = "usb"))]
            {
                Err(backend_disabled("usb"))
            }
        },
        TransportConfig::Spi { path, speed_hz } => {
            #[cfg(all(feature = "spi", target_os = "linux"))]
            {
                Ok(Box::new(candle_bus::SpiTransport::open(path, *speed_hz)?))
            }
            #[cfg(not(all(feature = "spi", target_os = "linux")))]
            {
                let _ = (path, speed_hz);
                Err(backend_disabled("spi"))
            }
        },
        TransportConfig::Uart { path, baud_rate } => {
            #[cfg(feature = "uart")]
            {
                Ok(Box::new(candle_bus::UartTransport::open(path, *baud_rate)?))
            }
            #[cfg(not(feature = "uart"))]
            {
                let _ = (path, baud_rate);
                Err(backend_disabled("uart"))
            }
        },
    }
}

#[allow(dead_code)]
fn backend_disabled(feature: &str) -> DriverError {
    DriverError::Config(format!(
        "transport backend `{feature}` is not enabled in this build"
    ))
}
