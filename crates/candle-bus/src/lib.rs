//! # CANdle Bus Layer
//!
//! 传输层抽象：一条物理总线对应一个 [`Bus`]，内部独占一个 [`Transport`] 后端。
//!
//! ## 后端
//!
//! - `usb`：CANdle USB 适配器（bulk 端点）
//! - `spi`：Linux spidev，周期更新帧走全双工交换
//! - `uart`：串口
//! - `mock`：无硬件的可编程传输，供测试使用
//!
//! 后端的选择发生在构建 `Bus` 时，之后不再改变。

use std::fmt;
use std::time::Duration;
use thiserror::Error;

mod bus;
pub use bus::Bus;

#[cfg(feature = "usb")]
pub mod usb;
#[cfg(feature = "usb")]
pub use usb::UsbTransport;

#[cfg(all(feature = "spi", target_os = "linux"))]
pub mod spi;
#[cfg(all(feature = "spi", target_os = "linux"))]
pub use spi::SpiTransport;

#[cfg(feature = "uart")]
pub mod uart;
#[cfg(feature = "uart")]
pub use uart::UartTransport;

#[cfg(any(test, feature = "mock"))]
pub mod mock;
#[cfg(any(test, feature = "mock"))]
pub use mock::{MockHandle, MockTransport};

/// 各后端接收缓冲区容量（字节）
pub const RX_BUFFER_LEN: usize = 128;

/// 传输层统一错误类型
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Device Error: {0}")]
    Device(#[from] TransportDeviceError),
    #[error("Transfer timeout")]
    Timeout,
    #[error("Empty frame")]
    EmptyFrame,
    #[error("Operation `{operation}` not supported on {kind} bus")]
    Unsupported {
        operation: &'static str,
        kind: BusKind,
    },
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout)
    }

    /// 是否为不可恢复的设备错误（设备拔出、无权限等）
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::Device(e) if e.is_fatal())
    }
}

/// 设备/后端错误的结构化分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportDeviceErrorKind {
    Unknown,
    NotFound,
    NoDevice,
    AccessDenied,
    Busy,
    InvalidResponse,
    ShortWrite,
    Backend,
}

/// 结构化设备错误
#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct TransportDeviceError {
    pub kind: TransportDeviceErrorKind,
    pub message: String,
}

impl TransportDeviceError {
    pub fn new(kind: TransportDeviceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            TransportDeviceErrorKind::NoDevice
                | TransportDeviceErrorKind::AccessDenied
                | TransportDeviceErrorKind::NotFound
        )
    }
}

impl From<String> for TransportDeviceError {
    fn from(message: String) -> Self {
        Self::new(TransportDeviceErrorKind::Unknown, message)
    }
}

impl From<&str> for TransportDeviceError {
    fn from(message: &str) -> Self {
        Self::new(TransportDeviceErrorKind::Unknown, message)
    }
}

/// 物理总线类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum BusKind {
    Usb,
    Spi,
    Uart,
}

impl fmt::Display for BusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusKind::Usb => write!(f, "USB"),
            BusKind::Spi => write!(f, "SPI"),
            BusKind::Uart => write!(f, "UART"),
        }
    }
}

/// 单次传输参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOptions {
    /// 发送后是否等待应答
    pub wait_for_response: bool,
    /// 等待应答的超时时间（同时约束整个传输）
    pub timeout: Duration,
    /// 期望的应答长度（字节）
    pub response_len: usize,
}

impl TransferOptions {
    pub fn expect_response(response_len: usize, timeout: Duration) -> Self {
        Self {
            wait_for_response: true,
            timeout,
            response_len,
        }
    }

    pub fn no_response(timeout: Duration) -> Self {
        Self {
            wait_for_response: false,
            timeout,
            response_len: 0,
        }
    }
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self::expect_response(candle_protocol::FRAME_LEN, Duration::from_millis(10))
    }
}

/// 传输后端能力
///
/// 每个后端持有自己的接收缓冲区，调用之间复用。缓冲区内容只在下一次
/// 调用之前有效，调用方不得长期持有。
///
/// 任何调用都可能失败，失败通过 `Err` 返回，不会 panic。
pub trait Transport: Send {
    /// 后端类型（构建后固定）
    fn kind(&self) -> BusKind;

    /// 发送一帧，按 `opts` 决定是否在超时内等待应答
    fn send(&mut self, frame: &[u8], opts: &TransferOptions) -> Result<(), TransportError>;

    /// 全双工交换（仅 SPI 支持）
    fn send_receive(&mut self, _frame: &[u8], _response_len: usize) -> Result<(), TransportError> {
        Err(TransportError::Unsupported {
            operation: "send_receive",
            kind: self.kind(),
        })
    }

    /// 单独的接收阶段（USB/UART）
    fn receive(&mut self, timeout: Duration) -> Result<(), TransportError>;

    /// 最近一次调用实际收到的字节数
    fn bytes_received(&self) -> usize;

    /// 最近一次调用收到的数据（长度等于 `bytes_received()`）
    fn rx_buffer(&self) -> &[u8];

    /// 从 `offset` 开始的接收数据视图，越界时为空
    fn rx_buffer_at(&self, offset: usize) -> &[u8] {
        self.rx_buffer().get(offset..).unwrap_or(&[])
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn kind(&self) -> BusKind {
        (**self).kind()
    }

    fn send(&mut self, frame: &[u8], opts: &TransferOptions) -> Result<(), TransportError> {
        (**self).send(frame, opts)
    }

    fn send_receive(&mut self, frame: &[u8], response_len: usize) -> Result<(), TransportError> {
        (**self).send_receive(frame, response_len)
    }

    fn receive(&mut self, timeout: Duration) -> Result<(), TransportError> {
        (**self).receive(timeout)
    }

    fn bytes_received(&self) -> usize {
        (**self).bytes_received()
    }

    fn rx_buffer(&self) -> &[u8] {
        (**self).rx_buffer()
    }

    fn rx_buffer_at(&self, offset: usize) -> &[u8] {
        (**self).rx_buffer_at(offset)
    }
}
