//! 驱动层错误类型定义

use candle_bus::TransportError;
use candle_protocol::ProtocolError;
use thiserror::Error;

/// 驱动层错误类型
///
/// 只有调用方的误用（非法地址、重复启动等）和会话级命令的失败会以
/// `Err` 返回；轮询循环中的单次传输失败被吸收为遥测中的状态位。
#[derive(Error, Debug)]
pub enum DriverError {
    /// 地址不在 [10, 2047] 范围内
    #[error("Invalid drive address {address} (valid range 10..=2047)")]
    InvalidAddress { address: u16 },

    #[error("Drive address {address} already registered")]
    DuplicateAddress { address: u16 },

    #[error("Drive address {address} not found")]
    NotFound { address: u16 },

    /// 轮询循环已在运行（或正在停止）
    #[error("Polling loop already running")]
    AlreadyRunning,

    #[error("Polling loop not running")]
    NotRunning,

    /// 设定值校验失败（非有限值、负的限幅）
    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: f32 },

    /// 总线已丢失（轮询线程异常退出）
    #[error("Bus unavailable")]
    BusUnavailable,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Configuration error: {0}")]
    Config(String),

    /// 轮询线程错误
    #[error("IO thread error: {0}")]
    IoThread(String),

    /// 操作超时
    #[error("Operation timeout")]
    Timeout,
}
