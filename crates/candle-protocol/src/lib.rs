//! # CANdle Protocol
//!
//! CANdle 适配器与 MD80 驱动器之间的二进制帧协议（无硬件依赖）
//!
//! ## 模块
//!
//! - `ids`: 总线帧类型表、驱动器帧 ID、地址范围等常量
//! - `regulator`: 调节器参数（位置/速度 PID、阻抗）与限幅
//! - `command`: 命令帧构建（按控制模式打包）
//! - `response`: 响应帧解析（遥测数据）
//! - `error_vector`: 固件故障位 + 主机侧状态位
//!
//! ## 字节序
//!
//! 所有多字节字段使用小端字节序（Little Endian），浮点数为 IEEE-754 `f32`。
//! 命令帧和响应帧长度固定为 [`FRAME_LEN`] 字节：
//!
//! ```text
//! byte 0      : 总线帧类型（BusFrameKind）
//! byte 1..3   : 驱动器地址（u16）
//! byte 3      : 有效载荷长度（0..=32）
//! byte 4..36  : 有效载荷（不足部分补 0）
//! ```

pub mod command;
pub mod error_vector;
pub mod ids;
pub mod regulator;
pub mod response;

// 重新导出常用类型
pub use command::*;
pub use error_vector::*;
pub use ids::*;
pub use regulator::*;
pub use response::*;

use thiserror::Error;

/// 帧头长度（类型 + 地址 + 载荷长度）
pub const FRAME_HEADER_LEN: usize = 4;

/// 有效载荷最大长度
pub const PAYLOAD_CAPACITY: usize = 32;

/// 单帧总长度（命令帧与响应帧相同）
pub const FRAME_LEN: usize = FRAME_HEADER_LEN + PAYLOAD_CAPACITY;

/// 协议解析错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Unknown frame kind: 0x{byte:02X}")]
    UnknownFrameKind { byte: u8 },

    #[error("Unexpected frame kind: expected {expected:?}, got 0x{actual:02X}")]
    UnexpectedFrameKind { expected: BusFrameKind, actual: u8 },

    #[error("Address mismatch: expected {expected}, got {actual}")]
    AddressMismatch { expected: u16, actual: u16 },

    #[error("Unexpected response id: 0x{id:02X}")]
    UnexpectedResponseId { id: u8 },

    #[error("Payload too long: {len} bytes (capacity {PAYLOAD_CAPACITY})")]
    PayloadTooLong { len: usize },

    #[error("Command not acknowledged: {kind:?}")]
    NotAcknowledged { kind: BusFrameKind },
}

impl ProtocolError {
    /// 是否属于"响应帧格式错误"（Malformed）
    ///
    /// 轮询循环把这类错误与一次传输失败同等处理。
    pub fn is_malformed(&self) -> bool {
        !matches!(self, ProtocolError::PayloadTooLong { .. })
    }
}

/// 字节序转换工具函数
///
/// 协议使用小端字节序，这些函数按固定偏移读写，调用方负责保证切片长度。
///
/// 从 `bytes[offset..offset + 4]` 读取小端 f32
pub fn read_f32_le(bytes: &[u8], offset: usize) -> f32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[offset..offset + 4]);
    f32::from_le_bytes(raw)
}

/// 向 `bytes[offset..offset + 4]` 写入小端 f32
pub fn write_f32_le(bytes: &mut [u8], offset: usize, value: f32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// 从 `bytes[offset..offset + 2]` 读取小端 u16
pub fn read_u16_le(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

/// 向 `bytes[offset..offset + 2]` 写入小端 u16
pub fn write_u16_le(bytes: &mut [u8], offset: usize, value: u16) {
    bytes[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}
