//! 错误向量
//!
//! 低 16 位为固件上报的故障位（原样来自响应帧），高位为主机侧轮询循环
//! 追加的状态位。

use bilge::prelude::*;

/// 固件故障位域（响应载荷 Byte 1-2，小端）
#[bitsize(16)]
#[derive(FromBits, DebugBits, Clone, Copy, Default)]
pub struct FirmwareErrors {
    pub under_voltage: bool,            // Bit 0
    pub over_voltage: bool,             // Bit 1
    pub bridge_fault: bool,             // Bit 2
    pub over_current: bool,             // Bit 3
    pub encoder_error: bool,            // Bit 4
    pub parameter_identification: bool, // Bit 5
    pub motor_over_temperature: bool,   // Bit 6
    pub driver_over_temperature: bool,  // Bit 7
    pub reserved: u8,                   // Bit 8-15
}

/// 驱动器错误向量（固件位 + 主机位）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ErrorVector(u32);

impl ErrorVector {
    /// 本周期传输失败，遥测为上一次成功的值
    pub const STALE: u32 = 1 << 16;
    /// 连续失败次数达到阈值
    pub const COMMUNICATION_LOST: u32 = 1 << 17;

    const HOST_MASK: u32 = Self::STALE | Self::COMMUNICATION_LOST;

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// 由固件上报的 16 位故障字构建（主机位清零）
    pub const fn from_firmware(raw: u16) -> Self {
        Self(raw as u32)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// 固件故障字原始值
    pub const fn firmware_raw(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }

    pub fn firmware(self) -> FirmwareErrors {
        FirmwareErrors::from(u16::new(self.firmware_raw()))
    }

    pub const fn is_stale(self) -> bool {
        self.0 & Self::STALE != 0
    }

    pub const fn is_communication_lost(self) -> bool {
        self.0 & Self::COMMUNICATION_LOST != 0
    }

    /// 是否存在固件故障
    pub const fn has_firmware_fault(self) -> bool {
        self.firmware_raw() != 0
    }

    #[must_use]
    pub const fn with_stale(self) -> Self {
        Self(self.0 | Self::STALE)
    }

    #[must_use]
    pub const fn with_communication_lost(self) -> Self {
        Self(self.0 | Self::COMMUNICATION_LOST)
    }

    /// 清除主机侧状态位，保留固件位
    #[must_use]
    pub const fn without_host_flags(self) -> Self {
        Self(self.0 & !Self::HOST_MASK)
    }
}

impl From<u32> for ErrorVector {
    fn from(bits: u32) -> Self {
        Self(bits)
    }
}

impl From<ErrorVector> for u32 {
    fn from(v: ErrorVector) -> Self {
        v.0
    }
}
