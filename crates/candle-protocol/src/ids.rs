//! 帧类型常量定义和类型表
//!
//! 总线帧类型（第 0 字节）属于协议版本的一部分。各类型的传输语义
//! （SPI 是否走全双工、是否需要应答）统一登记在 [`FRAME_KIND_TABLE`] 中，
//! 调用方通过查表判断，不在各处硬编码字节值。

use crate::ProtocolError;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// 协议版本（帧类型表与字段偏移在同一版本内保持稳定）
pub const PROTOCOL_VERSION: u8 = 1;

/// 驱动器地址下限（含）
pub const MIN_DRIVE_ADDRESS: u16 = 10;

/// 驱动器地址上限（含）
pub const MAX_DRIVE_ADDRESS: u16 = 2047;

/// 地址是否在合法范围 [10, 2047] 内
pub fn is_valid_address(address: u16) -> bool {
    (MIN_DRIVE_ADDRESS..=MAX_DRIVE_ADDRESS).contains(&address)
}

// ============================================================================
// 总线帧类型
// ============================================================================

/// 总线帧类型（帧的第 0 字节）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum BusFrameKind {
    None = 0,
    PingStart = 1,
    CanConfig = 2,
    /// 开始周期更新（会话启动）
    Begin = 3,
    /// 结束周期更新（会话停止）
    End = 4,
    /// 周期更新帧：命令与响应在同一次交换中完成
    Update = 5,
    Md80Add = 10,
    Md80Generic = 11,
    Md80ConfigCan = 12,
    Md80Save = 13,
    Md80ZeroEncoder = 14,
    Md80Calibration = 15,
    Md80RegisterWrite = 20,
    Md80RegisterRead = 21,
    Reset = 50,
}

/// 帧类型的传输语义
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameKindInfo {
    pub kind: BusFrameKind,
    /// SPI 后端是否使用全双工（transmit-receive）交换
    pub combined_transfer: bool,
    /// 是否期待应答帧
    pub expects_response: bool,
}

const fn entry(kind: BusFrameKind, combined_transfer: bool, expects_response: bool) -> FrameKindInfo {
    FrameKindInfo {
        kind,
        combined_transfer,
        expects_response,
    }
}

/// 帧类型表（协议版本 1）
pub const FRAME_KIND_TABLE: &[FrameKindInfo] = &[
    entry(BusFrameKind::None, false, false),
    entry(BusFrameKind::PingStart, false, true),
    entry(BusFrameKind::CanConfig, false, true),
    entry(BusFrameKind::Begin, false, true),
    entry(BusFrameKind::End, false, true),
    entry(BusFrameKind::Update, true, true),
    entry(BusFrameKind::Md80Add, false, true),
    entry(BusFrameKind::Md80Generic, false, true),
    entry(BusFrameKind::Md80ConfigCan, false, true),
    entry(BusFrameKind::Md80Save, false, true),
    entry(BusFrameKind::Md80ZeroEncoder, false, true),
    entry(BusFrameKind::Md80Calibration, false, true),
    entry(BusFrameKind::Md80RegisterWrite, false, true),
    entry(BusFrameKind::Md80RegisterRead, false, true),
    entry(BusFrameKind::Reset, false, false),
];

impl BusFrameKind {
    /// 从帧首字节解析类型（未知字节返回 `None`）
    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::try_from(byte).ok()
    }

    /// 解析首字节，类型表之外的字节返回 `UnknownFrameKind`
    pub fn parse(byte: u8) -> Result<Self, ProtocolError> {
        Self::from_byte(byte).ok_or(ProtocolError::UnknownFrameKind { byte })
    }

    /// 查表获取传输语义
    pub fn info(self) -> FrameKindInfo {
        FRAME_KIND_TABLE
            .iter()
            .copied()
            .find(|info| info.kind == self)
            .unwrap_or(entry(self, false, false))
    }

    pub fn as_u8(self) -> u8 {
        self.into()
    }
}

/// 帧首字节是否要求 SPI 全双工交换
///
/// 未知的首字节一律按普通发送处理。
pub fn uses_combined_transfer(leading_byte: u8) -> bool {
    BusFrameKind::from_byte(leading_byte)
        .map(|kind| kind.info().combined_transfer)
        .unwrap_or(false)
}

// ============================================================================
// 驱动器帧 ID（有效载荷第 0 字节）
// ============================================================================

/// 使能/失能（IDLE 模式的保活帧）
pub const FRAME_MOTOR_ENABLE: u8 = 0x01;
/// 位置 PID 控制
pub const FRAME_POSITION_CONTROL: u8 = 0x10;
/// 速度 PID 控制
pub const FRAME_VELOCITY_CONTROL: u8 = 0x11;
/// 阻抗控制
pub const FRAME_IMPEDANCE_CONTROL: u8 = 0x12;
/// 力矩控制
pub const FRAME_TORQUE_CONTROL: u8 = 0x15;
/// 默认响应（遥测）
pub const RESPONSE_DEFAULT: u8 = 0xA0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_range() {
        assert!(!is_valid_address(0));
        assert!(!is_valid_address(9));
        assert!(is_valid_address(10));
        assert!(is_valid_address(300));
        assert!(is_valid_address(2047));
        assert!(!is_valid_address(2048));
        assert!(!is_valid_address(u16::MAX));
    }

    #[test]
    fn test_frame_kind_from_byte() {
        assert_eq!(BusFrameKind::from_byte(5), Some(BusFrameKind::Update));
        assert_eq!(BusFrameKind::from_byte(3), Some(BusFrameKind::Begin));
        assert_eq!(BusFrameKind::from_byte(50), Some(BusFrameKind::Reset));
        assert_eq!(BusFrameKind::from_byte(6), None);
        assert_eq!(BusFrameKind::from_byte(0xFF), None);
    }

    #[test]
    fn test_parse_unknown_byte() {
        assert_eq!(BusFrameKind::parse(4), Ok(BusFrameKind::End));
        assert_eq!(
            BusFrameKind::parse(0x7F),
            Err(ProtocolError::UnknownFrameKind { byte: 0x7F })
        );
    }

    #[test]
    fn test_table_covers_every_kind_once() {
        for info in FRAME_KIND_TABLE {
            let count = FRAME_KIND_TABLE.iter().filter(|i| i.kind == info.kind).count();
            assert_eq!(count, 1, "{:?} 在类型表中重复", info.kind);
            assert_eq!(BusFrameKind::from_byte(info.kind.as_u8()), Some(info.kind));
        }
    }

    #[test]
    fn test_only_update_is_combined() {
        assert!(uses_combined_transfer(BusFrameKind::Update.as_u8()));
        assert!(!uses_combined_transfer(BusFrameKind::Begin.as_u8()));
        assert!(!uses_combined_transfer(BusFrameKind::Md80RegisterRead.as_u8()));
        // 未知字节
        assert!(!uses_combined_transfer(0x7F));
    }

    #[test]
    fn test_info_lookup() {
        let info = BusFrameKind::Update.info();
        assert!(info.combined_transfer);
        assert!(info.expects_response);

        let info = BusFrameKind::Reset.info();
        assert!(!info.expects_response);
    }
}
