//! 命令帧构建
//!
//! 周期更新帧（`BusFrameKind::Update`）按控制模式打包。每种模式只携带
//! 该模式需要的字段，由 [`ControlCommand`] 的变体保证。

use crate::{
    BusFrameKind, FRAME_HEADER_LEN, FRAME_LEN, ImpedanceParams, PAYLOAD_CAPACITY, PidParams,
    ProtocolError, ids::*, write_f32_le, write_u16_le,
};
use bilge::prelude::*;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// 控制模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[repr(u8)]
pub enum ControlMode {
    #[default]
    Idle = 0x00,
    Position = 0x01,
    Velocity = 0x02,
    Impedance = 0x03,
    Torque = 0x04,
}

impl ControlMode {
    /// 该模式对应的驱动器帧 ID
    pub fn frame_id(self) -> u8 {
        match self {
            ControlMode::Idle => FRAME_MOTOR_ENABLE,
            ControlMode::Position => FRAME_POSITION_CONTROL,
            ControlMode::Velocity => FRAME_VELOCITY_CONTROL,
            ControlMode::Impedance => FRAME_IMPEDANCE_CONTROL,
            ControlMode::Torque => FRAME_TORQUE_CONTROL,
        }
    }
}

/// 单周期命令（按模式携带字段）
///
/// 增益为 `Some` 表示自上次发送后被修改过，需要随本帧下发；
/// `None` 时对应字段填 0 且不置位 `regulators_included`。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlCommand {
    Idle,
    Position {
        target_position: f32,
        max_velocity: f32,
        max_torque: f32,
        gains: Option<PidParams>,
    },
    Velocity {
        target_velocity: f32,
        max_torque: f32,
        gains: Option<PidParams>,
    },
    Impedance {
        target_position: f32,
        target_velocity: f32,
        target_torque: f32,
        max_torque: f32,
        gains: Option<ImpedanceParams>,
    },
    Torque {
        target_torque: f32,
        max_torque: f32,
    },
}

impl ControlCommand {
    pub fn mode(&self) -> ControlMode {
        match self {
            ControlCommand::Idle => ControlMode::Idle,
            ControlCommand::Position { .. } => ControlMode::Position,
            ControlCommand::Velocity { .. } => ControlMode::Velocity,
            ControlCommand::Impedance { .. } => ControlMode::Impedance,
            ControlCommand::Torque { .. } => ControlMode::Torque,
        }
    }

    /// 有效载荷长度（字节）
    pub fn payload_len(&self) -> usize {
        match self {
            ControlCommand::Idle => 2,
            ControlCommand::Position { .. } => 30,
            ControlCommand::Velocity { .. } => 26,
            ControlCommand::Impedance { .. } => 26,
            ControlCommand::Torque { .. } => 10,
        }
    }

    fn carries_gains(&self) -> bool {
        match self {
            ControlCommand::Position { gains, .. } | ControlCommand::Velocity { gains, .. } => {
                gains.is_some()
            },
            ControlCommand::Impedance { gains, .. } => gains.is_some(),
            ControlCommand::Idle | ControlCommand::Torque { .. } => false,
        }
    }
}

/// 命令标志位域（有效载荷 Byte 1）
///
/// - Bit 0: 使能
/// - Bit 1: 本帧携带调节器参数
/// - Bit 2-7: 保留
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, Default)]
pub struct CommandFlags {
    pub enabled: bool,             // Bit 0
    pub regulators_included: bool, // Bit 1
    pub reserved: u6,              // Bit 2-7
}

/// 已编码的帧（定长缓冲区 + 实际长度）
///
/// 生命周期为一次传输调用，不做持久化。
#[derive(Clone, Copy)]
pub struct CommandFrame {
    bytes: [u8; FRAME_LEN],
    len: usize,
}

impl CommandFrame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 帧类型字节
    pub fn kind_byte(&self) -> u8 {
        self.bytes[0]
    }
}

impl std::fmt::Debug for CommandFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CommandFrame[{}](", self.len)?;
        for (i, b) in self.as_bytes().iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{:02X}", b)?;
        }
        write!(f, ")")
    }
}

fn write_pid(payload: &mut [u8], offset: usize, gains: Option<PidParams>) {
    let gains = gains.unwrap_or_default();
    write_f32_le(payload, offset, gains.kp);
    write_f32_le(payload, offset + 4, gains.ki);
    write_f32_le(payload, offset + 8, gains.kd);
    write_f32_le(payload, offset + 12, gains.i_windup);
}

/// 构建单个驱动器的周期更新帧
///
/// IDLE 模式下无论 `enabled` 为何值，标志位中的使能位都被清除
/// （保活帧即失能帧）。地址范围由注册表保证，这里不做校验。
pub fn encode_command(address: u16, enabled: bool, command: &ControlCommand) -> CommandFrame {
    let mut bytes = [0u8; FRAME_LEN];
    let payload_len = command.payload_len();

    bytes[0] = BusFrameKind::Update.as_u8();
    write_u16_le(&mut bytes, 1, address);
    bytes[3] = payload_len as u8;

    let payload = &mut bytes[FRAME_HEADER_LEN..FRAME_HEADER_LEN + PAYLOAD_CAPACITY];

    let mut flags = CommandFlags::from(u8::new(0));
    flags.set_enabled(enabled && command.mode() != ControlMode::Idle);
    flags.set_regulators_included(command.carries_gains());

    payload[0] = command.mode().frame_id();
    payload[1] = u8::from(flags).value();

    match *command {
        ControlCommand::Idle => {},
        ControlCommand::Position {
            target_position,
            max_velocity,
            max_torque,
            gains,
        } => {
            write_pid(payload, 2, gains);
            write_f32_le(payload, 18, target_position);
            write_f32_le(payload, 22, max_velocity);
            write_f32_le(payload, 26, max_torque);
        },
        ControlCommand::Velocity {
            target_velocity,
            max_torque,
            gains,
        } => {
            write_pid(payload, 2, gains);
            write_f32_le(payload, 18, target_velocity);
            write_f32_le(payload, 22, max_torque);
        },
        ControlCommand::Impedance {
            target_position,
            target_velocity,
            target_torque,
            max_torque,
            gains,
        } => {
            let gains = gains.unwrap_or_default();
            write_f32_le(payload, 2, gains.kp);
            write_f32_le(payload, 6, gains.kd);
            write_f32_le(payload, 10, target_position);
            write_f32_le(payload, 14, target_velocity);
            write_f32_le(payload, 18, target_torque);
            write_f32_le(payload, 22, max_torque);
        },
        ControlCommand::Torque {
            target_torque,
            max_torque,
        } => {
            write_f32_le(payload, 2, target_torque);
            write_f32_le(payload, 6, max_torque);
        },
    }

    CommandFrame {
        bytes,
        len: FRAME_LEN,
    }
}

// ============================================================================
// 总线级命令（Begin / End 等）
// ============================================================================

/// 应答字节：成功
pub const ACK_OK: u8 = 0x01;

/// 构建总线级命令帧：`[kind, payload...]`
///
/// 不携带驱动器地址，由适配器本身处理。`payload` 为空时补一个 0 字节。
pub fn encode_bus_command(kind: BusFrameKind, payload: &[u8]) -> Result<CommandFrame, ProtocolError> {
    if payload.len() > FRAME_LEN - 1 {
        return Err(ProtocolError::PayloadTooLong { len: payload.len() });
    }

    let mut bytes = [0u8; FRAME_LEN];
    bytes[0] = kind.as_u8();
    bytes[1..1 + payload.len()].copy_from_slice(payload);

    Ok(CommandFrame {
        bytes,
        len: 1 + payload.len().max(1),
    })
}

/// 校验总线级命令的应答：`[kind, ACK_OK]`
pub fn decode_ack(kind: BusFrameKind, buf: &[u8]) -> Result<(), ProtocolError> {
    if buf.len() < 2 {
        return Err(ProtocolError::InvalidLength {
            expected: 2,
            actual: buf.len(),
        });
    }
    if BusFrameKind::parse(buf[0])? != kind {
        return Err(ProtocolError::UnexpectedFrameKind {
            expected: kind,
            actual: buf[0],
        });
    }
    if buf[1] != ACK_OK {
        return Err(ProtocolError::NotAcknowledged { kind });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read_f32_le;

    fn payload(frame: &CommandFrame) -> &[u8] {
        &frame.as_bytes()[FRAME_HEADER_LEN..]
    }

    #[test]
    fn test_envelope() {
        let frame = encode_command(300, true, &ControlCommand::Idle);
        let bytes = frame.as_bytes();
        assert_eq!(frame.len(), FRAME_LEN);
        assert_eq!(bytes[0], BusFrameKind::Update.as_u8());
        assert_eq!(u16::from_le_bytes([bytes[1], bytes[2]]), 300);
        assert_eq!(bytes[3], 2);
    }

    #[test]
    fn test_idle_always_disabled() {
        let frame = encode_command(10, true, &ControlCommand::Idle);
        let p = payload(&frame);
        assert_eq!(p[0], FRAME_MOTOR_ENABLE);
        let flags = CommandFlags::from(u8::new(p[1]));
        assert!(!flags.enabled());
        assert!(!flags.regulators_included());
        // 其余载荷为 0
        assert!(p[2..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_impedance_layout() {
        let cmd = ControlCommand::Impedance {
            target_position: 1.5,
            target_velocity: -0.25,
            target_torque: 0.1,
            max_torque: 1.8,
            gains: Some(ImpedanceParams::new(4.0, 0.02)),
        };
        let frame = encode_command(350, true, &cmd);
        let p = payload(&frame);

        assert_eq!(p[0], FRAME_IMPEDANCE_CONTROL);
        let flags = CommandFlags::from(u8::new(p[1]));
        assert!(flags.enabled());
        assert!(flags.regulators_included());
        assert_eq!(read_f32_le(p, 2), 4.0);
        assert_eq!(read_f32_le(p, 6), 0.02);
        assert_eq!(read_f32_le(p, 10), 1.5);
        assert_eq!(read_f32_le(p, 14), -0.25);
        assert_eq!(read_f32_le(p, 18), 0.1);
        assert_eq!(read_f32_le(p, 22), 1.8);
        assert_eq!(frame.as_bytes()[3], 26);
    }

    #[test]
    fn test_impedance_without_gains() {
        let cmd = ControlCommand::Impedance {
            target_position: 0.0,
            target_velocity: 0.0,
            target_torque: 0.0,
            max_torque: 1.0,
            gains: None,
        };
        let frame = encode_command(11, false, &cmd);
        let p = payload(&frame);
        let flags = CommandFlags::from(u8::new(p[1]));
        assert!(!flags.enabled());
        assert!(!flags.regulators_included());
        assert_eq!(read_f32_le(p, 2), 0.0);
        assert_eq!(read_f32_le(p, 6), 0.0);
    }

    #[test]
    fn test_position_layout() {
        let cmd = ControlCommand::Position {
            target_position: 3.0,
            max_velocity: 300.0,
            max_torque: 1.8,
            gains: Some(PidParams::new(10.0, 0.5, 0.1, 2.0)),
        };
        let frame = encode_command(100, true, &cmd);
        let p = payload(&frame);
        assert_eq!(p[0], FRAME_POSITION_CONTROL);
        assert_eq!(read_f32_le(p, 2), 10.0);
        assert_eq!(read_f32_le(p, 6), 0.5);
        assert_eq!(read_f32_le(p, 10), 0.1);
        assert_eq!(read_f32_le(p, 14), 2.0);
        assert_eq!(read_f32_le(p, 18), 3.0);
        assert_eq!(read_f32_le(p, 22), 300.0);
        assert_eq!(read_f32_le(p, 26), 1.8);
        assert_eq!(frame.as_bytes()[3], 30);
    }

    #[test]
    fn test_velocity_layout() {
        let cmd = ControlCommand::Velocity {
            target_velocity: -5.0,
            max_torque: 0.5,
            gains: None,
        };
        let frame = encode_command(100, true, &cmd);
        let p = payload(&frame);
        assert_eq!(p[0], FRAME_VELOCITY_CONTROL);
        assert!(p[2..18].iter().all(|&b| b == 0));
        assert_eq!(read_f32_le(p, 18), -5.0);
        assert_eq!(read_f32_le(p, 22), 0.5);
    }

    #[test]
    fn test_torque_layout() {
        let cmd = ControlCommand::Torque {
            target_torque: 0.75,
            max_torque: 1.0,
        };
        let frame = encode_command(2047, true, &cmd);
        let p = payload(&frame);
        assert_eq!(p[0], FRAME_TORQUE_CONTROL);
        assert_eq!(read_f32_le(p, 2), 0.75);
        assert_eq!(read_f32_le(p, 6), 1.0);
        assert_eq!(frame.as_bytes()[3], 10);
    }

    #[test]
    fn test_mode_u8_conversion() {
        assert_eq!(ControlMode::try_from(3u8).unwrap(), ControlMode::Impedance);
        assert!(ControlMode::try_from(9u8).is_err());
        let raw: u8 = ControlMode::Torque.into();
        assert_eq!(raw, 4);
    }

    #[test]
    fn test_bus_command_and_ack() {
        let frame = encode_bus_command(BusFrameKind::Begin, &[]).unwrap();
        assert_eq!(frame.as_bytes(), &[BusFrameKind::Begin.as_u8(), 0x00]);
        assert_eq!(frame.kind_byte(), 3);

        assert!(decode_ack(BusFrameKind::Begin, &[3, ACK_OK]).is_ok());
        assert_eq!(
            decode_ack(BusFrameKind::Begin, &[3, 0x00]),
            Err(ProtocolError::NotAcknowledged {
                kind: BusFrameKind::Begin
            })
        );
        assert!(matches!(
            decode_ack(BusFrameKind::Begin, &[4, ACK_OK]),
            Err(ProtocolError::UnexpectedFrameKind { .. })
        ));
        assert_eq!(
            decode_ack(BusFrameKind::Begin, &[0x7F, ACK_OK]),
            Err(ProtocolError::UnknownFrameKind { byte: 0x7F })
        );
        assert!(matches!(
            decode_ack(BusFrameKind::End, &[4]),
            Err(ProtocolError::InvalidLength { .. })
        ));
    }

    #[test]
    fn test_bus_command_payload_too_long() {
        let payload = [0u8; FRAME_LEN];
        assert!(matches!(
            encode_bus_command(BusFrameKind::CanConfig, &payload),
            Err(ProtocolError::PayloadTooLong { len: 36 })
        ));
    }
}
