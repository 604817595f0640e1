//! 响应帧解析
//!
//! 响应帧与命令帧共用同一帧头，载荷按固定偏移存放遥测：
//!
//! ```text
//! payload 0      : 响应 ID（0xA0）
//! payload 1..3   : 固件故障字（u16）
//! payload 3..7   : 位置（rad）
//! payload 7..11  : 速度（rad/s）
//! payload 11..15 : 力矩（N·m）
//! payload 15     : 温度（°C）
//! ```

use crate::{
    BusFrameKind, ErrorVector, FRAME_HEADER_LEN, FRAME_LEN, ProtocolError, RESPONSE_DEFAULT,
    read_f32_le, read_u16_le, write_f32_le, write_u16_le,
};

/// 响应载荷长度
pub const RESPONSE_PAYLOAD_LEN: usize = 16;

/// 单次响应解析出的遥测
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Telemetry {
    pub position: f32,
    pub velocity: f32,
    pub torque: f32,
    pub error_vector: ErrorVector,
    pub temperature: u8,
}

/// 解析响应帧
///
/// `expected_address` 为 `Some` 时校验地址一致（防止错位的应答）。
pub fn decode_response(buf: &[u8], expected_address: Option<u16>) -> Result<Telemetry, ProtocolError> {
    if buf.len() < FRAME_LEN {
        return Err(ProtocolError::InvalidLength {
            expected: FRAME_LEN,
            actual: buf.len(),
        });
    }

    if BusFrameKind::parse(buf[0])? != BusFrameKind::Update {
        return Err(ProtocolError::UnexpectedFrameKind {
            expected: BusFrameKind::Update,
            actual: buf[0],
        });
    }

    let address = read_u16_le(buf, 1);
    if let Some(expected) = expected_address
        && expected != address
    {
        return Err(ProtocolError::AddressMismatch {
            expected,
            actual: address,
        });
    }

    let payload = &buf[FRAME_HEADER_LEN..FRAME_LEN];
    if payload[0] != RESPONSE_DEFAULT {
        return Err(ProtocolError::UnexpectedResponseId { id: payload[0] });
    }

    Ok(Telemetry {
        error_vector: ErrorVector::from_firmware(read_u16_le(payload, 1)),
        position: read_f32_le(payload, 3),
        velocity: read_f32_le(payload, 7),
        torque: read_f32_le(payload, 11),
        temperature: payload[15],
    })
}

/// 构建响应帧（供模拟传输和测试使用）
///
/// 只写入错误向量的固件位，主机侧状态位不会出现在线上。
pub fn encode_response(address: u16, telemetry: &Telemetry) -> [u8; FRAME_LEN] {
    let mut buf = [0u8; FRAME_LEN];
    buf[0] = BusFrameKind::Update.as_u8();
    write_u16_le(&mut buf, 1, address);
    buf[3] = RESPONSE_PAYLOAD_LEN as u8;

    let payload = &mut buf[FRAME_HEADER_LEN..];
    payload[0] = RESPONSE_DEFAULT;
    write_u16_le(payload, 1, telemetry.error_vector.firmware_raw());
    write_f32_le(payload, 3, telemetry.position);
    write_f32_le(payload, 7, telemetry.velocity);
    write_f32_le(payload, 11, telemetry.torque);
    payload[15] = telemetry.temperature;
    buf
}
