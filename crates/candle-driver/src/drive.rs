//! 驱动器实体
//!
//! 每个字段只有一个写者：
//!
//! - 设定值、限幅、调节器参数只由调用方线程通过 [`DriveHandle`] 写入，
//!   轮询线程只读；
//! - 遥测只由轮询线程发布（`pub(crate)` 接口），调用方只读。
//!
//! 标量设定值用原子变量存储（`f32` 按位存入 `AtomicU32`），不会读到
//! 写了一半的值。遥测整体通过 `ArcSwap` 发布，调用方一次读取拿到同一
//! 周期的完整快照。

use crate::error::DriverError;
use arc_swap::ArcSwap;
use candle_protocol::{
    ControlCommand, ControlMode, DEFAULT_MAX_TORQUE, DEFAULT_MAX_VELOCITY, ErrorVector,
    ImpedanceParams, PidParams, Telemetry,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};

/// `f32` 的原子封装
#[derive(Debug)]
struct AtomicF32(AtomicU32);

impl AtomicF32 {
    fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    fn load(&self, ordering: Ordering) -> f32 {
        f32::from_bits(self.0.load(ordering))
    }

    fn store(&self, value: f32, ordering: Ordering) {
        self.0.store(value.to_bits(), ordering);
    }
}

/// 调节器参数 + 脏标记
///
/// 参数只在被修改后随下一帧下发一次。
#[derive(Debug, Default)]
struct RegulatorBank {
    position: PidParams,
    position_dirty: bool,
    velocity: PidParams,
    velocity_dirty: bool,
    impedance: ImpedanceParams,
    impedance_dirty: bool,
}

/// 驱动器遥测快照
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DriveTelemetry {
    /// 位置（rad）
    pub position: f32,
    /// 速度（rad/s）
    pub velocity: f32,
    /// 力矩（N·m）
    pub torque: f32,
    /// 驱动器温度（°C）
    pub temperature: u8,
    /// 固件故障位 + 主机侧状态位
    pub error_vector: ErrorVector,
    /// 数值最近一次刷新时的周期编号（0 表示从未收到应答）
    pub cycle: u64,
    /// 连续失败次数
    pub consecutive_failures: u32,
}

impl DriveTelemetry {
    pub fn is_stale(&self) -> bool {
        self.error_vector.is_stale()
    }

    pub fn is_communication_lost(&self) -> bool {
        self.error_vector.is_communication_lost()
    }
}

/// 一次失败记录的结果（用于日志与指标）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FailureOutcome {
    pub consecutive: u32,
    /// 本次失败使驱动器进入通信丢失状态
    pub became_lost: bool,
}

#[derive(Debug)]
struct Drive {
    address: u16,

    // === 调用方写，轮询线程读 ===
    mode: AtomicU8,
    enabled: AtomicBool,
    target_position: AtomicF32,
    target_velocity: AtomicF32,
    target_torque: AtomicF32,
    max_torque: AtomicF32,
    max_velocity: AtomicF32,
    regulators: Mutex<RegulatorBank>,

    // === 轮询线程写，调用方读 ===
    telemetry: ArcSwap<DriveTelemetry>,
    consecutive_failures: AtomicU32,
}

/// 驱动器句柄
///
/// 克隆开销为一次引用计数，可在任意线程读写。句柄在注册表生命周期内有效。
#[derive(Debug, Clone)]
pub struct DriveHandle {
    inner: Arc<Drive>,
}

fn check_finite(field: &'static str, value: f32) -> Result<f32, DriverError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(DriverError::InvalidValue { field, value })
    }
}

fn check_limit(field: &'static str, value: f32) -> Result<f32, DriverError> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(DriverError::InvalidValue { field, value })
    }
}

fn check_pid(field: &'static str, gains: &PidParams) -> Result<(), DriverError> {
    check_finite(field, gains.kp)?;
    check_finite(field, gains.ki)?;
    check_finite(field, gains.kd)?;
    check_limit(field, gains.i_windup)?;
    Ok(())
}

impl DriveHandle {
    /// 创建驱动器（地址校验由注册表完成）
    pub(crate) fn new(address: u16) -> Self {
        Self {
            inner: Arc::new(Drive {
                address,
                mode: AtomicU8::new(ControlMode::Idle.into()),
                enabled: AtomicBool::new(false),
                target_position: AtomicF32::new(0.0),
                target_velocity: AtomicF32::new(0.0),
                target_torque: AtomicF32::new(0.0),
                max_torque: AtomicF32::new(DEFAULT_MAX_TORQUE),
                max_velocity: AtomicF32::new(DEFAULT_MAX_VELOCITY),
                regulators: Mutex::new(RegulatorBank::default()),
                telemetry: ArcSwap::from_pointee(DriveTelemetry::default()),
                consecutive_failures: AtomicU32::new(0),
            }),
        }
    }

    pub fn address(&self) -> u16 {
        self.inner.address
    }

    /// 两个句柄是否指向同一个驱动器
    pub fn same_drive(&self, other: &DriveHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // ============================================================
    // 设定值（调用方线程）
    // ============================================================

    pub fn set_mode(&self, mode: ControlMode) {
        self.inner.mode.store(mode.into(), Ordering::Release);
    }

    pub fn mode(&self) -> ControlMode {
        ControlMode::try_from(self.inner.mode.load(Ordering::Acquire)).unwrap_or_default()
    }

    /// 使能/失能（失能时驱动器忽略设定值）
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire)
    }

    /// 目标位置（rad）
    pub fn set_target_position(&self, position: f32) -> Result<(), DriverError> {
        let position = check_finite("target_position", position)?;
        self.inner.target_position.store(position, Ordering::Release);
        Ok(())
    }

    /// 目标速度（rad/s）
    pub fn set_target_velocity(&self, velocity: f32) -> Result<(), DriverError> {
        let velocity = check_finite("target_velocity", velocity)?;
        self.inner.target_velocity.store(velocity, Ordering::Release);
        Ok(())
    }

    /// 目标力矩（N·m）
    pub fn set_target_torque(&self, torque: f32) -> Result<(), DriverError> {
        let torque = check_finite("target_torque", torque)?;
        self.inner.target_torque.store(torque, Ordering::Release);
        Ok(())
    }

    /// 力矩上限（N·m），由固件执行
    pub fn set_max_torque(&self, max_torque: f32) -> Result<(), DriverError> {
        let max_torque = check_limit("max_torque", max_torque)?;
        self.inner.max_torque.store(max_torque, Ordering::Release);
        Ok(())
    }

    /// 速度上限（rad/s），由固件执行
    pub fn set_max_velocity(&self, max_velocity: f32) -> Result<(), DriverError> {
        let max_velocity = check_limit("max_velocity", max_velocity)?;
        self.inner.max_velocity.store(max_velocity, Ordering::Release);
        Ok(())
    }

    pub fn target_position(&self) -> f32 {
        self.inner.target_position.load(Ordering::Acquire)
    }

    pub fn target_velocity(&self) -> f32 {
        self.inner.target_velocity.load(Ordering::Acquire)
    }

    pub fn target_torque(&self) -> f32 {
        self.inner.target_torque.load(Ordering::Acquire)
    }

    pub fn max_torque(&self) -> f32 {
        self.inner.max_torque.load(Ordering::Acquire)
    }

    pub fn max_velocity(&self) -> f32 {
        self.inner.max_velocity.load(Ordering::Acquire)
    }

    /// 位置 PID 参数（输出为目标速度）
    pub fn set_position_pid(&self, gains: PidParams) -> Result<(), DriverError> {
        check_pid("position_pid", &gains)?;
        let mut bank = self.inner.regulators.lock();
        bank.position = gains;
        bank.position_dirty = true;
        Ok(())
    }

    /// 速度 PID 参数（输出为力矩）
    pub fn set_velocity_pid(&self, gains: PidParams) -> Result<(), DriverError> {
        check_pid("velocity_pid", &gains)?;
        let mut bank = self.inner.regulators.lock();
        bank.velocity = gains;
        bank.velocity_dirty = true;
        Ok(())
    }

    /// 阻抗参数（kp: 弹簧系数，kd: 阻尼）
    pub fn set_impedance(&self, gains: ImpedanceParams) -> Result<(), DriverError> {
        check_finite("impedance", gains.kp)?;
        check_finite("impedance", gains.kd)?;
        let mut bank = self.inner.regulators.lock();
        bank.impedance = gains;
        bank.impedance_dirty = true;
        Ok(())
    }

    pub fn position_pid(&self) -> PidParams {
        self.inner.regulators.lock().position
    }

    pub fn velocity_pid(&self) -> PidParams {
        self.inner.regulators.lock().velocity
    }

    pub fn impedance(&self) -> ImpedanceParams {
        self.inner.regulators.lock().impedance
    }

    // ============================================================
    // 遥测（只读）
    // ============================================================

    /// 最新遥测快照（同一周期的完整数据）
    pub fn telemetry(&self) -> DriveTelemetry {
        **self.inner.telemetry.load()
    }

    /// 位置（rad）
    pub fn position(&self) -> f32 {
        self.inner.telemetry.load().position
    }

    /// 速度（rad/s）
    pub fn velocity(&self) -> f32 {
        self.inner.telemetry.load().velocity
    }

    /// 力矩（N·m）
    pub fn torque(&self) -> f32 {
        self.inner.telemetry.load().torque
    }

    pub fn temperature(&self) -> u8 {
        self.inner.telemetry.load().temperature
    }

    pub fn error_vector(&self) -> ErrorVector {
        self.inner.telemetry.load().error_vector
    }

    /// 通信健康标志：连续失败达到阈值后为 true，下一次成功交换后恢复
    pub fn is_communication_lost(&self) -> bool {
        self.error_vector().is_communication_lost()
    }

    // ============================================================
    // 轮询线程专用
    // ============================================================

    /// 读取本周期的命令，取走对应模式的脏参数
    pub(crate) fn take_command(&self) -> (bool, ControlCommand) {
        let drive = &*self.inner;
        let enabled = drive.enabled.load(Ordering::Acquire);
        let max_torque = drive.max_torque.load(Ordering::Acquire);

        let command = match self.mode() {
            ControlMode::Idle => ControlCommand::Idle,
            ControlMode::Position => {
                let gains = {
                    let mut bank = drive.regulators.lock();
                    std::mem::take(&mut bank.position_dirty).then_some(bank.position)
                };
                ControlCommand::Position {
                    target_position: drive.target_position.load(Ordering::Acquire),
                    max_velocity: drive.max_velocity.load(Ordering::Acquire),
                    max_torque,
                    gains,
                }
            },
            ControlMode::Velocity => {
                let gains = {
                    let mut bank = drive.regulators.lock();
                    std::mem::take(&mut bank.velocity_dirty).then_some(bank.velocity)
                };
                ControlCommand::Velocity {
                    target_velocity: drive.target_velocity.load(Ordering::Acquire),
                    max_torque,
                    gains,
                }
            },
            ControlMode::Impedance => {
                let gains = {
                    let mut bank = drive.regulators.lock();
                    std::mem::take(&mut bank.impedance_dirty).then_some(bank.impedance)
                };
                ControlCommand::Impedance {
                    target_position: drive.target_position.load(Ordering::Acquire),
                    target_velocity: drive.target_velocity.load(Ordering::Acquire),
                    target_torque: drive.target_torque.load(Ordering::Acquire),
                    max_torque,
                    gains,
                }
            },
            ControlMode::Torque => ControlCommand::Torque {
                target_torque: drive.target_torque.load(Ordering::Acquire),
                max_torque,
            },
        };

        (enabled, command)
    }

    /// 命令未送达时重新标记参数为脏，下一周期重发
    pub(crate) fn requeue_gains(&self, command: &ControlCommand) {
        let mut bank = self.inner.regulators.lock();
        match command {
            ControlCommand::Position { gains: Some(_), .. } => bank.position_dirty = true,
            ControlCommand::Velocity { gains: Some(_), .. } => bank.velocity_dirty = true,
            ControlCommand::Impedance { gains: Some(_), .. } => bank.impedance_dirty = true,
            _ => {},
        }
    }

    /// 发布一次成功交换的遥测，返回此前是否处于失败状态
    pub(crate) fn record_success(&self, telemetry: &Telemetry, cycle: u64) -> bool {
        let previous = self.inner.consecutive_failures.swap(0, Ordering::Relaxed);
        self.inner.telemetry.store(Arc::new(DriveTelemetry {
            position: telemetry.position,
            velocity: telemetry.velocity,
            torque: telemetry.torque,
            temperature: telemetry.temperature,
            error_vector: telemetry.error_vector.without_host_flags(),
            cycle,
            consecutive_failures: 0,
        }));
        previous > 0
    }

    /// 记录一次失败：保留上次数值，置 stale 位；达到阈值时置通信丢失位
    pub(crate) fn record_failure(&self, threshold: u32) -> FailureOutcome {
        // 长时间断线时计数停在 u32::MAX，不回绕
        let consecutive = match self.inner.consecutive_failures.fetch_update(
            Ordering::Relaxed,
            Ordering::Relaxed,
            |n| Some(n.saturating_add(1)),
        ) {
            Ok(previous) | Err(previous) => previous.saturating_add(1),
        };
        let lost = consecutive >= threshold;

        let previous = self.telemetry();
        let mut error_vector = previous.error_vector.with_stale();
        if lost {
            error_vector = error_vector.with_communication_lost();
        }

        self.inner.telemetry.store(Arc::new(DriveTelemetry {
            error_vector,
            consecutive_failures: consecutive,
            ..previous
        }));

        FailureOutcome {
            consecutive,
            became_lost: lost && !previous.is_communication_lost(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_telemetry() -> Telemetry {
        Telemetry {
            position: 1.0,
            velocity: 0.5,
            torque: 0.0,
            error_vector: ErrorVector::from_firmware(0x0002),
            temperature: 30,
        }
    }

    #[test]
    fn test_defaults() {
        let drive = DriveHandle::new(300);
        assert_eq!(drive.address(), 300);
        assert_eq!(drive.mode(), ControlMode::Idle);
        assert!(!drive.is_enabled());
        assert_eq!(drive.max_torque(), DEFAULT_MAX_TORQUE);
        assert_eq!(drive.max_velocity(), DEFAULT_MAX_VELOCITY);
        assert_eq!(drive.telemetry(), DriveTelemetry::default());
        assert!(!drive.is_communication_lost());
    }

    #[test]
    fn test_setters_validate() {
        let drive = DriveHandle::new(10);
        drive.set_target_position(1.25).unwrap();
        assert_eq!(drive.target_position(), 1.25);

        assert!(matches!(
            drive.set_target_position(f32::NAN),
            Err(DriverError::InvalidValue {
                field: "target_position",
                ..
            })
        ));
        // 失败不修改原值
        assert_eq!(drive.target_position(), 1.25);

        assert!(drive.set_target_velocity(f32::INFINITY).is_err());
        assert!(drive.set_target_torque(-0.5).is_ok());
        assert!(drive.set_max_torque(-1.0).is_err());
        assert!(drive.set_max_velocity(0.0).is_ok());
        assert!(drive.set_position_pid(PidParams::new(1.0, 0.0, 0.0, -1.0)).is_err());
        assert!(drive.set_impedance(ImpedanceParams::new(f32::NAN, 0.0)).is_err());
    }

    #[test]
    fn test_gains_sent_once() {
        let drive = DriveHandle::new(300);
        drive.set_mode(ControlMode::Impedance);
        drive.set_impedance(ImpedanceParams::new(4.0, 0.02)).unwrap();

        let (_, first) = drive.take_command();
        match first {
            ControlCommand::Impedance { gains, .. } => {
                assert_eq!(gains, Some(ImpedanceParams::new(4.0, 0.02)))
            },
            other => panic!("Expected Impedance command, got {:?}", other),
        }

        let (_, second) = drive.take_command();
        assert!(matches!(second, ControlCommand::Impedance { gains: None, .. }));

        // 未送达时重发
        drive.requeue_gains(&first);
        let (_, third) = drive.take_command();
        assert!(matches!(third, ControlCommand::Impedance { gains: Some(_), .. }));
    }

    #[test]
    fn test_command_follows_mode() {
        let drive = DriveHandle::new(300);
        drive.set_enabled(true);
        drive.set_target_position(2.0).unwrap();
        drive.set_target_velocity(3.0).unwrap();
        drive.set_target_torque(0.4).unwrap();
        drive.set_max_torque(1.0).unwrap();
        drive.set_max_velocity(50.0).unwrap();

        let (enabled, cmd) = drive.take_command();
        assert!(enabled);
        assert_eq!(cmd, ControlCommand::Idle);

        drive.set_mode(ControlMode::Position);
        assert_eq!(
            drive.take_command().1,
            ControlCommand::Position {
                target_position: 2.0,
                max_velocity: 50.0,
                max_torque: 1.0,
                gains: None
            }
        );

        drive.set_mode(ControlMode::Velocity);
        drive.set_velocity_pid(PidParams::new(0.1, 0.2, 0.0, 1.0)).unwrap();
        assert_eq!(
            drive.take_command().1,
            ControlCommand::Velocity {
                target_velocity: 3.0,
                max_torque: 1.0,
                gains: Some(PidParams::new(0.1, 0.2, 0.0, 1.0))
            }
        );

        drive.set_mode(ControlMode::Torque);
        assert_eq!(
            drive.take_command().1,
            ControlCommand::Torque {
                target_torque: 0.4,
                max_torque: 1.0
            }
        );
    }

    #[test]
    fn test_failure_escalation_and_recovery() {
        let drive = DriveHandle::new(300);
        assert!(!drive.record_success(&sample_telemetry(), 1));

        let outcome = drive.record_failure(3);
        assert_eq!(outcome.consecutive, 1);
        assert!(!outcome.became_lost);
        let t = drive.telemetry();
        assert!(t.is_stale());
        assert!(!t.is_communication_lost());
        // 数值保持上一次成功的值
        assert_eq!(t.position, 1.0);
        assert_eq!(t.cycle, 1);
        assert_eq!(t.error_vector.firmware_raw(), 0x0002);

        drive.record_failure(3);
        let outcome = drive.record_failure(3);
        assert!(outcome.became_lost);
        assert!(drive.is_communication_lost());

        // 已丢失状态下再失败不会重复触发
        assert!(!drive.record_failure(3).became_lost);
        assert_eq!(drive.telemetry().consecutive_failures, 4);

        // 成功后清除主机位
        assert!(drive.record_success(&sample_telemetry(), 6));
        let t = drive.telemetry();
        assert!(!t.is_stale());
        assert!(!t.is_communication_lost());
        assert_eq!(t.consecutive_failures, 0);
        assert_eq!(t.cycle, 6);
    }

    #[test]
    fn test_failure_count_saturates() {
        let drive = DriveHandle::new(300);
        drive.inner.consecutive_failures.store(u32::MAX - 1, Ordering::Relaxed);

        assert_eq!(drive.record_failure(3).consecutive, u32::MAX);
        assert_eq!(drive.record_failure(3).consecutive, u32::MAX);
        let t = drive.telemetry();
        assert_eq!(t.consecutive_failures, u32::MAX);
        assert!(t.is_communication_lost());
    }

    #[test]
    fn test_same_drive() {
        let a = DriveHandle::new(300);
        let b = a.clone();
        let c = DriveHandle::new(300);
        assert!(a.same_drive(&b));
        assert!(!a.same_drive(&c));
    }
}
