//! 调节器参数与限幅
//!
//! 增益由主机下发，闭环计算在驱动器固件中完成。

/// 默认力矩上限（N·m）
pub const DEFAULT_MAX_TORQUE: f32 = 1.8;

/// 默认速度上限（rad/s）
pub const DEFAULT_MAX_VELOCITY: f32 = 300.0;

/// PID 调节器参数
///
/// - 位置 PID：输出为目标速度（rad/s），再作为速度 PID 的输入
/// - 速度 PID：输出为力矩（N·m），直接送入电流/力矩环
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PidParams {
    /// 比例增益
    pub kp: f32,
    /// 积分增益
    pub ki: f32,
    /// 微分增益
    pub kd: f32,
    /// 抗积分饱和：积分项输出的最大值
    pub i_windup: f32,
}

impl PidParams {
    pub fn new(kp: f32, ki: f32, kd: f32, i_windup: f32) -> Self {
        Self { kp, ki, kd, i_windup }
    }

    /// 所有参数是否为有限值
    pub fn is_finite(&self) -> bool {
        self.kp.is_finite() && self.ki.is_finite() && self.kd.is_finite() && self.i_windup.is_finite()
    }
}

/// 阻抗调节器参数（弹簧-阻尼模型）
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ImpedanceParams {
    /// 位移增益（弹簧系数 k）
    pub kp: f32,
    /// 阻尼系数（b）
    pub kd: f32,
}

impl ImpedanceParams {
    pub fn new(kp: f32, kd: f32) -> Self {
        Self { kp, kd }
    }

    pub fn is_finite(&self) -> bool {
        self.kp.is_finite() && self.kd.is_finite()
    }
}
