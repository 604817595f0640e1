//! 轮询循环状态机
//!
//! `Stopped -> Running -> Stopping -> Stopped`

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// 轮询循环状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum LoopState {
    /// 已停止（默认）
    #[default]
    Stopped = 0,
    /// 后台线程正在周期轮询
    Running = 1,
    /// 已发出取消信号，等待后台线程退出
    Stopping = 2,
}

impl LoopState {
    /// 从 u8 转换
    ///
    /// 如果值无效，返回 Stopped。
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::Stopping,
            _ => Self::Stopped,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn is_running(self) -> bool {
        self == Self::Running
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopState::Stopped => write!(f, "Stopped"),
            LoopState::Running => write!(f, "Running"),
            LoopState::Stopping => write!(f, "Stopping"),
        }
    }
}

/// 循环状态（原子版本，可在任意线程读取）
#[derive(Debug, Default)]
pub struct AtomicLoopState {
    inner: AtomicU8,
}

impl AtomicLoopState {
    pub fn new(state: LoopState) -> Self {
        Self {
            inner: AtomicU8::new(state.as_u8()),
        }
    }

    pub fn get(&self, ordering: Ordering) -> LoopState {
        LoopState::from_u8(self.inner.load(ordering))
    }

    pub fn set(&self, state: LoopState, ordering: Ordering) {
        self.inner.store(state.as_u8(), ordering);
    }

    /// 比较并交换
    ///
    /// 如果当前值等于 `current`，则设置为 `new` 并返回 true。
    pub fn compare_exchange(
        &self,
        current: LoopState,
        new: LoopState,
        success: Ordering,
        failure: Ordering,
    ) -> bool {
        self.inner
            .compare_exchange(current.as_u8(), new.as_u8(), success, failure)
            .is_ok()
    }
}
