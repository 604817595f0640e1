//! 轮询循环性能指标
//!
//! 原子计数器，任何线程都可以读取快照，不引入锁竞争。

use std::sync::atomic::{AtomicU64, Ordering};

/// 轮询循环实时指标
///
/// ```rust
/// use candle_driver::PollMetrics;
/// use std::sync::atomic::Ordering;
///
/// let metrics = PollMetrics::new();
/// metrics.cycles_total.fetch_add(1, Ordering::Relaxed);
/// assert_eq!(metrics.snapshot().cycles_total, 1);
/// ```
#[derive(Debug, Default)]
pub struct PollMetrics {
    /// 完成的周期数
    pub cycles_total: AtomicU64,

    /// 周期耗时超过目标周期的次数
    ///
    /// 持续增长说明传输超时设置过长或总线上驱动器过多。
    pub cycle_overruns: AtomicU64,

    /// 周期更新帧发送次数
    pub transfers_total: AtomicU64,

    /// 传输失败次数（超时、设备错误）
    pub transfer_failures: AtomicU64,

    /// 应答格式错误次数
    pub malformed_responses: AtomicU64,

    /// 驱动器进入通信丢失状态的次数
    pub communication_lost_events: AtomicU64,
}

impl PollMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cycles_total: self.cycles_total.load(Ordering::Relaxed),
            cycle_overruns: self.cycle_overruns.load(Ordering::Relaxed),
            transfers_total: self.transfers_total.load(Ordering::Relaxed),
            transfer_failures: self.transfer_failures.load(Ordering::Relaxed),
            malformed_responses: self.malformed_responses.load(Ordering::Relaxed),
            communication_lost_events: self.communication_lost_events.load(Ordering::Relaxed),
        }
    }

    /// 重置所有计数器
    pub fn reset(&self) {
        self.cycles_total.store(0, Ordering::Relaxed);
        self.cycle_overruns.store(0, Ordering::Relaxed);
        self.transfers_total.store(0, Ordering::Relaxed);
        self.transfer_failures.store(0, Ordering::Relaxed);
        self.malformed_responses.store(0, Ordering::Relaxed);
        self.communication_lost_events.store(0, Ordering::Relaxed);
    }
}

/// 指标快照（不可变）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub cycles_total: u64,
    pub cycle_overruns: u64,
    pub transfers_total: u64,
    pub transfer_failures: u64,
    pub malformed_responses: u64,
    pub communication_lost_events: u64,
}

impl MetricsSnapshot {
    /// 交换成功率（百分比）
    ///
    /// 返回 0.0 到 100.0 之间的值。没有任何传输时返回 100.0。
    pub fn success_rate(&self) -> f64 {
        if self.transfers_total == 0 {
            return 100.0;
        }
        let failed = self.transfer_failures + self.malformed_responses;
        let ok = self.transfers_total.saturating_sub(failed);
        (ok as f64 / self.transfers_total as f64) * 100.0
    }

    /// 周期超时率（百分比）
    pub fn overrun_rate(&self) -> f64 {
        if self.cycles_total == 0 {
            return 0.0;
        }
        (self.cycle_overruns as f64 / self.cycles_total as f64) * 100.0
    }
}
