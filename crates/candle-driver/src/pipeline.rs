//! Pipeline 轮询循环模块
//!
//! 后台线程按固定周期遍历注册表：为每个驱动器编码命令帧、经总线交换、
//! 解码应答并发布遥测。单次失败只影响该驱动器本周期的遥测，不会中断循环。

use crate::drive::DriveHandle;
use crate::error::DriverError;
use crate::metrics::PollMetrics;
use candle_bus::{Bus, TransferOptions};
use candle_protocol::{
    BusFrameKind, FRAME_LEN, decode_ack, decode_response, encode_bus_command, encode_command,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

// 使用 spin_sleep 提供微秒级延迟精度（相比 std::thread::sleep 的 1-2ms）
use spin_sleep;

/// Pipeline 配置
///
/// # Example
///
/// ```
/// use candle_driver::PipelineConfig;
/// use std::time::Duration;
///
/// // 默认：1ms 周期，2ms 传输超时，连续 3 次失败判定通信丢失
/// let config = PipelineConfig::default();
///
/// let config = PipelineConfig {
///     cycle_period: Duration::from_micros(500),
///     ..PipelineConfig::default()
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// 目标周期
    pub cycle_period: Duration,
    /// 单次传输超时（直接决定最坏情况下的周期耗时）
    pub transfer_timeout: Duration,
    /// 连续失败多少次后置通信丢失位
    pub max_consecutive_failures: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cycle_period: Duration::from_millis(1),
            transfer_timeout: Duration::from_millis(2),
            max_consecutive_failures: 3,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), DriverError> {
        if self.cycle_period.is_zero() {
            return Err(DriverError::Config("cycle_period must be non-zero".into()));
        }
        if self.transfer_timeout.is_zero() {
            return Err(DriverError::Config("transfer_timeout must be non-zero".into()));
        }
        if self.max_consecutive_failures == 0 {
            return Err(DriverError::Config(
                "max_consecutive_failures must be at least 1".into(),
            ));
        }
        Ok(())
    }

    fn transfer_options(&self) -> TransferOptions {
        transfer_options_for(BusFrameKind::Update, FRAME_LEN, self.transfer_timeout)
    }
}

/// 按帧类型表决定是否等待应答
fn transfer_options_for(kind: BusFrameKind, response_len: usize, timeout: Duration) -> TransferOptions {
    if kind.info().expects_response {
        TransferOptions::expect_response(response_len, timeout)
    } else {
        TransferOptions::no_response(timeout)
    }
}

/// 执行一个完整周期（按注册顺序逐个服务驱动器）
///
/// 传输失败与应答格式错误都按失败处理：遥测数值保持不变，置 stale 位。
pub fn run_cycle(
    bus: &mut Bus,
    drives: &[DriveHandle],
    config: &PipelineConfig,
    metrics: &PollMetrics,
    cycle: u64,
) {
    let opts = config.transfer_options();

    for drive in drives {
        let address = drive.address();
        let (enabled, command) = drive.take_command();
        let frame = encode_command(address, enabled, &command);

        metrics.transfers_total.fetch_add(1, Ordering::Relaxed);
        let result = match bus.transfer(frame.as_bytes(), &opts) {
            Ok(()) => decode_response(bus.rx_buffer(), Some(address)).map_err(|e| {
                if e.is_malformed() {
                    metrics.malformed_responses.fetch_add(1, Ordering::Relaxed);
                }
                DriverError::from(e)
            }),
            Err(e) => {
                metrics.transfer_failures.fetch_add(1, Ordering::Relaxed);
                Err(DriverError::from(e))
            },
        };

        match result {
            Ok(telemetry) => {
                if drive.record_success(&telemetry, cycle) {
                    info!("Drive {}: communication restored at cycle {}", address, cycle);
                }
            },
            Err(e) => {
                drive.requeue_gains(&command);
                let outcome = drive.record_failure(config.max_consecutive_failures);
                if outcome.became_lost {
                    metrics.communication_lost_events.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "Drive {}: communication lost after {} consecutive failures ({})",
                        address, outcome.consecutive, e
                    );
                } else if outcome.consecutive == 1 {
                    warn!("Drive {}: transfer failed at cycle {}: {}", address, cycle, e);
                } else {
                    trace!("Drive {}: failure #{}: {}", address, outcome.consecutive, e);
                }
            },
        }
    }
}

/// 发送总线级命令（会话启动/停止时使用）
///
/// 类型表登记为需要应答的命令校验应答，其余只发送。
pub(crate) fn send_bus_command(
    bus: &mut Bus,
    kind: BusFrameKind,
    timeout: Duration,
) -> Result<(), DriverError> {
    let frame = encode_bus_command(kind, &[])?;
    let opts = transfer_options_for(kind, 2, timeout);
    bus.transfer(frame.as_bytes(), &opts)?;

    if opts.wait_for_response {
        decode_ack(kind, bus.rx_buffer())?;
        debug!("Bus command {:?} acknowledged", kind);
    } else {
        debug!("Bus command {:?} sent", kind);
    }
    Ok(())
}

/// 轮询线程主循环
///
/// 每完成一遍注册表检查一次 `is_running`，不在帧中途取消。
/// 退出时把总线交还给调用方。
///
/// # 参数
/// - `bus`: 总线（线程内独占）
/// - `drives`: 注册表快照
/// - `config`: Pipeline 配置
/// - `is_running`: 运行标志（用于生命周期联动）
/// - `metrics`: 性能指标
/// - `completed_cycles`: 已完成的周期数（跨启动累计）
pub fn poll_loop(
    mut bus: Bus,
    drives: Arc<[DriveHandle]>,
    config: PipelineConfig,
    is_running: Arc<AtomicBool>,
    metrics: Arc<PollMetrics>,
    completed_cycles: Arc<AtomicU64>,
) -> Bus {
    // 设置线程优先级（可选 feature）
    #[cfg(feature = "realtime")]
    {
        use thread_priority::*;

        match set_current_thread_priority(ThreadPriority::Max) {
            Ok(_) => {
                info!("Poll thread priority set to MAX (realtime)");
            },
            Err(e) => {
                warn!(
                    "Failed to set poll thread priority: {:?}. \
                    On Linux, you may need to run with CAP_SYS_NICE or use rtkit.",
                    e
                );
            },
        }
    }

    debug!(
        "Poll thread started: {} drives, period {:?}, transfer timeout {:?}",
        drives.len(),
        config.cycle_period,
        config.transfer_timeout
    );

    let mut overrunning = false;

    loop {
        // Acquire: 看到 false 时必须也看到停止方之前的所有写入
        if !is_running.load(Ordering::Acquire) {
            trace!("Poll thread: is_running flag is false, exiting");
            break;
        }

        let cycle_start = Instant::now();
        let cycle = completed_cycles.load(Ordering::Relaxed) + 1;

        run_cycle(&mut bus, &drives, &config, &metrics, cycle);

        // Release: 等待周期边界的调用方读到本周期发布的遥测
        completed_cycles.store(cycle, Ordering::Release);
        metrics.cycles_total.fetch_add(1, Ordering::Relaxed);

        let elapsed = cycle_start.elapsed();
        if elapsed > config.cycle_period {
            metrics.cycle_overruns.fetch_add(1, Ordering::Relaxed);
            if !overrunning {
                warn!(
                    "Cycle {} overran: {:?} (target {:?})",
                    cycle, elapsed, config.cycle_period
                );
                overrunning = true;
            }
        } else {
            if overrunning {
                debug!("Cycle timing back within {:?}", config.cycle_period);
                overrunning = false;
            }
            spin_sleep::sleep(config.cycle_period - elapsed);
        }
    }

    bus
}
