//! CANdle 会话
//!
//! 持有一条总线、一个驱动器注册表和后台轮询线程的生命周期。

use crate::drive::DriveHandle;
use crate::error::DriverError;
use crate::metrics::{MetricsSnapshot, PollMetrics};
use crate::pipeline::{PipelineConfig, poll_loop, send_bus_command};
use crate::registry::DriveRegistry;
use crate::state::{AtomicLoopState, LoopState};
use candle_bus::{Bus, BusKind};
use candle_protocol::BusFrameKind;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, mpsc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// CANdle 会话
///
/// - 启动前通过 [`add_drive`](Self::add_drive) 注册驱动器；
/// - [`start`](Self::start) 启动后台轮询线程，总线移交给该线程独占；
/// - [`stop`](Self::stop) 阻塞等待线程退出（最多一个周期），总线交还会话，可再次启动；
/// - Drop 时自动停止，释放总线与传输后端。
pub struct Candle {
    bus: Option<Bus>,
    bus_kind: BusKind,
    registry: DriveRegistry,
    config: PipelineConfig,
    state: AtomicLoopState,
    is_running: Arc<AtomicBool>,
    metrics: Arc<PollMetrics>,
    completed_cycles: Arc<AtomicU64>,
    poll_thread: Option<JoinHandle<Option<Bus>>>,
}

impl Candle {
    pub fn new(bus: Bus, config: PipelineConfig) -> Self {
        Self {
            bus_kind: bus.kind(),
            bus: Some(bus),
            registry: DriveRegistry::new(),
            config,
            state: AtomicLoopState::new(LoopState::Stopped),
            is_running: Arc::new(AtomicBool::new(false)),
            metrics: Arc::new(PollMetrics::new()),
            completed_cycles: Arc::new(AtomicU64::new(0)),
            poll_thread: None,
        }
    }

    /// 注册驱动器（仅在循环停止时允许）
    ///
    /// # Errors
    /// - `AlreadyRunning`: 循环正在运行
    /// - `InvalidAddress` / `DuplicateAddress`: 见 [`DriveRegistry::register`]
    pub fn add_drive(&mut self, address: u16) -> Result<DriveHandle, DriverError> {
        if self.state() != LoopState::Stopped {
            return Err(DriverError::AlreadyRunning);
        }
        let handle = self.registry.register(address)?;
        debug!("Drive {} registered on {} bus", address, self.bus_kind);
        Ok(handle)
    }

    /// 按地址查找驱动器
    pub fn drive(&self, address: u16) -> Result<DriveHandle, DriverError> {
        self.registry.lookup(address)
    }

    pub fn drives(&self) -> &DriveRegistry {
        &self.registry
    }

    pub fn bus_kind(&self) -> BusKind {
        self.bus_kind
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn state(&self) -> LoopState {
        self.state.get(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// 累计完成的周期数
    pub fn completed_cycles(&self) -> u64 {
        self.completed_cycles.load(Ordering::Acquire)
    }

    /// 启动后台轮询
    ///
    /// 先向适配器发送 `Begin`；失败时状态保持 `Stopped` 并返回错误。
    ///
    /// # Errors
    /// - `AlreadyRunning`: 状态不是 `Stopped`
    /// - `BusUnavailable`: 总线已随异常退出的轮询线程丢失
    /// - `Transport` / `Protocol`: `Begin` 未被确认
    pub fn start(&mut self) -> Result<(), DriverError> {
        if !self.state.compare_exchange(
            LoopState::Stopped,
            LoopState::Running,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            return Err(DriverError::AlreadyRunning);
        }

        let Some(mut bus) = self.bus.take() else {
            self.state.set(LoopState::Stopped, Ordering::Release);
            return Err(DriverError::BusUnavailable);
        };

        if let Err(e) = send_bus_command(&mut bus, BusFrameKind::Begin, self.config.transfer_timeout) {
            self.bus = Some(bus);
            self.state.set(LoopState::Stopped, Ordering::Release);
            warn!("Begin command failed, loop not started: {}", e);
            return Err(e);
        }

        self.is_running.store(true, Ordering::Release);

        let drives = self.registry.snapshot();
        let config = self.config.clone();
        let is_running = self.is_running.clone();
        let metrics = self.metrics.clone();
        let completed = self.completed_cycles.clone();

        let builder = thread::Builder::new().name("candle-poll".into());
        let spawned = spawn_poll_thread(builder, bus, move |bus| {
            poll_loop(bus, drives, config, is_running, metrics, completed)
        });

        match spawned {
            Ok(handle) => {
                self.poll_thread = Some(handle);
                info!(
                    "Polling loop started: {} drives on {} bus, period {:?}",
                    self.registry.len(),
                    self.bus_kind,
                    self.config.cycle_period
                );
                Ok(())
            },
            Err((mut bus, e)) => {
                self.is_running.store(false, Ordering::Release);
                error!("Failed to spawn poll thread: {}", e);
                // Begin 已确认，撤销之
                if let Err(end) =
                    send_bus_command(&mut bus, BusFrameKind::End, self.config.transfer_timeout)
                {
                    warn!("End command failed: {}", end);
                }
                self.bus = Some(bus);
                self.state.set(LoopState::Stopped, Ordering::Release);
                Err(DriverError::IoThread(e.to_string()))
            },
        }
    }

    /// 停止后台轮询并等待线程退出
    ///
    /// 阻塞时间不超过一个周期（取消只在周期边界检查）。
    /// 第二次调用返回 `NotRunning`，不产生其他副作用。
    pub fn stop(&mut self) -> Result<(), DriverError> {
        if !self.state.compare_exchange(
            LoopState::Running,
            LoopState::Stopping,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            return Err(DriverError::NotRunning);
        }

        // Release: 确保之前的写入对轮询线程可见
        self.is_running.store(false, Ordering::Release);

        let mut result = Ok(());
        if let Some(handle) = self.poll_thread.take() {
            match handle.join() {
                Ok(Some(mut bus)) => {
                    if let Err(e) =
                        send_bus_command(&mut bus, BusFrameKind::End, self.config.transfer_timeout)
                    {
                        warn!("End command failed: {}", e);
                    }
                    self.bus = Some(bus);
                },
                Ok(None) => {
                    error!("Poll thread exited without the bus");
                    result = Err(DriverError::BusUnavailable);
                },
                Err(_) => {
                    error!("Poll thread panicked, bus released");
                    result = Err(DriverError::IoThread("poll thread panicked".into()));
                },
            }
        }

        self.state.set(LoopState::Stopped, Ordering::Release);
        info!("Polling loop stopped after {} cycles", self.completed_cycles());
        result
    }

    /// 阻塞等待再完成 `cycles` 个周期，返回此时的累计周期数
    pub fn wait_for_cycles(&self, cycles: u64, timeout: Duration) -> Result<u64, DriverError> {
        if !self.is_running() {
            return Err(DriverError::NotRunning);
        }

        let target = self.completed_cycles().saturating_add(cycles);
        let deadline = Instant::now() + timeout;
        let poll_interval = self.config.cycle_period.min(Duration::from_millis(1));

        loop {
            let completed = self.completed_cycles();
            if completed >= target {
                return Ok(completed);
            }
            if Instant::now() >= deadline {
                return Err(DriverError::Timeout);
            }
            thread::sleep(poll_interval);
        }
    }
}

/// 启动轮询线程，线程创建成功后才把总线交给它
///
/// 创建失败时总线原样返回，会话可以稍后重试。
fn spawn_poll_thread<F>(
    builder: thread::Builder,
    bus: Bus,
    run: F,
) -> Result<JoinHandle<Option<Bus>>, (Bus, io::Error)>
where
    F: FnOnce(Bus) -> Bus + Send + 'static,
{
    let (bus_tx, bus_rx) = mpsc::sync_channel::<Bus>(1);

    let handle = match builder.spawn(move || bus_rx.recv().ok().map(run)) {
        Ok(handle) => handle,
        Err(e) => return Err((bus, e)),
    };

    match bus_tx.send(bus) {
        Ok(()) => Ok(handle),
        Err(mpsc::SendError(bus)) => Err((
            bus,
            io::Error::other("poll thread exited before taking the bus"),
        )),
    }
}

impl Drop for Candle {
    fn drop(&mut self) {
        if self.state() == LoopState::Running
            && let Err(e) = self.stop()
        {
            error!("Failed to stop polling loop on drop: {}", e);
        }
    }
}
