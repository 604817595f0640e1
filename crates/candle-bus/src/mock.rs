//! Mock 传输
//!
//! 模拟一条挂着若干驱动器的总线：对周期更新帧按地址回送预设遥测，
//! 对总线级命令回送应答。通过 [`MockHandle`] 在运行中注入故障。

use crate::{
    BusKind, RX_BUFFER_LEN, TransferOptions, Transport, TransportDeviceError,
    TransportDeviceErrorKind, TransportError,
};
use candle_protocol::{ACK_OK, BusFrameKind, FRAME_LEN, Telemetry, encode_response, read_u16_le};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Default)]
struct MockState {
    /// 未单独配置地址时使用的遥测（`None` 表示总线上没有应答者）
    default_telemetry: Option<Telemetry>,
    telemetry: HashMap<u16, Telemetry>,
    fail_all: bool,
    failing: HashSet<u16>,
    /// 返回截断应答的地址
    truncated: HashSet<u16>,
    reject_bus_commands: bool,
    latency: Duration,
    updates: HashMap<u16, u64>,
    last_command: HashMap<u16, Vec<u8>>,
    bus_commands: Vec<BusFrameKind>,
}

#[derive(Default)]
struct MockCounters {
    send: AtomicU64,
    send_receive: AtomicU64,
    receive: AtomicU64,
    failures: AtomicU64,
    awaited: AtomicU64,
}

/// 可编程的模拟传输
pub struct MockTransport {
    kind: BusKind,
    state: Arc<Mutex<MockState>>,
    counters: Arc<MockCounters>,
    rx: [u8; RX_BUFFER_LEN],
    rx_len: usize,
}

/// 模拟传输的控制句柄（可跨线程克隆）
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
    counters: Arc<MockCounters>,
}

impl MockTransport {
    /// 创建模拟传输及其控制句柄
    pub fn new(kind: BusKind) -> (Self, MockHandle) {
        let state = Arc::new(Mutex::new(MockState::default()));
        let counters = Arc::new(MockCounters::default());
        let handle = MockHandle {
            state: state.clone(),
            counters: counters.clone(),
        };
        (
            Self {
                kind,
                state,
                counters,
                rx: [0u8; RX_BUFFER_LEN],
                rx_len: 0,
            },
            handle,
        )
    }

    /// 回送固定遥测的 USB 模拟传输
    pub fn echoing(telemetry: Telemetry) -> (Self, MockHandle) {
        let (transport, handle) = Self::new(BusKind::Usb);
        handle.set_default_telemetry(telemetry);
        (transport, handle)
    }

    fn fail(&self, err: TransportError) -> Result<(), TransportError> {
        self.counters.failures.fetch_add(1, Ordering::Relaxed);
        Err(err)
    }

    fn exchange(&mut self, frame: &[u8], respond: bool, response_len: usize) -> Result<(), TransportError> {
        self.rx_len = 0;
        if respond {
            self.counters.awaited.fetch_add(1, Ordering::Relaxed);
        }

        let (latency, outcome) = {
            let mut state = self.state.lock();
            (state.latency, Self::process(&mut state, frame))
        };
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }

        let reply = match outcome {
            Ok(reply) => reply,
            Err(e) => return self.fail(e),
        };

        if respond && let Some(reply) = reply {
            let len = reply.len().min(response_len.max(1)).min(RX_BUFFER_LEN);
            self.rx[..len].copy_from_slice(&reply[..len]);
            self.rx_len = len;
        }
        Ok(())
    }

    /// 处理一帧，返回应答内容
    fn process(state: &mut MockState, frame: &[u8]) -> Result<Option<Vec<u8>>, TransportError> {
        if state.fail_all {
            return Err(TransportError::Timeout);
        }

        match BusFrameKind::from_byte(frame[0]) {
            Some(BusFrameKind::Update) if frame.len() >= 3 => {
                let address = read_u16_le(frame, 1);
                *state.updates.entry(address).or_insert(0) += 1;
                state.last_command.insert(address, frame.to_vec());

                if state.failing.contains(&address) {
                    return Err(TransportError::Timeout);
                }
                let telemetry = state
                    .telemetry
                    .get(&address)
                    .copied()
                    .or(state.default_telemetry)
                    .ok_or(TransportError::Timeout)?;

                let mut reply = encode_response(address, &telemetry).to_vec();
                if state.truncated.contains(&address) {
                    reply.truncate(FRAME_LEN / 2);
                }
                Ok(Some(reply))
            },
            Some(kind) if kind != BusFrameKind::Update => {
                state.bus_commands.push(kind);
                if state.reject_bus_commands {
                    return Err(TransportDeviceError::new(
                        TransportDeviceErrorKind::InvalidResponse,
                        format!("{:?} rejected", kind),
                    )
                    .into());
                }
                Ok(Some(vec![kind.as_u8(), ACK_OK]))
            },
            _ => Ok(None),
        }
    }
}

impl Transport for MockTransport {
    fn kind(&self) -> BusKind {
        self.kind
    }

    fn send(&mut self, frame: &[u8], opts: &TransferOptions) -> Result<(), TransportError> {
        self.counters.send.fetch_add(1, Ordering::Relaxed);
        if frame.is_empty() {
            return self.fail(TransportError::EmptyFrame);
        }
        self.exchange(frame, opts.wait_for_response, opts.response_len)
    }

    fn send_receive(&mut self, frame: &[u8], response_len: usize) -> Result<(), TransportError> {
        self.counters.send_receive.fetch_add(1, Ordering::Relaxed);
        if self.kind != BusKind::Spi {
            return self.fail(TransportError::Unsupported {
                operation: "send_receive",
                kind: self.kind,
            });
        }
        if frame.is_empty() {
            return self.fail(TransportError::EmptyFrame);
        }
        self.exchange(frame, true, response_len)
    }

    /// 模拟总线上没有主动上报，独立接收总是超时
    fn receive(&mut self, _timeout: Duration) -> Result<(), TransportError> {
        self.counters.receive.fetch_add(1, Ordering::Relaxed);
        self.rx_len = 0;
        self.fail(TransportError::Timeout)
    }

    fn bytes_received(&self) -> usize {
        self.rx_len
    }

    fn rx_buffer(&self) -> &[u8] {
        &self.rx[..self.rx_len]
    }
}

impl MockHandle {
    pub fn set_default_telemetry(&self, telemetry: Telemetry) {
        self.state.lock().default_telemetry = Some(telemetry);
    }

    pub fn set_telemetry(&self, address: u16, telemetry: Telemetry) {
        self.state.lock().telemetry.insert(address, telemetry);
    }

    /// 所有调用都失败（超时）
    pub fn set_fail_all(&self, fail: bool) {
        self.state.lock().fail_all = fail;
    }

    /// 指定地址的周期更新失败（超时）
    pub fn set_address_failing(&self, address: u16, failing: bool) {
        let mut state = self.state.lock();
        if failing {
            state.failing.insert(address);
        } else {
            state.failing.remove(&address);
        }
    }

    /// 指定地址返回截断（格式错误）的应答
    pub fn set_address_truncated(&self, address: u16, truncated: bool) {
        let mut state = self.state.lock();
        if truncated {
            state.truncated.insert(address);
        } else {
            state.truncated.remove(&address);
        }
    }

    /// 总线级命令（Begin/End 等）返回设备错误
    pub fn set_reject_bus_commands(&self, reject: bool) {
        self.state.lock().reject_bus_commands = reject;
    }

    /// 每次交换的模拟耗时
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    /// 指定地址收到的周期更新帧数量
    pub fn update_count(&self, address: u16) -> u64 {
        self.state.lock().updates.get(&address).copied().unwrap_or(0)
    }

    /// 指定地址最近一次收到的命令帧
    pub fn last_command(&self, address: u16) -> Option<Vec<u8>> {
        self.state.lock().last_command.get(&address).cloned()
    }

    /// 按顺序收到的总线级命令
    pub fn bus_commands(&self) -> Vec<BusFrameKind> {
        self.state.lock().bus_commands.clone()
    }

    pub fn send_calls(&self) -> u64 {
        self.counters.send.load(Ordering::Relaxed)
    }

    pub fn send_receive_calls(&self) -> u64 {
        self.counters.send_receive.load(Ordering::Relaxed)
    }

    pub fn receive_calls(&self) -> u64 {
        self.counters.receive.load(Ordering::Relaxed)
    }

    pub fn failed_calls(&self) -> u64 {
        self.counters.failures.load(Ordering::Relaxed)
    }

    /// 要求等待应答的交换次数
    pub fn awaited_responses(&self) -> u64 {
        self.counters.awaited.load(Ordering::Relaxed)
    }
}
