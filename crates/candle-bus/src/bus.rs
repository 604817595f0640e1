//! 总线：独占一个传输后端，把通用的 transfer/receive 请求翻译成后端调用

use crate::{BusKind, TransferOptions, Transport, TransportError};
use candle_protocol::uses_combined_transfer;
use std::fmt;
use std::time::Duration;
use tracing::trace;

/// 一条物理总线
///
/// 构建时选定后端，生命周期内不再更换；销毁 `Bus` 即释放后端。
/// 总线本身不做重试，失败原样返回给调用方（轮询循环）。
pub struct Bus {
    transport: Box<dyn Transport>,
    kind: BusKind,
}

impl Bus {
    pub fn new<T: Transport + 'static>(transport: T) -> Self {
        Self::from_boxed(Box::new(transport))
    }

    pub fn from_boxed(transport: Box<dyn Transport>) -> Self {
        let kind = transport.kind();
        Self { transport, kind }
    }

    pub fn kind(&self) -> BusKind {
        self.kind
    }

    /// 发送一帧并按需接收应答
    ///
    /// SPI 上首字节标记为全双工类型（周期更新帧）时走 `send_receive`，
    /// 其余情况一律走 `send`。
    pub fn transfer(&mut self, frame: &[u8], opts: &TransferOptions) -> Result<(), TransportError> {
        let Some(&leading) = frame.first() else {
            return Err(TransportError::EmptyFrame);
        };

        if self.kind == BusKind::Spi && uses_combined_transfer(leading) {
            trace!("SPI combined transfer: kind=0x{:02X}, len={}", leading, frame.len());
            self.transport.send_receive(frame, opts.response_len)
        } else {
            trace!(
                "{} transfer: kind=0x{:02X}, len={}, wait={}",
                self.kind,
                leading,
                frame.len(),
                opts.wait_for_response
            );
            self.transport.send(frame, opts)
        }
    }

    /// 单独接收（仅 USB/UART）
    ///
    /// SPI 没有独立的接收阶段，直接返回 `Unsupported`，不触碰后端。
    pub fn receive(&mut self, timeout: Duration) -> Result<(), TransportError> {
        if self.kind == BusKind::Spi {
            return Err(TransportError::Unsupported {
                operation: "receive",
                kind: self.kind,
            });
        }
        self.transport.receive(timeout)
    }

    pub fn bytes_received(&self) -> usize {
        self.transport.bytes_received()
    }

    pub fn rx_buffer(&self) -> &[u8] {
        self.transport.rx_buffer()
    }

    pub fn rx_buffer_at(&self, offset: usize) -> &[u8] {
        self.transport.rx_buffer_at(offset)
    }
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus").field("kind", &self.kind).finish_non_exhaustive()
    }
}
