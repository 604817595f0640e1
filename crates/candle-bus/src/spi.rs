//! SPI 后端（Linux spidev）
//!
//! 周期更新帧在一次全双工交换中同时完成命令发送与应答读取，
//! 其余帧先写后读。SPI 没有独立的接收阶段。

use crate::{BusKind, RX_BUFFER_LEN, TransferOptions, Transport, TransportError};
use spidev::{SpiModeFlags, Spidev, SpidevOptions, SpidevTransfer};
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// 默认 SPI 时钟（Hz）
pub const DEFAULT_SPI_SPEED_HZ: u32 = 12_500_000;

pub struct SpiTransport {
    spi: Spidev,
    tx: [u8; RX_BUFFER_LEN],
    rx: [u8; RX_BUFFER_LEN],
    rx_len: usize,
}

impl SpiTransport {
    pub fn open(path: impl AsRef<Path>, speed_hz: u32) -> Result<Self, TransportError> {
        let path = path.as_ref();
        let mut spi = Spidev::open(path)?;
        let options = SpidevOptions::new()
            .bits_per_word(8)
            .max_speed_hz(speed_hz)
            .mode(SpiModeFlags::SPI_MODE_0)
            .build();
        spi.configure(&options)?;
        debug!("SPI device {} opened at {} Hz", path.display(), speed_hz);

        Ok(Self {
            spi,
            tx: [0u8; RX_BUFFER_LEN],
            rx: [0u8; RX_BUFFER_LEN],
            rx_len: 0,
        })
    }
}

impl Transport for SpiTransport {
    fn kind(&self) -> BusKind {
        BusKind::Spi
    }

    fn send(&mut self, frame: &[u8], opts: &TransferOptions) -> Result<(), TransportError> {
        self.rx_len = 0;
        self.spi.write_all(frame)?;
        if opts.wait_for_response {
            let len = opts.response_len.min(RX_BUFFER_LEN);
            self.spi.read_exact(&mut self.rx[..len])?;
            self.rx_len = len;
        }
        Ok(())
    }

    /// 全双工：发送缓冲区补 0 到 `max(frame.len(), response_len)` 后交换
    fn send_receive(&mut self, frame: &[u8], response_len: usize) -> Result<(), TransportError> {
        self.rx_len = 0;
        let len = frame.len().max(response_len).min(RX_BUFFER_LEN);
        let copied = frame.len().min(len);
        self.tx[..copied].copy_from_slice(&frame[..copied]);
        self.tx[copied..len].fill(0);

        let mut transfer = SpidevTransfer::read_write(&self.tx[..len], &mut self.rx[..len]);
        self.spi.transfer(&mut transfer)?;
        self.rx_len = len;
        Ok(())
    }

    fn receive(&mut self, _timeout: Duration) -> Result<(), TransportError> {
        Err(TransportError::Unsupported {
            operation: "receive",
            kind: BusKind::Spi,
        })
    }

    fn bytes_received(&self) -> usize {
        self.rx_len
    }

    fn rx_buffer(&self) -> &[u8] {
        &self.rx[..self.rx_len]
    }
}
