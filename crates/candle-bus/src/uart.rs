//! UART 后端（serialport）

use crate::{
    BusKind, RX_BUFFER_LEN, TransferOptions, Transport, TransportDeviceError,
    TransportDeviceErrorKind, TransportError,
};
use serialport::{ClearBuffer, SerialPort};
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// 默认波特率
pub const DEFAULT_UART_BAUD_RATE: u32 = 460_800;

fn map_serial_error(e: serialport::Error) -> TransportError {
    match e.kind {
        serialport::ErrorKind::Io(kind) => io::Error::new(kind, e.description).into(),
        serialport::ErrorKind::NoDevice => {
            TransportDeviceError::new(TransportDeviceErrorKind::NoDevice, e.description).into()
        },
        _ => {
            TransportDeviceError::new(TransportDeviceErrorKind::Backend, e.description).into()
        },
    }
}

pub struct UartTransport {
    port: Box<dyn SerialPort>,
    rx: [u8; RX_BUFFER_LEN],
    rx_len: usize,
}

impl UartTransport {
    pub fn open(path: &str, baud_rate: u32) -> Result<Self, TransportError> {
        let port = serialport::new(path, baud_rate)
            .timeout(Duration::from_millis(10))
            .open()
            .map_err(map_serial_error)?;
        debug!("UART {} opened at {} baud", path, baud_rate);

        Ok(Self {
            port,
            rx: [0u8; RX_BUFFER_LEN],
            rx_len: 0,
        })
    }

    /// 在 `timeout` 内读取最多 `len` 字节，一个字节都没收到时返回超时
    fn read_until(&mut self, len: usize, timeout: Duration) -> Result<(), TransportError> {
        let len = len.clamp(1, RX_BUFFER_LEN);
        let deadline = Instant::now() + timeout;
        self.rx_len = 0;

        while self.rx_len < len {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            self.port.set_timeout(remaining).map_err(map_serial_error)?;
            match self.port.read(&mut self.rx[self.rx_len..len]) {
                Ok(0) => break,
                Ok(n) => self.rx_len += n,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) => return Err(e.into()),
            }
        }

        if self.rx_len == 0 {
            return Err(TransportError::Timeout);
        }
        Ok(())
    }
}

impl Transport for UartTransport {
    fn kind(&self) -> BusKind {
        BusKind::Uart
    }

    fn send(&mut self, frame: &[u8], opts: &TransferOptions) -> Result<(), TransportError> {
        self.rx_len = 0;
        // 丢弃上一次残留的应答
        if let Err(e) = self.port.clear(ClearBuffer::Input) {
            trace!("Failed to clear UART input buffer: {}", e);
        }
        self.port.write_all(frame)?;
        self.port.flush()?;

        if opts.wait_for_response {
            self.read_until(opts.response_len, opts.timeout)?;
        }
        Ok(())
    }

    fn receive(&mut self, timeout: Duration) -> Result<(), TransportError> {
        self.read_until(RX_BUFFER_LEN, timeout)
    }

    fn bytes_received(&self) -> usize {
        self.rx_len
    }

    fn rx_buffer(&self) -> &[u8] {
        &self.rx[..self.rx_len]
    }
}
