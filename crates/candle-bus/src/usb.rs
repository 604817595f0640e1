//! CANdle USB 后端
//!
//! 适配器暴露一对 bulk 端点：OUT 发送命令帧，IN 读取应答。

use crate::{
    BusKind, RX_BUFFER_LEN, TransferOptions, Transport, TransportDeviceError,
    TransportDeviceErrorKind, TransportError,
};
use rusb::{DeviceHandle, GlobalContext};
use std::time::Duration;
use tracing::{debug, trace, warn};

pub const CANDLE_VENDOR_ID: u16 = 0x0069;
pub const CANDLE_PRODUCT_ID: u16 = 0x1000;

const INTERFACE: u8 = 0;
const ENDPOINT_OUT: u8 = 0x01;
const ENDPOINT_IN: u8 = 0x81;

fn map_usb_error(e: rusb::Error) -> TransportError {
    let kind = match e {
        rusb::Error::Timeout => return TransportError::Timeout,
        rusb::Error::NoDevice => TransportDeviceErrorKind::NoDevice,
        rusb::Error::NotFound => TransportDeviceErrorKind::NotFound,
        rusb::Error::Access => TransportDeviceErrorKind::AccessDenied,
        rusb::Error::Busy => TransportDeviceErrorKind::Busy,
        _ => TransportDeviceErrorKind::Backend,
    };
    TransportDeviceError::new(kind, format!("USB error: {}", e)).into()
}

/// CANdle USB 传输
pub struct UsbTransport {
    handle: DeviceHandle<GlobalContext>,
    rx: [u8; RX_BUFFER_LEN],
    rx_len: usize,
}

impl UsbTransport {
    /// 打开第一个 CANdle USB 设备
    pub fn open() -> Result<Self, TransportError> {
        Self::open_with_ids(CANDLE_VENDOR_ID, CANDLE_PRODUCT_ID)
    }

    pub fn open_with_ids(vendor_id: u16, product_id: u16) -> Result<Self, TransportError> {
        let mut handle = rusb::open_device_with_vid_pid(vendor_id, product_id).ok_or_else(|| {
            TransportDeviceError::new(
                TransportDeviceErrorKind::NotFound,
                format!("CANdle USB device {:04X}:{:04X} not found", vendor_id, product_id),
            )
        })?;

        // 部分平台不支持自动 detach，失败不影响后续 claim
        if let Err(e) = handle.set_auto_detach_kernel_driver(true) {
            trace!("Auto-detach kernel driver not supported: {}", e);
        }

        handle.claim_interface(INTERFACE).map_err(map_usb_error)?;
        debug!("CANdle USB device {:04X}:{:04X} opened", vendor_id, product_id);

        Ok(Self {
            handle,
            rx: [0u8; RX_BUFFER_LEN],
            rx_len: 0,
        })
    }

    fn read_into(&mut self, len: usize, timeout: Duration) -> Result<(), TransportError> {
        let len = len.clamp(1, RX_BUFFER_LEN);
        self.rx_len = 0;
        let n = self
            .handle
            .read_bulk(ENDPOINT_IN, &mut self.rx[..len], timeout)
            .map_err(map_usb_error)?;
        self.rx_len = n;
        Ok(())
    }
}

impl Transport for UsbTransport {
    fn kind(&self) -> BusKind {
        BusKind::Usb
    }

    fn send(&mut self, frame: &[u8], opts: &TransferOptions) -> Result<(), TransportError> {
        self.rx_len = 0;
        let written = self
            .handle
            .write_bulk(ENDPOINT_OUT, frame, opts.timeout)
            .map_err(map_usb_error)?;
        if written != frame.len() {
            return Err(TransportDeviceError::new(
                TransportDeviceErrorKind::ShortWrite,
                format!("wrote {} of {} bytes", written, frame.len()),
            )
            .into());
        }

        if opts.wait_for_response {
            self.read_into(opts.response_len, opts.timeout)?;
        }
        Ok(())
    }

    fn receive(&mut self, timeout: Duration) -> Result<(), TransportError> {
        self.read_into(RX_BUFFER_LEN, timeout)
    }

    fn bytes_received(&self) -> usize {
        self.rx_len
    }

    fn rx_buffer(&self) -> &[u8] {
        &self.rx[..self.rx_len]
    }
}

impl Drop for UsbTransport {
    fn drop(&mut self) {
        if let Err(e) = self.handle.release_interface(INTERFACE) {
            warn!("Failed to release CANdle USB interface: {}", e);
        }
    }
}
