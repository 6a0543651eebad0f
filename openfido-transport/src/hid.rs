//! USB HID backend via hidapi
//!
//! FIDO authenticators are identified by usage page `0xF1D0`, usage `0x01`.
//! Report writes carry a leading zero report-id byte as hidapi expects.

use std::ffi::CString;
use std::sync::Mutex;

use hidapi::{HidApi, HidDevice};
use log::debug;

use crate::error::{Error, Result};
use crate::io::{Backend, DeviceInfo, DeviceIo};

/// FIDO alliance HID usage page
const FIDO_USAGE_PAGE: u16 = 0xf1d0;

/// CTAPHID usage within the FIDO page
const FIDO_USAGE: u16 = 0x01;

/// hidapi-based transport provider.
pub struct HidBackend {
    // hidapi contexts are not Sync; enumeration and open serialize on this
    api: Mutex<HidApi>,
}

impl HidBackend {
    pub fn new() -> Result<Self> {
        let api = HidApi::new().map_err(|e| Error::Io(e.to_string()))?;
        Ok(Self {
            api: Mutex::new(api),
        })
    }
}

impl Backend for HidBackend {
    fn manifest(&self) -> Result<Vec<DeviceInfo>> {
        let mut api = self.api.lock().expect("hidapi lock poisoned");
        api.refresh_devices().map_err(|e| Error::Io(e.to_string()))?;

        let devices: Vec<DeviceInfo> = api
            .device_list()
            .filter(|dev| dev.usage_page() == FIDO_USAGE_PAGE && dev.usage() == FIDO_USAGE)
            .map(|dev| DeviceInfo {
                path: dev.path().to_string_lossy().into_owned(),
                vendor_id: dev.vendor_id(),
                product_id: dev.product_id(),
                manufacturer: dev.manufacturer_string().map(str::to_string),
                product: dev.product_string().map(str::to_string),
            })
            .collect();

        debug!("hid manifest: {} fido device(s)", devices.len());
        Ok(devices)
    }

    fn open(&self, path: &str) -> Result<Box<dyn DeviceIo>> {
        let c_path =
            CString::new(path).map_err(|_| Error::Io(format!("invalid path {path:?}")))?;

        let api = self.api.lock().expect("hidapi lock poisoned");
        let device = api.open_path(&c_path).map_err(|e| {
            debug!("hid open {path}: {e}");
            Error::DeviceNotFound
        })?;

        Ok(Box::new(HidDeviceIo { device }))
    }
}

struct HidDeviceIo {
    device: HidDevice,
}

impl DeviceIo for HidDeviceIo {
    fn read(&mut self, buf: &mut [u8], timeout_ms: i32) -> Result<usize> {
        self.device
            .read_timeout(buf, timeout_ms)
            .map_err(|e| Error::Io(e.to_string()))
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        // hidapi wants the report id first; CTAPHID uses report 0
        let mut report = Vec::with_capacity(data.len() + 1);
        report.push(0);
        report.extend_from_slice(data);

        let written = self
            .device
            .write(&report)
            .map_err(|e| Error::Io(e.to_string()))?;
        if written < report.len() {
            return Err(Error::Io(format!(
                "short write: {written} of {} bytes",
                report.len()
            )));
        }
        Ok(data.len())
    }
}
