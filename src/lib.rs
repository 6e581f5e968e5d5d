//! Host-side DDC/CI and MCCS engine.
//!
//! Talks to VESA compliant monitors over a byte [`Transport`]: typed VCP
//! feature reads and writes, capabilities retrieval, table transfers and
//! profile dump/load, with the retry and fragment-reassembly machinery the
//! wire protocol demands.

pub mod ddc;
pub mod mccs;
pub mod profile;
pub mod vcp;

use std::{fmt, io};

use thiserror::Error;

use ddc::edid::{Edid, EdidParseError};
pub use ddc::{DdcError, ErrorKind, Functionality, Transport};
use mccs::Version;
pub use vcp::{ValueKind, VcpValue, VcpValueSet};

#[cfg(target_os = "linux")]
use crate::ddc::linux::{LinuxDdcDevice, LinuxDdcDeviceEnumerator};

/// The error type for high level monitor handling.
#[derive(Debug, Error)]
pub enum DisplayError {
    /// An error occurred while reading or parsing the EDID data.
    #[error("failed to read edid: {0}")]
    Edid(#[from] EdidParseError),

    /// A DDC/CI operation failed.
    #[error("ddc operation failed: {0}")]
    Ddc(#[from] DdcError),

    /// An io error occured
    #[error("data read failed: {0}")]
    Io(#[from] io::Error),
}

/// Identifying information about an attached display.
#[derive(Clone, Debug)]
pub struct MonitorInfo {
    pub(crate) edid: Edid,
}

impl MonitorInfo {
    pub fn edid(&self) -> &Edid {
        &self.edid
    }

    pub fn manufacture_year(&self) -> usize {
        self.edid.manufacture_year()
    }

    pub fn serial(&self) -> String {
        self.edid.serial_text()
    }

    pub fn model(&self) -> String {
        self.edid.model_name()
    }

    pub fn vendor(&self) -> String {
        self.edid.vendor_id()
    }
}

/// An active handle to a connected display.
///
/// All exchanges on one handle are strictly serialized; the capabilities
/// string is cached after its first successful read.
pub struct MonitorDevice<T>
where
    T: Transport,
{
    /// The inner communication handle used for DDC commands.
    pub handle: Box<T>,
    /// Information about the connected display.
    pub info: MonitorInfo,
    pub(crate) capabilities: Option<String>,
    pub(crate) vcp_version: Option<Option<Version>>,
}

impl<T> fmt::Display for MonitorDevice<T>
where
    T: Transport,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(&format!("Monitor ({})", self.handle.name()))
            .field("model", &self.info.model())
            .field("serial", &self.info.serial())
            .field("manufacture_year", &self.info.manufacture_year())
            .finish()
    }
}

impl<T> MonitorDevice<T>
where
    T: Transport,
{
    /// Create a display handle from a transport and its pre-parsed EDID.
    pub fn new(handle: T, edid: Edid) -> Self {
        MonitorDevice {
            handle: Box::new(handle),
            info: MonitorInfo { edid },
            capabilities: None,
            vcp_version: None,
        }
    }

    /// read the current monitor brightness and map it to a value between 0 and 1
    pub fn get_luminance(&mut self) -> Result<f64, DdcError> {
        let parsed = self.get_nontable(0x10)?;
        if parsed.max_value() == 0 {
            return Err(DdcError::new(ErrorKind::InvalidData, "get_luminance"));
        }
        Ok(parsed.cur_value() as f64 / parsed.max_value() as f64)
    }

    /// set the current monitor brightness, supplied value is clamped to 0 <= val <= 1
    pub fn set_luminance(&mut self, lum: f64) -> Result<(), DdcError> {
        let lum = lum.clamp(0., 1.);
        let parsed = self.get_nontable(0x10)?;
        self.set_nontable(0x10, (parsed.max_value() as f64 * lum).round() as u16)
    }

    /// read the current monitor contrast and map it to a value between 0 and 1
    pub fn get_contrast(&mut self) -> Result<f64, DdcError> {
        let parsed = self.get_nontable(0x12)?;
        if parsed.max_value() == 0 {
            return Err(DdcError::new(ErrorKind::InvalidData, "get_contrast"));
        }
        Ok(parsed.cur_value() as f64 / parsed.max_value() as f64)
    }

    /// set the current monitor contrast, supplied value is clamped to 0 <= val <= 1
    pub fn set_contrast(&mut self, contrast: f64) -> Result<(), DdcError> {
        let contrast = contrast.clamp(0., 1.);
        let parsed = self.get_nontable(0x12)?;
        self.set_nontable(0x12, (parsed.max_value() as f64 * contrast).round() as u16)
    }

    /// get the currently active monitor input source code
    pub fn get_input_source(&mut self) -> Result<u8, DdcError> {
        Ok(self.get_nontable(0x60)?.sl)
    }

    /// set the currently active monitor input
    pub fn set_input_source(&mut self, source: u8) -> Result<(), DdcError> {
        self.set_nontable(0x60, source as u16)
    }
}

#[cfg(target_os = "linux")]
pub type Monitor = MonitorDevice<LinuxDdcDevice>;

#[cfg(target_os = "linux")]
impl Monitor {
    /// Enumerate all currently attached monitor devices
    ///
    /// ```rust,no_run
    /// use ddcci::Monitor;
    ///
    /// for monitor in Monitor::enumerate() {
    ///     println!("{monitor}")
    /// }
    /// ```
    pub fn enumerate() -> MonitorIterator<LinuxDdcDevice> {
        MonitorIterator {
            inner_iter: Box::new(LinuxDdcDeviceEnumerator::iter()),
        }
    }

    /// Open the attached display whose EDID matches `model` and `serial`.
    pub fn open_by_model_serial(model: &str, serial: &str) -> Result<Monitor, DisplayError> {
        Monitor::enumerate()
            .find(|dev| dev.info.model() == model && dev.info.serial() == serial)
            .ok_or_else(|| {
                DdcError::new(ErrorKind::InvalidDisplay, "open_by_model_serial").into()
            })
    }
}

pub struct MonitorIterator<D>
where
    D: Transport,
{
    inner_iter: Box<dyn Iterator<Item = (D, Edid)>>,
}

impl<D> Iterator for MonitorIterator<D>
where
    D: Transport,
{
    type Item = MonitorDevice<D>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner_iter
            .next()
            .map(|(dev, edid)| MonitorDevice::new(dev, edid))
    }
}
