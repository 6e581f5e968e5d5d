//! VCP feature operations over a display handle.
//!
//! These sit on top of the exchange engines: one request/response pair for
//! non-table features, multi-part transfers for tables and the capabilities
//! string.

use log::debug;

use super::{ValueKind, VcpValue};
use crate::ddc::ci::{self, PacketType, ParsedNontable};
use crate::ddc::exchange::{write_only_with_retry, write_read_with_retry};
use crate::ddc::multipart::{multi_part_read_with_retry, multi_part_write_with_retry};
use crate::ddc::stats;
use crate::ddc::{DdcError, ErrorKind, Transport};
use crate::mccs::capabilities::{parse_capabilities, Capabilities};
use crate::mccs::features;
use crate::mccs::Version;
use crate::MonitorDevice;

/// Features excluded from read-back verification; writing them changes
/// display state in a way a follow-up read does not reflect.
const NON_REREADABLE: [u8; 3] = [0x02, 0x03, 0x60];

/// A get VCP response is a fixed 11-byte frame; the slack absorbs trailing
/// bus garbage.
const GETVCP_MAX_READ: usize = 20;

const VCP_VERSION_CODE: u8 = 0xdf;

impl<T: Transport> MonitorDevice<T> {
    /// Read the current and maximum value of a non-table feature.
    pub fn get_nontable(&mut self, code: u8) -> Result<ParsedNontable, DdcError> {
        const OP: &str = "get_nontable";
        let req = ci::encode_getvcp(code);
        let resp = write_read_with_retry(
            self.handle.as_mut(),
            &req,
            GETVCP_MAX_READ,
            PacketType::GetVcpResponse,
            code,
            false,
        )?;
        let parsed = resp
            .nontable()
            .copied()
            .ok_or_else(|| DdcError::new(ErrorKind::InterpretationFailed, OP))?;
        if !parsed.valid_response {
            return Err(DdcError::new(ErrorKind::InvalidData, OP));
        }
        if !parsed.supported_opcode {
            return Err(DdcError::new(ErrorKind::ReportedUnsupported, OP));
        }
        Ok(parsed)
    }

    /// Read a table feature's full byte string.
    pub fn get_table(&mut self, code: u8) -> Result<Vec<u8>, DdcError> {
        let mut out = Vec::new();
        multi_part_read_with_retry(
            self.handle.as_mut(),
            PacketType::TableReadRequest,
            code,
            true,
            &mut out,
        )?;
        Ok(out)
    }

    /// Read a feature, dispatching on the requested kind.
    pub fn get_value(&mut self, code: u8, kind: ValueKind) -> Result<VcpValue, DdcError> {
        match kind {
            ValueKind::NonTable => {
                let parsed = self.get_nontable(code)?;
                Ok(VcpValue::nontable(
                    code, parsed.mh, parsed.ml, parsed.sh, parsed.sl,
                ))
            }
            ValueKind::Table => Ok(VcpValue::Table {
                code,
                bytes: self.get_table(code)?,
            }),
        }
    }

    /// Read a feature with the kind and access the registry assigns it at
    /// the display's MCCS version.
    pub fn get_feature(&mut self, code: u8) -> Result<VcpValue, DdcError> {
        const OP: &str = "get_feature";
        let entry = features::find_by_code(code)
            .ok_or_else(|| DdcError::new(ErrorKind::UnknownFeature, OP))?;
        let version = self.vcp_version_or_default();
        if !entry.is_readable(version) {
            return Err(DdcError::new(ErrorKind::DeterminedUnsupported, OP));
        }
        self.get_value(code, entry.kind(version))
    }

    /// Write a non-table feature.
    pub fn set_nontable(&mut self, code: u8, value: u16) -> Result<(), DdcError> {
        let req = ci::encode_setvcp(code, value);
        write_only_with_retry(self.handle.as_mut(), &req)
    }

    /// Write a table feature in fragments.
    pub fn set_table(&mut self, code: u8, bytes: &[u8]) -> Result<(), DdcError> {
        multi_part_write_with_retry(self.handle.as_mut(), code, bytes)
    }

    /// Write `value`. When verification is enabled and the feature is
    /// rereadable, the value is read back afterwards and compared; a
    /// mismatch is [`ErrorKind::Verify`]. Returns the post-read value when
    /// verification ran. Table writes are treated as unverifiable.
    pub fn set_value(&mut self, value: &VcpValue) -> Result<Option<VcpValue>, DdcError> {
        const OP: &str = "set_value";
        match value {
            VcpValue::NonTable { code, sh, sl, .. } => {
                self.set_nontable(*code, (*sh as u16) << 8 | *sl as u16)?;
                if stats::verify_setvcp() && self.rereadable(*code) {
                    let read_back = self.get_value(*code, ValueKind::NonTable)?;
                    if read_back != *value {
                        debug!(
                            "verification mismatch for {code:#04x}: wrote {value}, read {read_back}"
                        );
                        return Err(DdcError::new(ErrorKind::Verify, OP));
                    }
                    return Ok(Some(read_back));
                }
                Ok(None)
            }
            VcpValue::Table { code, bytes } => {
                self.set_table(*code, bytes)?;
                Ok(None)
            }
        }
    }

    fn rereadable(&mut self, code: u8) -> bool {
        if NON_REREADABLE.contains(&code) {
            return false;
        }
        let version = self.vcp_version_or_default();
        features::find_by_code(code).is_some_and(|f| f.is_readable(version))
    }

    /// Instruct the display to persist its current settings.
    pub fn save_current_settings(&mut self) -> Result<(), DdcError> {
        let req = ci::encode_save_settings();
        write_only_with_retry(self.handle.as_mut(), &req)
    }

    /// MCCS version the display announces via the VCP version feature.
    /// Probed once per handle; `None` when the display does not answer.
    pub fn mccs_version(&mut self) -> Option<Version> {
        if let Some(probed) = self.vcp_version {
            return probed;
        }
        let probed = match self.get_nontable(VCP_VERSION_CODE) {
            Ok(parsed) => Some(Version::new(parsed.sh, parsed.sl)),
            Err(err) => {
                debug!("vcp version unavailable: {err}");
                None
            }
        };
        self.vcp_version = Some(probed);
        probed
    }

    pub(crate) fn vcp_version_or_default(&mut self) -> Version {
        self.mccs_version().unwrap_or(Version::V2_0)
    }

    /// Raw capabilities string. The first successful read is cached on the
    /// handle; later calls return the cached form.
    pub fn capabilities_string(&mut self) -> Result<&str, DdcError> {
        const OP: &str = "capabilities_string";
        if self.capabilities.is_none() {
            let mut buf = Vec::new();
            multi_part_read_with_retry(
                self.handle.as_mut(),
                PacketType::CapabilitiesRequest,
                0x00,
                true,
                &mut buf,
            )?;
            // displays pad the advertised length with NULs and blanks
            while matches!(buf.last(), Some(&0) | Some(&b' ')) {
                buf.pop();
            }
            let text = String::from_utf8(buf)
                .map_err(|_| DdcError::new(ErrorKind::InterpretationFailed, OP))?;
            self.capabilities = Some(text);
        }
        Ok(self.capabilities.as_deref().unwrap_or_default())
    }

    /// Retrieve and parse the capabilities string.
    pub fn read_capabilities(&mut self) -> Result<Capabilities, DdcError> {
        let raw = self.capabilities_string()?.to_string();
        parse_capabilities(&raw)
    }
}
