//! Profile dump and load.
//!
//! A profile record captures the color-profile subset of a monitor's VCP
//! values together with enough identity (manufacturer, model, serial, EDID)
//! to refuse applying it to the wrong display. The textual form is
//! line-oriented; blank lines and lines starting with `#` or `*` are
//! comments.

use std::fmt::Write as _;
use std::time::{SystemTime, UNIX_EPOCH};

use log::debug;

use crate::ddc::edid::EDID_LENGTH;
use crate::ddc::{DdcError, ErrorKind, Transport};
use crate::mccs::features::{self, FeatureSubset};
use crate::mccs::Version;
use crate::vcp::{VcpValue, VcpValueSet};
use crate::MonitorDevice;

const MAX_MFG_ID: usize = 3;
const MAX_MODEL: usize = 13;
const MAX_SERIAL: usize = 13;

/// A monitor's profile settings in storable form.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileRecord {
    /// Capture time, milliseconds since the epoch (UTC).
    pub timestamp_ms: u64,
    /// MCCS version announced at capture. Serialized only when known;
    /// registry decisions assume 2.0 otherwise.
    pub vcp_version: Option<Version>,
    /// Three character manufacturer id.
    pub mfg_id: String,
    pub model: String,
    pub serial_ascii: String,
    pub edid: [u8; EDID_LENGTH],
    pub values: VcpValueSet,
}

impl ProfileRecord {
    /// Version used for registry decisions.
    pub fn version(&self) -> Version {
        self.vcp_version.unwrap_or(Version::V2_0)
    }

    pub fn edid_hex(&self) -> String {
        hex_string(&self.edid)
    }

    /// Canonical file name: `<model>-<serial>-YYYYMMDD-HHMMSS.vcp` with
    /// spaces replaced by underscores.
    pub fn default_filename(&self) -> String {
        format!(
            "{}-{}-{}.vcp",
            self.model,
            self.serial_ascii,
            format_timestamp(self.timestamp_ms / 1000)
        )
        .replace(' ', "_")
    }

    /// Render the record in its line-oriented text form.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "TIMESTAMP_TEXT {}",
            format_timestamp(self.timestamp_ms / 1000)
        );
        let _ = writeln!(out, "TIMESTAMP_MILLIS {}", self.timestamp_ms);
        let _ = writeln!(out, "MFG_ID  {}", self.mfg_id);
        let _ = writeln!(out, "MODEL   {}", self.model);
        let _ = writeln!(out, "SN      {}", self.serial_ascii);
        let _ = writeln!(out, "EDID    {}", self.edid_hex());
        if let Some(version) = self.vcp_version {
            let _ = writeln!(out, "VCP_VERSION {}.{}", version.major, version.minor);
        }
        for value in &self.values {
            match value {
                VcpValue::NonTable { code, .. } => {
                    let _ = writeln!(out, "VCP {:02X} {}", code, value.cur_value().unwrap_or(0));
                }
                VcpValue::Table { code, bytes } => {
                    let _ = writeln!(out, "VCP {:02X} {}", code, hex_string(bytes));
                }
            }
        }
        out
    }

    /// Parse a record from its text form with strict validation.
    ///
    /// MFG_ID, MODEL, SN and EDID must be present. A VCP line's value form
    /// is decided by the feature registry at the record's MCCS version;
    /// table values must be even-length hex.
    pub fn parse<I, S>(lines: I) -> Result<Self, DdcError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        const OP: &str = "parse_profile";
        let fail = |kind| DdcError::new(kind, OP);

        let mut timestamp_ms = None;
        let mut timestamp_text = None;
        let mut vcp_version = None;
        let mut mfg_id = None;
        let mut model = None;
        let mut serial = None;
        let mut edid = None;
        let mut raw_values: Vec<(u8, String)> = Vec::new();

        for line in lines {
            let line = line.as_ref().trim_end_matches(['\r', '\n']);
            let trimmed = line.trim_start();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('*') {
                continue;
            }
            let (keyword, rest) = split_first_token(trimmed);
            let value = rest.trim_end();
            match keyword {
                "TIMESTAMP_TEXT" => timestamp_text = Some(value.to_string()),
                "TIMESTAMP_MILLIS" => {
                    timestamp_ms =
                        Some(value.parse::<u64>().map_err(|_| fail(ErrorKind::InvalidData))?)
                }
                "MFG_ID" => {
                    if value.is_empty() || value.len() > MAX_MFG_ID {
                        return Err(fail(ErrorKind::InvalidData));
                    }
                    mfg_id = Some(value.to_string());
                }
                "MODEL" => {
                    if value.is_empty() || value.len() > MAX_MODEL {
                        return Err(fail(ErrorKind::InvalidData));
                    }
                    model = Some(value.to_string());
                }
                "SN" => {
                    if value.is_empty() || value.len() > MAX_SERIAL {
                        return Err(fail(ErrorKind::InvalidData));
                    }
                    serial = Some(value.to_string());
                }
                "EDID" | "EDIDSTR" => {
                    let bytes = parse_hex(value).ok_or_else(|| fail(ErrorKind::InvalidData))?;
                    let block: [u8; EDID_LENGTH] = bytes
                        .try_into()
                        .map_err(|_| fail(ErrorKind::InvalidData))?;
                    edid = Some(block);
                }
                "VCP_VERSION" => {
                    let (major, minor) = value
                        .split_once('.')
                        .ok_or_else(|| fail(ErrorKind::InvalidData))?;
                    let major = major.parse().map_err(|_| fail(ErrorKind::InvalidData))?;
                    let minor = minor.parse().map_err(|_| fail(ErrorKind::InvalidData))?;
                    vcp_version = Some(Version::new(major, minor));
                }
                "VCP" => {
                    let mut tokens = value.split_whitespace();
                    let (code, data) = match (tokens.next(), tokens.next(), tokens.next()) {
                        (Some(code), Some(data), None) => (code, data),
                        _ => return Err(fail(ErrorKind::InvalidData)),
                    };
                    let code =
                        u8::from_str_radix(code, 16).map_err(|_| fail(ErrorKind::InvalidData))?;
                    raw_values.push((code, data.to_string()));
                }
                _ => return Err(fail(ErrorKind::InvalidData)),
            }
        }

        let mfg_id = mfg_id.ok_or_else(|| fail(ErrorKind::InvalidData))?;
        let model = model.ok_or_else(|| fail(ErrorKind::InvalidData))?;
        let serial_ascii = serial.ok_or_else(|| fail(ErrorKind::InvalidData))?;
        let edid = edid.ok_or_else(|| fail(ErrorKind::InvalidData))?;

        let timestamp_ms = timestamp_ms
            .or_else(|| timestamp_text.as_deref().and_then(parse_timestamp).map(|s| s * 1000))
            .unwrap_or(0);

        let registry_version = vcp_version.unwrap_or(Version::V2_0);
        let mut values = VcpValueSet::new();
        for (code, token) in raw_values {
            let is_table = features::find_by_code(code)
                .map(|f| f.is_table(registry_version))
                .unwrap_or(false);
            if is_table {
                let bytes = parse_hex(&token).ok_or_else(|| fail(ErrorKind::InvalidData))?;
                values.push(VcpValue::table_from_bytes(code, &bytes));
            } else {
                let cur = token.parse::<u16>().map_err(|_| {
                    // decimal digits that overflow are bad data, anything
                    // else is the wrong value form for the feature type
                    if token.chars().all(|c| c.is_ascii_digit()) && !token.is_empty() {
                        fail(ErrorKind::InvalidData)
                    } else {
                        fail(ErrorKind::InvalidMode)
                    }
                })?;
                values.push(VcpValue::continuous(code, 0, cur));
            }
        }

        Ok(ProfileRecord {
            timestamp_ms,
            vcp_version,
            mfg_id,
            model,
            serial_ascii,
            edid,
            values,
        })
    }
}

/// Read the registry's profile subset from a display. Features the display
/// does not support are skipped; any other read failure aborts the dump.
pub fn collect_profile_values<T: Transport>(
    dev: &mut MonitorDevice<T>,
) -> Result<VcpValueSet, DdcError> {
    let version = dev.vcp_version_or_default();
    let mut values = VcpValueSet::new();
    for entry in features::subset_members(FeatureSubset::Profile, version) {
        match dev.get_value(entry.code, entry.kind(version)) {
            Ok(value) => values.push(value),
            Err(err) if err.means_unsupported() => {
                debug!("skipping {:#04x} ({}): {err}", entry.code, entry.name);
            }
            Err(err) => return Err(err),
        }
    }
    Ok(values)
}

/// Capture a display's profile record.
pub fn dump_profile<T: Transport>(dev: &mut MonitorDevice<T>) -> Result<ProfileRecord, DdcError> {
    let vcp_version = dev.mccs_version();
    let values = collect_profile_values(dev)?;
    let edid = &dev.info.edid;
    Ok(ProfileRecord {
        timestamp_ms: now_ms(),
        vcp_version,
        mfg_id: edid.vendor_id(),
        model: edid.model_name(),
        serial_ascii: edid.serial_text(),
        edid: *edid.raw(),
        values,
    })
}

/// Apply a record to a display. The record's model and serial must match
/// the display's EDID; application stops on the first write failure.
pub fn load_profile<T: Transport>(
    record: &ProfileRecord,
    dev: &mut MonitorDevice<T>,
) -> Result<(), DdcError> {
    const OP: &str = "load_profile";
    let edid = &dev.info.edid;
    if edid.model_name() != record.model || edid.serial_text() != record.serial_ascii {
        return Err(DdcError::new(ErrorKind::InvalidDisplay, OP));
    }
    for value in &record.values {
        dev.set_value(value)?;
    }
    Ok(())
}

/// Apply a record to whichever attached display matches its model and
/// serial.
#[cfg(target_os = "linux")]
pub fn load_profile_matching(record: &ProfileRecord) -> Result<(), crate::DisplayError> {
    let mut dev = crate::Monitor::open_by_model_serial(&record.model, &record.serial_ascii)?;
    load_profile(record, &mut dev)?;
    Ok(())
}

fn split_first_token(line: &str) -> (&str, &str) {
    match line.find(char::is_whitespace) {
        Some(pos) => (&line[..pos], line[pos..].trim_start()),
        None => (line, ""),
    }
}

fn hex_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02X}");
    }
    out
}

fn parse_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 || !s.is_ascii() {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// Calendar conversion after Howard Hinnant's civil-days algorithms; the
// record format predates any time crate in this stack.

fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = z - era * 146097;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}

fn days_from_civil(y: i64, m: u32, d: u32) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let mp = (if m > 2 { m - 3 } else { m + 9 }) as i64;
    let doy = (153 * mp + 2) / 5 + d as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146097 + doe - 719468
}

/// `YYYYMMDD-HHMMSS` in UTC from epoch seconds.
fn format_timestamp(secs: u64) -> String {
    let days = (secs / 86400) as i64;
    let rem = secs % 86400;
    let (y, m, d) = civil_from_days(days);
    format!(
        "{y:04}{m:02}{d:02}-{:02}{:02}{:02}",
        rem / 3600,
        (rem % 3600) / 60,
        rem % 60
    )
}

/// Epoch seconds from a `YYYYMMDD-HHMMSS` timestamp.
fn parse_timestamp(text: &str) -> Option<u64> {
    let bytes = text.as_bytes();
    if bytes.len() != 15 || bytes[8] != b'-' || !text.is_ascii() {
        return None;
    }
    let num = |range: std::ops::Range<usize>| text[range].parse::<u32>().ok();
    let (y, m, d) = (num(0..4)?, num(4..6)?, num(6..8)?);
    let (hh, mm, ss) = (num(9..11)?, num(11..13)?, num(13..15)?);
    if !(1..=12).contains(&m) || !(1..=31).contains(&d) || hh > 23 || mm > 59 || ss > 59 {
        return None;
    }
    let days = days_from_civil(y as i64, m, d);
    if days < 0 {
        return None;
    }
    Some(days as u64 * 86400 + hh as u64 * 3600 + mm as u64 * 60 + ss as u64)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ddc::edid;

    fn sample_record() -> ProfileRecord {
        let mut values = VcpValueSet::new();
        values.push(VcpValue::continuous(0x10, 100, 50));
        values.push(VcpValue::continuous(0x12, 100, 75));
        values.push(VcpValue::continuous(0x14, 11, 6));
        ProfileRecord {
            timestamp_ms: 1_609_556_645_000,
            vcp_version: Some(Version::new(2, 1)),
            mfg_id: "ABC".into(),
            model: "Model X".into(),
            serial_ascii: "SN123".into(),
            edid: edid::synthesize(['A', 'B', 'C'], 0x0101, "Model X", "SN123"),
            values,
        }
    }

    #[test]
    fn timestamp_format_known_vectors() {
        assert_eq!(format_timestamp(0), "19700101-000000");
        assert_eq!(format_timestamp(1_609_556_645), "20210102-030405");
        assert_eq!(parse_timestamp("19700101-000000"), Some(0));
        assert_eq!(parse_timestamp("20210102-030405"), Some(1_609_556_645));
        assert_eq!(parse_timestamp("2021010-2030405"), None);
        assert_eq!(parse_timestamp("20211302-030405"), None);
    }

    #[test]
    fn serialize_then_parse_round_trips() {
        let record = sample_record();
        let text = record.serialize();
        let parsed = ProfileRecord::parse(text.lines()).unwrap();
        assert_eq!(parsed, record);
        // the emitted millis line carries the same instant
        assert_eq!(parsed.timestamp_ms / 1000, record.timestamp_ms / 1000);
    }

    #[test]
    fn table_values_round_trip_per_opcode() {
        let mut record = sample_record();
        record
            .values
            .push(VcpValue::table_from_bytes(0x73, &[0x01, 0x02, 0xff]));
        let parsed = ProfileRecord::parse(record.serialize().lines()).unwrap();
        assert_eq!(
            parsed.values.find_code(0x73).unwrap().table_bytes(),
            Some(&[0x01, 0x02, 0xff][..])
        );
    }

    #[test]
    fn comments_and_crlf_are_tolerated() {
        let text = "# captured settings\r\n\
                    \r\n\
                    * another comment\r\n\
                    MFG_ID  ABC\r\n\
                    MODEL   Model X\r\n\
                    SN      SN123\r\n\
                    EDID    {edid}\r\n\
                    VCP 10 50\r\n"
            .replace("{edid}", &hex_string(&edid::synthesize(
                ['A', 'B', 'C'],
                1,
                "Model X",
                "SN123",
            )));
        let record = ProfileRecord::parse(text.lines()).unwrap();
        assert_eq!(record.model, "Model X");
        assert_eq!(record.vcp_version, None);
        assert_eq!(record.version(), Version::V2_0);
        assert_eq!(record.values.len(), 1);
        assert_eq!(record.values.get(0).unwrap().cur_value(), Some(50));
    }

    #[test]
    fn model_keeps_inner_spaces_and_trims_trailing() {
        let mut text = sample_record().serialize();
        text = text.replace("MODEL   Model X", "MODEL   Model X   ");
        let record = ProfileRecord::parse(text.lines()).unwrap();
        assert_eq!(record.model, "Model X");
    }

    #[test]
    fn missing_required_field_is_invalid_data() {
        let record = sample_record();
        for keyword in ["MFG_ID", "MODEL", "SN", "EDID"] {
            let text: String = record
                .serialize()
                .lines()
                .filter(|l| !l.starts_with(keyword))
                .map(|l| format!("{l}\n"))
                .collect();
            let err = ProfileRecord::parse(text.lines()).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidData, "without {keyword}");
        }
    }

    #[test]
    fn malformed_vcp_lines_are_rejected() {
        let base = sample_record().serialize();
        // wrong arity
        let err = ProfileRecord::parse(format!("{base}VCP 10\n").lines()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
        let err = ProfileRecord::parse(format!("{base}VCP 10 50 60\n").lines()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
        // non-hex opcode
        let err = ProfileRecord::parse(format!("{base}VCP zz 50\n").lines()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
        // odd-length hex for a table feature
        let err = ProfileRecord::parse(format!("{base}VCP 73 ABC\n").lines()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
        // wrong value form for a non-table feature
        let err = ProfileRecord::parse(format!("{base}VCP 10 5x\n").lines()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidMode);
        // decimal overflow
        let err = ProfileRecord::parse(format!("{base}VCP 10 70000\n").lines()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
        // unknown keyword
        let err = ProfileRecord::parse(format!("{base}BOGUS 1\n").lines()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn timestamp_text_is_fallback_for_millis() {
        let record = sample_record();
        let text: String = record
            .serialize()
            .lines()
            .filter(|l| !l.starts_with("TIMESTAMP_MILLIS"))
            .map(|l| format!("{l}\n"))
            .collect();
        let parsed = ProfileRecord::parse(text.lines()).unwrap();
        assert_eq!(parsed.timestamp_ms, 1_609_556_645_000);
    }

    #[test]
    fn default_filename_replaces_spaces() {
        let record = sample_record();
        assert_eq!(
            record.default_filename(),
            "Model_X-SN123-20210102-030405.vcp"
        );
    }
}
