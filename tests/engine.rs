//! End-to-end exchanges against a scripted transport.
//!
//! The stub plays back canned response frames and records every frame
//! written, so the full stack from the typed operations down to the wire
//! bytes is exercised without hardware.

use std::collections::VecDeque;
use std::sync::Mutex;

use ddcci::ddc::ci;
use ddcci::ddc::edid::{parse_edid, Edid, EDID_LENGTH};
use ddcci::ddc::exchange::write_read_with_retry;
use ddcci::ddc::multipart::multi_part_read_with_retry;
use ddcci::ddc::stats::{self, RetryClass};
use ddcci::profile::{dump_profile, load_profile, ProfileRecord};
use ddcci::{ErrorKind, Functionality, MonitorDevice, Transport, ValueKind, VcpValue};

/// Serializes tests that touch the process-wide verify toggle or apply
/// values through `set_value`.
static VERIFY_LOCK: Mutex<()> = Mutex::new(());

struct ScriptedTransport {
    reads: VecDeque<Vec<u8>>,
    writes: Vec<Vec<u8>>,
}

impl ScriptedTransport {
    fn new(reads: Vec<Vec<u8>>) -> Self {
        ScriptedTransport {
            reads: reads.into(),
            writes: Vec::new(),
        }
    }
}

impl Transport for ScriptedTransport {
    fn name(&self) -> String {
        "scripted".to_string()
    }

    fn write(&mut self, addr: u8, bytes: &[u8]) -> Result<(), anyhow::Error> {
        assert_eq!(addr, 0x37);
        self.writes.push(bytes.to_vec());
        Ok(())
    }

    fn read(&mut self, addr: u8, buf: &mut [u8]) -> Result<usize, anyhow::Error> {
        assert_eq!(addr, 0x37);
        let resp = self.reads.pop_front().unwrap_or_default();
        let n = resp.len().min(buf.len());
        buf[..n].copy_from_slice(&resp[..n]);
        Ok(n)
    }

    fn functionality(&self) -> Functionality {
        Functionality {
            i2c: true,
            // skip engine sleeps, the stub answers instantly
            internal_delay: true,
        }
    }
}

/// Frame a response payload the way a display would.
fn response_frame(payload: &[u8]) -> Vec<u8> {
    let mut bytes = vec![0x6e, 0x80 | payload.len() as u8];
    bytes.extend_from_slice(payload);
    let chk = bytes.iter().fold(0x50u8, |acc, b| acc ^ b);
    bytes.push(chk);
    bytes
}

fn nontable_frame(code: u8, max: u16, cur: u16) -> Vec<u8> {
    let [mh, ml] = max.to_be_bytes();
    let [sh, sl] = cur.to_be_bytes();
    response_frame(&[0x02, 0x00, code, 0x00, mh, ml, sh, sl])
}

fn unsupported_frame(code: u8) -> Vec<u8> {
    response_frame(&[0x02, 0x01, code, 0x00, 0x00, 0x00, 0x00, 0x00])
}

fn capabilities_frame(offset: u16, data: &[u8]) -> Vec<u8> {
    let [hi, lo] = offset.to_be_bytes();
    let mut payload = vec![0xe3, hi, lo];
    payload.extend_from_slice(data);
    response_frame(&payload)
}

fn table_frame(code: u8, offset: u16, data: &[u8]) -> Vec<u8> {
    let [hi, lo] = offset.to_be_bytes();
    let mut payload = vec![0xe4, code, hi, lo];
    payload.extend_from_slice(data);
    response_frame(&payload)
}

fn test_edid(model: &str, serial: &str) -> Edid {
    let mut data = [0u8; EDID_LENGTH];
    data[..8].copy_from_slice(&[0x00, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x00]);
    // vendor "ABC"
    data[8..10].copy_from_slice(&0x0443u16.to_be_bytes());
    data[10..12].copy_from_slice(&0x0101u16.to_le_bytes());
    data[12..16].copy_from_slice(&0x1234u32.to_le_bytes());
    data[17] = 30;
    data[18] = 1;
    data[19] = 4;
    let mut descriptor = |index: usize, ty: u8, text: &str| {
        let base = 54 + index * 18;
        data[base + 3] = ty;
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0x0a);
        bytes.resize(13, b' ');
        data[base + 5..base + 18].copy_from_slice(&bytes);
    };
    descriptor(1, 0xfc, model);
    descriptor(2, 0xff, serial);
    let sum: u8 = data[..127].iter().fold(0u8, |a, b| a.wrapping_add(*b));
    data[127] = 0u8.wrapping_sub(sum);
    parse_edid(&data).unwrap()
}

fn monitor(reads: Vec<Vec<u8>>) -> MonitorDevice<ScriptedTransport> {
    MonitorDevice::new(ScriptedTransport::new(reads), test_edid("Model X", "SN123"))
}

#[test]
fn get_brightness_nontable() {
    let mut dev = monitor(vec![nontable_frame(0x10, 100, 50)]);
    let value = dev.get_value(0x10, ValueKind::NonTable).unwrap();
    assert_eq!(value, VcpValue::continuous(0x10, 100, 50));
    assert_eq!(value.max_value(), Some(100));
    assert_eq!(value.cur_value(), Some(50));
    // the request that went out
    assert_eq!(
        dev.handle.writes[0],
        vec![0x51, 0x82, 0x01, 0x10, 0x6e ^ 0x51 ^ 0x82 ^ 0x01 ^ 0x10]
    );
}

#[test]
fn set_brightness_frame_on_the_wire() {
    let mut dev = monitor(vec![]);
    dev.set_nontable(0x10, 0x0032).unwrap();
    assert_eq!(
        dev.handle.writes,
        vec![vec![0x51, 0x84, 0x03, 0x10, 0x00, 0x32, 0x9a]]
    );
}

#[test]
fn multi_part_capabilities_assembly() {
    let first = b"(prot(monitor)";
    let second = b"cmds(01 02 03)";
    let mut dev = monitor(vec![
        capabilities_frame(0, first),
        capabilities_frame(first.len() as u16, second),
        capabilities_frame((first.len() + second.len()) as u16, b"\0  "),
        capabilities_frame((first.len() + second.len() + 3) as u16, &[]),
    ]);
    let caps = dev.capabilities_string().unwrap().to_string();
    assert_eq!(caps, "(prot(monitor)cmds(01 02 03)");
    // requests walked the offsets
    let offsets: Vec<u16> = dev
        .handle
        .writes
        .iter()
        .map(|w| (w[3] as u16) << 8 | w[4] as u16)
        .collect();
    assert_eq!(offsets, vec![0, 14, 28, 31]);
    // second call serves the cache, no further exchange happens
    let again = dev.capabilities_string().unwrap().to_string();
    assert_eq!(again, caps);
    assert_eq!(dev.handle.writes.len(), 4);
}

#[test]
fn reported_unsupported_feature() {
    let mut dev = monitor(vec![unsupported_frame(0xfe)]);
    let err = dev.get_nontable(0xfe).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ReportedUnsupported);
}

#[test]
fn retry_exhaustion_builds_cause_chain() {
    let cap = stats::get_cap(RetryClass::WriteRead);
    let mangled: Vec<Vec<u8>> = (0..cap)
        .map(|_| {
            let mut frame = nontable_frame(0x10, 100, 50);
            let last = frame.len() - 1;
            frame[last] ^= 0x01;
            frame
        })
        .collect();
    let mut dev = monitor(mangled);
    let err = dev.get_nontable(0x10).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Retries);
    assert_eq!(err.causes().len(), cap);
    assert!(err
        .causes()
        .iter()
        .all(|cause| cause.kind() == ErrorKind::Checksum));
    // the stats histogram saw the exhaustion bucket
    let report = stats::report(false);
    assert!(report.contains(&format!("ended on attempt {cap}")));
}

#[test]
fn read_equals_write_is_retried() {
    let echo = ci::encode_getvcp(0x10).bytes().to_vec();
    let cap = stats::get_cap(RetryClass::WriteRead);
    let mut dev = monitor(vec![echo; cap]);
    let err = dev.get_nontable(0x10).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Retries);
    assert!(err
        .causes()
        .iter()
        .all(|cause| cause.kind() == ErrorKind::ReadEqualsWrite));
}

#[test]
fn table_read_assembles_fragments() {
    let mut dev = monitor(vec![
        table_frame(0x73, 0, &[1, 2, 3, 4]),
        table_frame(0x73, 4, &[5, 6]),
        table_frame(0x73, 6, &[]),
    ]);
    let bytes = dev.get_table(0x73).unwrap();
    assert_eq!(bytes, vec![1, 2, 3, 4, 5, 6]);
}

#[test]
fn table_read_all_zero_surfaces_literally() {
    let mut dev = monitor(vec![response_frame(&[0x00; 8])]);
    let err = dev.get_table(0x73).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ReadAllZero);
}

#[test]
fn null_response_ends_multi_part_read() {
    let mut dev = monitor(vec![response_frame(&[])]);
    let err = dev.get_table(0x73).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NullResponse);
    // one attempt, no multi-part level retry
    assert_eq!(dev.handle.writes.len(), 1);
}

#[test]
fn fragment_offset_mismatch_is_retried_then_fatal() {
    let cap = stats::get_cap(RetryClass::MultiPartRead);
    let reads = (0..cap).map(|_| table_frame(0x73, 9, &[1, 2])).collect();
    let mut dev = monitor(reads);
    let err = dev.get_table(0x73).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Retries);
    assert_eq!(err.causes().len(), cap);
    assert!(err
        .causes()
        .iter()
        .all(|cause| cause.kind() == ErrorKind::MultiPartReadFragment));
}

#[test]
fn table_write_fragments_and_terminates() {
    let mut dev = monitor(vec![]);
    let value: Vec<u8> = (0u8..30).collect();
    dev.set_table(0x73, &value).unwrap();
    let payloads: Vec<&[u8]> = dev.handle.writes.iter().map(|w| &w[2..w.len() - 1]).collect();
    assert_eq!(payloads.len(), 3);
    assert_eq!(&payloads[0][..4], &[0xe7, 0x73, 0x00, 0x00]);
    assert_eq!(&payloads[0][4..], &value[..28]);
    assert_eq!(&payloads[1][..4], &[0xe7, 0x73, 0x00, 28]);
    assert_eq!(&payloads[1][4..], &value[28..]);
    assert_eq!(payloads[2], &[0xe7, 0x73, 0x00, 30][..]);
}

#[test]
fn verification_confirms_written_value() {
    let _guard = VERIFY_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    stats::set_verify_setvcp(true);
    // set emits no read; the follow-up get echoes the written value
    let mut dev = monitor(vec![
        nontable_frame(0xdf, 0, 0x0201),
        nontable_frame(0x10, 100, 50),
    ]);
    let value = VcpValue::continuous(0x10, 100, 50);
    let read_back = dev.set_value(&value).unwrap();
    assert_eq!(read_back, Some(VcpValue::continuous(0x10, 100, 50)));
    stats::set_verify_setvcp(false);
}

#[test]
fn verification_mismatch_is_verify_error() {
    let _guard = VERIFY_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    stats::set_verify_setvcp(true);
    let mut dev = monitor(vec![
        nontable_frame(0xdf, 0, 0x0201),
        nontable_frame(0x10, 100, 49),
    ]);
    let err = dev.set_value(&VcpValue::continuous(0x10, 100, 50)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Verify);
    stats::set_verify_setvcp(false);
}

#[test]
fn verification_skips_non_rereadable_features() {
    let _guard = VERIFY_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    stats::set_verify_setvcp(true);
    let mut dev = monitor(vec![]);
    // input select is in the fixed exception set, no read-back happens
    let result = dev.set_value(&VcpValue::continuous(0x60, 0, 0x11)).unwrap();
    assert_eq!(result, None);
    assert_eq!(dev.handle.writes.len(), 1);
    stats::set_verify_setvcp(false);
}

#[test]
fn dump_then_load_round_trip() {
    let _guard = VERIFY_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    stats::set_verify_setvcp(false);

    // version probe, then the profile subset: three supported features,
    // the rest reported unsupported
    let mut reads = vec![nontable_frame(0xdf, 0, 0x0201)];
    reads.push(nontable_frame(0x10, 100, 50));
    reads.push(nontable_frame(0x12, 100, 75));
    reads.push(nontable_frame(0x14, 11, 6));
    for code in [0x16, 0x18, 0x1a, 0x6c, 0x6e, 0x70] {
        reads.push(unsupported_frame(code));
    }
    let mut dev = monitor(reads);
    let record = dump_profile(&mut dev).unwrap();
    assert_eq!(record.mfg_id, "ABC");
    assert_eq!(record.model, "Model X");
    assert_eq!(record.serial_ascii, "SN123");
    assert_eq!(record.vcp_version, Some(ddcci::mccs::Version::new(2, 1)));
    assert_eq!(record.values.len(), 3);

    // the textual form survives a round trip
    let parsed = ProfileRecord::parse(record.serialize().lines()).unwrap();
    assert_eq!(parsed, record);
    assert_eq!(parsed.timestamp_ms / 1000, record.timestamp_ms / 1000);

    // applying it writes the three values in order
    let mut target = monitor(vec![]);
    load_profile(&parsed, &mut target).unwrap();
    let set_payloads: Vec<&[u8]> = target
        .handle
        .writes
        .iter()
        .map(|w| &w[2..w.len() - 1])
        .collect();
    assert_eq!(set_payloads[0], &[0x03, 0x10, 0x00, 50][..]);
    assert_eq!(set_payloads[1], &[0x03, 0x12, 0x00, 75][..]);
    assert_eq!(set_payloads[2], &[0x03, 0x14, 0x00, 6][..]);
}

#[test]
fn load_refuses_mismatched_display() {
    let _guard = VERIFY_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let mut reads = vec![nontable_frame(0xdf, 0, 0x0200)];
    reads.push(nontable_frame(0x10, 100, 50));
    for code in [0x12, 0x14, 0x16, 0x18, 0x1a, 0x6c, 0x6e, 0x70] {
        reads.push(unsupported_frame(code));
    }
    let mut dev = monitor(reads);
    let record = dump_profile(&mut dev).unwrap();

    let mut other = MonitorDevice::new(
        ScriptedTransport::new(vec![]),
        test_edid("Model Y", "SN999"),
    );
    let err = load_profile(&record, &mut other).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidDisplay);
    assert!(other.handle.writes.is_empty());
}

#[test]
fn get_feature_consults_the_registry() {
    // unknown code, no exchange happens
    let mut dev = monitor(vec![]);
    let err = dev.get_feature(0xfe).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownFeature);

    // write-only feature: determined unsupported after the version probe
    let mut dev = monitor(vec![nontable_frame(0xdf, 0, 0x0200)]);
    let err = dev.get_feature(0x04).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeterminedUnsupported);

    // readable feature dispatches as non-table
    let mut dev = monitor(vec![
        nontable_frame(0xdf, 0, 0x0200),
        nontable_frame(0x12, 100, 40),
    ]);
    let value = dev.get_feature(0x12).unwrap();
    assert_eq!(value, VcpValue::continuous(0x12, 100, 40));
}

#[test]
fn save_current_settings_frame() {
    let mut dev = monitor(vec![]);
    dev.save_current_settings().unwrap();
    assert_eq!(dev.handle.writes[0][2..3], [0x0c]);
}

#[test]
fn write_read_engine_is_directly_drivable() {
    let mut transport = ScriptedTransport::new(vec![nontable_frame(0x12, 100, 80)]);
    let req = ci::encode_getvcp(0x12);
    let resp = write_read_with_retry(
        &mut transport,
        &req,
        20,
        ci::PacketType::GetVcpResponse,
        0x12,
        false,
    )
    .unwrap();
    assert_eq!(resp.nontable().unwrap().cur_value(), 80);
}

#[test]
fn multi_part_engine_is_directly_drivable() {
    let mut transport = ScriptedTransport::new(vec![
        capabilities_frame(0, b"abc"),
        capabilities_frame(3, &[]),
    ]);
    let mut out = Vec::new();
    multi_part_read_with_retry(
        &mut transport,
        ci::PacketType::CapabilitiesRequest,
        0x00,
        true,
        &mut out,
    )
    .unwrap();
    assert_eq!(out, b"abc");
}
