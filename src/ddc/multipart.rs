//! Fragmented capabilities and table transfers.
//!
//! A multi-part read walks the value in payload-sized fragments at strictly
//! increasing offsets until the display answers with a zero-length fragment.
//! A multi-part write mirrors that with write-only exchanges and a final
//! empty terminating write.

use log::warn;

use super::ci::{self, Packet, PacketType, RECV_BUFFER_SIZE, TABLE_WRITE_FRAGMENT};
use super::exchange::{write_only_with_retry, write_read_with_retry};
use super::stats::{self, RetryClass};
use super::{DdcError, ErrorKind, Transport};

const OP_READ: &str = "multi_part_read_with_retry";
const OP_WRITE: &str = "multi_part_write_with_retry";

/// Statuses that end a multi-part read outright: the display has answered,
/// just not with data.
fn read_terminal(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::NullResponse
            | ErrorKind::ReadAllZero
            | ErrorKind::AllTriesZero
            | ErrorKind::ReportedUnsupported
    )
}

/// Assemble a fragmented value into `out`.
///
/// `req_type` must be a capabilities or table read request; `req_subtype` is
/// the feature code for table reads. `all_zero_ok` tolerates an all-zero
/// first fragment, a quirk some displays show on the first capabilities
/// exchange after power-up. On error `out` is left empty.
pub fn multi_part_read_with_retry<T: Transport>(
    transport: &mut T,
    req_type: PacketType,
    req_subtype: u8,
    all_zero_ok: bool,
    out: &mut Vec<u8>,
) -> Result<(), DdcError> {
    out.clear();
    if !matches!(
        req_type,
        PacketType::CapabilitiesRequest | PacketType::TableReadRequest
    ) {
        return Err(DdcError::new(ErrorKind::InvalidOperation, OP_READ));
    }
    let expected = req_type
        .response()
        .ok_or_else(|| DdcError::new(ErrorKind::InvalidOperation, OP_READ))?;
    let mut req = ci::encode_multi_part_read_request(req_type, req_subtype, 0);
    let cap = stats::get_cap(RetryClass::MultiPartRead);
    let mut causes = Vec::new();
    for attempt in 1..=cap {
        match read_all_fragments(transport, &mut req, expected, req_subtype, all_zero_ok) {
            Ok(buf) => {
                stats::record(RetryClass::MultiPartRead, Ok(()), attempt);
                *out = buf;
                return Ok(());
            }
            Err(err) if read_terminal(err.kind()) => {
                stats::record(RetryClass::MultiPartRead, Err(err.kind()), attempt);
                return Err(err);
            }
            Err(err) => {
                let kind = err.kind();
                causes.push(err);
                if attempt < cap {
                    std::thread::sleep(super::exchange::retry_delay(kind));
                }
            }
        }
    }
    let err = DdcError::retries(OP_READ, causes);
    stats::record(RetryClass::MultiPartRead, Err(err.kind()), cap);
    warn!("{} failed after {cap} tries: {err}", req.tag());
    Err(err)
}

fn read_all_fragments<T: Transport>(
    transport: &mut T,
    req: &mut Packet,
    expected: PacketType,
    subtype: u8,
    all_zero_ok: bool,
) -> Result<Vec<u8>, DdcError> {
    let mut acc = Vec::new();
    let mut cur_offset: u16 = 0;
    let mut allow_zero = all_zero_ok;
    loop {
        ci::update_request_offset(req, cur_offset);
        let resp = write_read_with_retry(
            transport,
            req,
            RECV_BUFFER_SIZE,
            expected,
            subtype,
            allow_zero,
        )?;
        let frag = resp
            .into_fragment()
            .ok_or_else(|| DdcError::new(ErrorKind::InterpretationFailed, OP_READ))?;
        if frag.offset != cur_offset {
            return Err(DdcError::new(ErrorKind::MultiPartReadFragment, OP_READ));
        }
        if frag.is_empty() {
            return Ok(acc);
        }
        cur_offset = match cur_offset.checked_add(frag.len() as u16) {
            Some(next) => next,
            None => return Err(DdcError::new(ErrorKind::MultiPartReadFragment, OP_READ)),
        };
        acc.extend_from_slice(&frag.bytes);
        // the all-zero tolerance only covers the first fragment
        allow_zero = false;
    }
}

/// Write a table value in fragments, terminated by an empty write. The
/// multi-part cap governs whole-value retries; any sub-exchange failure
/// aborts the current attempt.
pub fn multi_part_write_with_retry<T: Transport>(
    transport: &mut T,
    code: u8,
    value: &[u8],
) -> Result<(), DdcError> {
    if value.len() > u16::MAX as usize {
        return Err(DdcError::new(ErrorKind::InvalidData, OP_WRITE));
    }
    let cap = stats::get_cap(RetryClass::MultiPartWrite);
    let mut causes = Vec::new();
    for attempt in 1..=cap {
        match write_all_fragments(transport, code, value) {
            Ok(()) => {
                stats::record(RetryClass::MultiPartWrite, Ok(()), attempt);
                return Ok(());
            }
            Err(err) => {
                let kind = err.kind();
                causes.push(err);
                if attempt < cap {
                    std::thread::sleep(super::exchange::retry_delay(kind));
                }
            }
        }
    }
    let err = DdcError::retries(OP_WRITE, causes);
    stats::record(RetryClass::MultiPartWrite, Err(err.kind()), cap);
    warn!("table write of {:#04x} failed after {cap} tries: {err}", code);
    Err(err)
}

fn write_all_fragments<T: Transport>(
    transport: &mut T,
    code: u8,
    value: &[u8],
) -> Result<(), DdcError> {
    let mut offset = 0usize;
    for chunk in value.chunks(TABLE_WRITE_FRAGMENT) {
        let req = ci::encode_multi_part_write_request(code, offset as u16, chunk)?;
        write_only_with_retry(transport, &req)?;
        offset += chunk.len();
    }
    let terminator = ci::encode_multi_part_write_request(code, value.len() as u16, &[])?;
    write_only_with_retry(transport, &terminator)
}
