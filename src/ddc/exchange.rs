//! Single request/response exchanges with bounded retry.
//!
//! One exchange is one request frame followed by at most one response frame.
//! Each attempt is classified as success, retryable or terminal; retryable
//! attempts accumulate their causes so an exhausted budget surfaces the full
//! chain.

use std::thread;
use std::time::Duration;

use log::{debug, trace, warn};

use super::ci::{self, Packet, PacketType};
use super::stats::{self, RetryClass};
use super::{DdcError, ErrorKind, Transport};

const OP_WRITE_ONLY: &str = "write_only_with_retry";
const OP_WRITE_READ: &str = "write_read_with_retry";

/// Minimum write-to-read turnaround the display is granted, by request
/// class. Multi-part requests give the firmware more time.
fn turnaround_delay(ty: PacketType) -> Duration {
    match ty {
        PacketType::CapabilitiesRequest | PacketType::TableReadRequest => Duration::from_millis(50),
        _ => Duration::from_millis(40),
    }
}

/// Backoff observed after a failed attempt. Null and all-zero responses
/// indicate a busy or sleeping display and get a longer pause.
pub(crate) fn retry_delay(kind: ErrorKind) -> Duration {
    match kind {
        ErrorKind::NullResponse | ErrorKind::ReadAllZero => Duration::from_millis(200),
        _ => Duration::from_millis(100),
    }
}

/// Transport failures that retrying cannot fix.
fn transport_fatal(err: &anyhow::Error) -> bool {
    err.downcast_ref::<std::io::Error>().is_some_and(|io| {
        matches!(
            io.kind(),
            std::io::ErrorKind::NotFound
                | std::io::ErrorKind::PermissionDenied
                | std::io::ErrorKind::Unsupported
        )
    })
}

enum Attempt {
    Ok(Packet),
    /// Returned as-is, never retried.
    Terminal(DdcError),
    Retryable(DdcError),
}

/// Transmit a request that expects no reply, retrying transport failures up
/// to the write-only cap.
pub fn write_only_with_retry<T: Transport>(
    transport: &mut T,
    req: &Packet,
) -> Result<(), DdcError> {
    if !transport.functionality().i2c {
        return Err(DdcError::new(ErrorKind::InvalidOperation, OP_WRITE_ONLY));
    }
    let cap = stats::get_cap(RetryClass::WriteOnly);
    let mut causes = Vec::new();
    for attempt in 1..=cap {
        trace!(
            "{} [{}] attempt {attempt}: {:02x?}",
            req.tag(),
            transport.name(),
            req.bytes()
        );
        match transport.write(req.addr(), req.bytes()) {
            Ok(()) => {
                stats::record(RetryClass::WriteOnly, Ok(()), attempt);
                return Ok(());
            }
            Err(err) => {
                let fatal = transport_fatal(&err);
                let cause = DdcError::transport(OP_WRITE_ONLY, err);
                debug!("{}: attempt {attempt}/{cap}: {cause}", req.tag());
                if fatal {
                    stats::record(RetryClass::WriteOnly, Err(cause.kind()), attempt);
                    warn!("{} failed: {cause}", req.tag());
                    return Err(cause);
                }
                causes.push(cause);
                if attempt < cap {
                    thread::sleep(retry_delay(ErrorKind::Transport));
                }
            }
        }
    }
    let err = DdcError::retries(OP_WRITE_ONLY, causes);
    stats::record(RetryClass::WriteOnly, Err(err.kind()), cap);
    warn!("{} failed after {cap} tries: {err}", req.tag());
    Err(err)
}

/// Transmit a request and decode its response, retrying up to the
/// write-read cap.
///
/// Null responses and reported-unsupported results are surfaced as-is; an
/// all-zero response is terminal when `all_zero_ok` grants the caller the
/// right to interpret it. Structural decode failures are retried.
pub fn write_read_with_retry<T: Transport>(
    transport: &mut T,
    req: &Packet,
    max_read: usize,
    expected: PacketType,
    expected_subtype: u8,
    all_zero_ok: bool,
) -> Result<Packet, DdcError> {
    if !transport.functionality().i2c {
        return Err(DdcError::new(ErrorKind::InvalidOperation, OP_WRITE_READ));
    }
    let cap = stats::get_cap(RetryClass::WriteRead);
    let mut causes = Vec::new();
    for attempt in 1..=cap {
        match attempt_exchange(transport, req, max_read, expected, expected_subtype, all_zero_ok) {
            Attempt::Ok(resp) => {
                stats::record(RetryClass::WriteRead, Ok(()), attempt);
                return Ok(resp);
            }
            Attempt::Terminal(err) => {
                stats::record(RetryClass::WriteRead, Err(err.kind()), attempt);
                debug!("{}: terminal on attempt {attempt}: {err}", req.tag());
                return Err(err);
            }
            Attempt::Retryable(err) => {
                debug!("{}: attempt {attempt}/{cap}: {err}", req.tag());
                let kind = err.kind();
                causes.push(err);
                if attempt < cap {
                    thread::sleep(retry_delay(kind));
                }
            }
        }
    }
    let err = DdcError::retries(OP_WRITE_READ, causes);
    stats::record(RetryClass::WriteRead, Err(err.kind()), cap);
    warn!("{} failed after {cap} tries: {err}", req.tag());
    debug!("{}", err.cause_chain());
    Err(err)
}

fn attempt_exchange<T: Transport>(
    transport: &mut T,
    req: &Packet,
    max_read: usize,
    expected: PacketType,
    expected_subtype: u8,
    all_zero_ok: bool,
) -> Attempt {
    trace!(
        "{} [{}]: {:02x?}",
        req.tag(),
        transport.name(),
        req.bytes()
    );
    if let Err(err) = transport.write(req.addr(), req.bytes()) {
        let fatal = transport_fatal(&err);
        let cause = DdcError::transport(OP_WRITE_READ, err);
        return if fatal {
            Attempt::Terminal(cause)
        } else {
            Attempt::Retryable(cause)
        };
    }
    if !transport.functionality().internal_delay {
        thread::sleep(turnaround_delay(req.ty()));
    }
    let mut buf = vec![0u8; max_read];
    let n = match transport.read(req.addr(), &mut buf) {
        Ok(n) => n.min(buf.len()),
        Err(err) => {
            let fatal = transport_fatal(&err);
            let cause = DdcError::transport(OP_WRITE_READ, err);
            return if fatal {
                Attempt::Terminal(cause)
            } else {
                Attempt::Retryable(cause)
            };
        }
    };
    let raw = &buf[..n];
    trace!("{} [{}] response: {:02x?}", req.tag(), transport.name(), raw);
    if raw == req.bytes() {
        return Attempt::Retryable(DdcError::new(ErrorKind::ReadEqualsWrite, OP_WRITE_READ));
    }
    match ci::decode_as(expected, expected_subtype, raw) {
        Ok(pkt) => Attempt::Ok(pkt),
        Err(err) => match err.kind() {
            ErrorKind::NullResponse | ErrorKind::ReportedUnsupported | ErrorKind::Unimplemented => {
                Attempt::Terminal(err)
            }
            ErrorKind::ReadAllZero if all_zero_ok => Attempt::Terminal(err),
            _ => Attempt::Retryable(err),
        },
    }
}
