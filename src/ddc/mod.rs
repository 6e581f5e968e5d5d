//! Control displays using the DDC/CI protocol.
//!
//! The engine in this module tree is written against the [`Transport`]
//! capability only; everything above it (packet codec, retry engines,
//! multi-part reassembly) is host-OS independent.

/// DDC/CI frame codec.
pub mod ci;

/// EDID block parsing and the E-DDC bus addresses it lives behind.
pub mod edid;

/// Single request/response exchanges with bounded retry.
pub mod exchange;

/// Fragmented capabilities and table transfers.
pub mod multipart;

/// Retry caps, try statistics and engine settings.
pub mod stats;

#[cfg(target_os = "linux")]
pub mod linux;

use std::fmt;

use thiserror::Error;

/// Raw byte transport carrying DDC/CI frames, typically one I²C bus segment
/// per video output.
///
/// Implementations only move bytes; framing, checksums, timing and retry all
/// live in the engine. `write` must transmit the full slice in one bus
/// transaction and `read` must fill `buf` from a single transaction,
/// returning the number of bytes received.
pub trait Transport {
    /// Human readable name of the underlying device, used in traces.
    fn name(&self) -> String;

    /// Transmit `bytes` to the 7-bit device address `addr`.
    fn write(&mut self, addr: u8, bytes: &[u8]) -> Result<(), anyhow::Error>;

    /// Receive up to `buf.len()` bytes from device address `addr`.
    fn read(&mut self, addr: u8, buf: &mut [u8]) -> Result<usize, anyhow::Error>;

    /// What the transport can do; queried once per exchange.
    fn functionality(&self) -> Functionality;
}

/// Capabilities of a [`Transport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Functionality {
    /// Plain I²C read/write transactions are available. Without this no
    /// DDC/CI exchange is possible.
    pub i2c: bool,
    /// The transport enforces the write-to-read turnaround delay itself
    /// (e.g. a USB-HID bridge); the engine skips its own sleep then.
    pub internal_delay: bool,
}

impl Default for Functionality {
    fn default() -> Self {
        Functionality {
            i2c: true,
            internal_delay: false,
        }
    }
}

/// Terminal status of a DDC/CI operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Error)]
pub enum ErrorKind {
    /// Response too short to contain a frame.
    #[error("response shorter than minimal packet")]
    PacketSize,
    /// Length byte malformed or out of range.
    #[error("invalid response envelope")]
    ResponseEnvelope,
    /// Recomputed checksum differs from the stored one.
    #[error("checksum mismatch")]
    Checksum,
    /// Response opcode or echoed feature code differs from the request.
    #[error("unexpected response type")]
    ResponseType,
    /// Structurally parseable but semantically invalid data.
    #[error("invalid data")]
    InvalidData,
    /// Malformed capabilities fragment.
    #[error("invalid capabilities fragment")]
    CapabilitiesFragment,
    /// Every response byte arrived doubled, a classic I²C glitch.
    #[error("doubled response bytes")]
    DoubleByte,
    /// Byte count of the read disagrees with the length byte.
    #[error("actual byte count contradicts length byte")]
    BadByteCount,
    /// The read returned an echo of our own request.
    #[error("read returned the written bytes")]
    ReadEqualsWrite,
    /// Value form conflicts with the feature's type.
    #[error("value form invalid for feature type")]
    InvalidMode,
    /// The display answered with the DDC null message.
    #[error("null response")]
    NullResponse,
    /// The display answered with an all-zero payload.
    #[error("all-zero response")]
    ReadAllZero,
    /// Every attempt of an exchange read all zeros.
    #[error("all tries returned zeros")]
    AllTriesZero,
    /// The display reported the feature as unsupported.
    #[error("display reports feature unsupported")]
    ReportedUnsupported,
    /// The host determined the feature to be unsupported.
    #[error("feature determined unsupported")]
    DeterminedUnsupported,
    /// Feature code not known to the registry.
    #[error("unknown feature code")]
    UnknownFeature,
    /// Operation not possible on this feature or transport.
    #[error("invalid operation")]
    InvalidOperation,
    /// No display matches, or the display does not match the request.
    #[error("invalid display")]
    InvalidDisplay,
    /// Post-write read-back did not confirm the written value.
    #[error("verification failed")]
    Verify,
    /// Multi-part fragment arrived at an unexpected offset.
    #[error("fragment offset mismatch")]
    MultiPartReadFragment,
    /// Recognized but unimplemented protocol element.
    #[error("unimplemented protocol element")]
    Unimplemented,
    /// Raw data was retrieved but could not be interpreted.
    #[error("interpretation failed")]
    InterpretationFailed,
    /// Retry cap exhausted; the causes carry the per-attempt errors.
    #[error("maximum tries exceeded")]
    Retries,
    /// Wrapped host-OS I/O failure.
    #[error("transport error")]
    Transport,
}

impl ErrorKind {
    /// Statuses a feature scan treats as "this display does not have the
    /// feature" rather than as a failure.
    pub fn means_unsupported(self) -> bool {
        matches!(
            self,
            ErrorKind::ReportedUnsupported
                | ErrorKind::DeterminedUnsupported
                | ErrorKind::NullResponse
                | ErrorKind::AllTriesZero
        )
    }
}

/// The error type for DDC/CI operations.
///
/// Carries the terminal status, the operation that produced it, an optional
/// wrapped transport failure and the sub-causes accumulated by the retry
/// engines (one per failed attempt for [`ErrorKind::Retries`]).
#[derive(Debug, Error)]
#[error("{op}: {kind}")]
pub struct DdcError {
    kind: ErrorKind,
    op: &'static str,
    transport: Option<anyhow::Error>,
    causes: Vec<DdcError>,
}

impl DdcError {
    pub fn new(kind: ErrorKind, op: &'static str) -> Self {
        DdcError {
            kind,
            op,
            transport: None,
            causes: Vec::new(),
        }
    }

    /// Wrap a transport failure.
    pub fn transport(op: &'static str, err: anyhow::Error) -> Self {
        DdcError {
            kind: ErrorKind::Transport,
            op,
            transport: Some(err),
            causes: Vec::new(),
        }
    }

    /// Build an aggregate error from the per-attempt causes of an exhausted
    /// retry loop.
    pub fn retries(op: &'static str, causes: Vec<DdcError>) -> Self {
        let kind = if !causes.is_empty() && causes.iter().all(|c| c.kind == ErrorKind::ReadAllZero)
        {
            ErrorKind::AllTriesZero
        } else {
            ErrorKind::Retries
        };
        DdcError {
            kind,
            op,
            transport: None,
            causes,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Name of the operation that produced this error.
    pub fn op(&self) -> &'static str {
        self.op
    }

    /// Per-attempt sub-causes, oldest first.
    pub fn causes(&self) -> &[DdcError] {
        &self.causes
    }

    /// The wrapped host-OS failure, if this is a transport error.
    pub fn transport_cause(&self) -> Option<&anyhow::Error> {
        self.transport.as_ref()
    }

    /// Whether a feature scan should treat this error as "feature absent".
    pub fn means_unsupported(&self) -> bool {
        self.kind.means_unsupported()
    }

    /// Multi-line rendering of the full cause chain, for verbose output.
    pub fn cause_chain(&self) -> String {
        let mut out = String::new();
        self.render(0, &mut out);
        out
    }

    fn render(&self, depth: usize, out: &mut String) {
        use fmt::Write;
        let _ = writeln!(out, "{:indent$}{self}", "", indent = depth * 2);
        if let Some(t) = &self.transport {
            let _ = writeln!(out, "{:indent$}{t}", "", indent = (depth + 1) * 2);
        }
        for cause in &self.causes {
            cause.render(depth + 1, out);
        }
    }
}
