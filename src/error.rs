//! Crate-wide error type.
//!
//! Mirrors the five kinds of failure the runtime can report (§7): malformed
//! frames, resource exhaustion, unreachable destinations, timeouts, and
//! protocol violations by a peer. Internal invariant violations are a sixth
//! kind, reserved for bugs rather than expected runtime conditions.

use core::fmt;

/// A reason code attached to a dropped frame, mirrored into switch log
/// records (see [`crate::eth::switch_log`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// The multi-buffer arena had no free chunks.
    Overflow,
    /// Frame check sequence failed (not evaluated in software, reserved for
    /// MAC drivers that forward FCS failures).
    BadFcs,
    /// Header parsing failed.
    BadFrame,
    /// Dropped by management/control-plane policy.
    ManagementControl,
    /// Dropped by VLAN policy.
    Vlan,
    /// Dropped by a VLAN rate limiter.
    VlanRate,
    /// Dropped due to a PTP protocol error.
    PtpError,
    /// No route to destination.
    NoRoute,
    /// Destination port administratively disabled.
    Disabled,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DropReason::Overflow => "OVERFLOW",
            DropReason::BadFcs => "BADFCS",
            DropReason::BadFrame => "BADFRM",
            DropReason::ManagementControl => "MCTRL",
            DropReason::Vlan => "VLAN",
            DropReason::VlanRate => "VRATE",
            DropReason::PtpError => "PTPERR",
            DropReason::NoRoute => "NO_ROUTE",
            DropReason::Disabled => "DISABLED",
        };
        f.write_str(label)
    }
}

/// Crate-wide error type.
///
/// Variants map onto the error-kind taxonomy: recoverable conditions
/// (`ResourceExhausted`, `Unreachable`, `Timeout`, `ProtocolViolation`) are
/// ordinary `Result::Err` values; `InvariantViolation` indicates a bug and
/// is always also logged at [`crate::log::CRITICAL`] by the caller that
/// detects it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A frame could not be parsed or was rejected by policy.
    FrameMalformed {
        /// Why the frame was dropped.
        reason: DropReason,
    },
    /// A bounded resource (buffer, table, port pool, queue) had no capacity.
    ResourceExhausted {
        /// Human-readable name of the exhausted resource.
        resource: &'static str,
    },
    /// No path exists to the requested destination.
    Unreachable {
        /// Human-readable description of the destination.
        destination: &'static str,
    },
    /// A peer or resolution did not respond within the configured window.
    Timeout {
        /// What timed out.
        what: &'static str,
    },
    /// A peer violated a protocol contract.
    ProtocolViolation {
        /// Short machine-stable label for the violation.
        label: &'static str,
    },
    /// An internal invariant was violated; indicates a bug, not a runtime
    /// condition. Never return this in response to untrusted input.
    InvariantViolation {
        /// Short machine-stable label for the violated invariant.
        label: &'static str,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::FrameMalformed { reason } => write!(f, "frame malformed: {reason}"),
            Error::ResourceExhausted { resource } => write!(f, "resource exhausted: {resource}"),
            Error::Unreachable { destination } => write!(f, "unreachable: {destination}"),
            Error::Timeout { what } => write!(f, "timeout: {what}"),
            Error::ProtocolViolation { label } => write!(f, "protocol violation: {label}"),
            Error::InvariantViolation { label } => write!(f, "internal invariant violated: {label}"),
        }
    }
}

impl std::error::Error for Error {}

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;
