//! Error types for ft4222-core
//!
//! This module provides a no_std compatible error type that can be used
//! throughout the crate.
//!
//! The split between [`Error`] and [`FailureKind`] is load-bearing:
//! `Err(Error)` means the request never produced a chip exchange (handle
//! state or local validation stopped it), while a chip-reported outcome
//! travels as `Ok(TransactionResult::Fail { kind, .. })` because an
//! exchange was attempted and the status bytes are meaningful.

use core::fmt;

use crate::mode::{ModeKind, OpKind};

/// Reasons a mode change can be rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeRejection {
    /// Requested clock cannot be derived from any system clock / divisor pair
    UnsupportedClock,
    /// Slave address outside the assignable range
    InvalidSlaveAddress,
    /// Chip select index outside the chip's four CS lines
    InvalidChipSelect,
    /// The mode cannot be entered by request (e.g. `Uninitialized`)
    NotConfigurable,
    /// The chip reported an error while applying the configuration
    ChipRefused,
}

/// Transport-level failures, as reported by a [`Transport`](crate::transport::Transport)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// Device detached from the bus
    Disconnected,
    /// Endpoint stalled
    Stall,
    /// Transfer timed out at the host controller
    TimedOut,
    /// Any other host-side I/O failure
    Io,
}

/// Chip-reported failure of an attempted transaction
///
/// Carried inside `TransactionResult::Fail`, never inside [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Address or data byte not acknowledged (I2C)
    Nack,
    /// Lost bus arbitration to another master (I2C multi-master)
    ArbitrationLost,
    /// Receive FIFO overflowed before the host drained it
    Overrun,
    /// Transmit FIFO ran dry mid-transfer
    Underrun,
    /// Chip stayed busy past the retry ceiling
    Timeout,
    /// Cancelled while awaiting the chip
    Cancelled,
    /// Malformed response, or the error bit set with no further detail
    Protocol,
    /// Transport failed mid-exchange
    Transport(TransportError),
}

/// Core error type - no_std compatible, Copy for efficiency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    // Handle state
    /// Handle was closed; the transport is gone
    DeviceClosed,
    /// A transport failure poisoned the handle; only reset recovers it
    Faulted,
    /// Command channel held by another caller (exclusive access policy)
    Busy,

    // Local validation
    /// The active mode does not accept the requested operation
    Incompatible {
        /// Mode the device is currently in
        active: ModeKind,
        /// Operation that was requested
        requested: OpKind,
    },
    /// Mode change rejected, locally or by the chip
    ModeRejected(ModeRejection),
    /// Payload exceeds the FIFO ceiling of the active mode
    PayloadTooLarge {
        /// Bytes the caller supplied or requested
        len: usize,
        /// Ceiling for the active mode
        max: usize,
    },
    /// I2C address outside the 7-bit or 10-bit range
    InvalidAddress,

    // Exchange outcomes folded into plain errors by configure/reset
    /// Chip stayed busy past the retry ceiling
    Timeout,
    /// Operation cancelled between polls
    Cancelled,
    /// Transport-level failure
    Transport(TransportError),
}

impl fmt::Display for ModeRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedClock => write!(f, "no clock divider reaches the requested speed"),
            Self::InvalidSlaveAddress => write!(f, "slave address out of range"),
            Self::InvalidChipSelect => write!(f, "chip select index out of range"),
            Self::NotConfigurable => write!(f, "mode cannot be entered by request"),
            Self::ChipRefused => write!(f, "chip refused the configuration"),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "device disconnected"),
            Self::Stall => write!(f, "endpoint stalled"),
            Self::TimedOut => write!(f, "transfer timed out"),
            Self::Io => write!(f, "I/O error"),
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nack => write!(f, "not acknowledged"),
            Self::ArbitrationLost => write!(f, "bus arbitration lost"),
            Self::Overrun => write!(f, "receive FIFO overrun"),
            Self::Underrun => write!(f, "transmit FIFO underrun"),
            Self::Timeout => write!(f, "chip busy past the retry ceiling"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Protocol => write!(f, "protocol error"),
            Self::Transport(e) => write!(f, "transport failed mid-exchange: {}", e),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeviceClosed => write!(f, "device handle is closed"),
            Self::Faulted => write!(f, "device is faulted and needs a reset"),
            Self::Busy => write!(f, "command channel is busy"),
            Self::Incompatible { active, requested } => {
                write!(f, "{} not available in {} mode", requested, active)
            }
            Self::ModeRejected(reason) => write!(f, "mode change rejected: {}", reason),
            Self::PayloadTooLarge { len, max } => {
                write!(f, "payload of {} bytes exceeds the {} byte limit", len, max)
            }
            Self::InvalidAddress => write!(f, "invalid I2C address"),
            Self::Timeout => write!(f, "operation timed out"),
            Self::Cancelled => write!(f, "operation cancelled"),
            Self::Transport(e) => write!(f, "transport error: {}", e),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result type alias using the core Error type
pub type Result<T> = core::result::Result<T, Error>;
