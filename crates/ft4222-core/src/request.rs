//! Transaction requests and results

use alloc::vec::Vec;

use crate::error::FailureKind;
use crate::mode::{GpioPin, OpKind};
use crate::status::ChipStatus;

/// One bus transaction, with payloads borrowed from the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionRequest<'a> {
    /// I2C read. Addressed in master mode; in slave mode this drains the
    /// receive FIFO and the address field is ignored.
    Read {
        /// Target address: 7-bit up to 0x7F, 10-bit above
        addr: u16,
        /// Bytes to read
        len: usize,
    },
    /// I2C write. Addressed in master mode; in slave mode this loads the
    /// respond FIFO and the address field is ignored.
    Write {
        /// Target address: 7-bit up to 0x7F, 10-bit above
        addr: u16,
        /// Bytes to send
        payload: &'a [u8],
    },
    /// I2C write followed by a read, joined by a repeated start. The bus
    /// is never released between the two phases.
    WriteRead {
        /// Target address: 7-bit up to 0x7F, 10-bit above
        addr: u16,
        /// Bytes for the write phase
        payload: &'a [u8],
        /// Bytes for the read phase
        read_len: usize,
    },
    /// SPI transfer.
    ///
    /// Single-lane master transfers run full duplex: the response carries
    /// every clocked byte, `tx.len() + read_len` in total. Multi-lane
    /// transfers are half duplex and respond with `read_len` bytes. In
    /// slave mode `tx` loads the respond FIFO and `read_len` drains the
    /// receive FIFO.
    Transfer {
        /// Bytes to shift out
        tx: &'a [u8],
        /// Extra clocked bytes (master) or receive FIFO bytes (slave)
        read_len: usize,
    },
    /// Latch a GPIO output pin
    GpioSet {
        /// Pin to drive
        pin: GpioPin,
        /// High when true
        level: bool,
    },
    /// Sample a GPIO pin
    GpioRead {
        /// Pin to sample
        pin: GpioPin,
    },
}

impl TransactionRequest<'_> {
    /// Operation tag for compatibility checks
    pub fn kind(&self) -> OpKind {
        match self {
            TransactionRequest::Read { .. } => OpKind::Read,
            TransactionRequest::Write { .. } => OpKind::Write,
            TransactionRequest::WriteRead { .. } => OpKind::WriteRead,
            TransactionRequest::Transfer { .. } => OpKind::Transfer,
            TransactionRequest::GpioSet { .. } => OpKind::GpioSet,
            TransactionRequest::GpioRead { .. } => OpKind::GpioRead,
        }
    }
}

/// Outcome of a transaction that reached the chip
///
/// Every variant carries the status word the chip reported alongside the
/// response, failures included, so callers can always inspect the raw bus
/// state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionResult {
    /// Completed with response data
    Data {
        /// Response payload, status bytes already stripped
        bytes: Vec<u8>,
        /// Status word from the response frame
        status: ChipStatus,
    },
    /// Completed without response data
    Ack {
        /// Status word from the response frame
        status: ChipStatus,
    },
    /// The chip reported a failure, or the exchange broke down after
    /// submission
    Fail {
        /// What went wrong
        kind: FailureKind,
        /// Last status word observed; empty if none was received
        status: ChipStatus,
    },
}

impl TransactionResult {
    /// Status word carried by any outcome
    pub fn status(&self) -> ChipStatus {
        match self {
            TransactionResult::Data { status, .. }
            | TransactionResult::Ack { status }
            | TransactionResult::Fail { status, .. } => *status,
        }
    }

    /// True for `Data` and `Ack`
    pub fn is_ok(&self) -> bool {
        !matches!(self, TransactionResult::Fail { .. })
    }

    /// Response payload, if the transaction completed with data
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            TransactionResult::Data { bytes, .. } => Some(bytes),
            _ => None,
        }
    }

    /// Failure kind, if the transaction failed
    pub fn failure(&self) -> Option<FailureKind> {
        match self {
            TransactionResult::Fail { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
