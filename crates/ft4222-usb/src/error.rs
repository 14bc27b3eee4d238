//! Error types for device discovery and opening

use thiserror::Error;

/// Result type for open and enumeration operations
pub type Result<T> = std::result::Result<T, OpenError>;

/// Errors raised while locating and claiming an FT4222H
///
/// These only cover the path up to a working [`ft4222_core::device::Device`];
/// once a handle exists, failures surface as [`ft4222_core::Error`] instead.
#[derive(Debug, Error)]
pub enum OpenError {
    /// No FT4222H on the bus, or fewer devices than the requested index
    #[error("FT4222H device not found")]
    NotFound,

    /// The function interface is held by another handle or another driver
    ///
    /// On Linux this is usually the kernel `ftdi_sio` driver; detach it or
    /// add a udev rule before opening.
    #[error("FT4222H interface already claimed: {0}")]
    AlreadyOpen(String),

    /// USB enumeration or transfer failure
    #[error("USB transport error: {0}")]
    Transport(String),

    /// The chip answered a descriptor or info query with garbage
    #[error("invalid response from device: {0}")]
    InvalidResponse(String),

    /// The requested open-time configuration cannot work
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}
