//! ft4222-usb - USB transport for the FT4222H driver core
//!
//! This crate connects `ft4222-core` to real hardware over `nusb`. Unlike
//! FTDI's MPSSE-based chips (FT2232H, FT232H), the FT4222H is a dedicated
//! I2C/SPI/GPIO bridge driven by a vendor-specific protocol: configuration
//! goes over vendor control transfers, data over a bulk endpoint pair.
//! No vendor library is involved.
//!
//! # What lives here
//!
//! - Device discovery and interface claiming (VID `0x0403`, PID `0x601C`)
//! - [`UsbTransport`], the `ft4222_core::transport::Transport`
//!   implementation, including bulk chunking and the per-packet modem
//!   status handling
//! - The open functions, which also query the chip version and function
//!   channel strap before handing back a ready `Device`
//!
//! Everything mode-aware - configuration encoding, transaction framing,
//! status decoding, the concurrency gate - lives in `ft4222-core` and works
//! the same against the in-memory emulator.
//!
//! # Example
//!
//! ```no_run
//! use ft4222_core::mode::Mode;
//!
//! let device = ft4222_usb::open()?;
//! device.configure(Mode::I2cMaster { clock_hz: 400_000 })?;
//!
//! let result = device.i2c_write_read(0x50, &[0x00], 4)?;
//! if let Some(bytes) = result.data() {
//!     println!("read {:02X?}", bytes);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Permissions
//!
//! On Linux the kernel may bind `ftdi_sio` to the device; detach it or
//! install a udev rule granting access before opening. Opening fails with
//! [`OpenError::AlreadyOpen`] while another driver holds the interface.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "std")]
mod device;
#[cfg(feature = "std")]
mod error;

#[cfg(feature = "std")]
pub use device::{list_devices, open, open_nth, open_nth_with, Ft4222DeviceInfo, UsbTransport};
#[cfg(feature = "std")]
pub use error::{OpenError, Result};
