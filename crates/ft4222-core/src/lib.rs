//! ft4222-core - Mode-aware driver core for the FT4222H USB bridge
//!
//! The FT4222H exposes I2C master/slave, SPI master with one, two or four
//! data lanes, SPI slave, and GPIO behind one vendor-specific USB protocol.
//! This crate is the transport-independent half of the driver: the mode
//! registry that keeps requests and chip function consistent, the codec
//! that frames transactions, and the engine that plays them against a
//! [`transport::Transport`] implementation. It is `no_std` compatible.
//!
//! # Features
//!
//! - `std` - Standard library support (includes `alloc`); enables the
//!   thread-safe device facade
//! - `alloc` - Heap allocation for the codec and engine
//! - `is_sync` - Compile the driver to synchronous code (default)
//!
//! # Example
//!
//! ```ignore
//! use ft4222_core::device::{Device, DeviceConfig};
//! use ft4222_core::mode::Mode;
//! use ft4222_core::transport::Transport;
//!
//! fn scan_bus<T: Transport>(device: &Device<T>) {
//!     device
//!         .configure(Mode::I2cMaster { clock_hz: 100_000 })
//!         .unwrap();
//!     for addr in 0x08..0x78 {
//!         if device.i2c_read(addr, 1).unwrap().is_ok() {
//!             println!("device at 0x{:02x}", addr);
//!         }
//!     }
//! }
//! ```

#![no_std]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
// Allow async fn in traits - we use maybe-async for dual sync/async support
#![allow(async_fn_in_trait)]

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub mod clock;
#[cfg(feature = "alloc")]
pub mod codec;
#[cfg(all(feature = "std", feature = "is_sync"))]
pub mod device;
#[cfg(feature = "alloc")]
pub mod engine;
pub mod error;
pub mod mode;
pub mod protocol;
#[cfg(feature = "alloc")]
pub mod request;
pub mod status;
pub mod transport;

pub use error::{Error, Result};
