//! Transport abstraction
//!
//! The engine drives the chip through this trait and never enumerates USB
//! devices itself. The crate ships no implementation; the USB adapter and
//! the in-memory emulator live in their own crates.

use maybe_async::maybe_async;

use crate::error::TransportError;

/// Result type for raw transport operations
pub type TransportResult<T> = core::result::Result<T, TransportError>;

/// Byte-level access to one FT4222H function interface
///
/// Implementations own device discovery, interface claiming, chunking and
/// packet framing. The engine relies on this contract:
///
/// - `control_in` and `bulk_in` fill the whole buffer or fail
/// - `bulk_in` preserves the two status bytes leading every response frame
/// - `bulk_out` may split a frame into USB packets however it likes
/// - a zero-length `bulk_out` is meaningful and must reach the device
///   (the SPI master path releases chip select with it)
#[maybe_async(AFIT)]
pub trait Transport {
    /// Vendor control write; most commands carry everything in `value`
    async fn control_out(
        &mut self,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
    ) -> TransportResult<()>;

    /// Vendor control read, filling `buf` exactly
    async fn control_in(
        &mut self,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
    ) -> TransportResult<()>;

    /// Bulk OUT transfer of one frame
    async fn bulk_out(&mut self, data: &[u8]) -> TransportResult<()>;

    /// Bulk IN transfer, filling `buf` exactly
    async fn bulk_in(&mut self, buf: &mut [u8]) -> TransportResult<()>;

    /// Sleep between chip polls
    async fn delay_us(&mut self, us: u32);

    /// wIndex for config and info transfers on this interface
    fn control_index(&self) -> u16;

    /// Release the underlying handle; later calls will fail
    fn close(&mut self);
}

#[cfg(all(feature = "alloc", feature = "is_sync"))]
impl<T: Transport + ?Sized> Transport for alloc::boxed::Box<T> {
    fn control_out(
        &mut self,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
    ) -> TransportResult<()> {
        (**self).control_out(request, value, index, data)
    }

    fn control_in(
        &mut self,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
    ) -> TransportResult<()> {
        (**self).control_in(request, value, index, buf)
    }

    fn bulk_out(&mut self, data: &[u8]) -> TransportResult<()> {
        (**self).bulk_out(data)
    }

    fn bulk_in(&mut self, buf: &mut [u8]) -> TransportResult<()> {
        (**self).bulk_in(buf)
    }

    fn delay_us(&mut self, us: u32) {
        (**self).delay_us(us)
    }

    fn control_index(&self) -> u16 {
        (**self).control_index()
    }

    fn close(&mut self) {
        (**self).close()
    }
}
