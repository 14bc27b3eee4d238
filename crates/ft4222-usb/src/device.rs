//! USB transport over nusb
//!
//! The FT4222H speaks a vendor-specific protocol: configuration travels in
//! vendor control transfers, data in bulk transfers on the function
//! interface's endpoint pair. This module owns discovery, claiming and the
//! raw byte moving; all framing and mode logic stays in `ft4222-core`.
//!
//! One quirk lives here and nowhere else: the chip prefixes every bulk IN
//! packet with two modem status bytes. The first pair of a response doubles
//! as the frame's status word and is handed through; the pairs opening
//! continuation packets are transport noise and get stripped.

use std::time::Duration;

use nusb::transfer::{Buffer, Bulk, ControlIn, ControlOut, ControlType, In, Out, Recipient};
use nusb::{Endpoint, Interface, MaybeFuture};

use ft4222_core::device::{Device, DeviceConfig};
use ft4222_core::error::TransportError;
use ft4222_core::protocol::{
    FT4222H_PID, FT4222_GET_CONFIG, FT4222_GET_VERSION, FT4222_INFO_REQUEST, FTDI_VID,
    MODEM_STATUS_SIZE,
};
use ft4222_core::transport::{Transport, TransportResult};

use crate::error::{OpenError, Result};

/// Timeout for vendor control transfers
const CONTROL_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for bulk transfers; generous because the engine only reads
/// after the chip reports the transaction finished
const BULK_TIMEOUT: Duration = Duration::from_secs(5);

/// USB transport for one FT4222H function interface
///
/// Owns the claimed `nusb` interface and the bulk endpoint pair. Handed to
/// [`Device::new`] by the open functions; there is rarely a reason to build
/// one directly.
pub struct UsbTransport {
    /// Claimed interface; taken on close so later calls fail cleanly
    interface: Option<Interface>,
    /// wIndex for config and info transfers (descriptor dependent)
    control_index: u16,
    /// Bulk IN endpoint address
    in_ep: u8,
    /// Bulk OUT endpoint address
    out_ep: u8,
}

impl UsbTransport {
    /// Claim the nth FT4222H (0-indexed) on the bus
    fn claim_nth(index: usize) -> Result<Self> {
        let devices: Vec<_> = nusb::list_devices()
            .wait()
            .map_err(|e| OpenError::Transport(e.to_string()))?
            .filter(|d| d.vendor_id() == FTDI_VID && d.product_id() == FT4222H_PID)
            .collect();

        let device_info = devices.get(index).ok_or(OpenError::NotFound)?;

        log::info!(
            "opening FT4222H at bus {} address {}",
            device_info.busnum(),
            device_info.device_address()
        );

        let device = device_info
            .open()
            .wait()
            .map_err(|e| OpenError::Transport(e.to_string()))?;

        let config_desc = device
            .active_configuration()
            .map_err(|e| OpenError::Transport(format!("failed to get configuration: {}", e)))?;

        // Find the vendor-specific function interface and its endpoint pair
        let mut data_interface: Option<u8> = None;
        let mut in_ep: Option<u8> = None;
        let mut out_ep: Option<u8> = None;

        for iface in config_desc.interface_alt_settings() {
            if iface.class() == 0xFF || iface.interface_number() == 0 {
                for ep in iface.endpoints() {
                    if ep.transfer_type() == nusb::descriptors::TransferType::Bulk {
                        if ep.direction() == nusb::transfer::Direction::In {
                            in_ep = Some(ep.address());
                        } else {
                            out_ep = Some(ep.address());
                        }
                    }
                }
                if in_ep.is_some() && out_ep.is_some() {
                    data_interface = Some(iface.interface_number());
                    break;
                }
            }
        }

        let iface_num = data_interface.ok_or_else(|| {
            OpenError::InvalidResponse("no usable function interface".to_string())
        })?;
        let in_ep = in_ep
            .ok_or_else(|| OpenError::InvalidResponse("no bulk IN endpoint".to_string()))?;
        let out_ep = out_ep
            .ok_or_else(|| OpenError::InvalidResponse("no bulk OUT endpoint".to_string()))?;

        // Chips strapped to expose several function interfaces move the
        // config channel to wIndex 1
        let num_interfaces = config_desc.num_interfaces();
        let control_index = if num_interfaces > 1 { 1 } else { 0 };

        log::debug!(
            "interface {}, IN EP 0x{:02X}, OUT EP 0x{:02X}, control index {}",
            iface_num,
            in_ep,
            out_ep,
            control_index
        );

        let interface = device
            .claim_interface(iface_num)
            .wait()
            .map_err(|e| OpenError::AlreadyOpen(e.to_string()))?;

        Ok(Self {
            interface: Some(interface),
            control_index,
            in_ep,
            out_ep,
        })
    }

    /// Chip and firmware version words, big-endian in a 12 byte response
    fn chip_version(&self) -> Result<(u32, u32, u32)> {
        let iface = self.open_iface()?;
        let data = iface
            .control_in(
                ControlIn {
                    control_type: ControlType::Vendor,
                    recipient: Recipient::Device,
                    request: FT4222_INFO_REQUEST,
                    value: FT4222_GET_VERSION,
                    index: self.control_index,
                    length: 12,
                },
                CONTROL_TIMEOUT,
            )
            .wait()
            .map_err(|e| OpenError::Transport(format!("failed to get version: {}", e)))?;

        if data.len() < 12 {
            return Err(OpenError::InvalidResponse(format!(
                "version response too short: {} < 12",
                data.len()
            )));
        }

        let chip_version = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let version2 = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let version3 = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

        Ok((chip_version, version2, version3))
    }

    /// Number of function channels, derived from the chip mode strap
    fn num_channels(&self) -> Result<u8> {
        let iface = self.open_iface()?;
        let data = iface
            .control_in(
                ControlIn {
                    control_type: ControlType::Vendor,
                    recipient: Recipient::Device,
                    request: FT4222_INFO_REQUEST,
                    value: FT4222_GET_CONFIG,
                    index: self.control_index,
                    length: 13,
                },
                CONTROL_TIMEOUT,
            )
            .wait()
            .map_err(|e| OpenError::Transport(format!("failed to get config: {}", e)))?;

        if data.is_empty() {
            return Err(OpenError::InvalidResponse("empty config response".into()));
        }

        let channels = match data[0] {
            0 => 1,
            1 => 3,
            2 => 4,
            3 => 1,
            mode => {
                return Err(OpenError::InvalidResponse(format!(
                    "unknown chip mode byte: 0x{:02x}",
                    mode
                )))
            }
        };

        log::debug!("chip mode {}, {} function channel(s)", data[0], channels);
        Ok(channels)
    }

    fn open_iface(&self) -> Result<&Interface> {
        self.interface
            .as_ref()
            .ok_or_else(|| OpenError::Transport("interface released".to_string()))
    }

    fn iface(&self) -> TransportResult<&Interface> {
        self.interface.as_ref().ok_or(TransportError::Disconnected)
    }
}

/// Fold nusb transfer failures into the core's transport error
///
/// `transfer_blocking` cancels the transfer when the timeout elapses, so
/// `Cancelled` reads as a timeout here.
fn map_transfer_error(e: nusb::transfer::TransferError) -> TransportError {
    use nusb::transfer::TransferError;
    match e {
        TransferError::Cancelled => TransportError::TimedOut,
        TransferError::Stall => TransportError::Stall,
        TransferError::Disconnected => TransportError::Disconnected,
        _ => TransportError::Io,
    }
}

/// Status-only packets accepted in a row before the read gives up
///
/// The chip emits a bare modem status pair whenever its FIFO is momentarily
/// empty mid-frame; a bounded run of them is normal on slow transactions.
const MAX_STATUS_ONLY_PACKETS: usize = 64;

/// Reassemble one response frame from a stream of bulk IN packets
///
/// Every packet opens with the two modem status bytes. The first pair is
/// the frame's status word and is kept; the pairs opening continuation
/// packets are transport noise and are stripped. Packets carrying nothing
/// beyond the pair are skipped, up to [`MAX_STATUS_ONLY_PACKETS`] in a row.
fn assemble_frame<F>(buf: &mut [u8], mut next_packet: F) -> TransportResult<()>
where
    F: FnMut() -> TransportResult<Vec<u8>>,
{
    let mut filled = 0;
    let mut first = true;
    let mut status_only = 0;

    while filled < buf.len() {
        let data = next_packet()?;

        let payload = if first {
            &data[..]
        } else {
            if data.len() < MODEM_STATUS_SIZE {
                return Err(TransportError::Io);
            }
            &data[MODEM_STATUS_SIZE..]
        };

        if payload.is_empty() {
            status_only += 1;
            if status_only > MAX_STATUS_ONLY_PACKETS {
                return Err(TransportError::TimedOut);
            }
            // A zero-length first packet carried no status pair, so the
            // next packet still opens the frame
            if data.len() >= MODEM_STATUS_SIZE {
                first = false;
            }
            continue;
        }
        status_only = 0;

        let n = std::cmp::min(payload.len(), buf.len() - filled);
        buf[filled..filled + n].copy_from_slice(&payload[..n]);
        filled += n;
        first = false;
    }

    Ok(())
}

impl Transport for UsbTransport {
    fn control_out(
        &mut self,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
    ) -> TransportResult<()> {
        self.iface()?
            .control_out(
                ControlOut {
                    control_type: ControlType::Vendor,
                    recipient: Recipient::Device,
                    request,
                    value,
                    index,
                    data,
                },
                CONTROL_TIMEOUT,
            )
            .wait()
            .map_err(map_transfer_error)?;
        Ok(())
    }

    fn control_in(
        &mut self,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
    ) -> TransportResult<()> {
        let data = self
            .iface()?
            .control_in(
                ControlIn {
                    control_type: ControlType::Vendor,
                    recipient: Recipient::Device,
                    request,
                    value,
                    index,
                    length: buf.len() as u16,
                },
                CONTROL_TIMEOUT,
            )
            .wait()
            .map_err(map_transfer_error)?;

        if data.len() < buf.len() {
            return Err(TransportError::Io);
        }
        buf.copy_from_slice(&data[..buf.len()]);
        Ok(())
    }

    fn bulk_out(&mut self, data: &[u8]) -> TransportResult<()> {
        let mut out_ep: Endpoint<Bulk, Out> = self
            .iface()?
            .endpoint(self.out_ep)
            .map_err(|_| TransportError::Io)?;

        // A zero-length packet is meaningful: it releases chip select
        if data.is_empty() {
            let out_buf = Buffer::new(0);
            out_ep
                .transfer_blocking(out_buf, BULK_TIMEOUT)
                .into_result()
                .map_err(map_transfer_error)?;
            log::trace!("bulk out empty packet");
            return Ok(());
        }

        // Split large frames to avoid stalling the chip's USB FIFO
        const MAX_CHUNK: usize = 2048;
        let mut offset = 0;

        while offset < data.len() {
            let chunk_len = std::cmp::min(MAX_CHUNK, data.len() - offset);

            let mut out_buf = Buffer::new(chunk_len);
            out_buf.extend_from_slice(&data[offset..offset + chunk_len]);

            out_ep
                .transfer_blocking(out_buf, BULK_TIMEOUT)
                .into_result()
                .map_err(map_transfer_error)?;

            offset += chunk_len;
        }

        log::trace!("bulk out {} bytes", data.len());
        Ok(())
    }

    fn bulk_in(&mut self, buf: &mut [u8]) -> TransportResult<()> {
        let mut in_ep: Endpoint<Bulk, In> = self
            .iface()?
            .endpoint(self.in_ep)
            .map_err(|_| TransportError::Io)?;

        let max_packet_size = in_ep.max_packet_size();

        // One packet per transfer so the status prefix split stays exact
        assemble_frame(buf, || {
            let mut in_buf = Buffer::new(max_packet_size);
            in_buf.set_requested_len(max_packet_size);

            let data = in_ep
                .transfer_blocking(in_buf, BULK_TIMEOUT)
                .into_result()
                .map_err(map_transfer_error)?;
            Ok(data[..].to_vec())
        })?;

        log::trace!("bulk in {} bytes", buf.len());
        Ok(())
    }

    fn delay_us(&mut self, us: u32) {
        std::thread::sleep(Duration::from_micros(us as u64));
    }

    fn control_index(&self) -> u16 {
        self.control_index
    }

    fn close(&mut self) {
        if self.interface.take().is_some() {
            log::debug!("USB interface released");
        }
    }
}

/// Open the first FT4222H on the bus with the default configuration
pub fn open() -> Result<Device<UsbTransport>> {
    open_nth_with(0, DeviceConfig::default())
}

/// Open the nth FT4222H (0-indexed) with the default configuration
///
/// Useful when several FT4222H devices are connected; pair with
/// [`list_devices`] to pick one.
pub fn open_nth(index: usize) -> Result<Device<UsbTransport>> {
    open_nth_with(index, DeviceConfig::default())
}

/// Open the nth FT4222H with an explicit device configuration
///
/// Claims the interface, logs the chip version, checks the function channel
/// strap and resets the chip so the handle starts from a clean,
/// uninitialized mode.
pub fn open_nth_with(index: usize, config: DeviceConfig) -> Result<Device<UsbTransport>> {
    if config.retry.max_polls == 0 {
        return Err(OpenError::InvalidParameter(
            "retry policy allows zero polls".to_string(),
        ));
    }

    let transport = UsbTransport::claim_nth(index)?;

    let (chip_version, version2, version3) = transport.chip_version()?;
    log::info!(
        "FT4222H version: chip=0x{:08X} (0x{:08X} 0x{:08X})",
        chip_version,
        version2,
        version3
    );

    let channels = transport.num_channels()?;
    log::debug!("FT4222H function channels: {}", channels);

    let device = Device::new(transport, config);
    device
        .reset()
        .map_err(|e| OpenError::Transport(format!("initial reset failed: {}", e)))?;

    Ok(device)
}

/// List all connected FT4222H devices
pub fn list_devices() -> Result<Vec<Ft4222DeviceInfo>> {
    let devices: Vec<_> = nusb::list_devices()
        .wait()
        .map_err(|e| OpenError::Transport(e.to_string()))?
        .filter(|d| d.vendor_id() == FTDI_VID && d.product_id() == FT4222H_PID)
        .map(|d| Ft4222DeviceInfo {
            bus: d.busnum(),
            address: d.device_address(),
        })
        .collect();

    Ok(devices)
}

/// Information about a connected FT4222H device
#[derive(Debug, Clone)]
pub struct Ft4222DeviceInfo {
    /// USB bus number
    pub bus: u8,
    /// USB device address
    pub address: u8,
}

impl std::fmt::Display for Ft4222DeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FT4222H at bus {} address {}", self.bus, self.address)
    }
}
