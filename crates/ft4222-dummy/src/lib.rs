//! In-memory FT4222H emulator
//!
//! A [`Transport`] implementation that answers the vendor protocol from
//! process memory instead of a USB bus: config words are applied to an
//! emulated chip, bulk frames are parsed and answered with status-prefixed
//! response frames, and the status query reflects what the last frame did.
//! The handle is a cheap clone over shared state, so tests can keep one
//! clone for scripting and introspection while the device facade owns the
//! other.
//!
//! Behind the emulated chip sit a few physical stand-ins: I2C targets are
//! register files with an auto-incrementing pointer, the SPI bus loops
//! MOSI back to MISO, and the slave FIFOs are plain queues the test fills
//! and drains from the far side.
//!
//! ```
//! use ft4222_core::clock::ClockConfig;
//! use ft4222_core::device::{Device, DeviceConfig};
//! use ft4222_core::mode::{ClockPhase, ClockPolarity, LaneCount, Mode};
//! use ft4222_dummy::DummyBridge;
//!
//! let bridge = DummyBridge::new();
//! let device = Device::new(bridge.clone(), DeviceConfig::new());
//! device.configure(Mode::SpiMaster {
//!     lanes: LaneCount::Single,
//!     clock: ClockConfig::for_target_khz(10_000),
//!     cpol: ClockPolarity::IdleLow,
//!     cpha: ClockPhase::CaptureLeading,
//!     cs: 0,
//! })?;
//!
//! let result = device.spi_transfer(&[0xAB, 0xCD])?;
//! assert_eq!(result.data(), Some(&[0xAB, 0xCD][..]));
//! # Ok::<(), ft4222_core::Error>(())
//! ```

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "std")]
use std::collections::{BTreeMap, VecDeque};
#[cfg(feature = "std")]
use std::sync::mpsc::Sender;
#[cfg(feature = "std")]
use std::sync::{Arc, Mutex, MutexGuard};

#[cfg(feature = "std")]
use ft4222_core::error::TransportError;
#[cfg(feature = "std")]
use ft4222_core::mode::GpioPin;
#[cfg(feature = "std")]
use ft4222_core::protocol::*;
#[cfg(feature = "std")]
use ft4222_core::status::ChipStatus;
#[cfg(feature = "std")]
use ft4222_core::transport::{Transport, TransportResult};

/// Chip revision reported by the version query
#[cfg(feature = "std")]
const DUMMY_CHIP_VERSION: u32 = 0x4222_0400;

/// One emulated I2C register file behind a bus address
///
/// Writes set the register pointer from their first byte, reads run from
/// the pointer and wrap at the end of the file, like a common EEPROM or
/// sensor register map.
#[cfg(feature = "std")]
struct I2cTarget {
    registers: Vec<u8>,
    pointer: usize,
}

#[cfg(feature = "std")]
impl I2cTarget {
    /// Returns false when a data byte lands outside the register file,
    /// which the chip reports as a data NACK
    fn master_write(&mut self, payload: &[u8]) -> bool {
        let Some((&reg, data)) = payload.split_first() else {
            // Address-only probe, nothing to store
            return true;
        };
        self.pointer = reg as usize;
        for &byte in data {
            if self.pointer >= self.registers.len() {
                return false;
            }
            self.registers[self.pointer] = byte;
            self.pointer += 1;
        }
        true
    }

    fn master_read(&mut self, len: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            if self.registers.is_empty() {
                // Floating bus reads back all ones
                out.push(0xFF);
                continue;
            }
            if self.pointer >= self.registers.len() {
                self.pointer = 0;
            }
            out.push(self.registers[self.pointer]);
            self.pointer += 1;
        }
        out
    }
}

/// Everything the emulated chip remembers between transport calls
#[cfg(feature = "std")]
#[derive(Default)]
struct BridgeState {
    // Committed configuration
    mode: u8,
    status: ChipStatus,
    sys_clock: u8,
    i2c_kbps_lo: u8,
    i2c_kbps: u16,
    own_address: u8,
    divisor: u8,
    cpol: u8,
    cpha: u8,
    io_lines: u8,
    cs_active: u8,
    cs_mask: u8,
    gpio_outputs: u8,
    gpio_levels: u8,

    // The emulated outside world
    targets: BTreeMap<u16, I2cTarget>,
    receive_fifo: VecDeque<u8>,
    respond_fifo: VecDeque<u8>,

    // Response frames queued for bulk IN, oldest first
    responses: VecDeque<Vec<u8>>,

    // Fault and timing scripts
    busy_polls: usize,
    disconnect_after: Option<usize>,
    disconnected: bool,
    closed: bool,
    notify_poll: Option<Sender<()>>,

    // Counters and logs for test assertions
    transport_calls: usize,
    frames: Vec<Vec<u8>>,
    status_polls: usize,
}

#[cfg(feature = "std")]
impl BridgeState {
    /// Gate every transport call on the scripted connection state
    fn touch(&mut self) -> TransportResult<()> {
        if self.closed || self.disconnected {
            return Err(TransportError::Disconnected);
        }
        if let Some(remaining) = self.disconnect_after {
            if remaining == 0 {
                self.disconnected = true;
                return Err(TransportError::Disconnected);
            }
            self.disconnect_after = Some(remaining - 1);
        }
        self.transport_calls += 1;
        Ok(())
    }

    fn handle_reset(&mut self, value: u16) {
        match value {
            FT4222_RESET_SIO => {
                log::debug!("SIO reset");
                self.mode = 0;
                self.status = ChipStatus::IDLE;
                self.receive_fifo.clear();
                self.respond_fifo.clear();
                self.responses.clear();
                self.busy_polls = 0;
            }
            FT4222_OUTPUT_FLUSH => {}
            FT4222_INPUT_FLUSH => self.responses.clear(),
            other => log::warn!("unknown reset request value {:#06x}", other),
        }
    }

    fn apply_config_word(&mut self, cmd: u8, data: u8) {
        match cmd {
            FT4222_SET_MODE => {
                log::debug!("mode set to {}", data);
                self.mode = data;
                self.status = ChipStatus::IDLE;
                self.receive_fifo.clear();
                self.respond_fifo.clear();
            }
            FT4222_SET_CLOCK => self.sys_clock = data,
            FT4222_I2C_SET_CLK_LO => self.i2c_kbps_lo = data,
            FT4222_I2C_SET_CLK_HI => {
                self.i2c_kbps = u16::from_le_bytes([self.i2c_kbps_lo, data]);
            }
            FT4222_I2C_SET_ADDRESS => self.own_address = data,
            FT4222_I2C_RESET | FT4222_SPI_RESET_TRANSACTION => {
                self.status = ChipStatus::IDLE;
                self.receive_fifo.clear();
                self.respond_fifo.clear();
            }
            FT4222_SPI_RESET => self.status = ChipStatus::IDLE,
            FT4222_SPI_SET_CLK_DIV => self.divisor = data,
            FT4222_SPI_SET_CLK_IDLE => self.cpol = data,
            FT4222_SPI_SET_CAPTURE => self.cpha = data,
            FT4222_SPI_SET_IO_LINES => self.io_lines = data,
            FT4222_SPI_SET_CS_ACTIVE => self.cs_active = data,
            FT4222_SPI_SET_CS_MASK => self.cs_mask = data,
            FT4222_GPIO_SET_DIR => self.gpio_outputs = data,
            other => log::warn!("unknown config word {:#04x} (data {:#04x})", other, data),
        }
    }

    /// Parse and answer one bulk frame
    ///
    /// Every frame finishes instantly; a busy chip is scripted through the
    /// status query instead.
    fn process_frame(&mut self, frame: &[u8]) {
        self.status = ChipStatus::IDLE;
        match self.mode {
            FT4222_MODE_I2C_MASTER => self.i2c_master_frame(frame),
            FT4222_MODE_I2C_SLAVE => self.i2c_slave_frame(frame),
            FT4222_MODE_SPI_MASTER => self.spi_master_frame(frame),
            FT4222_MODE_SPI_SLAVE => self.spi_slave_frame(frame),
            FT4222_MODE_GPIO => self.gpio_frame(frame),
            other => {
                log::warn!("bulk frame in unsupported mode {}, dropping", other);
                self.respond_failure(ChipStatus::ERROR, 0);
            }
        }
    }

    fn i2c_master_frame(&mut self, frame: &[u8]) {
        match frame.first().copied() {
            Some(FT4222_BULK_I2C_WRITE) => {
                if frame.len() < I2C_HEADER_SIZE {
                    self.respond_failure(ChipStatus::ERROR, 0);
                    return;
                }
                let addr = u16::from_le_bytes([frame[2], frame[3]]) & !FT4222_I2C_ADDR_10BIT;
                let len = u16::from_le_bytes([frame[4], frame[5]]) as usize;
                let payload = &frame[I2C_HEADER_SIZE..];
                if payload.len() != len {
                    self.respond_failure(ChipStatus::ERROR, 0);
                    return;
                }
                let outcome = match self.targets.get_mut(&addr) {
                    None => Err(ChipStatus::ADDRESS_NACK),
                    Some(target) => {
                        if target.master_write(payload) {
                            Ok(())
                        } else {
                            Err(ChipStatus::DATA_NACK)
                        }
                    }
                };
                match outcome {
                    Ok(()) => self.respond(&[]),
                    Err(bits) => self.respond_failure(bits, 0),
                }
            }
            Some(FT4222_BULK_I2C_READ) => {
                if frame.len() != I2C_HEADER_SIZE {
                    self.respond_failure(ChipStatus::ERROR, 0);
                    return;
                }
                let addr = u16::from_le_bytes([frame[2], frame[3]]) & !FT4222_I2C_ADDR_10BIT;
                let len = u16::from_le_bytes([frame[4], frame[5]]) as usize;
                let outcome = match self.targets.get_mut(&addr) {
                    None => Err(ChipStatus::ADDRESS_NACK),
                    Some(target) => Ok(target.master_read(len)),
                };
                match outcome {
                    Ok(data) => self.respond(&data),
                    Err(bits) => self.respond_failure(bits, len),
                }
            }
            Some(FT4222_BULK_I2C_WRITE_READ) => {
                if frame.len() < I2C_WRITE_READ_HEADER_SIZE {
                    self.respond_failure(ChipStatus::ERROR, 0);
                    return;
                }
                let addr = u16::from_le_bytes([frame[2], frame[3]]) & !FT4222_I2C_ADDR_10BIT;
                let wlen = u16::from_le_bytes([frame[4], frame[5]]) as usize;
                let rlen = u16::from_le_bytes([frame[6], frame[7]]) as usize;
                let payload = &frame[I2C_WRITE_READ_HEADER_SIZE..];
                if payload.len() != wlen {
                    self.respond_failure(ChipStatus::ERROR, rlen);
                    return;
                }
                let outcome = match self.targets.get_mut(&addr) {
                    None => Err(ChipStatus::ADDRESS_NACK),
                    Some(target) => {
                        if target.master_write(payload) {
                            Ok(target.master_read(rlen))
                        } else {
                            Err(ChipStatus::DATA_NACK)
                        }
                    }
                };
                match outcome {
                    Ok(data) => self.respond(&data),
                    Err(bits) => self.respond_failure(bits, rlen),
                }
            }
            _ => self.respond_failure(ChipStatus::ERROR, 0),
        }
    }

    fn i2c_slave_frame(&mut self, frame: &[u8]) {
        match frame.first().copied() {
            Some(FT4222_BULK_I2C_SLAVE_READ) if frame.len() == 3 => {
                let len = u16::from_le_bytes([frame[1], frame[2]]) as usize;
                let data = self.drain_receive(len);
                self.respond(&data);
            }
            Some(FT4222_BULK_I2C_SLAVE_WRITE) if frame.len() >= 3 => {
                let len = u16::from_le_bytes([frame[1], frame[2]]) as usize;
                let payload = &frame[3..];
                if payload.len() != len {
                    self.respond_failure(ChipStatus::ERROR, 0);
                    return;
                }
                self.respond_fifo.extend(payload.iter().copied());
                self.respond(&[]);
            }
            _ => self.respond_failure(ChipStatus::ERROR, 0),
        }
    }

    fn spi_master_frame(&mut self, frame: &[u8]) {
        if self.io_lines <= 1 {
            // Full duplex single lane, MISO wired back to MOSI
            self.respond(frame);
            return;
        }
        // Half duplex multi lane: write phase, then a read phase that the
        // loopback answers with the bytes just written
        if frame.len() < MULTI_IO_HEADER_SIZE || frame[0] != MULTI_IO_MAGIC {
            self.respond_failure(ChipStatus::ERROR, 0);
            return;
        }
        let wlen = u16::from_le_bytes([frame[1], frame[2]]) as usize;
        let rlen = u16::from_le_bytes([frame[3], frame[4]]) as usize;
        let tx = &frame[MULTI_IO_HEADER_SIZE..];
        if tx.len() != wlen {
            self.respond_failure(ChipStatus::ERROR, rlen);
            return;
        }
        let mut data = tx.to_vec();
        data.resize(rlen, 0);
        self.respond(&data);
    }

    fn spi_slave_frame(&mut self, frame: &[u8]) {
        match frame.first().copied() {
            Some(FT4222_BULK_SPI_SLAVE_XFER) if frame.len() >= 5 => {
                let wlen = u16::from_le_bytes([frame[1], frame[2]]) as usize;
                let rlen = u16::from_le_bytes([frame[3], frame[4]]) as usize;
                let payload = &frame[5..];
                if payload.len() != wlen {
                    self.respond_failure(ChipStatus::ERROR, rlen);
                    return;
                }
                self.respond_fifo.extend(payload.iter().copied());
                let data = self.drain_receive(rlen);
                self.respond(&data);
            }
            _ => self.respond_failure(ChipStatus::ERROR, 0),
        }
    }

    fn gpio_frame(&mut self, frame: &[u8]) {
        match frame.first().copied() {
            Some(FT4222_BULK_GPIO_SET) if frame.len() == 3 && frame[1] < 4 => {
                let bit = 1u8 << frame[1];
                if self.gpio_outputs & bit == 0 {
                    // Pad logic refuses to drive a pin configured as input
                    self.respond_failure(ChipStatus::ERROR, 0);
                    return;
                }
                if frame[2] != 0 {
                    self.gpio_levels |= bit;
                } else {
                    self.gpio_levels &= !bit;
                }
                self.respond(&[]);
            }
            Some(FT4222_BULK_GPIO_READ) if frame.len() == 2 && frame[1] < 4 => {
                let level = (self.gpio_levels >> frame[1]) & 1;
                self.respond(&[level]);
            }
            _ => self.respond_failure(ChipStatus::ERROR, 0),
        }
    }

    /// Take up to `len` bytes from the receive FIFO, zero filling the rest;
    /// the chip clocks out a full-length frame no matter how much the far
    /// side actually sent
    fn drain_receive(&mut self, len: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            out.push(self.receive_fifo.pop_front().unwrap_or(0));
        }
        out
    }

    fn respond(&mut self, payload: &[u8]) {
        let mut frame = Vec::with_capacity(MODEM_STATUS_SIZE + payload.len());
        frame.extend_from_slice(&self.status.to_bytes());
        frame.extend_from_slice(payload);
        self.responses.push_back(frame);
    }

    /// Failure responses still carry the full expected length so the host
    /// reads one complete frame and finds the failure in the status bytes
    fn respond_failure(&mut self, bits: ChipStatus, response_len: usize) {
        self.status |= bits;
        let mut frame = vec![0u8; MODEM_STATUS_SIZE + response_len];
        frame[..MODEM_STATUS_SIZE].copy_from_slice(&self.status.to_bytes());
        self.responses.push_back(frame);
    }
}

/// Clone-able handle to one emulated FT4222H
///
/// Give one clone to [`Device`](ft4222_core::device::Device) as its
/// transport and keep another for scripting faults and inspecting what the
/// chip saw.
#[cfg(feature = "std")]
#[derive(Clone, Default)]
pub struct DummyBridge {
    state: Arc<Mutex<BridgeState>>,
}

#[cfg(feature = "std")]
impl DummyBridge {
    /// Fresh chip in the power-on state, with an empty bus behind it
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a register file target to the emulated I2C bus
    pub fn add_i2c_target(&self, address: u16, registers: Vec<u8>) {
        self.lock().targets.insert(
            address,
            I2cTarget {
                registers,
                pointer: 0,
            },
        );
    }

    /// Snapshot of a target's register file
    pub fn i2c_target_registers(&self, address: u16) -> Option<Vec<u8>> {
        self.lock().targets.get(&address).map(|t| t.registers.clone())
    }

    /// Feed bytes a remote master or SPI clock would push into the slave
    /// receive FIFO
    pub fn push_to_slave(&self, bytes: &[u8]) {
        self.lock().receive_fifo.extend(bytes.iter().copied());
    }

    /// Drain up to `len` bytes the slave queued for the remote side
    pub fn pull_from_slave(&self, len: usize) -> Vec<u8> {
        let mut state = self.lock();
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            match state.respond_fifo.pop_front() {
                Some(byte) => out.push(byte),
                None => break,
            }
        }
        out
    }

    /// Drive an input pin from the outside world
    pub fn drive_pin(&self, pin: GpioPin, high: bool) {
        let mut state = self.lock();
        let bit = 1u8 << pin.index();
        if high {
            state.gpio_levels |= bit;
        } else {
            state.gpio_levels &= !bit;
        }
    }

    /// Answer the next `polls` status queries with the busy bit set
    pub fn script_busy_polls(&self, polls: usize) {
        self.lock().busy_polls = polls;
    }

    /// Fail every transport call once `calls` more of them have gone through
    pub fn script_disconnect_after(&self, calls: usize) {
        self.lock().disconnect_after = Some(calls);
    }

    /// Undo a scripted or triggered disconnect
    pub fn reconnect(&self) {
        let mut state = self.lock();
        state.disconnected = false;
        state.disconnect_after = None;
    }

    /// Send on `tx` each time a status query observes the busy script;
    /// lets a test wait until another thread is provably mid-transaction
    pub fn notify_on_busy_poll(&self, tx: Sender<()>) {
        self.lock().notify_poll = Some(tx);
    }

    /// Committed chip function, as the raw mode value
    pub fn mode_value(&self) -> u8 {
        self.lock().mode
    }

    /// I2C bus speed the host configured, in kbps
    pub fn i2c_speed_kbps(&self) -> u16 {
        self.lock().i2c_kbps
    }

    /// Own slave address the host configured
    pub fn own_address(&self) -> u8 {
        self.lock().own_address
    }

    /// Data lane count from the SPI config block
    pub fn io_lines(&self) -> u8 {
        self.lock().io_lines
    }

    /// Selected system clock and divisor register values
    pub fn spi_clock(&self) -> (u8, u8) {
        let state = self.lock();
        (state.sys_clock, state.divisor)
    }

    /// Clock idle level and capture edge register values
    pub fn spi_clock_shape(&self) -> (u8, u8) {
        let state = self.lock();
        (state.cpol, state.cpha)
    }

    /// Chip select active level register value
    pub fn cs_active_level(&self) -> u8 {
        self.lock().cs_active
    }

    /// Chip select mask register value
    pub fn cs_mask(&self) -> u8 {
        self.lock().cs_mask
    }

    /// Non-empty bulk OUT frames processed so far
    pub fn bulk_frames(&self) -> usize {
        self.lock().frames.len()
    }

    /// Every non-empty bulk OUT frame, in the order the chip saw them
    pub fn frame_log(&self) -> Vec<Vec<u8>> {
        self.lock().frames.clone()
    }

    /// Status queries answered so far
    pub fn status_polls(&self) -> usize {
        self.lock().status_polls
    }

    /// Transport calls accepted so far
    pub fn transport_calls(&self) -> usize {
        self.lock().transport_calls
    }

    /// Response frames queued and not yet collected
    pub fn pending_responses(&self) -> usize {
        self.lock().responses.len()
    }

    fn lock(&self) -> MutexGuard<'_, BridgeState> {
        // A panicking test thread must not wedge the other clones
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(feature = "std")]
impl Transport for DummyBridge {
    fn control_out(
        &mut self,
        request: u8,
        value: u16,
        _index: u16,
        _data: &[u8],
    ) -> TransportResult<()> {
        let mut state = self.lock();
        state.touch()?;
        match request {
            FT4222_RESET_REQUEST => {
                state.handle_reset(value);
                Ok(())
            }
            FT4222_CONFIG_REQUEST => {
                let cmd = (value & 0xFF) as u8;
                let data = (value >> 8) as u8;
                log::trace!("config word {:#04x} = {:#04x}", cmd, data);
                state.apply_config_word(cmd, data);
                Ok(())
            }
            _ => Err(TransportError::Io),
        }
    }

    fn control_in(
        &mut self,
        request: u8,
        value: u16,
        _index: u16,
        buf: &mut [u8],
    ) -> TransportResult<()> {
        let mut state = self.lock();
        state.touch()?;
        if request != FT4222_INFO_REQUEST {
            return Err(TransportError::Io);
        }
        match value {
            FT4222_GET_STATUS => {
                if buf.len() < MODEM_STATUS_SIZE {
                    return Err(TransportError::Io);
                }
                state.status_polls += 1;
                let mut status = state.status;
                if state.busy_polls > 0 {
                    state.busy_polls -= 1;
                    status |= ChipStatus::BUSY;
                    if let Some(tx) = &state.notify_poll {
                        let _ = tx.send(());
                    }
                }
                buf[..MODEM_STATUS_SIZE].copy_from_slice(&status.to_bytes());
                buf[MODEM_STATUS_SIZE..].fill(0);
                Ok(())
            }
            FT4222_GET_VERSION => {
                if buf.len() < 12 {
                    return Err(TransportError::Io);
                }
                buf.fill(0);
                buf[..4].copy_from_slice(&DUMMY_CHIP_VERSION.to_be_bytes());
                Ok(())
            }
            FT4222_GET_CONFIG => {
                if buf.is_empty() {
                    return Err(TransportError::Io);
                }
                // Chip mode 0: one function channel
                buf.fill(0);
                Ok(())
            }
            _ => Err(TransportError::Io),
        }
    }

    fn bulk_out(&mut self, data: &[u8]) -> TransportResult<()> {
        let mut state = self.lock();
        state.touch()?;
        if data.is_empty() {
            log::trace!("chip select released");
            return Ok(());
        }
        state.frames.push(data.to_vec());
        state.process_frame(data);
        Ok(())
    }

    fn bulk_in(&mut self, buf: &mut [u8]) -> TransportResult<()> {
        let mut state = self.lock();
        state.touch()?;
        let frame = state.responses.pop_front().ok_or(TransportError::TimedOut)?;
        if frame.len() != buf.len() {
            log::warn!("bulk IN length mismatch: host wants {}, queued {}", buf.len(), frame.len());
            return Err(TransportError::Io);
        }
        buf.copy_from_slice(&frame);
        Ok(())
    }

    fn delay_us(&mut self, us: u32) {
        // Sleeps for real, without the state lock, so poll backoff stays
        // observable and other clones keep running
        std::thread::sleep(std::time::Duration::from_micros(u64::from(us)));
    }

    fn control_index(&self) -> u16 {
        0
    }

    fn close(&mut self) {
        self.lock().closed = true;
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    use std::sync::mpsc;
    use std::thread;

    use ft4222_core::clock::ClockConfig;
    use ft4222_core::device::{AccessPolicy, Device, DeviceConfig};
    use ft4222_core::engine::RetryPolicy;
    use ft4222_core::error::{Error, FailureKind};
    use ft4222_core::mode::{
        ClockPhase, ClockPolarity, LaneCount, Mode, ModeKind, OpKind, PinDirection,
    };

    fn quick_retry() -> RetryPolicy {
        RetryPolicy {
            max_polls: 8,
            initial_delay_us: 1,
            max_delay_us: 4,
        }
    }

    fn open_device(policy: AccessPolicy) -> (DummyBridge, Device<DummyBridge>) {
        let bridge = DummyBridge::new();
        let config = DeviceConfig::new()
            .with_policy(policy)
            .with_retry(quick_retry());
        (bridge.clone(), Device::new(bridge, config))
    }

    fn spi_master(lanes: LaneCount) -> Mode {
        Mode::SpiMaster {
            lanes,
            clock: ClockConfig::for_target_khz(10_000),
            cpol: ClockPolarity::IdleLow,
            cpha: ClockPhase::CaptureLeading,
            cs: 0,
        }
    }

    #[test]
    fn test_spi_loopback_round_trip() {
        let (_bridge, device) = open_device(AccessPolicy::Serialized);
        device.configure(spi_master(LaneCount::Single)).unwrap();

        let result = device.spi_transfer(&[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
        assert_eq!(result.data(), Some(&[0xDE, 0xAD, 0xBE, 0xEF][..]));
    }

    #[test]
    fn test_spi_read_phase_clocks_padding() {
        let (_bridge, device) = open_device(AccessPolicy::Serialized);
        device.configure(spi_master(LaneCount::Single)).unwrap();

        // Full duplex: one response byte per clocked byte, the read phase
        // clocks zeros and the loopback echoes them
        let result = device.spi_transfer_read(&[0x9F], 3).unwrap();
        assert_eq!(result.data(), Some(&[0x9F, 0, 0, 0][..]));
    }

    #[test]
    fn test_spi_multi_lane_returns_read_phase_only() {
        let (bridge, device) = open_device(AccessPolicy::Serialized);
        device.configure(spi_master(LaneCount::Dual)).unwrap();
        assert_eq!(bridge.io_lines(), 2);

        let result = device.spi_transfer_read(&[0x11, 0x22], 4).unwrap();
        assert_eq!(result.data(), Some(&[0x11, 0x22, 0, 0][..]));
    }

    #[test]
    fn test_spi_configure_applies_every_word() {
        let (bridge, device) = open_device(AccessPolicy::Serialized);
        let mode = Mode::SpiMaster {
            lanes: LaneCount::Single,
            clock: ClockConfig::for_target_khz(15_000),
            cpol: ClockPolarity::IdleHigh,
            cpha: ClockPhase::CaptureTrailing,
            cs: 2,
        };
        device.configure(mode).unwrap();

        assert_eq!(bridge.mode_value(), FT4222_MODE_SPI_MASTER);
        assert_eq!(bridge.io_lines(), 1);
        // 15 MHz comes out of the 60 MHz clock divided by 4
        assert_eq!(bridge.spi_clock(), (0, 2));
        assert_eq!(
            bridge.spi_clock_shape(),
            (FT4222_CLK_IDLE_HIGH, FT4222_CLK_CAPTURE_TRAILING)
        );
        assert_eq!(bridge.cs_active_level(), FT4222_CS_ACTIVE_LOW);
        assert_eq!(bridge.cs_mask(), 1 << 2);
    }

    #[test]
    fn test_i2c_register_round_trip() {
        let (bridge, device) = open_device(AccessPolicy::Serialized);
        bridge.add_i2c_target(0x50, vec![0u8; 16]);
        device
            .configure(Mode::I2cMaster { clock_hz: 400_000 })
            .unwrap();
        assert_eq!(bridge.i2c_speed_kbps(), 400);

        let write = device.i2c_write(0x50, &[0x04, 0xCA, 0xFE]).unwrap();
        assert!(write.is_ok());

        let read = device.i2c_write_read(0x50, &[0x04], 2).unwrap();
        assert_eq!(read.data(), Some(&[0xCA, 0xFE][..]));

        let registers = bridge.i2c_target_registers(0x50).unwrap();
        assert_eq!(&registers[4..6], &[0xCA, 0xFE]);
    }

    #[test]
    fn test_i2c_probe_of_empty_address_nacks() {
        let (bridge, device) = open_device(AccessPolicy::Serialized);
        bridge.add_i2c_target(0x50, vec![0u8; 4]);
        device
            .configure(Mode::I2cMaster { clock_hz: 100_000 })
            .unwrap();

        let probe = device.i2c_read(0x3B, 1).unwrap();
        assert_eq!(probe.failure(), Some(FailureKind::Nack));
        assert!(probe.status().contains(ChipStatus::ADDRESS_NACK));

        // The bus recovers without any reset
        assert!(device.i2c_read(0x50, 1).unwrap().is_ok());
    }

    #[test]
    fn test_i2c_write_past_register_file_nacks_data() {
        let (bridge, device) = open_device(AccessPolicy::Serialized);
        bridge.add_i2c_target(0x50, vec![0u8; 4]);
        device
            .configure(Mode::I2cMaster { clock_hz: 100_000 })
            .unwrap();

        let result = device.i2c_write(0x50, &[0x03, 0xAA, 0xBB]).unwrap();
        assert_eq!(result.failure(), Some(FailureKind::Nack));
        assert!(result.status().contains(ChipStatus::DATA_NACK));

        // The byte before the overflow was acknowledged and stored
        assert_eq!(bridge.i2c_target_registers(0x50).unwrap()[3], 0xAA);
    }

    #[test]
    fn test_i2c_write_read_nacks_when_write_phase_overflows() {
        let (bridge, device) = open_device(AccessPolicy::Serialized);
        bridge.add_i2c_target(0x50, vec![0u8; 4]);
        device
            .configure(Mode::I2cMaster { clock_hz: 100_000 })
            .unwrap();

        // The second data byte falls off the register file; the read
        // phase never starts
        let result = device.i2c_write_read(0x50, &[0x03, 0xEE, 0xFF], 2).unwrap();
        assert_eq!(result.failure(), Some(FailureKind::Nack));
        assert!(result.status().contains(ChipStatus::DATA_NACK));

        // A write-read against an absent target reports the address NACK
        let result = device.i2c_write_read(0x29, &[0x00], 2).unwrap();
        assert_eq!(result.failure(), Some(FailureKind::Nack));
        assert!(result.status().contains(ChipStatus::ADDRESS_NACK));
    }

    #[test]
    fn test_payload_ceiling_never_reaches_the_wire() {
        let (bridge, device) = open_device(AccessPolicy::Serialized);
        bridge.add_i2c_target(0x10, vec![0u8; 256]);
        device
            .configure(Mode::I2cMaster { clock_hz: 100_000 })
            .unwrap();

        let oversize = vec![0u8; I2C_FIFO_SIZE + 1];
        let err = device.i2c_write(0x10, &oversize).unwrap_err();
        assert_eq!(
            err,
            Error::PayloadTooLarge {
                len: I2C_FIFO_SIZE + 1,
                max: I2C_FIFO_SIZE,
            }
        );
        assert_eq!(bridge.bulk_frames(), 0);

        // Exactly at the ceiling goes through
        let max = vec![0u8; I2C_FIFO_SIZE];
        assert!(device.i2c_write(0x10, &max).unwrap().is_ok());
    }

    #[test]
    fn test_wrong_mode_transfer_never_reaches_the_chip() {
        let (bridge, device) = open_device(AccessPolicy::Serialized);
        device
            .configure(Mode::I2cMaster { clock_hz: 100_000 })
            .unwrap();
        let frames = bridge.bulk_frames();

        let err = device.spi_transfer(&[1, 2, 3]).unwrap_err();
        assert_eq!(
            err,
            Error::Incompatible {
                active: ModeKind::I2cMaster,
                requested: OpKind::Transfer,
            }
        );
        assert_eq!(bridge.bulk_frames(), frames);
    }

    #[test]
    fn test_unconfigured_handle_rejects_data_ops() {
        let (bridge, device) = open_device(AccessPolicy::Serialized);

        let err = device.i2c_read(0x50, 1).unwrap_err();
        assert_eq!(
            err,
            Error::Incompatible {
                active: ModeKind::Uninitialized,
                requested: OpKind::Read,
            }
        );
        assert_eq!(bridge.transport_calls(), 0);
    }

    #[test]
    fn test_reconfigure_switches_function() {
        let (bridge, device) = open_device(AccessPolicy::Serialized);

        device
            .configure(Mode::I2cMaster { clock_hz: 400_000 })
            .unwrap();
        assert_eq!(bridge.mode_value(), FT4222_MODE_I2C_MASTER);
        assert_eq!(
            device.mode().unwrap(),
            Mode::I2cMaster { clock_hz: 400_000 }
        );

        device.configure(spi_master(LaneCount::Dual)).unwrap();
        assert_eq!(bridge.mode_value(), FT4222_MODE_SPI_MASTER);
        assert_eq!(bridge.io_lines(), 2);
    }

    #[test]
    fn test_i2c_slave_fifo_exchange() {
        let (bridge, device) = open_device(AccessPolicy::Serialized);
        device.configure(Mode::I2cSlave { address: 0x41 }).unwrap();
        assert_eq!(bridge.own_address(), 0x41);

        // A remote master wrote four bytes; short FIFOs read back zero
        // filled to the requested length
        bridge.push_to_slave(&[1, 2, 3, 4]);
        let got = device.i2c_read(0, 6).unwrap();
        assert_eq!(got.data(), Some(&[1, 2, 3, 4, 0, 0][..]));

        // Queue a response for the remote master to clock out
        assert!(device.i2c_write(0, &[0xAA, 0xBB]).unwrap().is_ok());
        assert_eq!(bridge.pull_from_slave(2), vec![0xAA, 0xBB]);
    }

    #[test]
    fn test_spi_slave_exchange() {
        let (bridge, device) = open_device(AccessPolicy::Serialized);
        device
            .configure(Mode::SpiSlave {
                cpol: ClockPolarity::IdleLow,
                cpha: ClockPhase::CaptureLeading,
            })
            .unwrap();

        bridge.push_to_slave(&[0x55, 0x55, 0x55]);
        let result = device.spi_transfer_read(&[0x0F, 0x1E], 3).unwrap();
        assert_eq!(result.data(), Some(&[0x55, 0x55, 0x55][..]));
        assert_eq!(bridge.pull_from_slave(2), vec![0x0F, 0x1E]);
    }

    #[test]
    fn test_gpio_latch_and_external_drive() {
        let (bridge, device) = open_device(AccessPolicy::Serialized);
        device
            .configure(Mode::GpioOnly {
                directions: [
                    PinDirection::Output,
                    PinDirection::Output,
                    PinDirection::Input,
                    PinDirection::Input,
                ],
            })
            .unwrap();

        assert!(device.gpio_set(GpioPin::P1, true).unwrap().is_ok());
        assert_eq!(device.gpio_read(GpioPin::P1).unwrap().data(), Some(&[1][..]));

        bridge.drive_pin(GpioPin::P2, true);
        assert_eq!(device.gpio_read(GpioPin::P2).unwrap().data(), Some(&[1][..]));

        bridge.drive_pin(GpioPin::P2, false);
        assert_eq!(device.gpio_read(GpioPin::P2).unwrap().data(), Some(&[0][..]));
    }

    #[test]
    fn test_gpio_set_on_input_pin_is_refused() {
        let (_bridge, device) = open_device(AccessPolicy::Serialized);
        device
            .configure(Mode::GpioOnly {
                directions: [
                    PinDirection::Output,
                    PinDirection::Output,
                    PinDirection::Input,
                    PinDirection::Input,
                ],
            })
            .unwrap();

        let result = device.gpio_set(GpioPin::P3, true).unwrap();
        assert_eq!(result.failure(), Some(FailureKind::Protocol));
    }

    #[test]
    fn test_busy_chip_is_polled_until_idle() {
        let (bridge, device) = open_device(AccessPolicy::Serialized);
        device.configure(spi_master(LaneCount::Single)).unwrap();
        let polls = bridge.status_polls();

        bridge.script_busy_polls(3);
        let result = device.spi_transfer(&[0x42]).unwrap();
        assert_eq!(result.data(), Some(&[0x42][..]));
        // Three busy answers, then the idle one that completes the poll
        assert_eq!(bridge.status_polls() - polls, 4);
    }

    #[test]
    fn test_retry_ceiling_times_out_and_drains_later() {
        let (bridge, device) = open_device(AccessPolicy::Serialized);
        device.configure(spi_master(LaneCount::Single)).unwrap();

        // More busy answers than the policy's eight polls
        bridge.script_busy_polls(10);
        let result = device.spi_transfer(&[1, 2]).unwrap();
        assert_eq!(result.failure(), Some(FailureKind::Timeout));
        assert_eq!(bridge.pending_responses(), 1);

        // The next transaction first drains the stale frame, then rides
        // out the two remaining busy answers
        let result = device.spi_transfer(&[3]).unwrap();
        assert_eq!(result.data(), Some(&[3][..]));
        assert_eq!(bridge.pending_responses(), 0);
    }

    #[test]
    fn test_disconnect_mid_transaction_faults_the_handle() {
        let (bridge, device) = open_device(AccessPolicy::Serialized);
        bridge.add_i2c_target(0x50, vec![0u8; 8]);
        device
            .configure(Mode::I2cMaster { clock_hz: 100_000 })
            .unwrap();

        bridge.script_disconnect_after(0);
        let result = device.i2c_read(0x50, 2).unwrap();
        assert_eq!(
            result.failure(),
            Some(FailureKind::Transport(TransportError::Disconnected))
        );

        // A faulted handle refuses work before touching the transport
        let calls = bridge.transport_calls();
        assert_eq!(device.i2c_read(0x50, 2).unwrap_err(), Error::Faulted);
        assert_eq!(bridge.transport_calls(), calls);
    }

    #[test]
    fn test_reset_recovers_a_faulted_handle() {
        let (bridge, device) = open_device(AccessPolicy::Serialized);
        device.configure(spi_master(LaneCount::Single)).unwrap();

        bridge.script_disconnect_after(0);
        assert!(!device.spi_transfer(&[1]).unwrap().is_ok());
        assert_eq!(device.spi_transfer(&[1]).unwrap_err(), Error::Faulted);

        bridge.reconnect();
        device.reset().unwrap();
        assert_eq!(device.mode().unwrap(), Mode::Uninitialized);

        device.configure(spi_master(LaneCount::Single)).unwrap();
        assert!(device.spi_transfer(&[0x5A]).unwrap().is_ok());
    }

    #[test]
    fn test_close_is_idempotent_and_releases_the_transport() {
        let (bridge, device) = open_device(AccessPolicy::Serialized);
        device.configure(spi_master(LaneCount::Single)).unwrap();

        device.close();
        device.close();
        assert_eq!(device.spi_transfer(&[1]).unwrap_err(), Error::DeviceClosed);

        // The transport refuses traffic once released
        let mut clone = bridge.clone();
        assert_eq!(clone.bulk_out(&[0x00]), Err(TransportError::Disconnected));
    }

    #[test]
    fn test_chip_status_surfaces_the_raw_word() {
        let (bridge, device) = open_device(AccessPolicy::Serialized);
        bridge.add_i2c_target(0x50, vec![0u8; 4]);
        device
            .configure(Mode::I2cMaster { clock_hz: 100_000 })
            .unwrap();

        let probe = device.i2c_read(0x29, 1).unwrap();
        assert!(!probe.is_ok());
        assert!(device
            .chip_status()
            .unwrap()
            .contains(ChipStatus::ADDRESS_NACK));

        assert!(device.i2c_read(0x50, 1).unwrap().is_ok());
        assert_eq!(device.chip_status().unwrap(), ChipStatus::IDLE);
    }

    #[test]
    fn test_serialized_threads_share_one_handle() {
        let (bridge, device) = open_device(AccessPolicy::Serialized);
        bridge.add_i2c_target(0x50, vec![0u8; 64]);
        device
            .configure(Mode::I2cMaster { clock_hz: 400_000 })
            .unwrap();
        let frames = bridge.bulk_frames();

        thread::scope(|scope| {
            for worker in 0u8..4 {
                let device = &device;
                scope.spawn(move || {
                    for i in 0u8..8 {
                        let reg = worker * 8 + i;
                        let result = device.i2c_write(0x50, &[reg, 0xA0 | worker]).unwrap();
                        assert!(result.is_ok());
                    }
                });
            }
        });

        assert_eq!(bridge.bulk_frames() - frames, 32);
        let registers = bridge.i2c_target_registers(0x50).unwrap();
        for worker in 0u8..4 {
            for i in 0u8..8 {
                assert_eq!(registers[(worker * 8 + i) as usize], 0xA0 | worker);
            }
        }
    }

    #[test]
    fn test_serialized_transactions_complete_in_submission_order() {
        let bridge = DummyBridge::new();
        let config = DeviceConfig::new().with_retry(RetryPolicy {
            max_polls: 5_000,
            initial_delay_us: 200,
            max_delay_us: 200,
        });
        let device = Device::new(bridge.clone(), config);
        bridge.add_i2c_target(0x50, vec![0u8; 16]);
        device
            .configure(Mode::I2cMaster { clock_hz: 400_000 })
            .unwrap();
        let skip = bridge.bulk_frames();

        let (tx, rx) = mpsc::channel();
        bridge.notify_on_busy_poll(tx);
        // Pin the first transaction inside the chip while the rest arrive
        bridge.script_busy_polls(usize::MAX);

        thread::scope(|scope| {
            let device = &device;
            scope.spawn(move || {
                assert!(device.i2c_write(0x50, &[0, 0xA0]).unwrap().is_ok());
            });
            rx.recv().unwrap();

            // Staggered arrivals; the gate owes them service in this order
            for worker in 1u8..5 {
                scope.spawn(move || {
                    let result = device.i2c_write(0x50, &[worker, 0xA0 | worker]).unwrap();
                    assert!(result.is_ok());
                });
                thread::sleep(std::time::Duration::from_millis(10));
            }
            bridge.script_busy_polls(0);
        });

        let order: Vec<u8> = bridge.frame_log()[skip..]
            .iter()
            .map(|frame| frame[I2C_HEADER_SIZE])
            .collect();
        assert_eq!(order, [0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_exclusive_policy_reports_busy_while_occupied() {
        let bridge = DummyBridge::new();
        let config = DeviceConfig::new()
            .with_policy(AccessPolicy::Exclusive)
            .with_retry(RetryPolicy {
                max_polls: 200,
                initial_delay_us: 500,
                max_delay_us: 500,
            });
        let device = Device::new(bridge.clone(), config);
        device.configure(spi_master(LaneCount::Single)).unwrap();

        let (tx, rx) = mpsc::channel();
        bridge.notify_on_busy_poll(tx);
        bridge.script_busy_polls(100);

        thread::scope(|scope| {
            let device = &device;
            let first = scope.spawn(move || device.spi_transfer(&[0x77]).unwrap());

            // Wait until the first transaction is provably inside the chip
            rx.recv().unwrap();
            assert_eq!(device.spi_transfer(&[0x88]).unwrap_err(), Error::Busy);

            let result = first.join().unwrap();
            assert_eq!(result.data(), Some(&[0x77][..]));
        });

        // The channel is free again
        assert!(device.spi_transfer(&[0x99]).unwrap().is_ok());
    }
}
