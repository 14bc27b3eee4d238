//! Command codec
//!
//! Translates validated transaction requests into the chip's wire framing,
//! and chip responses back into transaction results. Encoding is pure and
//! never touches a transport, so every size and address check here runs
//! before the bus sees anything.

use alloc::vec::Vec;

use crate::error::{Error, FailureKind, ModeRejection, Result};
use crate::mode::{LaneCount, Mode, PinDirection};
use crate::protocol::*;
use crate::request::{TransactionRequest, TransactionResult};
use crate::status::ChipStatus;

/// Transfer plan for one transaction
///
/// The engine plays this against a transport: config words over the control
/// channel first, then the bulk frame, then an optional zero-length packet
/// (the SPI master path uses it to release chip select).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    /// Vendor config words, applied in order
    pub config_words: Vec<(u8, u8)>,
    /// Bulk OUT frame
    pub bulk_out: Vec<u8>,
    /// Follow the frame with a zero-length packet
    pub terminate: bool,
    /// Response bytes expected after the two status bytes
    pub response_len: usize,
}

/// Build the config word sequence that switches the chip into `mode`
///
/// Parameter validation is [`Mode::validate`]'s job and has already run by
/// the time the engine asks for the words.
pub fn encode_configure(mode: &Mode) -> Result<Vec<(u8, u8)>> {
    let mut words = Vec::new();
    match *mode {
        Mode::Uninitialized => {
            return Err(Error::ModeRejected(ModeRejection::NotConfigurable));
        }
        Mode::I2cMaster { clock_hz } => {
            let kbps = (clock_hz / 1000) as u16;
            words.push((FT4222_SET_MODE, FT4222_MODE_I2C_MASTER));
            words.push((FT4222_I2C_SET_CLK_LO, (kbps & 0xFF) as u8));
            words.push((FT4222_I2C_SET_CLK_HI, (kbps >> 8) as u8));
            words.push((FT4222_I2C_RESET, 0));
        }
        Mode::I2cSlave { address } => {
            words.push((FT4222_SET_MODE, FT4222_MODE_I2C_SLAVE));
            words.push((FT4222_I2C_SET_ADDRESS, address as u8));
            words.push((FT4222_I2C_RESET, 0));
        }
        Mode::SpiMaster {
            lanes,
            clock,
            cpol,
            cpha,
            cs,
        } => {
            words.push((FT4222_SET_CLOCK, clock.sys_clock.index() as u8));
            words.push((FT4222_SET_MODE, FT4222_MODE_SPI_MASTER));
            words.push((FT4222_SPI_SET_CLK_DIV, clock.divisor.value() as u8));
            words.push((FT4222_SPI_SET_CLK_IDLE, cpol.wire_value()));
            words.push((FT4222_SPI_SET_CAPTURE, cpha.wire_value()));
            words.push((FT4222_SPI_SET_IO_LINES, lanes.lines()));
            words.push((FT4222_SPI_SET_CS_ACTIVE, FT4222_CS_ACTIVE_LOW));
            words.push((FT4222_SPI_SET_CS_MASK, 1 << cs));
            words.push((FT4222_SPI_RESET_TRANSACTION, 0));
        }
        Mode::SpiSlave { cpol, cpha } => {
            words.push((FT4222_SET_MODE, FT4222_MODE_SPI_SLAVE));
            words.push((FT4222_SPI_SET_CLK_IDLE, cpol.wire_value()));
            words.push((FT4222_SPI_SET_CAPTURE, cpha.wire_value()));
            words.push((FT4222_SPI_RESET_TRANSACTION, 0));
        }
        Mode::GpioOnly { directions } => {
            let mut mask = 0u8;
            for (i, dir) in directions.iter().enumerate() {
                if *dir == PinDirection::Output {
                    mask |= 1 << i;
                }
            }
            words.push((FT4222_SET_MODE, FT4222_MODE_GPIO));
            words.push((FT4222_GPIO_SET_DIR, mask));
        }
    }
    Ok(words)
}

/// Encode one transaction for the active mode
///
/// Mode compatibility is the registry's concern; the codec checks addresses
/// and FIFO ceilings and builds the frame. The fallback arm still rejects a
/// mismatched pair so the codec is safe to call on its own.
pub fn encode(req: &TransactionRequest<'_>, mode: &Mode) -> Result<CommandFrame> {
    match (*mode, *req) {
        (Mode::I2cMaster { .. }, TransactionRequest::Read { addr, len }) => {
            let addr = wire_addr(addr)?;
            check_len(len, I2C_FIFO_SIZE)?;
            let mut bulk_out = Vec::with_capacity(I2C_HEADER_SIZE);
            bulk_out.push(FT4222_BULK_I2C_READ);
            bulk_out.push(FT4222_I2C_FLAG_START_AND_STOP);
            bulk_out.extend_from_slice(&addr.to_le_bytes());
            bulk_out.extend_from_slice(&(len as u16).to_le_bytes());
            Ok(CommandFrame {
                config_words: Vec::new(),
                bulk_out,
                terminate: false,
                response_len: len,
            })
        }
        (Mode::I2cMaster { .. }, TransactionRequest::Write { addr, payload }) => {
            let addr = wire_addr(addr)?;
            check_len(payload.len(), I2C_FIFO_SIZE)?;
            let mut bulk_out = Vec::with_capacity(I2C_HEADER_SIZE + payload.len());
            bulk_out.push(FT4222_BULK_I2C_WRITE);
            bulk_out.push(FT4222_I2C_FLAG_START_AND_STOP);
            bulk_out.extend_from_slice(&addr.to_le_bytes());
            bulk_out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
            bulk_out.extend_from_slice(payload);
            Ok(CommandFrame {
                config_words: Vec::new(),
                bulk_out,
                terminate: false,
                response_len: 0,
            })
        }
        (
            Mode::I2cMaster { .. },
            TransactionRequest::WriteRead {
                addr,
                payload,
                read_len,
            },
        ) => {
            let addr = wire_addr(addr)?;
            check_len(payload.len(), I2C_FIFO_SIZE)?;
            check_len(read_len, I2C_FIFO_SIZE)?;
            let mut bulk_out = Vec::with_capacity(I2C_WRITE_READ_HEADER_SIZE + payload.len());
            bulk_out.push(FT4222_BULK_I2C_WRITE_READ);
            bulk_out.push(FT4222_I2C_FLAG_REPEATED_START);
            bulk_out.extend_from_slice(&addr.to_le_bytes());
            bulk_out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
            bulk_out.extend_from_slice(&(read_len as u16).to_le_bytes());
            bulk_out.extend_from_slice(payload);
            Ok(CommandFrame {
                config_words: Vec::new(),
                bulk_out,
                terminate: false,
                response_len: read_len,
            })
        }
        // Slave FIFO access; the address field of the request is ignored
        (Mode::I2cSlave { .. }, TransactionRequest::Read { len, .. }) => {
            check_len(len, I2C_FIFO_SIZE)?;
            let mut bulk_out = Vec::with_capacity(3);
            bulk_out.push(FT4222_BULK_I2C_SLAVE_READ);
            bulk_out.extend_from_slice(&(len as u16).to_le_bytes());
            Ok(CommandFrame {
                config_words: Vec::new(),
                bulk_out,
                terminate: false,
                response_len: len,
            })
        }
        (Mode::I2cSlave { .. }, TransactionRequest::Write { payload, .. }) => {
            check_len(payload.len(), I2C_FIFO_SIZE)?;
            let mut bulk_out = Vec::with_capacity(3 + payload.len());
            bulk_out.push(FT4222_BULK_I2C_SLAVE_WRITE);
            bulk_out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
            bulk_out.extend_from_slice(payload);
            Ok(CommandFrame {
                config_words: Vec::new(),
                bulk_out,
                terminate: false,
                response_len: 0,
            })
        }
        (Mode::SpiMaster { lanes, .. }, TransactionRequest::Transfer { tx, read_len }) => {
            match lanes {
                LaneCount::Single => {
                    // Full duplex: the read phase is clocked by dummy bytes
                    // and the response echoes the whole exchange
                    let total = tx.len() + read_len;
                    check_len(total, SPI_FIFO_SIZE)?;
                    let mut bulk_out = Vec::with_capacity(total);
                    bulk_out.extend_from_slice(tx);
                    bulk_out.resize(total, 0);
                    Ok(CommandFrame {
                        config_words: Vec::new(),
                        bulk_out,
                        terminate: true,
                        response_len: total,
                    })
                }
                LaneCount::Dual | LaneCount::Quad => {
                    check_len(tx.len(), SPI_FIFO_SIZE)?;
                    check_len(read_len, SPI_FIFO_SIZE)?;
                    let mut bulk_out = Vec::with_capacity(MULTI_IO_HEADER_SIZE + tx.len());
                    // No single-I/O phase; both lengths cover the multi
                    // phase only
                    bulk_out.push(MULTI_IO_MAGIC);
                    bulk_out.extend_from_slice(&(tx.len() as u16).to_le_bytes());
                    bulk_out.extend_from_slice(&(read_len as u16).to_le_bytes());
                    bulk_out.extend_from_slice(tx);
                    Ok(CommandFrame {
                        config_words: Vec::new(),
                        bulk_out,
                        terminate: true,
                        response_len: read_len,
                    })
                }
            }
        }
        (Mode::SpiSlave { .. }, TransactionRequest::Transfer { tx, read_len }) => {
            check_len(tx.len(), SPI_FIFO_SIZE)?;
            check_len(read_len, SPI_FIFO_SIZE)?;
            let mut bulk_out = Vec::with_capacity(5 + tx.len());
            bulk_out.push(FT4222_BULK_SPI_SLAVE_XFER);
            bulk_out.extend_from_slice(&(tx.len() as u16).to_le_bytes());
            bulk_out.extend_from_slice(&(read_len as u16).to_le_bytes());
            bulk_out.extend_from_slice(tx);
            Ok(CommandFrame {
                config_words: Vec::new(),
                bulk_out,
                terminate: false,
                response_len: read_len,
            })
        }
        (Mode::GpioOnly { .. }, TransactionRequest::GpioSet { pin, level }) => Ok(CommandFrame {
            config_words: Vec::new(),
            bulk_out: alloc::vec![FT4222_BULK_GPIO_SET, pin.index(), level as u8],
            terminate: false,
            response_len: 0,
        }),
        (Mode::GpioOnly { .. }, TransactionRequest::GpioRead { pin }) => Ok(CommandFrame {
            config_words: Vec::new(),
            bulk_out: alloc::vec![FT4222_BULK_GPIO_READ, pin.index()],
            terminate: false,
            response_len: 1,
        }),
        _ => Err(Error::Incompatible {
            active: mode.kind(),
            requested: req.kind(),
        }),
    }
}

/// Decode a response frame against the expected payload length
///
/// The status word travels first and wins: a failure bit fails the
/// transaction even when the rest of the frame looks well formed, because
/// trailing bytes may be stale FIFO contents.
pub fn decode(frame: &[u8], response_len: usize) -> TransactionResult {
    if frame.len() < MODEM_STATUS_SIZE {
        return TransactionResult::Fail {
            kind: FailureKind::Protocol,
            status: ChipStatus::empty(),
        };
    }
    let status = ChipStatus::from_bytes(frame[0], frame[1]);
    if let Some(kind) = status.failure() {
        return TransactionResult::Fail { kind, status };
    }
    if status.is_busy() {
        // A full response landed while the controller claims to be busy
        return TransactionResult::Fail {
            kind: FailureKind::Protocol,
            status,
        };
    }
    let data = &frame[MODEM_STATUS_SIZE..];
    if data.len() != response_len {
        return TransactionResult::Fail {
            kind: FailureKind::Protocol,
            status,
        };
    }
    if response_len == 0 {
        TransactionResult::Ack { status }
    } else {
        TransactionResult::Data {
            bytes: data.to_vec(),
            status,
        }
    }
}

fn wire_addr(addr: u16) -> Result<u16> {
    if addr <= 0x7F {
        Ok(addr)
    } else if addr <= 0x3FF {
        Ok(addr | FT4222_I2C_ADDR_10BIT)
    } else {
        Err(Error::InvalidAddress)
    }
}

fn check_len(len: usize, max: usize) -> Result<()> {
    if len > max {
        Err(Error::PayloadTooLarge { len, max })
    } else {
        Ok(())
    }
}
