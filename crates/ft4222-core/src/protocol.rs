//! FT4222H vendor protocol constants
//!
//! The FT4222H uses a vendor-specific USB protocol (no libftdi/MPSSE).
//! Configuration travels over vendor control transfers, data over a bulk
//! endpoint pair. The reset and SPI command blocks follow flashprog's
//! ft4222 driver; the I2C, GPIO and slave-FIFO blocks use the same
//! register scheme on the neighbouring command ranges.

// ============================================================================
// USB device identifiers
// ============================================================================

/// FTDI vendor ID
pub const FTDI_VID: u16 = 0x0403;
/// FT4222H product ID
pub const FT4222H_PID: u16 = 0x601C;

// ============================================================================
// Control requests
// ============================================================================

/// Reset request: wValue selects the reset or flush action
pub const FT4222_RESET_REQUEST: u8 = 0x00;
/// Info request: wValue selects the query, data stage carries the answer
pub const FT4222_INFO_REQUEST: u8 = 0x20;
/// Config request: wValue carries command and data byte together
pub const FT4222_CONFIG_REQUEST: u8 = 0x21;

// Reset command values (wValue for RESET_REQUEST)

/// Reset the serial interface engine
pub const FT4222_RESET_SIO: u16 = 0x0000;
/// Flush the chip-to-host FIFO
pub const FT4222_OUTPUT_FLUSH: u16 = 0x0001;
/// Flush the host-to-chip FIFO
pub const FT4222_INPUT_FLUSH: u16 = 0x0002;

// Info command values (wValue for INFO_REQUEST)

/// Chip and LibFT4222 versions, 12 bytes of three big-endian words
pub const FT4222_GET_VERSION: u16 = 0x0000;
/// Chip configuration block, 13 bytes starting with the chip mode
pub const FT4222_GET_CONFIG: u16 = 0x0001;
/// Controller status word, 2 bytes little endian
pub const FT4222_GET_STATUS: u16 = 0x0002;

// Config command codes (lower byte of wValue for CONFIG_REQUEST).
// The data byte goes in the upper byte: wValue = (data << 8) | cmd

/// Select the system clock
pub const FT4222_SET_CLOCK: u8 = 0x04;
/// Select the chip function
pub const FT4222_SET_MODE: u8 = 0x05;
/// Number of SPI I/O lines for the data phase
pub const FT4222_SPI_SET_IO_LINES: u8 = 0x42;
/// Chip select polarity
pub const FT4222_SPI_SET_CS_ACTIVE: u8 = 0x43;
/// SPI clock divisor register value
pub const FT4222_SPI_SET_CLK_DIV: u8 = 0x44;
/// SPI clock idle level (CPOL)
pub const FT4222_SPI_SET_CLK_IDLE: u8 = 0x45;
/// SPI data capture edge (CPHA)
pub const FT4222_SPI_SET_CAPTURE: u8 = 0x46;
/// Bitmask of driven chip select lines
pub const FT4222_SPI_SET_CS_MASK: u8 = 0x48;
/// Abort the SPI transaction in progress
pub const FT4222_SPI_RESET_TRANSACTION: u8 = 0x49;
/// Reset the SPI controller
pub const FT4222_SPI_RESET: u8 = 0x4A;
/// Reset the I2C controller
pub const FT4222_I2C_RESET: u8 = 0x52;
/// Low byte of the I2C bus speed in kbps
pub const FT4222_I2C_SET_CLK_LO: u8 = 0x53;
/// High byte of the I2C bus speed in kbps
pub const FT4222_I2C_SET_CLK_HI: u8 = 0x54;
/// Own address for I2C slave operation
pub const FT4222_I2C_SET_ADDRESS: u8 = 0x55;
/// GPIO direction bitmask, set bits drive the pin
pub const FT4222_GPIO_SET_DIR: u8 = 0x61;

// Mode values (data byte for SET_MODE)

/// I2C bus master
pub const FT4222_MODE_I2C_MASTER: u8 = 1;
/// I2C slave
pub const FT4222_MODE_I2C_SLAVE: u8 = 2;
/// SPI bus master
pub const FT4222_MODE_SPI_MASTER: u8 = 3;
/// SPI slave
pub const FT4222_MODE_SPI_SLAVE: u8 = 4;
/// All pins as GPIO
pub const FT4222_MODE_GPIO: u8 = 5;

// Clock polarity and phase (data bytes)

/// Clock idles low
pub const FT4222_CLK_IDLE_LOW: u8 = 0;
/// Clock idles high
pub const FT4222_CLK_IDLE_HIGH: u8 = 1;
/// Sample on the leading edge
pub const FT4222_CLK_CAPTURE_LEADING: u8 = 0;
/// Sample on the trailing edge
pub const FT4222_CLK_CAPTURE_TRAILING: u8 = 1;

// CS polarity (data byte for SPI_SET_CS_ACTIVE)

/// Chip select asserted low
pub const FT4222_CS_ACTIVE_LOW: u8 = 0;
/// Chip select asserted high
pub const FT4222_CS_ACTIVE_HIGH: u8 = 1;

/// Pack a config command and its data byte into the wValue word
pub const fn config_word(cmd: u8, data: u8) -> u16 {
    ((data as u16) << 8) | cmd as u16
}

// ============================================================================
// Bulk command opcodes
// ============================================================================

/// I2C master write, `[op, flags, addr u16 LE, len u16 LE, payload..]`
pub const FT4222_BULK_I2C_WRITE: u8 = 0xD1;
/// I2C master read, `[op, flags, addr u16 LE, len u16 LE]`
pub const FT4222_BULK_I2C_READ: u8 = 0xD2;
/// I2C master write-then-read,
/// `[op, flags, addr u16 LE, wlen u16 LE, rlen u16 LE, payload..]`
pub const FT4222_BULK_I2C_WRITE_READ: u8 = 0xD3;
/// I2C slave: drain the receive FIFO, `[op, len u16 LE]`
pub const FT4222_BULK_I2C_SLAVE_READ: u8 = 0xD8;
/// I2C slave: load the respond FIFO, `[op, len u16 LE, payload..]`
pub const FT4222_BULK_I2C_SLAVE_WRITE: u8 = 0xD9;
/// SPI slave: load tx FIFO and drain rx FIFO in one exchange,
/// `[op, wlen u16 LE, rlen u16 LE, payload..]`
pub const FT4222_BULK_SPI_SLAVE_XFER: u8 = 0xDA;
/// GPIO: latch one pin, `[op, pin, level]`
pub const FT4222_BULK_GPIO_SET: u8 = 0xE1;
/// GPIO: sample one pin, `[op, pin]`
pub const FT4222_BULK_GPIO_READ: u8 = 0xE2;

// I2C condition flags (LibFT4222 values)

/// No start or stop condition around this chunk
pub const FT4222_I2C_FLAG_NONE: u8 = 0x80;
/// Issue a start condition
pub const FT4222_I2C_FLAG_START: u8 = 0x02;
/// Issue a repeated start without releasing the bus
pub const FT4222_I2C_FLAG_REPEATED_START: u8 = 0x03;
/// Issue a stop condition
pub const FT4222_I2C_FLAG_STOP: u8 = 0x04;
/// Complete transaction: start, payload, stop
pub const FT4222_I2C_FLAG_START_AND_STOP: u8 = 0x06;

/// Bit 15 of the wire address field marks a 10-bit address
pub const FT4222_I2C_ADDR_10BIT: u16 = 0x8000;

// ============================================================================
// Frame and FIFO sizes
// ============================================================================

/// Status bytes at the start of each response frame
pub const MODEM_STATUS_SIZE: usize = 2;

/// I2C master frame header: opcode, flags, address, one length field
pub const I2C_HEADER_SIZE: usize = 6;

/// Write-read header carries a second length field for the read phase
pub const I2C_WRITE_READ_HEADER_SIZE: usize = 8;

/// SPI FIFO depth, the per-transaction ceiling in SPI modes
pub const SPI_FIFO_SIZE: usize = 2048;

/// I2C FIFO depth, the per-transaction ceiling in I2C modes
pub const I2C_FIFO_SIZE: usize = 256;

/// Slowest supported I2C bus speed in kbps
pub const I2C_MIN_SPEED_KBPS: u32 = 60;
/// Fastest supported I2C bus speed in kbps (high-speed mode)
pub const I2C_MAX_SPEED_KBPS: u32 = 3400;

// ============================================================================
// Multi-I/O header format
// ============================================================================

/// Multi-I/O header size (5 bytes)
/// Format: | 4-bit 0x8 | 4-bit single_len | 2B multi_write_len | 2B multi_read_len |
pub const MULTI_IO_HEADER_SIZE: usize = 5;

/// Multi-I/O header magic nibble
pub const MULTI_IO_MAGIC: u8 = 0x80;

/// Maximum single-I/O bytes in multi-I/O command (4 bits = 0-15)
pub const MULTI_IO_MAX_SINGLE: usize = 15;

/// Maximum multi-I/O bytes in each direction (16 bits = 0-65535)
pub const MULTI_IO_MAX_DATA: usize = 65535;
