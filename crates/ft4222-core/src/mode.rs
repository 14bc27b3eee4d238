//! Chip function modes and the mode registry
//!
//! The FT4222H multiplexes one command channel across five functions: I2C
//! master, I2C slave, SPI master, SPI slave and GPIO. Exactly one is active
//! at a time. The registry tracks the committed mode and rejects requests
//! the active function cannot execute, before anything touches the wire.

use crate::clock::ClockConfig;
use crate::error::{Error, ModeRejection, Result};
use crate::protocol::{I2C_MAX_SPEED_KBPS, I2C_MIN_SPEED_KBPS};

/// Number of SPI I/O lines used for the data phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LaneCount {
    /// Single I/O (standard SPI: 1-1-1)
    #[default]
    Single = 1,
    /// Dual I/O (1-1-2 or 1-2-2)
    Dual = 2,
    /// Quad I/O (1-1-4 or 1-4-4 or 4-4-4)
    Quad = 4,
}

impl LaneCount {
    /// Get the number of I/O lines
    pub fn lines(self) -> u8 {
        self as u8
    }
}

/// SPI clock idle level (CPOL)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockPolarity {
    /// Clock idles low
    #[default]
    IdleLow,
    /// Clock idles high
    IdleHigh,
}

impl ClockPolarity {
    /// Data byte for the clock idle config command
    pub fn wire_value(self) -> u8 {
        match self {
            ClockPolarity::IdleLow => crate::protocol::FT4222_CLK_IDLE_LOW,
            ClockPolarity::IdleHigh => crate::protocol::FT4222_CLK_IDLE_HIGH,
        }
    }
}

/// SPI data capture edge (CPHA)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockPhase {
    /// Sample on the leading clock edge
    #[default]
    CaptureLeading,
    /// Sample on the trailing clock edge
    CaptureTrailing,
}

impl ClockPhase {
    /// Data byte for the capture edge config command
    pub fn wire_value(self) -> u8 {
        match self {
            ClockPhase::CaptureLeading => crate::protocol::FT4222_CLK_CAPTURE_LEADING,
            ClockPhase::CaptureTrailing => crate::protocol::FT4222_CLK_CAPTURE_TRAILING,
        }
    }
}

/// Direction of one GPIO pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PinDirection {
    /// High-impedance input
    #[default]
    Input,
    /// Push-pull output
    Output,
}

/// One of the chip's four GPIO pins
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpioPin {
    /// Pin 0
    P0 = 0,
    /// Pin 1
    P1 = 1,
    /// Pin 2
    P2 = 2,
    /// Pin 3
    P3 = 3,
}

impl GpioPin {
    /// All pins, in register order
    pub const ALL: [GpioPin; 4] = [GpioPin::P0, GpioPin::P1, GpioPin::P2, GpioPin::P3];

    /// Get the pin index (0-3)
    pub fn index(self) -> u8 {
        self as u8
    }

    /// Pin for a register index, if in range
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(GpioPin::P0),
            1 => Some(GpioPin::P1),
            2 => Some(GpioPin::P2),
            3 => Some(GpioPin::P3),
            _ => None,
        }
    }
}

/// Active chip function with its parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Power-on state; only a mode change is accepted
    #[default]
    Uninitialized,
    /// I2C bus master
    I2cMaster {
        /// Bus speed in Hz; must be a whole number of kbps within
        /// 60 kbps to 3.4 Mbps
        clock_hz: u32,
    },
    /// I2C slave with the given own address
    I2cSlave {
        /// Own 7-bit address; the reserved blocks at both ends of the
        /// address space are not assignable
        address: u16,
    },
    /// SPI bus master
    SpiMaster {
        /// I/O lines for the data phase
        lanes: LaneCount,
        /// Derived SPI clock
        clock: ClockConfig,
        /// Clock idle level
        cpol: ClockPolarity,
        /// Data capture edge
        cpha: ClockPhase,
        /// Chip select line (0-3)
        cs: u8,
    },
    /// SPI slave; the external master supplies the clock
    SpiSlave {
        /// Clock idle level
        cpol: ClockPolarity,
        /// Data capture edge
        cpha: ClockPhase,
    },
    /// All four pins as GPIO
    GpioOnly {
        /// Per-pin directions, indexed by pin number
        directions: [PinDirection; 4],
    },
}

/// Mode discriminant, for error reporting and compatibility checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeKind {
    /// Power-on state
    Uninitialized,
    /// I2C bus master
    I2cMaster,
    /// I2C slave
    I2cSlave,
    /// SPI bus master
    SpiMaster,
    /// SPI slave
    SpiSlave,
    /// All pins as GPIO
    Gpio,
}

impl core::fmt::Display for ModeKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::I2cMaster => write!(f, "I2C master"),
            Self::I2cSlave => write!(f, "I2C slave"),
            Self::SpiMaster => write!(f, "SPI master"),
            Self::SpiSlave => write!(f, "SPI slave"),
            Self::Gpio => write!(f, "GPIO"),
        }
    }
}

/// Operation tags used for mode compatibility checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    /// I2C read (master: addressed; slave: FIFO drain)
    Read,
    /// I2C write (master: addressed; slave: FIFO load)
    Write,
    /// I2C write-then-read with repeated start
    WriteRead,
    /// SPI transfer
    Transfer,
    /// Latch a GPIO output
    GpioSet,
    /// Sample a GPIO pin
    GpioRead,
}

impl OpKind {
    /// Every operation tag, for table-driven tests
    pub const ALL: [OpKind; 6] = [
        OpKind::Read,
        OpKind::Write,
        OpKind::WriteRead,
        OpKind::Transfer,
        OpKind::GpioSet,
        OpKind::GpioRead,
    ];
}

impl core::fmt::Display for OpKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
            Self::WriteRead => write!(f, "write-read"),
            Self::Transfer => write!(f, "transfer"),
            Self::GpioSet => write!(f, "GPIO set"),
            Self::GpioRead => write!(f, "GPIO read"),
        }
    }
}

impl Mode {
    /// Get the discriminant
    pub fn kind(&self) -> ModeKind {
        match self {
            Mode::Uninitialized => ModeKind::Uninitialized,
            Mode::I2cMaster { .. } => ModeKind::I2cMaster,
            Mode::I2cSlave { .. } => ModeKind::I2cSlave,
            Mode::SpiMaster { .. } => ModeKind::SpiMaster,
            Mode::SpiSlave { .. } => ModeKind::SpiSlave,
            Mode::GpioOnly { .. } => ModeKind::Gpio,
        }
    }

    /// Whether the active function can execute the given operation
    pub fn accepts(&self, op: OpKind) -> bool {
        match (self.kind(), op) {
            (ModeKind::I2cMaster, OpKind::Read | OpKind::Write | OpKind::WriteRead) => true,
            // Slave FIFO access reuses the read/write tags; the address
            // field of those requests is ignored
            (ModeKind::I2cSlave, OpKind::Read | OpKind::Write) => true,
            (ModeKind::SpiMaster | ModeKind::SpiSlave, OpKind::Transfer) => true,
            (ModeKind::Gpio, OpKind::GpioSet | OpKind::GpioRead) => true,
            _ => false,
        }
    }

    /// Per-transaction payload ceiling of the function's FIFO
    pub fn fifo_capacity(&self) -> usize {
        match self.kind() {
            ModeKind::SpiMaster | ModeKind::SpiSlave => crate::protocol::SPI_FIFO_SIZE,
            ModeKind::I2cMaster | ModeKind::I2cSlave => crate::protocol::I2C_FIFO_SIZE,
            // GPIO frames carry no payload; Uninitialized accepts nothing
            ModeKind::Gpio | ModeKind::Uninitialized => 0,
        }
    }

    /// Check the parameters before anything is sent to the chip
    pub fn validate(&self) -> core::result::Result<(), ModeRejection> {
        match *self {
            Mode::Uninitialized => Err(ModeRejection::NotConfigurable),
            Mode::I2cMaster { clock_hz } => {
                let kbps = clock_hz / 1000;
                if clock_hz == 0 || clock_hz % 1000 != 0 {
                    return Err(ModeRejection::UnsupportedClock);
                }
                if !(I2C_MIN_SPEED_KBPS..=I2C_MAX_SPEED_KBPS).contains(&kbps) {
                    return Err(ModeRejection::UnsupportedClock);
                }
                Ok(())
            }
            Mode::I2cSlave { address } => {
                // 0x00-0x07 and 0x78-0x7F are reserved by the bus spec
                if (0x08..=0x77).contains(&address) {
                    Ok(())
                } else {
                    Err(ModeRejection::InvalidSlaveAddress)
                }
            }
            Mode::SpiMaster { cs, .. } => {
                if cs <= 3 {
                    Ok(())
                } else {
                    Err(ModeRejection::InvalidChipSelect)
                }
            }
            Mode::SpiSlave { .. } | Mode::GpioOnly { .. } => Ok(()),
        }
    }
}

/// Tracks the committed chip function
///
/// The active mode changes only through [`commit`](Self::commit), which the
/// engine calls after the chip acknowledged the new configuration. A failed
/// or refused configure leaves the previous mode in place.
#[derive(Debug, Default)]
pub struct ModeRegistry {
    active: Mode,
}

impl ModeRegistry {
    /// Registry in the power-on state
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the committed mode
    pub fn current(&self) -> &Mode {
        &self.active
    }

    /// Reject the operation unless the committed mode accepts it
    pub fn assert_compatible(&self, op: OpKind) -> Result<()> {
        if self.active.accepts(op) {
            Ok(())
        } else {
            Err(Error::Incompatible {
                active: self.active.kind(),
                requested: op,
            })
        }
    }

    /// Record a chip-acknowledged mode change
    pub fn commit(&mut self, mode: Mode) {
        self.active = mode;
    }

    /// Drop back to the power-on state
    pub fn reset(&mut self) {
        self.active = Mode::Uninitialized;
    }
}
