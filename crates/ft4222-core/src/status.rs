//! Chip status word
//!
//! Every bulk response frame from the chip starts with two little-endian
//! status bytes, and the same word can be polled out of band through the
//! vendor status query. The low byte follows the I2C controller status
//! layout of the vendor library; the high byte carries FIFO health bits
//! shared by all modes.

use bitflags::bitflags;

use crate::error::FailureKind;

bitflags! {
    /// Status word reported by the chip with every response
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ChipStatus: u16 {
        /// Controller still working on a previous transaction
        const BUSY = 1 << 0;
        /// Error condition latched
        const ERROR = 1 << 1;
        /// Slave address byte was not acknowledged
        const ADDRESS_NACK = 1 << 2;
        /// Data byte was not acknowledged
        const DATA_NACK = 1 << 3;
        /// Arbitration lost to another bus master
        const ARB_LOST = 1 << 4;
        /// Controller idle
        const IDLE = 1 << 5;
        /// Bus held by some master (possibly this one)
        const BUS_BUSY = 1 << 6;
        /// Receive FIFO overran before the host drained it
        const RX_OVERRUN = 1 << 8;
        /// Transmit FIFO ran dry mid-transfer
        const TX_UNDERRUN = 1 << 9;

        /// Either NACK bit
        const ANY_NACK = Self::ADDRESS_NACK.bits() | Self::DATA_NACK.bits();
    }
}

impl Default for ChipStatus {
    fn default() -> Self {
        Self::IDLE
    }
}

impl ChipStatus {
    /// Builds the status word from the two leading response bytes
    pub fn from_bytes(lo: u8, hi: u8) -> Self {
        // Reserved bits are kept so diagnostics see the raw word
        Self::from_bits_retain(u16::from_le_bytes([lo, hi]))
    }

    /// Little-endian wire encoding, as the chip transmits it
    pub fn to_bytes(self) -> [u8; 2] {
        self.bits().to_le_bytes()
    }

    /// Whether the controller is still working
    pub fn is_busy(self) -> bool {
        self.contains(Self::BUSY)
    }

    /// Maps latched failure bits to a failure kind, most specific first
    ///
    /// Arbitration loss outranks the NACK bits because losing the bus also
    /// leaves a NACK latched on this controller.
    pub fn failure(self) -> Option<FailureKind> {
        if self.contains(Self::ARB_LOST) {
            Some(FailureKind::ArbitrationLost)
        } else if self.intersects(Self::ANY_NACK) {
            Some(FailureKind::Nack)
        } else if self.contains(Self::RX_OVERRUN) {
            Some(FailureKind::Overrun)
        } else if self.contains(Self::TX_UNDERRUN) {
            Some(FailureKind::Underrun)
        } else if self.contains(Self::ERROR) {
            Some(FailureKind::Protocol)
        } else {
            None
        }
    }
}
