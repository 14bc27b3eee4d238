//! Clock tree of the FT4222H
//!
//! The chip runs from one of four selectable system clocks and derives the
//! SPI bit clock through a power-of-two divider. The I2C controller takes
//! its bus speed in kbps directly and does not use this divider tree.
//! The divider search follows flashprog's ft4222 driver.

/// System clock selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemClock {
    /// 60 MHz system clock
    Clock60MHz = 0,
    /// 24 MHz system clock
    Clock24MHz = 1,
    /// 48 MHz system clock
    Clock48MHz = 2,
    /// 80 MHz system clock
    Clock80MHz = 3,
}

impl SystemClock {
    /// Get the frequency in kHz
    pub fn to_khz(self) -> u32 {
        match self {
            SystemClock::Clock60MHz => 60_000,
            SystemClock::Clock24MHz => 24_000,
            SystemClock::Clock48MHz => 48_000,
            SystemClock::Clock80MHz => 80_000,
        }
    }

    /// Get the register index value
    pub fn index(self) -> u16 {
        self as u16
    }
}

/// SPI clock divisor (power of 2)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockDivisor {
    /// Divide by 2
    Div2 = 1,
    /// Divide by 4
    Div4 = 2,
    /// Divide by 8
    Div8 = 3,
    /// Divide by 16
    Div16 = 4,
    /// Divide by 32
    Div32 = 5,
    /// Divide by 64
    Div64 = 6,
    /// Divide by 128
    Div128 = 7,
    /// Divide by 256
    Div256 = 8,
    /// Divide by 512
    Div512 = 9,
}

impl ClockDivisor {
    /// Get the actual divisor value
    pub fn divisor(self) -> u32 {
        1 << (self as u32)
    }

    /// Get the register value
    pub fn value(self) -> u16 {
        self as u16
    }
}

/// Complete SPI clock configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockConfig {
    /// System clock selection
    pub sys_clock: SystemClock,
    /// Clock divisor
    pub divisor: ClockDivisor,
}

impl ClockConfig {
    /// Calculate the resulting SPI clock frequency in kHz
    pub fn spi_clock_khz(&self) -> u32 {
        self.sys_clock.to_khz() / self.divisor.divisor()
    }

    /// Find the configuration with the highest SPI clock not above `target_khz`
    ///
    /// Falls back to the slowest reachable clock (24 MHz / 512) when the
    /// target is below everything the divider tree can produce.
    pub fn for_target_khz(target_khz: u32) -> Self {
        // System clocks in order of preference; 60 MHz first because it
        // divides into the most useful SPI speeds
        const SYS_CLOCKS: [SystemClock; 4] = [
            SystemClock::Clock60MHz,
            SystemClock::Clock80MHz,
            SystemClock::Clock48MHz,
            SystemClock::Clock24MHz,
        ];

        const DIVISORS: [ClockDivisor; 9] = [
            ClockDivisor::Div2,
            ClockDivisor::Div4,
            ClockDivisor::Div8,
            ClockDivisor::Div16,
            ClockDivisor::Div32,
            ClockDivisor::Div64,
            ClockDivisor::Div128,
            ClockDivisor::Div256,
            ClockDivisor::Div512,
        ];

        let mut best: Option<ClockConfig> = None;
        let mut best_khz: u32 = 0;

        for &sys_clock in &SYS_CLOCKS {
            for &divisor in &DIVISORS {
                let speed = sys_clock.to_khz() / divisor.divisor();
                if speed <= target_khz && speed > best_khz {
                    best = Some(ClockConfig { sys_clock, divisor });
                    best_khz = speed;
                }
            }
        }

        best.unwrap_or(ClockConfig {
            sys_clock: SystemClock::Clock24MHz,
            divisor: ClockDivisor::Div512,
        })
    }
}
