//! Scan an I2C bus for responding devices.
//!
//! Configures the FT4222H as a 100 kHz I2C master and probes every valid
//! 7-bit address with a one byte read. Addresses that acknowledge are
//! printed; everything else NACKs, which is the expected outcome for an
//! empty address.
//!
//! Run with `RUST_LOG=debug` for transfer-level detail.

use ft4222_core::mode::Mode;
use ft4222_core::request::TransactionResult;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let device = ft4222_usb::open()?;
    device.configure(Mode::I2cMaster { clock_hz: 100_000 })?;

    println!("scanning 0x08..=0x77");
    let mut found = 0;
    for addr in 0x08u16..=0x77 {
        match device.i2c_read(addr, 1)? {
            TransactionResult::Data { .. } | TransactionResult::Ack { .. } => {
                println!("  0x{:02X} responded", addr);
                found += 1;
            }
            TransactionResult::Fail { kind, .. } => {
                log::trace!("0x{:02X}: {}", addr, kind);
            }
        }
    }
    println!("{} device(s) found", found);

    device.close();
    Ok(())
}
