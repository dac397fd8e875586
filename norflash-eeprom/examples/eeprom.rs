//! Walk through the three EEPROM stacks over a simulated flash part.
//!
//! Run with `cargo run --example eeprom`.

use anyhow::Context;
use norflash_device::{FakeFlashDevice, FlashDevice};
use norflash_eeprom::devices;

const PAGE: u32 = 4096;

fn main() -> anyhow::Result<()> {
    // A 512 KiB simulated part, carved into three independent regions.
    let mut flash = FakeFlashDevice::new(128, PAGE);

    // Region 1: the full stack. Bytes are freely rewritable and cheap:
    // up to seven destructive writes per byte before any page erase.
    {
        let mut eeprom = devices::create_address_erase(&mut flash, 0, 64 * PAGE, 2)
            .context("failed to create address-erase EEPROM")?;
        println!(
            "address-erase EEPROM: {} bytes usable of {} raw",
            eeprom.length(),
            64 * PAGE
        );

        eeprom.write_str("counter:", 0)?;
        for value in 0u8..20 {
            eeprom.write_erase_byte(value, 8)?;
        }
        println!("  byte 8 after 20 rewrites: {}", eeprom.read_byte(8)?);
    }

    // Region 2: wear levelling only. Page erases relocate, so repeated
    // rewrites spread across the pool instead of hammering one sector.
    {
        let mut eeprom =
            devices::create_wear_level_erase(&mut flash, 64 * PAGE, 120 * PAGE, 2)
                .context("failed to create wear-level EEPROM")?;
        eeprom.write_str("settings v1", 100)?;
        eeprom.write_str("settings v2", 100)?;

        let mut out = [0u8; 11];
        eeprom.read(100, &mut out)?;
        println!("wear-level EEPROM: {}", core::str::from_utf8(&out)?);
    }

    // Region 3: a log FIFO over the remaining pages.
    {
        let mut log = devices::create_circular_buffer(&mut flash, 120 * PAGE, 128 * PAGE)
            .context("failed to create circular buffer")?;
        for i in 0..3 {
            let line = format!("event {}\n", i);
            log.write(line.as_bytes());
        }

        let mut out = vec![0u8; log.available()];
        let n = log.read(&mut out);
        print!("circular buffer drained {} bytes:\n{}", n, String::from_utf8_lossy(&out[..n]));
    }

    Ok(())
}
