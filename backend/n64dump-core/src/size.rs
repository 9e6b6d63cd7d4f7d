//! ROM size detection by mirror probing.
//!
//! Cartridges rarely decode every address line, so the ROM image repeats past its real end. The
//! smallest candidate size whose start address holds a copy of the first 16 ROM bytes is taken
//! as the ROM size. A ROM whose opening bytes repeat throughout (e.g. all zero) matches the first
//! candidate regardless of its real size.

use crate::bus::{BusError, BusPins, CartBus};
use crate::cartridge::REFERENCE_SAMPLE_LEN;
use crate::read::WordReader;
use n64dump_config::MEGABYTE;

/// Probe each candidate (in MB, ascending) and return the first whose mirror address matches
/// `reference`, or the last candidate if none match.
///
/// # Errors
///
/// Propagates any bus read error.
pub fn detect_size<P: BusPins, R: WordReader<P>>(
    bus: &mut CartBus<P, R>,
    rom_base_address: u32,
    reference: &[u8; REFERENCE_SAMPLE_LEN],
    candidates_mb: &[u32],
) -> Result<u32, BusError> {
    let mut sample = [0; REFERENCE_SAMPLE_LEN];

    for &size_mb in candidates_mb {
        let mirror_address = rom_base_address.wrapping_add(size_mb.wrapping_mul(MEGABYTE));

        bus.set_address(mirror_address);
        bus.read_into(&mut sample)?;

        if &sample == reference {
            log::info!("ROM mirrors at {mirror_address:08X}; detected size {size_mb}MB");
            return Ok(size_mb);
        }

        log::debug!("No mirror at {mirror_address:08X} ({size_mb}MB)");
    }

    let default_mb = candidates_mb.last().copied().unwrap_or(0);
    log::warn!("No mirroring found at any candidate size; assuming {default_mb}MB");

    Ok(default_mb)
}
