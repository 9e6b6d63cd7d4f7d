use crate::bus::{BusError, BusPins, CartBus};
use crate::read::WordReader;
use std::ops::Range;

pub const HEADER_LEN: usize = 64;

pub const REFERENCE_SAMPLE_LEN: usize = 16;

const CHECKSUM_RANGE: Range<usize> = 0x10..0x14;
const NAME_RANGE: Range<usize> = 0x20..0x34;
const GAME_CODE_RANGE: Range<usize> = 0x3B..0x3F;
const REVISION_OFFSET: usize = 0x3F;

pub const UNKNOWN_NAME: &str = "UNKNOWN";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartridgeHeader {
    bytes: [u8; HEADER_LEN],
}

impl CartridgeHeader {
    #[must_use]
    pub fn from_bytes(bytes: [u8; HEADER_LEN]) -> Self {
        Self { bytes }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; HEADER_LEN] {
        &self.bytes
    }

    #[must_use]
    pub fn checksum(&self) -> [u8; 4] {
        let mut checksum = [0; 4];
        checksum.copy_from_slice(&self.bytes[CHECKSUM_RANGE]);
        checksum
    }

    /// Checksum bytes as 8 uppercase hex digits, the key used by the checksum database.
    #[must_use]
    pub fn checksum_hex(&self) -> String {
        self.checksum().iter().map(|byte| format!("{byte:02X}")).collect()
    }

    /// Internal name with trailing NUL and whitespace padding removed. Names that are not valid
    /// UTF-8 come back as [`UNKNOWN_NAME`].
    #[must_use]
    pub fn name(&self) -> String {
        match std::str::from_utf8(&self.bytes[NAME_RANGE]) {
            Ok(name) => name.trim_end_matches(|c: char| c == '\0' || c.is_whitespace()).into(),
            Err(err) => {
                log::warn!("Cartridge name is not valid UTF-8 ({err}); using '{UNKNOWN_NAME}'");
                UNKNOWN_NAME.into()
            }
        }
    }

    /// Media category, 2-character game id and region code, with non-printable bytes shown as
    /// `?`.
    #[must_use]
    pub fn game_code(&self) -> String {
        self.bytes[GAME_CODE_RANGE]
            .iter()
            .map(|&b| if b.is_ascii_graphic() { char::from(b) } else { '?' })
            .collect()
    }

    #[must_use]
    pub fn revision(&self) -> u8 {
        self.bytes[REVISION_OFFSET]
    }

    /// First 16 ROM bytes, compared against candidate mirror locations during size detection.
    #[must_use]
    pub fn reference_sample(&self) -> [u8; REFERENCE_SAMPLE_LEN] {
        let mut sample = [0; REFERENCE_SAMPLE_LEN];
        sample.copy_from_slice(&self.bytes[..REFERENCE_SAMPLE_LEN]);
        sample
    }
}

/// Read the fixed-size header at the ROM base address.
///
/// # Errors
///
/// Propagates any bus read error.
pub fn read_header<P: BusPins, R: WordReader<P>>(
    bus: &mut CartBus<P, R>,
    rom_base_address: u32,
) -> Result<CartridgeHeader, BusError> {
    let mut bytes = [0; HEADER_LEN];
    bus.set_address(rom_base_address);
    bus.read_into(&mut bytes)?;

    let header = CartridgeHeader::from_bytes(bytes);
    log::info!(
        "Cartridge header: name='{}', checksum={}, game code={}, revision={}",
        header.name(),
        header.checksum_hex(),
        header.game_code(),
        header.revision()
    );

    Ok(header)
}
