use std::fmt::{Display, Formatter};
use std::time::Duration;
use thiserror::Error;

/// Cartridge ROM starts at this address on the multiplexed bus.
pub const DEFAULT_ROM_BASE_ADDRESS: u32 = 0x1000_0000;

pub const DEFAULT_CHUNK_SIZE: usize = 512;

/// Read-enable hold time for the timing co-processor, in co-processor cycles. Cartridges were
/// observed to need somewhere between 25 and 30 cycles at the configured clock.
pub const DEFAULT_HOLD_CYCLES: u8 = 28;

pub const DEFAULT_SIZE_CANDIDATES_MB: &[u32] = &[4, 8, 12, 16, 32, 64];

pub const DEFAULT_HANDSHAKE_POLL_INTERVAL_MS: u64 = 100;

/// Indicator toggles on every 16KB boundary.
pub const DEFAULT_PROGRESS_MASK: u32 = 0x3FFF;

pub const MEGABYTE: u32 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum ReadStrategy {
    /// Toggle read-enable and sample the data lines from the main control loop
    #[default]
    SoftwarePolled,
    /// Offload read-enable timing and sampling to the timing co-processor
    HardwareTimed,
}

impl Display for ReadStrategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SoftwarePolled => write!(f, "SoftwarePolled"),
            Self::HardwareTimed => write!(f, "HardwareTimed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Chunk size must be a nonzero power of two, was {0}")]
    InvalidChunkSize(usize),
    #[error("Read-enable hold time must be at least 1 cycle")]
    ZeroHoldCycles,
    #[error("Size candidate list is empty")]
    NoSizeCandidates,
    #[error("Size candidates must be nonzero and strictly ascending: {0:?}")]
    UnsortedSizeCandidates(Vec<u32>),
    #[error("ROM of {size_mb}MB at base {base:08X} does not fit in the 32-bit address space")]
    AddressOverflow { base: u32, size_mb: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DumperConfig {
    pub rom_base_address: u32,
    pub chunk_size: usize,
    pub read_strategy: ReadStrategy,
    pub hold_cycles: u8,
    pub size_candidates_mb: Vec<u32>,
    pub handshake_poll_interval_ms: u64,
    pub progress_mask: u32,
}

impl Default for DumperConfig {
    fn default() -> Self {
        Self {
            rom_base_address: DEFAULT_ROM_BASE_ADDRESS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            read_strategy: ReadStrategy::default(),
            hold_cycles: DEFAULT_HOLD_CYCLES,
            size_candidates_mb: DEFAULT_SIZE_CANDIDATES_MB.to_vec(),
            handshake_poll_interval_ms: DEFAULT_HANDSHAKE_POLL_INTERVAL_MS,
            progress_mask: DEFAULT_PROGRESS_MASK,
        }
    }
}

impl DumperConfig {
    /// # Errors
    ///
    /// Returns an error if the chunk size is not a power of two, the hold time is zero, or the
    /// size candidates are empty, unsorted, or would run past the end of the address space.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size < 2 || !self.chunk_size.is_power_of_two() {
            return Err(ConfigError::InvalidChunkSize(self.chunk_size));
        }

        if self.hold_cycles == 0 {
            return Err(ConfigError::ZeroHoldCycles);
        }

        let Some(&largest) = self.size_candidates_mb.last() else {
            return Err(ConfigError::NoSizeCandidates);
        };

        let ascending = self.size_candidates_mb[0] != 0
            && self.size_candidates_mb.windows(2).all(|pair| pair[0] < pair[1]);
        if !ascending {
            return Err(ConfigError::UnsortedSizeCandidates(self.size_candidates_mb.clone()));
        }

        // The probe for the largest candidate addresses one byte past a ROM of that size
        if rom_end_address(self.rom_base_address, largest).is_none() {
            return Err(ConfigError::AddressOverflow {
                base: self.rom_base_address,
                size_mb: largest,
            });
        }

        Ok(())
    }

    #[must_use]
    pub fn handshake_poll_interval(&self) -> Duration {
        Duration::from_millis(self.handshake_poll_interval_ms)
    }
}

/// Address one past the end of a ROM of `size_mb` megabytes starting at `base`, or `None` if that
/// address does not fit in 32 bits.
#[must_use]
pub fn rom_end_address(base: u32, size_mb: u32) -> Option<u32> {
    size_mb.checked_mul(MEGABYTE).and_then(|size| base.checked_add(size))
}
