use crate::bus::{BusError, BusPins, CartBus};
use crate::cartridge::{self, CartridgeHeader};
use crate::database::DatabaseSource;
use crate::read::WordReader;
use crate::size;
use crate::transport::{DumpTransport, LinePoll, START_COMMAND};
use crc::Crc;
use n64dump_config::{ConfigError, DumperConfig, MEGABYTE, rom_end_address};
use std::thread;
use thiserror::Error;

const CRC: Crc<u32> = Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

/// On/off activity light, pulsed as the sweep crosses progress boundaries.
pub trait ProgressIndicator {
    fn set(&mut self, on: bool);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullIndicator;

impl ProgressIndicator for NullIndicator {
    fn set(&mut self, _on: bool) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DumpState {
    #[default]
    Idle,
    Identifying,
    SizeResolving,
    Dumping,
    Complete,
}

#[derive(Debug, Error)]
pub enum DumpError<TErr> {
    #[error("Cartridge bus error: {0}")]
    Bus(#[from] BusError),
    #[error("Transport error: {0}")]
    Transport(TErr),
    #[error("Cannot dump {total_bytes} bytes from {base:08X}: length must be even and fit in the address space")]
    InvalidLength { base: u32, total_bytes: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpSummary {
    pub name: String,
    pub checksum: String,
    pub size_mb: u32,
    pub bytes_streamed: u64,
    pub crc32: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub bytes_streamed: u64,
    pub crc32: u32,
}

/// Drives a dump from cartridge identification through the final completion marker.
///
/// Errors are never retried. A failed step leaves [`state`](Self::state) at the step that
/// failed, and nothing read by a failed step is handed to the transport.
pub struct Dumper<P, R, T, I = NullIndicator> {
    bus: CartBus<P, R>,
    transport: T,
    indicator: I,
    config: DumperConfig,
    database: Option<DatabaseSource>,
    state: DumpState,
}

impl<P: BusPins, R: WordReader<P>, T: DumpTransport> Dumper<P, R, T> {
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(
        bus: CartBus<P, R>,
        transport: T,
        config: DumperConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            bus,
            transport,
            indicator: NullIndicator,
            config,
            database: None,
            state: DumpState::Idle,
        })
    }
}

impl<P: BusPins, R: WordReader<P>, T: DumpTransport, I: ProgressIndicator> Dumper<P, R, T, I> {
    #[must_use]
    pub fn with_indicator<I2: ProgressIndicator>(self, indicator: I2) -> Dumper<P, R, T, I2> {
        Dumper {
            bus: self.bus,
            transport: self.transport,
            indicator,
            config: self.config,
            database: self.database,
            state: self.state,
        }
    }

    #[must_use]
    pub fn with_database(mut self, database: DatabaseSource) -> Self {
        self.database = Some(database);
        self
    }

    #[must_use]
    pub fn state(&self) -> DumpState {
        self.state
    }

    #[must_use]
    pub fn config(&self) -> &DumperConfig {
        &self.config
    }

    #[must_use]
    pub fn bus(&self) -> &CartBus<P, R> {
        &self.bus
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    #[must_use]
    pub fn indicator(&self) -> &I {
        &self.indicator
    }

    #[must_use]
    pub fn into_parts(self) -> (CartBus<P, R>, T, I) {
        (self.bus, self.transport, self.indicator)
    }

    /// Run the whole session: identify, resolve the size, announce the cartridge, wait for the
    /// host, stream the ROM, and send the completion marker.
    ///
    /// # Errors
    ///
    /// Returns an error on any bus or transport failure.
    pub fn run(&mut self) -> Result<DumpSummary, DumpError<T::Err>> {
        let header = self.identify()?;
        let size_mb = self.resolve_size(&header)?;

        let name = header.name();
        self.transport.send_cart_info(&name, size_mb).map_err(DumpError::Transport)?;

        self.state = DumpState::Dumping;
        self.await_start()?;

        let stats = self.dump_rom(size_mb.saturating_mul(MEGABYTE))?;

        Ok(DumpSummary {
            name,
            checksum: header.checksum_hex(),
            size_mb,
            bytes_streamed: stats.bytes_streamed,
            crc32: stats.crc32,
        })
    }

    /// Reset the cartridge and read its header.
    ///
    /// # Errors
    ///
    /// Returns an error if the header read fails.
    pub fn identify(&mut self) -> Result<CartridgeHeader, DumpError<T::Err>> {
        self.state = DumpState::Identifying;

        self.bus.reset_cartridge();
        let header = cartridge::read_header(&mut self.bus, self.config.rom_base_address)?;

        Ok(header)
    }

    /// Determine the ROM size in megabytes, preferring the checksum database over mirror probing.
    ///
    /// Database failures of any kind fall back to probing.
    ///
    /// # Errors
    ///
    /// Returns an error if a probe read fails.
    pub fn resolve_size(&mut self, header: &CartridgeHeader) -> Result<u32, DumpError<T::Err>> {
        self.state = DumpState::SizeResolving;

        let checksum = header.checksum_hex();
        if let Some(database) = &self.database {
            match database.lookup(&checksum) {
                Ok(entry) => {
                    let fits = entry.size_mb != 0
                        && rom_end_address(self.config.rom_base_address, entry.size_mb).is_some();
                    if fits {
                        log::info!(
                            "Checksum {checksum} matches '{}' in database: {}MB, save type {}",
                            entry.name,
                            entry.size_mb,
                            entry.save_type
                        );
                        return Ok(entry.size_mb);
                    }

                    log::warn!(
                        "Database size of {}MB for checksum {checksum} is out of range; probing instead",
                        entry.size_mb
                    );
                }
                Err(err) => {
                    log::warn!("{err}; probing ROM size instead");
                }
            }
        }

        let size_mb = size::detect_size(
            &mut self.bus,
            self.config.rom_base_address,
            &header.reference_sample(),
            &self.config.size_candidates_mb,
        )?;

        Ok(size_mb)
    }

    /// Poll the transport until the host sends the start command. Waits indefinitely.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport fails while polling.
    pub fn await_start(&mut self) -> Result<(), DumpError<T::Err>> {
        log::info!("Waiting for host to send {START_COMMAND}");

        let interval = self.config.handshake_poll_interval();
        loop {
            match self.transport.poll_line().map_err(DumpError::Transport)? {
                LinePoll::Line(line) if line.trim() == START_COMMAND => return Ok(()),
                LinePoll::Line(line) => {
                    log::debug!("Ignoring host line '{line}' while waiting for {START_COMMAND}");
                }
                LinePoll::Pending => thread::sleep(interval),
            }
        }
    }

    /// Stream `total_bytes` bytes starting at the ROM base address, one chunk per address latch,
    /// then send the completion marker.
    ///
    /// # Errors
    ///
    /// Returns an error if the length is odd or overflows the address space, or on any bus or
    /// transport failure.
    pub fn dump_rom(&mut self, total_bytes: u32) -> Result<SweepStats, DumpError<T::Err>> {
        self.state = DumpState::Dumping;

        let base = self.config.rom_base_address;
        let end = match base.checked_add(total_bytes) {
            Some(end) if total_bytes % 2 == 0 => end,
            _ => return Err(DumpError::InvalidLength { base, total_bytes }),
        };

        log::info!("Dumping {total_bytes} bytes from {base:08X}");

        let chunk_size = self.config.chunk_size;
        let progress_mask = self.config.progress_mask;
        let mut buffer = vec![0; chunk_size];
        let mut digest = CRC.digest();
        let mut bytes_streamed = 0_u64;

        let mut address = base;
        while address < end {
            let len = chunk_size.min((end - address) as usize);
            let chunk = &mut buffer[..len];

            self.bus.set_address(address);
            self.bus.read_into(chunk)?;

            self.transport.write_chunk(chunk).map_err(DumpError::Transport)?;
            digest.update(chunk);
            bytes_streamed += len as u64;

            let marker = address & progress_mask == 0;
            self.indicator.set(marker);
            if marker {
                log::debug!(
                    "Progress: {:.1}%",
                    (bytes_streamed as f64) / f64::from(total_bytes) * 100.0
                );
            }
            log::trace!("Sent {len}-byte chunk from {address:08X}");

            address += len as u32;
        }

        self.transport.send_complete().map_err(DumpError::Transport)?;
        self.state = DumpState::Complete;

        let crc32 = digest.finalize();
        log::info!("Dump complete: {bytes_streamed} bytes, CRC32 {crc32:08X}");

        Ok(SweepStats { bytes_streamed, crc32 })
    }
}

#[cfg(test)]
mod tests;
