use anyhow::Context;
use clap::Parser;
use env_logger::Env;
use n64dump_config::{DumperConfig, ReadStrategy};
use n64dump_core::sim::{SimCartridge, SimTiming};
use n64dump_core::{
    CartBus, DatabaseSource, DumpSummary, DumpTransport, Dumper, FileSink, ProgressIndicator,
    ReadEngine, SerialTransport,
};
use std::error::Error;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const BENCH_OPTIONS_HEADING: &str = "Bench Options";
const OUTPUT_OPTIONS_HEADING: &str = "Output Options";

/// Dump a ROM image through the emulated cartridge bus
#[derive(Parser)]
struct Args {
    /// ROM image to load into the emulated cartridge
    #[arg(short = 'f', long)]
    file_path: PathBuf,

    /// TOML file with dumper settings; command-line options take precedence
    #[arg(long)]
    config: Option<PathBuf>,

    /// Word read engine (software-polled / hardware-timed)
    #[arg(long, help_heading = BENCH_OPTIONS_HEADING)]
    read_strategy: Option<ReadStrategy>,

    /// Read-enable hold time for the timing co-processor, in co-processor cycles
    #[arg(long, help_heading = BENCH_OPTIONS_HEADING)]
    hold_cycles: Option<u8>,

    /// Bytes read per address latch
    #[arg(long, help_heading = BENCH_OPTIONS_HEADING)]
    chunk_size: Option<usize>,

    /// Checksum database used to look up the ROM size before probing
    #[arg(long, help_heading = BENCH_OPTIONS_HEADING)]
    database: Option<PathBuf>,

    /// Write the dump to this file
    #[arg(short = 'o', long, help_heading = OUTPUT_OPTIONS_HEADING)]
    output: Option<PathBuf>,

    /// Run a serial session over stdin/stdout instead of writing a file
    #[arg(long, default_value_t, conflicts_with = "output", help_heading = OUTPUT_OPTIONS_HEADING)]
    serial: bool,
}

impl Args {
    fn dumper_config(&self) -> anyhow::Result<DumperConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => DumperConfig::default(),
        };

        if let Some(read_strategy) = self.read_strategy {
            config.read_strategy = read_strategy;
        }
        if let Some(hold_cycles) = self.hold_cycles {
            config.hold_cycles = hold_cycles;
        }
        if let Some(chunk_size) = self.chunk_size {
            config.chunk_size = chunk_size;
        }

        config.validate()?;

        Ok(config)
    }
}

fn load_config(path: &Path) -> anyhow::Result<DumperConfig> {
    let config_str = fs::read_to_string(path)
        .with_context(|| format!("Unable to read config file at '{}'", path.display()))?;
    let config = toml::from_str(&config_str)
        .with_context(|| format!("Unable to parse config file at '{}'", path.display()))?;

    log::info!("Loaded config from '{}'", path.display());

    Ok(config)
}

/// Stands in for the activity LED.
#[derive(Debug, Default)]
struct LogIndicator {
    lit: bool,
}

impl ProgressIndicator for LogIndicator {
    fn set(&mut self, on: bool) {
        if on != self.lit {
            log::trace!("Activity LED {}", if on { "on" } else { "off" });
        }
        self.lit = on;
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = args.dumper_config()?;

    let rom = fs::read(&args.file_path)
        .with_context(|| format!("Unable to read ROM image at '{}'", args.file_path.display()))?;
    log::info!(
        "Loaded {} bytes from '{}'; dumping with {} reads",
        rom.len(),
        args.file_path.display(),
        config.read_strategy
    );

    let database = args.database.clone().map(DatabaseSource::File);

    let summary = if args.serial {
        let transport = SerialTransport::new(io::stdin(), io::stdout().lock());
        run_dump(rom, config, database, transport)?
    } else {
        let Some(output) = &args.output else {
            anyhow::bail!("One of --output or --serial is required");
        };
        let transport = FileSink::create(output)
            .with_context(|| format!("Unable to create output file at '{}'", output.display()))?;
        run_dump(rom, config, database, transport)?
    };

    log::info!(
        "Dumped '{}' ({}MB, checksum {}): {} bytes, CRC32 {:08X}",
        summary.name,
        summary.size_mb,
        summary.checksum,
        summary.bytes_streamed,
        summary.crc32
    );

    Ok(())
}

fn run_dump<T>(
    rom: Vec<u8>,
    config: DumperConfig,
    database: Option<DatabaseSource>,
    transport: T,
) -> anyhow::Result<DumpSummary>
where
    T: DumpTransport,
    T::Err: Error + Send + Sync + 'static,
{
    let cart = SimCartridge::with_timing(rom, config.rom_base_address, SimTiming::default());
    let engine =
        ReadEngine::from_strategy(config.read_strategy, config.hold_cycles, cart.coprocessor())?;
    let bus = CartBus::new(cart.pins(), engine);

    let mut dumper = Dumper::new(bus, transport, config)?.with_indicator(LogIndicator::default());
    if let Some(database) = database {
        dumper = dumper.with_database(database);
    }

    let summary = dumper.run()?;

    let conflicts = cart.read_enable_conflicts();
    if conflicts != 0 {
        log::warn!("Read-enable was driven by both GPIO and the co-processor {conflicts} times");
    }

    Ok(summary)
}
