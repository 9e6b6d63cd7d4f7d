//! Bus protocol engine for dumping cartridge ROMs over a multiplexed 16-bit address/data bus.
//!
//! The address is latched in two halves through the same 16 lines that later carry data, after
//! which words are read sequentially. Reads can be sampled either from the main control loop or
//! by a timing co-processor running a fixed micro-program.

pub mod bus;
pub mod cartridge;
pub mod database;
pub mod pipeline;
pub mod read;
pub mod sim;
pub mod size;
pub mod transport;

pub use bus::{BusError, BusPins, CartBus, ControlLine, Level, PinMode};
pub use cartridge::CartridgeHeader;
pub use database::{ChecksumDatabase, DatabaseEntry, DatabaseSource, LookupError};
pub use pipeline::{
    DumpError, DumpState, DumpSummary, Dumper, NullIndicator, ProgressIndicator, SweepStats,
};
pub use read::{PolledReader, ReadEngine, TimedReader, TimingCoprocessor, WordReader};
pub use transport::{DumpTransport, FileSink, LinePoll, SerialTransport};
