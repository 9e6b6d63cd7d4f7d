use super::*;
use crate::database::ChecksumDatabase;
use crate::read::{PolledReader, ReadEngine, TimedReader};
use crate::sim::{SimCartridge, SimCoprocessor, SimPins};
use crate::transport::{COMPLETE_MARKER, SerialTransport};
use n64dump_config::{DEFAULT_ROM_BASE_ADDRESS, ReadStrategy};
use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use test_log::test;

const BASE: u32 = DEFAULT_ROM_BASE_ADDRESS;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    CartInfo(String, u32),
    Chunk(Vec<u8>),
    Complete,
}

#[derive(Default)]
struct RecordingTransport {
    events: Vec<Event>,
    lines: VecDeque<LinePoll>,
    polls: usize,
    fail_on_chunk: Option<usize>,
    fail_on_complete: bool,
}

impl RecordingTransport {
    fn ready() -> Self {
        Self { lines: VecDeque::from([LinePoll::Line(START_COMMAND.into())]), ..Self::default() }
    }

    fn chunks(&self) -> Vec<&[u8]> {
        self.events
            .iter()
            .filter_map(|event| match event {
                Event::Chunk(chunk) => Some(chunk.as_slice()),
                _ => None,
            })
            .collect()
    }
}

impl DumpTransport for RecordingTransport {
    type Err = io::Error;

    fn send_cart_info(&mut self, name: &str, size_mb: u32) -> Result<(), Self::Err> {
        self.events.push(Event::CartInfo(name.into(), size_mb));
        Ok(())
    }

    fn poll_line(&mut self) -> Result<LinePoll, Self::Err> {
        self.polls += 1;
        Ok(self.lines.pop_front().unwrap_or(LinePoll::Pending))
    }

    fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), Self::Err> {
        if self.fail_on_chunk == Some(self.chunks().len()) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "host went away"));
        }

        self.events.push(Event::Chunk(chunk.to_vec()));
        Ok(())
    }

    fn send_complete(&mut self) -> Result<(), Self::Err> {
        if self.fail_on_complete {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "host went away"));
        }

        self.events.push(Event::Complete);
        Ok(())
    }
}

#[derive(Default)]
struct RecordingIndicator {
    history: Vec<bool>,
}

impl ProgressIndicator for RecordingIndicator {
    fn set(&mut self, on: bool) {
        self.history.push(on);
    }
}

fn test_config() -> DumperConfig {
    DumperConfig {
        handshake_poll_interval_ms: 0,
        size_candidates_mb: vec![1, 2, 4],
        ..DumperConfig::default()
    }
}

/// ROM image with a recognizable header and content that does not repeat within `len` bytes.
fn test_rom(len: usize) -> Vec<u8> {
    let mut rom: Vec<u8> =
        (0..len).map(|i| (i ^ (i >> 7) ^ (i >> 15) ^ (i >> 21)) as u8).collect();
    rom[..4].copy_from_slice(&[0x80, 0x37, 0x12, 0x40]);
    rom[0x10..0x14].copy_from_slice(&[0xAB, 0xCD, 0xEF, 0x01]);
    rom[0x20..0x34].copy_from_slice(b"PIPELINE TEST       ");
    rom
}

fn polled_dumper(
    rom: Vec<u8>,
    transport: RecordingTransport,
) -> (SimCartridge, Dumper<SimPins, PolledReader, RecordingTransport>) {
    let cart = SimCartridge::new(rom);
    let bus = CartBus::new(cart.pins(), PolledReader);
    let dumper = Dumper::new(bus, transport, test_config()).unwrap();
    (cart, dumper)
}

#[test]
fn sweep_latches_once_per_chunk() {
    let rom = test_rom(2048);
    let (cart, mut dumper) = polled_dumper(rom.clone(), RecordingTransport::ready());

    let stats = dumper.dump_rom(2048).unwrap();

    assert_eq!(cart.latched_addresses(), vec![BASE, BASE + 512, BASE + 1024, BASE + 1536]);

    let (_, transport, _) = dumper.into_parts();
    let expected: Vec<_> = rom
        .chunks(512)
        .map(|chunk| Event::Chunk(chunk.to_vec()))
        .chain([Event::Complete])
        .collect();
    assert_eq!(transport.events, expected);

    assert_eq!(stats.bytes_streamed, 2048);
    assert_eq!(stats.crc32, CRC.checksum(&rom));
}

#[test]
fn sweep_reaches_complete_state() {
    let (_, mut dumper) = polled_dumper(test_rom(1024), RecordingTransport::ready());
    assert_eq!(dumper.state(), DumpState::Idle);

    dumper.dump_rom(1024).unwrap();
    assert_eq!(dumper.state(), DumpState::Complete);
}

#[test]
fn indicator_follows_progress_boundaries() {
    let config = DumperConfig { progress_mask: 0x3FF, ..test_config() };
    let cart = SimCartridge::new(test_rom(2048));
    let bus = CartBus::new(cart.pins(), PolledReader);
    let mut dumper = Dumper::new(bus, RecordingTransport::ready(), config)
        .unwrap()
        .with_indicator(RecordingIndicator::default());

    dumper.dump_rom(2048).unwrap();

    assert_eq!(dumper.indicator().history, vec![true, false, true, false]);
}

#[test]
fn odd_or_overflowing_length_is_rejected() {
    let (_, mut dumper) = polled_dumper(test_rom(64), RecordingTransport::ready());
    assert!(matches!(dumper.dump_rom(511), Err(DumpError::InvalidLength { .. })));
    assert!(matches!(dumper.dump_rom(u32::MAX - 1), Err(DumpError::InvalidLength { .. })));
    assert!(dumper.transport().events.is_empty());
}

#[test]
fn full_run_probes_size_and_streams_rom() {
    let rom = test_rom(MEGABYTE as usize);
    let cart = SimCartridge::new(rom.clone());
    let engine =
        ReadEngine::from_strategy(ReadStrategy::HardwareTimed, 28, cart.coprocessor()).unwrap();
    let bus = CartBus::new(cart.pins(), engine);
    let mut dumper = Dumper::new(bus, RecordingTransport::ready(), test_config()).unwrap();

    let summary = dumper.run().unwrap();

    assert_eq!(
        summary,
        DumpSummary {
            name: "PIPELINE TEST".into(),
            checksum: "ABCDEF01".into(),
            size_mb: 1,
            bytes_streamed: u64::from(MEGABYTE),
            crc32: CRC.checksum(&rom),
        }
    );
    assert_eq!(dumper.state(), DumpState::Complete);
    assert_eq!(cart.read_enable_conflicts(), 0);

    let (_, transport, _) = dumper.into_parts();
    assert_eq!(transport.events.first(), Some(&Event::CartInfo("PIPELINE TEST".into(), 1)));
    assert_eq!(transport.events.last(), Some(&Event::Complete));
    assert_eq!(transport.chunks().concat(), rom);
}

#[test]
fn database_size_takes_priority() {
    let database = ChecksumDatabase::parse("Pipeline Test\nABCDEF01,2,0\n\n");
    let (cart, dumper) = polled_dumper(test_rom(MEGABYTE as usize), RecordingTransport::ready());
    let mut dumper = dumper.with_database(DatabaseSource::Loaded(database));

    let header = dumper.identify().unwrap();
    cart.clear_latch_log();
    assert_eq!(dumper.resolve_size(&header).unwrap(), 2);

    // No mirror probes were needed
    assert!(cart.latched_addresses().is_empty());
    assert_eq!(dumper.state(), DumpState::SizeResolving);
}

#[test]
fn database_failures_fall_back_to_probing() {
    let sources = [
        DatabaseSource::Loaded(ChecksumDatabase::parse("Other\n12345678,8,0\n\n")),
        DatabaseSource::Loaded(ChecksumDatabase::parse("Broken\nABCDEF01,big,0\n\n")),
        DatabaseSource::Loaded(ChecksumDatabase::parse("Too big\nABCDEF01,4096,0\n\n")),
        DatabaseSource::File(PathBuf::from("/nonexistent/n64dump/database.txt")),
    ];

    for source in sources {
        let (cart, dumper) = polled_dumper(test_rom(MEGABYTE as usize), RecordingTransport::ready());
        let mut dumper = dumper.with_database(source);

        let header = dumper.identify().unwrap();
        cart.clear_latch_log();

        assert_eq!(dumper.resolve_size(&header).unwrap(), 1);
        assert_eq!(cart.latched_addresses(), vec![BASE + MEGABYTE]);
    }
}

#[test]
fn handshake_ignores_other_lines_until_start() {
    let transport = RecordingTransport {
        lines: VecDeque::from([
            LinePoll::Pending,
            LinePoll::Line("HELLO".into()),
            LinePoll::Pending,
            LinePoll::Line(format!("  {START_COMMAND}  ")),
        ]),
        ..RecordingTransport::default()
    };
    let (_, mut dumper) = polled_dumper(test_rom(64), transport);

    dumper.await_start().unwrap();
    assert_eq!(dumper.transport().polls, 4);
}

#[test]
fn closed_serial_link_ends_handshake() {
    let cart = SimCartridge::new(test_rom(64));
    let bus = CartBus::new(cart.pins(), PolledReader);
    let transport = SerialTransport::new(io::empty(), Vec::new());
    let mut dumper = Dumper::new(bus, transport, test_config()).unwrap();

    let result = dumper.await_start();

    assert!(
        matches!(result, Err(DumpError::Transport(err)) if err.kind() == io::ErrorKind::UnexpectedEof)
    );
}

#[test]
fn uninitialized_read_engine_halts_before_any_output() {
    let cart = SimCartridge::new(test_rom(2048));
    let reader: TimedReader<SimCoprocessor> = TimedReader::new(cart.coprocessor());
    let bus = CartBus::new(cart.pins(), reader);
    let mut dumper = Dumper::new(bus, RecordingTransport::ready(), test_config()).unwrap();

    let result = dumper.run();

    assert!(matches!(result, Err(DumpError::Bus(BusError::NotInitialized))));
    assert_eq!(dumper.state(), DumpState::Identifying);
    assert!(dumper.transport().events.is_empty());
}

#[test]
fn transport_failure_stops_sweep_without_completion() {
    let transport = RecordingTransport { fail_on_chunk: Some(2), ..RecordingTransport::ready() };
    let (cart, mut dumper) = polled_dumper(test_rom(2048), transport);

    let result = dumper.dump_rom(2048);

    assert!(matches!(result, Err(DumpError::Transport(_))));
    assert_eq!(dumper.state(), DumpState::Dumping);
    assert_eq!(dumper.transport().chunks().len(), 2);
    assert!(!dumper.transport().events.contains(&Event::Complete));
    assert_eq!(cart.latched_addresses().len(), 3);
}

#[test]
fn failed_completion_marker_leaves_state_dumping() {
    let transport = RecordingTransport { fail_on_complete: true, ..RecordingTransport::ready() };
    let (_, mut dumper) = polled_dumper(test_rom(1024), transport);

    let result = dumper.dump_rom(1024);

    assert!(matches!(result, Err(DumpError::Transport(_))));
    assert_eq!(dumper.state(), DumpState::Dumping);
    assert_eq!(dumper.transport().chunks().len(), 2);
}

#[test]
fn invalid_config_is_rejected() {
    let cart = SimCartridge::new(test_rom(64));
    let bus = CartBus::new(cart.pins(), PolledReader);
    let config = DumperConfig { chunk_size: 100, ..test_config() };

    assert!(matches!(
        Dumper::new(bus, RecordingTransport::ready(), config),
        Err(ConfigError::InvalidChunkSize(100))
    ));
}

#[test]
fn serial_session_end_to_end() {
    let rom = test_rom(2048);
    let cart = SimCartridge::new(rom.clone());
    let bus = CartBus::new(cart.pins(), PolledReader);
    let transport = SerialTransport::new(&b"START_DUMP\n"[..], Vec::new());
    let config = DumperConfig { size_candidates_mb: vec![1], ..test_config() };
    let mut dumper = Dumper::new(bus, transport, config).unwrap();

    let header = dumper.identify().unwrap();
    dumper.transport.send_cart_info(&header.name(), 0).unwrap();
    dumper.await_start().unwrap();
    dumper.dump_rom(2048).unwrap();

    let (_, transport, _) = dumper.into_parts();
    let (_, written) = transport.into_inner();

    let mut expected = b"CART_INFO:PIPELINE TEST,0\n".to_vec();
    expected.extend_from_slice(&rom);
    expected.extend_from_slice(COMPLETE_MARKER.as_bytes());
    expected.push(b'\n');
    assert_eq!(written, expected);
}
