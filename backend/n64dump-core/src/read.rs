mod program;

pub use program::{CoprocessorError, Instruction, MAX_DELAY, MAX_PROGRAM_LEN, ReadProgram};

use crate::bus::{BUS_WIDTH, BusError, BusPins, ControlLine, Level};
use n64dump_config::ReadStrategy;
use std::thread;

/// Samples one 16-bit word from the bus. Callers must latch an address first.
pub trait WordReader<P: BusPins> {
    /// # Errors
    ///
    /// Returns an error if the engine's backing hardware is not ready.
    fn read_word(&mut self, pins: &mut P) -> Result<u16, BusError>;

    /// Whether this engine drives the read-enable line itself. If so, nothing else may touch it.
    fn owns_read_enable(&self) -> bool {
        false
    }
}

impl<P: BusPins, R: WordReader<P> + ?Sized> WordReader<P> for &mut R {
    #[inline]
    fn read_word(&mut self, pins: &mut P) -> Result<u16, BusError> {
        (**self).read_word(pins)
    }

    #[inline]
    fn owns_read_enable(&self) -> bool {
        (**self).owns_read_enable()
    }
}

/// Drives read-enable and samples the data lines from the main control loop. The only timing
/// margin is however long the pin accesses take.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolledReader;

impl<P: BusPins> WordReader<P> for PolledReader {
    fn read_word(&mut self, pins: &mut P) -> Result<u16, BusError> {
        pins.write_control(ControlLine::ReadEnable, Level::Low);

        let mut word = 0;
        for line in 0..BUS_WIDTH {
            if pins.read_line(line).is_high() {
                word |= 1 << line;
            }
        }

        pins.write_control(ControlLine::ReadEnable, Level::High);

        Ok(word)
    }
}

/// A dedicated state machine that runs a [`ReadProgram`] with deterministic cycle timing.
///
/// Loading a program hands the read-enable line and the data inputs over to the co-processor.
pub trait TimingCoprocessor {
    /// # Errors
    ///
    /// Returns an error if the program does not fit in the co-processor.
    fn load(&mut self, program: &ReadProgram) -> Result<(), CoprocessorError>;

    /// Push one entry into the transmit FIFO, releasing a `WaitTrigger` instruction.
    fn push_trigger(&mut self);

    /// Pop a sampled word from the receive FIFO if one is available.
    fn try_pull(&mut self) -> Option<u16>;
}

#[derive(Debug)]
pub struct TimedReader<C> {
    coprocessor: C,
    running: bool,
}

impl<C: TimingCoprocessor> TimedReader<C> {
    pub fn new(coprocessor: C) -> Self {
        Self { coprocessor, running: false }
    }

    /// Load the word read program with the given read-enable hold time.
    ///
    /// # Errors
    ///
    /// Returns an error if the hold time is zero or the co-processor rejects the program.
    pub fn start(&mut self, hold_cycles: u8) -> Result<(), CoprocessorError> {
        let program = ReadProgram::word_read(hold_cycles)?;
        self.coprocessor.load(&program)?;
        self.running = true;

        log::info!(
            "Timing co-processor running word read program ({} instructions, hold {hold_cycles} cycles)",
            program.len()
        );

        Ok(())
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
    }

    #[must_use]
    pub fn coprocessor(&self) -> &C {
        &self.coprocessor
    }
}

impl<P: BusPins, C: TimingCoprocessor> WordReader<P> for TimedReader<C> {
    fn read_word(&mut self, _pins: &mut P) -> Result<u16, BusError> {
        if !self.running {
            return Err(BusError::NotInitialized);
        }

        self.coprocessor.push_trigger();
        loop {
            if let Some(word) = self.coprocessor.try_pull() {
                return Ok(word);
            }

            thread::yield_now();
        }
    }

    fn owns_read_enable(&self) -> bool {
        true
    }
}

/// Read engine selected once at startup.
#[derive(Debug)]
pub enum ReadEngine<C> {
    Polled(PolledReader),
    Timed(TimedReader<C>),
}

impl<C: TimingCoprocessor> ReadEngine<C> {
    /// Build the engine for `strategy`. The co-processor is only used, and only started, for
    /// [`ReadStrategy::HardwareTimed`].
    ///
    /// # Errors
    ///
    /// Returns an error if the timing co-processor fails to start.
    pub fn from_strategy(
        strategy: ReadStrategy,
        hold_cycles: u8,
        coprocessor: C,
    ) -> Result<Self, CoprocessorError> {
        match strategy {
            ReadStrategy::SoftwarePolled => Ok(Self::Polled(PolledReader)),
            ReadStrategy::HardwareTimed => {
                let mut reader = TimedReader::new(coprocessor);
                reader.start(hold_cycles)?;
                Ok(Self::Timed(reader))
            }
        }
    }

    #[must_use]
    pub fn strategy(&self) -> ReadStrategy {
        match self {
            Self::Polled(_) => ReadStrategy::SoftwarePolled,
            Self::Timed(_) => ReadStrategy::HardwareTimed,
        }
    }
}

impl<P: BusPins, C: TimingCoprocessor> WordReader<P> for ReadEngine<C> {
    #[inline]
    fn read_word(&mut self, pins: &mut P) -> Result<u16, BusError> {
        match self {
            Self::Polled(reader) => reader.read_word(pins),
            Self::Timed(reader) => reader.read_word(pins),
        }
    }

    #[inline]
    fn owns_read_enable(&self) -> bool {
        match self {
            Self::Polled(reader) => WordReader::<P>::owns_read_enable(reader),
            Self::Timed(reader) => WordReader::<P>::owns_read_enable(reader),
        }
    }
}
