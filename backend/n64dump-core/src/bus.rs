use crate::read::{CoprocessorError, WordReader};
use n64dump_common::num::{GetBit, U16Ext, U32Ext};
use thiserror::Error;

pub const BUS_WIDTH: u8 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Level {
    #[default]
    Low = 0,
    High = 1,
}

impl Level {
    #[inline]
    #[must_use]
    pub fn from_bit(bit: bool) -> Self {
        if bit { Self::High } else { Self::Low }
    }

    #[inline]
    #[must_use]
    pub fn is_high(self) -> bool {
        self == Self::High
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    Input,
    Output,
}

/// Cartridge control lines. All of them are active-low.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlLine {
    WriteEnable,
    ReadEnable,
    LatchLow,
    LatchHigh,
    Reset,
}

impl ControlLine {
    pub const ALL: [Self; 5] =
        [Self::WriteEnable, Self::ReadEnable, Self::LatchLow, Self::LatchHigh, Self::Reset];
}

/// Raw handles for the 16 multiplexed address/data lines and the 5 control lines.
///
/// Bus lines are numbered 0-15; line *i* carries bit *i* of both the address halves and the
/// data word.
pub trait BusPins {
    fn set_line_mode(&mut self, line: u8, mode: PinMode);

    fn write_line(&mut self, line: u8, level: Level);

    fn read_line(&mut self, line: u8) -> Level;

    fn write_control(&mut self, line: ControlLine, level: Level);

    fn delay_us(&mut self, micros: u32);
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Attempted to read a word before any address was latched")]
    AddressNotLatched,
    #[error("Read engine used before its timing co-processor was started")]
    NotInitialized,
    #[error("Timing co-processor error: {0}")]
    Coprocessor(#[from] CoprocessorError),
}

/// Exclusive owner of the bus pins and the word read engine.
///
/// Reads are sequential: the cartridge advances its internal address after every word, so a
/// single [`set_address`](Self::set_address) can be followed by any number of reads.
#[derive(Debug)]
pub struct CartBus<P, R> {
    pins: P,
    reader: R,
    address_latched: bool,
}

impl<P: BusPins, R: WordReader<P>> CartBus<P, R> {
    pub fn new(pins: P, reader: R) -> Self {
        Self { pins, reader, address_latched: false }
    }

    /// Hold the cartridge in reset while the control lines settle, then release it.
    pub fn reset_cartridge(&mut self) {
        self.drive_bus_low();

        self.pins.write_control(ControlLine::Reset, Level::Low);
        self.pins.write_control(ControlLine::WriteEnable, Level::High);
        if !self.reader.owns_read_enable() {
            self.pins.write_control(ControlLine::ReadEnable, Level::High);
        }
        self.pins.write_control(ControlLine::LatchLow, Level::Low);
        self.pins.write_control(ControlLine::LatchHigh, Level::High);

        self.pins.delay_us(1);

        self.pins.write_control(ControlLine::Reset, Level::High);
        self.address_latched = false;

        log::debug!("Cartridge reset released");
    }

    /// Latch `address` into the cartridge in two 16-bit phases, high half first, and leave the
    /// bus lines as inputs ready for data.
    pub fn set_address(&mut self, address: u32) {
        self.drive_bus_low();

        self.pins.write_control(ControlLine::WriteEnable, Level::High);
        if !self.reader.owns_read_enable() {
            self.pins.write_control(ControlLine::ReadEnable, Level::High);
        }
        self.pins.write_control(ControlLine::LatchLow, Level::High);
        self.pins.write_control(ControlLine::LatchHigh, Level::High);

        self.drive_bus(address.high_word());
        self.pulse(ControlLine::LatchHigh);

        self.drive_bus(address.low_word());
        self.pulse(ControlLine::LatchLow);

        for line in 0..BUS_WIDTH {
            self.pins.set_line_mode(line, PinMode::Input);
        }

        self.address_latched = true;
    }

    /// Read the word at the current cartridge address.
    ///
    /// Blocks until the read engine delivers a word; there is no timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if no address has been latched or the read engine is not running.
    pub fn read_word(&mut self) -> Result<u16, BusError> {
        if !self.address_latched {
            return Err(BusError::AddressNotLatched);
        }

        self.reader.read_word(&mut self.pins)
    }

    /// Fill `buffer` with consecutive words, each word stored high byte first.
    ///
    /// # Errors
    ///
    /// Propagates any error from [`read_word`](Self::read_word).
    ///
    /// # Panics
    ///
    /// Panics if `buffer` has an odd length.
    pub fn read_into(&mut self, buffer: &mut [u8]) -> Result<(), BusError> {
        assert!(buffer.len() % 2 == 0, "odd buffer length {}", buffer.len());

        for pair in buffer.chunks_exact_mut(2) {
            let word = self.read_word()?;
            pair.copy_from_slice(&word.to_be_pair());
        }

        Ok(())
    }

    #[must_use]
    pub fn pins(&self) -> &P {
        &self.pins
    }

    #[must_use]
    pub fn reader(&self) -> &R {
        &self.reader
    }

    #[must_use]
    pub fn into_parts(self) -> (P, R) {
        (self.pins, self.reader)
    }

    fn drive_bus_low(&mut self) {
        for line in 0..BUS_WIDTH {
            self.pins.set_line_mode(line, PinMode::Output);
            self.pins.write_line(line, Level::Low);
        }
    }

    fn drive_bus(&mut self, value: u16) {
        for line in 0..BUS_WIDTH {
            self.pins.write_line(line, Level::from_bit(value.bit(line)));
        }
    }

    fn pulse(&mut self, line: ControlLine) {
        self.pins.write_control(line, Level::Low);
        self.pins.write_control(line, Level::High);
    }
}
