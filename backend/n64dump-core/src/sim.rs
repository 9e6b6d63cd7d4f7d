//! Emulated cartridge bench.
//!
//! [`SimCartridge`] models the external side of the bus: two address latches fed from the
//! multiplexed lines, a ROM that drives the lines while read-enable is low, and an internal
//! address that advances by one word on every read-enable release. Addresses past the end of
//! the ROM image wrap around, the way incompletely decoded cartridges mirror their contents.
//!
//! All bench handles share one cycle counter so the co-processor and GPIO accesses are timed
//! against the same clock.

mod coprocessor;

pub use coprocessor::SimCoprocessor;

use crate::bus::{BUS_WIDTH, BusPins, ControlLine, Level, PinMode};
use n64dump_common::num::GetBit;
use n64dump_config::DEFAULT_ROM_BASE_ADDRESS;
use std::cell::RefCell;
use std::rc::Rc;

/// Value seen on undriven bus lines (pulled high).
pub const OPEN_BUS: u16 = 0xFFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimTiming {
    /// Cycles after read-enable asserts before the ROM's output is valid
    pub access_cycles: u32,
    /// Cycles consumed by every GPIO access from the main control loop
    pub gpio_cycles: u32,
    pub cycles_per_us: u32,
}

impl Default for SimTiming {
    fn default() -> Self {
        Self { access_cycles: 24, gpio_cycles: 32, cycles_per_us: 125 }
    }
}

#[derive(Debug)]
struct CartState {
    rom: Vec<u8>,
    base_address: u32,
    timing: SimTiming,
    cycle: u64,
    line_modes: [PinMode; BUS_WIDTH as usize],
    line_levels: [Level; BUS_WIDTH as usize],
    control: [Level; ControlLine::ALL.len()],
    latch_high: u16,
    latch_low: u16,
    address: u32,
    latch_log: Vec<u32>,
    read_enable_asserted_at: Option<u64>,
    read_enable_claimed: bool,
    read_enable_conflicts: u32,
}

fn control_index(line: ControlLine) -> usize {
    match line {
        ControlLine::WriteEnable => 0,
        ControlLine::ReadEnable => 1,
        ControlLine::LatchLow => 2,
        ControlLine::LatchHigh => 3,
        ControlLine::Reset => 4,
    }
}

impl CartState {
    fn driven_value(&self) -> u16 {
        (0..BUS_WIDTH)
            .filter(|&line| {
                self.line_modes[line as usize] == PinMode::Output
                    && self.line_levels[line as usize].is_high()
            })
            .fold(0, |value, line| value | (1 << line))
    }

    fn rom_word(&self, address: u32) -> u16 {
        if self.rom.is_empty() || address < self.base_address {
            return OPEN_BUS;
        }

        let offset = (address - self.base_address) as usize % self.rom.len();
        u16::from_be_bytes([self.rom[offset], self.rom[(offset + 1) % self.rom.len()]])
    }

    fn output_word(&self) -> u16 {
        if self.control[control_index(ControlLine::Reset)] == Level::Low {
            return OPEN_BUS;
        }

        match self.read_enable_asserted_at {
            Some(asserted_at)
                if self.cycle - asserted_at >= u64::from(self.timing.access_cycles) =>
            {
                self.rom_word(self.address)
            }
            _ => OPEN_BUS,
        }
    }

    fn sample_line(&self, line: u8) -> Level {
        match self.line_modes[line as usize] {
            PinMode::Output => self.line_levels[line as usize],
            PinMode::Input => Level::from_bit(self.output_word().bit(line)),
        }
    }

    fn apply_control(&mut self, line: ControlLine, level: Level) {
        let idx = control_index(line);
        let previous = self.control[idx];
        self.control[idx] = level;

        let falling = previous == Level::High && level == Level::Low;
        let rising = previous == Level::Low && level == Level::High;

        match line {
            ControlLine::LatchHigh if falling => {
                self.latch_high = self.driven_value();
            }
            ControlLine::LatchLow if falling => {
                self.latch_low = self.driven_value();
                self.address = (u32::from(self.latch_high) << 16) | u32::from(self.latch_low);
                self.latch_log.push(self.address);
            }
            ControlLine::ReadEnable if falling => {
                self.read_enable_asserted_at = Some(self.cycle);
            }
            ControlLine::ReadEnable if rising => {
                self.read_enable_asserted_at = None;
                self.address = self.address.wrapping_add(2);
            }
            _ => {}
        }
    }

    fn tick(&mut self, cycles: u32) {
        self.cycle += u64::from(cycles);
    }
}

/// Handle to an emulated cartridge. Cloning yields another handle to the same cartridge.
#[derive(Debug, Clone)]
pub struct SimCartridge {
    state: Rc<RefCell<CartState>>,
}

impl SimCartridge {
    #[must_use]
    pub fn new(rom: Vec<u8>) -> Self {
        Self::with_timing(rom, DEFAULT_ROM_BASE_ADDRESS, SimTiming::default())
    }

    #[must_use]
    pub fn with_timing(rom: Vec<u8>, base_address: u32, timing: SimTiming) -> Self {
        if rom.len() % 2 != 0 {
            log::warn!("ROM image has odd length {}; last byte pairs with the first", rom.len());
        }

        let state = CartState {
            rom,
            base_address,
            timing,
            cycle: 0,
            line_modes: [PinMode::Input; BUS_WIDTH as usize],
            line_levels: [Level::Low; BUS_WIDTH as usize],
            control: [Level::High; ControlLine::ALL.len()],
            latch_high: 0,
            latch_low: 0,
            address: 0,
            latch_log: Vec::new(),
            read_enable_asserted_at: None,
            read_enable_claimed: false,
            read_enable_conflicts: 0,
        };

        Self { state: Rc::new(RefCell::new(state)) }
    }

    /// GPIO handles for the main control loop.
    #[must_use]
    pub fn pins(&self) -> SimPins {
        SimPins { state: Rc::clone(&self.state) }
    }

    /// A timing co-processor wired to this cartridge's read-enable and data lines.
    #[must_use]
    pub fn coprocessor(&self) -> SimCoprocessor {
        SimCoprocessor::new(Rc::clone(&self.state))
    }

    /// Every full address captured by the latches, in order.
    #[must_use]
    pub fn latched_addresses(&self) -> Vec<u32> {
        self.state.borrow().latch_log.clone()
    }

    pub fn clear_latch_log(&self) {
        self.state.borrow_mut().latch_log.clear();
    }

    /// The values captured by the high and low address latches.
    #[must_use]
    pub fn latch_halves(&self) -> (u16, u16) {
        let state = self.state.borrow();
        (state.latch_high, state.latch_low)
    }

    #[must_use]
    pub fn line_modes(&self) -> [PinMode; BUS_WIDTH as usize] {
        self.state.borrow().line_modes
    }

    #[must_use]
    pub fn control_level(&self, line: ControlLine) -> Level {
        self.state.borrow().control[control_index(line)]
    }

    /// Number of times the main control loop tried to drive read-enable while the co-processor
    /// owned it.
    #[must_use]
    pub fn read_enable_conflicts(&self) -> u32 {
        self.state.borrow().read_enable_conflicts
    }
}

#[derive(Debug)]
pub struct SimPins {
    state: Rc<RefCell<CartState>>,
}

impl BusPins for SimPins {
    fn set_line_mode(&mut self, line: u8, mode: PinMode) {
        let mut state = self.state.borrow_mut();
        state.line_modes[line as usize] = mode;
        let gpio_cycles = state.timing.gpio_cycles;
        state.tick(gpio_cycles);
    }

    fn write_line(&mut self, line: u8, level: Level) {
        let mut state = self.state.borrow_mut();
        state.line_levels[line as usize] = level;
        let gpio_cycles = state.timing.gpio_cycles;
        state.tick(gpio_cycles);
    }

    fn read_line(&mut self, line: u8) -> Level {
        let mut state = self.state.borrow_mut();
        let level = state.sample_line(line);
        let gpio_cycles = state.timing.gpio_cycles;
        state.tick(gpio_cycles);
        level
    }

    fn write_control(&mut self, line: ControlLine, level: Level) {
        let mut state = self.state.borrow_mut();
        if line == ControlLine::ReadEnable && state.read_enable_claimed {
            log::error!("GPIO write to read-enable while the timing co-processor owns it");
            state.read_enable_conflicts += 1;
        } else {
            state.apply_control(line, level);
        }

        let gpio_cycles = state.timing.gpio_cycles;
        state.tick(gpio_cycles);
    }

    fn delay_us(&mut self, micros: u32) {
        let mut state = self.state.borrow_mut();
        let cycles = micros.saturating_mul(state.timing.cycles_per_us);
        state.tick(cycles);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rom() -> Vec<u8> {
        (0..64).map(|i| i as u8).collect()
    }

    #[test]
    fn mirrors_past_end_of_rom() {
        let cart = SimCartridge::new(rom());
        let state = cart.state.borrow();
        assert_eq!(state.rom_word(DEFAULT_ROM_BASE_ADDRESS), 0x0001);
        assert_eq!(state.rom_word(DEFAULT_ROM_BASE_ADDRESS + 64), 0x0001);
        assert_eq!(state.rom_word(DEFAULT_ROM_BASE_ADDRESS + 66), 0x0203);
        assert_eq!(state.rom_word(DEFAULT_ROM_BASE_ADDRESS - 2), OPEN_BUS);
    }

    #[test]
    fn data_is_open_bus_until_access_time_elapses() {
        let cart = SimCartridge::with_timing(
            rom(),
            DEFAULT_ROM_BASE_ADDRESS,
            SimTiming { access_cycles: 10, gpio_cycles: 4, cycles_per_us: 1 },
        );
        let mut pins = cart.pins();
        cart.state.borrow_mut().address = DEFAULT_ROM_BASE_ADDRESS + 2;

        pins.write_control(ControlLine::ReadEnable, Level::Low);
        // 4 and 8 cycles since assertion
        assert_eq!(pins.read_line(2), Level::High);
        assert_eq!(pins.read_line(2), Level::High);
        // 12 cycles, word 0x0203 now driven
        assert_eq!(pins.read_line(2), Level::Low);
        assert_eq!(pins.read_line(0), Level::High);
        assert_eq!(pins.read_line(8), Level::Low);
        assert_eq!(pins.read_line(9), Level::High);

        pins.write_control(ControlLine::ReadEnable, Level::High);
        assert_eq!(cart.state.borrow().address, DEFAULT_ROM_BASE_ADDRESS + 4);
    }

    #[test]
    fn reset_holds_bus_open() {
        let cart = SimCartridge::new(rom());
        let mut pins = cart.pins();
        cart.state.borrow_mut().address = DEFAULT_ROM_BASE_ADDRESS;

        pins.write_control(ControlLine::Reset, Level::Low);
        pins.write_control(ControlLine::ReadEnable, Level::Low);
        pins.delay_us(1);
        assert_eq!(cart.state.borrow().output_word(), OPEN_BUS);
    }
}
