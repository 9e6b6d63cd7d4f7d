use crate::bus::Level;
use thiserror::Error;

/// Instruction memory size of the co-processor.
pub const MAX_PROGRAM_LEN: usize = 32;

/// Largest delay a single instruction can encode.
pub const MAX_DELAY: u8 = 31;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoprocessorError {
    #[error("Read-enable hold time must be at least 1 cycle")]
    ZeroHold,
    #[error("Program is {len} instructions, co-processor holds at most {max}", max = MAX_PROGRAM_LEN)]
    ProgramTooLong { len: usize },
    #[error("Delay of {0} cycles does not fit in one instruction (1-{max})", max = MAX_DELAY)]
    InvalidDelay(u8),
}

/// Every instruction takes one co-processor cycle except `Delay(n)`, which takes `n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    /// Stall until the transmit FIFO has an entry, then consume it
    WaitTrigger,
    SetReadEnable(Level),
    Delay(u8),
    /// Latch all 16 bus lines into the shift register at once
    SampleBus,
    /// Move the shift register into the receive FIFO, stalling while it is full
    Push,
}

impl Instruction {
    #[must_use]
    pub fn cycles(self) -> u32 {
        match self {
            Self::Delay(n) => n.into(),
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadProgram {
    instructions: Vec<Instruction>,
}

impl ReadProgram {
    /// # Errors
    ///
    /// Returns an error if the program is too long or contains an out-of-range delay.
    pub fn new(instructions: Vec<Instruction>) -> Result<Self, CoprocessorError> {
        if instructions.len() > MAX_PROGRAM_LEN {
            return Err(CoprocessorError::ProgramTooLong { len: instructions.len() });
        }

        let bad_delay = instructions.iter().find_map(|&instruction| match instruction {
            Instruction::Delay(n) if n == 0 || n > MAX_DELAY => Some(n),
            _ => None,
        });
        if let Some(n) = bad_delay {
            return Err(CoprocessorError::InvalidDelay(n));
        }

        Ok(Self { instructions })
    }

    /// The word read loop: on each trigger, assert read-enable, wait `hold_cycles`, sample the
    /// bus, deassert read-enable, and push the sampled word.
    ///
    /// # Errors
    ///
    /// Returns an error if `hold_cycles` is 0.
    pub fn word_read(hold_cycles: u8) -> Result<Self, CoprocessorError> {
        if hold_cycles == 0 {
            return Err(CoprocessorError::ZeroHold);
        }

        let mut instructions = vec![Instruction::WaitTrigger, Instruction::SetReadEnable(Level::Low)];

        let mut remaining = hold_cycles;
        while remaining != 0 {
            let delay = remaining.min(MAX_DELAY);
            instructions.push(Instruction::Delay(delay));
            remaining -= delay;
        }

        instructions.extend([
            Instruction::SampleBus,
            Instruction::SetReadEnable(Level::High),
            Instruction::Push,
        ]);

        Self::new(instructions)
    }

    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Cycles between read-enable asserting and the bus being sampled.
    #[must_use]
    pub fn sample_delay(&self) -> Option<u32> {
        let assert = self
            .instructions
            .iter()
            .position(|&i| i == Instruction::SetReadEnable(Level::Low))?;
        let sample = self.instructions.iter().position(|&i| i == Instruction::SampleBus)?;

        (sample > assert)
            .then(|| self.instructions[assert..sample].iter().map(|&i| i.cycles()).sum())
    }
}
