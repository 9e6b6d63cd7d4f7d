use super::CartState;
use crate::bus::{BUS_WIDTH, ControlLine, Level};
use crate::read::{CoprocessorError, Instruction, MAX_PROGRAM_LEN, ReadProgram, TimingCoprocessor};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

const FIFO_DEPTH: usize = 4;

/// Emulated timing co-processor executing a [`ReadProgram`] one instruction at a time against
/// the shared cartridge clock.
#[derive(Debug)]
pub struct SimCoprocessor {
    state: Rc<RefCell<CartState>>,
    program: Vec<Instruction>,
    pc: usize,
    tx_fifo: usize,
    rx_fifo: VecDeque<u16>,
    shift_register: u16,
}

enum Step {
    Continue,
    Stall,
}

impl SimCoprocessor {
    pub(super) fn new(state: Rc<RefCell<CartState>>) -> Self {
        Self {
            state,
            program: Vec::new(),
            pc: 0,
            tx_fifo: 0,
            rx_fifo: VecDeque::with_capacity(FIFO_DEPTH),
            shift_register: 0,
        }
    }

    fn step(&mut self) -> Step {
        let instruction = self.program[self.pc];

        let mut state = self.state.borrow_mut();
        match instruction {
            Instruction::WaitTrigger => {
                if self.tx_fifo == 0 {
                    return Step::Stall;
                }
                self.tx_fifo -= 1;
            }
            Instruction::SetReadEnable(level) => {
                state.apply_control(ControlLine::ReadEnable, level);
            }
            Instruction::Delay(_) => {}
            Instruction::SampleBus => {
                self.shift_register = (0..BUS_WIDTH)
                    .filter(|&line| state.sample_line(line).is_high())
                    .fold(0, |acc, line| acc | (1 << line));
            }
            Instruction::Push => {
                if self.rx_fifo.len() == FIFO_DEPTH {
                    return Step::Stall;
                }
                self.rx_fifo.push_back(self.shift_register);
            }
        }

        state.tick(instruction.cycles());
        self.pc = (self.pc + 1) % self.program.len();

        Step::Continue
    }
}

impl TimingCoprocessor for SimCoprocessor {
    fn load(&mut self, program: &ReadProgram) -> Result<(), CoprocessorError> {
        if program.len() > MAX_PROGRAM_LEN {
            return Err(CoprocessorError::ProgramTooLong { len: program.len() });
        }

        self.program = program.instructions().to_vec();
        self.pc = 0;
        self.tx_fifo = 0;
        self.rx_fifo.clear();

        let mut state = self.state.borrow_mut();
        state.read_enable_claimed = true;
        state.apply_control(ControlLine::ReadEnable, Level::High);

        Ok(())
    }

    fn push_trigger(&mut self) {
        self.tx_fifo += 1;
    }

    fn try_pull(&mut self) -> Option<u16> {
        if self.program.is_empty() {
            return None;
        }

        while self.rx_fifo.is_empty() {
            if let Step::Stall = self.step() {
                break;
            }
        }

        self.rx_fifo.pop_front()
    }
}
