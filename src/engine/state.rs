use super::disasm::Instruction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Unconfigured,
    Ready,
    Running,
    Halted,
    /// Terminal; the cause is kept by the engine.
    Faulted,
}

impl EngineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, EngineState::Halted | EngineState::Faulted)
    }
}

/// Why the engine stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    /// The entry function returned to the sentinel return address.
    Returned,
    WindowEnd,
    StepLimit,
    StopRequested,
}

/// Minimal state needed to resume stepping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmulationState {
    pub instruction_pointer: u64,
    /// Stepping halts when the instruction pointer reaches this address.
    pub window_end: Option<u64>,
    /// File offset of the bytes at `instruction_pointer`.
    pub cursor: u64,
    /// The next instruction starts a basic block.
    pub block_start: bool,
    pub last: Option<Instruction>,
}

/// Result of one call to `step`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Executed(Instruction),
    Halted(HaltReason),
    Faulted,
}
