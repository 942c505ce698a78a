use std::cell::Cell;
use std::rc::Rc;

use log::error;
use unicorn_engine::Unicorn;

use super::disasm::{Disassembler, Instruction};
use crate::vm::{Emulator, Error, Result};

/// Entry into a basic block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasicBlock {
    pub address: u64,
    pub size: u64,
}

pub type InstructionHook = Box<dyn FnMut(&Instruction)>;
pub type BlockHook = Box<dyn FnMut(&BasicBlock)>;

/// Cooperative stop request, honored at the next instruction boundary.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Rc<Cell<bool>>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.set(true);
    }

    pub fn is_requested(&self) -> bool {
        self.0.get()
    }

    pub fn reset(&self) {
        self.0.set(false);
    }
}

/// Who fires the user hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// The engine decodes from the image and fires hooks itself.
    Stepping,
    /// The emulator runs freely; native hooks decode and fire.
    Continuous,
}

/// Hook state stored as the emulator's user data.
pub struct Dispatch {
    pub(crate) mode: DispatchMode,
    pub(crate) armed: bool,
    pub(crate) installed: bool,
    pub(crate) stop: StopHandle,
    pub(crate) disassembler: Disassembler,
    pub(crate) instruction_hooks: Vec<InstructionHook>,
    pub(crate) block_hooks: Vec<BlockHook>,
    pub(crate) executed: u64,
    pub(crate) fault: Option<Error>,
    /// Reaching this address ends the run before it executes.
    pub(crate) exit: Option<u64>,
}

impl Dispatch {
    pub fn new(disassembler: Disassembler, stop: StopHandle) -> Self {
        Self {
            mode: DispatchMode::Stepping,
            armed: false,
            installed: false,
            stop,
            disassembler,
            instruction_hooks: Vec::new(),
            block_hooks: Vec::new(),
            executed: 0,
            fault: None,
            exit: None,
        }
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// Instructions the emulator has entered since the counter was reset.
    pub fn executed(&self) -> u64 {
        self.executed
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub(crate) fn fire_instruction(&mut self, insn: &Instruction) {
        for hook in self.instruction_hooks.iter_mut() {
            hook(insn);
        }
    }

    pub(crate) fn fire_block(&mut self, block: &BasicBlock) {
        for hook in self.block_hooks.iter_mut() {
            hook(block);
        }
    }

    /// Drop the hooks owned by the current engine and go quiet.
    pub(crate) fn disarm(&mut self) {
        self.armed = false;
        self.mode = DispatchMode::Stepping;
        self.instruction_hooks.clear();
        self.block_hooks.clear();
        self.fault = None;
        self.exit = None;
    }
}

/// Register the native code and block hooks once per emulator.
pub(crate) fn install(emu: &mut Emulator) -> Result<()> {
    if emu.get_data().installed {
        return Ok(());
    }
    emu.add_code_hook(1, 0, on_code)
        .map_err(|e| Error::emulator("unable to register code hook", e))?;
    emu.add_block_hook(on_block)
        .map_err(|e| Error::emulator("unable to register block hook", e))?;
    emu.get_data_mut().installed = true;
    Ok(())
}

fn on_code(uc: &mut Unicorn<'_, Dispatch>, address: u64, size: u32) {
    let data = uc.get_data_mut();
    if !data.armed {
        return;
    }
    if data.stop.is_requested() || data.exit == Some(address) {
        request_stop(uc);
        return;
    }
    if data.mode != DispatchMode::Continuous {
        data.executed += 1;
        return;
    }

    let bytes = match uc.mem_read_as_vec(address, size as usize) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("unable to read instruction at {address:#x}: {e:?}");
            uc.get_data_mut().fault = Some(Error::emulator(
                format!("unable to read instruction at {address:#x}"),
                e,
            ));
            request_stop(uc);
            return;
        }
    };
    let data = uc.get_data_mut();
    match data.disassembler.decode(&bytes, address) {
        Ok(insn) => data.fire_instruction(&insn),
        Err(err) => {
            error!("{err}");
            data.fault = Some(err);
            request_stop(uc);
            return;
        }
    }
    // a hook asking to stop keeps this instruction from running
    if uc.get_data().stop.is_requested() {
        request_stop(uc);
        return;
    }
    uc.get_data_mut().executed += 1;
}

fn on_block(uc: &mut Unicorn<'_, Dispatch>, address: u64, size: u32) {
    let data = uc.get_data_mut();
    if !data.armed || data.mode != DispatchMode::Continuous || data.exit == Some(address) {
        return;
    }
    data.fire_block(&BasicBlock {
        address,
        size: u64::from(size),
    });
}

fn request_stop(uc: &mut Unicorn<'_, Dispatch>) {
    if let Err(e) = uc.emu_stop() {
        error!("unable to stop emulation: {e:?}");
    }
}
