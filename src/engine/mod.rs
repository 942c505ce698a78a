//! Step-driven emulation of a loaded image.
//!
//! Construction maps the image, resolves the entry point, prepares the
//! default stack and arms the hooks. After that the caller either calls
//! [`EmulationEngine::step`] repeatedly or lets the emulator run freely with
//! [`EmulationEngine::emulate`]. Any failure moves the engine to
//! [`EngineState::Faulted`]; the regions built so far stay mapped until the
//! engine is dropped.

mod config;
mod disasm;
mod hooks;
mod state;

use log::{error, info, trace};
use unicorn_engine::RegisterX86;
use unicorn_engine::unicorn_const::Permission;

pub use self::config::{
    DEFAULT_ENTRY_SYMBOL, DEFAULT_RETURN_ADDRESS, DEFAULT_STACK_BASE, DEFAULT_STACK_SIZE,
    EngineConfig, EntryPoint, STACK_TOP_RESERVE,
};
pub use self::disasm::{Disassembler, Instruction, MAX_INSTRUCTION_LEN};
pub use self::hooks::{BasicBlock, BlockHook, Dispatch, DispatchMode, InstructionHook, StopHandle};
pub use self::state::{EmulationState, EngineState, HaltReason, Step};
use crate::arch::Architecture;
use crate::binary::BinaryImage;
use crate::loader::AddressSpaceBuilder;
use crate::vm::{
    Emulator, Error, MemoryRegion, PAGE_SIZE, Result, Stack, init_x86, page_align_down,
    read_register, write_register,
};

const HLT: u8 = 0xf4;

pub struct EmulationEngine<'a> {
    emu: &'a mut Emulator,
    image: &'a mut BinaryImage,
    arch: Architecture,
    disassembler: Disassembler,
    config: EngineConfig,
    regions: Vec<MemoryRegion>,
    stacks: Vec<Stack>,
    state: EngineState,
    fault: Option<Error>,
    halt: Option<HaltReason>,
    emulation: EmulationState,
    steps: u64,
}

impl<'a> EmulationEngine<'a> {
    /// Configure the engine. Failures do not escape: check
    /// [`EmulationEngine::state`] and [`EmulationEngine::fault`].
    pub fn new(
        emu: &'a mut Emulator,
        image: &'a mut BinaryImage,
        arch: Architecture,
        config: EngineConfig,
    ) -> Self {
        let disassembler = emu.get_data().disassembler;
        let mut engine = Self {
            emu,
            image,
            arch,
            disassembler,
            config,
            regions: Vec::new(),
            stacks: Vec::new(),
            state: EngineState::Unconfigured,
            fault: None,
            halt: None,
            emulation: EmulationState::default(),
            steps: 0,
        };
        match engine.configure() {
            Ok(()) => {
                engine.state = EngineState::Ready;
                info!(
                    "engine ready at {:#x}",
                    engine.emulation.instruction_pointer
                );
            }
            Err(err) => engine.fail(err),
        }
        engine
    }

    fn configure(&mut self) -> Result<()> {
        AddressSpaceBuilder::new(self.image).build(self.emu, &mut self.regions)?;

        let (entry, window_end) = self.resolve_entry()?;
        let cursor = self
            .image
            .translator()
            .file_offset_of(entry)
            .ok_or(Error::EntryNotLocatable(entry))?;

        let sp = self.setup_stack()?;
        self.map_return_page()?;
        init_x86(self.emu, self.arch, entry, sp)?;

        hooks::install(self.emu)?;
        let dispatch = self.emu.get_data_mut();
        dispatch.disarm();
        dispatch.armed = true;
        dispatch.executed = 0;
        dispatch.exit = Some(self.config.return_address);

        self.emulation = EmulationState {
            instruction_pointer: entry,
            window_end,
            cursor,
            block_start: true,
            last: None,
        };
        Ok(())
    }

    /// Entry address and the end of the step window, if known.
    fn resolve_entry(&mut self) -> Result<(u64, Option<u64>)> {
        let translator = self.image.translator();
        let window_of = |address: u64| {
            translator
                .symbol_at(address)
                .filter(|sym| sym.size > 0)
                .map(|sym| address + sym.size)
        };

        match &self.config.entry {
            EntryPoint::Address(address) => {
                info!("entry address: {address:#x}");
                Ok((*address, window_of(*address)))
            }
            EntryPoint::Header => {
                let address = self.image.entry();
                info!("entry from header: {address:#x}");
                Ok((address, window_of(address)))
            }
            EntryPoint::Symbol(name) => {
                let Some((value, size)) = translator.resolve_entry(name) else {
                    error!("unable to find entry symbol {name:?}");
                    return Err(Error::EntrySymbolNotFound(name.clone()));
                };
                let Some(offset) = translator.file_offset_of(value) else {
                    error!("symbol {name:?} cannot be located");
                    return Err(Error::EntryNotLocatable(value));
                };
                info!(
                    "entry symbol: {name}, size={size:#x}, virtual address={value:#x}, file offset={offset:#x}"
                );
                self.image.set_entry(value);
                Ok((value, (size > 0).then(|| value + size)))
            }
        }
    }

    /// Map the default stack and lay out the initial frame. Returns the CPU
    /// stack pointer.
    fn setup_stack(&mut self) -> Result<u64> {
        let mut perms = Permission::READ | Permission::WRITE;
        if !self.image.nx() {
            perms |= Permission::EXEC;
        }
        let region =
            MemoryRegion::map_new(self.emu, self.config.stack_base, self.config.stack_size, perms)?;
        info!("stack mapped at {region}");
        self.regions.push(region);

        let word = self.arch.word_size();
        let mut stack = Stack::new(self.config.stack_base, self.config.stack_size, word);
        stack.set_sp(below(stack.top(), word * STACK_TOP_RESERVE)?);
        let sp = lay_out_frame(self.emu, self.arch, &self.config, &mut stack)?;
        self.stacks.push(stack);
        Ok(sp)
    }

    /// Back the return address with a page of `hlt` so that returning from
    /// the entry function never fetches from unmapped memory.
    fn map_return_page(&mut self) -> Result<()> {
        let base = page_align_down(self.config.return_address);
        let perms = Permission::READ | Permission::EXEC;
        let region = MemoryRegion::map_new(self.emu, base, PAGE_SIZE, perms)?;
        self.regions.push(region);
        self.emu
            .mem_write(base, &[HLT; PAGE_SIZE as usize])
            .map_err(|e| Error::emulator(format!("unable to fill return page at {base:#x}"), e))
    }

    fn is_return(&self, address: u64) -> bool {
        page_align_down(address) == page_align_down(self.config.return_address)
    }

    fn fail(&mut self, err: Error) {
        error!("emulation faulted: {err}");
        self.fault = Some(err);
        self.state = EngineState::Faulted;
    }

    fn finish(&mut self, reason: HaltReason) {
        info!(
            "emulation halted at {:#x} after {} step(s): {reason:?}",
            self.emulation.instruction_pointer, self.steps
        );
        self.halt = Some(reason);
        self.state = EngineState::Halted;
    }

    fn pending_halt(&self) -> Option<HaltReason> {
        let ip = self.emulation.instruction_pointer;
        if self.emu.get_data().stop.is_requested() {
            Some(HaltReason::StopRequested)
        } else if self.is_return(ip) {
            Some(HaltReason::Returned)
        } else if self.emulation.window_end == Some(ip) {
            Some(HaltReason::WindowEnd)
        } else if self.config.max_steps.is_some_and(|max| self.steps >= max) {
            Some(HaltReason::StepLimit)
        } else {
            None
        }
    }

    /// Emulate exactly one instruction.
    pub fn step(&mut self) -> Step {
        match self.state {
            EngineState::Faulted | EngineState::Unconfigured => return Step::Faulted,
            EngineState::Halted => {
                return Step::Halted(self.halt.unwrap_or(HaltReason::StopRequested));
            }
            EngineState::Ready | EngineState::Running => {}
        }
        if let Some(reason) = self.pending_halt() {
            self.finish(reason);
            return Step::Halted(reason);
        }
        match self.try_step() {
            Ok(step) => step,
            Err(err) => {
                self.fail(err);
                Step::Faulted
            }
        }
    }

    fn try_step(&mut self) -> Result<Step> {
        let ip = self.emulation.instruction_pointer;
        let insn = self.decode_at(ip, self.emulation.cursor, MAX_INSTRUCTION_LEN)?;
        self.state = EngineState::Running;

        if self.emulation.block_start {
            let size = self.block_size_at(ip, self.emulation.cursor);
            self.emu
                .get_data_mut()
                .fire_block(&BasicBlock { address: ip, size });
        }
        self.emu.get_data_mut().fire_instruction(&insn);
        if self.emu.get_data().stop.is_requested() {
            self.finish(HaltReason::StopRequested);
            return Ok(Step::Halted(HaltReason::StopRequested));
        }

        let until = self
            .emulation
            .window_end
            .unwrap_or(self.config.return_address);
        if let Err(e) = self.emu.emu_start(ip, until, 0, 1) {
            error!("unable to emulate code at {ip:#x}: {e:?}");
            return Err(Error::emulator(
                format!("unable to emulate instruction at {ip:#x}"),
                e,
            ));
        }
        if let Some(err) = self.emu.get_data_mut().fault.take() {
            return Err(err);
        }
        self.steps += 1;

        self.emulation.block_start = insn.ends_block;
        self.emulation.last = Some(insn.clone());
        // Control flow may have gone anywhere; trust the CPU, not the length.
        self.resync()?;
        trace!("[{ip:#x}] {insn} -> {:#x}", self.emulation.instruction_pointer);
        Ok(Step::Executed(insn))
    }

    /// Step until the engine halts or faults.
    pub fn run(&mut self) -> Step {
        loop {
            match self.step() {
                Step::Executed(_) => continue,
                other => return other,
            }
        }
    }

    /// Let the emulator run natively from the current instruction pointer.
    ///
    /// Hooks are fired from the emulator's own callbacks and instructions are
    /// decoded from emulator memory.
    pub fn emulate(&mut self) -> EngineState {
        if self.state.is_terminal() || self.state == EngineState::Unconfigured {
            return self.state;
        }
        if let Some(reason) = self.pending_halt() {
            self.finish(reason);
            return self.state;
        }

        let ip = self.emulation.instruction_pointer;
        let until = self
            .emulation
            .window_end
            .unwrap_or(self.config.return_address);
        let count = self
            .config
            .max_steps
            .map_or(0, |max| max.saturating_sub(self.steps));
        let count = usize::try_from(count).unwrap_or(usize::MAX);

        let dispatch = self.emu.get_data_mut();
        dispatch.mode = DispatchMode::Continuous;
        dispatch.executed = 0;
        self.state = EngineState::Running;

        let result = self.emu.emu_start(ip, until, 0, count);

        let dispatch = self.emu.get_data_mut();
        dispatch.mode = DispatchMode::Stepping;
        self.steps += dispatch.executed;
        let fault = dispatch.fault.take();

        if let Err(e) = result {
            self.fail(Error::emulator(format!("unable to emulate code from {ip:#x}"), e));
            return self.state;
        }
        if let Some(err) = fault {
            self.fail(err);
            return self.state;
        }
        self.emulation.block_start = true;
        if let Err(err) = self.resync() {
            self.fail(err);
            return self.state;
        }
        match self.pending_halt() {
            Some(reason) => self.finish(reason),
            None => self.state = EngineState::Ready,
        }
        self.state
    }

    /// Pick up the instruction pointer from the CPU and find its bytes in
    /// the file.
    fn resync(&mut self) -> Result<()> {
        let next = read_register(self.emu, self.arch.instruction_pointer()?)?;
        if self.is_return(next) {
            self.emulation.instruction_pointer = self.config.return_address;
            return Ok(());
        }
        self.emulation.instruction_pointer = next;
        self.emulation.cursor = self
            .image
            .translator()
            .file_offset_of(next)
            .ok_or(Error::AddressNotMapped(next))?;
        Ok(())
    }

    /// File bytes at `cursor`, clipped to the segment covering `ip`.
    fn code_bytes(&self, ip: u64, cursor: u64, max: usize) -> &[u8] {
        let Some(segment) = self.image.translator().segment_of(ip) else {
            return &[];
        };
        let file_end = segment
            .file_offset
            .saturating_add(segment.file_size)
            .min(self.image.len() as u64);
        let start = cursor;
        let end = file_end.min(start.saturating_add(max as u64));
        if start >= end {
            return &[];
        }
        &self.image.bytes()[start as usize..end as usize]
    }

    fn decode_at(&self, ip: u64, cursor: u64, max: usize) -> Result<Instruction> {
        let bytes = self.code_bytes(ip, cursor, max);
        self.disassembler.decode(bytes, ip).inspect_err(|_| {
            error!(
                "unable to disassemble instruction at {ip:#x} (file offset {cursor:#x})"
            );
        })
    }

    fn block_size_at(&self, ip: u64, cursor: u64) -> u64 {
        let bytes = self.code_bytes(ip, cursor, usize::MAX);
        self.disassembler.block_size(bytes, ip)
    }

    /// The instruction about to execute, without executing it.
    pub fn peek(&self) -> Result<Instruction> {
        self.decode_at(
            self.emulation.instruction_pointer,
            self.emulation.cursor,
            MAX_INSTRUCTION_LEN,
        )
    }

    pub fn add_instruction_hook(&mut self, hook: impl FnMut(&Instruction) + 'static) {
        self.emu
            .get_data_mut()
            .instruction_hooks
            .push(Box::new(hook));
    }

    pub fn add_block_hook(&mut self, hook: impl FnMut(&BasicBlock) + 'static) {
        self.emu.get_data_mut().block_hooks.push(Box::new(hook));
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.emu.get_data().stop_handle()
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn fault(&self) -> Option<&Error> {
        self.fault.as_ref()
    }

    /// Hand the fault over to the caller; the engine stays faulted.
    pub fn take_fault(&mut self) -> Option<Error> {
        self.fault.take()
    }

    pub fn halt_reason(&self) -> Option<HaltReason> {
        self.halt
    }

    pub fn emulation_state(&self) -> &EmulationState {
        &self.emulation
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn architecture(&self) -> Architecture {
        self.arch
    }

    pub fn image(&self) -> &BinaryImage {
        self.image
    }

    pub fn regions(&self) -> &[MemoryRegion] {
        &self.regions
    }

    pub fn stacks(&self) -> &[Stack] {
        &self.stacks
    }

    pub fn instruction_pointer(&self) -> Result<u64> {
        read_register(self.emu, self.arch.instruction_pointer()?)
    }

    pub fn stack_pointer(&self) -> Result<u64> {
        read_register(self.emu, self.arch.stack_pointer()?)
    }

    pub fn register(&self, reg: RegisterX86) -> Result<u64> {
        read_register(self.emu, reg)
    }

    pub fn read_memory(&self, address: u64, len: usize) -> Result<Vec<u8>> {
        self.emu
            .mem_read_as_vec(address, len)
            .map_err(|e| Error::emulator(format!("unable to read {len} bytes at {address:#x}"), e))
    }
}

impl Drop for EmulationEngine<'_> {
    fn drop(&mut self) {
        let dispatch = self.emu.get_data_mut();
        dispatch.disarm();
        // a stop request lasts until the run it was meant for is over
        dispatch.stop.reset();
        for region in self.regions.iter_mut().rev() {
            if let Err(err) = region.unmap(self.emu) {
                error!("{err}");
            }
        }
    }
}

/// Write `argv` and the entry frame onto `stack`. Returns the CPU stack
/// pointer, which points at the pushed return address.
fn lay_out_frame(
    emu: &mut Emulator,
    arch: Architecture,
    config: &EngineConfig,
    stack: &mut Stack,
) -> Result<u64> {
    let word = stack.word();
    let mut cursor = stack.sp();
    let mut pointers = Vec::with_capacity(config.argv.len());
    for arg in config.argv.iter().rev() {
        let mut bytes = arg.as_bytes().to_vec();
        bytes.push(0);
        cursor = below(cursor, bytes.len() as u64)?;
        stack.write(emu, &bytes, cursor)?;
        pointers.push(cursor);
    }
    pointers.reverse();
    cursor &= !0xf;

    // keep (sp + word) 16-byte aligned at entry on x86_64
    let slots = pointers.len() as u64 + 1;
    let pad = if arch == Architecture::X86_64 && slots % 2 == 1 {
        word
    } else {
        0
    };
    stack.set_sp(below(cursor, word + pad)?);

    stack.push(emu, 0)?;
    for ptr in pointers.iter().rev() {
        stack.push(emu, *ptr)?;
    }
    let argv = stack.sp() + word;
    let argc = config.argv.len() as u64;
    match arch {
        Architecture::X86_64 => {
            write_register(emu, RegisterX86::RDI, argc)?;
            write_register(emu, RegisterX86::RSI, argv)?;
        }
        _ => {
            stack.push(emu, argv)?;
            stack.push(emu, argc)?;
        }
    }
    stack.push(emu, config.return_address)?;
    Ok(stack.sp() + word)
}

fn below(address: u64, size: u64) -> Result<u64> {
    address
        .checked_sub(size)
        .ok_or(Error::AddressOverflow { address, size })
}
