//! Top-level driver: one emulator per architecture, one engine per run.

use log::{info, warn};

use crate::arch::Architecture;
use crate::binary::BinaryImage;
use crate::engine::{
    Disassembler, Dispatch, EmulationEngine, EngineConfig, EngineState, HaltReason, Step,
    StopHandle,
};
use crate::vm::{self, Emulator, Result};

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Halted(HaltReason),
    Faulted(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub steps: u64,
    pub outcome: Outcome,
}

pub struct Analysis {
    arch: Architecture,
    emulator: Emulator,
    disassembler: Disassembler,
    stop: StopHandle,
}

impl Analysis {
    /// Open the decoder and the emulator for `arch`. Unsupported
    /// architectures are rejected here, before any image is touched.
    pub fn new(arch: Architecture) -> Result<Self> {
        let disassembler = Disassembler::new(arch)?;
        info!("disassembler loaded for {arch} ({} bits)", disassembler.bitness());
        let stop = StopHandle::new();
        let emulator = vm::open(arch, Dispatch::new(disassembler, stop.clone()))?;
        Ok(Self {
            arch,
            emulator,
            disassembler,
            stop,
        })
    }

    pub fn architecture(&self) -> Architecture {
        self.arch
    }

    pub fn disassembler(&self) -> Disassembler {
        self.disassembler
    }

    /// Build an engine over `image`. The engine borrows the emulator, so
    /// only one can be alive at a time.
    pub fn engine<'a>(
        &'a mut self,
        image: &'a mut BinaryImage,
        config: EngineConfig,
    ) -> EmulationEngine<'a> {
        if let Ok(image_arch) = image.architecture() {
            if image_arch != self.arch {
                warn!(
                    "image targets {image_arch} but the emulator runs {}",
                    self.arch
                );
            }
        }
        EmulationEngine::new(&mut self.emulator, image, self.arch, config)
    }

    /// Build an engine, let `install` register hooks, then step until the
    /// engine halts or faults.
    ///
    /// Construction failures are returned as errors; faults while running
    /// are reported in the [`RunReport`].
    pub fn start<F>(
        &mut self,
        image: &mut BinaryImage,
        config: EngineConfig,
        install: F,
    ) -> Result<RunReport>
    where
        F: FnOnce(&mut EmulationEngine<'_>),
    {
        let mut engine = self.engine(image, config);
        if engine.state() == EngineState::Faulted {
            if let Some(err) = engine.take_fault() {
                return Err(err);
            }
        }
        install(&mut engine);

        let outcome = match engine.run() {
            Step::Halted(reason) => Outcome::Halted(reason),
            _ => Outcome::Faulted(
                engine
                    .fault()
                    .map_or_else(|| "unknown fault".to_string(), |err| err.to_string()),
            ),
        };
        let report = RunReport {
            steps: engine.steps(),
            outcome,
        };
        info!("run finished after {} step(s): {:?}", report.steps, report.outcome);
        Ok(report)
    }

    /// Ask the running engine to halt at the next instruction boundary.
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }
}
