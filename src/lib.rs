pub mod analysis;
pub mod arch;
pub mod binary;
pub mod engine;
pub mod loader;
pub mod vm;

pub use analysis::{Analysis, Outcome, RunReport};
pub use arch::Architecture;
pub use binary::{BinaryImage, Format};
pub use engine::{EmulationEngine, EngineConfig, EngineState, EntryPoint, HaltReason, Step};
pub use vm::{Error, Result};
