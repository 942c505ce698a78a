//! Emulator handle and the pieces of guest memory built on it.

pub mod error;
mod region;
mod stack;
mod x86;

use log::info;
use unicorn_engine::Unicorn;

pub use self::error::{Error, Result};
pub use self::region::MemoryRegion;
pub use self::stack::Stack;
pub use self::x86::{init_x86, read_register, write_register};
use crate::arch::Architecture;
use crate::engine::Dispatch;

pub const PAGE_SIZE: u64 = 0x1000;

/// The emulator instance, carrying hook dispatch state as user data.
pub type Emulator = Unicorn<'static, Dispatch>;

/// Open an emulator for `arch`. ARM targets fail here.
pub fn open(arch: Architecture, dispatch: Dispatch) -> Result<Emulator> {
    let (uc_arch, uc_mode) = arch.emulator_mode()?;
    let emu = Unicorn::new_with_data(uc_arch, uc_mode, dispatch)
        .map_err(|e| Error::emulator(format!("unable to initialize emulator for {arch}"), e))?;
    info!("emulator loaded for {arch}");
    Ok(emu)
}

pub fn page_align_down(address: u64) -> u64 {
    address & !(PAGE_SIZE - 1)
}

pub fn page_align_up(size: u64) -> Option<u64> {
    Some(size.checked_add(PAGE_SIZE - 1)? & !(PAGE_SIZE - 1))
}
