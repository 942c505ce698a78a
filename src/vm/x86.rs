use unicorn_engine::{RegisterX86, Unicorn};

use super::{Error, Result};
use crate::arch::Architecture;

const RFLAGS_RESERVED: u64 = 2;

pub fn read_register<D>(uc: &Unicorn<'_, D>, reg: RegisterX86) -> Result<u64> {
    uc.reg_read(reg)
        .map_err(|e| Error::emulator(format!("unable to read register {reg:?}"), e))
}

pub fn write_register<D>(uc: &mut Unicorn<'_, D>, reg: RegisterX86, value: u64) -> Result<()> {
    uc.reg_write(reg, value)
        .map_err(|e| Error::emulator(format!("unable to write register {reg:?}"), e))
}

/// Put the CPU at `ip` with the stack pointer at `sp`.
pub fn init_x86<D>(uc: &mut Unicorn<'_, D>, arch: Architecture, ip: u64, sp: u64) -> Result<()> {
    // - IP: where the guest starts executing
    // - SP: stack pointer inside the stack region
    // - FLAGS: reserved bit 1 is always set on x86
    write_register(uc, arch.instruction_pointer()?, ip)?;
    write_register(uc, arch.stack_pointer()?, sp)?;
    write_register(uc, RegisterX86::EFLAGS, RFLAGS_RESERVED)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use unicorn_engine::unicorn_const::{Arch, Mode};

    #[test]
    fn sets_pointers_for_both_widths() {
        let mut uc = Unicorn::new(Arch::X86, Mode::MODE_64).unwrap();
        init_x86(&mut uc, Architecture::X86_64, 0x401000, 0x7ff0_ff00).unwrap();
        assert_eq!(read_register(&uc, RegisterX86::RIP).unwrap(), 0x401000);
        assert_eq!(read_register(&uc, RegisterX86::RSP).unwrap(), 0x7ff0_ff00);

        let mut uc = Unicorn::new(Arch::X86, Mode::MODE_32).unwrap();
        init_x86(&mut uc, Architecture::X86, 0x8049000, 0xbfff_0000).unwrap();
        assert_eq!(read_register(&uc, RegisterX86::EIP).unwrap(), 0x8049000);
        assert_eq!(read_register(&uc, RegisterX86::ESP).unwrap(), 0xbfff_0000);
    }

    #[test]
    fn arm_has_no_registers_here() {
        let mut uc = Unicorn::new(Arch::X86, Mode::MODE_64).unwrap();
        assert!(matches!(
            init_x86(&mut uc, Architecture::AArch64, 0, 0),
            Err(Error::UnsupportedArchitecture(Architecture::AArch64))
        ));
    }
}
