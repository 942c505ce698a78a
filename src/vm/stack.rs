use log::error;
use unicorn_engine::Unicorn;

use super::{Error, Result};

/// One logical call stack living in emulator memory.
///
/// The stack pointer is not checked against `[base, base + size)`; callers
/// keep it inside the backing region.
#[derive(Debug, Clone)]
pub struct Stack {
    base: u64,
    size: u64,
    sp: u64,
    word: u64,
}

impl Stack {
    /// `base` is the bottom address, `word` the register width in bytes
    /// (4 or 8). The stack pointer starts at `base`.
    pub fn new(base: u64, size: u64, word: u64) -> Self {
        Self {
            base,
            size,
            sp: base,
            word,
        }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Saturates at the end of the address space.
    pub fn top(&self) -> u64 {
        self.base.saturating_add(self.size)
    }

    pub fn sp(&self) -> u64 {
        self.sp
    }

    pub fn set_sp(&mut self, sp: u64) {
        self.sp = sp;
    }

    pub fn word(&self) -> u64 {
        self.word
    }

    /// Store `value` at the stack pointer, then move the pointer down.
    pub fn push<D>(&mut self, uc: &mut Unicorn<'_, D>, value: u64) -> Result<()> {
        let next = self.sp.checked_sub(self.word).ok_or(Error::AddressOverflow {
            address: self.sp,
            size: self.word,
        })?;
        let bytes = value.to_le_bytes();
        let len = self.word as usize;
        if let Err(e) = uc.mem_write(self.sp, &bytes[..len]) {
            error!(
                "unable to push value {value:#x} on stack at {:#x} (write size: {len}): {e:?}",
                self.sp
            );
            return Err(Error::emulator(
                format!("unable to push on stack at {:#x}", self.sp),
                e,
            ));
        }
        self.sp = next;
        Ok(())
    }

    /// Load the value at the stack pointer, then move the pointer up.
    pub fn pop<D>(&mut self, uc: &Unicorn<'_, D>) -> Result<u64> {
        let next = self.sp.checked_add(self.word).ok_or(Error::AddressOverflow {
            address: self.sp,
            size: self.word,
        })?;
        let mut bytes = [0u8; 8];
        let len = self.word as usize;
        if let Err(e) = uc.mem_read(self.sp, &mut bytes[..len]) {
            error!(
                "unable to read value on stack at {:#x} (read size: {len}): {e:?}",
                self.sp
            );
            return Err(Error::emulator(
                format!("unable to pop from stack at {:#x}", self.sp),
                e,
            ));
        }
        self.sp = next;
        Ok(u64::from_le_bytes(bytes))
    }

    /// Raw write anywhere, leaving the stack pointer alone.
    pub fn write<D>(&self, uc: &mut Unicorn<'_, D>, data: &[u8], at: u64) -> Result<()> {
        if let Err(e) = uc.mem_write(at, data) {
            error!(
                "unable to write data at {at:#x} (write size: {}): {e:?}",
                data.len()
            );
            return Err(Error::emulator(format!("unable to write data at {at:#x}"), e));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unicorn_engine::unicorn_const::{Arch, Mode, Permission};

    const BASE: u64 = 0x7ff0_0000;

    fn emulator() -> Unicorn<'static, ()> {
        let mut uc = Unicorn::new(Arch::X86, Mode::MODE_64).expect("create emulator");
        uc.mem_map(BASE, 0x1000, Permission::READ | Permission::WRITE)
            .expect("map stack");
        uc
    }

    #[test]
    fn push_writes_then_decrements() {
        let mut uc = emulator();
        let mut stack = Stack::new(BASE, 0x1000, 8);
        stack.set_sp(BASE + 0x800);

        stack.push(&mut uc, 0x1122_3344_5566_7788).unwrap();
        assert_eq!(stack.sp(), BASE + 0x7f8);
        let mut raw = [0u8; 8];
        uc.mem_read(BASE + 0x800, &mut raw).unwrap();
        assert_eq!(u64::from_le_bytes(raw), 0x1122_3344_5566_7788);

        stack.set_sp(BASE + 0x800);
        assert_eq!(stack.pop(&uc).unwrap(), 0x1122_3344_5566_7788);
        assert_eq!(stack.sp(), BASE + 0x808);
    }

    #[test]
    fn narrow_word_truncates() {
        let mut uc = emulator();
        let mut stack = Stack::new(BASE, 0x1000, 4);
        stack.set_sp(BASE + 0x100);
        uc.mem_write(BASE + 0x104, &[0xff; 4]).unwrap();

        stack.push(&mut uc, 0xdead_beef_cafe_babe).unwrap();
        assert_eq!(stack.sp(), BASE + 0xfc);
        let mut raw = [0u8; 8];
        uc.mem_read(BASE + 0x100, &mut raw).unwrap();
        assert_eq!(&raw[..4], &0xcafe_babeu32.to_le_bytes());
        assert_eq!(&raw[4..], &[0xff; 4]);
    }

    #[test]
    fn failed_push_leaves_pointer() {
        let mut uc = emulator();
        let mut stack = Stack::new(BASE, 0x1000, 8);
        stack.set_sp(BASE + 0x2000);
        assert!(stack.push(&mut uc, 1).is_err());
        assert_eq!(stack.sp(), BASE + 0x2000);
        assert!(stack.pop(&uc).is_err());
        assert_eq!(stack.sp(), BASE + 0x2000);
    }

    #[test]
    fn pointer_never_wraps() {
        let mut uc = Unicorn::new(Arch::X86, Mode::MODE_64).expect("create emulator");
        uc.mem_map(0, 0x1000, Permission::READ | Permission::WRITE)
            .expect("map zero page");
        let mut stack = Stack::new(0, 0x1000, 8);
        assert!(matches!(
            stack.push(&mut uc, 1),
            Err(Error::AddressOverflow { address: 0, size: 8 })
        ));
        assert_eq!(stack.sp(), 0);
        assert_eq!(uc.mem_read_as_vec(0, 8).unwrap(), [0; 8]);

        stack.set_sp(u64::MAX - 3);
        assert!(matches!(stack.pop(&uc), Err(Error::AddressOverflow { .. })));
        assert_eq!(stack.sp(), u64::MAX - 3);

        let top = Stack::new(0xffff_ffff_ffff_f000, 0x2000, 8);
        assert_eq!(top.top(), u64::MAX);
    }

    #[test]
    fn raw_write_ignores_pointer() {
        let mut uc = emulator();
        let stack = Stack::new(BASE, 0x1000, 8);
        stack.write(&mut uc, b"argv0\0", BASE + 0x10).unwrap();
        assert_eq!(stack.sp(), BASE);
        assert_eq!(uc.mem_read_as_vec(BASE + 0x10, 6).unwrap(), b"argv0\0");
    }
}
