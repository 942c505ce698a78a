use std::fmt;
use std::str::FromStr;

use goblin::elf::header::{EM_386, EM_AARCH64, EM_ARM, EM_X86_64};
use unicorn_engine::RegisterX86;
use unicorn_engine::unicorn_const::{Arch, Mode};

use crate::vm::{Error, Result};

/// CPU architectures an image may target.
///
/// ARM and AArch64 are recognized so that the image can be described, but
/// every translation to an emulator or decoder mode rejects them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture {
    X86,
    X86_64,
    Arm,
    AArch64,
}

impl Architecture {
    pub fn from_elf_machine(machine: u16) -> Result<Self> {
        match machine {
            EM_386 => Ok(Architecture::X86),
            EM_X86_64 => Ok(Architecture::X86_64),
            EM_ARM => Ok(Architecture::Arm),
            EM_AARCH64 => Ok(Architecture::AArch64),
            other => Err(Error::UnsupportedMachine(other)),
        }
    }

    pub fn long_name(self) -> &'static str {
        match self {
            Architecture::X86 => "Intel x86 (32 bits)",
            Architecture::X86_64 => "Intel x86_64 (64 bits)",
            Architecture::Arm => "ARM (32 bits) - NOT SUPPORTED YET",
            Architecture::AArch64 => "AArch64 (64 bits) - NOT SUPPORTED YET",
        }
    }

    pub fn short_name(self) -> &'static str {
        match self {
            Architecture::X86 => "x86",
            Architecture::X86_64 => "x86_64",
            Architecture::Arm => "arm",
            Architecture::AArch64 => "aarch64",
        }
    }

    pub fn is_supported(self) -> bool {
        matches!(self, Architecture::X86 | Architecture::X86_64)
    }

    /// Native emulator mode for this architecture.
    pub fn emulator_mode(self) -> Result<(Arch, Mode)> {
        match self {
            Architecture::X86 => Ok((Arch::X86, Mode::MODE_32)),
            Architecture::X86_64 => Ok((Arch::X86, Mode::MODE_64)),
            other => Err(Error::UnsupportedArchitecture(other)),
        }
    }

    /// Decoder bitness (16/32/64 as understood by iced-x86).
    pub fn bitness(self) -> Result<u32> {
        match self {
            Architecture::X86 => Ok(32),
            Architecture::X86_64 => Ok(64),
            other => Err(Error::UnsupportedArchitecture(other)),
        }
    }

    /// Width in bytes of a general purpose register.
    pub fn word_size(self) -> u64 {
        match self {
            Architecture::X86 | Architecture::Arm => 4,
            Architecture::X86_64 | Architecture::AArch64 => 8,
        }
    }

    pub fn instruction_pointer(self) -> Result<RegisterX86> {
        match self {
            Architecture::X86 => Ok(RegisterX86::EIP),
            Architecture::X86_64 => Ok(RegisterX86::RIP),
            other => Err(Error::UnsupportedArchitecture(other)),
        }
    }

    pub fn stack_pointer(self) -> Result<RegisterX86> {
        match self {
            Architecture::X86 => Ok(RegisterX86::ESP),
            Architecture::X86_64 => Ok(RegisterX86::RSP),
            other => Err(Error::UnsupportedArchitecture(other)),
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.long_name())
    }
}

impl FromStr for Architecture {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "x86" | "i386" | "x86_32" => Ok(Architecture::X86),
            "x86_64" | "x64" | "amd64" => Ok(Architecture::X86_64),
            "arm" => Ok(Architecture::Arm),
            "aarch64" | "arm64" => Ok(Architecture::AArch64),
            other => Err(format!("unknown architecture {other:?}")),
        }
    }
}
