use std::fmt;

use iced_x86::{Decoder, DecoderOptions, FlowControl, Formatter, NasmFormatter};

use crate::arch::Architecture;
use crate::vm::{Error, Result};

/// Longest encodable x86 instruction.
pub const MAX_INSTRUCTION_LEN: usize = 15;

/// A decoded instruction, ready for hooks and logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub address: u64,
    pub bytes: Vec<u8>,
    pub mnemonic: String,
    pub operands: String,
    /// The instruction may transfer control somewhere other than the next one.
    pub ends_block: bool,
}

impl Instruction {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn next_address(&self) -> u64 {
        self.address + self.bytes.len() as u64
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.operands.is_empty() {
            f.write_str(&self.mnemonic)
        } else {
            write!(f, "{} {}", self.mnemonic, self.operands)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disassembler {
    bitness: u32,
}

impl Disassembler {
    pub fn new(arch: Architecture) -> Result<Self> {
        Ok(Self {
            bitness: arch.bitness()?,
        })
    }

    pub fn bitness(&self) -> u32 {
        self.bitness
    }

    /// Decode the single instruction starting at `bytes[0]`.
    pub fn decode(&self, bytes: &[u8], address: u64) -> Result<Instruction> {
        let mut decoder = Decoder::with_ip(self.bitness, bytes, address, DecoderOptions::NONE);
        if !decoder.can_decode() {
            return Err(Error::Disassembly(address));
        }
        let insn = decoder.decode();
        if insn.is_invalid() {
            return Err(Error::Disassembly(address));
        }

        let mut formatter = NasmFormatter::new();
        let options = formatter.options_mut();
        options.set_space_after_operand_separator(true);
        options.set_hex_prefix("0x");
        options.set_hex_suffix("");
        options.set_uppercase_hex(false);

        let mut mnemonic = String::new();
        formatter.format_mnemonic(&insn, &mut mnemonic);
        let mut operands = String::new();
        formatter.format_all_operands(&insn, &mut operands);

        Ok(Instruction {
            address,
            bytes: bytes[..insn.len()].to_vec(),
            mnemonic,
            operands,
            ends_block: insn.flow_control() != FlowControl::Next,
        })
    }

    /// Size of the straight-line run starting at `address`, up to and
    /// including the first control-flow instruction.
    pub fn block_size(&self, bytes: &[u8], address: u64) -> u64 {
        let mut decoder = Decoder::with_ip(self.bitness, bytes, address, DecoderOptions::NONE);
        let mut size = 0u64;
        while decoder.can_decode() {
            let insn = decoder.decode();
            if insn.is_invalid() {
                break;
            }
            size += insn.len() as u64;
            if insn.flow_control() != FlowControl::Next {
                break;
            }
        }
        size
    }
}
