use std::path::PathBuf;

use thiserror::Error as ThisError;
use unicorn_engine::unicorn_const::uc_error;

use crate::arch::Architecture;

#[derive(ThisError, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("elf parse error: {0}")]
    Parsing(#[from] goblin::error::Error),

    #[error("{} is not a regular file", .0.display())]
    NotRegularFile(PathBuf),

    #[error("{} is empty", .0.display())]
    EmptyFile(PathBuf),

    #[error("unknown executable format")]
    UnknownFormat,

    #[error("{0} is not supported yet")]
    UnsupportedFormat(&'static str),

    #[error("machine type {0:#x} is not supported")]
    UnsupportedMachine(u16),

    #[error("architecture {0} is not supported")]
    UnsupportedArchitecture(Architecture),

    #[error("malformed binary: {0}")]
    Malformed(String),

    #[error("region {address:#x} (size {size:#x}) is not page aligned")]
    Misaligned { address: u64, size: u64 },

    #[error("range {address:#x} (size {size:#x}) wraps past the end of the address space")]
    AddressOverflow { address: u64, size: u64 },

    #[error("{context}: {error:?}")]
    Emulator { context: String, error: uc_error },

    #[error("unable to find entry symbol {0:?}")]
    EntrySymbolNotFound(String),

    #[error("entry point {0:#x} is not covered by any segment")]
    EntryNotLocatable(u64),

    #[error("address {0:#x} is not covered by any segment")]
    AddressNotMapped(u64),

    #[error("unable to disassemble instruction at {0:#x}")]
    Disassembly(u64),
}

impl Error {
    /// Wrap a native emulator failure together with what was being attempted.
    pub fn emulator(context: impl Into<String>, error: uc_error) -> Self {
        Error::Emulator {
            context: context.into(),
            error,
        }
    }
}

impl From<uc_error> for Error {
    fn from(error: uc_error) -> Self {
        Error::emulator("emulator error", error)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
