use std::fmt;
use std::str::FromStr;

use goblin::Hint;

/// Executable container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Elf,
    Pe,
}

impl Format {
    /// Guess the format from the first bytes of a file.
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        let magic: &[u8; 16] = bytes.get(..16)?.try_into().ok()?;
        match goblin::peek_bytes(magic).ok()? {
            Hint::Elf(_) => Some(Format::Elf),
            Hint::PE => Some(Format::Pe),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Format::Elf => "ELF",
            Format::Pe => "PE",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "elf" => Ok(Format::Elf),
            "pe" => Ok(Format::Pe),
            other => Err(format!("unknown format {other:?}")),
        }
    }
}
