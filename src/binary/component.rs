use std::ops::Range;

use bitflags::bitflags;

bitflags! {
    /// Access rights requested by a segment.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SegmentFlags: u32 {
        const EXEC = 0x1;
        const WRITE = 0x2;
        const READ = 0x4;
    }
}

/// A program header: a range of file content loaded at a virtual address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub index: usize,
    pub kind: u32,
    pub flags: SegmentFlags,
    pub file_offset: u64,
    pub file_size: u64,
    pub memory_size: u64,
    pub virtual_address: u64,
    pub physical_address: u64,
    pub alignment: u64,
}

impl Segment {
    /// File offset backing `address`, if the segment covers it.
    ///
    /// The upper bound is inclusive: `virtual_address + memory_size` still
    /// translates.
    pub fn contains(&self, address: u64) -> Option<u64> {
        let end = self.virtual_address.checked_add(self.memory_size)?;
        if address >= self.virtual_address && address <= end {
            return self
                .file_offset
                .checked_add(address - self.virtual_address);
        }
        None
    }

    /// Range of the file bytes that get copied into memory.
    pub fn file_range(&self) -> Option<Range<usize>> {
        let start = usize::try_from(self.file_offset).ok()?;
        let len = usize::try_from(self.file_size).ok()?;
        Some(start..start.checked_add(len)?)
    }
}

/// A named subdivision of the file used for linking metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub index: usize,
    pub name: String,
    pub kind: u32,
    pub flags: u64,
    pub address: u64,
    pub size: u64,
    pub link: u32,
    pub info: u32,
    pub align: u64,
    pub entry_size: u64,
    /// Bytes of the section in the file; `None` for sections without file
    /// content such as `.bss`.
    pub file_range: Option<Range<usize>>,
    /// Symbols defined by this table, when the section is a symbol table.
    pub symbols: Vec<Symbol>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub index: usize,
    pub name: String,
    pub value: u64,
    pub size: u64,
    pub kind: u8,
    /// Index of the section the symbol is defined in, if any. Lookup only.
    pub section: Option<usize>,
}
