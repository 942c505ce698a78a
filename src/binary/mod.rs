//! In-memory view of the analysed executable.
//!
//! The file is opened once, translated into a format-independent
//! [`Layout`] and then only read. Every format plugs in by producing that
//! layout; the rest of the crate never looks at ELF or PE structures.

mod bytes;
mod component;
mod elf;
mod format;
mod translate;

use std::collections::HashMap;
use std::path::Path;

use goblin::elf::program_header::PT_LOAD;
use log::{info, warn};

pub use self::bytes::FileBytes;
pub use self::component::{Section, Segment, SegmentFlags, Symbol};
pub use self::format::Format;
pub use self::translate::AddressTranslator;
use crate::arch::Architecture;
use crate::vm::{Error, Result};

/// Structural model produced by a format parser.
#[derive(Debug, Clone, Default)]
pub struct Layout {
    pub machine: u16,
    pub entry: u64,
    pub nx: bool,
    pub pie: bool,
    pub segments: Vec<Segment>,
    pub sections: Vec<Section>,
}

/// Position of a symbol inside [`BinaryImage::sections`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SymbolRef {
    section: usize,
    symbol: usize,
}

pub struct BinaryImage {
    bytes: FileBytes,
    format: Format,
    layout: Layout,
    /// Every symbol recorded at an address, in table order.
    symbols: HashMap<u64, Vec<SymbolRef>>,
}

impl BinaryImage {
    /// Map `path` and parse it, detecting the format unless one is forced.
    pub fn open(path: impl AsRef<Path>, format: Option<Format>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = FileBytes::map(path)?;
        let image = Self::parse(bytes, format)?;
        info!("opened {} ({} bytes, {})", path.display(), image.len(), image.format);
        Ok(image)
    }

    pub fn from_bytes(bytes: Vec<u8>, format: Option<Format>) -> Result<Self> {
        Self::parse(FileBytes::from(bytes), format)
    }

    fn parse(bytes: FileBytes, format: Option<Format>) -> Result<Self> {
        let format = match format {
            Some(format) => format,
            None => Format::detect(&bytes).ok_or(Error::UnknownFormat)?,
        };
        let layout = match format {
            Format::Elf => elf::parse(&bytes)?,
            Format::Pe => return Err(Error::UnsupportedFormat("PE")),
        };
        Ok(Self::with_layout(bytes, format, layout))
    }

    /// Build an image around an already parsed layout.
    pub fn with_layout(bytes: FileBytes, format: Format, layout: Layout) -> Self {
        let mut symbols: HashMap<u64, Vec<SymbolRef>> = HashMap::new();
        for (section_index, section) in layout.sections.iter().enumerate() {
            for (symbol_index, symbol) in section.symbols.iter().enumerate() {
                symbols.entry(symbol.value).or_default().push(SymbolRef {
                    section: section_index,
                    symbol: symbol_index,
                });
            }
        }
        Self {
            bytes,
            format,
            layout,
            symbols,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn machine(&self) -> u16 {
        self.layout.machine
    }

    pub fn architecture(&self) -> Result<Architecture> {
        match self.format {
            Format::Elf => Architecture::from_elf_machine(self.layout.machine),
            Format::Pe => Err(Error::UnsupportedFormat("PE")),
        }
    }

    pub fn entry(&self) -> u64 {
        self.layout.entry
    }

    pub fn set_entry(&mut self, entry: u64) {
        self.layout.entry = entry;
    }

    pub fn nx(&self) -> bool {
        self.layout.nx
    }

    pub fn pie(&self) -> bool {
        self.layout.pie
    }

    /// Segments in file order.
    pub fn segments(&self) -> &[Segment] {
        &self.layout.segments
    }

    pub fn loadable_segments(&self) -> impl Iterator<Item = &Segment> {
        self.layout.segments.iter().filter(|seg| seg.kind == PT_LOAD)
    }

    pub fn sections(&self) -> &[Section] {
        &self.layout.sections
    }

    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.layout.sections.iter().flat_map(|sec| sec.symbols.iter())
    }

    /// Symbols recorded at exactly `address`, in table order.
    pub fn symbols_at(&self, address: u64) -> impl Iterator<Item = &Symbol> {
        self.symbols
            .get(&address)
            .into_iter()
            .flatten()
            .map(|r| &self.layout.sections[r.section].symbols[r.symbol])
    }

    /// File bytes backing a segment.
    pub fn segment_data(&self, segment: &Segment) -> Result<&[u8]> {
        segment
            .file_range()
            .and_then(|range| self.bytes.get(range))
            .ok_or_else(|| {
                Error::Malformed(format!(
                    "segment {} file range {:#x}+{:#x} exceeds file size {:#x}",
                    segment.index,
                    segment.file_offset,
                    segment.file_size,
                    self.len()
                ))
            })
    }

    pub fn section_data(&self, section: &Section) -> Option<&[u8]> {
        self.bytes.get(section.file_range.clone()?)
    }

    pub fn translator(&self) -> AddressTranslator<'_> {
        AddressTranslator::new(self)
    }

    /// Log the structural model.
    pub fn dump(&self) {
        info!("{} segment(s):", self.segments().len());
        for seg in self.segments() {
            info!(
                "\t[{}], type={:#x}, flags={:?}, vaddr={:#010x}, paddr={:#010x}, filesz={:#x}, memsz={:#x}",
                seg.index,
                seg.kind,
                seg.flags,
                seg.virtual_address,
                seg.physical_address,
                seg.file_size,
                seg.memory_size
            );
        }
        info!("{} section(s):", self.sections().len());
        for sec in self.sections() {
            info!(
                "\t[{}]: {}, type={:#x}, flags={:#x}, address={:#010x}, symbols={}",
                sec.index,
                sec.name,
                sec.kind,
                sec.flags,
                sec.address,
                sec.symbols.len()
            );
        }
        match self.architecture() {
            Ok(arch) => info!("architecture: {arch}"),
            Err(err) => warn!("architecture: {err}"),
        }
        info!("entry: {:#x}", self.entry());
        info!("NX: {}", self.nx());
        info!("PIE: {}", self.pie());
    }
}
