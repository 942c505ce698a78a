//! Minimal ELF writer for integration tests.
//!
//! Produces a file with program headers, raw content at chosen offsets and a
//! `.symtab`/`.strtab`/`.shstrtab` trio appended after the content.

#![allow(dead_code)]

use goblin::elf::header::{EM_386, EM_X86_64, ET_DYN, ET_EXEC};
use goblin::elf::program_header::{PF_R, PF_W, PF_X, PT_GNU_STACK, PT_LOAD, PT_NOTE};
use goblin::elf::section_header::{SHT_STRTAB, SHT_SYMTAB};
use goblin::elf::sym::{STB_GLOBAL, STT_FUNC};

const SHN_ABS: u16 = 0xfff1;

pub const RX: u32 = PF_R | PF_X;
pub const RW: u32 = PF_R | PF_W;

struct Phdr {
    kind: u32,
    flags: u32,
    offset: u64,
    vaddr: u64,
    filesz: u64,
    memsz: u64,
}

struct Sym {
    name: String,
    value: u64,
    size: u64,
}

pub struct ElfBuilder {
    class64: bool,
    pie: bool,
    entry: u64,
    phdrs: Vec<Phdr>,
    symbols: Vec<Sym>,
    content: Vec<u8>,
}

impl ElfBuilder {
    pub fn x86_64() -> Self {
        Self::new(true)
    }

    pub fn x86() -> Self {
        Self::new(false)
    }

    fn new(class64: bool) -> Self {
        Self {
            class64,
            pie: false,
            entry: 0,
            phdrs: Vec::new(),
            symbols: Vec::new(),
            content: Vec::new(),
        }
    }

    pub fn entry(mut self, entry: u64) -> Self {
        self.entry = entry;
        self
    }

    pub fn pie(mut self) -> Self {
        self.pie = true;
        self
    }

    /// Place `bytes` at `offset` in the file.
    pub fn bytes_at(mut self, offset: usize, bytes: &[u8]) -> Self {
        if self.content.len() < offset + bytes.len() {
            self.content.resize(offset + bytes.len(), 0);
        }
        self.content[offset..offset + bytes.len()].copy_from_slice(bytes);
        self
    }

    /// Make sure the content area spans at least `len` bytes.
    pub fn pad_to(mut self, len: usize) -> Self {
        if self.content.len() < len {
            self.content.resize(len, 0);
        }
        self
    }

    pub fn load(mut self, vaddr: u64, offset: u64, filesz: u64, memsz: u64, flags: u32) -> Self {
        self.phdrs.push(Phdr {
            kind: PT_LOAD,
            flags,
            offset,
            vaddr,
            filesz,
            memsz,
        });
        self
    }

    pub fn note(mut self, vaddr: u64, offset: u64, size: u64) -> Self {
        self.phdrs.push(Phdr {
            kind: PT_NOTE,
            flags: PF_R,
            offset,
            vaddr,
            filesz: size,
            memsz: size,
        });
        self
    }

    pub fn gnu_stack(mut self, executable: bool) -> Self {
        self.phdrs.push(Phdr {
            kind: PT_GNU_STACK,
            flags: if executable { RW | PF_X } else { RW },
            offset: 0,
            vaddr: 0,
            filesz: 0,
            memsz: 0,
        });
        self
    }

    pub fn symbol(mut self, name: &str, value: u64, size: u64) -> Self {
        self.symbols.push(Sym {
            name: name.to_string(),
            value,
            size,
        });
        self
    }

    pub fn build(self) -> Vec<u8> {
        let (ehsize, phentsize, shentsize, symentsize) = if self.class64 {
            (64usize, 56usize, 64usize, 24usize)
        } else {
            (52, 32, 40, 16)
        };
        let headers_end = ehsize + phentsize * self.phdrs.len();
        assert!(
            self.content.len() <= ehsize
                || self.content[ehsize..headers_end.min(self.content.len())]
                    .iter()
                    .all(|b| *b == 0),
            "content overlaps the program headers"
        );

        let mut file = self.content.clone();
        if file.len() < headers_end {
            file.resize(headers_end, 0);
        }

        // .strtab
        let mut strtab = vec![0u8];
        let mut name_offsets = Vec::new();
        for sym in &self.symbols {
            name_offsets.push(strtab.len() as u32);
            strtab.extend_from_slice(sym.name.as_bytes());
            strtab.push(0);
        }

        // .symtab, starting with the null symbol
        let mut symtab = vec![0u8; symentsize];
        for (sym, name) in self.symbols.iter().zip(&name_offsets) {
            let info = (STB_GLOBAL << 4) | STT_FUNC;
            if self.class64 {
                symtab.extend_from_slice(&name.to_le_bytes());
                symtab.push(info);
                symtab.push(0);
                symtab.extend_from_slice(&SHN_ABS.to_le_bytes());
                symtab.extend_from_slice(&sym.value.to_le_bytes());
                symtab.extend_from_slice(&sym.size.to_le_bytes());
            } else {
                symtab.extend_from_slice(&name.to_le_bytes());
                symtab.extend_from_slice(&(sym.value as u32).to_le_bytes());
                symtab.extend_from_slice(&(sym.size as u32).to_le_bytes());
                symtab.push(info);
                symtab.push(0);
                symtab.extend_from_slice(&SHN_ABS.to_le_bytes());
            }
        }

        let shstrtab = b"\0.symtab\0.strtab\0.shstrtab\0".to_vec();
        let (symtab_name, strtab_name, shstrtab_name) = (1u32, 9u32, 17u32);

        align(&mut file, 8);
        let symtab_off = file.len();
        file.extend_from_slice(&symtab);
        let strtab_off = file.len();
        file.extend_from_slice(&strtab);
        let shstrtab_off = file.len();
        file.extend_from_slice(&shstrtab);
        align(&mut file, 8);
        let shoff = file.len();

        let sections = [
            (0u32, 0u32, 0usize, 0usize, 0u32, 0u32, 0u64, 0u64),
            (
                symtab_name,
                SHT_SYMTAB,
                symtab_off,
                symtab.len(),
                2,
                1,
                8,
                symentsize as u64,
            ),
            (strtab_name, SHT_STRTAB, strtab_off, strtab.len(), 0, 0, 1, 0),
            (shstrtab_name, SHT_STRTAB, shstrtab_off, shstrtab.len(), 0, 0, 1, 0),
        ];
        for (name, kind, offset, size, link, info, align, entsize) in sections {
            let mut w = Writer::new(&mut file, self.class64);
            w.u32(name);
            w.u32(kind);
            w.word(0); // flags
            w.word(0); // addr
            w.word(offset as u64);
            w.word(size as u64);
            w.u32(link);
            w.u32(info);
            w.word(align);
            w.word(entsize);
        }
        debug_assert_eq!(file.len(), shoff + shentsize * sections.len());

        // ELF header
        let mut header = Vec::with_capacity(ehsize);
        header.extend_from_slice(b"\x7fELF");
        header.push(if self.class64 { 2 } else { 1 });
        header.push(1); // little endian
        header.push(1); // version
        header.resize(16, 0);
        {
            let mut w = Writer::new(&mut header, self.class64);
            w.u16(if self.pie { ET_DYN } else { ET_EXEC });
            w.u16(if self.class64 { EM_X86_64 } else { EM_386 });
            w.u32(1);
            w.word(self.entry);
            w.word(ehsize as u64);
            w.word(shoff as u64);
            w.u32(0);
            w.u16(ehsize as u16);
            w.u16(phentsize as u16);
            w.u16(self.phdrs.len() as u16);
            w.u16(shentsize as u16);
            w.u16(sections.len() as u16);
            w.u16(3);
        }
        assert_eq!(header.len(), ehsize);
        file[..ehsize].copy_from_slice(&header);

        // Program headers
        let mut phdrs = Vec::with_capacity(phentsize * self.phdrs.len());
        for ph in &self.phdrs {
            let mut w = Writer::new(&mut phdrs, self.class64);
            w.u32(ph.kind);
            if self.class64 {
                w.u32(ph.flags);
            }
            w.word(ph.offset);
            w.word(ph.vaddr);
            w.word(ph.vaddr);
            w.word(ph.filesz);
            w.word(ph.memsz);
            if !self.class64 {
                w.u32(ph.flags);
            }
            w.word(0x1000);
        }
        file[ehsize..headers_end].copy_from_slice(&phdrs);
        file
    }
}

fn align(buf: &mut Vec<u8>, to: usize) {
    let len = buf.len().div_ceil(to) * to;
    buf.resize(len, 0);
}

struct Writer<'b> {
    buf: &'b mut Vec<u8>,
    class64: bool,
}

impl<'b> Writer<'b> {
    fn new(buf: &'b mut Vec<u8>, class64: bool) -> Self {
        Self { buf, class64 }
    }

    fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Address-sized field.
    fn word(&mut self, v: u64) {
        if self.class64 {
            self.buf.extend_from_slice(&v.to_le_bytes());
        } else {
            self.buf.extend_from_slice(&(v as u32).to_le_bytes());
        }
    }
}
