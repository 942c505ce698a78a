use goblin::elf::header::ET_DYN;
use goblin::elf::program_header::{PF_R, PF_W, PF_X, PT_GNU_STACK};
use goblin::elf::section_header::{SHT_DYNSYM, SHT_NOBITS, SHT_SYMTAB};
use goblin::elf::sym::Symtab;
use goblin::elf::{Elf, ProgramHeader, SectionHeader};
use goblin::strtab::Strtab;
use log::debug;

use super::Layout;
use super::component::{Section, Segment, SegmentFlags, Symbol};
use crate::vm::{Error, Result};

const SHN_UNDEF: usize = 0;
const SHN_LORESERVE: usize = 0xff00;

/// Translate an ELF file into the format-independent layout.
pub(super) fn parse(bytes: &[u8]) -> Result<Layout> {
    let elf = Elf::parse(bytes)?;
    debug!("start ELF parsing");

    debug!("segment number: {}", elf.program_headers.len());
    let segments = elf
        .program_headers
        .iter()
        .enumerate()
        .map(|(index, ph)| segment(index, ph))
        .collect::<Result<Vec<_>>>()?;

    // A stack marker carrying the execute flag is the only way to lose NX.
    let nx = !elf
        .program_headers
        .iter()
        .any(|ph| ph.p_type == PT_GNU_STACK && ph.p_flags & PF_X != 0);
    let pie = elf.header.e_type == ET_DYN;

    debug!("section number: {}", elf.section_headers.len());
    let sections = elf
        .section_headers
        .iter()
        .enumerate()
        .map(|(index, sh)| section(&elf, bytes.len(), index, sh))
        .collect();

    Ok(Layout {
        machine: elf.header.e_machine,
        entry: elf.entry,
        nx,
        pie,
        segments,
        sections,
    })
}

fn segment(index: usize, ph: &ProgramHeader) -> Result<Segment> {
    if ph.p_memsz < ph.p_filesz {
        return Err(Error::Malformed(format!(
            "segment {index} has memory size {:#x} smaller than file size {:#x}",
            ph.p_memsz, ph.p_filesz
        )));
    }

    let mut flags = SegmentFlags::empty();
    if ph.p_flags & PF_X != 0 {
        flags |= SegmentFlags::EXEC;
    }
    if ph.p_flags & PF_W != 0 {
        flags |= SegmentFlags::WRITE;
    }
    if ph.p_flags & PF_R != 0 {
        flags |= SegmentFlags::READ;
    }

    Ok(Segment {
        index,
        kind: ph.p_type,
        flags,
        file_offset: ph.p_offset,
        file_size: ph.p_filesz,
        memory_size: ph.p_memsz,
        virtual_address: ph.p_vaddr,
        physical_address: ph.p_paddr,
        alignment: ph.p_align,
    })
}

fn section(elf: &Elf<'_>, file_len: usize, index: usize, sh: &SectionHeader) -> Section {
    let name = elf
        .shdr_strtab
        .get_at(sh.sh_name)
        .unwrap_or("<unknown>")
        .to_string();

    let file_range = if sh.sh_type == SHT_NOBITS {
        None
    } else {
        usize::try_from(sh.sh_offset)
            .ok()
            .zip(usize::try_from(sh.sh_size).ok())
            .and_then(|(start, len)| Some(start..start.checked_add(len)?))
            .filter(|range| range.end <= file_len)
    };

    let symbols = match sh.sh_type {
        SHT_SYMTAB => symbols(&elf.syms, &elf.strtab),
        SHT_DYNSYM => symbols(&elf.dynsyms, &elf.dynstrtab),
        _ => Vec::new(),
    };

    Section {
        index,
        name,
        kind: sh.sh_type,
        flags: sh.sh_flags,
        address: sh.sh_addr,
        size: sh.sh_size,
        link: sh.sh_link,
        info: sh.sh_info,
        align: sh.sh_addralign,
        entry_size: sh.sh_entsize,
        file_range,
        symbols,
    }
}

fn symbols(table: &Symtab<'_>, strings: &Strtab<'_>) -> Vec<Symbol> {
    table
        .iter()
        .enumerate()
        .map(|(index, sym)| Symbol {
            index,
            name: strings.get_at(sym.st_name).unwrap_or("").to_string(),
            value: sym.st_value,
            size: sym.st_size,
            kind: sym.st_type(),
            section: (sym.st_shndx != SHN_UNDEF && sym.st_shndx < SHN_LORESERVE)
                .then_some(sym.st_shndx),
        })
        .collect()
}
