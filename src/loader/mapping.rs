use unicorn_engine::unicorn_const::Permission;

use crate::binary::{Segment, SegmentFlags};
use crate::vm::{Error, PAGE_SIZE, Result, page_align_down, page_align_up};

/// Where and how a segment lands in the emulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentMapping {
    pub base: u64,
    pub size: u64,
    pub perms: Permission,
}

impl SegmentMapping {
    /// Plan the mapping for `segment`; `None` for segments with nothing to map.
    pub fn plan(segment: &Segment) -> Result<Option<Self>> {
        if segment.memory_size == 0 && segment.file_size == 0 {
            return Ok(None);
        }
        let overflow = || {
            Error::Malformed(format!(
                "segment {} at {:#x} (size {:#x}) overflows the address space",
                segment.index, segment.virtual_address, segment.memory_size
            ))
        };

        let mut size = page_align_up(segment.memory_size).ok_or_else(overflow)?;
        let base = page_align_down(segment.virtual_address);

        // An unaligned start eats into the last page.
        let end = segment
            .virtual_address
            .checked_add(segment.file_size.max(segment.memory_size))
            .ok_or_else(overflow)?;
        let mapped_end = base.checked_add(size).ok_or_else(overflow)?;
        if end > mapped_end {
            size = size.checked_add(PAGE_SIZE).ok_or_else(overflow)?;
            base.checked_add(size).ok_or_else(overflow)?;
        }

        Ok(Some(Self {
            base,
            size,
            perms: permissions(segment.flags),
        }))
    }

    pub fn end(&self) -> u64 {
        self.base + self.size
    }
}

pub fn permissions(flags: SegmentFlags) -> Permission {
    let mut perms = Permission::NONE;
    if flags.contains(SegmentFlags::EXEC) {
        perms |= Permission::EXEC;
    }
    if flags.contains(SegmentFlags::READ) {
        perms |= Permission::READ;
    }
    if flags.contains(SegmentFlags::WRITE) {
        perms |= Permission::WRITE;
    }
    perms
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::tests::load_segment;

    fn plan(vaddr: u64, filesz: u64, memsz: u64) -> SegmentMapping {
        SegmentMapping::plan(&load_segment(0, vaddr, 0, filesz, memsz))
            .unwrap()
            .unwrap()
    }

    #[test]
    fn unaligned_segments_cover_their_bytes() {
        for (vaddr, filesz, memsz) in [
            (0x401ffc, 8, 8),
            (0x400010, 0x1000, 0x1000),
            (0x400fff, 1, 0x2001),
            (0x600e10, 0x228, 0x230),
            (0x401000, 0x1000, 0x1000),
        ] {
            let m = plan(vaddr, filesz, memsz);
            assert_eq!(m.base, vaddr & !0xfff);
            assert_eq!(m.size % PAGE_SIZE, 0);
            assert!(m.end() >= vaddr + filesz);
            assert!(m.end() >= vaddr + memsz);
        }
    }

    #[test]
    fn straddling_segment_gets_two_pages() {
        let m = plan(0x401ffc, 8, 8);
        assert_eq!(m.base, 0x401000);
        assert_eq!(m.size, 0x2000);
    }

    #[test]
    fn aligned_segment_is_not_grown() {
        let m = plan(0x400000, 0x1000, 0x1000);
        assert_eq!(m.size, 0x1000);
    }

    #[test]
    fn empty_segment_is_skipped() {
        assert!(SegmentMapping::plan(&load_segment(0, 0x400000, 0, 0, 0)).unwrap().is_none());
    }

    #[test]
    fn overflowing_segment_is_malformed() {
        assert!(matches!(
            SegmentMapping::plan(&load_segment(0, u64::MAX - 0x10, 0, 0x100, 0x100)),
            Err(Error::Malformed(_))
        ));
        // unaligned start grows the mapping into 2^64
        assert!(matches!(
            SegmentMapping::plan(&load_segment(0, 0xffff_ffff_ffff_e800, 0, 0, 0x1000)),
            Err(Error::Malformed(_))
        ));
        // top page rounds up to 2^64
        assert!(matches!(
            SegmentMapping::plan(&load_segment(0, 0xffff_ffff_ffff_f000, 0, 0, 0x800)),
            Err(Error::Malformed(_))
        ));
    }

    #[test]
    fn permissions_follow_flags() {
        assert_eq!(permissions(SegmentFlags::empty()), Permission::NONE);
        assert_eq!(
            permissions(SegmentFlags::READ | SegmentFlags::EXEC),
            Permission::READ | Permission::EXEC
        );
        assert_eq!(
            permissions(SegmentFlags::READ | SegmentFlags::WRITE),
            Permission::READ | Permission::WRITE
        );
    }
}
