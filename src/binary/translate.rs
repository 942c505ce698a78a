use super::{BinaryImage, Segment, Symbol};

/// Lookups between virtual addresses, file offsets and symbols.
#[derive(Clone, Copy)]
pub struct AddressTranslator<'i> {
    image: &'i BinaryImage,
}

impl<'i> AddressTranslator<'i> {
    pub fn new(image: &'i BinaryImage) -> Self {
        Self { image }
    }

    /// First segment, in file order, whose memory range covers `address`.
    pub fn segment_of(&self, address: u64) -> Option<&'i Segment> {
        self.image
            .segments()
            .iter()
            .find(|seg| seg.contains(address).is_some())
    }

    pub fn file_offset_of(&self, address: u64) -> Option<u64> {
        self.image
            .segments()
            .iter()
            .find_map(|seg| seg.contains(address))
    }

    /// Exact-address lookup; the first symbol recorded there wins.
    pub fn symbol_at(&self, address: u64) -> Option<&'i Symbol> {
        self.image.symbols_at(address).next()
    }

    /// Address and size of the first symbol called `name`.
    pub fn resolve_entry(&self, name: &str) -> Option<(u64, u64)> {
        self.image
            .symbols()
            .find(|sym| sym.name == name)
            .map(|sym| (sym.value, sym.size))
    }
}

#[cfg(test)]
mod tests {
    use crate::binary::tests::{image, load_segment, symbol};

    #[test]
    fn file_offset_round_trips_through_segments() {
        let img = image(
            vec![
                load_segment(0, 0x600e10, 0x1e10, 0x200, 0x400),
                load_segment(1, 0x400000, 0x0, 0x1100, 0x1100),
            ],
            vec![],
            0x2100,
        );
        let translator = img.translator();
        for seg in img.segments() {
            for addr in [
                seg.virtual_address,
                seg.virtual_address + 1,
                seg.virtual_address + seg.memory_size / 2,
                seg.virtual_address + seg.memory_size,
            ] {
                let offset = translator.file_offset_of(addr).unwrap();
                assert_eq!(offset, seg.file_offset + (addr - seg.virtual_address));
                assert_eq!(translator.segment_of(addr).unwrap().index, seg.index);
            }
        }
        assert_eq!(translator.file_offset_of(0x500000), None);
        assert!(translator.segment_of(0x500000).is_none());
    }

    #[test]
    fn symbol_lookup_is_exact() {
        let img = image(
            vec![],
            vec![symbol(0, "main", 0x401000, 16), symbol(1, "other", 0x401000, 4)],
            0,
        );
        let translator = img.translator();
        assert_eq!(translator.symbol_at(0x401000).unwrap().name, "main");
        assert!(translator.symbol_at(0x401001).is_none());
        assert!(translator.symbol_at(0x400fff).is_none());
    }

    #[test]
    fn resolve_entry_takes_first_match() {
        let img = image(
            vec![],
            vec![
                symbol(0, "start", 0x401100, 8),
                symbol(1, "main", 0x401000, 16),
                symbol(2, "main", 0x402000, 32),
            ],
            0,
        );
        let translator = img.translator();
        assert_eq!(translator.resolve_entry("main"), Some((0x401000, 16)));
        assert_eq!(translator.resolve_entry("missing"), None);
    }
}
