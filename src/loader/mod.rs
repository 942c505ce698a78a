//! Projection of an image's loadable segments into emulator memory.

mod mapping;

use log::{error, info};
use unicorn_engine::Unicorn;

pub use self::mapping::{SegmentMapping, permissions};
use crate::binary::{BinaryImage, Segment};
use crate::vm::{Error, MemoryRegion, Result};

pub struct AddressSpaceBuilder<'i> {
    image: &'i BinaryImage,
}

impl<'i> AddressSpaceBuilder<'i> {
    pub fn new(image: &'i BinaryImage) -> Self {
        Self { image }
    }

    /// Map every loadable segment in file order.
    ///
    /// Regions are pushed into `regions` as soon as they are mapped, so a
    /// failure part way through leaves the earlier ones in place.
    pub fn build<D>(&self, uc: &mut Unicorn<'_, D>, regions: &mut Vec<MemoryRegion>) -> Result<()> {
        for segment in self.image.loadable_segments() {
            self.load_segment(uc, segment, regions)?;
        }
        info!("segments loaded successfully in RAM");
        Ok(())
    }

    pub fn load_segment<D>(
        &self,
        uc: &mut Unicorn<'_, D>,
        segment: &Segment,
        regions: &mut Vec<MemoryRegion>,
    ) -> Result<()> {
        let Some(mapping) = SegmentMapping::plan(segment)? else {
            info!("segment {} is empty, skipped", segment.index);
            return Ok(());
        };
        let data = self.image.segment_data(segment)?;

        let region = MemoryRegion::map_new(uc, mapping.base, mapping.size, mapping.perms)?;
        let description = region.to_string();
        regions.push(region);

        // The tail between file size and memory size stays zero from the
        // fresh mapping.
        if let Err(e) = uc.mem_write(segment.virtual_address, data) {
            error!(
                "unable to copy {} bytes from binary (at offset {:#x}) to {description} at {:#x}: {e:?}",
                data.len(),
                segment.file_offset,
                segment.virtual_address
            );
            return Err(Error::emulator(
                format!(
                    "unable to copy segment {} to {:#x}",
                    segment.index, segment.virtual_address
                ),
                e,
            ));
        }
        info!(
            "segment {} mapped: copied {} bytes from offset {:#x} to {description} at {:#x}",
            segment.index,
            data.len(),
            segment.file_offset,
            segment.virtual_address
        );
        Ok(())
    }
}
