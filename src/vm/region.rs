use std::fmt;

use log::{debug, error, warn};
use unicorn_engine::Unicorn;
use unicorn_engine::unicorn_const::Permission;

use super::{Error, PAGE_SIZE, Result};

/// One contiguous, page-aligned mapping inside the emulator.
///
/// A region does not hold on to the emulator. Whoever owns it must call
/// [`MemoryRegion::unmap`] before dropping it.
#[derive(Debug)]
pub struct MemoryRegion {
    address: u64,
    size: u64,
    perms: Permission,
    good: bool,
    mapped: bool,
}

impl MemoryRegion {
    pub fn new(address: u64, size: u64, perms: Permission) -> Result<Self> {
        if address % PAGE_SIZE != 0 || size % PAGE_SIZE != 0 || size == 0 {
            return Err(Error::Misaligned { address, size });
        }
        if address.checked_add(size).is_none() {
            return Err(Error::AddressOverflow { address, size });
        }
        Ok(Self {
            address,
            size,
            perms,
            good: true,
            mapped: false,
        })
    }

    /// Create the region and map it right away.
    pub fn map_new<D>(
        uc: &mut Unicorn<'_, D>,
        address: u64,
        size: u64,
        perms: Permission,
    ) -> Result<Self> {
        let mut region = Self::new(address, size, perms)?;
        region.map(uc)?;
        Ok(region)
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn end(&self) -> u64 {
        self.address + self.size
    }

    pub fn perms(&self) -> Permission {
        self.perms
    }

    /// Whether the last operation on the region succeeded.
    pub fn good(&self) -> bool {
        self.good
    }

    pub fn mapped(&self) -> bool {
        self.mapped
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.address && address < self.end()
    }

    pub fn map<D>(&mut self, uc: &mut Unicorn<'_, D>) -> Result<()> {
        if self.mapped {
            warn!("cannot map {self}: already mapped");
            return Ok(());
        }
        let size = usize::try_from(self.size).map_err(|_| Error::Misaligned {
            address: self.address,
            size: self.size,
        })?;
        if let Err(e) = uc.mem_map(self.address, size, self.perms) {
            error!("unable to map {self}: {e:?}");
            self.good = false;
            return Err(Error::emulator(format!("unable to map {self}"), e));
        }
        debug!("{self} is mapped");
        self.mapped = true;
        self.good = true;
        Ok(())
    }

    /// Unmapping an unmapped region only warns.
    pub fn unmap<D>(&mut self, uc: &mut Unicorn<'_, D>) -> Result<()> {
        if !self.mapped {
            warn!("cannot unmap {self}: not mapped");
            return Ok(());
        }
        if let Err(e) = uc.mem_unmap(self.address, self.size as usize) {
            error!("unable to unmap {self}: {e:?}");
            self.good = false;
            return Err(Error::emulator(format!("unable to unmap {self}"), e));
        }
        debug!("{self} is unmapped");
        self.mapped = false;
        self.good = true;
        Ok(())
    }

    pub fn protect<D>(&mut self, uc: &mut Unicorn<'_, D>, perms: Permission) -> Result<()> {
        if !self.mapped {
            warn!("cannot protect {self}: not mapped");
            return Ok(());
        }
        if let Err(e) = uc.mem_protect(self.address, self.size as usize, perms) {
            error!("unable to protect {self}: {e:?}");
            self.good = false;
            return Err(Error::emulator(format!("unable to protect {self}"), e));
        }
        self.perms = perms;
        self.good = true;
        Ok(())
    }
}

impl Drop for MemoryRegion {
    fn drop(&mut self) {
        if self.mapped {
            warn!("{self} dropped while still mapped");
        }
    }
}

impl fmt::Display for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Region({:#x}->{:#x}, {}, ",
            self.address,
            self.end(),
            self.size
        )?;
        let mut names = Vec::new();
        if self.perms.contains(Permission::READ) {
            names.push("READ");
        }
        if self.perms.contains(Permission::WRITE) {
            names.push("WRITE");
        }
        if self.perms.contains(Permission::EXEC) {
            names.push("EXEC");
        }
        if names.is_empty() {
            names.push("NONE");
        }
        write!(f, "{})", names.join("|"))
    }
}
