//! Base-address region discovery and mapping.
//!
//! [`scan_and_map`] walks a function's six base-address slots, records every
//! populated one as a [`MappedRegion`], and maps the memory-kind ones through
//! a [`RegionMapper`]. [`unmap_all`] is the inverse. The driver core calls
//! both; they are also usable on their own against any [`PciFunction`].

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::num::NonZeroU64;
use std::rc::Rc;

use keel_pci::config::PCI_BAR_COUNT;
use keel_pci::{PciFunction, ResourceFlags};
use thiserror::Error;

use crate::uio::{MAX_UIO_MAPS, MAX_UIO_PORT_REGIONS};

/// How a base-address region is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    /// Decodes memory transactions; mapped for load/store access.
    Memory,
    /// Decodes I/O port transactions; recorded by range, never mapped.
    Port,
}

/// Kernel-visible address of one successful mapping.
///
/// Address-space mappings never land at zero, which keeps the niche free
/// for `Option<MappedPtr>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MappedPtr(NonZeroU64);

impl MappedPtr {
    pub fn new(addr: u64) -> Option<Self> {
        NonZeroU64::new(addr).map(Self)
    }

    pub fn addr(self) -> u64 {
        self.0.get()
    }
}

const BAR_NAMES: [&str; PCI_BAR_COUNT] = ["BAR0", "BAR1", "BAR2", "BAR3", "BAR4", "BAR5"];

/// One discovered base-address region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedRegion {
    /// Stable label, `"BAR0"` through `"BAR5"`.
    pub name: &'static str,
    pub kind: RegionKind,
    /// Base-address slot the region came from.
    pub bar: usize,
    pub phys_addr: u64,
    pub size: u64,
    /// Present iff `kind` is [`RegionKind::Memory`] and the region is
    /// currently mapped.
    pub mapped: Option<MappedPtr>,
}

/// Address-space service memory regions are mapped through.
pub trait RegionMapper {
    fn map(&mut self, phys_addr: u64, len: u64) -> Result<MappedPtr, MapError>;
    fn unmap(&mut self, ptr: MappedPtr);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MapError {
    #[error("physical range {phys_addr:#x}..+{len:#x} is not mappable")]
    Unmappable { phys_addr: u64, len: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegionError {
    /// No slot held a memory or port region.
    #[error("device exposes no usable base-address region")]
    NoUsableRegion,

    #[error("mapping BAR{bar} failed: {source}")]
    MapFailed {
        bar: usize,
        #[source]
        source: MapError,
    },

    #[error("device exposes more than {limit} {kind:?} regions")]
    TooManyRegions { kind: RegionKind, limit: usize },
}

/// Walks all six base-address slots of `func` in ascending order, appending
/// each populated one to `regions`.
///
/// Memory regions are mapped through `mmio` as they are found; port regions
/// are recorded by range only. Slots with a zero start or length are
/// unpopulated, and slots flagged neither memory nor port are upper halves
/// of 64-bit regions; both are skipped.
///
/// On failure the regions recorded before the failing slot stay in
/// `regions`, still mapped. Releasing them is the caller's job: only the
/// caller knows what else a failed attach has to reverse, and it does so
/// through one path for everything.
pub fn scan_and_map(
    func: &dyn PciFunction,
    mmio: &mut dyn RegionMapper,
    regions: &mut Vec<MappedRegion>,
) -> Result<(), RegionError> {
    let mut memory_regions = 0;
    let mut port_regions = 0;

    for bar in 0..PCI_BAR_COUNT {
        let resource = func.bar_resource(bar);
        if resource.start == 0 || resource.len == 0 {
            continue;
        }

        if resource.flags.contains(ResourceFlags::MEM) {
            if memory_regions == MAX_UIO_MAPS {
                return Err(RegionError::TooManyRegions {
                    kind: RegionKind::Memory,
                    limit: MAX_UIO_MAPS,
                });
            }
            let mapped = mmio
                .map(resource.start, resource.len)
                .map_err(|source| RegionError::MapFailed { bar, source })?;
            regions.push(MappedRegion {
                name: BAR_NAMES[bar],
                kind: RegionKind::Memory,
                bar,
                phys_addr: resource.start,
                size: resource.len,
                mapped: Some(mapped),
            });
            memory_regions += 1;
        } else if resource.flags.contains(ResourceFlags::IO) {
            if port_regions == MAX_UIO_PORT_REGIONS {
                return Err(RegionError::TooManyRegions {
                    kind: RegionKind::Port,
                    limit: MAX_UIO_PORT_REGIONS,
                });
            }
            regions.push(MappedRegion {
                name: BAR_NAMES[bar],
                kind: RegionKind::Port,
                bar,
                phys_addr: resource.start,
                size: resource.len,
                mapped: None,
            });
            port_regions += 1;
        }
        // Neither flag: upper half of the preceding 64-bit region.
    }

    if memory_regions == 0 && port_regions == 0 {
        return Err(RegionError::NoUsableRegion);
    }
    Ok(())
}

/// Releases every mapping recorded in `regions`.
///
/// Pointers are taken out of the regions as they are unmapped, so a second
/// pass over the same slice does nothing. Port regions hold no mapping and
/// are left alone.
pub fn unmap_all(mmio: &mut dyn RegionMapper, regions: &mut [MappedRegion]) {
    for region in regions.iter_mut() {
        if let Some(ptr) = region.mapped.take() {
            mmio.unmap(ptr);
        }
    }
}

#[derive(Debug, Default)]
struct MappingLogState {
    next_token: u64,
    live: BTreeMap<u64, (u64, u64)>,
    map_calls: u64,
    unmap_calls: u64,
    fail_phys: Vec<u64>,
}

/// Recording [`RegionMapper`] that mints deterministic address tokens
/// instead of touching a real address space.
///
/// Clones share one record, so a test or embedder can keep a handle while
/// the driver owns the mapper. Unmapping a token that is not live panics:
/// that catches a double release at the site of the extra call.
#[derive(Debug, Clone, Default)]
pub struct MappingLog {
    state: Rc<RefCell<MappingLogState>>,
}

const MAPPING_TOKEN_BASE: u64 = 0xffff_9000_0000_0000;

impl MappingLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every future mapping of `phys_addr` fail.
    pub fn fail_phys_addr(&self, phys_addr: u64) {
        self.state.borrow_mut().fail_phys.push(phys_addr);
    }

    /// Mappings created and not yet released.
    pub fn live_mappings(&self) -> usize {
        self.state.borrow().live.len()
    }

    pub fn is_live(&self, ptr: MappedPtr) -> bool {
        self.state.borrow().live.contains_key(&ptr.addr())
    }

    pub fn map_calls(&self) -> u64 {
        self.state.borrow().map_calls
    }

    pub fn unmap_calls(&self) -> u64 {
        self.state.borrow().unmap_calls
    }
}

impl RegionMapper for MappingLog {
    fn map(&mut self, phys_addr: u64, len: u64) -> Result<MappedPtr, MapError> {
        let mut state = self.state.borrow_mut();
        state.map_calls += 1;
        if state.fail_phys.contains(&phys_addr) {
            return Err(MapError::Unmappable { phys_addr, len });
        }
        state.next_token += 1;
        let token = MAPPING_TOKEN_BASE | (state.next_token << 12);
        state.live.insert(token, (phys_addr, len));
        Ok(MappedPtr::new(token).expect("token base is non-zero"))
    }

    fn unmap(&mut self, ptr: MappedPtr) {
        let mut state = self.state.borrow_mut();
        state.unmap_calls += 1;
        let removed = state.live.remove(&ptr.addr());
        assert!(
            removed.is_some(),
            "unmap of {:#x}, which is not a live mapping",
            ptr.addr()
        );
    }
}
