//! The boundary to the user-space I/O framework.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use keel_pci::PciAddress;

use crate::region::{MappedPtr, RegionKind};

/// Most memory regions one published interface may expose.
pub const MAX_UIO_MAPS: usize = 5;
/// Most port regions one published interface may expose.
pub const MAX_UIO_PORT_REGIONS: usize = 5;

/// One region as published to the framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UioRegionDesc {
    pub name: &'static str,
    pub kind: RegionKind,
    pub addr: u64,
    pub size: u64,
    /// Kernel-visible mapping, for memory regions.
    pub mapped: Option<MappedPtr>,
}

/// Everything the framework needs to build its interface for one device:
/// identity strings, the interrupt vector if one was granted, and the region
/// list in discovery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UioDescriptor {
    pub name: String,
    pub version: String,
    pub irq: Option<u32>,
    pub regions: Vec<UioRegionDesc>,
}

/// Registration surface of the user-space I/O framework.
///
/// Registration is infallible at this boundary; the framework's own
/// character-device plumbing is outside the driver core.
pub trait UioRegistrar {
    fn register(&mut self, address: PciAddress, descriptor: UioDescriptor);
    fn unregister(&mut self, address: PciAddress);
}

#[derive(Debug, Default)]
struct RegistryLogState {
    registered: BTreeMap<PciAddress, UioDescriptor>,
    register_calls: u64,
    unregister_calls: u64,
}

/// Recording [`UioRegistrar`]. Clones share one record.
///
/// Registering an address twice, or unregistering one with no interface,
/// panics: the driver core's pairing of the two calls is exactly what tests
/// use this to check.
#[derive(Debug, Clone, Default)]
pub struct RegistryLog {
    state: Rc<RefCell<RegistryLogState>>,
}

impl RegistryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Descriptor currently registered for `address`, if any.
    pub fn registered(&self, address: PciAddress) -> Option<UioDescriptor> {
        self.state.borrow().registered.get(&address).cloned()
    }

    pub fn registered_count(&self) -> usize {
        self.state.borrow().registered.len()
    }

    pub fn register_calls(&self) -> u64 {
        self.state.borrow().register_calls
    }

    pub fn unregister_calls(&self) -> u64 {
        self.state.borrow().unregister_calls
    }
}

impl UioRegistrar for RegistryLog {
    fn register(&mut self, address: PciAddress, descriptor: UioDescriptor) {
        let mut state = self.state.borrow_mut();
        state.register_calls += 1;
        let prev = state.registered.insert(address, descriptor);
        assert!(prev.is_none(), "interface for {address} registered twice");
    }

    fn unregister(&mut self, address: PciAddress) {
        let mut state = self.state.borrow_mut();
        state.unregister_calls += 1;
        let prev = state.registered.remove(&address);
        assert!(
            prev.is_some(),
            "unregister of {address}, which has no interface"
        );
    }
}
