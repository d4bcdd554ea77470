//! PCI attach/detach driver core for a user-space I/O framework.
//!
//! Given a device handle from the bus layer ([`keel_pci::PciFunction`]), the
//! driver enables the device, applies best-effort PCI Express tuning,
//! discovers and maps its base-address regions, sets 64-bit DMA masks, picks
//! an interrupt delivery mode backed by at most one vector, and publishes a
//! [`UioDescriptor`] to the framework's registration surface. Detach, and any
//! attach that fails partway, releases exactly what was acquired, in reverse
//! order.
//!
//! - [`lifecycle::UioPciDriver`] sequences attach and detach
//! - [`region`] discovers and maps base-address regions
//! - [`tuning`] applies the PCI Express link settings
//! - [`irq`] selects the interrupt mode and allocates the vector
//! - [`registration::DriverRegistration`] is the bus-subsystem boundary
//!
//! Nothing here installs an interrupt handler or a character-device surface;
//! the published descriptor carries the vector number and the region list,
//! and what serves them is the framework's business.

#![forbid(unsafe_code)]

pub mod context;
pub mod error;
pub mod irq;
pub mod lifecycle;
pub mod region;
pub mod registration;
pub mod tuning;
pub mod uio;

pub use context::DeviceContext;
pub use error::{AttachError, Result};
pub use irq::{InterruptMode, IrqAssignment, IrqError};
pub use lifecycle::{DriverConfig, UioPciDriver};
pub use region::{
    MapError, MappedPtr, MappedRegion, MappingLog, RegionError, RegionKind, RegionMapper,
};
pub use registration::{DriverRegistration, PciDeviceId};
pub use uio::{
    RegistryLog, UioDescriptor, UioRegionDesc, UioRegistrar, MAX_UIO_MAPS, MAX_UIO_PORT_REGIONS,
};
