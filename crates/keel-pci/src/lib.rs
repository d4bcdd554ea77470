//! PCI function boundary for the keel driver core.
//!
//! [`PciFunction`] is the handle the driver core works through: raw
//! configuration-space access plus the per-device bus services (enable,
//! resource table, DMA masks, vector allocation). Register sequences that are
//! the same for every implementation, such as the capability walk and the
//! INTx masking probe, are provided on the trait itself.
//!
//! [`SoftFunction`] is an in-memory implementation with fault-injection
//! knobs, used by the driver core's tests and by embedders that have no real
//! bus underneath them.

#![forbid(unsafe_code)]

pub mod addr;
pub mod config;
pub mod function;
pub mod soft;

pub use addr::PciAddress;
pub use function::{
    BarResource, DmaMaskError, EnableError, PciFunction, ResourceFlags, VectorError, VectorModes,
};
pub use soft::{SoftFunction, SoftFunctionConfig};
