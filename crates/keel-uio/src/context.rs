use keel_pci::PciAddress;

use crate::irq::{InterruptMode, IrqAssignment};
use crate::region::MappedRegion;
use crate::uio::{UioDescriptor, UioRegionDesc};

/// Driver-private record for one attached device.
///
/// Created at the start of attach, filled in by each step as it succeeds,
/// and then either published into the driver's table or fully unwound. The
/// device handle itself stays with the bus layer; the context keeps only the
/// address.
#[derive(Debug)]
pub struct DeviceContext {
    pub address: PciAddress,
    /// Discovered regions, in base-address slot order.
    pub regions: Vec<MappedRegion>,
    pub interrupt_mode: InterruptMode,
    /// Granted vector. Present iff `interrupt_mode` is not
    /// [`InterruptMode::None`].
    pub irq: Option<u32>,
    name: String,
    version: String,
}

impl DeviceContext {
    pub(crate) fn new(address: PciAddress, name: &str, version: &str) -> Self {
        Self {
            address,
            regions: Vec::new(),
            interrupt_mode: InterruptMode::None,
            irq: None,
            name: name.to_owned(),
            version: version.to_owned(),
        }
    }

    pub(crate) fn record_irq(&mut self, assignment: IrqAssignment) {
        debug_assert!(
            (assignment.mode == InterruptMode::None) == assignment.vector.is_none(),
            "interrupt mode and vector must agree"
        );
        self.interrupt_mode = assignment.mode;
        self.irq = assignment.vector;
    }

    /// Name published in the device's descriptor.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// The view published to the user-space I/O framework.
    pub fn descriptor(&self) -> UioDescriptor {
        UioDescriptor {
            name: self.name.clone(),
            version: self.version.clone(),
            irq: self.irq,
            regions: self
                .regions
                .iter()
                .map(|region| UioRegionDesc {
                    name: region.name,
                    kind: region.kind,
                    addr: region.phys_addr,
                    size: region.size,
                    mapped: region.mapped,
                })
                .collect(),
        }
    }
}
