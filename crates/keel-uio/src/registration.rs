//! The bus-subsystem boundary.

use keel_pci::config::{PCI_DEVICE_ID_OFFSET, PCI_VENDOR_ID_OFFSET};
use keel_pci::PciFunction;

use crate::error::Result;
use crate::lifecycle::UioPciDriver;

/// One vendor/device pair the driver claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciDeviceId {
    pub vendor: u16,
    pub device: u16,
}

/// The driver's registration with the bus subsystem, held for the module's
/// lifetime by whoever loaded it.
///
/// The bus layer calls [`device_added`](Self::device_added) for every device
/// it discovers and [`device_removed`](Self::device_removed) when a claimed
/// one goes away. An empty id table claims every presented device; matching
/// is then whoever binds devices to the driver's business.
pub struct DriverRegistration {
    driver: UioPciDriver,
    id_table: Vec<PciDeviceId>,
}

impl DriverRegistration {
    pub fn new(driver: UioPciDriver, id_table: Vec<PciDeviceId>) -> Self {
        Self { driver, id_table }
    }

    /// Whether `func`'s identity registers match the id table.
    pub fn matches(&self, func: &mut dyn PciFunction) -> bool {
        if self.id_table.is_empty() {
            return true;
        }
        let vendor = func.config_read(PCI_VENDOR_ID_OFFSET, 2) as u16;
        let device = func.config_read(PCI_DEVICE_ID_OFFSET, 2) as u16;
        self.id_table
            .iter()
            .any(|id| id.vendor == vendor && id.device == device)
    }

    /// Bus callback for a newly discovered device.
    ///
    /// Returns `Ok(false)`, without touching the device, when it does not
    /// match the id table; `Ok(true)` once it is attached and published.
    pub fn device_added(&mut self, func: &mut dyn PciFunction) -> Result<bool> {
        if !self.matches(func) {
            return Ok(false);
        }
        self.driver.attach(func)?;
        Ok(true)
    }

    /// Bus callback for the removal of a device previously accepted by
    /// [`device_added`](Self::device_added).
    pub fn device_removed(&mut self, func: &mut dyn PciFunction) {
        self.driver.detach(func);
    }

    pub fn driver(&self) -> &UioPciDriver {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut UioPciDriver {
        &mut self.driver
    }

    /// Tears the registration down, handing the driver back. Devices still
    /// attached stay attached; the bus presents their removals separately.
    pub fn into_driver(self) -> UioPciDriver {
        self.driver
    }
}
