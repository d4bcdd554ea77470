//! Attach/detach orchestration.

use std::collections::BTreeMap;

use keel_pci::{PciAddress, PciFunction};

use crate::context::DeviceContext;
use crate::error::{AttachError, Result};
use crate::irq;
use crate::region::{self, RegionMapper};
use crate::tuning;
use crate::uio::UioRegistrar;

/// DMA addressing width requested for attached devices, streaming and
/// consistent alike.
const DMA_MASK_BITS: u8 = 64;

/// Identity and sizing for a [`UioPciDriver`].
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Name published in every descriptor.
    pub name: String,
    /// Version string published in every descriptor.
    pub version: String,
    /// Most devices attachable at once.
    pub max_devices: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            name: "keel-uio".to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            max_devices: 32,
        }
    }
}

/// What the current attach has acquired that the context itself does not
/// record. Regions and the vector grant live on the context; the bus-level
/// enable does not.
#[derive(Default)]
struct AttachProgress {
    device_enabled: bool,
}

/// The device lifecycle orchestrator.
///
/// Owns one [`DeviceContext`] per attached device plus the two collaborator
/// services, and sequences the leaves: attach runs enable, PCI Express
/// tuning, region scan, DMA masks, vector allocation and publication in that
/// order, and detach or a failed attach releases what was acquired in
/// reverse order. Callers serialize attach and detach; the bus subsystem
/// already delivers them that way.
pub struct UioPciDriver {
    config: DriverConfig,
    mmio: Box<dyn RegionMapper>,
    registrar: Box<dyn UioRegistrar>,
    devices: BTreeMap<PciAddress, DeviceContext>,
}

impl UioPciDriver {
    pub fn new(
        config: DriverConfig,
        mmio: Box<dyn RegionMapper>,
        registrar: Box<dyn UioRegistrar>,
    ) -> Self {
        Self {
            config,
            mmio,
            registrar,
            devices: BTreeMap::new(),
        }
    }

    /// Attaches `func` and publishes its descriptor to the framework.
    ///
    /// On any failure every resource the attempt had acquired is released
    /// before the error is returned, and nothing is published.
    pub fn attach(&mut self, func: &mut dyn PciFunction) -> Result<()> {
        let address = func.address();
        if self.devices.contains_key(&address) {
            return Err(AttachError::AlreadyAttached { address });
        }
        if self.devices.len() >= self.config.max_devices {
            return Err(AttachError::NoFreeContext {
                limit: self.config.max_devices,
            });
        }

        let mut ctx = DeviceContext::new(address, &self.config.name, &self.config.version);
        let mut progress = AttachProgress::default();

        if let Err(err) = self.run_attach(func, &mut ctx, &mut progress) {
            release_resources(self.mmio.as_mut(), func, &mut ctx, progress.device_enabled);
            tracing::warn!(address = %address, error = %err, "attach failed");
            return Err(err);
        }

        self.registrar.register(address, ctx.descriptor());
        tracing::info!(
            address = %address,
            regions = ctx.regions.len(),
            mode = ?ctx.interrupt_mode,
            irq = ctx.irq,
            "device attached"
        );
        self.devices.insert(address, ctx);
        Ok(())
    }

    fn run_attach(
        &mut self,
        func: &mut dyn PciFunction,
        ctx: &mut DeviceContext,
        progress: &mut AttachProgress,
    ) -> Result<()> {
        func.enable()?;
        progress.device_enabled = true;

        func.set_bus_master(true);

        if func.check_and_mask_intx() {
            tracing::warn!(address = %ctx.address, "stale interrupt pending at attach, masked");
        }

        tuning::tune_pcie(func);

        region::scan_and_map(&*func, self.mmio.as_mut(), &mut ctx.regions)?;

        func.set_dma_mask(DMA_MASK_BITS)?;
        func.set_consistent_dma_mask(DMA_MASK_BITS)?;

        ctx.record_irq(irq::allocate(func)?);

        Ok(())
    }

    /// Detaches the device previously attached as `func`, withdrawing its
    /// interface and releasing everything attach acquired.
    ///
    /// # Panics
    ///
    /// Panics if `func` is not attached. The bus contract pairs every
    /// removal with a successful attach.
    pub fn detach(&mut self, func: &mut dyn PciFunction) {
        let address = func.address();
        let mut ctx = self
            .devices
            .remove(&address)
            .unwrap_or_else(|| panic!("detach of {address}, which is not attached"));

        self.registrar.unregister(address);
        release_resources(self.mmio.as_mut(), func, &mut ctx, true);
        tracing::info!(address = %address, "device detached");
    }

    /// Context for an attached device.
    pub fn context(&self, address: PciAddress) -> Option<&DeviceContext> {
        self.devices.get(&address)
    }

    pub fn is_attached(&self, address: PciAddress) -> bool {
        self.devices.contains_key(&address)
    }

    pub fn attached_count(&self) -> usize {
        self.devices.len()
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }
}

/// Releases everything a context holds, in reverse acquisition order: the
/// vector grant, then the mappings, then, if this attach got that far, the
/// bus-level enable.
///
/// Shared by failed attaches and detach so no release step can exist in one
/// path and be missing from the other.
fn release_resources(
    mmio: &mut dyn RegionMapper,
    func: &mut dyn PciFunction,
    ctx: &mut DeviceContext,
    device_enabled: bool,
) {
    irq::release(func, ctx.interrupt_mode);
    region::unmap_all(mmio, &mut ctx.regions);
    if device_enabled {
        func.disable();
    }
}
