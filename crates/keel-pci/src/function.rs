use bitflags::bitflags;
use thiserror::Error;

use crate::addr::PciAddress;
use crate::config::{
    PCI_CAP_ID_MSI, PCI_CAP_PTR_OFFSET, PCI_COMMAND_INTX_DISABLE, PCI_COMMAND_OFFSET,
    PCI_CONFIG_SPACE_SIZE, PCI_MSI_CTRL_ENABLE, PCI_MSI_CTRL_OFFSET,
    PCI_STATUS_CAPABILITIES_LIST, PCI_STATUS_INTERRUPT, PCI_STATUS_OFFSET,
};

bitflags! {
    /// Flags on one slot of a function's resource table.
    ///
    /// A slot carrying neither `MEM` nor `IO` holds no region of its own;
    /// the upper half of a 64-bit base address reports this way.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct ResourceFlags: u32 {
        /// The region decodes memory transactions.
        const MEM = 1 << 0;
        /// The region decodes I/O port transactions.
        const IO = 1 << 1;
    }
}

bitflags! {
    /// Delivery modes a vector request may be satisfied with.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct VectorModes: u32 {
        const LEGACY = 1 << 0;
        const MSI = 1 << 1;
        const MSIX = 1 << 2;
    }
}

/// One entry of a function's resource table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarResource {
    /// Bus address the region decodes at. Zero means the slot is unassigned.
    pub start: u64,
    /// Region length in bytes. Zero means the slot is unpopulated.
    pub len: u64,
    pub flags: ResourceFlags,
}

impl Default for BarResource {
    fn default() -> Self {
        Self {
            start: 0,
            len: 0,
            flags: ResourceFlags::empty(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EnableError {
    #[error("bus refused to enable the device")]
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DmaMaskError {
    #[error("device cannot address {bits} bits of DMA")]
    Unsupported { bits: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VectorError {
    #[error("no interrupt vector available for the requested modes")]
    Exhausted,
}

/// One PCI function as seen by a driver.
///
/// The required methods are the raw services a bus layer provides per
/// device. The provided methods are register sequences over
/// [`config_read`](Self::config_read)/[`config_write`](Self::config_write)
/// that behave identically for every implementation, so they live here
/// rather than in each one.
pub trait PciFunction {
    /// Bus/device/function this handle refers to.
    fn address(&self) -> PciAddress;

    /// Reads `size` bytes (1, 2 or 4) of configuration space at `offset`.
    fn config_read(&mut self, offset: u16, size: usize) -> u32;

    /// Writes `size` bytes (1, 2 or 4) of configuration space at `offset`.
    fn config_write(&mut self, offset: u16, size: usize, value: u32);

    /// Resource-table entry for base-address slot `index` (`0..6`).
    fn bar_resource(&self, index: usize) -> BarResource;

    /// Enables the function at the bus level (powers it up, turns decode on).
    fn enable(&mut self) -> Result<(), EnableError>;

    /// Disables a previously enabled function.
    fn disable(&mut self);

    /// Turns bus mastering on or off.
    fn set_bus_master(&mut self, master: bool);

    /// Restricts the function's streaming DMA addressing to `bits` bits.
    fn set_dma_mask(&mut self, bits: u8) -> Result<(), DmaMaskError>;

    /// Restricts the function's consistent (long-lived) DMA addressing to
    /// `bits` bits.
    fn set_consistent_dma_mask(&mut self, bits: u8) -> Result<(), DmaMaskError>;

    /// Requests between `min` and `max` interrupt vectors, satisfiable with
    /// any of `modes`. Returns the number of vectors granted; an `Err`
    /// grants nothing.
    fn request_irq_vectors(
        &mut self,
        min: u32,
        max: u32,
        modes: VectorModes,
    ) -> Result<u32, VectorError>;

    /// System vector number for granted vector `index`, if that many were
    /// granted.
    fn irq_vector(&self, index: u32) -> Option<u32>;

    /// Releases every granted vector.
    fn free_irq_vectors(&mut self);

    fn command(&mut self) -> u16 {
        self.config_read(PCI_COMMAND_OFFSET, 2) as u16
    }

    fn set_command(&mut self, value: u16) {
        self.config_write(PCI_COMMAND_OFFSET, 2, u32::from(value));
    }

    fn status(&mut self) -> u16 {
        self.config_read(PCI_STATUS_OFFSET, 2) as u16
    }

    /// Walks the capability list for `id`.
    ///
    /// Tolerates hostile lists: an out-of-range pointer or a cycle ends the
    /// walk with `None` instead of spinning.
    fn find_capability(&mut self, id: u8) -> Option<u16> {
        if self.status() & PCI_STATUS_CAPABILITIES_LIST == 0 {
            return None;
        }
        let mut seen = [false; PCI_CONFIG_SPACE_SIZE];
        let mut ptr = self.config_read(PCI_CAP_PTR_OFFSET, 1) as u8;
        while ptr != 0 {
            let off = usize::from(ptr);
            if off + 1 >= PCI_CONFIG_SPACE_SIZE || seen[off] {
                return None;
            }
            seen[off] = true;
            if self.config_read(u16::from(ptr), 1) as u8 == id {
                return Some(u16::from(ptr));
            }
            ptr = self.config_read(u16::from(ptr) + 1, 1) as u8;
        }
        None
    }

    /// Whether an MSI capability is present and currently enabled.
    fn msi_enabled(&mut self) -> bool {
        let Some(cap) = self.find_capability(PCI_CAP_ID_MSI) else {
            return false;
        };
        let ctrl = self.config_read(cap + PCI_MSI_CTRL_OFFSET, 2) as u16;
        ctrl & PCI_MSI_CTRL_ENABLE != 0
    }

    /// Unmasks (`true`) or masks (`false`) legacy INTx signalling.
    fn set_intx(&mut self, enable: bool) {
        let command = self.command();
        let new = if enable {
            command & !PCI_COMMAND_INTX_DISABLE
        } else {
            command | PCI_COMMAND_INTX_DISABLE
        };
        if new != command {
            self.set_command(new);
        }
    }

    /// Whether the command-register INTx disable bit actually controls the
    /// line on this function.
    ///
    /// Probes by toggling the bit and reading it back; the original command
    /// value is restored before returning. Functions that hardwire the bit
    /// report `false`.
    fn intx_mask_supported(&mut self) -> bool {
        let orig = self.command();
        let toggled = orig ^ PCI_COMMAND_INTX_DISABLE;
        self.set_command(toggled);
        let supported = self.command() == toggled;
        self.set_command(orig);
        supported
    }

    /// Masks INTx iff the function reports a pending interrupt, returning
    /// whether one was pending.
    fn check_and_mask_intx(&mut self) -> bool {
        if self.status() & PCI_STATUS_INTERRUPT == 0 {
            return false;
        }
        self.set_intx(false);
        true
    }
}
