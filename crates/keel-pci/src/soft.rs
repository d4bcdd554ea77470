//! In-memory PCI function.
//!
//! [`SoftFunction`] is driven entirely through the [`PciFunction`] trait and
//! models the parts of a function a driver core can observe: a 256-byte
//! configuration space with a capability chain, a resource table, bus-level
//! enable state, DMA masks and vector grants. The knobs on
//! [`SoftFunctionConfig`] inject every failure the driver core distinguishes,
//! so tests and bus-less embedders can exercise each attach path.

use crate::addr::PciAddress;
use crate::config::{
    encode_readrq, PCI_BAR_COUNT, PCI_CAP_ID_MSI, PCI_CAP_ID_PCIE, PCI_CAP_PTR_OFFSET,
    PCI_COMMAND_INTX_DISABLE, PCI_COMMAND_IO, PCI_COMMAND_MASTER, PCI_COMMAND_MEMORY,
    PCI_CONFIG_SPACE_SIZE, PCI_EXP_DEVCTL_OFFSET, PCI_MSI_CTRL_ENABLE, PCI_MSI_CTRL_OFFSET,
    PCI_STATUS_CAPABILITIES_LIST, PCI_STATUS_INTERRUPT, PCI_STATUS_OFFSET,
};
use crate::function::{
    BarResource, DmaMaskError, EnableError, PciFunction, ResourceFlags, VectorError, VectorModes,
};

const SOFT_MSI_CAP_OFFSET: u8 = 0x50;
const SOFT_PCIE_CAP_OFFSET: u8 = 0x60;

/// Line-based vector number handed out for legacy grants.
const SOFT_LEGACY_VECTOR: u32 = 11;
/// First vector number handed out for message-signalled grants.
const SOFT_MSI_VECTOR_BASE: u32 = 32;

/// Construction knobs for [`SoftFunction`].
#[derive(Debug, Clone)]
pub struct SoftFunctionConfig {
    pub address: PciAddress,
    pub vendor_id: u16,
    pub device_id: u16,
    /// Resource table reported through [`PciFunction::bar_resource`].
    pub bars: [BarResource; 6],
    /// Advertise an MSI capability.
    pub msi: bool,
    /// Advertise a PCI Express capability.
    pub pcie: bool,
    /// Largest memory read request size the function accepts; MRRS writes
    /// are clamped to it. Must be a power of two in `128..=4096`.
    pub max_read_request: u16,
    /// Widest DMA mask the function accepts, in bits.
    pub dma_bits: u8,
    /// Refuse bus-level enable.
    pub fail_enable: bool,
    /// Hardwire the command-register INTx disable bit low.
    pub intx_mask_broken: bool,
    /// Report a pending interrupt in the status register from the start.
    pub stale_interrupt: bool,
    /// Satisfy vector requests with legacy grants even when MSI is
    /// advertised, as a host that refuses MSI for this function would.
    pub deny_msi: bool,
    /// Grant exactly this many vectors regardless of what was requested.
    pub vector_grant_override: Option<u32>,
}

impl Default for SoftFunctionConfig {
    fn default() -> Self {
        Self {
            address: PciAddress::new(0, 3, 0),
            vendor_id: 0x10ee,
            device_id: 0x7024,
            bars: [BarResource::default(); 6],
            msi: true,
            pcie: true,
            max_read_request: 4096,
            dma_bits: 64,
            fail_enable: false,
            intx_mask_broken: false,
            stale_interrupt: false,
            deny_msi: false,
            vector_grant_override: None,
        }
    }
}

pub struct SoftFunction {
    cfg: SoftFunctionConfig,
    config_space: [u8; PCI_CONFIG_SPACE_SIZE],
    msi_cap: Option<u16>,
    pcie_cap: Option<u16>,
    enabled: bool,
    enable_count: u32,
    disable_count: u32,
    bus_master: bool,
    dma_mask: Option<u8>,
    consistent_dma_mask: Option<u8>,
    granted: Vec<u32>,
}

impl SoftFunction {
    pub fn new(cfg: SoftFunctionConfig) -> Self {
        assert!(
            encode_readrq(cfg.max_read_request).is_some(),
            "max_read_request must be a power of two in 128..=4096"
        );

        let mut config_space = [0u8; PCI_CONFIG_SPACE_SIZE];
        config_space[0x00..0x02].copy_from_slice(&cfg.vendor_id.to_le_bytes());
        config_space[0x02..0x04].copy_from_slice(&cfg.device_id.to_le_bytes());

        let mut status: u16 = 0;
        if cfg.stale_interrupt {
            status |= PCI_STATUS_INTERRUPT;
        }

        let mut caps: Vec<(u8, u8)> = Vec::new();
        if cfg.msi {
            caps.push((SOFT_MSI_CAP_OFFSET, PCI_CAP_ID_MSI));
        }
        if cfg.pcie {
            caps.push((SOFT_PCIE_CAP_OFFSET, PCI_CAP_ID_PCIE));
        }
        if !caps.is_empty() {
            status |= PCI_STATUS_CAPABILITIES_LIST;
            config_space[usize::from(PCI_CAP_PTR_OFFSET)] = caps[0].0;
            for (i, &(offset, id)) in caps.iter().enumerate() {
                config_space[usize::from(offset)] = id;
                config_space[usize::from(offset) + 1] =
                    caps.get(i + 1).map_or(0, |&(next, _)| next);
            }
        }
        if cfg.pcie {
            // PCI Express Capabilities register: capability version 2.
            config_space[usize::from(SOFT_PCIE_CAP_OFFSET) + 2] = 0x02;
        }
        config_space[usize::from(PCI_STATUS_OFFSET)..][..2].copy_from_slice(&status.to_le_bytes());

        Self {
            msi_cap: cfg.msi.then_some(u16::from(SOFT_MSI_CAP_OFFSET)),
            pcie_cap: cfg.pcie.then_some(u16::from(SOFT_PCIE_CAP_OFFSET)),
            cfg,
            config_space,
            enabled: false,
            enable_count: 0,
            disable_count: 0,
            bus_master: false,
            dma_mask: None,
            consistent_dma_mask: None,
            granted: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_bus_master(&self) -> bool {
        self.bus_master
    }

    /// How many times the function has been enabled at the bus level.
    pub fn enable_count(&self) -> u32 {
        self.enable_count
    }

    pub fn disable_count(&self) -> u32 {
        self.disable_count
    }

    /// Vectors currently granted, in grant order.
    pub fn granted_vectors(&self) -> &[u32] {
        &self.granted
    }

    pub fn dma_mask_bits(&self) -> Option<u8> {
        self.dma_mask
    }

    pub fn consistent_dma_mask_bits(&self) -> Option<u8> {
        self.consistent_dma_mask
    }

    #[cfg(test)]
    pub(crate) fn config_bytes_mut(&mut self) -> &mut [u8; PCI_CONFIG_SPACE_SIZE] {
        &mut self.config_space
    }

    fn write_byte(&mut self, addr: usize, value: u8) {
        // Id, status and capability-header bytes are read-only through the
        // configuration port.
        if addr < 0x04 || addr == 0x06 || addr == 0x07 {
            return;
        }
        if addr == usize::from(PCI_CAP_PTR_OFFSET) || self.is_cap_header_byte(addr) {
            return;
        }
        let value = if addr == 0x05 && self.cfg.intx_mask_broken {
            value & !((PCI_COMMAND_INTX_DISABLE >> 8) as u8)
        } else if self.is_mrrs_byte(addr) {
            self.clamp_readrq(value)
        } else {
            value
        };
        self.config_space[addr] = value;
    }

    fn is_cap_header_byte(&self, addr: usize) -> bool {
        [self.msi_cap, self.pcie_cap]
            .iter()
            .flatten()
            .any(|&cap| addr == usize::from(cap) || addr == usize::from(cap) + 1)
    }

    fn is_mrrs_byte(&self, addr: usize) -> bool {
        // MRRS lives in bits 12..=14 of Device Control, so in the high byte.
        self.pcie_cap
            .map_or(false, |cap| addr == usize::from(cap + PCI_EXP_DEVCTL_OFFSET) + 1)
    }

    fn clamp_readrq(&self, value: u8) -> u8 {
        let limit = encode_readrq(self.cfg.max_read_request)
            .expect("validated at construction") as u8;
        let requested = (value >> 4) & 0x7;
        let granted = requested.min(limit);
        (value & !0x70) | (granted << 4)
    }

    fn set_msi_enable(&mut self, enable: bool) {
        let Some(cap) = self.msi_cap else {
            return;
        };
        let at = usize::from(cap + PCI_MSI_CTRL_OFFSET);
        let mut ctrl = u16::from_le_bytes([self.config_space[at], self.config_space[at + 1]]);
        if enable {
            ctrl |= PCI_MSI_CTRL_ENABLE;
        } else {
            ctrl &= !PCI_MSI_CTRL_ENABLE;
        }
        self.config_space[at..at + 2].copy_from_slice(&ctrl.to_le_bytes());
    }
}

impl PciFunction for SoftFunction {
    fn address(&self) -> PciAddress {
        self.cfg.address
    }

    fn config_read(&mut self, offset: u16, size: usize) -> u32 {
        let offset = usize::from(offset);
        assert!(
            matches!(size, 1 | 2 | 4) && offset + size <= PCI_CONFIG_SPACE_SIZE,
            "config read of {size} bytes at {offset:#x} out of range"
        );
        let mut value = 0u32;
        for i in (0..size).rev() {
            value = (value << 8) | u32::from(self.config_space[offset + i]);
        }
        value
    }

    fn config_write(&mut self, offset: u16, size: usize, value: u32) {
        let offset = usize::from(offset);
        assert!(
            matches!(size, 1 | 2 | 4) && offset + size <= PCI_CONFIG_SPACE_SIZE,
            "config write of {size} bytes at {offset:#x} out of range"
        );
        for i in 0..size {
            self.write_byte(offset + i, (value >> (8 * i)) as u8);
        }
    }

    fn bar_resource(&self, index: usize) -> BarResource {
        assert!(index < PCI_BAR_COUNT, "BAR index {index} out of range");
        self.cfg.bars[index]
    }

    fn enable(&mut self) -> Result<(), EnableError> {
        if self.cfg.fail_enable {
            return Err(EnableError::Rejected);
        }
        self.enabled = true;
        self.enable_count += 1;
        // Decode enables follow the populated resource kinds.
        let mut command = self.command();
        for bar in &self.cfg.bars {
            if bar.start == 0 || bar.len == 0 {
                continue;
            }
            if bar.flags.contains(ResourceFlags::MEM) {
                command |= PCI_COMMAND_MEMORY;
            } else if bar.flags.contains(ResourceFlags::IO) {
                command |= PCI_COMMAND_IO;
            }
        }
        self.set_command(command);
        Ok(())
    }

    fn disable(&mut self) {
        self.enabled = false;
        self.disable_count += 1;
        self.bus_master = false;
        let command = self.command() & !(PCI_COMMAND_IO | PCI_COMMAND_MEMORY | PCI_COMMAND_MASTER);
        self.set_command(command);
    }

    fn set_bus_master(&mut self, master: bool) {
        self.bus_master = master;
        let command = self.command();
        let new = if master {
            command | PCI_COMMAND_MASTER
        } else {
            command & !PCI_COMMAND_MASTER
        };
        self.set_command(new);
    }

    fn set_dma_mask(&mut self, bits: u8) -> Result<(), DmaMaskError> {
        if bits > self.cfg.dma_bits {
            return Err(DmaMaskError::Unsupported { bits });
        }
        self.dma_mask = Some(bits);
        Ok(())
    }

    fn set_consistent_dma_mask(&mut self, bits: u8) -> Result<(), DmaMaskError> {
        if bits > self.cfg.dma_bits {
            return Err(DmaMaskError::Unsupported { bits });
        }
        self.consistent_dma_mask = Some(bits);
        Ok(())
    }

    fn request_irq_vectors(
        &mut self,
        min: u32,
        max: u32,
        modes: VectorModes,
    ) -> Result<u32, VectorError> {
        assert!(min >= 1 && min <= max, "invalid vector range {min}..={max}");
        assert!(self.granted.is_empty(), "vectors already granted");

        if let Some(granted) = self.cfg.vector_grant_override {
            // Off-contract host: hand out exactly this many, whatever was
            // asked for.
            self.granted = (0..granted).map(|i| SOFT_MSI_VECTOR_BASE + i).collect();
            return Ok(granted);
        }

        if modes.contains(VectorModes::MSI) && self.msi_cap.is_some() && !self.cfg.deny_msi {
            self.granted = (0..max).map(|i| SOFT_MSI_VECTOR_BASE + i).collect();
            self.set_msi_enable(true);
            // Hosts mask INTx while message-signalled delivery is active and
            // leave the bit to the driver afterwards.
            self.set_intx(false);
            return Ok(max);
        }

        if modes.contains(VectorModes::LEGACY) {
            self.granted = vec![SOFT_LEGACY_VECTOR];
            return Ok(1);
        }

        Err(VectorError::Exhausted)
    }

    fn irq_vector(&self, index: u32) -> Option<u32> {
        self.granted.get(index as usize).copied()
    }

    fn free_irq_vectors(&mut self) {
        self.granted.clear();
        self.set_msi_enable(false);
    }
}
