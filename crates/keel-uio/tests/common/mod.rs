#![allow(dead_code)]

//! Shared fixtures for the keel-uio integration tests.

use keel_pci::{BarResource, ResourceFlags, SoftFunction, SoftFunctionConfig};
use keel_uio::{DriverConfig, MappingLog, RegistryLog, UioPciDriver};

/// A driver wired to recording collaborators, with the shared handles kept
/// out so tests can inspect them.
pub struct TestDriver {
    pub driver: UioPciDriver,
    pub mmio: MappingLog,
    pub registry: RegistryLog,
}

pub fn driver() -> TestDriver {
    driver_with(DriverConfig::default())
}

pub fn driver_with(config: DriverConfig) -> TestDriver {
    let mmio = MappingLog::new();
    let registry = RegistryLog::new();
    let driver = UioPciDriver::new(config, Box::new(mmio.clone()), Box::new(registry.clone()));
    TestDriver {
        driver,
        mmio,
        registry,
    }
}

pub fn mem_bar(start: u64, len: u64) -> BarResource {
    BarResource {
        start,
        len,
        flags: ResourceFlags::MEM,
    }
}

pub fn port_bar(start: u64, len: u64) -> BarResource {
    BarResource {
        start,
        len,
        flags: ResourceFlags::IO,
    }
}

/// One 64KiB memory region at BAR0.
pub fn single_memory_bars() -> [BarResource; 6] {
    let mut bars = [BarResource::default(); 6];
    bars[0] = mem_bar(0xfd00_0000, 0x1_0000);
    bars
}

/// The canonical happy-path device: one memory BAR, MSI and PCIe
/// capabilities, nothing broken.
pub fn default_function() -> SoftFunction {
    SoftFunction::new(SoftFunctionConfig {
        bars: single_memory_bars(),
        ..SoftFunctionConfig::default()
    })
}
