//! Failure-injection tests: every attach error must leave the device and
//! the collaborator services exactly as they were before the attempt.

mod common;

use common::{default_function, driver, driver_with, mem_bar, single_memory_bars};
use keel_pci::{
    DmaMaskError, EnableError, PciAddress, PciFunction, SoftFunction, SoftFunctionConfig,
};
use keel_uio::{AttachError, DriverConfig, IrqError, RegionError, RegionKind};

#[test]
fn enable_failure_leaves_the_device_untouched() {
    let mut td = driver();
    let mut func = SoftFunction::new(SoftFunctionConfig {
        bars: single_memory_bars(),
        fail_enable: true,
        ..SoftFunctionConfig::default()
    });

    assert_eq!(
        td.driver.attach(&mut func),
        Err(AttachError::Enable(EnableError::Rejected))
    );

    assert!(!func.is_enabled());
    assert_eq!(func.disable_count(), 0);
    assert_eq!(td.mmio.map_calls(), 0);
    assert_eq!(td.registry.register_calls(), 0);
    assert!(!td.driver.is_attached(func.address()));
}

#[test]
fn a_device_with_no_regions_is_rejected_and_unwound() {
    let mut td = driver();
    let mut func = SoftFunction::new(SoftFunctionConfig::default());

    assert_eq!(
        td.driver.attach(&mut func),
        Err(AttachError::Region(RegionError::NoUsableRegion))
    );

    assert!(!func.is_enabled());
    assert_eq!(func.enable_count(), 1);
    assert_eq!(func.disable_count(), 1);
    assert!(!func.is_bus_master());
    assert_eq!(td.mmio.live_mappings(), 0);
    assert_eq!(td.registry.register_calls(), 0);
}

#[test]
fn a_mapping_failure_releases_earlier_mappings() {
    let mut td = driver();
    let mut bars = [Default::default(); 6];
    bars[0] = mem_bar(0xfd00_0000, 0x1000);
    bars[1] = mem_bar(0xfd10_0000, 0x1000);
    bars[2] = mem_bar(0xfd20_0000, 0x1000);
    let mut func = SoftFunction::new(SoftFunctionConfig {
        bars,
        ..SoftFunctionConfig::default()
    });
    td.mmio.fail_phys_addr(0xfd10_0000);

    let err = td.driver.attach(&mut func).unwrap_err();
    assert!(matches!(
        err,
        AttachError::Region(RegionError::MapFailed { bar: 1, .. })
    ));

    // BAR0 was mapped before BAR1 failed, and the unwind released it.
    assert_eq!(td.mmio.map_calls(), 2);
    assert_eq!(td.mmio.unmap_calls(), 1);
    assert_eq!(td.mmio.live_mappings(), 0);
    assert_eq!(func.disable_count(), 1);
    assert!(!td.driver.is_attached(func.address()));
}

#[test]
fn a_sixth_memory_region_fails_attach_and_unwinds() {
    let mut td = driver();
    let mut bars = [Default::default(); 6];
    for (i, bar) in bars.iter_mut().enumerate() {
        *bar = mem_bar(0xf000_0000 + (i as u64) * 0x1_0000, 0x1000);
    }
    let mut func = SoftFunction::new(SoftFunctionConfig {
        bars,
        ..SoftFunctionConfig::default()
    });

    assert_eq!(
        td.driver.attach(&mut func),
        Err(AttachError::Region(RegionError::TooManyRegions {
            kind: RegionKind::Memory,
            limit: 5,
        }))
    );

    assert_eq!(td.mmio.unmap_calls(), 5);
    assert_eq!(td.mmio.live_mappings(), 0);
    assert_eq!(func.disable_count(), 1);
}

#[test]
fn dma_mask_rejection_unwinds_mappings() {
    let mut td = driver();
    let mut func = SoftFunction::new(SoftFunctionConfig {
        bars: single_memory_bars(),
        dma_bits: 32,
        ..SoftFunctionConfig::default()
    });

    assert_eq!(
        td.driver.attach(&mut func),
        Err(AttachError::DmaMask(DmaMaskError::Unsupported { bits: 64 }))
    );

    assert_eq!(td.mmio.map_calls(), 1);
    assert_eq!(td.mmio.live_mappings(), 0);
    // The attach never got as far as requesting a vector.
    assert!(func.granted_vectors().is_empty());
    assert_eq!(func.disable_count(), 1);
}

#[test]
fn a_zero_vector_grant_fails_attach_and_unwinds() {
    let mut td = driver();
    let mut func = SoftFunction::new(SoftFunctionConfig {
        bars: single_memory_bars(),
        vector_grant_override: Some(0),
        ..SoftFunctionConfig::default()
    });

    assert_eq!(
        td.driver.attach(&mut func),
        Err(AttachError::Irq(IrqError::VectorAllocFailed))
    );

    assert_eq!(td.mmio.live_mappings(), 0);
    assert!(func.granted_vectors().is_empty());
    assert_eq!(func.disable_count(), 1);
    assert_eq!(td.registry.register_calls(), 0);
}

#[test]
fn an_overlong_vector_grant_is_released_before_failing() {
    let mut td = driver();
    let mut func = SoftFunction::new(SoftFunctionConfig {
        bars: single_memory_bars(),
        vector_grant_override: Some(2),
        ..SoftFunctionConfig::default()
    });

    assert_eq!(
        td.driver.attach(&mut func),
        Err(AttachError::Irq(IrqError::VectorAllocFailed))
    );
    assert!(func.granted_vectors().is_empty());
    assert_eq!(td.mmio.live_mappings(), 0);
}

#[test]
fn an_attached_address_cannot_attach_twice() {
    let mut td = driver();
    let mut func = default_function();

    td.driver.attach(&mut func).expect("first attach succeeds");
    assert_eq!(
        td.driver.attach(&mut func),
        Err(AttachError::AlreadyAttached {
            address: func.address(),
        })
    );

    // The rejection happened before the device was touched again.
    assert_eq!(func.enable_count(), 1);
    assert_eq!(td.mmio.live_mappings(), 1);
    assert_eq!(td.registry.registered_count(), 1);
    assert!(td.driver.is_attached(func.address()));
}

#[test]
fn context_exhaustion_rejects_before_touching_the_device() {
    let mut td = driver_with(DriverConfig {
        max_devices: 1,
        ..DriverConfig::default()
    });
    let mut first = default_function();
    td.driver.attach(&mut first).expect("first attach succeeds");

    let mut second = SoftFunction::new(SoftFunctionConfig {
        address: PciAddress::new(0, 4, 0),
        bars: single_memory_bars(),
        ..SoftFunctionConfig::default()
    });
    assert_eq!(
        td.driver.attach(&mut second),
        Err(AttachError::NoFreeContext { limit: 1 })
    );

    assert_eq!(second.enable_count(), 0);
    assert!(td.driver.is_attached(first.address()));
    assert_eq!(td.driver.attached_count(), 1);
    assert_eq!(td.registry.registered_count(), 1);
}

#[test]
#[should_panic(expected = "is not attached")]
fn detach_of_an_unattached_device_panics() {
    let mut td = driver();
    let mut func = default_function();
    td.driver.detach(&mut func);
}
