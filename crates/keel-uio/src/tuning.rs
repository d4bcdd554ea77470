//! Best-effort PCI Express link tuning.

use keel_pci::config::{
    decode_readrq, encode_readrq, PCI_CAP_ID_PCIE, PCI_EXP_DEVCTL_EXT_TAG, PCI_EXP_DEVCTL_OFFSET,
    PCI_EXP_DEVCTL_READRQ_MASK, PCI_EXP_DEVCTL_READRQ_SHIFT, PCI_EXP_DEVCTL_RELAX_EN,
};
use keel_pci::PciFunction;

/// Memory read request size the driver asks devices for, in bytes.
const TUNED_READ_REQUEST: u16 = 512;

/// Enables relaxed ordering and extended tags and requests a 512-byte
/// maximum memory read request size.
///
/// None of this is load-bearing: a function without the capability is left
/// untouched, and a function that clamps the size request keeps its own
/// limit. Attach continues either way.
pub fn tune_pcie(func: &mut dyn PciFunction) {
    let Some(cap) = func.find_capability(PCI_CAP_ID_PCIE) else {
        tracing::debug!(address = %func.address(), "no PCI Express capability, skipping tuning");
        return;
    };
    let devctl_offset = cap + PCI_EXP_DEVCTL_OFFSET;

    let devctl = func.config_read(devctl_offset, 2) as u16;
    func.config_write(
        devctl_offset,
        2,
        u32::from(devctl | PCI_EXP_DEVCTL_RELAX_EN | PCI_EXP_DEVCTL_EXT_TAG),
    );

    let field = encode_readrq(TUNED_READ_REQUEST).expect("512 is a valid read request size");
    let devctl = func.config_read(devctl_offset, 2) as u16;
    func.config_write(
        devctl_offset,
        2,
        u32::from((devctl & !PCI_EXP_DEVCTL_READRQ_MASK) | (field << PCI_EXP_DEVCTL_READRQ_SHIFT)),
    );

    let devctl = func.config_read(devctl_offset, 2) as u16;
    let granted =
        decode_readrq((devctl & PCI_EXP_DEVCTL_READRQ_MASK) >> PCI_EXP_DEVCTL_READRQ_SHIFT);
    if granted != TUNED_READ_REQUEST {
        tracing::warn!(
            address = %func.address(),
            requested = TUNED_READ_REQUEST,
            granted,
            "device clamped the memory read request size"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_pci::{SoftFunction, SoftFunctionConfig};

    #[test]
    fn sets_relaxed_ordering_extended_tags_and_readrq() {
        let mut func = SoftFunction::new(SoftFunctionConfig::default());
        tune_pcie(&mut func);

        let cap = func
            .find_capability(PCI_CAP_ID_PCIE)
            .expect("PCIe advertised");
        let devctl = func.config_read(cap + PCI_EXP_DEVCTL_OFFSET, 2) as u16;
        assert_ne!(devctl & PCI_EXP_DEVCTL_RELAX_EN, 0);
        assert_ne!(devctl & PCI_EXP_DEVCTL_EXT_TAG, 0);
        assert_eq!(
            decode_readrq((devctl & PCI_EXP_DEVCTL_READRQ_MASK) >> PCI_EXP_DEVCTL_READRQ_SHIFT),
            512
        );
    }

    #[test]
    fn keeps_going_when_the_device_clamps_the_request() {
        let mut func = SoftFunction::new(SoftFunctionConfig {
            max_read_request: 128,
            ..SoftFunctionConfig::default()
        });
        tune_pcie(&mut func);

        let cap = func
            .find_capability(PCI_CAP_ID_PCIE)
            .expect("PCIe advertised");
        let devctl = func.config_read(cap + PCI_EXP_DEVCTL_OFFSET, 2) as u16;
        // The clamp held; the other settings still went in.
        assert_eq!(devctl & PCI_EXP_DEVCTL_READRQ_MASK, 0);
        assert_ne!(devctl & PCI_EXP_DEVCTL_RELAX_EN, 0);
    }

    #[test]
    fn skips_functions_without_the_capability() {
        let mut func = SoftFunction::new(SoftFunctionConfig {
            pcie: false,
            ..SoftFunctionConfig::default()
        });
        let command_before = func.command();
        tune_pcie(&mut func);
        assert_eq!(func.command(), command_before);
        assert_eq!(func.find_capability(PCI_CAP_ID_PCIE), None);
    }
}
