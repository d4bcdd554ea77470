use std::cmp::Ordering;
use std::fmt;

/// Bus/device/function address of one PCI function.
///
/// Orders by `(bus, device, function)` so address-keyed tables iterate in
/// bus-enumeration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PciAddress {
    pub bus: u8,
    /// Device number on the bus, `0..32`.
    pub device: u8,
    /// Function number within the device, `0..8`.
    pub function: u8,
}

impl PciAddress {
    pub const fn new(bus: u8, device: u8, function: u8) -> Self {
        debug_assert!(device < 32, "PCI device number out of range");
        debug_assert!(function < 8, "PCI function number out of range");
        Self {
            bus,
            device,
            function,
        }
    }
}

impl PartialOrd for PciAddress {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PciAddress {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.bus, self.device, self.function).cmp(&(other.bus, other.device, other.function))
    }
}

impl fmt::Display for PciAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}:{:02x}.{}", self.bus, self.device, self.function)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_in_bus_device_function_form() {
        assert_eq!(PciAddress::new(0, 3, 0).to_string(), "00:03.0");
        assert_eq!(PciAddress::new(0xaf, 0x1f, 7).to_string(), "af:1f.7");
    }

    #[test]
    fn orders_by_bus_then_device_then_function() {
        let mut addrs = vec![
            PciAddress::new(1, 0, 0),
            PciAddress::new(0, 3, 1),
            PciAddress::new(0, 3, 0),
            PciAddress::new(0, 2, 7),
        ];
        addrs.sort();
        assert_eq!(
            addrs,
            vec![
                PciAddress::new(0, 2, 7),
                PciAddress::new(0, 3, 0),
                PciAddress::new(0, 3, 1),
                PciAddress::new(1, 0, 0),
            ]
        );
    }
}
