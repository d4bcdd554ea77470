//! Configuration-space register layout shared by the trait helpers, the
//! in-memory device model, and the driver core.

/// Size of a type 0 configuration space, in bytes.
pub const PCI_CONFIG_SPACE_SIZE: usize = 256;

/// Number of base-address slots in a type 0 header.
pub const PCI_BAR_COUNT: usize = 6;

pub const PCI_VENDOR_ID_OFFSET: u16 = 0x00;
pub const PCI_DEVICE_ID_OFFSET: u16 = 0x02;
pub const PCI_COMMAND_OFFSET: u16 = 0x04;
pub const PCI_STATUS_OFFSET: u16 = 0x06;
pub const PCI_CAP_PTR_OFFSET: u16 = 0x34;

pub const PCI_COMMAND_IO: u16 = 1 << 0;
pub const PCI_COMMAND_MEMORY: u16 = 1 << 1;
pub const PCI_COMMAND_MASTER: u16 = 1 << 2;
pub const PCI_COMMAND_INTX_DISABLE: u16 = 1 << 10;

/// An interrupt is pending on the function's INTx line.
pub const PCI_STATUS_INTERRUPT: u16 = 1 << 3;
/// The capability list rooted at [`PCI_CAP_PTR_OFFSET`] is valid.
pub const PCI_STATUS_CAPABILITIES_LIST: u16 = 1 << 4;

pub const PCI_CAP_ID_MSI: u8 = 0x05;
pub const PCI_CAP_ID_PCIE: u8 = 0x10;
pub const PCI_CAP_ID_MSIX: u8 = 0x11;

/// MSI Message Control register, relative to the capability base.
pub const PCI_MSI_CTRL_OFFSET: u16 = 0x02;
pub const PCI_MSI_CTRL_ENABLE: u16 = 1 << 0;

/// PCI Express Device Control register, relative to the capability base.
pub const PCI_EXP_DEVCTL_OFFSET: u16 = 0x08;
pub const PCI_EXP_DEVCTL_RELAX_EN: u16 = 1 << 4;
pub const PCI_EXP_DEVCTL_EXT_TAG: u16 = 1 << 8;
pub const PCI_EXP_DEVCTL_READRQ_SHIFT: u32 = 12;
pub const PCI_EXP_DEVCTL_READRQ_MASK: u16 = 0x7 << PCI_EXP_DEVCTL_READRQ_SHIFT;

/// Encodes a maximum memory read request size into the Device Control MRRS
/// field value. Valid sizes are powers of two in `128..=4096`.
pub const fn encode_readrq(bytes: u16) -> Option<u16> {
    if !bytes.is_power_of_two() || bytes < 128 || bytes > 4096 {
        return None;
    }
    Some(bytes.trailing_zeros() as u16 - 7)
}

/// Decodes a Device Control MRRS field value back into bytes.
pub const fn decode_readrq(field: u16) -> u16 {
    128 << (field & 0x7)
}
