use keel_pci::{DmaMaskError, EnableError, PciAddress};
use thiserror::Error;

use crate::irq::IrqError;
use crate::region::RegionError;

pub type Result<T> = std::result::Result<T, AttachError>;

/// Why an attach was refused.
///
/// Every variant is returned only after each resource the failed attach had
/// acquired has been released again; a caller that sees an `Err` holds
/// nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AttachError {
    #[error("all {limit} device contexts are in use")]
    NoFreeContext { limit: usize },

    #[error("{address} is already attached")]
    AlreadyAttached { address: PciAddress },

    #[error("device enable failed: {0}")]
    Enable(#[from] EnableError),

    #[error("region setup failed: {0}")]
    Region(#[from] RegionError),

    #[error("DMA mask rejected: {0}")]
    DmaMask(#[from] DmaMaskError),

    #[error("interrupt setup failed: {0}")]
    Irq(#[from] IrqError),
}
