//! Interrupt-mode selection and single-vector allocation.

use keel_pci::config::PCI_CAP_ID_MSI;
use keel_pci::{PciFunction, VectorModes};
use thiserror::Error;

/// How interrupts are delivered for an attached device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptMode {
    /// No vector; the device is usable by polling only.
    None,
    /// Line-based delivery over INTx.
    Legacy,
    /// Message-signalled delivery, one vector.
    Msi,
    /// Recognized so contexts can carry it; never selected by [`allocate`].
    Msix,
}

/// What [`allocate`] decided: the delivery mode and the granted vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrqAssignment {
    pub mode: InterruptMode,
    pub vector: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IrqError {
    #[error("vector request did not yield exactly one vector")]
    VectorAllocFailed,
}

/// Chooses an interrupt mode for `func` and requests at most one vector.
///
/// A function with no MSI capability and no working INTx masking gets
/// [`InterruptMode::None`] without any request being made. Otherwise exactly
/// one vector is requested, message-signalled preferred and line-based
/// accepted, and which of the two actually backs the grant is read back from
/// the MSI enable bit afterwards.
///
/// On every exit, success or not, the INTx disable bit is left clear. A host
/// may mask INTx as a side effect of granting a message-signalled vector; if
/// that backing later goes away with the line still masked, the device can
/// never interrupt again.
pub fn allocate(func: &mut dyn PciFunction) -> Result<IrqAssignment, IrqError> {
    let has_msi = func.find_capability(PCI_CAP_ID_MSI).is_some();
    if !has_msi && !func.intx_mask_supported() {
        tracing::debug!(
            address = %func.address(),
            "no MSI capability and no INTx masking; device is polling-only"
        );
        func.set_intx(true);
        return Ok(IrqAssignment {
            mode: InterruptMode::None,
            vector: None,
        });
    }

    match func.request_irq_vectors(1, 1, VectorModes::MSI | VectorModes::LEGACY) {
        Ok(1) => {}
        Ok(granted) => {
            // Off-contract grant; hand back whatever arrived.
            tracing::warn!(
                address = %func.address(),
                granted,
                "vector request was not granted exactly one vector"
            );
            func.free_irq_vectors();
            func.set_intx(true);
            return Err(IrqError::VectorAllocFailed);
        }
        Err(err) => {
            tracing::warn!(address = %func.address(), error = %err, "vector request failed");
            func.set_intx(true);
            return Err(IrqError::VectorAllocFailed);
        }
    }

    let vector = func.irq_vector(0).expect("a vector was granted");
    let mode = if func.msi_enabled() {
        InterruptMode::Msi
    } else {
        InterruptMode::Legacy
    };

    // The grant may have masked INTx along the way.
    func.set_intx(true);

    Ok(IrqAssignment {
        mode,
        vector: Some(vector),
    })
}

/// Releases whatever [`allocate`] granted. [`InterruptMode::None`] means
/// nothing was granted and nothing is done.
pub fn release(func: &mut dyn PciFunction, mode: InterruptMode) {
    if mode == InterruptMode::None {
        return;
    }
    func.free_irq_vectors();
}
