use kernel_registers::ControlRegisters;
use kernel_vmem::VlptConfig;
use kernel_vmem::vlpt::implemented_va_bits;

use crate::{BootError, MmState};

/// Size the VLPT from this CPU's unimplemented-address mask and program it.
///
/// Every CPU must implement the same width as the boot CPU.
///
/// # Errors
/// - [`BootError::Vlpt`] when no valid table exists for the width.
/// - [`BootError::VlptMismatch`] when this CPU disagrees with the boot CPU.
pub fn mmu_init<R: ControlRegisters + ?Sized>(
    state: &MmState,
    regs: &mut R,
    unimpl_va_mask: u64,
) -> Result<VlptConfig, BootError> {
    let cfg = VlptConfig::compute(implemented_va_bits(unimpl_va_mask))?;
    state.agree_vlpt(cfg)?;
    cfg.activate(regs);
    Ok(cfg)
}
