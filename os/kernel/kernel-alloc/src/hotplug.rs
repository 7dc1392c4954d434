//! # Memory Hotplug
//!
//! Validates hot-add and hot-remove requests and hands them to the generic
//! page bookkeeping, represented by a [`HotplugBackend`].

use kernel_info::memory::PAGE_SHIFT;
use kernel_memory_addresses::{NodeId, PageFrameNumber, PhysicalAddress};
use kernel_vmem::PageProt;
use kernel_vmem::page_table::prot::PAGE_KERNEL;
use log::{debug, error, warn};

/// Generic page addition and removal.
pub trait HotplugBackend {
    /// Bring `nr_pages` frames from `start` online on `node`.
    ///
    /// # Errors
    /// An errno-style code describing the failure.
    fn add_pages(&mut self, node: NodeId, start: PageFrameNumber, nr_pages: u64) -> Result<(), i32>;

    /// Take `nr_pages` frames from `start` offline.
    fn remove_pages(&mut self, start: PageFrameNumber, nr_pages: u64);
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum HotplugError {
    #[error("hot-add protection {requested:?} is not the kernel default")]
    InvalidArgument { requested: PageProt },
    #[error("adding pages failed with code {0}")]
    Backend(i32),
}

/// Add `[start, start + size)` on `node`.
///
/// Only [`PAGE_KERNEL`] is accepted as `prot`; anything else is rejected
/// before the backend is touched.
///
/// # Errors
/// - [`HotplugError::InvalidArgument`] on a protection mismatch.
/// - [`HotplugError::Backend`] with the backend's code, also logged.
pub fn add_memory<B: HotplugBackend + ?Sized>(
    backend: &mut B,
    node: NodeId,
    start: PhysicalAddress,
    size: u64,
    prot: PageProt,
) -> Result<(), HotplugError> {
    if prot != PAGE_KERNEL {
        warn!("add_memory: rejecting {prot:?} for {start} + {size:#x}");
        return Err(HotplugError::InvalidArgument { requested: prot });
    }

    let nr_pages = size >> PAGE_SHIFT;
    backend.add_pages(node, start.pfn(), nr_pages).map_err(|code| {
        error!("add_memory: problem encountered adding pages, ret={code}");
        HotplugError::Backend(code)
    })?;
    debug!("add_memory: {nr_pages} pages at {start} on {node:?}");
    Ok(())
}

/// Remove `[start, start + size)`.
pub fn remove_memory<B: HotplugBackend + ?Sized>(backend: &mut B, start: PhysicalAddress, size: u64) {
    backend.remove_pages(start.pfn(), size >> PAGE_SHIFT);
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_info::memory::PAGE_SIZE;
    use kernel_vmem::page_table::prot::PAGE_READONLY;

    #[derive(Default)]
    struct Log {
        added: Vec<(NodeId, u64, u64)>,
        removed: Vec<(u64, u64)>,
        fail_with: Option<i32>,
    }

    impl HotplugBackend for Log {
        fn add_pages(&mut self, node: NodeId, start: PageFrameNumber, nr: u64) -> Result<(), i32> {
            if let Some(code) = self.fail_with {
                return Err(code);
            }
            self.added.push((node, start.as_u64(), nr));
            Ok(())
        }

        fn remove_pages(&mut self, start: PageFrameNumber, nr: u64) {
            self.removed.push((start.as_u64(), nr));
        }
    }

    #[test]
    fn wrong_protection_touches_nothing() {
        let mut log = Log::default();
        let err = add_memory(
            &mut log,
            NodeId::BOOT,
            PhysicalAddress::new(0x4000_0000),
            PAGE_SIZE,
            PAGE_READONLY,
        )
        .unwrap_err();
        assert_eq!(err, HotplugError::InvalidArgument { requested: PAGE_READONLY });
        assert!(log.added.is_empty());
    }

    #[test]
    fn forwards_page_range() {
        let mut log = Log::default();
        add_memory(
            &mut log,
            NodeId::new(2),
            PhysicalAddress::new(64 * PAGE_SIZE),
            8 * PAGE_SIZE,
            PAGE_KERNEL,
        )
        .unwrap();
        assert_eq!(log.added, [(NodeId::new(2), 64, 8)]);
    }

    #[test]
    fn backend_failure_is_surfaced() {
        let mut log = Log {
            fail_with: Some(-12),
            ..Log::default()
        };
        let err = add_memory(&mut log, NodeId::BOOT, PhysicalAddress::zero(), PAGE_SIZE, PAGE_KERNEL)
            .unwrap_err();
        assert_eq!(err, HotplugError::Backend(-12));
    }

    #[test]
    fn remove_delegates() {
        let mut log = Log::default();
        remove_memory(&mut log, PhysicalAddress::new(16 * PAGE_SIZE), 4 * PAGE_SIZE);
        assert_eq!(log.removed, [(16, 4)]);
    }
}
