//! # Process Address-Space Setup
//!
//! Regions every new process starts with:
//!
//! ```text
//! 0x0 ┌──────────┐ NaT page (read-only, speculative NULL loads return NaT)
//!     ├──────────┤
//!     │   ...    │
//!     ├──────────┤ rbs_bot  register backing store, grows up
//!     │   ...    │
//!     └──────────┘ stack_top  memory stack, grows down
//! ```
//!
//! Failure to insert a region is not reported to the caller as an error: the
//! process faults on first touch of the missing region instead.

use kernel_info::memory::{MAX_USER_STACK_SIZE, PAGE_SIZE};
use kernel_memory_addresses::VirtualAddress;
use kernel_sync::SpinLock;
use log::{debug, warn};

use crate::page_table::prot::{PAGE_READONLY, ma};
use crate::vma::{Personality, RegionInsertError, RegionSet, VmFlags, VmRegion};

/// Inputs describing the process being set up.
#[derive(Copy, Clone, Debug)]
pub struct ProcessLayoutParams {
    pub stack_top: VirtualAddress,
    /// Hard stack size limit.
    pub stack_rlimit_max: u64,
    pub personality: Personality,
}

/// What happened to one region.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Step {
    Installed,
    /// Not attempted.
    Skipped,
    Failed(RegionInsertError),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct InitOutcome {
    /// Bottom of the register backing store.
    pub rbs_bot: VirtualAddress,
    pub backing_store: Step,
    pub nat_page: Step,
}

/// Bottom of the register backing store.
///
/// The limit is truncated to 16 bytes, then capped at
/// [`MAX_USER_STACK_SIZE`]; the result is rounded down to a page.
#[must_use]
pub const fn rbs_bottom(stack_top: VirtualAddress, stack_rlimit_max: u64) -> VirtualAddress {
    let mut size = stack_rlimit_max & !15;
    if size > MAX_USER_STACK_SIZE {
        size = MAX_USER_STACK_SIZE;
    }
    VirtualAddress::new(stack_top.as_u64().saturating_sub(size)).align_down(PAGE_SIZE)
}

/// One-page upward-growing backing store region at `rbs_bot`.
#[must_use]
pub const fn backing_store_region(rbs_bot: VirtualAddress, personality: Personality) -> VmRegion {
    let flags = VmFlags::data_default(personality)
        .union(VmFlags::GROWSUP)
        .union(VmFlags::ACCOUNT);
    VmRegion::anonymous(rbs_bot, VirtualAddress::new(rbs_bot.as_u64() + PAGE_SIZE), flags)
}

/// Read-only NaT page at address zero.
#[must_use]
pub const fn nat_page_region() -> VmRegion {
    let flags = VmFlags::READ
        .union(VmFlags::MAYREAD)
        .union(VmFlags::IO)
        .union(VmFlags::DONTEXPAND)
        .union(VmFlags::DONTDUMP);
    VmRegion::anonymous(VirtualAddress::zero(), VirtualAddress::new(PAGE_SIZE), flags)
        .with_prot(PAGE_READONLY.with_memory_attribute(ma::NAT))
}

/// Install the initial regions of a new address space.
///
/// Each insertion holds `space`'s lock only for that insertion. The first
/// failure ends setup; later regions are then [`Step::Skipped`]. This
/// includes [`RegionInsertError::OutOfMemory`]: a set that cannot take the
/// backing store is not asked for the NaT page either.
pub fn init_address_space<R: RegionSet>(
    space: &SpinLock<R>,
    params: &ProcessLayoutParams,
) -> InitOutcome {
    let rbs_bot = rbs_bottom(params.stack_top, params.stack_rlimit_max);
    let mut outcome = InitOutcome {
        rbs_bot,
        backing_store: Step::Skipped,
        nat_page: Step::Skipped,
    };

    outcome.backing_store = insert(space, backing_store_region(rbs_bot, params.personality));
    if outcome.backing_store != Step::Installed {
        return outcome;
    }

    if !params.personality.contains(Personality::MMAP_PAGE_ZERO) {
        outcome.nat_page = insert(space, nat_page_region());
    }
    outcome
}

fn insert<R: RegionSet>(space: &SpinLock<R>, region: VmRegion) -> Step {
    let result = space.lock().insert_region(region);
    match result {
        Ok(()) => {
            debug!("address space: installed {region:?}");
            Step::Installed
        }
        Err(e) => {
            warn!("address space: {e}; {region:?} left unmapped");
            Step::Failed(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page_table::Pte;
    use alloc::vec::Vec;
    use kernel_info::memory::DEFAULT_STACK_TOP;

    const TOP: VirtualAddress = VirtualAddress::new(DEFAULT_STACK_TOP);

    fn params(limit: u64, personality: Personality) -> ProcessLayoutParams {
        ProcessLayoutParams {
            stack_top: TOP,
            stack_rlimit_max: limit,
            personality,
        }
    }

    #[test]
    fn small_limit_is_masked_then_page_rounded() {
        let limit = 8 * 1024 * 1024 + 0x123f;
        let expect = (DEFAULT_STACK_TOP - (limit & !15)) & !(PAGE_SIZE - 1);
        assert_eq!(rbs_bottom(TOP, limit).as_u64(), expect);
        assert!(rbs_bottom(TOP, limit).is_aligned_to(PAGE_SIZE));
    }

    #[test]
    fn large_limit_is_capped() {
        let expect = DEFAULT_STACK_TOP - MAX_USER_STACK_SIZE;
        assert_eq!(rbs_bottom(TOP, u64::MAX).as_u64(), expect);
        assert_eq!(rbs_bottom(TOP, MAX_USER_STACK_SIZE + 16).as_u64(), expect);
    }

    #[test]
    fn installs_backing_store_and_nat_page() {
        let space = SpinLock::new(Vec::new());
        let out = init_address_space(&space, &params(1 << 23, Personality::empty()));
        assert_eq!(out.backing_store, Step::Installed);
        assert_eq!(out.nat_page, Step::Installed);
        assert!(!space.is_locked());

        let regions = space.into_inner();
        assert_eq!(regions.len(), 2);

        let nat = regions[0];
        assert_eq!(nat.start, VirtualAddress::zero());
        assert_eq!(nat.len(), PAGE_SIZE);
        assert_eq!(Pte::from_bits(nat.prot.bits()).ma(), ma::NAT);
        assert!(nat.flags.contains(VmFlags::IO | VmFlags::DONTDUMP));

        let rbs = regions[1];
        assert_eq!(rbs.start, out.rbs_bot);
        assert_eq!(rbs.len(), PAGE_SIZE);
        assert!(rbs.anonymous);
        assert!(rbs.flags.contains(VmFlags::GROWSUP | VmFlags::ACCOUNT | VmFlags::WRITE));
    }

    #[test]
    fn page_zero_personality_skips_nat_page() {
        let space = SpinLock::new(Vec::new());
        let out = init_address_space(&space, &params(1 << 23, Personality::MMAP_PAGE_ZERO));
        assert_eq!(out.nat_page, Step::Skipped);
        assert_eq!(space.into_inner().len(), 1);
    }

    #[test]
    fn failed_backing_store_stops_setup_and_unlocks() {
        let rbs_bot = rbs_bottom(TOP, 1 << 23);
        let squatter = VmRegion::anonymous(rbs_bot, rbs_bot + PAGE_SIZE, VmFlags::READ);
        let space = SpinLock::new(alloc::vec![squatter]);

        let out = init_address_space(&space, &params(1 << 23, Personality::empty()));
        assert!(matches!(out.backing_store, Step::Failed(RegionInsertError::Overlap { .. })));
        assert_eq!(out.nat_page, Step::Skipped);
        assert!(!space.is_locked());
        assert_eq!(space.into_inner().len(), 1);
    }

    /// Accepts `room` insertions, then runs out of memory.
    struct Exhausted {
        regions: Vec<VmRegion>,
        room: usize,
        attempts: usize,
    }

    impl RegionSet for Exhausted {
        fn insert_region(&mut self, region: VmRegion) -> Result<(), RegionInsertError> {
            self.attempts += 1;
            if self.regions.len() == self.room {
                return Err(RegionInsertError::OutOfMemory);
            }
            self.regions.insert_region(region)
        }

        fn find_region(&self, va: VirtualAddress) -> Option<&VmRegion> {
            self.regions.find_region(va)
        }
    }

    #[test]
    fn out_of_memory_stops_setup() {
        let space = SpinLock::new(Exhausted {
            regions: Vec::new(),
            room: 0,
            attempts: 0,
        });
        let out = init_address_space(&space, &params(1 << 23, Personality::empty()));
        assert_eq!(out.backing_store, Step::Failed(RegionInsertError::OutOfMemory));
        assert_eq!(out.nat_page, Step::Skipped);
        assert!(!space.is_locked());
        let set = space.into_inner();
        assert_eq!(set.attempts, 1);
        assert!(set.regions.is_empty());
    }

    #[test]
    fn out_of_memory_for_the_nat_page_keeps_the_backing_store() {
        let space = SpinLock::new(Exhausted {
            regions: Vec::new(),
            room: 1,
            attempts: 0,
        });
        let out = init_address_space(&space, &params(1 << 23, Personality::empty()));
        assert_eq!(out.backing_store, Step::Installed);
        assert_eq!(out.nat_page, Step::Failed(RegionInsertError::OutOfMemory));
        let set = space.into_inner();
        assert!(set.find_region(out.rbs_bot).is_some());
        assert!(set.find_region(VirtualAddress::zero()).is_none());
    }

    #[test]
    fn occupied_page_zero_is_reported() {
        let squatter = VmRegion::anonymous(
            VirtualAddress::zero(),
            VirtualAddress::new(PAGE_SIZE),
            VmFlags::READ,
        );
        let space = SpinLock::new(alloc::vec![squatter]);
        let out = init_address_space(&space, &params(1 << 23, Personality::empty()));
        assert_eq!(out.backing_store, Step::Installed);
        assert!(matches!(out.nat_page, Step::Failed(_)));
        assert!(!space.is_locked());
    }
}
