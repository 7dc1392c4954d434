//! # Kernel Page-Table Walker
//!
//! [`KernelPageTable`] populates the kernel's own translation tree on demand.
//! Missing directory levels are allocated from a node-aware bootstrap
//! allocator and zeroed before they are linked, so a walker racing with
//! population only ever sees a level as absent or complete.
//!
//! Leaf entries are append-only: [`install_page`](KernelPageTable::install_page)
//! never replaces an occupied slot, and nothing here clears one. No TLB
//! maintenance is done; boot-time kernel mappings are not yet live.

use kernel_info::memory::PAGE_SIZE;
use kernel_memory_addresses::{
    KernelPageSize, NodeId, PageSize, PhysicalAddress, PhysicalPage, VirtualAddress,
};
use log::trace;

use crate::page_table::{DirEntry, DirectoryTable, LeafTable, Level, PageProt, Pte};
use crate::{NodeFrameAlloc, PhysMapper};

/// Allocation of a table or backing page failed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "failed to allocate {size} bytes align={align:#x} nid={node} for {level} at {va}",
    size = PAGE_SIZE,
    align = PAGE_SIZE
)]
pub struct WalkError {
    /// Level whose table (or, for [`Level::Pte`], whose backing page) was missing.
    pub level: Level,
    pub node: NodeId,
    pub va: VirtualAddress,
}

/// Read-only view of how far the tree is populated for an address.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Probe {
    /// The entry at `Level` is none; nothing below it exists.
    Missing(Level),
    /// The leaf slot exists and holds this entry.
    Leaf(Pte),
}

/// The kernel's translation tree, rooted at its PGD page.
pub struct KernelPageTable<'m, M: PhysMapper> {
    root: PhysicalPage<KernelPageSize>,
    mapper: &'m M,
}

impl<M: PhysMapper> Clone for KernelPageTable<'_, M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M: PhysMapper> Copy for KernelPageTable<'_, M> {}

impl<'m, M: PhysMapper> KernelPageTable<'m, M> {
    /// Wrap an existing, initialized PGD page.
    #[inline]
    pub const fn from_root(mapper: &'m M, root: PhysicalPage<KernelPageSize>) -> Self {
        Self { root, mapper }
    }

    /// Allocate and clear a fresh PGD page on `node`.
    ///
    /// # Errors
    /// [`WalkError`] at [`Level::Pgd`] if the allocator is exhausted.
    pub fn create<A: NodeFrameAlloc>(
        mapper: &'m M,
        alloc: &mut A,
        node: NodeId,
    ) -> Result<Self, WalkError> {
        let root = alloc.alloc_node_page(node).ok_or(WalkError {
            level: Level::Pgd,
            node,
            va: VirtualAddress::zero(),
        })?;
        let table = Self { root, mapper };
        table.dir_mut(root).zero();
        Ok(table)
    }

    #[inline]
    pub const fn root_page(&self) -> PhysicalPage<KernelPageSize> {
        self.root
    }

    #[inline]
    pub const fn mapper(&self) -> &'m M {
        self.mapper
    }

    #[inline]
    #[allow(clippy::mut_from_ref)]
    fn dir_mut(&self, page: PhysicalPage<KernelPageSize>) -> &'m mut DirectoryTable {
        // SAFETY: directory pages are only ever created by this walker.
        unsafe { self.mapper.phys_to_mut::<DirectoryTable>(page.base()) }
    }

    #[inline]
    #[allow(clippy::mut_from_ref)]
    fn leaf_mut(&self, page: PhysicalPage<KernelPageSize>) -> &'m mut LeafTable {
        // SAFETY: leaf pages are only ever created by this walker.
        unsafe { self.mapper.phys_to_mut::<LeafTable>(page.base()) }
    }

    /// Follow or create the link at `level` in `table`.
    fn descend<A: NodeFrameAlloc>(
        &self,
        alloc: &mut A,
        node: NodeId,
        table: PhysicalPage<KernelPageSize>,
        level: Level,
        va: VirtualAddress,
    ) -> Result<PhysicalPage<KernelPageSize>, WalkError> {
        let dir = self.dir_mut(table);
        let idx = level.index(va);
        if let Some(next) = dir.get(idx).next_table() {
            return Ok(next);
        }

        let below = level.next().unwrap_or(Level::Pte);
        let page = alloc
            .alloc_node_page(node)
            .ok_or(WalkError { level: below, node, va })?;
        if below == Level::Pte {
            self.leaf_mut(page).zero();
        } else {
            self.dir_mut(page).zero();
        }
        dir.set(idx, DirEntry::link(page));
        trace!("populated {below} table for {va} at {} on {node:?}", page.base());
        Ok(page)
    }

    /// Walk to the leaf slot for `va`, allocating missing levels on `node`.
    ///
    /// # Errors
    /// [`WalkError`] naming the level whose table could not be allocated.
    #[allow(clippy::mut_from_ref)]
    pub fn ensure_mapped<A: NodeFrameAlloc>(
        &self,
        alloc: &mut A,
        node: NodeId,
        va: VirtualAddress,
    ) -> Result<&'m mut Pte, WalkError> {
        let pud = self.descend(alloc, node, self.root, Level::Pgd, va)?;
        let pmd = self.descend(alloc, node, pud, Level::Pud, va)?;
        let pte = self.descend(alloc, node, pmd, Level::Pmd, va)?;
        Ok(self.leaf_mut(pte).entry_mut(Level::Pte.index(va)))
    }

    /// Map `page` at `va` unless the slot is already occupied.
    ///
    /// Returns the existing entry, unchanged, when one is present.
    ///
    /// # Errors
    /// Propagates [`ensure_mapped`](Self::ensure_mapped) failures.
    pub fn install_page<A: NodeFrameAlloc>(
        &self,
        alloc: &mut A,
        node: NodeId,
        page: PhysicalPage<KernelPageSize>,
        va: VirtualAddress,
        prot: PageProt,
    ) -> Result<Option<Pte>, WalkError> {
        let slot = self.ensure_mapped(alloc, node, va)?;
        if !slot.is_none() {
            return Ok(Some(*slot));
        }
        *slot = Pte::make(page, prot);
        Ok(None)
    }

    /// Clear a freshly allocated page through the mapper.
    pub fn zero_page(&self, page: PhysicalPage<KernelPageSize>) {
        self.leaf_mut(page).zero();
    }

    /// Walk without allocating.
    pub fn probe(&self, va: VirtualAddress) -> Probe {
        let mut table = self.root;
        for level in [Level::Pgd, Level::Pud, Level::Pmd] {
            match self.dir_mut(table).get(level.index(va)).next_table() {
                Some(next) => table = next,
                None => return Probe::Missing(level),
            }
        }
        Probe::Leaf(self.leaf_mut(table).get(Level::Pte.index(va)))
    }

    /// The leaf table covering `va`, or the first level that is missing.
    ///
    /// # Errors
    /// The level whose entry is none.
    pub fn leaf_table(&self, va: VirtualAddress) -> Result<&'m LeafTable, Level> {
        let mut table = self.root;
        for level in [Level::Pgd, Level::Pud, Level::Pmd] {
            table = self
                .dir_mut(table)
                .get(level.index(va))
                .next_table()
                .ok_or(level)?;
        }
        Ok(self.leaf_mut(table))
    }

    /// Physical address backing `va`, if mapped.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        match self.probe(va) {
            Probe::Leaf(pte) if !pte.is_none() => {
                Some(pte.page().join(va.offset::<KernelPageSize>()))
            }
            _ => None,
        }
    }

    /// Read one byte through the tree; `None` where an access would fault.
    #[must_use]
    pub fn read_byte(&self, va: VirtualAddress) -> Option<u8> {
        let pa = self.translate(va)?;
        // SAFETY: `pa` lies inside a page the tree maps.
        Some(unsafe { *self.mapper.phys_to_mut::<u8>(pa) })
    }

    /// Reference to the naturally aligned `T` at `va`, if mapped.
    ///
    /// `T` must not straddle a page; debug-asserted.
    #[must_use]
    pub fn resolve<T>(&self, va: VirtualAddress) -> Option<&'m T> {
        debug_assert!(
            va.offset::<KernelPageSize>() + core::mem::size_of::<T>() as u64
                <= KernelPageSize::SIZE
        );
        let pa = self.translate(va)?;
        // SAFETY: mapped, and the caller names the type stored there.
        Some(unsafe { &*self.mapper.phys_to_mut::<T>(pa) })
    }
}
