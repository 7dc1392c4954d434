//! # Page Descriptors
//!
//! One [`PageDescriptor`] exists for every page frame backed by memory. All
//! fields are atomic words so descriptors can be shared without locks; the
//! descriptor map itself is append-only.
//!
//! Descriptors are 56 bytes, so they do not tile a 16 KiB page evenly and
//! some straddle a page boundary. Code that reaches a descriptor through
//! translated addresses therefore works word by word: a word never crosses a
//! page, a descriptor may.

use bitfield_struct::bitfield;
use core::sync::atomic::{AtomicU64, Ordering};
use kernel_memory_addresses::{NodeId, PageFrameNumber};

bitflags::bitflags! {
    /// Per-page state bits.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct PageFlags: u64 {
        /// Not handed to the page allocator.
        const RESERVED = 1 << 0;
        /// Instruction cache is coherent with the data cache for this page.
        const ARCH_1   = 1 << 1;
    }
}

/// Memory zone a page belongs to.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Zone {
    Dma32 = 0,
    Normal = 1,
    Movable = 2,
}

impl Zone {
    const fn from_bits(v: u8) -> Self {
        match v {
            0 => Self::Dma32,
            2 => Self::Movable,
            _ => Self::Normal,
        }
    }
}

/// Page-block mobility class.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MigrateType {
    Unmovable = 0,
    Movable = 1,
    Reclaimable = 2,
}

impl MigrateType {
    const fn from_bits(v: u8) -> Self {
        match v {
            1 => Self::Movable,
            2 => Self::Reclaimable,
            _ => Self::Unmovable,
        }
    }
}

/// Who is initializing a descriptor range.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum InitContext {
    /// Boot: pages are reserved later by the bootstrap allocator.
    Early,
    /// Hot-added memory starts out reserved until it is onlined.
    Hotplug,
}

/// Where a page lives.
#[bitfield(u64)]
struct Location {
    #[bits(16)]
    node: u16,
    #[bits(3)]
    zone: u8,
    #[bits(3)]
    migrate: u8,
    #[bits(42)]
    __unused: u64,
}

/// Metadata for one page frame.
#[repr(C)]
#[derive(Debug, Default)]
pub struct PageDescriptor {
    flags: AtomicU64,
    refcount: AtomicU64,
    mapcount: AtomicU64,
    location: AtomicU64,
    pfn: AtomicU64,
    private: AtomicU64,
    lru: AtomicU64,
}

/// Number of 8-byte words in a descriptor.
pub const DESCRIPTOR_WORDS: usize = 7;

/// Size of a descriptor in bytes.
pub const DESCRIPTOR_SIZE: u64 = core::mem::size_of::<PageDescriptor>() as u64;

const _: () = {
    assert!(DESCRIPTOR_SIZE == 56);
    assert!(DESCRIPTOR_SIZE == (DESCRIPTOR_WORDS * 8) as u64);
};

mod word {
    pub const FLAGS: usize = 0;
    pub const REFCOUNT: usize = 1;
    pub const MAPCOUNT: usize = 2;
    pub const LOCATION: usize = 3;
    pub const PFN: usize = 4;
}

impl PageDescriptor {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            flags: AtomicU64::new(0),
            refcount: AtomicU64::new(0),
            mapcount: AtomicU64::new(0),
            location: AtomicU64::new(0),
            pfn: AtomicU64::new(0),
            private: AtomicU64::new(0),
            lru: AtomicU64::new(0),
        }
    }

    /// View over a descriptor reachable by reference.
    #[must_use]
    pub const fn view(&self) -> DescriptorView<'_> {
        DescriptorView::new([
            &self.flags,
            &self.refcount,
            &self.mapcount,
            &self.location,
            &self.pfn,
            &self.private,
            &self.lru,
        ])
    }
}

/// Access to one descriptor through its individually resolved words.
#[derive(Copy, Clone)]
pub struct DescriptorView<'a> {
    words: [&'a AtomicU64; DESCRIPTOR_WORDS],
}

impl<'a> DescriptorView<'a> {
    /// Words in declaration order of [`PageDescriptor`].
    #[must_use]
    pub const fn new(words: [&'a AtomicU64; DESCRIPTOR_WORDS]) -> Self {
        Self { words }
    }

    #[inline]
    fn load(&self, w: usize) -> u64 {
        self.words[w].load(Ordering::Acquire)
    }

    #[inline]
    #[must_use]
    pub fn flags(&self) -> PageFlags {
        PageFlags::from_bits_retain(self.load(word::FLAGS))
    }

    /// Set `f`; returns the flags as they were.
    #[inline]
    pub fn set_flags(&self, f: PageFlags) -> PageFlags {
        PageFlags::from_bits_retain(self.words[word::FLAGS].fetch_or(f.bits(), Ordering::AcqRel))
    }

    #[inline]
    pub fn clear_flags(&self, f: PageFlags) -> PageFlags {
        PageFlags::from_bits_retain(
            self.words[word::FLAGS].fetch_and(!f.bits(), Ordering::AcqRel),
        )
    }

    #[inline]
    #[must_use]
    pub fn test(&self, f: PageFlags) -> bool {
        self.flags().contains(f)
    }

    #[must_use]
    pub fn node(&self) -> NodeId {
        NodeId::new(Location::from_bits(self.load(word::LOCATION)).node())
    }

    #[must_use]
    pub fn zone(&self) -> Zone {
        Zone::from_bits(Location::from_bits(self.load(word::LOCATION)).zone())
    }

    #[must_use]
    pub fn migrate_type(&self) -> MigrateType {
        MigrateType::from_bits(Location::from_bits(self.load(word::LOCATION)).migrate())
    }

    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn refcount(&self) -> i64 {
        self.load(word::REFCOUNT) as i64
    }

    /// `-1` when the page is not mapped into any process.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn mapcount(&self) -> i64 {
        self.load(word::MAPCOUNT) as i64
    }

    #[must_use]
    pub fn pfn(&self) -> PageFrameNumber {
        PageFrameNumber::new(self.load(word::PFN))
    }

    /// Reset to the initial state of a free, unmapped page.
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    pub fn init(&self, pfn: PageFrameNumber, args: &ZoneInit) {
        for w in &self.words {
            w.store(0, Ordering::Relaxed);
        }
        let loc = Location::new()
            .with_node(args.node.index() as u16)
            .with_zone(args.zone as u8)
            .with_migrate(args.migrate as u8);
        self.words[word::LOCATION].store(loc.into_bits(), Ordering::Relaxed);
        self.words[word::PFN].store(pfn.as_u64(), Ordering::Relaxed);
        self.words[word::REFCOUNT].store(1, Ordering::Relaxed);
        self.words[word::MAPCOUNT].store(-1i64 as u64, Ordering::Relaxed);
        let flags = match args.context {
            InitContext::Early => PageFlags::empty(),
            InitContext::Hotplug => PageFlags::RESERVED,
        };
        self.words[word::FLAGS].store(flags.bits(), Ordering::Release);
    }
}

/// Parameters for bulk descriptor initialization.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ZoneInit {
    pub node: NodeId,
    pub zone: Zone,
    pub migrate: MigrateType,
    pub context: InitContext,
}

impl ZoneInit {
    /// Boot-time initialization of movable pages.
    #[must_use]
    pub const fn early(node: NodeId, zone: Zone) -> Self {
        Self {
            node,
            zone,
            migrate: MigrateType::Movable,
            context: InitContext::Early,
        }
    }
}

/// Storage of descriptors indexed by page frame number.
pub trait DescriptorStore {
    /// The descriptor for `pfn`, if its storage exists.
    fn descriptor(&self, pfn: PageFrameNumber) -> Option<DescriptorView<'_>>;

    /// Whether `pfn` has a descriptor.
    fn is_pfn_valid(&self, pfn: PageFrameNumber) -> bool {
        self.descriptor(pfn).is_some()
    }

    /// Initialize `count` descriptors from `start`; returns how many existed.
    fn init_range(&self, start: PageFrameNumber, count: u64, args: &ZoneInit) -> u64 {
        let mut done = 0;
        for i in 0..count {
            let pfn = start + i;
            if let Some(d) = self.descriptor(pfn) {
                d.init(pfn, args);
                done += 1;
            }
        }
        done
    }
}

/// Dense descriptor array for physically contiguous memory.
pub struct FlatDescriptorMap<'a> {
    start: PageFrameNumber,
    descriptors: &'a [PageDescriptor],
}

impl<'a> FlatDescriptorMap<'a> {
    /// `descriptors[0]` describes `start`.
    #[must_use]
    pub const fn new(start: PageFrameNumber, descriptors: &'a [PageDescriptor]) -> Self {
        Self { start, descriptors }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.descriptors.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

impl DescriptorStore for FlatDescriptorMap<'_> {
    fn descriptor(&self, pfn: PageFrameNumber) -> Option<DescriptorView<'_>> {
        let idx = usize::try_from(pfn.as_u64().checked_sub(self.start.as_u64())?).ok()?;
        self.descriptors.get(idx).map(PageDescriptor::view)
    }
}
