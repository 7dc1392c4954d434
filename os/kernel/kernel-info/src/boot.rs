//! # Boot Information
//!
//! The boot loader hands the kernel a copy of the firmware memory map. The
//! map is an array of `EFI_MEMORY_DESCRIPTOR` records whose stride is given
//! separately, since firmware may append fields to each record.

use crate::memory::PAGE_SIZE;
use kernel_memory_addresses::align_down;
use log::warn;

/// Location and shape of the firmware memory map.
#[repr(C)]
#[derive(Clone, Debug)]
pub struct MemoryMapInfo {
    /// Pointer to the raw memory map buffer.
    pub mmap_ptr: u64,

    /// Length of the memory map buffer in **bytes**.
    pub mmap_len: u64,

    /// Size of a single memory descriptor in bytes; at least [`MemoryDescriptor::LEN`].
    pub mmap_desc_size: u64,

    /// Descriptor version reported by firmware.
    pub mmap_desc_version: u32,
}

/// Firmware memory types (`EFI_MEMORY_TYPE`).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MemoryType {
    Reserved,
    LoaderCode,
    LoaderData,
    BootServicesCode,
    BootServicesData,
    RuntimeServicesCode,
    RuntimeServicesData,
    Conventional,
    Unusable,
    AcpiReclaim,
    AcpiNvs,
    MemoryMappedIo,
    MemoryMappedIoPortSpace,
    PalCode,
    Persistent,
    Other(u32),
}

impl From<u32> for MemoryType {
    fn from(v: u32) -> Self {
        match v {
            0 => Self::Reserved,
            1 => Self::LoaderCode,
            2 => Self::LoaderData,
            3 => Self::BootServicesCode,
            4 => Self::BootServicesData,
            5 => Self::RuntimeServicesCode,
            6 => Self::RuntimeServicesData,
            7 => Self::Conventional,
            8 => Self::Unusable,
            9 => Self::AcpiReclaim,
            10 => Self::AcpiNvs,
            11 => Self::MemoryMappedIo,
            12 => Self::MemoryMappedIoPortSpace,
            13 => Self::PalCode,
            14 => Self::Persistent,
            other => Self::Other(other),
        }
    }
}

/// Cacheable write-back attribute.
pub const EFI_MEMORY_WB: u64 = 0x8;

/// Firmware page size; `number_of_pages` is counted in these.
pub const EFI_PAGE_SHIFT: u32 = 12;

/// One decoded firmware memory descriptor.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MemoryDescriptor {
    pub ty: MemoryType,
    pub phys_start: u64,
    pub virt_start: u64,
    pub number_of_pages: u64,
    pub attribute: u64,
}

impl MemoryDescriptor {
    /// Size of the fields this decoder understands.
    pub const LEN: usize = 40;

    /// Decode one descriptor from the start of `bytes`.
    #[must_use]
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let bytes = bytes.get(..Self::LEN)?;
        let u32_at = |o: usize| -> Option<u32> {
            Some(u32::from_le_bytes(bytes.get(o..o + 4)?.try_into().ok()?))
        };
        let u64_at = |o: usize| -> Option<u64> {
            Some(u64::from_le_bytes(bytes.get(o..o + 8)?.try_into().ok()?))
        };
        Some(Self {
            ty: MemoryType::from(u32_at(0)?),
            phys_start: u64_at(8)?,
            virt_start: u64_at(16)?,
            number_of_pages: u64_at(24)?,
            attribute: u64_at(32)?,
        })
    }

    /// One past the last byte described; `None` if the range wraps the
    /// physical address space.
    #[must_use]
    pub const fn phys_end(&self) -> Option<u64> {
        if self.number_of_pages > u64::MAX >> EFI_PAGE_SHIFT {
            return None;
        }
        self.phys_start
            .checked_add(self.number_of_pages << EFI_PAGE_SHIFT)
    }

    /// Whether the kernel may use this memory as ordinary RAM.
    #[must_use]
    pub const fn is_usable(&self) -> bool {
        if self.attribute & EFI_MEMORY_WB == 0 {
            return false;
        }
        matches!(
            self.ty,
            MemoryType::LoaderCode
                | MemoryType::LoaderData
                | MemoryType::BootServicesCode
                | MemoryType::BootServicesData
                | MemoryType::Conventional
        )
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, thiserror::Error)]
pub enum MemoryMapError {
    #[error("descriptor size {0} is smaller than {len}", len = MemoryDescriptor::LEN)]
    DescriptorTooSmall(usize),
}

/// Usable physical range `[start, end)`, page aligned.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PhysExtent {
    pub start: u64,
    pub end: u64,
}

impl PhysExtent {
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.end - self.start
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Read-only view over a firmware memory map buffer.
#[derive(Clone, Copy)]
pub struct FirmwareMemoryMap<'a> {
    buf: &'a [u8],
    desc_size: usize,
}

impl<'a> FirmwareMemoryMap<'a> {
    /// Wrap `buf`, whose records are `desc_size` bytes apart.
    ///
    /// # Errors
    /// [`MemoryMapError::DescriptorTooSmall`] if the stride cannot hold a descriptor.
    pub const fn new(buf: &'a [u8], desc_size: usize) -> Result<Self, MemoryMapError> {
        if desc_size < MemoryDescriptor::LEN {
            return Err(MemoryMapError::DescriptorTooSmall(desc_size));
        }
        Ok(Self { buf, desc_size })
    }

    /// All descriptors in firmware order. A truncated trailing record is ignored.
    pub fn descriptors(&self) -> impl Iterator<Item = MemoryDescriptor> + 'a {
        self.buf
            .chunks_exact(self.desc_size)
            .filter_map(MemoryDescriptor::parse)
    }

    /// Usable memory as page-trimmed extents, physically adjacent descriptors merged.
    #[must_use]
    pub fn extents(&self) -> Extents<'a> {
        Extents {
            inner: self.buf.chunks_exact(self.desc_size),
            pending: None,
        }
    }

    /// Invoke `f(start, end)` for each usable extent, stopping at the first error.
    ///
    /// # Errors
    /// Whatever `f` returns.
    pub fn walk<E>(&self, mut f: impl FnMut(u64, u64) -> Result<(), E>) -> Result<(), E> {
        for ext in self.extents() {
            f(ext.start, ext.end)?;
        }
        Ok(())
    }
}

/// Iterator returned by [`FirmwareMemoryMap::extents`].
pub struct Extents<'a> {
    inner: core::slice::ChunksExact<'a, u8>,
    pending: Option<(u64, u64)>,
}

impl Extents<'_> {
    fn trim((start, end): (u64, u64)) -> Option<PhysExtent> {
        let ext = PhysExtent {
            start: start.checked_next_multiple_of(PAGE_SIZE)?,
            end: align_down(end, PAGE_SIZE),
        };
        (!ext.is_empty()).then_some(ext)
    }
}

impl Iterator for Extents<'_> {
    type Item = PhysExtent;

    fn next(&mut self) -> Option<PhysExtent> {
        loop {
            let Some(chunk) = self.inner.next() else {
                return self.pending.take().and_then(Self::trim);
            };
            let Some(md) = MemoryDescriptor::parse(chunk) else {
                continue;
            };
            if !md.is_usable() || md.number_of_pages == 0 {
                continue;
            }
            let Some(md_end) = md.phys_end() else {
                warn!(
                    "memory map: skipping descriptor at {:#x} with {:#x} pages past the end of physical memory",
                    md.phys_start, md.number_of_pages
                );
                continue;
            };
            match self.pending {
                Some((start, end)) if end == md.phys_start => {
                    self.pending = Some((start, md_end));
                }
                Some(prev) => {
                    self.pending = Some((md.phys_start, md_end));
                    if let Some(ext) = Self::trim(prev) {
                        return Some(ext);
                    }
                }
                None => self.pending = Some((md.phys_start, md_end)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STRIDE: usize = 48;

    fn push(buf: &mut Vec<u8>, ty: u32, start: u64, pages: u64, attr: u64) {
        let mut rec = [0u8; STRIDE];
        rec[0..4].copy_from_slice(&ty.to_le_bytes());
        rec[8..16].copy_from_slice(&start.to_le_bytes());
        rec[24..32].copy_from_slice(&pages.to_le_bytes());
        rec[32..40].copy_from_slice(&attr.to_le_bytes());
        buf.extend_from_slice(&rec);
    }

    #[test]
    fn rejects_short_stride() {
        assert_eq!(
            FirmwareMemoryMap::new(&[], 24).err(),
            Some(MemoryMapError::DescriptorTooSmall(24))
        );
    }

    #[test]
    fn merges_adjacent_and_skips_reserved() {
        let mut buf = Vec::new();
        push(&mut buf, 7, 0x10_0000, 0x100, EFI_MEMORY_WB);
        push(&mut buf, 4, 0x20_0000, 0x100, EFI_MEMORY_WB);
        push(&mut buf, 0, 0x30_0000, 0x100, EFI_MEMORY_WB);
        push(&mut buf, 7, 0x40_0000, 0x100, EFI_MEMORY_WB);
        let map = FirmwareMemoryMap::new(&buf, STRIDE).unwrap();
        let v: Vec<_> = map.extents().collect();
        assert_eq!(
            v,
            vec![
                PhysExtent { start: 0x10_0000, end: 0x30_0000 },
                PhysExtent { start: 0x40_0000, end: 0x50_0000 },
            ]
        );
    }

    #[test]
    fn trims_to_kernel_pages() {
        let mut buf = Vec::new();
        // 0x1000..0x9000 contains no full 16 KiB page besides 0x4000..0x8000
        push(&mut buf, 7, 0x1000, 8, EFI_MEMORY_WB);
        // uncached memory is never usable
        push(&mut buf, 7, 0x10_0000, 0x100, 0);
        let map = FirmwareMemoryMap::new(&buf, STRIDE).unwrap();
        let v: Vec<_> = map.extents().collect();
        assert_eq!(v, vec![PhysExtent { start: 0x4000, end: 0x8000 }]);
    }

    #[test]
    fn wrapping_descriptors_are_skipped() {
        let mut buf = Vec::new();
        push(&mut buf, 7, 0x10_0000, 0x100, EFI_MEMORY_WB);
        // page count shifts past 64 bits
        push(&mut buf, 7, u64::MAX - 0xFFFF, u64::MAX >> 4, EFI_MEMORY_WB);
        // small count, but the end wraps
        push(&mut buf, 7, u64::MAX - 0x3FFF, 8, EFI_MEMORY_WB);
        push(&mut buf, 7, 0x40_0000, 0x100, EFI_MEMORY_WB);
        let map = FirmwareMemoryMap::new(&buf, STRIDE).unwrap();

        let mds: Vec<_> = map.descriptors().collect();
        assert_eq!(mds[1].phys_end(), None);
        assert_eq!(mds[2].phys_end(), None);
        assert_eq!(mds[3].phys_end(), Some(0x50_0000));

        let v: Vec<_> = map.extents().collect();
        assert_eq!(
            v,
            vec![
                PhysExtent { start: 0x10_0000, end: 0x20_0000 },
                PhysExtent { start: 0x40_0000, end: 0x50_0000 },
            ]
        );
    }

    #[test]
    fn extent_at_the_top_of_memory_does_not_overflow() {
        let mut buf = Vec::new();
        // ends exactly at 2^64 - 4 KiB; the start rounds up past the end
        push(&mut buf, 7, u64::MAX - 0x1FFF, 1, EFI_MEMORY_WB);
        let map = FirmwareMemoryMap::new(&buf, STRIDE).unwrap();
        assert_eq!(map.extents().count(), 0);
    }

    #[test]
    fn walk_stops_on_error() {
        let mut buf = Vec::new();
        push(&mut buf, 7, 0x10_0000, 0x10, EFI_MEMORY_WB);
        push(&mut buf, 7, 0x80_0000, 0x10, EFI_MEMORY_WB);
        let map = FirmwareMemoryMap::new(&buf, STRIDE).unwrap();
        let mut seen = 0;
        let r = map.walk(|_, _| {
            seen += 1;
            Err(())
        });
        assert_eq!(r, Err(()));
        assert_eq!(seen, 1);
    }
}
