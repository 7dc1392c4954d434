mod common;

use common::{TEST_FRAMES, TestPhys, boot, two_extent_map};
use kernel::{DescriptorHotplug, EINVAL, ENOMEM, MmState};
use kernel_alloc::{HotplugError, MemBlock, add_memory, remove_memory};
use kernel_info::boot::FirmwareMemoryMap;
use kernel_info::memory::PAGE_SIZE;
use kernel_memory_addresses::{NodeId, PageFrameNumber, PhysicalAddress};
use kernel_vmem::descriptor::Zone;
use kernel_vmem::page_table::prot::{PAGE_KERNEL, PAGE_READONLY};
use kernel_vmem::{DescriptorStore, PageFlags};

const HOT_BASE: u64 = 64 << 20;
const HOT_PFN: u64 = HOT_BASE / PAGE_SIZE;

#[test]
fn hot_added_frames_become_valid_and_reserved() {
    let phys = TestPhys::with_frames(TEST_FRAMES);
    let buf = two_extent_map();
    let fw = FirmwareMemoryMap::new(&buf, common::DESC_STRIDE).unwrap();
    let state = MmState::new();
    let mut memblock = MemBlock::new();
    let (_, map) = boot(&state, &phys, &mut memblock, &fw);

    assert!(!map.probe_valid(PageFrameNumber::new(HOT_PFN)));

    let node = NodeId::new(1);
    let mut backend = DescriptorHotplug::new(&map, &mut memblock);
    add_memory(&mut backend, node, PhysicalAddress::new(HOT_BASE), 64 * PAGE_SIZE, PAGE_KERNEL)
        .unwrap();

    for pfn in [HOT_PFN, HOT_PFN + 63] {
        let pfn = PageFrameNumber::new(pfn);
        assert!(map.probe_valid(pfn));
        let d = map.descriptor(pfn).unwrap();
        assert_eq!(d.pfn(), pfn);
        assert_eq!(d.node(), node);
        assert_eq!(d.zone(), Zone::Movable);
        assert!(d.test(PageFlags::RESERVED));
    }
}

#[test]
fn wrong_protection_touches_nothing() {
    let phys = TestPhys::with_frames(TEST_FRAMES);
    let buf = two_extent_map();
    let fw = FirmwareMemoryMap::new(&buf, common::DESC_STRIDE).unwrap();
    let state = MmState::new();
    let mut memblock = MemBlock::new();
    let (_, map) = boot(&state, &phys, &mut memblock, &fw);
    let free_before = memblock.free_memory();

    let mut backend = DescriptorHotplug::new(&map, &mut memblock);
    let err = add_memory(
        &mut backend,
        NodeId::BOOT,
        PhysicalAddress::new(HOT_BASE),
        64 * PAGE_SIZE,
        PAGE_READONLY,
    )
    .unwrap_err();
    assert_eq!(err, HotplugError::InvalidArgument { requested: PAGE_READONLY });
    assert!(!map.probe_valid(PageFrameNumber::new(HOT_PFN)));
    assert_eq!(memblock.free_memory(), free_before);
}

#[test]
fn exhausted_allocator_reports_enomem() {
    // Only the boot extents exist; drain them before hot-adding.
    let phys = TestPhys::with_frames(TEST_FRAMES);
    let buf = two_extent_map();
    let fw = FirmwareMemoryMap::new(&buf, common::DESC_STRIDE).unwrap();
    let state = MmState::new();
    let mut memblock = MemBlock::new();
    let (_, map) = boot(&state, &phys, &mut memblock, &fw);
    let free = memblock.free_memory();
    for r in memblock.memory().to_vec() {
        memblock.reserve(r.base, r.size).unwrap();
    }
    assert!(free > 0);
    assert_eq!(memblock.free_memory(), 0);

    let mut backend = DescriptorHotplug::new(&map, &mut memblock);
    let err = add_memory(
        &mut backend,
        NodeId::BOOT,
        PhysicalAddress::new(HOT_BASE),
        64 * PAGE_SIZE,
        PAGE_KERNEL,
    )
    .unwrap_err();
    assert_eq!(err, HotplugError::Backend(-ENOMEM));
}

#[test]
fn removed_frames_keep_their_descriptors() {
    let phys = TestPhys::with_frames(TEST_FRAMES);
    let buf = two_extent_map();
    let fw = FirmwareMemoryMap::new(&buf, common::DESC_STRIDE).unwrap();
    let state = MmState::new();
    let mut memblock = MemBlock::new();
    let (_, map) = boot(&state, &phys, &mut memblock, &fw);

    let mut backend = DescriptorHotplug::new(&map, &mut memblock);
    add_memory(&mut backend, NodeId::BOOT, PhysicalAddress::new(HOT_BASE), 8 * PAGE_SIZE, PAGE_KERNEL)
        .unwrap();
    let pfn = PageFrameNumber::new(HOT_PFN + 2);
    map.descriptor(pfn).unwrap().clear_flags(PageFlags::RESERVED);

    remove_memory(&mut backend, PhysicalAddress::new(HOT_BASE), 8 * PAGE_SIZE);
    assert!(map.probe_valid(pfn));
    assert!(map.descriptor(pfn).unwrap().test(PageFlags::RESERVED));
}

#[test]
fn hot_add_past_the_descriptor_map_is_rejected() {
    let phys = TestPhys::with_frames(TEST_FRAMES);
    let buf = two_extent_map();
    let fw = FirmwareMemoryMap::new(&buf, common::DESC_STRIDE).unwrap();
    let state = MmState::new();
    let mut memblock = MemBlock::new();
    let (_, map) = boot(&state, &phys, &mut memblock, &fw);
    let limit = map.limit().as_u64();
    let free_before = memblock.free_memory();

    let mut backend = DescriptorHotplug::new(&map, &mut memblock);
    for (base, size) in [
        (limit * PAGE_SIZE, 64 * PAGE_SIZE),
        ((limit - 8) * PAGE_SIZE, 64 * PAGE_SIZE),
        (5 * PAGE_SIZE + (1 << 61), 8 * PAGE_SIZE),
    ] {
        let err = add_memory(&mut backend, NodeId::BOOT, PhysicalAddress::new(base), size, PAGE_KERNEL)
            .unwrap_err();
        assert_eq!(err, HotplugError::Backend(-EINVAL));
    }

    assert!(!map.probe_valid(PageFrameNumber::new(limit)));
    assert!(!map.probe_valid(PageFrameNumber::new(limit - 8)));
    assert!(!map.probe_valid(PageFrameNumber::new(5 + (1 << 47))));
    assert_eq!(memblock.free_memory(), free_before);
}
