use kernel::{BootError, MmState, mmu_init};
use kernel_registers::{ControlRegisters, Pta, RegionRegister};
use kernel_vmem::VlptError;

#[derive(Default)]
struct Cpu {
    pta: Option<Pta>,
    rr: [u64; 8],
}

impl ControlRegisters for Cpu {
    fn store_pta(&mut self, pta: Pta) {
        self.pta = Some(pta);
    }

    fn load_region_register(&self, region: u64) -> RegionRegister {
        RegionRegister::from_bits(self.rr[usize::try_from(region).unwrap()])
    }

    fn store_region_register(&mut self, region: u64, rr: RegionRegister) {
        self.rr[usize::try_from(region).unwrap()] = rr.into_bits();
    }
}

/// Unimplemented-address mask of a CPU implementing `bits` offset bits.
const fn unimpl_mask(bits: u32) -> u64 {
    ((1 << 61) - 1) & !((1 << bits) - 1)
}

#[test]
fn boot_cpu_programs_the_pta() {
    let state = MmState::new();
    let mut cpu = Cpu::default();
    let cfg = mmu_init(&state, &mut cpu, unimpl_mask(51)).unwrap();

    assert_eq!(cfg.impl_va_bits(), 51);
    assert_eq!(cfg.vmlpt_bits(), 51 - 14 + 3);
    assert_eq!(state.vlpt(), Some(&cfg));
    let pta = cpu.pta.unwrap();
    assert_eq!(pta.base(), cfg.base());
    assert_eq!(u32::from(pta.size()), cfg.vmlpt_bits());
    assert!(!pta.vf());
}

#[test]
fn secondary_cpus_must_match() {
    let state = MmState::new();
    mmu_init(&state, &mut Cpu::default(), unimpl_mask(51)).unwrap();

    let mut same = Cpu::default();
    mmu_init(&state, &mut same, unimpl_mask(51)).unwrap();
    assert!(same.pta.is_some());

    let mut wider = Cpu::default();
    let err = mmu_init(&state, &mut wider, unimpl_mask(55)).unwrap_err();
    assert_eq!(err, BootError::VlptMismatch { boot: 51, this: 55 });
    assert!(wider.pta.is_none());
}

#[test]
fn narrow_cpu_is_rejected_before_touching_registers() {
    let state = MmState::new();
    let mut cpu = Cpu::default();
    let err = mmu_init(&state, &mut cpu, unimpl_mask(44)).unwrap_err();
    assert_eq!(
        err,
        BootError::Vlpt(VlptError::BogusAddressWidth { impl_va_bits: 44 })
    );
    assert!(cpu.pta.is_none());
    assert!(state.vlpt().is_none());
}
