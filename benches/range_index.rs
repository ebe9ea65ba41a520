use criterion::{black_box, criterion_group, criterion_main, Criterion};
use linuxmemcheck::integrity::{AddressRangeIndex, KnownAddressCache, KnownRanges, ProvenanceChecker};
use linuxmemcheck::kernel::modules::ModuleRange;
use linuxmemcheck::memory::{Arch, FlatSpace};

const MODULE_BASE: u64 = 0xffff_ffff_c000_0000;

fn make_modules(count: u64) -> Vec<ModuleRange> {
    (0..count)
        .map(|i| ModuleRange::new(&format!("mod{}", i), MODULE_BASE + i * 0x2_0000, 0x1_8000))
        .collect()
}

fn bench_range_index(c: &mut Criterion) {
    let space = FlatSpace::new(Vec::<u8>::new(), 0, Arch::X64);
    let modules = make_modules(4000);
    let index = AddressRangeIndex::new(&modules, &space).unwrap();
    let probes: Vec<u64> = (0..1024u64)
        .map(|i| MODULE_BASE + i.wrapping_mul(0x9_e377) % (4000 * 0x2_0000))
        .collect();

    c.bench_function("range_index_find", |b| {
        b.iter(|| {
            probes
                .iter()
                .filter(|&&addr| index.find(&space, black_box(addr)).is_some())
                .count()
        });
    });

    c.bench_function("is_known_address_cached", |b| {
        let checker = ProvenanceChecker::new(
            &space,
            KnownRanges::new(Some((0xffff_ffff_8100_0000, 0xffff_ffff_81e0_0000)), index),
        );
        b.iter(|| {
            let mut cache = KnownAddressCache::new();
            for _ in 0..4 {
                for &addr in &probes {
                    black_box(checker.is_known_address(addr, &mut cache));
                }
            }
        });
    });
}

criterion_group!(benches, bench_range_index);
criterion_main!(benches);
