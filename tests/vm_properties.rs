//! Model-checked invariants over random operation sequences.
//!
//! A small kernel instance is driven with arbitrary map/unmap/write/read/
//! evict interleavings while a naive model tracks what each page should
//! contain. After every step the structural invariants must hold: the three
//! PTE states are exclusive and match the model, every user-resident frame
//! is linked exactly once with a back-reference that resolves to it, every
//! reserved slot is named by exactly one swapped PTE, counters never move
//! backwards, and teardown returns every resource.

mod common;

use std::collections::{BTreeMap, HashSet};

use common::*;
use proptest::collection::vec;
use proptest::prelude::*;

use pager_r::vm::page_table;
use pager_r::vm::{AddressSpace, PteState, StatsSnapshot, Vm};

#[derive(Debug, Clone)]
enum Op {
    Map(u8),
    Unmap(u8),
    Write(u8, u8),
    Read(u8),
    Evict,
}

const PAGES: u8 = 24;

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..PAGES).prop_map(Op::Map),
        (0..PAGES).prop_map(Op::Unmap),
        (0..PAGES, any::<u8>()).prop_map(|(i, b)| Op::Write(i, b)),
        (0..PAGES).prop_map(Op::Read),
        Just(Op::Evict),
    ]
}

/// What the kernel must agree with: mapped pages and their last contents.
type Model = BTreeMap<u8, u8>;

fn check_invariants(vm: &Vm, space: &AddressSpace, model: &Model, last: &mut StatsSnapshot) {
    let pages = space.user_pages(vm);

    // The mapped set matches the model, one exclusive state per page.
    assert_eq!(pages.len(), model.len(), "mapped page count diverged");
    let mut swapped_slots = HashSet::new();
    for (va, state) in &pages {
        let idx = ((va.0 - USER_BASE) as usize / pager_r::params::PGSIZE) as u8;
        assert!(model.contains_key(&idx), "kernel maps page the model lost");
        match state {
            PteState::Resident { pa, .. } => {
                let frame = vm.phys().frame_index(*pa);
                assert!(
                    vm.lru().contains(frame),
                    "resident user frame {} not in LRU",
                    frame
                );
            }
            PteState::Swapped { slot, .. } => {
                assert!(
                    vm.swap_map().is_reserved(*slot),
                    "swapped PTE names a free slot"
                );
                assert!(
                    swapped_slots.insert(slot.0),
                    "slot {} named by two PTEs",
                    slot.0
                );
            }
            PteState::Unmapped => unreachable!("user_pages never yields unmapped"),
        }
    }

    // Every reserved slot is accounted for by exactly one swapped PTE.
    assert_eq!(
        swapped_slots.len(),
        vm.swap_map().used(),
        "slot bitmap and PTEs disagree"
    );

    // Every linked frame is owned, unique, and its back-reference resolves
    // to a resident PTE naming that exact frame.
    let linked = vm.lru().linked_frames();
    let mut seen = HashSet::new();
    for frame in linked {
        assert!(seen.insert(frame), "frame {} linked twice", frame);
        let owner = vm.lru().owner_of(frame).expect("linked frame has an owner");
        let pte = page_table::walk(vm.phys(), owner.root, owner.va)
            .expect("back-reference walks to a PTE");
        match page_table::decode(pte.load(std::sync::atomic::Ordering::Acquire)) {
            PteState::Resident { pa, .. } => {
                assert_eq!(vm.phys().frame_index(pa), frame, "back-reference mismatch")
            }
            other => panic!("linked frame {} has non-resident PTE {:?}", frame, other),
        }
    }

    // Counters are monotonic.
    let snap = vm.stats().snapshot();
    assert!(snap.swap_reads >= last.swap_reads);
    assert!(snap.swap_writes >= last.swap_writes);
    assert!(snap.faults >= last.faults);
    *last = snap;
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn invariants_hold_under_random_ops(ops in vec(op_strategy(), 1..120)) {
        // Small enough that eviction and OOM both happen routinely.
        let k = kernel(16, 12);
        let free_at_start = k.vm.free_frames();
        let space = AddressSpace::new(&k.vm).unwrap();
        let mut model = Model::new();
        let mut last = k.vm.stats().snapshot();

        for op in ops {
            match op {
                Op::Map(i) => {
                    if model.contains_key(&i) {
                        prop_assert!(map_rw(&k.vm, &space, i as usize).is_err());
                    } else if map_rw(&k.vm, &space, i as usize).is_ok() {
                        // Fresh mappings read back as zero.
                        model.insert(i, 0);
                    }
                }
                Op::Unmap(i) => {
                    space.unmap_range(&k.vm, page_va(i as usize), 1);
                    model.remove(&i);
                }
                Op::Write(i, b) => {
                    let res = fill_page(&k.vm, &space, i as usize, b);
                    if model.contains_key(&i) {
                        prop_assert!(res.is_ok(), "write to mapped page failed: {:?}", res);
                        model.insert(i, b);
                    } else {
                        prop_assert!(res.is_err());
                    }
                }
                Op::Read(i) => {
                    let res = read_first_byte(&k.vm, &space, i as usize);
                    match model.get(&i) {
                        Some(&b) => prop_assert_eq!(res, Ok(b), "page {} corrupted", i),
                        None => prop_assert!(res.is_err()),
                    }
                }
                Op::Evict => {
                    // May legitimately fail (nothing resident or swap full).
                    let _ = k.vm.reclaim_one();
                }
            }
            check_invariants(&k.vm, &space, &model, &mut last);
        }

        // Resource conservation: exit returns every frame and slot.
        space.teardown(&k.vm);
        prop_assert_eq!(k.vm.free_frames(), free_at_start);
        prop_assert_eq!(k.vm.swap_map().used(), 0);
        prop_assert!(k.vm.lru().is_empty());
    }

    /// Fork fidelity: whatever mix of resident and swapped pages the parent
    /// holds, the child reads identical contents at every address.
    #[test]
    fn fork_preserves_every_page(
        pattern in vec(any::<u8>(), 1..16usize),
        evictions in 0..12usize,
    ) {
        let k = kernel(24, 48);
        let free_at_start = k.vm.free_frames();
        let parent = AddressSpace::new(&k.vm).unwrap();

        for (i, &b) in pattern.iter().enumerate() {
            map_rw(&k.vm, &parent, i).unwrap();
            fill_page(&k.vm, &parent, i, b).unwrap();
        }
        for _ in 0..evictions {
            let _ = k.vm.reclaim_one();
        }

        let child = parent.fork_copy(&k.vm).expect("fork fits");
        for (i, &b) in pattern.iter().enumerate() {
            prop_assert_eq!(read_first_byte(&k.vm, &child, i), Ok(b), "child page {}", i);
            prop_assert_eq!(read_first_byte(&k.vm, &parent, i), Ok(b), "parent page {}", i);
        }

        child.teardown(&k.vm);
        parent.teardown(&k.vm);
        prop_assert_eq!(k.vm.free_frames(), free_at_start);
        prop_assert_eq!(k.vm.swap_map().used(), 0);
    }

    /// Round trip: a page's bytes survive any number of evict/recover cycles.
    #[test]
    fn contents_survive_eviction_cycles(byte in any::<u8>(), cycles in 1..8usize) {
        let k = kernel(16, 8);
        let space = AddressSpace::new(&k.vm).unwrap();
        map_rw(&k.vm, &space, 0).unwrap();
        fill_page(&k.vm, &space, 0, byte).unwrap();

        for _ in 0..cycles {
            prop_assert!(k.vm.reclaim_one(), "single page must be evictable");
            let is_swapped = matches!(
                space.user_pages(&k.vm)[0].1,
                PteState::Swapped { .. }
            );
            prop_assert!(is_swapped);
            assert_page_is(&k.vm, &space, 0, byte);
        }
        space.teardown(&k.vm);
    }
}
