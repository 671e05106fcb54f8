// SPDX-License-Identifier: MPL-2.0
//! Randomized invariant checks for the properties spec.md §8 quantifies
//! (P1–P8). Every generated operation is non-blocking (`wait = false`): a
//! `wait = true` request against `DeterministicParker`-style synchronous
//! execution would retry forever without a second thread to actually
//! release the blocker, so blocking behavior is covered by the real-thread
//! scenarios in `scenarios.rs` and by direct state manipulation below for
//! P7/P8, not by this fuzz loop.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use rangelock::arena::LockArena;
use rangelock::config::Config;
use rangelock::deadlock::DeadlockRegistry;
use rangelock::list::LockList;
use rangelock::manager::LockManager;
use rangelock::park::StdParker;
use rangelock::range::ByteRange;
use rangelock::record::{HolderId, LockFlags, LockRecord, LockType, NodeId};

fn ranges_overlap(a: ByteRange, b: ByteRange) -> bool {
    !(a.end < b.start || b.end < a.start)
}

/// P1 (disjointness-per-holder), P2 (exclusivity across holders), P3
/// (sorted by start).
fn check_invariants(held: &[(HolderId, LockType, ByteRange)]) {
    for i in 0..held.len() {
        for j in (i + 1)..held.len() {
            let (h1, t1, r1) = held[i];
            let (h2, t2, r2) = held[j];
            if h1 == h2 {
                assert!(
                    !ranges_overlap(r1, r2),
                    "P1 violated: holder {:?} holds overlapping {:?} and {:?}",
                    h1, r1, r2
                );
            } else if ranges_overlap(r1, r2) {
                assert!(
                    t1 == LockType::Shared && t2 == LockType::Shared,
                    "P2 violated: {:?}:{:?} overlaps {:?}:{:?} with an EXCLUSIVE",
                    h1, r1, h2, r2
                );
            }
        }
    }
    for w in held.windows(2) {
        assert!(w[0].2.start <= w[1].2.start, "P3 violated: held list not sorted by start");
    }
}

fn manager() -> LockManager {
    let _ = env_logger::try_init();
    LockManager::new(NodeId(1), Arc::new(StdParker::new()), Config::default())
}

#[test]
fn random_nonblocking_sequences_preserve_p1_p2_p3() {
    let holders = [HolderId::Posix(1), HolderId::Posix(2), HolderId::Posix(3)];
    for seed in 0..40u64 {
        let mgr = manager();
        let mut rng = StdRng::seed_from_u64(seed);
        for _ in 0..60 {
            let holder = holders[rng.random_range(0..holders.len())];
            let start = rng.random_range(0..20u64);
            let len = rng.random_range(1..8u64);
            let range = ByteRange::new(start, start + len - 1);
            if rng.random_bool(0.3) {
                mgr.clear_lock(holder, range);
            } else {
                let type_ = if rng.random_bool(0.5) {
                    LockType::Shared
                } else {
                    LockType::Exclusive
                };
                // Non-blocking: a conflict just returns EAGAIN and leaves
                // the list untouched, which is itself part of what we're
                // checking (the invariant still holds on failure).
                let _ = mgr.set_lock(holder, type_, LockFlags::posix(false), range);
            }
            check_invariants(&mgr.held_locks());
        }
    }
}

/// P5: releasing the same range twice is idempotent.
#[test]
fn clear_lock_is_idempotent_under_random_state() {
    let holders = [HolderId::Posix(1), HolderId::Posix(2)];
    for seed in 0..20u64 {
        let mgr = manager();
        let mut rng = StdRng::seed_from_u64(seed);
        for _ in 0..30 {
            let holder = holders[rng.random_range(0..holders.len())];
            let start = rng.random_range(0..20u64);
            let len = rng.random_range(1..8u64);
            let range = ByteRange::new(start, start + len - 1);
            let type_ = if rng.random_bool(0.5) {
                LockType::Shared
            } else {
                LockType::Exclusive
            };
            let _ = mgr.set_lock(holder, type_, LockFlags::posix(false), range);
        }

        let holder = holders[rng.random_range(0..holders.len())];
        let start = rng.random_range(0..20u64);
        let len = rng.random_range(1..8u64);
        let range = ByteRange::new(start, start + len - 1);

        mgr.clear_lock(holder, range);
        let after_first = mgr.held_locks();
        mgr.clear_lock(holder, range);
        let after_second = mgr.held_locks();
        assert_eq!(after_first, after_second, "P5 violated for seed {seed}");
    }
}

/// P6: round trip on a quiescent node.
#[test]
fn round_trip_on_quiescent_node() {
    let mgr = manager();
    let p1 = HolderId::Posix(1);
    let range = ByteRange::new(0, 99);

    mgr.set_lock(p1, LockType::Exclusive, LockFlags::posix(false), range)
        .unwrap();

    let report = mgr.get_lock(p1, LockType::Exclusive, range);
    assert_eq!(report.type_, LockType::Unlock);

    mgr.clear_lock(p1, range);
    assert!(mgr.held_locks().is_empty());
}

/// P7: deadlock detection never visits more than `max_depth` holders. Build
/// a cycle of randomized length and confirm detection succeeds only once
/// the depth bound reaches (or exceeds) that length.
#[test]
fn deadlock_search_is_bounded_by_depth() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..25 {
        let cycle_len = rng.random_range(2..12usize);
        let mut arena = LockArena::new();
        let mut registry = DeadlockRegistry::new();
        let holders: Vec<HolderId> = (0..cycle_len as u64).map(HolderId::Posix).collect();

        // holders[i] is blocked waiting on a lock held by holders[(i+1) %
        // cycle_len], except holders[0], which is the one about to request
        // what holders[1] holds (so the cycle closes after `cycle_len - 1`
        // hops from holders[1]).
        let mut held_lock_of = Vec::with_capacity(cycle_len);
        for &h in &holders {
            held_lock_of.push(arena.insert(LockRecord::new(
                LockType::Exclusive,
                LockFlags::posix(true),
                ByteRange::new(0, 9),
                h,
                NodeId(1),
            )));
        }
        for i in 1..cycle_len {
            let next = (i + 1) % cycle_len;
            let mut req = LockRecord::new(
                LockType::Exclusive,
                LockFlags::posix(true),
                ByteRange::new(0, 9),
                holders[i],
                NodeId(1),
            );
            req.next = Some(held_lock_of[next]);
            let req_id = arena.insert(req);
            registry.mark_waiting(holders[i], req_id);
        }

        // `would_deadlock` checks one holder per loop iteration, starting at
        // the blocker (holders[1]) and walking holders[2], holders[3], ...
        // before finally reaching holders[0] (the requester) — that last
        // check is the `cycle_len`-th, so anything short of that bound must
        // not detect the cycle.
        assert!(
            !registry.would_deadlock(holders[0], holders[1], &arena, cycle_len - 1),
            "cycle_len={cycle_len}: detected too early"
        );
        assert!(
            registry.would_deadlock(holders[0], holders[1], &arena, cycle_len),
            "cycle_len={cycle_len}: not detected within a sufficient bound"
        );
    }
}

/// P8: releasing a sole holder's exclusive lock wakes a blocked waiter,
/// which then retries and is granted.
#[test]
fn waiter_is_woken_and_granted_after_release() {
    let mgr = Arc::new(manager());
    let a = HolderId::Posix(1);
    let b = HolderId::Posix(2);
    let range = ByteRange::new(0, 9);

    mgr.set_lock(a, LockType::Exclusive, LockFlags::posix(false), range)
        .unwrap();

    let waiter = {
        let mgr = Arc::clone(&mgr);
        std::thread::spawn(move || {
            mgr.set_lock(b, LockType::Exclusive, LockFlags::posix(true), range)
        })
    };

    std::thread::sleep(std::time::Duration::from_millis(50));
    mgr.clear_lock(a, range);

    waiter.join().unwrap().unwrap();
    assert_eq!(mgr.held_locks(), vec![(b, LockType::Exclusive, range)]);
}

/// P4: no record is simultaneously on a node's held list and some other
/// record's blocked queue. Driven directly at the `LockList` level (the
/// same technique `deadlock_search_is_bounded_by_depth` above uses) through
/// a `RequestContainsExisting` absorption that transfers a waiter from the
/// absorbed record onto the new one — the exact case where a stale `.next`
/// would otherwise leave the waiter pointed at a freed record while its id
/// still sits in the *new* record's blocked queue, in violation of P4.
#[test]
fn p4_no_record_is_held_and_blocked_at_once() {
    let mut list = LockList::new();
    let holder = HolderId::Posix(1);
    let other = HolderId::Posix(2);

    let existing_id = list.arena.insert(LockRecord::new(
        LockType::Exclusive,
        LockFlags::posix(false),
        ByteRange::new(40, 59),
        holder,
        NodeId(1),
    ));
    list.insert_sorted(existing_id);

    let mut waiter = LockRecord::new(
        LockType::Shared,
        LockFlags::posix(true),
        ByteRange::new(40, 59),
        other,
        NodeId(1),
    );
    waiter.next = Some(existing_id);
    let waiter_id = list.arena.insert(waiter);
    list.arena.get_mut(existing_id).blocked_queue.push_back(waiter_id);

    // Absorb `existing_id` into a wider same-holder request, transferring
    // its waiters the way `manager::grant`'s `RequestContainsExisting`
    // non-downgrading branch does.
    let request_id = list.arena.insert(LockRecord::new(
        LockType::Exclusive,
        LockFlags::posix(false),
        ByteRange::new(0, 99),
        holder,
        NodeId(1),
    ));
    list.insert_sorted(request_id);
    let transferred: Vec<_> = list
        .arena
        .get_mut(existing_id)
        .blocked_queue
        .drain(..)
        .collect();
    for &w in &transferred {
        list.arena.get_mut(w).next = Some(request_id);
    }
    list.arena.get_mut(request_id).blocked_queue.extend(transferred);
    list.remove_held(existing_id);
    list.arena.remove(existing_id);

    for &held_id in list.held() {
        for &other_id in list.held() {
            assert!(
                !list.arena.get(other_id).blocked_queue.contains(&held_id),
                "P4 violated: {:?} is both held and queued on {:?}",
                held_id, other_id
            );
        }
    }
    assert_eq!(list.arena.get(waiter_id).next, Some(request_id));
    assert!(list.arena.get(request_id).blocked_queue.contains(&waiter_id));
    assert!(!list.arena.contains(existing_id));
}
