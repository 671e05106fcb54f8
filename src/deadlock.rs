// SPDX-License-Identifier: MPL-2.0
//! Wait-for graph walk for POSIX deadlock detection (spec.md §4.4a).
//!
//! The original algorithm detects cycles by reading each blocked process's
//! saved wait channel out of the OS process structure. spec.md §9
//! recommends against that host-kernel coupling: this module instead keeps
//! its own `holder -> currently-waiting lock` registry, updated at the same
//! points `set_lock` would otherwise touch `p_wchan`/`p_wmesg`. Only POSIX
//! locks participate — FLOCK locks cover the whole file and cannot
//! deadlock in the byte-range sense.

use std::collections::HashMap;

use crate::arena::{LockArena, LockId};
use crate::record::{HolderId, LockRecord};

#[derive(Default)]
pub struct DeadlockRegistry {
    /// Maps a POSIX holder to the request record it is currently blocked on,
    /// i.e. the lock whose `next` field points at the blocker.
    waiting: HashMap<HolderId, LockId>,
}

impl DeadlockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_waiting(&mut self, holder: HolderId, request: LockId) {
        debug_assert!(holder.is_posix(), "only POSIX holders participate in deadlock detection");
        self.waiting.insert(holder, request);
    }

    pub fn clear_waiting(&mut self, holder: &HolderId) {
        self.waiting.remove(holder);
    }

    /// Walk the wait-for chain starting at `blocker_holder`, bounded by
    /// `max_depth` holders. Returns `true` if `requesting_holder` is found
    /// on the chain, i.e. granting the request would complete a cycle.
    pub fn would_deadlock(
        &self,
        requesting_holder: HolderId,
        blocker_holder: HolderId,
        arena: &LockArena<LockRecord>,
        max_depth: usize,
    ) -> bool {
        let mut current = blocker_holder;
        for _ in 0..max_depth {
            if current == requesting_holder {
                return true;
            }
            let Some(&waiting_request) = self.waiting.get(&current) else {
                return false;
            };
            let request = arena.get(waiting_request);
            let Some(blocked_on) = request.next else {
                return false;
            };
            if !arena.contains(blocked_on) {
                return false;
            }
            let blocker = arena.get(blocked_on);
            if !blocker.holder.is_posix() {
                return false;
            }
            current = blocker.holder;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range::ByteRange;
    use crate::record::{LockFlags, LockType, NodeId};

    fn rec(holder: HolderId, start: u64, end: u64) -> LockRecord {
        LockRecord::new(
            LockType::Exclusive,
            LockFlags::posix(true),
            ByteRange::new(start, end),
            holder,
            NodeId(1),
        )
    }

    #[test]
    fn detects_two_holder_cycle() {
        let mut arena = LockArena::new();
        let p1 = HolderId::Posix(1);
        let p2 = HolderId::Posix(2);

        // P2's request is blocked on a lock held by P1.
        let p1_block = arena.insert(rec(p1, 0, 9));
        let mut p2_request = rec(p2, 0, 9);
        p2_request.next = Some(p1_block);
        let p2_request_id = arena.insert(p2_request);

        let mut registry = DeadlockRegistry::new();
        registry.mark_waiting(p2, p2_request_id);

        // Now P1 wants to acquire something P2 holds: granting would close
        // the cycle P1 -> P2 -> P1.
        assert!(registry.would_deadlock(p1, p2, &arena, 50));
    }

    #[test]
    fn independent_waiters_do_not_deadlock() {
        let arena = LockArena::new();
        let p1 = HolderId::Posix(1);
        let p3 = HolderId::Posix(3);
        let registry = DeadlockRegistry::new();
        assert!(!registry.would_deadlock(p1, p3, &arena, 50));
    }

    #[test]
    fn depth_bound_is_respected() {
        // A 5-holder cycle: holders[1] waits on holders[2], ..., holders[4]
        // waits on holders[0], and holders[0] is the one requesting from
        // holders[1]. Detecting the cycle takes 5 hops from holders[1].
        let mut arena = LockArena::new();
        let mut registry = DeadlockRegistry::new();
        let holders: Vec<HolderId> = (0..5).map(HolderId::Posix).collect();

        let lock_of = |arena: &mut LockArena<LockRecord>, h: HolderId| arena.insert(rec(h, 0, 9));
        let lock0 = lock_of(&mut arena, holders[0]);
        let lock2 = lock_of(&mut arena, holders[2]);
        let lock3 = lock_of(&mut arena, holders[3]);
        let lock4 = lock_of(&mut arena, holders[4]);

        let mut req1 = rec(holders[1], 0, 9);
        req1.next = Some(lock2);
        let req1_id = arena.insert(req1);
        registry.mark_waiting(holders[1], req1_id);

        let mut req2 = rec(holders[2], 0, 9);
        req2.next = Some(lock3);
        let req2_id = arena.insert(req2);
        registry.mark_waiting(holders[2], req2_id);

        let mut req3 = rec(holders[3], 0, 9);
        req3.next = Some(lock4);
        let req3_id = arena.insert(req3);
        registry.mark_waiting(holders[3], req3_id);

        let mut req4 = rec(holders[4], 0, 9);
        req4.next = Some(lock0);
        let req4_id = arena.insert(req4);
        registry.mark_waiting(holders[4], req4_id);

        // holders[0] wants what holders[1] holds: the cycle closes 5 hops
        // later, beyond a depth bound of 2.
        assert!(!registry.would_deadlock(holders[0], holders[1], &arena, 2));
        assert!(registry.would_deadlock(holders[0], holders[1], &arena, 50));
    }
}
