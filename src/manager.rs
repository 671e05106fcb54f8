// SPDX-License-Identifier: MPL-2.0
//! `LockManager`: the four client operations orchestrating the list walker,
//! splitter, waiter queue, and deadlock registry (spec.md §4.4–§4.7).
//!
//! The manager owns its node's held-lock list and deadlock registry behind a
//! `Mutex`, playing the role the enclosing file node's lock plays in the
//! original: every operation holds it for the duration of a list walk, and
//! drops it only across the one suspension point in `set_lock`, exactly as
//! spec.md §5 requires ("suspending there must release the node's
//! serialization ... re-acquire serialization before resuming the list
//! walk"). This mirrors the teacher's `FlockList`, which wraps its queue in a
//! lock and releases it before calling into its wait queue's `wait_until`.

use std::sync::{Arc, Mutex};

use log::{debug, trace, warn};

use crate::deadlock::DeadlockRegistry;
use crate::error::{Errno, Result};
use crate::list::{Filter, LockList};
use crate::park::{ParkResult, Parker};
use crate::range::ByteRange;
use crate::record::{HolderId, LockFlags, LockRecord, LockStyle, LockType, NodeId};
use crate::{return_errno, return_errno_with_message};

/// The blocker a `get_block`/`get_lock` query reports, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockerInfo {
    pub type_: LockType,
    pub range: ByteRange,
    /// `None` for FLOCK blockers and for POSIX blockers this build does not
    /// track a pid for; spec.md §4.6 calls this "unknown/-1" on the wire.
    pub pid: Option<u64>,
}

/// Result of `get_lock`: the public flock-shaped descriptor spec.md §6
/// exchanges with the outer filesystem. `type_ == LockType::Unlock` means no
/// blocker was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlockReport {
    pub type_: LockType,
    pub range: ByteRange,
    pub pid: Option<u64>,
}

struct Inner {
    list: LockList,
    deadlock: DeadlockRegistry,
}

/// Per-node byte-range lock manager. One instance per file node; the node
/// itself (out of scope per spec.md §1) is expected to hold one of these
/// behind its own identity.
pub struct LockManager {
    node: NodeId,
    max_deadlock_depth: usize,
    debug_level: u8,
    parker: Arc<dyn Parker>,
    inner: Mutex<Inner>,
}

impl LockManager {
    pub fn new(node: NodeId, parker: Arc<dyn Parker>, config: crate::config::Config) -> Self {
        Self {
            node,
            max_deadlock_depth: config.max_deadlock_depth,
            debug_level: config.debug_level,
            parker,
            inner: Mutex::new(Inner {
                list: LockList::new(),
                deadlock: DeadlockRegistry::new(),
            }),
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Diagnostic dump of this node's held list, gated by `debug_level`
    /// (spec.md §6 — a verbosity knob only, never consulted for semantics).
    /// `None` when `debug_level == 0`.
    pub fn debug_dump(&self) -> Option<String> {
        if self.debug_level == 0 {
            return None;
        }
        Some(self.inner.lock().unwrap().list.debug_dump())
    }

    /// spec.md §4.4 step 1 / §4.2: the first held entry of another holder
    /// that would deny `(type_, range)` for `holder`.
    pub fn get_block(
        &self,
        holder: HolderId,
        type_: LockType,
        range: ByteRange,
    ) -> Option<BlockerInfo> {
        let guard = self.inner.lock().unwrap();
        find_blocker(&guard.list, holder, type_, range).map(|id| {
            let rec = guard.list.arena.get(id);
            BlockerInfo {
                type_: rec.type_,
                range: rec.range,
                pid: rec.holder.pid(),
            }
        })
    }

    /// spec.md §4.6: non-mutating query, reported as a flock-shaped
    /// descriptor.
    pub fn get_lock(&self, holder: HolderId, type_: LockType, range: ByteRange) -> FlockReport {
        match self.get_block(holder, type_, range) {
            Some(blocker) => FlockReport {
                type_: blocker.type_,
                range: blocker.range,
                pid: blocker.pid,
            },
            None => FlockReport {
                type_: LockType::Unlock,
                range,
                pid: None,
            },
        }
    }

    /// spec.md §4.4.
    pub fn set_lock(
        &self,
        holder: HolderId,
        type_: LockType,
        flags: LockFlags,
        range: ByteRange,
    ) -> Result<()> {
        debug_assert!(type_ != LockType::Unlock, "set_lock never takes UNLOCK");
        loop {
            let mut guard = self.inner.lock().unwrap();

            let Some(blocker_id) = find_blocker(&guard.list, holder, type_, range) else {
                return self.grant(&mut guard, holder, type_, flags, range);
            };
            let blocker = guard.list.arena.get(blocker_id).clone();
            trace!(
                "set_lock: node={:?} holder={:?} blocked by holder={:?} range={:?}",
                self.node, holder, blocker.holder, blocker.range
            );

            // Step 2: non-blocking caller gets EAGAIN immediately.
            if !flags.wait {
                return_errno_with_message!(Errno::EAGAIN, "range is held by another holder");
            }

            // Step 3: POSIX deadlock detection.
            if flags.style == LockStyle::Posix && blocker.flags.style == LockStyle::Posix {
                if guard.deadlock.would_deadlock(
                    holder,
                    blocker.holder,
                    &guard.list.arena,
                    self.max_deadlock_depth,
                ) {
                    warn!(
                        "set_lock: deadlock detected, holder={:?} blocker={:?}",
                        holder, blocker.holder
                    );
                    return_errno_with_message!(Errno::EDEADLK, "granting this lock would deadlock");
                }
            }

            // Step 4: FLOCK upgrade rule — release our own SHARED first, then
            // fall through to step 5 on the same blocker, matching the
            // original (it does not re-scan for a blocker afterwards:
            // releasing our own shared coverage cannot affect whether a
            // *different* holder's lock still blocks us).
            if flags.style == LockStyle::Flock && type_ == LockType::Exclusive {
                self.clear_lock_locked(&mut guard, holder, range);
            }

            // Step 5: enqueue on the blocker's queue and sleep.
            let mut request = LockRecord::new(type_, flags, range, holder, self.node);
            request.next = Some(blocker_id);
            let request_id = guard.list.arena.insert(request);
            guard
                .list
                .arena
                .get_mut(blocker_id)
                .blocked_queue
                .push_back(request_id);
            if flags.style == LockStyle::Posix {
                guard.deadlock.mark_waiting(holder, request_id);
            }
            drop(guard);

            let result = self.parker.park(request_id);

            let mut guard = self.inner.lock().unwrap();
            if flags.style == LockStyle::Posix {
                guard.deadlock.clear_waiting(&holder);
            }
            match result {
                ParkResult::Woken => {
                    // The waker already cleared `next` and dequeued us.
                    guard.list.arena.remove(request_id);
                    drop(guard);
                    continue;
                }
                ParkResult::Interrupted => {
                    // next is still Some: splice ourselves out and surface
                    // the signal error (spec.md §5, "Suspension and
                    // cancellation").
                    if let Some(still_blocking_on) = guard.list.arena.get(request_id).next {
                        if guard.list.arena.contains(still_blocking_on) {
                            let queue =
                                &mut guard.list.arena.get_mut(still_blocking_on).blocked_queue;
                            if let Some(pos) = queue.iter().position(|&x| x == request_id) {
                                queue.remove(pos);
                            }
                        }
                    }
                    guard.list.arena.remove(request_id);
                    return_errno!(Errno::EINTR);
                }
            }
        }
    }

    /// spec.md §4.4 step 6: the grant-path loop, run once `set_lock` has
    /// confirmed nothing else blocks the request.
    fn grant(
        &self,
        guard: &mut std::sync::MutexGuard<'_, Inner>,
        holder: HolderId,
        type_: LockType,
        flags: LockFlags,
        range: ByteRange,
    ) -> Result<()> {
        use crate::range::OverlapCase;

        let template = LockRecord::new(type_, flags, range, holder, self.node);
        let mut request_id: Option<crate::arena::LockId> = None;
        let mut idx = 0;

        loop {
            match guard
                .list
                .find_overlap_from(idx, holder, range, Filter::SelfOnly, request_id)
            {
                None => {
                    ensure_linked(&mut guard.list, &template, &mut request_id);
                    debug!(
                        "set_lock: node={:?} holder={:?} granted range={:?}",
                        self.node, holder, range
                    );
                    return Ok(());
                }
                Some((found_idx, existing_id, case)) => match case {
                    OverlapCase::Equal => {
                        let existing = guard.list.arena.get(existing_id).clone();
                        if type_ == LockType::Shared && existing.type_ == LockType::Exclusive {
                            guard.list.wake(existing_id, self.parker.as_ref());
                        }
                        guard.list.arena.get_mut(existing_id).type_ = type_;
                        return Ok(());
                    }
                    OverlapCase::ExistingContainsRequest => {
                        let existing = guard.list.arena.get(existing_id).clone();
                        if existing.type_ == type_ {
                            return Ok(());
                        }
                        let new_high = guard.list.split(existing_id, range);
                        ensure_linked(&mut guard.list, &template, &mut request_id);
                        if let Some(high) = new_high {
                            guard.list.insert_sorted(high);
                        }
                        guard.list.wake(existing_id, self.parker.as_ref());
                        return Ok(());
                    }
                    OverlapCase::RequestContainsExisting => {
                        let existing_type = guard.list.arena.get(existing_id).type_;
                        let downgrading =
                            type_ == LockType::Shared && existing_type == LockType::Exclusive;
                        if downgrading {
                            guard.list.wake(existing_id, self.parker.as_ref());
                        } else {
                            ensure_linked(&mut guard.list, &template, &mut request_id);
                            let waiters: Vec<_> = guard
                                .list
                                .arena
                                .get_mut(existing_id)
                                .blocked_queue
                                .drain(..)
                                .collect();
                            let request_id = request_id.expect("just linked above");
                            for &waiter in &waiters {
                                guard.list.arena.get_mut(waiter).next = Some(request_id);
                            }
                            guard
                                .list
                                .arena
                                .get_mut(request_id)
                                .blocked_queue
                                .extend(waiters);
                        }
                        ensure_linked(&mut guard.list, &template, &mut request_id);
                        guard.list.remove_held(existing_id);
                        guard.list.arena.remove(existing_id);
                        // `existing_id` is gone; the next entry (if any)
                        // slid down into `found_idx`.
                        idx = found_idx;
                        continue;
                    }
                    OverlapCase::ExistingStartsBefore => {
                        let existing_range = guard.list.arena.get(existing_id).range;
                        guard.list.arena.get_mut(existing_id).range =
                            ByteRange::new(existing_range.start, range.start - 1);
                        ensure_linked(&mut guard.list, &template, &mut request_id);
                        guard.list.wake(existing_id, self.parker.as_ref());
                        idx = found_idx + 1;
                        continue;
                    }
                    OverlapCase::ExistingEndsAfter => {
                        let existing_range = guard.list.arena.get(existing_id).range;
                        guard.list.arena.get_mut(existing_id).range =
                            ByteRange::new(range.end + 1, existing_range.end);
                        ensure_linked(&mut guard.list, &template, &mut request_id);
                        guard.list.wake(existing_id, self.parker.as_ref());
                        return Ok(());
                    }
                    OverlapCase::Disjoint => {
                        unreachable!("find_overlap_from never returns Disjoint")
                    }
                },
            }
        }
    }

    /// spec.md §4.5. Public entry point.
    pub fn clear_lock(&self, holder: HolderId, range: ByteRange) {
        let mut guard = self.inner.lock().unwrap();
        self.clear_lock_locked(&mut guard, holder, range);
    }

    fn clear_lock_locked(&self, guard: &mut std::sync::MutexGuard<'_, Inner>, holder: HolderId, range: ByteRange) {
        use crate::range::OverlapCase;

        let mut idx = 0;
        loop {
            match guard
                .list
                .find_overlap_from(idx, holder, range, Filter::SelfOnly, None)
            {
                None => return,
                Some((found_idx, existing_id, case)) => {
                    guard.list.wake(existing_id, self.parker.as_ref());
                    match case {
                        OverlapCase::Equal => {
                            guard.list.remove_held(existing_id);
                            guard.list.arena.remove(existing_id);
                            return;
                        }
                        OverlapCase::ExistingContainsRequest => {
                            if let Some(high) = guard.list.split(existing_id, range) {
                                guard.list.insert_sorted(high);
                            }
                            return;
                        }
                        OverlapCase::RequestContainsExisting => {
                            guard.list.remove_held(existing_id);
                            guard.list.arena.remove(existing_id);
                            idx = found_idx;
                            continue;
                        }
                        OverlapCase::ExistingStartsBefore => {
                            let r = guard.list.arena.get(existing_id).range;
                            guard.list.arena.get_mut(existing_id).range =
                                ByteRange::new(r.start, range.start - 1);
                            idx = found_idx + 1;
                            continue;
                        }
                        OverlapCase::ExistingEndsAfter => {
                            let r = guard.list.arena.get(existing_id).range;
                            guard.list.arena.get_mut(existing_id).range =
                                ByteRange::new(range.end + 1, r.end);
                            return;
                        }
                        OverlapCase::Disjoint => {
                            unreachable!("find_overlap_from never returns Disjoint")
                        }
                    }
                }
            }
        }
    }

    /// Snapshot of every held lock on this node, in list order. A diagnostic
    /// primitive analogous to `/proc/locks`; never consulted by any
    /// operation above, per spec.md §7's debug-printing-is-ambient-only
    /// stance.
    pub fn held_locks(&self) -> Vec<(HolderId, LockType, ByteRange)> {
        let guard = self.inner.lock().unwrap();
        guard
            .list
            .held()
            .iter()
            .map(|&id| {
                let rec = guard.list.arena.get(id);
                (rec.holder, rec.type_, rec.range)
            })
            .collect()
    }
}

/// spec.md §4.1/§4.2: first OTHERS entry this `(type_, range)` conflicts
/// with. Shared by `set_lock`'s step 1 and the public `get_block`/`get_lock`.
fn find_blocker(
    list: &LockList,
    holder: HolderId,
    type_: LockType,
    range: ByteRange,
) -> Option<crate::arena::LockId> {
    let mut idx = 0;
    while let Some((found_idx, id, _case)) =
        list.find_overlap_from(idx, holder, range, Filter::Others, None)
    {
        if type_.conflicts_with(list.arena.get(id).type_) {
            return Some(id);
        }
        idx = found_idx + 1;
    }
    None
}

/// Insert `template` into the held list the first time it is needed,
/// recording its id in `request_id`. A no-op on later calls within the same
/// grant loop — mirrors the original's `need_to_link` flag.
fn ensure_linked(
    list: &mut LockList,
    template: &LockRecord,
    request_id: &mut Option<crate::arena::LockId>,
) {
    if request_id.is_some() {
        return;
    }
    let id = list.arena.insert(template.clone());
    list.insert_sorted(id);
    *request_id = Some(id);
}
