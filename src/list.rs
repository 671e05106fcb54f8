// SPDX-License-Identifier: MPL-2.0
//! Per-node held-lock list: `find_overlap`, `split`, and waiter `wake`.
//!
//! Held locks are kept in a single `Vec<LockId>` sorted by `start`
//! (invariant I3). Because every cross-reference is an arena handle rather
//! than a pointer, "splice before/after" from the original C algorithm
//! collapses to "insert at the position a sorted-by-start scan finds" — no
//! `prev_ref` double indirection is needed.

use crate::arena::{LockArena, LockId};
use crate::range::{classify, ByteRange, OverlapCase};
use crate::record::{HolderId, LockRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    /// Only consider entries owned by the same holder as the request.
    SelfOnly,
    /// Only consider entries owned by a different holder.
    Others,
}

pub struct LockList {
    pub arena: LockArena<LockRecord>,
    /// Held locks, sorted ascending by `range.start` (I3).
    held: Vec<LockId>,
}

impl LockList {
    pub fn new() -> Self {
        Self {
            arena: LockArena::new(),
            held: Vec::new(),
        }
    }

    pub fn held(&self) -> &[LockId] {
        &self.held
    }

    /// Insert `id` into the held list, keeping it sorted by `start`.
    pub fn insert_sorted(&mut self, id: LockId) {
        let start = self.arena.get(id).range.start;
        let pos = self
            .held
            .partition_point(|&existing| self.arena.get(existing).range.start <= start);
        self.held.insert(pos, id);
    }

    /// Remove `id` from the held list (the arena slot is untouched; the
    /// caller decides whether to free it).
    pub fn remove_held(&mut self, id: LockId) {
        if let Some(pos) = self.held.iter().position(|&x| x == id) {
            self.held.remove(pos);
        }
    }

    pub fn position_of(&self, id: LockId) -> Option<usize> {
        self.held.iter().position(|&x| x == id)
    }

    /// Scan the held list from `start_index`, returning the first entry
    /// matching `filter` whose range overlaps `range` (spec.md §4.2).
    ///
    /// `exclude`, when given, skips that one record regardless of filter —
    /// used by the grant loop once it has linked the request itself into the
    /// held list, so the request never gets compared against itself (it
    /// trivially "overlaps" its own range).
    ///
    /// For `Filter::SelfOnly`, scanning stops (returns `None`) as soon as an
    /// entry starts strictly after `range.end` — same-holder entries are
    /// pairwise disjoint (I1) and sorted by start, so nothing further can
    /// overlap. `Filter::Others` never stops early.
    pub fn find_overlap_from(
        &self,
        start_index: usize,
        holder: HolderId,
        range: ByteRange,
        filter: Filter,
        exclude: Option<LockId>,
    ) -> Option<(usize, LockId, OverlapCase)> {
        for idx in start_index..self.held.len() {
            let id = self.held[idx];
            if Some(id) == exclude {
                continue;
            }
            let rec = self.arena.get(id);
            let matches_filter = match filter {
                Filter::SelfOnly => rec.holder == holder,
                Filter::Others => rec.holder != holder,
            };
            if !matches_filter {
                continue;
            }
            let case = classify(rec.range, range);
            if case == OverlapCase::Disjoint {
                if filter == Filter::SelfOnly && rec.range.start > range.end {
                    return None;
                }
                continue;
            }
            return Some((idx, id, case));
        }
        None
    }

    pub fn find_overlap(
        &self,
        holder: HolderId,
        range: ByteRange,
        filter: Filter,
    ) -> Option<(usize, LockId, OverlapCase)> {
        self.find_overlap_from(0, holder, range, filter, None)
    }

    /// Carve `encompassing` (which strictly contains `subtract_range`) into
    /// the set-theoretic difference, per spec.md §4.3. Mutates `encompassing`
    /// in place and, for the three-piece case, allocates and returns the new
    /// high piece; callers decide whether/where to splice the low end
    /// (`subtract_range`'s own record, if it is being kept as a held lock)
    /// and the returned high piece into the held list.
    ///
    /// `encompassing`'s `blocked_queue` is never moved: it stays on the
    /// shrunk low piece, to be re-evaluated on the next release or wake.
    pub fn split(&mut self, encompassing: LockId, subtract_range: ByteRange) -> Option<LockId> {
        let enc = self.arena.get(encompassing).clone();
        debug_assert!(enc.range.start <= subtract_range.start);
        debug_assert!(enc.range.end >= subtract_range.end);

        if enc.range.start == subtract_range.start {
            self.arena.get_mut(encompassing).range =
                ByteRange::new(subtract_range.end + 1, enc.range.end);
            return None;
        }
        if enc.range.end == subtract_range.end {
            self.arena.get_mut(encompassing).range =
                ByteRange::new(enc.range.start, subtract_range.start - 1);
            return None;
        }

        let new_high = LockRecord::new(
            enc.type_,
            enc.flags,
            ByteRange::new(subtract_range.end + 1, enc.range.end),
            enc.holder,
            enc.node,
        );
        let new_id = self.arena.insert(new_high);
        self.arena.get_mut(encompassing).range =
            ByteRange::new(enc.range.start, subtract_range.start - 1);
        Some(new_id)
    }

    /// Diagnostic dump of the held list, in order: one line per entry. Stands
    /// in for the original's `smbfs_lprintlist`; gated by the caller's own
    /// `debug_level` check, never consulted for semantics.
    pub fn debug_dump(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();
        for &id in &self.held {
            let rec = self.arena.get(id);
            let end = if rec.range.is_eof() {
                "EOF".to_string()
            } else {
                rec.range.end.to_string()
            };
            let _ = writeln!(
                out,
                "{:?} {:?} [{}, {}] waiters={}",
                rec.holder,
                rec.type_,
                rec.range.start,
                end,
                rec.blocked_queue.len(),
            );
        }
        out
    }

    /// Drain `id`'s `blocked_queue`, clearing each waiter's `next` and
    /// signalling its wait channel via `parker`. Returns the waiters woken,
    /// for callers (tests, mostly) that want to confirm liveness (P8).
    pub fn wake(&mut self, id: LockId, parker: &dyn crate::park::Parker) -> Vec<LockId> {
        let waiters: Vec<LockId> = self.arena.get_mut(id).blocked_queue.drain(..).collect();
        for &waiter in &waiters {
            self.arena.get_mut(waiter).next = None;
            parker.unpark_all(waiter);
        }
        waiters
    }
}

impl Default for LockList {
    fn default() -> Self {
        Self::new()
    }
}
