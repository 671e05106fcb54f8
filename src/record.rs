// SPDX-License-Identifier: MPL-2.0
//! The lock record: the sole entity the core operates on (spec.md §3).

use std::collections::VecDeque;

use crate::arena::LockId;
use crate::range::ByteRange;

/// Opaque identity of the file node a lock belongs to. The core never
/// dereferences this; it is carried only so records and diagnostic dumps can
/// report which node they belong to — the node object itself is an external
/// collaborator (spec.md §1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u64);

/// Identity of the lock owner. POSIX locks are owned by a process; FLOCK
/// locks are owned by an open file description. The two never compare equal
/// to each other even if the numeric id coincides, since they are distinct
/// id spaces in the originating kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HolderId {
    Posix(u64),
    Flock(u64),
}

impl HolderId {
    pub fn is_posix(&self) -> bool {
        matches!(self, HolderId::Posix(_))
    }

    /// POSIX process id, for reporting in a blocker descriptor. FLOCK
    /// holders report "unknown" (-1) per spec.md §4.6.
    pub fn pid(&self) -> Option<u64> {
        match self {
            HolderId::Posix(pid) => Some(*pid),
            HolderId::Flock(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockType {
    Shared,
    Exclusive,
    /// Only ever used transiently as the argument to `clear_lock`.
    Unlock,
}

impl LockType {
    pub fn conflicts_with(&self, other: LockType) -> bool {
        matches!(
            (self, other),
            (LockType::Exclusive, _) | (_, LockType::Exclusive)
        )
    }
}

/// Whether a lock is a POSIX byte-range lock (process-owned, participates in
/// deadlock detection) or a FLOCK whole-file-style lock (file-description
/// owned, exempt from deadlock detection). Mutually exclusive by
/// construction, per spec.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStyle {
    Posix,
    Flock,
}

#[derive(Debug, Clone, Copy)]
pub struct LockFlags {
    pub style: LockStyle,
    /// Block the caller (on an interruptible sleep) if contended, rather
    /// than returning EAGAIN immediately.
    pub wait: bool,
}

impl LockFlags {
    pub fn posix(wait: bool) -> Self {
        Self {
            style: LockStyle::Posix,
            wait,
        }
    }

    pub fn flock(wait: bool) -> Self {
        Self {
            style: LockStyle::Flock,
            wait,
        }
    }
}

/// A single byte-range lock: either held on a node's list, or enqueued on
/// some other record's `blocked_queue` while the caller sleeps. Per
/// invariant I4, never both at once.
#[derive(Debug, Clone)]
pub struct LockRecord {
    pub type_: LockType,
    pub flags: LockFlags,
    pub range: ByteRange,
    pub holder: HolderId,
    pub node: NodeId,
    /// While suspended, the lock currently blocking this request (invariant
    /// I6). `None` once granted or once woken.
    pub next: Option<LockId>,
    /// FIFO of requests suspended waiting on this record.
    pub blocked_queue: VecDeque<LockId>,
}

impl LockRecord {
    pub fn new(
        type_: LockType,
        flags: LockFlags,
        range: ByteRange,
        holder: HolderId,
        node: NodeId,
    ) -> Self {
        Self {
            type_,
            flags,
            range,
            holder,
            node,
            next: None,
            blocked_queue: VecDeque::new(),
        }
    }

    pub fn same_holder(&self, other: &LockRecord) -> bool {
        self.holder == other.holder
    }
}
