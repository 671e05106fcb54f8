// SPDX-License-Identifier: MPL-2.0
//! The public flock-shaped descriptor exchanged with the outer filesystem
//! (spec.md §6), and its translation to/from the core's internal
//! `(LockType, ByteRange)` representation.
//!
//! Grounded on the occlum `FileRange::from_c_flock_and_file`/`c_flock`
//! conversion: this core only needs the `SEEK_SET`-relative half of that
//! translation, since resolving `SEEK_CUR`/`SEEK_END` against a live file
//! position is the outer filesystem's job (spec.md §1 lists whole-file
//! translation as an external collaborator's concern).

use crate::error::{Errno, Result};
use crate::range::ByteRange;
use crate::record::LockType;
use crate::{return_errno_with_message};

/// Wire-shaped lock descriptor: what callers hand to `set_lock`/`clear_lock`
/// and what `get_lock` hands back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlockArg {
    pub type_: LockType,
    /// Offset from the start of the file (`whence` is always `SEEK_SET` at
    /// this layer; resolving other `whence` values against the live file
    /// position happens above the core, per spec.md §1).
    pub start: u64,
    /// `0` means "to end of file".
    pub length: u64,
    /// Present for POSIX holders; `None` for FLOCK holders or on a report
    /// where no blocker was found.
    pub pid: Option<u64>,
}

impl FlockArg {
    pub fn new(type_: LockType, start: u64, length: u64, pid: Option<u64>) -> Self {
        Self {
            type_,
            start,
            length,
            pid,
        }
    }

    /// Translate to the internal range, per spec.md §6 ("length=0 on input
    /// is translated by the caller into end = infinity").
    pub fn to_range(self) -> Result<ByteRange> {
        if self.length > 0 && self.start.checked_add(self.length - 1).is_none() {
            return_errno_with_message!(Errno::EOVERFLOW, "start + length overflows");
        }
        Ok(ByteRange::from_start_len(self.start, self.length))
    }

    /// Build the outbound descriptor a blocker is reported as ("on output, a
    /// blocker extending to EOF is reported as length=0").
    pub fn from_blocker(type_: LockType, range: ByteRange, pid: Option<u64>) -> Self {
        Self {
            type_,
            start: range.start,
            length: range.len_field(),
            pid,
        }
    }
}
