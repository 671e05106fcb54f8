// SPDX-License-Identifier: MPL-2.0
//! Byte-range advisory lock core for a network-filesystem node.
//!
//! A from-scratch reimplementation of the classic BSD `lockf` algorithm
//! (historically applied to an SMB-shared file node), covering the four
//! operations a filesystem client needs: acquire ([`LockManager::set_lock`]),
//! release ([`LockManager::clear_lock`]), non-blocking test
//! ([`LockManager::get_lock`]), and the shared block-detection primitive
//! ([`LockManager::get_block`]).
//!
//! The core itself owns no thread, no process table, and no file object: it
//! consumes a [`park::Parker`] for suspension/wakeup and an opaque
//! [`record::HolderId`] for lock ownership, and everything else (the SMB
//! wire protocol, the surrounding file node, process identity) is the
//! caller's concern.
//!
//! ```
//! use std::sync::Arc;
//!
//! use rangelock::config::Config;
//! use rangelock::manager::LockManager;
//! use rangelock::park::StdParker;
//! use rangelock::range::ByteRange;
//! use rangelock::record::{HolderId, LockFlags, LockType, NodeId};
//!
//! let manager = LockManager::new(NodeId(1), Arc::new(StdParker::new()), Config::default());
//! let p1 = HolderId::Posix(1);
//! manager
//!     .set_lock(p1, LockType::Shared, LockFlags::posix(false), ByteRange::new(0, 99))
//!     .unwrap();
//! manager.clear_lock(p1, ByteRange::new(0, 99));
//! ```

pub mod arena;
pub mod config;
pub mod deadlock;
pub mod error;
pub mod flock;
pub mod list;
pub mod manager;
pub mod park;
pub mod range;
pub mod record;

pub use error::{Errno, Error, Result};
pub use flock::FlockArg;
pub use manager::{BlockerInfo, FlockReport, LockManager};
