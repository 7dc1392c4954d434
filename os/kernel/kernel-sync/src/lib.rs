//! # Boot-time synchronization primitives
//!
//! [`SyncOnceCell`] backs the process-wide singletons that are written once
//! during memory bootstrap and only read afterwards (shared zero page, gate
//! region, descriptor map). [`SpinLock`] is the address-space write lock held
//! while regions are inserted.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod spin_lock;
mod sync_once_cell;

pub use spin_lock::{SpinLock, SpinLockGuard};
pub use sync_once_cell::SyncOnceCell;
