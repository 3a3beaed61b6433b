//! Shared ownership handles over explicit control blocks.
//!
//! Every managed object is tracked by a control block holding a strong and a
//! weak count. [`SharedHandle`]s own the object: the last one to go drops it.
//! [`WeakHandle`]s only keep the block around, so they can tell whether the
//! object is still there and promote themselves to a new owner if it is.
//!
//! There are two ways to get a block:
//!
//! * [`make_shared`] and friends allocate block and object together, in one
//!   allocation;
//! * [`SharedHandle::from_box`] adopts an already boxed object (possibly a
//!   trait object) and allocates a block pointing at it.
//!
//! Objects that need handles to themselves embed a [`WeakSelf`] and implement
//! [`SharedFromThis`]; see [`this`].
//!
//! [`IntrusiveHandle`] is the other strategy: the count lives in the object
//! and there are no weak observers.
//!
//! Counting is plain, non-atomic arithmetic. None of the handle types are
//! `Send` or `Sync`. Cycles of shared handles are never collected.
//!
//! Allocation and release of control blocks is recorded in a per-thread
//! ledger, see [`thread_local_stats`]; with the `global` feature (on by
//! default) exited threads fold theirs into [`global_stats`].

pub(crate) mod block;
pub(crate) mod counter;
#[cfg(feature = "global")]
pub(crate) mod global_ledger;
pub(crate) mod local_ledger;

pub mod error;
pub mod intrusive;
pub mod shared;
pub mod stats;
pub mod this;
pub mod weak;


pub use error::{Error, Result};
#[cfg(feature = "global")]
pub use global_ledger::global_stats;
pub use intrusive::{make_intrusive, Counter, IntrusiveHandle, RefCounted, SimpleCounter};
pub use local_ledger::thread_local_stats;
pub use shared::{make_shared, make_shared_self_aware, make_shared_with, try_make_shared_with, SharedHandle};
pub use stats::Stats;
pub use this::{SharedFromThis, WeakSelf};
pub use weak::WeakHandle;
