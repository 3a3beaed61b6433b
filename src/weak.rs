use std::{fmt, mem, ptr::NonNull};

use crate::{block::BlockRef, shared::SharedHandle};

/// Non-owning observer of an object managed by [`SharedHandle`]s.
///
/// Keeps the control block allocated, never the object. Promotion through
/// [`WeakHandle::lock`] or [`WeakHandle::upgrade`] succeeds only while at
/// least one shared handle is attached.
pub struct WeakHandle<T: ?Sized>
{
    block: Option<BlockRef>,
    ptr: Option<NonNull<T>>,
}

impl<T: ?Sized> WeakHandle<T>
{
    /// A weak handle observing nothing; always expired.
    pub const fn new() -> Self
    {
        Self {
            block: None,
            ptr: None,
        }
    }

    /// True when there is no block, or its object has been released.
    pub fn expired(&self) -> bool { self.use_count() == 0 }

    /// A new shared handle to the observed object, or `None` once expired.
    ///
    /// The weak handle keeps its own reference either way.
    pub fn upgrade(&self) -> Option<SharedHandle<T>>
    {
        let block = self.block?;
        let ptr = self.ptr?;
        if block.try_inc_strong() {
            Some(unsafe { SharedHandle::from_parts(block, ptr) })
        } else {
            None
        }
    }

    /// Like [`WeakHandle::upgrade`], but an expired handle locks to an empty
    /// shared handle.
    pub fn lock(&self) -> SharedHandle<T> { self.upgrade().unwrap_or_default() }

    /// Strong count of the observed block. Diagnostics only: the answer may
    /// be stale by the time it is acted upon, lock instead.
    pub fn use_count(&self) -> usize { self.block.map_or(0, BlockRef::strong) }

    pub fn weak_count(&self) -> usize { self.block.map_or(0, BlockRef::weak) }

    pub fn take(&mut self) -> Self { mem::replace(self, Self::new()) }

    pub fn reset(&mut self) { drop(self.take()) }

    pub fn swap(&mut self, other: &mut Self) { mem::swap(self, other) }

    /// Whether both handles observe the same control block.
    pub fn ptr_eq<U: ?Sized>(&self, other: &WeakHandle<U>) -> bool { self.block == other.block }
}

impl<T: ?Sized> From<&SharedHandle<T>> for WeakHandle<T>
{
    fn from(shared: &SharedHandle<T>) -> Self
    {
        let block = shared.block();
        if let Some(block) = block {
            block.inc_weak();
        }
        Self {
            block,
            ptr: shared.ptr(),
        }
    }
}

impl<T: ?Sized> Clone for WeakHandle<T>
{
    fn clone(&self) -> Self
    {
        if let Some(block) = self.block {
            block.inc_weak();
        }
        Self {
            block: self.block,
            ptr: self.ptr,
        }
    }
}

impl<T: ?Sized> Drop for WeakHandle<T>
{
    fn drop(&mut self)
    {
        if let Some(block) = self.block.take() {
            unsafe { block.drop_weak() }
        }
    }
}

impl<T: ?Sized> Default for WeakHandle<T>
{
    fn default() -> Self { Self::new() }
}

impl<T: ?Sized> fmt::Debug for WeakHandle<T>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("WeakHandle")
            .field("block", &self.block)
            .field("ptr", &self.ptr)
            .finish()
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::{local_ledger::thread_local_stats, shared::make_shared};

    #[test]
    fn default_is_expired()
    {
        let w = WeakHandle::<i32>::default();
        assert!(w.expired());
        assert_eq!(w.use_count(), 0);
        assert!(w.upgrade().is_none());
        assert!(w.lock().is_empty());
    }

    #[test]
    fn lock_adds_exactly_one_strong()
    {
        let s = make_shared(String::from("x"));
        let w = s.downgrade();
        assert_eq!(s.weak_count(), 1);
        let before = s.use_count();
        let l = w.lock();
        assert_eq!(s.use_count(), before + 1);
        assert_eq!(s.weak_count(), 1);
        assert_eq!(l, s);
    }

    #[test]
    fn weak_keeps_block_not_object()
    {
        let before = thread_local_stats();
        let s = make_shared(vec![1, 2, 3]);
        let w = s.downgrade();
        let w2 = w.clone();
        assert_eq!(w.weak_count(), 2);
        drop(s);

        let mid = thread_local_stats();
        assert!(w.expired());
        assert!(w2.expired());
        assert_eq!(mid.released_payloads - before.released_payloads, 1);
        assert_eq!(mid.freed_blocks, before.freed_blocks);

        drop(w);
        assert_eq!(thread_local_stats().freed_blocks, before.freed_blocks);
        drop(w2);
        assert_eq!(thread_local_stats().freed_blocks - before.freed_blocks, 1);
    }

    #[test]
    fn reset_and_swap()
    {
        let a = make_shared(1);
        let b = make_shared(2);
        let mut wa = a.downgrade();
        let mut wb = b.downgrade();
        wa.swap(&mut wb);
        assert_eq!(*wa.lock(), 2);
        assert_eq!(*wb.lock(), 1);
        wa.reset();
        assert!(wa.expired());
        assert_eq!(b.weak_count(), 0);
        assert!(wb.ptr_eq(&a.downgrade()));
    }
}
