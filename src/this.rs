//! Objects that can produce shared handles to themselves.
//!
//! A type opts in by embedding a [`WeakSelf`] and implementing
//! [`SharedFromThis`]. The self-aware factories
//! ([`make_shared_self_aware`](crate::make_shared_self_aware),
//! [`SharedHandle::from_box_self_aware`]) wire the slot to the owning block
//! before handing out the first handle; the plain factories leave it alone.
//!
//! ```
//! use sharedref::{make_shared_self_aware, SharedFromThis, WeakSelf};
//!
//! struct Node
//! {
//!     this: WeakSelf<Node>,
//!     label: &'static str,
//! }
//!
//! impl SharedFromThis for Node
//! {
//!     fn weak_self(&self) -> &WeakSelf<Self> { &self.this }
//! }
//!
//! let node = make_shared_self_aware(Node { this: WeakSelf::new(), label: "root" });
//! let again = node.shared_from_this();
//! assert_eq!(again.label, "root");
//! assert_eq!(node.use_count(), 2);
//! ```

use std::{cell::RefCell, fmt};

use crate::{
    error::{Error, Result},
    shared::SharedHandle,
    weak::WeakHandle,
};

/// The weak reference slot a self-aware object carries.
///
/// Holds one weak reference to the owning block once wired. Dropping the
/// object drops the slot, which gives that reference back.
pub struct WeakSelf<T: ?Sized>
{
    weak: RefCell<WeakHandle<T>>,
}

impl<T: ?Sized> WeakSelf<T>
{
    pub const fn new() -> Self
    {
        Self {
            weak: RefCell::new(WeakHandle::new()),
        }
    }

    pub(crate) fn wire(&self, owner: &SharedHandle<T>) { *self.weak.borrow_mut() = owner.downgrade(); }

    pub fn is_wired(&self) -> bool { !self.weak.borrow().expired() }

    fn upgrade(&self) -> Option<SharedHandle<T>> { self.weak.borrow().upgrade() }

    fn downgrade(&self) -> WeakHandle<T> { self.weak.borrow().clone() }
}

impl<T: ?Sized> Default for WeakSelf<T>
{
    fn default() -> Self { Self::new() }
}

/// A copied object belongs to no block yet, so the slot starts out unwired.
impl<T: ?Sized> Clone for WeakSelf<T>
{
    fn clone(&self) -> Self { Self::new() }
}

impl<T: ?Sized> fmt::Debug for WeakSelf<T>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_tuple("WeakSelf").field(&*self.weak.borrow()).finish()
    }
}

pub trait SharedFromThis
{
    fn weak_self(&self) -> &WeakSelf<Self>;

    /// A new shared handle to `self`.
    ///
    /// Empty if `self` was not created through a self-aware factory, or if
    /// its last owner is already gone (i.e. called from its destructor).
    fn shared_from_this(&self) -> SharedHandle<Self> { self.weak_self().upgrade().unwrap_or_default() }

    /// Fails with [`Error::NoOwningObject`] where
    /// [`SharedFromThis::shared_from_this`] would be empty.
    fn try_shared_from_this(&self) -> Result<SharedHandle<Self>>
    {
        self.weak_self().upgrade().ok_or(Error::NoOwningObject)
    }

    fn weak_from_this(&self) -> WeakHandle<Self> { self.weak_self().downgrade() }
}

#[cfg(test)]
mod tests
{
    use std::cell::Cell;

    use super::*;
    use crate::{local_ledger::thread_local_stats, make_shared, make_shared_self_aware};

    struct Widget
    {
        this: WeakSelf<Widget>,
        value: i32,
        drops: &'static Cell<i32>,
    }

    impl Widget
    {
        fn new(value: i32, drops: &'static Cell<i32>) -> Self
        {
            Self {
                this: WeakSelf::new(),
                value,
                drops,
            }
        }
    }

    impl SharedFromThis for Widget
    {
        fn weak_self(&self) -> &WeakSelf<Self> { &self.this }
    }

    impl Drop for Widget
    {
        fn drop(&mut self)
        {
            assert!(self.shared_from_this().is_empty());
            self.drops.set(self.drops.get() + 1);
        }
    }

    fn counter() -> &'static Cell<i32> { Box::leak(Box::new(Cell::new(0))) }

    #[test]
    fn round_trip()
    {
        let drops = counter();
        let w = make_shared_self_aware(Widget::new(3, drops));
        assert_eq!(w.weak_count(), 1);
        assert!(w.weak_self().is_wired());

        let again = w.shared_from_this();
        assert_eq!(again.as_ptr(), w.as_ptr());
        assert_eq!(w.use_count(), 2);

        let weak = w.weak_from_this();
        assert_eq!(weak.lock().as_ptr(), w.as_ptr());
        assert_eq!(again.value, 3);
    }

    #[test]
    fn slot_released_with_object()
    {
        let before = thread_local_stats();
        let drops = counter();
        let w = make_shared_self_aware(Widget::new(1, drops));
        let observer = w.weak_from_this();
        assert_eq!(w.weak_count(), 2);

        drop(w);
        assert_eq!(drops.get(), 1);
        assert!(observer.expired());
        assert!(observer.lock().is_empty());
        assert_eq!(observer.weak_count(), 1);
        assert_eq!(thread_local_stats().freed_blocks, before.freed_blocks);

        drop(observer);
        assert_eq!(thread_local_stats().freed_blocks - before.freed_blocks, 1);
    }

    #[test]
    fn slot_alone_frees_block()
    {
        let before = thread_local_stats();
        let drops = counter();
        drop(make_shared_self_aware(Widget::new(1, drops)));
        let after = thread_local_stats();
        assert_eq!(drops.get(), 1);
        assert_eq!(after.freed_blocks - before.freed_blocks, 1);
        assert_eq!(after.live_blocks(), before.live_blocks());
    }

    #[test]
    fn unwired_object_yields_nothing()
    {
        let drops = counter();
        let plain = make_shared(Widget::new(5, drops));
        assert!(!plain.weak_self().is_wired());
        assert!(plain.shared_from_this().is_empty());
        assert!(plain.weak_from_this().expired());
        assert_eq!(plain.try_shared_from_this().unwrap_err(), Error::NoOwningObject);

        let loose = Widget::new(6, drops);
        assert!(loose.shared_from_this().is_empty());
    }

    #[test]
    fn boxed_adoption_wires_slot()
    {
        let drops = counter();
        let w = SharedHandle::from_box_self_aware(Box::new(Widget::new(9, drops)));
        assert_eq!(w.weak_count(), 1);
        assert!(w.try_shared_from_this().unwrap().ptr_eq(&w));
        drop(w);
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn clone_of_slot_is_unwired()
    {
        let w = make_shared_self_aware(Widget::new(2, counter()));
        let copy = w.weak_self().clone();
        assert!(w.weak_self().is_wired());
        assert!(!copy.is_wired());
    }
}
