use std::{
    convert::Infallible,
    fmt,
    hash::{Hash, Hasher},
    marker::PhantomData,
    mem,
    ops::Deref,
    ptr::{self, NonNull},
};

use log::debug;

use crate::{
    block::{BlockRef, EmbeddedBlock, SeparateBlock},
    error::{Error, Result},
    this::SharedFromThis,
    weak::WeakHandle,
};

/// Owning handle to a reference-counted object.
///
/// A handle is a pair of a control block and a cached object pointer. The two
/// usually agree, but an aliasing handle (see [`SharedHandle::project`]) keeps
/// the block of its origin alive while pointing at something else, typically
/// a field of the managed object or the same object seen as a trait object.
///
/// Handles compare and hash by control block, not by object pointer.
///
/// Counting is not atomic; handles are neither `Send` nor `Sync`.
pub struct SharedHandle<T: ?Sized>
{
    block: Option<BlockRef>,
    ptr: Option<NonNull<T>>,
    _phantom: PhantomData<T>,
}

/// Allocates `value` inline in a fresh control block: one allocation for both.
pub fn make_shared<T>(value: T) -> SharedHandle<T> { make_shared_with(|| value) }

/// Like [`make_shared`], but constructs the object after the block is
/// allocated.
pub fn make_shared_with<T, F>(init: F) -> SharedHandle<T>
where
    F: FnOnce() -> T,
{
    match try_make_shared_with(|| Ok::<T, Infallible>(init())) {
        Ok(res) => res,
        Err(never) => match never {},
    }
}

/// Constructs the object straight into a fresh control block.
///
/// If `init` fails or panics the block is given back without ever dropping
/// its storage, and the error is passed through unchanged.
pub fn try_make_shared_with<T, E, F>(init: F) -> Result<SharedHandle<T>, E>
where
    F: FnOnce() -> Result<T, E>,
{
    struct Unconstructed<T>(NonNull<EmbeddedBlock<T>>);

    impl<T> Drop for Unconstructed<T>
    {
        fn drop(&mut self) { unsafe { EmbeddedBlock::abort(self.0) } }
    }

    let block = EmbeddedBlock::<T>::allocate_uninit();
    let guard = Unconstructed(block);
    let value = init()?;
    mem::forget(guard);

    unsafe {
        let ptr = EmbeddedBlock::init(block, value);
        Ok(SharedHandle::from_parts(BlockRef::embedded(block), ptr))
    }
}

/// [`make_shared`] for objects that can hand out handles to themselves.
pub fn make_shared_self_aware<T: SharedFromThis>(value: T) -> SharedHandle<T>
{
    let res = make_shared(value);
    res.wire_self();
    res
}

impl<T: ?Sized> SharedHandle<T>
{
    /// A handle owning nothing.
    pub const fn empty() -> Self
    {
        Self {
            block: None,
            ptr: None,
            _phantom: PhantomData,
        }
    }

    /// Takes over a strong reference already counted in `block`.
    pub(crate) unsafe fn from_parts(block: BlockRef, ptr: NonNull<T>) -> Self
    {
        Self {
            block: Some(block),
            ptr: Some(ptr),
            _phantom: PhantomData,
        }
    }

    /// Adopts a boxed object, allocating a separate control block for it.
    pub fn from_box(it: Box<T>) -> Self { unsafe { Self::from_raw(Box::into_raw(it)) } }

    /// Adopts a raw object pointer. A null pointer gives an empty handle.
    ///
    /// # Safety
    /// `ptr` must come from `Box::into_raw` and must not be owned by anything
    /// else, in particular not by another handle family. Adopting the same
    /// pointer twice frees it twice.
    pub unsafe fn from_raw(ptr: *mut T) -> Self
    {
        match NonNull::new(ptr) {
            None => Self::empty(),
            Some(object) => Self::from_parts(BlockRef::separate(SeparateBlock::adopt(object)), object),
        }
    }

    /// A handle sharing `other`'s control block but pointing at `ptr`.
    ///
    /// # Safety
    /// `other` must not be empty, and `ptr` must stay valid for as long as
    /// `other`'s control block keeps its object alive.
    pub unsafe fn aliasing<Y: ?Sized>(other: &SharedHandle<Y>, ptr: NonNull<T>) -> Self
    {
        debug_assert!(other.block.is_some(), "aliasing an empty SharedHandle");
        if let Some(block) = other.block {
            block.inc_strong();
        }
        Self {
            block: other.block,
            ptr: Some(ptr),
            _phantom: PhantomData,
        }
    }

    /// Safe aliasing: a handle to something reachable from the managed
    /// object, sharing its lifetime.
    ///
    /// Also how a handle to a concrete type becomes a handle to a trait
    /// object: `handle.project::<dyn Trait, _>(|it| it)`.
    ///
    /// Projecting an empty handle gives an empty handle.
    pub fn project<U: ?Sized, F>(&self, f: F) -> SharedHandle<U>
    where
        F: FnOnce(&T) -> &U,
    {
        match self.get() {
            None => SharedHandle::empty(),
            Some(it) => {
                let ptr = NonNull::from(f(it));
                unsafe { SharedHandle::aliasing(self, ptr) }
            }
        }
    }

    /// Moves the contents out, leaving `self` empty.
    pub fn take(&mut self) -> Self { mem::replace(self, Self::empty()) }

    /// Releases this handle's reference; `self` is empty afterwards.
    pub fn reset(&mut self) { drop(self.take()) }

    /// Releases this handle's reference, then adopts `it`.
    pub fn reset_with(&mut self, it: Box<T>)
    {
        self.reset();
        *self = Self::from_box(it);
    }

    pub fn swap(&mut self, other: &mut Self) { mem::swap(self, other) }

    pub fn get(&self) -> Option<&T> { self.ptr.map(|p| unsafe { &*p.as_ptr() }) }

    /// Number of shared handles attached to this control block, 0 if empty.
    pub fn use_count(&self) -> usize { self.block.map_or(0, BlockRef::strong) }

    /// Number of weak references to this control block, including the slot of
    /// a self-aware object.
    pub fn weak_count(&self) -> usize { self.block.map_or(0, BlockRef::weak) }

    /// True when the handle holds an object whose block still counts it.
    pub fn is_live(&self) -> bool { self.ptr.is_some() && self.use_count() != 0 }

    pub fn is_empty(&self) -> bool { self.block.is_none() }

    pub fn downgrade(&self) -> WeakHandle<T> { WeakHandle::from(self) }

    /// Whether both handles share a control block.
    pub fn ptr_eq<U: ?Sized>(&self, other: &SharedHandle<U>) -> bool { self.block == other.block }

    pub(crate) fn block(&self) -> Option<BlockRef> { self.block }

    pub(crate) fn ptr(&self) -> Option<NonNull<T>> { self.ptr }
}

impl<T> SharedHandle<T>
{
    /// Same as [`make_shared`].
    pub fn new(value: T) -> Self { make_shared(value) }

    /// The cached object pointer, null when empty.
    pub fn as_ptr(&self) -> *const T { self.ptr.map_or(ptr::null(), |p| p.as_ptr() as *const T) }

    /// Same as [`make_shared_self_aware`].
    pub fn new_self_aware(value: T) -> Self
    where
        T: SharedFromThis,
    {
        make_shared_self_aware(value)
    }
}

impl<T: ?Sized + SharedFromThis> SharedHandle<T>
{
    /// [`SharedHandle::from_box`] for objects that can hand out handles to
    /// themselves.
    pub fn from_box_self_aware(it: Box<T>) -> Self
    {
        let res = Self::from_box(it);
        res.wire_self();
        res
    }

    fn wire_self(&self)
    {
        if let Some(it) = self.get() {
            it.weak_self().wire(self);
        }
    }
}

impl<T: ?Sized> Clone for SharedHandle<T>
{
    fn clone(&self) -> Self
    {
        if let Some(block) = self.block {
            block.inc_strong();
        }
        Self {
            block: self.block,
            ptr: self.ptr,
            _phantom: PhantomData,
        }
    }
}

impl<T: ?Sized> Drop for SharedHandle<T>
{
    fn drop(&mut self)
    {
        if let Some(block) = self.block.take() {
            unsafe { block.drop_strong() }
        }
    }
}

impl<T: ?Sized> Deref for SharedHandle<T>
{
    type Target = T;

    fn deref(&self) -> &Self::Target
    {
        match self.get() {
            Some(it) => it,
            None => panic!("dereferenced an empty SharedHandle"),
        }
    }
}

impl<T: ?Sized> Default for SharedHandle<T>
{
    fn default() -> Self { Self::empty() }
}

impl<T: ?Sized> From<Box<T>> for SharedHandle<T>
{
    fn from(it: Box<T>) -> Self { Self::from_box(it) }
}

/// Promotion; fails on an empty or expired weak handle.
impl<T: ?Sized> TryFrom<&WeakHandle<T>> for SharedHandle<T>
{
    type Error = Error;

    fn try_from(weak: &WeakHandle<T>) -> Result<Self>
    {
        weak.upgrade().ok_or_else(|| {
            debug!("promotion of dead weak handle {:?}", weak);
            Error::DeadReference
        })
    }
}

impl<T: ?Sized, U: ?Sized> PartialEq<SharedHandle<U>> for SharedHandle<T>
{
    fn eq(&self, other: &SharedHandle<U>) -> bool { self.ptr_eq(other) }
}

impl<T: ?Sized> Eq for SharedHandle<T> {}

impl<T: ?Sized> Hash for SharedHandle<T>
{
    fn hash<H: Hasher>(&self, state: &mut H) { self.block.hash(state) }
}

impl<T: ?Sized> fmt::Debug for SharedHandle<T>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("SharedHandle")
            .field("block", &self.block)
            .field("ptr", &self.ptr)
            .finish()
    }
}

impl<T: ?Sized> fmt::Pointer for SharedHandle<T>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self.ptr {
            Some(p) => fmt::Pointer::fmt(&p, f),
            None => fmt::Pointer::fmt(&ptr::null::<u8>(), f),
        }
    }
}

#[cfg(test)]
mod tests
{
    use std::cell::Cell;

    use super::*;
    use crate::local_ledger::thread_local_stats;

    #[derive(Debug, PartialEq)]
    struct Pair
    {
        left: i32,
        right: String,
    }

    #[test]
    fn clone_and_drop_track_use_count()
    {
        let a = make_shared(5u8);
        assert_eq!(a.use_count(), 1);
        let b = a.clone();
        let c = b.clone();
        assert_eq!(a.use_count(), 3);
        drop(b);
        assert_eq!(c.use_count(), 2);
        assert_eq!(*c, 5);
    }

    #[test]
    fn take_leaves_empty()
    {
        let mut a = make_shared(1);
        let b = a.take();
        assert!(a.is_empty());
        assert!(!a.is_live());
        assert_eq!(a.use_count(), 0);
        assert!(a.as_ptr().is_null());
        assert_eq!(b.use_count(), 1);
    }

    #[test]
    fn reset_with_adopts_new_box()
    {
        let before = thread_local_stats();
        let mut a = make_shared(String::from("old"));
        a.reset_with(Box::new(String::from("new")));
        assert_eq!(&*a, "new");
        assert_eq!(a.use_count(), 1);
        drop(a);
        let after = thread_local_stats();
        assert_eq!(after.embedded_blocks - before.embedded_blocks, 1);
        assert_eq!(after.separate_blocks - before.separate_blocks, 1);
        assert_eq!(after.freed_blocks - before.freed_blocks, 2);
    }

    #[test]
    fn swap_exchanges_blocks()
    {
        let mut a = make_shared(1);
        let mut b = make_shared(2);
        let a2 = a.clone();
        a.swap(&mut b);
        assert_eq!(*a, 2);
        assert_eq!(*b, 1);
        assert_eq!(b, a2);
        assert_eq!(b.use_count(), 2);
    }

    #[test]
    fn project_field_keeps_block_alive()
    {
        let a = make_shared(Pair {
            left: 3,
            right: "three".into(),
        });
        let right: SharedHandle<String> = a.project(|p| &p.right);
        assert_eq!(a.use_count(), 2);
        assert_eq!(right, a);
        assert_eq!(right.as_ptr(), &a.right as *const String);
        drop(a);
        assert_eq!(right.use_count(), 1);
        assert_eq!(&*right, "three");
    }

    #[test]
    fn project_to_trait_object()
    {
        let a = make_shared(42u32);
        let shown = a.project::<dyn fmt::Display, _>(|it| it);
        assert_eq!(shown.to_string(), "42");
        assert!(shown.ptr_eq(&a));
    }

    #[test]
    fn adopt_trait_object_box()
    {
        let drops = std::rc::Rc::new(Cell::new(0));
        struct Noisy(std::rc::Rc<Cell<i32>>);
        impl Drop for Noisy
        {
            fn drop(&mut self) { self.0.set(self.0.get() + 1) }
        }
        impl fmt::Debug for Noisy
        {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str("Noisy") }
        }

        let boxed: Box<dyn fmt::Debug> = Box::new(Noisy(drops.clone()));
        let a = SharedHandle::from_box(boxed);
        let b = a.clone();
        assert_eq!(format!("{:?}", &*b), "Noisy");
        drop(a);
        assert_eq!(drops.get(), 0);
        drop(b);
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn raw_null_is_empty()
    {
        let a = unsafe { SharedHandle::<i32>::from_raw(ptr::null_mut()) };
        assert!(a.is_empty());
        assert_eq!(a, SharedHandle::<u8>::empty());
    }

    #[test]
    fn failed_construction_is_invisible()
    {
        let before = thread_local_stats();
        let res: Result<SharedHandle<Pair>, &str> = try_make_shared_with(|| Err("nope"));
        assert_eq!(res.unwrap_err(), "nope");
        let after = thread_local_stats();
        assert_eq!(after.aborted_constructions - before.aborted_constructions, 1);
        assert_eq!(after.released_payloads, before.released_payloads);
        assert_eq!(after.live_blocks(), before.live_blocks());
    }

    #[test]
    fn panicking_construction_frees_block()
    {
        let before = thread_local_stats();
        let res = std::panic::catch_unwind(|| make_shared_with::<Pair, _>(|| panic!("ctor")));
        assert!(res.is_err());
        let after = thread_local_stats();
        assert_eq!(after.aborted_constructions - before.aborted_constructions, 1);
        assert_eq!(after.live_blocks(), before.live_blocks());
    }

    #[test]
    #[should_panic(expected = "empty SharedHandle")]
    fn deref_empty_panics()
    {
        let a = SharedHandle::<i32>::empty();
        let _value: i32 = *a;
    }

    #[test]
    fn equality_is_by_block()
    {
        let a = make_shared(7);
        let b = make_shared(7);
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
        assert_eq!(SharedHandle::<i32>::empty(), SharedHandle::<i32>::default());
    }
}
