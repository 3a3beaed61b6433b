//! Intrusive reference counting: the count lives inside the object.
//!
//! An alternative to [`SharedHandle`](crate::SharedHandle), not a layer on
//! top of it. There is no control block, hence no weak observers and no
//! aliasing; in exchange a raw pointer to a counted object can be turned back
//! into a handle at any time.

use std::{cell::Cell, fmt, marker::PhantomData, mem, ops::Deref, ptr::{self, NonNull}};

/// A reference count embedded in an object.
pub trait Counter
{
    /// Adds a reference, returning the new count.
    fn inc_ref(&self) -> usize;

    /// Drops a reference, returning the new count. Stays at 0 once there.
    fn dec_ref(&self) -> usize;

    fn ref_count(&self) -> usize;
}

/// Plain single-threaded counter, starting at 0.
#[derive(Debug, Default)]
pub struct SimpleCounter
{
    count: Cell<usize>,
}

impl SimpleCounter
{
    pub const fn new() -> Self { Self { count: Cell::new(0) } }
}

impl Counter for SimpleCounter
{
    fn inc_ref(&self) -> usize
    {
        let count = self.count.get();
        if count == usize::MAX {
            panic!("intrusive count overflow");
        }
        self.count.set(count + 1);
        count + 1
    }

    fn dec_ref(&self) -> usize
    {
        let count = self.count.get().saturating_sub(1);
        self.count.set(count);
        count
    }

    fn ref_count(&self) -> usize { self.count.get() }
}

/// Copying a counted object does not copy its references.
impl Clone for SimpleCounter
{
    fn clone(&self) -> Self { Self::new() }
}

/// Objects carrying their own reference count.
///
/// # Safety
/// `counter` must return the same counter for the whole lifetime of the
/// object, and `destroy` must be able to free every object handed to
/// [`IntrusiveHandle`]. The provided `destroy` reclaims a `Box`, so with it
/// objects may only enter handles through `Box`.
pub unsafe trait RefCounted
{
    type Counter: Counter;

    fn counter(&self) -> &Self::Counter;

    /// Frees an object whose count dropped to 0.
    unsafe fn destroy(this: NonNull<Self>) { drop(Box::from_raw(this.as_ptr())) }
}

/// Handle to an object counting its own references.
pub struct IntrusiveHandle<T: RefCounted>
{
    object: Option<NonNull<T>>,
    _phantom: PhantomData<T>,
}

/// Boxes `value` and takes the first reference to it.
pub fn make_intrusive<T: RefCounted>(value: T) -> IntrusiveHandle<T> { IntrusiveHandle::new(value) }

impl<T: RefCounted> IntrusiveHandle<T>
{
    pub const fn empty() -> Self
    {
        Self {
            object: None,
            _phantom: PhantomData,
        }
    }

    pub fn new(value: T) -> Self { Self::from_box(Box::new(value)) }

    pub fn from_box(it: Box<T>) -> Self { unsafe { Self::from_raw(Box::into_raw(it)) } }

    /// Takes a new reference to `ptr`; null gives an empty handle.
    ///
    /// # Safety
    /// `ptr` must be null or point to a live object that `T::destroy` can
    /// free. It may already be referenced by other intrusive handles.
    pub unsafe fn from_raw(ptr: *mut T) -> Self
    {
        let object = NonNull::new(ptr);
        if let Some(object) = object {
            object.as_ref().counter().inc_ref();
        }
        Self {
            object,
            _phantom: PhantomData,
        }
    }

    pub fn take(&mut self) -> Self { mem::replace(self, Self::empty()) }

    pub fn reset(&mut self) { drop(self.take()) }

    /// Releases this handle's reference, then takes one to `it`.
    pub fn reset_with(&mut self, it: Box<T>)
    {
        self.reset();
        *self = Self::from_box(it);
    }

    pub fn swap(&mut self, other: &mut Self) { mem::swap(self, other) }

    pub fn get(&self) -> Option<&T> { self.object.map(|p| unsafe { &*p.as_ptr() }) }

    pub fn as_ptr(&self) -> *const T { self.object.map_or(ptr::null(), |p| p.as_ptr() as *const T) }

    pub fn use_count(&self) -> usize { self.get().map_or(0, |it| it.counter().ref_count()) }

    pub fn is_live(&self) -> bool { self.use_count() != 0 }

    pub fn ptr_eq(&self, other: &Self) -> bool { self.object == other.object }
}

impl<T: RefCounted> Clone for IntrusiveHandle<T>
{
    fn clone(&self) -> Self { unsafe { Self::from_raw(self.as_ptr() as *mut T) } }
}

impl<T: RefCounted> Drop for IntrusiveHandle<T>
{
    fn drop(&mut self)
    {
        if let Some(object) = self.object.take() {
            unsafe {
                if object.as_ref().counter().dec_ref() == 0 {
                    T::destroy(object);
                }
            }
        }
    }
}

impl<T: RefCounted> Deref for IntrusiveHandle<T>
{
    type Target = T;

    fn deref(&self) -> &Self::Target
    {
        match self.get() {
            Some(it) => it,
            None => panic!("dereferenced an empty IntrusiveHandle"),
        }
    }
}

impl<T: RefCounted> Default for IntrusiveHandle<T>
{
    fn default() -> Self { Self::empty() }
}

impl<T: RefCounted> PartialEq for IntrusiveHandle<T>
{
    fn eq(&self, other: &Self) -> bool { self.ptr_eq(other) }
}

impl<T: RefCounted> Eq for IntrusiveHandle<T> {}

impl<T: RefCounted> fmt::Debug for IntrusiveHandle<T>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("IntrusiveHandle")
            .field("object", &self.object)
            .field("count", &self.use_count())
            .finish()
    }
}
