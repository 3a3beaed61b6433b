//! Control blocks: the unit of lifetime tracking shared by every handle to
//! one managed object.
//!
//! Both block variants start with a `#[repr(C)]` [`ControlBlock`] header, so a
//! pointer to either variant is also a pointer to its header. The header
//! carries the counts plus two type-erased hooks, one dropping the payload and
//! one freeing the block, filled in by the variant that allocated it.

use std::{
    cell::Cell,
    fmt,
    mem::MaybeUninit,
    ptr::{self, NonNull},
};

use log::{debug, trace};

use crate::{counter::Counts, local_ledger};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockKind
{
    /// Object stored inline, one allocation for block and object.
    Embedded,
    /// Object boxed on its own, the block only points at it.
    Separate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PayloadState
{
    Uninit,
    Live,
    Releasing,
    Released,
}

#[repr(C)]
pub(crate) struct ControlBlock
{
    counts: Counts,
    state: Cell<PayloadState>,
    kind: BlockKind,
    release: unsafe fn(NonNull<ControlBlock>),
    deallocate: unsafe fn(NonNull<ControlBlock>),
}

impl ControlBlock
{
    fn new(
        kind: BlockKind,
        state: PayloadState,
        release: unsafe fn(NonNull<ControlBlock>),
        deallocate: unsafe fn(NonNull<ControlBlock>),
    ) -> Self
    {
        local_ledger::block_allocated(kind);
        Self {
            counts: Counts::owned(),
            state: Cell::new(state),
            kind,
            release,
            deallocate,
        }
    }
}

/// Block holding the managed object inline.
#[repr(C)]
pub(crate) struct EmbeddedBlock<T>
{
    header: ControlBlock,
    storage: MaybeUninit<T>,
}

impl<T> EmbeddedBlock<T>
{
    /// Allocates a block with room for a `T` that has not been constructed.
    pub(crate) fn allocate_uninit() -> NonNull<Self>
    {
        let block = Box::new(EmbeddedBlock {
            header: ControlBlock::new(
                BlockKind::Embedded,
                PayloadState::Uninit,
                Self::release,
                Self::deallocate,
            ),
            storage: MaybeUninit::<T>::uninit(),
        });
        let res = NonNull::from(Box::leak(block));
        trace!("allocated embedded block {:p}", res);
        res
    }

    /// Pointer into the inline storage; only valid to read once initialized.
    pub(crate) unsafe fn stored_ptr(this: NonNull<Self>) -> NonNull<T>
    {
        NonNull::new_unchecked(ptr::addr_of_mut!((*this.as_ptr()).storage).cast::<T>())
    }

    /// Moves `value` into the storage of an uninitialized block.
    pub(crate) unsafe fn init(this: NonNull<Self>, value: T) -> NonNull<T>
    {
        let slot = Self::stored_ptr(this);
        slot.as_ptr().write(value);
        (*ptr::addr_of!((*this.as_ptr()).header))
            .state
            .set(PayloadState::Live);
        slot
    }

    /// Gives back a block whose object never got constructed.
    pub(crate) unsafe fn abort(this: NonNull<Self>)
    {
        debug!("construction into embedded block {:p} failed", this);
        local_ledger::construction_aborted();
        BlockRef(this.cast()).deallocate();
    }

    unsafe fn release(block: NonNull<ControlBlock>)
    {
        ptr::drop_in_place(Self::stored_ptr(block.cast::<Self>()).as_ptr());
    }

    unsafe fn deallocate(block: NonNull<ControlBlock>)
    {
        drop(Box::from_raw(block.cast::<Self>().as_ptr()));
    }
}

/// Block pointing at a separately boxed object.
#[repr(C)]
pub(crate) struct SeparateBlock<T: ?Sized>
{
    header: ControlBlock,
    object: NonNull<T>,
}

impl<T: ?Sized> SeparateBlock<T>
{
    /// Takes ownership of `object`.
    ///
    /// # Safety
    /// `object` must come from `Box::into_raw` and must not be owned by
    /// anything else.
    pub(crate) unsafe fn adopt(object: NonNull<T>) -> NonNull<Self>
    {
        let block = Box::new(SeparateBlock {
            header: ControlBlock::new(
                BlockKind::Separate,
                PayloadState::Live,
                Self::release,
                Self::deallocate,
            ),
            object,
        });
        let res = NonNull::from(Box::leak(block));
        trace!("allocated separate block {:p} for {:p}", res, object);
        res
    }

    unsafe fn release(block: NonNull<ControlBlock>)
    {
        let object = ptr::addr_of!((*block.cast::<Self>().as_ptr()).object).read();
        drop(Box::from_raw(object.as_ptr()));
    }

    unsafe fn deallocate(block: NonNull<ControlBlock>)
    {
        drop(Box::from_raw(block.cast::<Self>().as_ptr()));
    }
}

/// Untyped pointer to a live control block.
///
/// Copying a `BlockRef` does not touch the counts; the handles that hold one
/// are responsible for pairing every increment with a `drop_strong` or
/// `drop_weak`.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct BlockRef(NonNull<ControlBlock>);

impl BlockRef
{
    pub(crate) fn embedded<T>(block: NonNull<EmbeddedBlock<T>>) -> Self { Self(block.cast()) }

    pub(crate) fn separate<T: ?Sized>(block: NonNull<SeparateBlock<T>>) -> Self
    {
        Self(block.cast())
    }

    fn header(&self) -> &ControlBlock { unsafe { self.0.as_ref() } }

    pub(crate) fn strong(self) -> usize { self.header().counts.strong() }

    pub(crate) fn weak(self) -> usize { self.header().counts.weak() }

    pub(crate) fn kind(self) -> BlockKind { self.header().kind }

    pub(crate) fn state(self) -> PayloadState { self.header().state.get() }

    pub(crate) fn inc_strong(self) { self.header().counts.inc_strong() }

    pub(crate) fn inc_weak(self) { self.header().counts.inc_weak() }

    /// Takes a strong reference unless the payload is already gone.
    pub(crate) fn try_inc_strong(self) -> bool
    {
        if self.strong() == 0 {
            false
        } else {
            self.inc_strong();
            true
        }
    }

    /// Drops the payload if it is live. Runs at most once per block.
    ///
    /// The block is pinned by a transient weak reference while the payload
    /// drops, so handles released from inside the payload's destructor never
    /// free the block underneath it.
    pub(crate) unsafe fn release_payload(self)
    {
        let header = self.header();
        if header.state.get() != PayloadState::Live {
            return;
        }
        header.state.set(PayloadState::Releasing);
        header.counts.inc_weak();
        (header.release)(self.0);
        header.state.set(PayloadState::Released);
        header.counts.dec_weak();
        local_ledger::payload_released();
        trace!("released payload of {:?} block {:p}", header.kind, self.0);
    }

    unsafe fn deallocate(self)
    {
        let kind = self.kind();
        let deallocate = self.header().deallocate;
        local_ledger::block_freed();
        trace!("freeing {:?} block {:p}", kind, self.0);
        deallocate(self.0);
    }

    /// Gives up one strong reference. The last one drops the payload, and
    /// frees the block too unless weak references remain.
    pub(crate) unsafe fn drop_strong(self)
    {
        if self.header().counts.dec_strong() != 0 {
            return;
        }
        self.release_payload();
        if self.weak() == 0 {
            self.deallocate();
        }
    }

    /// Gives up one weak reference, freeing the block if it was the last
    /// reference of any kind.
    pub(crate) unsafe fn drop_weak(self)
    {
        if self.header().counts.dec_weak() == 0 && self.strong() == 0 {
            self.deallocate();
        }
    }
}

impl fmt::Debug for BlockRef
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("BlockRef")
            .field("ptr", &self.0)
            .field("kind", &self.kind())
            .field("state", &self.state())
            .field("strong", &self.strong())
            .field("weak", &self.weak())
            .finish()
    }
}
