use std::cell::Cell;

/// Strong and weak reference counts of one control block.
///
/// Plain cells, no atomics: every handle touching a block lives on the
/// thread that created it.
#[derive(Debug)]
pub(crate) struct Counts
{
    strong: Cell<usize>,
    weak: Cell<usize>,
}

impl Counts
{
    /// Counts of a block owned by exactly one shared handle.
    pub(crate) const fn owned() -> Self
    {
        Self {
            strong: Cell::new(1),
            weak: Cell::new(0),
        }
    }

    pub(crate) fn strong(&self) -> usize { self.strong.get() }

    pub(crate) fn weak(&self) -> usize { self.weak.get() }

    pub(crate) fn inc_strong(&self)
    {
        let strong = self.strong.get();
        // strong references are never revived once the payload is gone
        if strong == 0 {
            panic!("strong increment on a released control block");
        }
        if strong == usize::MAX {
            panic!("strong count overflow");
        }
        self.strong.set(strong + 1);
    }

    pub(crate) fn dec_strong(&self) -> usize
    {
        let strong = self.strong.get() - 1;
        self.strong.set(strong);
        strong
    }

    pub(crate) fn inc_weak(&self)
    {
        let weak = self.weak.get();
        if weak == usize::MAX {
            panic!("weak count overflow");
        }
        self.weak.set(weak + 1);
    }

    pub(crate) fn dec_weak(&self) -> usize
    {
        let weak = self.weak.get() - 1;
        self.weak.set(weak);
        weak
    }
}
