/// Control block bookkeeping, for diagnosing leaks and the like.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats
{
    /// Blocks allocated with the managed object stored inline.
    pub embedded_blocks: usize,

    /// Blocks allocated for an adopted, separately boxed object.
    pub separate_blocks: usize,

    /// Managed objects dropped at the last strong release.
    pub released_payloads: usize,

    /// Embedded blocks given back because the object failed to construct.
    pub aborted_constructions: usize,

    /// Blocks freed.
    pub freed_blocks: usize,
}

impl Stats
{
    pub fn allocated_blocks(&self) -> usize { self.embedded_blocks + self.separate_blocks }

    /// Blocks still held by at least one shared or weak handle.
    pub fn live_blocks(&self) -> usize { self.allocated_blocks().saturating_sub(self.freed_blocks) }

    /// Managed objects that have not been dropped yet.
    pub fn live_payloads(&self) -> usize
    {
        self.allocated_blocks()
            .saturating_sub(self.aborted_constructions)
            .saturating_sub(self.released_payloads)
    }

    #[cfg(feature = "global")]
    pub(crate) fn absorb(&mut self, other: &Stats)
    {
        self.embedded_blocks += other.embedded_blocks;
        self.separate_blocks += other.separate_blocks;
        self.released_payloads += other.released_payloads;
        self.aborted_constructions += other.aborted_constructions;
        self.freed_blocks += other.freed_blocks;
    }
}
