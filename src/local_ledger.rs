use std::cell::Cell;

use log::{trace, warn};

use crate::{block::BlockKind, stats::Stats};

struct Ledger
{
    stats: Cell<Stats>,
}

impl Ledger
{
    fn record(&self, f: impl FnOnce(&mut Stats))
    {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }
}

impl Drop for Ledger
{
    fn drop(&mut self)
    {
        let stats = self.stats.get();
        if stats.live_blocks() != 0 {
            warn!(
                "thread exiting with {} control blocks still allocated ({} live objects)",
                stats.live_blocks(),
                stats.live_payloads()
            );
        }
        #[cfg(feature = "global")]
        crate::global_ledger::fold(&stats);
    }
}

thread_local! {
    static LEDGER : Ledger = Ledger { stats: Cell::new(Stats::default()) };
}

// Handles dropped from other thread-local destructors may outlive the ledger;
// their bookkeeping is lost.
fn record(f: impl FnOnce(&mut Stats)) { let _ = LEDGER.try_with(|l| l.record(f)); }

pub(crate) fn block_allocated(kind: BlockKind)
{
    record(|s| match kind {
        BlockKind::Embedded => s.embedded_blocks += 1,
        BlockKind::Separate => s.separate_blocks += 1,
    })
}

pub(crate) fn payload_released() { record(|s| s.released_payloads += 1) }

pub(crate) fn construction_aborted() { record(|s| s.aborted_constructions += 1) }

pub(crate) fn block_freed() { record(|s| s.freed_blocks += 1) }

/// Snapshot of the control block ledger of the calling thread.
pub fn thread_local_stats() -> Stats
{
    let stats = LEDGER.try_with(|l| l.stats.get()).unwrap_or_default();
    trace!("thread local stats: {:?}", stats);
    stats
}
