use lazy_static::lazy_static;
use parking_lot::Mutex;

use crate::{local_ledger::thread_local_stats, stats::Stats};

lazy_static! {
    static ref GLOBAL_LEDGER: Mutex<Stats> = Mutex::new(Stats::default());
}

/// Called once per thread, when its local ledger is torn down.
pub(crate) fn fold(stats: &Stats) { GLOBAL_LEDGER.lock().absorb(stats) }

/// Ledger totals of every exited thread plus the calling thread.
pub fn global_stats() -> Stats
{
    let mut res = *GLOBAL_LEDGER.lock();
    res.absorb(&thread_local_stats());
    res
}
