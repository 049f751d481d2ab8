//! Background sweeper balancing resident pages against a memory budget
//!
//! Once per interval the sweeper looks at the hit/miss counters of every
//! registered target, computes how much memory each one should gain or give
//! back, and allocates or frees pages accordingly. The budget can be changed
//! while the sweeper runs.

use super::{PageCacheStats, PagedFileWithRecords};
use crate::{Error, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Growth factor applied when misses went up since the previous interval
const MISS_FACTOR: f64 = 1.1;
/// Growth factor applied when hits went down since the previous interval
const HIT_FACTOR: f64 = 1.03;
/// Shrink ratio for a target that needs nothing
const IDLE_SHRINK: f64 = 1.5;
/// Shrink ratio for a target that still needs memory
const BUSY_SHRINK: f64 = 0.8;

/// Something the sweeper can grow and shrink
pub trait SweepTarget: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;
    /// Cumulative counters
    fn stats(&self) -> PageCacheStats;
    /// Bytes the target would need to be fully resident
    fn size_bytes(&self) -> u64;
    /// Age access counters
    fn decay(&self);
    /// Make up to `bytes` more memory resident, returning what was granted
    fn allocate(&self, bytes: u64) -> Result<u64>;
    /// Release at least `bytes` of resident memory, returning what was freed
    fn free(&self, bytes: u64) -> Result<u64>;
}

impl SweepTarget for PagedFileWithRecords {
    fn name(&self) -> &str {
        PagedFileWithRecords::name(self)
    }

    fn stats(&self) -> PageCacheStats {
        PagedFileWithRecords::stats(self)
    }

    fn size_bytes(&self) -> u64 {
        self.total_size()
    }

    fn decay(&self) {
        self.decay_hit_counters();
    }

    fn allocate(&self, bytes: u64) -> Result<u64> {
        PagedFileWithRecords::allocate(self, bytes)
    }

    fn free(&self, bytes: u64) -> Result<u64> {
        PagedFileWithRecords::free(self, bytes)
    }
}

/// Memory a target should gain (positive) or give back (negative)
///
/// `prev` and `cur` are the counters of two consecutive intervals and
/// `mem_capacity` is the memory budget divided by the total size of all
/// targets.
pub fn get_memory_delta(prev: &PageCacheStats, cur: &PageCacheStats, mem_capacity: f64) -> i64 {
    let mut factor = 1.0;
    if cur.misses > prev.misses {
        factor *= MISS_FACTOR;
    }
    if cur.hits < prev.hits {
        factor *= HIT_FACTOR;
    }

    if mem_capacity > 1.0 {
        (cur.mem_needed as f64 * factor) as i64
    } else if cur.mem_needed == 0 {
        -((IDLE_SHRINK * cur.mem_usage as f64 * mem_capacity) as i64)
    } else {
        -((BUSY_SHRINK * cur.mem_usage as f64 * mem_capacity) as i64)
    }
}

/// Sweep state across iterations
pub struct SweepState {
    targets: Vec<Arc<dyn SweepTarget>>,
    last_totals: Vec<PageCacheStats>,
    last_interval: Vec<PageCacheStats>,
}

impl SweepState {
    /// Track `targets`
    pub fn new(targets: Vec<Arc<dyn SweepTarget>>) -> Self {
        let last_totals = targets.iter().map(|t| t.stats()).collect();
        let last_interval = vec![PageCacheStats::default(); targets.len()];
        Self {
            targets,
            last_totals,
            last_interval,
        }
    }

    /// One sweeper iteration under `budget` bytes
    pub fn sweep(&mut self, budget: u64) -> Result<()> {
        let total_size: u64 = self.targets.iter().map(|t| t.size_bytes()).sum();
        let mut usage: u64 = self.targets.iter().map(|t| t.stats().mem_usage).sum();
        let mem_capacity = if total_size == 0 {
            f64::INFINITY
        } else {
            budget as f64 / total_size as f64
        };

        for (i, target) in self.targets.iter().enumerate() {
            let totals = target.stats();
            let interval = PageCacheStats {
                hits: totals.hits.saturating_sub(self.last_totals[i].hits),
                misses: totals.misses.saturating_sub(self.last_totals[i].misses),
                mem_usage: totals.mem_usage,
                mem_needed: totals.mem_needed,
            };

            let mut delta = get_memory_delta(&self.last_interval[i], &interval, mem_capacity);
            if delta == 0 && interval.mem_needed > 0 && interval.mem_usage == 0 {
                // nothing resident to shrink; hand out spare budget instead
                delta = interval.mem_needed as i64;
            }

            if delta > 0 {
                let grant = (delta as u64).min(budget.saturating_sub(usage));
                if grant > 0 {
                    let granted = target.allocate(grant)?;
                    usage += granted;
                    tracing::debug!("{}: granted {} of {} bytes", target.name(), granted, delta);
                }
            } else if delta < 0 {
                let freed = target.free(delta.unsigned_abs())?;
                usage = usage.saturating_sub(freed);
                tracing::debug!("{}: freed {} bytes", target.name(), freed);
            }

            target.decay();
            self.last_totals[i] = totals;
            self.last_interval[i] = interval;
        }
        Ok(())
    }
}

enum SweeperCommand {
    Sweep,
    Shutdown,
}

/// Handle to the running sweeper thread
pub struct Sweeper {
    sender: Sender<SweeperCommand>,
    handle: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    memory: Arc<AtomicU64>,
    sweeps: Arc<AtomicU64>,
}

impl Sweeper {
    /// Start sweeping `targets` every `interval` under `memory_budget` bytes
    pub fn start(
        targets: Vec<Arc<dyn SweepTarget>>,
        memory_budget: u64,
        interval: Duration,
    ) -> Result<Self> {
        let (sender, receiver) = bounded(16);
        let shutdown = Arc::new(AtomicBool::new(false));
        let memory = Arc::new(AtomicU64::new(memory_budget));
        let sweeps = Arc::new(AtomicU64::new(0));

        let state = SweepState::new(targets);
        let shutdown_clone = shutdown.clone();
        let memory_clone = memory.clone();
        let sweeps_clone = sweeps.clone();
        let handle = thread::Builder::new()
            .name("nexus-sweeper".to_string())
            .spawn(move || {
                Self::sweeper_thread(
                    state,
                    receiver,
                    shutdown_clone,
                    memory_clone,
                    sweeps_clone,
                    interval,
                );
            })?;

        tracing::info!(
            "Page sweeper started (budget {} bytes, interval {:?})",
            memory_budget,
            interval
        );
        Ok(Self {
            sender,
            handle: Some(handle),
            shutdown,
            memory,
            sweeps,
        })
    }

    fn sweeper_thread(
        mut state: SweepState,
        receiver: Receiver<SweeperCommand>,
        shutdown: Arc<AtomicBool>,
        memory: Arc<AtomicU64>,
        sweeps: Arc<AtomicU64>,
        interval: Duration,
    ) {
        while !shutdown.load(Ordering::SeqCst) {
            match receiver.recv_timeout(interval) {
                Ok(SweeperCommand::Shutdown) => break,
                Ok(SweeperCommand::Sweep) | Err(_) => {}
            }
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            let budget = memory.load(Ordering::Relaxed);
            if let Err(e) = state.sweep(budget) {
                tracing::warn!("Page sweep failed: {}", e);
            }
            sweeps.fetch_add(1, Ordering::Relaxed);
        }
        tracing::debug!("Page sweeper stopped");
    }

    /// Change the memory budget
    pub fn set_memory_target(&self, bytes: u64) {
        self.memory.store(bytes, Ordering::Relaxed);
    }

    /// Current memory budget
    pub fn memory_target(&self) -> u64 {
        self.memory.load(Ordering::Relaxed)
    }

    /// Completed iterations
    pub fn sweep_count(&self) -> u64 {
        self.sweeps.load(Ordering::Relaxed)
    }

    /// Run an iteration now instead of waiting for the interval
    pub fn sweep_now(&self) -> Result<()> {
        self.sender
            .send(SweeperCommand::Sweep)
            .map_err(|_| Error::page_cache("sweeper thread is gone"))
    }

    /// Stop the thread and wait for it
    pub fn shutdown(&mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.sender.send(SweeperCommand::Shutdown);
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| Error::page_cache("sweeper thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.sender.send(SweeperCommand::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
