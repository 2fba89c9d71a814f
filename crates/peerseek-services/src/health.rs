//! Load shedding for remote searches.
//!
//! A busy node asks fewer peers and may skip one kind of fan-out entirely.
//! The budget only ever shrinks as signals get worse.

use serde::Serialize;

/// Below this much available memory the node counts as short on memory.
pub const SHORT_MEMORY_BYTES: u64 = 100 * 1024 * 1024;

const QUEUE_THRESHOLDS: [usize; 3] = [0, 10, 50];
const REDUNDANCY_LOAD: f64 = 2.0;
const FULLTEXT_SHED_LOAD: f64 = 4.0;
const INDEX_SHED_LOAD: f64 = 8.0;
const FEW_CORES: usize = 4;

/// Snapshot of node pressure.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HealthSignals {
    /// Pending work in the local index pipeline.
    pub queue_len: usize,
    /// One-minute load average.
    pub load: f64,
    pub cores: usize,
    pub short_memory: bool,
}

impl Default for HealthSignals {
    fn default() -> Self {
        Self {
            queue_len: 0,
            load: 0.0,
            cores: FEW_CORES,
            short_memory: false,
        }
    }
}

impl HealthSignals {
    /// Read the current signals from the OS. Unreadable values count as
    /// healthy.
    pub fn sample(queue_len: usize) -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(FEW_CORES);
        let load = std::fs::read_to_string("/proc/loadavg")
            .ok()
            .and_then(|s| parse_loadavg(&s))
            .unwrap_or(0.0);
        let short_memory = std::fs::read_to_string("/proc/meminfo")
            .ok()
            .and_then(|s| parse_mem_available(&s))
            .is_some_and(|avail| avail < SHORT_MEMORY_BYTES);
        Self {
            queue_len,
            load,
            cores,
            short_memory,
        }
    }
}

fn parse_loadavg(text: &str) -> Option<f64> {
    text.split_whitespace().next()?.parse().ok()
}

/// `MemAvailable` in bytes.
fn parse_mem_available(text: &str) -> Option<u64> {
    let line = text.lines().find(|l| l.starts_with("MemAvailable:"))?;
    let kib: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kib * 1024)
}

/// What a healthy node would do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Baseline {
    pub redundancy: usize,
    pub partitions: usize,
    /// Concurrent peer requests. Never exceeded.
    pub max_concurrency: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthBudget {
    pub redundancy: usize,
    /// Full-text targets on top of the DHT targets.
    pub extra_count: usize,
    /// Upper bound on DHT targets.
    pub target_cap: usize,
    pub concurrency: usize,
    pub index_enabled: bool,
    pub fulltext_enabled: bool,
}

/// Halve, but never from a positive value down to zero.
fn halve(x: usize) -> usize {
    if x == 0 {
        0
    } else {
        (x / 2).max(1)
    }
}

impl HealthBudget {
    pub fn compute(baseline: &Baseline, signals: &HealthSignals) -> Self {
        // a configured redundancy of zero stays zero
        let floor = baseline.redundancy.min(1);
        let pressure = QUEUE_THRESHOLDS
            .iter()
            .filter(|&&t| signals.queue_len > t)
            .count();
        let mut penalties = pressure;
        if signals.load > REDUNDANCY_LOAD {
            penalties += 1;
        }
        if signals.cores < FEW_CORES {
            penalties += 1;
        }
        let mut redundancy = baseline.redundancy.saturating_sub(penalties).max(floor);
        if signals.cores <= 1 || signals.short_memory {
            redundancy = floor;
        }

        let mut extra_count = baseline.partitions * redundancy / 2;
        for _ in 0..pressure {
            extra_count = halve(extra_count);
        }
        if signals.short_memory {
            extra_count = halve(extra_count);
        }

        let target_cap = 1 + redundancy * baseline.partitions;
        let fulltext_enabled = !signals.short_memory && signals.load <= FULLTEXT_SHED_LOAD;
        let index_enabled = signals.load <= INDEX_SHED_LOAD;
        let wanted = (if index_enabled { target_cap } else { 0 })
            + (if fulltext_enabled { extra_count } else { 0 });
        let concurrency = wanted.min(baseline.max_concurrency).max(1);

        Self {
            redundancy,
            extra_count,
            target_cap,
            concurrency,
            index_enabled,
            fulltext_enabled,
        }
    }
}
