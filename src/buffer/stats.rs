//! Buffer pool statistics tracking.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters maintained by the buffer pool.
///
/// All fields are atomic with `Relaxed` ordering: each counter only needs
/// to be exact on its own, not ordered against the others.
#[derive(Debug, Default)]
pub struct BufferPoolStats {
    /// Requests served from an already cached block.
    pub cache_hits: AtomicU64,

    /// Requests that had to load a block from its file.
    pub cache_misses: AtomicU64,

    /// Blocks removed to make room for another.
    pub evictions: AtomicU64,

    /// Blocks loaded from disk.
    pub blocks_read: AtomicU64,

    /// Dirty blocks written back to disk.
    pub blocks_written: AtomicU64,

    /// Write-backs dropped because the file no longer exists.
    pub discarded_flushes: AtomicU64,
}

impl BufferPoolStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Plain copy of every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            blocks_read: self.blocks_read.load(Ordering::Relaxed),
            blocks_written: self.blocks_written.load(Ordering::Relaxed),
            discarded_flushes: self.discarded_flushes.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.cache_hits,
            &self.cache_misses,
            &self.evictions,
            &self.blocks_read,
            &self.blocks_written,
            &self.discarded_flushes,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// A point-in-time copy of [`BufferPoolStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub evictions: u64,
    pub blocks_read: u64,
    pub blocks_written: u64,
    pub discarded_flushes: u64,
}

impl StatsSnapshot {
    /// Fraction of block requests served from the cache, or 0 before the
    /// first request.
    pub fn hit_rate(&self) -> f64 {
        match self.cache_hits + self.cache_misses {
            0 => 0.0,
            requests => self.cache_hits as f64 / requests as f64,
        }
    }

    /// Counter increments between `earlier` and this snapshot.
    pub fn since(&self, earlier: &StatsSnapshot) -> StatsSnapshot {
        StatsSnapshot {
            cache_hits: self.cache_hits.saturating_sub(earlier.cache_hits),
            cache_misses: self.cache_misses.saturating_sub(earlier.cache_misses),
            evictions: self.evictions.saturating_sub(earlier.evictions),
            blocks_read: self.blocks_read.saturating_sub(earlier.blocks_read),
            blocks_written: self.blocks_written.saturating_sub(earlier.blocks_written),
            discarded_flushes: self.discarded_flushes.saturating_sub(earlier.discarded_flushes),
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits={} misses={} ({:.1}% hit) evictions={} read={} written={} discarded={}",
            self.cache_hits,
            self.cache_misses,
            self.hit_rate() * 100.0,
            self.evictions,
            self.blocks_read,
            self.blocks_written,
            self.discarded_flushes
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bump_n(counter: &AtomicU64, n: usize) {
        for _ in 0..n {
            BufferPoolStats::bump(counter);
        }
    }

    #[test]
    fn test_hit_rate() {
        let stats = BufferPoolStats::new();
        assert_eq!(stats.snapshot().hit_rate(), 0.0);

        bump_n(&stats.cache_hits, 3);
        bump_n(&stats.cache_misses, 1);
        assert_eq!(stats.snapshot().hit_rate(), 0.75);
    }

    #[test]
    fn test_since_and_reset() {
        let stats = BufferPoolStats::new();
        bump_n(&stats.blocks_read, 4);
        let before = stats.snapshot();

        bump_n(&stats.blocks_read, 2);
        bump_n(&stats.discarded_flushes, 1);
        let delta = stats.snapshot().since(&before);
        assert_eq!(delta.blocks_read, 2);
        assert_eq!(delta.discarded_flushes, 1);
        assert_eq!(delta.evictions, 0);

        stats.reset();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn test_display_lists_every_counter() {
        let stats = BufferPoolStats::new();
        bump_n(&stats.cache_hits, 9);
        bump_n(&stats.cache_misses, 1);
        bump_n(&stats.blocks_written, 2);

        let line = stats.snapshot().to_string();
        assert_eq!(
            line,
            "hits=9 misses=1 (90.0% hit) evictions=0 read=0 written=2 discarded=0"
        );
    }
}
