//! Page cache for record files
//!
//! Pages are immutable once published and are replaced wholesale on write
//! (copy-on-write). A slot without a resident page is served straight from
//! the file, so the cache never has to hold everything; the [`sweeper`]
//! decides which pages stay resident under a memory budget.

pub mod buffer;
pub mod element;
pub mod hit_counter;
pub mod page;
pub mod paged_file;
pub mod sweeper;

pub use buffer::PageBuffer;
pub use element::{AtomicPageElement, PageElement, UnsyncPageElement};
pub use hit_counter::HitCounter;
pub use page::Page;
pub use paged_file::PagedFileWithRecords;
pub use sweeper::{get_memory_delta, SweepState, SweepTarget, Sweeper};

/// Page cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageCacheStats {
    /// Record accesses served by a resident page
    pub hits: u64,
    /// Record accesses that went to the file
    pub misses: u64,
    /// Bytes of resident pages
    pub mem_usage: u64,
    /// Bytes of unallocated pages that have seen recent accesses
    pub mem_needed: u64,
}

impl PageCacheStats {
    /// Fraction of accesses served from memory
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        assert_eq!(PageCacheStats::default().hit_rate(), 0.0);
        let stats = PageCacheStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert_eq!(stats.hit_rate(), 0.75);
    }
}
