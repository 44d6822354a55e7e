//! Statistics
//!
//! Latency and counter samples grouped by [`Category`]. Components only see
//! the [`StatsSink`] trait; [`NoopStats`] can be plugged in when nothing
//! should be recorded.

use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use parking_lot::Mutex;

/// What a sample measures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    /// Microseconds spent in a range query
    RangeQueryTime,
    /// Read I/O calls issued by a range query
    RangeQueryRandomReads,
    /// Microseconds spent collecting one partition
    GcTime,
    /// Bytes written by one partition rewrite
    GcWriteBytes,
    /// Microseconds spent persisting one partition buffer
    FlushTime,
    /// Records persisted by one flush
    FlushRecords,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::RangeQueryTime,
        Category::RangeQueryRandomReads,
        Category::GcTime,
        Category::GcWriteBytes,
        Category::FlushTime,
        Category::FlushRecords,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Category::RangeQueryTime => "range_query_time_us",
            Category::RangeQueryRandomReads => "range_query_random_reads",
            Category::GcTime => "gc_time_us",
            Category::GcWriteBytes => "gc_write_bytes",
            Category::FlushTime => "flush_time_us",
            Category::FlushRecords => "flush_records",
        }
    }
}

/// Opaque start time handed out by [`StatsSink::start_timer`]
#[derive(Debug, Clone, Copy)]
pub struct TimerToken(Instant);

impl TimerToken {
    pub fn now() -> Self {
        Self(Instant::now())
    }

    pub fn elapsed_micros(&self) -> u64 {
        self.0.elapsed().as_micros() as u64
    }
}

/// Destination for engine statistics
pub trait StatsSink: Send + Sync {
    /// Start timing an operation
    fn start_timer(&self) -> TimerToken {
        TimerToken::now()
    }

    /// Record the time elapsed since `token` under `category`
    fn stop_timer(&self, category: Category, token: TimerToken);

    /// Record one counter sample
    fn add_count(&self, category: Category, amount: u64);

    /// Summarize everything recorded so far
    fn report(&self) -> StatsReport;
}

/// Summary of one category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategorySummary {
    pub category: Category,
    pub samples: u64,
    pub total: u64,
    pub min: u64,
    pub max: u64,
}

impl CategorySummary {
    pub fn mean(&self) -> u64 {
        if self.samples == 0 {
            0
        } else {
            self.total / self.samples
        }
    }
}

/// Summary of all categories with at least one sample
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsReport {
    pub categories: Vec<CategorySummary>,
}

impl StatsReport {
    pub fn get(&self, category: Category) -> Option<&CategorySummary> {
        self.categories.iter().find(|s| s.category == category)
    }

    /// Sum of all samples in `category` (zero when never recorded)
    pub fn total(&self, category: Category) -> u64 {
        self.get(category).map_or(0, |s| s.total)
    }
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for s in &self.categories {
            writeln!(
                f,
                "{:<26} samples={:<8} total={:<12} mean={:<10} min={:<10} max={}",
                s.category.name(),
                s.samples,
                s.total,
                s.mean(),
                s.min,
                s.max
            )?;
        }
        Ok(())
    }
}

// =============================================================================
// Recording sink
// =============================================================================

/// Keeps every sample in memory
#[derive(Default)]
pub struct Statistics {
    samples: Mutex<HashMap<Category, Vec<u64>>>,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, category: Category, value: u64) {
        self.samples.lock().entry(category).or_default().push(value);
    }
}

impl StatsSink for Statistics {
    fn stop_timer(&self, category: Category, token: TimerToken) {
        self.record(category, token.elapsed_micros());
    }

    fn add_count(&self, category: Category, amount: u64) {
        self.record(category, amount);
    }

    fn report(&self) -> StatsReport {
        let samples = self.samples.lock();
        let categories: Vec<CategorySummary> = Category::ALL
            .iter()
            .filter_map(|category| {
                let values = samples.get(category).filter(|v| !v.is_empty())?;
                Some(CategorySummary {
                    category: *category,
                    samples: values.len() as u64,
                    total: values.iter().sum(),
                    min: values.iter().copied().min().unwrap_or(0),
                    max: values.iter().copied().max().unwrap_or(0),
                })
            })
            .collect();

        for s in &categories {
            tracing::info!(
                category = s.category.name(),
                samples = s.samples,
                total = s.total,
                mean = s.mean(),
                "stats"
            );
        }

        StatsReport { categories }
    }
}

// =============================================================================
// Discarding sink
// =============================================================================

/// Records nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStats;

impl StatsSink for NoopStats {
    fn stop_timer(&self, _category: Category, _token: TimerToken) {}

    fn add_count(&self, _category: Category, _amount: u64) {}

    fn report(&self) -> StatsReport {
        StatsReport::default()
    }
}
