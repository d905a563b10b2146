//! N+1 query detection for permissive lazy loads.
//!
//! Every lazy load the guard performs is recorded per
//! `(entity type, relationship)`. When a pair reaches the threshold a
//! warning is logged on the `tether::n1` target suggesting an eager load.
//!
//! ```ignore
//! // Warns after the third iteration:
//! for order in &orders {
//!     session.relation(&cx, order, "customer").await;
//! }
//!
//! // One query instead:
//! session.load(&cx, &orders, &["customer"]).await;
//! ```

use std::collections::HashMap;
use std::panic::Location;
use std::time::Instant;

/// Where a lazy load was triggered.
#[derive(Debug, Clone)]
pub struct CallSite {
    pub entity_type: &'static str,
    pub relationship: &'static str,
    pub file: &'static str,
    pub line: u32,
    pub at: Instant,
}

/// Lazy-load statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct N1Stats {
    /// Lazy loads recorded.
    pub total_loads: usize,
    /// Distinct `(entity type, relationship)` pairs loaded lazily.
    pub relationships_loaded: usize,
    /// Pairs at or above the threshold.
    pub potential_n1: usize,
}

/// Counts lazy loads and warns when a pattern looks like N+1.
#[derive(Debug)]
pub struct N1QueryTracker {
    counts: HashMap<(&'static str, &'static str), usize>,
    threshold: usize,
    enabled: bool,
    call_sites: Vec<CallSite>,
}

impl Default for N1QueryTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl N1QueryTracker {
    /// Enabled tracker with threshold 3.
    #[must_use]
    pub fn new() -> Self {
        Self {
            counts: HashMap::new(),
            threshold: 3,
            enabled: true,
            call_sites: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold.max(1);
        self
    }

    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Record one lazy load.
    #[track_caller]
    pub fn record_load(&mut self, entity_type: &'static str, relationship: &'static str) {
        self.record_at(entity_type, relationship, Location::caller());
    }

    /// Record one lazy load attributed to `site`.
    pub fn record_at(
        &mut self,
        entity_type: &'static str,
        relationship: &'static str,
        site: &'static Location<'static>,
    ) {
        if !self.enabled {
            return;
        }

        let count = self.counts.entry((entity_type, relationship)).or_insert(0);
        *count += 1;
        let count = *count;

        self.call_sites.push(CallSite {
            entity_type,
            relationship,
            file: site.file(),
            line: site.line(),
            at: Instant::now(),
        });

        if count == self.threshold {
            self.warn(entity_type, relationship, count);
        }
    }

    fn warn(&self, entity_type: &'static str, relationship: &'static str, count: usize) {
        tracing::warn!(
            target: "tether::n1",
            entity = entity_type,
            relationship = relationship,
            queries = count,
            threshold = self.threshold,
            "N+1 query pattern detected; eager load the relationship with Session::load() or Query::with()"
        );

        for (i, site) in self
            .call_sites
            .iter()
            .filter(|s| s.entity_type == entity_type && s.relationship == relationship)
            .take(5)
            .enumerate()
        {
            tracing::debug!(
                target: "tether::n1",
                index = i,
                file = site.file,
                line = site.line,
                "lazy load call site"
            );
        }
    }

    /// Clear counts and call sites, e.g. at the start of a request.
    pub fn reset(&mut self) {
        self.counts.clear();
        self.call_sites.clear();
    }

    pub fn count_for(&self, entity_type: &str, relationship: &str) -> usize {
        self.counts
            .get(&(entity_type, relationship))
            .copied()
            .unwrap_or(0)
    }

    pub fn stats(&self) -> N1Stats {
        N1Stats {
            total_loads: self.counts.values().sum(),
            relationships_loaded: self.counts.len(),
            potential_n1: self
                .counts
                .values()
                .filter(|c| **c >= self.threshold)
                .count(),
        }
    }

    pub fn call_sites(&self) -> &[CallSite] {
        &self.call_sites
    }
}
