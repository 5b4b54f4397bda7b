// =============================================================================
// dedup.rs — THE "WE ALREADY TOLD YOU ABOUT THAT ONE" FORTRESS
// =============================================================================
//
// Hybrid Bloom Filter + LRU Cache deduplication, repurposed for auction lots.
//
// Why bother? Because a single lot on a search page is usually three anchors:
// the thumbnail, the title, and a "View Lot" button, all pointing at the same
// URL. And because in watch mode the same page gets scanned every fifteen
// minutes, and nobody wants their phone buzzing about the same Betamax deck
// 96 times a day.
//
// The flow:
//
// 1. Bloom filter says "never seen it" → definitely new. Bloom filters never
//    have false negatives.
// 2. Bloom filter says "maybe" → the LRU cache has the definitive answer.
//    A maybe with an LRU miss is a bloom false positive and the lot is new.
// 3. The bloom filter rotates on an interval so it never saturates. On
//    rotation it is re-seeded from the LRU, so anything the LRU still
//    remembers stays suppressed.
//
// Retention is a choice. `Process` keeps the seen-set for as long as the
// orchestrator lives (across scans). `PerScan` wipes it at the start of each
// scan, which matches the old "re-alert every run" behaviour while still
// collapsing duplicate anchors inside one scan.
// =============================================================================

use bloomfilter::Bloom;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::models::{DedupKey, MatchResult};

const FALLBACK_FP_RATE: f64 = 0.01;

const FALLBACK_LRU_CAPACITY: NonZeroUsize = match NonZeroUsize::new(1000) {
    Some(n) => n,
    None => unreachable!(),
};

/// How long the seen-set survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DedupRetention {
    /// Seen-set cleared at the start of every scan.
    PerScan,
    /// Seen-set kept for the lifetime of the orchestrator.
    Process,
}

impl DedupRetention {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "scan" | "per_scan" | "per-scan" => Some(DedupRetention::PerScan),
            "process" => Some(DedupRetention::Process),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DedupConfig {
    pub expected_items: u64,
    pub fp_rate: f64,
    pub lru_capacity: usize,
    pub rotation_interval: Duration,
    pub retention: DedupRetention,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            expected_items: 100_000,
            fp_rate: 0.01,
            lru_capacity: 50_000,
            rotation_interval: Duration::from_secs(86_400),
            retention: DedupRetention::Process,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct DedupStats {
    checks: u64,
    unique: u64,
    duplicates: u64,
    rotations: u64,
    false_positive_rescues: u64,
}

/// Owned by exactly one orchestrator; every mutation goes through `&mut self`.
pub struct Deduplicator {
    bloom: Bloom<String>,
    lru_cache: LruCache<String, ()>,
    /// Exact record of keys admitted during the current scan. LRU eviction
    /// may weaken cross-scan suppression, never this.
    scan_seen: HashSet<String>,
    last_rotation: Instant,
    config: DedupConfig,
    stats: DedupStats,
}

impl Deduplicator {
    pub fn new(config: DedupConfig) -> Self {
        info!(
            expected_items = config.expected_items,
            fp_rate = config.fp_rate,
            lru_capacity = config.lru_capacity,
            rotation_secs = config.rotation_interval.as_secs(),
            retention = ?config.retention,
            "Initializing deduplicator — repeat alerts will be ELIMINATED"
        );

        let lru_size = NonZeroUsize::new(config.lru_capacity).unwrap_or(FALLBACK_LRU_CAPACITY);

        Self {
            bloom: new_bloom(&config),
            lru_cache: LruCache::new(lru_size),
            scan_seen: HashSet::new(),
            last_rotation: Instant::now(),
            config,
            stats: DedupStats::default(),
        }
    }

    pub fn retention(&self) -> DedupRetention {
        self.config.retention
    }

    /// Called by the orchestrator when a scan starts. Only `PerScan`
    /// retention actually forgets anything.
    pub fn begin_scan(&mut self) {
        self.scan_seen.clear();
        if self.config.retention == DedupRetention::PerScan {
            self.clear();
        }
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.bloom = new_bloom(&self.config);
        self.lru_cache.clear();
        self.scan_seen.clear();
        self.last_rotation = Instant::now();
        debug!("Deduplicator cleared");
    }

    /// `true` the first time a match's identity is seen (and records it),
    /// `false` for every repeat.
    pub fn admit(&mut self, result: &MatchResult) -> bool {
        self.check_and_insert(&result.dedup_key())
    }

    pub fn check_and_insert(&mut self, key: &DedupKey) -> bool {
        self.stats.checks += 1;
        self.maybe_rotate();

        let key = key.to_string();

        if self.scan_seen.contains(&key) {
            self.stats.duplicates += 1;
            debug!(key = key.as_str(), "Duplicate listing suppressed (seen this scan)");
            return false;
        }

        if self.bloom.check(&key) {
            if self.lru_cache.get(&key).is_some() {
                self.stats.duplicates += 1;
                debug!(key = key.as_str(), "Duplicate listing suppressed");
                return false;
            }

            self.stats.false_positive_rescues += 1;
            debug!(
                key = key.as_str(),
                "Bloom false positive rescued by LRU — listing is actually new"
            );
        }

        self.bloom.set(&key);
        self.scan_seen.insert(key.clone());
        self.lru_cache.put(key, ());
        self.stats.unique += 1;
        true
    }

    /// Has this key been recorded? Does not record it.
    pub fn contains(&self, key: &DedupKey) -> bool {
        let key = key.to_string();
        self.scan_seen.contains(&key) || (self.bloom.check(&key) && self.lru_cache.contains(&key))
    }

    pub fn len(&self) -> usize {
        self.lru_cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lru_cache.is_empty()
    }

    fn maybe_rotate(&mut self) {
        if self.last_rotation.elapsed() < self.config.rotation_interval {
            return;
        }

        let mut bloom = new_bloom(&self.config);
        for (key, _) in self.lru_cache.iter() {
            bloom.set(key);
        }
        self.bloom = bloom;
        self.last_rotation = Instant::now();
        self.stats.rotations += 1;

        info!(
            reseeded = self.lru_cache.len(),
            "Bloom filter rotated — reseeded from the LRU"
        );
    }

    pub fn snapshot(&self) -> DedupSnapshot {
        DedupSnapshot {
            total_checks: self.stats.checks,
            unique_items: self.stats.unique,
            duplicates_caught: self.stats.duplicates,
            bloom_rotations: self.stats.rotations,
            bloom_false_positive_rescues: self.stats.false_positive_rescues,
            lru_cache_size: self.lru_cache.len(),
        }
    }
}

fn new_bloom(config: &DedupConfig) -> Bloom<String> {
    Bloom::new_for_fp_rate(config.expected_items.max(1) as usize, usable_fp_rate(config.fp_rate))
}

/// The bloom filter only accepts rates strictly between 0 and 1.
fn usable_fp_rate(fp_rate: f64) -> f64 {
    if fp_rate > 0.0 && fp_rate < 1.0 {
        fp_rate
    } else {
        warn!(fp_rate, fallback = FALLBACK_FP_RATE, "Bloom false-positive rate out of range, using fallback");
        FALLBACK_FP_RATE
    }
}

/// A snapshot of dedup statistics at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DedupSnapshot {
    pub total_checks: u64,
    pub unique_items: u64,
    pub duplicates_caught: u64,
    pub bloom_rotations: u64,
    pub bloom_false_positive_rescues: u64,
    pub lru_cache_size: usize,
}
