//! Fusion counters shared by all workers.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Lock-free fusion counters.
#[derive(Debug, Default)]
pub struct FusionCounters {
    received: AtomicU64,
    duplicates: AtomicU64,
    tracks_emitted: AtomicU64,
    late_merges: AtomicU64,
    late_dropped: AtomicU64,
    safety_only: AtomicU64,
    disputed: AtomicU64,
    low_confidence: AtomicU64,
    suppressed: AtomicU64,
    sink_failures: AtomicU64,
    open_windows: AtomicU64,
    manual_passes: AtomicU64,
}

impl FusionCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_emitted(&self, safety_only: bool, disputed: bool, low_confidence: bool) {
        self.tracks_emitted.fetch_add(1, Ordering::Relaxed);
        if safety_only {
            self.safety_only.fetch_add(1, Ordering::Relaxed);
        }
        if disputed {
            self.disputed.fetch_add(1, Ordering::Relaxed);
        }
        if low_confidence {
            self.low_confidence.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_late_merge(&self) {
        self.late_merges.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_late_dropped(&self) {
        self.late_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_suppressed(&self) {
        self.suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sink_failure(&self) {
        self.sink_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_manual_pass(&self) {
        self.manual_passes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn windows_opened(&self, n: usize) {
        self.open_windows.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn windows_closed(&self, n: usize) {
        let _ = self
            .open_windows
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(n as u64))
            });
    }

    pub fn snapshot(&self) -> FusionStats {
        FusionStats {
            observations_received: self.received.load(Ordering::Relaxed),
            duplicates_skipped: self.duplicates.load(Ordering::Relaxed),
            tracks_emitted: self.tracks_emitted.load(Ordering::Relaxed),
            late_merges: self.late_merges.load(Ordering::Relaxed),
            late_dropped: self.late_dropped.load(Ordering::Relaxed),
            safety_only_tracks: self.safety_only.load(Ordering::Relaxed),
            disputed_positions: self.disputed.load(Ordering::Relaxed),
            low_confidence_tracks: self.low_confidence.load(Ordering::Relaxed),
            suppressed_windows: self.suppressed.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
            open_windows: self.open_windows.load(Ordering::Relaxed),
            manual_passes: self.manual_passes.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time fusion statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FusionStats {
    pub observations_received: u64,
    pub duplicates_skipped: u64,
    pub tracks_emitted: u64,
    pub late_merges: u64,
    pub late_dropped: u64,
    pub safety_only_tracks: u64,
    pub disputed_positions: u64,
    pub low_confidence_tracks: u64,
    pub suppressed_windows: u64,
    pub sink_failures: u64,
    pub open_windows: u64,
    pub manual_passes: u64,
}
