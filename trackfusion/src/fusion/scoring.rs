//! Window alignment and candidate ranking.

use std::cmp::Ordering;

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::observation::RawObservation;

/// Start of the epoch-aligned window containing `at`.
pub fn window_start(at: DateTime<Utc>, window_ms: i64) -> DateTime<Utc> {
    let window_ms = window_ms.max(1);
    let start = at.timestamp_millis().div_euclid(window_ms) * window_ms;
    DateTime::from_timestamp_millis(start).unwrap_or(at)
}

/// End (exclusive) of the window starting at `start`.
pub fn window_end(start: DateTime<Utc>, window_ms: i64) -> DateTime<Utc> {
    start + ChronoDuration::milliseconds(window_ms.max(1))
}

/// A candidate paired with its provider's rank at fusion time.
#[derive(Debug, Clone, Copy)]
pub struct Ranked<'a> {
    pub observation: &'a RawObservation,
    pub priority: u32,
}

/// Total order used to pick the primary candidate.
///
/// Lower priority rank first, then higher quality, then the most recent
/// `received_at`. The remaining keys only break exact ties so the result
/// never depends on input order.
pub fn compare(a: &Ranked<'_>, b: &Ranked<'_>) -> Ordering {
    let (x, y) = (a.observation, b.observation);
    a.priority
        .cmp(&b.priority)
        .then_with(|| y.quality.total_cmp(&x.quality))
        .then_with(|| y.received_at.cmp(&x.received_at))
        .then_with(|| x.provider.cmp(&y.provider))
        .then_with(|| x.latitude.total_cmp(&y.latitude))
        .then_with(|| x.longitude.total_cmp(&y.longitude))
        .then_with(|| {
            format!("{:?}", x.attributes).cmp(&format!("{:?}", y.attributes))
        })
}

/// Sort candidates best first.
pub fn rank(candidates: &mut [Ranked<'_>]) {
    candidates.sort_by(compare);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::{EntityType, Position};
    use chrono::TimeZone;

    fn obs(provider: &str, quality: f64, secs: i64) -> RawObservation {
        RawObservation::new(
            EntityType::Aircraft,
            provider,
            "ABC123",
            Position::new(10.0, 106.0),
            quality,
            Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
        )
    }

    #[test]
    fn test_window_alignment() {
        let at = Utc.timestamp_millis_opt(1_700_000_012_345).unwrap();
        let start = window_start(at, 30_000);
        assert_eq!(start.timestamp_millis(), 1_700_000_010_000);
        assert_eq!(window_end(start, 30_000).timestamp_millis(), 1_700_000_040_000);

        // Same window regardless of where inside it the record falls
        let later = Utc.timestamp_millis_opt(1_700_000_039_999).unwrap();
        assert_eq!(window_start(later, 30_000), start);
    }

    #[test]
    fn test_priority_beats_quality() {
        let a = obs("flightradar24", 0.9, 0);
        let b = obs("adsbexchange", 0.99, 0);
        let mut ranked = vec![
            Ranked { observation: &b, priority: 2 },
            Ranked { observation: &a, priority: 1 },
        ];
        rank(&mut ranked);
        assert_eq!(ranked[0].observation.provider, "flightradar24");
    }

    #[test]
    fn test_quality_then_recency() {
        let low = obs("x", 0.7, 10);
        let high = obs("y", 0.8, 0);
        let newer = obs("z", 0.8, 5);
        let mut ranked = vec![
            Ranked { observation: &low, priority: 3 },
            Ranked { observation: &high, priority: 3 },
            Ranked { observation: &newer, priority: 3 },
        ];
        rank(&mut ranked);
        let order: Vec<&str> = ranked.iter().map(|r| r.observation.provider.as_str()).collect();
        assert_eq!(order, vec!["z", "y", "x"]);
    }
}
