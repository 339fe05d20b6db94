// =============================================================================
// SENSOR MESH — clock.rs
// Drifting scalar clock
// =============================================================================
//
// Each node runs a free clock skewed by a fixed random `jitter`:
//
//     time = origin + correction + e · (1 + jitter)^(e / 1000)
//
// where `e` is seconds elapsed since construction. Receiving a peer's
// reading moves `correction` so the local clock reads exactly the peer's
// value at that instant; the latest encounter wins.
// =============================================================================

use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::constants::{DRIFT_HORIZON_SECS, MAX_JITTER};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ScalarTimestamp {
    pub time: DateTime<Utc>,
}

impl ScalarTimestamp {
    /// Signed distance `self - earlier`, in seconds.
    pub fn seconds_since(&self, earlier: &ScalarTimestamp) -> f64 {
        let delta = self.time - earlier.time;
        match delta.num_nanoseconds() {
            Some(ns) => ns as f64 / 1e9,
            None => delta.num_milliseconds() as f64 / 1e3,
        }
    }
}

impl std::fmt::Display for ScalarTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.time.format("%H:%M:%S%.3f"))
    }
}

#[derive(Debug)]
pub struct ScalarClock {
    origin: DateTime<Utc>,
    started: Instant,
    jitter: f64,
    correction: RwLock<f64>,
}

impl ScalarClock {
    /// Clock starting now with a skew drawn from [-MAX_JITTER, MAX_JITTER].
    pub fn new() -> Self {
        let jitter = rand::thread_rng().gen_range(-MAX_JITTER..=MAX_JITTER);
        Self::with_jitter(jitter)
    }

    pub fn with_jitter(jitter: f64) -> Self {
        ScalarClock {
            origin: Utc::now(),
            started: Instant::now(),
            jitter,
            correction: RwLock::new(0.0),
        }
    }

    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    /// Accumulated correction, seconds.
    pub fn correction(&self) -> f64 {
        *self.correction.read()
    }

    fn reading(&self, correction: f64) -> ScalarTimestamp {
        let elapsed = self.started.elapsed().as_secs_f64();
        let drifted = elapsed * (1.0 + self.jitter).powf(elapsed / DRIFT_HORIZON_SECS);
        let offset = correction + drifted;
        ScalarTimestamp {
            time: self.origin + chrono::Duration::nanoseconds((offset * 1e9) as i64),
        }
    }

    pub fn now(&self) -> ScalarTimestamp {
        self.reading(*self.correction.read())
    }

    /// Folds a peer's reading into the correction and returns the adjusted
    /// local time. Holds the write lock for the whole read-modify-write.
    pub fn synchronize(&self, remote: &ScalarTimestamp) -> ScalarTimestamp {
        let mut correction = self.correction.write();
        let local = self.reading(*correction);
        *correction += remote.seconds_since(&local);
        self.reading(*correction)
    }
}

impl Default for ScalarClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn shifted(ts: ScalarTimestamp, secs: f64) -> ScalarTimestamp {
        ScalarTimestamp {
            time: ts.time + chrono::Duration::nanoseconds((secs * 1e9) as i64),
        }
    }

    #[test]
    fn test_jitter_within_bounds() {
        for _ in 0..200 {
            let clock = ScalarClock::new();
            assert!(clock.jitter().abs() <= MAX_JITTER);
        }
    }

    #[test]
    fn test_now_is_a_pure_read() {
        let clock = ScalarClock::with_jitter(0.1);
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
        assert_eq!(clock.correction(), 0.0);
    }

    #[test]
    fn test_fresh_clock_reads_close_to_wall_time() {
        let clock = ScalarClock::with_jitter(0.2);
        let drift = clock.now().seconds_since(&ScalarTimestamp { time: Utc::now() });
        assert!(drift.abs() < 0.5, "drift={}", drift);
    }

    #[test]
    fn test_synchronize_jumps_to_remote_reading() {
        let clock = ScalarClock::with_jitter(0.0);
        let remote = shifted(clock.now(), 30.0);

        let adjusted = clock.synchronize(&remote);
        assert!(adjusted.seconds_since(&remote).abs() < 0.05);
        assert!((clock.correction() - 30.0).abs() < 0.05);
    }

    #[test]
    fn test_synchronize_can_move_backwards() {
        let clock = ScalarClock::with_jitter(0.0);
        let remote = shifted(clock.now(), -10.0);

        let adjusted = clock.synchronize(&remote);
        assert!(adjusted.seconds_since(&remote).abs() < 0.05);
        assert!(clock.correction() < -9.9);
    }

    #[test]
    fn test_repeated_synchronize_is_stable() {
        let clock = ScalarClock::with_jitter(-0.15);
        let remote = shifted(clock.now(), 5.0);

        let first = clock.synchronize(&remote);
        let after_first = clock.correction();
        let second = clock.synchronize(&remote);

        assert!(second.seconds_since(&first).abs() < 0.05);
        assert!((clock.correction() - after_first).abs() < 0.05);
    }

    #[test]
    fn test_concurrent_synchronize_keeps_a_consistent_correction() {
        let clock = Arc::new(ScalarClock::with_jitter(0.0));
        let target = shifted(clock.now(), 60.0);

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let clock = Arc::clone(&clock);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        clock.synchronize(&target);
                        let _ = clock.now();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert!(clock.now().seconds_since(&target).abs() < 1.0);
    }

    #[test]
    fn test_timestamp_serializes_as_rfc3339() {
        let ts = ScalarClock::with_jitter(0.0).now();
        let json = serde_json::to_string(&ts).unwrap();
        assert!(json.starts_with("{\"time\":\""));
        let back: ScalarTimestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ts);
    }
}
