//! SuperMemo-2 update rule.
//!
//! `update` is a pure transform from (record, grade, now) to the next record.
//! Failures (grade < 3) reset the repetition streak and interval but leave the
//! ease factor untouched; successes grow the interval by the updated ease.

use chrono::{DateTime, Duration, Utc};

use crate::types::{Quality, ReviewRecord, MAX_INTERVAL_DAYS, MIN_EASE_FACTOR};

/// Interval assigned after a failed recall, and after the first success.
const FIRST_INTERVAL_DAYS: u32 = 1;

/// Interval assigned after the second consecutive success.
const SECOND_INTERVAL_DAYS: u32 = 6;

/// Apply one graded recall to a review record.
///
/// Returns the successor record with `last_reviewed_at = now` and
/// `due_at = now + interval`. Never fails: `Quality` is already validated.
pub fn update(record: &ReviewRecord, quality: Quality, now: DateTime<Utc>) -> ReviewRecord {
    let mut next = record.clone();

    if quality.is_pass() {
        next.repetition_count = record.repetition_count + 1;
        next.ease_factor = next_ease(record.ease_factor, quality);
        next.interval_days = match next.repetition_count {
            1 => FIRST_INTERVAL_DAYS,
            2 => SECOND_INTERVAL_DAYS,
            _ => scale_interval(record.interval_days, next.ease_factor),
        };
    } else {
        next.repetition_count = 0;
        next.interval_days = FIRST_INTERVAL_DAYS;
        next.lapses = record.lapses + 1;
    }

    next.interval_days = next.interval_days.min(MAX_INTERVAL_DAYS);
    next.last_reviewed_at = Some(now);
    next.due_at = now + Duration::days(i64::from(next.interval_days));
    next
}

/// SM-2 ease adjustment, clamped to the floor.
fn next_ease(ease: f64, quality: Quality) -> f64 {
    let q = f64::from(quality.value());
    let adjusted = ease + (0.1 - (5.0 - q) * (0.08 + (5.0 - q) * 0.02));
    adjusted.max(MIN_EASE_FACTOR)
}

/// Grow the previous interval by the ease factor, rounding half away from zero
/// to whole days.
fn scale_interval(previous_days: u32, ease: f64) -> u32 {
    let scaled = f64::from(previous_days) * ease;
    // f64::round is round-half-away-from-zero; inputs are non-negative.
    scaled.round() as u32
}

/// Ebbinghaus-style estimate of recall probability after `days_since_review`
/// days, corrected by the record's ease factor. Clamped to [0, 1].
pub fn estimated_retention(days_since_review: u32, ease_factor: f64) -> f64 {
    let retention = (-0.5 * f64::from(days_since_review) / ease_factor).exp();
    retention.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ReviewRecord, DEFAULT_EASE_FACTOR};
    use chrono::TimeZone;

    fn q(grade: u8) -> Quality {
        Quality::new(grade).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn fresh() -> ReviewRecord {
        ReviewRecord::new(7, 100, now())
    }

    #[test]
    fn first_three_successes_follow_sm2_ladder() {
        let t = now();
        let r1 = update(&fresh(), q(5), t);
        assert_eq!(r1.repetition_count, 1);
        assert_eq!(r1.interval_days, 1);

        let r2 = update(&r1, q(4), t + Duration::days(1));
        assert_eq!(r2.repetition_count, 2);
        assert_eq!(r2.interval_days, 6);

        let r3 = update(&r2, q(5), t + Duration::days(7));
        assert_eq!(r3.repetition_count, 3);
        // ease: 2.5 +0.1 (q=5) +0.0 (q=4) +0.1 (q=5) = 2.7
        assert!((r3.ease_factor - 2.7).abs() < 1e-9);
        assert_eq!(r3.interval_days, 16); // round(6 * 2.7)
    }

    #[test]
    fn failure_resets_streak_but_not_ease() {
        let t = now();
        let mut rec = fresh();
        rec.repetition_count = 4;
        rec.interval_days = 10;
        rec.ease_factor = 2.2;

        let next = update(&rec, q(1), t);
        assert_eq!(next.repetition_count, 0);
        assert_eq!(next.interval_days, 1);
        assert_eq!(next.lapses, 1);
        assert_eq!(next.ease_factor, 2.2);
        assert_eq!(next.due_at, t + Duration::days(1));
        assert_eq!(next.last_reviewed_at, Some(t));
    }

    #[test]
    fn ease_never_drops_below_floor() {
        let mut rec = fresh();
        let mut t = now();
        // Alternate the harshest passing grade with failures for a while.
        for i in 0..50 {
            let grade = if i % 2 == 0 { 3 } else { 0 };
            rec = update(&rec, q(grade), t);
            assert!(rec.ease_factor >= MIN_EASE_FACTOR - 1e-12);
            t += Duration::days(1);
        }
    }

    #[test]
    fn successful_intervals_are_non_decreasing() {
        let mut rec = fresh();
        let mut t = now();
        let mut prev_interval = 0u32;
        for grade in [5, 4, 3, 4, 5, 3, 4, 5] {
            rec = update(&rec, q(grade), t);
            assert!(rec.interval_days >= prev_interval);
            prev_interval = rec.interval_days;
            t += Duration::days(i64::from(rec.interval_days));
        }
    }

    #[test]
    fn interval_is_capped_at_a_year() {
        let mut rec = fresh();
        rec.repetition_count = 20;
        rec.interval_days = 300;
        rec.ease_factor = 2.5;

        let next = update(&rec, q(5), now());
        assert_eq!(next.interval_days, MAX_INTERVAL_DAYS);
    }

    #[test]
    fn due_at_is_derived_from_review_time() {
        let t = now();
        let r1 = update(&fresh(), q(4), t);
        assert_eq!(r1.due_at, t + Duration::days(i64::from(r1.interval_days)));
    }

    #[test]
    fn interval_rounds_half_away_from_zero() {
        // 5 days * 1.3 = 6.5 -> 7, not 6.
        assert_eq!(scale_interval(5, 1.3), 7);
        assert_eq!(scale_interval(6, 2.7), 16);
    }

    #[test]
    fn ease_adjustment_matches_formula() {
        assert!((next_ease(2.5, q(5)) - 2.6).abs() < 1e-9);
        assert!((next_ease(2.5, q(4)) - 2.5).abs() < 1e-9);
        assert!((next_ease(2.5, q(3)) - 2.36).abs() < 1e-9);
        // Clamped at the floor.
        assert_eq!(next_ease(1.31, q(3)), MIN_EASE_FACTOR);
    }

    #[test]
    fn default_ease_is_starting_point() {
        assert_eq!(fresh().ease_factor, DEFAULT_EASE_FACTOR);
    }

    #[test]
    fn retention_decays_and_clamps() {
        assert_eq!(estimated_retention(0, 2.5), 1.0);
        let r10 = estimated_retention(10, 2.5);
        let r30 = estimated_retention(30, 2.5);
        assert!(r10 > r30);
        assert!(r30 >= 0.0);
        // Easier cards are forgotten more slowly.
        assert!(estimated_retention(10, 2.5) > estimated_retention(10, 1.3));
    }
}
