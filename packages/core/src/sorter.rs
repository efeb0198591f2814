//! Deterministic ordering of jobs for selection.

use std::cmp::Ordering;

use crate::JobRecord;

/// Orders jobs before a synchronization pass selects from them.
pub trait JobSorter: Send + Sync + 'static {
    fn sort(&self, jobs: Vec<JobRecord>) -> Vec<JobRecord>;
}

/// Explicit `order` first (ascending), then unordered jobs, with `queued_at`
/// and finally `id` breaking ties.
///
/// Orders closer than one `f32` epsilon compare equal. They are bucketed
/// rather than compared pairwise so the comparison stays transitive.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultJobSorter;

impl DefaultJobSorter {
    pub fn compare(a: &JobRecord, b: &JobRecord) -> Ordering {
        let by_order = match (order_bucket(a), order_bucket(b)) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_order
            .then_with(|| a.queued_at.cmp(&b.queued_at))
            .then_with(|| a.id.cmp(&b.id))
    }
}

impl JobSorter for DefaultJobSorter {
    fn sort(&self, mut jobs: Vec<JobRecord>) -> Vec<JobRecord> {
        jobs.sort_by(Self::compare);
        jobs
    }
}

/// Buckets stay `f64`: the full `f32` range divided by epsilon fits without
/// saturating. Adding `0.0` folds `-0.0` into `0.0` for `total_cmp`.
fn order_bucket(job: &JobRecord) -> Option<f64> {
    // NaN has no position; treat it like a missing order.
    job.order
        .filter(|order| !order.is_nan())
        .map(|order| (f64::from(order) / f64::from(f32::EPSILON)).round() + 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::JobId;
    use chrono::{Duration, TimeZone, Utc};

    fn job(id: &str, order: Option<f32>, offset_secs: i64) -> JobRecord {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut job = JobRecord::new(JobId::new(id).unwrap(), "t", "q", vec![])
            .with_queued_at(base + Duration::seconds(offset_secs));
        job.order = order;
        job
    }

    fn ids(jobs: &[JobRecord]) -> Vec<&str> {
        jobs.iter().map(|j| j.id.as_str()).collect()
    }

    #[test]
    fn explicit_order_beats_queue_time() {
        let sorted = DefaultJobSorter.sort(vec![
            job("late-unordered", None, 0),
            job("two", Some(2.0), 30),
            job("one", Some(1.0), 20),
            job("early-unordered", None, -10),
        ]);
        assert_eq!(ids(&sorted), ["one", "two", "early-unordered", "late-unordered"]);
    }

    #[test]
    fn equal_orders_fall_back_to_queue_time() {
        let sorted = DefaultJobSorter.sort(vec![
            job("b", Some(1.0), 5),
            job("a", Some(1.0 + f32::EPSILON / 4.0), 1),
        ]);
        assert_eq!(ids(&sorted), ["a", "b"]);
    }

    #[test]
    fn large_and_infinite_orders_stay_ordered() {
        let sorted = DefaultJobSorter.sort(vec![
            job("big", Some(3.0e12), 0),
            job("small", Some(2.0e12), 10),
            job("top", Some(f32::INFINITY), -20),
            job("bottom", Some(f32::NEG_INFINITY), 20),
            job("max", Some(f32::MAX), -10),
        ]);
        assert_eq!(ids(&sorted), ["bottom", "small", "big", "max", "top"]);
    }

    #[test]
    fn signed_zero_and_tiny_orders_share_a_bucket() {
        let sorted = DefaultJobSorter.sort(vec![
            job("negative", Some(-0.0), 5),
            job("positive", Some(1.0e-12), 1),
        ]);
        assert_eq!(ids(&sorted), ["positive", "negative"]);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_order() -> impl Strategy<Value = f32> {
            use prop::num::f32::{INFINITE, NEGATIVE, NORMAL, POSITIVE, SUBNORMAL, ZERO};
            prop_oneof![
                -1000.0f32..1000.0f32,
                POSITIVE | NEGATIVE | NORMAL | SUBNORMAL | ZERO | INFINITE,
            ]
        }

        fn arb_jobs() -> impl Strategy<Value = Vec<JobRecord>> {
            prop::collection::vec(
                (prop::option::of(arb_order()), 0i64..10_000),
                0..40,
            )
            .prop_map(|specs| {
                specs
                    .into_iter()
                    .enumerate()
                    .map(|(i, (order, offset))| job(&format!("job-{i:03}"), order, offset))
                    .collect()
            })
        }

        proptest! {
            #![proptest_config(ProptestConfig { cases: 128, ..ProptestConfig::default() })]

            #[test]
            fn sorting_is_idempotent(jobs in arb_jobs()) {
                let once = DefaultJobSorter.sort(jobs);
                let twice = DefaultJobSorter.sort(once.clone());
                prop_assert_eq!(ids(&once), ids(&twice));
            }

            #[test]
            fn ordered_jobs_precede_unordered_ascending(jobs in arb_jobs()) {
                let sorted = DefaultJobSorter.sort(jobs);
                let first_unordered = sorted.iter().position(|j| j.order.is_none()).unwrap_or(sorted.len());
                prop_assert!(sorted[first_unordered..].iter().all(|j| j.order.is_none()));
                for pair in sorted[..first_unordered].windows(2) {
                    let (a, b) = (pair[0].order.unwrap_or_default(), pair[1].order.unwrap_or_default());
                    prop_assert!(a <= b + f32::EPSILON);
                }
                for pair in sorted[first_unordered..].windows(2) {
                    prop_assert!(pair[0].queued_at <= pair[1].queued_at);
                }
            }
        }
    }
}
