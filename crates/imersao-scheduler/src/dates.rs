//! Date-only arithmetic and urgency buckets.
//!
//! The 7-day "soon" window is shared by the dashboard, the notification bell
//! and the weekly reminder rule. All three go through [`classify`].

use chrono::{DateTime, NaiveDate, TimeZone};
use serde::{Deserialize, Serialize};

use imersao_core::Task;

/// Upper bound (inclusive, in days) of the `soon` bucket.
pub const SOON_WINDOW_DAYS: i64 = 7;

/// Calendar date of an instant as seen on the wall clock of its own zone.
/// Convert to the user's zone first: the result never goes through UTC.
pub fn to_date_only<Tz: TimeZone>(value: &DateTime<Tz>) -> NaiveDate {
    value.date_naive()
}

/// Whole days from `b` to `a`; positive when `a` is after `b`.
pub fn days_between(a: NaiveDate, b: NaiveDate) -> i64 {
    (a - b).num_days()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    NoDue,
    Overdue,
    Today,
    Soon,
    Later,
}

pub fn classify(due_date: Option<NaiveDate>, today: NaiveDate) -> Bucket {
    let Some(due) = due_date else {
        return Bucket::NoDue;
    };
    match days_between(due, today) {
        d if d < 0 => Bucket::Overdue,
        0 => Bucket::Today,
        d if d <= SOON_WINDOW_DAYS => Bucket::Soon,
        _ => Bucket::Later,
    }
}

/// Open-task counts per bucket, as shown on the dashboard and the bell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketCounts {
    pub no_due: usize,
    pub overdue: usize,
    pub today: usize,
    pub soon: usize,
    pub later: usize,
}

impl BucketCounts {
    /// Tasks needing attention now (bell badge).
    pub fn attention(&self) -> usize {
        self.overdue + self.today + self.soon
    }

    fn bump(&mut self, bucket: Bucket) {
        match bucket {
            Bucket::NoDue => self.no_due += 1,
            Bucket::Overdue => self.overdue += 1,
            Bucket::Today => self.today += 1,
            Bucket::Soon => self.soon += 1,
            Bucket::Later => self.later += 1,
        }
    }
}

pub fn summarize(tasks: &[Task], today: NaiveDate) -> BucketCounts {
    tasks
        .iter()
        .filter(|t| t.is_open())
        .fold(BucketCounts::default(), |mut counts, t| {
            counts.bump(classify(t.due_date, today));
            counts
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, FixedOffset, Utc};
    use imersao_core::{Phase, TaskStatus};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_classify_boundaries() {
        let today = date(2026, 1, 10);
        let at = |diff: i64| classify(Some(today + Duration::days(diff)), today);
        assert_eq!(at(-1), Bucket::Overdue);
        assert_eq!(at(0), Bucket::Today);
        assert_eq!(at(1), Bucket::Soon);
        assert_eq!(at(7), Bucket::Soon);
        assert_eq!(at(8), Bucket::Later);
        assert_eq!(classify(None, today), Bucket::NoDue);
    }

    #[test]
    fn test_overdue_by_five_days() {
        let due = date(2026, 1, 5);
        let today = date(2026, 1, 10);
        assert_eq!(days_between(due, today), -5);
        assert_eq!(classify(Some(due), today), Bucket::Overdue);
    }

    #[test]
    fn test_classify_depends_only_on_diff() {
        let reference = date(2026, 6, 1);
        for today in [date(2025, 12, 28), date(2024, 2, 28), date(2026, 2, 27)] {
            for diff in -10..=10 {
                assert_eq!(
                    classify(Some(today + Duration::days(diff)), today),
                    classify(Some(reference + Duration::days(diff)), reference)
                );
            }
        }
    }

    #[test]
    fn test_to_date_only_uses_local_wall_clock() {
        // 01:30 UTC on the 11th is still the 10th in UTC-3.
        let utc = Utc.with_ymd_and_hms(2026, 1, 11, 1, 30, 0).unwrap();
        let brt = FixedOffset::west_opt(3 * 3600).unwrap();
        assert_eq!(to_date_only(&utc.with_timezone(&brt)), date(2026, 1, 10));
        assert_eq!(to_date_only(&utc), date(2026, 1, 11));
    }

    #[test]
    fn test_summarize_skips_done_tasks() {
        let today = date(2026, 1, 10);
        let mk = |due: Option<NaiveDate>, status: TaskStatus| {
            let mut t = Task::new("imm-1", Phase::Pre, "x");
            t.due_date = due;
            t.status = status;
            t
        };
        let tasks = vec![
            mk(Some(date(2026, 1, 9)), TaskStatus::Scheduled),
            mk(Some(date(2026, 1, 9)), TaskStatus::Done),
            mk(Some(today), TaskStatus::InProgress),
            mk(Some(date(2026, 1, 17)), TaskStatus::Scheduled),
            mk(Some(date(2026, 1, 18)), TaskStatus::Overdue),
            mk(None, TaskStatus::Scheduled),
        ];
        let counts = summarize(&tasks, today);
        assert_eq!(
            counts,
            BucketCounts { no_due: 1, overdue: 1, today: 1, soon: 1, later: 1 }
        );
        assert_eq!(counts.attention(), 3);
    }
}
