//! Risk and workload aggregation over open tasks.
//!
//! Risk uses a tighter "due soon" window (0..=3 days) than the 7-day `soon`
//! bucket. Workload ranks people lexicographically by overdue, due soon and
//! open counts; the dimensions are not blended into one score.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::fmt;

use chrono::NaiveDate;
use serde::Serialize;

use imersao_core::{Immersion, ImmersionId, Profile, ProfileId, Task};

use crate::dates::{Bucket, classify, days_between};

/// Inclusive day window counted as "due soon" for risk and workload.
pub const RISK_DUE_SOON_DAYS: i64 = 3;
/// An immersion starting within this many days adds the imminence weight.
pub const IMMINENT_START_DAYS: i64 = 7;

pub const WEIGHT_OVERDUE: u32 = 5;
pub const WEIGHT_DUE_SOON: u32 = 3;
pub const WEIGHT_ORPHAN: u32 = 2;
pub const WEIGHT_IMMINENT: u32 = 2;

pub const LEVEL_HIGH_MIN: u32 = 15;
pub const LEVEL_MEDIUM_MIN: u32 = 7;

/// Display label for tasks with no responsible.
pub const UNASSIGNED_LABEL: &str = "Sem responsável";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum RiskLevel {
    Baixo,
    #[serde(rename = "Médio")]
    Medio,
    Alto,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RiskLevel::Baixo => "Baixo",
            RiskLevel::Medio => "Médio",
            RiskLevel::Alto => "Alto",
        })
    }
}

/// Raw counts a risk score is computed from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RiskSignals {
    pub overdue: u32,
    pub due_soon: u32,
    pub orphan: u32,
    pub open: u32,
    pub starts_within_7_days: bool,
}

impl RiskSignals {
    fn add(&mut self, task: &Task, today: NaiveDate) {
        self.open += 1;
        if classify(task.due_date, today) == Bucket::Overdue {
            self.overdue += 1;
        }
        if is_due_soon(task.due_date, today) {
            self.due_soon += 1;
        }
        if task.responsible_id.is_none() {
            self.orphan += 1;
        }
    }
}

fn is_due_soon(due: Option<NaiveDate>, today: NaiveDate) -> bool {
    due.map(|d| days_between(d, today))
        .is_some_and(|diff| (0..=RISK_DUE_SOON_DAYS).contains(&diff))
}

pub fn risk_score(s: &RiskSignals) -> u32 {
    let imminent = if s.starts_within_7_days && s.open > 0 {
        WEIGHT_IMMINENT
    } else {
        0
    };
    s.overdue * WEIGHT_OVERDUE + s.due_soon * WEIGHT_DUE_SOON + s.orphan * WEIGHT_ORPHAN + imminent
}

pub fn risk_level(score: u32) -> RiskLevel {
    if score >= LEVEL_HIGH_MIN {
        RiskLevel::Alto
    } else if score >= LEVEL_MEDIUM_MIN {
        RiskLevel::Medio
    } else {
        RiskLevel::Baixo
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedImmersion {
    pub immersion_id: ImmersionId,
    pub name: String,
    pub start_date: Option<NaiveDate>,
    #[serde(flatten)]
    pub signals: RiskSignals,
    pub score: u32,
    pub level: RiskLevel,
}

/// Scores active immersions from their open tasks. Zero-score immersions are left out.
pub fn score_immersions(
    tasks: &[Task],
    immersions: &[Immersion],
    today: NaiveDate,
) -> Vec<RankedImmersion> {
    let mut by_immersion: HashMap<&str, Vec<&Task>> = HashMap::new();
    for task in tasks.iter().filter(|t| t.is_open()) {
        by_immersion.entry(task.immersion_id.as_str()).or_default().push(task);
    }

    let mut ranked: Vec<RankedImmersion> = immersions
        .iter()
        .filter(|imm| imm.status.is_active())
        .filter_map(|imm| {
            let mut signals = RiskSignals {
                starts_within_7_days: imm.start_date.is_some_and(|start| {
                    (0..=IMMINENT_START_DAYS).contains(&days_between(start, today))
                }),
                ..Default::default()
            };
            for task in by_immersion.get(imm.id.as_str()).into_iter().flatten() {
                signals.add(task, today);
            }
            let score = risk_score(&signals);
            (score > 0).then(|| RankedImmersion {
                immersion_id: imm.id.clone(),
                name: imm.name.clone(),
                start_date: imm.start_date,
                signals,
                score,
                level: risk_level(score),
            })
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then(b.signals.overdue.cmp(&a.signals.overdue))
            .then(a.start_date.is_none().cmp(&b.start_date.is_none()))
            .then(a.start_date.cmp(&b.start_date))
            .then(a.name.cmp(&b.name))
    });
    ranked
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedPerson {
    /// `None` is the unassigned bucket.
    pub responsible_id: Option<ProfileId>,
    pub name: String,
    pub overdue: u32,
    pub due_soon: u32,
    pub open: u32,
}

/// Per-person open workload, ranked by overdue, then due soon, then open.
pub fn score_workload(tasks: &[Task], profiles: &[Profile], today: NaiveDate) -> Vec<RankedPerson> {
    let names: HashMap<&str, &str> = profiles
        .iter()
        .map(|p| (p.id.as_str(), p.name.as_str()))
        .collect();

    let mut buckets: HashMap<Option<&str>, RiskSignals> = HashMap::new();
    for task in tasks.iter().filter(|t| t.is_open()) {
        buckets
            .entry(task.responsible_id.as_deref())
            .or_default()
            .add(task, today);
    }

    let mut ranked: Vec<RankedPerson> = buckets
        .into_iter()
        .map(|(id, s)| RankedPerson {
            responsible_id: id.map(str::to_string),
            name: match id {
                Some(id) => names.get(id).copied().unwrap_or(id).to_string(),
                None => UNASSIGNED_LABEL.to_string(),
            },
            overdue: s.overdue,
            due_soon: s.due_soon,
            open: s.open,
        })
        .collect();

    ranked.sort_by_key(|p| {
        (
            Reverse(p.overdue),
            Reverse(p.due_soon),
            Reverse(p.open),
            p.name.clone(),
        )
    });
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use imersao_core::{ImmersionStatus, Phase, TaskStatus};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 10).unwrap()
    }

    fn task(imm: &str, diff: Option<i64>, owner: Option<&str>) -> Task {
        let mut t = Task::new(imm, Phase::Pre, "t");
        t.due_date = diff.map(|d| today() + Duration::days(d));
        t.responsible_id = owner.map(str::to_string);
        t
    }

    fn immersion(id: &str, starts_in: i64) -> Immersion {
        let start = today() + Duration::days(starts_in);
        let mut imm = Immersion::new(id, start, start + Duration::days(3));
        imm.id = id.to_string();
        imm
    }

    #[test]
    fn test_score_and_level_example() {
        let mut tasks: Vec<Task> = (0..6).map(|_| task("imm-a", Some(-2), Some("ana"))).collect();
        tasks.push(task("imm-a", Some(1), Some("ana")));
        tasks.push(task("imm-a", Some(3), Some("ana")));
        tasks.push(task("imm-a", Some(20), None));

        let ranked = score_immersions(&tasks, &[immersion("imm-a", 30)], today());
        assert_eq!(ranked.len(), 1);
        let r = &ranked[0];
        assert_eq!((r.signals.overdue, r.signals.due_soon, r.signals.orphan), (6, 2, 1));
        assert!(!r.signals.starts_within_7_days);
        assert_eq!(r.score, 38);
        assert_eq!(r.level, RiskLevel::Alto);
    }

    #[test]
    fn test_level_thresholds() {
        assert_eq!(risk_level(0), RiskLevel::Baixo);
        assert_eq!(risk_level(6), RiskLevel::Baixo);
        assert_eq!(risk_level(7), RiskLevel::Medio);
        assert_eq!(risk_level(14), RiskLevel::Medio);
        assert_eq!(risk_level(15), RiskLevel::Alto);
    }

    #[test]
    fn test_identical_inputs_identical_scores() {
        let tasks = vec![
            task("imm-a", Some(-1), Some("ana")),
            task("imm-a", Some(2), None),
            task("imm-b", Some(-1), Some("bia")),
            task("imm-b", Some(2), None),
        ];
        let immersions = [immersion("imm-a", 5), immersion("imm-b", 5)];
        let ranked = score_immersions(&tasks, &immersions, today());
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].score, ranked[1].score);
        assert_eq!(ranked[0].level, ranked[1].level);
        // 5 + 3 + 2 + imminent 2
        assert_eq!(ranked[0].score, 12);
    }

    #[test]
    fn test_risk_window_is_three_days() {
        let tasks = vec![task("imm-a", Some(4), Some("ana")), task("imm-a", Some(0), Some("ana"))];
        let ranked = score_immersions(&tasks, &[immersion("imm-a", 30)], today());
        assert_eq!(ranked[0].signals.due_soon, 1);
    }

    #[test]
    fn test_zero_score_and_inactive_excluded() {
        let mut done = task("imm-a", Some(-3), None);
        done.status = TaskStatus::Done;
        let calm = task("imm-b", Some(20), Some("ana"));
        let mut cancelled = immersion("imm-c", 2);
        cancelled.status = ImmersionStatus::Cancelled;
        let tasks = vec![done, calm, task("imm-c", Some(-1), None)];

        let ranked = score_immersions(
            &tasks,
            &[immersion("imm-a", 30), immersion("imm-b", 30), cancelled],
            today(),
        );
        assert!(ranked.is_empty());
    }

    #[test]
    fn test_imminent_start_needs_open_tasks() {
        let ranked = score_immersions(&[], &[immersion("imm-a", 2)], today());
        assert!(ranked.is_empty());
        let tasks = [task("imm-a", Some(30), Some("ana"))];
        let ranked = score_immersions(&tasks, &[immersion("imm-a", 2)], today());
        assert_eq!(ranked[0].score, WEIGHT_IMMINENT);
    }

    #[test]
    fn test_workload_lexicographic_order() {
        let profiles = vec![
            Profile { id: "ana".into(), name: "Ana".into(), email: None },
            Profile { id: "bia".into(), name: "Bia".into(), email: None },
            Profile { id: "caio".into(), name: "Caio".into(), email: None },
        ];
        let mut tasks = vec![
            // ana: 1 overdue, 0 soon, 5 open
            task("i", Some(-1), Some("ana")),
            // bia: 1 overdue, 1 soon, 2 open
            task("i", Some(-1), Some("bia")),
            task("i", Some(1), Some("bia")),
            // caio: 0 overdue, 3 soon
            task("i", Some(1), Some("caio")),
            task("i", Some(2), Some("caio")),
            task("i", Some(3), Some("caio")),
            // unassigned: 2 overdue
            task("i", Some(-5), None),
            task("i", Some(-4), None),
        ];
        for _ in 0..4 {
            tasks.push(task("i", Some(30), Some("ana")));
        }

        let ranked = score_workload(&tasks, &profiles, today());
        let order: Vec<&str> = ranked.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(order, vec![UNASSIGNED_LABEL, "Bia", "Ana", "Caio"]);
        assert_eq!(ranked[0].responsible_id, None);
        assert_eq!(ranked[2].open, 5);
    }

    #[test]
    fn test_workload_unknown_profile_uses_id() {
        let ranked = score_workload(&[task("i", Some(-1), Some("ghost"))], &[], today());
        assert_eq!(ranked[0].name, "ghost");
    }
}
