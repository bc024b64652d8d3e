//! Domain model: immersions, tasks, templates, profiles and notification records.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::EngineError;

pub type ImmersionId = String;
pub type TaskId = String;
pub type TemplateId = String;
pub type ProfileId = String;

/// Generates an identifier with a readable prefix (`task-…`, `imm-…`).
pub fn new_id(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4().simple())
}

macro_rules! string_enum {
    ($name:ident, $label:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = EngineError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim() {
                    $(t if t.eq_ignore_ascii_case($text) => Ok($name::$variant),)+
                    other => Err(EngineError::Validation(format!(
                        "unknown {}: '{other}'",
                        $label
                    ))),
                }
            }
        }
    };
}

/// Lifecycle phase of a task relative to the event itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Phase {
    Pre,
    During,
    Post,
}

string_enum!(Phase, "phase", { Pre => "PRE", During => "DURING", Post => "POST" });

/// Which immersion date a template offset is counted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DueBasis {
    Start,
    End,
}

string_enum!(DueBasis, "due basis", { Start => "start", End => "end" });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImmersionStatus {
    Planning,
    InProgress,
    Completed,
    Cancelled,
}

string_enum!(ImmersionStatus, "immersion status", {
    Planning => "planning",
    InProgress => "in_progress",
    Completed => "completed",
    Cancelled => "cancelled",
});

impl ImmersionStatus {
    /// Completed and cancelled immersions no longer generate work.
    pub fn is_active(&self) -> bool {
        matches!(self, ImmersionStatus::Planning | ImmersionStatus::InProgress)
    }
}

/// Stored task status. Informational only: urgency is always derived from the due date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Scheduled,
    InProgress,
    Done,
    Overdue,
}

string_enum!(TaskStatus, "task status", {
    Scheduled => "scheduled",
    InProgress => "in_progress",
    Done => "done",
    Overdue => "overdue",
});

impl TaskStatus {
    pub fn is_open(&self) -> bool {
        *self != TaskStatus::Done
    }
}

/// A scheduled multi-day event being planned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Immersion {
    pub id: ImmersionId,
    pub name: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub status: ImmersionStatus,
    pub consultant_id: Option<ProfileId>,
    pub designer_id: Option<ProfileId>,
    /// Free-text consultant name as typed in the planning screen.
    pub consultant_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Immersion {
    pub fn new(name: &str, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            id: new_id("imm"),
            name: name.to_string(),
            start_date: Some(start_date),
            end_date: Some(end_date),
            status: ImmersionStatus::Planning,
            consultant_id: None,
            designer_id: None,
            consultant_name: None,
            created_at: Utc::now(),
        }
    }
}

/// A reusable task blueprint, positioned relative to an immersion date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTemplateItem {
    pub id: String,
    pub template_id: TemplateId,
    pub phase: Phase,
    pub title: String,
    pub due_basis: DueBasis,
    pub offset_days: i64,
    pub sort_order: i32,
    /// Kept for the template editor; task generation does not read it.
    pub responsible_id: Option<ProfileId>,
}

/// A concrete unit of work attached to exactly one immersion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub immersion_id: ImmersionId,
    pub phase: Phase,
    pub title: String,
    pub responsible_id: Option<ProfileId>,
    pub due_date: Option<NaiveDate>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(immersion_id: &str, phase: Phase, title: &str) -> Self {
        let now = Utc::now();
        Self {
            id: new_id("task"),
            immersion_id: immersion_id.to_string(),
            phase,
            title: title.to_string(),
            responsible_id: None,
            due_date: None,
            status: TaskStatus::Scheduled,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }
}

/// A person who can own tasks and receive reminders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: ProfileId,
    pub name: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKey {
    ImmersionCreated,
    TaskOverdueDaily,
    TaskDueSoonWeekly,
    ImmersionRiskDaily,
}

string_enum!(RuleKey, "rule key", {
    ImmersionCreated => "immersion_created",
    TaskOverdueDaily => "task_overdue_daily",
    TaskDueSoonWeekly => "task_due_soon_weekly",
    ImmersionRiskDaily => "immersion_risk_daily",
});

impl RuleKey {
    pub const ALL: [RuleKey; 4] = [
        RuleKey::ImmersionCreated,
        RuleKey::TaskOverdueDaily,
        RuleKey::TaskDueSoonWeekly,
        RuleKey::ImmersionRiskDaily,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    Event,
    Daily,
    Weekly,
}

string_enum!(Cadence, "cadence", { Event => "event", Daily => "daily", Weekly => "weekly" });

/// A reminder rule as configured by an administrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRule {
    pub rule_key: RuleKey,
    pub is_enabled: bool,
    pub cadence: Cadence,
    /// Minimum minutes between two notifications of this rule to one recipient.
    pub lookback_minutes: i64,
    /// Free-form options, e.g. `{"min_overdue": 5, "weekday": "mon"}`.
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
}

impl NotificationRule {
    pub fn new(rule_key: RuleKey, cadence: Cadence, lookback_minutes: i64) -> Self {
        Self {
            rule_key,
            is_enabled: true,
            cadence,
            lookback_minutes,
            config: serde_json::Map::new(),
        }
    }

    /// Integer option, accepting numbers or numeric strings.
    pub fn config_i64(&self, key: &str) -> Option<i64> {
        match self.config.get(key)? {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(|v| v.as_str())
    }
}

/// Subject/intro/footer copy for a rule, with `{{placeholder}}` tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationTemplate {
    pub rule_key: RuleKey,
    pub subject: String,
    pub intro: String,
    pub footer: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogMode {
    Preview,
    Send,
}

string_enum!(LogMode, "log mode", { Preview => "preview", Send => "send" });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Ok,
    Fail,
}

string_enum!(LogStatus, "log status", { Ok => "ok", Fail => "fail" });

/// Append-only audit record; doubles as the dedup index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationLogEntry {
    pub rule_key: RuleKey,
    pub to_email: String,
    pub item_count: usize,
    pub mode: LogMode,
    pub status: LogStatus,
    pub created_at: DateTime<Utc>,
}

/// A fully rendered outbound email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
    pub reply_to: Option<String>,
}

/// Filter for open-task queries. Date bounds are inclusive unless noted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskFilter {
    pub immersion_id: Option<ImmersionId>,
    pub responsible_id: Option<ProfileId>,
    /// Exclusive upper bound.
    pub due_before: Option<NaiveDate>,
    pub due_from: Option<NaiveDate>,
    pub due_to: Option<NaiveDate>,
}

impl TaskFilter {
    pub fn matches(&self, task: &Task) -> bool {
        if !task.is_open() {
            return false;
        }
        if let Some(id) = &self.immersion_id
            && &task.immersion_id != id
        {
            return false;
        }
        if let Some(id) = &self.responsible_id
            && task.responsible_id.as_ref() != Some(id)
        {
            return false;
        }
        let bounded = self.due_before.is_some() || self.due_from.is_some() || self.due_to.is_some();
        match task.due_date {
            None => !bounded,
            Some(due) => {
                self.due_before.is_none_or(|b| due < b)
                    && self.due_from.is_none_or(|f| due >= f)
                    && self.due_to.is_none_or(|t| due <= t)
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImmersionFilter {
    pub statuses: Vec<ImmersionStatus>,
    /// Exclusive lower bound on `created_at`.
    pub created_after: Option<DateTime<Utc>>,
}

impl ImmersionFilter {
    pub fn active() -> Self {
        Self {
            statuses: vec![ImmersionStatus::Planning, ImmersionStatus::InProgress],
            created_after: None,
        }
    }

    pub fn matches(&self, immersion: &Immersion) -> bool {
        (self.statuses.is_empty() || self.statuses.contains(&immersion.status))
            && self.created_after.is_none_or(|t| immersion.created_at > t)
    }
}
