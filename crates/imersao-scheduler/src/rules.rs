//! Notification rules: cadence gate, per-rule options and built-in defaults.

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc, Weekday};

use imersao_core::{Cadence, NotificationRule, RuleKey};

/// Overdue tasks an immersion must exceed before the risk rule reports it.
pub const DEFAULT_RISK_THRESHOLD: i64 = 5;

/// Day the weekly cadence fires on when the rule does not name one.
pub const DEFAULT_WEEKLY_DAY: Weekday = Weekday::Mon;

/// Whether a rule is eligible at `now` (already in the user's zone).
/// `force` bypasses the gate for manual re-runs.
pub fn should_run<Tz: TimeZone>(rule: &NotificationRule, now: &DateTime<Tz>, force: bool) -> bool {
    if force {
        return true;
    }
    match rule.cadence {
        Cadence::Event | Cadence::Daily => true,
        Cadence::Weekly => now.weekday() == weekly_day(rule),
    }
}

/// `weekday` option (`"mon"`, `"friday"`, …), defaulting to Monday.
pub fn weekly_day(rule: &NotificationRule) -> Weekday {
    rule.config_str("weekday")
        .and_then(|s| s.trim().parse::<Weekday>().ok())
        .unwrap_or(DEFAULT_WEEKLY_DAY)
}

/// Risk rule: an immersion is reported when its overdue count exceeds this.
pub fn risk_threshold(rule: &NotificationRule) -> i64 {
    rule.config_i64("min_overdue").unwrap_or(DEFAULT_RISK_THRESHOLD)
}

/// Per-recipient minimum number of items before a digest is worth sending.
pub fn min_items(rule: &NotificationRule) -> usize {
    match rule.rule_key {
        RuleKey::TaskOverdueDaily => rule.config_i64("min_overdue").unwrap_or(1).max(1) as usize,
        _ => 1,
    }
}

/// `now` minus `minutes`, or `None` when the span leaves chrono's range.
fn minutes_before(now: DateTime<Utc>, minutes: i64) -> Option<DateTime<Utc>> {
    Duration::try_minutes(minutes).and_then(|span| now.checked_sub_signed(span))
}

/// Event rule: earliest creation time that still counts as new, or `None`
/// when the window reaches past representable time.
pub fn event_since(rule: &NotificationRule, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let minutes = rule
        .config_i64("window_minutes")
        .unwrap_or(rule.lookback_minutes)
        .max(0);
    minutes_before(now, minutes)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupWindow {
    /// Lookback of zero or less.
    Off,
    /// Entries strictly after this instant suppress a send.
    Since(DateTime<Utc>),
    /// Lookback too large to represent; the whole log counts.
    Unbounded,
}

pub fn dedup_window(rule: &NotificationRule, now: DateTime<Utc>) -> DedupWindow {
    if rule.lookback_minutes <= 0 {
        return DedupWindow::Off;
    }
    minutes_before(now, rule.lookback_minutes).map_or(DedupWindow::Unbounded, DedupWindow::Since)
}

/// The four rules seeded into a fresh store.
pub fn default_rules() -> Vec<NotificationRule> {
    let mut overdue = NotificationRule::new(RuleKey::TaskOverdueDaily, Cadence::Daily, 1440);
    overdue.config.insert("min_overdue".into(), serde_json::json!(1));

    let mut due_soon = NotificationRule::new(RuleKey::TaskDueSoonWeekly, Cadence::Weekly, 6 * 1440);
    due_soon.config.insert("weekday".into(), serde_json::json!("mon"));

    let mut risk = NotificationRule::new(RuleKey::ImmersionRiskDaily, Cadence::Daily, 1440);
    risk.config
        .insert("min_overdue".into(), serde_json::json!(DEFAULT_RISK_THRESHOLD));

    vec![
        NotificationRule::new(RuleKey::ImmersionCreated, Cadence::Event, 1440),
        overdue,
        due_soon,
        risk,
    ]
}
