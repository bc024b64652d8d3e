//! Notification cycle: evaluates rules, groups candidates per recipient,
//! renders digests and dispatches them with lookback deduplication.
//!
//! ```text
//! for rule (enabled):
//!   cadence gate ──✗──► Skipped(gate)
//!   candidates → groups per recipient (sorted by email)
//!     no email        ──► Skipped(no recipient)
//!     logged recently ──► Skipped(dedup)   (send runs ignore preview entries)
//!     render → preview ──► Previewed  (log: preview/ok)
//!            → send    ──► Sent | Failed (log: send/ok|fail)
//! ```
//!
//! One cycle must run at a time; the caller guarantees it. Each log entry is
//! written before the next group is examined, so later groups in the same
//! cycle observe it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Offset, Utc};
use serde::Serialize;

use imersao_core::{
    Cadence, EngineError, Immersion, ImmersionFilter, LogMode, LogStatus, MailMessage,
    MailTransport, NotificationLogEntry, NotificationRule, Profile, ProfileId, Result, RuleKey,
    Task, TaskFilter, WallClock,
};

use crate::console::Collaborators;
use crate::dates::{Bucket, SOON_WINDOW_DAYS, classify, to_date_only};
use crate::render::{DigestLine, RenderVars, default_template, format_date, render_message};
use crate::rules::{DedupWindow, dedup_window, event_since, min_items, risk_threshold, should_run};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleOptions {
    /// Bypass the cadence gate.
    pub force: bool,
    /// Render and log as `preview` without sending.
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    SkippedGate,
    SkippedDedup,
    SkippedNoRecipient,
    SkippedBelowMinimum,
    Previewed,
    Sent,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleAction {
    pub rule_key: RuleKey,
    pub recipient: Option<String>,
    pub to_email: Option<String>,
    pub item_count: usize,
    pub outcome: ActionOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate result of one cycle with a bounded sample of actions.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub sent: usize,
    pub failed: usize,
    pub previewed: usize,
    pub skipped: usize,
    pub actions: Vec<CycleAction>,
    /// Actions beyond the sample bound that were counted but not listed.
    pub actions_truncated: usize,
}

impl CycleReport {
    fn record(&mut self, action: CycleAction, max_actions: usize) {
        match action.outcome {
            ActionOutcome::Sent => self.sent += 1,
            ActionOutcome::Failed => self.failed += 1,
            ActionOutcome::Previewed => self.previewed += 1,
            ActionOutcome::SkippedGate
            | ActionOutcome::SkippedDedup
            | ActionOutcome::SkippedNoRecipient
            | ActionOutcome::SkippedBelowMinimum => self.skipped += 1,
        }
        if self.actions.len() < max_actions {
            self.actions.push(action);
        } else {
            self.actions_truncated += 1;
        }
    }
}

/// Engine settings that do not come from a collaborator.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub app_name: String,
    /// Zone "today" and the weekly gate are evaluated in, resolved per cycle.
    pub timezone: WallClock,
    pub max_actions: usize,
    pub from: String,
    pub reply_to: Option<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            app_name: "Imersões".into(),
            timezone: WallClock::Fixed(Utc.fix()),
            max_actions: 50,
            from: String::new(),
            reply_to: None,
        }
    }
}

/// Everything one recipient receives for one rule.
#[derive(Debug, Clone)]
struct RecipientGroup {
    name: String,
    email: Option<String>,
    lines: Vec<DigestLine>,
    immersions: Vec<String>,
}

pub struct NotificationScheduler {
    stores: Collaborators,
    mailer: Option<Arc<dyn MailTransport>>,
    settings: EngineSettings,
}

impl NotificationScheduler {
    pub fn new(
        stores: Collaborators,
        mailer: Option<Arc<dyn MailTransport>>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            stores,
            mailer,
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Runs every stored rule (built-in defaults when the store has none).
    pub async fn run_notification_cycle(
        &self,
        now: DateTime<Utc>,
        options: CycleOptions,
    ) -> Result<CycleReport> {
        let mut rules = self.stores.rules.list_rules().await?;
        if rules.is_empty() {
            rules = crate::rules::default_rules();
        }
        self.run_cycle(now, &rules, options).await
    }

    pub async fn run_cycle(
        &self,
        now: DateTime<Utc>,
        rules: &[NotificationRule],
        options: CycleOptions,
    ) -> Result<CycleReport> {
        self.ensure_can_send(options)?;

        let local_now = now.with_timezone(&self.settings.timezone.offset_at(now));
        let today = to_date_only(&local_now);
        let mut report = CycleReport::default();

        tracing::info!(
            "⏰ Notification cycle at {} (today {}, force={}, dry_run={})",
            now.to_rfc3339(),
            today,
            options.force,
            options.dry_run
        );

        for rule in rules {
            if !rule.is_enabled {
                tracing::debug!("Rule {} disabled", rule.rule_key);
                continue;
            }
            if !should_run(rule, &local_now, options.force) {
                tracing::debug!("Rule {} gated by {} cadence", rule.rule_key, rule.cadence);
                report.record(
                    CycleAction {
                        rule_key: rule.rule_key,
                        recipient: None,
                        to_email: None,
                        item_count: 0,
                        outcome: ActionOutcome::SkippedGate,
                        error: None,
                    },
                    self.settings.max_actions,
                );
                continue;
            }

            let groups = match self.collect_groups(rule, now, today).await {
                Ok(groups) => groups,
                Err(e) => {
                    tracing::warn!("⚠️ Candidate selection failed for {}: {e}", rule.rule_key);
                    report.record(
                        CycleAction {
                            rule_key: rule.rule_key,
                            recipient: None,
                            to_email: None,
                            item_count: 0,
                            outcome: ActionOutcome::Failed,
                            error: Some(e.to_string()),
                        },
                        self.settings.max_actions,
                    );
                    continue;
                }
            };

            for group in groups {
                let action = self.process_group(rule, group, now, today, options).await;
                report.record(action, self.settings.max_actions);
            }
        }

        tracing::info!(
            "📣 Cycle done: {} sent, {} failed, {} previewed, {} skipped",
            report.sent,
            report.failed,
            report.previewed,
            report.skipped
        );
        Ok(report)
    }

    /// Runs the `immersion_created` rule for one immersion right after it is created.
    pub async fn notify_immersion_created(
        &self,
        immersion_id: &str,
        now: DateTime<Utc>,
        options: CycleOptions,
    ) -> Result<CycleReport> {
        self.ensure_can_send(options)?;

        let immersion = self
            .stores
            .immersions
            .get_immersion(immersion_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("immersion {immersion_id}")))?;

        let rule = self
            .stores
            .rules
            .list_rules()
            .await?
            .into_iter()
            .find(|r| r.rule_key == RuleKey::ImmersionCreated)
            .unwrap_or_else(|| {
                NotificationRule::new(RuleKey::ImmersionCreated, Cadence::Event, 1440)
            });

        let mut report = CycleReport::default();
        if !rule.is_enabled {
            return Ok(report);
        }

        let today = to_date_only(&now.with_timezone(&self.settings.timezone.offset_at(now)));
        for group in self.created_groups(&[immersion]).await? {
            let action = self.process_group(&rule, group, now, today, options).await;
            report.record(action, self.settings.max_actions);
        }
        Ok(report)
    }

    fn ensure_can_send(&self, options: CycleOptions) -> Result<()> {
        if !options.dry_run && self.mailer.is_none() {
            return Err(EngineError::Configuration(
                "no mail transport configured; run in preview mode or configure SMTP".into(),
            ));
        }
        Ok(())
    }

    // ─── Candidate selection ──────────────────────────────────

    async fn collect_groups(
        &self,
        rule: &NotificationRule,
        now: DateTime<Utc>,
        today: NaiveDate,
    ) -> Result<Vec<RecipientGroup>> {
        match rule.rule_key {
            RuleKey::TaskOverdueDaily => {
                let filter = TaskFilter {
                    due_before: Some(today),
                    ..Default::default()
                };
                self.task_groups(&filter).await
            }
            RuleKey::TaskDueSoonWeekly => {
                let filter = TaskFilter {
                    due_from: Some(today),
                    due_to: Some(today + Duration::days(SOON_WINDOW_DAYS)),
                    ..Default::default()
                };
                self.task_groups(&filter).await
            }
            RuleKey::ImmersionRiskDaily => self.risk_groups(risk_threshold(rule), today).await,
            RuleKey::ImmersionCreated => {
                let filter = ImmersionFilter {
                    created_after: event_since(rule, now),
                    ..ImmersionFilter::active()
                };
                let created = self.stores.immersions.list_immersions(&filter).await?;
                self.created_groups(&created).await
            }
        }
    }

    async fn immersions_by_id(&self) -> Result<HashMap<String, Immersion>> {
        Ok(self
            .stores
            .immersions
            .list_immersions(&ImmersionFilter::default())
            .await?
            .into_iter()
            .map(|i| (i.id.clone(), i))
            .collect())
    }

    async fn profiles_by_id(&self, ids: Vec<ProfileId>) -> Result<HashMap<ProfileId, Profile>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        Ok(self
            .stores
            .profiles
            .get_profiles_by_ids(&ids)
            .await?
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect())
    }

    /// Open tasks matching `filter`, grouped by responsible.
    async fn task_groups(&self, filter: &TaskFilter) -> Result<Vec<RecipientGroup>> {
        let tasks = self.stores.tasks.list_open_tasks(filter).await?;
        let immersions = self.immersions_by_id().await?;

        let mut by_owner: BTreeMap<Option<ProfileId>, Vec<Task>> = BTreeMap::new();
        for task in tasks {
            by_owner.entry(task.responsible_id.clone()).or_default().push(task);
        }
        let profiles = self
            .profiles_by_id(by_owner.keys().flatten().cloned().collect())
            .await?;

        let mut groups = Vec::new();
        for (owner, mut tasks) in by_owner {
            tasks.sort_by(|a, b| a.due_date.cmp(&b.due_date).then(a.title.cmp(&b.title)));
            let profile = owner.as_ref().and_then(|id| profiles.get(id));
            let mut seen = HashSet::new();
            let mut group = RecipientGroup {
                name: match (profile, &owner) {
                    (Some(p), _) => p.name.clone(),
                    (None, Some(id)) => id.clone(),
                    (None, None) => crate::risk::UNASSIGNED_LABEL.to_string(),
                },
                email: profile.and_then(|p| p.email.clone()),
                lines: Vec::with_capacity(tasks.len()),
                immersions: Vec::new(),
            };
            for task in tasks {
                let imm_name = immersions
                    .get(&task.immersion_id)
                    .map(|i| i.name.clone())
                    .unwrap_or_default();
                if !imm_name.is_empty() && seen.insert(imm_name.clone()) {
                    group.immersions.push(imm_name.clone());
                }
                group.lines.push(DigestLine {
                    title: task.title,
                    immersion: imm_name,
                    due_date: task.due_date,
                    detail: None,
                });
            }
            groups.push(group);
        }
        Ok(sort_groups(groups))
    }

    /// Immersions whose overdue count exceeds `threshold`, grouped by consultant.
    async fn risk_groups(&self, threshold: i64, today: NaiveDate) -> Result<Vec<RecipientGroup>> {
        let tasks = self.stores.tasks.list_open_tasks(&TaskFilter::default()).await?;
        let mut overdue: HashMap<&str, i64> = HashMap::new();
        for task in &tasks {
            if classify(task.due_date, today) == Bucket::Overdue {
                *overdue.entry(task.immersion_id.as_str()).or_default() += 1;
            }
        }

        let immersions = self.stores.immersions.list_immersions(&ImmersionFilter::active()).await?;
        let mut at_risk: Vec<(&Immersion, i64)> = immersions
            .iter()
            .filter_map(|imm| {
                let count = overdue.get(imm.id.as_str()).copied().unwrap_or(0);
                (count > threshold).then_some((imm, count))
            })
            .collect();
        at_risk.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.name.cmp(&b.0.name)));

        let mut by_recipient: BTreeMap<String, RecipientGroup> = BTreeMap::new();
        for (imm, count) in at_risk {
            let consultant = self.resolve_consultant(imm).await?;
            let (key, name, email) = match &consultant {
                Some(p) => (p.id.clone(), p.name.clone(), p.email.clone()),
                None => (
                    format!("unresolved:{}", imm.id),
                    imm.consultant_name.clone().unwrap_or_default(),
                    None,
                ),
            };
            let group = by_recipient.entry(key).or_insert_with(|| RecipientGroup {
                name,
                email,
                lines: Vec::new(),
                immersions: Vec::new(),
            });
            group.immersions.push(imm.name.clone());
            group.lines.push(DigestLine {
                title: imm.name.clone(),
                immersion: String::new(),
                due_date: imm.start_date,
                detail: Some(format!("{count} tarefa(s) atrasada(s)")),
            });
        }
        Ok(sort_groups(by_recipient.into_values().collect()))
    }

    /// Consultant by explicit id first, then by case-insensitive name.
    async fn resolve_consultant(&self, immersion: &Immersion) -> Result<Option<Profile>> {
        if let Some(id) = &immersion.consultant_id {
            let found = self
                .stores
                .profiles
                .get_profiles_by_ids(std::slice::from_ref(id))
                .await?
                .into_iter()
                .next();
            if found.is_some() {
                return Ok(found);
            }
        }
        match immersion.consultant_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => {
                self.stores.profiles.find_profile_by_name_ci(name).await
            }
            _ => Ok(None),
        }
    }

    /// Consultant and designer of each immersion, one group per person.
    async fn created_groups(&self, immersions: &[Immersion]) -> Result<Vec<RecipientGroup>> {
        let ids: Vec<ProfileId> = immersions
            .iter()
            .flat_map(|i| [i.consultant_id.clone(), i.designer_id.clone()])
            .flatten()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let profiles = self.profiles_by_id(ids).await?;

        let mut by_recipient: BTreeMap<ProfileId, RecipientGroup> = BTreeMap::new();
        for imm in immersions {
            let mut members = vec![imm.consultant_id.as_ref(), imm.designer_id.as_ref()];
            members.dedup();
            for id in members.into_iter().flatten() {
                let profile = profiles.get(id);
                let group = by_recipient.entry(id.clone()).or_insert_with(|| RecipientGroup {
                    name: profile.map(|p| p.name.clone()).unwrap_or_else(|| id.clone()),
                    email: profile.and_then(|p| p.email.clone()),
                    lines: Vec::new(),
                    immersions: Vec::new(),
                });
                group.immersions.push(imm.name.clone());
                group.lines.push(DigestLine {
                    title: imm.name.clone(),
                    immersion: String::new(),
                    due_date: imm.start_date,
                    detail: imm.end_date.map(|end| format!("até {}", format_date(end))),
                });
            }
        }
        Ok(sort_groups(by_recipient.into_values().collect()))
    }

    // ─── Per-recipient pipeline ───────────────────────────────

    async fn process_group(
        &self,
        rule: &NotificationRule,
        group: RecipientGroup,
        now: DateTime<Utc>,
        today: NaiveDate,
        options: CycleOptions,
    ) -> CycleAction {
        let mut action = CycleAction {
            rule_key: rule.rule_key,
            recipient: Some(group.name.clone()),
            to_email: group.email.clone(),
            item_count: group.lines.len(),
            outcome: ActionOutcome::SkippedNoRecipient,
            error: None,
        };

        let Some(email) = group.email.clone().filter(|e| !e.trim().is_empty()) else {
            tracing::debug!(
                "Rule {}: no email for '{}', {} item(s) not notified",
                rule.rule_key,
                group.name,
                group.lines.len()
            );
            return action;
        };

        if group.lines.len() < min_items(rule) {
            action.outcome = ActionOutcome::SkippedBelowMinimum;
            return action;
        }

        // Outer `None` skips dedup; inner `None` searches the whole log.
        let since = match dedup_window(rule, now) {
            DedupWindow::Off => None,
            DedupWindow::Since(at) => Some(Some(at)),
            DedupWindow::Unbounded => Some(None),
        };
        if let Some(since) = since {
            let mode = if options.dry_run { LogMode::Preview } else { LogMode::Send };
            match self.stores.logs.query_recent(rule.rule_key, &email, since, mode).await {
                Ok(true) => {
                    tracing::debug!("Rule {}: {email} notified within lookback", rule.rule_key);
                    action.outcome = ActionOutcome::SkippedDedup;
                    return action;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        "⚠️ Dedup check failed for {email} ({}): {e}",
                        rule.rule_key
                    );
                    action.outcome = ActionOutcome::Failed;
                    action.error = Some(e.to_string());
                    return action;
                }
            }
        }

        let template = match self.stores.rules.get_template(rule.rule_key).await {
            Ok(Some(t)) => t,
            Ok(None) => default_template(rule.rule_key),
            Err(e) => {
                tracing::warn!("⚠️ Template lookup failed for {}: {e}", rule.rule_key);
                default_template(rule.rule_key)
            }
        };
        let vars = RenderVars::new()
            .set("count", group.lines.len().to_string())
            .set("date", format_date(today))
            .set("name", group.name.clone())
            .set("app", self.settings.app_name.clone())
            .set("immersion", group.immersions.join(", "));
        let rendered = render_message(&template, &vars, &group.lines);

        let count = group.lines.len();
        if options.dry_run {
            self.write_log(rule.rule_key, &email, count, LogMode::Preview, LogStatus::Ok, now)
                .await;
            action.outcome = ActionOutcome::Previewed;
            return action;
        }

        let Some(mailer) = &self.mailer else {
            action.outcome = ActionOutcome::Failed;
            action.error = Some("no mail transport".into());
            return action;
        };
        let message = MailMessage {
            from: self.settings.from.clone(),
            to: email.clone(),
            subject: rendered.subject,
            html: rendered.html,
            reply_to: self.settings.reply_to.clone(),
        };
        match mailer.send(&message).await {
            Ok(()) => {
                tracing::info!("📧 {} → {email} ({count} item(s))", rule.rule_key);
                self.write_log(rule.rule_key, &email, count, LogMode::Send, LogStatus::Ok, now)
                    .await;
                action.outcome = ActionOutcome::Sent;
            }
            Err(e) => {
                tracing::warn!("⚠️ Delivery to {email} failed ({}): {e}", rule.rule_key);
                self.write_log(rule.rule_key, &email, count, LogMode::Send, LogStatus::Fail, now)
                    .await;
                action.outcome = ActionOutcome::Failed;
                action.error = Some(e.to_string());
            }
        }
        action
    }

    /// Audit writes never fail the pipeline.
    async fn write_log(
        &self,
        rule_key: RuleKey,
        to_email: &str,
        item_count: usize,
        mode: LogMode,
        status: LogStatus,
        at: DateTime<Utc>,
    ) {
        let entry = NotificationLogEntry {
            rule_key,
            to_email: to_email.to_string(),
            item_count,
            mode,
            status,
            created_at: at,
        };
        if let Err(e) = self.stores.logs.insert_log_entry(&entry).await {
            tracing::warn!("⚠️ Failed to write notification log for {to_email}: {e}");
        }
    }
}

fn sort_groups(mut groups: Vec<RecipientGroup>) -> Vec<RecipientGroup> {
    groups.sort_by(|a, b| {
        a.email
            .is_none()
            .cmp(&b.email.is_none())
            .then(a.email.cmp(&b.email))
            .then(a.name.cmp(&b.name))
    });
    groups
}
