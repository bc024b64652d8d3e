//! Console facade: the operations the planning console invokes, wired to
//! one set of collaborators and a clock.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::NaiveDate;

use imersao_core::{
    Clock, ImmersionFilter, ImmersionStore, MailTransport, NotificationLogStore, ProfileId,
    ProfileStore, Result, RuleStore, TaskFilter, TaskStatus, TaskStore, TemplateStore,
};

use crate::dates::{BucketCounts, summarize, to_date_only};
use crate::engine::{CycleOptions, CycleReport, EngineSettings, NotificationScheduler};
use crate::risk::{RankedImmersion, RankedPerson, score_immersions, score_workload};
use crate::templates::{ApplyReport, TemplateService};

/// Store seams shared by every service.
#[derive(Clone)]
pub struct Collaborators {
    pub tasks: Arc<dyn TaskStore>,
    pub immersions: Arc<dyn ImmersionStore>,
    pub templates: Arc<dyn TemplateStore>,
    pub profiles: Arc<dyn ProfileStore>,
    pub logs: Arc<dyn NotificationLogStore>,
    pub rules: Arc<dyn RuleStore>,
}

impl Collaborators {
    /// All seams served by one backing store.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: TaskStore
            + ImmersionStore
            + TemplateStore
            + ProfileStore
            + NotificationLogStore
            + RuleStore
            + 'static,
    {
        Self {
            tasks: store.clone(),
            immersions: store.clone(),
            templates: store.clone(),
            profiles: store.clone(),
            logs: store.clone(),
            rules: store,
        }
    }
}

pub struct Console {
    stores: Collaborators,
    clock: Arc<dyn Clock>,
    scheduler: NotificationScheduler,
    templates: TemplateService,
}

impl Console {
    pub fn new(
        stores: Collaborators,
        mailer: Option<Arc<dyn MailTransport>>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        let templates = TemplateService::new(
            stores.templates.clone(),
            stores.immersions.clone(),
            stores.tasks.clone(),
        );
        let scheduler = NotificationScheduler::new(stores.clone(), mailer, settings);
        Self {
            stores,
            clock,
            scheduler,
            templates,
        }
    }

    /// Local calendar date in the configured zone.
    pub fn today(&self) -> NaiveDate {
        let now = self.clock.now();
        let offset = self.scheduler.settings().timezone.offset_at(now);
        to_date_only(&now.with_timezone(&offset))
    }

    pub async fn apply_template(
        &self,
        template_id: &str,
        immersion_id: &str,
    ) -> Result<ApplyReport> {
        self.templates.apply(template_id, immersion_id).await
    }

    pub async fn run_notification_cycle(&self, options: CycleOptions) -> Result<CycleReport> {
        self.scheduler
            .run_notification_cycle(self.clock.now(), options)
            .await
    }

    pub async fn notify_immersion_created(
        &self,
        immersion_id: &str,
        options: CycleOptions,
    ) -> Result<CycleReport> {
        self.scheduler
            .notify_immersion_created(immersion_id, self.clock.now(), options)
            .await
    }

    /// Ranked at-risk immersions for the dashboard.
    pub async fn immersion_risk(&self) -> Result<Vec<RankedImmersion>> {
        let tasks = self.stores.tasks.list_open_tasks(&TaskFilter::default()).await?;
        let immersions = self
            .stores
            .immersions
            .list_immersions(&ImmersionFilter::active())
            .await?;
        Ok(score_immersions(&tasks, &immersions, self.today()))
    }

    /// Per-person load, most overdue first.
    pub async fn workload(&self) -> Result<Vec<RankedPerson>> {
        let tasks = self.stores.tasks.list_open_tasks(&TaskFilter::default()).await?;
        let ids: Vec<ProfileId> = tasks
            .iter()
            .filter_map(|t| t.responsible_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let profiles = if ids.is_empty() {
            Vec::new()
        } else {
            self.stores.profiles.get_profiles_by_ids(&ids).await?
        };
        Ok(score_workload(&tasks, &profiles, self.today()))
    }

    pub async fn buckets(&self, filter: &TaskFilter) -> Result<BucketCounts> {
        let tasks = self.stores.tasks.list_open_tasks(filter).await?;
        Ok(summarize(&tasks, self.today()))
    }

    /// Marks open tasks past their due date as `overdue`. Returns how many changed.
    pub async fn sync_overdue_statuses(&self) -> Result<usize> {
        let filter = TaskFilter {
            due_before: Some(self.today()),
            ..Default::default()
        };
        let late = self.stores.tasks.list_open_tasks(&filter).await?;
        let mut changed = 0;
        for task in late.iter().filter(|t| t.status != TaskStatus::Overdue) {
            match self
                .stores
                .tasks
                .update_task_status(&task.id, TaskStatus::Overdue)
                .await
            {
                Ok(()) => changed += 1,
                Err(e) => tracing::warn!("⚠️ Could not mark task {} overdue: {e}", task.id),
            }
        }
        if changed > 0 {
            tracing::info!("🕒 {changed} task(s) marked overdue");
        }
        Ok(changed)
    }
}
