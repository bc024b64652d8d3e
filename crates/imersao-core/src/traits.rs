//! Collaborator seams. The engine only reaches storage, mail and time through these.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{
    Immersion, ImmersionFilter, LogMode, MailMessage, NotificationLogEntry, NotificationRule,
    NotificationTemplate, Profile, ProfileId, RuleKey, Task, TaskFilter, TaskStatus,
    TaskTemplateItem,
};

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn list_open_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>>;

    /// Every task of an immersion, done ones included.
    async fn list_immersion_tasks(&self, immersion_id: &str) -> Result<Vec<Task>>;

    async fn insert_tasks(&self, tasks: &[Task]) -> Result<Vec<Task>>;

    async fn update_task_status(&self, id: &str, status: TaskStatus) -> Result<()>;
}

#[async_trait]
pub trait ImmersionStore: Send + Sync {
    async fn get_immersion(&self, id: &str) -> Result<Option<Immersion>>;

    async fn list_immersions(&self, filter: &ImmersionFilter) -> Result<Vec<Immersion>>;
}

#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn list_template_items(&self, template_id: &str) -> Result<Vec<TaskTemplateItem>>;
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get_profiles_by_ids(&self, ids: &[ProfileId]) -> Result<Vec<Profile>>;

    async fn find_profile_by_name_ci(&self, name: &str) -> Result<Option<Profile>>;
}

#[async_trait]
pub trait NotificationLogStore: Send + Sync {
    async fn insert_log_entry(&self, entry: &NotificationLogEntry) -> Result<()>;

    /// True when an entry for the pair, whatever its status, exists strictly
    /// after `since` (`None` searches the whole log). A `Send` run only counts
    /// `send` entries; a `Preview` run counts both modes.
    async fn query_recent(
        &self,
        rule_key: RuleKey,
        to_email: &str,
        since: Option<DateTime<Utc>>,
        mode: LogMode,
    ) -> Result<bool>;
}

#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn list_rules(&self) -> Result<Vec<NotificationRule>>;

    async fn get_template(&self, rule_key: RuleKey) -> Result<Option<NotificationTemplate>>;
}

/// Outbound mail. Implementations return an error on delivery failure.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: &MailMessage) -> Result<()>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock pinned to one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
