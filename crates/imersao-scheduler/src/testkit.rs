//! In-memory collaborators for unit tests.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use imersao_core::{
    EngineError, Immersion, ImmersionFilter, ImmersionStore, LogMode, MailMessage,
    MailTransport, NotificationLogEntry, NotificationLogStore, NotificationRule,
    NotificationTemplate, Profile, ProfileId, ProfileStore, Result, RuleKey, RuleStore, Task,
    TaskFilter, TaskStatus, TaskStore, TaskTemplateItem, TemplateStore,
};

#[derive(Default)]
pub struct MemoryStore {
    immersions: Mutex<Vec<Immersion>>,
    tasks: Mutex<Vec<Task>>,
    items: Mutex<Vec<TaskTemplateItem>>,
    profiles: Mutex<Vec<Profile>>,
    logs: Mutex<Vec<NotificationLogEntry>>,
    rules: Mutex<Vec<NotificationRule>>,
    templates: Mutex<Vec<NotificationTemplate>>,
    failing_titles: Mutex<HashSet<String>>,
    failing_logs: Mutex<bool>,
    failing_task_reads: Mutex<bool>,
}

impl MemoryStore {
    pub fn add_immersion(&self, immersion: Immersion) {
        self.immersions.lock().unwrap().push(immersion);
    }

    pub fn add_task(&self, task: Task) {
        self.tasks.lock().unwrap().push(task);
    }

    pub fn add_template_items(&self, items: Vec<TaskTemplateItem>) {
        self.items.lock().unwrap().extend(items);
    }

    pub fn add_profile(&self, id: &str, name: &str, email: Option<&str>) {
        self.profiles.lock().unwrap().push(Profile {
            id: id.into(),
            name: name.into(),
            email: email.map(str::to_string),
        });
    }

    pub fn add_log(&self, entry: NotificationLogEntry) {
        self.logs.lock().unwrap().push(entry);
    }

    pub fn add_rule(&self, rule: NotificationRule) {
        self.rules.lock().unwrap().push(rule);
    }

    pub fn add_template(&self, template: NotificationTemplate) {
        self.templates.lock().unwrap().push(template);
    }

    pub fn fail_insert_for(&self, title: &str) {
        self.failing_titles.lock().unwrap().insert(title.to_string());
    }

    pub fn fail_log_writes(&self) {
        *self.failing_logs.lock().unwrap() = true;
    }

    pub fn fail_task_reads(&self) {
        *self.failing_task_reads.lock().unwrap() = true;
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.tasks.lock().unwrap().clone()
    }

    pub fn logs(&self) -> Vec<NotificationLogEntry> {
        self.logs.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn list_open_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        if *self.failing_task_reads.lock().unwrap() {
            return Err(EngineError::TransientIo("task table unavailable".into()));
        }
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .iter()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect())
    }

    async fn list_immersion_tasks(&self, immersion_id: &str) -> Result<Vec<Task>> {
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.immersion_id == immersion_id)
            .cloned()
            .collect())
    }

    async fn insert_tasks(&self, tasks: &[Task]) -> Result<Vec<Task>> {
        let failing = self.failing_titles.lock().unwrap();
        if let Some(bad) = tasks.iter().find(|t| failing.contains(&t.title)) {
            return Err(EngineError::TransientIo(format!("insert '{}' refused", bad.title)));
        }
        self.tasks.lock().unwrap().extend(tasks.iter().cloned());
        Ok(tasks.to_vec())
    }

    async fn update_task_status(&self, id: &str, status: TaskStatus) -> Result<()> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| EngineError::NotFound(format!("task {id}")))?;
        task.status = status;
        task.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl ImmersionStore for MemoryStore {
    async fn get_immersion(&self, id: &str) -> Result<Option<Immersion>> {
        Ok(self
            .immersions
            .lock()
            .unwrap()
            .iter()
            .find(|i| i.id == id)
            .cloned())
    }

    async fn list_immersions(&self, filter: &ImmersionFilter) -> Result<Vec<Immersion>> {
        Ok(self
            .immersions
            .lock()
            .unwrap()
            .iter()
            .filter(|i| filter.matches(i))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TemplateStore for MemoryStore {
    async fn list_template_items(&self, template_id: &str) -> Result<Vec<TaskTemplateItem>> {
        Ok(self
            .items
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.template_id == template_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn get_profiles_by_ids(&self, ids: &[ProfileId]) -> Result<Vec<Profile>> {
        Ok(self
            .profiles
            .lock()
            .unwrap()
            .iter()
            .filter(|p| ids.contains(&p.id))
            .cloned()
            .collect())
    }

    async fn find_profile_by_name_ci(&self, name: &str) -> Result<Option<Profile>> {
        let wanted = name.trim().to_lowercase();
        Ok(self
            .profiles
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.name.trim().to_lowercase() == wanted)
            .cloned())
    }
}

#[async_trait]
impl NotificationLogStore for MemoryStore {
    async fn insert_log_entry(&self, entry: &NotificationLogEntry) -> Result<()> {
        if *self.failing_logs.lock().unwrap() {
            return Err(EngineError::TransientIo("log table unavailable".into()));
        }
        self.logs.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn query_recent(
        &self,
        rule_key: RuleKey,
        to_email: &str,
        since: Option<DateTime<Utc>>,
        mode: LogMode,
    ) -> Result<bool> {
        Ok(self.logs.lock().unwrap().iter().any(|e| {
            e.rule_key == rule_key
                && e.to_email.eq_ignore_ascii_case(to_email)
                && (mode == LogMode::Preview || e.mode == LogMode::Send)
                && since.is_none_or(|t| e.created_at > t)
        }))
    }
}

#[async_trait]
impl RuleStore for MemoryStore {
    async fn list_rules(&self) -> Result<Vec<NotificationRule>> {
        Ok(self.rules.lock().unwrap().clone())
    }

    async fn get_template(&self, rule_key: RuleKey) -> Result<Option<NotificationTemplate>> {
        Ok(self
            .templates
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.rule_key == rule_key)
            .cloned())
    }
}

/// Records every message; refuses recipients listed in `fail_for`.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<MailMessage>>,
    fail_for: Mutex<HashSet<String>>,
}

impl RecordingMailer {
    pub fn fail_for(&self, email: &str) {
        self.fail_for.lock().unwrap().insert(email.to_string());
    }

    pub fn sent(&self) -> Vec<MailMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailTransport for RecordingMailer {
    async fn send(&self, message: &MailMessage) -> Result<()> {
        if self.fail_for.lock().unwrap().contains(&message.to) {
            return Err(EngineError::TransientIo(format!("SMTP rejected {}", message.to)));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}
