//! SQLite-backed store for immersions, tasks, templates, profiles, rules and
//! the notification log. One connection behind a mutex; every trait call is
//! a short synchronous statement.

use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use imersao_core::{
    EngineError, Immersion, ImmersionFilter, ImmersionStore, LogMode, NotificationLogEntry,
    NotificationLogStore, NotificationRule, NotificationTemplate, Profile, ProfileId, ProfileStore,
    Result, RuleKey, RuleStore, Task, TaskFilter, TaskStatus, TaskStore, TaskTemplateItem,
    TemplateStore,
};

use crate::rules::default_rules;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS immersions (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        start_date TEXT,                 -- YYYY-MM-DD
        end_date TEXT,
        status TEXT NOT NULL DEFAULT 'planning',
        consultant_id TEXT,
        designer_id TEXT,
        consultant_name TEXT,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS tasks (
        id TEXT PRIMARY KEY,
        immersion_id TEXT NOT NULL,
        phase TEXT NOT NULL,             -- 'PRE', 'DURING', 'POST'
        title TEXT NOT NULL,
        responsible_id TEXT,
        due_date TEXT,
        status TEXT NOT NULL DEFAULT 'scheduled',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_tasks_key
        ON tasks (immersion_id, phase, lower(trim(title)));
    CREATE INDEX IF NOT EXISTS idx_tasks_due ON tasks (status, due_date);

    CREATE TABLE IF NOT EXISTS template_items (
        id TEXT PRIMARY KEY,
        template_id TEXT NOT NULL,
        phase TEXT NOT NULL,
        title TEXT NOT NULL,
        due_basis TEXT NOT NULL,         -- 'start', 'end'
        offset_days INTEGER NOT NULL DEFAULT 0,
        sort_order INTEGER NOT NULL DEFAULT 0,
        responsible_id TEXT
    );

    CREATE TABLE IF NOT EXISTS profiles (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        email TEXT
    );

    CREATE TABLE IF NOT EXISTS notification_rules (
        rule_key TEXT PRIMARY KEY,
        is_enabled INTEGER NOT NULL DEFAULT 1,
        cadence TEXT NOT NULL,           -- 'event', 'daily', 'weekly'
        lookback_minutes INTEGER NOT NULL DEFAULT 0,
        config TEXT NOT NULL DEFAULT '{}'
    );

    CREATE TABLE IF NOT EXISTS notification_templates (
        rule_key TEXT PRIMARY KEY,
        subject TEXT NOT NULL,
        intro TEXT NOT NULL DEFAULT '',
        footer TEXT NOT NULL DEFAULT ''
    );

    CREATE TABLE IF NOT EXISTS notification_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        rule_key TEXT NOT NULL,
        to_email TEXT NOT NULL,
        item_count INTEGER NOT NULL DEFAULT 0,
        mode TEXT NOT NULL,              -- 'preview', 'send'
        status TEXT NOT NULL,            -- 'ok', 'fail'
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_logs_recent
        ON notification_logs (rule_key, to_email, created_at);
";

/// Fixed-width UTC timestamps so text comparison orders them correctly.
fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn db_err(e: rusqlite::Error) -> EngineError {
    if e.sqlite_error_code() == Some(rusqlite::ErrorCode::ConstraintViolation) {
        EngineError::Validation(format!("constraint violated: {e}"))
    } else {
        EngineError::TransientIo(format!("sqlite: {e}"))
    }
}

/// Reads a text column through `FromStr` (enums, dates, timestamps).
fn parse_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_opt_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match row.get::<_, Option<String>>(idx)? {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        }),
    }
}

const IMMERSION_COLS: &str = "id, name, start_date, end_date, status, \
    consultant_id, designer_id, consultant_name, created_at";

fn immersion_from_row(row: &Row<'_>) -> rusqlite::Result<Immersion> {
    Ok(Immersion {
        id: row.get(0)?,
        name: row.get(1)?,
        start_date: parse_opt_col(row, 2)?,
        end_date: parse_opt_col(row, 3)?,
        status: parse_col(row, 4)?,
        consultant_id: row.get(5)?,
        designer_id: row.get(6)?,
        consultant_name: row.get(7)?,
        created_at: parse_col(row, 8)?,
    })
}

const TASK_COLS: &str =
    "id, immersion_id, phase, title, responsible_id, due_date, status, created_at, updated_at";

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        immersion_id: row.get(1)?,
        phase: parse_col(row, 2)?,
        title: row.get(3)?,
        responsible_id: row.get(4)?,
        due_date: parse_opt_col(row, 5)?,
        status: parse_col(row, 6)?,
        created_at: parse_col(row, 7)?,
        updated_at: parse_col(row, 8)?,
    })
}

fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<Profile> {
    Ok(Profile {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
    })
}

/// SQLite implementation of every store seam.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database file, creating parent directories.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db_err)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| EngineError::TransientIo("sqlite connection lock poisoned".into()))
    }

    /// Create tables and seed the built-in rules (existing rows are kept).
    fn migrate(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        for rule in default_rules() {
            conn.execute(
                "INSERT OR IGNORE INTO notification_rules
                 (rule_key, is_enabled, cadence, lookback_minutes, config)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    rule.rule_key.as_str(),
                    rule.is_enabled as i32,
                    rule.cadence.as_str(),
                    rule.lookback_minutes,
                    serde_json::Value::Object(rule.config).to_string(),
                ],
            )
            .map_err(db_err)?;
        }
        Ok(())
    }

    // ─── Writers used by the console and tests ───────────────

    pub fn save_immersion(&self, immersion: &Immersion) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO immersions
                 (id, name, start_date, end_date, status,
                  consultant_id, designer_id, consultant_name, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    immersion.id,
                    immersion.name,
                    immersion.start_date.map(|d| d.to_string()),
                    immersion.end_date.map(|d| d.to_string()),
                    immersion.status.as_str(),
                    immersion.consultant_id,
                    immersion.designer_id,
                    immersion.consultant_name,
                    ts(immersion.created_at),
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    pub fn save_profile(&self, profile: &Profile) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO profiles (id, name, email) VALUES (?1, ?2, ?3)",
                params![profile.id, profile.name, profile.email],
            )
            .map_err(db_err)?;
        Ok(())
    }

    pub fn save_template_items(&self, items: &[TaskTemplateItem]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;
        for item in items {
            tx.execute(
                "INSERT OR REPLACE INTO template_items
                 (id, template_id, phase, title, due_basis, offset_days, sort_order, responsible_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    item.id,
                    item.template_id,
                    item.phase.as_str(),
                    item.title,
                    item.due_basis.as_str(),
                    item.offset_days,
                    item.sort_order,
                    item.responsible_id,
                ],
            )
            .map_err(db_err)?;
        }
        tx.commit().map_err(db_err)
    }

    pub fn save_rule(&self, rule: &NotificationRule) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO notification_rules
                 (rule_key, is_enabled, cadence, lookback_minutes, config)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    rule.rule_key.as_str(),
                    rule.is_enabled as i32,
                    rule.cadence.as_str(),
                    rule.lookback_minutes,
                    serde_json::Value::Object(rule.config.clone()).to_string(),
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    pub fn save_template(&self, template: &NotificationTemplate) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO notification_templates (rule_key, subject, intro, footer)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    template.rule_key.as_str(),
                    template.subject,
                    template.intro,
                    template.footer,
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    /// Most recent log entries first.
    pub fn recent_logs(&self, limit: usize) -> Result<Vec<NotificationLogEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT rule_key, to_email, item_count, mode, status, created_at
                 FROM notification_logs ORDER BY created_at DESC, id DESC LIMIT ?1",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map([limit as i64], |row| {
                Ok(NotificationLogEntry {
                    rule_key: parse_col(row, 0)?,
                    to_email: row.get(1)?,
                    item_count: row.get::<_, i64>(2)?.max(0) as usize,
                    mode: parse_col(row, 3)?,
                    status: parse_col(row, 4)?,
                    created_at: parse_col(row, 5)?,
                })
            })
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn list_open_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {TASK_COLS} FROM tasks
             WHERE status IN ('scheduled', 'in_progress', 'overdue')
               AND (?1 IS NULL OR immersion_id = ?1)
               AND (?2 IS NULL OR responsible_id = ?2)
             ORDER BY due_date IS NULL, due_date, title"
        );
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(params![filter.immersion_id, filter.responsible_id], task_from_row)
            .map_err(db_err)?;
        let tasks = rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)?;
        Ok(tasks.into_iter().filter(|t| filter.matches(t)).collect())
    }

    async fn list_immersion_tasks(&self, immersion_id: &str) -> Result<Vec<Task>> {
        let conn = self.conn()?;
        let sql =
            format!("SELECT {TASK_COLS} FROM tasks WHERE immersion_id = ?1 ORDER BY created_at");
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt.query_map([immersion_id], task_from_row).map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    async fn insert_tasks(&self, tasks: &[Task]) -> Result<Vec<Task>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;
        for task in tasks {
            tx.execute(
                "INSERT INTO tasks
                 (id, immersion_id, phase, title, responsible_id,
                  due_date, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    task.id,
                    task.immersion_id,
                    task.phase.as_str(),
                    task.title,
                    task.responsible_id,
                    task.due_date.map(|d| d.to_string()),
                    task.status.as_str(),
                    ts(task.created_at),
                    ts(task.updated_at),
                ],
            )
            .map_err(db_err)?;
        }
        tx.commit().map_err(db_err)?;
        Ok(tasks.to_vec())
    }

    async fn update_task_status(&self, id: &str, status: TaskStatus) -> Result<()> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), ts(Utc::now()), id],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(EngineError::NotFound(format!("task {id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl ImmersionStore for SqliteStore {
    async fn get_immersion(&self, id: &str) -> Result<Option<Immersion>> {
        let sql = format!("SELECT {IMMERSION_COLS} FROM immersions WHERE id = ?1");
        self.conn()?
            .query_row(&sql, [id], immersion_from_row)
            .optional()
            .map_err(db_err)
    }

    async fn list_immersions(&self, filter: &ImmersionFilter) -> Result<Vec<Immersion>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {IMMERSION_COLS} FROM immersions
             WHERE (?1 IS NULL OR created_at > ?1)
             ORDER BY start_date IS NULL, start_date, name"
        );
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map([filter.created_after.map(ts)], immersion_from_row)
            .map_err(db_err)?;
        let immersions = rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)?;
        Ok(immersions.into_iter().filter(|i| filter.matches(i)).collect())
    }
}

#[async_trait]
impl TemplateStore for SqliteStore {
    async fn list_template_items(&self, template_id: &str) -> Result<Vec<TaskTemplateItem>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, template_id, phase, title, due_basis,
                        offset_days, sort_order, responsible_id
                 FROM template_items WHERE template_id = ?1 ORDER BY sort_order, phase",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map([template_id], |row| {
                Ok(TaskTemplateItem {
                    id: row.get(0)?,
                    template_id: row.get(1)?,
                    phase: parse_col(row, 2)?,
                    title: row.get(3)?,
                    due_basis: parse_col(row, 4)?,
                    offset_days: row.get(5)?,
                    sort_order: row.get(6)?,
                    responsible_id: row.get(7)?,
                })
            })
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }
}

#[async_trait]
impl ProfileStore for SqliteStore {
    async fn get_profiles_by_ids(&self, ids: &[ProfileId]) -> Result<Vec<Profile>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn()?;
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!("SELECT id, name, email FROM profiles WHERE id IN ({placeholders})");
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(ids.iter()), profile_from_row)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    async fn find_profile_by_name_ci(&self, name: &str) -> Result<Option<Profile>> {
        let wanted = name.trim().to_lowercase();
        if wanted.is_empty() {
            return Ok(None);
        }
        // SQLite's lower() is ASCII-only; compare in Rust instead.
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id, name, email FROM profiles ORDER BY id")
            .map_err(db_err)?;
        let rows = stmt.query_map([], profile_from_row).map_err(db_err)?;
        for profile in rows {
            let profile = profile.map_err(db_err)?;
            if profile.name.trim().to_lowercase() == wanted {
                return Ok(Some(profile));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl NotificationLogStore for SqliteStore {
    async fn insert_log_entry(&self, entry: &NotificationLogEntry) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO notification_logs
                 (rule_key, to_email, item_count, mode, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    entry.rule_key.as_str(),
                    entry.to_email.trim().to_lowercase(),
                    entry.item_count as i64,
                    entry.mode.as_str(),
                    entry.status.as_str(),
                    ts(entry.created_at),
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    async fn query_recent(
        &self,
        rule_key: RuleKey,
        to_email: &str,
        since: Option<DateTime<Utc>>,
        mode: LogMode,
    ) -> Result<bool> {
        let found: Option<i64> = self
            .conn()?
            .query_row(
                "SELECT 1 FROM notification_logs
                 WHERE rule_key = ?1 AND to_email = ?2
                   AND (?3 = 'preview' OR mode = 'send')
                   AND (?4 IS NULL OR created_at > ?4)
                 LIMIT 1",
                params![
                    rule_key.as_str(),
                    to_email.trim().to_lowercase(),
                    mode.as_str(),
                    since.map(ts),
                ],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        Ok(found.is_some())
    }
}

#[async_trait]
impl RuleStore for SqliteStore {
    async fn list_rules(&self) -> Result<Vec<NotificationRule>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT rule_key, is_enabled, cadence, lookback_minutes, config
                 FROM notification_rules ORDER BY rule_key",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| {
                let config: String = row.get(4)?;
                Ok(NotificationRule {
                    rule_key: parse_col(row, 0)?,
                    is_enabled: row.get::<_, i32>(1)? != 0,
                    cadence: parse_col(row, 2)?,
                    lookback_minutes: row.get(3)?,
                    config: serde_json::from_str(&config).unwrap_or_default(),
                })
            })
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    async fn get_template(&self, rule_key: RuleKey) -> Result<Option<NotificationTemplate>> {
        self.conn()?
            .query_row(
                "SELECT subject, intro, footer FROM notification_templates WHERE rule_key = ?1",
                [rule_key.as_str()],
                |row| {
                    Ok(NotificationTemplate {
                        rule_key,
                        subject: row.get(0)?,
                        intro: row.get(1)?,
                        footer: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(db_err)
    }
}
