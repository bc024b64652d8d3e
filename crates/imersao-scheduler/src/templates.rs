//! Template application: materializes checklist templates into concrete tasks.
//!
//! Re-applying a template is always safe: items whose `(phase, title)` key
//! already exists on the immersion are skipped, never overwritten.
//!
//! ```text
//! items ─sort(sort_order, phase)─► due date from start/end + offset
//!                                 ├─ no base date  → omitted
//!                                 ├─ key exists    → skipped
//!                                 └─ otherwise     → to_insert (owner from immersion)
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use serde::Serialize;

use imersao_core::{
    DueBasis, EngineError, Immersion, ImmersionStore, Result, Task, TaskStore, TaskTemplateItem,
    TemplateStore,
};

use crate::defaults::workflow_owner;

/// `lowercase(trim(phase)) + "::" + lowercase(trim(title))`.
pub fn dedup_key(phase: &str, title: &str) -> String {
    format!(
        "{}::{}",
        phase.trim().to_lowercase(),
        title.trim().to_lowercase()
    )
}

fn task_key(task: &Task) -> String {
    dedup_key(task.phase.as_str(), &task.title)
}

fn item_key(item: &TaskTemplateItem) -> String {
    dedup_key(item.phase.as_str(), &item.title)
}

/// Due date of a template item for an immersion, if its base date is known.
pub fn item_due_date(item: &TaskTemplateItem, immersion: &Immersion) -> Option<NaiveDate> {
    let base = match item.due_basis {
        DueBasis::Start => immersion.start_date,
        DueBasis::End => immersion.end_date,
    }?;
    base.checked_add_signed(Duration::days(item.offset_days))
}

/// Result of planning a template application, before anything is stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TemplateApplication {
    pub to_insert: Vec<Task>,
    /// Items whose key already existed.
    pub skipped: usize,
    /// Items with no computable due date.
    pub omitted: usize,
}

/// Plans which tasks a template produces for an immersion.
pub fn apply_template(
    items: &[TaskTemplateItem],
    immersion: &Immersion,
    existing_tasks: &[Task],
) -> Result<TemplateApplication> {
    if let Some(bad) = items.iter().find(|i| i.title.trim().is_empty()) {
        return Err(EngineError::Validation(format!(
            "template item {} has an empty title",
            bad.id
        )));
    }

    let mut ordered: Vec<&TaskTemplateItem> = items.iter().collect();
    ordered.sort_by_key(|i| (i.sort_order, i.phase));

    let mut keys: HashSet<String> = existing_tasks.iter().map(task_key).collect();
    let mut plan = TemplateApplication::default();

    for item in ordered {
        let Some(due_date) = item_due_date(item, immersion) else {
            tracing::debug!(
                "Template item '{}' omitted: immersion {} has no {} date",
                item.title,
                immersion.id,
                item.due_basis
            );
            plan.omitted += 1;
            continue;
        };
        if !keys.insert(item_key(item)) {
            plan.skipped += 1;
            continue;
        }

        let mut task = Task::new(&immersion.id, item.phase, item.title.trim());
        task.due_date = Some(due_date);
        // Ownership follows the immersion, not the template row.
        task.responsible_id = workflow_owner(immersion, item.phase);
        plan.to_insert.push(task);
    }

    Ok(plan)
}

/// Outcome reported to the caller after storing a template application.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ApplyReport {
    pub inserted: usize,
    pub skipped: usize,
    pub omitted: usize,
    pub failed: usize,
    pub tasks: Vec<Task>,
}

/// Loads template and immersion, plans the application and stores new tasks.
pub struct TemplateService {
    templates: Arc<dyn TemplateStore>,
    immersions: Arc<dyn ImmersionStore>,
    tasks: Arc<dyn TaskStore>,
}

impl TemplateService {
    pub fn new(
        templates: Arc<dyn TemplateStore>,
        immersions: Arc<dyn ImmersionStore>,
        tasks: Arc<dyn TaskStore>,
    ) -> Self {
        Self {
            templates,
            immersions,
            tasks,
        }
    }

    pub async fn apply(&self, template_id: &str, immersion_id: &str) -> Result<ApplyReport> {
        if template_id.trim().is_empty() || immersion_id.trim().is_empty() {
            return Err(EngineError::Validation(
                "template_id and immersion_id are required".into(),
            ));
        }

        let immersion = self
            .immersions
            .get_immersion(immersion_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("immersion {immersion_id}")))?;

        let items = self.templates.list_template_items(template_id).await?;
        if items.is_empty() {
            return Err(EngineError::NotFound(format!("template {template_id}")));
        }

        let existing = self.tasks.list_immersion_tasks(&immersion.id).await?;
        let plan = apply_template(&items, &immersion, &existing)?;

        let mut report = ApplyReport {
            skipped: plan.skipped,
            omitted: plan.omitted,
            ..Default::default()
        };

        // One insert per task so a single failure does not sink the batch.
        for task in plan.to_insert {
            match self.tasks.insert_tasks(std::slice::from_ref(&task)).await {
                Ok(mut stored) => {
                    report.inserted += stored.len();
                    report.tasks.append(&mut stored);
                }
                Err(e) => {
                    tracing::warn!("⚠️ Failed to insert task '{}': {e}", task.title);
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            "📋 Template {} applied to '{}': {} inserted, {} skipped, {} omitted, {} failed",
            template_id,
            immersion.name,
            report.inserted,
            report.skipped,
            report.omitted,
            report.failed
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::MemoryStore;
    use imersao_core::{Phase, TaskStatus};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn item(
        phase: Phase,
        title: &str,
        basis: DueBasis,
        offset: i64,
        order: i32,
    ) -> TaskTemplateItem {
        TaskTemplateItem {
            id: format!("item-{order}"),
            template_id: "tpl-1".into(),
            phase,
            title: title.into(),
            due_basis: basis,
            offset_days: offset,
            sort_order: order,
            responsible_id: None,
        }
    }

    fn immersion() -> Immersion {
        let mut imm = Immersion::new("Imersão Serra", date(2026, 1, 20), date(2026, 1, 23));
        imm.consultant_id = Some("ana".into());
        imm
    }

    #[test]
    fn test_negative_offset_from_start() {
        let imm = immersion();
        let items = vec![item(Phase::Pre, "Fechar hotel", DueBasis::Start, -10, 1)];
        let plan = apply_template(&items, &imm, &[]).unwrap();
        assert_eq!(plan.to_insert.len(), 1);
        assert_eq!(plan.to_insert[0].due_date, Some(date(2026, 1, 10)));
        assert_eq!(plan.to_insert[0].status, TaskStatus::Scheduled);
    }

    #[test]
    fn test_end_basis_offset() {
        let imm = immersion();
        let items = vec![item(Phase::Post, "Pesquisa NPS", DueBasis::End, 2, 1)];
        let plan = apply_template(&items, &imm, &[]).unwrap();
        assert_eq!(plan.to_insert[0].due_date, Some(date(2026, 1, 25)));
    }

    #[test]
    fn test_existing_keys_are_skipped_case_insensitively() {
        let imm = immersion();
        let mut existing = Task::new(&imm.id, Phase::Pre, "  FECHAR hotel ");
        existing.status = TaskStatus::Done;
        let items = vec![
            item(Phase::Pre, "Fechar hotel", DueBasis::Start, -10, 1),
            item(Phase::Post, "Fechar hotel", DueBasis::End, 1, 2),
        ];
        let plan = apply_template(&items, &imm, &[existing]).unwrap();
        assert_eq!(plan.skipped, 1);
        assert_eq!(plan.to_insert.len(), 1);
        assert_eq!(plan.to_insert[0].phase, Phase::Post);
    }

    #[test]
    fn test_duplicate_items_within_template_insert_once() {
        let imm = immersion();
        let items = vec![
            item(Phase::Pre, "Briefing", DueBasis::Start, -5, 1),
            item(Phase::Pre, "briefing", DueBasis::Start, -3, 2),
        ];
        let plan = apply_template(&items, &imm, &[]).unwrap();
        assert_eq!(plan.to_insert.len(), 1);
        assert_eq!(plan.skipped, 1);
    }

    #[test]
    fn test_order_by_sort_order_then_phase() {
        let imm = immersion();
        let items = vec![
            item(Phase::Post, "C", DueBasis::End, 1, 2),
            item(Phase::During, "B", DueBasis::Start, 0, 1),
            item(Phase::Pre, "A", DueBasis::Start, -1, 1),
        ];
        let plan = apply_template(&items, &imm, &[]).unwrap();
        let titles: Vec<&str> = plan.to_insert.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_missing_base_date_omits_item_only() {
        let mut imm = immersion();
        imm.end_date = None;
        let items = vec![
            item(Phase::Pre, "Convites", DueBasis::Start, -30, 1),
            item(Phase::Post, "Fotos", DueBasis::End, 3, 2),
        ];
        let plan = apply_template(&items, &imm, &[]).unwrap();
        assert_eq!(plan.to_insert.len(), 1);
        assert_eq!(plan.omitted, 1);
    }

    #[test]
    fn test_item_responsible_is_not_honored() {
        let imm = immersion();
        let mut it = item(Phase::Pre, "Logística", DueBasis::Start, -7, 1);
        it.responsible_id = Some("zeca".into());
        let plan = apply_template(&[it], &imm, &[]).unwrap();
        assert_eq!(plan.to_insert[0].responsible_id.as_deref(), Some("ana"));
    }

    #[test]
    fn test_empty_title_is_validation_error() {
        let imm = immersion();
        let items = vec![item(Phase::Pre, "  ", DueBasis::Start, 0, 1)];
        assert!(matches!(
            apply_template(&items, &imm, &[]),
            Err(EngineError::Validation(_))
        ));
    }

    fn service(store: &Arc<MemoryStore>) -> TemplateService {
        TemplateService::new(store.clone(), store.clone(), store.clone())
    }

    #[tokio::test]
    async fn test_second_application_inserts_nothing() {
        let store = Arc::new(MemoryStore::default());
        let imm = immersion();
        store.add_immersion(imm.clone());
        store.add_template_items(vec![
            item(Phase::Pre, "Fechar hotel", DueBasis::Start, -10, 1),
            item(Phase::During, "Credenciamento", DueBasis::Start, 0, 2),
            item(Phase::Post, "Pesquisa NPS", DueBasis::End, 2, 3),
        ]);
        let svc = service(&store);

        let first = svc.apply("tpl-1", &imm.id).await.unwrap();
        assert_eq!(first.inserted, 3);
        assert_eq!(first.skipped, 0);

        let second = svc.apply("tpl-1", &imm.id).await.unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.skipped, 3);
        assert_eq!(store.tasks().len(), 3);
    }

    #[tokio::test]
    async fn test_insert_failure_is_isolated() {
        let store = Arc::new(MemoryStore::default());
        let imm = immersion();
        store.add_immersion(imm.clone());
        store.add_template_items(vec![
            item(Phase::Pre, "Fechar hotel", DueBasis::Start, -10, 1),
            item(Phase::Pre, "Reservar sala", DueBasis::Start, -9, 2),
        ]);
        store.fail_insert_for("Fechar hotel");

        let report = service(&store).apply("tpl-1", &imm.id).await.unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.tasks[0].title, "Reservar sala");
    }

    #[tokio::test]
    async fn test_unknown_references() {
        let store = Arc::new(MemoryStore::default());
        let imm = immersion();
        store.add_immersion(imm.clone());
        let svc = service(&store);

        assert!(matches!(
            svc.apply("tpl-1", "imm-missing").await,
            Err(EngineError::NotFound(_))
        ));
        assert!(matches!(
            svc.apply("tpl-missing", &imm.id).await,
            Err(EngineError::NotFound(_))
        ));
        assert!(matches!(
            svc.apply("", &imm.id).await,
            Err(EngineError::Validation(_))
        ));
    }
}
