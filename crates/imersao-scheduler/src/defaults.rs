//! Default owner and due date for tasks that arrive without them.

use chrono::NaiveDate;

use imersao_core::{EngineError, Immersion, Phase, ProfileId, Result, Task};

/// The person who owns an immersion's task workflow: the consultant, or the
/// designer when no consultant is assigned yet.
pub fn workflow_owner(immersion: &Immersion, _phase: Phase) -> Option<ProfileId> {
    immersion
        .consultant_id
        .clone()
        .or_else(|| immersion.designer_id.clone())
}

/// PRE and DURING work is due when the event starts, POST work when it ends.
pub fn default_due_date(immersion: &Immersion, phase: Phase) -> Option<NaiveDate> {
    match phase {
        Phase::Pre | Phase::During => immersion.start_date,
        Phase::Post => immersion.end_date.or(immersion.start_date),
    }
}

/// Fills `responsible_id` and `due_date` when missing. Present values are kept.
pub fn resolve_defaults(mut task: Task, immersion: &Immersion) -> Result<Task> {
    if task.immersion_id != immersion.id {
        return Err(EngineError::Validation(format!(
            "task {} belongs to immersion {}, not {}",
            task.id, task.immersion_id, immersion.id
        )));
    }
    if task.responsible_id.is_none() {
        task.responsible_id = workflow_owner(immersion, task.phase);
    }
    if task.due_date.is_none() {
        task.due_date = default_due_date(immersion, task.phase);
    }
    Ok(task)
}

/// Builds a new ad-hoc task for an immersion with defaults applied.
pub fn prepare_task(
    immersion: &Immersion,
    phase: Phase,
    title: &str,
    responsible_id: Option<ProfileId>,
    due_date: Option<NaiveDate>,
) -> Result<Task> {
    let title = title.trim();
    if title.is_empty() {
        return Err(EngineError::Validation("task title is required".into()));
    }
    let mut task = Task::new(&immersion.id, phase, title);
    task.responsible_id = responsible_id;
    task.due_date = due_date;
    resolve_defaults(task, immersion)
}
