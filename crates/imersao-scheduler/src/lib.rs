//! # Imersão Scheduler
//!
//! Task generation, date classification, notification rules and risk scoring
//! for the immersion planning console.
//!
//! ## Architecture
//! ```text
//! Console
//!   ├── TemplateService: template items → tasks (dedup by phase + title)
//!   ├── NotificationScheduler (run per tick, one at a time)
//!   │     ├── immersion_created      (event, consultant + designer)
//!   │     ├── task_overdue_daily     (daily digest per responsible)
//!   │     ├── task_due_soon_weekly   (weekly digest, next 7 days)
//!   │     └── immersion_risk_daily   (overdue count > threshold → consultant)
//!   │           └── dedup via notification log → render → preview | send
//!   └── Risk / workload / buckets (read-only dashboards)
//!
//! SqliteStore implements every store seam.
//! ```

pub mod console;
pub mod dates;
pub mod defaults;
pub mod engine;
pub mod persistence;
pub mod render;
pub mod risk;
pub mod rules;
pub mod templates;

#[cfg(test)]
mod testkit;

pub use console::{Collaborators, Console};
pub use dates::{Bucket, BucketCounts, classify, summarize, to_date_only};
pub use engine::{
    ActionOutcome, CycleAction, CycleOptions, CycleReport, EngineSettings, NotificationScheduler,
};
pub use persistence::SqliteStore;
pub use risk::{RankedImmersion, RankedPerson, RiskLevel, score_immersions, score_workload};
pub use templates::{ApplyReport, TemplateService, apply_template};
