//! # Imersões Core
//!
//! Shared vocabulary for the immersion planning engine: the domain model,
//! the error taxonomy, the collaborator traits the engine is wired through,
//! and the TOML configuration.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{ConsoleConfig, SchedulerConfig, SmtpConfig, WallClock};
pub use error::{EngineError, Result};
pub use traits::{
    Clock, FixedClock, ImmersionStore, MailTransport, NotificationLogStore, ProfileStore,
    RuleStore, SystemClock, TaskStore, TemplateStore,
};
pub use types::*;
