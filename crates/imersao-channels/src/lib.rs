//! # Imersão Channels
//! Outbound delivery for reminder digests.

pub mod mail;

pub use mail::{SmtpMailer, build_message};
