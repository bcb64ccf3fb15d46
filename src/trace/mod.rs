//! Scheduler trace (structured replay log)
//!
//! Records one entry per scheduler transition when `EnvConfig::trace` is on.
//! Two runs with the same inputs produce identical logs, which is what the
//! determinism tests compare.

mod types;

pub use types::{TraceKind, TraceLog, TraceRecord};
