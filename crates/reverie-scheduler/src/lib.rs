//! Scheduled-item tick pipeline: expiry, deduplication, claim, quiet-hours
//! deferral, dependency waits, channel delivery, recurrence
//! re-materialization, engagement feedback, and the morning digest.

mod delivery;
mod digest;
mod engine;
mod error;
mod timezone;

pub use delivery::{classify_source, format_proactive_message, ChannelRegistry, ProactiveSource};
pub use digest::{render_digest_line, sanitize_result_text, truncate_with_ellipsis};
pub use engine::{SchedulerEngine, SchedulerHandle};
pub use error::{Result, SchedulerError};
pub use timezone::{
    compute_next_recurrence, is_quiet_hour, local_hour, next_local_time_utc_ms, SystemTimezoneResolver,
    TimezoneResolver,
};
