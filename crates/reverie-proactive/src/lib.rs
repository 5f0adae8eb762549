//! Gap-scan heuristics, LLM triage, and the background sweep that turns
//! active-goal staleness, behavioral anomalies, and unresolved threads into
//! scheduler nudges.

mod engine;
mod error;
mod heuristics;
mod triage;

pub use engine::ProactiveEngine;
pub use error::{ProactiveError, Result};
pub use heuristics::{
    scan_behavioral_anomaly, scan_stale_goals, scan_unresolved_threads, GapSignal, GapType, Severity,
};
pub use triage::{triage_signals, TriageItem, TriagedNudge};
