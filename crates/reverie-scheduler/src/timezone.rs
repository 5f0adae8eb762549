//! Per-user IANA timezone resolution, plus the local-time arithmetic the
//! tick pipeline needs for quiet hours and recurrence re-materialization.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use reverie_core::types::{RecurringSpec, RecurringType};

/// Resolves a user id to the IANA timezone name that should govern quiet
/// hours and recurrence for that user. Concrete adapters (a user-settings
/// table, a chat platform's locale hint) live outside this crate.
pub trait TimezoneResolver: Send + Sync {
    fn resolve(&self, user_id: &str) -> String;
}

/// Falls back to the server's own local timezone for every user — the
/// simplest resolver, useful when per-user timezone isn't tracked yet.
pub struct SystemTimezoneResolver {
    fallback: String,
}

impl SystemTimezoneResolver {
    pub fn new() -> Self {
        let fallback = iana_time_zone::get_timezone().unwrap_or_else(|_| "UTC".to_string());
        Self { fallback }
    }
}

impl Default for SystemTimezoneResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl TimezoneResolver for SystemTimezoneResolver {
    fn resolve(&self, _user_id: &str) -> String {
        self.fallback.clone()
    }
}

fn parse_tz(name: &str) -> Tz {
    name.parse().unwrap_or(chrono_tz::UTC)
}

fn local_now(now_ms: i64, tz_name: &str) -> DateTime<Tz> {
    let tz = parse_tz(tz_name);
    Utc.timestamp_millis_opt(now_ms)
        .single()
        .unwrap_or_else(Utc::now)
        .with_timezone(&tz)
}

/// The user's local hour-of-day (0-23) at `now_ms`.
pub fn local_hour(now_ms: i64, tz_name: &str) -> u32 {
    local_now(now_ms, tz_name).hour()
}

/// Whether `hour` falls in the quiet window `[start, 24) ∪ [0, end)`.
/// `start` is typically 22, `end` typically 8 — the window wraps midnight.
pub fn is_quiet_hour(hour: u32, start: u8, end: u8) -> bool {
    hour >= start as u32 || hour < end as u32
}

/// Next UTC instant, expressed in ms, at which it is `hour:minute` in the
/// user's timezone — today if that time hasn't passed yet, else tomorrow.
pub fn next_local_time_utc_ms(now_ms: i64, tz_name: &str, hour: u32, minute: u32) -> i64 {
    let tz = parse_tz(tz_name);
    let local = local_now(now_ms, tz_name);
    let mut date = local.date_naive();
    for _ in 0..3 {
        if let Some(candidate) = at_local_time(&tz, date, hour, minute) {
            if candidate > local {
                return candidate.with_timezone(&Utc).timestamp_millis();
            }
        }
        date = date.succ_opt().unwrap_or(date);
    }
    now_ms + Duration::hours(24).num_milliseconds()
}

fn at_local_time(tz: &Tz, date: NaiveDate, hour: u32, minute: u32) -> Option<DateTime<Tz>> {
    let naive = date.and_hms_opt(hour, minute, 0)?;
    tz.from_local_datetime(&naive).single()
}

fn day_matches(spec: &RecurringSpec, date: NaiveDate) -> bool {
    let dow = date.weekday().num_days_from_monday() as u8;
    match spec.kind {
        RecurringType::Daily => true,
        RecurringType::Weekdays => dow < 5,
        RecurringType::Weekends => dow >= 5,
        RecurringType::Weekly => spec.day_of_week.map(|d| d == dow).unwrap_or(false),
    }
}

/// Advances day-by-day in the user's local calendar from `now_ms`,
/// honoring weekday/weekend/day-of-week constraints, then converts the
/// first matching local `(date, hour, minute)` back to an absolute UTC
/// instant by measuring that date's own tz offset (handles DST correctly).
pub fn compute_next_recurrence(spec: &RecurringSpec, now_ms: i64, tz_name: &str) -> i64 {
    let tz = parse_tz(tz_name);
    let local = local_now(now_ms, tz_name);
    let mut date = local.date_naive();

    // A week is always enough to find a match for every RecurringType; the
    // extra slack guards against a single DST-fold day with no valid local time.
    for _ in 0..8 {
        if day_matches(spec, date) {
            if let Some(candidate) = at_local_time(&tz, date, spec.hour as u32, spec.minute as u32) {
                if candidate > local {
                    return candidate.with_timezone(&Utc).timestamp_millis();
                }
            }
        }
        date = date.succ_opt().unwrap_or(date);
    }

    // Unreachable for well-formed specs; fall back to 24h out rather than loop forever.
    now_ms + Duration::hours(24).num_milliseconds()
}
