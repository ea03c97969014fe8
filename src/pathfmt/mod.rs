// logtrail - pathfmt/mod.rs
//
// Cronolog template resolver: derives the currently-active concrete path for
// a date-templated pattern and advances the time slice on rotation. Grounded
// on Time2Path/Truncate from the original tailex package, extended to cover
// the full %H %M %S grammar (the original only ever substituted
// %Y %y %m %d %N).

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Datelike, Local, NaiveTime, Timelike, Utc};

use crate::cancel::CancelToken;
use crate::util::constants::TEMPLATE_GLOB_POLL_INTERVAL_MS;
use crate::util::error::CoreError;

/// Round `t` down to the start of the period it falls in. `period == 24h`
/// is special-cased to local midnight rather than UTC midnight, matching
/// the original's hour-truncate-then-subtract-hours trick.
pub fn truncate(t: DateTime<Local>, period: Duration) -> DateTime<Local> {
    if period == Duration::from_secs(24 * 60 * 60) {
        return t
            .date_naive()
            .and_time(NaiveTime::MIN)
            .and_local_timezone(Local)
            .single()
            .unwrap_or(t);
    }

    let period_secs = period.as_secs().max(1) as i64;
    let epoch_secs = t.timestamp();
    let truncated_secs = (epoch_secs.div_euclid(period_secs)) * period_secs;
    DateTime::<Utc>::from_timestamp(truncated_secs, 0)
        .map(|dt| dt.with_timezone(&Local))
        .unwrap_or(t)
}

/// Substitute `%Y %y %m %d %H %M %S %N` placeholders with `t`'s fields.
/// `%N` is "days ago", computed against local midnight of the current
/// moment, preserved from the original's `Time2Path`.
pub fn format_template(template: &str, t: DateTime<Local>) -> String {
    let mut out = template
        .replace("%Y", &format!("{:04}", t.year()))
        .replace("%y", &format!("{:02}", t.year() % 100))
        .replace("%m", &format!("{:02}", t.month()))
        .replace("%d", &format!("{:02}", t.day()))
        .replace("%H", &format!("{:02}", t.hour()))
        .replace("%M", &format!("{:02}", t.minute()))
        .replace("%S", &format!("{:02}", t.second()));

    if out.contains("%N") {
        let now_midnight = truncate(Local::now(), Duration::from_secs(24 * 60 * 60));
        let days_ago = (now_midnight - t).num_hours() / 24;
        out = out.replace("%N", &days_ago.to_string());
    }

    out
}

/// Signals to the caller that a poll cycle passed with no concrete match yet
/// found, so inactivity can be detected upstream.
pub struct GlobLoopTick;

/// Resolve `template` to a concrete, currently-existing path. Polls once per
/// second while no file matches; advances to the next time slice once the
/// current one has fully elapsed.
///
/// `on_tick` is invoked once per poll with no match, carrying a
/// `GlobLoopTick` the caller can use to detect inactivity; it is not an
/// error for this to run indefinitely until `cancel` fires.
pub fn resolve(
    template: &str,
    rotate_period: Duration,
    cancel: &CancelToken,
    mut on_tick: impl FnMut(GlobLoopTick),
) -> Result<PathBuf, CoreError> {
    let mut slice = truncate(Local::now(), rotate_period);
    let interval = Duration::from_millis(TEMPLATE_GLOB_POLL_INTERVAL_MS);

    loop {
        let formatted = format_template(template, slice);
        if let Some(path) = glob::glob(&formatted)
            .ok()
            .and_then(|mut paths| paths.next())
            .and_then(|r| r.ok())
        {
            return Ok(path);
        }

        on_tick(GlobLoopTick);

        if cancel.sleep(interval) {
            return Err(CoreError::Cancelled);
        }

        let next_slice = slice + chrono::Duration::from_std(rotate_period).unwrap_or_default();
        if next_slice <= Local::now() {
            slice = next_slice;
        }
    }
}
