//! Weekly transfer-rate schedule.
//!
//! A schedule file holds one directive per non-blank, non-`#` line:
//!
//! ```text
//! # nights and weekends get the full pipe
//! default: 100k
//! mon-fri 0000-0800: unlimited
//! mon-fri 2200-2359: unlimited
//! sat-sun 0000-2359: unlimited
//! ```
//!
//! `default:` sets the rate outside any block (absent means unlimited).
//! Day ranges may wrap around the week (`fri-mon`). Times are 24-hour `HHMM`
//! with mandatory leading zeros, and a block never crosses midnight - write
//! an overnight window as two blocks. Rates use [`crate::utils::parse_rate`]
//! units.
//!
//! Queries take `now` as a parameter so the clock can be pinned in tests;
//! only [`drive`] touches the wall clock.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result, bail};
use chrono::{DateTime, Datelike, Days, Local, NaiveDate, TimeZone, Weekday};
use tracing::debug;

use crate::limiter::RateLimiter;
use crate::ui;
use crate::utils::parse_rate;

/// One `(weekday, time range, rate)` override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleBlock {
    pub weekday: Weekday,
    /// Minute of day the block starts, inclusive.
    pub start: u16,
    /// Minute of day the block ends, exclusive. Always greater than `start`.
    pub end: u16,
    /// Bytes per second while the block is active; `0` means unlimited.
    pub rate: u64,
}

/// A compiled weekly schedule: a default rate plus sorted, non-overlapping
/// blocks.
#[derive(Debug, Clone)]
pub struct Schedule {
    pub default_rate: u64,
    blocks: Vec<ScheduleBlock>,
}

fn parse_weekday(s: &str) -> Result<Weekday> {
    Ok(match s {
        "mon" | "monday" => Weekday::Mon,
        "tue" | "tuesday" => Weekday::Tue,
        "wed" | "wednesday" => Weekday::Wed,
        "thu" | "thursday" => Weekday::Thu,
        "fri" | "friday" => Weekday::Fri,
        "sat" | "saturday" => Weekday::Sat,
        "sun" | "sunday" => Weekday::Sun,
        _ => bail!("invalid week day: {s}"),
    })
}

fn parse_hhmm(s: &str) -> Option<u16> {
    if s.len() != 4 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hour: u16 = s[0..2].parse().ok()?;
    let minute: u16 = s[2..4].parse().ok()?;
    if hour > 23 || minute > 59 {
        return None;
    }
    Some(hour * 60 + minute)
}

impl Schedule {
    /// Load and compile a schedule file.
    ///
    /// # Errors
    ///
    /// Returns an error when the file is unreadable, a line does not parse,
    /// two blocks on the same weekday overlap, or no block is defined.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read schedule file: {}", path.display()))?;
        Self::parse(&text)
    }

    /// Compile schedule text. See the module docs for the syntax.
    pub fn parse(text: &str) -> Result<Self> {
        let mut default_rate = 0;
        let mut blocks: Vec<ScheduleBlock> = Vec::new();

        for (index, line) in text.lines().enumerate() {
            let line_no = index + 1;
            let line = line.trim_end();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(rest) = line.strip_prefix("default:") {
                default_rate = parse_rate(rest.trim())
                    .with_context(|| format!("invalid default rate on line {line_no}"))?;
                continue;
            }

            let pieces: Vec<&str> = line.split(':').collect();
            let [temporal, rate_spec] = pieces.as_slice() else {
                bail!("invalid format on line {line_no} (expected one colon)");
            };

            let temporal: Vec<&str> = temporal.trim().split_whitespace().collect();
            let [day_spec, time_range] = temporal.as_slice() else {
                bail!("invalid format on line {line_no} (missing weekday or time spec)");
            };

            let day_spec: Vec<&str> = day_spec.split('-').collect();
            if day_spec.len() > 2 {
                bail!("invalid format on line {line_no} (too many '-' characters)");
            }
            let first = parse_weekday(day_spec[0])?;
            let mut weekdays = vec![first];
            if let Some(last) = day_spec.get(1) {
                let last = parse_weekday(last)?;
                // Ranges wrap around the week: fri-mon is fri, sat, sun, mon.
                let mut day = first;
                while day != last {
                    day = day.succ();
                    weekdays.push(day);
                }
            }

            let Some((start_s, end_s)) = time_range.split_once('-') else {
                bail!("invalid format on line {line_no} (bad time range)");
            };
            let (Some(start), Some(end)) = (parse_hhmm(start_s), parse_hhmm(end_s)) else {
                bail!("invalid format on line {line_no} (bad time range). missing leading zero?");
            };
            if end <= start {
                bail!("invalid format on line {line_no} (bad time spec)");
            }

            let rate = parse_rate(rate_spec.trim())
                .with_context(|| format!("invalid rate on line {line_no}"))?;

            for weekday in weekdays {
                blocks.push(ScheduleBlock {
                    weekday,
                    start,
                    end,
                    rate,
                });
            }
        }

        blocks.sort_by_key(|b| (b.weekday.num_days_from_sunday(), b.start));

        if blocks.is_empty() {
            bail!("schedule is empty");
        }
        for pair in blocks.windows(2) {
            if pair[0].weekday == pair[1].weekday && pair[0].end > pair[1].start {
                bail!("time ranges are not allowed to overlap");
            }
        }

        Ok(Self {
            default_rate,
            blocks,
        })
    }

    /// The compiled blocks, sorted by `(weekday, start)`.
    #[must_use]
    pub fn blocks(&self) -> &[ScheduleBlock] {
        &self.blocks
    }

    /// The block containing `now`, if any. Non-overlap guarantees at most
    /// one.
    pub fn active_block<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<&ScheduleBlock> {
        self.blocks.iter().find(|b| b.active(now))
    }

    /// The block whose next occurrence starts soonest; a currently-active
    /// block wins outright. Ties fall to `(weekday, start)` order.
    pub fn next<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<&ScheduleBlock> {
        if let Some(active) = self.active_block(now) {
            return Some(active);
        }
        self.blocks
            .iter()
            .filter_map(|b| b.next_occurrence(now).map(|(start, _)| (start, b)))
            .min_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(_, b)| b)
    }

    /// The rate in force at `now`: the active block's, or the default.
    pub fn current_rate<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> u64 {
        self.active_block(now).map_or(self.default_rate, |b| b.rate)
    }

    /// When the rate next changes: the active block's end, or the earliest
    /// upcoming start.
    pub fn next_transition<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        if let Some(active) = self.active_block(now) {
            return active.next_occurrence(now).map(|(_, end)| end);
        }
        self.blocks
            .iter()
            .filter_map(|b| b.next_occurrence(now).map(|(start, _)| start))
            .min()
    }
}

impl ScheduleBlock {
    /// The next occurrence of this block as wall-clock instants: this week's
    /// if it has not ended yet, otherwise next week's.
    ///
    /// Daylight-saving handling follows the local calendar: both endpoints
    /// are constructed as local times on the target day, an `end` that lands
    /// before `start` (spring-forward collapse) is pushed out an hour, and a
    /// start inside a nonexistent hour resolves to the hour after the gap.
    /// Returns `None` only if the timezone cannot represent the block at all.
    pub fn next_occurrence<Tz: TimeZone>(
        &self,
        now: &DateTime<Tz>,
    ) -> Option<(DateTime<Tz>, DateTime<Tz>)> {
        let tz = now.timezone();
        let days_ahead = (i64::from(self.weekday.num_days_from_sunday())
            - i64::from(now.weekday().num_days_from_sunday())
            + 7)
            % 7;
        let date = now.date_naive() + Days::new(days_ahead as u64);

        let occurrence_on = |date: NaiveDate| -> Option<(DateTime<Tz>, DateTime<Tz>)> {
            let start = resolve_local(&tz, date, self.start)?;
            let mut end = resolve_local(&tz, date, self.end)?;
            if end < start {
                end = end + chrono::Duration::hours(1);
            }
            Some((start, end))
        };

        let (start, end) = occurrence_on(date)?;
        if *now > end {
            return occurrence_on(date + Days::new(7));
        }
        Some((start, end))
    }

    /// Whether `now` falls inside this block's next occurrence. Because an
    /// occurrence that already ended rolls forward a week, this is true
    /// exactly when the block is in force right now.
    pub fn active<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> bool {
        self.next_occurrence(now)
            .is_some_and(|(start, _)| *now >= start)
    }
}

/// Construct a local wall-clock time, stepping over DST gaps: an ambiguous
/// time resolves to its earlier offset, a nonexistent time to one hour later.
fn resolve_local<Tz: TimeZone>(tz: &Tz, date: NaiveDate, minute_of_day: u16) -> Option<DateTime<Tz>> {
    let naive = date.and_hms_opt(
        u32::from(minute_of_day / 60),
        u32::from(minute_of_day % 60),
        0,
    )?;
    match tz.from_local_datetime(&naive) {
        chrono::LocalResult::Single(t) => Some(t),
        chrono::LocalResult::Ambiguous(earliest, _) => Some(earliest),
        chrono::LocalResult::None => tz
            .from_local_datetime(&(naive + chrono::Duration::hours(1)))
            .earliest(),
    }
}

/// Drive the shared limiter from the schedule: sleep until each transition
/// and apply the new rate. `applied_rate` is whatever the coordinator
/// already set, so startup does not announce a no-op change.
pub async fn drive(schedule: Schedule, limiter: Arc<RateLimiter>, mut applied_rate: u64) {
    loop {
        let now = Local::now();
        let rate = schedule.current_rate(&now);
        if rate != applied_rate {
            limiter.set_limit(rate.min(i64::MAX as u64) as i64);
            ui::schedule_notice(rate);
            applied_rate = rate;
        }
        let Some(next) = schedule.next_transition(&now) else {
            return;
        };
        debug!(rate, at = %next, "next schedule transition");
        // Sleep a beat past the boundary so the recomputation lands inside
        // the new block.
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO) + Duration::from_secs(1);
        tokio::time::sleep(wait).await;
    }
}
