//! Saved keyword searches and their recurrence rules.
//!
//! All instants are UTC. A schedule carries an `anchor_at` (creation or
//! last activation/edit) so that monthly and interval rules never drift.

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::search::PeriodBounds;

/// Search horizon for custom calendar rules (one full weekday/leap cycle).
const MAX_SEARCH_DAYS: u32 = 366 * 28;
/// One year.
pub const MAX_INTERVAL_HOURS: u32 = 8760;
pub const DEFAULT_MAX_RESULTS: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Custom,
}

impl Frequency {
    pub const ALL: [Frequency; 5] = [
        Frequency::Hourly,
        Frequency::Daily,
        Frequency::Weekly,
        Frequency::Monthly,
        Frequency::Custom,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Frequency::Hourly => "hourly",
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
            Frequency::Custom => "custom",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Frequency::Hourly => "Every hour",
            Frequency::Daily => "Every day",
            Frequency::Weekly => "Every week",
            Frequency::Monthly => "Every month",
            Frequency::Custom => "Custom schedule",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PeriodFilter {
    #[default]
    All,
    Today,
    Week,
    Month,
    Quarter,
    Year,
    Custom,
}

impl PeriodFilter {
    pub const ALL: [PeriodFilter; 7] = [
        PeriodFilter::All,
        PeriodFilter::Today,
        PeriodFilter::Week,
        PeriodFilter::Month,
        PeriodFilter::Quarter,
        PeriodFilter::Year,
        PeriodFilter::Custom,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PeriodFilter::All => "all",
            PeriodFilter::Today => "today",
            PeriodFilter::Week => "week",
            PeriodFilter::Month => "month",
            PeriodFilter::Quarter => "quarter",
            PeriodFilter::Year => "year",
            PeriodFilter::Custom => "custom",
        }
    }

    fn label(self) -> &'static str {
        match self {
            PeriodFilter::All => "Any time",
            PeriodFilter::Today => "Today",
            PeriodFilter::Week => "Past week",
            PeriodFilter::Month => "Past month",
            PeriodFilter::Quarter => "Past quarter",
            PeriodFilter::Year => "Past year",
            PeriodFilter::Custom => "Custom range",
        }
    }

    /// Publication-date window for a search executed at `now`.
    pub fn bounds(self, custom: Option<&DateRange>, now: DateTime<Utc>) -> PeriodBounds {
        let back = |months: u32| now.checked_sub_months(Months::new(months));
        let from = match self {
            PeriodFilter::All => return PeriodBounds::default(),
            PeriodFilter::Today => Some(start_of_day(now.date_naive())),
            PeriodFilter::Week => Some(now - Duration::days(7)),
            PeriodFilter::Month => back(1),
            PeriodFilter::Quarter => back(3),
            PeriodFilter::Year => back(12),
            PeriodFilter::Custom => {
                return custom.map_or_else(PeriodBounds::default, |range| PeriodBounds {
                    from: Some(start_of_day(range.from)),
                    to: range
                        .to
                        .succ_opt()
                        .map(|next| start_of_day(next) - Duration::seconds(1)),
                });
            }
        };
        PeriodBounds {
            from,
            to: Some(now),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

/// Structured custom recurrence. `week_days` uses 0 = Sunday .. 6 = Saturday.
/// When `interval_hours` is set the calendar fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct CustomSchedule {
    pub week_days: Vec<u8>,
    pub hours: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_hours: Option<u32>,
    pub month_days: Vec<u8>,
}

impl CustomSchedule {
    pub fn is_empty(&self) -> bool {
        self.week_days.is_empty()
            && self.hours.is_empty()
            && self.interval_hours.is_none()
            && self.month_days.is_empty()
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.is_empty() {
            return Err(CoreError::validation(
                "custom schedule needs weekDays, hours, intervalHours or monthDays",
            ));
        }
        if let Some(day) = self.week_days.iter().find(|d| **d > 6) {
            return Err(CoreError::validation(format!("weekDays entry {day} is not in 0..=6")));
        }
        if let Some(hour) = self.hours.iter().find(|h| **h > 23) {
            return Err(CoreError::validation(format!("hours entry {hour} is not in 0..=23")));
        }
        if let Some(day) = self.month_days.iter().find(|d| !(1..=31).contains(*d)) {
            return Err(CoreError::validation(format!("monthDays entry {day} is not in 1..=31")));
        }
        if let Some(interval) = self.interval_hours {
            if !(1..=MAX_INTERVAL_HOURS).contains(&interval) {
                return Err(CoreError::validation(format!(
                    "intervalHours must be in 1..={MAX_INTERVAL_HOURS}"
                )));
            }
        }
        Ok(())
    }

    fn next_after(
        &self,
        anchor: DateTime<Utc>,
        reference: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, CoreError> {
        if let Some(interval) = self.interval_hours {
            let step_secs = i64::from(interval.max(1)) * 3600;
            let elapsed = (reference - anchor).num_seconds().max(0);
            let k = elapsed / step_secs + 1;
            return k
                .checked_mul(step_secs)
                .and_then(Duration::try_seconds)
                .and_then(|offset| anchor.checked_add_signed(offset))
                .ok_or_else(|| CoreError::validation("next run is out of the supported date range"));
        }

        let mut hours = if self.hours.is_empty() {
            vec![0]
        } else {
            self.hours.clone()
        };
        hours.sort_unstable();
        hours.dedup();

        let mut day = reference.date_naive();
        for _ in 0..MAX_SEARCH_DAYS {
            if self.matches_day(day) {
                for hour in &hours {
                    let candidate = day
                        .and_hms_opt(u32::from(*hour), 0, 0)
                        .map(|naive| Utc.from_utc_datetime(&naive));
                    if let Some(candidate) = candidate.filter(|c| *c > reference) {
                        return Ok(candidate);
                    }
                }
            }
            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }
        Err(CoreError::validation("custom schedule never fires"))
    }

    fn matches_day(&self, day: NaiveDate) -> bool {
        let weekday = u8::try_from(day.weekday().num_days_from_sunday()).unwrap_or(u8::MAX);
        let month_day = u8::try_from(day.day()).unwrap_or(u8::MAX);
        (self.week_days.is_empty() || self.week_days.contains(&weekday))
            && (self.month_days.is_empty() || self.month_days.contains(&month_day))
    }
}

/// Smallest fire time strictly after `reference`.
///
/// Fixed frequencies add their period to `reference` (last run, or now for
/// a schedule that never ran). Monthly steps whole months from `anchor`, so
/// an anchor on the 31st clamps to shorter months without drifting.
pub fn next_run(
    frequency: Frequency,
    custom: Option<&CustomSchedule>,
    anchor: DateTime<Utc>,
    reference: DateTime<Utc>,
) -> Result<DateTime<Utc>, CoreError> {
    match frequency {
        Frequency::Hourly => Ok(reference + Duration::hours(1)),
        Frequency::Daily => Ok(reference + Duration::hours(24)),
        Frequency::Weekly => Ok(reference + Duration::days(7)),
        Frequency::Monthly => {
            let elapsed_months = (reference.year() - anchor.year()) * 12
                + (i32::try_from(reference.month()).unwrap_or(0)
                    - i32::try_from(anchor.month()).unwrap_or(0));
            let mut step = u32::try_from(elapsed_months.max(1)).unwrap_or(1);
            loop {
                let candidate = anchor
                    .checked_add_months(Months::new(step))
                    .ok_or_else(|| CoreError::validation("monthly schedule overflows calendar"))?;
                if candidate > reference {
                    return Ok(candidate);
                }
                step += 1;
            }
        }
        Frequency::Custom => {
            let custom = custom.ok_or_else(|| {
                CoreError::validation("frequency 'custom' requires a customSchedule")
            })?;
            custom.validate()?;
            custom.next_after(anchor, reference)
        }
    }
}

/// Canonical keyword form used for the `(user, keywords)` identity.
pub fn normalize_keywords(keywords: &str) -> String {
    keywords.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    Succeeded,
    Failed,
    TimedOut,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::TimedOut => "timed-out",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub status: RunStatus,
    pub result_count: usize,
    pub message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleDraft {
    pub user_id: String,
    pub keywords: String,
    pub frequency: Frequency,
    #[serde(default)]
    pub custom_schedule: Option<CustomSchedule>,
    #[serde(default)]
    pub period: Option<PeriodFilter>,
    #[serde(default)]
    pub custom_period: Option<DateRange>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub max_results: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulePatch {
    pub expected_version: Option<u64>,
    pub frequency: Option<Frequency>,
    pub custom_schedule: Option<CustomSchedule>,
    pub period: Option<PeriodFilter>,
    pub custom_period: Option<DateRange>,
    pub is_active: Option<bool>,
    pub max_results: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledSearch {
    pub user_id: String,
    pub keywords: String,
    pub frequency: Frequency,
    pub custom_schedule: Option<CustomSchedule>,
    pub period: PeriodFilter,
    pub custom_period: Option<DateRange>,
    pub is_active: bool,
    pub max_results: u32,
    pub anchor_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_outcome: Option<RunOutcome>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledSearch {
    pub fn new(draft: ScheduleDraft, now: DateTime<Utc>) -> Result<Self, CoreError> {
        let user_id = draft.user_id.trim().to_string();
        if user_id.is_empty() {
            return Err(CoreError::validation("userId is required"));
        }
        let keywords = normalize_keywords(&draft.keywords);
        if keywords.is_empty() {
            return Err(CoreError::validation("keywords are required"));
        }

        let mut schedule = Self {
            user_id,
            keywords,
            frequency: draft.frequency,
            custom_schedule: draft.custom_schedule,
            period: draft.period.unwrap_or_default(),
            custom_period: draft.custom_period,
            is_active: draft.is_active.unwrap_or(true),
            max_results: draft.max_results.unwrap_or(DEFAULT_MAX_RESULTS),
            anchor_at: now,
            last_run_at: None,
            next_run_at: None,
            last_outcome: None,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        schedule.validate()?;
        schedule.reschedule_from(now)?;
        Ok(schedule)
    }

    pub fn key(&self) -> (&str, &str) {
        (&self.user_id, &self.keywords)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.frequency == Frequency::Custom {
            match &self.custom_schedule {
                Some(custom) => custom.validate()?,
                None => {
                    return Err(CoreError::validation(
                        "frequency 'custom' requires a customSchedule",
                    ))
                }
            }
        } else if let Some(custom) = self.custom_schedule.as_ref().filter(|c| !c.is_empty()) {
            custom.validate()?;
        }
        if self.period == PeriodFilter::Custom {
            match self.custom_period {
                Some(range) if range.from <= range.to => {}
                Some(_) => return Err(CoreError::validation("customPeriod.from is after customPeriod.to")),
                None => return Err(CoreError::validation("period 'custom' requires a customPeriod")),
            }
        }
        if self.max_results == 0 {
            return Err(CoreError::validation("maxResults must be at least 1"));
        }
        Ok(())
    }

    /// Apply an edit. Recurrence changes and activation restart the anchor
    /// at `now`; the whole edit is rejected if the result is invalid.
    pub fn apply_patch(&mut self, patch: SchedulePatch, now: DateTime<Utc>) -> Result<(), CoreError> {
        let mut next = self.clone();
        let mut recurrence_changed = false;
        if let Some(frequency) = patch.frequency {
            recurrence_changed |= frequency != next.frequency;
            next.frequency = frequency;
        }
        if let Some(custom) = patch.custom_schedule {
            recurrence_changed |= next.custom_schedule.as_ref() != Some(&custom);
            next.custom_schedule = Some(custom);
        }
        if let Some(active) = patch.is_active {
            recurrence_changed |= active != next.is_active;
            next.is_active = active;
        }
        if let Some(period) = patch.period {
            next.period = period;
        }
        if patch.custom_period.is_some() {
            next.custom_period = patch.custom_period;
        }
        if let Some(max_results) = patch.max_results {
            next.max_results = max_results;
        }
        next.validate()?;
        if recurrence_changed {
            next.reschedule_from(now)?;
        }
        next.updated_at = now;
        *self = next;
        Ok(())
    }

    pub fn toggle_active(&mut self, now: DateTime<Utc>) -> Result<(), CoreError> {
        self.apply_patch(
            SchedulePatch {
                is_active: Some(!self.is_active),
                ..SchedulePatch::default()
            },
            now,
        )
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.next_run_at.is_some_and(|at| at <= now)
    }

    /// Mark a run as started at `now` and advance `next_run_at` from it.
    pub fn claim(&mut self, now: DateTime<Utc>) -> Result<(), CoreError> {
        let next = self.compute_next(now)?;
        self.last_run_at = Some(now);
        self.next_run_at = Some(next);
        self.updated_at = now;
        Ok(())
    }

    /// Deactivate a schedule whose next run cannot be computed, leaving a
    /// failed outcome behind.
    pub fn suspend(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.is_active = false;
        self.next_run_at = None;
        self.last_outcome = Some(RunOutcome {
            status: RunStatus::Failed,
            result_count: 0,
            message: Some(message.into()),
            started_at: now,
            finished_at: now,
        });
        self.updated_at = now;
    }

    pub fn record_outcome(&mut self, outcome: RunOutcome) {
        self.updated_at = outcome.finished_at;
        self.last_outcome = Some(outcome);
    }

    pub fn bounds(&self, now: DateTime<Utc>) -> PeriodBounds {
        self.period.bounds(self.custom_period.as_ref(), now)
    }

    pub fn compute_next(&self, reference: DateTime<Utc>) -> Result<DateTime<Utc>, CoreError> {
        next_run(
            self.frequency,
            self.custom_schedule.as_ref(),
            self.anchor_at,
            reference,
        )
    }

    fn reschedule_from(&mut self, now: DateTime<Utc>) -> Result<(), CoreError> {
        self.anchor_at = now;
        self.next_run_at = if self.is_active {
            Some(self.compute_next(now)?)
        } else {
            None
        };
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceOption {
    pub value: String,
    pub label: String,
}

/// Vocabularies a client needs to render the schedule editor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleOptions {
    pub frequencies: Vec<ChoiceOption>,
    pub periods: Vec<ChoiceOption>,
    pub week_days: Vec<ChoiceOption>,
    pub hours: Vec<ChoiceOption>,
    pub month_days: Vec<ChoiceOption>,
}

pub fn schedule_options() -> ScheduleOptions {
    const WEEK_DAYS: [&str; 7] = [
        "Sunday",
        "Monday",
        "Tuesday",
        "Wednesday",
        "Thursday",
        "Friday",
        "Saturday",
    ];
    let choice = |value: String, label: String| ChoiceOption { value, label };
    ScheduleOptions {
        frequencies: Frequency::ALL
            .iter()
            .map(|f| choice(f.as_str().into(), f.label().into()))
            .collect(),
        periods: PeriodFilter::ALL
            .iter()
            .map(|p| choice(p.as_str().into(), p.label().into()))
            .collect(),
        week_days: WEEK_DAYS
            .iter()
            .enumerate()
            .map(|(i, name)| choice(i.to_string(), (*name).to_string()))
            .collect(),
        hours: (0..24)
            .map(|h| choice(h.to_string(), format!("{h:02}:00")))
            .collect(),
        month_days: (1..=31).map(|d| choice(d.to_string(), d.to_string())).collect(),
    }
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}
