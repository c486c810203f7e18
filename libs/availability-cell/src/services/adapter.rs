//! Boundary translation for the two availability payloads clients send.
//!
//! Older clients post one row per weekday under `templates`; newer ones post
//! a weekday-keyed object under `availability` with shared session settings.
//! Both become a single `WeeklyTemplate` here, and nothing downstream knows
//! which shape arrived.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use tracing::debug;

use shared_config::SessionDefaults;

use crate::error::AvailabilityError;
use crate::models::{DaySchedule, WeeklyTemplate};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AvailabilityPayload {
    Legacy { templates: Vec<LegacyTemplateRow> },
    Weekly { availability: WeeklyAvailability },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyTemplateRow {
    pub day_of_week: i32,
    pub start_time: String,
    pub end_time: String,
    #[serde(default)]
    pub session_duration: Option<i32>,
    #[serde(default)]
    pub buffer_time: Option<i32>,
    #[serde(default)]
    pub max_sessions: Option<i32>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DayAvailability {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WeeklyAvailability {
    #[serde(default)]
    pub sunday: Option<DayAvailability>,
    #[serde(default)]
    pub monday: Option<DayAvailability>,
    #[serde(default)]
    pub tuesday: Option<DayAvailability>,
    #[serde(default)]
    pub wednesday: Option<DayAvailability>,
    #[serde(default)]
    pub thursday: Option<DayAvailability>,
    #[serde(default)]
    pub friday: Option<DayAvailability>,
    #[serde(default)]
    pub saturday: Option<DayAvailability>,
    #[serde(default)]
    pub session_duration: Option<i32>,
    #[serde(default)]
    pub buffer_time: Option<i32>,
    #[serde(default)]
    pub max_sessions_per_day: Option<i32>,
}

impl WeeklyAvailability {
    fn days(&self) -> [Option<&DayAvailability>; 7] {
        [
            self.sunday.as_ref(),
            self.monday.as_ref(),
            self.tuesday.as_ref(),
            self.wednesday.as_ref(),
            self.thursday.as_ref(),
            self.friday.as_ref(),
            self.saturday.as_ref(),
        ]
    }
}

impl AvailabilityPayload {
    pub fn into_template(self, defaults: &SessionDefaults) -> Result<WeeklyTemplate, AvailabilityError> {
        let template = match self {
            AvailabilityPayload::Legacy { templates } => {
                debug!("Translating {} legacy template rows", templates.len());
                from_legacy_rows(&templates, defaults)?
            }
            AvailabilityPayload::Weekly { availability } => {
                debug!("Translating weekly availability object");
                from_weekly(&availability, defaults)?
            }
        };

        template.validate().map_err(AvailabilityError::InvalidTemplate)?;
        Ok(template)
    }
}

fn from_legacy_rows(
    rows: &[LegacyTemplateRow],
    defaults: &SessionDefaults,
) -> Result<WeeklyTemplate, AvailabilityError> {
    let mut template = WeeklyTemplate::default();

    // Later rows for the same weekday replace earlier ones.
    for row in rows {
        let day = u32::try_from(row.day_of_week).map_err(|_| {
            AvailabilityError::InvalidTemplate(format!("day of week {} is out of range", row.day_of_week))
        })?;
        let enabled = row.is_active.unwrap_or(true);

        let schedule = DaySchedule {
            enabled,
            start_time: time_or_default(Some(&row.start_time), defaults.start_time, enabled)?,
            end_time: time_or_default(Some(&row.end_time), defaults.end_time, enabled)?,
            session_duration_minutes: row.session_duration.unwrap_or(defaults.session_duration_minutes),
            buffer_minutes: row.buffer_time.unwrap_or(defaults.buffer_minutes),
            max_sessions_per_day: row.max_sessions.unwrap_or(defaults.max_sessions_per_day),
        };

        template.set_day(day, schedule).map_err(AvailabilityError::InvalidTemplate)?;
    }

    Ok(template)
}

fn from_weekly(
    availability: &WeeklyAvailability,
    defaults: &SessionDefaults,
) -> Result<WeeklyTemplate, AvailabilityError> {
    let mut template = WeeklyTemplate::default();

    for (day, entry) in availability.days().into_iter().enumerate() {
        let Some(entry) = entry else { continue };

        let schedule = DaySchedule {
            enabled: entry.enabled,
            start_time: time_or_default(entry.start.as_deref(), defaults.start_time, entry.enabled)?,
            end_time: time_or_default(entry.end.as_deref(), defaults.end_time, entry.enabled)?,
            session_duration_minutes: availability
                .session_duration
                .unwrap_or(defaults.session_duration_minutes),
            buffer_minutes: availability.buffer_time.unwrap_or(defaults.buffer_minutes),
            max_sessions_per_day: availability
                .max_sessions_per_day
                .unwrap_or(defaults.max_sessions_per_day),
        };

        template.set_day(day as u32, schedule).map_err(AvailabilityError::InvalidTemplate)?;
    }

    Ok(template)
}

/// Accepts `HH:MM` or `HH:MM:SS`.
pub fn parse_time_of_day(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .ok()
}

// Disabled days tolerate blank or junk times and fall back to the defaults.
fn time_or_default(
    raw: Option<&str>,
    default: NaiveTime,
    strict: bool,
) -> Result<NaiveTime, AvailabilityError> {
    match raw.filter(|value| !value.trim().is_empty()) {
        None => Ok(default),
        Some(value) => match parse_time_of_day(value) {
            Some(time) => Ok(time),
            None if strict => Err(AvailabilityError::ValidationError(format!(
                "invalid time of day {:?}, expected HH:MM",
                value
            ))),
            None => Ok(default),
        },
    }
}
