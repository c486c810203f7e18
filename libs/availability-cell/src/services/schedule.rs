//! Picks the schedule that governs a single calendar date.
//!
//! An override for the date wins over the weekly template:
//! - `is_available == false` blacks the date out.
//! - `is_available == true` with hours replaces the template's hours; a
//!   missing bound is taken from the template (or the defaults).
//! - `is_available == true` without hours forces the day on using the
//!   template's hours, even when the template disables that weekday.
//!
//! Duration, buffer and daily cap always come from the weekday's template
//! row when one exists, otherwise from the configured session defaults.

use chrono::NaiveDate;

use shared_config::SessionDefaults;

use crate::models::{AvailabilityOverride, DaySchedule, WeeklyTemplate};

/// The schedule in force on `date`, or `None` when nothing is bookable.
pub fn effective_schedule(
    date: NaiveDate,
    template: Option<&WeeklyTemplate>,
    override_entry: Option<&AvailabilityOverride>,
    defaults: &SessionDefaults,
) -> Option<DaySchedule> {
    let weekday_row = template.and_then(|t| t.for_date(date));

    match override_entry {
        Some(entry) if !entry.is_available => None,
        Some(entry) => Some(apply_override(entry, weekday_row, defaults)),
        None => weekday_row.filter(|row| row.enabled).cloned(),
    }
}

fn apply_override(
    entry: &AvailabilityOverride,
    weekday_row: Option<&DaySchedule>,
    defaults: &SessionDefaults,
) -> DaySchedule {
    let mut schedule = weekday_row
        .cloned()
        .unwrap_or_else(|| DaySchedule::from_defaults(defaults, true));

    schedule.enabled = true;
    if let Some(start) = entry.start_time {
        schedule.start_time = start;
    }
    if let Some(end) = entry.end_time {
        schedule.end_time = end;
    }
    schedule
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use uuid::Uuid;

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 3).unwrap()
    }

    fn template_with_monday(enabled: bool) -> WeeklyTemplate {
        let mut template = WeeklyTemplate::default();
        template
            .set_day(1, DaySchedule {
                enabled,
                start_time: time(9, 0),
                end_time: time(12, 0),
                session_duration_minutes: 50,
                buffer_minutes: 10,
                max_sessions_per_day: 3,
            })
            .unwrap();
        template
    }

    #[test]
    fn template_governs_without_override() {
        let defaults = SessionDefaults::default();
        let enabled = template_with_monday(true);
        let disabled = template_with_monday(false);

        assert!(effective_schedule(monday(), Some(&enabled), None, &defaults).is_some());
        assert!(effective_schedule(monday(), Some(&disabled), None, &defaults).is_none());
        assert!(effective_schedule(monday(), None, None, &defaults).is_none());
    }

    #[test]
    fn blackout_wins_over_template() {
        let template = template_with_monday(true);
        let blackout = AvailabilityOverride::blackout(Uuid::nil(), monday());
        let schedule = effective_schedule(monday(), Some(&template), Some(&blackout), &SessionDefaults::default());
        assert!(schedule.is_none());
    }

    #[test]
    fn special_hours_keep_template_session_shape() {
        let template = template_with_monday(true);
        let special = AvailabilityOverride::special_hours(Uuid::nil(), monday(), time(13, 0), time(15, 0));
        let schedule = effective_schedule(monday(), Some(&template), Some(&special), &SessionDefaults::default())
            .unwrap();

        assert_eq!(schedule.start_time, time(13, 0));
        assert_eq!(schedule.end_time, time(15, 0));
        assert_eq!(schedule.session_duration_minutes, 50);
        assert_eq!(schedule.buffer_minutes, 10);
    }

    #[test]
    fn available_without_hours_forces_disabled_day_on() {
        let template = template_with_monday(false);
        let mut forced = AvailabilityOverride::blackout(Uuid::nil(), monday());
        forced.is_available = true;

        let schedule = effective_schedule(monday(), Some(&template), Some(&forced), &SessionDefaults::default())
            .unwrap();
        assert!(schedule.enabled);
        assert_eq!(schedule.start_time, time(9, 0));
        assert_eq!(schedule.end_time, time(12, 0));
    }

    #[test]
    fn override_without_template_uses_defaults() {
        let defaults = SessionDefaults::default();
        let mut partial = AvailabilityOverride::blackout(Uuid::nil(), monday());
        partial.is_available = true;
        partial.end_time = Some(time(11, 0));

        let schedule = effective_schedule(monday(), None, Some(&partial), &defaults).unwrap();
        assert_eq!(schedule.start_time, defaults.start_time);
        assert_eq!(schedule.end_time, time(11, 0));
        assert_eq!(schedule.session_duration_minutes, defaults.session_duration_minutes);
    }
}
