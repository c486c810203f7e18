use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_config::{BookingDefaults, SessionDefaults};

// ==============================================================================
// SCHEDULE TEMPLATES
// ==============================================================================

/// Upper bound for a session length and for the buffer after it.
pub const MAX_SESSION_MINUTES: i32 = 24 * 60;
pub const MAX_ADVANCE_BOOKING_DAYS: i64 = 3 * 365;
pub const MAX_CANCELLATION_HOURS: i64 = 365 * 24;
pub const MAX_LEAD_MINUTES: i64 = 365 * 24 * 60;

/// Recurring schedule for one day of the week.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaySchedule {
    pub enabled: bool,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub session_duration_minutes: i32,
    pub buffer_minutes: i32,
    pub max_sessions_per_day: i32,
}

impl DaySchedule {
    pub fn from_defaults(defaults: &SessionDefaults, enabled: bool) -> Self {
        Self {
            enabled,
            start_time: defaults.start_time,
            end_time: defaults.end_time,
            session_duration_minutes: defaults.session_duration_minutes,
            buffer_minutes: defaults.buffer_minutes,
            max_sessions_per_day: defaults.max_sessions_per_day,
        }
    }

    pub fn session_duration(&self) -> Duration {
        Duration::minutes(i64::from(self.session_duration_minutes))
    }

    /// Distance between consecutive slot starts.
    pub fn step(&self) -> Duration {
        Duration::minutes(i64::from(self.session_duration_minutes) + i64::from(self.buffer_minutes))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.start_time >= self.end_time {
            return Err(format!(
                "start time {} must be before end time {}",
                self.start_time, self.end_time
            ));
        }
        if self.session_duration_minutes <= 0 || self.session_duration_minutes > MAX_SESSION_MINUTES {
            return Err(format!(
                "session duration must be between 1 and {} minutes, got {}",
                MAX_SESSION_MINUTES, self.session_duration_minutes
            ));
        }
        if self.buffer_minutes < 0 || self.buffer_minutes > MAX_SESSION_MINUTES {
            return Err(format!(
                "buffer must be between 0 and {} minutes, got {}",
                MAX_SESSION_MINUTES, self.buffer_minutes
            ));
        }
        if self.max_sessions_per_day < 1 {
            return Err(format!(
                "max sessions per day must be at least 1, got {}",
                self.max_sessions_per_day
            ));
        }
        Ok(())
    }
}

/// A therapist's week, indexed by day of week (0 = Sunday .. 6 = Saturday).
/// A missing day is treated as disabled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeeklyTemplate {
    pub days: [Option<DaySchedule>; 7],
}

impl WeeklyTemplate {
    pub fn day(&self, day_of_week: u32) -> Option<&DaySchedule> {
        self.days.get(day_of_week as usize).and_then(Option::as_ref)
    }

    pub fn for_date(&self, date: NaiveDate) -> Option<&DaySchedule> {
        self.day(day_of_week(date))
    }

    pub fn set_day(&mut self, day_of_week: u32, schedule: DaySchedule) -> Result<(), String> {
        let slot = self
            .days
            .get_mut(day_of_week as usize)
            .ok_or_else(|| format!("day of week must be between 0 (Sunday) and 6 (Saturday), got {}", day_of_week))?;
        *slot = Some(schedule);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.days.iter().all(Option::is_none)
    }

    pub fn validate(&self) -> Result<(), String> {
        for (day, schedule) in self.days.iter().enumerate() {
            if let Some(schedule) = schedule {
                schedule.validate().map_err(|e| format!("day {}: {}", day, e))?;
            }
        }
        Ok(())
    }
}

/// 0 = Sunday, 1 = Monday, ... 6 = Saturday.
pub fn day_of_week(date: NaiveDate) -> u32 {
    date.weekday().num_days_from_sunday()
}

// ==============================================================================
// OVERRIDES
// ==============================================================================

/// Date-specific exception to the weekly template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityOverride {
    pub therapist_id: Uuid,
    pub date: NaiveDate,
    pub is_available: bool,
    #[serde(default)]
    pub start_time: Option<NaiveTime>,
    #[serde(default)]
    pub end_time: Option<NaiveTime>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl AvailabilityOverride {
    pub fn blackout(therapist_id: Uuid, date: NaiveDate) -> Self {
        Self {
            therapist_id,
            date,
            is_available: false,
            start_time: None,
            end_time: None,
            reason: None,
        }
    }

    pub fn special_hours(therapist_id: Uuid, date: NaiveDate, start: NaiveTime, end: NaiveTime) -> Self {
        Self {
            therapist_id,
            date,
            is_available: true,
            start_time: Some(start),
            end_time: Some(end),
            reason: None,
        }
    }

    pub fn has_explicit_hours(&self) -> bool {
        self.start_time.is_some() || self.end_time.is_some()
    }
}

// ==============================================================================
// SESSIONS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Scheduled,
    Completed,
    Cancelled,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Scheduled => write!(f, "scheduled"),
            SessionStatus::Completed => write!(f, "completed"),
            SessionStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookedSession {
    pub id: Uuid,
    pub therapist_id: Uuid,
    #[serde(default)]
    pub client_id: Option<Uuid>,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub status: SessionStatus,
}

impl BookedSession {
    pub fn is_active(&self) -> bool {
        self.status != SessionStatus::Cancelled
    }

    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.start_time)
    }

    /// An end time at or before the start time runs into the next day.
    pub fn ends_at(&self) -> NaiveDateTime {
        let end = self.date.and_time(self.end_time);
        if self.end_time <= self.start_time {
            end.checked_add_signed(Duration::days(1)).unwrap_or(NaiveDateTime::MAX)
        } else {
            end
        }
    }

    pub fn starts_at_utc(&self) -> DateTime<Utc> {
        self.starts_at().and_utc()
    }
}

/// A session row about to be inserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSession {
    pub therapist_id: Uuid,
    pub client_id: Option<Uuid>,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub notes: Option<String>,
}

// ==============================================================================
// DERIVED SLOTS AND POLICY
// ==============================================================================

/// A bookable `[start, end)` interval. Computed on demand, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedSlot {
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub duration_minutes: i32,
}

impl ResolvedSlot {
    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.start_time)
    }

    pub fn ends_at(&self) -> NaiveDateTime {
        self.starts_at() + Duration::minutes(i64::from(self.duration_minutes))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingWindowPolicy {
    pub advance_booking_days: i64,
    pub cancellation_hours: i64,
    #[serde(default)]
    pub minimum_lead_minutes: i64,
}

impl From<&BookingDefaults> for BookingWindowPolicy {
    fn from(defaults: &BookingDefaults) -> Self {
        Self {
            advance_booking_days: defaults.advance_booking_days,
            cancellation_hours: defaults.cancellation_hours,
            minimum_lead_minutes: defaults.minimum_lead_minutes,
        }
    }
}

impl Default for BookingWindowPolicy {
    fn default() -> Self {
        Self::from(&BookingDefaults::default())
    }
}

impl BookingWindowPolicy {
    pub fn validate(&self) -> Result<(), String> {
        if !(0..=MAX_ADVANCE_BOOKING_DAYS).contains(&self.advance_booking_days) {
            return Err(format!(
                "advance booking days must be between 0 and {}, got {}",
                MAX_ADVANCE_BOOKING_DAYS, self.advance_booking_days
            ));
        }
        if !(0..=MAX_CANCELLATION_HOURS).contains(&self.cancellation_hours) {
            return Err(format!(
                "cancellation hours must be between 0 and {}, got {}",
                MAX_CANCELLATION_HOURS, self.cancellation_hours
            ));
        }
        if !(0..=MAX_LEAD_MINUTES).contains(&self.minimum_lead_minutes) {
            return Err(format!(
                "minimum lead time must be between 0 and {} minutes, got {}",
                MAX_LEAD_MINUTES, self.minimum_lead_minutes
            ));
        }
        Ok(())
    }

    /// Earliest bookable instant. Saturates instead of overflowing.
    pub fn earliest_start(&self, now: DateTime<Utc>) -> NaiveDateTime {
        Duration::try_minutes(self.minimum_lead_minutes)
            .and_then(|lead| now.checked_add_signed(lead))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
            .naive_utc()
    }

    /// Latest instant a slot may start at. Saturates instead of overflowing.
    pub fn latest_start(&self, now: DateTime<Utc>) -> NaiveDateTime {
        Duration::try_days(self.advance_booking_days)
            .and_then(|window| now.checked_add_signed(window))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
            .naive_utc()
    }

    /// Required notice before a session starts.
    pub fn cancellation_notice(&self) -> Duration {
        Duration::try_hours(self.cancellation_hours).unwrap_or(Duration::MAX)
    }
}

// ==============================================================================
// REQUEST / RESPONSE DTOs
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct SlotQuery {
    pub start: NaiveDate,
    pub end: Option<NaiveDate>,
    pub strict: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NextSlotQuery {
    pub from: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CancelQuery {
    /// Cancel inside the notice window anyway, accepting the late penalty.
    pub accept_late_penalty: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictCheckRequest {
    pub therapist_id: Uuid,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    /// Checked against these when given, otherwise against stored sessions.
    pub sessions: Option<Vec<BookedSession>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictCheckResponse {
    pub conflict: bool,
    pub conflicting_sessions: Vec<BookedSession>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub client_id: Option<Uuid>,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideRequest {
    pub date: NaiveDate,
    pub is_available: bool,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub reason: Option<String>,
}
