//! Turns a weekly template, date overrides and booked sessions into the
//! bookable slots of a date range.
//!
//! The resolver is a pure function of its inputs and `now`: it owns no
//! state beyond what it was built from and performs no I/O. Its output is
//! advisory. A slot it reports can be taken before the caller commits, so
//! the commit path re-checks with the double-booking guard and the store's
//! overlap constraint, and reports `ConflictOnCommit` when it lost the race.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use shared_config::SessionDefaults;

use crate::error::AvailabilityError;
use crate::models::{
    AvailabilityOverride, BookedSession, BookingWindowPolicy, DaySchedule, ResolvedSlot,
    WeeklyTemplate,
};
use crate::services::conflict::intervals_overlap;
use crate::services::schedule::effective_schedule;

pub const DEFAULT_MAX_RANGE_DAYS: i64 = 90;

/// Everything fetched from persistence for one therapist.
#[derive(Debug, Clone, Default)]
pub struct ResolverInputs {
    pub template: Option<WeeklyTemplate>,
    pub overrides: Vec<AvailabilityOverride>,
    pub sessions: Vec<BookedSession>,
}

#[derive(Debug, Clone)]
pub struct SlotResolver {
    therapist_id: Uuid,
    template: Option<WeeklyTemplate>,
    overrides: HashMap<NaiveDate, AvailabilityOverride>,
    // Active sessions keyed by their start date.
    booked: BTreeMap<NaiveDate, Vec<(NaiveDateTime, NaiveDateTime)>>,
    policy: BookingWindowPolicy,
    defaults: SessionDefaults,
    max_range_days: i64,
}

impl SlotResolver {
    /// Validates the inputs up front so that slot generation cannot fail.
    ///
    /// Rows belonging to other therapists and cancelled sessions are ignored.
    /// When two overrides share a date the later one wins.
    pub fn new(
        therapist_id: Uuid,
        inputs: ResolverInputs,
        policy: BookingWindowPolicy,
        defaults: SessionDefaults,
    ) -> Result<Self, AvailabilityError> {
        policy.validate().map_err(AvailabilityError::ValidationError)?;

        if let Some(template) = &inputs.template {
            template.validate().map_err(AvailabilityError::InvalidTemplate)?;
        }

        let mut overrides = HashMap::new();
        for entry in inputs.overrides.into_iter().filter(|o| o.therapist_id == therapist_id) {
            overrides.insert(entry.date, entry);
        }

        for (date, entry) in &overrides {
            if let Some(schedule) = effective_schedule(*date, inputs.template.as_ref(), Some(entry), &defaults) {
                schedule
                    .validate()
                    .map_err(|e| AvailabilityError::InvalidTemplate(format!("override for {}: {}", date, e)))?;
            }
        }

        let mut booked: BTreeMap<NaiveDate, Vec<(NaiveDateTime, NaiveDateTime)>> = BTreeMap::new();
        for session in inputs
            .sessions
            .iter()
            .filter(|s| s.therapist_id == therapist_id && s.is_active())
        {
            booked
                .entry(session.date)
                .or_default()
                .push((session.starts_at(), session.ends_at()));
        }

        Ok(Self {
            therapist_id,
            template: inputs.template,
            overrides,
            booked,
            policy,
            defaults,
            max_range_days: DEFAULT_MAX_RANGE_DAYS,
        })
    }

    pub fn with_max_range_days(mut self, max_range_days: i64) -> Self {
        self.max_range_days = max_range_days;
        self
    }

    pub fn therapist_id(&self) -> Uuid {
        self.therapist_id
    }

    pub fn policy(&self) -> &BookingWindowPolicy {
        &self.policy
    }

    /// False when there is neither a template row nor an override to go on.
    pub fn has_availability_configured(&self) -> bool {
        self.template.as_ref().is_some_and(|t| !t.is_empty()) || !self.overrides.is_empty()
    }

    /// Lazily yields the slots of `[range_start, range_end]` in `(date, start)`
    /// order. Each call starts a fresh pass.
    pub fn slots(
        &self,
        range_start: NaiveDate,
        range_end: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Slots<'_>, AvailabilityError> {
        if range_end < range_start {
            return Err(AvailabilityError::InvalidRange(format!(
                "end date {} is before start date {}",
                range_end, range_start
            )));
        }

        let span_days = (range_end - range_start).num_days() + 1;
        if span_days > self.max_range_days {
            return Err(AvailabilityError::InvalidRange(format!(
                "range of {} days exceeds the limit of {} days",
                span_days, self.max_range_days
            )));
        }

        let earliest = self.policy.earliest_start(now);
        let latest = self.policy.latest_start(now);
        let first = range_start.max(earliest.date());
        let last = range_end.min(latest.date());

        debug!(
            "Resolving slots for therapist {} from {} to {} (bookable window {} - {})",
            self.therapist_id, range_start, range_end, earliest, latest
        );

        Ok(Slots {
            resolver: self,
            next_date: (first <= last).then_some(first),
            last,
            earliest,
            latest,
            pending: Vec::new().into_iter(),
        })
    }

    /// Every slot in the range, eagerly collected.
    pub fn resolve(
        &self,
        range_start: NaiveDate,
        range_end: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Vec<ResolvedSlot>, AvailabilityError> {
        Ok(self.slots(range_start, range_end, now)?.collect())
    }

    /// First open slot in the range; later dates are never generated.
    pub fn next_available(
        &self,
        range_start: NaiveDate,
        range_end: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Option<ResolvedSlot>, AvailabilityError> {
        Ok(self.slots(range_start, range_end, now)?.next())
    }

    fn slots_for_date(
        &self,
        date: NaiveDate,
        earliest: NaiveDateTime,
        latest: NaiveDateTime,
    ) -> Vec<ResolvedSlot> {
        let Some(schedule) = effective_schedule(
            date,
            self.template.as_ref(),
            self.overrides.get(&date),
            &self.defaults,
        ) else {
            debug!("No availability for therapist {} on {}", self.therapist_id, date);
            return Vec::new();
        };

        let booked_today = self.booked.get(&date).map_or(0, Vec::len);
        let capacity = (schedule.max_sessions_per_day.max(0) as usize).saturating_sub(booked_today);
        if capacity == 0 {
            debug!("Therapist {} is fully booked on {}", self.therapist_id, date);
            return Vec::new();
        }

        let slots = self.generate(date, &schedule, earliest, latest, capacity);
        debug!("Therapist {} has {} open slots on {}", self.therapist_id, slots.len(), date);
        slots
    }

    fn generate(
        &self,
        date: NaiveDate,
        schedule: &DaySchedule,
        earliest: NaiveDateTime,
        latest: NaiveDateTime,
        capacity: usize,
    ) -> Vec<ResolvedSlot> {
        let duration = schedule.session_duration();
        let step = schedule.step();
        let day_end = date.and_time(schedule.end_time);

        let mut slots = Vec::new();
        let mut cursor = date.and_time(schedule.start_time);

        while cursor + duration <= day_end && cursor <= latest && slots.len() < capacity {
            let slot_end = cursor + duration;

            if cursor >= earliest && !self.overlaps_booking(date, cursor, slot_end) {
                slots.push(ResolvedSlot {
                    date,
                    start_time: cursor.time(),
                    end_time: slot_end.time(),
                    duration_minutes: schedule.session_duration_minutes,
                });
            }

            cursor += step;
        }

        slots
    }

    fn overlaps_booking(&self, date: NaiveDate, start: NaiveDateTime, end: NaiveDateTime) -> bool {
        // Sessions from the previous day may run past midnight.
        let from = date.pred_opt().unwrap_or(date);
        self.booked
            .range(from..=date)
            .flat_map(|(_, intervals)| intervals.iter())
            .any(|(booked_start, booked_end)| intervals_overlap(start, end, *booked_start, *booked_end))
    }
}

/// Lazy, cloneable pass over resolved slots. Dates are expanded one at a time.
#[derive(Debug, Clone)]
pub struct Slots<'r> {
    resolver: &'r SlotResolver,
    next_date: Option<NaiveDate>,
    last: NaiveDate,
    earliest: NaiveDateTime,
    latest: NaiveDateTime,
    pending: std::vec::IntoIter<ResolvedSlot>,
}

impl Iterator for Slots<'_> {
    type Item = ResolvedSlot;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(slot) = self.pending.next() {
                return Some(slot);
            }

            let date = self.next_date?;
            self.next_date = date.succ_opt().filter(|next| *next <= self.last);
            self.pending = self
                .resolver
                .slots_for_date(date, self.earliest, self.latest)
                .into_iter();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, TimeZone};

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 3).unwrap()
    }

    fn resolver_with(schedule: DaySchedule, policy: BookingWindowPolicy) -> SlotResolver {
        let mut template = WeeklyTemplate::default();
        template.set_day(1, schedule).unwrap();
        SlotResolver::new(
            Uuid::nil(),
            ResolverInputs { template: Some(template), ..Default::default() },
            policy,
            SessionDefaults::default(),
        )
        .unwrap()
    }

    fn morning(duration: i32, buffer: i32, max: i32) -> DaySchedule {
        DaySchedule {
            enabled: true,
            start_time: time(9, 0),
            end_time: time(12, 0),
            session_duration_minutes: duration,
            buffer_minutes: buffer,
            max_sessions_per_day: max,
        }
    }

    #[test]
    fn buffer_spaces_slots_and_last_slot_must_fit() {
        let resolver = resolver_with(morning(50, 10, 8), BookingWindowPolicy::default());
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
        let slots = resolver.resolve(monday(), monday(), now).unwrap();

        let starts: Vec<NaiveTime> = slots.iter().map(|s| s.start_time).collect();
        assert_eq!(starts, vec![time(9, 0), time(10, 0), time(11, 0)]);
        assert!(slots.iter().all(|s| s.end_time - s.start_time == chrono::Duration::minutes(50)));
    }

    #[test]
    fn daily_cap_keeps_earliest_slots() {
        let resolver = resolver_with(morning(30, 0, 2), BookingWindowPolicy::default());
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
        let slots = resolver.resolve(monday(), monday(), now).unwrap();

        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].start_time, time(9, 0));
        assert_eq!(slots[1].start_time, time(9, 30));
    }

    #[test]
    fn lead_time_drops_imminent_slots() {
        let policy = BookingWindowPolicy {
            minimum_lead_minutes: 60,
            ..BookingWindowPolicy::default()
        };
        let resolver = resolver_with(morning(60, 0, 8), policy);
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 8, 45, 0).unwrap();
        let slots = resolver.resolve(monday(), monday(), now).unwrap();

        let starts: Vec<NaiveTime> = slots.iter().map(|s| s.start_time).collect();
        assert_eq!(starts, vec![time(10, 0), time(11, 0)]);
    }

    #[test]
    fn reversed_and_oversized_ranges_are_rejected() {
        let resolver = resolver_with(morning(60, 0, 8), BookingWindowPolicy::default());
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();

        let reversed = resolver.slots(monday(), monday().pred_opt().unwrap(), now);
        assert!(matches!(reversed, Err(AvailabilityError::InvalidRange(_))));

        let too_long = resolver.slots(monday(), monday() + chrono::Duration::days(90), now);
        assert!(matches!(too_long, Err(AvailabilityError::InvalidRange(_))));

        let at_limit = resolver.slots(monday(), monday() + chrono::Duration::days(89), now);
        assert!(at_limit.is_ok());
    }

    #[test]
    fn malformed_template_fails_construction() {
        let mut template = WeeklyTemplate::default();
        template.set_day(2, DaySchedule { end_time: time(8, 0), ..morning(60, 0, 8) }).unwrap();

        let result = SlotResolver::new(
            Uuid::nil(),
            ResolverInputs { template: Some(template), ..Default::default() },
            BookingWindowPolicy::default(),
            SessionDefaults::default(),
        );
        assert!(matches!(result, Err(AvailabilityError::InvalidTemplate(_))));
    }

    #[test]
    fn override_hours_ending_before_template_start_are_rejected() {
        let mut template = WeeklyTemplate::default();
        template.set_day(1, morning(60, 0, 8)).unwrap();
        let mut bad = AvailabilityOverride::blackout(Uuid::nil(), monday());
        bad.is_available = true;
        bad.end_time = Some(time(8, 0));

        let result = SlotResolver::new(
            Uuid::nil(),
            ResolverInputs { template: Some(template), overrides: vec![bad], sessions: vec![] },
            BookingWindowPolicy::default(),
            SessionDefaults::default(),
        );
        assert!(matches!(result, Err(AvailabilityError::InvalidTemplate(_))));
    }

    #[test]
    fn slots_iterator_restarts() {
        let resolver = resolver_with(morning(60, 0, 8), BookingWindowPolicy::default());
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();

        let mut first_pass = resolver.slots(monday(), monday(), now).unwrap();
        let head = first_pass.next();
        let rest: Vec<_> = first_pass.collect();
        let second_pass: Vec<_> = resolver.slots(monday(), monday(), now).unwrap().collect();

        assert_eq!(head.as_ref(), second_pass.first());
        assert_eq!(rest.len() + 1, second_pass.len());
    }
}
