use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Duration};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::BookedSession;

/// Half-open `[start, end)` overlap. Touching intervals do not overlap, so
/// back-to-back sessions are allowed.
pub fn intervals_overlap<T: PartialOrd>(a_start: T, a_end: T, b_start: T, b_end: T) -> bool {
    a_start < b_end && a_end > b_start
}

/// A prospective booking for one therapist.
#[derive(Debug, Clone, PartialEq)]
pub struct ProposedBooking {
    pub therapist_id: Uuid,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl ProposedBooking {
    /// An end time at or before the start time runs into the next day.
    pub fn on_date(therapist_id: Uuid, date: NaiveDate, start_time: NaiveTime, end_time: NaiveTime) -> Self {
        let start = date.and_time(start_time);
        let mut end = date.and_time(end_time);
        if end_time <= start_time {
            end = end.checked_add_signed(Duration::days(1)).unwrap_or(NaiveDateTime::MAX);
        }
        Self { therapist_id, start, end }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

/// Sessions that would collide with `proposal`. Cancelled sessions and other
/// therapists' sessions never collide.
pub fn find_conflicts<'a>(
    proposal: &ProposedBooking,
    existing: &'a [BookedSession],
) -> Vec<&'a BookedSession> {
    let conflicts: Vec<&BookedSession> = existing
        .iter()
        .filter(|session| session.therapist_id == proposal.therapist_id && session.is_active())
        .filter(|session| {
            intervals_overlap(proposal.start, proposal.end, session.starts_at(), session.ends_at())
        })
        .collect();

    if conflicts.is_empty() {
        debug!(
            "No conflicts for therapist {} at {} - {}",
            proposal.therapist_id, proposal.start, proposal.end
        );
    } else {
        warn!(
            "Conflict detected for therapist {} - {} overlapping sessions",
            proposal.therapist_id,
            conflicts.len()
        );
    }

    conflicts
}

pub fn has_conflict(proposal: &ProposedBooking, existing: &[BookedSession]) -> bool {
    !find_conflicts(proposal, existing).is_empty()
}
