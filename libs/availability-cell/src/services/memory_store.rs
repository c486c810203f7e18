use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::error::AvailabilityError;
use crate::models::{
    AvailabilityOverride, BookedSession, BookingWindowPolicy, NewSession, SessionStatus,
    WeeklyTemplate,
};
use crate::services::conflict::{has_conflict, ProposedBooking};
use crate::services::store::{AvailabilityStore, StoreResult};

#[derive(Default)]
struct State {
    templates: HashMap<Uuid, WeeklyTemplate>,
    overrides: Vec<AvailabilityOverride>,
    sessions: Vec<BookedSession>,
    policies: HashMap<Uuid, BookingWindowPolicy>,
}

/// Process-local store. The insert check and the write happen under one lock,
/// which gives the same all-or-nothing overlap guarantee as the database.
#[derive(Default)]
pub struct InMemoryAvailabilityStore {
    state: Mutex<State>,
}

impl InMemoryAvailabilityStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| AvailabilityError::Persistence("in-memory store lock poisoned".to_string()))
    }

    pub fn with_template(self, therapist_id: Uuid, template: WeeklyTemplate) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.templates.insert(therapist_id, template);
        }
        self
    }

    pub fn with_override(self, entry: AvailabilityOverride) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.overrides.push(entry);
        }
        self
    }

    pub fn with_session(self, session: BookedSession) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.sessions.push(session);
        }
        self
    }

    pub fn with_policy(self, therapist_id: Uuid, policy: BookingWindowPolicy) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.policies.insert(therapist_id, policy);
        }
        self
    }

    pub fn session_count(&self) -> usize {
        self.state.lock().map(|state| state.sessions.len()).unwrap_or(0)
    }
}

#[async_trait]
impl AvailabilityStore for InMemoryAvailabilityStore {
    async fn fetch_weekly_template(&self, therapist_id: Uuid) -> StoreResult<Option<WeeklyTemplate>> {
        Ok(self.lock()?.templates.get(&therapist_id).cloned())
    }

    async fn fetch_overrides(
        &self,
        therapist_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> StoreResult<Vec<AvailabilityOverride>> {
        Ok(self
            .lock()?
            .overrides
            .iter()
            .filter(|o| o.therapist_id == therapist_id && o.date >= start && o.date <= end)
            .cloned()
            .collect())
    }

    async fn fetch_sessions(
        &self,
        therapist_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> StoreResult<Vec<BookedSession>> {
        Ok(self
            .lock()?
            .sessions
            .iter()
            .filter(|s| s.therapist_id == therapist_id && s.is_active() && s.date >= start && s.date <= end)
            .cloned()
            .collect())
    }

    async fn fetch_booking_policy(&self, therapist_id: Uuid) -> StoreResult<Option<BookingWindowPolicy>> {
        Ok(self.lock()?.policies.get(&therapist_id).cloned())
    }

    async fn fetch_session(&self, session_id: Uuid) -> StoreResult<Option<BookedSession>> {
        Ok(self.lock()?.sessions.iter().find(|s| s.id == session_id).cloned())
    }

    async fn insert_session(&self, session: NewSession) -> StoreResult<BookedSession> {
        let mut state = self.lock()?;

        let proposal = ProposedBooking::on_date(
            session.therapist_id,
            session.date,
            session.start_time,
            session.end_time,
        );
        if has_conflict(&proposal, &state.sessions) {
            return Err(AvailabilityError::ConflictOnCommit {
                therapist_id: session.therapist_id,
                date: session.date,
                start: session.start_time,
                end: session.end_time,
            });
        }

        let booked = BookedSession {
            id: Uuid::new_v4(),
            therapist_id: session.therapist_id,
            client_id: session.client_id,
            date: session.date,
            start_time: session.start_time,
            end_time: session.end_time,
            status: SessionStatus::Scheduled,
        };
        state.sessions.push(booked.clone());
        Ok(booked)
    }

    async fn cancel_session(&self, session_id: Uuid) -> StoreResult<BookedSession> {
        let mut state = self.lock()?;
        let session = state
            .sessions
            .iter_mut()
            .find(|s| s.id == session_id && s.status == SessionStatus::Scheduled)
            .ok_or_else(|| AvailabilityError::NotFound(format!("No scheduled session {}", session_id)))?;
        session.status = SessionStatus::Cancelled;
        Ok(session.clone())
    }

    async fn upsert_weekly_template(&self, therapist_id: Uuid, template: &WeeklyTemplate) -> StoreResult<()> {
        self.lock()?.templates.insert(therapist_id, template.clone());
        Ok(())
    }

    async fn upsert_override(&self, entry: &AvailabilityOverride) -> StoreResult<AvailabilityOverride> {
        let mut state = self.lock()?;
        state
            .overrides
            .retain(|o| !(o.therapist_id == entry.therapist_id && o.date == entry.date));
        state.overrides.push(entry.clone());
        Ok(entry.clone())
    }

    async fn delete_override(&self, therapist_id: Uuid, date: NaiveDate) -> StoreResult<()> {
        let mut state = self.lock()?;
        let before = state.overrides.len();
        state
            .overrides
            .retain(|o| !(o.therapist_id == therapist_id && o.date == date));
        if state.overrides.len() == before {
            return Err(AvailabilityError::NotFound(format!(
                "No override for therapist {} on {}",
                therapist_id, date
            )));
        }
        Ok(())
    }
}
