use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::{AppConfig, BookingDefaults, SessionDefaults};
use shared_models::auth::User;

use crate::error::AvailabilityError;
use crate::models::{
    AvailabilityOverride, BookedSession, BookingWindowPolicy, ConflictCheckRequest,
    ConflictCheckResponse, CreateSessionRequest, NewSession, OverrideRequest, ResolvedSlot,
    WeeklyTemplate,
};
use crate::services::adapter::AvailabilityPayload;
use crate::services::cancellation::{cancellation_deadline, evaluate_cancellation, CancellationDecision};
use crate::services::conflict::{find_conflicts, ProposedBooking};
use crate::services::resolver::{ResolverInputs, SlotResolver};
use crate::services::schedule::effective_schedule;
use crate::services::store::{session_lookup_start, AvailabilityStore, SupabaseAvailabilityStore};

#[derive(Debug, Clone, Serialize)]
pub struct CancellationOutcome {
    pub session: BookedSession,
    pub decision: CancellationDecision,
    pub deadline: DateTime<Utc>,
    pub cancelled: bool,
    /// Cancelled inside the notice window at the caller's request.
    pub late_penalty: bool,
}

pub struct AvailabilityService {
    store: Arc<dyn AvailabilityStore>,
    session_defaults: SessionDefaults,
    booking_defaults: BookingDefaults,
    max_range_days: i64,
}

impl AvailabilityService {
    pub fn new(config: &AppConfig, auth_token: Option<String>) -> Self {
        Self::with_store(config, Arc::new(SupabaseAvailabilityStore::new(config, auth_token)))
    }

    pub fn with_store(config: &AppConfig, store: Arc<dyn AvailabilityStore>) -> Self {
        Self {
            store,
            session_defaults: config.session_defaults.clone(),
            booking_defaults: config.booking_defaults.clone(),
            max_range_days: config.max_range_days,
        }
    }

    /// Bookable slots for `[start, end]`, ordered by `(date, start_time)`.
    ///
    /// The result is a snapshot: a slot may be taken before it is committed,
    /// in which case `commit_booking` reports `ConflictOnCommit`.
    /// With `strict`, a therapist with no template and no overrides is an
    /// `UnknownTherapist` error instead of an empty list.
    pub async fn resolve(
        &self,
        therapist_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
        now: DateTime<Utc>,
        strict: bool,
    ) -> Result<Vec<ResolvedSlot>, AvailabilityError> {
        self.validate_range(start, end)?;

        let resolver = self.load_resolver(therapist_id, start, end, None).await?;
        if strict && !resolver.has_availability_configured() {
            return Err(AvailabilityError::UnknownTherapist(therapist_id.to_string()));
        }

        let slots = resolver.resolve(start, end, now)?;
        debug!("Resolved {} slots for therapist {}", slots.len(), therapist_id);
        Ok(slots)
    }

    /// First open slot on or after `from` (default: today) inside the
    /// therapist's advance booking window.
    pub async fn next_available(
        &self,
        therapist_id: Uuid,
        from: Option<NaiveDate>,
        now: DateTime<Utc>,
    ) -> Result<Option<ResolvedSlot>, AvailabilityError> {
        let policy = self.booking_policy(therapist_id).await?;
        let start = from.unwrap_or_else(|| now.date_naive()).max(now.date_naive());
        let window_end = policy.latest_start(now).date();
        let range_end = Duration::try_days(self.max_range_days - 1)
            .and_then(|span| start.checked_add_signed(span))
            .map_or(window_end, |limit| window_end.min(limit));

        if range_end < start {
            return Ok(None);
        }

        let resolver = self.load_resolver(therapist_id, start, range_end, Some(policy)).await?;
        resolver.next_available(start, range_end, now)
    }

    /// Double-booking check against the given sessions, or against stored ones.
    pub async fn check_conflict(
        &self,
        request: ConflictCheckRequest,
    ) -> Result<ConflictCheckResponse, AvailabilityError> {
        let proposal = ProposedBooking::on_date(
            request.therapist_id,
            request.date,
            request.start_time,
            request.end_time,
        );

        let existing = match request.sessions {
            Some(sessions) => sessions,
            None => {
                self.store
                    .fetch_sessions(
                        request.therapist_id,
                        session_lookup_start(request.date),
                        proposal.end.date(),
                    )
                    .await?
            }
        };

        let conflicting_sessions: Vec<BookedSession> =
            find_conflicts(&proposal, &existing).into_iter().cloned().collect();

        Ok(ConflictCheckResponse {
            conflict: !conflicting_sessions.is_empty(),
            conflicting_sessions,
        })
    }

    /// Re-validates the requested slot and inserts it. The store's overlap
    /// constraint is authoritative. Losing a race, here or there, surfaces as
    /// `ConflictOnCommit`, which callers should answer by re-resolving.
    pub async fn commit_booking(
        &self,
        therapist_id: Uuid,
        request: CreateSessionRequest,
        now: DateTime<Utc>,
    ) -> Result<BookedSession, AvailabilityError> {
        if request.start_time >= request.end_time {
            return Err(AvailabilityError::ValidationError(
                "Session start time must be before end time".to_string(),
            ));
        }

        debug!(
            "Committing booking for therapist {} on {} {}-{}",
            therapist_id, request.date, request.start_time, request.end_time
        );

        let resolver = self.load_resolver(therapist_id, request.date, request.date, None).await?;
        let offered = resolver
            .slots(request.date, request.date, now)?
            .any(|slot| slot.start_time == request.start_time && slot.end_time == request.end_time);

        if !offered {
            let conflict = self
                .check_conflict(ConflictCheckRequest {
                    therapist_id,
                    date: request.date,
                    start_time: request.start_time,
                    end_time: request.end_time,
                    sessions: None,
                })
                .await?;

            if conflict.conflict {
                warn!(
                    "Slot {} {}-{} for therapist {} was taken before commit",
                    request.date, request.start_time, request.end_time, therapist_id
                );
                return Err(AvailabilityError::ConflictOnCommit {
                    therapist_id,
                    date: request.date,
                    start: request.start_time,
                    end: request.end_time,
                });
            }

            return Err(AvailabilityError::ValidationError(format!(
                "{} {}-{} is not an offered slot",
                request.date, request.start_time, request.end_time
            )));
        }

        let session = self
            .store
            .insert_session(NewSession {
                therapist_id,
                client_id: request.client_id,
                date: request.date,
                start_time: request.start_time,
                end_time: request.end_time,
                notes: request.notes,
            })
            .await?;

        info!("Booked session {} for therapist {}", session.id, therapist_id);
        Ok(session)
    }

    /// Only the session's client, its therapist or an admin may see it.
    pub async fn evaluate_cancellation(
        &self,
        session_id: Uuid,
        user: &User,
        now: DateTime<Utc>,
    ) -> Result<CancellationOutcome, AvailabilityError> {
        let session = self.find_session(session_id).await?;
        ensure_session_party(user, &session)?;
        let policy = self.booking_policy(session.therapist_id).await?;

        Ok(CancellationOutcome {
            decision: evaluate_cancellation(&session, now, &policy),
            deadline: cancellation_deadline(&session, &policy),
            session,
            cancelled: false,
            late_penalty: false,
        })
    }

    /// Cancels when the notice window allows it. Inside the window the session
    /// is only cancelled if the caller accepts the late penalty.
    pub async fn cancel_booking(
        &self,
        session_id: Uuid,
        user: &User,
        accept_late_penalty: bool,
        now: DateTime<Utc>,
    ) -> Result<CancellationOutcome, AvailabilityError> {
        let mut outcome = self.evaluate_cancellation(session_id, user, now).await?;

        let proceed = match &outcome.decision {
            CancellationDecision::Allowed => true,
            CancellationDecision::LateNotice { .. } => accept_late_penalty,
            CancellationDecision::NotCancellable { .. } => false,
        };

        if proceed {
            outcome.session = self.store.cancel_session(session_id).await?;
            outcome.cancelled = true;
            outcome.late_penalty = !outcome.decision.is_allowed();
            info!(
                "Session {} cancelled by {} (late penalty: {})",
                session_id, user.id, outcome.late_penalty
            );
        } else {
            debug!("Session {} not cancelled: {:?}", session_id, outcome.decision);
        }

        Ok(outcome)
    }

    /// Replaces the therapist's whole week.
    pub async fn save_template(
        &self,
        therapist_id: Uuid,
        payload: AvailabilityPayload,
        user: &User,
    ) -> Result<WeeklyTemplate, AvailabilityError> {
        ensure_can_manage(user, therapist_id)?;

        let template = payload.into_template(&self.session_defaults)?;
        self.store.upsert_weekly_template(therapist_id, &template).await?;

        info!("Weekly template saved for therapist {}", therapist_id);
        Ok(template)
    }

    pub async fn save_override(
        &self,
        therapist_id: Uuid,
        request: OverrideRequest,
        user: &User,
    ) -> Result<AvailabilityOverride, AvailabilityError> {
        ensure_can_manage(user, therapist_id)?;

        let entry = AvailabilityOverride {
            therapist_id,
            date: request.date,
            is_available: request.is_available,
            start_time: request.start_time,
            end_time: request.end_time,
            reason: request.reason,
        };

        let template = self.store.fetch_weekly_template(therapist_id).await?;
        if let Some(schedule) = effective_schedule(entry.date, template.as_ref(), Some(&entry), &self.session_defaults) {
            schedule.validate().map_err(AvailabilityError::InvalidTemplate)?;
        }

        let saved = self.store.upsert_override(&entry).await?;
        info!(
            "Override saved for therapist {} on {} (available: {})",
            therapist_id, saved.date, saved.is_available
        );
        Ok(saved)
    }

    pub async fn delete_override(
        &self,
        therapist_id: Uuid,
        date: NaiveDate,
        user: &User,
    ) -> Result<(), AvailabilityError> {
        ensure_can_manage(user, therapist_id)?;
        self.store.delete_override(therapist_id, date).await?;
        info!("Override removed for therapist {} on {}", therapist_id, date);
        Ok(())
    }

    // Private helper methods

    fn validate_range(&self, start: NaiveDate, end: NaiveDate) -> Result<(), AvailabilityError> {
        if end < start {
            return Err(AvailabilityError::InvalidRange(format!(
                "end date {} is before start date {}",
                end, start
            )));
        }
        let span_days = (end - start).num_days() + 1;
        if span_days > self.max_range_days {
            return Err(AvailabilityError::InvalidRange(format!(
                "range of {} days exceeds the limit of {} days",
                span_days, self.max_range_days
            )));
        }
        Ok(())
    }

    /// The stored policy, or the configured defaults. Either way it is
    /// validated before any window arithmetic uses it.
    async fn booking_policy(&self, therapist_id: Uuid) -> Result<BookingWindowPolicy, AvailabilityError> {
        let policy = self
            .store
            .fetch_booking_policy(therapist_id)
            .await?
            .unwrap_or_else(|| BookingWindowPolicy::from(&self.booking_defaults));

        policy.validate().map_err(|e| {
            warn!("Rejecting booking policy for therapist {}: {}", therapist_id, e);
            AvailabilityError::ValidationError(format!("booking policy for therapist {}: {}", therapist_id, e))
        })?;
        Ok(policy)
    }

    async fn find_session(&self, session_id: Uuid) -> Result<BookedSession, AvailabilityError> {
        self.store
            .fetch_session(session_id)
            .await?
            .ok_or_else(|| AvailabilityError::NotFound(format!("Session {} not found", session_id)))
    }

    /// Reads the template, overrides, sessions and policy once.
    async fn load_resolver(
        &self,
        therapist_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
        policy: Option<BookingWindowPolicy>,
    ) -> Result<SlotResolver, AvailabilityError> {
        let policy = match policy {
            Some(policy) => policy,
            None => self.booking_policy(therapist_id).await?,
        };

        let template = self.store.fetch_weekly_template(therapist_id).await?;
        let overrides = self.store.fetch_overrides(therapist_id, start, end).await?;
        let sessions = self
            .store
            .fetch_sessions(therapist_id, session_lookup_start(start), end)
            .await?;

        let resolver = SlotResolver::new(
            therapist_id,
            ResolverInputs { template, overrides, sessions },
            policy,
            self.session_defaults.clone(),
        )?;

        Ok(resolver.with_max_range_days(self.max_range_days))
    }
}

/// Clients always book for themselves. Therapists and admins may name the client.
pub fn booking_for_caller(
    user: &User,
    mut request: CreateSessionRequest,
) -> Result<CreateSessionRequest, AvailabilityError> {
    if user.is_therapist() || user.is_admin() {
        return Ok(request);
    }

    let caller = Uuid::parse_str(&user.id).map_err(|_| {
        AvailabilityError::Unauthorized(format!("user id {} is not a valid client id", user.id))
    })?;

    match request.client_id {
        Some(client_id) if client_id != caller => Err(AvailabilityError::Unauthorized(format!(
            "user {} cannot book on behalf of client {}",
            user.id, client_id
        ))),
        _ => {
            request.client_id = Some(caller);
            Ok(request)
        }
    }
}

fn ensure_can_manage(user: &User, therapist_id: Uuid) -> Result<(), AvailabilityError> {
    if user.can_manage_therapist(&therapist_id.to_string()) {
        Ok(())
    } else {
        Err(AvailabilityError::Unauthorized(format!(
            "user {} cannot manage availability for therapist {}",
            user.id, therapist_id
        )))
    }
}

fn ensure_session_party(user: &User, session: &BookedSession) -> Result<(), AvailabilityError> {
    let is_therapist = session.therapist_id.to_string() == user.id;
    let is_client = session.client_id.is_some_and(|client| client.to_string() == user.id);

    if user.is_admin() || is_therapist || is_client {
        Ok(())
    } else {
        Err(AvailabilityError::Unauthorized(format!(
            "user {} is not a party to session {}",
            user.id, session.id
        )))
    }
}
