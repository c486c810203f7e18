use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, Utc};
use reqwest::{header::{HeaderMap, HeaderValue}, Method};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::{SupabaseClient, SupabaseError};

use crate::error::AvailabilityError;
use crate::models::{
    AvailabilityOverride, BookedSession, BookingWindowPolicy, DaySchedule, NewSession,
    WeeklyTemplate,
};

pub type StoreResult<T> = Result<T, AvailabilityError>;

/// The three reads the resolver needs plus the writes of the booking path.
///
/// `insert_session` must fail atomically with `ConflictOnCommit` when the new
/// row would overlap an active session of the same therapist.
#[async_trait]
pub trait AvailabilityStore: Send + Sync {
    async fn fetch_weekly_template(&self, therapist_id: Uuid) -> StoreResult<Option<WeeklyTemplate>>;

    async fn fetch_overrides(
        &self,
        therapist_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> StoreResult<Vec<AvailabilityOverride>>;

    /// Non-cancelled sessions whose date falls in `[start, end]`.
    async fn fetch_sessions(
        &self,
        therapist_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> StoreResult<Vec<BookedSession>>;

    async fn fetch_booking_policy(&self, therapist_id: Uuid) -> StoreResult<Option<BookingWindowPolicy>>;

    async fn fetch_session(&self, session_id: Uuid) -> StoreResult<Option<BookedSession>>;

    async fn insert_session(&self, session: NewSession) -> StoreResult<BookedSession>;

    async fn cancel_session(&self, session_id: Uuid) -> StoreResult<BookedSession>;

    /// Replaces the whole week. The two steps are not atomic: present days
    /// are written first and absent days removed after, so a failed removal
    /// leaves the new days saved next to stale ones and reports an error.
    async fn upsert_weekly_template(&self, therapist_id: Uuid, template: &WeeklyTemplate) -> StoreResult<()>;

    async fn upsert_override(&self, entry: &AvailabilityOverride) -> StoreResult<AvailabilityOverride>;

    async fn delete_override(&self, therapist_id: Uuid, date: NaiveDate) -> StoreResult<()>;
}

// ==============================================================================
// SUPABASE ADAPTER
// ==============================================================================

const TEMPLATE_TABLE: &str = "/rest/v1/therapist_availability";
const OVERRIDE_TABLE: &str = "/rest/v1/availability_overrides";
const SESSION_TABLE: &str = "/rest/v1/sessions";
const SETTINGS_TABLE: &str = "/rest/v1/therapist_session_settings";

/// One `therapist_availability` row per weekday.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateRow {
    pub therapist_id: Uuid,
    pub day_of_week: i32,
    pub enabled: bool,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub session_duration_minutes: i32,
    pub buffer_minutes: i32,
    pub max_sessions_per_day: i32,
}

impl TemplateRow {
    fn from_schedule(therapist_id: Uuid, day_of_week: usize, schedule: &DaySchedule) -> Self {
        Self {
            therapist_id,
            day_of_week: day_of_week as i32,
            enabled: schedule.enabled,
            start_time: schedule.start_time,
            end_time: schedule.end_time,
            session_duration_minutes: schedule.session_duration_minutes,
            buffer_minutes: schedule.buffer_minutes,
            max_sessions_per_day: schedule.max_sessions_per_day,
        }
    }

    fn into_schedule(self) -> DaySchedule {
        DaySchedule {
            enabled: self.enabled,
            start_time: self.start_time,
            end_time: self.end_time,
            session_duration_minutes: self.session_duration_minutes,
            buffer_minutes: self.buffer_minutes,
            max_sessions_per_day: self.max_sessions_per_day,
        }
    }
}

pub struct SupabaseAvailabilityStore {
    supabase: SupabaseClient,
    auth_token: Option<String>,
}

impl SupabaseAvailabilityStore {
    /// `auth_token` is forwarded so row-level security applies; `None` reads
    /// with the anon key only.
    pub fn new(config: &AppConfig, auth_token: Option<String>) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            auth_token,
        }
    }

    fn token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    fn prefer(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("Prefer", HeaderValue::from_static(value));
        headers
    }

    async fn get_rows<T: serde::de::DeserializeOwned>(&self, path: &str) -> StoreResult<Vec<T>> {
        let result: Vec<Value> = self.supabase.request(Method::GET, path, self.token(), None).await?;

        result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<T>, _>>()
            .map_err(|e| AvailabilityError::Persistence(format!("malformed row at {}: {}", path, e)))
    }
}

#[async_trait]
impl AvailabilityStore for SupabaseAvailabilityStore {
    async fn fetch_weekly_template(&self, therapist_id: Uuid) -> StoreResult<Option<WeeklyTemplate>> {
        debug!("Fetching weekly template for therapist: {}", therapist_id);

        let path = format!("{}?therapist_id=eq.{}&order=day_of_week.asc", TEMPLATE_TABLE, therapist_id);
        let rows: Vec<TemplateRow> = self.get_rows(&path).await?;
        if rows.is_empty() {
            return Ok(None);
        }

        let mut template = WeeklyTemplate::default();
        for row in rows {
            let day = row.day_of_week;
            let Ok(day_index) = u32::try_from(day) else {
                warn!("Ignoring template row with day_of_week {} for therapist {}", day, therapist_id);
                continue;
            };
            if let Err(e) = template.set_day(day_index, row.into_schedule()) {
                warn!("Ignoring template row for therapist {}: {}", therapist_id, e);
            }
        }

        Ok(Some(template))
    }

    async fn fetch_overrides(
        &self,
        therapist_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> StoreResult<Vec<AvailabilityOverride>> {
        debug!("Fetching overrides for therapist {} between {} and {}", therapist_id, start, end);

        let path = format!(
            "{}?therapist_id=eq.{}&date=gte.{}&date=lte.{}&order=date.asc",
            OVERRIDE_TABLE, therapist_id, start, end
        );
        self.get_rows(&path).await
    }

    async fn fetch_sessions(
        &self,
        therapist_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> StoreResult<Vec<BookedSession>> {
        debug!("Fetching sessions for therapist {} between {} and {}", therapist_id, start, end);

        let path = format!(
            "{}?therapist_id=eq.{}&date=gte.{}&date=lte.{}&status=neq.cancelled&order=date.asc,start_time.asc",
            SESSION_TABLE, therapist_id, start, end
        );
        self.get_rows(&path).await
    }

    async fn fetch_booking_policy(&self, therapist_id: Uuid) -> StoreResult<Option<BookingWindowPolicy>> {
        let path = format!("{}?therapist_id=eq.{}", SETTINGS_TABLE, therapist_id);
        let mut rows: Vec<BookingWindowPolicy> = self.get_rows(&path).await?;
        Ok(if rows.is_empty() { None } else { Some(rows.swap_remove(0)) })
    }

    async fn fetch_session(&self, session_id: Uuid) -> StoreResult<Option<BookedSession>> {
        let path = format!("{}?id=eq.{}", SESSION_TABLE, session_id);
        let mut rows: Vec<BookedSession> = self.get_rows(&path).await?;
        Ok(if rows.is_empty() { None } else { Some(rows.swap_remove(0)) })
    }

    async fn insert_session(&self, session: NewSession) -> StoreResult<BookedSession> {
        debug!(
            "Inserting session for therapist {} on {} {}-{}",
            session.therapist_id, session.date, session.start_time, session.end_time
        );

        let body = json!({
            "therapist_id": session.therapist_id,
            "client_id": session.client_id,
            "date": session.date,
            "start_time": session.start_time,
            "end_time": session.end_time,
            "notes": session.notes,
            "status": "scheduled",
            "created_at": Utc::now().to_rfc3339(),
        });

        let result: anyhow::Result<Vec<Value>> = self
            .supabase
            .request_with_headers(
                Method::POST,
                SESSION_TABLE,
                self.token(),
                Some(body),
                Some(Self::prefer("return=representation")),
            )
            .await;

        let rows = match result {
            Ok(rows) => rows,
            Err(e) if e.downcast_ref::<SupabaseError>().is_some_and(SupabaseError::is_conflict) => {
                warn!(
                    "Overlap constraint rejected session for therapist {} on {}",
                    session.therapist_id, session.date
                );
                return Err(AvailabilityError::ConflictOnCommit {
                    therapist_id: session.therapist_id,
                    date: session.date,
                    start: session.start_time,
                    end: session.end_time,
                });
            }
            Err(e) => return Err(e.into()),
        };

        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| AvailabilityError::Persistence("Failed to create session".to_string()))?;
        serde_json::from_value(row).map_err(|e| AvailabilityError::Persistence(e.to_string()))
    }

    async fn cancel_session(&self, session_id: Uuid) -> StoreResult<BookedSession> {
        let path = format!("{}?id=eq.{}&status=eq.scheduled", SESSION_TABLE, session_id);
        let body = json!({
            "status": "cancelled",
            "cancelled_at": Utc::now().to_rfc3339(),
        });

        let rows: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                self.token(),
                Some(body),
                Some(Self::prefer("return=representation")),
            )
            .await?;

        let row = rows.into_iter().next().ok_or_else(|| {
            AvailabilityError::NotFound(format!("No scheduled session {}", session_id))
        })?;
        serde_json::from_value(row).map_err(|e| AvailabilityError::Persistence(e.to_string()))
    }

    async fn upsert_weekly_template(&self, therapist_id: Uuid, template: &WeeklyTemplate) -> StoreResult<()> {
        let rows: Vec<TemplateRow> = template
            .days
            .iter()
            .enumerate()
            .filter_map(|(day, schedule)| schedule.as_ref().map(|s| TemplateRow::from_schedule(therapist_id, day, s)))
            .collect();
        let present: Vec<String> = rows.iter().map(|row| row.day_of_week.to_string()).collect();

        debug!("Saving {} template days for therapist {}", rows.len(), therapist_id);

        if !rows.is_empty() {
            let path = format!("{}?on_conflict=therapist_id,day_of_week", TEMPLATE_TABLE);
            let body = serde_json::to_value(&rows).map_err(|e| AvailabilityError::Persistence(e.to_string()))?;
            let _: Value = self
                .supabase
                .request_with_headers(
                    Method::POST,
                    &path,
                    self.token(),
                    Some(body),
                    Some(Self::prefer("resolution=merge-duplicates,return=minimal")),
                )
                .await?;
        }

        // Saving overwrites the whole week, so days left out are removed.
        if present.len() < 7 {
            let path = if present.is_empty() {
                format!("{}?therapist_id=eq.{}", TEMPLATE_TABLE, therapist_id)
            } else {
                format!(
                    "{}?therapist_id=eq.{}&day_of_week=not.in.({})",
                    TEMPLATE_TABLE,
                    therapist_id,
                    present.join(",")
                )
            };
            if let Err(e) = self.supabase.request::<Value>(Method::DELETE, &path, self.token(), None).await {
                warn!("Template for therapist {} saved but stale days remain: {}", therapist_id, e);
                return Err(AvailabilityError::Persistence(format!(
                    "week saved for therapist {} but days outside ({}) were not removed: {}",
                    therapist_id,
                    present.join(","),
                    e
                )));
            }
        }

        Ok(())
    }

    async fn upsert_override(&self, entry: &AvailabilityOverride) -> StoreResult<AvailabilityOverride> {
        let path = format!("{}?on_conflict=therapist_id,date", OVERRIDE_TABLE);
        let body = serde_json::to_value(entry).map_err(|e| AvailabilityError::Persistence(e.to_string()))?;

        let rows: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                &path,
                self.token(),
                Some(body),
                Some(Self::prefer("resolution=merge-duplicates,return=representation")),
            )
            .await?;

        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| AvailabilityError::Persistence("Failed to save availability override".to_string()))?;
        serde_json::from_value(row).map_err(|e| AvailabilityError::Persistence(e.to_string()))
    }

    async fn delete_override(&self, therapist_id: Uuid, date: NaiveDate) -> StoreResult<()> {
        let path = format!("{}?therapist_id=eq.{}&date=eq.{}", OVERRIDE_TABLE, therapist_id, date);
        let rows: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::DELETE,
                &path,
                self.token(),
                None,
                Some(Self::prefer("return=representation")),
            )
            .await?;

        if rows.is_empty() {
            return Err(AvailabilityError::NotFound(format!(
                "No override for therapist {} on {}",
                therapist_id, date
            )));
        }
        Ok(())
    }
}

/// Sessions on the day before `start` can run past midnight into it.
pub fn session_lookup_start(start: NaiveDate) -> NaiveDate {
    start.pred_opt().unwrap_or(start)
}
