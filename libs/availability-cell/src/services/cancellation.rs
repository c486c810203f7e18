use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{BookedSession, BookingWindowPolicy, SessionStatus};

/// True iff the session starts at least `cancellation_hours` after `now`.
/// Denial is reported as `false`; whether that means "blocked" or
/// "allowed with penalty" is up to the caller.
pub fn can_cancel(session: &BookedSession, now: DateTime<Utc>, policy: &BookingWindowPolicy) -> bool {
    session.starts_at_utc() - now >= policy.cancellation_notice()
}

/// Last instant at which the session can be cancelled with full notice.
pub fn cancellation_deadline(session: &BookedSession, policy: &BookingWindowPolicy) -> DateTime<Utc> {
    session
        .starts_at_utc()
        .checked_sub_signed(policy.cancellation_notice())
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CancellationDecision {
    Allowed,
    /// Inside the notice window. Negative hours mean the session already started.
    LateNotice { hours_until_start: i64 },
    NotCancellable { status: SessionStatus },
}

impl CancellationDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, CancellationDecision::Allowed)
    }
}

pub fn evaluate_cancellation(
    session: &BookedSession,
    now: DateTime<Utc>,
    policy: &BookingWindowPolicy,
) -> CancellationDecision {
    if session.status != SessionStatus::Scheduled {
        return CancellationDecision::NotCancellable { status: session.status };
    }

    if can_cancel(session, now, policy) {
        CancellationDecision::Allowed
    } else {
        CancellationDecision::LateNotice {
            hours_until_start: (session.starts_at_utc() - now).num_hours(),
        }
    }
}
