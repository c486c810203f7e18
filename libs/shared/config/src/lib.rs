use std::env;
use std::str::FromStr;

use chrono::NaiveTime;
use tracing::warn;

/// Fallback session shape used wherever a schedule value is missing.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionDefaults {
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub session_duration_minutes: i32,
    pub buffer_minutes: i32,
    pub max_sessions_per_day: i32,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN),
            end_time: NaiveTime::from_hms_opt(17, 0, 0).unwrap_or(NaiveTime::MIN),
            session_duration_minutes: 60,
            buffer_minutes: 0,
            max_sessions_per_day: 8,
        }
    }
}

/// Booking-window values applied to therapists without stored session settings.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingDefaults {
    pub advance_booking_days: i64,
    pub cancellation_hours: i64,
    pub minimum_lead_minutes: i64,
}

impl Default for BookingDefaults {
    fn default() -> Self {
        Self {
            advance_booking_days: 30,
            cancellation_hours: 24,
            minimum_lead_minutes: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    pub bind_addr: String,
    pub max_range_days: i64,
    pub session_defaults: SessionDefaults,
    pub booking_defaults: BookingDefaults,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let session_fallback = SessionDefaults::default();
        let booking_fallback = BookingDefaults::default();

        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            bind_addr: env::var("BIND_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            max_range_days: parse_or("AVAILABILITY_MAX_RANGE_DAYS", 90),
            session_defaults: SessionDefaults {
                start_time: parse_time_or("DEFAULT_SESSION_START", session_fallback.start_time),
                end_time: parse_time_or("DEFAULT_SESSION_END", session_fallback.end_time),
                session_duration_minutes: parse_or(
                    "DEFAULT_SESSION_DURATION_MINUTES",
                    session_fallback.session_duration_minutes,
                ),
                buffer_minutes: parse_or("DEFAULT_BUFFER_MINUTES", session_fallback.buffer_minutes),
                max_sessions_per_day: parse_or(
                    "DEFAULT_MAX_SESSIONS_PER_DAY",
                    session_fallback.max_sessions_per_day,
                ),
            },
            booking_defaults: BookingDefaults {
                advance_booking_days: parse_or(
                    "DEFAULT_ADVANCE_BOOKING_DAYS",
                    booking_fallback.advance_booking_days,
                ),
                cancellation_hours: parse_or(
                    "DEFAULT_CANCELLATION_HOURS",
                    booking_fallback.cancellation_hours,
                ),
                minimum_lead_minutes: parse_or(
                    "DEFAULT_MIN_LEAD_MINUTES",
                    booking_fallback.minimum_lead_minutes,
                ),
            },
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    /// Config pointing at an arbitrary Supabase base URL, everything else defaulted.
    pub fn for_supabase(url: &str, anon_key: &str, jwt_secret: &str) -> Self {
        Self {
            supabase_url: url.to_string(),
            supabase_anon_key: anon_key.to_string(),
            supabase_jwt_secret: jwt_secret.to_string(),
            bind_addr: "0.0.0.0:3000".to_string(),
            max_range_days: 90,
            session_defaults: SessionDefaults::default(),
            booking_defaults: BookingDefaults::default(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has an invalid value {:?}, using default", key, raw);
            default
        }),
        Err(_) => default,
    }
}

fn parse_time_or(key: &str, default: NaiveTime) -> NaiveTime {
    match env::var(key) {
        Ok(raw) => NaiveTime::parse_from_str(raw.trim(), "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(raw.trim(), "%H:%M:%S"))
            .unwrap_or_else(|_| {
                warn!("{} has an invalid time {:?}, using default", key, raw);
                default
            }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_hardcoded_session_shape() {
        let defaults = SessionDefaults::default();
        assert_eq!(defaults.start_time, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
        assert_eq!(defaults.end_time, NaiveTime::from_hms_opt(17, 0, 0).unwrap());
        assert_eq!(defaults.session_duration_minutes, 60);
        assert_eq!(defaults.max_sessions_per_day, 8);
    }

    #[test]
    fn for_supabase_is_configured() {
        let config = AppConfig::for_supabase("http://localhost:54321", "anon", "secret");
        assert!(config.is_configured());
        assert_eq!(config.max_range_days, 90);

        let empty = AppConfig::for_supabase("", "", "");
        assert!(!empty.is_configured());
    }
}
