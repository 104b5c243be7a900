use std::env;
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    pub server_port: u16,
    pub scheduling: SchedulingConfig,
}

/// Scheduling policy knobs shared by the slot allocator and the admission path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingConfig {
    pub slot_granularity_minutes: u32,
    pub default_duration_minutes: u32,
    pub max_advance_booking_days: u32,
    pub lock_timeout_ms: u64,
    pub clinic_utc_offset_minutes: i32,
    /// Working hours used when no per-doctor template is published, e.g. "09:00-12:00,13:00-17:00".
    pub default_working_hours: String,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            slot_granularity_minutes: 30,
            default_duration_minutes: 30,
            max_advance_booking_days: 90,
            lock_timeout_ms: 5_000,
            clinic_utc_offset_minutes: 0,
            default_working_hours: "09:00-17:00".to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = SchedulingConfig::default();

        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using in-memory scheduling backends");
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
            server_port: parse_var("PORT", 3000),
            scheduling: SchedulingConfig {
                slot_granularity_minutes: parse_var("SCHEDULING_SLOT_MINUTES", defaults.slot_granularity_minutes),
                default_duration_minutes: parse_var(
                    "SCHEDULING_DEFAULT_DURATION_MINUTES",
                    defaults.default_duration_minutes,
                ),
                max_advance_booking_days: parse_var("SCHEDULING_HORIZON_DAYS", defaults.max_advance_booking_days),
                lock_timeout_ms: parse_var("SCHEDULING_LOCK_TIMEOUT_MS", defaults.lock_timeout_ms),
                clinic_utc_offset_minutes: parse_var(
                    "CLINIC_UTC_OFFSET_MINUTES",
                    defaults.clinic_utc_offset_minutes,
                ),
                default_working_hours: env::var("CLINIC_WORKING_HOURS")
                    .unwrap_or(defaults.default_working_hours),
            },
        };

        if !config.is_configured() {
            warn!("REST backend not configured - availability and notifications stay in memory");
        }

        config
    }

    /// True when the PostgREST backend can be used for availability and notifications.
    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
    }

    pub fn is_auth_configured(&self) -> bool {
        !self.supabase_jwt_secret.is_empty()
    }
}

fn parse_var<T>(name: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using default {}", name, raw, default);
            default
        }),
        Err(_) => default,
    }
}
