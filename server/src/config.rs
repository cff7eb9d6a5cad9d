//! Application configuration constants
//!
//! Central location for all configuration constants, resource limits,
//! and policy boundaries used throughout the backend.

// ===== Rating Fields =====

/// Lower bound for rating field values (inclusive)
pub const RATING_MIN: f64 = 1.0;
/// Upper bound for rating field values (inclusive)
pub const RATING_MAX: f64 = 5.0;

// ===== Reminder Policy =====

/// Hour at which the default quiet period begins (local time, 24h clock)
pub const QUIET_HOURS_START_HOUR: u32 = 22;

/// Hour at which the default quiet period ends (local time, 24h clock)
pub const QUIET_HOURS_END_HOUR: u32 = 7;

/// Tolerance around a reminder's scheduled time-of-day, in minutes.
/// The batch job runs on a fixed interval, so exact-minute matching
/// would silently skip reminders.
pub const SCHEDULE_TOLERANCE_MINUTES: i64 = 5;

/// Maximum reminders fired per owner per calendar day.
/// Enforced by the batch job, not by reminder evaluation itself.
pub const MAX_FIRED_REMINDERS_PER_OWNER_PER_DAY: i64 = 3;

// ===== Template Naming =====

/// Number of "Name (N)" suffixes tried when resolving a duplicate
/// template name before falling back to a timestamp suffix.
pub const MAX_DUPLICATE_NAME_ATTEMPTS: u32 = 99;

/// Maximum length for template and tracker names
pub const MAX_NAME_LENGTH: usize = 120;

// ===== Share Links =====

/// Number of random bytes in a share-link token (hex-encoded on output)
pub const SHARE_TOKEN_BYTES: usize = 32;

// ===== Insights Cache =====

/// Time-to-live for cached derived insights, in seconds.
/// Any entry mutation invalidates affected keys before the TTL expires.
pub const INSIGHTS_CACHE_TTL_SECS: u64 = 300;
