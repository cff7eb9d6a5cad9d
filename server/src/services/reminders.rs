//! Reminders service
//!
//! Reminder management plus the evaluation contract consumed by the
//! periodic batch job. Evaluation is a pure decision over already-fetched
//! state: quiet hours, schedule windows, and today's entry state. The
//! per-owner daily firing cap is enforced by the batch loop, not by
//! evaluation itself. All times are UTC.

use crate::config::{
    MAX_FIRED_REMINDERS_PER_OWNER_PER_DAY, QUIET_HOURS_END_HOUR, QUIET_HOURS_START_HOUR,
    SCHEDULE_TOLERANCE_MINUTES,
};
use crate::database::{
    EntityKind, NewReminder, ReminderKind, Repository, TrackerReminder,
};
use crate::error::{AppError, Result};
use crate::fields::ValidationError;
use crate::services::permissions::{AccessRole, PermissionsService};
use chrono::{DateTime, Datelike, NaiveTime, Timelike, Utc};
use serde::Serialize;

/// Reminder policy knobs. The defaults are deliberate product choices;
/// deployments may override them without re-deriving.
#[derive(Debug, Clone, Copy)]
pub struct ReminderPolicy {
    pub quiet_start_hour: u32,
    pub quiet_end_hour: u32,
    pub tolerance_minutes: i64,
    pub max_fired_per_owner_per_day: i64,
}

impl Default for ReminderPolicy {
    fn default() -> Self {
        Self {
            quiet_start_hour: QUIET_HOURS_START_HOUR,
            quiet_end_hour: QUIET_HOURS_END_HOUR,
            tolerance_minutes: SCHEDULE_TOLERANCE_MINUTES,
            max_fired_per_owner_per_day: MAX_FIRED_REMINDERS_PER_OWNER_PER_DAY,
        }
    }
}

/// Outcome of evaluating one reminder at one instant
#[derive(Debug, Clone, Serialize)]
pub struct ReminderDecision {
    pub should_fire: bool,
    pub reason: String,
}

impl ReminderDecision {
    fn fire(reason: impl Into<String>) -> Self {
        Self {
            should_fire: true,
            reason: reason.into(),
        }
    }

    fn skip(reason: impl Into<String>) -> Self {
        Self {
            should_fire: false,
            reason: reason.into(),
        }
    }
}

/// True when the given time falls inside the quiet period. The period
/// may wrap midnight (the default 22:00–07:00 does).
fn in_quiet_hours(time: NaiveTime, policy: &ReminderPolicy) -> bool {
    let hour = time.hour();
    if policy.quiet_start_hour <= policy.quiet_end_hour {
        hour >= policy.quiet_start_hour && hour < policy.quiet_end_hour
    } else {
        hour >= policy.quiet_start_hour || hour < policy.quiet_end_hour
    }
}

/// True when `now` is within the tolerance window around the scheduled
/// time-of-day, accounting for windows that straddle midnight.
fn within_schedule_window(now: NaiveTime, scheduled: NaiveTime, tolerance_minutes: i64) -> bool {
    let now_minutes = i64::from(now.hour()) * 60 + i64::from(now.minute());
    let scheduled_minutes = i64::from(scheduled.hour()) * 60 + i64::from(scheduled.minute());

    let diff = (now_minutes - scheduled_minutes).abs();
    diff.min(24 * 60 - diff) <= tolerance_minutes
}

/// Service for managing and evaluating tracker reminders
#[derive(Clone)]
pub struct RemindersService {
    repo: Repository,
    permissions: PermissionsService,
    policy: ReminderPolicy,
}

impl RemindersService {
    pub fn new(repo: Repository, permissions: PermissionsService) -> Self {
        Self::with_policy(repo, permissions, ReminderPolicy::default())
    }

    pub fn with_policy(
        repo: Repository,
        permissions: PermissionsService,
        policy: ReminderPolicy,
    ) -> Self {
        Self {
            repo,
            permissions,
            policy,
        }
    }

    /// Create a reminder on a tracker. Reminder management is owner-only,
    /// and each owner may hold at most one entry-prompt reminder per
    /// tracker.
    pub async fn create_reminder(
        &self,
        acting: &str,
        tracker_id: &str,
        kind: ReminderKind,
        days_of_week: Vec<u8>,
        time_of_day: &str,
    ) -> Result<TrackerReminder> {
        let permissions = self
            .permissions
            .resolve(EntityKind::Tracker, tracker_id, acting, None)
            .await?;

        if !permissions.is_owner {
            return Err(AppError::Permission(format!(
                "only the owner may manage reminders on tracker {}",
                tracker_id
            )));
        }
        // A misconfigured grant must never smuggle reminder creation past
        // the ownership rule, whatever can_edit claims.
        if permissions.role == Some(AccessRole::Viewer) {
            return Err(AppError::Permission(
                "viewers may not create reminders".to_string(),
            ));
        }
        if !permissions.can_edit {
            return Err(AppError::Conflict(format!(
                "tracker {} is archived",
                tracker_id
            )));
        }

        if days_of_week.is_empty() {
            return Err(ValidationError::single(
                "days_of_week",
                None,
                "at least one weekday is required",
            )
            .into());
        }
        if days_of_week.iter().any(|d| *d > 6) {
            return Err(ValidationError::single(
                "days_of_week",
                None,
                "weekdays are numbered 0 (Monday) through 6 (Sunday)",
            )
            .into());
        }
        if NaiveTime::parse_from_str(time_of_day, "%H:%M").is_err() {
            return Err(ValidationError::single(
                "time_of_day",
                None,
                format!("\"{}\" is not a valid HH:MM time", time_of_day),
            )
            .into());
        }

        if kind == ReminderKind::EntryPrompt
            && self
                .repo
                .has_entry_prompt_reminder(tracker_id, acting)
                .await?
        {
            return Err(AppError::Conflict(format!(
                "tracker {} already has an entry-prompt reminder",
                tracker_id
            )));
        }

        tracing::info!("Creating {:?} reminder on tracker {}", kind, tracker_id);

        self.repo
            .create_reminder(NewReminder {
                tracker_id: tracker_id.to_string(),
                owner_id: acting.to_string(),
                kind,
                days_of_week,
                time_of_day: time_of_day.to_string(),
            })
            .await
    }

    /// Enable or disable a reminder. Owner-only.
    pub async fn set_enabled(&self, acting: &str, reminder_id: &str, enabled: bool) -> Result<()> {
        let reminder = self
            .repo
            .get_reminder(reminder_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("reminder {}", reminder_id)))?;

        if reminder.owner_id != acting {
            return Err(AppError::Permission(format!(
                "only the owner may change reminder {}",
                reminder_id
            )));
        }

        self.repo.set_reminder_enabled(reminder_id, enabled).await
    }

    /// Decide whether a reminder should fire at the given instant.
    ///
    /// Entry-prompt reminders fire only when today's entry is absent;
    /// reflection reminders only when today's entry exists but carries
    /// no note. Quiet hours and the schedule window are checked first.
    pub async fn evaluate_reminder(
        &self,
        reminder_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ReminderDecision> {
        let reminder = self
            .repo
            .get_reminder(reminder_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("reminder {}", reminder_id)))?;

        if !reminder.enabled {
            return Ok(ReminderDecision::skip("reminder is disabled"));
        }

        let tracker = self.repo.get_tracker(&reminder.tracker_id).await?;
        match tracker {
            Some(tracker) if !tracker.is_archived() => {}
            _ => return Ok(ReminderDecision::skip("tracker is archived or gone")),
        }

        if in_quiet_hours(now.time(), &self.policy) {
            return Ok(ReminderDecision::skip("inside quiet hours"));
        }

        let today = now.date_naive().weekday().num_days_from_monday() as u8;
        if !reminder.days_of_week()?.contains(&today) {
            return Ok(ReminderDecision::skip("not scheduled for this weekday"));
        }

        let scheduled = reminder.scheduled_time().ok_or_else(|| {
            AppError::Generic(format!(
                "reminder {} has an unparseable time of day",
                reminder_id
            ))
        })?;
        if !within_schedule_window(now.time(), scheduled, self.policy.tolerance_minutes) {
            return Ok(ReminderDecision::skip("outside the scheduled time window"));
        }

        let entry = self
            .repo
            .get_daily_entry(&reminder.tracker_id, &reminder.owner_id, now.date_naive())
            .await?;

        let decision = match reminder.kind {
            ReminderKind::EntryPrompt => match entry {
                Some(_) => ReminderDecision::skip("an entry is already logged for today"),
                None => ReminderDecision::fire("no entry logged for today"),
            },
            ReminderKind::Reflection => match entry {
                None => ReminderDecision::skip("no entry to reflect on yet"),
                Some(entry) if entry.notes.as_deref().is_some_and(|n| !n.trim().is_empty()) => {
                    ReminderDecision::skip("today's entry already has a note")
                }
                Some(_) => ReminderDecision::fire("today's entry has no reflection note"),
            },
        };

        Ok(decision)
    }

    /// One pass of the batch job: evaluate every enabled reminder and
    /// record firings, respecting the per-owner daily cap and firing each
    /// reminder at most once per day. Returns the number fired.
    pub async fn run_batch(&self, now: DateTime<Utc>) -> Result<u32> {
        let today = now.date_naive();
        let mut fired = 0;

        for reminder in self.repo.list_enabled_reminders().await? {
            if self.repo.has_fired_today(&reminder.id, today).await? {
                continue;
            }

            let fired_today = self
                .repo
                .count_firings_for_day(&reminder.owner_id, today)
                .await?;
            if fired_today >= self.policy.max_fired_per_owner_per_day {
                tracing::debug!(
                    "Daily reminder cap reached for {}, skipping {}",
                    reminder.owner_id,
                    reminder.id
                );
                continue;
            }

            let decision = self.evaluate_reminder(&reminder.id, now).await?;
            if decision.should_fire {
                self.repo
                    .record_reminder_firing(&reminder.id, &reminder.owner_id, today)
                    .await?;
                tracing::info!(
                    "Fired reminder {} for {}: {}",
                    reminder.id,
                    reminder.owner_id,
                    decision.reason
                );
                fired += 1;
            }
        }

        Ok(fired)
    }
}
