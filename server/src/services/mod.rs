//! Services module
//!
//! Business logic services. Every mutating operation resolves the acting
//! principal's permissions before validating, and validates before
//! persisting. Always in that order.

pub mod annotations;
pub mod entries;
pub mod insights;
pub mod permissions;
pub mod reminders;
pub mod scheduler;
pub mod sharing;
pub mod templates;
pub mod trackers;

pub use annotations::AnnotationsService;
pub use entries::EntriesService;
pub use insights::{InsightsCache, InsightsService};
pub use permissions::{
    AccessRole, AccessSource, ObservationContext, Permissions, PermissionsService,
    ScopedResolution,
};
pub use reminders::{ReminderDecision, ReminderPolicy, RemindersService};
pub use scheduler::ReminderScheduler;
pub use sharing::{IssuedShareLink, SharingService};
pub use templates::TemplatesService;
pub use trackers::TrackersService;
