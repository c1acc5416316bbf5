//! Core domain model, lifecycle state machines and recurrence rules for BMS.

pub mod error;
pub mod offer;
pub mod schedule;
pub mod search;
pub mod similarity;

pub use error::CoreError;
pub use offer::{
    Assignment, AssignmentDetails, Cancellation, Delivery, DeliveryPatch, Department, Modality,
    Offer, OfferDraft, OfferId, OfferPatch, OfferStatus, OfferType, Outcome, Priority,
    ValidationRecord,
};
pub use schedule::{
    next_run, normalize_keywords, schedule_options, ChoiceOption, CustomSchedule, DateRange,
    Frequency, PeriodFilter, RunOutcome, RunStatus, ScheduleDraft, ScheduleOptions, SchedulePatch,
    ScheduledSearch, MAX_INTERVAL_HOURS,
};
pub use search::{PeriodBounds, ResultKey, ResultValidation, SearchResult, ValidationOutcome};
pub use similarity::{similarity, Features};

pub const CRATE_NAME: &str = "bms-core";
