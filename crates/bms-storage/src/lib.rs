//! Persistence for offers, scheduled searches and result validations, plus
//! the immutable TDR artifact store.

mod artifacts;
mod error;
mod memory;
mod postgres;

use async_trait::async_trait;
use bms_core::{
    Department, Offer, OfferId, OfferStatus, Priority, ResultKey, ResultValidation,
    ScheduledSearch,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use artifacts::{ArtifactStore, StoredArtifact};
pub use error::StoreError;
pub use memory::MemoryStore;
pub use postgres::{connect, PgStore};

pub const CRATE_NAME: &str = "bms-storage";

/// Offer persistence. Every write is a compare-and-swap on `version`.
#[async_trait]
pub trait OfferStore: Send + Sync {
    /// Assigns the next id and version 1.
    async fn insert(&self, offer: Offer) -> Result<Offer, StoreError>;
    async fn get(&self, id: OfferId) -> Result<Offer, StoreError>;
    async fn list(&self, filter: &OfferFilter, order: ListOrder) -> Result<Vec<Offer>, StoreError>;
    /// Persist `offer` if the stored version still equals `expected_version`;
    /// returns the stored record with its bumped version.
    async fn replace(&self, offer: Offer, expected_version: u64) -> Result<Offer, StoreError>;
}

#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Fails with `Duplicate` when `(user_id, keywords)` is taken.
    async fn insert(&self, schedule: ScheduledSearch) -> Result<ScheduledSearch, StoreError>;
    async fn get(&self, user_id: &str, keywords: &str) -> Result<ScheduledSearch, StoreError>;
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<ScheduledSearch>, StoreError>;
    async fn list_all(&self) -> Result<Vec<ScheduledSearch>, StoreError>;
    /// Active schedules whose next run is at or before `now`.
    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledSearch>, StoreError>;
    async fn replace(
        &self,
        schedule: ScheduledSearch,
        expected_version: u64,
    ) -> Result<ScheduledSearch, StoreError>;
    async fn delete(&self, user_id: &str, keywords: &str) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ValidationStore: Send + Sync {
    /// Append a validation and return the result's new validation count.
    async fn record(&self, validation: ResultValidation) -> Result<u32, StoreError>;
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<ResultValidation>, StoreError>;
    async fn count(&self, key: &ResultKey) -> Result<u32, StoreError>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OfferFilter {
    pub status: Option<OfferStatus>,
    /// Matches either the lead or the associate side.
    pub department: Option<Department>,
    pub lead: Option<Department>,
    pub associate: Option<Department>,
    pub country: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub priority: Option<Priority>,
    pub discovered_by: Option<String>,
}

impl OfferFilter {
    pub fn lead(dept: Department) -> Self {
        Self {
            status: Some(OfferStatus::Approved),
            lead: Some(dept),
            ..Self::default()
        }
    }

    pub fn associate(dept: Department) -> Self {
        Self {
            status: Some(OfferStatus::Approved),
            associate: Some(dept),
            ..Self::default()
        }
    }

    pub fn matches(&self, offer: &Offer) -> bool {
        if self.status.is_some_and(|status| status != offer.status) {
            return false;
        }
        if self.lead.is_some() && self.lead != offer.lead() {
            return false;
        }
        if self.associate.is_some() && self.associate != offer.associate() {
            return false;
        }
        if let Some(dept) = self.department {
            if offer.lead() != Some(dept) && offer.associate() != Some(dept) {
                return false;
            }
        }
        if let Some(country) = self.country.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            let wanted = country.to_lowercase();
            let hit = offer
                .countries
                .iter()
                .chain(offer.other_country.iter())
                .any(|c| c.to_lowercase() == wanted);
            if !hit {
                return false;
            }
        }
        let sort_date = offer.sort_date();
        if self.from.is_some_and(|from| sort_date < from) || self.to.is_some_and(|to| sort_date > to) {
            return false;
        }
        if self.priority.is_some_and(|priority| priority != offer.priority) {
            return false;
        }
        if let Some(who) = &self.discovered_by {
            if offer.discovered_by.as_deref() != Some(who.trim()) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListOrder {
    /// Deposit date, else submission date, else creation date; latest first.
    #[default]
    NewestFirst,
    OldestFirst,
    DeadlineAsc,
}

impl ListOrder {
    pub fn sort(self, offers: &mut [Offer]) {
        match self {
            ListOrder::NewestFirst => {
                offers.sort_by(|a, b| b.sort_date().cmp(&a.sort_date()).then(b.id.cmp(&a.id)))
            }
            ListOrder::OldestFirst => {
                offers.sort_by(|a, b| a.sort_date().cmp(&b.sort_date()).then(a.id.cmp(&b.id)))
            }
            ListOrder::DeadlineAsc => offers.sort_by(|a, b| {
                (a.deadline_date, a.deadline_time, a.id).cmp(&(b.deadline_date, b.deadline_time, b.id))
            }),
        }
    }
}

pub(crate) fn schedule_id(user_id: &str, keywords: &str) -> String {
    format!("{user_id}/{keywords}")
}
