use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use bms_core::{Offer, OfferId, ResultKey, ResultValidation, ScheduledSearch};
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{
    schedule_id, ListOrder, OfferFilter, OfferStore, ScheduleStore, StoreError, ValidationStore,
};

#[derive(Debug, Default)]
struct MemoryState {
    next_offer_id: OfferId,
    offers: BTreeMap<OfferId, Offer>,
    schedules: BTreeMap<(String, String), ScheduledSearch>,
    validations: Vec<ResultValidation>,
    validation_counts: HashMap<ResultKey, u32>,
}

/// In-process store used when no `DATABASE_URL` is configured, and in tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OfferStore for MemoryStore {
    async fn insert(&self, mut offer: Offer) -> Result<Offer, StoreError> {
        let mut state = self.state.write().await;
        state.next_offer_id += 1;
        offer.id = state.next_offer_id;
        offer.version = 1;
        state.offers.insert(offer.id, offer.clone());
        Ok(offer)
    }

    async fn get(&self, id: OfferId) -> Result<Offer, StoreError> {
        let state = self.state.read().await;
        state
            .offers
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("offer", id))
    }

    async fn list(&self, filter: &OfferFilter, order: ListOrder) -> Result<Vec<Offer>, StoreError> {
        let state = self.state.read().await;
        let mut offers = state
            .offers
            .values()
            .filter(|offer| filter.matches(offer))
            .cloned()
            .collect::<Vec<_>>();
        order.sort(&mut offers);
        Ok(offers)
    }

    async fn replace(&self, mut offer: Offer, expected_version: u64) -> Result<Offer, StoreError> {
        let mut state = self.state.write().await;
        let stored = state
            .offers
            .get_mut(&offer.id)
            .ok_or_else(|| StoreError::not_found("offer", offer.id))?;
        if stored.version != expected_version {
            return Err(StoreError::conflict("offer", offer.id, expected_version));
        }
        offer.version = expected_version + 1;
        *stored = offer.clone();
        Ok(offer)
    }
}

#[async_trait]
impl ScheduleStore for MemoryStore {
    async fn insert(&self, mut schedule: ScheduledSearch) -> Result<ScheduledSearch, StoreError> {
        let mut state = self.state.write().await;
        let key = (schedule.user_id.clone(), schedule.keywords.clone());
        if state.schedules.contains_key(&key) {
            return Err(StoreError::duplicate(
                "scheduled search",
                schedule_id(&key.0, &key.1),
            ));
        }
        schedule.version = 1;
        state.schedules.insert(key, schedule.clone());
        Ok(schedule)
    }

    async fn get(&self, user_id: &str, keywords: &str) -> Result<ScheduledSearch, StoreError> {
        let state = self.state.read().await;
        state
            .schedules
            .get(&(user_id.to_string(), keywords.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::not_found("scheduled search", schedule_id(user_id, keywords)))
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<ScheduledSearch>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .schedules
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<ScheduledSearch>, StoreError> {
        let state = self.state.read().await;
        Ok(state.schedules.values().cloned().collect())
    }

    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledSearch>, StoreError> {
        let state = self.state.read().await;
        let mut due = state
            .schedules
            .values()
            .filter(|s| s.is_due(now))
            .cloned()
            .collect::<Vec<_>>();
        due.sort_by_key(|s| s.next_run_at);
        Ok(due)
    }

    async fn replace(
        &self,
        mut schedule: ScheduledSearch,
        expected_version: u64,
    ) -> Result<ScheduledSearch, StoreError> {
        let mut state = self.state.write().await;
        let id = schedule_id(&schedule.user_id, &schedule.keywords);
        let stored = state
            .schedules
            .get_mut(&(schedule.user_id.clone(), schedule.keywords.clone()))
            .ok_or_else(|| StoreError::not_found("scheduled search", &id))?;
        if stored.version != expected_version {
            return Err(StoreError::conflict("scheduled search", id, expected_version));
        }
        schedule.version = expected_version + 1;
        *stored = schedule.clone();
        Ok(schedule)
    }

    async fn delete(&self, user_id: &str, keywords: &str) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state
            .schedules
            .remove(&(user_id.to_string(), keywords.to_string()))
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("scheduled search", schedule_id(user_id, keywords)))
    }
}

#[async_trait]
impl ValidationStore for MemoryStore {
    async fn record(&self, validation: ResultValidation) -> Result<u32, StoreError> {
        let mut state = self.state.write().await;
        let count = state
            .validation_counts
            .entry(validation.result.key())
            .or_default();
        *count += 1;
        let count = *count;
        state.validations.push(validation);
        Ok(count)
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<ResultValidation>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .validations
            .iter()
            .filter(|v| v.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn count(&self, key: &ResultKey) -> Result<u32, StoreError> {
        let state = self.state.read().await;
        Ok(state.validation_counts.get(key).copied().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use bms_core::{Frequency, ScheduleDraft, SearchResult, ValidationOutcome};

    #[tokio::test]
    async fn offers_get_sequential_ids_and_versions() {
        let store = MemoryStore::new();
        let a = OfferStore::insert(&store, draft_offer("A", "Mali", at(2025, 1, 1, 0)))
            .await
            .unwrap();
        let b = OfferStore::insert(&store, draft_offer("B", "Mali", at(2025, 1, 2, 0)))
            .await
            .unwrap();
        assert_eq!((a.id, a.version), (1, 1));
        assert_eq!(b.id, 2);
    }

    #[tokio::test]
    async fn stale_replace_is_a_conflict() {
        let store = MemoryStore::new();
        let offer = OfferStore::insert(&store, draft_offer("A", "Mali", at(2025, 1, 1, 0)))
            .await
            .unwrap();

        let mut first = offer.clone();
        first.title = "First writer".into();
        let saved = OfferStore::replace(&store, first, offer.version).await.unwrap();
        assert_eq!(saved.version, 2);

        let mut second = offer.clone();
        second.title = "Second writer".into();
        let err = OfferStore::replace(&store, second, offer.version)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(
            OfferStore::get(&store, offer.id).await.unwrap().title,
            "First writer"
        );
    }

    #[tokio::test]
    async fn duplicate_schedule_is_rejected() {
        let store = MemoryStore::new();
        let draft = ScheduleDraft {
            user_id: "u1".into(),
            keywords: "solar  energy".into(),
            frequency: Frequency::Daily,
            custom_schedule: None,
            period: None,
            custom_period: None,
            is_active: None,
            max_results: None,
        };
        let schedule = ScheduledSearch::new(draft.clone(), at(2025, 1, 1, 0)).unwrap();
        ScheduleStore::insert(&store, schedule).await.unwrap();

        let again = ScheduledSearch::new(draft, at(2025, 1, 2, 0)).unwrap();
        let err = ScheduleStore::insert(&store, again).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { .. }));

        assert_eq!(
            ScheduleStore::due(&store, at(2025, 1, 2, 0)).await.unwrap().len(),
            1
        );
        ScheduleStore::delete(&store, "u1", "solar energy").await.unwrap();
        assert!(ScheduleStore::list_all(&store).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn validation_counts_accumulate_per_result() {
        let store = MemoryStore::new();
        let result = SearchResult {
            id: "42".into(),
            source: "ungm".into(),
            title: "Water audit".into(),
            description: String::new(),
            url: "https://example.org/42".into(),
            published_at: None,
            score: None,
            estimated_value: None,
            deadline: None,
            location: None,
            category: None,
            validation_count: 0,
        };
        for user in ["u1", "u2"] {
            store
                .record(ResultValidation {
                    user_id: user.into(),
                    result: result.clone(),
                    outcome: ValidationOutcome::Submitted,
                    validated_at: at(2025, 1, 1, 0),
                })
                .await
                .unwrap();
        }
        assert_eq!(store.count(&result.key()).await.unwrap(), 2);
        assert_eq!(ValidationStore::list_for_user(&store, "u1").await.unwrap().len(), 1);
    }
}
