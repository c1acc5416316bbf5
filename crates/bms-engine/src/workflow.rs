//! Offer store operations and the draft → pending → approved/rejected
//! validation workflow.

use std::sync::Arc;

use bms_core::{CoreError, Offer, OfferDraft, OfferId, OfferPatch};
use bms_storage::{ArtifactStore, ListOrder, OfferFilter, OfferStore, StoreError, StoredArtifact};
use chrono::Utc;
use tracing::{debug, info};

use crate::{Action, Caller, EngineError};

/// Read-modify-write with optimistic concurrency. Without an
/// `expected_version` a lost race is retried once on a fresh read; with one,
/// any mismatch is a conflict. A mutation that changes nothing is not written.
pub(crate) async fn mutate_offer<F>(
    store: &dyn OfferStore,
    id: OfferId,
    expected_version: Option<u64>,
    mut apply: F,
) -> Result<Offer, EngineError>
where
    F: FnMut(&mut Offer) -> Result<(), CoreError>,
{
    let mut retried = false;
    loop {
        let current = store.get(id).await?;
        if let Some(expected) = expected_version {
            if current.version != expected {
                return Err(StoreError::conflict("offer", id, expected).into());
            }
        }
        let mut next = current.clone();
        apply(&mut next)?;
        if next == current {
            return Ok(current);
        }
        match store.replace(next, current.version).await {
            Ok(saved) => return Ok(saved),
            Err(err) if err.is_conflict() && expected_version.is_none() && !retried => {
                debug!(offer_id = id, "offer changed underneath us; retrying on a fresh read");
                retried = true;
            }
            Err(err) => return Err(err.into()),
        }
    }
}

#[derive(Clone)]
pub struct OfferService {
    store: Arc<dyn OfferStore>,
    artifacts: ArtifactStore,
}

impl OfferService {
    pub fn new(store: Arc<dyn OfferStore>, artifacts: ArtifactStore) -> Self {
        Self { store, artifacts }
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &Arc<dyn OfferStore> {
        &self.store
    }

    pub async fn create(&self, caller: &Caller, mut draft: OfferDraft) -> Result<Offer, EngineError> {
        caller.require(Action::CreateOffer)?;
        if draft.discovered_by.as_deref().map_or(true, |v| v.trim().is_empty()) {
            draft.discovered_by = Some(caller.name.clone());
        }
        let offer = Offer::from_draft(draft, Utc::now())?;
        let offer = self.store.insert(offer).await?;
        info!(offer_id = offer.id, by = %caller.name, "offer created");
        Ok(offer)
    }

    pub async fn get(&self, id: OfferId) -> Result<Offer, EngineError> {
        Ok(self.store.get(id).await?)
    }

    pub async fn list(&self, filter: &OfferFilter, order: ListOrder) -> Result<Vec<Offer>, EngineError> {
        Ok(self.store.list(filter, order).await?)
    }

    /// Partial update. Assignment or delivery details in the patch also
    /// need dispatch rights.
    pub async fn update(
        &self,
        caller: &Caller,
        id: OfferId,
        patch: OfferPatch,
    ) -> Result<Offer, EngineError> {
        caller.require(Action::EditOffer)?;
        if patch.assignment_details.is_some() || patch.delivery.is_some() {
            caller.require(Action::Dispatch)?;
        }
        let expected = patch.expected_version;
        let offer = mutate_offer(self.store.as_ref(), id, expected, |offer| {
            offer.apply_patch(patch.clone(), Utc::now())
        })
        .await?;
        info!(offer_id = id, version = offer.version, "offer updated");
        Ok(offer)
    }

    /// Soft delete: never removes the record.
    pub async fn cancel(
        &self,
        caller: &Caller,
        id: OfferId,
        justification: &str,
    ) -> Result<Offer, EngineError> {
        caller.require(Action::CancelOffer)?;
        let offer = mutate_offer(self.store.as_ref(), id, None, |offer| {
            offer.cancel(justification, Utc::now())
        })
        .await?;
        info!(offer_id = id, status = %offer.status, "offer cancelled");
        Ok(offer)
    }

    pub async fn submit(&self, caller: &Caller, id: OfferId) -> Result<Offer, EngineError> {
        caller.require(Action::SubmitOffer)?;
        let offer = mutate_offer(self.store.as_ref(), id, None, |offer| {
            offer.submit(Utc::now()).map(|_| ())
        })
        .await?;
        info!(offer_id = id, "offer submitted for validation");
        Ok(offer)
    }

    pub async fn approve(
        &self,
        caller: &Caller,
        id: OfferId,
        comment: Option<String>,
    ) -> Result<Offer, EngineError> {
        caller.require(Action::DecideOffer)?;
        let offer = mutate_offer(self.store.as_ref(), id, None, |offer| {
            offer.approve(&caller.name, comment.clone(), Utc::now())
        })
        .await?;
        info!(offer_id = id, validator = %caller.name, "offer approved");
        Ok(offer)
    }

    pub async fn reject(
        &self,
        caller: &Caller,
        id: OfferId,
        comment: &str,
    ) -> Result<Offer, EngineError> {
        caller.require(Action::DecideOffer)?;
        let offer = mutate_offer(self.store.as_ref(), id, None, |offer| {
            offer.reject(&caller.name, comment, Utc::now())
        })
        .await?;
        info!(offer_id = id, validator = %caller.name, "offer rejected");
        Ok(offer)
    }

    /// Store a TDR document and point the offer at it.
    pub async fn attach_tdr(
        &self,
        caller: &Caller,
        id: OfferId,
        extension: &str,
        bytes: &[u8],
    ) -> Result<(Offer, StoredArtifact), EngineError> {
        caller.require(Action::EditOffer)?;
        if bytes.is_empty() {
            return Err(EngineError::validation("TDR file is empty"));
        }
        self.store.get(id).await?;
        let stored = self.artifacts.store_tdr(id, extension, bytes).await?;
        let file_id = stored.file_id.clone();
        let offer = mutate_offer(self.store.as_ref(), id, None, |offer| {
            offer.apply_patch(
                OfferPatch {
                    tdr_file_id: Some(file_id.clone()),
                    ..OfferPatch::default()
                },
                Utc::now(),
            )
        })
        .await?;
        info!(offer_id = id, file_id = %stored.file_id, bytes = stored.byte_size, "tdr attached");
        Ok((offer, stored))
    }

    pub async fn read_tdr(&self, id: OfferId, file_id: &str) -> Result<Vec<u8>, EngineError> {
        self.store.get(id).await?;
        Ok(self.artifacts.read_tdr(id, file_id).await?)
    }
}
