//! Lead/associate department assignment and delivery modality tracking for
//! approved offers.

use std::sync::Arc;

use bms_core::{AssignmentDetails, Department, Modality, Offer, OfferId, OfferPatch};
use bms_storage::{ListOrder, OfferFilter, OfferStore};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, info_span, warn, Instrument};

use crate::workflow::mutate_offer;
use crate::{Action, Caller, EngineError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkAssignRequest {
    pub ids: Vec<OfferId>,
    #[serde(default)]
    pub lead: Option<Department>,
    #[serde(default)]
    pub associate: Option<Department>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkItemError {
    pub code: String,
    pub message: String,
}

/// Outcome of one id in a bulk assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkItemResult {
    pub id: OfferId,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offer: Option<Offer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<BulkItemError>,
}

impl BulkItemResult {
    fn from_result(id: OfferId, result: Result<Offer, EngineError>) -> Self {
        match result {
            Ok(offer) => Self {
                id,
                ok: true,
                offer: Some(offer),
                error: None,
            },
            Err(err) => Self {
                id,
                ok: false,
                offer: None,
                error: Some(BulkItemError {
                    code: err.kind().code().to_string(),
                    message: err.to_string(),
                }),
            },
        }
    }
}

#[derive(Clone)]
pub struct AssignmentEngine {
    store: Arc<dyn OfferStore>,
}

impl AssignmentEngine {
    pub fn new(store: Arc<dyn OfferStore>) -> Self {
        Self { store }
    }

    /// Omitted sides keep their current department.
    pub async fn assign(
        &self,
        caller: &Caller,
        id: OfferId,
        lead: Option<Department>,
        associate: Option<Department>,
    ) -> Result<Offer, EngineError> {
        caller.require(Action::Dispatch)?;
        self.assign_unchecked(id, lead, associate).await
    }

    async fn assign_unchecked(
        &self,
        id: OfferId,
        lead: Option<Department>,
        associate: Option<Department>,
    ) -> Result<Offer, EngineError> {
        let offer = mutate_offer(self.store.as_ref(), id, None, |offer| {
            offer.assign(lead, associate, Utc::now())
        })
        .await?;
        info!(
            offer_id = id,
            lead = offer.lead().map(Department::as_str),
            associate = offer.associate().map(Department::as_str),
            "offer assigned"
        );
        Ok(offer)
    }

    pub async fn set_modality(
        &self,
        caller: &Caller,
        id: OfferId,
        modality: Modality,
        justification: Option<&str>,
    ) -> Result<Offer, EngineError> {
        caller.require(Action::Dispatch)?;
        let offer = mutate_offer(self.store.as_ref(), id, None, |offer| {
            offer.set_modality(modality, justification, Utc::now())
        })
        .await?;
        info!(offer_id = id, modality = %modality, "modality updated");
        Ok(offer)
    }

    pub async fn update_assignment_details(
        &self,
        caller: &Caller,
        id: OfferId,
        details: AssignmentDetails,
    ) -> Result<Offer, EngineError> {
        caller.require(Action::Dispatch)?;
        Ok(mutate_offer(self.store.as_ref(), id, None, |offer| {
            offer.apply_patch(
                OfferPatch {
                    assignment_details: Some(details.clone()),
                    ..OfferPatch::default()
                },
                Utc::now(),
            )
        })
        .await?)
    }

    pub async fn list_lead(&self, department: Department) -> Result<Vec<Offer>, EngineError> {
        Ok(self
            .store
            .list(&OfferFilter::lead(department), ListOrder::default())
            .await?)
    }

    pub async fn list_associate(&self, department: Department) -> Result<Vec<Offer>, EngineError> {
        Ok(self
            .store
            .list(&OfferFilter::associate(department), ListOrder::default())
            .await?)
    }

    /// Assign every id independently; one failure never aborts the batch.
    pub async fn bulk_assign(
        &self,
        caller: &Caller,
        request: BulkAssignRequest,
    ) -> Result<Vec<BulkItemResult>, EngineError> {
        caller.require(Action::Dispatch)?;
        if request.lead.is_none() && request.associate.is_none() {
            return Err(EngineError::validation(
                "bulk assignment needs a lead or an associate department",
            ));
        }
        let span = info_span!("bulk_assign", count = request.ids.len());
        async {
            let mut results = Vec::with_capacity(request.ids.len());
            for id in request.ids {
                let result = self.assign_unchecked(id, request.lead, request.associate).await;
                if let Err(err) = &result {
                    warn!(offer_id = id, error = %err, "bulk assignment item failed");
                }
                results.push(BulkItemResult::from_result(id, result));
            }
            let failed = results.iter().filter(|r| !r.ok).count();
            info!(failed, "bulk assignment finished");
            Ok(results)
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use bms_core::Outcome;

    async fn approved(service: &crate::OfferService, title: &str) -> Offer {
        let offer = pending_offer(service, title).await;
        service.approve(&validator(), offer.id, None).await.unwrap()
    }

    #[tokio::test]
    async fn assigning_one_side_keeps_the_other() {
        let (service, _dir) = offer_service();
        let engine = AssignmentEngine::new(service_store(&service));
        let offer = approved(&service, "Audit").await;

        let offer = engine
            .assign(&dispatcher(), offer.id, Some(Department::Digital), Some(Department::Health))
            .await
            .unwrap();
        let offer = engine
            .assign(&dispatcher(), offer.id, Some(Department::Strategy), None)
            .await
            .unwrap();
        assert_eq!(offer.lead(), Some(Department::Strategy));
        assert_eq!(offer.associate(), Some(Department::Health));

        let offer = engine
            .assign(&dispatcher(), offer.id, None, Some(Department::Training))
            .await
            .unwrap();
        assert_eq!(offer.lead(), Some(Department::Strategy));
        assert_eq!(offer.associate(), Some(Department::Training));
    }

    #[tokio::test]
    async fn assigning_a_pending_offer_is_rejected() {
        let (service, _dir) = offer_service();
        let engine = AssignmentEngine::new(service_store(&service));
        let offer = pending_offer(&service, "Audit").await;
        let err = engine
            .assign(&dispatcher(), offer.id, Some(Department::Digital), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidStateTransition);
    }

    #[tokio::test]
    async fn bulk_assign_reports_each_id() {
        let (service, _dir) = offer_service();
        let engine = AssignmentEngine::new(service_store(&service));
        let first = approved(&service, "First").await;
        let second = pending_offer(&service, "Second").await;
        let third = approved(&service, "Third").await;

        let results = engine
            .bulk_assign(
                &dispatcher(),
                BulkAssignRequest {
                    ids: vec![first.id, second.id, third.id],
                    lead: Some(Department::Infrastructure),
                    associate: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
        assert!(results[0].ok);
        assert!(!results[1].ok);
        assert_eq!(
            results[1].error.as_ref().map(|e| e.code.as_str()),
            Some("invalid_state_transition")
        );
        assert!(results[2].ok);

        let lead = engine.list_lead(Department::Infrastructure).await.unwrap();
        assert_eq!(lead.len(), 2);
    }

    #[tokio::test]
    async fn offer_can_appear_in_both_department_views() {
        let (service, _dir) = offer_service();
        let engine = AssignmentEngine::new(service_store(&service));
        let a = approved(&service, "A").await;
        let b = approved(&service, "B").await;
        engine
            .assign(&dispatcher(), a.id, Some(Department::Digital), Some(Department::Health))
            .await
            .unwrap();
        engine
            .assign(&dispatcher(), b.id, Some(Department::Health), Some(Department::Digital))
            .await
            .unwrap();
        assert_eq!(engine.list_lead(Department::Digital).await.unwrap().len(), 1);
        assert_eq!(engine.list_associate(Department::Digital).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn modality_moves_forward_only() {
        let (service, _dir) = offer_service();
        let engine = AssignmentEngine::new(service_store(&service));
        let offer = approved(&service, "Audit").await;
        assert_eq!(offer.modality(), Some(Modality::New));

        let offer = engine
            .set_modality(&dispatcher(), offer.id, Modality::Submitted, None)
            .await
            .unwrap();
        let same = engine
            .set_modality(&dispatcher(), offer.id, Modality::Submitted, None)
            .await
            .unwrap();
        assert_eq!(same.version, offer.version);

        let err = engine
            .set_modality(&dispatcher(), offer.id, Modality::Mounted, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidStateTransition);

        let offer = engine
            .set_modality(&dispatcher(), offer.id, Modality::Won, None)
            .await
            .unwrap();
        assert_eq!(offer.delivery.as_ref().map(|d| d.outcome), Some(Outcome::Won));
        let err = engine
            .set_modality(&dispatcher(), offer.id, Modality::Cancelled, Some("late"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidStateTransition);
    }

    #[tokio::test]
    async fn validators_cannot_dispatch() {
        let (service, _dir) = offer_service();
        let engine = AssignmentEngine::new(service_store(&service));
        let offer = approved(&service, "Audit").await;
        let err = engine
            .assign(&validator(), offer.id, Some(Department::Digital), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Forbidden);
    }

    #[tokio::test]
    async fn assignment_details_require_approval() {
        let (service, _dir) = offer_service();
        let engine = AssignmentEngine::new(service_store(&service));
        let pending = pending_offer(&service, "Pending").await;
        let details = AssignmentDetails {
            quality_owner: Some("Nadia".into()),
            ..AssignmentDetails::default()
        };
        let err = engine
            .update_assignment_details(&dispatcher(), pending.id, details.clone())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidStateTransition);

        let offer = approved(&service, "Approved").await;
        let offer = engine
            .update_assignment_details(&dispatcher(), offer.id, details)
            .await
            .unwrap();
        assert_eq!(
            offer.assignment.unwrap().details.quality_owner.as_deref(),
            Some("Nadia")
        );
    }
}
