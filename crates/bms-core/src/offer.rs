//! Offer ("offre") entity, its validation status machine and the delivery
//! modality machine that applies once an offer is approved.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

pub type OfferId = i64;

/// Country entries that require a free-text `other_country`.
const OTHER_COUNTRY_MARKERS: [&str; 2] = ["other", "autre"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OfferType {
    #[serde(rename = "AO")]
    Ao,
    #[serde(rename = "AMI")]
    Ami,
    #[serde(rename = "Avis Général", alias = "Avis General")]
    AvisGeneral,
    #[serde(rename = "Appel à projet", alias = "Appel a projet")]
    AppelAProjet,
    #[serde(rename = "Accord cadre")]
    AccordCadre,
}

impl OfferType {
    pub const ALL: [OfferType; 5] = [
        OfferType::Ao,
        OfferType::Ami,
        OfferType::AvisGeneral,
        OfferType::AppelAProjet,
        OfferType::AccordCadre,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OfferType::Ao => "AO",
            OfferType::Ami => "AMI",
            OfferType::AvisGeneral => "Avis Général",
            OfferType::AppelAProjet => "Appel à projet",
            OfferType::AccordCadre => "Accord cadre",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OfferStatus {
    Draft,
    Pending,
    Approved,
    Rejected,
}

impl OfferStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OfferStatus::Draft => "draft",
            OfferStatus::Pending => "pending",
            OfferStatus::Approved => "approved",
            OfferStatus::Rejected => "rejected",
        }
    }

    /// The only legal moves: draft → pending → {approved, rejected}.
    pub fn can_transition_to(self, next: OfferStatus) -> bool {
        matches!(
            (self, next),
            (OfferStatus::Draft, OfferStatus::Pending)
                | (OfferStatus::Pending, OfferStatus::Approved)
                | (OfferStatus::Pending, OfferStatus::Rejected)
        )
    }

    pub fn transition(self, next: OfferStatus) -> Result<OfferStatus, CoreError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CoreError::transition("status", self, next))
        }
    }
}

impl fmt::Display for OfferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OfferStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(OfferStatus::Draft),
            "pending" => Ok(OfferStatus::Pending),
            "approved" => Ok(OfferStatus::Approved),
            "rejected" => Ok(OfferStatus::Rejected),
            other => Err(CoreError::validation(format!("unknown status '{other}'"))),
        }
    }
}

/// Organisational unit ("pôle") that can lead or support an offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Department {
    Strategy,
    Digital,
    Infrastructure,
    Training,
    Health,
    Governance,
}

impl Department {
    pub const ALL: [Department; 6] = [
        Department::Strategy,
        Department::Digital,
        Department::Infrastructure,
        Department::Training,
        Department::Health,
        Department::Governance,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Department::Strategy => "strategy",
            Department::Digital => "digital",
            Department::Infrastructure => "infrastructure",
            Department::Training => "training",
            Department::Health => "health",
            Department::Governance => "governance",
        }
    }
}

impl fmt::Display for Department {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Department {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Department::ALL
            .into_iter()
            .find(|d| d.as_str() == needle)
            .ok_or_else(|| CoreError::validation(format!("unknown department '{s}'")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    New,
    Mounted,
    Submitted,
    Won,
    Cancelled,
}

impl Modality {
    pub fn as_str(self) -> &'static str {
        match self {
            Modality::New => "new",
            Modality::Mounted => "mounted",
            Modality::Submitted => "submitted",
            Modality::Won => "won",
            Modality::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Modality::Won | Modality::Cancelled)
    }

    fn rank(self) -> u8 {
        match self {
            Modality::New => 0,
            Modality::Mounted => 1,
            Modality::Submitted => 2,
            Modality::Won => 3,
            Modality::Cancelled => 4,
        }
    }

    /// Forward along new → mounted → submitted → won (skips allowed), or to
    /// cancelled from any non-terminal state. Re-setting the current value
    /// is a no-op.
    pub fn transition(self, next: Modality) -> Result<Modality, CoreError> {
        if self == next {
            return Ok(self);
        }
        if self.is_terminal() {
            return Err(CoreError::transition("modality", self, next));
        }
        if next == Modality::Cancelled || next.rank() > self.rank() {
            Ok(next)
        } else {
            Err(CoreError::transition("modality", self, next))
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    Won,
    Lost,
    #[default]
    InProgress,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Won => "won",
            Outcome::Lost => "lost",
            Outcome::InProgress => "in-progress",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRecord {
    pub validator: String,
    pub comment: Option<String>,
    pub decided_at: DateTime<Utc>,
}

/// Logistics attached during dispatch. Every `*_due` field is the deadline
/// date for the corresponding step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentDetails {
    pub imputation_date: Option<NaiveDate>,
    pub quality_owner: Option<String>,
    pub admin_setup_owner: Option<String>,
    pub admin_transmission_due: Option<NaiveDate>,
    pub deposit_address: Option<String>,
    pub deposit_due: Option<NaiveDate>,
    pub clarification_address: Option<String>,
    pub clarification_due: Option<NaiveDate>,
    pub acknowledgment_due: Option<NaiveDate>,
    pub submission_intent_due: Option<NaiveDate>,
}

impl AssignmentDetails {
    /// Overlay every populated field of `patch`; blank strings clear.
    fn merge(&mut self, patch: AssignmentDetails) {
        fn text(slot: &mut Option<String>, value: Option<String>) {
            if let Some(value) = value {
                *slot = clean(Some(value));
            }
        }
        fn date(slot: &mut Option<NaiveDate>, value: Option<NaiveDate>) {
            if value.is_some() {
                *slot = value;
            }
        }
        date(&mut self.imputation_date, patch.imputation_date);
        text(&mut self.quality_owner, patch.quality_owner);
        text(&mut self.admin_setup_owner, patch.admin_setup_owner);
        date(&mut self.admin_transmission_due, patch.admin_transmission_due);
        text(&mut self.deposit_address, patch.deposit_address);
        date(&mut self.deposit_due, patch.deposit_due);
        text(&mut self.clarification_address, patch.clarification_address);
        date(&mut self.clarification_due, patch.clarification_due);
        date(&mut self.acknowledgment_due, patch.acknowledgment_due);
        date(&mut self.submission_intent_due, patch.submission_intent_due);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub lead: Option<Department>,
    pub associate: Option<Department>,
    #[serde(flatten)]
    pub details: AssignmentDetails,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub modality: Modality,
    pub outcome: Outcome,
    pub deposited: bool,
    pub deposited_at: Option<DateTime<Utc>>,
    pub admin_setup_notes: Option<String>,
}

impl Delivery {
    pub fn new() -> Self {
        Self {
            modality: Modality::New,
            outcome: Outcome::InProgress,
            deposited: false,
            deposited_at: None,
            admin_setup_notes: None,
        }
    }
}

impl Default for Delivery {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryPatch {
    pub outcome: Option<Outcome>,
    pub deposited: Option<bool>,
    pub deposited_at: Option<DateTime<Utc>>,
    pub admin_setup_notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cancellation {
    pub justification: String,
    pub cancelled_at: DateTime<Utc>,
}

/// Input for offer creation, as entered by a content-entry user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct OfferDraft {
    pub title: Option<String>,
    pub issuer: Option<String>,
    pub countries: Vec<String>,
    pub other_country: Option<String>,
    pub objectives: Option<String>,
    pub expert_profile: Option<String>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub mission_duration: Option<String>,
    pub offer_type: Option<OfferType>,
    pub deadline_date: Option<NaiveDate>,
    pub deadline_time: Option<NaiveTime>,
    pub reference_link: Option<String>,
    pub tdr_file_id: Option<String>,
    pub discovered_by: Option<String>,
    pub priority: Option<Priority>,
}

/// Partial update of an offer. Identity fields are accepted only so that a
/// client echoing them back with a different value gets a clear rejection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct OfferPatch {
    pub id: Option<OfferId>,
    pub discovered_by: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub expected_version: Option<u64>,
    pub title: Option<String>,
    pub issuer: Option<String>,
    pub countries: Option<Vec<String>>,
    pub other_country: Option<String>,
    pub objectives: Option<String>,
    pub expert_profile: Option<String>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub mission_duration: Option<String>,
    pub offer_type: Option<OfferType>,
    pub deadline_date: Option<NaiveDate>,
    pub deadline_time: Option<NaiveTime>,
    pub reference_link: Option<String>,
    pub tdr_file_id: Option<String>,
    pub priority: Option<Priority>,
    pub assignment_details: Option<AssignmentDetails>,
    pub delivery: Option<DeliveryPatch>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Offer {
    pub id: OfferId,
    pub version: u64,
    pub title: String,
    pub issuer: String,
    pub countries: Vec<String>,
    pub other_country: Option<String>,
    pub objectives: String,
    pub expert_profile: Option<String>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub mission_duration: Option<String>,
    pub offer_type: OfferType,
    pub deadline_date: NaiveDate,
    pub deadline_time: Option<NaiveTime>,
    pub reference_link: Option<String>,
    pub tdr_file_id: Option<String>,
    pub discovered_by: Option<String>,
    pub priority: Priority,
    pub status: OfferStatus,
    pub validation: Option<ValidationRecord>,
    pub assignment: Option<Assignment>,
    pub delivery: Option<Delivery>,
    pub cancellation: Option<Cancellation>,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Offer {
    /// Build a fresh draft. `id` and `version` are placeholders until the
    /// store assigns them.
    pub fn from_draft(draft: OfferDraft, now: DateTime<Utc>) -> Result<Self, CoreError> {
        let mut missing = Vec::new();
        let title = clean(draft.title);
        let issuer = clean(draft.issuer);
        let objectives = clean(draft.objectives);
        let countries = clean_countries(draft.countries);
        if title.is_none() {
            missing.push("title");
        }
        if issuer.is_none() {
            missing.push("issuer");
        }
        if objectives.is_none() {
            missing.push("objectives");
        }
        if draft.deadline_date.is_none() {
            missing.push("deadlineDate");
        }
        if draft.offer_type.is_none() {
            missing.push("offerType");
        }
        if countries.is_empty() {
            missing.push("countries");
        }
        if !missing.is_empty() {
            return Err(CoreError::validation(format!(
                "missing required fields: {}",
                missing.join(", ")
            )));
        }
        if let Some(amount) = draft.amount {
            check_amount(amount)?;
        }

        Ok(Self {
            id: 0,
            version: 0,
            title: title.unwrap_or_default(),
            issuer: issuer.unwrap_or_default(),
            countries,
            other_country: clean(draft.other_country),
            objectives: objectives.unwrap_or_default(),
            expert_profile: clean(draft.expert_profile),
            amount: draft.amount,
            currency: clean(draft.currency),
            mission_duration: clean(draft.mission_duration),
            offer_type: draft.offer_type.unwrap_or(OfferType::Ao),
            deadline_date: draft.deadline_date.unwrap_or(now.date_naive()),
            deadline_time: draft.deadline_time,
            reference_link: clean(draft.reference_link),
            tdr_file_id: clean(draft.tdr_file_id),
            discovered_by: clean(draft.discovered_by),
            priority: draft.priority.unwrap_or_default(),
            status: OfferStatus::Draft,
            validation: None,
            assignment: None,
            delivery: None,
            cancellation: None,
            created_at: now,
            submitted_at: None,
            updated_at: now,
        })
    }

    /// Date used for default "most recent first" ordering.
    pub fn sort_date(&self) -> DateTime<Utc> {
        self.delivery
            .as_ref()
            .and_then(|d| d.deposited_at)
            .or(self.submitted_at)
            .unwrap_or(self.created_at)
    }

    pub fn lead(&self) -> Option<Department> {
        self.assignment.as_ref().and_then(|a| a.lead)
    }

    pub fn associate(&self) -> Option<Department> {
        self.assignment.as_ref().and_then(|a| a.associate)
    }

    pub fn modality(&self) -> Option<Modality> {
        self.delivery.as_ref().map(|d| d.modality)
    }

    /// Mandatory-field check applied whenever an offer leaves draft.
    pub fn check_submittable(&self) -> Result<(), CoreError> {
        if self.countries.is_empty() {
            return Err(CoreError::validation("at least one country is required"));
        }
        let needs_other = self
            .countries
            .iter()
            .any(|c| OTHER_COUNTRY_MARKERS.contains(&c.to_lowercase().as_str()));
        if needs_other && self.other_country.is_none() {
            return Err(CoreError::validation(
                "otherCountry is required when 'Other' is selected",
            ));
        }
        Ok(())
    }

    /// draft → pending. Returns `false` when the offer was already pending.
    pub fn submit(&mut self, now: DateTime<Utc>) -> Result<bool, CoreError> {
        if self.status == OfferStatus::Pending {
            return Ok(false);
        }
        let next = self.status.transition(OfferStatus::Pending)?;
        self.check_submittable()?;
        self.status = next;
        self.submitted_at = Some(now);
        self.updated_at = now;
        Ok(true)
    }

    pub fn approve(
        &mut self,
        validator: &str,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let next = self.status.transition(OfferStatus::Approved)?;
        let validator = require_text(validator, "validator")?;
        self.status = next;
        self.validation = Some(ValidationRecord {
            validator,
            comment: clean(comment),
            decided_at: now,
        });
        self.delivery = Some(Delivery::new());
        self.updated_at = now;
        Ok(())
    }

    pub fn reject(
        &mut self,
        validator: &str,
        comment: &str,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let next = self.status.transition(OfferStatus::Rejected)?;
        let validator = require_text(validator, "validator")?;
        let comment = require_text(comment, "rejection comment")?;
        self.status = next;
        self.validation = Some(ValidationRecord {
            validator,
            comment: Some(comment),
            decided_at: now,
        });
        self.updated_at = now;
        Ok(())
    }

    /// Soft cancellation: rejected before approval, modality `cancelled`
    /// after it.
    pub fn cancel(&mut self, justification: &str, now: DateTime<Utc>) -> Result<(), CoreError> {
        let justification = require_text(justification, "justification")?;
        match self.status {
            OfferStatus::Draft | OfferStatus::Pending => {
                self.status = OfferStatus::Rejected;
            }
            OfferStatus::Approved => {
                let delivery = self.delivery.get_or_insert_with(Delivery::new);
                if delivery.modality.is_terminal() {
                    return Err(CoreError::transition(
                        "modality",
                        delivery.modality,
                        Modality::Cancelled,
                    ));
                }
                delivery.modality = Modality::Cancelled;
            }
            OfferStatus::Rejected => {
                return Err(CoreError::transition("status", self.status, "cancelled"));
            }
        }
        self.cancellation = Some(Cancellation {
            justification,
            cancelled_at: now,
        });
        self.updated_at = now;
        Ok(())
    }

    /// Set lead and/or associate; an omitted side keeps its current value.
    pub fn assign(
        &mut self,
        lead: Option<Department>,
        associate: Option<Department>,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        self.ensure_approved("assigned")?;
        let mut assignment = self.assignment.clone().unwrap_or_default();
        if lead.is_some() {
            assignment.lead = lead;
        }
        if associate.is_some() {
            assignment.associate = associate;
        }
        self.assignment = Some(assignment);
        self.updated_at = now;
        Ok(())
    }

    pub fn set_modality(
        &mut self,
        next: Modality,
        justification: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        self.ensure_approved(next)?;
        let mut delivery = self.delivery.clone().unwrap_or_default();
        let current = delivery.modality;
        delivery.modality = current.transition(next)?;
        if current == next {
            return Ok(());
        }
        match next {
            Modality::Won => delivery.outcome = Outcome::Won,
            Modality::Cancelled => {
                let justification = require_text(justification.unwrap_or_default(), "justification")?;
                self.cancellation = Some(Cancellation {
                    justification,
                    cancelled_at: now,
                });
            }
            _ => {}
        }
        self.delivery = Some(delivery);
        self.updated_at = now;
        Ok(())
    }

    /// Apply a partial update atomically: either every field lands or the
    /// offer is left untouched.
    pub fn apply_patch(&mut self, patch: OfferPatch, now: DateTime<Utc>) -> Result<(), CoreError> {
        if patch.id.is_some_and(|id| id != self.id) {
            return Err(CoreError::validation("id is immutable"));
        }
        if let Some(discovered_by) = &patch.discovered_by {
            if clean(Some(discovered_by.clone())) != self.discovered_by {
                return Err(CoreError::validation("discoveredBy is immutable"));
            }
        }
        if patch.created_at.is_some_and(|at| at != self.created_at) {
            return Err(CoreError::validation("createdAt is immutable"));
        }

        let mut next = self.clone();
        if let Some(title) = patch.title {
            next.title = require_text(&title, "title")?;
        }
        if let Some(issuer) = patch.issuer {
            next.issuer = require_text(&issuer, "issuer")?;
        }
        if let Some(objectives) = patch.objectives {
            next.objectives = require_text(&objectives, "objectives")?;
        }
        if let Some(countries) = patch.countries {
            let countries = clean_countries(countries);
            if countries.is_empty() && next.status != OfferStatus::Draft {
                return Err(CoreError::validation("at least one country is required"));
            }
            next.countries = countries;
        }
        if let Some(amount) = patch.amount {
            check_amount(amount)?;
            next.amount = Some(amount);
        }
        overlay_text(&mut next.other_country, patch.other_country);
        overlay_text(&mut next.expert_profile, patch.expert_profile);
        overlay_text(&mut next.currency, patch.currency);
        overlay_text(&mut next.mission_duration, patch.mission_duration);
        overlay_text(&mut next.reference_link, patch.reference_link);
        overlay_text(&mut next.tdr_file_id, patch.tdr_file_id);
        if let Some(offer_type) = patch.offer_type {
            next.offer_type = offer_type;
        }
        if let Some(deadline_date) = patch.deadline_date {
            next.deadline_date = deadline_date;
        }
        if patch.deadline_time.is_some() {
            next.deadline_time = patch.deadline_time;
        }
        if let Some(priority) = patch.priority {
            next.priority = priority;
        }

        if let Some(details) = patch.assignment_details {
            next.ensure_approved("assignment details")?;
            next.assignment
                .get_or_insert_with(Assignment::default)
                .details
                .merge(details);
        }
        if let Some(delivery_patch) = patch.delivery {
            next.ensure_approved("delivery details")?;
            let delivery = next.delivery.get_or_insert_with(Delivery::new);
            apply_delivery_patch(delivery, delivery_patch, now)?;
        }

        if next.status != OfferStatus::Draft {
            next.check_submittable()?;
        }
        next.updated_at = now;
        *self = next;
        Ok(())
    }

    fn ensure_approved(&self, target: impl ToString) -> Result<(), CoreError> {
        if self.status == OfferStatus::Approved {
            Ok(())
        } else {
            Err(CoreError::transition("offer", self.status, target))
        }
    }
}

fn apply_delivery_patch(
    delivery: &mut Delivery,
    patch: DeliveryPatch,
    now: DateTime<Utc>,
) -> Result<(), CoreError> {
    if let Some(outcome) = patch.outcome {
        if outcome != delivery.outcome {
            if delivery.modality.is_terminal() {
                return Err(CoreError::transition("delivery", delivery.modality, outcome));
            }
            if outcome == Outcome::Won {
                return Err(CoreError::validation(
                    "outcome 'won' is set by moving the modality to won",
                ));
            }
            delivery.outcome = outcome;
        }
    }
    if let Some(deposited) = patch.deposited {
        delivery.deposited = deposited;
        if deposited && delivery.deposited_at.is_none() && patch.deposited_at.is_none() {
            delivery.deposited_at = Some(now);
        }
    }
    if patch.deposited_at.is_some() {
        delivery.deposited_at = patch.deposited_at;
    }
    overlay_text(&mut delivery.admin_setup_notes, patch.admin_setup_notes);
    Ok(())
}

fn check_amount(amount: f64) -> Result<(), CoreError> {
    if amount.is_finite() && amount >= 0.0 {
        Ok(())
    } else {
        Err(CoreError::validation("amount must be a non-negative number"))
    }
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn overlay_text(slot: &mut Option<String>, value: Option<String>) {
    if let Some(value) = value {
        *slot = clean(Some(value));
    }
}

fn require_text(value: &str, field: &str) -> Result<String, CoreError> {
    clean(Some(value.to_string())).ok_or_else(|| CoreError::validation(format!("{field} is required")))
}

fn clean_countries(countries: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(countries.len());
    for country in countries {
        let country = country.trim();
        if !country.is_empty() && !out.iter().any(|c| c.eq_ignore_ascii_case(country)) {
            out.push(country.to_string());
        }
    }
    out
}
