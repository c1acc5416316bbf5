//! Dashboard summary and parquet snapshot export.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{BooleanArray, Float64Array, Int64Array, RecordBatch, StringArray, UInt32Array, UInt64Array};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use bms_core::{Modality, Offer, OfferId, OfferStatus, ScheduledSearch};
use chrono::{DateTime, NaiveDate, Utc};
use parquet::arrow::ArrowWriter;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::fs;
use uuid::Uuid;

pub const UPCOMING_DEADLINE_DAYS: i64 = 14;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpcomingDeadline {
    pub id: OfferId,
    pub title: String,
    pub status: OfferStatus,
    pub deadline_date: NaiveDate,
    pub days_left: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_lead: BTreeMap<String, usize>,
    pub by_modality: BTreeMap<String, usize>,
    pub pending_validations: usize,
    pub upcoming_deadlines: Vec<UpcomingDeadline>,
}

/// Upcoming deadlines skip rejected offers and ones already won or
/// cancelled.
pub fn dashboard(offers: &[Offer], today: NaiveDate) -> Dashboard {
    let mut summary = Dashboard {
        total: offers.len(),
        ..Dashboard::default()
    };
    for offer in offers {
        *summary
            .by_status
            .entry(offer.status.as_str().to_string())
            .or_default() += 1;
        if let Some(lead) = offer.lead() {
            *summary.by_lead.entry(lead.as_str().to_string()).or_default() += 1;
        }
        if let Some(modality) = offer.modality() {
            *summary
                .by_modality
                .entry(modality.as_str().to_string())
                .or_default() += 1;
        }
        if offer.status == OfferStatus::Pending {
            summary.pending_validations += 1;
        }

        let days_left = (offer.deadline_date - today).num_days();
        let live = offer.status != OfferStatus::Rejected
            && !offer.modality().is_some_and(Modality::is_terminal);
        if live && (0..=UPCOMING_DEADLINE_DAYS).contains(&days_left) {
            summary.upcoming_deadlines.push(UpcomingDeadline {
                id: offer.id,
                title: offer.title.clone(),
                status: offer.status,
                deadline_date: offer.deadline_date,
                days_left,
            });
        }
    }
    summary
        .upcoming_deadlines
        .sort_by(|a, b| a.deadline_date.cmp(&b.deadline_date).then(a.id.cmp(&b.id)));
    summary
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotManifest {
    pub schema_version: u32,
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub files: Vec<SnapshotManifestFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

#[derive(Debug, Clone)]
pub struct SnapshotReport {
    pub run_id: Uuid,
    pub reports_dir: PathBuf,
    pub manifest_path: PathBuf,
    pub manifest: SnapshotManifest,
}

/// Writes `<root>/<run_id>/` with the dashboard brief and parquet snapshots
/// of offers, assignments and schedules.
pub async fn export_snapshot(
    root: &Path,
    offers: &[Offer],
    schedules: &[ScheduledSearch],
    now: DateTime<Utc>,
) -> Result<SnapshotReport> {
    let run_id = Uuid::new_v4();
    let reports_dir = root.join(run_id.to_string());
    let snapshot_dir = reports_dir.join("snapshots");
    fs::create_dir_all(&snapshot_dir)
        .await
        .with_context(|| format!("creating {}", snapshot_dir.display()))?;

    let summary = dashboard(offers, now.date_naive());
    fs::write(reports_dir.join("dashboard_brief.md"), render_brief(run_id, now, &summary, schedules))
        .await
        .context("writing dashboard_brief.md")?;

    let offers_path = snapshot_dir.join("offers.parquet");
    let assignments_path = snapshot_dir.join("assignments.parquet");
    let schedules_path = snapshot_dir.join("schedules.parquet");
    write_offers_parquet(&offers_path, offers)?;
    write_assignments_parquet(&assignments_path, offers)?;
    write_schedules_parquet(&schedules_path, schedules)?;

    let manifest = SnapshotManifest {
        schema_version: 1,
        run_id,
        generated_at: now,
        files: vec![
            manifest_entry("offers", &reports_dir, &offers_path)?,
            manifest_entry("assignments", &reports_dir, &assignments_path)?,
            manifest_entry("schedules", &reports_dir, &schedules_path)?,
        ],
    };
    let manifest_path = snapshot_dir.join("manifest.json");
    let manifest_json = serde_json::to_vec_pretty(&manifest).context("serializing manifest")?;
    fs::write(&manifest_path, manifest_json)
        .await
        .with_context(|| format!("writing {}", manifest_path.display()))?;

    tracing::info!(%run_id, dir = %reports_dir.display(), offers = offers.len(), "snapshot exported");
    Ok(SnapshotReport {
        run_id,
        reports_dir,
        manifest_path,
        manifest,
    })
}

fn render_brief(
    run_id: Uuid,
    now: DateTime<Utc>,
    summary: &Dashboard,
    schedules: &[ScheduledSearch],
) -> String {
    let counts = |map: &BTreeMap<String, usize>| {
        if map.is_empty() {
            return "- none".to_string();
        }
        map.iter()
            .map(|(k, v)| format!("- {k}: {v}"))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let deadlines = if summary.upcoming_deadlines.is_empty() {
        "- none".to_string()
    } else {
        summary
            .upcoming_deadlines
            .iter()
            .map(|d| format!("- #{} {} ({}, {} days left)", d.id, d.title, d.deadline_date, d.days_left))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let active = schedules.iter().filter(|s| s.is_active).count();
    format!(
        "# BMS Dashboard Brief\n\n- Run ID: `{run_id}`\n- Generated: {now}\n- Offers: {}\n- Pending validations: {}\n- Scheduled searches: {} ({active} active)\n\n## By Status\n{}\n\n## By Lead Department\n{}\n\n## By Modality\n{}\n\n## Deadlines (next {UPCOMING_DEADLINE_DAYS} days)\n{}\n",
        summary.total,
        summary.pending_validations,
        schedules.len(),
        counts(&summary.by_status),
        counts(&summary.by_lead),
        counts(&summary.by_modality),
        deadlines,
    )
}

fn write_parquet(path: &Path, batch: RecordBatch) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

fn write_offers_parquet(path: &Path, offers: &[Offer]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("id", DataType::Int64, false),
        ArrowField::new("version", DataType::UInt64, false),
        ArrowField::new("title", DataType::Utf8, false),
        ArrowField::new("issuer", DataType::Utf8, false),
        ArrowField::new("countries", DataType::Utf8, false),
        ArrowField::new("offer_type", DataType::Utf8, false),
        ArrowField::new("status", DataType::Utf8, false),
        ArrowField::new("priority", DataType::Utf8, false),
        ArrowField::new("deadline_date", DataType::Utf8, false),
        ArrowField::new("amount", DataType::Float64, true),
        ArrowField::new("currency", DataType::Utf8, true),
        ArrowField::new("created_at", DataType::Utf8, false),
    ]));

    let ids = Int64Array::from(offers.iter().map(|o| o.id).collect::<Vec<_>>());
    let versions = UInt64Array::from(offers.iter().map(|o| o.version).collect::<Vec<_>>());
    let titles = StringArray::from(offers.iter().map(|o| Some(o.title.as_str())).collect::<Vec<_>>());
    let issuers = StringArray::from(offers.iter().map(|o| Some(o.issuer.as_str())).collect::<Vec<_>>());
    let countries = StringArray::from(
        offers
            .iter()
            .map(|o| Some(o.countries.join("; ")))
            .collect::<Vec<_>>(),
    );
    let offer_types = StringArray::from(
        offers
            .iter()
            .map(|o| Some(o.offer_type.as_str()))
            .collect::<Vec<_>>(),
    );
    let statuses = StringArray::from(offers.iter().map(|o| Some(o.status.as_str())).collect::<Vec<_>>());
    let priorities = StringArray::from(
        offers
            .iter()
            .map(|o| Some(o.priority.as_str()))
            .collect::<Vec<_>>(),
    );
    let deadlines = StringArray::from(
        offers
            .iter()
            .map(|o| Some(o.deadline_date.to_string()))
            .collect::<Vec<_>>(),
    );
    let amounts = Float64Array::from(offers.iter().map(|o| o.amount).collect::<Vec<_>>());
    let currencies = StringArray::from(offers.iter().map(|o| o.currency.as_deref()).collect::<Vec<_>>());
    let created = StringArray::from(
        offers
            .iter()
            .map(|o| Some(o.created_at.to_rfc3339()))
            .collect::<Vec<_>>(),
    );

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(ids),
            Arc::new(versions),
            Arc::new(titles),
            Arc::new(issuers),
            Arc::new(countries),
            Arc::new(offer_types),
            Arc::new(statuses),
            Arc::new(priorities),
            Arc::new(deadlines),
            Arc::new(amounts),
            Arc::new(currencies),
            Arc::new(created),
        ],
    )
    .context("building offers record batch")?;
    write_parquet(path, batch)
}

/// One row per approved offer.
fn write_assignments_parquet(path: &Path, offers: &[Offer]) -> Result<()> {
    let approved: Vec<&Offer> = offers
        .iter()
        .filter(|o| o.status == OfferStatus::Approved)
        .collect();

    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("offer_id", DataType::Int64, false),
        ArrowField::new("lead", DataType::Utf8, true),
        ArrowField::new("associate", DataType::Utf8, true),
        ArrowField::new("modality", DataType::Utf8, true),
        ArrowField::new("outcome", DataType::Utf8, true),
        ArrowField::new("deposited", DataType::Boolean, false),
    ]));

    let ids = Int64Array::from(approved.iter().map(|o| o.id).collect::<Vec<_>>());
    let leads = StringArray::from(
        approved
            .iter()
            .map(|o| o.lead().map(|d| d.as_str()))
            .collect::<Vec<_>>(),
    );
    let associates = StringArray::from(
        approved
            .iter()
            .map(|o| o.associate().map(|d| d.as_str()))
            .collect::<Vec<_>>(),
    );
    let modalities = StringArray::from(
        approved
            .iter()
            .map(|o| o.modality().map(|m| m.as_str()))
            .collect::<Vec<_>>(),
    );
    let outcomes = StringArray::from(
        approved
            .iter()
            .map(|o| o.delivery.as_ref().map(|d| d.outcome.as_str()))
            .collect::<Vec<_>>(),
    );
    let deposited = BooleanArray::from(
        approved
            .iter()
            .map(|o| o.delivery.as_ref().is_some_and(|d| d.deposited))
            .collect::<Vec<_>>(),
    );

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(ids),
            Arc::new(leads),
            Arc::new(associates),
            Arc::new(modalities),
            Arc::new(outcomes),
            Arc::new(deposited),
        ],
    )
    .context("building assignments record batch")?;
    write_parquet(path, batch)
}

fn write_schedules_parquet(path: &Path, schedules: &[ScheduledSearch]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("user_id", DataType::Utf8, false),
        ArrowField::new("keywords", DataType::Utf8, false),
        ArrowField::new("frequency", DataType::Utf8, false),
        ArrowField::new("period", DataType::Utf8, false),
        ArrowField::new("is_active", DataType::Boolean, false),
        ArrowField::new("max_results", DataType::UInt32, false),
        ArrowField::new("last_run_at", DataType::Utf8, true),
        ArrowField::new("next_run_at", DataType::Utf8, true),
        ArrowField::new("last_status", DataType::Utf8, true),
    ]));

    let users = StringArray::from(
        schedules
            .iter()
            .map(|s| Some(s.user_id.as_str()))
            .collect::<Vec<_>>(),
    );
    let keywords = StringArray::from(
        schedules
            .iter()
            .map(|s| Some(s.keywords.as_str()))
            .collect::<Vec<_>>(),
    );
    let frequencies = StringArray::from(
        schedules
            .iter()
            .map(|s| Some(s.frequency.as_str()))
            .collect::<Vec<_>>(),
    );
    let periods = StringArray::from(
        schedules
            .iter()
            .map(|s| Some(s.period.as_str()))
            .collect::<Vec<_>>(),
    );
    let active = BooleanArray::from(schedules.iter().map(|s| s.is_active).collect::<Vec<_>>());
    let max_results = UInt32Array::from(schedules.iter().map(|s| s.max_results).collect::<Vec<_>>());
    let last_runs = StringArray::from(
        schedules
            .iter()
            .map(|s| s.last_run_at.map(|t| t.to_rfc3339()))
            .collect::<Vec<_>>(),
    );
    let next_runs = StringArray::from(
        schedules
            .iter()
            .map(|s| s.next_run_at.map(|t| t.to_rfc3339()))
            .collect::<Vec<_>>(),
    );
    let statuses = StringArray::from(
        schedules
            .iter()
            .map(|s| s.last_outcome.as_ref().map(|o| o.status.as_str()))
            .collect::<Vec<_>>(),
    );

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(users),
            Arc::new(keywords),
            Arc::new(frequencies),
            Arc::new(periods),
            Arc::new(active),
            Arc::new(max_results),
            Arc::new(last_runs),
            Arc::new(next_runs),
            Arc::new(statuses),
        ],
    )
    .context("building schedules record batch")?;
    write_parquet(path, batch)
}

fn manifest_entry(name: &str, reports_dir: &Path, path: &Path) -> Result<SnapshotManifestFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let sha256 = hex::encode(hasher.finalize());
    let rel = path
        .strip_prefix(reports_dir)
        .unwrap_or(path)
        .display()
        .to_string();
    Ok(SnapshotManifestFile {
        name: name.to_string(),
        path: rel,
        sha256,
        bytes: bytes.len() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use bms_core::{Delivery, Department, Frequency, ScheduleDraft};
    use chrono::TimeZone;

    fn offer(id: OfferId, status: OfferStatus, deadline: NaiveDate) -> Offer {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).single().unwrap();
        let mut offer = Offer::from_draft(sample_draft("Audit"), now).unwrap();
        offer.id = id;
        offer.version = 1;
        offer.status = status;
        offer.deadline_date = deadline;
        offer
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
    }

    fn sample_offers() -> Vec<Offer> {
        let mut won = offer(3, OfferStatus::Approved, day(5));
        won.delivery = Some(Delivery {
            modality: Modality::Won,
            ..Delivery::new()
        });
        let mut assigned = offer(4, OfferStatus::Approved, day(20));
        assigned.delivery = Some(Delivery::new());
        assigned.assignment = Some(bms_core::Assignment {
            lead: Some(Department::Digital),
            ..bms_core::Assignment::default()
        });
        vec![
            offer(1, OfferStatus::Pending, day(10)),
            offer(2, OfferStatus::Rejected, day(3)),
            won,
            assigned,
            offer(5, OfferStatus::Draft, day(2)),
        ]
    }

    #[test]
    fn dashboard_counts_and_deadlines() {
        let summary = dashboard(&sample_offers(), day(1));
        assert_eq!(summary.total, 5);
        assert_eq!(summary.by_status["approved"], 2);
        assert_eq!(summary.by_status["pending"], 1);
        assert_eq!(summary.by_lead["digital"], 1);
        assert_eq!(summary.by_modality["won"], 1);
        assert_eq!(summary.by_modality["new"], 1);
        assert_eq!(summary.pending_validations, 1);
        let ids: Vec<OfferId> = summary.upcoming_deadlines.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![5, 1]);
        assert_eq!(summary.upcoming_deadlines[0].days_left, 1);
    }

    #[tokio::test]
    async fn snapshot_writes_brief_parquet_and_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).single().unwrap();
        let schedule = ScheduledSearch::new(
            ScheduleDraft {
                user_id: "amina".into(),
                keywords: "solar".into(),
                frequency: Frequency::Daily,
                custom_schedule: None,
                period: None,
                custom_period: None,
                is_active: None,
                max_results: None,
            },
            now,
        )
        .unwrap();

        let report = export_snapshot(dir.path(), &sample_offers(), &[schedule], now)
            .await
            .unwrap();
        assert!(report.reports_dir.join("dashboard_brief.md").exists());
        let brief = std::fs::read_to_string(report.reports_dir.join("dashboard_brief.md")).unwrap();
        assert!(brief.contains("Pending validations: 1"));
        assert!(brief.contains("(1 active)"));

        assert_eq!(report.manifest.files.len(), 3);
        for file in &report.manifest.files {
            let path = report.reports_dir.join(&file.path);
            let bytes = std::fs::read(&path).unwrap();
            assert_eq!(bytes.len() as u64, file.bytes);
            assert_eq!(&bytes[..4], b"PAR1");
            assert_eq!(file.sha256.len(), 64);
        }
        let manifest: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&report.manifest_path).unwrap()).unwrap();
        assert_eq!(manifest["files"][0]["path"], "snapshots/offers.parquet");
    }
}
