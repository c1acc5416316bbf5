use async_trait::async_trait;
use bms_core::{Offer, OfferId, ResultKey, ResultValidation, ScheduledSearch};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::info;

use crate::{
    schedule_id, ListOrder, OfferFilter, OfferStore, ScheduleStore, StoreError, ValidationStore,
};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");

pub async fn connect(database_url: &str) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Postgres-backed store. Records are kept as JSONB payloads with the
/// columns needed for filtering and compare-and-swap pulled out beside them.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        MIGRATOR.run(&self.pool).await?;
        info!("database migrations applied");
        Ok(())
    }

    async fn offer_exists(&self, id: OfferId) -> Result<bool, StoreError> {
        let found: Option<i64> = sqlx::query_scalar("SELECT id FROM offers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    async fn schedule_exists(&self, user_id: &str, keywords: &str) -> Result<bool, StoreError> {
        let found: Option<String> = sqlx::query_scalar(
            "SELECT user_id FROM scheduled_searches WHERE user_id = $1 AND keywords = $2",
        )
        .bind(user_id)
        .bind(keywords)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }
}

fn offer_from_row(row: &PgRow) -> Result<Offer, StoreError> {
    let Json(mut offer): Json<Offer> = row.try_get("payload")?;
    offer.id = row.try_get("id")?;
    offer.version = version_from_db(row.try_get("version")?);
    Ok(offer)
}

fn schedule_from_row(row: &PgRow) -> Result<ScheduledSearch, StoreError> {
    let Json(mut schedule): Json<ScheduledSearch> = row.try_get("payload")?;
    schedule.version = version_from_db(row.try_get("version")?);
    Ok(schedule)
}

fn version_to_db(version: u64) -> i64 {
    i64::try_from(version).unwrap_or(i64::MAX)
}

fn version_from_db(version: i64) -> u64 {
    u64::try_from(version).unwrap_or_default()
}

#[async_trait]
impl OfferStore for PgStore {
    async fn insert(&self, mut offer: Offer) -> Result<Offer, StoreError> {
        let id: i64 = sqlx::query_scalar("SELECT nextval(pg_get_serial_sequence('offers', 'id'))")
            .fetch_one(&self.pool)
            .await?;
        offer.id = id;
        offer.version = 1;
        sqlx::query(
            r#"
            INSERT INTO offers (id, version, status, lead_department, associate_department, payload, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(offer.id)
        .bind(version_to_db(offer.version))
        .bind(offer.status.as_str())
        .bind(offer.lead().map(|d| d.as_str()))
        .bind(offer.associate().map(|d| d.as_str()))
        .bind(Json(&offer))
        .bind(offer.created_at)
        .bind(offer.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(offer)
    }

    async fn get(&self, id: OfferId) -> Result<Offer, StoreError> {
        let row = sqlx::query("SELECT id, version, payload FROM offers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::not_found("offer", id))?;
        offer_from_row(&row)
    }

    async fn list(&self, filter: &OfferFilter, order: ListOrder) -> Result<Vec<Offer>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, version, payload
              FROM offers
             WHERE ($1::text IS NULL OR status = $1)
               AND ($2::text IS NULL OR lead_department = $2)
               AND ($3::text IS NULL OR associate_department = $3)
               AND ($4::text IS NULL OR lead_department = $4 OR associate_department = $4)
            "#,
        )
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.lead.map(|d| d.as_str()))
        .bind(filter.associate.map(|d| d.as_str()))
        .bind(filter.department.map(|d| d.as_str()))
        .fetch_all(&self.pool)
        .await?;

        let mut offers = Vec::with_capacity(rows.len());
        for row in &rows {
            let offer = offer_from_row(row)?;
            if filter.matches(&offer) {
                offers.push(offer);
            }
        }
        order.sort(&mut offers);
        Ok(offers)
    }

    async fn replace(&self, mut offer: Offer, expected_version: u64) -> Result<Offer, StoreError> {
        offer.version = expected_version + 1;
        let result = sqlx::query(
            r#"
            UPDATE offers
               SET version = $1,
                   status = $2,
                   lead_department = $3,
                   associate_department = $4,
                   payload = $5,
                   updated_at = $6
             WHERE id = $7
               AND version = $8
            "#,
        )
        .bind(version_to_db(offer.version))
        .bind(offer.status.as_str())
        .bind(offer.lead().map(|d| d.as_str()))
        .bind(offer.associate().map(|d| d.as_str()))
        .bind(Json(&offer))
        .bind(offer.updated_at)
        .bind(offer.id)
        .bind(version_to_db(expected_version))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(if self.offer_exists(offer.id).await? {
                StoreError::conflict("offer", offer.id, expected_version)
            } else {
                StoreError::not_found("offer", offer.id)
            });
        }
        Ok(offer)
    }
}

#[async_trait]
impl ScheduleStore for PgStore {
    async fn insert(&self, mut schedule: ScheduledSearch) -> Result<ScheduledSearch, StoreError> {
        schedule.version = 1;
        let result = sqlx::query(
            r#"
            INSERT INTO scheduled_searches (user_id, keywords, version, is_active, next_run_at, payload, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (user_id, keywords) DO NOTHING
            "#,
        )
        .bind(&schedule.user_id)
        .bind(&schedule.keywords)
        .bind(version_to_db(schedule.version))
        .bind(schedule.is_active)
        .bind(schedule.next_run_at)
        .bind(Json(&schedule))
        .bind(schedule.created_at)
        .bind(schedule.updated_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::duplicate(
                "scheduled search",
                schedule_id(&schedule.user_id, &schedule.keywords),
            ));
        }
        Ok(schedule)
    }

    async fn get(&self, user_id: &str, keywords: &str) -> Result<ScheduledSearch, StoreError> {
        let row = sqlx::query(
            "SELECT version, payload FROM scheduled_searches WHERE user_id = $1 AND keywords = $2",
        )
        .bind(user_id)
        .bind(keywords)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("scheduled search", schedule_id(user_id, keywords)))?;
        schedule_from_row(&row)
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<ScheduledSearch>, StoreError> {
        let rows = sqlx::query(
            "SELECT version, payload FROM scheduled_searches WHERE user_id = $1 ORDER BY keywords",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(schedule_from_row).collect()
    }

    async fn list_all(&self) -> Result<Vec<ScheduledSearch>, StoreError> {
        let rows = sqlx::query(
            "SELECT version, payload FROM scheduled_searches ORDER BY user_id, keywords",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(schedule_from_row).collect()
    }

    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledSearch>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT version, payload
              FROM scheduled_searches
             WHERE is_active
               AND next_run_at IS NOT NULL
               AND next_run_at <= $1
             ORDER BY next_run_at
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(schedule_from_row).collect()
    }

    async fn replace(
        &self,
        mut schedule: ScheduledSearch,
        expected_version: u64,
    ) -> Result<ScheduledSearch, StoreError> {
        schedule.version = expected_version + 1;
        let result = sqlx::query(
            r#"
            UPDATE scheduled_searches
               SET version = $1,
                   is_active = $2,
                   next_run_at = $3,
                   payload = $4,
                   updated_at = $5
             WHERE user_id = $6
               AND keywords = $7
               AND version = $8
            "#,
        )
        .bind(version_to_db(schedule.version))
        .bind(schedule.is_active)
        .bind(schedule.next_run_at)
        .bind(Json(&schedule))
        .bind(schedule.updated_at)
        .bind(&schedule.user_id)
        .bind(&schedule.keywords)
        .bind(version_to_db(expected_version))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let id = schedule_id(&schedule.user_id, &schedule.keywords);
            return Err(
                if self.schedule_exists(&schedule.user_id, &schedule.keywords).await? {
                    StoreError::conflict("scheduled search", id, expected_version)
                } else {
                    StoreError::not_found("scheduled search", id)
                },
            );
        }
        Ok(schedule)
    }

    async fn delete(&self, user_id: &str, keywords: &str) -> Result<(), StoreError> {
        let result =
            sqlx::query("DELETE FROM scheduled_searches WHERE user_id = $1 AND keywords = $2")
                .bind(user_id)
                .bind(keywords)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(
                "scheduled search",
                schedule_id(user_id, keywords),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ValidationStore for PgStore {
    /// The insert and the counter bump are one statement; the counter row
    /// lock orders concurrent validations of the same result.
    async fn record(&self, validation: ResultValidation) -> Result<u32, StoreError> {
        let key = validation.result.key();
        let count: i64 = sqlx::query_scalar(
            r#"
            WITH inserted AS (
                INSERT INTO result_validations (user_id, source, result_id, outcome, payload, validated_at)
                VALUES ($1, $2, $3, $4, $5, $6)
            )
            INSERT INTO result_validation_counts (source, result_id, validation_count)
            VALUES ($2, $3, 1)
            ON CONFLICT (source, result_id)
            DO UPDATE SET validation_count = result_validation_counts.validation_count + 1
            RETURNING validation_count
            "#,
        )
        .bind(&validation.user_id)
        .bind(&key.source)
        .bind(&key.id)
        .bind(validation.outcome.as_str())
        .bind(Json(&validation))
        .bind(validation.validated_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<ResultValidation>, StoreError> {
        let rows = sqlx::query(
            "SELECT payload FROM result_validations WHERE user_id = $1 ORDER BY validated_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                let Json(validation): Json<ResultValidation> = row.try_get("payload")?;
                Ok::<_, StoreError>(validation)
            })
            .collect()
    }

    async fn count(&self, key: &ResultKey) -> Result<u32, StoreError> {
        let count: Option<i64> = sqlx::query_scalar(
            "SELECT validation_count FROM result_validation_counts WHERE source = $1 AND result_id = $2",
        )
        .bind(&key.source)
        .bind(&key.id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(count.map_or(0, |c| u32::try_from(c).unwrap_or(u32::MAX)))
    }
}
