//! Recurring search lifecycle and the tick that fires due schedules.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bms_core::{
    schedule_options, RunOutcome, RunStatus, ScheduleDraft, ScheduleOptions, SchedulePatch,
    ScheduledSearch, SearchResult,
};
use bms_search::{run_with_timeout, ExecutorError, SearchExecutor, SearchQuery};
use bms_storage::{ScheduleStore, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::recommend::ResultCache;
use crate::EngineError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickSummary {
    pub due: usize,
    pub claimed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    /// Claims that hit a store error; those schedules run on a later tick.
    pub claim_errors: usize,
}

enum Claim {
    Run(ScheduledSearch),
    Skipped,
    Suspended,
    Failed,
}

struct Execution {
    user_id: String,
    keywords: String,
    outcome: RunOutcome,
    results: Vec<SearchResult>,
}

#[derive(Clone)]
pub struct SearchScheduler {
    store: Arc<dyn ScheduleStore>,
    executor: Arc<dyn SearchExecutor>,
    cache: ResultCache,
    executor_timeout: Duration,
}

impl SearchScheduler {
    pub fn new(
        store: Arc<dyn ScheduleStore>,
        executor: Arc<dyn SearchExecutor>,
        cache: ResultCache,
        executor_timeout: Duration,
    ) -> Self {
        Self {
            store,
            executor,
            cache,
            executor_timeout,
        }
    }

    pub async fn create(&self, draft: ScheduleDraft) -> Result<ScheduledSearch, EngineError> {
        let schedule = ScheduledSearch::new(draft, Utc::now())?;
        let schedule = self.store.insert(schedule).await?;
        info!(
            user_id = %schedule.user_id,
            keywords = %schedule.keywords,
            frequency = schedule.frequency.as_str(),
            next_run_at = ?schedule.next_run_at,
            "scheduled search created"
        );
        Ok(schedule)
    }

    pub async fn get(&self, user_id: &str, keywords: &str) -> Result<ScheduledSearch, EngineError> {
        Ok(self.store.get(user_id, &normalize(keywords)).await?)
    }

    pub async fn list(&self, user_id: Option<&str>) -> Result<Vec<ScheduledSearch>, EngineError> {
        Ok(match user_id {
            Some(user_id) => self.store.list_for_user(user_id).await?,
            None => self.store.list_all().await?,
        })
    }

    pub async fn update(
        &self,
        user_id: &str,
        keywords: &str,
        patch: SchedulePatch,
    ) -> Result<ScheduledSearch, EngineError> {
        let expected = patch.expected_version;
        let schedule = self
            .mutate(user_id, keywords, expected, |schedule| {
                schedule.apply_patch(patch.clone(), Utc::now())
            })
            .await?;
        info!(user_id, keywords = %schedule.keywords, next_run_at = ?schedule.next_run_at, "scheduled search updated");
        Ok(schedule)
    }

    pub async fn toggle_active(&self, user_id: &str, keywords: &str) -> Result<ScheduledSearch, EngineError> {
        let schedule = self
            .mutate(user_id, keywords, None, |schedule| schedule.toggle_active(Utc::now()))
            .await?;
        info!(user_id, keywords = %schedule.keywords, active = schedule.is_active, "scheduled search toggled");
        Ok(schedule)
    }

    /// Hard delete. An execution already in flight still finishes.
    pub async fn delete(&self, user_id: &str, keywords: &str) -> Result<(), EngineError> {
        let keywords = normalize(keywords);
        self.store.delete(user_id, &keywords).await?;
        info!(user_id, keywords = %keywords, "scheduled search deleted");
        Ok(())
    }

    pub fn options(&self) -> ScheduleOptions {
        schedule_options()
    }

    async fn mutate<F>(
        &self,
        user_id: &str,
        keywords: &str,
        expected_version: Option<u64>,
        mut apply: F,
    ) -> Result<ScheduledSearch, EngineError>
    where
        F: FnMut(&mut ScheduledSearch) -> Result<(), bms_core::CoreError>,
    {
        let keywords = normalize(keywords);
        let mut retried = false;
        loop {
            let current = self.store.get(user_id, &keywords).await?;
            if let Some(expected) = expected_version {
                if current.version != expected {
                    return Err(StoreError::conflict(
                        "scheduled search",
                        format!("{user_id}/{keywords}"),
                        expected,
                    )
                    .into());
                }
            }
            let mut next = current.clone();
            apply(&mut next)?;
            match self.store.replace(next, current.version).await {
                Ok(saved) => return Ok(saved),
                Err(err) if err.is_conflict() && expected_version.is_none() && !retried => {
                    retried = true;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Fire every schedule due at `now`. Each run is claimed first, so a
    /// failed or timed-out run still advances `next_run_at`.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickSummary, EngineError> {
        let span = info_span!("scheduler_tick", %now);
        async {
            let due = self.store.due(now).await?;
            let mut summary = TickSummary {
                due: due.len(),
                ..TickSummary::default()
            };

            let mut runs = JoinSet::new();
            for schedule in due {
                let claimed = match self.claim(schedule, now).await {
                    Claim::Run(claimed) => claimed,
                    Claim::Skipped => continue,
                    Claim::Suspended => {
                        summary.failed += 1;
                        continue;
                    }
                    Claim::Failed => {
                        summary.claim_errors += 1;
                        continue;
                    }
                };
                summary.claimed += 1;
                let executor = Arc::clone(&self.executor);
                let timeout = self.executor_timeout;
                let query = SearchQuery {
                    keywords: claimed.keywords.clone(),
                    bounds: claimed.bounds(now),
                    max_results: claimed.max_results,
                };
                let span = info_span!(
                    "scheduled_search",
                    user_id = %claimed.user_id,
                    keywords = %claimed.keywords
                );
                runs.spawn(
                    async move {
                        let started_at = Utc::now();
                        let result = run_with_timeout(executor.as_ref(), &query, timeout).await;
                        let finished_at = Utc::now();
                        let (status, message, results) = match result {
                            Ok(results) => (RunStatus::Succeeded, None, results),
                            Err(err @ ExecutorError::Timeout(_)) => {
                                warn!(error = %err, "scheduled search timed out");
                                (RunStatus::TimedOut, Some(err.to_string()), Vec::new())
                            }
                            Err(err) => {
                                warn!(error = %err, "scheduled search failed");
                                (RunStatus::Failed, Some(err.to_string()), Vec::new())
                            }
                        };
                        Execution {
                            user_id: claimed.user_id,
                            keywords: claimed.keywords,
                            outcome: RunOutcome {
                                status,
                                result_count: results.len(),
                                message,
                                started_at,
                                finished_at,
                            },
                            results,
                        }
                    }
                    .instrument(span),
                );
            }

            while let Some(joined) = runs.join_next().await {
                let execution = match joined {
                    Ok(execution) => execution,
                    Err(err) => {
                        warn!(error = %err, "scheduled search task aborted");
                        summary.failed += 1;
                        continue;
                    }
                };
                match execution.outcome.status {
                    RunStatus::Succeeded => summary.succeeded += 1,
                    RunStatus::Failed => summary.failed += 1,
                    RunStatus::TimedOut => summary.timed_out += 1,
                }
                self.cache.push(&execution.user_id, &execution.results).await;
                if let Err(err) = self
                    .record_outcome(&execution.user_id, &execution.keywords, execution.outcome)
                    .await
                {
                    warn!(
                        user_id = %execution.user_id,
                        keywords = %execution.keywords,
                        error = %err,
                        "could not record run outcome"
                    );
                }
            }

            info!(
                due = summary.due,
                claimed = summary.claimed,
                succeeded = summary.succeeded,
                failed = summary.failed,
                timed_out = summary.timed_out,
                claim_errors = summary.claim_errors,
                "scheduler tick finished"
            );
            Ok(summary)
        }
        .instrument(span)
        .await
    }

    /// A lost race or a deleted schedule is skipped. A schedule with no
    /// computable next run is suspended so it stops coming due. Store errors
    /// are logged and leave the schedule for a later tick.
    async fn claim(&self, schedule: ScheduledSearch, now: DateTime<Utc>) -> Claim {
        let expected = schedule.version;
        let mut claimed = schedule;
        let suspended = match claimed.claim(now) {
            Ok(()) => false,
            Err(err) => {
                warn!(user_id = %claimed.user_id, keywords = %claimed.keywords, error = %err, "cannot compute next run; suspending");
                claimed.suspend(err.to_string(), now);
                true
            }
        };
        let (user_id, keywords) = (claimed.user_id.clone(), claimed.keywords.clone());
        match self.store.replace(claimed, expected).await {
            Ok(_) if suspended => Claim::Suspended,
            Ok(saved) => Claim::Run(saved),
            Err(StoreError::Conflict { id, .. } | StoreError::NotFound { id, .. }) => {
                debug!(schedule = %id, "schedule claimed elsewhere; skipping");
                Claim::Skipped
            }
            Err(err) => {
                warn!(%user_id, %keywords, error = %err, "could not claim scheduled search");
                Claim::Failed
            }
        }
    }

    async fn record_outcome(
        &self,
        user_id: &str,
        keywords: &str,
        outcome: RunOutcome,
    ) -> Result<(), StoreError> {
        let mut retried = false;
        loop {
            let mut current = match self.store.get(user_id, keywords).await {
                Ok(current) => current,
                Err(StoreError::NotFound { .. }) => {
                    debug!(user_id, keywords, "schedule deleted during its run");
                    return Ok(());
                }
                Err(err) => return Err(err),
            };
            let expected = current.version;
            current.record_outcome(outcome.clone());
            match self.store.replace(current, expected).await {
                Ok(_) => return Ok(()),
                Err(StoreError::NotFound { .. }) => return Ok(()),
                Err(err) if err.is_conflict() && !retried => retried = true,
                Err(err) => return Err(err),
            }
        }
    }
}

fn normalize(keywords: &str) -> String {
    bms_core::normalize_keywords(keywords)
}

/// Periodic job calling [`SearchScheduler::tick`]; the caller starts it.
pub async fn build_job_scheduler(scheduler: Arc<SearchScheduler>, cron: &str) -> Result<JobScheduler> {
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let job = Job::new_async(cron, move |_uuid, _l| {
        let scheduler = Arc::clone(&scheduler);
        Box::pin(async move {
            if let Err(err) = scheduler.tick(Utc::now()).await {
                warn!(error = %err, "scheduler tick failed");
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(sched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use bms_core::{CustomSchedule, Frequency};
    use bms_storage::MemoryStore;
    use chrono::{Datelike, Timelike};

    fn scheduler(executor: Arc<dyn SearchExecutor>) -> (SearchScheduler, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let scheduler = SearchScheduler::new(
            store.clone(),
            executor,
            ResultCache::new(20),
            Duration::from_secs(1),
        );
        (scheduler, store)
    }

    fn daily(user: &str, keywords: &str) -> ScheduleDraft {
        ScheduleDraft {
            user_id: user.into(),
            keywords: keywords.into(),
            frequency: Frequency::Daily,
            custom_schedule: None,
            period: None,
            custom_period: None,
            is_active: None,
            max_results: None,
        }
    }

    #[tokio::test]
    async fn duplicate_user_and_keywords_is_rejected() {
        let (scheduler, _store) = scheduler(Arc::new(FixedExecutor(Ok(vec![]))));
        scheduler.create(daily("amina", "solar energy")).await.unwrap();
        let err = scheduler
            .create(daily("amina", "  solar   energy "))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Duplicate);
        scheduler.create(daily("yao", "solar energy")).await.unwrap();
        assert_eq!(scheduler.list(None).await.unwrap().len(), 2);
        assert_eq!(scheduler.list(Some("amina")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn custom_weekday_rule_lands_on_the_next_slot() {
        let (scheduler, _store) = scheduler(Arc::new(FixedExecutor(Ok(vec![]))));
        let mut draft = daily("amina", "audit");
        draft.frequency = Frequency::Custom;
        draft.custom_schedule = Some(CustomSchedule {
            week_days: vec![1, 3, 5],
            hours: vec![9],
            ..CustomSchedule::default()
        });
        let before = Utc::now();
        let schedule = scheduler.create(draft).await.unwrap();
        let next = schedule.next_run_at.unwrap();
        assert!(next > before);
        assert!(matches!(next.weekday().num_days_from_sunday(), 1 | 3 | 5));
        assert_eq!((next.hour(), next.minute(), next.second()), (9, 0, 0));
        assert!(next - before <= chrono::Duration::days(3));
    }

    #[tokio::test]
    async fn toggling_off_clears_next_run_and_stops_firing() {
        let (scheduler, _store) = scheduler(Arc::new(FixedExecutor(Ok(vec![]))));
        scheduler.create(daily("amina", "audit")).await.unwrap();
        let off = scheduler.toggle_active("amina", "audit").await.unwrap();
        assert!(!off.is_active);
        assert!(off.next_run_at.is_none());

        let far = Utc::now() + chrono::Duration::days(30);
        let summary = scheduler.tick(far).await.unwrap();
        assert_eq!(summary.due, 0);

        let on = scheduler.toggle_active("amina", "audit").await.unwrap();
        assert!(on.next_run_at.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn tick_runs_due_searches_and_advances() {
        let hit = result("afdb", "1", "Solar audit");
        let (scheduler, _store) = scheduler(Arc::new(FixedExecutor(Ok(vec![hit]))));
        let created = scheduler.create(daily("amina", "solar")).await.unwrap();
        let at = created.next_run_at.unwrap();

        let summary = scheduler.tick(at).await.unwrap();
        assert_eq!(summary.claimed, 1);
        assert_eq!(summary.succeeded, 1);

        let after = scheduler.get("amina", "solar").await.unwrap();
        assert_eq!(after.last_run_at, Some(at));
        assert_eq!(after.next_run_at, Some(at + chrono::Duration::hours(24)));
        let outcome = after.last_outcome.unwrap();
        assert_eq!(outcome.status, RunStatus::Succeeded);
        assert_eq!(outcome.result_count, 1);
        assert_eq!(scheduler.cache.recent("amina").await.len(), 1);

        // Same instant again: nothing is due any more.
        assert_eq!(scheduler.tick(at).await.unwrap().due, 0);
    }

    #[tokio::test]
    async fn failed_run_still_advances() {
        let executor = FixedExecutor(Err(ExecutorError::Unavailable("dns".into())));
        let (scheduler, _store) = scheduler(Arc::new(executor));
        let created = scheduler.create(daily("amina", "solar")).await.unwrap();
        let at = created.next_run_at.unwrap();

        let summary = scheduler.tick(at).await.unwrap();
        assert_eq!(summary.failed, 1);
        let after = scheduler.get("amina", "solar").await.unwrap();
        assert_eq!(after.next_run_at, Some(at + chrono::Duration::hours(24)));
        assert_eq!(after.last_outcome.unwrap().status, RunStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_executor_times_out_and_advances() {
        let (scheduler, _store) = scheduler(Arc::new(SlowExecutor));
        let created = scheduler.create(daily("amina", "solar")).await.unwrap();
        let at = created.next_run_at.unwrap();

        let summary = scheduler.tick(at).await.unwrap();
        assert_eq!(summary.timed_out, 1);
        let after = scheduler.get("amina", "solar").await.unwrap();
        assert_eq!(after.last_outcome.unwrap().status, RunStatus::TimedOut);
        assert_eq!(after.next_run_at, Some(at + chrono::Duration::hours(24)));
    }

    #[tokio::test]
    async fn deleted_during_run_drops_the_outcome() {
        let store = Arc::new(MemoryStore::new());
        let executor = DeletingExecutor {
            store: store.clone(),
        };
        let scheduler = SearchScheduler::new(
            store.clone(),
            Arc::new(executor),
            ResultCache::new(20),
            Duration::from_secs(5),
        );
        let created = scheduler.create(daily("amina", "solar")).await.unwrap();
        let summary = scheduler.tick(created.next_run_at.unwrap()).await.unwrap();
        assert_eq!(summary.succeeded, 1);
        let err = scheduler.get("amina", "solar").await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::NotFound);
    }

    /// Every `replace` of one keyword set fails with an I/O error.
    struct BrokenKeywordStore {
        inner: MemoryStore,
        broken: &'static str,
    }

    #[async_trait::async_trait]
    impl ScheduleStore for BrokenKeywordStore {
        async fn insert(&self, schedule: ScheduledSearch) -> Result<ScheduledSearch, StoreError> {
            ScheduleStore::insert(&self.inner, schedule).await
        }

        async fn get(&self, user_id: &str, keywords: &str) -> Result<ScheduledSearch, StoreError> {
            ScheduleStore::get(&self.inner, user_id, keywords).await
        }

        async fn list_for_user(&self, user_id: &str) -> Result<Vec<ScheduledSearch>, StoreError> {
            ScheduleStore::list_for_user(&self.inner, user_id).await
        }

        async fn list_all(&self) -> Result<Vec<ScheduledSearch>, StoreError> {
            ScheduleStore::list_all(&self.inner).await
        }

        async fn due(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledSearch>, StoreError> {
            ScheduleStore::due(&self.inner, now).await
        }

        async fn replace(
            &self,
            schedule: ScheduledSearch,
            expected_version: u64,
        ) -> Result<ScheduledSearch, StoreError> {
            if schedule.keywords == self.broken {
                return Err(std::io::Error::other("disk full").into());
            }
            ScheduleStore::replace(&self.inner, schedule, expected_version).await
        }

        async fn delete(&self, user_id: &str, keywords: &str) -> Result<(), StoreError> {
            ScheduleStore::delete(&self.inner, user_id, keywords).await
        }
    }

    #[tokio::test]
    async fn claim_store_error_does_not_lose_other_runs() {
        let store = Arc::new(BrokenKeywordStore {
            inner: MemoryStore::new(),
            broken: "bbb",
        });
        let hit = result("afdb", "1", "Solar audit");
        let scheduler = SearchScheduler::new(
            store.clone(),
            Arc::new(FixedExecutor(Ok(vec![hit]))),
            ResultCache::new(20),
            Duration::from_secs(5),
        );
        let a = scheduler.create(daily("amina", "aaa")).await.unwrap();
        let b = scheduler.create(daily("amina", "bbb")).await.unwrap();
        let at = a.next_run_at.max(b.next_run_at).unwrap() + chrono::Duration::seconds(1);

        let summary = scheduler.tick(at).await.unwrap();
        assert_eq!(summary.due, 2);
        assert_eq!(summary.claimed, 1);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.claim_errors, 1);

        let ran = scheduler.get("amina", "aaa").await.unwrap();
        assert_eq!(ran.last_run_at, Some(at));
        assert_eq!(ran.last_outcome.unwrap().status, RunStatus::Succeeded);
        assert_eq!(scheduler.cache.recent("amina").await.len(), 1);

        let stuck = scheduler.get("amina", "bbb").await.unwrap();
        assert_eq!(stuck.next_run_at, b.next_run_at);
        assert!(stuck.last_outcome.is_none());
    }

    #[tokio::test]
    async fn uncomputable_next_run_suspends_the_schedule() {
        let (scheduler, store) = scheduler(Arc::new(FixedExecutor(Ok(vec![]))));
        let mut broken = scheduler.create(daily("amina", "solar")).await.unwrap();
        let at = broken.next_run_at.unwrap();
        let version = broken.version;
        broken.frequency = Frequency::Custom;
        broken.custom_schedule = Some(CustomSchedule {
            interval_hours: Some(u32::MAX),
            ..CustomSchedule::default()
        });
        ScheduleStore::replace(store.as_ref(), broken, version)
            .await
            .unwrap();

        let summary = scheduler.tick(at).await.unwrap();
        assert_eq!(summary.claimed, 0);
        assert_eq!(summary.failed, 1);

        let after = scheduler.get("amina", "solar").await.unwrap();
        assert!(!after.is_active);
        assert!(after.next_run_at.is_none());
        assert_eq!(after.last_outcome.unwrap().status, RunStatus::Failed);
        assert_eq!(scheduler.tick(at + chrono::Duration::days(1)).await.unwrap().due, 0);
    }

    #[tokio::test]
    async fn overlapping_ticks_fire_once() {
        let (scheduler, _store) = scheduler(Arc::new(FixedExecutor(Ok(vec![]))));
        let created = scheduler.create(daily("amina", "solar")).await.unwrap();
        let at = created.next_run_at.unwrap();
        let (a, b) = tokio::join!(scheduler.tick(at), scheduler.tick(at));
        assert_eq!(a.unwrap().claimed + b.unwrap().claimed, 1);
    }

    #[tokio::test]
    async fn stale_edit_is_a_conflict() {
        let (scheduler, _store) = scheduler(Arc::new(FixedExecutor(Ok(vec![]))));
        let created = scheduler.create(daily("amina", "solar")).await.unwrap();
        scheduler
            .update(
                "amina",
                "solar",
                SchedulePatch {
                    expected_version: Some(created.version),
                    frequency: Some(Frequency::Weekly),
                    ..SchedulePatch::default()
                },
            )
            .await
            .unwrap();
        let err = scheduler
            .update(
                "amina",
                "solar",
                SchedulePatch {
                    expected_version: Some(created.version),
                    max_results: Some(10),
                    ..SchedulePatch::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn job_scheduler_builds_for_default_cron() {
        let (scheduler, _store) = scheduler(Arc::new(FixedExecutor(Ok(vec![]))));
        build_job_scheduler(Arc::new(scheduler), "0 * * * * *")
            .await
            .unwrap();
    }
}
