//! Scheduler for recurring archives
//!
//! Every active scheduled archive owns exactly one timer task in the job
//! registry. Mutations hold the registry lock across persist, deregister and
//! conditional register so no id is ever left with zero or two jobs while
//! it is active.
//!
//! # Features
//! - Jobs rebuilt from persisted active entries at startup
//! - At most one active entry per URL
//! - A failed firing is logged and the job keeps its timestamps and timer
//! - Each firing runs as its own task, so removing a job never cuts a run short

use crate::cadence::{Cadence, DEFAULT_CADENCE};
use crate::crawler::parse_site_url;
use data_access::ScheduleRepository;
use site_archiver_core::*;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Entry point a firing job invokes
#[async_trait]
pub trait ArchiveTrigger: Send + Sync {
    async fn trigger_archive(&self, url: &str) -> Result<Archive>;
}

struct ScheduledJob {
    url: String,
    cadence: String,
    handle: JoinHandle<()>,
}

pub struct ArchiveScheduler {
    repository: Arc<dyn ScheduleRepository>,
    trigger: Arc<dyn ArchiveTrigger>,
    jobs: Mutex<HashMap<ScheduleId, ScheduledJob>>,
}

impl ArchiveScheduler {
    pub fn new(repository: Arc<dyn ScheduleRepository>, trigger: Arc<dyn ArchiveTrigger>) -> Self {
        Self {
            repository,
            trigger,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Register a job for every persisted active entry
    pub async fn initialize(&self) -> Result<usize> {
        let active = self.repository.list_active().await?;
        let mut jobs = self.jobs.lock().await;

        for schedule in &active {
            match Cadence::parse(&schedule.cadence) {
                Ok(cadence) => self.register(&mut jobs, schedule, cadence),
                Err(e) => warn!("Not scheduling {}: {}", schedule.url, e),
            }
        }

        info!("Scheduler initialized with {} jobs", jobs.len());
        Ok(jobs.len())
    }

    pub async fn create_scheduled_archive(&self, url: &str, cadence: Option<&str>) -> Result<ScheduledArchive> {
        let parsed = parse_site_url(url)?;
        let cadence = Cadence::parse(cadence.unwrap_or(DEFAULT_CADENCE))?;
        let url = parsed.to_string();

        let mut jobs = self.jobs.lock().await;

        if self.repository.find_active_by_url(&url).await?.is_some() {
            return Err(ValidationError::DuplicateSchedule { url }.into());
        }

        let now = Utc::now();
        let schedule = ScheduledArchive {
            id: ScheduleId::new(),
            url,
            domain: parsed.host_str().unwrap_or_default().to_string(),
            cadence: cadence.expression().to_string(),
            is_active: true,
            last_run: None,
            next_run: cadence.next_occurrence(now),
            created_at: now,
            updated_at: now,
        };

        self.repository.create(&schedule).await?;
        self.register(&mut jobs, &schedule, cadence);

        info!("Scheduled {} with cadence '{}'", schedule.url, schedule.cadence);
        Ok(schedule)
    }

    pub async fn update_scheduled_archive(&self, id: &ScheduleId, update: ScheduleUpdate) -> Result<ScheduledArchive> {
        let mut jobs = self.jobs.lock().await;
        let schedule = self.find(id).await?;
        self.apply_update(&mut jobs, schedule, update).await
    }

    /// Flip the active flag
    pub async fn toggle_scheduled_archive(&self, id: &ScheduleId) -> Result<ScheduledArchive> {
        let mut jobs = self.jobs.lock().await;
        let schedule = self.find(id).await?;
        let update = ScheduleUpdate {
            cadence: None,
            is_active: Some(!schedule.is_active),
        };
        self.apply_update(&mut jobs, schedule, update).await
    }

    /// Persist an update and bring the registry in line. Callers hold the
    /// registry lock from the read of `schedule` onwards.
    async fn apply_update(
        &self,
        jobs: &mut HashMap<ScheduleId, ScheduledJob>,
        mut schedule: ScheduledArchive,
        update: ScheduleUpdate,
    ) -> Result<ScheduledArchive> {
        let id = schedule.id;

        let cadence = Cadence::parse(update.cadence.as_deref().unwrap_or(&schedule.cadence))?;
        let cadence_changed = cadence.expression() != schedule.cadence;
        let was_active = schedule.is_active;
        let is_active = update.is_active.unwrap_or(was_active);

        if is_active && !was_active {
            if let Some(other) = self.repository.find_active_by_url(&schedule.url).await? {
                if other.id != schedule.id {
                    return Err(ValidationError::DuplicateSchedule { url: schedule.url }.into());
                }
            }
        }

        let now = Utc::now();
        if cadence_changed || (is_active && !was_active) {
            schedule.next_run = cadence.next_occurrence(now);
        }
        schedule.cadence = cadence.expression().to_string();
        schedule.is_active = is_active;
        schedule.updated_at = now;

        self.repository.update(&schedule).await?;

        Self::deregister(jobs, &id);
        if schedule.is_active {
            self.register(jobs, &schedule, cadence);
        }

        info!(
            "Updated scheduled archive {} (active: {}, cadence: '{}')",
            schedule.id, schedule.is_active, schedule.cadence
        );
        Ok(schedule)
    }

    pub async fn delete_scheduled_archive(&self, id: &ScheduleId) -> Result<()> {
        let mut jobs = self.jobs.lock().await;
        Self::deregister(&mut jobs, id);

        if !self.repository.delete(id).await? {
            return Err(NotFoundError::Schedule { schedule_id: id.to_string() }.into());
        }

        info!("Deleted scheduled archive {}", id);
        Ok(())
    }

    pub async fn get_scheduled_archive(&self, id: &ScheduleId) -> Result<ScheduledArchive> {
        self.find(id).await
    }

    /// Every entry ordered by next run
    pub async fn list_scheduled_archives(&self) -> Result<Vec<ScheduledArchive>> {
        self.repository.list().await
    }

    pub async fn get_job_status(&self) -> SchedulerStatus {
        let jobs = self.jobs.lock().await;
        let mut statuses: Vec<JobStatus> = jobs
            .iter()
            .map(|(id, job)| JobStatus {
                id: *id,
                url: job.url.clone(),
                cadence: job.cadence.clone(),
                is_running: !job.handle.is_finished(),
            })
            .collect();
        statuses.sort_by(|a, b| a.url.cmp(&b.url));

        SchedulerStatus {
            total_jobs: statuses.len(),
            running_jobs: statuses.iter().filter(|s| s.is_running).count(),
            jobs: statuses,
        }
    }

    /// Number of registered jobs
    pub async fn active_job_count(&self) -> usize {
        self.jobs.lock().await.len()
    }

    /// Stop every job
    pub async fn shutdown(&self) {
        let mut jobs = self.jobs.lock().await;
        for (_, job) in jobs.drain() {
            job.handle.abort();
        }
        info!("Scheduler stopped");
    }

    async fn find(&self, id: &ScheduleId) -> Result<ScheduledArchive> {
        self.repository
            .get_by_id(id)
            .await?
            .ok_or_else(|| NotFoundError::Schedule { schedule_id: id.to_string() }.into())
    }

    fn register(&self, jobs: &mut HashMap<ScheduleId, ScheduledJob>, schedule: &ScheduledArchive, cadence: Cadence) {
        Self::deregister(jobs, &schedule.id);

        let id = schedule.id;
        let url = schedule.url.clone();
        let repository = Arc::clone(&self.repository);
        let trigger = Arc::clone(&self.trigger);
        let job_cadence = cadence.clone();

        let handle = tokio::spawn(async move {
            run_job(id, url, job_cadence, repository, trigger).await;
        });

        debug!("Registered job for {}", schedule.url);
        jobs.insert(
            id,
            ScheduledJob {
                url: schedule.url.clone(),
                cadence: cadence.expression().to_string(),
                handle,
            },
        );
    }

    fn deregister(jobs: &mut HashMap<ScheduleId, ScheduledJob>, id: &ScheduleId) {
        if let Some(job) = jobs.remove(id) {
            job.handle.abort();
            debug!("Deregistered job for {}", job.url);
        }
    }
}

impl Drop for ArchiveScheduler {
    fn drop(&mut self) {
        for (_, job) in self.jobs.get_mut().drain() {
            job.handle.abort();
        }
    }
}

async fn run_job(
    id: ScheduleId,
    url: String,
    cadence: Cadence,
    repository: Arc<dyn ScheduleRepository>,
    trigger: Arc<dyn ArchiveTrigger>,
) {
    let mut after = Utc::now();
    loop {
        let Some(next) = cadence.next_occurrence(after) else {
            warn!("Cadence '{}' for {} has no further occurrences", cadence.expression(), url);
            return;
        };

        let wait = (next - Utc::now()).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;

        // Aborting this loop must not cancel a run already in flight
        let run_url = url.clone();
        let run_cadence = cadence.clone();
        let run_repository = Arc::clone(&repository);
        let run_trigger = Arc::clone(&trigger);
        tokio::spawn(async move {
            fire(&id, &run_url, &run_cadence, run_repository.as_ref(), run_trigger.as_ref()).await;
        });
        after = next.max(Utc::now());
    }
}

/// Run one scheduled archive. Timestamps move only on success.
async fn fire(
    id: &ScheduleId,
    url: &str,
    cadence: &Cadence,
    repository: &dyn ScheduleRepository,
    trigger: &dyn ArchiveTrigger,
) -> bool {
    info!("Running scheduled archive for {}", url);

    match trigger.trigger_archive(url).await {
        Ok(archive) => {
            let now = Utc::now();
            if let Err(e) = repository.record_run(id, now, cadence.next_occurrence(now)).await {
                error!("Failed to record run of scheduled archive {}: {}", id, e);
            }
            debug!("Scheduled archive {} started archive {}", id, archive.id);
            true
        }
        Err(e) => {
            error!("Scheduled archive for {} failed: {}", url, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_access::DatabaseManager;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Never fires during a test run
    const YEARLY: &str = "0 0 1 1 *";

    struct RecordingTrigger {
        calls: AtomicUsize,
        fail: AtomicBool,
    }

    impl RecordingTrigger {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl ArchiveTrigger for RecordingTrigger {
        async fn trigger_archive(&self, url: &str) -> Result<Archive> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(FetchError::BrowserUnavailable { endpoint: "test".into() }.into());
            }
            Ok(Archive::in_progress("example.com", url, Utc::now(), PathBuf::from("archives")))
        }
    }

    /// Takes a while to start each archive
    struct SlowTrigger {
        started: AtomicUsize,
        finished: AtomicUsize,
    }

    #[async_trait]
    impl ArchiveTrigger for SlowTrigger {
        async fn trigger_archive(&self, url: &str) -> Result<Archive> {
            self.started.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(300)).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(Archive::in_progress("example.com", url, Utc::now(), PathBuf::from("archives")))
        }
    }

    async fn scheduler(trigger: Arc<dyn ArchiveTrigger>) -> (ArchiveScheduler, Arc<dyn ScheduleRepository>) {
        let db = DatabaseManager::in_memory().await.unwrap();
        let repository: Arc<dyn ScheduleRepository> = Arc::new(db.schedule_repository());
        (ArchiveScheduler::new(Arc::clone(&repository), trigger), repository)
    }

    #[tokio::test]
    async fn test_create_uses_default_cadence() {
        let (scheduler, _) = scheduler(RecordingTrigger::new()).await;
        let schedule = scheduler
            .create_scheduled_archive("https://example.com", None)
            .await
            .unwrap();

        assert_eq!(schedule.cadence, DEFAULT_CADENCE);
        assert_eq!(schedule.url, "https://example.com/");
        assert_eq!(schedule.domain, "example.com");
        assert!(schedule.next_run.unwrap() > schedule.created_at);
        assert_eq!(scheduler.active_job_count().await, 1);
    }

    #[tokio::test]
    async fn test_invalid_input_touches_nothing() {
        let (scheduler, repository) = scheduler(RecordingTrigger::new()).await;
        assert!(scheduler
            .create_scheduled_archive("https://example.com", Some("whenever"))
            .await
            .unwrap_err()
            .is_validation());
        assert!(scheduler
            .create_scheduled_archive("mailto:someone@example.com", None)
            .await
            .unwrap_err()
            .is_validation());
        assert!(repository.list().await.unwrap().is_empty());
        assert_eq!(scheduler.active_job_count().await, 0);
    }

    #[tokio::test]
    async fn test_duplicate_active_url_rejected() {
        let (scheduler, _) = scheduler(RecordingTrigger::new()).await;
        let original = scheduler
            .create_scheduled_archive("https://example.com", Some(YEARLY))
            .await
            .unwrap();

        let err = scheduler
            .create_scheduled_archive("https://example.com/", Some("0 0 * * *"))
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let stored = scheduler.get_scheduled_archive(&original.id).await.unwrap();
        assert_eq!(stored.cadence, YEARLY);
        assert_eq!(
            stored.next_run.map(|t| t.timestamp_millis()),
            original.next_run.map(|t| t.timestamp_millis())
        );
        assert_eq!(stored.last_run, None);
        assert_eq!(scheduler.active_job_count().await, 1);
    }

    #[tokio::test]
    async fn test_toggle_keeps_single_job() {
        let (scheduler, _) = scheduler(RecordingTrigger::new()).await;
        let schedule = scheduler
            .create_scheduled_archive("https://example.com", Some(YEARLY))
            .await
            .unwrap();
        assert_eq!(scheduler.active_job_count().await, 1);

        let paused = scheduler.toggle_scheduled_archive(&schedule.id).await.unwrap();
        assert!(!paused.is_active);
        assert_eq!(scheduler.active_job_count().await, 0);

        let resumed = scheduler.toggle_scheduled_archive(&schedule.id).await.unwrap();
        assert!(resumed.is_active);
        let status = scheduler.get_job_status().await;
        assert_eq!(status.total_jobs, 1);
        assert_eq!(status.running_jobs, 1);
        assert_eq!(status.jobs[0].id, schedule.id);

        scheduler.toggle_scheduled_archive(&schedule.id).await.unwrap();
        assert_eq!(scheduler.active_job_count().await, 0);
    }

    #[tokio::test]
    async fn test_reactivation_blocked_by_other_active_entry() {
        let (scheduler, _) = scheduler(RecordingTrigger::new()).await;
        let first = scheduler
            .create_scheduled_archive("https://example.com", Some(YEARLY))
            .await
            .unwrap();
        scheduler.toggle_scheduled_archive(&first.id).await.unwrap();
        scheduler
            .create_scheduled_archive("https://example.com", Some(YEARLY))
            .await
            .unwrap();

        let err = scheduler.toggle_scheduled_archive(&first.id).await.unwrap_err();
        assert!(err.is_validation());
        assert_eq!(scheduler.active_job_count().await, 1);
    }

    #[tokio::test]
    async fn test_update_cadence_recomputes_next_run() {
        let (scheduler, _) = scheduler(RecordingTrigger::new()).await;
        let schedule = scheduler
            .create_scheduled_archive("https://example.com", Some(YEARLY))
            .await
            .unwrap();

        let updated = scheduler
            .update_scheduled_archive(
                &schedule.id,
                ScheduleUpdate {
                    cadence: Some("0 0 * * *".to_string()),
                    is_active: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.cadence, "0 0 * * *");
        assert!(updated.next_run.unwrap() <= schedule.next_run.unwrap());
        assert_eq!(scheduler.active_job_count().await, 1);

        let err = scheduler
            .update_scheduled_archive(&schedule.id, ScheduleUpdate { cadence: Some("bad".into()), is_active: None })
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_delete_and_missing_ids() {
        let (scheduler, _) = scheduler(RecordingTrigger::new()).await;
        let schedule = scheduler
            .create_scheduled_archive("https://example.com", Some(YEARLY))
            .await
            .unwrap();

        scheduler.delete_scheduled_archive(&schedule.id).await.unwrap();
        assert_eq!(scheduler.active_job_count().await, 0);
        assert!(scheduler.delete_scheduled_archive(&schedule.id).await.unwrap_err().is_not_found());
        assert!(scheduler
            .update_scheduled_archive(&schedule.id, ScheduleUpdate::default())
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_initialize_registers_active_entries() {
        let trigger = RecordingTrigger::new();
        let (scheduler, repository) = scheduler(trigger.clone()).await;
        let a = scheduler.create_scheduled_archive("https://a.example.com", Some(YEARLY)).await.unwrap();
        scheduler.create_scheduled_archive("https://b.example.com", Some(YEARLY)).await.unwrap();
        scheduler.toggle_scheduled_archive(&a.id).await.unwrap();
        scheduler.shutdown().await;
        assert_eq!(scheduler.active_job_count().await, 0);

        let restarted = ArchiveScheduler::new(repository, trigger);
        assert_eq!(restarted.initialize().await.unwrap(), 1);
        assert_eq!(restarted.get_job_status().await.jobs[0].url, "https://b.example.com/");
    }

    #[tokio::test]
    async fn test_fire_updates_timestamps_only_on_success() {
        let trigger = RecordingTrigger::new();
        let (scheduler, repository) = scheduler(trigger.clone()).await;
        let schedule = scheduler
            .create_scheduled_archive("https://example.com", Some(YEARLY))
            .await
            .unwrap();
        let cadence = Cadence::parse(YEARLY).unwrap();

        trigger.fail.store(true, Ordering::SeqCst);
        assert!(!fire(&schedule.id, &schedule.url, &cadence, repository.as_ref(), trigger.as_ref()).await);
        let after_failure = repository.get_by_id(&schedule.id).await.unwrap().unwrap();
        assert_eq!(after_failure.last_run, None);
        assert_eq!(
            after_failure.next_run.map(|t| t.timestamp_millis()),
            schedule.next_run.map(|t| t.timestamp_millis())
        );

        trigger.fail.store(false, Ordering::SeqCst);
        assert!(fire(&schedule.id, &schedule.url, &cadence, repository.as_ref(), trigger.as_ref()).await);
        let after_success = repository.get_by_id(&schedule.id).await.unwrap().unwrap();
        assert!(after_success.last_run.is_some());
        assert!(after_success.next_run.is_some());
        assert_eq!(trigger.calls.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.active_job_count().await, 1);
    }

    #[tokio::test]
    async fn test_pausing_lets_running_archive_finish() {
        let trigger = Arc::new(SlowTrigger {
            started: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
        });
        let (scheduler, repository) = scheduler(trigger.clone()).await;
        let schedule = scheduler
            .create_scheduled_archive("https://example.com", Some("* * * * * *"))
            .await
            .unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        while trigger.started.load(Ordering::SeqCst) == 0 {
            assert!(tokio::time::Instant::now() < deadline, "job never fired");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let paused = scheduler.toggle_scheduled_archive(&schedule.id).await.unwrap();
        assert!(!paused.is_active);
        assert_eq!(scheduler.active_job_count().await, 0);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(trigger.started.load(Ordering::SeqCst), 1);
        assert_eq!(trigger.finished.load(Ordering::SeqCst), 1);
        let stored = repository.get_by_id(&schedule.id).await.unwrap().unwrap();
        assert!(stored.last_run.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_toggles_each_flip_once() {
        let (scheduler, _) = scheduler(RecordingTrigger::new()).await;
        let schedule = scheduler
            .create_scheduled_archive("https://example.com", Some(YEARLY))
            .await
            .unwrap();

        let (first, second) = tokio::join!(
            scheduler.toggle_scheduled_archive(&schedule.id),
            scheduler.toggle_scheduled_archive(&schedule.id)
        );
        let mut states = vec![first.unwrap().is_active, second.unwrap().is_active];
        states.sort();
        assert_eq!(states, vec![false, true]);

        let stored = scheduler.get_scheduled_archive(&schedule.id).await.unwrap();
        assert!(stored.is_active);
        assert_eq!(scheduler.active_job_count().await, 1);
    }
}
