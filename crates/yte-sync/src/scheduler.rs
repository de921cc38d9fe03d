//! Wall-clock job scheduler polled by the daemon loop.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Days, NaiveDateTime, NaiveTime};
use tracing::{debug, error, info, info_span, Instrument};

#[async_trait]
pub trait ScheduledTask: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn run(&self, now: NaiveDateTime) -> anyhow::Result<()>;
}

/// First occurrence of `at` strictly after `now`.
pub fn next_occurrence(at: NaiveTime, now: NaiveDateTime) -> NaiveDateTime {
    let today = now.date().and_time(at);
    if today > now {
        today
    } else {
        now.date()
            .checked_add_days(Days::new(1))
            .map(|tomorrow| tomorrow.and_time(at))
            .unwrap_or(NaiveDateTime::MAX)
    }
}

struct ScheduledJob {
    at: NaiveTime,
    task: Arc<dyn ScheduledTask>,
    next_run: Option<NaiveDateTime>,
}

/// Daily jobs keyed by local time of day. Nothing runs on its own: the owner
/// calls [`Scheduler::run_pending`] with the current wall-clock time.
#[derive(Default)]
pub struct Scheduler {
    jobs: Vec<ScheduledJob>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn every_day_at(&mut self, at: NaiveTime, task: Arc<dyn ScheduledTask>) -> &mut Self {
        self.jobs.push(ScheduledJob {
            at,
            task,
            next_run: None,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Earliest known next run; `None` until the first `run_pending` call.
    pub fn next_run(&self) -> Option<NaiveDateTime> {
        self.jobs.iter().filter_map(|job| job.next_run).min()
    }

    /// Run every job due at `now`, one at a time, earliest first. Returns how
    /// many jobs were started, failed ones included.
    pub async fn run_pending(&mut self, now: NaiveDateTime) -> usize {
        for job in &mut self.jobs {
            if job.next_run.is_none() {
                let first = next_occurrence(job.at, now);
                debug!(job = job.task.name(), next_run = %first, "job scheduled");
                job.next_run = Some(first);
            }
        }

        let mut due = self
            .jobs
            .iter()
            .enumerate()
            .filter_map(|(idx, job)| job.next_run.filter(|next| now >= *next).map(|next| (next, idx)))
            .collect::<Vec<_>>();
        due.sort();

        for (_, idx) in &due {
            let job = &mut self.jobs[*idx];
            run_isolated(Arc::clone(&job.task), now).await;
            job.next_run = Some(next_occurrence(job.at, now));
        }
        due.len()
    }
}

async fn run_isolated(task: Arc<dyn ScheduledTask>, now: NaiveDateTime) {
    let name = task.name().to_string();
    let span = info_span!("scheduled_job", job = %name);
    let handle = tokio::spawn(async move { task.run(now).await }.instrument(span));

    match handle.await {
        Ok(Ok(())) => info!(job = %name, "scheduled job finished"),
        Ok(Err(err)) => error!(job = %name, error = %format!("{err:#}"), "scheduled job failed"),
        Err(join_err) if join_err.is_panic() => error!(job = %name, "scheduled job panicked"),
        Err(join_err) => error!(job = %name, error = %join_err, "scheduled job was cancelled"),
    }
}
