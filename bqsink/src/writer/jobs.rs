use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::warn;

use crate::clients::models::{JobReference, TableReference};
use crate::error::{SinkError, SinkResult};
use crate::writer::JobPoll;

/// One in-flight load job awaiting completion.
#[derive(Debug, Clone)]
pub struct PendingLoadJob {
    pub table: TableReference,
    pub job: JobReference,
    /// Number of polls that have observed the job still running.
    pub polls: u32,
}

impl PendingLoadJob {
    pub fn new(table: TableReference, job: JobReference) -> PendingLoadJob {
        PendingLoadJob {
            table,
            job,
            polls: 0,
        }
    }
}

/// Terminal outcome of one pending load job, reported exactly once.
#[derive(Debug)]
pub enum JobOutcome {
    /// The job finished without error; the caller commits the chunk.
    Committed(PendingLoadJob),
    /// The job failed. `error.is_retryable()` decides between requeueing the
    /// same payload and escalating to a secondary destination.
    Failed {
        job: PendingLoadJob,
        error: SinkError,
    },
}

/// FIFO queue of outstanding load jobs.
///
/// Guarded by its own lock because submission and polling can run on
/// different execution contexts. One polling tick takes the whole current
/// batch, polls each job once, and re-enqueues the ones still running; a job
/// observed terminal leaves the queue for good.
#[derive(Debug, Clone, Default)]
pub struct LoadJobQueue {
    inner: Arc<Mutex<VecDeque<PendingLoadJob>>>,
}

impl LoadJobQueue {
    pub fn new() -> LoadJobQueue {
        LoadJobQueue::default()
    }

    /// Appends a freshly submitted job.
    pub async fn push(&self, job: PendingLoadJob) {
        let mut inner = self.inner.lock().await;
        inner.push_back(job);
    }

    /// Removes and returns every job currently queued, oldest first.
    pub async fn take_batch(&self) -> Vec<PendingLoadJob> {
        let mut inner = self.inner.lock().await;
        inner.drain(..).collect()
    }

    /// Puts a still-running job back at the end of the queue.
    pub async fn requeue(&self, job: PendingLoadJob) {
        let mut inner = self.inner.lock().await;
        inner.push_back(job);
    }

    pub async fn len(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Files one poll result: a running job goes back to the caller's requeue
/// list, a terminal job produces exactly one outcome.
///
/// A transient poll failure keeps the job queued; the job itself is not the
/// thing that failed.
pub(crate) fn settle_poll(
    mut job: PendingLoadJob,
    poll: SinkResult<JobPoll>,
    outcomes: &mut Vec<JobOutcome>,
    still_running: &mut Vec<PendingLoadJob>,
) {
    match poll {
        Ok(JobPoll::Running) => {
            job.polls += 1;
            still_running.push(job);
        }
        Ok(JobPoll::Done { error: None }) => {
            outcomes.push(JobOutcome::Committed(job));
        }
        Ok(JobPoll::Done { error: Some(error) }) => {
            outcomes.push(JobOutcome::Failed { job, error });
        }
        Err(error) if error.is_retryable() => {
            warn!(job = %job.job, error = %error, "job poll failed, keeping job queued");
            job.polls += 1;
            still_running.push(job);
        }
        Err(error) => {
            outcomes.push(JobOutcome::Failed { job, error });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, SinkError};

    fn pending(job_id: &str) -> PendingLoadJob {
        PendingLoadJob::new(
            TableReference::new("acme", "events", "events"),
            JobReference {
                project_id: "acme".to_string(),
                job_id: job_id.to_string(),
                location: None,
            },
        )
    }

    async fn tick(queue: &LoadJobQueue, polls: Vec<SinkResult<JobPoll>>) -> Vec<JobOutcome> {
        let batch = queue.take_batch().await;
        assert_eq!(batch.len(), polls.len());

        let mut outcomes = Vec::new();
        let mut still_running = Vec::new();
        for (job, poll) in batch.into_iter().zip(polls) {
            settle_poll(job, poll, &mut outcomes, &mut still_running);
        }
        for job in still_running {
            queue.requeue(job).await;
        }

        outcomes
    }

    #[tokio::test]
    async fn a_running_then_done_job_commits_exactly_once() {
        let queue = LoadJobQueue::new();
        queue.push(pending("job_1")).await;

        // First tick observes the job still running: no outcome, job stays.
        let outcomes = tick(&queue, vec![Ok(JobPoll::Running)]).await;
        assert!(outcomes.is_empty());
        assert_eq!(queue.len().await, 1);

        // Second tick observes DONE without error: one commit, queue drained,
        // zero retries.
        let outcomes = tick(&queue, vec![Ok(JobPoll::Done { error: None })]).await;
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(&outcomes[0], JobOutcome::Committed(job) if job.polls == 1));
        assert!(queue.is_empty().await);

        // A further tick has nothing to poll.
        assert!(queue.take_batch().await.is_empty());
    }

    #[tokio::test]
    async fn failed_jobs_leave_the_queue_with_their_error() {
        let queue = LoadJobQueue::new();
        queue.push(pending("job_1")).await;

        let error = SinkError::from((ErrorKind::JobFailed, "load job failed"))
            .with_reason("invalid");
        let outcomes = tick(&queue, vec![Ok(JobPoll::Done { error: Some(error) })]).await;

        assert_eq!(outcomes.len(), 1);
        match &outcomes[0] {
            JobOutcome::Failed { error, .. } => assert!(!error.is_retryable()),
            other => panic!("expected a failed outcome, got {other:?}"),
        }
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn transient_poll_failures_keep_the_job_queued() {
        let queue = LoadJobQueue::new();
        queue.push(pending("job_1")).await;

        let transient = SinkError::from((ErrorKind::ServerError, "poll hiccup"));
        let outcomes = tick(&queue, vec![Err(transient)]).await;

        assert!(outcomes.is_empty());
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn the_queue_is_fifo_across_ticks() {
        let queue = LoadJobQueue::new();
        queue.push(pending("job_1")).await;
        queue.push(pending("job_2")).await;
        queue.push(pending("job_3")).await;

        // job_2 finishes; the others cycle back in order.
        let outcomes = tick(
            &queue,
            vec![
                Ok(JobPoll::Running),
                Ok(JobPoll::Done { error: None }),
                Ok(JobPoll::Running),
            ],
        )
        .await;
        assert_eq!(outcomes.len(), 1);

        let batch = queue.take_batch().await;
        let ids: Vec<&str> = batch.iter().map(|job| job.job.job_id.as_str()).collect();
        assert_eq!(ids, vec!["job_1", "job_3"]);
    }
}
