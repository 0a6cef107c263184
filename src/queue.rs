use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, Notify, oneshot};

use crate::judge::SubmissionRequest;
use crate::verdict::Verdict;

/// A submission waiting for a worker, with the channel its verdict goes back on
pub struct JobMessage {
    pub id: u64,
    pub request: SubmissionRequest,
    pub responder: oneshot::Sender<Verdict>,
}

#[derive(Default)]
struct Pending {
    jobs: VecDeque<JobMessage>,
    closed: bool,
}

pub struct JobQueue {
    queue: Mutex<Pending>,
    notify: Notify,
    next_id: AtomicU64,
}

impl JobQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(Pending::default()),
            notify: Notify::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Enqueues a submission and returns the receiver of its verdict
    pub async fn submit(&self, request: SubmissionRequest) -> (u64, oneshot::Receiver<Verdict>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.push(JobMessage {
            id,
            request,
            responder: tx,
        })
        .await;
        (id, rx)
    }

    /// Once the queue is closed the job is dropped, which fails its receiver
    pub async fn push(&self, job: JobMessage) {
        let mut pending = self.queue.lock().await;
        if pending.closed {
            log::warn!("Job {} arrived after shutdown, dropping it", job.id);
            return;
        }
        pending.jobs.push_back(job);
        drop(pending);
        self.notify.notify_one();
    }

    pub async fn pop(&self) -> JobMessage {
        loop {
            if let Some(job) = self.queue.lock().await.jobs.pop_front() {
                return job;
            }
            self.notify.notified().await;
        }
    }

    pub async fn len(&self) -> usize {
        self.queue.lock().await.jobs.len()
    }

    /// Refuses further jobs and hands back everything still waiting
    pub async fn close(&self) -> Vec<JobMessage> {
        let mut pending = self.queue.lock().await;
        pending.closed = true;
        pending.jobs.drain(..).collect()
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}
