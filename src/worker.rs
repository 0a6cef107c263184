use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::judge::Evaluator;
use crate::queue::JobQueue;
use crate::verdict::Verdict;

pub async fn worker(
    id: u8,
    evaluator: Arc<Evaluator>,
    queue: Arc<JobQueue>,
    token: CancellationToken,
) -> anyhow::Result<()> {
    log::info!("Worker {id} initialized");

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                log::info!("Worker {id} received shutdown signal, stopping");
                break;
            }

            job = queue.pop() => {
                let job_id = job.id;
                log::info!("Worker {id} got job {job_id} from queue");

                // Shutdown also cancels a submission halfway through
                let verdict = evaluator.evaluate(&job.request, &token).await;
                log::info!("Job {job_id} finished on worker {id}: {:?}", verdict.status);

                if job.responder.send(verdict).is_err() {
                    log::warn!("Failed to send job {job_id} verdict back, requester is gone");
                } else {
                    log::debug!("Job {job_id} verdict sent back from worker {id}");
                }
            }
        };
    }

    log::info!("Worker {id} has shut down gracefully");
    Ok(())
}

/// Closes the queue and answers every job no worker picked up
pub async fn cancel_pending(queue: &JobQueue) -> usize {
    let pending = queue.close().await;
    let count = pending.len();
    for job in pending {
        log::info!("Job {} cancelled before a worker picked it up", job.id);
        if job.responder.send(Verdict::error("Evaluation cancelled")).is_err() {
            log::warn!("Failed to send job {} verdict back, requester is gone", job.id);
        }
    }
    count
}
