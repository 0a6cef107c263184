use actix_web::{HttpResponse, Responder, post, web};

use super::ErrorResponse;
use crate::judge::SubmissionRequest;
use crate::queue::JobQueue;

/// Judges a submission and answers with its verdict once a worker is done
#[post("/submissions")]
pub async fn post_submission_handler(
    job_queue: web::Data<JobQueue>,
    body: web::Json<SubmissionRequest>,
) -> impl Responder {
    let (job_id, rx) = job_queue.submit(body.into_inner()).await;
    log::debug!("Sent job {job_id} to queue");

    match rx.await {
        Ok(verdict) => {
            log::info!("Received final verdict of job {job_id}");
            HttpResponse::Ok().json(verdict)
        }
        Err(e) => {
            log::error!("Failed to receive verdict of job {job_id}: {e}");
            HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_INTERNAL",
                code: 6,
            })
        }
    }
}
