mod common;

use std::sync::Arc;

use actix_web::{App, test, web};
use assert_json_diff::assert_json_include;
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use sandjudge::database as db;
use sandjudge::judge::{EvaluationPolicy, Evaluator, JudgeSettings};
use sandjudge::language::{LanguageRegistry, default_languages};
use sandjudge::queue::JobQueue;
use sandjudge::routes::{get_languages_handler, json_error_handler, post_submission_handler};
use sandjudge::worker::{cancel_pending, worker};

use common::{Behavior, FakeRuntime, StaticCases, TestDir, build_evaluator, case, fake_evaluator};

// Worker that takes jobs and never answers them
async fn dropping_worker(job_queue: Arc<JobQueue>) {
    loop {
        let job = job_queue.pop().await;
        println!("Dropping job {}", job.id);
        drop(job);
    }
}

fn spawn_worker(evaluator: Evaluator, job_queue: &Arc<JobQueue>) -> CancellationToken {
    let token = CancellationToken::new();
    tokio::spawn(worker(1, Arc::new(evaluator), job_queue.clone(), token.clone()));
    token
}

macro_rules! init_app {
    ($job_queue:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::from(Arc::new(
                    LanguageRegistry::new(default_languages()).unwrap(),
                )))
                .app_data(web::Data::from($job_queue.clone()))
                .app_data(web::JsonConfig::default().error_handler(json_error_handler))
                .service(post_submission_handler)
                .service(get_languages_handler),
        )
        .await
    };
}

#[actix_web::test]
async fn test_post_submission_accepted() {
    let root = TestDir::new();
    let cases = Arc::new(StaticCases::default().with_problem(1, vec![case(0, "21", "42")]));
    let runtime = Arc::new(FakeRuntime::always(Behavior::prints("42\n")));
    let job_queue = Arc::new(JobQueue::new());
    let token = spawn_worker(
        fake_evaluator(&cases, &runtime, &root, EvaluationPolicy::default()),
        &job_queue,
    );
    let app = init_app!(job_queue);

    let req = test::TestRequest::post()
        .uri("/submissions")
        .set_json(json!({
            "problem_id": 1,
            "source_code": "print(int(input()) * 2)",
            "language": "PYTHON"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 200);
    let response_body: serde_json::Value = test::read_body_json(resp).await;
    assert_json_include!(
        actual: response_body,
        expected: json!({
            "status": "ACCEPTED",
            "captured_output": null,
            "message": "All test cases passed",
            "passed_count": 1,
            "total_count": 1
        })
    );
    token.cancel();
}

#[actix_web::test]
async fn test_post_submission_wrong_answer() {
    let root = TestDir::new();
    let cases = Arc::new(
        StaticCases::default().with_problem(2, vec![case(0, "1", "1"), case(1, "2", "4")]),
    );
    let runtime = Arc::new(FakeRuntime::always(Behavior::prints("1")));
    let job_queue = Arc::new(JobQueue::new());
    let token = spawn_worker(
        fake_evaluator(&cases, &runtime, &root, EvaluationPolicy::default()),
        &job_queue,
    );
    let app = init_app!(job_queue);

    let req = test::TestRequest::post()
        .uri("/submissions")
        .set_json(json!({
            "problem_id": 2,
            "source_code": "print(1)",
            "language": "python"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 200);
    let response_body: serde_json::Value = test::read_body_json(resp).await;
    assert_json_include!(
        actual: response_body,
        expected: json!({
            "status": "WRONG_ANSWER",
            "captured_output": "1",
            "message": "Expected: 4",
            "passed_count": 1,
            "total_count": 2
        })
    );
    token.cancel();
}

#[actix_web::test]
async fn test_post_submission_unsupported_language() {
    let root = TestDir::new();
    let cases = Arc::new(StaticCases::default().with_problem(1, vec![case(0, "1", "1")]));
    let runtime = Arc::new(FakeRuntime::always(Behavior::prints("1")));
    let job_queue = Arc::new(JobQueue::new());
    let token = spawn_worker(
        fake_evaluator(&cases, &runtime, &root, EvaluationPolicy::default()),
        &job_queue,
    );
    let app = init_app!(job_queue);

    let req = test::TestRequest::post()
        .uri("/submissions")
        .set_json(json!({
            "problem_id": 1,
            "source_code": "DISPLAY 'HI'.",
            "language": "COBOL"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 200);
    let response_body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(
        response_body,
        json!({
            "status": "ERROR",
            "captured_output": null,
            "message": "Unsupported language: COBOL",
            "execution_time_ms": 0,
            "passed_count": 0,
            "total_count": 0
        })
    );
    assert_eq!(runtime.creates(), 0);
    token.cancel();
}

#[actix_web::test]
async fn test_post_submission_against_stored_problem() {
    let pool = db::connect("sqlite::memory:").await.unwrap();
    db::replace_problem(
        &pool,
        3,
        "double",
        &[case(1, "5", "10"), case(0, "wrong", "0")],
    )
    .await
    .unwrap();

    let root = TestDir::new();
    let runtime = Arc::new(FakeRuntime::new(|input| match input.trim() {
        "wrong" => Behavior::prints("0"),
        n => Behavior::prints(&(n.parse::<i64>().unwrap() * 2).to_string()),
    }));
    let job_queue = Arc::new(JobQueue::new());
    let token = spawn_worker(
        build_evaluator(
            Arc::new(db::SqliteTestCaseSource::new(pool)),
            runtime.clone(),
            default_languages(),
            &root,
            JudgeSettings::default(),
        ),
        &job_queue,
    );
    let app = init_app!(job_queue);

    let req = test::TestRequest::post()
        .uri("/submissions")
        .set_json(json!({
            "problem_id": 3,
            "source_code": "print(int(input()) * 2)",
            "language": "PYTHON"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 200);
    let response_body: serde_json::Value = test::read_body_json(resp).await;
    assert_json_include!(
        actual: response_body,
        expected: json!({
            "status": "ACCEPTED",
            "passed_count": 2,
            "total_count": 2
        })
    );
    assert_eq!(runtime.inputs(), vec!["wrong", "5"]);
    token.cancel();
}

#[actix_web::test]
async fn test_post_submission_invalid_body() {
    let job_queue = Arc::new(JobQueue::new());
    let app = init_app!(job_queue);

    let req = test::TestRequest::post()
        .uri("/submissions")
        .set_json(json!({
            "problem_id": "one",
            "language": "PYTHON"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 400);
    let response_body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(
        response_body,
        json!({ "reason": "ERR_INVALID_ARGUMENT", "code": 1 })
    );
    assert_eq!(job_queue.len().await, 0);
}

#[actix_web::test]
async fn test_post_submission_lost_job() {
    let job_queue = Arc::new(JobQueue::new());
    tokio::spawn(dropping_worker(job_queue.clone()));
    let app = init_app!(job_queue);

    let req = test::TestRequest::post()
        .uri("/submissions")
        .set_json(json!({
            "problem_id": 1,
            "source_code": "print(42)",
            "language": "PYTHON"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 500);
    let response_body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(response_body, json!({ "reason": "ERR_INTERNAL", "code": 6 }));
}

#[actix_web::test]
async fn test_queued_submission_answered_on_shutdown() {
    // No worker, the job stays queued until shutdown drains it
    let job_queue = Arc::new(JobQueue::new());
    let app = init_app!(job_queue);

    let req = test::TestRequest::post()
        .uri("/submissions")
        .set_json(json!({
            "problem_id": 1,
            "source_code": "print(42)",
            "language": "PYTHON"
        }))
        .to_request();
    let (resp, cancelled) = tokio::join!(test::call_service(&app, req), async {
        while job_queue.len().await == 0 {
            tokio::task::yield_now().await;
        }
        cancel_pending(&job_queue).await
    });

    assert_eq!(cancelled, 1);
    assert_eq!(resp.status(), 200);
    let response_body: serde_json::Value = test::read_body_json(resp).await;
    assert_json_include!(
        actual: response_body,
        expected: json!({
            "status": "ERROR",
            "message": "Evaluation cancelled",
            "passed_count": 0,
            "total_count": 0
        })
    );
}

#[actix_web::test]
async fn test_submission_after_shutdown_fails() {
    let job_queue = Arc::new(JobQueue::new());
    assert_eq!(cancel_pending(&job_queue).await, 0);
    let app = init_app!(job_queue);

    let req = test::TestRequest::post()
        .uri("/submissions")
        .set_json(json!({
            "problem_id": 1,
            "source_code": "print(42)",
            "language": "PYTHON"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 500);
    let response_body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(response_body, json!({ "reason": "ERR_INTERNAL", "code": 6 }));
}

#[actix_web::test]
async fn test_get_languages() {
    let job_queue = Arc::new(JobQueue::new());
    let app = init_app!(job_queue);

    let req = test::TestRequest::get().uri("/languages").to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 200);
    let response_body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(response_body, json!(["JAVA", "PYTHON"]));
}
