use std::sync::Arc;

use clap::Parser;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use sandjudge::config::{CliArgs, CliCommand, Config};
use sandjudge::database as db;
use sandjudge::judge::{Evaluator, JudgeSettings, SubmissionRequest};
use sandjudge::language::LanguageRegistry;
use sandjudge::queue::JobQueue;
use sandjudge::sandbox::{SandboxAdapter, WorkspaceManager, create_container_runtime};
use sandjudge::web_server::build_server;
use sandjudge::worker::{cancel_pending, worker};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = CliArgs::parse();
    let n_threads = cli.threads;

    if n_threads == 0 {
        panic!("The number of worker threads must not be 0");
    }

    let Config {
        server: server_config,
        runtime: runtime_config,
        limits: limits_config,
        evaluation: evaluation_config,
        languages: language_config,
        problems: problem_config,
    } = cli.to_config().expect("Failed to load configuration");

    let db_path = db::get_db_path().expect("Failed to locate database");
    if cli.flush_data {
        db::remove_db(&db_path);
    }

    let db_pool = db::init_db(&db_path)
        .await
        .expect("Failed to initialize database");
    db::import_problems(&db_pool, &problem_config)
        .await
        .expect("Failed to import problems");

    let languages =
        Arc::new(LanguageRegistry::new(language_config).expect("Invalid language configuration"));
    let runtime = create_container_runtime(&runtime_config).expect("Failed to create runtime");
    let workspaces = WorkspaceManager::new(runtime_config.workspace_root())
        .expect("Failed to prepare workspace root");
    let evaluator = Arc::new(Evaluator::new(
        Arc::new(db::SqliteTestCaseSource::new(db_pool)),
        languages.clone(),
        workspaces,
        SandboxAdapter::new(runtime, runtime_config.mount_point()),
        JudgeSettings {
            limits: (&limits_config).try_into().expect("Invalid limits"),
            policy: evaluation_config.policy,
        },
    ));
    let shutdown_token = CancellationToken::new();

    if let Some(CliCommand::Judge {
        problem,
        language,
        source,
    }) = cli.command
    {
        let request = SubmissionRequest {
            problem_id: problem,
            source_code: std::fs::read_to_string(&source)?,
            language,
        };

        let ctrl_c_token = shutdown_token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                ctrl_c_token.cancel();
            }
        });

        let verdict = evaluator.evaluate(&request, &shutdown_token).await;
        println!("{}", serde_json::to_string_pretty(&verdict)?);
        return Ok(());
    }

    let job_queue = Arc::new(JobQueue::new());

    // ======= PREPARATION END, EXECUTION START =======

    let mut workers = JoinSet::new();
    for i in 1..=n_threads {
        workers.spawn(worker(
            i,
            evaluator.clone(),
            job_queue.clone(),
            shutdown_token.clone(),
        ));
    }

    let server = build_server(server_config, languages, job_queue.clone())
        .expect("Failed to build server");

    let server_handle = server.handle();
    let server_task = actix_web::rt::spawn(server);

    // ===== EXECUTION END, WAITING FOR SHUTDOWN ======

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Ctrl-c received, shutting down...");
        }
        res_server = server_task => {
            log::error!("Server terminated unexpectedly: {:?}", res_server);
        }
        Some(res_worker) = workers.join_next() => {
            log::error!("A worker terminated unexpectedly: {:?}", res_worker);
        }
    }

    // 1. Broadcast shutdown signal so running submissions stop and answer
    shutdown_token.cancel();
    log::info!("Shutdown signal sent to workers, waiting for them to finish...");

    // 2. Wait until every worker terminates
    while let Some(res) = workers.join_next().await {
        if let Err(e) = res {
            if e.is_panic() {
                log::error!("Worker handle panicked: {:?}", e);
            } else {
                log::error!("Worker handle finished with error: {:?}", e);
            }
        }
    }

    // 3. Answer submissions still waiting in the queue
    let cancelled = cancel_pending(&job_queue).await;
    if cancelled > 0 {
        log::info!("Cancelled {cancelled} queued submissions");
    }

    // 4. Shutdown actix-web server gracefully
    server_handle.stop(true).await;

    log::info!("Shutdown complete");
    Ok(())
}
