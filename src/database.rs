use std::fs;
use std::path::{Path, PathBuf};

use anyhow::anyhow;
use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::config::ProblemConfig;
use crate::judge::{TestCase, TestCaseSource};

const DATABASE_NAME: &str = "sandjudge.sqlite3";

pub fn get_db_path() -> anyhow::Result<PathBuf> {
    use directories::ProjectDirs;

    let proj_dirs = ProjectDirs::from("", "", "sandjudge")
        .ok_or_else(|| anyhow!("Unable to find user directory"))?;
    let data_dir = proj_dirs.data_local_dir();

    fs::create_dir_all(data_dir)?;

    Ok(data_dir.join(DATABASE_NAME))
}

pub async fn init_db(db_path: impl AsRef<Path>) -> sqlx::Result<SqlitePool> {
    let db_url = format!("sqlite://{}?mode=rwc", db_path.as_ref().display()); // rwc = read/write/create
    let db_pool = connect(&db_url).await?;

    log::info!("initialized database at {}", db_path.as_ref().display());

    Ok(db_pool)
}

/// Opens a pool on `db_url` and creates the schema if needed
pub async fn connect(db_url: &str) -> sqlx::Result<SqlitePool> {
    let db_pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(0) // Allow pool to shrink when idle
        .connect(db_url)
        .await?;

    // PRAGMA statements cannot run inside a transaction
    for pragma_sql in &[
        "PRAGMA foreign_keys = ON;",
        "PRAGMA busy_timeout = 2000;", // 2 seconds timeout for lock contention
        "PRAGMA journal_mode = WAL;",
        "PRAGMA synchronous = NORMAL;",
    ] {
        sqlx::query(pragma_sql).execute(&db_pool).await?;
    }

    let mut tx = db_pool.begin().await?;
    for sql in &[
        r"
        CREATE TABLE IF NOT EXISTS problems (
            id            INTEGER PRIMARY KEY,
            name          TEXT    NOT NULL
        );",
        r"
        CREATE TABLE IF NOT EXISTS test_cases (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            problem_id       INTEGER NOT NULL,
            order_index      INTEGER NOT NULL,
            input            TEXT    NOT NULL,
            expected_output  TEXT    NOT NULL,
            UNIQUE (problem_id, order_index),
            FOREIGN KEY (problem_id)  REFERENCES problems (id)
        );",
    ] {
        sqlx::query(sql).execute(&mut *tx).await?;
    }
    tx.commit().await?;

    Ok(db_pool)
}

pub fn remove_db(db_path: impl AsRef<Path>) {
    if let Err(e) = std::fs::remove_file(&db_path) {
        log::warn!(
            "unable to remove database at {}: {e}",
            db_path.as_ref().display()
        );
    } else {
        log::info!("removed database at {}", db_path.as_ref().display());
    }
}

/// Stores a problem, replacing all of its previous test cases
pub async fn replace_problem(
    pool: &SqlitePool,
    problem_id: u32,
    name: &str,
    test_cases: &[TestCase],
) -> sqlx::Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO problems (id, name) VALUES (?, ?)
         ON CONFLICT(id) DO UPDATE SET name = excluded.name",
    )
    .bind(problem_id)
    .bind(name)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM test_cases WHERE problem_id = ?")
        .bind(problem_id)
        .execute(&mut *tx)
        .await?;

    for test_case in test_cases {
        sqlx::query(
            "INSERT INTO test_cases (problem_id, order_index, input, expected_output)
             VALUES (?, ?, ?, ?)",
        )
        .bind(problem_id)
        .bind(test_case.order_index)
        .bind(&test_case.input)
        .bind(&test_case.expected_output)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await
}

/// Imports the problems named in the configuration
pub async fn import_problems(pool: &SqlitePool, problems: &[ProblemConfig]) -> anyhow::Result<()> {
    for problem in problems {
        let test_cases = problem.load_test_cases()?;
        replace_problem(pool, problem.id, &problem.name, &test_cases).await?;
        log::info!(
            "Imported problem {} ({}) with {} test cases",
            problem.id,
            problem.name,
            test_cases.len()
        );
    }
    Ok(())
}

pub async fn fetch_test_cases(pool: &SqlitePool, problem_id: u32) -> sqlx::Result<Vec<TestCase>> {
    sqlx::query_as::<_, TestCase>(
        "SELECT input, expected_output, order_index
         FROM test_cases
         WHERE problem_id = ?
         ORDER BY order_index ASC",
    )
    .bind(problem_id)
    .fetch_all(pool)
    .await
}

/// Test cases read from the SQLite store on every submission
#[derive(Clone)]
pub struct SqliteTestCaseSource {
    pool: SqlitePool,
}

impl SqliteTestCaseSource {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TestCaseSource for SqliteTestCaseSource {
    async fn fetch_ordered(&self, problem_id: u32) -> anyhow::Result<Vec<TestCase>> {
        Ok(fetch_test_cases(&self.pool, problem_id).await?)
    }
}
