// src/database.rs
use crate::config::TaskFile;
use crate::errors::{Result, RunnerError};
use crate::models::{ActivityKind, Progress, RunRecord, Task, TestCase};
use crate::session::DraftSink;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool, sqlite::SqlitePoolOptions};
use std::path::PathBuf;

pub async fn init_db(database_url: &str) -> Result<SqlitePool> {
    let in_memory = database_url.contains(":memory:");

    let pool = if in_memory {
        // Every connection to :memory: is its own database, so keep exactly one alive.
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect(database_url)
            .await?
    } else {
        let db_path = db_path(database_url)?;
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
        log::info!("📦 Connecting to: {}", db_url);
        SqlitePoolOptions::new().max_connections(5).connect(&db_url).await?
    };

    sqlx::migrate!("./migrations").run(&pool).await?;
    log::info!("✅ Database ready");

    Ok(pool)
}

fn db_path(database_url: &str) -> Result<PathBuf> {
    let path = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .ok_or_else(|| RunnerError::Config("DATABASE_URL must start with 'sqlite:'".to_string()))?;
    let path = path.split('?').next().unwrap_or(path);
    Ok(PathBuf::from(path))
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Upserts tasks by slug and replaces their test cases. Returns the number of tasks written.
pub async fn seed_tasks(pool: &SqlitePool, tasks: &[TaskFile]) -> Result<usize> {
    let mut tx = pool.begin().await?;
    for task in tasks {
        sqlx::query(
            r#"
            INSERT INTO tasks (slug, title, description, default_code, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(slug) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                default_code = excluded.default_code
            "#,
        )
        .bind(&task.slug)
        .bind(&task.title)
        .bind(&task.description)
        .bind(&task.default_code)
        .bind(now())
        .execute(&mut *tx)
        .await?;

        let task_id: i64 = sqlx::query("SELECT id FROM tasks WHERE slug = ?")
            .bind(&task.slug)
            .fetch_one(&mut *tx)
            .await?
            .get(0);

        sqlx::query("DELETE FROM test_cases WHERE task_id = ?")
            .bind(task_id)
            .execute(&mut *tx)
            .await?;

        for (position, case) in task.tests.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO test_cases (task_id, position, input_data, expected_output, is_hidden)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(task_id)
            .bind(position as i64)
            .bind(&case.input)
            .bind(&case.output)
            .bind(case.hidden)
            .execute(&mut *tx)
            .await?;
        }
        log::info!("Seeded task '{}' with {} test case(s)", task.slug, task.tests.len());
    }
    tx.commit().await?;
    Ok(tasks.len())
}

fn task_from_row(row: &sqlx::sqlite::SqliteRow) -> Task {
    Task {
        id: row.get(0),
        slug: row.get(1),
        title: row.get(2),
        description: row.get(3),
        default_code: row.get(4),
    }
}

pub async fn list_tasks(pool: &SqlitePool) -> Result<Vec<Task>> {
    let rows = sqlx::query("SELECT id, slug, title, description, default_code FROM tasks ORDER BY id")
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(task_from_row).collect())
}

pub async fn get_task(pool: &SqlitePool, task_id: i64) -> Result<Task> {
    let row = sqlx::query("SELECT id, slug, title, description, default_code FROM tasks WHERE id = ?")
        .bind(task_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(task_from_row).ok_or(RunnerError::TaskNotFound(task_id))
}

pub async fn get_test_cases(pool: &SqlitePool, task_id: i64) -> Result<Vec<TestCase>> {
    let rows = sqlx::query(
        r#"
        SELECT input_data, expected_output, is_hidden
        FROM test_cases
        WHERE task_id = ?
        ORDER BY position
        "#,
    )
    .bind(task_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| TestCase {
            input: row.get(0),
            output: row.get(1),
            hidden: row.get(2),
        })
        .collect())
}

pub async fn get_progress(pool: &SqlitePool, student: &str, task_id: i64) -> Result<Option<Progress>> {
    let row = sqlx::query("SELECT code, is_completed, completed_at FROM progress WHERE student = ? AND task_id = ?")
        .bind(student)
        .bind(task_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|row| Progress {
        code: row.get(0),
        is_completed: row.get(1),
        completed_at: row.get(2),
    }))
}

async fn is_completed(pool: &SqlitePool, student: &str, task_id: i64) -> Result<bool> {
    Ok(get_progress(pool, student, task_id)
        .await?
        .is_some_and(|progress| progress.is_completed))
}

/// Stores the student's current code. Completed tasks are read-only.
pub async fn save_draft(pool: &SqlitePool, student: &str, task_id: i64, code: &str) -> Result<()> {
    if is_completed(pool, student, task_id).await? {
        return Err(RunnerError::TaskLocked(task_id));
    }

    sqlx::query(
        r#"
        INSERT INTO progress (student, task_id, code, is_completed, updated_at)
        VALUES (?, ?, ?, 0, ?)
        ON CONFLICT(student, task_id) DO UPDATE SET
            code = excluded.code,
            updated_at = excluded.updated_at
        WHERE progress.is_completed = 0
        "#,
    )
    .bind(student)
    .bind(task_id)
    .bind(code)
    .bind(now())
    .execute(pool)
    .await?;

    Ok(())
}

/// Stores the final code and locks the task.
pub async fn mark_complete(pool: &SqlitePool, student: &str, task_id: i64, code: &str) -> Result<()> {
    let stamp = now();
    sqlx::query(
        r#"
        INSERT INTO progress (student, task_id, code, is_completed, completed_at, updated_at)
        VALUES (?, ?, ?, 1, ?, ?)
        ON CONFLICT(student, task_id) DO UPDATE SET
            code = excluded.code,
            is_completed = 1,
            completed_at = excluded.completed_at,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(student)
    .bind(task_id)
    .bind(code)
    .bind(&stamp)
    .bind(&stamp)
    .execute(pool)
    .await?;

    Ok(())
}

/// Records a student activity event. Returns `false` (and stores nothing)
/// once the task is completed.
pub async fn record_activity(
    pool: &SqlitePool,
    student: &str,
    task_id: i64,
    kind: ActivityKind,
    text_content: Option<&str>,
) -> Result<bool> {
    if is_completed(pool, student, task_id).await? {
        return Ok(false);
    }

    sqlx::query(
        r#"
        INSERT INTO activity (student, task_id, event_type, text_content, created_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(student)
    .bind(task_id)
    .bind(kind.as_str())
    .bind(text_content)
    .bind(now())
    .execute(pool)
    .await?;

    Ok(true)
}

pub async fn count_activity(pool: &SqlitePool, student: &str, task_id: i64) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) FROM activity WHERE student = ? AND task_id = ?")
        .bind(student)
        .bind(task_id)
        .fetch_one(pool)
        .await?;
    Ok(row.get(0))
}

pub async fn save_run(pool: &SqlitePool, record: &RunRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO runs (id, student, task_id, kind, status, output, error_message, passed_count, total_count, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&record.id)
    .bind(&record.student)
    .bind(record.task_id)
    .bind(&record.kind)
    .bind(&record.status)
    .bind(&record.output)
    .bind(&record.error_message)
    .bind(record.passed_count)
    .bind(record.total_count)
    .bind(&record.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_run_history(pool: &SqlitePool, limit: i64) -> Result<Vec<RunRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT id, student, task_id, kind, status, output, error_message, passed_count, total_count, created_at
        FROM runs
        ORDER BY created_at DESC, rowid DESC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| RunRecord {
            id: row.get(0),
            student: row.get(1),
            task_id: row.get(2),
            kind: row.get(3),
            status: row.get(4),
            output: row.get(5),
            error_message: row.get(6),
            passed_count: row.get(7),
            total_count: row.get(8),
            created_at: row.get(9),
        })
        .collect())
}

/// Draft persistence for one (student, task) editor page.
pub struct TaskDraftSink {
    pool: SqlitePool,
    student: String,
    task_id: i64,
}

impl TaskDraftSink {
    pub fn new(pool: SqlitePool, student: impl Into<String>, task_id: i64) -> Self {
        Self { pool, student: student.into(), task_id }
    }
}

#[async_trait]
impl DraftSink for TaskDraftSink {
    async fn save_draft(&self, source: &str) -> Result<()> {
        match save_draft(&self.pool, &self.student, self.task_id, source).await {
            Err(RunnerError::TaskLocked(_)) => {
                log::debug!("task {} is completed; draft not saved", self.task_id);
                Ok(())
            }
            other => other,
        }
    }
}
