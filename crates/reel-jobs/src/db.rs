use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, warn};

use crate::{
    error::Result,
    schedule::Schedule,
    types::{ExecutionStatus, Job, JobId, JobState},
};

/// Initialise the job-definition schema in `conn`. Idempotent.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS jobs (
            id          TEXT    NOT NULL PRIMARY KEY,
            name        TEXT    NOT NULL,
            type        TEXT    NOT NULL,
            schedule    TEXT    NOT NULL,   -- textual Schedule, e.g. 'every 6h'
            config      TEXT    NOT NULL,   -- handler config as JSON
            enabled     INTEGER NOT NULL DEFAULT 1,
            last_run_at TEXT,               -- RFC 3339 or NULL
            last_status TEXT,
            created_at  TEXT    NOT NULL,
            updated_at  TEXT    NOT NULL
        ) STRICT;
        ",
    )?;
    Ok(())
}

fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_status(s: &str) -> Option<ExecutionStatus> {
    match s {
        "succeeded" => Some(ExecutionStatus::Succeeded),
        "failed" => Some(ExecutionStatus::Failed),
        "cancelled" => Some(ExecutionStatus::Cancelled),
        _ => None,
    }
}

/// Durable store for job definitions. Execution history is never written.
pub struct JobRepository {
    conn: Connection,
}

impl JobRepository {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self { conn })
    }

    pub fn open(path: &str) -> Result<Self> {
        let repo = Self::new(Connection::open(path)?)?;
        info!(%path, "job repository opened");
        Ok(repo)
    }

    pub fn in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    /// All stored definitions ordered by id. Rows that no longer parse are
    /// skipped with a warning.
    pub fn load_jobs(&self) -> Result<Vec<Job>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, type, schedule, config, enabled, last_run_at,
                    last_status, created_at, updated_at
             FROM jobs ORDER BY id",
        )?;
        let rows: Vec<_> = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,         // id
                    row.get::<_, String>(1)?,         // name
                    row.get::<_, String>(2)?,         // type
                    row.get::<_, String>(3)?,         // schedule
                    row.get::<_, String>(4)?,         // config JSON
                    row.get::<_, bool>(5)?,           // enabled
                    row.get::<_, Option<String>>(6)?, // last_run_at
                    row.get::<_, Option<String>>(7)?, // last_status
                    row.get::<_, String>(8)?,         // created_at
                    row.get::<_, String>(9)?,         // updated_at
                ))
            })?
            .collect::<std::result::Result<_, _>>()?;

        let jobs = rows
            .into_iter()
            .filter_map(
                |(id, name, job_type, schedule, config, enabled, last_run_at, last_status, created_at, updated_at)| {
                    let schedule: Schedule = match schedule.parse() {
                        Ok(s) => s,
                        Err(e) => {
                            warn!(job_id = %id, "stored schedule no longer parses: {e}");
                            return None;
                        }
                    };
                    let config = match serde_json::from_str(&config) {
                        Ok(c) => c,
                        Err(e) => {
                            warn!(job_id = %id, "stored config is not valid JSON: {e}");
                            return None;
                        }
                    };
                    let now = Utc::now();
                    Some(Job {
                        id: JobId::from(id),
                        name,
                        job_type,
                        schedule,
                        config,
                        enabled,
                        state: JobState::Idle,
                        last_run_at: last_run_at.as_deref().and_then(parse_time),
                        last_status: last_status.as_deref().and_then(parse_status),
                        next_run_at: None,
                        created_at: parse_time(&created_at).unwrap_or(now),
                        updated_at: parse_time(&updated_at).unwrap_or(now),
                    })
                },
            )
            .collect();
        Ok(jobs)
    }

    /// Insert or replace a definition.
    pub fn save_job(&self, job: &Job) -> Result<()> {
        self.conn.execute(
            "INSERT INTO jobs
             (id, name, type, schedule, config, enabled, last_run_at,
              last_status, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)
             ON CONFLICT(id) DO UPDATE SET
               name=excluded.name, type=excluded.type, schedule=excluded.schedule,
               config=excluded.config, enabled=excluded.enabled,
               last_run_at=excluded.last_run_at, last_status=excluded.last_status,
               updated_at=excluded.updated_at",
            params![
                job.id.as_str(),
                job.name,
                job.job_type,
                job.schedule.to_string(),
                serde_json::to_string(&job.config)?,
                job.enabled,
                job.last_run_at.map(|t| t.to_rfc3339()),
                job.last_status.map(|s| s.to_string()),
                job.created_at.to_rfc3339(),
                job.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Returns `false` when no row matched.
    pub fn delete_job(&self, id: &JobId) -> Result<bool> {
        let n = self
            .conn
            .execute("DELETE FROM jobs WHERE id = ?1", [id.as_str()])?;
        Ok(n > 0)
    }

    pub fn contains(&self, id: &JobId) -> Result<bool> {
        let found = self
            .conn
            .query_row("SELECT 1 FROM jobs WHERE id = ?1", [id.as_str()], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }
}
