//! SQLite implementation of `ReviewRepository`.
//!
//! # Schema Versioning
//!
//! The database has a `schema_version` table that tracks the schema version.
//! When the schema needs to change, increment `CURRENT_SCHEMA_VERSION` and add
//! a migration in `run_migrations()`. Migrations run sequentially from the
//! current version to the target version.

mod allocations;
mod forms;


use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use revcycle_core::{
    AllocationKey, AllocationRow, CyclePhase, CycleQuestion, FormId, PhaseNr, QuestionId,
    ReviewForm, ReviewObjId, UserId,
};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

use super::ReviewRepository;
use crate::error::RepositoryError;

/// Current schema version. Increment this when making schema changes and add
/// corresponding migration logic in `run_migrations()`.
const CURRENT_SCHEMA_VERSION: i64 = 1;

/// SQLite-backed review repository.
///
/// Uses `tokio::task::spawn_blocking` to run synchronous rusqlite operations
/// without blocking the async runtime.
pub struct SqliteRepository {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl SqliteRepository {
    /// Open (or create) the database at `path` and bring its schema up to date.
    ///
    /// # Durability
    ///
    /// The database is configured with:
    /// - `journal_mode = WAL` so readers never see a half-applied write
    /// - `synchronous = FULL` for maximum durability
    /// - `busy_timeout = 5000ms` to wait out other writers
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, RepositoryError> {
        let path_ref = path.as_ref();
        let path_str = path_ref.to_string_lossy();
        let is_in_memory = path_str == ":memory:";

        if !is_in_memory && !path_str.is_empty() {
            if let Some(parent) = path_ref.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        RepositoryError::storage(
                            "create database directory",
                            format!("{}: {}", parent.display(), e),
                        )
                    })?;
                }
            }
        }

        let conn = Connection::open(path_ref)
            .map_err(|e| RepositoryError::storage("open database", e.to_string()))?;

        // The database holds reviewer identities; keep it private to the owner.
        #[cfg(unix)]
        if !is_in_memory && !path_str.is_empty() {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            if let Err(e) = std::fs::set_permissions(path_ref, permissions) {
                warn!(
                    "Failed to set restrictive permissions on database file: {}",
                    e
                );
            }
        }

        // SQLite silently keeps DELETE mode on filesystems without shared
        // memory support, so the resulting mode has to be checked. In-memory
        // databases report "memory".
        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(|e| RepositoryError::storage("set journal_mode", e.to_string()))?;

        let journal_mode_ok = journal_mode.eq_ignore_ascii_case("wal")
            || (is_in_memory && journal_mode.eq_ignore_ascii_case("memory"));

        if !journal_mode_ok {
            return Err(RepositoryError::storage(
                "configure journal_mode",
                format!(
                    "Failed to enable WAL mode: SQLite returned '{}' instead of 'wal'",
                    journal_mode
                ),
            ));
        }

        conn.execute_batch(
            r#"
            PRAGMA synchronous = FULL;
            PRAGMA busy_timeout = 5000;
            PRAGMA foreign_keys = ON;
            "#,
        )
        .map_err(|e| RepositoryError::storage("configure pragmas", e.to_string()))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );
            "#,
        )
        .map_err(|e| RepositoryError::storage("create schema_version table", e.to_string()))?;

        // 0 if the table is empty, i.e. a fresh database
        let current_version: i64 = conn
            .query_row(
                "SELECT version FROM schema_version WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| RepositoryError::storage("get schema version", e.to_string()))?
            .unwrap_or(0);

        Self::run_migrations(&conn, current_version)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create a new in-memory SQLite repository (for testing).
    pub fn new_in_memory() -> Result<Self, RepositoryError> {
        Self::new(":memory:")
    }

    /// Run migrations from `from_version` to `CURRENT_SCHEMA_VERSION`.
    fn run_migrations(conn: &Connection, from_version: i64) -> Result<(), RepositoryError> {
        if from_version > CURRENT_SCHEMA_VERSION {
            return Err(RepositoryError::storage(
                "schema version",
                format!(
                    "Database schema version {} is newer than supported version {}. \
                     Please upgrade the application.",
                    from_version, CURRENT_SCHEMA_VERSION
                ),
            ));
        }

        if from_version == CURRENT_SCHEMA_VERSION {
            return Ok(());
        }

        if from_version < 1 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS cycle_questions (
                    id INTEGER PRIMARY KEY,
                    review_obj INTEGER NOT NULL,
                    author INTEGER NOT NULL,
                    phase_nr INTEGER NOT NULL,
                    finished INTEGER NOT NULL DEFAULT 0,
                    title TEXT NOT NULL DEFAULT ''
                );
                CREATE INDEX IF NOT EXISTS idx_cycle_questions_obj
                    ON cycle_questions(review_obj);

                CREATE TABLE IF NOT EXISTS review_forms (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    review_obj INTEGER NOT NULL,
                    question_id INTEGER NOT NULL,
                    reviewer INTEGER NOT NULL,
                    submitted INTEGER NOT NULL DEFAULT 0,
                    desc_corr INTEGER,
                    desc_relv INTEGER,
                    desc_expr INTEGER,
                    quest_corr INTEGER,
                    quest_relv INTEGER,
                    quest_expr INTEGER,
                    answ_corr INTEGER,
                    answ_relv INTEGER,
                    answ_expr INTEGER,
                    taxonomy INTEGER,
                    knowledge_dimension INTEGER,
                    evaluation INTEGER,
                    expertise INTEGER,
                    comment TEXT NOT NULL DEFAULT ''
                );
                CREATE INDEX IF NOT EXISTS idx_review_forms_obj
                    ON review_forms(review_obj);

                CREATE TABLE IF NOT EXISTS cycle_phases (
                    review_obj INTEGER NOT NULL,
                    phase_nr INTEGER NOT NULL,
                    nr_reviewers INTEGER NOT NULL,
                    PRIMARY KEY (review_obj, phase_nr)
                );

                CREATE TABLE IF NOT EXISTS reviewer_allocations (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    phase_nr INTEGER NOT NULL,
                    review_obj INTEGER NOT NULL,
                    author INTEGER NOT NULL,
                    reviewer INTEGER NOT NULL,
                    UNIQUE (phase_nr, review_obj, author, reviewer)
                );
                CREATE INDEX IF NOT EXISTS idx_reviewer_allocations_obj
                    ON reviewer_allocations(review_obj, phase_nr);
                "#,
            )
            .map_err(|e| RepositoryError::storage("migration v1", e.to_string()))?;
        }

        conn.execute(
            "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?1)",
            params![CURRENT_SCHEMA_VERSION],
        )
        .map_err(|e| RepositoryError::storage("update schema version", e.to_string()))?;

        Ok(())
    }
}

// =============================================================================
// Connection and integer conversion helpers
// =============================================================================

/// Lock the shared connection, reporting a poisoned mutex as a storage error.
pub(super) fn lock<'a>(
    conn: &'a Mutex<Connection>,
    operation: &'static str,
) -> Result<MutexGuard<'a, Connection>, RepositoryError> {
    conn.lock()
        .map_err(|_| RepositoryError::storage(operation, "connection mutex poisoned"))
}

/// Convert an id (u64) to i64 for SQLite storage.
///
/// Returns an error if the id exceeds i64::MAX, which would silently wrap
/// with `as i64`.
pub(super) fn id_to_i64(id: u64, operation: &'static str) -> Result<i64, RepositoryError> {
    i64::try_from(id).map_err(|_| {
        RepositoryError::storage(
            operation,
            format!("id {} exceeds maximum storable value ({})", id, i64::MAX),
        )
    })
}

/// Convert an i64 read from SQLite back to an id.
///
/// A negative value means the row was not written by this crate.
pub(super) fn i64_to_id(value: i64, what: &'static str) -> Result<u64, RepositoryError> {
    u64::try_from(value).map_err(|_| RepositoryError::corruption(what))
}

fn join_error(operation: &'static str, e: tokio::task::JoinError) -> RepositoryError {
    RepositoryError::storage(operation, e.to_string())
}

struct QuestionRow {
    id: i64,
    review_obj: i64,
    author: i64,
    phase_nr: i64,
    finished: bool,
    title: String,
}

impl QuestionRow {
    const COLUMNS: &'static str = "id, review_obj, author, phase_nr, finished, title";

    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            review_obj: row.get(1)?,
            author: row.get(2)?,
            phase_nr: row.get(3)?,
            finished: row.get(4)?,
            title: row.get(5)?,
        })
    }

    fn decode(self) -> Result<CycleQuestion, RepositoryError> {
        const WHAT: &str = "cycle question id";
        Ok(CycleQuestion {
            id: QuestionId(i64_to_id(self.id, WHAT)?),
            review_obj: ReviewObjId(i64_to_id(self.review_obj, WHAT)?),
            author: UserId(i64_to_id(self.author, WHAT)?),
            phase_nr: PhaseNr(i64_to_id(self.phase_nr, WHAT)?),
            finished: self.finished,
            title: self.title,
        })
    }
}

// =============================================================================
// ReviewRepository trait implementation
// =============================================================================

#[async_trait]
impl ReviewRepository for SqliteRepository {
    async fn review_forms(
        &self,
        review_obj: ReviewObjId,
    ) -> Result<Vec<ReviewForm>, RepositoryError> {
        self.review_forms_impl(review_obj).await
    }

    async fn review_form(&self, id: FormId) -> Result<Option<ReviewForm>, RepositoryError> {
        self.review_form_impl(id).await
    }

    async fn create_review_form(
        &self,
        review_obj: ReviewObjId,
        question_id: QuestionId,
        reviewer: UserId,
    ) -> Result<ReviewForm, RepositoryError> {
        self.create_review_form_impl(review_obj, question_id, reviewer)
            .await
    }

    async fn update_review_form(&self, form: &ReviewForm) -> Result<(), RepositoryError> {
        self.update_review_form_impl(form).await
    }

    async fn cycle_questions(
        &self,
        review_obj: ReviewObjId,
    ) -> Result<Vec<CycleQuestion>, RepositoryError> {
        let conn = self.conn.clone();
        let obj = id_to_i64(review_obj.0, "cycle_questions")?;

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn, "cycle_questions")?;

            let sql = format!(
                "SELECT {} FROM cycle_questions WHERE review_obj = ?1 ORDER BY id",
                QuestionRow::COLUMNS
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| RepositoryError::storage("cycle_questions", e.to_string()))?;
            let rows = stmt
                .query_map(params![obj], QuestionRow::read)
                .map_err(|e| RepositoryError::storage("cycle_questions", e.to_string()))?;

            let mut questions = Vec::new();
            for row in rows {
                let row =
                    row.map_err(|e| RepositoryError::storage("cycle_questions", e.to_string()))?;
                questions.push(row.decode()?);
            }
            Ok(questions)
        })
        .await
        .map_err(|e| join_error("cycle_questions", e))?
    }

    async fn cycle_question(
        &self,
        id: QuestionId,
    ) -> Result<Option<CycleQuestion>, RepositoryError> {
        let conn = self.conn.clone();
        let id = id_to_i64(id.0, "cycle_question")?;

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn, "cycle_question")?;

            let sql = format!(
                "SELECT {} FROM cycle_questions WHERE id = ?1",
                QuestionRow::COLUMNS
            );
            let row = conn
                .query_row(&sql, params![id], QuestionRow::read)
                .optional()
                .map_err(|e| RepositoryError::storage("cycle_question", e.to_string()))?;

            row.map(QuestionRow::decode).transpose()
        })
        .await
        .map_err(|e| join_error("cycle_question", e))?
    }

    async fn put_cycle_question(&self, question: &CycleQuestion) -> Result<(), RepositoryError> {
        let conn = self.conn.clone();
        let id = id_to_i64(question.id.0, "put_cycle_question")?;
        let obj = id_to_i64(question.review_obj.0, "put_cycle_question")?;
        let author = id_to_i64(question.author.0, "put_cycle_question")?;
        let phase_nr = id_to_i64(question.phase_nr.0, "put_cycle_question")?;
        let finished = question.finished;
        let title = question.title.clone();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn, "put_cycle_question")?;

            conn.execute(
                "INSERT INTO cycle_questions (id, review_obj, author, phase_nr, finished, title)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                     review_obj = excluded.review_obj,
                     author = excluded.author,
                     phase_nr = excluded.phase_nr,
                     finished = excluded.finished,
                     title = excluded.title",
                params![id, obj, author, phase_nr, finished, title],
            )
            .map_err(|e| RepositoryError::storage("put_cycle_question", e.to_string()))?;

            Ok(())
        })
        .await
        .map_err(|e| join_error("put_cycle_question", e))?
    }

    async fn cycle_phases(
        &self,
        review_obj: ReviewObjId,
    ) -> Result<Vec<CyclePhase>, RepositoryError> {
        let conn = self.conn.clone();
        let obj = id_to_i64(review_obj.0, "cycle_phases")?;

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn, "cycle_phases")?;

            let mut stmt = conn
                .prepare(
                    "SELECT phase_nr, nr_reviewers FROM cycle_phases
                     WHERE review_obj = ?1 ORDER BY phase_nr",
                )
                .map_err(|e| RepositoryError::storage("cycle_phases", e.to_string()))?;
            let rows = stmt
                .query_map(params![obj], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
                })
                .map_err(|e| RepositoryError::storage("cycle_phases", e.to_string()))?;

            let mut phases = Vec::new();
            for row in rows {
                let (phase_nr, nr_reviewers) =
                    row.map_err(|e| RepositoryError::storage("cycle_phases", e.to_string()))?;
                phases.push(CyclePhase {
                    review_obj,
                    phase_nr: PhaseNr(i64_to_id(phase_nr, "phase number")?),
                    nr_reviewers: u32::try_from(nr_reviewers)
                        .map_err(|_| RepositoryError::corruption("reviewer count"))?,
                });
            }
            Ok(phases)
        })
        .await
        .map_err(|e| join_error("cycle_phases", e))?
    }

    async fn put_cycle_phase(&self, phase: &CyclePhase) -> Result<(), RepositoryError> {
        let conn = self.conn.clone();
        let obj = id_to_i64(phase.review_obj.0, "put_cycle_phase")?;
        let phase_nr = id_to_i64(phase.phase_nr.0, "put_cycle_phase")?;
        let nr_reviewers = i64::from(phase.nr_reviewers);

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn, "put_cycle_phase")?;

            conn.execute(
                "INSERT INTO cycle_phases (review_obj, phase_nr, nr_reviewers)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(review_obj, phase_nr) DO UPDATE SET
                     nr_reviewers = excluded.nr_reviewers",
                params![obj, phase_nr, nr_reviewers],
            )
            .map_err(|e| RepositoryError::storage("put_cycle_phase", e.to_string()))?;

            Ok(())
        })
        .await
        .map_err(|e| join_error("put_cycle_phase", e))?
    }

    async fn delete_cycle_phase(
        &self,
        review_obj: ReviewObjId,
        phase_nr: PhaseNr,
    ) -> Result<bool, RepositoryError> {
        let conn = self.conn.clone();
        let obj = id_to_i64(review_obj.0, "delete_cycle_phase")?;
        let phase = id_to_i64(phase_nr.0, "delete_cycle_phase")?;

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn, "delete_cycle_phase")?;

            let removed = conn
                .execute(
                    "DELETE FROM cycle_phases WHERE review_obj = ?1 AND phase_nr = ?2",
                    params![obj, phase],
                )
                .map_err(|e| RepositoryError::storage("delete_cycle_phase", e.to_string()))?;
            Ok(removed > 0)
        })
        .await
        .map_err(|e| join_error("delete_cycle_phase", e))?
    }

    async fn allocations(
        &self,
        review_obj: ReviewObjId,
    ) -> Result<Vec<AllocationRow>, RepositoryError> {
        self.allocations_impl(review_obj).await
    }

    async fn allocation_rows(
        &self,
        key: &AllocationKey,
    ) -> Result<Vec<AllocationRow>, RepositoryError> {
        self.allocation_rows_impl(key).await
    }

    async fn replace_allocation(
        &self,
        key: &AllocationKey,
        reviewers: &[UserId],
    ) -> Result<(), RepositoryError> {
        self.replace_allocation_impl(key, reviewers).await
    }

    async fn delete_allocations(
        &self,
        review_obj: ReviewObjId,
        phase_nr: PhaseNr,
    ) -> Result<usize, RepositoryError> {
        self.delete_allocations_impl(review_obj, phase_nr).await
    }
}
