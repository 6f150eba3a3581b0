//! Reviewer allocation operations for the SQLite repository.
//!
//! One row per reviewer per allocation in `reviewer_allocations`. Replacing
//! an allocation's reviewer set runs inside a single transaction.

use revcycle_core::{AllocationKey, AllocationRow, PhaseNr, ReviewObjId, UserId};
use rusqlite::params;
use tracing::debug;

use super::{i64_to_id, id_to_i64, join_error, lock, SqliteRepository};
use crate::error::RepositoryError;

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(i64, i64, i64, i64)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn decode_row(
    (phase_nr, review_obj, author, reviewer): (i64, i64, i64, i64),
) -> Result<AllocationRow, RepositoryError> {
    const WHAT: &str = "allocation row";
    Ok(AllocationRow {
        phase_nr: PhaseNr(i64_to_id(phase_nr, WHAT)?),
        review_obj: ReviewObjId(i64_to_id(review_obj, WHAT)?),
        author: UserId(i64_to_id(author, WHAT)?),
        reviewer: UserId(i64_to_id(reviewer, WHAT)?),
    })
}

/// Integer columns of an allocation key, in `phase_nr, review_obj, author` order.
fn key_params(
    key: &AllocationKey,
    operation: &'static str,
) -> Result<(i64, i64, i64), RepositoryError> {
    Ok((
        id_to_i64(key.phase_nr.0, operation)?,
        id_to_i64(key.review_obj.0, operation)?,
        id_to_i64(key.author.0, operation)?,
    ))
}

impl SqliteRepository {
    pub(super) async fn allocations_impl(
        &self,
        review_obj: ReviewObjId,
    ) -> Result<Vec<AllocationRow>, RepositoryError> {
        let conn = self.conn.clone();
        let obj = id_to_i64(review_obj.0, "allocations")?;

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn, "allocations")?;

            let mut stmt = conn
                .prepare(
                    "SELECT phase_nr, review_obj, author, reviewer FROM reviewer_allocations
                     WHERE review_obj = ?1 ORDER BY id",
                )
                .map_err(|e| RepositoryError::storage("allocations", e.to_string()))?;
            let rows = stmt
                .query_map(params![obj], read_row)
                .map_err(|e| RepositoryError::storage("allocations", e.to_string()))?;

            let mut result = Vec::new();
            for row in rows {
                let row = row.map_err(|e| RepositoryError::storage("allocations", e.to_string()))?;
                result.push(decode_row(row)?);
            }
            Ok(result)
        })
        .await
        .map_err(|e| join_error("allocations", e))?
    }

    pub(super) async fn allocation_rows_impl(
        &self,
        key: &AllocationKey,
    ) -> Result<Vec<AllocationRow>, RepositoryError> {
        let conn = self.conn.clone();
        let (phase_nr, obj, author) = key_params(key, "allocation_rows")?;

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn, "allocation_rows")?;

            let mut stmt = conn
                .prepare(
                    "SELECT phase_nr, review_obj, author, reviewer FROM reviewer_allocations
                     WHERE phase_nr = ?1 AND review_obj = ?2 AND author = ?3 ORDER BY id",
                )
                .map_err(|e| RepositoryError::storage("allocation_rows", e.to_string()))?;
            let rows = stmt
                .query_map(params![phase_nr, obj, author], read_row)
                .map_err(|e| RepositoryError::storage("allocation_rows", e.to_string()))?;

            let mut result = Vec::new();
            for row in rows {
                let row =
                    row.map_err(|e| RepositoryError::storage("allocation_rows", e.to_string()))?;
                result.push(decode_row(row)?);
            }
            Ok(result)
        })
        .await
        .map_err(|e| join_error("allocation_rows", e))?
    }

    pub(super) async fn replace_allocation_impl(
        &self,
        key: &AllocationKey,
        reviewers: &[UserId],
    ) -> Result<(), RepositoryError> {
        let conn = self.conn.clone();
        let (phase_nr, obj, author) = key_params(key, "replace_allocation")?;
        let reviewers = reviewers
            .iter()
            .map(|r| id_to_i64(r.0, "replace_allocation"))
            .collect::<Result<Vec<_>, _>>()?;

        tokio::task::spawn_blocking(move || {
            let mut conn = lock(&conn, "replace_allocation")?;

            let tx = conn
                .transaction()
                .map_err(|e| RepositoryError::storage("replace_allocation", e.to_string()))?;

            let removed = tx
                .execute(
                    "DELETE FROM reviewer_allocations
                     WHERE phase_nr = ?1 AND review_obj = ?2 AND author = ?3",
                    params![phase_nr, obj, author],
                )
                .map_err(|e| RepositoryError::storage("replace_allocation", e.to_string()))?;

            {
                let mut insert = tx
                    .prepare(
                        "INSERT OR IGNORE INTO reviewer_allocations
                             (phase_nr, review_obj, author, reviewer)
                         VALUES (?1, ?2, ?3, ?4)",
                    )
                    .map_err(|e| RepositoryError::storage("replace_allocation", e.to_string()))?;
                for reviewer in &reviewers {
                    insert
                        .execute(params![phase_nr, obj, author, reviewer])
                        .map_err(|e| {
                            RepositoryError::storage("replace_allocation", e.to_string())
                        })?;
                }
            }

            // Dropping the transaction without commit rolls back, so any
            // early return above leaves the old rows in place.
            tx.commit()
                .map_err(|e| RepositoryError::storage("replace_allocation", e.to_string()))?;

            debug!(
                removed,
                inserted = reviewers.len(),
                "Replaced allocation rows"
            );
            Ok(())
        })
        .await
        .map_err(|e| join_error("replace_allocation", e))?
    }

    pub(super) async fn delete_allocations_impl(
        &self,
        review_obj: ReviewObjId,
        phase_nr: PhaseNr,
    ) -> Result<usize, RepositoryError> {
        let conn = self.conn.clone();
        let obj = id_to_i64(review_obj.0, "delete_allocations")?;
        let phase = id_to_i64(phase_nr.0, "delete_allocations")?;

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn, "delete_allocations")?;

            conn.execute(
                "DELETE FROM reviewer_allocations WHERE phase_nr = ?1 AND review_obj = ?2",
                params![phase, obj],
            )
            .map_err(|e| RepositoryError::storage("delete_allocations", e.to_string()))
        })
        .await
        .map_err(|e| join_error("delete_allocations", e))?
    }
}
