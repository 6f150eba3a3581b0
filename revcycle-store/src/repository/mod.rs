//! Storage gateway for review cycle data.
//!
//! This module defines the `ReviewRepository` trait that abstracts every
//! read and write the mapper and the allocation entity perform. Backends
//! exist for memory (tests, throwaway tooling) and SQLite.

mod memory;
mod sqlite;

pub use memory::InMemoryRepository;
pub use sqlite::SqliteRepository;

use async_trait::async_trait;
use revcycle_core::{
    AllocationKey, AllocationRow, CyclePhase, CycleQuestion, FormId, PhaseNr, QuestionId,
    ReviewForm, ReviewObjId, UserId,
};

use crate::error::RepositoryError;

/// Repository trait for review cycle persistence.
///
/// Every read that returns a collection returns it in storage order
/// (ascending primary key), which is the order the mapper caches in.
#[async_trait]
pub trait ReviewRepository: Send + Sync {
    /// All review forms of a container.
    async fn review_forms(&self, review_obj: ReviewObjId)
        -> Result<Vec<ReviewForm>, RepositoryError>;

    async fn review_form(&self, id: FormId) -> Result<Option<ReviewForm>, RepositoryError>;

    /// Create an empty, unsubmitted form and return it with its new id.
    async fn create_review_form(
        &self,
        review_obj: ReviewObjId,
        question_id: QuestionId,
        reviewer: UserId,
    ) -> Result<ReviewForm, RepositoryError>;

    /// Overwrite an existing form. Updating a form that does not exist is an error.
    async fn update_review_form(&self, form: &ReviewForm) -> Result<(), RepositoryError>;

    /// All cycle questions of a container.
    async fn cycle_questions(
        &self,
        review_obj: ReviewObjId,
    ) -> Result<Vec<CycleQuestion>, RepositoryError>;

    async fn cycle_question(&self, id: QuestionId)
        -> Result<Option<CycleQuestion>, RepositoryError>;

    /// Store a question (upsert by id).
    async fn put_cycle_question(&self, question: &CycleQuestion) -> Result<(), RepositoryError>;

    /// Phase configuration of a container, ordered by phase number.
    async fn cycle_phases(&self, review_obj: ReviewObjId)
        -> Result<Vec<CyclePhase>, RepositoryError>;

    /// Store a phase configuration (upsert by `(review_obj, phase_nr)`).
    async fn put_cycle_phase(&self, phase: &CyclePhase) -> Result<(), RepositoryError>;

    /// Remove a phase configuration. Returns whether one existed.
    async fn delete_cycle_phase(
        &self,
        review_obj: ReviewObjId,
        phase_nr: PhaseNr,
    ) -> Result<bool, RepositoryError>;

    /// Every allocation row of a container.
    async fn allocations(&self, review_obj: ReviewObjId)
        -> Result<Vec<AllocationRow>, RepositoryError>;

    /// Rows stored under one exact allocation key.
    async fn allocation_rows(
        &self,
        key: &AllocationKey,
    ) -> Result<Vec<AllocationRow>, RepositoryError>;

    /// Replace the reviewer set stored under `key`.
    ///
    /// Deleting the old rows and inserting the new ones happens in a single
    /// transaction, so no reader observes the key half-written.
    async fn replace_allocation(
        &self,
        key: &AllocationKey,
        reviewers: &[UserId],
    ) -> Result<(), RepositoryError>;

    /// Delete the allocations of every author in one phase. Returns the
    /// number of rows removed.
    async fn delete_allocations(
        &self,
        review_obj: ReviewObjId,
        phase_nr: PhaseNr,
    ) -> Result<usize, RepositoryError>;
}
