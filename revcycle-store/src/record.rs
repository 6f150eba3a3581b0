//! Shared contract of the self-loading, self-persisting entity records.

use async_trait::async_trait;
use revcycle_core::{
    AllocationRow, CyclePhase, CycleQuestion, Filterable, FormId, PhaseNr, QuestionId, ReviewForm,
    ReviewObjId,
};
use tokio::sync::Mutex;

use crate::error::RepositoryError;
use crate::mapper::{Bucket, CacheBucket, Mapper};
use crate::repository::ReviewRepository;

/// A record type the mapper caches per container.
#[async_trait]
pub trait CachedRecord: Filterable + Clone + Send + Sync + 'static {
    /// Bucket holding this record type.
    const BUCKET: CacheBucket;

    /// The mapper's cache slot for this record type.
    fn slot(mapper: &Mapper) -> &Mutex<Bucket<Self>>;

    /// Every record of the container, in storage order.
    async fn load_all(
        repo: &dyn ReviewRepository,
        review_obj: ReviewObjId,
    ) -> Result<Vec<Self>, RepositoryError>;
}

/// A record that can also be loaded and saved individually.
#[async_trait]
pub trait Record: CachedRecord {
    type Id: Send + 'static;

    async fn load_from_db(
        repo: &dyn ReviewRepository,
        id: Self::Id,
    ) -> Result<Option<Self>, RepositoryError>;

    /// Write this record to storage without touching any cache.
    async fn write(&self, repo: &dyn ReviewRepository) -> Result<(), RepositoryError>;

    /// Write this record and invalidate the bucket that caches its type, so
    /// the mapper's next read observes the change.
    async fn store_to_db(&self, mapper: &Mapper) -> Result<(), RepositoryError> {
        self.write(mapper.repository()).await?;
        mapper.invalidate(Self::BUCKET).await;
        Ok(())
    }
}

#[async_trait]
impl CachedRecord for ReviewForm {
    const BUCKET: CacheBucket = CacheBucket::ReviewForms;

    fn slot(mapper: &Mapper) -> &Mutex<Bucket<Self>> {
        &mapper.review_forms
    }

    async fn load_all(
        repo: &dyn ReviewRepository,
        review_obj: ReviewObjId,
    ) -> Result<Vec<Self>, RepositoryError> {
        repo.review_forms(review_obj).await
    }
}

#[async_trait]
impl Record for ReviewForm {
    type Id = FormId;

    async fn load_from_db(
        repo: &dyn ReviewRepository,
        id: FormId,
    ) -> Result<Option<Self>, RepositoryError> {
        repo.review_form(id).await
    }

    async fn write(&self, repo: &dyn ReviewRepository) -> Result<(), RepositoryError> {
        repo.update_review_form(self).await
    }
}

#[async_trait]
impl CachedRecord for CycleQuestion {
    const BUCKET: CacheBucket = CacheBucket::CycleQuestions;

    fn slot(mapper: &Mapper) -> &Mutex<Bucket<Self>> {
        &mapper.cycle_questions
    }

    async fn load_all(
        repo: &dyn ReviewRepository,
        review_obj: ReviewObjId,
    ) -> Result<Vec<Self>, RepositoryError> {
        repo.cycle_questions(review_obj).await
    }
}

#[async_trait]
impl Record for CycleQuestion {
    type Id = QuestionId;

    async fn load_from_db(
        repo: &dyn ReviewRepository,
        id: QuestionId,
    ) -> Result<Option<Self>, RepositoryError> {
        repo.cycle_question(id).await
    }

    async fn write(&self, repo: &dyn ReviewRepository) -> Result<(), RepositoryError> {
        repo.put_cycle_question(self).await
    }
}

#[async_trait]
impl CachedRecord for CyclePhase {
    const BUCKET: CacheBucket = CacheBucket::CyclePhases;

    fn slot(mapper: &Mapper) -> &Mutex<Bucket<Self>> {
        &mapper.cycle_phases
    }

    async fn load_all(
        repo: &dyn ReviewRepository,
        review_obj: ReviewObjId,
    ) -> Result<Vec<Self>, RepositoryError> {
        repo.cycle_phases(review_obj).await
    }
}

#[async_trait]
impl Record for CyclePhase {
    type Id = (ReviewObjId, PhaseNr);

    async fn load_from_db(
        repo: &dyn ReviewRepository,
        id: (ReviewObjId, PhaseNr),
    ) -> Result<Option<Self>, RepositoryError> {
        let (review_obj, phase_nr) = id;
        Ok(repo
            .cycle_phases(review_obj)
            .await?
            .into_iter()
            .find(|phase| phase.phase_nr == phase_nr))
    }

    async fn write(&self, repo: &dyn ReviewRepository) -> Result<(), RepositoryError> {
        repo.put_cycle_phase(self).await
    }
}

// Allocation rows are only ever written as a whole reviewer set, through
// `ReviewerAllocation`, so they are cached but not individually saved.
#[async_trait]
impl CachedRecord for AllocationRow {
    const BUCKET: CacheBucket = CacheBucket::ReviewerAllocations;

    fn slot(mapper: &Mapper) -> &Mutex<Bucket<Self>> {
        &mapper.reviewer_allocations
    }

    async fn load_all(
        repo: &dyn ReviewRepository,
        review_obj: ReviewObjId,
    ) -> Result<Vec<Self>, RepositoryError> {
        repo.allocations(review_obj).await
    }
}
