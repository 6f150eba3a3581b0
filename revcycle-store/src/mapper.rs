//! Lazily populated, filterable record caches for one review container.
//!
//! The mapper is request scoped: one instance per container per request.
//! Each bucket loads the container's full collection on first access and
//! answers every later query from memory until a writer invalidates it.

use std::fmt;
use std::sync::Arc;

use revcycle_core::{
    AllocationRow, Conditions, CyclePhase, CycleQuestion, PhaseNr, ReviewForm, ReviewObjId,
};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{RepositoryError, ReviewError};
use crate::record::CachedRecord;
use crate::repository::ReviewRepository;

/// The independently invalidatable caches a mapper holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheBucket {
    ReviewForms,
    CycleQuestions,
    CyclePhases,
    ReviewerAllocations,
}

impl CacheBucket {
    pub const ALL: [CacheBucket; 4] = [
        CacheBucket::ReviewForms,
        CacheBucket::CycleQuestions,
        CacheBucket::CyclePhases,
        CacheBucket::ReviewerAllocations,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CacheBucket::ReviewForms => "review_forms",
            CacheBucket::CycleQuestions => "cycle_questions",
            CacheBucket::CyclePhases => "cycle_phases",
            CacheBucket::ReviewerAllocations => "reviewer_allocations",
        }
    }
}

impl fmt::Display for CacheBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Cache state of one bucket.
///
/// `Loaded(vec![])` means the container has no rows; it is not reloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bucket<T> {
    Unloaded,
    Loaded(Vec<T>),
}

impl<T> Bucket<T> {
    pub fn is_loaded(&self) -> bool {
        matches!(self, Bucket::Loaded(_))
    }

    pub fn records(&self) -> Option<&[T]> {
        match self {
            Bucket::Unloaded => None,
            Bucket::Loaded(records) => Some(records),
        }
    }
}

impl<T> Default for Bucket<T> {
    fn default() -> Self {
        Bucket::Unloaded
    }
}

/// Cached read access to the records of one review container.
pub struct Mapper {
    review_obj: ReviewObjId,
    repo: Arc<dyn ReviewRepository>,
    pub(crate) review_forms: Mutex<Bucket<ReviewForm>>,
    pub(crate) cycle_questions: Mutex<Bucket<CycleQuestion>>,
    pub(crate) cycle_phases: Mutex<Bucket<CyclePhase>>,
    pub(crate) reviewer_allocations: Mutex<Bucket<AllocationRow>>,
}

impl Mapper {
    pub fn new(review_obj: ReviewObjId, repo: Arc<dyn ReviewRepository>) -> Self {
        Self {
            review_obj,
            repo,
            review_forms: Mutex::default(),
            cycle_questions: Mutex::default(),
            cycle_phases: Mutex::default(),
            reviewer_allocations: Mutex::default(),
        }
    }

    /// Container every bucket of this mapper is scoped to.
    pub fn review_obj(&self) -> ReviewObjId {
        self.review_obj
    }

    pub fn repository(&self) -> &dyn ReviewRepository {
        self.repo.as_ref()
    }

    /// Records of type `R` matching every condition, in storage order.
    ///
    /// Condition names are checked before the cache is touched, so an unknown
    /// attribute fails the same way whether or not the bucket is loaded.
    pub async fn get<R: CachedRecord>(&self, conditions: &Conditions) -> Result<Vec<R>, ReviewError> {
        let resolved = conditions.resolve::<R>()?;

        let mut slot = R::slot(self).lock().await;
        if !slot.is_loaded() {
            let records = R::load_all(self.repository(), self.review_obj).await?;
            debug!(
                bucket = %R::BUCKET,
                review_obj = %self.review_obj,
                count = records.len(),
                "Loaded cache bucket"
            );
            *slot = Bucket::Loaded(records);
        }

        Ok(slot
            .records()
            .map(|records| resolved.select(records))
            .unwrap_or_default())
    }

    pub async fn get_review_forms(
        &self,
        conditions: &Conditions,
    ) -> Result<Vec<ReviewForm>, ReviewError> {
        self.get(conditions).await
    }

    pub async fn get_cycle_questions(
        &self,
        conditions: &Conditions,
    ) -> Result<Vec<CycleQuestion>, ReviewError> {
        self.get(conditions).await
    }

    pub async fn get_cycle_phases(
        &self,
        conditions: &Conditions,
    ) -> Result<Vec<CyclePhase>, ReviewError> {
        self.get(conditions).await
    }

    pub async fn get_reviewer_allocations(
        &self,
        conditions: &Conditions,
    ) -> Result<Vec<AllocationRow>, ReviewError> {
        self.get(conditions).await
    }

    /// Drop a bucket so the next read reloads it from storage.
    ///
    /// Writers call this after changing rows the bucket may hold.
    pub async fn invalidate(&self, bucket: CacheBucket) {
        match bucket {
            CacheBucket::ReviewForms => *self.review_forms.lock().await = Bucket::Unloaded,
            CacheBucket::CycleQuestions => *self.cycle_questions.lock().await = Bucket::Unloaded,
            CacheBucket::CyclePhases => *self.cycle_phases.lock().await = Bucket::Unloaded,
            CacheBucket::ReviewerAllocations => {
                *self.reviewer_allocations.lock().await = Bucket::Unloaded
            }
        }
        debug!(%bucket, review_obj = %self.review_obj, "Invalidated cache bucket");
    }

    pub async fn is_loaded(&self, bucket: CacheBucket) -> bool {
        match bucket {
            CacheBucket::ReviewForms => self.review_forms.lock().await.is_loaded(),
            CacheBucket::CycleQuestions => self.cycle_questions.lock().await.is_loaded(),
            CacheBucket::CyclePhases => self.cycle_phases.lock().await.is_loaded(),
            CacheBucket::ReviewerAllocations => self.reviewer_allocations.lock().await.is_loaded(),
        }
    }

    /// Number of reviewers an allocation in `phase_nr` needs.
    ///
    /// Phases of this mapper's container come from the phase bucket; any
    /// other container is read straight from storage. A phase with no
    /// configuration is a hard error rather than a guessed default.
    pub async fn quorum(
        &self,
        review_obj: ReviewObjId,
        phase_nr: PhaseNr,
    ) -> Result<u32, ReviewError> {
        let phase = if review_obj == self.review_obj {
            let phases = self
                .get_cycle_phases(&Conditions::new().with("phase_nr", phase_nr.0))
                .await?;
            phases.into_iter().next()
        } else {
            self.repo
                .cycle_phases(review_obj)
                .await?
                .into_iter()
                .find(|phase| phase.phase_nr == phase_nr)
        };

        phase
            .map(|phase| phase.nr_reviewers)
            .ok_or(ReviewError::Repository(RepositoryError::MissingPhase {
                review_obj,
                phase_nr,
            }))
    }
}

impl fmt::Debug for Mapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mapper")
            .field("review_obj", &self.review_obj)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use crate::testing::{counting_mapper, seed_phase, seed_question, CountingRepository, OBJ};
    use revcycle_core::{QuestionId, UserId};

    async fn seed_questions(repo: &CountingRepository) {
        seed_question(repo, 1, 100, 1).await;
        seed_question(repo, 2, 100, 2).await;
        seed_question(repo, 3, 200, 1).await;
    }

    #[tokio::test]
    async fn test_bucket_loads_once_per_request() {
        let (repo, mapper) = counting_mapper();
        seed_questions(&repo).await;

        let first = mapper.get_cycle_questions(&Conditions::new()).await.unwrap();
        let second = mapper.get_cycle_questions(&Conditions::new()).await.unwrap();
        let by_author = mapper
            .get_cycle_questions(&Conditions::new().with("author", 100u64))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(by_author.len(), 2);
        assert_eq!(repo.calls("cycle_questions"), 1);
        assert_eq!(repo.total_calls(), 1);
    }

    #[tokio::test]
    async fn test_filter_is_conjunctive_and_ordered() {
        let (repo, mapper) = counting_mapper();
        seed_questions(&repo).await;

        let ids = |questions: Vec<CycleQuestion>| -> Vec<u64> {
            questions.into_iter().map(|q| q.id.0).collect()
        };

        let phase_one = mapper
            .get_cycle_questions(&Conditions::new().with("phase_nr", 1u64))
            .await
            .unwrap();
        assert_eq!(ids(phase_one), vec![1, 3]);

        let both = mapper
            .get_cycle_questions(&Conditions::new().with("phase_nr", 1u64).with("author", 200u64))
            .await
            .unwrap();
        assert_eq!(ids(both), vec![3]);

        // Loose equality: a textual id matches the integer column.
        let textual = mapper
            .get_cycle_questions(&Conditions::new().with("id", "2"))
            .await
            .unwrap();
        assert_eq!(ids(textual), vec![2]);

        let none = mapper
            .get_cycle_questions(&Conditions::new().with("author", 999u64))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_empty_container_is_loaded_once() {
        let (repo, mapper) = counting_mapper();

        assert!(mapper.get_review_forms(&Conditions::new()).await.unwrap().is_empty());
        assert!(mapper.is_loaded(CacheBucket::ReviewForms).await);
        assert!(mapper.get_review_forms(&Conditions::new()).await.unwrap().is_empty());

        assert_eq!(repo.calls("review_forms"), 1);
    }

    #[tokio::test]
    async fn test_unknown_attribute_fails_before_storage() {
        let (repo, mapper) = counting_mapper();
        seed_questions(&repo).await;

        let cold = mapper
            .get_cycle_questions(&Conditions::new().with("colour", "red"))
            .await;
        assert!(matches!(cold, Err(ReviewError::UnknownAttribute(_))));
        assert_eq!(repo.total_calls(), 0);
        assert!(!mapper.is_loaded(CacheBucket::CycleQuestions).await);

        mapper.get_cycle_questions(&Conditions::new()).await.unwrap();
        let warm = mapper
            .get_cycle_questions(&Conditions::new().with("colour", "red"))
            .await;
        assert_eq!(cold, warm);
        assert_eq!(repo.total_calls(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_reload() {
        let (repo, mapper) = counting_mapper();
        seed_questions(&repo).await;

        mapper.get_cycle_questions(&Conditions::new()).await.unwrap();
        mapper.invalidate(CacheBucket::CycleQuestions).await;
        assert!(!mapper.is_loaded(CacheBucket::CycleQuestions).await);
        mapper.get_cycle_questions(&Conditions::new()).await.unwrap();

        assert_eq!(repo.calls("cycle_questions"), 2);
    }

    #[tokio::test]
    async fn test_invalidate_leaves_other_buckets() {
        let (repo, mapper) = counting_mapper();
        seed_phase(&repo, 1, 2).await;

        mapper.get_cycle_phases(&Conditions::new()).await.unwrap();
        mapper.get_review_forms(&Conditions::new()).await.unwrap();
        mapper.invalidate(CacheBucket::ReviewForms).await;

        assert!(mapper.is_loaded(CacheBucket::CyclePhases).await);
        assert!(!mapper.is_loaded(CacheBucket::ReviewForms).await);
    }

    #[tokio::test]
    async fn test_store_to_db_makes_change_visible() {
        let (repo, mapper) = counting_mapper();
        seed_questions(&repo).await;

        let mut question = mapper
            .get_cycle_questions(&Conditions::new().with("id", 1u64))
            .await
            .unwrap()
            .remove(0);
        question.finish();
        question.store_to_db(&mapper).await.unwrap();

        let finished = mapper
            .get_cycle_questions(&Conditions::new().with("finished", true))
            .await
            .unwrap();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].id, QuestionId(1));
        assert_eq!(repo.calls("cycle_questions"), 2);
    }

    #[tokio::test]
    async fn test_load_from_db_bypasses_cache() {
        let (repo, mapper) = counting_mapper();
        seed_questions(&repo).await;

        let question = CycleQuestion::load_from_db(mapper.repository(), QuestionId(3))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(question.author, UserId(200));
        assert!(!mapper.is_loaded(CacheBucket::CycleQuestions).await);
    }

    #[tokio::test]
    async fn test_quorum_comes_from_phase_bucket() {
        let (repo, mapper) = counting_mapper();
        seed_phase(&repo, 1, 2).await;
        seed_phase(&repo, 2, 3).await;

        assert_eq!(mapper.quorum(OBJ, PhaseNr(1)).await.unwrap(), 2);
        assert_eq!(mapper.quorum(OBJ, PhaseNr(2)).await.unwrap(), 3);
        assert_eq!(repo.calls("cycle_phases"), 1);
    }

    #[tokio::test]
    async fn test_quorum_for_missing_phase_is_error() {
        let (repo, mapper) = counting_mapper();
        seed_phase(&repo, 1, 2).await;

        let err = mapper.quorum(OBJ, PhaseNr(7)).await.unwrap_err();
        assert_eq!(
            err,
            ReviewError::Repository(RepositoryError::MissingPhase {
                review_obj: OBJ,
                phase_nr: PhaseNr(7),
            })
        );
    }

    #[tokio::test]
    async fn test_quorum_for_other_container_reads_storage() {
        let (repo, mapper) = counting_mapper();
        let other = ReviewObjId(OBJ.0 + 1);
        repo.put_cycle_phase(&CyclePhase {
            review_obj: other,
            phase_nr: PhaseNr(1),
            nr_reviewers: 4,
        })
        .await
        .unwrap();

        assert_eq!(mapper.quorum(other, PhaseNr(1)).await.unwrap(), 4);
        assert!(!mapper.is_loaded(CacheBucket::CyclePhases).await);
    }
}
