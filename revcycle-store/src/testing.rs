//! Test support: a repository that counts the calls made to it and can be
//! told to fail one of them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use revcycle_core::{
    AllocationKey, AllocationRow, CyclePhase, CycleQuestion, FormId, PhaseNr, QuestionId,
    ReviewForm, ReviewObjId, UserId,
};

use crate::error::RepositoryError;
use crate::mapper::Mapper;
use crate::repository::{InMemoryRepository, ReviewRepository};

/// Container most tests work in.
pub(crate) const OBJ: ReviewObjId = ReviewObjId(10);

/// In-memory repository that records how often each method was called.
#[derive(Default)]
pub(crate) struct CountingRepository {
    inner: InMemoryRepository,
    calls: Mutex<HashMap<&'static str, usize>>,
    /// `(method, n)`: the n-th call of `method` fails.
    fail_at: Mutex<Option<(&'static str, usize)>>,
}

impl CountingRepository {
    fn hit(&self, method: &'static str) -> Result<(), RepositoryError> {
        let mut calls = self.calls.lock().unwrap();
        let count = calls.entry(method).or_default();
        *count += 1;
        if *self.fail_at.lock().unwrap() == Some((method, *count)) {
            return Err(RepositoryError::storage(method, "disk full"));
        }
        Ok(())
    }

    /// Make the `nth` call (1-based, counted from the last reset) of
    /// `method` fail with a storage error.
    pub(crate) fn fail_on(&self, method: &'static str, nth: usize) {
        *self.fail_at.lock().unwrap() = Some((method, nth));
    }

    pub(crate) fn calls(&self, method: &str) -> usize {
        self.calls.lock().unwrap().get(method).copied().unwrap_or(0)
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub(crate) fn reset_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl ReviewRepository for CountingRepository {
    async fn review_forms(
        &self,
        review_obj: ReviewObjId,
    ) -> Result<Vec<ReviewForm>, RepositoryError> {
        self.hit("review_forms")?;
        self.inner.review_forms(review_obj).await
    }

    async fn review_form(&self, id: FormId) -> Result<Option<ReviewForm>, RepositoryError> {
        self.hit("review_form")?;
        self.inner.review_form(id).await
    }

    async fn create_review_form(
        &self,
        review_obj: ReviewObjId,
        question_id: QuestionId,
        reviewer: UserId,
    ) -> Result<ReviewForm, RepositoryError> {
        self.hit("create_review_form")?;
        self.inner
            .create_review_form(review_obj, question_id, reviewer)
            .await
    }

    async fn update_review_form(&self, form: &ReviewForm) -> Result<(), RepositoryError> {
        self.hit("update_review_form")?;
        self.inner.update_review_form(form).await
    }

    async fn cycle_questions(
        &self,
        review_obj: ReviewObjId,
    ) -> Result<Vec<CycleQuestion>, RepositoryError> {
        self.hit("cycle_questions")?;
        self.inner.cycle_questions(review_obj).await
    }

    async fn cycle_question(
        &self,
        id: QuestionId,
    ) -> Result<Option<CycleQuestion>, RepositoryError> {
        self.hit("cycle_question")?;
        self.inner.cycle_question(id).await
    }

    async fn put_cycle_question(&self, question: &CycleQuestion) -> Result<(), RepositoryError> {
        self.hit("put_cycle_question")?;
        self.inner.put_cycle_question(question).await
    }

    async fn cycle_phases(
        &self,
        review_obj: ReviewObjId,
    ) -> Result<Vec<CyclePhase>, RepositoryError> {
        self.hit("cycle_phases")?;
        self.inner.cycle_phases(review_obj).await
    }

    async fn put_cycle_phase(&self, phase: &CyclePhase) -> Result<(), RepositoryError> {
        self.hit("put_cycle_phase")?;
        self.inner.put_cycle_phase(phase).await
    }

    async fn delete_cycle_phase(
        &self,
        review_obj: ReviewObjId,
        phase_nr: PhaseNr,
    ) -> Result<bool, RepositoryError> {
        self.hit("delete_cycle_phase")?;
        self.inner.delete_cycle_phase(review_obj, phase_nr).await
    }

    async fn allocations(
        &self,
        review_obj: ReviewObjId,
    ) -> Result<Vec<AllocationRow>, RepositoryError> {
        self.hit("allocations")?;
        self.inner.allocations(review_obj).await
    }

    async fn allocation_rows(
        &self,
        key: &AllocationKey,
    ) -> Result<Vec<AllocationRow>, RepositoryError> {
        self.hit("allocation_rows")?;
        self.inner.allocation_rows(key).await
    }

    async fn replace_allocation(
        &self,
        key: &AllocationKey,
        reviewers: &[UserId],
    ) -> Result<(), RepositoryError> {
        self.hit("replace_allocation")?;
        self.inner.replace_allocation(key, reviewers).await
    }

    async fn delete_allocations(
        &self,
        review_obj: ReviewObjId,
        phase_nr: PhaseNr,
    ) -> Result<usize, RepositoryError> {
        self.hit("delete_allocations")?;
        self.inner.delete_allocations(review_obj, phase_nr).await
    }
}

/// A fresh counting repository and a mapper over [`OBJ`] backed by it.
pub(crate) fn counting_mapper() -> (Arc<CountingRepository>, Mapper) {
    let repo = Arc::new(CountingRepository::default());
    let mapper = Mapper::new(OBJ, repo.clone());
    (repo, mapper)
}

pub(crate) async fn seed_phase(repo: &CountingRepository, phase_nr: u64, nr_reviewers: u32) {
    repo.put_cycle_phase(&CyclePhase {
        review_obj: OBJ,
        phase_nr: PhaseNr(phase_nr),
        nr_reviewers,
    })
    .await
    .unwrap();
    repo.reset_calls();
}

pub(crate) async fn seed_question(repo: &CountingRepository, id: u64, author: u64, phase_nr: u64) {
    repo.put_cycle_question(&CycleQuestion {
        id: QuestionId(id),
        review_obj: OBJ,
        author: UserId(author),
        phase_nr: PhaseNr(phase_nr),
        finished: false,
        title: format!("Question {}", id),
    })
    .await
    .unwrap();
    repo.reset_calls();
}
