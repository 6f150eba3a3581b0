//! In-memory implementation of `ReviewRepository`.
//!
//! All data lives in one set of tables behind a single `RwLock`; a write
//! method holds the write guard for its whole body, which makes every write
//! (including `replace_allocation`) atomic for readers. Nothing survives a
//! restart.

use std::collections::BTreeMap;

use async_trait::async_trait;
use revcycle_core::{
    AllocationKey, AllocationRow, CyclePhase, CycleQuestion, FormId, PhaseNr, QuestionId,
    ReviewForm, ReviewObjId, ReviewScores, UserId,
};
use tokio::sync::RwLock;

use super::ReviewRepository;
use crate::error::RepositoryError;

#[derive(Default)]
struct Tables {
    forms: BTreeMap<FormId, ReviewForm>,
    next_form_id: u64,
    questions: BTreeMap<QuestionId, CycleQuestion>,
    phases: BTreeMap<(ReviewObjId, PhaseNr), CyclePhase>,
    /// Insertion order stands in for the row id order of a real table.
    allocations: Vec<AllocationRow>,
}

/// In-memory review repository.
#[derive(Default)]
pub struct InMemoryRepository {
    tables: RwLock<Tables>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReviewRepository for InMemoryRepository {
    async fn review_forms(
        &self,
        review_obj: ReviewObjId,
    ) -> Result<Vec<ReviewForm>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .forms
            .values()
            .filter(|form| form.review_obj == review_obj)
            .cloned()
            .collect())
    }

    async fn review_form(&self, id: FormId) -> Result<Option<ReviewForm>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.forms.get(&id).cloned())
    }

    async fn create_review_form(
        &self,
        review_obj: ReviewObjId,
        question_id: QuestionId,
        reviewer: UserId,
    ) -> Result<ReviewForm, RepositoryError> {
        let mut tables = self.tables.write().await;
        tables.next_form_id += 1;
        let form = ReviewForm {
            id: FormId(tables.next_form_id),
            review_obj,
            question_id,
            reviewer,
            submitted: false,
            scores: ReviewScores::default(),
        };
        tables.forms.insert(form.id, form.clone());
        Ok(form)
    }

    async fn update_review_form(&self, form: &ReviewForm) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        match tables.forms.get_mut(&form.id) {
            Some(stored) => {
                *stored = form.clone();
                Ok(())
            }
            None => Err(RepositoryError::storage(
                "update_review_form",
                format!("review form {} does not exist", form.id),
            )),
        }
    }

    async fn cycle_questions(
        &self,
        review_obj: ReviewObjId,
    ) -> Result<Vec<CycleQuestion>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .questions
            .values()
            .filter(|question| question.review_obj == review_obj)
            .cloned()
            .collect())
    }

    async fn cycle_question(
        &self,
        id: QuestionId,
    ) -> Result<Option<CycleQuestion>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.questions.get(&id).cloned())
    }

    async fn put_cycle_question(&self, question: &CycleQuestion) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        tables.questions.insert(question.id, question.clone());
        Ok(())
    }

    async fn cycle_phases(
        &self,
        review_obj: ReviewObjId,
    ) -> Result<Vec<CyclePhase>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .phases
            .range((review_obj, PhaseNr(0))..=(review_obj, PhaseNr(u64::MAX)))
            .map(|(_, phase)| phase.clone())
            .collect())
    }

    async fn put_cycle_phase(&self, phase: &CyclePhase) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        tables
            .phases
            .insert((phase.review_obj, phase.phase_nr), phase.clone());
        Ok(())
    }

    async fn delete_cycle_phase(
        &self,
        review_obj: ReviewObjId,
        phase_nr: PhaseNr,
    ) -> Result<bool, RepositoryError> {
        let mut tables = self.tables.write().await;
        Ok(tables.phases.remove(&(review_obj, phase_nr)).is_some())
    }

    async fn allocations(
        &self,
        review_obj: ReviewObjId,
    ) -> Result<Vec<AllocationRow>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .allocations
            .iter()
            .filter(|row| row.review_obj == review_obj)
            .cloned()
            .collect())
    }

    async fn allocation_rows(
        &self,
        key: &AllocationKey,
    ) -> Result<Vec<AllocationRow>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .allocations
            .iter()
            .filter(|row| row.key() == *key)
            .cloned()
            .collect())
    }

    async fn replace_allocation(
        &self,
        key: &AllocationKey,
        reviewers: &[UserId],
    ) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        tables.allocations.retain(|row| row.key() != *key);
        for reviewer in reviewers {
            let row = AllocationRow {
                phase_nr: key.phase_nr,
                review_obj: key.review_obj,
                author: key.author,
                reviewer: *reviewer,
            };
            // Mirrors the unique constraint of the SQL table.
            if !tables.allocations.contains(&row) {
                tables.allocations.push(row);
            }
        }
        Ok(())
    }

    async fn delete_allocations(
        &self,
        review_obj: ReviewObjId,
        phase_nr: PhaseNr,
    ) -> Result<usize, RepositoryError> {
        let mut tables = self.tables.write().await;
        let before = tables.allocations.len();
        tables
            .allocations
            .retain(|row| !(row.review_obj == review_obj && row.phase_nr == phase_nr));
        Ok(before - tables.allocations.len())
    }
}
