//! Collaborator-facing operations on one review container.
//!
//! `ReviewCycle` owns the request's `Mapper` and composes its cached reads
//! with the record and allocation writers. Every write invalidates the
//! bucket it touched before returning, so reads issued afterwards through
//! the same cycle see it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use revcycle_core::{
    Conditions, CyclePhase, CycleQuestion, FormId, PhaseNr, QuestionId, ReviewForm, ReviewObjId,
    ReviewScores, UserId,
};
use tracing::{debug, info};

use crate::allocation::ReviewerAllocation;
use crate::error::ReviewError;
use crate::mapper::{CacheBucket, Mapper};
use crate::record::Record;
use crate::repository::ReviewRepository;

/// The review cycle of one container.
#[derive(Debug)]
pub struct ReviewCycle {
    mapper: Mapper,
}

impl ReviewCycle {
    pub fn new(review_obj: ReviewObjId, repo: Arc<dyn ReviewRepository>) -> Self {
        Self {
            mapper: Mapper::new(review_obj, repo),
        }
    }

    pub fn mapper(&self) -> &Mapper {
        &self.mapper
    }

    pub fn review_obj(&self) -> ReviewObjId {
        self.mapper.review_obj()
    }

    pub async fn questions_by_author(
        &self,
        author: UserId,
    ) -> Result<Vec<CycleQuestion>, ReviewError> {
        self.mapper
            .get_cycle_questions(&Conditions::new().with("author", author.0))
            .await
    }

    pub async fn reviews_by_reviewer(
        &self,
        reviewer: UserId,
    ) -> Result<Vec<ReviewForm>, ReviewError> {
        self.mapper
            .get_review_forms(&Conditions::new().with("reviewer", reviewer.0))
            .await
    }

    pub async fn reviews_by_question(
        &self,
        question_id: QuestionId,
    ) -> Result<Vec<ReviewForm>, ReviewError> {
        self.mapper
            .get_review_forms(&Conditions::new().with("question_id", question_id.0))
            .await
    }

    /// Unfinished questions of `phase_nr` whose author has no allocation
    /// meeting the phase quorum yet.
    pub async fn unallocated_questions(
        &self,
        phase_nr: PhaseNr,
    ) -> Result<Vec<CycleQuestion>, ReviewError> {
        let questions = self
            .mapper
            .get_cycle_questions(
                &Conditions::new()
                    .with("phase_nr", phase_nr.0)
                    .with("finished", false),
            )
            .await?;
        if questions.is_empty() {
            return Ok(questions);
        }

        let quorum = self.mapper.quorum(self.review_obj(), phase_nr).await? as usize;
        let rows = self
            .mapper
            .get_reviewer_allocations(&Conditions::new().with("phase_nr", phase_nr.0))
            .await?;

        let mut reviewers_by_author: HashMap<UserId, HashSet<UserId>> = HashMap::new();
        for row in rows {
            reviewers_by_author
                .entry(row.author)
                .or_default()
                .insert(row.reviewer);
        }

        Ok(questions
            .into_iter()
            .filter(|question| {
                reviewers_by_author
                    .get(&question.author)
                    .map_or(0, HashSet::len)
                    < quorum
            })
            .collect())
    }

    /// Unfinished questions with at least one submitted review.
    pub async fn reviewed_questions(&self) -> Result<Vec<CycleQuestion>, ReviewError> {
        let reviewed: HashSet<QuestionId> = self
            .mapper
            .get_review_forms(&Conditions::new().with("submitted", true))
            .await?
            .into_iter()
            .map(|form| form.question_id)
            .collect();

        Ok(self
            .mapper
            .get_cycle_questions(&Conditions::new().with("finished", false))
            .await?
            .into_iter()
            .filter(|question| reviewed.contains(&question.id))
            .collect())
    }

    /// Mark the listed questions finished. Ids that are not questions of
    /// this container, or are already finished, are skipped.
    ///
    /// Returns the number of questions that changed.
    pub async fn finish_questions(&self, ids: &[QuestionId]) -> Result<usize, ReviewError> {
        let wanted: HashSet<QuestionId> = ids.iter().copied().collect();
        let pending = self
            .mapper
            .get_cycle_questions(&Conditions::new().with("finished", false))
            .await?;

        let mut finished = 0;
        let mut outcome = Ok(());
        for mut question in pending.into_iter().filter(|q| wanted.contains(&q.id)) {
            question.finish();
            outcome = question.write(self.mapper.repository()).await;
            if outcome.is_err() {
                break;
            }
            finished += 1;
        }

        // Rows written before a failure are in storage; the bucket must not
        // keep serving the old copies.
        if finished > 0 {
            self.mapper.invalidate(CacheBucket::CycleQuestions).await;
            info!(review_obj = %self.review_obj(), finished, "Finished questions");
        }
        outcome?;
        Ok(finished)
    }

    /// Assign `reviewers` to `author` in `phase_nr` and open a review form
    /// for every reviewer on each of the author's questions in that phase.
    ///
    /// Returns `Ok(false)` without writing anything when the distinct
    /// reviewers fall short of the phase quorum, since such an allocation
    /// could never be loaded back.
    pub async fn allocate(
        &self,
        phase_nr: PhaseNr,
        author: UserId,
        reviewers: Vec<UserId>,
    ) -> Result<bool, ReviewError> {
        let review_obj = self.review_obj();
        let mut allocation =
            ReviewerAllocation::new(&self.mapper, phase_nr, author, review_obj, reviewers);

        let quorum = self.mapper.quorum(review_obj, phase_nr).await?;
        if allocation.reviewers().len() < quorum as usize {
            debug!(
                %review_obj,
                %phase_nr,
                %author,
                reviewers = allocation.reviewers().len(),
                quorum,
                "Refusing allocation below quorum"
            );
            return Ok(false);
        }

        allocation.store_to_db().await?;

        let questions = self
            .mapper
            .get_cycle_questions(
                &Conditions::new()
                    .with("author", author.0)
                    .with("phase_nr", phase_nr.0),
            )
            .await?;
        let existing: HashSet<(QuestionId, UserId)> = self
            .mapper
            .get_review_forms(&Conditions::new())
            .await?
            .into_iter()
            .map(|form| (form.question_id, form.reviewer))
            .collect();

        let missing: Vec<(QuestionId, UserId)> = questions
            .iter()
            .flat_map(|question| {
                allocation
                    .reviewers()
                    .iter()
                    .map(move |&reviewer| (question.id, reviewer))
            })
            .filter(|pair| !existing.contains(pair))
            .collect();

        let repo = self.mapper.repository();
        let mut opened = 0usize;
        let mut outcome = Ok(());
        for (question_id, reviewer) in missing {
            if let Err(e) = repo.create_review_form(review_obj, question_id, reviewer).await {
                outcome = Err(e);
                break;
            }
            opened += 1;
        }

        // Forms opened before a failure are in storage; the bucket must not
        // keep serving the old set.
        if opened > 0 {
            self.mapper.invalidate(CacheBucket::ReviewForms).await;
        }
        outcome?;
        info!(%review_obj, %phase_nr, %author, opened, "Allocated reviewers");
        Ok(true)
    }

    /// Record a reviewer's scores on a form and mark it submitted.
    ///
    /// Returns `Ok(false)` when the form is not part of this container or a
    /// rubric is left unanswered.
    pub async fn submit_review(
        &self,
        form_id: FormId,
        scores: ReviewScores,
    ) -> Result<bool, ReviewError> {
        if let Some(rubric) = scores.missing() {
            debug!(%form_id, rubric, "Rejecting incomplete review");
            return Ok(false);
        }

        let Some(mut form) = self
            .mapper
            .get_review_forms(&Conditions::new().with("id", form_id.0))
            .await?
            .into_iter()
            .next()
        else {
            debug!(%form_id, review_obj = %self.review_obj(), "No such review form");
            return Ok(false);
        };

        form.submit(scores);
        form.store_to_db(&self.mapper).await?;
        info!(%form_id, reviewer = %form.reviewer, "Submitted review");
        Ok(true)
    }

    /// Set how many reviewers an allocation in `phase_nr` needs.
    pub async fn configure_phase(
        &self,
        phase_nr: PhaseNr,
        nr_reviewers: u32,
    ) -> Result<(), ReviewError> {
        let phase = CyclePhase {
            review_obj: self.review_obj(),
            phase_nr,
            nr_reviewers,
        };
        phase.store_to_db(&self.mapper).await?;
        info!(review_obj = %phase.review_obj, %phase_nr, nr_reviewers, "Configured phase");
        Ok(())
    }

    /// Drop `phase_nr` from the cycle together with its allocations. The
    /// allocations go first: without a phase they could never be loaded.
    ///
    /// Returns whether the phase was configured.
    pub async fn remove_phase(&self, phase_nr: PhaseNr) -> Result<bool, ReviewError> {
        let review_obj = self.review_obj();
        ReviewerAllocation::for_phase(&self.mapper, phase_nr, review_obj)
            .delete_from_db()
            .await?;

        let removed = self
            .mapper
            .repository()
            .delete_cycle_phase(review_obj, phase_nr)
            .await?;
        self.mapper.invalidate(CacheBucket::CyclePhases).await;
        info!(%review_obj, %phase_nr, removed, "Removed phase");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RepositoryError;
    use crate::testing::{seed_phase, seed_question, CountingRepository, OBJ};
    use revcycle_core::{AspectRatings, Evaluation, Expertise, KnowledgeDimension, Rating, Taxonomy};

    fn cycle() -> (Arc<CountingRepository>, ReviewCycle) {
        let repo = Arc::new(CountingRepository::default());
        let cycle = ReviewCycle::new(OBJ, repo.clone());
        (repo, cycle)
    }

    fn users(ids: &[u64]) -> Vec<UserId> {
        ids.iter().copied().map(UserId).collect()
    }

    fn scores() -> ReviewScores {
        ReviewScores {
            description: AspectRatings::new(Rating::Good, Rating::Good, Rating::Good),
            question: AspectRatings::new(Rating::Good, Rating::Correctable, Rating::Good),
            answers: AspectRatings::new(Rating::Good, Rating::Good, Rating::Unusable),
            taxonomy: Some(Taxonomy::Apply),
            knowledge_dimension: Some(KnowledgeDimension::Conceptual),
            evaluation: Some(Evaluation::Accepted),
            expertise: Some(Expertise::Medium),
            comment: String::new(),
        }
    }

    #[tokio::test]
    async fn test_allocate_opens_forms_per_reviewer_and_question() {
        let (repo, cycle) = cycle();
        seed_phase(&repo, 1, 2).await;
        seed_question(&repo, 1, 100, 1).await;
        seed_question(&repo, 2, 100, 1).await;
        seed_question(&repo, 3, 100, 2).await;
        seed_question(&repo, 4, 200, 1).await;

        assert!(cycle.allocate(PhaseNr(1), UserId(100), users(&[5, 9])).await.unwrap());

        let forms = cycle.mapper().get_review_forms(&Conditions::new()).await.unwrap();
        let mut pairs: Vec<(u64, u64)> = forms
            .iter()
            .map(|f| (f.question_id.0, f.reviewer.0))
            .collect();
        pairs.sort_unstable();
        assert_eq!(pairs, vec![(1, 5), (1, 9), (2, 5), (2, 9)]);
        assert!(forms.iter().all(|f| !f.submitted));
    }

    #[tokio::test]
    async fn test_reallocate_keeps_existing_forms() {
        let (repo, cycle) = cycle();
        seed_phase(&repo, 1, 1).await;
        seed_question(&repo, 1, 100, 1).await;

        assert!(cycle.allocate(PhaseNr(1), UserId(100), users(&[5])).await.unwrap());
        assert!(cycle.allocate(PhaseNr(1), UserId(100), users(&[5, 6])).await.unwrap());

        assert_eq!(repo.calls("create_review_form"), 2);
        assert_eq!(cycle.reviews_by_question(QuestionId(1)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_allocate_below_quorum_writes_nothing() {
        let (repo, cycle) = cycle();
        seed_phase(&repo, 1, 3).await;
        seed_question(&repo, 1, 100, 1).await;

        let stored = cycle
            .allocate(PhaseNr(1), UserId(100), users(&[5, 5, 9]))
            .await
            .unwrap();

        assert!(!stored);
        assert_eq!(repo.calls("replace_allocation"), 0);
        assert_eq!(repo.calls("create_review_form"), 0);
    }

    #[tokio::test]
    async fn test_failed_form_write_does_not_leave_stale_forms() {
        let (repo, cycle) = cycle();
        seed_phase(&repo, 1, 2).await;
        seed_question(&repo, 1, 100, 1).await;
        // Warm the bucket so a missed invalidation would show.
        assert!(cycle.mapper().get_review_forms(&Conditions::new()).await.unwrap().is_empty());
        repo.fail_on("create_review_form", 2);

        let err = cycle
            .allocate(PhaseNr(1), UserId(100), users(&[5, 9]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReviewError::Repository(RepositoryError::Storage { .. })
        ));

        let stored = repo.review_forms(OBJ).await.unwrap();
        let served = cycle.mapper().get_review_forms(&Conditions::new()).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(served, stored);
    }

    #[tokio::test]
    async fn test_failed_finish_still_shows_questions_already_finished() {
        let (repo, cycle) = cycle();
        seed_question(&repo, 1, 100, 1).await;
        seed_question(&repo, 2, 100, 1).await;
        assert_eq!(cycle.questions_by_author(UserId(100)).await.unwrap().len(), 2);
        repo.fail_on("put_cycle_question", 2);

        assert!(cycle
            .finish_questions(&[QuestionId(1), QuestionId(2)])
            .await
            .is_err());

        let finished: Vec<u64> = cycle
            .mapper()
            .get_cycle_questions(&Conditions::new().with("finished", true))
            .await
            .unwrap()
            .into_iter()
            .map(|q| q.id.0)
            .collect();
        assert_eq!(finished, vec![1]);
    }

    #[tokio::test]
    async fn test_unallocated_questions_respects_quorum() {
        let (repo, cycle) = cycle();
        seed_phase(&repo, 1, 2).await;
        seed_question(&repo, 1, 100, 1).await;
        seed_question(&repo, 2, 200, 1).await;
        seed_question(&repo, 3, 300, 1).await;

        cycle.allocate(PhaseNr(1), UserId(100), users(&[5, 9])).await.unwrap();
        // Below quorum, written behind the cycle's back.
        repo.replace_allocation(
            &revcycle_core::AllocationKey::new(PhaseNr(1), OBJ, UserId(200)),
            &users(&[5]),
        )
        .await
        .unwrap();
        cycle.mapper().invalidate(CacheBucket::ReviewerAllocations).await;

        let ids: Vec<u64> = cycle
            .unallocated_questions(PhaseNr(1))
            .await
            .unwrap()
            .into_iter()
            .map(|q| q.id.0)
            .collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_submit_review_then_reviewed_and_finished() {
        let (repo, cycle) = cycle();
        seed_phase(&repo, 1, 1).await;
        seed_question(&repo, 1, 100, 1).await;
        seed_question(&repo, 2, 100, 1).await;
        cycle.allocate(PhaseNr(1), UserId(100), users(&[5])).await.unwrap();

        assert!(cycle.reviewed_questions().await.unwrap().is_empty());

        let form = cycle
            .reviews_by_question(QuestionId(2))
            .await
            .unwrap()
            .remove(0);
        assert!(cycle.submit_review(form.id, scores()).await.unwrap());

        let by_reviewer = cycle.reviews_by_reviewer(UserId(5)).await.unwrap();
        let submitted: Vec<u64> = by_reviewer
            .iter()
            .filter(|f| f.submitted)
            .map(|f| f.question_id.0)
            .collect();
        assert_eq!(submitted, vec![2]);

        let reviewed = cycle.reviewed_questions().await.unwrap();
        assert_eq!(reviewed.len(), 1);
        assert_eq!(reviewed[0].id, QuestionId(2));

        assert_eq!(cycle.finish_questions(&[QuestionId(2)]).await.unwrap(), 1);
        assert!(cycle.reviewed_questions().await.unwrap().is_empty());
        assert_eq!(cycle.finish_questions(&[QuestionId(2)]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_submit_incomplete_or_unknown_form_is_refused() {
        let (repo, cycle) = cycle();
        seed_phase(&repo, 1, 1).await;
        seed_question(&repo, 1, 100, 1).await;
        cycle.allocate(PhaseNr(1), UserId(100), users(&[5])).await.unwrap();
        let form = cycle.reviews_by_reviewer(UserId(5)).await.unwrap().remove(0);

        let mut partial = scores();
        partial.expertise = None;
        assert!(!cycle.submit_review(form.id, partial).await.unwrap());
        assert!(!cycle.submit_review(FormId(form.id.0 + 50), scores()).await.unwrap());
        assert_eq!(repo.calls("update_review_form"), 0);
    }

    #[tokio::test]
    async fn test_configure_phase_changes_quorum() {
        let (_repo, cycle) = cycle();

        cycle.configure_phase(PhaseNr(1), 2).await.unwrap();
        assert_eq!(cycle.mapper().quorum(OBJ, PhaseNr(1)).await.unwrap(), 2);

        cycle.configure_phase(PhaseNr(1), 3).await.unwrap();
        assert_eq!(cycle.mapper().quorum(OBJ, PhaseNr(1)).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_remove_phase_drops_quorum_and_allocations() {
        let (repo, cycle) = cycle();
        seed_phase(&repo, 1, 1).await;
        seed_phase(&repo, 2, 1).await;
        seed_question(&repo, 1, 100, 1).await;
        seed_question(&repo, 2, 100, 2).await;
        cycle.allocate(PhaseNr(1), UserId(100), users(&[5])).await.unwrap();
        cycle.allocate(PhaseNr(2), UserId(100), users(&[6])).await.unwrap();

        assert!(cycle.remove_phase(PhaseNr(1)).await.unwrap());

        assert!(matches!(
            cycle.mapper().quorum(OBJ, PhaseNr(1)).await,
            Err(ReviewError::Repository(RepositoryError::MissingPhase { .. }))
        ));
        let left: Vec<u64> = cycle
            .mapper()
            .get_reviewer_allocations(&Conditions::new())
            .await
            .unwrap()
            .into_iter()
            .map(|row| row.phase_nr.0)
            .collect();
        assert_eq!(left, vec![2]);
        assert!(!cycle.remove_phase(PhaseNr(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_questions_by_author() {
        let (repo, cycle) = cycle();
        seed_question(&repo, 1, 100, 1).await;
        seed_question(&repo, 2, 200, 1).await;
        seed_question(&repo, 3, 100, 2).await;

        let ids: Vec<u64> = cycle
            .questions_by_author(UserId(100))
            .await
            .unwrap()
            .into_iter()
            .map(|q| q.id.0)
            .collect();
        assert_eq!(ids, vec![1, 3]);
    }
}
