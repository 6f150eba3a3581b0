//! Reviewer allocation for one phase and author.
//!
//! An allocation assigns a set of reviewers to a `(phase_nr, review_obj,
//! author)` key. Storage holds one row per reviewer. An allocation with fewer
//! rows than the phase's configured quorum does not exist yet: loading it
//! fails instead of returning a partial reviewer set.

use revcycle_core::{AllocationKey, PhaseNr, ReviewObjId, UserId};
use tracing::{debug, info};

use crate::error::ReviewError;
use crate::mapper::{CacheBucket, Mapper};

/// Lifecycle of a [`ReviewerAllocation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationState {
    /// Constructed; nothing known about storage.
    Unbound,
    /// In-memory reviewer set equals what storage holds for the key.
    Loaded,
    /// Storage holds fewer reviewers than the quorum (or nothing at all).
    Absent,
    /// Changed in memory and not yet stored.
    Dirty,
}

/// Reviewer assignment for one phase and author of a review container.
///
/// Holds a borrowed mapper, used to resolve the phase quorum and to
/// invalidate the allocation cache after writes. It never shares any other
/// state with it.
#[derive(Debug)]
pub struct ReviewerAllocation<'m> {
    mapper: &'m Mapper,
    phase_nr: Option<PhaseNr>,
    author: Option<UserId>,
    review_obj: Option<ReviewObjId>,
    reviewers: Vec<UserId>,
    state: AllocationState,
}

impl<'m> ReviewerAllocation<'m> {
    /// An allocation with no key; only `load_from_db` can give it one.
    pub fn unbound(mapper: &'m Mapper) -> Self {
        Self {
            mapper,
            phase_nr: None,
            author: None,
            review_obj: None,
            reviewers: Vec::new(),
            state: AllocationState::Unbound,
        }
    }

    /// An allocation addressing a whole phase, for [`delete_from_db`].
    /// Without an author it cannot be stored.
    ///
    /// [`delete_from_db`]: ReviewerAllocation::delete_from_db
    pub fn for_phase(mapper: &'m Mapper, phase_nr: PhaseNr, review_obj: ReviewObjId) -> Self {
        Self {
            mapper,
            phase_nr: Some(phase_nr),
            author: None,
            review_obj: Some(review_obj),
            reviewers: Vec::new(),
            state: AllocationState::Unbound,
        }
    }

    pub fn new(
        mapper: &'m Mapper,
        phase_nr: PhaseNr,
        author: UserId,
        review_obj: ReviewObjId,
        reviewers: Vec<UserId>,
    ) -> Self {
        Self {
            mapper,
            phase_nr: Some(phase_nr),
            author: Some(author),
            review_obj: Some(review_obj),
            reviewers: distinct(reviewers),
            state: AllocationState::Unbound,
        }
    }

    /// Hydrate from storage.
    ///
    /// Returns `Ok(true)` and replaces every field when at least as many
    /// reviewers are stored for the key as the phase requires. Returns
    /// `Ok(false)` without touching any field otherwise.
    pub async fn load_from_db(
        &mut self,
        phase_nr: PhaseNr,
        review_obj: ReviewObjId,
        author: UserId,
    ) -> Result<bool, ReviewError> {
        let key = AllocationKey::new(phase_nr, review_obj, author);
        let rows = self.mapper.repository().allocation_rows(&key).await?;
        let quorum = self.mapper.quorum(review_obj, phase_nr).await?;

        let reviewers = distinct(rows.into_iter().map(|row| row.reviewer).collect());
        if reviewers.len() < quorum as usize {
            debug!(
                %key,
                stored = reviewers.len(),
                quorum,
                "Allocation below quorum, treating as absent"
            );
            if self.state != AllocationState::Dirty {
                self.state = AllocationState::Absent;
            }
            return Ok(false);
        }

        self.phase_nr = Some(phase_nr);
        self.review_obj = Some(review_obj);
        self.author = Some(author);
        self.reviewers = reviewers;
        self.state = AllocationState::Loaded;
        Ok(true)
    }

    /// Replace the stored reviewer set for this allocation's key with the
    /// in-memory one.
    ///
    /// Returns `Ok(false)` with no storage access if the phase, container or
    /// author is missing. Rows are keyed by author as well, so without one
    /// there is no key to replace under.
    pub async fn store_to_db(&mut self) -> Result<bool, ReviewError> {
        let Some(key) = self.key() else {
            return Ok(false);
        };

        self.mapper
            .repository()
            .replace_allocation(&key, &self.reviewers)
            .await?;
        self.mapper
            .invalidate(CacheBucket::ReviewerAllocations)
            .await;

        info!(%key, reviewers = self.reviewers.len(), "Stored reviewer allocation");
        self.state = AllocationState::Loaded;
        Ok(true)
    }

    /// Delete the allocations of every author in this allocation's phase.
    ///
    /// Returns `Ok(false)` with no storage access if the phase or container
    /// is missing.
    pub async fn delete_from_db(&mut self) -> Result<bool, ReviewError> {
        let (Some(phase_nr), Some(review_obj)) = (self.phase_nr, self.review_obj) else {
            return Ok(false);
        };

        let removed = self
            .mapper
            .repository()
            .delete_allocations(review_obj, phase_nr)
            .await?;
        self.mapper
            .invalidate(CacheBucket::ReviewerAllocations)
            .await;

        info!(%review_obj, %phase_nr, removed, "Deleted reviewer allocations");
        self.state = AllocationState::Absent;
        Ok(true)
    }

    /// Storage key, once phase, container and author are all set.
    pub fn key(&self) -> Option<AllocationKey> {
        Some(AllocationKey::new(
            self.phase_nr?,
            self.review_obj?,
            self.author?,
        ))
    }

    pub fn state(&self) -> AllocationState {
        self.state
    }

    pub fn phase_nr(&self) -> Option<PhaseNr> {
        self.phase_nr
    }

    pub fn review_obj(&self) -> Option<ReviewObjId> {
        self.review_obj
    }

    pub fn author(&self) -> Option<UserId> {
        self.author
    }

    pub fn set_author(&mut self, author: UserId) {
        self.author = Some(author);
        self.state = AllocationState::Dirty;
    }

    pub fn reviewers(&self) -> &[UserId] {
        &self.reviewers
    }

    /// Replace the reviewer set wholesale. Repeated ids are kept once.
    pub fn set_reviewers(&mut self, reviewers: Vec<UserId>) {
        self.reviewers = distinct(reviewers);
        self.state = AllocationState::Dirty;
    }
}

/// Drop repeated ids, keeping first occurrences in order.
fn distinct(ids: Vec<UserId>) -> Vec<UserId> {
    let mut seen = std::collections::HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}
