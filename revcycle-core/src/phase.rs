//! Per-phase configuration of a review cycle.

use serde::{Deserialize, Serialize};

use crate::filter::{FieldValue, Filterable};
use crate::ids::{PhaseNr, ReviewObjId};

/// Configuration of one review phase.
///
/// `nr_reviewers` is the quorum: an allocation for this phase is only
/// complete once it holds at least that many reviewers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CyclePhase {
    pub review_obj: ReviewObjId,
    pub phase_nr: PhaseNr,
    pub nr_reviewers: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhaseField {
    ReviewObj,
    PhaseNr,
    NrReviewers,
}

impl Filterable for CyclePhase {
    type Field = CyclePhaseField;
    const ENTITY: &'static str = "cycle phase";
    const FIELDS: &'static [(&'static str, CyclePhaseField)] = &[
        ("review_obj", CyclePhaseField::ReviewObj),
        ("phase_nr", CyclePhaseField::PhaseNr),
        ("nr_reviewers", CyclePhaseField::NrReviewers),
    ];

    fn field_value(&self, field: CyclePhaseField) -> FieldValue {
        match field {
            CyclePhaseField::ReviewObj => self.review_obj.0.into(),
            CyclePhaseField::PhaseNr => self.phase_nr.0.into(),
            CyclePhaseField::NrReviewers => i64::from(self.nr_reviewers).into(),
        }
    }
}
