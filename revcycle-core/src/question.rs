//! Questions taking part in a review cycle.

use serde::{Deserialize, Serialize};

use crate::filter::{FieldValue, Filterable};
use crate::ids::{PhaseNr, QuestionId, ReviewObjId, UserId};

/// One authored question under review.
///
/// Created by the authoring flow outside this crate. The review cycle only
/// moves it between phases and marks it finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleQuestion {
    pub id: QuestionId,
    pub review_obj: ReviewObjId,
    pub author: UserId,
    pub phase_nr: PhaseNr,
    pub finished: bool,
    /// Display title, passed through untouched.
    pub title: String,
}

impl CycleQuestion {
    /// Take the question out of the review cycle.
    pub fn finish(&mut self) {
        self.finished = true;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleQuestionField {
    Id,
    ReviewObj,
    Author,
    PhaseNr,
    Finished,
    Title,
}

impl Filterable for CycleQuestion {
    type Field = CycleQuestionField;
    const ENTITY: &'static str = "cycle question";
    const FIELDS: &'static [(&'static str, CycleQuestionField)] = &[
        ("id", CycleQuestionField::Id),
        ("review_obj", CycleQuestionField::ReviewObj),
        ("author", CycleQuestionField::Author),
        ("phase_nr", CycleQuestionField::PhaseNr),
        ("finished", CycleQuestionField::Finished),
        ("title", CycleQuestionField::Title),
    ];

    fn field_value(&self, field: CycleQuestionField) -> FieldValue {
        match field {
            CycleQuestionField::Id => self.id.0.into(),
            CycleQuestionField::ReviewObj => self.review_obj.0.into(),
            CycleQuestionField::Author => self.author.0.into(),
            CycleQuestionField::PhaseNr => self.phase_nr.0.into(),
            CycleQuestionField::Finished => self.finished.into(),
            CycleQuestionField::Title => self.title.as_str().into(),
        }
    }
}
