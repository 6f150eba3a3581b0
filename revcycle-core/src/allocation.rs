//! Stored shape of reviewer allocations.
//!
//! An allocation is stored as one row per reviewer under its
//! `(phase_nr, review_obj, author)` key.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::filter::{FieldValue, Filterable};
use crate::ids::{PhaseNr, ReviewObjId, UserId};

/// Key of one allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AllocationKey {
    pub phase_nr: PhaseNr,
    pub review_obj: ReviewObjId,
    pub author: UserId,
}

impl AllocationKey {
    pub fn new(phase_nr: PhaseNr, review_obj: ReviewObjId, author: UserId) -> Self {
        Self {
            phase_nr,
            review_obj,
            author,
        }
    }
}

impl fmt::Display for AllocationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "phase {} / review object {} / author {}",
            self.phase_nr, self.review_obj, self.author
        )
    }
}

/// One reviewer assigned under an allocation key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRow {
    pub phase_nr: PhaseNr,
    pub review_obj: ReviewObjId,
    pub author: UserId,
    pub reviewer: UserId,
}

impl AllocationRow {
    pub fn key(&self) -> AllocationKey {
        AllocationKey::new(self.phase_nr, self.review_obj, self.author)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationRowField {
    PhaseNr,
    ReviewObj,
    Author,
    Reviewer,
}

impl Filterable for AllocationRow {
    type Field = AllocationRowField;
    const ENTITY: &'static str = "reviewer allocation";
    const FIELDS: &'static [(&'static str, AllocationRowField)] = &[
        ("phase_nr", AllocationRowField::PhaseNr),
        ("review_obj", AllocationRowField::ReviewObj),
        ("author", AllocationRowField::Author),
        ("reviewer", AllocationRowField::Reviewer),
    ];

    fn field_value(&self, field: AllocationRowField) -> FieldValue {
        match field {
            AllocationRowField::PhaseNr => self.phase_nr.0.into(),
            AllocationRowField::ReviewObj => self.review_obj.0.into(),
            AllocationRowField::Author => self.author.0.into(),
            AllocationRowField::Reviewer => self.reviewer.0.into(),
        }
    }
}
