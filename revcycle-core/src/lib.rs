//! Domain types for peer review cycles.
//!
//! Authors submit questions, reviewers are allocated per phase and author,
//! and every review is scored along a fixed set of rubrics. This crate holds
//! the plain data and the attribute filter; persistence and caching live in
//! `revcycle-store`.

pub mod allocation;
pub mod filter;
pub mod form;
pub mod ids;
pub mod phase;
pub mod question;
pub mod rubric;

pub use allocation::{AllocationKey, AllocationRow, AllocationRowField};
pub use filter::{Conditions, FieldValue, Filterable, ResolvedConditions, UnknownAttributeError};
pub use form::{AspectRatings, ReviewForm, ReviewFormField, ReviewScores};
pub use ids::*;
pub use phase::{CyclePhase, CyclePhaseField};
pub use question::{CycleQuestion, CycleQuestionField};
pub use rubric::{Evaluation, Expertise, KnowledgeDimension, Rating, Taxonomy};
