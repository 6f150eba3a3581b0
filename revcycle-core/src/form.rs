//! Review forms: one reviewer's scores for one question.

use serde::{Deserialize, Serialize};

use crate::filter::{FieldValue, Filterable};
use crate::ids::{FormId, QuestionId, ReviewObjId, UserId};
use crate::rubric::{Evaluation, Expertise, KnowledgeDimension, Rating, Taxonomy};

/// Ratings of one part of a question along the three aspects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AspectRatings {
    pub correctness: Option<Rating>,
    pub relevance: Option<Rating>,
    pub expression: Option<Rating>,
}

impl AspectRatings {
    pub fn new(correctness: Rating, relevance: Rating, expression: Rating) -> Self {
        Self {
            correctness: Some(correctness),
            relevance: Some(relevance),
            expression: Some(expression),
        }
    }

    fn is_complete(&self) -> bool {
        self.correctness.is_some() && self.relevance.is_some() && self.expression.is_some()
    }
}

/// Everything a reviewer fills in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewScores {
    pub description: AspectRatings,
    pub question: AspectRatings,
    pub answers: AspectRatings,
    pub taxonomy: Option<Taxonomy>,
    pub knowledge_dimension: Option<KnowledgeDimension>,
    pub evaluation: Option<Evaluation>,
    pub expertise: Option<Expertise>,
    #[serde(default)]
    pub comment: String,
}

impl ReviewScores {
    /// Name of the first unanswered rubric, or `None` once every rubric has a value.
    ///
    /// The comment is free text and never required.
    pub fn missing(&self) -> Option<&'static str> {
        if !self.description.is_complete() {
            Some("description")
        } else if !self.question.is_complete() {
            Some("question")
        } else if !self.answers.is_complete() {
            Some("answers")
        } else if self.taxonomy.is_none() {
            Some("taxonomy")
        } else if self.knowledge_dimension.is_none() {
            Some("knowledge_dimension")
        } else if self.evaluation.is_none() {
            Some("evaluation")
        } else if self.expertise.is_none() {
            Some("expertise")
        } else {
            None
        }
    }
}

/// One reviewer's response to one cycle question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewForm {
    pub id: FormId,
    pub review_obj: ReviewObjId,
    pub question_id: QuestionId,
    pub reviewer: UserId,
    pub submitted: bool,
    pub scores: ReviewScores,
}

impl ReviewForm {
    /// Record the reviewer's scores and mark the form submitted.
    pub fn submit(&mut self, scores: ReviewScores) {
        self.scores = scores;
        self.submitted = true;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewFormField {
    Id,
    ReviewObj,
    QuestionId,
    Reviewer,
    Submitted,
    Taxonomy,
    KnowledgeDimension,
    Evaluation,
    Expertise,
}

impl Filterable for ReviewForm {
    type Field = ReviewFormField;
    const ENTITY: &'static str = "review form";
    const FIELDS: &'static [(&'static str, ReviewFormField)] = &[
        ("id", ReviewFormField::Id),
        ("review_obj", ReviewFormField::ReviewObj),
        ("question_id", ReviewFormField::QuestionId),
        ("reviewer", ReviewFormField::Reviewer),
        ("submitted", ReviewFormField::Submitted),
        ("taxonomy", ReviewFormField::Taxonomy),
        ("knowledge_dimension", ReviewFormField::KnowledgeDimension),
        ("evaluation", ReviewFormField::Evaluation),
        ("expertise", ReviewFormField::Expertise),
    ];

    fn field_value(&self, field: ReviewFormField) -> FieldValue {
        let scores = &self.scores;
        match field {
            ReviewFormField::Id => self.id.0.into(),
            ReviewFormField::ReviewObj => self.review_obj.0.into(),
            ReviewFormField::QuestionId => self.question_id.0.into(),
            ReviewFormField::Reviewer => self.reviewer.0.into(),
            ReviewFormField::Submitted => self.submitted.into(),
            ReviewFormField::Taxonomy => scores.taxonomy.map(Taxonomy::code).into(),
            ReviewFormField::KnowledgeDimension => {
                scores.knowledge_dimension.map(KnowledgeDimension::code).into()
            }
            ReviewFormField::Evaluation => scores.evaluation.map(Evaluation::code).into(),
            ReviewFormField::Expertise => scores.expertise.map(Expertise::code).into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Conditions;

    fn complete_scores() -> ReviewScores {
        ReviewScores {
            description: AspectRatings::new(Rating::Good, Rating::Good, Rating::Correctable),
            question: AspectRatings::new(Rating::Good, Rating::Good, Rating::Good),
            answers: AspectRatings::new(Rating::Correctable, Rating::Good, Rating::Good),
            taxonomy: Some(Taxonomy::Apply),
            knowledge_dimension: Some(KnowledgeDimension::Procedural),
            evaluation: Some(Evaluation::Accepted),
            expertise: Some(Expertise::High),
            comment: String::new(),
        }
    }

    fn blank_form() -> ReviewForm {
        ReviewForm {
            id: FormId(1),
            review_obj: ReviewObjId(10),
            question_id: QuestionId(100),
            reviewer: UserId(5),
            submitted: false,
            scores: ReviewScores::default(),
        }
    }

    #[test]
    fn test_missing_reports_first_gap() {
        assert_eq!(ReviewScores::default().missing(), Some("description"));

        let mut scores = complete_scores();
        scores.expertise = None;
        assert_eq!(scores.missing(), Some("expertise"));

        assert_eq!(complete_scores().missing(), None);
    }

    #[test]
    fn test_submit_sets_scores_and_flag() {
        let mut form = blank_form();
        form.submit(complete_scores());
        assert!(form.submitted);
        assert_eq!(form.scores.taxonomy, Some(Taxonomy::Apply));
    }

    #[test]
    fn test_unset_rubric_filters_as_null() {
        let form = blank_form();
        let resolved = Conditions::new()
            .with("evaluation", FieldValue::Null)
            .with("submitted", false)
            .resolve::<ReviewForm>()
            .unwrap();
        assert!(resolved.matches(&form));
    }

    #[test]
    fn test_rubric_filters_by_code() {
        let mut form = blank_form();
        form.submit(complete_scores());
        let resolved = Conditions::new()
            .with("evaluation", Evaluation::Accepted.code())
            .resolve::<ReviewForm>()
            .unwrap();
        assert!(resolved.matches(&form));
    }
}
