//! Review form operations for the SQLite repository.
//!
//! Rubric answers are stored as their integer codes, one nullable column per
//! rubric, so unanswered rubrics stay `NULL` until the form is submitted.

use revcycle_core::{
    AspectRatings, Evaluation, Expertise, FormId, KnowledgeDimension, QuestionId, Rating,
    ReviewForm, ReviewObjId, ReviewScores, Taxonomy, UserId,
};
use rusqlite::{params, OptionalExtension};

use super::{i64_to_id, id_to_i64, join_error, lock, SqliteRepository};
use crate::error::RepositoryError;

const FORM_COLUMNS: &str = "id, review_obj, question_id, reviewer, submitted, \
     desc_corr, desc_relv, desc_expr, quest_corr, quest_relv, quest_expr, \
     answ_corr, answ_relv, answ_expr, taxonomy, knowledge_dimension, evaluation, expertise, \
     comment";

/// A `review_forms` row as SQLite returns it.
struct FormRow {
    id: i64,
    review_obj: i64,
    question_id: i64,
    reviewer: i64,
    submitted: bool,
    /// desc, quest, answ triples of (correctness, relevance, expression)
    ratings: [Option<i64>; 9],
    taxonomy: Option<i64>,
    knowledge_dimension: Option<i64>,
    evaluation: Option<i64>,
    expertise: Option<i64>,
    comment: String,
}

impl FormRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let mut ratings = [None; 9];
        for (i, slot) in ratings.iter_mut().enumerate() {
            *slot = row.get(5 + i)?;
        }
        Ok(Self {
            id: row.get(0)?,
            review_obj: row.get(1)?,
            question_id: row.get(2)?,
            reviewer: row.get(3)?,
            submitted: row.get(4)?,
            ratings,
            taxonomy: row.get(14)?,
            knowledge_dimension: row.get(15)?,
            evaluation: row.get(16)?,
            expertise: row.get(17)?,
            comment: row.get(18)?,
        })
    }

    fn decode(self) -> Result<ReviewForm, RepositoryError> {
        let mut r = [None; 9];
        for (slot, code) in r.iter_mut().zip(self.ratings) {
            *slot = decode_code(code, Rating::from_code, "rating code")?;
        }
        let aspect = |i: usize| AspectRatings {
            correctness: r[i],
            relevance: r[i + 1],
            expression: r[i + 2],
        };

        let scores = ReviewScores {
            description: aspect(0),
            question: aspect(3),
            answers: aspect(6),
            taxonomy: decode_code(self.taxonomy, Taxonomy::from_code, "taxonomy code")?,
            knowledge_dimension: decode_code(
                self.knowledge_dimension,
                KnowledgeDimension::from_code,
                "knowledge dimension code",
            )?,
            evaluation: decode_code(self.evaluation, Evaluation::from_code, "evaluation code")?,
            expertise: decode_code(self.expertise, Expertise::from_code, "expertise code")?,
            comment: self.comment,
        };

        Ok(ReviewForm {
            id: FormId(i64_to_id(self.id, "review form id")?),
            review_obj: ReviewObjId(i64_to_id(self.review_obj, "review form id")?),
            question_id: QuestionId(i64_to_id(self.question_id, "review form id")?),
            reviewer: UserId(i64_to_id(self.reviewer, "review form id")?),
            submitted: self.submitted,
            scores,
        })
    }
}

fn decode_code<T>(
    code: Option<i64>,
    from_code: fn(i64) -> Option<T>,
    what: &'static str,
) -> Result<Option<T>, RepositoryError> {
    match code {
        None => Ok(None),
        Some(code) => from_code(code)
            .map(Some)
            .ok_or_else(|| RepositoryError::corruption(what)),
    }
}

fn rating_codes(scores: &ReviewScores) -> [Option<i64>; 9] {
    let mut codes = [None; 9];
    let aspects = [&scores.description, &scores.question, &scores.answers];
    for (i, aspect) in aspects.iter().enumerate() {
        codes[i * 3] = aspect.correctness.map(Rating::code);
        codes[i * 3 + 1] = aspect.relevance.map(Rating::code);
        codes[i * 3 + 2] = aspect.expression.map(Rating::code);
    }
    codes
}

impl SqliteRepository {
    pub(super) async fn review_forms_impl(
        &self,
        review_obj: ReviewObjId,
    ) -> Result<Vec<ReviewForm>, RepositoryError> {
        let conn = self.conn.clone();
        let obj = id_to_i64(review_obj.0, "review_forms")?;

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn, "review_forms")?;

            let sql = format!(
                "SELECT {} FROM review_forms WHERE review_obj = ?1 ORDER BY id",
                FORM_COLUMNS
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| RepositoryError::storage("review_forms", e.to_string()))?;
            let rows = stmt
                .query_map(params![obj], FormRow::read)
                .map_err(|e| RepositoryError::storage("review_forms", e.to_string()))?;

            let mut forms = Vec::new();
            for row in rows {
                let row = row.map_err(|e| RepositoryError::storage("review_forms", e.to_string()))?;
                forms.push(row.decode()?);
            }
            Ok(forms)
        })
        .await
        .map_err(|e| join_error("review_forms", e))?
    }

    pub(super) async fn review_form_impl(
        &self,
        id: FormId,
    ) -> Result<Option<ReviewForm>, RepositoryError> {
        let conn = self.conn.clone();
        let id = id_to_i64(id.0, "review_form")?;

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn, "review_form")?;

            let sql = format!("SELECT {} FROM review_forms WHERE id = ?1", FORM_COLUMNS);
            let row = conn
                .query_row(&sql, params![id], FormRow::read)
                .optional()
                .map_err(|e| RepositoryError::storage("review_form", e.to_string()))?;

            row.map(FormRow::decode).transpose()
        })
        .await
        .map_err(|e| join_error("review_form", e))?
    }

    pub(super) async fn create_review_form_impl(
        &self,
        review_obj: ReviewObjId,
        question_id: QuestionId,
        reviewer: UserId,
    ) -> Result<ReviewForm, RepositoryError> {
        let conn = self.conn.clone();
        let obj = id_to_i64(review_obj.0, "create_review_form")?;
        let question = id_to_i64(question_id.0, "create_review_form")?;
        let reviewer_id = id_to_i64(reviewer.0, "create_review_form")?;

        let id = tokio::task::spawn_blocking(move || {
            let conn = lock(&conn, "create_review_form")?;

            conn.execute(
                "INSERT INTO review_forms (review_obj, question_id, reviewer) VALUES (?1, ?2, ?3)",
                params![obj, question, reviewer_id],
            )
            .map_err(|e| RepositoryError::storage("create_review_form", e.to_string()))?;

            Ok::<_, RepositoryError>(conn.last_insert_rowid())
        })
        .await
        .map_err(|e| join_error("create_review_form", e))??;

        Ok(ReviewForm {
            id: FormId(i64_to_id(id, "review form id")?),
            review_obj,
            question_id,
            reviewer,
            submitted: false,
            scores: ReviewScores::default(),
        })
    }

    pub(super) async fn update_review_form_impl(
        &self,
        form: &ReviewForm,
    ) -> Result<(), RepositoryError> {
        let conn = self.conn.clone();
        let id = id_to_i64(form.id.0, "update_review_form")?;
        let obj = id_to_i64(form.review_obj.0, "update_review_form")?;
        let question = id_to_i64(form.question_id.0, "update_review_form")?;
        let reviewer = id_to_i64(form.reviewer.0, "update_review_form")?;
        let submitted = form.submitted;
        let r = rating_codes(&form.scores);
        let taxonomy = form.scores.taxonomy.map(Taxonomy::code);
        let knowledge = form.scores.knowledge_dimension.map(KnowledgeDimension::code);
        let evaluation = form.scores.evaluation.map(Evaluation::code);
        let expertise = form.scores.expertise.map(Expertise::code);
        let comment = form.scores.comment.clone();
        let form_id = form.id;

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn, "update_review_form")?;

            let updated = conn
                .execute(
                    "UPDATE review_forms SET
                         review_obj = ?2, question_id = ?3, reviewer = ?4, submitted = ?5,
                         desc_corr = ?6, desc_relv = ?7, desc_expr = ?8,
                         quest_corr = ?9, quest_relv = ?10, quest_expr = ?11,
                         answ_corr = ?12, answ_relv = ?13, answ_expr = ?14,
                         taxonomy = ?15, knowledge_dimension = ?16, evaluation = ?17,
                         expertise = ?18, comment = ?19
                     WHERE id = ?1",
                    params![
                        id, obj, question, reviewer, submitted, r[0], r[1], r[2], r[3], r[4],
                        r[5], r[6], r[7], r[8], taxonomy, knowledge, evaluation, expertise,
                        comment
                    ],
                )
                .map_err(|e| RepositoryError::storage("update_review_form", e.to_string()))?;

            if updated == 0 {
                return Err(RepositoryError::storage(
                    "update_review_form",
                    format!("review form {} does not exist", form_id),
                ));
            }
            Ok(())
        })
        .await
        .map_err(|e| join_error("update_review_form", e))?
    }
}
