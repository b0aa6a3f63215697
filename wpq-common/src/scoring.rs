//! Preference scoring engine
//!
//! Maps a list of answered questions to four 0-10 preference dimensions:
//! 1. Validate every response against the question bank
//! 2. Sum the weights of every matching rule into per-dimension raw totals
//! 3. Rescale each total linearly: `round(raw / 15 * 10)`, clamped to 0..=10
//!
//! The rescaling does not account for how many questions were answered, so a
//! partially completed quiz scores low across the board.

use crate::models::PreferenceScores;
use crate::questions::{rules_for, Dimension, QuestionBank, QuestionResponse};
use thiserror::Error;
use tracing::warn;

/// Raw total treated as a full score of 10
pub const SCORE_NORMALIZATION_MAX: f64 = 15.0;

/// Upper bound of every normalized dimension
pub const MAX_DIMENSION_SCORE: u8 = 10;

/// A single malformed response
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationIssue {
    #[error("unknown question '{question_id}'")]
    UnknownQuestion { question_id: String },

    #[error("answer '{answer_id}' is not an option for question '{question_id}'")]
    InvalidAnswer { question_id: String, answer_id: String },
}

/// Validation failure listing every malformed response
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid quiz responses: {}", join_issues(.issues))]
pub struct ScoringError {
    pub issues: Vec<ValidationIssue>,
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Validate responses, returning every problem found
pub fn validate_responses(
    responses: &[QuestionResponse],
    bank: &QuestionBank,
) -> Result<(), ScoringError> {
    let issues: Vec<ValidationIssue> = responses
        .iter()
        .filter_map(|response| match bank.by_id(&response.question_id) {
            None => Some(ValidationIssue::UnknownQuestion {
                question_id: response.question_id.clone(),
            }),
            Some(question) if !question.has_option(&response.answer_id) => {
                Some(ValidationIssue::InvalidAnswer {
                    question_id: response.question_id.clone(),
                    answer_id: response.answer_id.clone(),
                })
            }
            Some(_) => None,
        })
        .collect();

    if issues.is_empty() {
        Ok(())
    } else {
        Err(ScoringError { issues })
    }
}

/// Rescale a raw weight total onto 0..=10
pub fn normalize(raw: u32) -> u8 {
    let scaled = (raw as f64 / SCORE_NORMALIZATION_MAX * MAX_DIMENSION_SCORE as f64).round();
    scaled.clamp(0.0, MAX_DIMENSION_SCORE as f64) as u8
}

/// Compute preference scores for a response set
///
/// Pure and deterministic. An empty response set scores all zeros.
pub fn calculate_scores(
    responses: &[QuestionResponse],
    bank: &QuestionBank,
) -> Result<PreferenceScores, ScoringError> {
    validate_responses(responses, bank)?;

    let mut collaboration = 0u32;
    let mut formality = 0u32;
    let mut technology = 0u32;
    let mut wellness = 0u32;

    for response in responses {
        // Validated above
        let Some(question) = bank.by_id(&response.question_id) else {
            continue;
        };
        for rule in rules_for(question.category, &response.answer_id) {
            let total = match rule.dimension {
                Dimension::Collaboration => &mut collaboration,
                Dimension::Formality => &mut formality,
                Dimension::Technology => &mut technology,
                Dimension::Wellness => &mut wellness,
            };
            *total += rule.weight;
        }
    }

    Ok(PreferenceScores {
        collaboration: normalize(collaboration),
        formality: normalize(formality),
        technology: normalize(technology),
        wellness: normalize(wellness),
    })
}

/// Compute scores, substituting all zeros when validation fails
pub fn calculate_scores_or_default(
    responses: &[QuestionResponse],
    bank: &QuestionBank,
) -> PreferenceScores {
    match calculate_scores(responses, bank) {
        Ok(scores) => scores,
        Err(e) => {
            warn!(issues = e.issues.len(), "Score calculation rejected input, using zero scores: {}", e);
            PreferenceScores::ZERO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bank() -> QuestionBank {
        QuestionBank::standard()
    }

    fn all_answers(answer: &str) -> Vec<QuestionResponse> {
        bank()
            .questions()
            .iter()
            .map(|q| QuestionResponse::new(q.id.clone(), answer))
            .collect()
    }

    #[test]
    fn test_empty_responses_score_zero() {
        assert_eq!(calculate_scores(&[], &bank()).unwrap(), PreferenceScores::ZERO);
    }

    #[test]
    fn test_all_strongest_answers_score_ten() {
        let scores = calculate_scores(&all_answers("a"), &bank()).unwrap();
        assert_eq!(scores, PreferenceScores::new(10, 10, 10, 10));
    }

    #[test]
    fn test_all_opposite_answers() {
        // d answers only nudge secondary dimensions: 3 workspace d → wellness 3,
        // 3 technology d → formality 3. round(3/15*10) = 2.
        let scores = calculate_scores(&all_answers("d"), &bank()).unwrap();
        assert_eq!(scores, PreferenceScores::new(0, 2, 0, 2));
    }

    #[test]
    fn test_cross_dimension_rules_accumulate() {
        // Communication c: formality 1 + collaboration 1, three times.
        // Wellbeing c: wellness 1 + collaboration 1, three times.
        let responses: Vec<_> = ["q4", "q5", "q6", "q10", "q11", "q12"]
            .iter()
            .map(|id| QuestionResponse::new(*id, "c"))
            .collect();
        let scores = calculate_scores(&responses, &bank()).unwrap();
        // collaboration raw 6 → 4, formality raw 3 → 2, wellness raw 3 → 2
        assert_eq!(scores, PreferenceScores::new(4, 2, 0, 2));
    }

    #[test]
    fn test_normalize_rounds_and_clamps() {
        assert_eq!(normalize(0), 0);
        // 3/15*10 = 2.0
        assert_eq!(normalize(3), 2);
        // 9/15*10 = 6.0
        assert_eq!(normalize(9), 6);
        // 13/15*10 = 8.67
        assert_eq!(normalize(13), 9);
        assert_eq!(normalize(15), 10);
        assert_eq!(normalize(40), 10);
    }

    #[test]
    fn test_unknown_question_returns_validation_error() {
        let responses = vec![
            QuestionResponse::new("q1", "a"),
            QuestionResponse::new("q99", "a"),
        ];
        let err = calculate_scores(&responses, &bank()).unwrap_err();
        assert_eq!(
            err.issues,
            vec![ValidationIssue::UnknownQuestion {
                question_id: "q99".into()
            }]
        );
    }

    #[test]
    fn test_invalid_answer_returns_validation_error() {
        let responses = vec![QuestionResponse::new("q1", "z")];
        let err = calculate_scores(&responses, &bank()).unwrap_err();
        assert!(matches!(
            err.issues.as_slice(),
            [ValidationIssue::InvalidAnswer { .. }]
        ));
        assert!(err.to_string().contains("'z'"));
    }

    #[test]
    fn test_error_message_lists_every_issue() {
        let responses = vec![QuestionResponse::new("q99", "a"), QuestionResponse::new("q1", "z")];
        let err = calculate_scores(&responses, &bank()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid quiz responses: unknown question 'q99'; answer 'z' is not an option for question 'q1'"
        );
        let source: &dyn std::error::Error = &err;
        assert!(source.source().is_none());
    }

    #[test]
    fn test_or_default_falls_back_to_zero() {
        let responses = vec![
            QuestionResponse::new("q1", "a"),
            QuestionResponse::new("nope", "a"),
        ];
        assert_eq!(
            calculate_scores_or_default(&responses, &bank()),
            PreferenceScores::ZERO
        );
    }

    #[test]
    fn test_scores_always_in_range() {
        let bank = bank();
        for answer in ["a", "b", "c", "d"] {
            let mut responses = all_answers(answer);
            // Duplicate answers must not push any dimension past 10
            responses.extend(all_answers(answer));
            let scores = calculate_scores(&responses, &bank).unwrap();
            for value in [
                scores.collaboration,
                scores.formality,
                scores.technology,
                scores.wellness,
            ] {
                assert!(value <= MAX_DIMENSION_SCORE);
            }
        }
    }

    #[test]
    fn test_deterministic() {
        let responses = all_answers("b");
        let first = calculate_scores(&responses, &bank()).unwrap();
        let second = calculate_scores(&responses, &bank()).unwrap();
        assert_eq!(first, second);
        // b answers: 3 per question, 3 questions per dimension → raw 9 → 6
        assert_eq!(first, PreferenceScores::new(6, 6, 6, 6));
    }
}
