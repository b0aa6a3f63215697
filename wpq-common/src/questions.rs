//! Built-in question bank and scoring rule table
//!
//! Questions are addressed two ways: attendees store answers by question
//! *index* (position in the bank), while the scoring engine validates and
//! scores by question *id*. [`QuestionBank::responses_for`] bridges the two.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Thematic category of a question; scoring rules are keyed by category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionCategory {
    Workspace,
    Communication,
    Technology,
    Wellbeing,
}

/// One of the four preference dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Collaboration,
    Formality,
    Technology,
    Wellness,
}

/// A selectable answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerOption {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub category: QuestionCategory,
    pub text: String,
    pub options: Vec<AnswerOption>,
}

impl Question {
    pub fn has_option(&self, answer_id: &str) -> bool {
        self.options.iter().any(|o| o.id == answer_id)
    }
}

/// `(category, answer) → (dimension, weight)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreRule {
    pub category: QuestionCategory,
    pub answer_id: &'static str,
    pub dimension: Dimension,
    pub weight: u32,
}

const fn rule(
    category: QuestionCategory,
    answer_id: &'static str,
    dimension: Dimension,
    weight: u32,
) -> ScoreRule {
    ScoreRule {
        category,
        answer_id,
        dimension,
        weight,
    }
}

/// Static rule table. Options run from `a` (strongest) to `d` (opposite pole);
/// a few answers also nudge a second dimension.
pub const SCORE_RULES: &[ScoreRule] = &[
    rule(QuestionCategory::Workspace, "a", Dimension::Collaboration, 5),
    rule(QuestionCategory::Workspace, "b", Dimension::Collaboration, 3),
    rule(QuestionCategory::Workspace, "c", Dimension::Collaboration, 1),
    rule(QuestionCategory::Workspace, "d", Dimension::Wellness, 1),
    rule(QuestionCategory::Communication, "a", Dimension::Formality, 5),
    rule(QuestionCategory::Communication, "b", Dimension::Formality, 3),
    rule(QuestionCategory::Communication, "c", Dimension::Formality, 1),
    rule(QuestionCategory::Communication, "c", Dimension::Collaboration, 1),
    rule(QuestionCategory::Technology, "a", Dimension::Technology, 5),
    rule(QuestionCategory::Technology, "b", Dimension::Technology, 3),
    rule(QuestionCategory::Technology, "c", Dimension::Technology, 1),
    rule(QuestionCategory::Technology, "d", Dimension::Formality, 1),
    rule(QuestionCategory::Wellbeing, "a", Dimension::Wellness, 5),
    rule(QuestionCategory::Wellbeing, "b", Dimension::Wellness, 3),
    rule(QuestionCategory::Wellbeing, "c", Dimension::Wellness, 1),
    rule(QuestionCategory::Wellbeing, "c", Dimension::Collaboration, 1),
];

/// Rules matching one answer within a category
pub fn rules_for(
    category: QuestionCategory,
    answer_id: &str,
) -> impl Iterator<Item = &'static ScoreRule> + '_ {
    SCORE_RULES
        .iter()
        .filter(move |r| r.category == category && r.answer_id == answer_id)
}

/// One answered question, addressed by question id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionResponse {
    pub question_id: String,
    pub answer_id: String,
}

impl QuestionResponse {
    pub fn new(question_id: impl Into<String>, answer_id: impl Into<String>) -> Self {
        Self {
            question_id: question_id.into(),
            answer_id: answer_id.into(),
        }
    }
}

/// Ordered set of questions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionBank {
    questions: Vec<Question>,
}

impl QuestionBank {
    pub fn new(questions: Vec<Question>) -> Self {
        Self { questions }
    }

    /// The built-in 12-question workplace quiz
    pub fn standard() -> Self {
        use QuestionCategory::*;

        let table: [(QuestionCategory, &str, [&str; 4]); 12] = [
            (Workspace, "Where do you do your best work?", [
                "Open team space, surrounded by people",
                "A mix of shared tables and quiet corners",
                "Mostly at my own desk",
                "A private, quiet office or at home",
            ]),
            (Workspace, "How should big decisions get made?", [
                "Workshops with the whole team",
                "A small group weighs in",
                "The owner decides after a quick check-in",
                "The owner decides alone",
            ]),
            (Workspace, "Your ideal team size?", [
                "Ten or more",
                "Five to nine",
                "Two to four",
                "Just me",
            ]),
            (Communication, "How do you prefer to receive feedback?", [
                "Scheduled written reviews",
                "Regular one-on-ones",
                "Quick chats whenever",
                "Emoji reactions are fine",
            ]),
            (Communication, "What does the dress code look like?", [
                "Suits and ties",
                "Business casual",
                "Smart casual",
                "Whatever is comfortable",
            ]),
            (Communication, "How do you address senior leaders?", [
                "By title and surname",
                "Formally in meetings, casually otherwise",
                "First names, politely",
                "Same as anyone else",
            ]),
            (Technology, "A new collaboration tool rolls out. You...", [
                "Already tried the beta",
                "Adopt it in the first week",
                "Wait until the team moves over",
                "Stick with email and meetings",
            ]),
            (Technology, "Meetings should happen...", [
                "Async, recorded and searchable",
                "On video by default",
                "Hybrid, people choose",
                "Face to face, in a room",
            ]),
            (Technology, "AI assistants at work are...", [
                "Essential, I use them daily",
                "Useful for some tasks",
                "Worth watching",
                "Not for me",
            ]),
            (Wellbeing, "The most valuable benefit?", [
                "Mental health support",
                "Flexible hours",
                "Social events",
                "A higher salary",
            ]),
            (Wellbeing, "Messages after hours?", [
                "Never, the day ends at the day's end",
                "Only for emergencies",
                "Occasionally, with the team",
                "Always on",
            ]),
            (Wellbeing, "Your ideal schedule?", [
                "Four-day week",
                "Flexible start and finish",
                "Core hours with the team",
                "Whatever the work needs",
            ]),
        ];

        let questions = table
            .iter()
            .enumerate()
            .map(|(i, (category, text, options))| Question {
                id: format!("q{}", i + 1),
                category: *category,
                text: (*text).to_string(),
                options: options
                    .iter()
                    .zip(["a", "b", "c", "d"])
                    .map(|(option_text, id)| AnswerOption {
                        id: id.to_string(),
                        text: (*option_text).to_string(),
                    })
                    .collect(),
            })
            .collect();

        Self { questions }
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn by_index(&self, index: u32) -> Option<&Question> {
        self.questions.get(index as usize)
    }

    pub fn by_id(&self, question_id: &str) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == question_id)
    }

    /// Check that `answer_id` is a valid option for the question at `index`
    pub fn validate_answer(&self, index: u32, answer_id: &str) -> crate::Result<()> {
        let question = self.by_index(index).ok_or_else(|| {
            crate::Error::InvalidInput(format!("Unknown question index {}", index))
        })?;
        if !question.has_option(answer_id) {
            return Err(crate::Error::InvalidInput(format!(
                "Answer '{}' is not an option for question {}",
                answer_id, question.id
            )));
        }
        Ok(())
    }

    /// Convert stored index-keyed answers into id-keyed responses
    ///
    /// An index outside the bank maps to a synthetic id that the scoring
    /// engine rejects as unknown.
    pub fn responses_for(&self, answers: &BTreeMap<u32, String>) -> Vec<QuestionResponse> {
        answers
            .iter()
            .map(|(index, answer)| {
                let question_id = self
                    .by_index(*index)
                    .map(|q| q.id.clone())
                    .unwrap_or_else(|| format!("#{}", index));
                QuestionResponse::new(question_id, answer.clone())
            })
            .collect()
    }
}

impl Default for QuestionBank {
    fn default() -> Self {
        Self::standard()
    }
}
