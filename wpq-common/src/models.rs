//! Session and attendee data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// A live quiz event identified by a short shareable code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    /// Short human-shareable code (unique)
    pub code: String,
    /// Display name chosen by the presenter
    pub name: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            code: code.into(),
            name: name.into(),
            active: true,
            created_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Flip the session to ended. Repeated calls keep the first end timestamp.
    pub fn end(&mut self, ended_at: DateTime<Utc>) {
        self.active = false;
        if self.ended_at.is_none() {
            self.ended_at = Some(ended_at);
        }
    }
}

/// Four normalized preference dimensions, each 0-10
///
/// Always derived from responses by the scoring engine, never edited directly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PreferenceScores {
    pub collaboration: u8,
    pub formality: u8,
    /// Older payloads call this field `tech`; it is read but never written.
    #[serde(alias = "tech")]
    pub technology: u8,
    pub wellness: u8,
}

impl PreferenceScores {
    pub const ZERO: PreferenceScores = PreferenceScores {
        collaboration: 0,
        formality: 0,
        technology: 0,
        wellness: 0,
    };

    pub fn new(collaboration: u8, formality: u8, technology: u8, wellness: u8) -> Self {
        Self {
            collaboration,
            formality,
            technology,
            wellness,
        }
    }
}

/// Generational cohort of an attendee
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Generation {
    BabyBoomer,
    GenX,
    Millennial,
    GenZ,
}

impl Generation {
    /// All cohorts in display order
    pub const ALL: [Generation; 4] = [
        Generation::BabyBoomer,
        Generation::GenX,
        Generation::Millennial,
        Generation::GenZ,
    ];

    /// Canonical label written to the store
    pub fn label(&self) -> &'static str {
        match self {
            Generation::BabyBoomer => "baby_boomer",
            Generation::GenX => "gen_x",
            Generation::Millennial => "millennial",
            Generation::GenZ => "gen_z",
        }
    }

    /// Human readable name
    pub fn display_name(&self) -> &'static str {
        match self {
            Generation::BabyBoomer => "Baby Boomers",
            Generation::GenX => "Gen X",
            Generation::Millennial => "Millennials",
            Generation::GenZ => "Gen Z",
        }
    }

    /// Parse a free-form cohort label. Returns `None` for unrecognized labels.
    pub fn from_label(label: &str) -> Option<Generation> {
        let normalized: String = label
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();

        match normalized.as_str() {
            "babyboomer" | "babyboomers" | "boomer" | "boomers" => Some(Generation::BabyBoomer),
            "genx" | "generationx" => Some(Generation::GenX),
            "millennial" | "millennials" | "geny" | "generationy" => Some(Generation::Millennial),
            "genz" | "generationz" | "zoomer" | "zoomers" => Some(Generation::GenZ),
            _ => None,
        }
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// A person who joined a session and answers questions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attendee {
    pub id: Uuid,
    pub session_id: Uuid,
    pub name: String,
    /// Raw cohort label as submitted; see [`Attendee::cohort`]
    pub generation: Option<String>,
    /// Question index → answer identifier
    #[serde(default)]
    pub responses: BTreeMap<u32, String>,
    pub preferences: Option<PreferenceScores>,
    #[serde(default)]
    pub completed: bool,
    pub joined_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Attendee {
    pub fn new(session_id: Uuid, name: impl Into<String>, generation: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            name: name.into(),
            generation,
            responses: BTreeMap::new(),
            preferences: None,
            completed: false,
            joined_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Recognized cohort, if the raw label parses
    pub fn cohort(&self) -> Option<Generation> {
        self.generation.as_deref().and_then(Generation::from_label)
    }

    /// Record (or overwrite) the answer for one question
    pub fn record_response(&mut self, question_index: u32, answer_id: impl Into<String>) {
        self.responses.insert(question_index, answer_id.into());
    }

    /// Mark complete with the computed scores. Keeps the first completion timestamp.
    pub fn mark_completed(&mut self, scores: PreferenceScores, completed_at: DateTime<Utc>) {
        self.preferences = Some(scores);
        self.completed = true;
        if self.completed_at.is_none() {
            self.completed_at = Some(completed_at);
        }
    }

    /// Merge a possibly older or newer copy of the same attendee
    ///
    /// Identity fields come from `other`; answers are unioned with `other`
    /// winning per question; completion is sticky. Applying the same merge
    /// twice yields the same record.
    pub fn merge_from(&mut self, other: &Attendee) {
        self.name = other.name.clone();
        if other.generation.is_some() {
            self.generation = other.generation.clone();
        }
        for (index, answer) in &other.responses {
            self.responses.insert(*index, answer.clone());
        }
        if other.preferences.is_some() {
            self.preferences = other.preferences;
        }
        self.completed = self.completed || other.completed;
        if self.completed_at.is_none() {
            self.completed_at = other.completed_at;
        }
        if other.joined_at < self.joined_at {
            self.joined_at = other.joined_at;
        }
    }
}

/// Keyed read result: one session plus all of its attendees
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session: Session,
    pub attendees: Vec<Attendee>,
}
